//! Parsing of the engine's JSON stdout callback.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Default, Deserialize)]
struct PlaybookReport {
    #[serde(default)]
    plays: Vec<PlayReport>,
}

#[derive(Debug, Default, Deserialize)]
struct PlayReport {
    #[serde(default)]
    tasks: Vec<TaskReport>,
}

#[derive(Debug, Default, Deserialize)]
struct TaskReport {
    #[serde(default)]
    hosts: BTreeMap<String, HostResult>,
}

#[derive(Debug, Default, Deserialize)]
struct HostResult {
    #[serde(default)]
    changed: bool,
    #[serde(default)]
    failed: bool,
    #[serde(default)]
    unreachable: bool,
    #[serde(default)]
    msg: Option<Value>,
}

/// What the engine reported for the single submitted task.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(super) enum TaskVerdict {
    /// The task ran; `changed` mirrors the engine's change flag.
    Ok {
        /// Whether the task changed the target.
        changed: bool,
    },
    /// The task failed with the engine's own message.
    Failed(String),
    /// No parseable report was found.
    Unknown,
}

/// Interprets stdout produced with `ANSIBLE_STDOUT_CALLBACK=json`.
pub(super) fn interpret(stdout: &str) -> TaskVerdict {
    let Some(start) = stdout.find('{') else {
        return TaskVerdict::Unknown;
    };
    let Some(body) = stdout.get(start..) else {
        return TaskVerdict::Unknown;
    };
    let Ok(report) = serde_json::from_str::<PlaybookReport>(body) else {
        return TaskVerdict::Unknown;
    };

    let results = report
        .plays
        .iter()
        .flat_map(|play| play.tasks.iter())
        .flat_map(|task| task.hosts.values())
        .collect::<Vec<_>>();

    if results.is_empty() {
        return TaskVerdict::Unknown;
    }

    if let Some(failure) = results.iter().find(|host| host.failed || host.unreachable) {
        return TaskVerdict::Failed(render_message(failure.msg.as_ref()));
    }

    TaskVerdict::Ok {
        changed: results.iter().any(|host| host.changed),
    }
}

fn render_message(msg: Option<&Value>) -> String {
    match msg {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => String::from("task failed without a message"),
    }
}
