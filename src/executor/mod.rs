//! Adapter around the external automation engine.
//!
//! Each call submits a one-task play against `localhost` with fact gathering
//! disabled and blocks until the engine finishes. The engine version is
//! detected once, when the adapter is built, to choose the container module.

mod report;
mod version;

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{debug, info};

use crate::runner::{CommandError, CommandRunner};

use report::TaskVerdict;
pub use version::{ContainerModule, EngineVersion, IMAGE_MODULE};

/// File name of the generated play inside the state directory.
pub const PLAY_FILE_NAME: &str = "task.yml";

/// Keyword arguments for a module invocation.
pub type ModuleArgs = Map<String, Value>;

/// Errors raised by the task executor.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ExecutorError {
    /// Raised when the engine reports a failed task. The message is the
    /// engine's own, unmodified.
    #[error("{module} task failed: {message}")]
    TaskFailed {
        /// Module that was invoked.
        module: String,
        /// Failure message reported by the engine.
        message: String,
    },
    /// Raised when `ansible --version` output carries no version.
    #[error("could not detect the automation engine version from: {output}")]
    VersionDetection {
        /// Raw output of the version command.
        output: String,
    },
    /// Raised when the generated play cannot be written.
    #[error("failed to write play {path}: {message}")]
    PlayWrite {
        /// Target path.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the engine cannot be run at all.
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Outcome of a successful task.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TaskReport {
    /// Whether the engine reported a change on the target.
    pub changed: bool,
}

/// Runs one declarative module invocation and reports success or failure.
pub trait TaskExecutor: Send + Sync {
    /// Executes `module` with `args` against localhost.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::TaskFailed`] when the engine reports a
    /// failure, or another [`ExecutorError`] when the engine cannot run.
    fn execute(&self, module: &str, args: &ModuleArgs) -> Result<TaskReport, ExecutorError>;

    /// Container module selected for the detected engine version.
    fn container_module(&self) -> ContainerModule;
}

/// Paths and binaries used by [`AnsibleExecutor`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecutorSettings {
    /// `ansible` binary, used for version detection.
    pub ansible_bin: String,
    /// `ansible-playbook` binary, used to run plays.
    pub ansible_playbook_bin: String,
    /// Directory receiving the generated play file.
    pub state_dir: Utf8PathBuf,
}

/// [`TaskExecutor`] backed by `ansible-playbook`.
#[derive(Clone, Debug)]
pub struct AnsibleExecutor<R: CommandRunner> {
    settings: ExecutorSettings,
    runner: R,
    version: EngineVersion,
    container_module: ContainerModule,
}

impl<R: CommandRunner> AnsibleExecutor<R> {
    /// Builds the adapter and detects the engine version.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::Command`] when `ansible --version` cannot run
    /// or fails, and [`ExecutorError::VersionDetection`] when its output has
    /// no recognisable version.
    pub fn new(settings: ExecutorSettings, runner: R) -> Result<Self, ExecutorError> {
        let output = runner.run(&settings.ansible_bin, &[OsString::from("--version")])?;
        if !output.is_success() {
            return Err(CommandError::failure(&settings.ansible_bin, &output).into());
        }
        let version =
            EngineVersion::parse(&output.stdout).ok_or_else(|| ExecutorError::VersionDetection {
                output: output.stdout.trim().to_owned(),
            })?;
        let container_module = ContainerModule::for_version(&version);
        debug!(%version, module = container_module.as_str(), "detected automation engine");

        Ok(Self {
            settings,
            runner,
            version,
            container_module,
        })
    }

    /// Engine version detected at construction.
    #[must_use]
    pub const fn version(&self) -> &EngineVersion {
        &self.version
    }

    /// Path of the generated play file.
    #[must_use]
    pub fn play_path(&self) -> Utf8PathBuf {
        self.settings.state_dir.join(PLAY_FILE_NAME)
    }

    fn write_play(&self, play: &Value) -> Result<Utf8PathBuf, ExecutorError> {
        let path = self.play_path();
        let write_error = |message: String| ExecutorError::PlayWrite {
            path: path.clone(),
            message,
        };
        let rendered =
            serde_json::to_string_pretty(play).map_err(|err| write_error(err.to_string()))?;
        write_file(&self.settings.state_dir, PLAY_FILE_NAME, &rendered)
            .map_err(|err| write_error(err.to_string()))?;
        Ok(path)
    }
}

impl<R: CommandRunner> TaskExecutor for AnsibleExecutor<R> {
    fn execute(&self, module: &str, args: &ModuleArgs) -> Result<TaskReport, ExecutorError> {
        let play = single_task_play(module, args);
        let play_path = self.write_play(&play)?;
        let cmd_args = [
            OsString::from("-i"),
            OsString::from("localhost,"),
            OsString::from("-c"),
            OsString::from("local"),
            OsString::from(play_path.as_str()),
        ];
        debug!(module, path = %play_path, "submitting task");
        let output = self.runner.run_with_env(
            &self.settings.ansible_playbook_bin,
            &cmd_args,
            &[
                ("ANSIBLE_STDOUT_CALLBACK", "json"),
                ("ANSIBLE_RETRY_FILES_ENABLED", "false"),
            ],
        )?;

        match report::interpret(&output.stdout) {
            TaskVerdict::Ok { changed } if output.is_success() => {
                info!(module, changed, "task succeeded");
                Ok(TaskReport { changed })
            }
            TaskVerdict::Failed(message) => Err(ExecutorError::TaskFailed {
                module: module.to_owned(),
                message,
            }),
            TaskVerdict::Ok { .. } | TaskVerdict::Unknown => {
                if output.is_success() {
                    return Ok(TaskReport::default());
                }
                let stderr = output.stderr.trim();
                let message = if stderr.is_empty() {
                    format!(
                        "{} exited with status {}",
                        self.settings.ansible_playbook_bin,
                        output.status_text()
                    )
                } else {
                    stderr.to_owned()
                };
                Err(ExecutorError::TaskFailed {
                    module: module.to_owned(),
                    message,
                })
            }
        }
    }

    fn container_module(&self) -> ContainerModule {
        self.container_module
    }
}

/// Builds the one-task play submitted for every module invocation.
#[must_use]
pub fn single_task_play(module: &str, args: &ModuleArgs) -> Value {
    json!([{
        "name": "testbed",
        "hosts": "localhost",
        "gather_facts": false,
        "tasks": [{
            "name": module,
            "action": {
                "module": module,
                "args": args,
            },
        }],
    }])
}

fn write_file(dir_path: &Utf8Path, file_name: &str, contents: &str) -> std::io::Result<()> {
    Dir::create_ambient_dir_all(dir_path, ambient_authority())?;
    let dir = Dir::open_ambient_dir(dir_path, ambient_authority())?;
    dir.write(file_name, contents)
}
