//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::driver::docker::{ContainerBackend, ContainerBackendError, ContainerSummary};
use crate::executor::{
    ContainerModule, ExecutorError, IMAGE_MODULE, ModuleArgs, TaskExecutor, TaskReport,
};
use crate::runner::{CommandError, CommandOutput, CommandRunner};
use crate::state::{RunState, StateError, StateStore};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Extra environment variables passed to the program.
    pub env: Vec<(String, String)>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }

    /// Returns the value of an extra environment variable, if set.
    #[must_use]
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Pushes a successful exit status with empty output.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run_with_env(
        &self,
        program: &str,
        args: &[OsString],
        env: &[(&str, &str)],
    ) -> Result<CommandOutput, CommandError> {
        lock(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            env: env
                .iter()
                .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
                .collect(),
        });
        lock(&self.responses)
            .pop_front()
            .ok_or_else(|| CommandError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// One module invocation recorded by [`RecordingExecutor`].
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutedTask {
    /// Module name.
    pub module: String,
    /// Module arguments.
    pub args: ModuleArgs,
}

impl ExecutedTask {
    /// String value of an argument, if present.
    #[must_use]
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Default)]
struct EngineState {
    containers: BTreeMap<String, ContainerSummary>,
    images: BTreeSet<String>,
    tasks: Vec<ExecutedTask>,
    failures: BTreeMap<String, String>,
}

/// In-memory container engine shared by [`FakeBackend`] and
/// [`RecordingExecutor`].
///
/// Executed tasks mutate the engine the way the real modules would: image
/// builds add a tag, started containers appear and absent containers vanish.
#[derive(Clone, Debug)]
pub struct FakeEngine {
    state: Arc<Mutex<EngineState>>,
    module: ContainerModule,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEngine {
    /// Creates an empty engine that uses `docker_container`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_module(ContainerModule::DockerContainer)
    }

    /// Creates an empty engine that reports `module` as its container module.
    #[must_use]
    pub fn with_module(module: ContainerModule) -> Self {
        Self {
            state: Arc::new(Mutex::new(EngineState::default())),
            module,
        }
    }

    /// Seeds an available image tag.
    pub fn add_image(&self, tag: &str) {
        lock(&self.state).images.insert(tag.to_owned());
    }

    /// Seeds an existing container.
    pub fn add_container(&self, name: &str, status: &str, ports: &[&str]) {
        lock(&self.state).containers.insert(
            name.to_owned(),
            ContainerSummary {
                name: name.to_owned(),
                status: status.to_owned(),
                ports: ports.iter().map(|port| (*port).to_owned()).collect(),
            },
        );
    }

    /// Makes every call to `module` fail with `message`.
    pub fn fail_module(&self, module: &str, message: &str) {
        lock(&self.state)
            .failures
            .insert(module.to_owned(), message.to_owned());
    }

    /// Tasks executed so far, in order.
    #[must_use]
    pub fn tasks(&self) -> Vec<ExecutedTask> {
        lock(&self.state).tasks.clone()
    }

    /// Tasks executed for `module`, in order.
    #[must_use]
    pub fn tasks_for(&self, module: &str) -> Vec<ExecutedTask> {
        self.tasks()
            .into_iter()
            .filter(|task| task.module == module)
            .collect()
    }

    /// Names of the containers currently known to the engine.
    #[must_use]
    pub fn container_names(&self) -> Vec<String> {
        lock(&self.state).containers.keys().cloned().collect()
    }

    /// Backend view of the engine.
    #[must_use]
    pub fn backend(&self) -> FakeBackend {
        FakeBackend {
            engine: self.clone(),
        }
    }

    /// Executor view of the engine.
    #[must_use]
    pub fn executor(&self) -> RecordingExecutor {
        RecordingExecutor {
            engine: self.clone(),
        }
    }

    fn apply(&self, module: &str, args: &ModuleArgs) -> Result<TaskReport, ExecutorError> {
        let mut state = lock(&self.state);
        state.tasks.push(ExecutedTask {
            module: module.to_owned(),
            args: args.clone(),
        });
        if let Some(message) = state.failures.get(module) {
            return Err(ExecutorError::TaskFailed {
                module: module.to_owned(),
                message: message.clone(),
            });
        }

        let name = args.get("name").and_then(Value::as_str).unwrap_or_default();
        if module == IMAGE_MODULE {
            let changed = state.images.insert(name.to_owned());
            return Ok(TaskReport { changed });
        }
        if module != self.module.as_str() {
            return Ok(TaskReport::default());
        }
        let changed = match args.get("state").and_then(Value::as_str) {
            Some("absent") => state.containers.remove(name).is_some(),
            Some("started") => state
                .containers
                .insert(
                    name.to_owned(),
                    ContainerSummary {
                        name: name.to_owned(),
                        status: String::from("Up 1 second"),
                        ports: Vec::new(),
                    },
                )
                .is_none(),
            _ => false,
        };
        Ok(TaskReport { changed })
    }
}

/// [`ContainerBackend`] reading from a [`FakeEngine`].
#[derive(Clone, Debug)]
pub struct FakeBackend {
    engine: FakeEngine,
}

impl ContainerBackend for FakeBackend {
    fn containers(&self) -> Result<Vec<ContainerSummary>, ContainerBackendError> {
        Ok(lock(&self.engine.state).containers.values().cloned().collect())
    }

    fn image_tags(&self) -> Result<BTreeSet<String>, ContainerBackendError> {
        Ok(lock(&self.engine.state).images.clone())
    }

    fn find_container(
        &self,
        name: &str,
    ) -> Result<Option<ContainerSummary>, ContainerBackendError> {
        Ok(lock(&self.engine.state).containers.get(name).cloned())
    }
}

/// [`TaskExecutor`] that records tasks and applies them to a [`FakeEngine`].
#[derive(Clone, Debug)]
pub struct RecordingExecutor {
    engine: FakeEngine,
}

impl TaskExecutor for RecordingExecutor {
    fn execute(&self, module: &str, args: &ModuleArgs) -> Result<TaskReport, ExecutorError> {
        self.engine.apply(module, args)
    }

    fn container_module(&self) -> ContainerModule {
        self.engine.module
    }
}

/// [`StateStore`] kept in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryStateStore {
    state: Arc<Mutex<RunState>>,
    saves: Arc<Mutex<usize>>,
    save_error: Arc<Mutex<Option<StateError>>>,
}

impl MemoryStateStore {
    /// Creates a store holding `state`.
    #[must_use]
    pub fn with_state(state: RunState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            saves: Arc::default(),
            save_error: Arc::default(),
        }
    }

    /// Makes every subsequent save fail with `err`.
    pub fn fail_saves_with(&self, err: StateError) {
        *lock(&self.save_error) = Some(err);
    }

    /// Current state.
    #[must_use]
    pub fn snapshot(&self) -> RunState {
        lock(&self.state).clone()
    }

    /// Number of times the state was saved.
    #[must_use]
    pub fn save_count(&self) -> usize {
        *lock(&self.saves)
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<RunState, StateError> {
        Ok(self.snapshot())
    }

    fn save(&self, state: &RunState) -> Result<(), StateError> {
        if let Some(err) = lock(&self.save_error).clone() {
            return Err(err);
        }
        *lock(&self.state) = state.clone();
        *lock(&self.saves) += 1;
        Ok(())
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}

/// Produces `docker ps --format '{{json .}}'` output for
/// `(names, status, ports)` triples.
#[must_use]
pub fn json_containers(containers: &[(&str, &str, &str)]) -> String {
    containers
        .iter()
        .map(|(names, status, ports)| {
            serde_json::json!({
                "ID": "0123456789ab",
                "Names": names,
                "Status": status,
                "Ports": ports,
            })
            .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Produces `docker images --format '{{json .}}'` output for
/// `(repository, tag)` pairs.
#[must_use]
pub fn json_images(images: &[(&str, &str)]) -> String {
    images
        .iter()
        .map(|(repository, tag)| {
            serde_json::json!({ "Repository": repository, "Tag": tag }).to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Produces `ansible-playbook` JSON callback output for one task result.
#[must_use]
pub fn json_play_result(host_result: &Value) -> String {
    serde_json::json!({
        "plays": [{
            "play": { "name": "testbed" },
            "tasks": [{
                "task": { "name": "task" },
                "hosts": { "localhost": host_result },
            }],
        }],
        "stats": { "localhost": {} },
    })
    .to_string()
}
