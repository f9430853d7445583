//! Shared fixtures for lifecycle behavioural tests.

use std::sync::Arc;

use camino::Utf8PathBuf;
use rstest::fixture;
use tempfile::TempDir;
use testbed::driver::docker::DockerDriver;
use testbed::test_support::{FakeBackend, FakeEngine, MemoryStateStore, RecordingExecutor};
use testbed::{ImageBuilder, InstanceSpec, InstanceStatus, LifecycleOrchestrator, RunContext};

pub type TestOrchestrator =
    LifecycleOrchestrator<DockerDriver<FakeBackend, RecordingExecutor>, MemoryStateStore>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LifecycleOutcome {
    Success,
    Failure(String),
}

#[derive(Clone, Debug)]
pub struct LifecycleContext {
    pub engine: FakeEngine,
    pub store: MemoryStateStore,
    pub work_dir: Utf8PathBuf,
    pub instances: Vec<InstanceSpec>,
    pub outcome: Option<LifecycleOutcome>,
    pub statuses: Vec<InstanceStatus>,
    _tmp: Arc<TempDir>,
}

impl LifecycleContext {
    pub fn orchestrator(&self) -> TestOrchestrator {
        let driver = DockerDriver::new(
            self.engine.backend(),
            self.engine.executor(),
            ImageBuilder::new(self.work_dir.clone(), true),
        );
        LifecycleOrchestrator::new(driver, self.store.clone())
    }

    pub fn run_context(&self) -> RunContext {
        RunContext::new(self.instances.clone())
    }
}

#[fixture]
pub fn lifecycle_context() -> LifecycleContext {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("create temp dir: {err}"));
    let work_dir = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp path should be UTF-8: {}", path.display()));
    LifecycleContext {
        engine: FakeEngine::new(),
        store: MemoryStateStore::default(),
        work_dir,
        instances: Vec::new(),
        outcome: None,
        statuses: Vec::new(),
        _tmp: Arc::new(tmp),
    }
}
