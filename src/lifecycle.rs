//! Drives one driver through the create, destroy and status lifecycle.
//!
//! The orchestrator records the active driver and run identifier in the
//! [`StateStore`] before bringing instances up, so later invocations can find
//! them again without repeating configuration.

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::RunContext;
use crate::driver::{Driver, render_login};
use crate::instance::{InstanceRecord, InstanceSpec, InstanceStatus};
use crate::state::{RunState, StateError, StateStore};

/// Errors surfaced by lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError<DriverError>
where
    DriverError: std::error::Error + 'static,
{
    /// Raised when run state cannot be read or written.
    #[error(transparent)]
    State(#[from] StateError),
    /// Raised when the driver operation fails.
    #[error("{operation} failed: {source}")]
    Driver {
        /// Lifecycle operation that failed.
        operation: &'static str,
        /// Driver specific error.
        #[source]
        source: DriverError,
    },
    /// Raised when an operation names an instance that is not declared.
    #[error("instance '{name}' is not declared in the scenario")]
    UnknownInstance {
        /// Requested instance name.
        name: String,
    },
}

/// Runs lifecycle operations for a single driver.
#[derive(Debug)]
pub struct LifecycleOrchestrator<D, S> {
    driver: D,
    store: S,
}

impl<D, S> LifecycleOrchestrator<D, S>
where
    D: Driver,
    S: StateStore,
{
    /// Creates a new orchestrator.
    #[must_use]
    pub const fn new(driver: D, store: S) -> Self {
        Self { driver, store }
    }

    /// The active driver.
    #[must_use]
    pub const fn driver(&self) -> &D {
        &self.driver
    }

    /// Builds the context for this invocation, resuming the recorded run
    /// identifier when one exists.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::State`] when the run state cannot be read.
    pub fn context(
        &self,
        instances: Vec<InstanceSpec>,
    ) -> Result<RunContext, LifecycleError<D::Error>> {
        let state = self.store.load()?;
        let resumed = state
            .run_id
            .as_deref()
            .and_then(|raw| match Uuid::parse_str(raw) {
                Ok(run_id) => Some(run_id),
                Err(err) => {
                    warn!(run_id = raw, error = %err, "ignoring malformed run id");
                    None
                }
            });
        Ok(match resumed {
            Some(run_id) => RunContext::with_run_id(run_id, instances),
            None => RunContext::new(instances),
        })
    }

    /// Records the driver and run, then brings every instance up.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::State`] when the state cannot be saved, in
    /// which case the driver is never invoked, and
    /// [`LifecycleError::Driver`] when provisioning fails.
    pub async fn up(&self, ctx: &RunContext) -> Result<(), LifecycleError<D::Error>> {
        self.store.save(&RunState {
            driver: Some(self.driver.name().to_owned()),
            run_id: Some(ctx.run_id().to_string()),
        })?;
        info!(
            driver = self.driver.name(),
            run_id = %ctx.run_id(),
            instances = ctx.instances().len(),
            "bringing instances up"
        );
        self.driver
            .up(ctx)
            .await
            .map_err(|source| LifecycleError::Driver {
                operation: "create",
                source,
            })
    }

    /// Removes every declared instance and forgets the run identifier.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Driver`] when teardown fails and
    /// [`LifecycleError::State`] when the state cannot be updated.
    pub async fn destroy(&self, ctx: &RunContext) -> Result<(), LifecycleError<D::Error>> {
        info!(driver = self.driver.name(), "destroying instances");
        self.driver
            .destroy(ctx)
            .await
            .map_err(|source| LifecycleError::Driver {
                operation: "destroy",
                source,
            })?;
        let mut state = self.store.load()?;
        state.run_id = None;
        self.store.save(&state)?;
        Ok(())
    }

    /// Status of every declared instance.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Driver`] when the backend lookup fails.
    pub async fn status(
        &self,
        ctx: &RunContext,
    ) -> Result<Vec<InstanceStatus>, LifecycleError<D::Error>> {
        self.driver
            .status(ctx)
            .await
            .map_err(|source| LifecycleError::Driver {
                operation: "status",
                source,
            })
    }

    /// Declared instances annotated with their `created` flag.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Driver`] when the backend lookup fails.
    pub async fn instances(
        &self,
        ctx: &RunContext,
    ) -> Result<Vec<InstanceRecord>, LifecycleError<D::Error>> {
        self.driver
            .instances(ctx)
            .await
            .map_err(|source| LifecycleError::Driver {
                operation: "list",
                source,
            })
    }

    /// Inventory document with one entry per declared instance.
    #[must_use]
    pub fn inventory(&self, ctx: &RunContext) -> String {
        ctx.instances()
            .iter()
            .map(|spec| self.driver.inventory_entry(spec))
            .collect()
    }

    /// Shell command that opens an interactive session on `name`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::UnknownInstance`] when `name` is not declared.
    pub fn login(&self, ctx: &RunContext, name: &str) -> Result<String, LifecycleError<D::Error>> {
        let spec = ctx
            .instance(name)
            .ok_or_else(|| LifecycleError::UnknownInstance {
                name: name.to_owned(),
            })?;
        Ok(render_login(
            &self.driver.login_cmd(spec),
            &self.driver.login_args(spec),
        ))
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    use super::*;
    use crate::driver::docker::DockerDriver;
    use crate::image::ImageBuilder;
    use crate::instance::InstanceState;
    use crate::test_support::{FakeBackend, FakeEngine, MemoryStateStore, RecordingExecutor};
    use rstest::{fixture, rstest};

    type TestOrchestrator =
        LifecycleOrchestrator<DockerDriver<FakeBackend, RecordingExecutor>, MemoryStateStore>;

    struct LifecycleFixture {
        _tmp: TempDir,
        engine: FakeEngine,
        store: MemoryStateStore,
        orchestrator: TestOrchestrator,
    }

    #[fixture]
    fn lifecycle() -> LifecycleFixture {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let work_dir = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
        let engine = FakeEngine::new();
        let store = MemoryStateStore::default();
        let driver = DockerDriver::new(
            engine.backend(),
            engine.executor(),
            ImageBuilder::new(work_dir, true),
        );
        LifecycleFixture {
            _tmp: tmp,
            engine,
            store: store.clone(),
            orchestrator: LifecycleOrchestrator::new(driver, store),
        }
    }

    fn specs() -> Vec<InstanceSpec> {
        vec![
            InstanceSpec::new("web1", "ubuntu", "18.04"),
            InstanceSpec::new("db1", "centos", "7"),
        ]
    }

    #[rstest]
    #[tokio::test]
    async fn up_records_the_driver_and_run(lifecycle: LifecycleFixture) {
        let ctx = RunContext::new(specs());

        lifecycle
            .orchestrator
            .up(&ctx)
            .await
            .unwrap_or_else(|err| panic!("up: {err}"));

        assert_eq!(
            lifecycle.store.snapshot(),
            RunState {
                driver: Some(String::from("docker")),
                run_id: Some(ctx.run_id().to_string()),
            }
        );
        assert_eq!(lifecycle.engine.container_names(), ["db1", "web1"]);
    }

    #[rstest]
    #[tokio::test]
    async fn state_failures_prevent_provisioning(lifecycle: LifecycleFixture) {
        lifecycle.store.fail_saves_with(StateError::Io {
            path: Utf8PathBuf::from(".testbed/state.toml"),
            message: String::from("read-only file system"),
        });

        let err = lifecycle
            .orchestrator
            .up(&RunContext::new(specs()))
            .await
            .expect_err("state failure should abort");

        assert!(matches!(err, LifecycleError::State(_)));
        assert!(lifecycle.engine.tasks().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn driver_failures_name_the_operation(lifecycle: LifecycleFixture) {
        lifecycle
            .engine
            .fail_module("docker_container", "no space left on device");

        let err = lifecycle
            .orchestrator
            .up(&RunContext::new(specs()))
            .await
            .expect_err("driver failure should surface");

        assert!(matches!(err, LifecycleError::Driver { operation: "create", .. }));
        assert!(err.to_string().contains("no space left on device"));
        assert_eq!(lifecycle.store.save_count(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn destroy_clears_the_run_but_keeps_the_driver(lifecycle: LifecycleFixture) {
        let ctx = RunContext::new(specs());
        lifecycle
            .orchestrator
            .up(&ctx)
            .await
            .unwrap_or_else(|err| panic!("up: {err}"));

        lifecycle
            .orchestrator
            .destroy(&ctx)
            .await
            .unwrap_or_else(|err| panic!("destroy: {err}"));

        assert_eq!(
            lifecycle.store.snapshot(),
            RunState {
                driver: Some(String::from("docker")),
                run_id: None,
            }
        );
        assert!(lifecycle.engine.container_names().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn status_and_instances_follow_the_driver(lifecycle: LifecycleFixture) {
        lifecycle.engine.add_container("web1", "Up 5 minutes", &[]);
        let ctx = RunContext::new(specs());

        let statuses = lifecycle
            .orchestrator
            .status(&ctx)
            .await
            .unwrap_or_else(|err| panic!("status: {err}"));
        let records = lifecycle
            .orchestrator
            .instances(&ctx)
            .await
            .unwrap_or_else(|err| panic!("instances: {err}"));

        let states = statuses
            .iter()
            .map(|status| status.state.clone())
            .collect::<Vec<_>>();
        assert_eq!(
            states,
            [
                InstanceState::Live(String::from("Up 5 minutes")),
                InstanceState::NotCreated,
            ]
        );
        assert!(records.first().is_some_and(|record| record.created));
        assert!(records.get(1).is_some_and(|record| !record.created));
    }

    #[rstest]
    fn context_resumes_the_recorded_run(lifecycle: LifecycleFixture) {
        let run_id = Uuid::new_v4();
        let store = MemoryStateStore::with_state(RunState {
            driver: Some(String::from("docker")),
            run_id: Some(run_id.to_string()),
        });
        let orchestrator = LifecycleOrchestrator::new(lifecycle.orchestrator.driver, store);

        let ctx = orchestrator
            .context(specs())
            .unwrap_or_else(|err| panic!("context: {err}"));

        assert_eq!(ctx.run_id(), run_id);
    }

    #[rstest]
    fn malformed_run_ids_start_a_fresh_run(lifecycle: LifecycleFixture) {
        let store = MemoryStateStore::with_state(RunState {
            driver: None,
            run_id: Some(String::from("not-a-uuid")),
        });
        let orchestrator = LifecycleOrchestrator::new(lifecycle.orchestrator.driver, store);

        let ctx = orchestrator
            .context(specs())
            .unwrap_or_else(|err| panic!("context: {err}"));

        assert_eq!(ctx.instances().len(), 2);
    }

    #[rstest]
    fn inventory_and_login_use_the_driver_helpers(lifecycle: LifecycleFixture) {
        let ctx = RunContext::new(specs());

        assert_eq!(
            lifecycle.orchestrator.inventory(&ctx),
            "web1 ansible_connection=docker\ndb1 ansible_connection=docker\n"
        );
        assert_eq!(
            lifecycle
                .orchestrator
                .login(&ctx, "db1")
                .unwrap_or_else(|err| panic!("login: {err}")),
            "docker exec -ti db1 bash"
        );
        assert!(matches!(
            lifecycle.orchestrator.login(&ctx, "ghost"),
            Err(LifecycleError::UnknownInstance { .. })
        ));
    }
}
