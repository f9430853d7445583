//! Core library for the `testbed` provisioning tool.
//!
//! The crate turns a declarative list of test instances into idempotent
//! create, destroy and status operations across interchangeable drivers: a
//! local container driver that builds provisioning-ready images through an
//! automation engine, and a Scaleway driver that boots cloud servers and waits
//! until they accept SSH connections.

pub mod config;
pub mod context;
pub mod driver;
pub mod executor;
pub mod image;
pub mod instance;
pub mod lifecycle;
pub mod runner;
pub mod scenario;
pub mod state;
pub mod telemetry;
pub mod test_support;
pub mod wait;

pub use config::{ConfigError, ScalewayConfig, TestbedConfig};
pub use context::RunContext;
pub use driver::docker::{DockerDriver, DockerDriverError};
pub use driver::scaleway::{ScalewayDriver, ScalewayDriverError};
pub use driver::{ConnectionParams, Driver, DriverFuture};
pub use executor::{AnsibleExecutor, ExecutorError, TaskExecutor};
pub use image::{ImageBuilder, ImageError};
pub use instance::{InstanceRecord, InstanceSpec, InstanceState, InstanceStatus};
pub use lifecycle::{LifecycleError, LifecycleOrchestrator};
pub use runner::{CommandError, CommandOutput, CommandRunner, ProcessCommandRunner};
pub use scenario::{Scenario, ScenarioError};
pub use state::{FileStateStore, RunState, StateError, StateStore};
