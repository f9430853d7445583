//! Local container driver.
//!
//! Images are prepared through [`ImageBuilder`], containers are started and
//! removed by the task executor, and enumeration goes straight to the
//! [`ContainerBackend`].

pub mod cli;
mod error;

use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};

use serde_json::Value;
use tracing::info;

use crate::context::RunContext;
use crate::executor::{ModuleArgs, TaskExecutor};
use crate::image::{BuildOutcome, ImageBuilder};
use crate::instance::{InstanceRecord, InstanceSpec, InstanceState, InstanceStatus};

use super::{ConnectionParams, Driver, DriverFuture, params};
pub use cli::{ContainerBackend, ContainerBackendError, ContainerSummary, DockerCli};
pub use error::DockerDriverError;

/// Name under which the driver is selected.
pub const DRIVER_NAME: &str = "docker";

const PROVIDERS: &[&str] = &[DRIVER_NAME];
const PLATFORMS: &[&str] = &[DRIVER_NAME];

/// Driver that runs each instance as a local container.
#[derive(Debug)]
pub struct DockerDriver<B: ContainerBackend, E: TaskExecutor> {
    backend: B,
    executor: E,
    images: ImageBuilder,
    platform: String,
    built_tags: Mutex<BTreeSet<String>>,
}

impl<B: ContainerBackend, E: TaskExecutor> DockerDriver<B, E> {
    /// Creates a driver from its collaborators.
    #[must_use]
    pub fn new(backend: B, executor: E, images: ImageBuilder) -> Self {
        Self {
            backend,
            executor,
            images,
            platform: DRIVER_NAME.to_owned(),
            built_tags: Mutex::new(BTreeSet::new()),
        }
    }

    /// Image builder used for tag resolution.
    #[must_use]
    pub const fn images(&self) -> &ImageBuilder {
        &self.images
    }

    fn prepare_image(&self, spec: &InstanceSpec) -> Result<String, DockerDriverError> {
        let tag = self.images.resolve_tag(spec);
        let mut available = self.backend.image_tags()?;
        let mut built = self
            .built_tags
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        available.extend(built.iter().cloned());

        let outcome = self
            .images
            .ensure_built(spec, &available, &self.executor)
            .map_err(|source| DockerDriverError::Image {
                instance: spec.name.clone(),
                source,
            })?;
        if outcome == BuildOutcome::Built {
            built.insert(tag.clone());
        }
        Ok(tag)
    }

    fn start(&self, spec: &InstanceSpec) -> Result<(), DockerDriverError> {
        let tag = self.prepare_image(spec)?;
        info!(instance = %spec.name, image = %tag, "starting container");
        self.executor
            .execute(
                self.executor.container_module().as_str(),
                &spec.start_arguments(&tag),
            )
            .map_err(|source| DockerDriverError::Task {
                action: "start",
                instance: spec.name.clone(),
                source,
            })?;
        Ok(())
    }

    fn remove(&self, spec: &InstanceSpec) -> Result<(), DockerDriverError> {
        let tag = self.images.resolve_tag(spec);
        info!(instance = %spec.name, image = %tag, "removing container");
        let mut args = ModuleArgs::new();
        args.insert(String::from("name"), Value::from(spec.name.as_str()));
        args.insert(String::from("image"), Value::from(tag));
        args.insert(String::from("state"), Value::from("absent"));
        self.executor
            .execute(self.executor.container_module().as_str(), &args)
            .map_err(|source| DockerDriverError::Task {
                action: "removal",
                instance: spec.name.clone(),
                source,
            })?;
        Ok(())
    }

    fn describe(&self, spec: &InstanceSpec) -> Result<InstanceStatus, DockerDriverError> {
        Ok(self.backend.find_container(&spec.name)?.map_or_else(
            || InstanceStatus::not_created(spec.name.as_str(), DRIVER_NAME),
            |container| InstanceStatus {
                name: spec.name.clone(),
                state: InstanceState::Live(container.status),
                provider: DRIVER_NAME.to_owned(),
                ports: container.ports,
            },
        ))
    }
}

impl<B: ContainerBackend, E: TaskExecutor> Driver for DockerDriver<B, E> {
    type Error = DockerDriverError;

    fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn provider(&self) -> &'static str {
        DRIVER_NAME
    }

    fn platform(&self) -> &str {
        &self.platform
    }

    fn set_platform(&mut self, platform: String) {
        self.platform = platform;
    }

    fn valid_providers(&self) -> &'static [&'static str] {
        PROVIDERS
    }

    fn valid_platforms(&self) -> &'static [&'static str] {
        PLATFORMS
    }

    fn connection_params(&self) -> ConnectionParams {
        params([("user", "root"), ("connection", "docker")])
    }

    fn testinfra_args(&self) -> ConnectionParams {
        params([("connection", "docker")])
    }

    fn serverspec_args(&self) -> ConnectionParams {
        ConnectionParams::new()
    }

    fn conf(&self) -> Option<String> {
        None
    }

    fn instances<'a>(
        &'a self,
        ctx: &'a RunContext,
    ) -> DriverFuture<'a, Vec<InstanceRecord>, Self::Error> {
        Box::pin(async move {
            let containers = self.backend.containers()?;
            Ok(InstanceRecord::annotate(
                ctx.instances(),
                containers.iter().map(|container| container.name.as_str()),
            ))
        })
    }

    fn up<'a>(&'a self, ctx: &'a RunContext) -> DriverFuture<'a, (), Self::Error> {
        Box::pin(async move {
            for spec in ctx.instances() {
                self.start(spec)?;
            }
            Ok(())
        })
    }

    fn destroy<'a>(&'a self, ctx: &'a RunContext) -> DriverFuture<'a, (), Self::Error> {
        Box::pin(async move {
            for spec in ctx.instances() {
                self.remove(spec)?;
            }
            Ok(())
        })
    }

    fn status<'a>(
        &'a self,
        ctx: &'a RunContext,
    ) -> DriverFuture<'a, Vec<InstanceStatus>, Self::Error> {
        Box::pin(async move {
            ctx.instances()
                .iter()
                .map(|spec| self.describe(spec))
                .collect()
        })
    }

    fn inventory_entry(&self, spec: &InstanceSpec) -> String {
        format!("{} ansible_connection=docker\n", spec.name)
    }

    fn login_cmd(&self, _spec: &InstanceSpec) -> String {
        String::from("docker exec -ti {} bash")
    }

    fn login_args(&self, spec: &InstanceSpec) -> Vec<String> {
        vec![spec.name.clone()]
    }
}
