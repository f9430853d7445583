//! Cloud VM driver backed by Scaleway Instances.
//!
//! Servers are created stopped so the bootstrap script can be attached as
//! cloud-init user data, then powered on. `up` only returns once every server
//! is running and accepts TCP connections on its SSH port.

pub mod api;
mod error;
mod image;
mod wait;

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::ScalewayConfig;
use crate::context::RunContext;
use crate::image::manifest::bootstrap_script;
use crate::instance::{InstanceRecord, InstanceSpec, InstanceState, InstanceStatus};

use super::{ConnectionParams, Driver, DriverFuture, params};
use api::{ImageQuery, ServerRequest, ServerSnapshot, TESTBED_TAG};
pub use api::{ScalewayHttpApi, ServerApi};
pub use error::ScalewayDriverError;

/// Name under which the driver is selected.
pub const DRIVER_NAME: &str = "scaleway";

const PROVIDERS: &[&str] = &[DRIVER_NAME];
const PLATFORMS: &[&str] = &[DRIVER_NAME];
const DEFAULT_SSH_PORT: u16 = 22;
const POLL_INTERVAL: Duration = Duration::from_secs(5);
const WAIT_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Bounds applied to the readiness, probe and teardown waits.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WaitSettings {
    /// Pause between polls.
    pub poll_interval: Duration,
    /// Upper bound for each wait.
    pub wait_timeout: Duration,
    /// Timeout for a single TCP connection attempt.
    pub connect_timeout: Duration,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            wait_timeout: WAIT_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}

/// Driver that runs each instance as a Scaleway server.
pub struct ScalewayDriver<A: ServerApi> {
    api: A,
    config: ScalewayConfig,
    platform: String,
    ssh_port: u16,
    waits: WaitSettings,
}

impl<A: ServerApi> ScalewayDriver<A> {
    /// Creates a driver after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayDriverError::Config`] when a required setting is
    /// missing.
    pub fn new(api: A, config: ScalewayConfig) -> Result<Self, ScalewayDriverError> {
        config.validate()?;
        Ok(Self {
            api,
            config,
            platform: DRIVER_NAME.to_owned(),
            ssh_port: DEFAULT_SSH_PORT,
            waits: WaitSettings::default(),
        })
    }

    /// Overrides the wait bounds.
    #[must_use]
    pub const fn with_waits(mut self, waits: WaitSettings) -> Self {
        self.waits = waits;
        self
    }

    /// Overrides the port probed for connectivity.
    #[must_use]
    pub const fn with_ssh_port(mut self, port: u16) -> Self {
        self.ssh_port = port;
        self
    }

    fn zone_for<'a>(&'a self, spec: &'a InstanceSpec) -> &'a str {
        spec.option_str("zone")
            .unwrap_or(self.config.default_zone.as_str())
    }

    fn image_query(&self, spec: &InstanceSpec) -> ImageQuery {
        ImageQuery {
            label: spec.option_str("image_label").map_or_else(
                || format!("{} {}", spec.image, spec.image_version),
                ToOwned::to_owned,
            ),
            architecture: spec
                .option_str("architecture")
                .unwrap_or(self.config.default_architecture.as_str())
                .to_owned(),
            zone: self.zone_for(spec).to_owned(),
            project_id: self.config.default_project_id.clone(),
            organisation_id: self.config.default_organization_id.clone(),
        }
    }

    fn server_request(&self, ctx: &RunContext, spec: &InstanceSpec, image_id: String) -> ServerRequest {
        ServerRequest {
            name: spec.name.clone(),
            zone: self.zone_for(spec).to_owned(),
            commercial_type: spec
                .option_str("instance_type")
                .unwrap_or(self.config.default_instance_type.as_str())
                .to_owned(),
            image_id,
            project_id: self.config.default_project_id.clone(),
            organisation_id: self.config.default_organization_id.clone(),
            tags: vec![
                TESTBED_TAG.to_owned(),
                format!("{TESTBED_TAG}-run-{}", ctx.run_id().simple()),
            ],
            cloud_init: Some(
                spec.option_str("cloud_init")
                    .map_or_else(bootstrap_script, ToOwned::to_owned),
            ),
        }
    }

    async fn provision(
        &self,
        ctx: &RunContext,
        spec: &InstanceSpec,
    ) -> Result<(), ScalewayDriverError> {
        let zone = self.zone_for(spec);
        let server = if let Some(existing) = self.api.find_server(zone, &spec.name).await? {
            debug!(instance = %spec.name, state = %existing.state, "reusing existing server");
            existing
        } else {
            let query = self.image_query(spec);
            let image_id = self.api.resolve_image(&query).await?;
            info!(instance = %spec.name, image = %query.label, zone, "creating server");
            let request = self.server_request(ctx, spec, image_id);
            self.api.create_server(&request).await?
        };

        self.power_on_if_needed(zone, &spec.name, &server).await?;
        let running = self.wait_until_running(ctx, zone, &spec.name).await?;
        self.wait_for_connectivity(ctx, &spec.name, &running).await?;
        info!(instance = %spec.name, "server ready");
        Ok(())
    }

    async fn power_on_if_needed(
        &self,
        zone: &str,
        instance: &str,
        server: &ServerSnapshot,
    ) -> Result<(), ScalewayDriverError> {
        if matches!(server.state.as_str(), "running" | "starting") {
            return Ok(());
        }
        if server.allows("poweron") {
            info!(instance, "powering on server");
            return self.api.perform_action(zone, &server.id, "poweron").await;
        }
        Err(ScalewayDriverError::PowerOnNotAllowed {
            instance: instance.to_owned(),
            state: server.state.clone(),
        })
    }

    async fn teardown(
        &self,
        ctx: &RunContext,
        spec: &InstanceSpec,
    ) -> Result<(), ScalewayDriverError> {
        let zone = self.zone_for(spec);
        let Some(server) = self.api.find_server(zone, &spec.name).await? else {
            debug!(instance = %spec.name, "server already absent");
            return Ok(());
        };
        info!(instance = %spec.name, id = %server.id, "removing server");
        if server.allows("terminate") {
            self.api.perform_action(zone, &server.id, "terminate").await?;
        } else {
            self.api.delete_server(zone, &server.id).await?;
        }
        self.wait_until_gone(ctx, zone, &spec.name).await
    }

    async fn describe(&self, spec: &InstanceSpec) -> Result<InstanceStatus, ScalewayDriverError> {
        let server = self.api.find_server(self.zone_for(spec), &spec.name).await?;
        Ok(server.map_or_else(
            || InstanceStatus::not_created(spec.name.as_str(), DRIVER_NAME),
            |found| InstanceStatus {
                name: spec.name.clone(),
                state: InstanceState::Live(found.state),
                provider: DRIVER_NAME.to_owned(),
                ports: found
                    .public_ip
                    .map(|ip| format!("{ip}:{}", self.ssh_port))
                    .into_iter()
                    .collect(),
            },
        ))
    }
}

impl<A: ServerApi> Driver for ScalewayDriver<A> {
    type Error = ScalewayDriverError;

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
        params([("user", "root"), ("connection", "ssh")])
    }

    fn testinfra_args(&self) -> ConnectionParams {
        params([("connection", "ssh")])
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
            let zones = ctx
                .instances()
                .iter()
                .map(|spec| self.zone_for(spec))
                .collect::<BTreeSet<_>>();
            let mut names = Vec::new();
            for zone in zones {
                names.extend(
                    self.api
                        .list_servers(zone)
                        .await?
                        .into_iter()
                        .map(|server| server.name),
                );
            }
            Ok(InstanceRecord::annotate(
                ctx.instances(),
                names.iter().map(String::as_str),
            ))
        })
    }

    fn up<'a>(&'a self, ctx: &'a RunContext) -> DriverFuture<'a, (), Self::Error> {
        Box::pin(async move {
            for spec in ctx.instances() {
                self.provision(ctx, spec).await?;
            }
            Ok(())
        })
    }

    fn destroy<'a>(&'a self, ctx: &'a RunContext) -> DriverFuture<'a, (), Self::Error> {
        Box::pin(async move {
            for spec in ctx.instances() {
                self.teardown(ctx, spec).await?;
            }
            Ok(())
        })
    }

    fn status<'a>(
        &'a self,
        ctx: &'a RunContext,
    ) -> DriverFuture<'a, Vec<InstanceStatus>, Self::Error> {
        Box::pin(async move {
            let mut statuses = Vec::with_capacity(ctx.instances().len());
            for spec in ctx.instances() {
                statuses.push(self.describe(spec).await?);
            }
            Ok(statuses)
        })
    }

    fn inventory_entry(&self, spec: &InstanceSpec) -> String {
        format!("{} connection=ssh\n", spec.name)
    }

    fn login_cmd(&self, _spec: &InstanceSpec) -> String {
        String::from("ssh -t {} bash")
    }

    fn login_args(&self, spec: &InstanceSpec) -> Vec<String> {
        vec![format!("root@{}", spec.name)]
    }
}
