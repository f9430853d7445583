//! Readiness, connectivity and teardown waits for the Scaleway driver.

use std::io;
use std::net::{IpAddr, SocketAddr};

use tokio::net::TcpStream;
use tracing::debug;

use crate::context::RunContext;
use crate::wait::{RetryPolicy, WaitError, poll_until, retry};

use super::api::{ServerApi, ServerSnapshot};
use super::{ScalewayDriver, ScalewayDriverError};

const PENDING_STATES: &[&str] = &["starting", "stopped", "stopped in place"];

fn map_wait_error(
    err: WaitError<ScalewayDriverError>,
    action: &'static str,
    instance: &str,
) -> ScalewayDriverError {
    match err {
        WaitError::Exhausted { .. } => ScalewayDriverError::Timeout {
            action,
            instance: instance.to_owned(),
        },
        WaitError::Cancelled => ScalewayDriverError::Cancelled {
            action,
            instance: instance.to_owned(),
        },
        WaitError::Fatal(inner) => inner,
    }
}

/// Whether a failed connection attempt is worth repeating.
pub(super) fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::TimedOut
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
    )
}

impl<A: ServerApi> ScalewayDriver<A> {
    fn policy(&self) -> RetryPolicy {
        RetryPolicy::covering(self.waits.wait_timeout, self.waits.poll_interval)
    }

    async fn running_snapshot(
        &self,
        zone: &str,
        instance: &str,
    ) -> Result<Option<ServerSnapshot>, ScalewayDriverError> {
        let Some(server) = self.api.find_server(zone, instance).await? else {
            return Ok(None);
        };
        match server.state.as_str() {
            "running" if server.public_ip.is_some() => Ok(Some(server)),
            "running" => Ok(None),
            state if PENDING_STATES.contains(&state) => {
                debug!(instance, state, "server not running yet");
                Ok(None)
            }
            _ => Err(ScalewayDriverError::UnexpectedState {
                instance: instance.to_owned(),
                state: server.state,
            }),
        }
    }

    /// Polls until the server is running with a public address.
    pub(super) async fn wait_until_running(
        &self,
        ctx: &RunContext,
        zone: &str,
        instance: &str,
    ) -> Result<ServerSnapshot, ScalewayDriverError> {
        poll_until(self.policy(), ctx.cancellation(), || {
            self.running_snapshot(zone, instance)
        })
        .await
        .map_err(|err| map_wait_error(err, "running state", instance))
    }

    async fn connect_once(&self, address: SocketAddr) -> io::Result<()> {
        match tokio::time::timeout(self.waits.connect_timeout, TcpStream::connect(address)).await
        {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(_elapsed) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect to {address} timed out"),
            )),
        }
    }

    /// Retries a TCP connection to the SSH port until it is accepted.
    pub(super) async fn wait_for_connectivity(
        &self,
        ctx: &RunContext,
        instance: &str,
        server: &ServerSnapshot,
    ) -> Result<(), ScalewayDriverError> {
        let raw_ip = server.public_ip.as_deref().unwrap_or_default();
        let ip: IpAddr = raw_ip.parse().map_err(|_| ScalewayDriverError::Probe {
            instance: instance.to_owned(),
            message: format!("invalid public address '{raw_ip}'"),
        })?;
        let address = SocketAddr::new(ip, self.ssh_port);
        debug!(instance, %address, "probing connectivity");

        retry(
            self.policy(),
            ctx.cancellation(),
            || self.connect_once(address),
            is_transient,
        )
        .await
        .map_err(|err| match err {
            WaitError::Fatal(io_err) => ScalewayDriverError::Probe {
                instance: instance.to_owned(),
                message: io_err.to_string(),
            },
            WaitError::Exhausted { .. } => ScalewayDriverError::Timeout {
                action: "connectivity",
                instance: instance.to_owned(),
            },
            WaitError::Cancelled => ScalewayDriverError::Cancelled {
                action: "connectivity",
                instance: instance.to_owned(),
            },
        })
    }

    async fn absent(&self, zone: &str, instance: &str) -> Result<Option<()>, ScalewayDriverError> {
        Ok(self
            .api
            .find_server(zone, instance)
            .await?
            .is_none()
            .then_some(()))
    }

    /// Polls until the server no longer appears in listings.
    pub(super) async fn wait_until_gone(
        &self,
        ctx: &RunContext,
        zone: &str,
        instance: &str,
    ) -> Result<(), ScalewayDriverError> {
        poll_until(self.policy(), ctx.cancellation(), || self.absent(zone, instance))
            .await
            .map_err(|err| map_wait_error(err, "removal", instance))
    }
}
