//! Driver abstraction for provisioning disposable test instances.
//!
//! A driver turns the declared [`InstanceSpec`] list of a [`RunContext`] into
//! idempotent create, destroy and status operations against one backend.
//! The binary picks exactly one implementation by name per run.

pub mod docker;
pub mod scaleway;

use std::future::Future;
use std::pin::Pin;

use serde_json::{Map, Value};

use crate::context::RunContext;
use crate::instance::{InstanceRecord, InstanceSpec, InstanceStatus};

/// Future returned by driver operations.
pub type DriverFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Key/value parameters handed to downstream test-framework adapters.
pub type ConnectionParams = Map<String, Value>;

/// Lifecycle contract implemented by every backend.
pub trait Driver: Send + Sync {
    /// Backend specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Driver name as selected in configuration (for example `docker`).
    fn name(&self) -> &'static str;

    /// Provider currently targeted by the driver.
    fn provider(&self) -> &'static str;

    /// Platform currently targeted by the driver.
    fn platform(&self) -> &str;

    /// Changes the targeted platform.
    fn set_platform(&mut self, platform: String);

    /// Providers this driver can talk to.
    fn valid_providers(&self) -> &'static [&'static str];

    /// Platforms this driver can target.
    fn valid_platforms(&self) -> &'static [&'static str];

    /// Connection parameters for the automation engine.
    fn connection_params(&self) -> ConnectionParams;

    /// Arguments for the testinfra adapter.
    fn testinfra_args(&self) -> ConnectionParams;

    /// Arguments for the serverspec adapter.
    fn serverspec_args(&self) -> ConnectionParams;

    /// Persistent SSH configuration file, if the backend exposes one.
    fn conf(&self) -> Option<String>;

    /// Every declared instance, annotated with whether the backend knows it.
    fn instances<'a>(&'a self, ctx: &'a RunContext)
    -> DriverFuture<'a, Vec<InstanceRecord>, Self::Error>;

    /// Builds and starts every declared instance, in declaration order.
    ///
    /// The first failure aborts the call; instances started before it stay up.
    fn up<'a>(&'a self, ctx: &'a RunContext) -> DriverFuture<'a, (), Self::Error>;

    /// Removes every declared instance. Absent instances are not an error.
    fn destroy<'a>(&'a self, ctx: &'a RunContext) -> DriverFuture<'a, (), Self::Error>;

    /// Current status of every declared instance.
    fn status<'a>(&'a self, ctx: &'a RunContext)
    -> DriverFuture<'a, Vec<InstanceStatus>, Self::Error>;

    /// Inventory line declaring how the automation engine reaches `spec`.
    fn inventory_entry(&self, spec: &InstanceSpec) -> String;

    /// Interactive shell command template with a `{}` placeholder.
    fn login_cmd(&self, spec: &InstanceSpec) -> String;

    /// Positional arguments substituted into [`Driver::login_cmd`].
    fn login_args(&self, spec: &InstanceSpec) -> Vec<String>;
}

/// Substitutes `args` into the `{}` placeholders of `template` in order.
#[must_use]
pub fn render_login(template: &str, args: &[String]) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut remaining = args.iter();
    let mut pieces = template.split("{}").peekable();
    while let Some(piece) = pieces.next() {
        rendered.push_str(piece);
        if pieces.peek().is_some()
            && let Some(arg) = remaining.next()
        {
            rendered.push_str(arg);
        }
    }
    rendered
}

fn params<const N: usize>(pairs: [(&str, &str); N]) -> ConnectionParams {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_owned(), Value::from(value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("docker exec -ti {} bash", &["web1"], "docker exec -ti web1 bash")]
    #[case("ssh -t {} bash", &["root@web1"], "ssh -t root@web1 bash")]
    #[case("no placeholder", &["unused"], "no placeholder")]
    #[case("{} and {}", &["one"], "one and ")]
    fn render_login_substitutes_in_order(
        #[case] template: &str,
        #[case] args: &[&str],
        #[case] expected: &str,
    ) {
        let owned = args.iter().map(|arg| (*arg).to_owned()).collect::<Vec<_>>();
        assert_eq!(render_login(template, &owned), expected);
    }

    #[test]
    fn params_builds_string_values() {
        let built = params([("user", "root"), ("connection", "docker")]);
        assert_eq!(built.get("user"), Some(&Value::from("root")));
        assert_eq!(built.len(), 2);
    }
}
