//! Command-line interface definitions for the `testbed` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Parser, Subcommand};

/// Top-level CLI for the `testbed` binary.
#[derive(Debug, Parser)]
#[command(
    name = "testbed",
    about = "Provision and tear down disposable test instances",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Driver to use for this invocation, overriding configuration and the
    /// driver recorded by the last `create`.
    #[arg(long, global = true, value_name = "NAME")]
    pub(crate) driver: Option<String>,
    /// Scenario file declaring the instances.
    #[arg(long, global = true, value_name = "PATH")]
    pub(crate) scenario: Option<String>,
    /// Lifecycle operation to perform.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Lifecycle operations exposed by the binary.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Build and start every declared instance.
    #[command(name = "create", about = "Build and start every declared instance")]
    Create,
    /// Remove every declared instance.
    #[command(name = "destroy", about = "Remove every declared instance")]
    Destroy,
    /// Show the backend status of every declared instance.
    #[command(name = "status", about = "Show the status of every declared instance")]
    Status,
    /// List declared instances and whether they exist.
    #[command(name = "list", about = "List declared instances and whether they exist")]
    List,
    /// Print the command that opens a shell on an instance.
    #[command(name = "login", about = "Print the command that opens a shell on an instance")]
    Login(LoginCommand),
    /// Print the automation inventory for the declared instances.
    #[command(name = "inventory", about = "Print the inventory for the declared instances")]
    Inventory,
}

/// Arguments for the `testbed login` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct LoginCommand {
    /// Name of the declared instance.
    #[arg(required = true)]
    pub(crate) name: String,
}
