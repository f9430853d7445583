//! Container enumeration through the `docker` CLI.
//!
//! Every query uses `--format '{{json .}}'`, which prints one JSON object per
//! line.

use std::collections::BTreeSet;
use std::ffi::OsString;

use serde::Deserialize;
use thiserror::Error;

use crate::instance::normalise_backend_name;
use crate::runner::{CommandError, CommandOutput, CommandRunner};

/// Errors raised while querying the container backend.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ContainerBackendError {
    /// Raised when the CLI cannot be run or fails.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// Raised when a line of CLI output is not the expected JSON.
    #[error("unexpected output from {program}: {message}")]
    Parse {
        /// Program that produced the output.
        program: String,
        /// Parser error message.
        message: String,
    },
}

/// One container as reported by the backend.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContainerSummary {
    /// Container name with any leading `/` removed.
    pub name: String,
    /// Backend status text (for example `Up 3 minutes`).
    pub status: String,
    /// Published ports.
    pub ports: Vec<String>,
}

/// Read-only queries the docker driver needs from its backend.
pub trait ContainerBackend: Send + Sync {
    /// Every container, running or not.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerBackendError`] when the backend cannot be queried.
    fn containers(&self) -> Result<Vec<ContainerSummary>, ContainerBackendError>;

    /// Every locally available image tag, as `repository:tag`.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerBackendError`] when the backend cannot be queried.
    fn image_tags(&self) -> Result<BTreeSet<String>, ContainerBackendError>;

    /// The container named exactly `name`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerBackendError`] when the backend cannot be queried.
    /// A missing container is `Ok(None)`.
    fn find_container(&self, name: &str)
    -> Result<Option<ContainerSummary>, ContainerBackendError>;
}

#[derive(Debug, Deserialize)]
struct PsLine {
    #[serde(rename = "Names", default)]
    names: String,
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "Ports", default)]
    ports: String,
}

#[derive(Debug, Deserialize)]
struct ImageLine {
    #[serde(rename = "Repository", default)]
    repository: String,
    #[serde(rename = "Tag", default)]
    tag: String,
}

/// [`ContainerBackend`] that shells out to the `docker` binary.
#[derive(Clone, Debug)]
pub struct DockerCli<R: CommandRunner> {
    program: String,
    runner: R,
}

impl<R: CommandRunner> DockerCli<R> {
    /// Creates a backend running `program` through `runner`.
    #[must_use]
    pub fn new(program: impl Into<String>, runner: R) -> Self {
        Self {
            program: program.into(),
            runner,
        }
    }

    fn query(&self, args: &[&str]) -> Result<CommandOutput, ContainerBackendError> {
        let os_args = args.iter().map(OsString::from).collect::<Vec<_>>();
        let output = self.runner.run(&self.program, &os_args)?;
        if !output.is_success() {
            return Err(CommandError::failure(&self.program, &output).into());
        }
        Ok(output)
    }

    fn parse_lines<T: for<'de> Deserialize<'de>>(
        &self,
        stdout: &str,
    ) -> Result<Vec<T>, ContainerBackendError> {
        stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|err| ContainerBackendError::Parse {
                    program: self.program.clone(),
                    message: err.to_string(),
                })
            })
            .collect()
    }

    fn list_containers(&self, filter: Option<&str>) -> Result<Vec<ContainerSummary>, ContainerBackendError> {
        let name_filter = filter.map(|name| format!("name=^/?{name}$"));
        let mut args = vec!["ps", "-a", "--no-trunc"];
        if let Some(value) = name_filter.as_deref() {
            args.extend(["--filter", value]);
        }
        args.extend(["--format", "{{json .}}"]);
        let output = self.query(&args)?;
        let lines: Vec<PsLine> = self.parse_lines(&output.stdout)?;
        Ok(lines.into_iter().map(ContainerSummary::from).collect())
    }
}

impl From<PsLine> for ContainerSummary {
    fn from(line: PsLine) -> Self {
        let name = line
            .names
            .split(',')
            .next()
            .map(normalise_backend_name)
            .unwrap_or_default()
            .to_owned();
        let ports = line
            .ports
            .split(", ")
            .map(str::trim)
            .filter(|port| !port.is_empty())
            .map(ToOwned::to_owned)
            .collect();
        Self {
            name,
            status: line.status,
            ports,
        }
    }
}

impl<R: CommandRunner> ContainerBackend for DockerCli<R> {
    fn containers(&self) -> Result<Vec<ContainerSummary>, ContainerBackendError> {
        self.list_containers(None)
    }

    fn image_tags(&self) -> Result<BTreeSet<String>, ContainerBackendError> {
        let output = self.query(&["images", "--format", "{{json .}}"])?;
        let lines: Vec<ImageLine> = self.parse_lines(&output.stdout)?;
        Ok(lines
            .into_iter()
            .filter(|line| line.repository != "<none>" && line.tag != "<none>")
            .map(|line| format!("{}:{}", line.repository, line.tag))
            .collect())
    }

    fn find_container(
        &self,
        name: &str,
    ) -> Result<Option<ContainerSummary>, ContainerBackendError> {
        let matches = self.list_containers(Some(name))?;
        Ok(matches.into_iter().find(|container| container.name == name))
    }
}
