//! Scenario file loading.
//!
//! A scenario is a TOML document listing the instances of one test run:
//!
//! ```toml
//! [[instances]]
//! name = "web1"
//! image = "ubuntu"
//! image_version = "18.04"
//! environment = { FOO = "bar" }
//! ```

use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::toml;
use serde::Deserialize;
use thiserror::Error;

use crate::instance::InstanceSpec;

/// Errors raised while loading or validating a scenario.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ScenarioError {
    /// Raised when the scenario file cannot be read.
    #[error("failed to read scenario {path}: {message}")]
    Io {
        /// Path that could not be read.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the scenario is not valid TOML or has the wrong shape.
    #[error("failed to parse scenario {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Parser error message.
        message: String,
    },
    /// Raised when the scenario declares no instances.
    #[error("scenario {path} declares no instances")]
    Empty {
        /// Scenario path.
        path: Utf8PathBuf,
    },
    /// Raised when a required instance field is blank.
    #[error("instance #{index} has an empty {field}")]
    MissingField {
        /// Zero-based position of the instance in the file.
        index: usize,
        /// Field that failed validation.
        field: &'static str,
    },
    /// Raised when an environment entry would not fit on one manifest line.
    #[error("instance {name} has an invalid environment entry {key:?}")]
    InvalidEnvironment {
        /// Instance declaring the entry.
        name: String,
        /// Offending key.
        key: String,
    },
    /// Raised when two instances share a name.
    #[error("instance name {name} is declared more than once")]
    DuplicateName {
        /// The repeated name.
        name: String,
    },
}

/// Validated list of instances for one run.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Scenario {
    /// Declared instances in declaration order.
    #[serde(default)]
    pub instances: Vec<InstanceSpec>,
}

impl Scenario {
    /// Reads and validates a scenario file.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError`] when the file is unreadable, malformed, or
    /// fails validation.
    pub fn load(path: &Utf8Path) -> Result<Self, ScenarioError> {
        let contents = read_scenario(path)?;
        Self::parse(path, &contents)
    }

    /// Parses scenario text; `path` is only used in error messages.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError`] when parsing or validation fails.
    pub fn parse(path: &Utf8Path, contents: &str) -> Result<Self, ScenarioError> {
        let scenario: Self = toml::from_str(contents).map_err(|err| ScenarioError::Parse {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        if scenario.instances.is_empty() {
            return Err(ScenarioError::Empty {
                path: path.to_path_buf(),
            });
        }
        scenario.validate()?;
        Ok(scenario)
    }

    /// Checks required fields, environment entries and name uniqueness.
    ///
    /// Environment keys must be non-empty words and neither keys nor values
    /// may contain control characters such as newlines.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::MissingField`],
    /// [`ScenarioError::InvalidEnvironment`] or
    /// [`ScenarioError::DuplicateName`].
    pub fn validate(&self) -> Result<(), ScenarioError> {
        let mut seen = BTreeSet::new();
        for (index, spec) in self.instances.iter().enumerate() {
            require(index, "name", &spec.name)?;
            require(index, "image", &spec.image)?;
            require(index, "image_version", &spec.image_version)?;
            if let Some(key) = spec
                .environment
                .iter()
                .find_map(|(key, value)| (!is_valid_env_entry(key, value)).then_some(key))
            {
                return Err(ScenarioError::InvalidEnvironment {
                    name: spec.name.clone(),
                    key: key.clone(),
                });
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(ScenarioError::DuplicateName {
                    name: spec.name.clone(),
                });
            }
        }
        Ok(())
    }
}

fn require(index: usize, field: &'static str, value: &str) -> Result<(), ScenarioError> {
    if value.trim().is_empty() {
        return Err(ScenarioError::MissingField { index, field });
    }
    Ok(())
}

fn is_valid_env_entry(key: &str, value: &str) -> bool {
    !key.is_empty()
        && !key.chars().any(|ch| ch.is_whitespace() || ch.is_control())
        && !value.chars().any(char::is_control)
}

fn read_scenario(path: &Utf8Path) -> Result<String, ScenarioError> {
    let io_error = |message: String| ScenarioError::Io {
        path: path.to_path_buf(),
        message,
    };
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| io_error(String::from("scenario path is missing a filename")))?;

    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| io_error(err.to_string()))?;
    dir.read_to_string(file_name)
        .map_err(|err| io_error(err.to_string()))
}
