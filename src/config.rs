//! Configuration loading via `ortho-config`.
//!
//! [`TestbedConfig`] drives the lifecycle itself; [`ScalewayConfig`] is only
//! loaded when the cloud driver is selected.

use std::ffi::OsString;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// File name searched for by configuration discovery.
pub const CONFIG_FILE_NAME: &str = "testbed.toml";

/// Settings for a testbed run, merged from defaults, `testbed.toml` and
/// `TESTBED_*` environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "TESTBED",
    discovery(
        app_name = "testbed",
        env_var = "TESTBED_CONFIG_PATH",
        config_file_name = "testbed.toml",
        dotfile_name = ".testbed.toml",
        project_file_name = "testbed.toml"
    )
)]
pub struct TestbedConfig {
    /// Driver to use. When unset the driver recorded by the last `create` is
    /// reused, falling back to `docker`.
    pub driver: Option<String>,
    /// Path of the scenario file declaring the instances.
    #[ortho_config(default = "scenario.toml".to_owned())]
    pub scenario_file: String,
    /// Directory holding run state, generated manifests and task plays.
    #[ortho_config(default = ".testbed".to_owned())]
    pub state_dir: String,
    /// Path to the `ansible` executable, used for version detection.
    #[ortho_config(default = "ansible".to_owned())]
    pub ansible_bin: String,
    /// Path to the `ansible-playbook` executable.
    #[ortho_config(default = "ansible-playbook".to_owned())]
    pub ansible_playbook_bin: String,
    /// Path to the container engine CLI.
    #[ortho_config(default = "docker".to_owned())]
    pub docker_bin: String,
    /// Whether to build provisioning-ready images before starting containers.
    #[ortho_config(default = true)]
    pub build_image: bool,
    /// Emit logs as JSON lines.
    #[ortho_config(default = false)]
    pub log_json: bool,
}

impl TestbedConfig {
    /// Loads configuration from defaults, configuration files and the
    /// environment, ignoring the process arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("testbed")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Rejects blank values for the settings every run needs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the env var and TOML key
    /// to set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (&self.scenario_file, "scenario_file"),
            (&self.state_dir, "state_dir"),
            (&self.ansible_bin, "ansible_bin"),
            (&self.ansible_playbook_bin, "ansible_playbook_bin"),
            (&self.docker_bin, "docker_bin"),
        ];
        for (value, key) in required {
            require_field(value, &FieldMetadata::new(key, "TESTBED", key))?;
        }
        if let Some(driver) = &self.driver {
            require_field(
                driver,
                &FieldMetadata::new("driver name", "TESTBED", "driver"),
            )?;
        }
        Ok(())
    }
}

/// Scaleway specific configuration derived from environment variables and
/// configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SCW",
    discovery(
        app_name = "testbed",
        env_var = "TESTBED_CONFIG_PATH",
        config_file_name = "testbed.toml",
        dotfile_name = ".testbed.toml",
        project_file_name = "testbed.toml"
    )
)]
pub struct ScalewayConfig {
    /// Secret key used for authentication. This value is required.
    pub secret_key: String,
    /// Organisation identifier used by some Scaleway endpoints.
    pub default_organization_id: Option<String>,
    /// Project identifier used for billing and resource scoping.
    pub default_project_id: String,
    /// Zone used when an instance has no `zone` option.
    #[ortho_config(default = "fr-par-1".to_owned())]
    pub default_zone: String,
    /// Commercial type used when an instance has no `instance_type` option.
    #[ortho_config(default = "DEV1-S".to_owned())]
    pub default_instance_type: String,
    /// CPU architecture used to select the image variant.
    #[ortho_config(default = "x86_64".to_owned())]
    pub default_architecture: String,
}

impl ScalewayConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("testbed")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.secret_key,
            &FieldMetadata::new("Scaleway API secret key", "SCW", "secret_key"),
        )?;
        require_field(
            &self.default_project_id,
            &FieldMetadata::new("Scaleway project ID", "SCW", "default_project_id"),
        )?;
        require_field(
            &self.default_zone,
            &FieldMetadata::new("availability zone", "SCW", "default_zone"),
        )?;
        require_field(
            &self.default_instance_type,
            &FieldMetadata::new("instance type", "SCW", "default_instance_type"),
        )?;
        require_field(
            &self.default_architecture,
            &FieldMetadata::new("CPU architecture", "SCW", "default_architecture"),
        )
    }
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_prefix: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_prefix: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_prefix,
            toml_key,
        }
    }

    fn env_var(&self) -> String {
        format!("{}_{}", self.env_prefix, self.toml_key.to_uppercase())
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to {CONFIG_FILE_NAME}",
            metadata.description,
            metadata.env_var(),
            metadata.toml_key
        )));
    }
    Ok(())
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
