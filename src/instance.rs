//! Declarative instance specifications and the records drivers report back.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde_json::{Map, Value};

/// Keys that never reach a backend start call, even when a scenario file
/// declares them as passthrough arguments.
pub const BACKEND_EXCLUDED_FIELDS: [&str; 7] = [
    "image_version",
    "registry",
    "created",
    "ansible_groups",
    "dockerfile",
    "options",
    "environment",
];

/// One ephemeral test target as declared in the scenario file.
///
/// Specifications are never mutated by drivers. Backend call arguments are
/// derived on demand through [`InstanceSpec::start_arguments`].
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct InstanceSpec {
    /// Unique name of the instance within a run.
    pub name: String,
    /// Base image reference (for example `ubuntu`).
    pub image: String,
    /// Tag or version of the base image (for example `18.04`).
    pub image_version: String,
    /// Optional registry prefix for the base image.
    #[serde(default)]
    pub registry: Option<String>,
    /// Environment declarations injected into the generated build manifest.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Inventory groups the instance belongs to.
    #[serde(default)]
    pub ansible_groups: Vec<String>,
    /// Literal build manifest that replaces the generated one.
    #[serde(default)]
    pub dockerfile: Option<String>,
    /// Backend-specific settings consumed by the driver itself.
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
    /// Any other keys, passed through to the backend start call.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl InstanceSpec {
    /// Creates a specification with only the required fields populated.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        image: impl Into<String>,
        image_version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            image_version: image_version.into(),
            registry: None,
            environment: BTreeMap::new(),
            ansible_groups: Vec::new(),
            dockerfile: None,
            options: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Sets the registry prefix.
    #[must_use]
    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = Some(registry.into());
        self
    }

    /// Adds an environment declaration.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Sets a literal manifest override.
    #[must_use]
    pub fn with_dockerfile(mut self, manifest: impl Into<String>) -> Self {
        self.dockerfile = Some(manifest.into());
        self
    }

    /// Adds an inventory group.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.ansible_groups.push(group.into());
        self
    }

    /// Adds a backend-specific option.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Adds a passthrough argument for the backend start call.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Registry prefix with surrounding whitespace removed; blank registries
    /// count as absent.
    #[must_use]
    pub fn registry(&self) -> Option<&str> {
        self.registry
            .as_deref()
            .map(str::trim)
            .filter(|registry| !registry.is_empty())
    }

    /// Reads a string-valued backend option.
    #[must_use]
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }

    /// Projects the specification onto the keyword arguments accepted by a
    /// container start call, running detached with a TTY.
    #[must_use]
    pub fn start_arguments(&self, image_tag: &str) -> Map<String, Value> {
        let mut args = self
            .extra
            .iter()
            .filter(|(key, _)| !BACKEND_EXCLUDED_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect::<Map<String, Value>>();
        args.insert(String::from("name"), Value::from(self.name.as_str()));
        args.insert(String::from("image"), Value::from(image_tag));
        args.insert(String::from("state"), Value::from("started"));
        args.insert(String::from("tty"), Value::Bool(true));
        args.insert(String::from("detach"), Value::Bool(true));
        args
    }
}

/// A declared instance annotated with whether the backend currently knows it.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceRecord {
    /// The declared specification.
    pub spec: InstanceSpec,
    /// `true` when the backend enumeration contains the instance name.
    pub created: bool,
}

impl InstanceRecord {
    /// Annotates every spec against the names the backend reported.
    #[must_use]
    pub fn annotate<'a>(
        specs: &[InstanceSpec],
        live_names: impl IntoIterator<Item = &'a str> + Clone,
    ) -> Vec<Self> {
        specs
            .iter()
            .map(|spec| Self {
                created: live_names
                    .clone()
                    .into_iter()
                    .any(|live| normalise_backend_name(live) == spec.name),
                spec: spec.clone(),
            })
            .collect()
    }
}

/// Strips the leading path separator some backends prepend to names.
#[must_use]
pub fn normalise_backend_name(name: &str) -> &str {
    name.trim().trim_start_matches('/')
}

/// Lifecycle state reported by `status`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InstanceState {
    /// The backend has no object with this name.
    NotCreated,
    /// The backend's own description of the object state.
    Live(String),
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotCreated => f.write_str("not_created"),
            Self::Live(state) => f.write_str(state),
        }
    }
}

/// Status line for one declared instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceStatus {
    /// Instance name.
    pub name: String,
    /// Current state.
    pub state: InstanceState,
    /// Provider that owns the instance.
    pub provider: String,
    /// Published ports or endpoints; empty when not created.
    pub ports: Vec<String>,
}

impl InstanceStatus {
    /// Status for an instance the backend does not know about.
    #[must_use]
    pub fn not_created(name: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: InstanceState::NotCreated,
            provider: provider.into(),
            ports: Vec::new(),
        }
    }
}
