//! Canonical image tags and provisioning-compatible image builds.
//!
//! The canonical tag is computed by one function for both the build and the
//! teardown paths, so removal always targets the artifact that was started.

pub mod manifest;

use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::executor::{ExecutorError, IMAGE_MODULE, ModuleArgs, TaskExecutor};
use crate::instance::InstanceSpec;

/// Manifest file written into the working directory before a build.
pub const MANIFEST_FILE_NAME: &str = "dockerfile";

/// Errors raised while preparing an image.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ImageError {
    /// Raised when the manifest cannot be written.
    #[error("failed to write build manifest {path}: {message}")]
    ManifestWrite {
        /// Manifest path.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the backend build fails.
    #[error("failed to build image {tag}: {source}")]
    Build {
        /// Tag that was being built.
        tag: String,
        /// Executor failure.
        #[source]
        source: ExecutorError,
    },
}

/// Whether [`ImageBuilder::ensure_built`] ran a build.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BuildOutcome {
    /// A build was submitted.
    Built,
    /// The tag already existed, or builds are disabled.
    Skipped,
}

/// Resolves canonical tags and builds missing images.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageBuilder {
    work_dir: Utf8PathBuf,
    build_enabled: bool,
}

impl ImageBuilder {
    /// Creates a builder writing manifests into `work_dir`.
    #[must_use]
    pub fn new(work_dir: impl Into<Utf8PathBuf>, build_enabled: bool) -> Self {
        Self {
            work_dir: work_dir.into(),
            build_enabled,
        }
    }

    /// Directory handed to the backend as build context.
    #[must_use]
    pub fn work_dir(&self) -> &Utf8Path {
        &self.work_dir
    }

    /// Path of the manifest file.
    #[must_use]
    pub fn manifest_path(&self) -> Utf8PathBuf {
        self.work_dir.join(MANIFEST_FILE_NAME)
    }

    /// Computes the canonical tag for `spec`.
    ///
    /// * Builds disabled: the plain base reference, `[registry/]image:version`.
    /// * Manifest override: `image:version`, registry ignored.
    /// * Otherwise: `sanitised-registry/image:version`, where `/` and `:` in
    ///   the registry become `_`, or `image:version` without a registry.
    #[must_use]
    pub fn resolve_tag(&self, spec: &InstanceSpec) -> String {
        if !self.build_enabled {
            return format!("{}:{}", manifest::base_reference(spec), spec.image_version);
        }
        if spec.dockerfile.is_some() {
            return format!("{}:{}", spec.image, spec.image_version);
        }
        spec.registry().map_or_else(
            || format!("{}:{}", spec.image, spec.image_version),
            |registry| {
                format!(
                    "{}/{}:{}",
                    sanitise_registry(registry),
                    spec.image,
                    spec.image_version
                )
            },
        )
    }

    /// Builds the image for `spec` unless its tag is already in
    /// `available_tags`. A manifest override always forces a build.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::ManifestWrite`] when the manifest cannot be
    /// persisted and [`ImageError::Build`] when the build task fails.
    pub fn ensure_built<E: TaskExecutor>(
        &self,
        spec: &InstanceSpec,
        available_tags: &BTreeSet<String>,
        executor: &E,
    ) -> Result<BuildOutcome, ImageError> {
        if !self.build_enabled {
            return Ok(BuildOutcome::Skipped);
        }
        let tag = self.resolve_tag(spec);
        if spec.dockerfile.is_none() && available_tags.contains(&tag) {
            return Ok(BuildOutcome::Skipped);
        }

        info!(
            image = %spec.image,
            version = %spec.image_version,
            %tag,
            "building provisioning compatible image"
        );
        let manifest_path = self.write_manifest(&manifest::render(spec))?;
        executor
            .execute(IMAGE_MODULE, &self.build_arguments(&manifest_path, &tag))
            .map_err(|source| ImageError::Build {
                tag: tag.clone(),
                source,
            })?;
        Ok(BuildOutcome::Built)
    }

    fn build_arguments(&self, manifest_path: &Utf8Path, tag: &str) -> ModuleArgs {
        let mut args = ModuleArgs::new();
        args.insert(String::from("path"), Value::from(self.work_dir.as_str()));
        args.insert(
            String::from("dockerfile"),
            Value::from(manifest_path.as_str()),
        );
        args.insert(String::from("name"), Value::from(tag));
        args
    }

    fn write_manifest(&self, contents: &str) -> Result<Utf8PathBuf, ImageError> {
        let path = self.manifest_path();
        let write_error = |err: std::io::Error| ImageError::ManifestWrite {
            path: path.clone(),
            message: err.to_string(),
        };
        let dir = Dir::open_ambient_dir(&self.work_dir, ambient_authority()).map_err(write_error)?;
        dir.write(MANIFEST_FILE_NAME, contents)
            .map_err(write_error)?;
        Ok(path)
    }
}

/// Makes a registry usable as an image name component.
#[must_use]
pub fn sanitise_registry(registry: &str) -> String {
    registry
        .trim_end_matches('/')
        .chars()
        .map(|ch| if ch == '/' || ch == ':' { '_' } else { ch })
        .collect()
}

#[cfg(test)]
mod tests;
