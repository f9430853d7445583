//! Error types for the docker driver.

use thiserror::Error;

use crate::executor::ExecutorError;
use crate::image::ImageError;

use super::cli::ContainerBackendError;

/// Errors raised by the docker driver.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DockerDriverError {
    /// Raised when the container backend cannot be queried.
    #[error("container backend query failed: {0}")]
    Backend(#[from] ContainerBackendError),
    /// Raised when the image for an instance cannot be prepared.
    #[error("image preparation for {instance} failed: {source}")]
    Image {
        /// Instance being prepared.
        instance: String,
        /// Underlying build failure.
        #[source]
        source: ImageError,
    },
    /// Raised when the engine fails to start or remove a container.
    #[error("{action} of container {instance} failed: {source}")]
    Task {
        /// `start` or `removal`.
        action: &'static str,
        /// Instance being acted on.
        instance: String,
        /// Executor failure carrying the engine message.
        #[source]
        source: ExecutorError,
    },
}
