//! Persistent run state shared between invocations.
//!
//! The state records which driver last brought instances up so `destroy`,
//! `status` and `login` reuse it without repeating configuration.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::toml;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File name of the state document inside the state directory.
pub const STATE_FILE_NAME: &str = "state.toml";

/// Orchestration state persisted across invocations.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct RunState {
    /// Driver used by the last `up`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// Identifier of the run that created the current instances.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

/// Errors raised while reading or writing run state.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StateError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the state document is not valid TOML.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
}

/// Storage for [`RunState`], injectable for tests.
pub trait StateStore: Send + Sync {
    /// Loads the current state, defaulting when nothing was saved yet.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when existing state cannot be read or parsed.
    fn load(&self) -> Result<RunState, StateError>;

    /// Replaces the stored state.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when the state cannot be written.
    fn save(&self, state: &RunState) -> Result<(), StateError>;
}

/// [`StateStore`] backed by `<state_dir>/state.toml`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileStateStore {
    dir: Utf8PathBuf,
}

impl FileStateStore {
    /// Creates a store rooted at `dir`. The directory is created on save.
    #[must_use]
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Full path of the state document.
    #[must_use]
    pub fn path(&self) -> Utf8PathBuf {
        self.dir.join(STATE_FILE_NAME)
    }

    fn io_error(path: &Utf8Path, err: &io::Error) -> StateError {
        StateError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<RunState, StateError> {
        let dir = match Dir::open_ambient_dir(&self.dir, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(RunState::default()),
            Err(err) => return Err(Self::io_error(&self.dir, &err)),
        };
        let contents = match dir.read_to_string(STATE_FILE_NAME) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(RunState::default()),
            Err(err) => return Err(Self::io_error(&self.path(), &err)),
        };
        if contents.trim().is_empty() {
            return Ok(RunState::default());
        }
        toml::from_str(&contents).map_err(|err| StateError::Parse {
            path: self.path(),
            message: err.to_string(),
        })
    }

    fn save(&self, state: &RunState) -> Result<(), StateError> {
        Dir::create_ambient_dir_all(&self.dir, ambient_authority())
            .map_err(|err| Self::io_error(&self.dir, &err))?;
        let dir = Dir::open_ambient_dir(&self.dir, ambient_authority())
            .map_err(|err| Self::io_error(&self.dir, &err))?;
        let rendered = toml::to_string_pretty(state).map_err(|err| StateError::Parse {
            path: self.path(),
            message: err.to_string(),
        })?;
        dir.write(STATE_FILE_NAME, rendered)
            .map_err(|err| Self::io_error(&self.path(), &err))
    }
}
