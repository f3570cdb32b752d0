//! # focusd persistent state
//!
//! A single boolean that survives reboots: is blocking enabled? The cell
//! fails closed for the user's benefit — a missing state file reads as
//! enabled, so wiping the file does not lift the blocker.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

/// Default location of the state file.
pub const DEFAULT_STATE_PATH: &str = "/var/lib/focusd/state";

/// State persistence error.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("failed to read state file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write state file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unrecognized state token {token:?} in {path}")]
    InvalidToken { path: PathBuf, token: String },
}

/// Result type for state operations.
pub type Result<T> = std::result::Result<T, StateError>;

/// The two-valued blocking state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Blocking is active.
    Enabled,
    /// Blocking is lifted.
    Disabled,
}

impl AuthState {
    /// Returns true for [`AuthState::Enabled`].
    pub fn is_enabled(self) -> bool {
        matches!(self, AuthState::Enabled)
    }

    /// The on-disk token for this state.
    pub fn token(self) -> &'static str {
        match self {
            AuthState::Enabled => "enabled",
            AuthState::Disabled => "disabled",
        }
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for AuthState {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        match s {
            "enabled" => Ok(AuthState::Enabled),
            "disabled" => Ok(AuthState::Disabled),
            _ => Err(()),
        }
    }
}

/// The persistent state cell at a fixed filesystem path.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    /// Creates a cell at `path`; an empty path means the default.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path: PathBuf = path.into();
        if path.as_os_str().is_empty() {
            return Self::default();
        }
        Self { path }
    }

    /// Returns the backing path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted state; a missing file means enabled.
    pub fn load(&self) -> Result<AuthState> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(AuthState::Enabled),
            Err(source) => {
                return Err(StateError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let token = data.trim();
        token.parse().map_err(|()| StateError::InvalidToken {
            path: self.path.clone(),
            token: token.to_string(),
        })
    }

    /// Atomically persists the state.
    ///
    /// Parent directories are created mode 0750; the file itself is 0640.
    /// The token is written to a temp file and renamed into place so a
    /// crash mid-write cannot leave a corrupt cell.
    pub fn store(&self, state: AuthState) -> Result<()> {
        let write_err = |source| StateError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(dir) = self.path.parent() {
            create_dir_all_mode(dir, 0o750).map_err(write_err)?;
        }

        let tmp = self.path.with_extension("tmp");
        write_file_mode(&tmp, format!("{}\n", state.token()).as_bytes(), 0o640)
            .and_then(|()| std::fs::rename(&tmp, &self.path))
            .map_err(write_err)
    }
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STATE_PATH),
        }
    }
}

fn create_dir_all_mode(dir: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    match std::fs::DirBuilder::new().recursive(true).mode(mode).create(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

fn write_file_mode(path: &Path, contents: &[u8], mode: u32) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)?;
    // The open mode is filtered through the umask; pin it explicitly.
    file.set_permissions(std::fs::Permissions::from_mode(mode))?;
    file.write_all(contents)?;
    file.sync_all()
}
