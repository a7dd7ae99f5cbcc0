use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Default capacity of the shared buffer, in bytes.
pub const DEFAULT_CHUNK_CAPACITY: usize = 1000;

/// Default file handed to `ftok(3)` to derive the shared key.
pub const DEFAULT_KEY_FILE: &str = "keyfile.txt";

/// Default `ftok(3)` project id.
pub const DEFAULT_PROJECT_ID: u8 = b'a';

/// Suffix appended to the received file name to form the destination name.
pub const DEFAULT_RECV_SUFFIX: &str = "__recv";

const ENV_KEY_FILE: &str = "SHM_TRANSFER_KEY_FILE";
const ENV_PROJECT_ID: &str = "SHM_TRANSFER_PROJECT_ID";
const ENV_CHUNK_SIZE: &str = "SHM_TRANSFER_CHUNK_SIZE";
const ENV_OUTPUT_DIR: &str = "SHM_TRANSFER_OUTPUT_DIR";

/// Settings shared by the sender and the receiver.
///
/// Both sides must agree on `key_file`, `project_id` and `chunk_capacity`,
/// otherwise they either attach to different objects or the segment lookup
/// fails with `EINVAL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    pub key_file: PathBuf,
    pub project_id: u8,
    pub chunk_capacity: usize,
    pub output_dir: PathBuf,
    pub recv_suffix: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            key_file: PathBuf::from(DEFAULT_KEY_FILE),
            project_id: DEFAULT_PROJECT_ID,
            chunk_capacity: DEFAULT_CHUNK_CAPACITY,
            output_dir: PathBuf::from("."),
            recv_suffix: DEFAULT_RECV_SUFFIX.to_owned(),
        }
    }
}

impl TransferConfig {
    /// Builds a configuration from the defaults, overridden by the
    /// `SHM_TRANSFER_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`TransferConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = lookup(ENV_KEY_FILE) {
            config.key_file = PathBuf::from(path);
        }
        if let Some(id) = lookup(ENV_PROJECT_ID) {
            config.project_id = match id.as_bytes() {
                [b] => *b,
                _ => id.parse::<u8>().map_err(|_| {
                    Error::Config(format!("{ENV_PROJECT_ID}={id:?}: expected one character or 0-255"))
                })?,
            };
        }
        if let Some(size) = lookup(ENV_CHUNK_SIZE) {
            config.chunk_capacity = size
                .parse()
                .map_err(|_| Error::Config(format!("{ENV_CHUNK_SIZE}={size:?}: not a number")))?;
        }
        if let Some(dir) = lookup(ENV_OUTPUT_DIR) {
            config.output_dir = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_key_file(mut self, key_file: impl AsRef<Path>) -> Self {
        self.key_file = key_file.as_ref().to_path_buf();
        self
    }

    pub fn with_project_id(mut self, project_id: u8) -> Self {
        self.project_id = project_id;
        self
    }

    pub fn with_chunk_capacity(mut self, chunk_capacity: usize) -> Self {
        self.chunk_capacity = chunk_capacity;
        self
    }

    pub fn with_output_dir(mut self, output_dir: impl AsRef<Path>) -> Self {
        self.output_dir = output_dir.as_ref().to_path_buf();
        self
    }

    pub fn with_recv_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.recv_suffix = suffix.into();
        self
    }

    /// Checks the invariants the transport relies on.
    ///
    /// The chunk size travels as an `i32` on the wire, and `ftok(3)` ignores
    /// a zero project id.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_capacity == 0 || self.chunk_capacity > i32::MAX as usize {
            return Err(Error::Config(format!(
                "chunk capacity must be between 1 and {}, got {}",
                i32::MAX,
                self.chunk_capacity
            )));
        }
        if self.project_id == 0 {
            return Err(Error::Config("project id must be non-zero".into()));
        }
        Ok(())
    }
}
