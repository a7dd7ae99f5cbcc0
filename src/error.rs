use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while setting up, running, or tearing down a transfer.
///
/// Every variant is fatal for the process that hits it: there is no retry
/// anywhere in the protocol. Variants that wrap an OS failure carry the name
/// of the failing call (`"shmget"`, `"msgrcv"`, ...) so that the diagnostic
/// printed on exit points at the operation that broke.
#[derive(Error, Debug)]
pub enum Error {
    /// The shared key could not be resolved, or the shared memory segment /
    /// message queue could not be created or attached.
    #[error("{op}: resource unavailable: {source}")]
    ResourceUnavailable {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// Sending or receiving on the control channel failed at the OS level.
    #[error("{op}: control channel failure: {source}")]
    Channel {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// A control record could not be decoded.
    #[error("malformed control record: {0}")]
    MalformedRecord(String),

    #[error("cannot open {}: {source}", .path.display())]
    FileOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot read {}: {source}", .path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write {}: {source}", .path.display())]
    FileWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file name does not fit into the fixed-capacity filename record.
    #[error("file name is {len} bytes long, the limit is {max}")]
    NameTooLong { len: usize, max: usize },

    /// The received file name has no usable final path component.
    #[error("received file name {0:?} has no final path component")]
    InvalidFileName(String),

    /// The sender announced more bytes than the shared buffer can hold.
    #[error("announced chunk of {size} bytes exceeds buffer capacity {capacity}")]
    OversizedChunk { size: usize, capacity: usize },

    /// Detaching or destroying the shared buffer or channel failed.
    #[error("{op}: teardown failed: {source}")]
    ResourceTeardown {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Process exit status used when this error terminates the program.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) => 2,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_failing_operation() {
        let err = Error::Channel {
            op: "msgrcv",
            source: io::Error::from_raw_os_error(libc::EIDRM),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("msgrcv:"), "unexpected message: {msg}");
    }

    #[test]
    fn name_too_long_reports_both_lengths() {
        let err = Error::NameTooLong { len: 120, max: 99 };
        assert_eq!(err.to_string(), "file name is 120 bytes long, the limit is 99");
    }

    #[test]
    fn exit_codes() {
        assert_eq!(Error::Config("x".into()).exit_code(), 2);
        assert_eq!(Error::NameTooLong { len: 1, max: 0 }.exit_code(), 1);
    }
}
