//! Error type for the Naive Disk Store.
//!
//! Mirrors the reference LMDB wrapper's `MdbError`: a small enum with a
//! manually written `Display`/`Error` impl rather than a derive macro, so
//! that engine errors, corruption, and internal bug assertions are all
//! reachable through the same type without pulling in a new dependency
//! for error boilerplate.

use std::fmt;

use lmdb::Error as LmdbError;

/// Errors surfaced by the disk backend, the codec, or the runtime's own
/// invariant checks.
#[derive(Debug)]
pub enum NdsError {
    /// The underlying on-disk engine returned an error.
    Disk(LmdbError),
    /// Filesystem preparation around the environment failed (creating
    /// the environment or snapshot directory), as opposed to an error
    /// from LMDB itself.
    Io(std::io::Error),
    /// A record's checksum failed to verify, or the codec could not
    /// decode the bytes. Callers of the read-through API never see this
    /// directly -- it is logged and the read degrades to "absent" -- but
    /// the disk backend itself still needs to report it upward.
    Corrupt(String),
    /// A background flush worker could not be spawned, or exited
    /// abnormally (panicked) instead of reporting success or failure.
    Background(String),
    /// An invariant the runtime relies on was found violated -- e.g. a
    /// flush was requested while a DB's `flushing` set was non-empty.
    /// The source's own comment calls this "isn't supposed to happen";
    /// treat it as a bug, not a recoverable condition.
    Invariant(String),
}

pub type NdsResult<T> = Result<T, NdsError>;

impl From<LmdbError> for NdsError {
    fn from(err: LmdbError) -> NdsError {
        NdsError::Disk(err)
    }
}

impl From<std::io::Error> for NdsError {
    fn from(err: std::io::Error) -> NdsError {
        NdsError::Io(err)
    }
}

impl fmt::Display for NdsError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NdsError::Disk(err) => write!(fmt, "disk backend error: {}", err),
            NdsError::Io(err) => write!(fmt, "filesystem error: {}", err),
            NdsError::Corrupt(msg) => write!(fmt, "corrupt record: {}", msg),
            NdsError::Background(msg) => write!(fmt, "background flush error: {}", msg),
            NdsError::Invariant(msg) => write!(fmt, "invariant violation: {}", msg),
        }
    }
}

impl std::error::Error for NdsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NdsError::Disk(err) => Some(err),
            NdsError::Io(err) => Some(err),
            _ => None,
        }
    }
}
