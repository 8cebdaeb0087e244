//! Error types for pseudoclone
//!
//! Only configuration problems and catastrophic clone failures are modelled
//! as errors. Per-node failures (unreadable attributes, failed mknod, short
//! writes, ...) are recovered locally and recorded as [`Stats`] counters so
//! a partially readable pseudo file system still produces a useful snapshot.
//!
//! [`Stats`]: crate::stats::Stats

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for pseudoclone operations
#[derive(Error, Debug)]
pub enum CloneError {
    /// Configuration error (bad flag combination, unusable path, ...)
    #[error("configuration error: {0}")]
    Config(String),

    /// The source root could not be stat'ed; nothing can be cloned
    #[error("cannot stat source root '{path}': {source}")]
    SourceRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The source scan ended before the walk completed
    #[error("source scan truncated at '{path}': {source}")]
    TruncatedScan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Recursive dereference descended past the depth budget
    #[error("dereference recursion exceeded depth {depth} at '{path}' (ELOOP)")]
    DerefLoop { path: PathBuf, depth: usize },

    /// The cached tree violated one of its structural invariants
    #[error("internal tree invariant violated: {0}")]
    TreeInvariant(String),

    /// I/O error with path context
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CloneError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Get the path associated with this error, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::SourceRoot { path, .. }
            | Self::TruncatedScan { path, .. }
            | Self::DerefLoop { path, .. }
            | Self::Io { path, .. } => Some(path),
            Self::Config(_) | Self::TreeInvariant(_) => None,
        }
    }
}

/// Result type alias for pseudoclone operations
pub type Result<T> = std::result::Result<T, CloneError>;

/// Extension trait for adding path context to `std::io::Result`
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| CloneError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_with_path() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = CloneError::io("/test/path", io_err);
        assert!(err.path().is_some());
        assert_eq!(err.path().unwrap(), &PathBuf::from("/test/path"));
    }

    #[test]
    fn test_config_error_has_no_path() {
        let err = CloneError::config("bad flags");
        assert!(err.path().is_none());
        assert!(err.to_string().contains("bad flags"));
    }

    #[test]
    fn test_with_path_extension() {
        let res: std::io::Result<()> =
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no"));
        let err = res.with_path("/sys/kernel").unwrap_err();
        match err {
            CloneError::Io { path, .. } => assert_eq!(path, PathBuf::from("/sys/kernel")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
