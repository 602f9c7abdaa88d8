//! Error type for the harness.

use std::path::PathBuf;

use crate::sys::SysOp;

/// Monolithic error type for the harness.
///
/// Every variant describes a failure of the harness itself. Discrepancies
/// between expected and observed effects are never errors; they are
/// reported as failed tests instead.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A system call made by the harness failed while running a test.
    #[error("{op} failed while running test '{test}': {source}")]
    Infrastructure {
        /// The operation that failed.
        op: SysOp,
        /// Name of the test being executed.
        test: String,
        /// The error number reported by the operation.
        source: nix::errno::Errno,
    },

    /// Declared content could not be loaded from its source file.
    #[error("failed to load content for test '{test}' from {}: {source}", path.display())]
    ContentSource {
        /// Name of the test being registered.
        test: String,
        /// Path of the source file.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The record sent back over the side channel could not be decoded.
    #[error("malformed side-channel record for test '{0}'")]
    SideChannel(String),

    /// The JUnit report could not be produced.
    #[error("failed to write junit report: {0}")]
    Report(String),

    /// The tracing configuration could not be changed.
    #[error("tracing: {0}")]
    Tracing(&'static str),

    /// An I/O error occurred while writing diagnostics.
    #[error("i/o error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Builds an infrastructure error for the given operation and test.
    pub(crate) fn infra(op: SysOp, test: &str, source: nix::errno::Errno) -> Self {
        Self::Infrastructure {
            op,
            test: test.to_owned(),
            source,
        }
    }
}
