// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy for the task runtime.
//!
//! Timeouts and closed-I/O are ordinary `Err` values that propagate through
//! task results. Invariant violations are not: they go through [`fatal`],
//! which logs and terminates the process.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the runtime and everything built on it.
#[derive(Debug, Error)]
pub enum Error {
    /// A deadline elapsed before the operation completed.
    #[error("timed out")]
    TimedOut,

    /// The operation was abandoned before it could complete.
    #[error("cancelled")]
    Cancelled,

    /// The file, queue, or condition variable was closed — either before the
    /// operation started or while it was in flight.
    #[error("i/o closed")]
    Closed,

    /// An OS-level failure other than would-block/interrupted.
    #[error("{message} (errno {errno})")]
    Io { errno: i32, message: String },

    /// Search-path resolution failed.
    #[error("file not found: {0}")]
    NotFound(String),
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::TimedOut)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed)
    }
}

impl From<nix::errno::Errno> for Error {
    fn from(errno: nix::errno::Errno) -> Self {
        Error::Io { errno: errno as i32, message: errno.desc().to_string() }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io { errno: err.raw_os_error().unwrap_or(0), message: err.to_string() }
    }
}

/// Terminate the process with a diagnostic.
///
/// Used for invariant violations (bad adapter states, nested message loops,
/// events on the command socket). These are never recoverable: any task that
/// observed one has no path to a consistent resumption.
pub fn fatal(message: &str) -> ! {
    tracing::error!("fatal: {message}");
    eprintln!("fatal: {message}");
    std::process::abort();
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
