// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors from the control channel, layered over the runtime taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Runtime(#[from] wp2p_task::Error),

    /// The channel was marked disconnected (close, keep-alive failure, or
    /// supplicant restart).
    #[error("disconnected")]
    Disconnected,

    /// A reply that should have been `OK` was something else.
    #[error("request failed: {reply} ({request})")]
    RequestFailed { request: String, reply: String },

    /// The supplicant did not recognise the command.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A reply with an unexpected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A malformed request from the caller.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Runtime(e) if e.is_timeout())
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Runtime(e) if e.is_closed())
    }
}
