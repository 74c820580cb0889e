// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! wp2p-ctrl: request/event channel to the supplicant control interface.
//!
//! Two Unix-domain datagram sockets per interface: one carries synchronous
//! command/response traffic, the other the asynchronous event stream. The
//! event side attaches with a handshake, parses datagrams into event
//! records, and hands them to foreground subscribers through a bounded
//! queue.

pub mod channel;
pub mod error;
pub mod socket;

pub use channel::{Channel, EventSubscriber};
pub use error::{Error, Result};
pub use socket::ControlSocket;
