// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! wp2p-task: cooperative task runtime for the Wi-Fi P2P session daemon.
//!
//! One foreground thread runs an event loop (timers, posted tasks); a small
//! pool of worker threads resumes tasks posted to the background; a dedicated
//! watcher thread multiplexes file-descriptor readiness. Everything above
//! that — condition variables, bounded queues, non-blocking files, child
//! processes — is built out of tasks suspended on the service adapter.

pub mod cond;
pub mod dispatcher;
pub mod error;
pub mod exec;
pub mod fifo;
pub mod file;
pub mod log;
mod pool;
pub mod queue;
pub mod reactor;
pub mod runtime;
pub mod service;
pub mod task;

pub use cond::{Cond, Mutex, MutexGuard};
pub use dispatcher::{Dispatcher, TimerHandle};
pub use error::{fatal, Error, Result};
pub use exec::{find_on_path, ChildProcess, OutputStream, SignalKind};
pub use fifo::Fifo;
pub use file::{File, OpenMode};
pub use log::{LogGuard, LogLevel};
pub use queue::BlockingQueue;
pub use reactor::{Reactor, Readiness, WatchHandle};
pub use runtime::{Runtime, RuntimeHandle};
pub use service::{Callback, Operation, Service, Timeout};
pub use task::{background, delay, foreground, Task};
