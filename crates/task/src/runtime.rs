// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Explicit runtime context.
//!
//! [`Runtime`] owns the dispatcher (foreground loop plus worker pool) and
//! the readiness watcher, created together and shut down together. The
//! creating thread becomes the foreground thread. Components receive a
//! cheap [`RuntimeHandle`] rather than reaching for globals; the only
//! thread-local is the per-thread binding behind `Dispatcher::current()`
//! and the foreground check.

use crate::dispatcher::{unbind_thread, Dispatcher};
use crate::error::Result;
use crate::reactor::Reactor;

/// Cloneable view of the runtime for components and tasks.
#[derive(Clone)]
pub struct RuntimeHandle {
    dispatcher: Dispatcher,
    reactor: Reactor,
}

impl RuntimeHandle {
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }
}

/// Owner of the dispatcher and the readiness watcher.
pub struct Runtime {
    handle: RuntimeHandle,
}

impl Runtime {
    /// Create the runtime and bind the calling thread as the foreground.
    /// Fatal if this thread already has a runtime.
    pub fn new() -> Result<Runtime> {
        let dispatcher = Dispatcher::new_foreground();
        let reactor = Reactor::new()?;
        Ok(Runtime { handle: RuntimeHandle { dispatcher, reactor } })
    }

    pub fn handle(&self) -> RuntimeHandle {
        self.handle.clone()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.handle.dispatcher
    }

    pub fn reactor(&self) -> &Reactor {
        &self.handle.reactor
    }

    /// Quiesce the pool, join the watcher, and release the foreground
    /// binding. Implied by drop.
    pub fn shutdown(self) {}
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.handle.dispatcher.shutdown();
        self.handle.reactor.stop();
        unbind_thread();
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
