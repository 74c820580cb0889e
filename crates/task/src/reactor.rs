// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Readiness watcher: one dedicated thread multiplexing edge-triggered
//! epoll notifications onto per-registration callbacks.
//!
//! Callbacks fire on the watcher thread with the registration lock released
//! so they can watch or unwatch in turn. The wait quantum is bounded so stop
//! requests are honoured promptly. A failing watcher terminates the process:
//! nothing downstream could make progress without it.

use std::os::fd::{BorrowedFd, OwnedFd};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use parking_lot::Mutex;

use crate::error::{fatal, Result};

const WAIT_QUANTUM_MS: u16 = 500;

/// Opaque, non-zero, strictly increasing registration identifier.
pub type WatchHandle = u64;

/// One readiness edge for a watched descriptor.
#[derive(Debug, Clone, Copy, Default)]
pub struct Readiness {
    pub read_ready: bool,
    pub write_ready: bool,
    pub has_error: bool,
    pub hung_up: bool,
}

struct Registration {
    handle: WatchHandle,
    // Duplicate of the watched descriptor; keeps EPOLL_CTL_DEL possible
    // after the caller closes their end.
    fd: OwnedFd,
    callback: Arc<dyn Fn(Readiness) + Send + Sync>,
}

struct Shared {
    epoll: Epoll,
    registrations: Mutex<Vec<Arc<Registration>>>,
    stop: AtomicBool,
}

struct ReactorInner {
    shared: Arc<Shared>,
    next_handle: AtomicU64,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ReactorInner {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        if let Some(handle) = self.thread.get_mut().take() {
            let _ = handle.join();
        }
    }
}

/// Cheap cloneable handle to the readiness watcher.
#[derive(Clone)]
pub struct Reactor {
    inner: Arc<ReactorInner>,
}

impl Reactor {
    pub fn new() -> Result<Reactor> {
        let epoll = Epoll::new(EpollCreateFlags::empty())?;
        Ok(Reactor {
            inner: Arc::new(ReactorInner {
                shared: Arc::new(Shared {
                    epoll,
                    registrations: Mutex::new(Vec::new()),
                    stop: AtomicBool::new(false),
                }),
                next_handle: AtomicU64::new(0),
                thread: Mutex::new(None),
            }),
        })
    }

    /// Start the watcher thread. Idempotent; `watch` starts it on demand.
    pub fn start(&self) {
        let mut thread = self.inner.thread.lock();
        if thread.is_some() {
            return;
        }
        let shared = self.inner.shared.clone();
        let spawned = std::thread::Builder::new()
            .name("wp2p-watcher".to_string())
            .spawn(move || watcher_proc(shared));
        match spawned {
            Ok(handle) => *thread = Some(handle),
            Err(error) => fatal(&format!("failed to start readiness watcher: {error}")),
        }
    }

    /// Request cooperative termination and join the watcher thread.
    pub fn stop(&self) {
        self.inner.shared.stop.store(true, Ordering::Release);
        if let Some(handle) = self.inner.thread.lock().take() {
            let _ = handle.join();
        }
    }

    /// Begin watching `fd` with edge-triggered semantics. The callback runs
    /// on the watcher thread and may be invoked immediately if the
    /// descriptor is already ready.
    pub fn watch<F>(&self, fd: BorrowedFd<'_>, callback: F) -> Result<WatchHandle>
    where
        F: Fn(Readiness) + Send + Sync + 'static,
    {
        self.start();
        let dup = fd.try_clone_to_owned()?;
        let handle = self.inner.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        let flags = EpollFlags::EPOLLIN
            | EpollFlags::EPOLLOUT
            | EpollFlags::EPOLLERR
            | EpollFlags::EPOLLHUP
            | EpollFlags::EPOLLET;
        let mut registrations = self.inner.shared.registrations.lock();
        self.inner.shared.epoll.add(&dup, EpollEvent::new(flags, handle))?;
        registrations.push(Arc::new(Registration {
            handle,
            fd: dup,
            callback: Arc::new(callback),
        }));
        Ok(handle)
    }

    /// Remove a registration. After this returns, no further callbacks fire
    /// for the handle. Returns whether the registration existed.
    pub fn unwatch(&self, handle: WatchHandle) -> bool {
        let mut registrations = self.inner.shared.registrations.lock();
        match registrations.iter().position(|reg| reg.handle == handle) {
            Some(index) => {
                let registration = registrations.remove(index);
                let _ = self.inner.shared.epoll.delete(&registration.fd);
                true
            }
            None => false,
        }
    }
}

fn watcher_proc(shared: Arc<Shared>) {
    let mut events = [EpollEvent::empty(); 16];
    while !shared.stop.load(Ordering::Acquire) {
        let count = match shared.epoll.wait(&mut events, EpollTimeout::from(WAIT_QUANTUM_MS)) {
            Ok(count) => count,
            Err(Errno::EINTR) => continue,
            Err(error) => fatal(&format!("readiness watcher wait failed: {error}")),
        };
        for event in &events[..count] {
            let flags = event.events();
            let readiness = Readiness {
                read_ready: flags.contains(EpollFlags::EPOLLIN),
                write_ready: flags.contains(EpollFlags::EPOLLOUT),
                has_error: flags.contains(EpollFlags::EPOLLERR),
                hung_up: flags.contains(EpollFlags::EPOLLHUP),
            };
            let callback = {
                let registrations = shared.registrations.lock();
                registrations
                    .iter()
                    .find(|reg| reg.handle == event.data())
                    .map(|reg| reg.callback.clone())
            };
            if let Some(callback) = callback {
                callback(readiness);
            }
        }
    }
}

#[cfg(test)]
#[path = "reactor_tests.rs"]
mod tests;
