// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Non-blocking file/socket wrapper.
//!
//! A `File` owns a non-blocking descriptor watched through the reactor.
//! Readiness edges land in two condition-variable-guarded ready flags (one
//! per direction); I/O loops attempt the syscall under the matching
//! condition variable so an edge can never slip between a would-block
//! result and the suspend. A third condition variable tracks the
//! pending-operations count used by close.

use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::sys::socket::{socketpair, AddressFamily, MsgFlags, SockFlag, SockType};

use crate::cond::Cond;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::reactor::{Reactor, WatchHandle};
use crate::runtime::RuntimeHandle;

const LINE_BUFFER_SIZE: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Create or truncate.
    Create,
    Append,
    ReadWrite,
}

#[derive(Default)]
struct IoSide {
    ready: bool,
    closed: bool,
}

#[derive(Default)]
struct CloseState {
    closed: bool,
    closing: bool,
    pending: usize,
}

struct LineBuffer {
    buffer: [u8; LINE_BUFFER_SIZE],
    head: usize,
    tail: usize,
    partial: Vec<u8>,
}

struct FileInner {
    dispatcher: Dispatcher,
    reactor: Reactor,
    fd: parking_lot::Mutex<Option<OwnedFd>>,
    read: Cond<IoSide>,
    write: Cond<IoSide>,
    close: Cond<CloseState>,
    watch: parking_lot::Mutex<WatchHandle>,
    line: parking_lot::Mutex<LineBuffer>,
    write_lock: crate::cond::Mutex,
}

impl Drop for FileInner {
    fn drop(&mut self) {
        let handle = std::mem::take(&mut *self.watch.get_mut());
        if handle != 0 {
            self.reactor.unwatch(handle);
        }
        // The descriptor closes as the OwnedFd drops. In-flight operations
        // hold clones of the file, so the last drop implies pending == 0.
    }
}

/// Counts an operation against the close condition variable for the
/// duration of a read or write.
struct OpsGuard {
    close: Cond<CloseState>,
}

impl OpsGuard {
    fn new(inner: &Arc<FileInner>) -> OpsGuard {
        inner.close.execute(|state| state.pending += 1);
        OpsGuard { close: inner.close.clone() }
    }
}

impl Drop for OpsGuard {
    fn drop(&mut self) {
        self.close.notify(|state| state.pending -= 1);
    }
}

enum IoStep {
    Transferred(usize),
    Wait,
    Fail(Error),
}

/// An asynchronously readable and writable file or socket. Clones share the
/// underlying descriptor and state.
#[derive(Clone)]
pub struct File {
    inner: Arc<FileInner>,
}

impl File {
    /// An unattached file. Operations fail with a closed error until
    /// [`File::open`] or [`File::attach`].
    pub fn new(runtime: &RuntimeHandle) -> File {
        Self::with_handles(runtime.dispatcher().clone(), runtime.reactor().clone())
    }

    pub(crate) fn with_handles(dispatcher: Dispatcher, reactor: Reactor) -> File {
        File {
            inner: Arc::new(FileInner {
                dispatcher,
                reactor,
                fd: parking_lot::Mutex::new(None),
                read: Cond::new(IoSide { ready: false, closed: true }),
                write: Cond::new(IoSide { ready: false, closed: true }),
                close: Cond::new(CloseState { closed: true, closing: false, pending: 0 }),
                watch: parking_lot::Mutex::new(0),
                line: parking_lot::Mutex::new(LineBuffer {
                    buffer: [0; LINE_BUFFER_SIZE],
                    head: 0,
                    tail: 0,
                    partial: Vec::new(),
                }),
                write_lock: crate::cond::Mutex::new(),
            }),
        }
    }

    /// Open a file at `path` in non-blocking close-on-exec mode.
    pub fn open(&self, path: &Path, mode: OpenMode) -> Result<()> {
        let mut options = std::fs::OpenOptions::new();
        match mode {
            OpenMode::Read => {
                options.read(true);
            }
            OpenMode::Create => {
                options.write(true).create(true).truncate(true);
            }
            OpenMode::Append => {
                options.write(true).create(true).append(true);
            }
            OpenMode::ReadWrite => {
                options.read(true).write(true);
            }
        }
        use std::os::unix::fs::OpenOptionsExt;
        options.custom_flags((OFlag::O_NONBLOCK | OFlag::O_CLOEXEC).bits());
        let file = options.open(path)?;
        self.attach(OwnedFd::from(file))
    }

    /// Adopt `fd`, making it non-blocking and watching it for readiness.
    pub fn attach(&self, fd: OwnedFd) -> Result<()> {
        set_nonblocking(fd.as_raw_fd(), true)?;
        {
            let mut slot = self.inner.fd.lock();
            if slot.is_some() {
                return Err(Error::Io {
                    errno: Errno::EBUSY as i32,
                    message: "file is already open".to_string(),
                });
            }
            *slot = Some(fd);
        }
        // Assume both directions ready until the first would-block; the
        // reactor reports edges from then on.
        self.inner.read.execute(|side| {
            side.ready = true;
            side.closed = false;
        });
        self.inner.write.execute(|side| {
            side.ready = true;
            side.closed = false;
        });
        self.inner.close.execute(|state| {
            state.closed = false;
            state.closing = false;
        });
        self.watch_fd()
    }

    fn watch_fd(&self) -> Result<()> {
        let weak = Arc::downgrade(&self.inner);
        let watched = {
            let guard = self.inner.fd.lock();
            let fd = guard.as_ref().ok_or(Error::Closed)?;
            self.inner.reactor.watch(fd.as_fd(), move |readiness| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if readiness.read_ready || readiness.has_error {
                    inner.read.notify(|side| side.ready = true);
                }
                if readiness.write_ready || readiness.has_error {
                    inner.write.notify(|side| side.ready = true);
                }
            })
        };
        match watched {
            Ok(handle) => {
                *self.inner.watch.lock() = handle;
                Ok(())
            }
            // Regular files cannot be polled; they are always ready and
            // never return EAGAIN, so the initial ready flags suffice.
            Err(Error::Io { errno, .. }) if errno == Errno::EPERM as i32 => Ok(()),
            Err(error) => Err(error),
        }
    }

    /// Relinquish the descriptor, restoring blocking mode. Pending
    /// operations fail with a closed error.
    pub fn detach(&self) -> Option<OwnedFd> {
        let handle = std::mem::take(&mut *self.inner.watch.lock());
        if handle != 0 {
            self.inner.reactor.unwatch(handle);
        }
        let fd = self.inner.fd.lock().take();
        self.inner.close.execute(|state| state.closed = true);
        self.inner.read.notify_all(|side| side.closed = true);
        self.inner.write.notify_all(|side| side.closed = true);
        if let Some(fd) = &fd {
            let _ = set_nonblocking(fd.as_raw_fd(), false);
        }
        fd
    }

    pub fn is_open(&self) -> bool {
        self.inner.fd.lock().is_some()
    }

    /// Close, waking in-flight operations with a closed error and waiting
    /// for them to settle. Idempotent.
    pub async fn co_close(&self) -> Result<()> {
        close_inner(self.inner.clone()).await
    }

    /// Synchronous close. On the foreground thread this pumps messages
    /// until in-flight operations settle; elsewhere it just tears the
    /// descriptor down and lets them wake with a closed error.
    pub fn close(&self) {
        let done = self.inner.close.test(|state| state.closed || state.closing);
        if done {
            return;
        }
        if self.inner.dispatcher.is_foreground() {
            let inner = self.inner.clone();
            let dispatcher = self.inner.dispatcher.clone();
            let _ = dispatcher.block_on(async move { close_inner(inner).await });
        } else {
            let inner = self.inner.clone();
            tear_down(&inner);
        }
    }

    /// Read whatever is available, up to `data.len()` bytes. Returns zero
    /// at end of file. Partial data is returned before a timeout surfaces.
    pub async fn read(&self, data: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        let _ops = OpsGuard::new(&self.inner);
        let mut total = 0usize;
        loop {
            if total == data.len() {
                return Ok(total);
            }
            let step = self.inner.read.test(|side| {
                if side.closed {
                    return IoStep::Fail(Error::Closed);
                }
                let guard = self.inner.fd.lock();
                let Some(fd) = guard.as_ref() else {
                    return IoStep::Fail(Error::Closed);
                };
                match nix::unistd::read(fd.as_raw_fd(), &mut data[total..]) {
                    Ok(count) => IoStep::Transferred(count),
                    Err(Errno::EAGAIN) => {
                        side.ready = false;
                        IoStep::Wait
                    }
                    Err(errno) => IoStep::Fail(errno.into()),
                }
            });
            match step {
                IoStep::Transferred(0) => return Ok(total),
                IoStep::Transferred(count) => total += count,
                IoStep::Wait => {
                    if total != 0 {
                        return Ok(total);
                    }
                    self.inner
                        .read
                        .wait_until_timeout(timeout, |side| Ok(side.ready || side.closed))
                        .await?;
                }
                IoStep::Fail(error) => return Err(error),
            }
        }
    }

    /// Receive one datagram. Zero-length datagrams are valid.
    pub async fn recv(&self, data: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        let _ops = OpsGuard::new(&self.inner);
        loop {
            let step = self.inner.read.test(|side| {
                if side.closed {
                    return IoStep::Fail(Error::Closed);
                }
                let guard = self.inner.fd.lock();
                let Some(fd) = guard.as_ref() else {
                    return IoStep::Fail(Error::Closed);
                };
                match nix::sys::socket::recv(fd.as_raw_fd(), data, MsgFlags::empty()) {
                    Ok(count) => IoStep::Transferred(count),
                    Err(Errno::EAGAIN) => {
                        side.ready = false;
                        IoStep::Wait
                    }
                    Err(errno) => IoStep::Fail(errno.into()),
                }
            });
            match step {
                IoStep::Transferred(count) => return Ok(count),
                IoStep::Wait => {
                    self.inner
                        .read
                        .wait_until_timeout(timeout, |side| Ok(side.ready || side.closed))
                        .await?;
                }
                IoStep::Fail(error) => return Err(error),
            }
        }
    }

    /// Write the entire buffer or fail. After a timeout the amount written
    /// is indeterminate.
    pub async fn write(&self, data: &[u8], timeout: Option<Duration>) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let _ops = OpsGuard::new(&self.inner);
        let mut written = 0usize;
        loop {
            let step = self.inner.write.test(|side| {
                if side.closed {
                    return IoStep::Fail(Error::Closed);
                }
                let guard = self.inner.fd.lock();
                let Some(fd) = guard.as_ref() else {
                    return IoStep::Fail(Error::Closed);
                };
                match nix::unistd::write(fd, &data[written..]) {
                    Ok(0) => IoStep::Fail(Error::Io {
                        errno: 0,
                        message: "write returned zero".to_string(),
                    }),
                    Ok(count) => IoStep::Transferred(count),
                    Err(Errno::EAGAIN) => {
                        side.ready = false;
                        IoStep::Wait
                    }
                    Err(errno) => IoStep::Fail(errno.into()),
                }
            });
            match step {
                IoStep::Transferred(count) => {
                    written += count;
                    if written == data.len() {
                        return Ok(());
                    }
                }
                IoStep::Wait => {
                    self.inner
                        .write
                        .wait_until_timeout(timeout, |side| Ok(side.ready || side.closed))
                        .await?;
                }
                IoStep::Fail(error) => return Err(error),
            }
        }
    }

    /// Send one datagram. Zero-length datagrams are valid.
    pub async fn send(&self, data: &[u8], timeout: Option<Duration>) -> Result<()> {
        let _ops = OpsGuard::new(&self.inner);
        let mut sent = 0usize;
        loop {
            let step = self.inner.write.test(|side| {
                if side.closed {
                    return IoStep::Fail(Error::Closed);
                }
                let guard = self.inner.fd.lock();
                let Some(fd) = guard.as_ref() else {
                    return IoStep::Fail(Error::Closed);
                };
                match nix::sys::socket::send(fd.as_raw_fd(), &data[sent..], MsgFlags::empty()) {
                    Ok(count) => IoStep::Transferred(count),
                    Err(Errno::EAGAIN) => {
                        side.ready = false;
                        IoStep::Wait
                    }
                    Err(errno) => IoStep::Fail(errno.into()),
                }
            });
            match step {
                IoStep::Transferred(count) => {
                    sent += count;
                    if sent >= data.len() {
                        return Ok(());
                    }
                }
                IoStep::Wait => {
                    self.inner
                        .write
                        .wait_until_timeout(timeout, |side| Ok(side.ready || side.closed))
                        .await?;
                }
                IoStep::Fail(error) => return Err(error),
            }
        }
    }

    /// Buffered line read; strips the trailing newline. False on end of
    /// file with no residual data.
    pub async fn read_line(&self, out: &mut String) -> Result<bool> {
        loop {
            {
                let mut line = self.inner.line.lock();
                while line.head < line.tail {
                    let byte = line.buffer[line.head];
                    line.head += 1;
                    if byte == b'\n' {
                        let taken = std::mem::take(&mut line.partial);
                        *out = String::from_utf8_lossy(&taken).into_owned();
                        return Ok(true);
                    }
                    line.partial.push(byte);
                }
            }
            let mut chunk = [0u8; LINE_BUFFER_SIZE];
            let count = self.read(&mut chunk, None).await?;
            if count == 0 {
                let taken = {
                    let mut line = self.inner.line.lock();
                    std::mem::take(&mut line.partial)
                };
                *out = String::from_utf8_lossy(&taken).into_owned();
                return Ok(!out.is_empty());
            }
            let mut line = self.inner.line.lock();
            line.buffer[..count].copy_from_slice(&chunk[..count]);
            line.head = 0;
            line.tail = count;
        }
    }

    /// Write `text` followed by a newline, as a single write with respect
    /// to the internal write mutex.
    pub async fn write_line(&self, text: &str, timeout: Option<Duration>) -> Result<()> {
        let _serialised = self.inner.write_lock.lock().await?;
        let mut data = Vec::with_capacity(text.len() + 1);
        data.extend_from_slice(text.as_bytes());
        data.push(b'\n');
        self.write(&data, timeout).await
    }

    /// A connected Unix stream pair, each side non-blocking, close-on-exec,
    /// and attached.
    pub fn socket_pair(runtime: &RuntimeHandle) -> Result<(File, File)> {
        let (a, b) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        )?;
        let first = File::new(runtime);
        first.attach(a)?;
        let second = File::new(runtime);
        second.attach(b)?;
        Ok((first, second))
    }
}

/// Mark closed, wake both directions, tear down the watch and descriptor.
fn tear_down(inner: &Arc<FileInner>) {
    inner.read.notify_all(|side| side.closed = true);
    inner.write.notify_all(|side| side.closed = true);
    let handle = std::mem::take(&mut *inner.watch.lock());
    if handle != 0 {
        inner.reactor.unwatch(handle);
    }
    *inner.fd.lock() = None;
}

async fn close_inner(inner: Arc<FileInner>) -> Result<()> {
    let proceed = inner.close.test(|state| {
        if state.closed || state.closing {
            return false;
        }
        state.closed = true;
        state.closing = true;
        true
    });
    if !proceed {
        return Ok(());
    }
    tear_down(&inner);
    // Wait for suspended operations to drain.
    inner.close.wait_until(|state| Ok(state.pending == 0)).await?;
    inner.close.execute(|state| state.closing = false);
    Ok(())
}

pub(crate) fn set_nonblocking(fd: RawFd, nonblocking: bool) -> Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
    let flags = if nonblocking { flags | OFlag::O_NONBLOCK } else { flags & !OFlag::O_NONBLOCK };
    fcntl(fd, FcntlArg::F_SETFL(flags))?;
    Ok(())
}

pub(crate) fn set_cloexec(fd: RawFd, cloexec: bool) -> Result<()> {
    let flags = FdFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFD)?);
    let flags = if cloexec { flags | FdFlag::FD_CLOEXEC } else { flags & !FdFlag::FD_CLOEXEC };
    fcntl(fd, FcntlArg::F_SETFD(flags))?;
    Ok(())
}

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;
