// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client endpoint of a supplicant control socket.
//!
//! Datagram sockets have no accept step: the client binds its own endpoint
//! at a private path (process id plus a monotonic counter) and connects it
//! to the server path for the interface. The bound file is removed on
//! close. Command and event traffic never share a socket; an event frame
//! showing up on a command socket means two callers are sharing an endpoint
//! and is unrecoverable.

use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::socket::{bind, connect, socket, AddressFamily, SockFlag, SockType, UnixAddr};
use wp2p_task::{fatal, File, RuntimeHandle};

use crate::error::{Error, Result};

/// Where the supplicant exposes per-interface control sockets.
pub const CONTROL_SOCKET_DIR: &str = "/var/run/wpa_supplicant";

/// Upper bound for one reply datagram on the implementation platforms.
pub const MAX_DATAGRAM: usize = 4096;

const REQUEST_TIMEOUT: Option<Duration> = Some(Duration::from_secs(600));
const ATTACH_TIMEOUT: Option<Duration> = Some(Duration::from_secs(5));

static CLIENT_COUNTER: AtomicU64 = AtomicU64::new(0);

pub struct ControlSocket {
    file: File,
    local_path: PathBuf,
}

impl ControlSocket {
    /// Connect to the control socket of `interface` under the default
    /// supplicant directory.
    pub fn open(runtime: &RuntimeHandle, interface: &str) -> Result<ControlSocket> {
        Self::open_path(runtime, &Path::new(CONTROL_SOCKET_DIR).join(interface), None)
    }

    /// Connect to an explicit server socket path, binding the client
    /// endpoint under `client_dir` (the system temp directory by default).
    pub fn open_path(
        runtime: &RuntimeHandle,
        socket_path: &Path,
        client_dir: Option<&Path>,
    ) -> Result<ControlSocket> {
        let fd = socket(AddressFamily::Unix, SockType::Datagram, SockFlag::empty(), None)
            .map_err(wp2p_task::Error::from)?;
        let directory = client_dir.map(Path::to_path_buf).unwrap_or_else(std::env::temp_dir);
        let name = format!(
            "wp2p-{}-{}",
            std::process::id(),
            CLIENT_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let local_path = directory.join(name);

        let local = UnixAddr::new(&local_path).map_err(wp2p_task::Error::from)?;
        if let Err(errno) = bind(fd.as_raw_fd(), &local) {
            // A previous process with our pid died and left its endpoint
            // behind; reclaim it once.
            if errno == Errno::EADDRINUSE {
                let _ = std::fs::remove_file(&local_path);
                bind(fd.as_raw_fd(), &local).map_err(wp2p_task::Error::from)?;
            } else {
                return Err(wp2p_task::Error::from(errno).into());
            }
        }

        let dest = UnixAddr::new(socket_path).map_err(wp2p_task::Error::from)?;
        if let Err(errno) = connect(fd.as_raw_fd(), &dest) {
            let _ = std::fs::remove_file(&local_path);
            return Err(wp2p_task::Error::from(errno).into());
        }

        let file = File::new(runtime);
        if let Err(error) = file.attach(fd) {
            let _ = std::fs::remove_file(&local_path);
            return Err(error.into());
        }
        Ok(ControlSocket { file, local_path })
    }

    /// Send `command` (no trailing newline on the wire) and receive one
    /// reply datagram into `reply`.
    pub async fn request(&self, command: &str, reply: &mut [u8]) -> Result<usize> {
        self.file.send(command.as_bytes(), REQUEST_TIMEOUT).await?;
        let received = self.file.recv(reply, REQUEST_TIMEOUT).await?;
        check_not_event(&reply[..received]);
        Ok(received)
    }

    /// Receive one datagram from the socket, without a deadline. Used by
    /// the event receive task.
    pub async fn recv(&self, reply: &mut [u8]) -> Result<usize> {
        Ok(self.file.recv(reply, None).await?)
    }

    /// Register for unsolicited events. Sent without a trailing newline;
    /// the reply must be `OK\n`.
    pub async fn attach(&self) -> Result<()> {
        self.handshake("ATTACH").await
    }

    pub async fn detach(&self) -> Result<()> {
        self.handshake("DETACH").await
    }

    async fn handshake(&self, command: &str) -> Result<()> {
        self.file.send(command.as_bytes(), ATTACH_TIMEOUT).await?;
        let mut reply = [0u8; 512];
        let received = self.file.recv(&mut reply, ATTACH_TIMEOUT).await?;
        if received == 0 {
            return Err(wp2p_task::Error::Closed.into());
        }
        check_not_event(&reply[..received]);
        if &reply[..received] == b"OK\n" {
            return Ok(());
        }
        Err(Error::RequestFailed {
            request: command.to_string(),
            reply: String::from_utf8_lossy(&reply[..received]).trim_end().to_string(),
        })
    }

    pub fn is_open(&self) -> bool {
        self.file.is_open()
    }

    /// Close and remove the client endpoint, waking in-flight operations.
    pub async fn co_close(&self) -> Result<()> {
        self.file.co_close().await?;
        let _ = std::fs::remove_file(&self.local_path);
        Ok(())
    }

    /// Synchronous close; see [`File::close`] for the foreground pumping
    /// behaviour.
    pub fn close(&self) {
        self.file.close();
        let _ = std::fs::remove_file(&self.local_path);
    }
}

impl Drop for ControlSocket {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.local_path);
    }
}

fn check_not_event(frame: &[u8]) {
    if frame.first() == Some(&b'<') || frame.starts_with(b"IFNAME=") {
        fatal("event frame received on a command socket (use one socket per role)");
    }
}
