// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child process helper.
//!
//! Spawns a child with stdin/stdout/stderr redirected to connected Unix
//! stream socket pairs; the parent keeps the non-blocking async ends, the
//! child sides are reverted to blocking, non-close-on-exec descriptors
//! before exec. Every started child is eventually waited on.

use std::os::fd::{AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use nix::unistd::Pid;

use crate::cond::Cond;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::file::{set_cloexec, set_nonblocking, File};
use crate::runtime::RuntimeHandle;
use crate::task::delay;

/// Grace period between Terminate and Kill when tearing a child down.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(3);

const REAP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The urgency with which a child should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGINT; ask for a graceful stop.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// SIGKILL; as expedient as the platform allows.
    Kill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Find the fully-qualified path of an executable. Absolute paths pass
/// through if they exist; otherwise the inherited search path is consulted,
/// then (for names with a directory component) the working directory.
pub fn find_on_path(program: &Path) -> Result<PathBuf> {
    if program.is_absolute() {
        if program.exists() {
            return Ok(program.to_path_buf());
        }
        return Err(Error::NotFound(program.display().to_string()));
    }
    if let Some(path) = std::env::var_os("PATH") {
        for directory in std::env::split_paths(&path) {
            let candidate = directory.join(program);
            if candidate.exists() {
                return Ok(candidate);
            }
        }
    }
    let has_parent = program.parent().map(|p| !p.as_os_str().is_empty()).unwrap_or(false);
    if has_parent && program.exists() {
        return Ok(program.to_path_buf());
    }
    Err(Error::NotFound(program.display().to_string()))
}

#[derive(Default)]
struct Outputs {
    active: usize,
}

pub struct ChildProcess {
    dispatcher: Dispatcher,
    child: parking_lot::Mutex<Option<Child>>,
    exit_ok: parking_lot::Mutex<Option<bool>>,
    stdin: File,
    stdout: File,
    stderr: File,
    outputs: Cond<Outputs>,
}

impl ChildProcess {
    pub fn new(runtime: &RuntimeHandle) -> ChildProcess {
        ChildProcess {
            dispatcher: runtime.dispatcher().clone(),
            child: parking_lot::Mutex::new(None),
            exit_ok: parking_lot::Mutex::new(None),
            stdin: File::new(runtime),
            stdout: File::new(runtime),
            stderr: File::new(runtime),
            outputs: Cond::new(Outputs::default()),
        }
    }

    /// Start a child process inheriting the parent environment.
    pub fn execute(&self, program: &Path, arguments: &[String]) -> Result<()> {
        self.execute_impl(program, arguments, None)
    }

    /// Start a child process with an explicit environment.
    pub fn execute_env(
        &self,
        program: &Path,
        arguments: &[String],
        environment: &[(String, String)],
    ) -> Result<()> {
        self.execute_impl(program, arguments, Some(environment))
    }

    fn execute_impl(
        &self,
        program: &Path,
        arguments: &[String],
        environment: Option<&[(String, String)]>,
    ) -> Result<()> {
        let full_path = find_on_path(program)?;
        let stdin_remote = attach_pair(&self.stdin)?;
        let stdout_remote = attach_pair(&self.stdout)?;
        let stderr_remote = attach_pair(&self.stderr)?;

        let mut command = Command::new(&full_path);
        command
            .args(arguments)
            .stdin(Stdio::from(stdin_remote))
            .stdout(Stdio::from(stdout_remote))
            .stderr(Stdio::from(stderr_remote));
        if let Some(environment) = environment {
            command.env_clear();
            command.envs(environment.iter().map(|(key, value)| (key, value)));
        }
        let child = command.spawn()?;
        tracing::debug!(pid = child.id(), program = %full_path.display(), "child started");
        *self.child.lock() = Some(child);
        Ok(())
    }

    pub fn stdin(&self) -> &File {
        &self.stdin
    }

    pub fn stdout(&self) -> &File {
        &self.stdout
    }

    pub fn stderr(&self) -> &File {
        &self.stderr
    }

    /// Send a stop signal. Non-blocking; pair with `co_wait`.
    pub fn signal(&self, kind: SignalKind) {
        let pid = self.child.lock().as_ref().map(|child| child.id());
        let Some(pid) = pid else {
            return;
        };
        let signal = match kind {
            SignalKind::Interrupt => Signal::SIGINT,
            SignalKind::Terminate => Signal::SIGTERM,
            SignalKind::Kill => Signal::SIGKILL,
        };
        let _ = kill(Pid::from_raw(pid as i32), signal);
    }

    /// Has the child exited? Reaps as a side effect.
    pub fn has_terminated(&self) -> bool {
        match self.reap() {
            Ok(done) => done,
            Err(_) => true,
        }
    }

    fn reap(&self) -> Result<bool> {
        let mut guard = self.child.lock();
        let Some(child) = guard.as_mut() else {
            return Ok(true);
        };
        match child.try_wait()? {
            Some(status) => {
                *self.exit_ok.lock() = Some(status.success());
                *guard = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Poll for the child to exit. True if it exited normally (status 0).
    pub async fn co_wait(&self, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.reap()? {
                return Ok(self.exit_ok.lock().unwrap_or(true));
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(Error::TimedOut);
                }
            }
            delay(REAP_POLL_INTERVAL).await;
        }
    }

    /// Terminate; after `grace` without an exit, kill; then wait.
    pub async fn co_kill(&self, grace: Duration) -> Result<bool> {
        self.signal(SignalKind::Terminate);
        match self.co_wait(Some(grace)).await {
            Ok(result) => return Ok(result),
            Err(Error::TimedOut) => {}
            Err(error) => return Err(error),
        }
        self.signal(SignalKind::Kill);
        self.co_wait(None).await
    }

    /// Spawn a task that silently drains the named output stream.
    pub fn discard_output(&self, which: OutputStream) {
        let file = match which {
            OutputStream::Stdout => self.stdout.clone(),
            OutputStream::Stderr => self.stderr.clone(),
        };
        let outputs = self.outputs.clone();
        self.outputs.execute(|state| state.active += 1);
        self.dispatcher.start_thread(async move {
            let mut buffer = [0u8; 512];
            loop {
                match file.read(&mut buffer, None).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            outputs.notify(|state| state.active -= 1);
            Ok(())
        });
    }

    /// Suspend until every started output reader has drained its stream.
    pub async fn wait_outputs(&self) -> Result<()> {
        self.outputs.wait_until(|state| Ok(state.active == 0)).await
    }

    /// Run `program`, collecting both output streams line-wise. Returns the
    /// exit disposition and the collected output.
    pub async fn run_collect(&self, program: &Path, arguments: &[String]) -> Result<(bool, String)> {
        self.execute(program, arguments)?;
        let sink = Arc::new(parking_lot::Mutex::new(String::new()));
        self.spawn_reader(self.stdout.clone(), sink.clone());
        self.spawn_reader(self.stderr.clone(), sink.clone());
        self.wait_outputs().await?;
        let exit_ok = self.co_wait(None).await?;
        let output = std::mem::take(&mut *sink.lock());
        Ok((exit_ok, output))
    }

    fn spawn_reader(&self, file: File, sink: Arc<parking_lot::Mutex<String>>) {
        let outputs = self.outputs.clone();
        self.outputs.execute(|state| state.active += 1);
        self.dispatcher.start_thread(async move {
            let mut line = String::new();
            loop {
                match file.read_line(&mut line).await {
                    Ok(true) => {
                        let mut sink = sink.lock();
                        sink.push_str(&line);
                        sink.push('\n');
                    }
                    Ok(false) | Err(_) => break,
                }
            }
            outputs.notify(|state| state.active -= 1);
            Ok(())
        });
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        // No zombies: terminate, grant the grace period, then kill and reap.
        let Some(mut child) = self.child.lock().take() else {
            return;
        };
        let _ = kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM);
        let deadline = Instant::now() + DEFAULT_KILL_GRACE;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => {}
                Err(_) => return,
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(REAP_POLL_INTERVAL);
        }
        let _ = kill(Pid::from_raw(child.id() as i32), Signal::SIGKILL);
        let _ = child.wait();
    }
}

/// Build one stdio socket pair: attach the local end to `file`, return the
/// child end with non-blocking and close-on-exec cleared.
fn attach_pair(file: &File) -> Result<OwnedFd> {
    let (local, remote) = socketpair(
        AddressFamily::Unix,
        SockType::Stream,
        None,
        SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
    )?;
    file.attach(local)?;
    set_nonblocking(remote.as_raw_fd(), false)?;
    set_cloexec(remote.as_raw_fd(), false)?;
    Ok(remote)
}

#[cfg(test)]
#[path = "exec_tests.rs"]
mod tests;
