// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request/response plus asynchronous events over paired control sockets.
//!
//! A background receive task reads event datagrams, parses them, and pushes
//! the records onto a bounded queue; a foreground handler task drains the
//! queue and broadcasts to subscribers on the foreground thread. Requests
//! are serialised on the command socket by a task mutex. Close ordering:
//! mark disconnected, close the event socket and queue, join the receive
//! side, then close the command socket and pump until settled.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wp2p_task::{background, delay, fatal, BlockingQueue, Cond, Dispatcher, RuntimeHandle};
use wp2p_wire::{Event, Station};

use crate::error::{Error, Result};
use crate::socket::{ControlSocket, MAX_DATAGRAM};

/// Parsed events waiting for the foreground handler. Overflow means the
/// foreground stopped being responsive, which is unrecoverable.
const EVENT_QUEUE_DEPTH: usize = 512;

const OPEN_RETRIES: u32 = 5;
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Receives parsed events on the foreground thread.
pub trait EventSubscriber: Send + Sync {
    fn on_event(&self, event: &Event);
}

#[derive(Default)]
struct Disconnect {
    disconnected: bool,
}

#[derive(Default)]
struct Running {
    count: usize,
}

struct ChannelInner {
    dispatcher: Dispatcher,
    command: ControlSocket,
    event: ControlSocket,
    events: BlockingQueue<Event>,
    request_lock: wp2p_task::Mutex,
    disconnect: Cond<Disconnect>,
    recv_running: Cond<Running>,
    subscribers: parking_lot::Mutex<Vec<Arc<dyn EventSubscriber>>>,
    closed: AtomicBool,
    log_prefix: String,
}

/// A connected control channel for one interface.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl Channel {
    /// Connect to `interface` under the default supplicant socket
    /// directory.
    pub async fn open(runtime: &RuntimeHandle, interface: &str) -> Result<Channel> {
        let path = Path::new(crate::socket::CONTROL_SOCKET_DIR).join(interface);
        Self::open_path(runtime, &path, None).await
    }

    /// Connect to an explicit server socket path. The event socket is
    /// retried briefly: group sockets lag their announcement events.
    pub async fn open_path(
        runtime: &RuntimeHandle,
        socket_path: &Path,
        client_dir: Option<&Path>,
    ) -> Result<Channel> {
        let log_prefix = socket_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut retry = 0;
        let event = loop {
            match ControlSocket::open_path(runtime, socket_path, client_dir) {
                Ok(socket) => break socket,
                Err(error) => {
                    if retry == OPEN_RETRIES {
                        tracing::error!("{log_prefix}: can't open event socket: {error}");
                        return Err(error);
                    }
                    retry += 1;
                    delay(OPEN_RETRY_DELAY).await;
                }
            }
        };
        event.attach().await?;

        let command = match ControlSocket::open_path(runtime, socket_path, client_dir) {
            Ok(socket) => socket,
            Err(error) => {
                tracing::error!("{log_prefix}: can't open command socket: {error}");
                return Err(error);
            }
        };

        let inner = Arc::new(ChannelInner {
            dispatcher: runtime.dispatcher().clone(),
            command,
            event,
            events: BlockingQueue::new(EVENT_QUEUE_DEPTH),
            request_lock: wp2p_task::Mutex::new(),
            disconnect: Cond::default(),
            recv_running: Cond::default(),
            subscribers: parking_lot::Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            log_prefix,
        });
        inner.recv_running.execute(|running| running.count = 2);

        let dispatcher = runtime.dispatcher().clone();
        let recv_inner = inner.clone();
        dispatcher.start_thread(async move { recv_proc(recv_inner).await });
        let handler_inner = inner.clone();
        dispatcher.start_thread(async move { event_proc(handler_inner).await });

        Ok(Channel { inner })
    }

    /// Register a subscriber; called on the foreground thread for every
    /// event, in registration order.
    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.inner.subscribers.lock().push(subscriber);
    }

    /// Send one newline-terminated command; the reply is split into lines.
    pub async fn request(&self, message: &str) -> Result<Vec<String>> {
        self.inner.request(message).await
    }

    /// As `request`, but the reply must be the single line `OK`.
    pub async fn request_ok(&self, message: &str) -> Result<()> {
        let reply = self.inner.request(message).await?;
        match reply.first() {
            Some(line) if line == "OK" => Ok(()),
            Some(line) => Err(Error::RequestFailed {
                request: message.trim_end().to_string(),
                reply: line.clone(),
            }),
            None => Err(Error::RequestFailed {
                request: message.trim_end().to_string(),
                reply: "(no response)".to_string(),
            }),
        }
    }

    /// As `request`, but the reply must be exactly one line.
    pub async fn request_string(&self, message: &str, fail_on_error: bool) -> Result<String> {
        let mut reply = self.inner.request(message).await?;
        if reply.len() != 1 {
            return Err(Error::InvalidResponse(format!(
                "{} lines in reply to {}",
                reply.len(),
                message.trim_end()
            )));
        }
        let line = reply.remove(0);
        if fail_on_error && (line == "FAIL" || line == "INVALID RESPONSE") {
            return Err(Error::RequestFailed {
                request: message.trim_end().to_string(),
                reply: line,
            });
        }
        Ok(line)
    }

    /// Liveness probe; `PING` must answer `PONG`.
    pub async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    /// Enumerate associated stations via `STA-FIRST`/`STA-NEXT`.
    pub async fn list_stations(&self) -> Result<Vec<Station>> {
        let inner = &self.inner;
        let _serialised = inner.request_lock.lock().await?;
        let mut stations = Vec::new();
        let mut reply = [0u8; MAX_DATAGRAM];
        let mut command = "STA-FIRST".to_string();
        loop {
            let received = inner.command.request(&command, &mut reply).await?;
            if received == 0 {
                break;
            }
            let text = String::from_utf8_lossy(&reply[..received]).into_owned();
            if text == "FAIL\n" {
                tracing::debug!("{}: station listing refused", inner.log_prefix);
                break;
            }
            if text == "UNKNOWN COMMAND\n" {
                return Err(Error::UnknownCommand(command));
            }
            let station = Station::parse(&text);
            command = format!("STA-NEXT {}", station.address);
            stations.push(station);
        }
        Ok(stations)
    }

    /// Disconnect-aware delay: returns after `time`, or fails with
    /// `Disconnected` the moment the channel is marked disconnected.
    pub async fn delay(&self, time: Duration) -> Result<()> {
        self.inner.delay(time).await
    }

    pub fn is_disconnected(&self) -> bool {
        self.inner.disconnect.test(|state| state.disconnected)
    }

    /// Spawn a detached task that pings the supplicant every `interval`.
    /// A failed ping marks the channel disconnected.
    pub fn start_keepalive(&self, interval: Duration) {
        let inner = self.inner.clone();
        self.inner.dispatcher.start_thread(async move {
            loop {
                match inner.delay(interval).await {
                    Ok(()) => {}
                    Err(_) => break,
                }
                if let Err(error) = inner.ping().await {
                    tracing::warn!("{}: keep-alive ping failed: {error}", inner.log_prefix);
                    inner.set_disconnected();
                    break;
                }
            }
            Ok(())
        });
    }

    /// Orderly close; idempotent.
    pub async fn co_close(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        inner.set_disconnected();
        inner.event.co_close().await?;
        inner.events.close();
        inner.recv_running.wait_until(|running| Ok(running.count == 0)).await?;
        inner.command.co_close().await?;
        Ok(())
    }

    /// Synchronous close. On the foreground thread this pumps messages
    /// until the receive side has drained.
    pub fn close(&self) {
        if self.inner.dispatcher.is_foreground() {
            let channel = self.clone();
            let dispatcher = self.inner.dispatcher.clone();
            if let Err(error) = dispatcher.block_on(async move { channel.co_close().await }) {
                tracing::error!("{}: close failed: {error}", self.inner.log_prefix);
            }
            dispatcher.pump_messages();
        } else {
            self.inner.set_disconnected();
            self.inner.events.close();
            self.inner.event.close();
            self.inner.command.close();
            self.inner.closed.store(true, Ordering::SeqCst);
        }
    }
}

impl ChannelInner {
    async fn request(&self, message: &str) -> Result<Vec<String>> {
        let _serialised = self.request_lock.lock().await?;
        if message.is_empty() || !message.ends_with('\n') {
            return Err(Error::BadRequest("request must end with a newline".to_string()));
        }
        tracing::debug!("{}> {}", self.log_prefix, message.trim_end());
        let mut reply = [0u8; MAX_DATAGRAM];
        let received =
            self.command.request(&message[..message.len() - 1], &mut reply).await?;
        let text = String::from_utf8_lossy(&reply[..received]);
        let lines: Vec<String> =
            text.split('\n').filter(|line| !line.is_empty()).map(str::to_string).collect();
        for line in &lines {
            tracing::debug!("{}< {line}", self.log_prefix);
        }
        if lines.len() == 1 && lines[0] == "UNKNOWN COMMAND" {
            return Err(Error::UnknownCommand(message.trim_end().to_string()));
        }
        Ok(lines)
    }

    async fn ping(&self) -> Result<()> {
        let reply = self.request("PING\n").await?;
        if reply.len() == 1 && reply[0] == "PONG" {
            return Ok(());
        }
        Err(Error::InvalidResponse("bad PING reply".to_string()))
    }

    async fn delay(&self, time: Duration) -> Result<()> {
        let waited = self
            .disconnect
            .wait_until_timeout(Some(time), |state| Ok(state.disconnected))
            .await;
        match waited {
            // The predicate passed: the channel went down mid-delay.
            Ok(()) => Err(Error::Disconnected),
            Err(error) if error.is_timeout() => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    fn set_disconnected(&self) {
        self.disconnect.notify_all(|state| state.disconnected = true);
    }
}

/// Background receive task: datagrams to parsed events on the queue.
async fn recv_proc(inner: Arc<ChannelInner>) -> wp2p_task::Result<()> {
    background().await;
    let mut buffer = [0u8; MAX_DATAGRAM];
    'receive: loop {
        let received = match inner.event.recv(&mut buffer).await {
            Ok(received) => received,
            Err(error) => {
                if !inner.closed.load(Ordering::SeqCst) {
                    tracing::warn!("{}: event socket failed: {error}", inner.log_prefix);
                }
                break;
            }
        };
        let text = String::from_utf8_lossy(&buffer[..received]);
        for line in text.split('\n').filter(|line| !line.is_empty()) {
            let Some(event) = Event::parse(line) else {
                continue;
            };
            if inner.events.is_full() {
                fatal("event queue overflowed; foreground handler is not draining");
            }
            if inner.events.push(event, None).await.is_err() {
                break 'receive;
            }
        }
    }
    inner.events.close();
    inner.event.close();
    inner.recv_running.notify(|running| running.count -= 1);
    Ok(())
}

/// Foreground handler task: drain the queue, broadcast to subscribers.
async fn event_proc(inner: Arc<ChannelInner>) -> wp2p_task::Result<()> {
    loop {
        match inner.events.take(None).await {
            Ok(event) => {
                let subscribers: Vec<_> = inner.subscribers.lock().clone();
                for subscriber in subscribers {
                    subscriber.on_event(&event);
                }
            }
            Err(error) => {
                if !error.is_closed() {
                    tracing::error!(
                        "{}: event handler stopped: {error}",
                        inner.log_prefix
                    );
                }
                break;
            }
        }
    }
    inner.recv_running.notify(|running| running.count -= 1);
    Ok(())
}

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;
