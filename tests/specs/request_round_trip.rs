// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::os::unix::net::UnixDatagram;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wp2p_ctrl::{Channel, Error};
use wp2p_task::Runtime;

/// Minimal endpoint: `OK` for everything except `BAD`, plus the attach
/// handshake.
struct FakeEndpoint {
    _dir: tempfile::TempDir,
    path: PathBuf,
    client_dir: PathBuf,
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl FakeEndpoint {
    fn start() -> FakeEndpoint {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("p2p-dev-wlan0");
        let client_dir = dir.path().to_path_buf();
        let socket = UnixDatagram::bind(&path).expect("bind");
        socket
            .set_read_timeout(Some(Duration::from_millis(50)))
            .expect("read timeout");
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let thread = std::thread::spawn(move || {
            let mut buffer = [0u8; 4096];
            while !stop_flag.load(Ordering::SeqCst) {
                let (received, from) = match socket.recv_from(&mut buffer) {
                    Ok(result) => result,
                    Err(_) => continue,
                };
                let reply = if &buffer[..received] == b"BAD" { "FAIL\n" } else { "OK\n" };
                if let Some(address) = from.as_pathname() {
                    let _ = socket.send_to(reply.as_bytes(), address);
                }
            }
        });
        FakeEndpoint { _dir: dir, path, client_dir, stop, thread: Some(thread) }
    }
}

impl Drop for FakeEndpoint {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[test]
fn request_ok_round_trips_and_failures_carry_the_reply() {
    let endpoint = FakeEndpoint::start();
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let handle = runtime.handle();
    let path = endpoint.path.clone();
    let client_dir = endpoint.client_dir.clone();

    let outcome = dispatcher.block_on(async move {
        let channel = Channel::open_path(&handle, &path, Some(&client_dir)).await?;
        channel.request_ok("PING\n").await?;
        let failed = channel.request_ok("BAD\n").await;
        channel.co_close().await?;
        Ok::<_, Error>(failed)
    });
    match outcome.unwrap() {
        Err(Error::RequestFailed { reply, .. }) => assert!(reply.contains("FAIL")),
        other => panic!("expected a request failure, got {other:?}"),
    }
}
