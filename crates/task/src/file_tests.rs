// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

use crate::error::Error;
use crate::runtime::Runtime;
use crate::task::delay;

#[test]
fn socket_pair_round_trips_bytes_in_order() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let (a, b) = File::socket_pair(&runtime.handle()).unwrap();
    let result = dispatcher.block_on(async move {
        a.write(b"hello ", None).await?;
        a.write(b"world", None).await?;
        let mut buffer = [0u8; 64];
        let mut received = Vec::new();
        while received.len() < 11 {
            let count = b.read(&mut buffer, None).await?;
            received.extend_from_slice(&buffer[..count]);
        }
        Ok::<_, Error>(received)
    });
    assert_eq!(result.unwrap(), b"hello world");
}

#[test]
fn line_io_round_trips() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let (a, b) = File::socket_pair(&runtime.handle()).unwrap();
    let lines = dispatcher.block_on(async move {
        a.write_line("first", None).await?;
        a.write_line("second", None).await?;
        a.co_close().await?;
        let mut out = String::new();
        let mut lines = Vec::new();
        while b.read_line(&mut out).await? {
            lines.push(out.clone());
        }
        Ok::<_, Error>(lines)
    });
    assert_eq!(lines.unwrap(), vec!["first".to_string(), "second".to_string()]);
}

#[test]
fn read_returns_zero_at_end_of_file() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let (a, b) = File::socket_pair(&runtime.handle()).unwrap();
    let count = dispatcher.block_on(async move {
        a.co_close().await?;
        let mut buffer = [0u8; 16];
        b.read(&mut buffer, None).await
    });
    assert_eq!(count.unwrap(), 0);
}

#[test]
fn close_wakes_a_pending_read_with_closed() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let (_a, b) = File::socket_pair(&runtime.handle()).unwrap();
    let reader_file = b.clone();
    let reader = dispatcher.spawn(async move {
        let mut buffer = [0u8; 16];
        reader_file.read(&mut buffer, None).await
    });
    dispatcher.start_thread(async move {
        delay(Duration::from_millis(20)).await;
        b.co_close().await?;
        Ok(())
    });
    assert!(matches!(reader.get_result(), Err(Error::Closed)));
}

#[test]
fn close_is_idempotent() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let (a, _b) = File::socket_pair(&runtime.handle()).unwrap();
    let result = dispatcher.block_on(async move {
        a.co_close().await?;
        a.co_close().await?;
        Ok::<_, Error>(())
    });
    assert!(result.is_ok());
}

#[test]
fn operations_on_a_closed_file_fail() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let file = File::new(&runtime.handle());
    let result = dispatcher.block_on(async move {
        let mut buffer = [0u8; 4];
        file.read(&mut buffer, None).await
    });
    assert!(matches!(result, Err(Error::Closed)));
}

#[test]
fn read_timeout_returns_timed_out() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let (_a, b) = File::socket_pair(&runtime.handle()).unwrap();
    let result = dispatcher.block_on(async move {
        let mut buffer = [0u8; 4];
        b.read(&mut buffer, Some(Duration::from_millis(30))).await
    });
    assert!(matches!(result, Err(Error::TimedOut)));
}

#[test]
fn partial_data_beats_the_timeout() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let (a, b) = File::socket_pair(&runtime.handle()).unwrap();
    let count = dispatcher.block_on(async move {
        a.write(b"abc", None).await?;
        let mut buffer = [0u8; 64];
        b.read(&mut buffer, Some(Duration::from_millis(30))).await
    });
    // Three bytes are available; the read returns them instead of waiting
    // for a full buffer.
    assert_eq!(count.unwrap(), 3);
}

#[test]
fn regular_files_open_write_and_read_back() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let directory = tempfile::tempdir().unwrap();
    let path = directory.path().join("data.txt");

    let writer = File::new(&runtime.handle());
    writer.open(&path, OpenMode::Create).unwrap();
    let reader = File::new(&runtime.handle());
    let content = dispatcher.block_on(async move {
        writer.write(b"persisted\n", None).await?;
        writer.co_close().await?;
        reader.open(&path, OpenMode::Read)?;
        let mut out = String::new();
        reader.read_line(&mut out).await?;
        Ok::<_, Error>(out)
    });
    assert_eq!(content.unwrap(), "persisted");
}

#[test]
fn detach_returns_the_descriptor() {
    let runtime = Runtime::new().unwrap();
    let (a, b) = File::socket_pair(&runtime.handle()).unwrap();
    let fd = a.detach();
    assert!(fd.is_some());
    assert!(!a.is_open());
    drop(fd);
    drop(b);
}

#[test]
fn attach_rejects_a_second_descriptor() {
    let runtime = Runtime::new().unwrap();
    let (a, _b) = File::socket_pair(&runtime.handle()).unwrap();
    let (c, _d) = nix::sys::socket::socketpair(
        nix::sys::socket::AddressFamily::Unix,
        nix::sys::socket::SockType::Stream,
        None,
        nix::sys::socket::SockFlag::empty(),
    )
    .unwrap();
    assert!(a.attach(c).is_err());
}
