// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

use std::os::fd::AsFd;
use std::sync::atomic::AtomicUsize;
use std::time::{Duration, Instant};

use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};

fn stream_pair() -> (std::os::fd::OwnedFd, std::os::fd::OwnedFd) {
    socketpair(AddressFamily::Unix, SockType::Stream, None, SockFlag::empty())
        .expect("socketpair")
}

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn watch_reports_read_readiness() {
    let reactor = Reactor::new().unwrap();
    let (a, b) = stream_pair();
    let reads = Arc::new(AtomicUsize::new(0));
    let seen = reads.clone();
    let handle = reactor
        .watch(b.as_fd(), move |readiness| {
            if readiness.read_ready {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();
    assert!(handle > 0);

    nix::unistd::write(&a, b"x").unwrap();
    assert!(wait_until(Duration::from_secs(2), || reads.load(Ordering::SeqCst) > 0));

    assert!(reactor.unwatch(handle));
    assert!(!reactor.unwatch(handle));
    reactor.stop();
}

#[test]
fn unwatch_stops_callbacks() {
    let reactor = Reactor::new().unwrap();
    let (a, b) = stream_pair();
    let count = Arc::new(AtomicUsize::new(0));
    let seen = count.clone();
    let handle = reactor
        .watch(b.as_fd(), move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert!(reactor.unwatch(handle));
    let settled = count.load(Ordering::SeqCst);

    nix::unistd::write(&a, b"x").unwrap();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(count.load(Ordering::SeqCst), settled);
    reactor.stop();
}

#[test]
fn handles_are_strictly_increasing_and_nonzero() {
    let reactor = Reactor::new().unwrap();
    let (_a, b) = stream_pair();
    let (_c, d) = stream_pair();
    let first = reactor.watch(b.as_fd(), |_| {}).unwrap();
    let second = reactor.watch(d.as_fd(), |_| {}).unwrap();
    assert!(first > 0);
    assert!(second > first);
    reactor.unwatch(first);
    reactor.unwatch(second);
    reactor.stop();
}

#[test]
fn hangup_is_reported() {
    let reactor = Reactor::new().unwrap();
    let (a, b) = stream_pair();
    let hups = Arc::new(AtomicUsize::new(0));
    let seen = hups.clone();
    let handle = reactor
        .watch(b.as_fd(), move |readiness| {
            if readiness.hung_up {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();
    drop(a);
    assert!(wait_until(Duration::from_secs(2), || hups.load(Ordering::SeqCst) > 0));
    reactor.unwatch(handle);
    reactor.stop();
}
