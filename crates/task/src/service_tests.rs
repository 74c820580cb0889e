// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use crate::runtime::Runtime;

/// Completes inline from inside execute.
struct Inline {
    value: i32,
}

impl Operation for Inline {
    type Output = i32;

    fn execute(&mut self, callback: Callback<i32>) {
        callback.set_result(self.value);
    }

    fn cancel_execute(&mut self) -> bool {
        true
    }
}

/// Completes from another thread after `delay`, with an optional timeout
/// requested up front. Cancellation can never stop the in-flight thread.
struct Deferred {
    delay: Duration,
    timeout: Timeout,
    outcome: DeferredOutcome,
}

enum DeferredOutcome {
    Value(i32),
    Failure(Error),
}

impl Operation for Deferred {
    type Output = i32;

    fn execute(&mut self, callback: Callback<i32>) {
        callback.request_timeout(self.timeout);
        let delay = self.delay;
        let outcome = match &self.outcome {
            DeferredOutcome::Value(value) => Ok(*value),
            DeferredOutcome::Failure(Error::Closed) => Err(Error::Closed),
            DeferredOutcome::Failure(_) => Err(Error::Cancelled),
        };
        thread::spawn(move || {
            thread::sleep(delay);
            match outcome {
                Ok(value) => callback.set_result(value),
                Err(error) => callback.set_exception(error),
            }
        });
    }

    fn cancel_execute(&mut self) -> bool {
        false
    }
}

/// Times out from inside execute and never completes; cancellation always
/// succeeds.
struct NeverCompletes {
    cancelled: Arc<AtomicBool>,
}

impl Operation for NeverCompletes {
    type Output = i32;

    fn execute(&mut self, callback: Callback<i32>) {
        callback.request_timeout(Timeout::Immediate);
    }

    fn cancel_execute(&mut self) -> bool {
        self.cancelled.store(true, Ordering::SeqCst);
        true
    }
}

/// Times out *and* completes inside execute: the timeout must win.
struct TimedOutThenResumed;

impl Operation for TimedOutThenResumed {
    type Output = i32;

    fn execute(&mut self, callback: Callback<i32>) {
        callback.request_timeout(Timeout::Immediate);
        callback.set_result(99);
    }

    fn cancel_execute(&mut self) -> bool {
        true
    }
}

#[test]
fn inline_completion_resumes_with_value() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let result = dispatcher.block_on(async { Service::new(Inline { value: 7 }).await });
    assert_eq!(result.unwrap(), 7);
}

#[test]
fn deferred_completion_resumes_with_value() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let result = dispatcher.block_on(async {
        Service::new(Deferred {
            delay: Duration::from_millis(30),
            timeout: Timeout::Never,
            outcome: DeferredOutcome::Value(42),
        })
        .await
    });
    assert_eq!(result.unwrap(), 42);
}

#[test]
fn completion_beats_a_later_timeout() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let result = dispatcher.block_on(async {
        Service::new(Deferred {
            delay: Duration::from_millis(30),
            timeout: Timeout::After(Duration::from_millis(500)),
            outcome: DeferredOutcome::Value(42),
        })
        .await
    });
    assert_eq!(result.unwrap(), 42);
}

#[test]
fn timeout_wins_when_cancel_cannot_stop_the_operation() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let start = Instant::now();
    let result = dispatcher.block_on(async {
        Service::new(Deferred {
            delay: Duration::from_millis(250),
            timeout: Timeout::After(Duration::from_millis(40)),
            outcome: DeferredOutcome::Value(42),
        })
        .await
    });
    // The resume is in flight when the timer fires, so the adapter holds
    // the timeout until the late completion lands, then swallows it.
    assert!(matches!(result, Err(Error::TimedOut)));
    assert!(start.elapsed() >= Duration::from_millis(250));
}

#[test]
fn immediate_timeout_cancels_and_fails() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let cancelled = Arc::new(AtomicBool::new(false));
    let seen = cancelled.clone();
    let result =
        dispatcher.block_on(async move { Service::new(NeverCompletes { cancelled: seen }).await });
    assert!(matches!(result, Err(Error::TimedOut)));
    assert!(cancelled.load(Ordering::SeqCst));
}

#[test]
fn timeout_wins_over_an_inline_completion() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let result = dispatcher.block_on(async { Service::new(TimedOutThenResumed).await });
    assert!(matches!(result, Err(Error::TimedOut)));
}

#[test]
fn exceptions_rethrow_at_the_await_point() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let result = dispatcher.block_on(async {
        Service::new(Deferred {
            delay: Duration::from_millis(20),
            timeout: Timeout::Never,
            outcome: DeferredOutcome::Failure(Error::Closed),
        })
        .await
    });
    assert!(matches!(result, Err(Error::Closed)));
}
