// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use wp2p_task::{Callback, Error, Operation, Runtime, Service, Timeout};

/// Completes from a helper thread after a fixed delay; cancellation can
/// never stop the in-flight completion.
struct UncancellableCompletion {
    completes_after: Duration,
    timeout: Duration,
}

impl Operation for UncancellableCompletion {
    type Output = u32;

    fn execute(&mut self, callback: Callback<u32>) {
        callback.request_timeout(Timeout::After(self.timeout));
        let completes_after = self.completes_after;
        std::thread::spawn(move || {
            std::thread::sleep(completes_after);
            callback.set_result(1);
        });
    }

    fn cancel_execute(&mut self) -> bool {
        false
    }
}

#[test]
fn completion_and_timeout_racing_resolves_to_the_completion() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    // Completion and timeout armed for the same instant; the completion
    // cannot be cancelled, so the resume must win and no timeout error may
    // surface.
    let result = dispatcher.block_on(async {
        Service::new(UncancellableCompletion {
            completes_after: Duration::from_millis(200),
            timeout: Duration::from_millis(1000),
        })
        .await
    });
    assert_eq!(result.unwrap(), 1);
}

#[test]
fn late_completion_after_a_timeout_is_swallowed() {
    let runtime = Runtime::new().unwrap();
    let dispatcher = runtime.dispatcher().clone();
    let result = dispatcher.block_on(async {
        Service::new(UncancellableCompletion {
            completes_after: Duration::from_millis(300),
            timeout: Duration::from_millis(50),
        })
        .await
    });
    assert!(matches!(result, Err(Error::TimedOut)));
}
