// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service adapter: bridges callback-style native operations into awaitable
//! futures, with timeout and orderly cancellation.
//!
//! An [`Operation`] supplies `execute` (arrange exactly one future call into
//! the [`Callback`]) and `cancel_execute` (abandon the work; `true` means no
//! callback will ever occur). The adapter arbitrates the three-way race
//! between operation completion, an optional timeout timer, and
//! cancellation, then wakes the suspended task on the world it suspended
//! from. The state machine is guarded by a single per-adapter mutex;
//! `execute` and `cancel_execute` never run concurrently.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use parking_lot::Mutex;

use crate::dispatcher::{Dispatcher, TimerHandle};
use crate::error::{fatal, Error, Result};

/// Timeout requested by an operation from inside `execute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// No deadline.
    Never,
    /// Fail with [`Error::TimedOut`] after the given duration.
    After(Duration),
    /// Fail immediately. Exists to reach the executing-timed-out states,
    /// which otherwise require losing a race that is nearly impossible to
    /// stage.
    Immediate,
}

impl From<Option<Duration>> for Timeout {
    fn from(value: Option<Duration>) -> Timeout {
        match value {
            Some(duration) => Timeout::After(duration),
            None => Timeout::Never,
        }
    }
}

/// A callback-driven native operation adapted into a future.
pub trait Operation: Send + 'static {
    type Output: Send + 'static;

    /// Start the work. Must arrange for exactly one future call into
    /// `callback` (`set_result`/`set_complete`/`set_exception`), or for a
    /// later `cancel_execute` to return true.
    fn execute(&mut self, callback: Callback<Self::Output>);

    /// Abandon the work. True means no further callback will occur; false
    /// means a callback is in flight and the adapter handles the race.
    fn cancel_execute(&mut self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Executing,
    ExecutingTimedOut,
    ExecutingResumed,
    ExecutingTimedOutAndResumed,
    Executed,
    ResumedTimeoutInFlight,
    TimedOutResumeInFlight,
    Resuming,
    Resumed,
}

struct AdapterState<T> {
    phase: Phase,
    waker: Option<Waker>,
    value: Option<T>,
    error: Option<Error>,
    has_timeout: bool,
    timeout_requested: bool,
    timer_handle: TimerHandle,
}

impl<T> AdapterState<T> {
    fn new() -> AdapterState<T> {
        AdapterState {
            phase: Phase::Idle,
            waker: None,
            value: None,
            error: None,
            has_timeout: false,
            timeout_requested: false,
            timer_handle: 0,
        }
    }
}

struct Shared<Op: Operation> {
    state: Mutex<AdapterState<Op::Output>>,
    operation: Mutex<Option<Op>>,
    dispatcher: Dispatcher,
}

impl<Op: Operation> Shared<Op> {
    fn bad_phase(&self, action: &str, phase: Phase) -> ! {
        fatal(&format!("service adapter: invalid state for {action} ({phase:?})"));
    }

    fn cancel_resume(&self) -> bool {
        let mut operation = self.operation.lock();
        match operation.as_mut() {
            Some(operation) => operation.cancel_execute(),
            None => true,
        }
    }

    fn cancel_timeout(&self, state: &mut AdapterState<Op::Output>) -> bool {
        if !state.timeout_requested {
            return true;
        }
        let cancelled = self.dispatcher.cancel_delayed_function(state.timer_handle);
        state.timeout_requested = false;
        state.timer_handle = 0;
        cancelled
    }

    /// Enter Resumed and wake the suspended task on its origin world.
    fn resume(&self) {
        let waker = {
            let mut state = self.state.lock();
            if state.phase != Phase::Resuming {
                self.bad_phase("resume", state.phase);
            }
            state.phase = Phase::Resumed;
            state.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// The operation has delivered its outcome.
    fn on_resume(&self) {
        let mut state = self.state.lock();
        match state.phase {
            Phase::Executing => state.phase = Phase::ExecutingResumed,
            Phase::ExecutingTimedOut => state.phase = Phase::ExecutingTimedOutAndResumed,
            Phase::Executed => {
                if self.cancel_timeout(&mut state) {
                    state.phase = Phase::Resuming;
                    drop(state);
                    self.resume();
                } else {
                    state.phase = Phase::ResumedTimeoutInFlight;
                }
            }
            Phase::TimedOutResumeInFlight => {
                // Timeout wins; the late outcome is swallowed.
                state.phase = Phase::Resuming;
                drop(state);
                self.resume();
            }
            phase => self.bad_phase("on_resume", phase),
        }
    }

    /// `execute` has returned on the suspending thread.
    fn on_executed(&self) {
        let mut state = self.state.lock();
        match state.phase {
            Phase::Executing => state.phase = Phase::Executed,
            Phase::ExecutingTimedOut => {
                if self.cancel_resume() {
                    state.phase = Phase::Resuming;
                    drop(state);
                    self.resume();
                } else {
                    state.phase = Phase::TimedOutResumeInFlight;
                }
            }
            Phase::ExecutingResumed => {
                if self.cancel_timeout(&mut state) {
                    state.phase = Phase::Resuming;
                    drop(state);
                    self.resume();
                } else {
                    state.phase = Phase::ResumedTimeoutInFlight;
                }
            }
            Phase::ExecutingTimedOutAndResumed => {
                state.phase = Phase::Resuming;
                drop(state);
                self.resume();
            }
            phase => self.bad_phase("on_executed", phase),
        }
    }

    /// The timeout timer fired on the foreground thread.
    fn on_timed_out(&self) {
        let mut state = self.state.lock();
        match state.phase {
            Phase::Executing => {
                state.has_timeout = true;
                state.phase = Phase::ExecutingTimedOut;
            }
            Phase::ExecutingResumed => {
                state.has_timeout = true;
                state.phase = Phase::ExecutingTimedOutAndResumed;
            }
            Phase::Executed => {
                state.has_timeout = true;
                if self.cancel_resume() {
                    state.phase = Phase::Resuming;
                    drop(state);
                    self.resume();
                } else {
                    state.phase = Phase::TimedOutResumeInFlight;
                }
            }
            Phase::ResumedTimeoutInFlight => {
                // The normal resume wins.
                state.phase = Phase::Resuming;
                drop(state);
                self.resume();
            }
            phase => self.bad_phase("on_timed_out", phase),
        }
    }
}

trait AdapterControl<T>: Send + Sync {
    fn set_result(self: Arc<Self>, value: T);
    fn set_exception(self: Arc<Self>, error: Error);
    fn request_timeout(self: Arc<Self>, timeout: Timeout);
}

impl<Op: Operation> AdapterControl<Op::Output> for Shared<Op> {
    fn set_result(self: Arc<Self>, value: Op::Output) {
        {
            let mut state = self.state.lock();
            state.value = Some(value);
        }
        self.on_resume();
    }

    fn set_exception(self: Arc<Self>, error: Error) {
        {
            let mut state = self.state.lock();
            state.error = Some(error);
        }
        self.on_resume();
    }

    fn request_timeout(self: Arc<Self>, timeout: Timeout) {
        {
            let state = self.state.lock();
            if state.phase != Phase::Executing && state.phase != Phase::ExecutingResumed {
                self.bad_phase("request_timeout", state.phase);
            }
        }
        match timeout {
            Timeout::Never => {}
            Timeout::Immediate => self.on_timed_out(),
            Timeout::After(duration) => {
                let mut state = self.state.lock();
                let control = self.clone();
                let handle = self
                    .dispatcher
                    .post_delayed_function(duration, move || control.on_timed_out());
                state.timer_handle = handle;
                state.timeout_requested = true;
            }
        }
    }
}

/// Completion interface handed to an [`Operation`]. Clonable; callable from
/// any thread.
pub struct Callback<T> {
    control: Arc<dyn AdapterControl<T>>,
}

impl<T> Clone for Callback<T> {
    fn clone(&self) -> Self {
        Callback { control: self.control.clone() }
    }
}

impl<T> Callback<T> {
    /// Deliver the operation's value and resume the awaiter.
    pub fn set_result(&self, value: T) {
        self.control.clone().set_result(value);
    }

    /// Deliver a failure; the awaiter resumes with this error.
    pub fn set_exception(&self, error: Error) {
        self.control.clone().set_exception(error);
    }

    /// Arm the timeout. Only legal while `execute` is on the stack.
    pub fn request_timeout(&self, timeout: Timeout) {
        self.control.clone().request_timeout(timeout);
    }
}

impl Callback<()> {
    /// Completion for void operations.
    pub fn set_complete(&self) {
        self.set_result(());
    }
}

/// Awaitable wrapper around an [`Operation`].
pub struct Service<Op: Operation> {
    shared: Arc<Shared<Op>>,
    started: bool,
}

impl<Op: Operation> Service<Op> {
    /// Wrap `operation`. The adapter captures the current dispatcher; the
    /// awaiter resumes on the world it suspends from.
    pub fn new(operation: Op) -> Service<Op> {
        Service {
            shared: Arc::new(Shared {
                state: Mutex::new(AdapterState::new()),
                operation: Mutex::new(Some(operation)),
                dispatcher: Dispatcher::current(),
            }),
            started: false,
        }
    }
}

impl<Op: Operation> Future for Service<Op> {
    type Output = Result<Op::Output>;

    fn poll(mut self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Self::Output> {
        if !self.started {
            self.started = true;
            {
                let mut state = self.shared.state.lock();
                if state.phase != Phase::Idle {
                    self.shared.bad_phase("suspend", state.phase);
                }
                state.phase = Phase::Executing;
                state.waker = Some(context.waker().clone());
            }
            let callback =
                Callback { control: self.shared.clone() as Arc<dyn AdapterControl<Op::Output>> };
            {
                let mut operation = self.shared.operation.lock();
                if let Some(operation) = operation.as_mut() {
                    operation.execute(callback);
                }
            }
            self.shared.on_executed();
            return Poll::Pending;
        }

        let mut state = self.shared.state.lock();
        if state.phase != Phase::Resumed {
            state.waker = Some(context.waker().clone());
            return Poll::Pending;
        }
        if let Some(error) = state.error.take() {
            return Poll::Ready(Err(error));
        }
        if state.has_timeout {
            return Poll::Ready(Err(Error::TimedOut));
        }
        match state.value.take() {
            Some(value) => Poll::Ready(Ok(value)),
            None => fatal("service adapter resumed without an outcome"),
        }
    }
}

impl<Op: Operation> Drop for Service<Op> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        match state.phase {
            Phase::Idle | Phase::Resumed => {}
            // Dropped while suspended: the runtime is tearing the task
            // down. Ask the operation to abandon its work; true means no
            // callback will ever occur. A callback already in flight
            // resolves through the normal Executed path into the orphaned
            // adapter and is discarded. Clearing the waker releases the
            // task's self-reference either way.
            Phase::Executed => {
                let cancelled = self.shared.cancel_resume();
                self.shared.cancel_timeout(&mut state);
                state.waker = None;
                if cancelled {
                    state.phase = Phase::Resumed;
                }
            }
            // A resume or timeout is already in flight on another thread;
            // it completes into the orphaned adapter. Only the waker link
            // needs to go.
            Phase::ResumedTimeoutInFlight | Phase::TimedOutResumeInFlight => {
                state.waker = None;
            }
            phase => {
                drop(state);
                fatal(&format!("service adapter destroyed in invalid state ({phase:?})"));
            }
        }
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
