// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Condition variable and mutex for tasks.
//!
//! [`Cond<S>`] guards a piece of caller state `S` with an internal mutex.
//! Predicates and notify-actions run under that mutex; resumption of an
//! awaiter always happens outside it. Higher-level primitives (the task
//! mutex below, the bounded queue in `queue.rs`, the async file ready
//! flags) are thin predicates over a `Cond`.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::service::{Callback, Operation, Service, Timeout};

type Predicate<S> = Box<dyn FnMut(&mut S) -> Result<bool> + Send>;

struct AwaiterEntry<S> {
    id: u64,
    predicate: Option<Predicate<S>>,
    callback: Callback<()>,
}

struct CondState<S> {
    data: S,
    ready: bool,
    next_id: u64,
    awaiters: Vec<AwaiterEntry<S>>,
}

struct CondInner<S> {
    state: parking_lot::Mutex<CondState<S>>,
}

impl<S> CondInner<S> {
    fn remove_awaiter(state: &mut CondState<S>, id: u64) -> bool {
        match state.awaiters.iter().position(|entry| entry.id == id) {
            Some(index) => {
                state.awaiters.remove(index);
                true
            }
            None => false,
        }
    }
}

impl<S> Drop for CondInner<S> {
    fn drop(&mut self) {
        // Awaiters still suspended when the condition variable goes away
        // resume with a closed error.
        let awaiters = std::mem::take(&mut self.state.get_mut().awaiters);
        for entry in awaiters {
            entry.callback.set_exception(Error::Closed);
        }
    }
}

/// Hoare-style condition variable over caller state `S`.
pub struct Cond<S: Send + 'static> {
    inner: Arc<CondInner<S>>,
}

impl<S: Send + 'static> Clone for Cond<S> {
    fn clone(&self) -> Self {
        Cond { inner: self.inner.clone() }
    }
}

impl<S: Send + Default + 'static> Default for Cond<S> {
    fn default() -> Self {
        Cond::new(S::default())
    }
}

impl<S: Send + 'static> Cond<S> {
    pub fn new(data: S) -> Cond<S> {
        Cond {
            inner: Arc::new(CondInner {
                state: parking_lot::Mutex::new(CondState {
                    data,
                    ready: false,
                    next_id: 0,
                    awaiters: Vec::new(),
                }),
            }),
        }
    }

    /// Suspend until a notify. Without a predicate, wait/notify behave as a
    /// one-slot binary semaphore: a notify sets a ready token, the first
    /// wait consumes it.
    pub async fn wait(&self) -> Result<()> {
        self.wait_impl(None, None).await
    }

    pub async fn wait_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.wait_impl(timeout, None).await
    }

    /// Suspend until `predicate` returns true. The predicate runs under the
    /// internal mutex, on arrival and again on each notify, in awaiter
    /// arrival order; it may consume guarded state as it succeeds. An `Err`
    /// from the predicate resumes the awaiter with that error.
    pub async fn wait_until<P>(&self, predicate: P) -> Result<()>
    where
        P: FnMut(&mut S) -> Result<bool> + Send + 'static,
    {
        self.wait_impl(None, Some(Box::new(predicate))).await
    }

    pub async fn wait_until_timeout<P>(&self, timeout: Option<Duration>, predicate: P) -> Result<()>
    where
        P: FnMut(&mut S) -> Result<bool> + Send + 'static,
    {
        self.wait_impl(timeout, Some(Box::new(predicate))).await
    }

    fn wait_impl(
        &self,
        timeout: Option<Duration>,
        predicate: Option<Predicate<S>>,
    ) -> Service<WaitOperation<S>> {
        let id = {
            let mut state = self.inner.state.lock();
            state.next_id += 1;
            state.next_id
        };
        Service::new(WaitOperation { cond: self.inner.clone(), id, predicate, timeout })
    }

    /// Run `action` under the mutex, then resume the first awaiter (in
    /// arrival order) whose predicate passes.
    pub fn notify(&self, action: impl FnOnce(&mut S)) {
        let resume = {
            let mut state = self.inner.state.lock();
            action(&mut state.data);
            take_ready_awaiter(&mut *state)
        };
        match resume {
            Some((callback, None)) => callback.set_complete(),
            Some((callback, Some(error))) => callback.set_exception(error),
            None => {}
        }
    }

    /// Like notify, but resumes every awaiter whose predicate passes in one
    /// sweep.
    pub fn notify_all(&self, action: impl FnOnce(&mut S)) {
        let resumed = {
            let mut state = self.inner.state.lock();
            action(&mut state.data);
            let mut resumed = Vec::new();
            let mut index = 0;
            while index < state.awaiters.len() {
                let CondState { data, awaiters, .. } = &mut *state;
                let entry = &mut awaiters[index];
                let passed = match entry.predicate.as_mut() {
                    Some(predicate) => predicate(data),
                    None => Ok(true),
                };
                match passed {
                    Ok(true) => {
                        let entry = awaiters.remove(index);
                        resumed.push((entry.callback, None));
                    }
                    Ok(false) => index += 1,
                    Err(error) => {
                        let entry = awaiters.remove(index);
                        resumed.push((entry.callback, Some(error)));
                    }
                }
            }
            if state.awaiters.is_empty() && resumed.is_empty() {
                state.ready = true;
            }
            resumed
        };
        for (callback, error) in resumed {
            match error {
                Some(error) => callback.set_exception(error),
                None => callback.set_complete(),
            }
        }
    }

    /// Run `action` under the internal mutex without resuming anyone.
    pub fn execute(&self, action: impl FnOnce(&mut S)) {
        let mut state = self.inner.state.lock();
        action(&mut state.data);
    }

    /// Evaluate `action` under the internal mutex and return its result.
    pub fn test<T>(&self, action: impl FnOnce(&mut S) -> T) -> T {
        let mut state = self.inner.state.lock();
        action(&mut state.data)
    }
}

/// Scan awaiters in FIFO order; detach the first whose predicate passes (or
/// errors). When there are no awaiters at all, set the ready token.
fn take_ready_awaiter<S>(state: &mut CondState<S>) -> Option<(Callback<()>, Option<Error>)> {
    if state.awaiters.is_empty() {
        state.ready = true;
        return None;
    }
    let mut index = 0;
    while index < state.awaiters.len() {
        let CondState { data, awaiters, .. } = &mut *state;
        let entry = &mut awaiters[index];
        let passed = match entry.predicate.as_mut() {
            Some(predicate) => predicate(data),
            None => Ok(true),
        };
        match passed {
            Ok(true) => {
                let entry = awaiters.remove(index);
                return Some((entry.callback, None));
            }
            Ok(false) => index += 1,
            Err(error) => {
                let entry = awaiters.remove(index);
                return Some((entry.callback, Some(error)));
            }
        }
    }
    None
}

struct WaitOperation<S: Send + 'static> {
    cond: Arc<CondInner<S>>,
    id: u64,
    predicate: Option<Predicate<S>>,
    timeout: Option<Duration>,
}

impl<S: Send + 'static> Operation for WaitOperation<S> {
    type Output = ();

    fn execute(&mut self, callback: Callback<()>) {
        let outcome = {
            let mut state = self.cond.state.lock();
            let mut predicate = self.predicate.take();
            let passed = match predicate.as_mut() {
                Some(predicate) => {
                    let CondState { data, .. } = &mut *state;
                    predicate(data)
                }
                None => {
                    if state.ready {
                        state.ready = false;
                        Ok(true)
                    } else {
                        Ok(false)
                    }
                }
            };
            match passed {
                Ok(true) => Some(None),
                Err(error) => Some(Some(error)),
                Ok(false) => {
                    state.awaiters.push(AwaiterEntry {
                        id: self.id,
                        predicate,
                        callback: callback.clone(),
                    });
                    None
                }
            }
        };
        match outcome {
            Some(None) => {
                callback.set_complete();
                return;
            }
            Some(Some(error)) => {
                callback.set_exception(error);
                return;
            }
            None => {}
        }
        if let Some(timeout) = self.timeout {
            callback.request_timeout(Timeout::After(timeout));
        }
    }

    fn cancel_execute(&mut self) -> bool {
        let mut state = self.cond.state.lock();
        CondInner::remove_awaiter(&mut *state, self.id)
    }
}

/// Non-reentrant task mutex: `lock` suspends until ownership can be taken,
/// dropping the guard notifies one waiter.
pub struct Mutex {
    cond: Cond<bool>,
}

impl Mutex {
    pub fn new() -> Mutex {
        Mutex { cond: Cond::new(false) }
    }

    pub async fn lock(&self) -> Result<MutexGuard<'_>> {
        self.cond
            .wait_until(|locked| {
                if *locked {
                    Ok(false)
                } else {
                    *locked = true;
                    Ok(true)
                }
            })
            .await?;
        Ok(MutexGuard { mutex: self })
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Mutex::new()
    }
}

pub struct MutexGuard<'a> {
    mutex: &'a Mutex,
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.cond.notify(|locked| *locked = false);
    }
}

#[cfg(test)]
#[path = "cond_tests.rs"]
mod tests;
