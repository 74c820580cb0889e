// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded blocking queue of owned items.
//!
//! `push` suspends when full, `take` when empty. Closing wakes everyone:
//! pushers fail with a closed error, takers drain the remaining items and
//! then fail likewise.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::cond::Cond;
use crate::error::{fatal, Error, Result};

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

pub struct BlockingQueue<T: Send + 'static> {
    capacity: usize,
    cond: Cond<QueueState<T>>,
}

impl<T: Send + 'static> BlockingQueue<T> {
    pub fn new(capacity: usize) -> BlockingQueue<T> {
        BlockingQueue {
            capacity: capacity.max(1),
            cond: Cond::new(QueueState { items: VecDeque::new(), closed: false }),
        }
    }

    /// Transfer `value` into the queue, suspending while it is full.
    pub async fn push(&self, value: T, timeout: Option<Duration>) -> Result<()> {
        let capacity = self.capacity;
        let slot = Arc::new(parking_lot::Mutex::new(Some(value)));
        let held = slot.clone();
        self.cond
            .wait_until_timeout(timeout, move |state| {
                if state.closed {
                    return Err(Error::Closed);
                }
                if state.items.len() >= capacity {
                    return Ok(false);
                }
                if let Some(value) = held.lock().take() {
                    state.items.push_back(value);
                }
                Ok(true)
            })
            .await?;
        self.cond.notify(|_| {});
        Ok(())
    }

    /// Take one item, suspending while the queue is empty.
    pub async fn take(&self, timeout: Option<Duration>) -> Result<T> {
        let slot: Arc<parking_lot::Mutex<Option<T>>> = Arc::new(parking_lot::Mutex::new(None));
        let sink = slot.clone();
        self.cond
            .wait_until_timeout(timeout, move |state| {
                if let Some(value) = state.items.pop_front() {
                    *sink.lock() = Some(value);
                    return Ok(true);
                }
                if state.closed {
                    return Err(Error::Closed);
                }
                Ok(false)
            })
            .await?;
        self.cond.notify(|_| {});
        let taken = slot.lock().take();
        match taken {
            Some(value) => Ok(value),
            None => fatal("queue take resumed without an item"),
        }
    }

    /// Wake all awaiters; pushes fail from here on, takes drain then fail.
    pub fn close(&self) {
        self.cond.notify_all(|state| state.closed = true);
    }

    pub fn is_closed(&self) -> bool {
        self.cond.test(|state| state.closed)
    }

    pub fn is_empty(&self) -> bool {
        self.cond.test(|state| state.items.is_empty())
    }

    pub fn is_full(&self) -> bool {
        let capacity = self.capacity;
        self.cond.test(move |state| state.items.len() >= capacity)
    }

    pub fn len(&self) -> usize {
        self.cond.test(|state| state.items.len())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
