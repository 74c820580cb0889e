// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task cells and join handles.
//!
//! A spawned future lives in a reference-counted cell implementing
//! [`std::task::Wake`]: waking the cell posts it onto the queue of whichever
//! world (foreground or background) the task currently belongs to. Awaiting a
//! [`Task`] handle parks the awaiter's waker in the child's result slot; the
//! child wakes it exactly once on completion.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Wake, Waker};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::dispatcher::DispatcherInner;
use crate::error::fatal;

/// Which side of the dispatcher a task resumes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum World {
    Foreground,
    Background,
}

impl World {
    fn from_u8(value: u8) -> World {
        if value == 0 {
            World::Foreground
        } else {
            World::Background
        }
    }
}

type BoxedFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// One spawned task. The future slot doubles as the poll lock: whichever
/// thread holds it is the thread resuming the task.
pub(crate) struct TaskCell {
    pub(crate) id: u64,
    future: Mutex<Option<BoxedFuture>>,
    world: AtomicU8,
    queued: AtomicBool,
    done: AtomicBool,
    dispatcher: Weak<DispatcherInner>,
}

impl TaskCell {
    pub(crate) fn new(
        id: u64,
        future: BoxedFuture,
        world: World,
        dispatcher: &Arc<DispatcherInner>,
    ) -> Arc<TaskCell> {
        Arc::new(TaskCell {
            id,
            future: Mutex::new(Some(future)),
            world: AtomicU8::new(world as u8),
            queued: AtomicBool::new(false),
            done: AtomicBool::new(false),
            dispatcher: Arc::downgrade(dispatcher),
        })
    }

    pub(crate) fn set_world(&self, world: World) {
        self.world.store(world as u8, Ordering::Release);
    }

    pub(crate) fn current_world(&self) -> World {
        World::from_u8(self.world.load(Ordering::Acquire))
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Post this cell to its world's ready queue, once per wake edge.
    pub(crate) fn schedule(self: Arc<Self>) {
        if self.done.load(Ordering::Acquire) {
            return;
        }
        if self.queued.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.post_cell(self);
        }
    }

    /// Drop the stored future without resuming it. A suspended task keeps a
    /// clone of its own waker inside the adapter state its future owns;
    /// taking the future out runs that adapter's teardown (cancelling the
    /// registered wait) and breaks the cycle, releasing whatever the future
    /// held. Used by dispatcher shutdown; a no-op for completed cells.
    pub(crate) fn teardown(&self) {
        let future = self.future.lock().take();
        self.done.store(true, Ordering::Release);
        drop(future);
    }
}

impl Wake for TaskCell {
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.clone().schedule();
    }
}

thread_local! {
    static CURRENT_TASK: RefCell<Option<Arc<TaskCell>>> = const { RefCell::new(None) };
}

/// The cell currently being polled on this thread.
pub(crate) fn current_task() -> Option<Arc<TaskCell>> {
    CURRENT_TASK.with(|cell| cell.borrow().clone())
}

struct PollGuard {
    previous: Option<Arc<TaskCell>>,
}

impl Drop for PollGuard {
    fn drop(&mut self) {
        CURRENT_TASK.with(|cell| *cell.borrow_mut() = self.previous.take());
    }
}

/// Resume a cell: clear its queued edge, then poll the stored future with
/// the cell itself as the waker.
pub(crate) fn poll_cell(cell: &Arc<TaskCell>) {
    cell.queued.store(false, Ordering::Release);
    let waker = Waker::from(cell.clone());
    let mut context = Context::from_waker(&waker);
    let _guard = PollGuard {
        previous: CURRENT_TASK.with(|current| current.borrow_mut().replace(cell.clone())),
    };
    let mut slot = cell.future.lock();
    let finished = match slot.as_mut() {
        Some(future) => future.as_mut().poll(&mut context).is_ready(),
        None => true,
    };
    if finished {
        *slot = None;
        cell.done.store(true, Ordering::Release);
    }
}

enum JoinSlot<T> {
    Pending { waker: Option<Waker> },
    Ready(T),
    Taken,
}

pub(crate) struct JoinState<T> {
    slot: Mutex<JoinSlot<T>>,
}

impl<T> JoinState<T> {
    pub(crate) fn new() -> Arc<JoinState<T>> {
        Arc::new(JoinState { slot: Mutex::new(JoinSlot::Pending { waker: None }) })
    }

    /// Publish the task's output and wake the awaiter, if any.
    pub(crate) fn complete(&self, value: T) {
        let waker = {
            let mut slot = self.slot.lock();
            match std::mem::replace(&mut *slot, JoinSlot::Ready(value)) {
                JoinSlot::Pending { waker } => waker,
                _ => fatal("task completed twice"),
            }
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    pub(crate) fn try_take(&self) -> Option<T> {
        let mut slot = self.slot.lock();
        match &*slot {
            JoinSlot::Ready(_) => match std::mem::replace(&mut *slot, JoinSlot::Taken) {
                JoinSlot::Ready(value) => Some(value),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Join handle for a spawned task. Awaiting it suspends the caller until the
/// task completes and yields the task's output; a task that returned an
/// `Err` propagates it to the awaiting point here.
pub struct Task<T> {
    state: Arc<JoinState<T>>,
}

impl<T> Task<T> {
    pub(crate) fn new(state: Arc<JoinState<T>>) -> Task<T> {
        Task { state }
    }

    pub(crate) fn state(&self) -> &Arc<JoinState<T>> {
        &self.state
    }
}

impl<T: Send + 'static> Task<T> {
    /// Bootstrap from non-task code: pump foreground messages until this
    /// task completes, then return its output.
    pub fn get_result(self) -> T {
        crate::dispatcher::Dispatcher::current().run_task(self)
    }
}

impl<T: Send + 'static> Future for Task<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<T> {
        let mut slot = self.state.slot.lock();
        match std::mem::replace(&mut *slot, JoinSlot::Taken) {
            JoinSlot::Ready(value) => Poll::Ready(value),
            JoinSlot::Pending { .. } => {
                *slot = JoinSlot::Pending { waker: Some(context.waker().clone()) };
                Poll::Pending
            }
            JoinSlot::Taken => fatal("task result already taken"),
        }
    }
}

/// Resume the calling task on the foreground thread.
pub fn foreground() -> Hop {
    Hop { target: World::Foreground, moved: false }
}

/// Resume the calling task on a background worker.
pub fn background() -> Hop {
    Hop { target: World::Background, moved: false }
}

pub struct Hop {
    target: World,
    moved: bool,
}

impl Future for Hop {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<()> {
        if self.moved {
            return Poll::Ready(());
        }
        let Some(cell) = current_task() else {
            fatal("world hop awaited outside a task");
        };
        cell.set_world(self.target);
        self.moved = true;
        context.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Resume the calling task on the foreground thread after at least
/// `duration`.
pub fn delay(duration: Duration) -> Delay {
    Delay { duration, fired: None }
}

pub struct Delay {
    duration: Duration,
    fired: Option<Arc<AtomicBool>>,
}

impl Future for Delay {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<()> {
        if let Some(fired) = &self.fired {
            if fired.load(Ordering::Acquire) {
                return Poll::Ready(());
            }
            return Poll::Pending;
        }
        let Some(cell) = current_task() else {
            fatal("delay awaited outside a task");
        };
        let Some(dispatcher) = cell.dispatcher.upgrade() else {
            return Poll::Pending;
        };
        // Delays always resume on the foreground.
        cell.set_world(World::Foreground);
        let fired = Arc::new(AtomicBool::new(false));
        dispatcher.register_delay(
            Instant::now() + self.duration,
            fired.clone(),
            context.waker().clone(),
        );
        self.fired = Some(fired);
        Poll::Pending
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
