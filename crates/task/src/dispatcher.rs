// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Foreground event loop, timers, and cross-thread posting.
//!
//! The thread that creates the runtime becomes the foreground thread: all
//! timer callbacks and foreground tasks run there. Posting from any thread
//! sets a flag and signals a condition variable; a single wake is enough to
//! make progress no matter how many posts arrive. Background posts go to the
//! worker pool (see `pool.rs`).

use std::cell::RefCell;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::Waker;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{fatal, Result};
use crate::fifo::Fifo;
use crate::pool::Pool;
use crate::task::{poll_cell, JoinState, Task, TaskCell, World};

/// Handle for a one-shot delayed function, usable with
/// [`Dispatcher::cancel_delayed_function`].
pub type TimerHandle = u64;

#[derive(Clone)]
struct ThreadCtx {
    inner: Weak<DispatcherInner>,
    foreground: bool,
}

thread_local! {
    static THREAD_CTX: RefCell<Option<ThreadCtx>> = const { RefCell::new(None) };
}

pub(crate) fn bind_foreground(inner: &Arc<DispatcherInner>) {
    THREAD_CTX.with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        if ctx.is_some() {
            fatal("a dispatcher is already bound to this thread");
        }
        *ctx = Some(ThreadCtx { inner: Arc::downgrade(inner), foreground: true });
    });
}

pub(crate) fn bind_worker(inner: Weak<DispatcherInner>) {
    THREAD_CTX.with(|ctx| {
        *ctx.borrow_mut() = Some(ThreadCtx { inner, foreground: false });
    });
}

pub(crate) fn unbind_thread() {
    THREAD_CTX.with(|ctx| *ctx.borrow_mut() = None);
}

fn thread_ctx() -> Option<ThreadCtx> {
    THREAD_CTX.with(|ctx| ctx.borrow().clone())
}

/// Coroutine timer: wakes a suspended task on the foreground at its
/// deadline. Ordered earliest-deadline first; equal deadlines fire in
/// registration order.
struct CoTimer {
    deadline: Instant,
    seq: u64,
    fired: Arc<AtomicBool>,
    waker: Waker,
}

impl PartialEq for CoTimer {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for CoTimer {}

impl PartialOrd for CoTimer {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CoTimer {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap: greatest = earliest deadline, and for
        // equal deadlines the earliest registered.
        other.deadline.cmp(&self.deadline).then(other.seq.cmp(&self.seq))
    }
}

struct FnTimer {
    deadline: Instant,
    handle: TimerHandle,
    callback: Box<dyn FnOnce() + Send>,
}

#[derive(Default)]
struct FnTimers {
    entries: Vec<FnTimer>,
    next_handle: TimerHandle,
}

enum FiredTimer {
    Function(Box<dyn FnOnce() + Send>),
    Coroutine(Arc<AtomicBool>, Waker),
}

pub(crate) struct DispatcherInner {
    ready: Mutex<Fifo<Arc<TaskCell>>>,
    pump: Mutex<bool>,
    pump_cv: Condvar,
    co_timers: Mutex<BinaryHeap<CoTimer>>,
    co_seq: AtomicU64,
    fn_timers: Mutex<FnTimers>,
    detached: Mutex<Vec<Arc<TaskCell>>>,
    // Every live cell, weakly. Suspended tasks are reachable through
    // nothing else at shutdown: their only strong references sit in the
    // wakers their own futures store.
    cells: Mutex<Vec<Weak<TaskCell>>>,
    pub(crate) pool: Pool,
    quit: AtomicBool,
    in_loop: AtomicBool,
    next_task_id: AtomicU64,
    shutdown_done: AtomicBool,
}

impl DispatcherInner {
    fn new() -> DispatcherInner {
        DispatcherInner {
            ready: Mutex::new(Fifo::new()),
            pump: Mutex::new(false),
            pump_cv: Condvar::new(),
            co_timers: Mutex::new(BinaryHeap::new()),
            co_seq: AtomicU64::new(0),
            fn_timers: Mutex::new(FnTimers::default()),
            detached: Mutex::new(Vec::new()),
            cells: Mutex::new(Vec::new()),
            pool: Pool::new(),
            quit: AtomicBool::new(false),
            in_loop: AtomicBool::new(false),
            next_task_id: AtomicU64::new(0),
            shutdown_done: AtomicBool::new(false),
        }
    }

    pub(crate) fn post_cell(&self, cell: Arc<TaskCell>) {
        match cell.current_world() {
            World::Foreground => {
                self.ready.lock().push(cell);
                self.notify_posted();
            }
            World::Background => self.pool.post(cell),
        }
    }

    pub(crate) fn notify_posted(&self) {
        let mut posted = self.pump.lock();
        *posted = true;
        self.pump_cv.notify_one();
    }

    pub(crate) fn register_delay(&self, deadline: Instant, fired: Arc<AtomicBool>, waker: Waker) {
        let seq = self.co_seq.fetch_add(1, Ordering::Relaxed);
        self.co_timers.lock().push(CoTimer { deadline, seq, fired, waker });
        self.notify_posted();
    }

    pub(crate) fn post_delayed_function(
        &self,
        delay: Duration,
        callback: Box<dyn FnOnce() + Send>,
    ) -> TimerHandle {
        let deadline = Instant::now() + delay;
        let handle = {
            let mut timers = self.fn_timers.lock();
            timers.next_handle += 1;
            let handle = timers.next_handle;
            // Insert before strictly-later entries only, so same-deadline
            // timers fire in registration order.
            let at = timers
                .entries
                .iter()
                .position(|entry| entry.deadline > deadline)
                .unwrap_or(timers.entries.len());
            timers.entries.insert(at, FnTimer { deadline, handle, callback });
            handle
        };
        self.notify_posted();
        handle
    }

    pub(crate) fn cancel_delayed_function(&self, handle: TimerHandle) -> bool {
        let mut timers = self.fn_timers.lock();
        match timers.entries.iter().position(|entry| entry.handle == handle) {
            Some(index) => {
                timers.entries.remove(index);
                true
            }
            None => false,
        }
    }

    fn next_timer_deadline(&self) -> Option<Instant> {
        let fn_head = self.fn_timers.lock().entries.first().map(|entry| entry.deadline);
        let co_head = self.co_timers.lock().peek().map(|timer| timer.deadline);
        match (fn_head, co_head) {
            (Some(f), Some(c)) => Some(f.min(c)),
            (head, None) => head,
            (None, head) => head,
        }
    }

    /// Fire at most one due timer. Function timers win deadline ties.
    fn pump_one_timer(&self, now: Instant) -> bool {
        let fired = {
            let mut fns = self.fn_timers.lock();
            let mut cos = self.co_timers.lock();
            let fn_head = fns.entries.first().map(|entry| entry.deadline);
            let co_head = cos.peek().map(|timer| timer.deadline);
            let function_wins = match (fn_head, co_head) {
                (None, None) => None,
                (Some(f), None) => (f <= now).then_some(true),
                (None, Some(c)) => (c <= now).then_some(false),
                (Some(f), Some(c)) => {
                    if f <= c {
                        (f <= now).then_some(true)
                    } else {
                        (c <= now).then_some(false)
                    }
                }
            };
            match function_wins {
                Some(true) => Some(FiredTimer::Function(fns.entries.remove(0).callback)),
                Some(false) => cos.pop().map(|timer| FiredTimer::Coroutine(timer.fired, timer.waker)),
                None => None,
            }
        };
        match fired {
            Some(FiredTimer::Function(callback)) => {
                callback();
                true
            }
            Some(FiredTimer::Coroutine(fired, waker)) => {
                fired.store(true, Ordering::Release);
                waker.wake();
                true
            }
            None => false,
        }
    }

    /// Drain due timers and posted tasks. Returns whether anything ran.
    /// On a background worker this just sleeps briefly, mirroring the
    /// behaviour callers rely on when polling from the wrong side.
    pub(crate) fn pump_messages(&self) -> bool {
        if !on_foreground() {
            std::thread::sleep(Duration::from_millis(100));
            return true;
        }
        let mut processed_any = false;
        let now = Instant::now();
        loop {
            let mut processed = false;
            while self.pump_one_timer(now) {
                processed_any = true;
            }
            loop {
                let cell = self.ready.lock().pop();
                match cell {
                    Some(cell) => {
                        processed = true;
                        processed_any = true;
                        poll_cell(&cell);
                    }
                    None => break,
                }
            }
            if !processed {
                self.pool.scavenge_dead_threads();
                self.scavenge_detached();
                return processed_any;
            }
        }
    }

    /// Park until a post arrives, bounded by the next timer deadline or one
    /// second when no timer is pending.
    pub(crate) fn wait_one(&self) {
        let next = self.next_timer_deadline();
        let mut posted = self.pump.lock();
        if *posted {
            *posted = false;
            return;
        }
        let wait = match next {
            Some(deadline) => {
                let now = Instant::now();
                if deadline <= now {
                    return;
                }
                deadline - now
            }
            None => Duration::from_secs(1),
        };
        self.pump_cv.wait_for(&mut posted, wait.max(Duration::from_millis(1)));
    }

    fn scavenge_detached(&self) {
        self.detached.lock().retain(|cell| !cell.is_done());
        self.cells.lock().retain(|cell| cell.strong_count() > 0);
    }

    fn is_done(&self) -> bool {
        if !self.ready.lock().is_empty() {
            return false;
        }
        if !self.fn_timers.lock().entries.is_empty() {
            return false;
        }
        if !self.co_timers.lock().is_empty() {
            return false;
        }
        self.pool.is_done()
    }
}

fn on_foreground() -> bool {
    thread_ctx().map(|ctx| ctx.foreground).unwrap_or(false)
}

/// Cheap cloneable handle to the process dispatcher.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub(crate) fn new_foreground() -> Dispatcher {
        let inner = Arc::new(DispatcherInner::new());
        bind_foreground(&inner);
        inner.pool.start_default(&inner);
        Dispatcher { inner }
    }

    /// The dispatcher bound to the current thread. Fatal when called from a
    /// thread that is neither the foreground thread nor a pool worker.
    pub fn current() -> Dispatcher {
        match thread_ctx().and_then(|ctx| ctx.inner.upgrade()) {
            Some(inner) => Dispatcher { inner },
            None => fatal("no dispatcher on this thread"),
        }
    }

    /// Is the calling thread the foreground thread?
    pub fn is_foreground(&self) -> bool {
        on_foreground()
    }

    fn spawn_world(&self) -> World {
        if on_foreground() {
            World::Foreground
        } else {
            World::Background
        }
    }

    fn new_cell(
        &self,
        future: std::pin::Pin<Box<dyn Future<Output = ()> + Send + 'static>>,
    ) -> Arc<TaskCell> {
        let id = self.inner.next_task_id.fetch_add(1, Ordering::Relaxed) + 1;
        let cell = TaskCell::new(id, future, self.spawn_world(), &self.inner);
        self.inner.cells.lock().push(Arc::downgrade(&cell));
        cell
    }

    /// Schedule `future` and return a join handle for it. The task starts on
    /// the world of the calling thread.
    pub fn spawn<F>(&self, future: F) -> Task<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let state = JoinState::new();
        let completion = state.clone();
        let cell = self.new_cell(Box::pin(async move {
            let output = future.await;
            completion.complete(output);
        }));
        cell.schedule();
        Task::new(state)
    }

    /// Take ownership of a detached task and run it to completion. A task
    /// that finishes with an error terminates the process.
    pub fn start_thread<F>(&self, future: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let cell = self.new_cell(Box::pin(async move {
            if let Err(error) = future.await {
                fatal(&format!("task exited abnormally: {error}"));
            }
        }));
        self.inner.detached.lock().push(cell.clone());
        cell.schedule();
    }

    /// One-shot timer whose callback executes on the foreground thread.
    pub fn post_delayed_function<F>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.post_delayed_function(delay, Box::new(callback))
    }

    /// Best-effort cancel. True iff the callback had not started; false
    /// means it has run or is about to.
    pub fn cancel_delayed_function(&self, handle: TimerHandle) -> bool {
        self.inner.cancel_delayed_function(handle)
    }

    /// Drain due timers and ready tasks once. Returns whether anything ran.
    pub fn pump_messages(&self) -> bool {
        self.inner.pump_messages()
    }

    /// Pump until no timers, ready tasks, or running pool tasks remain.
    pub fn pump_until_idle(&self) {
        if !self.is_foreground() {
            fatal("pump_until_idle on a background thread");
        }
        while !self.inner.is_done() {
            if !self.inner.pump_messages() {
                self.inner.wait_one();
            }
        }
    }

    /// Run the foreground loop until [`Dispatcher::post_quit`]. Nesting is a
    /// programming error.
    pub fn message_loop(&self) {
        if !self.is_foreground() {
            fatal("message loop on a background thread");
        }
        if self.inner.in_loop.swap(true, Ordering::SeqCst) {
            fatal("message loop is already running");
        }
        loop {
            self.inner.pump_messages();
            if self.inner.quit.load(Ordering::SeqCst) {
                break;
            }
            self.inner.wait_one();
        }
        self.inner.in_loop.store(false, Ordering::SeqCst);
        self.inner.quit.store(false, Ordering::SeqCst);
    }

    /// Start `main` as a detached task, then run the message loop.
    pub fn message_loop_with<F>(&self, main: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.start_thread(main);
        self.message_loop();
    }

    /// Make the current message loop return after its next wake.
    pub fn post_quit(&self) {
        self.inner.quit.store(true, Ordering::SeqCst);
        self.inner.notify_posted();
    }

    pub(crate) fn run_task<T: Send + 'static>(&self, task: Task<T>) -> T {
        if !self.is_foreground() {
            fatal("task result awaited synchronously on a background thread");
        }
        loop {
            if let Some(value) = task.state().try_take() {
                return value;
            }
            self.inner.pump_messages();
            if let Some(value) = task.state().try_take() {
                return value;
            }
            self.inner.wait_one();
        }
    }

    /// Bootstrap from non-task code: spawn `future` and pump foreground
    /// messages until it completes.
    pub fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let task = self.spawn(future);
        self.run_task(task)
    }

    /// Block the calling thread. The foreground keeps pumping timers and
    /// messages while it waits; workers use an ordinary OS sleep.
    pub fn sleep_for(&self, duration: Duration) {
        self.sleep_until(Instant::now() + duration);
    }

    pub fn sleep_until(&self, deadline: Instant) {
        if !self.is_foreground() {
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
            return;
        }
        loop {
            if Instant::now() >= deadline {
                return;
            }
            self.inner.pump_messages();
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            let mut cap = deadline;
            if let Some(timer) = self.inner.next_timer_deadline() {
                cap = cap.min(timer);
            }
            let wait = cap.saturating_duration_since(now).max(Duration::from_millis(1));
            let mut posted = self.inner.pump.lock();
            if !*posted {
                self.inner.pump_cv.wait_for(&mut posted, wait);
            }
            *posted = false;
        }
    }

    /// Resize the worker pool. Shrinking takes effect at each worker's next
    /// scheduling point.
    pub fn set_pool_size(&self, size: usize) {
        if !self.is_foreground() {
            fatal("set_pool_size on a background thread");
        }
        self.inner.pool.resize(size, &self.inner);
    }

    pub fn pool_size(&self) -> usize {
        self.inner.pool.size()
    }

    pub fn dead_worker_count(&self) -> usize {
        self.inner.pool.dead_count()
    }

    /// No ready tasks, no pending timers, and an idle pool.
    pub fn is_idle(&self) -> bool {
        self.inner.is_done()
    }

    pub(crate) fn shutdown(&self) {
        if self.inner.shutdown_done.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.pool.destroy();
        // Timer entries hold adapter references and task wakers; drop them
        // before touching the cells.
        self.inner.fn_timers.lock().entries.clear();
        self.inner.co_timers.lock().clear();
        // Dropping queue references alone is not enough: a suspended task
        // stores a clone of its own waker inside adapter state owned by
        // its future, so the cell keeps itself (and any descriptors the
        // future holds) alive. Take every live cell's future so adapter
        // teardown cancels the outstanding waits and the cycle unwinds.
        let cells: Vec<_> = {
            let mut registry = self.inner.cells.lock();
            registry.drain(..).filter_map(|cell| cell.upgrade()).collect()
        };
        for cell in &cells {
            cell.teardown();
        }
        self.inner.ready.lock().clear();
        self.inner.pool.clear_queue();
        self.inner.detached.lock().clear();
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
