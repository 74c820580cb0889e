// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background worker pool.
//!
//! Workers block on a shared ready queue; the first available worker resumes
//! a posted task. Shrinking the pool takes effect at each worker's next
//! scheduling point; records of exited workers are joined ("scavenged") on
//! the foreground thread.

use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::dispatcher::{bind_worker, unbind_thread, DispatcherInner};
use crate::fifo::Fifo;
use crate::task::{poll_cell, TaskCell};

struct WorkerRecord {
    id: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct PoolState {
    queue: Fifo<Arc<TaskCell>>,
    desired: usize,
    live: usize,
    running: usize,
    terminating: bool,
    workers: Vec<WorkerRecord>,
    dead: Vec<JoinHandle<()>>,
    next_worker_id: u64,
}

pub(crate) struct Pool {
    state: Mutex<PoolState>,
    ready: Condvar,
    terminated: Condvar,
}

impl Pool {
    pub(crate) fn new() -> Pool {
        Pool {
            state: Mutex::new(PoolState::default()),
            ready: Condvar::new(),
            terminated: Condvar::new(),
        }
    }

    /// Hardware concurrency minus one, clamped to at least one worker. A
    /// zero/unknown answer from the OS counts as three.
    pub(crate) fn default_size() -> usize {
        let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(3);
        cpus.saturating_sub(1).max(1)
    }

    pub(crate) fn start_default(&self, inner: &Arc<DispatcherInner>) {
        self.resize(Self::default_size(), inner);
    }

    pub(crate) fn resize(&self, desired: usize, inner: &Arc<DispatcherInner>) {
        let mut state = self.state.lock();
        state.desired = desired;
        while state.live < desired {
            state.live += 1;
            state.next_worker_id += 1;
            let id = state.next_worker_id;
            let weak = Arc::downgrade(inner);
            let spawned = std::thread::Builder::new()
                .name(format!("wp2p-worker-{id}"))
                .spawn(move || worker_proc(weak, id));
            match spawned {
                Ok(handle) => state.workers.push(WorkerRecord { id, handle }),
                Err(error) => {
                    state.live -= 1;
                    tracing::error!("failed to spawn worker thread: {error}");
                    break;
                }
            }
        }
        // Shrinking: surplus workers notice desired < live on their next
        // pass through get_one.
        self.ready.notify_all();
    }

    pub(crate) fn post(&self, cell: Arc<TaskCell>) {
        let mut state = self.state.lock();
        state.queue.push(cell);
        self.ready.notify_one();
    }

    fn get_one(&self, running: &mut bool) -> Option<Arc<TaskCell>> {
        let mut state = self.state.lock();
        if *running {
            state.running -= 1;
            *running = false;
        }
        loop {
            if state.terminating || state.live > state.desired {
                state.live -= 1;
                return None;
            }
            if let Some(cell) = state.queue.pop() {
                state.running += 1;
                *running = true;
                return Some(cell);
            }
            self.ready.wait(&mut state);
        }
    }

    fn retire(&self, id: u64) {
        let mut state = self.state.lock();
        if let Some(index) = state.workers.iter().position(|worker| worker.id == id) {
            let record = state.workers.remove(index);
            state.dead.push(record.handle);
        }
        self.terminated.notify_all();
    }

    /// Join exited workers. Runs on the foreground thread.
    pub(crate) fn scavenge_dead_threads(&self) {
        let dead = std::mem::take(&mut self.state.lock().dead);
        for handle in dead {
            let _ = handle.join();
            tracing::debug!("worker thread scavenged");
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        let state = self.state.lock();
        state.queue.is_empty() && state.running == 0
    }

    pub(crate) fn clear_queue(&self) {
        self.state.lock().queue.clear();
    }

    pub(crate) fn size(&self) -> usize {
        self.state.lock().workers.len()
    }

    pub(crate) fn dead_count(&self) -> usize {
        self.state.lock().dead.len()
    }

    /// Quiesce and join every worker.
    pub(crate) fn destroy(&self) {
        {
            let mut state = self.state.lock();
            state.terminating = true;
            state.desired = 0;
            self.ready.notify_all();
        }
        loop {
            let dead = std::mem::take(&mut self.state.lock().dead);
            for handle in dead {
                let _ = handle.join();
            }
            let mut state = self.state.lock();
            if state.workers.is_empty() && state.dead.is_empty() {
                break;
            }
            self.terminated.wait_for(&mut state, Duration::from_millis(50));
        }
    }
}

fn worker_proc(inner: Weak<DispatcherInner>, id: u64) {
    bind_worker(inner.clone());
    let mut running = false;
    loop {
        let Some(strong) = inner.upgrade() else {
            break;
        };
        match strong.pool.get_one(&mut running) {
            Some(cell) => {
                poll_cell(&cell);
                // The foreground may be waiting for the pool to drain.
                strong.notify_posted();
            }
            None => {
                tracing::debug!("worker thread terminating");
                strong.pool.retire(id);
                break;
            }
        }
    }
    unbind_thread();
}
