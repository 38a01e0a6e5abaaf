// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Worker pool: N threads, each pumping its own `Worker`.
//!
//! Threads share nothing but their inboxes. A frame reaches a thread only
//! through an inbox, whether it is freshly spawned or was parked elsewhere
//! and is being resumed, so each hand-off is ordered by the inbox lock. The
//! thread then schedules it on its own worker and pumps to quiescence.
//!
//! Spawned bodies must be `Send` and may resume on any thread. Frames a
//! body creates for its own tasks are bound to the thread that made them,
//! and a resume of such a frame goes back to that thread's inbox.

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, error, info};

use super::frame::{Disposal, FrameHandle};
use super::worker::Worker;
use crate::config::{self, RuntimeConfig};
use crate::error::{fatal, RuntimeError};

/// Failure starting a pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to spawn worker thread `{name}`: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
}

struct Inbox {
    frames: Mutex<VecDeque<FrameHandle>>,
    available: Condvar,
}

impl Inbox {
    fn new() -> Self {
        Self {
            frames: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    fn push(&self, frame: FrameHandle) {
        self.frames.lock().push_back(frame);
        self.available.notify_one();
    }
}

/// State shared between pool threads and callers.
struct Shared {
    inboxes: Vec<Inbox>,
    /// Thread id of each worker, set when its thread starts.
    homes: Vec<OnceLock<ThreadId>>,
    next: AtomicUsize,
    /// Spawned frames that have not returned yet, parked ones included.
    in_flight: AtomicUsize,
    idle_lock: Mutex<()>,
    idle: Condvar,
    shutdown: AtomicBool,
}

impl Shared {
    fn dispatch(&self, frame: FrameHandle) {
        let id = self.next.fetch_add(1, Ordering::Relaxed) % self.inboxes.len();
        self.inboxes[id].push(frame);
    }

    /// Index of the worker running on `thread`.
    fn worker_on(&self, thread: ThreadId) -> Option<usize> {
        self.homes.iter().position(|home| home.get() == Some(&thread))
    }

    fn finish_one(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            let _guard = self.idle_lock.lock();
            self.idle.notify_all();
        }
    }
}

/// A fixed set of worker threads.
pub struct WorkerPool {
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
    shared: Arc<Shared>,
}

impl WorkerPool {
    /// Start `config.workers` threads named `<thread_name>-<id>`.
    pub fn new(config: RuntimeConfig) -> Result<Self, PoolError> {
        let count = config.workers.max(1);
        let shared = Arc::new(Shared {
            inboxes: (0..count).map(|_| Inbox::new()).collect(),
            homes: (0..count).map(|_| OnceLock::new()).collect(),
            next: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            idle_lock: Mutex::new(()),
            idle: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let pool = Self {
            threads: Mutex::new(Vec::with_capacity(count)),
            shared,
        };
        for id in 0..count {
            let name = format!("{}-{}", config.thread_name, id);
            let shared = pool.shared.clone();
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(id, &shared))
                .map_err(|source| PoolError::Spawn { name, source })?;
            pool.threads.lock().push(handle);
        }
        info!(workers = count, "worker pool started");
        Ok(pool)
    }

    /// A pool configured from `VIREO_*` variables.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self::new(RuntimeConfig::from_env()?)?)
    }

    pub fn worker_count(&self) -> usize {
        self.shared.inboxes.len()
    }

    /// Spawned frames still running or parked.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Run `future` as a detached frame on some worker.
    pub fn spawn_detached<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
        let shared = self.shared.clone();
        let frame = FrameHandle::allocate_send(
            async move {
                future.await;
                shared.finish_one();
            },
            Disposal::Detached,
        );
        self.shared.dispatch(frame);
    }

    /// Resume a frame taken from a park slot.
    ///
    /// A thread-bound frame goes back to the worker that owns it; resuming
    /// one bound to a thread outside this pool is fatal. Any other frame
    /// goes to some worker.
    #[track_caller]
    pub fn resume(&self, frame: FrameHandle) {
        if config::PROTOCOL_CHECKS && frame.is_complete() {
            fatal(RuntimeError::DoubleAwait { frame: frame.id() });
        }
        match frame.home() {
            None => self.shared.dispatch(frame),
            Some(home) => match self.shared.worker_on(home) {
                Some(id) => self.shared.inboxes[id].push(frame),
                None => fatal(RuntimeError::ForeignFrame { frame: frame.id() }),
            },
        }
    }

    /// Wait for every spawned frame to return, then stop and join the
    /// threads. Blocks forever if a parked frame is never resumed.
    pub fn shutdown(&self) {
        {
            let mut guard = self.shared.idle_lock.lock();
            while self.shared.in_flight.load(Ordering::Acquire) > 0 {
                self.shared.idle.wait(&mut guard);
            }
        }

        self.shared.shutdown.store(true, Ordering::Release);
        for inbox in &self.shared.inboxes {
            let _frames = inbox.frames.lock();
            inbox.available.notify_all();
        }

        let mut threads = self.threads.lock();
        for handle in threads.drain(..) {
            let name = handle.thread().name().unwrap_or("<unnamed>").to_string();
            if handle.join().is_err() {
                error!(thread = %name, "worker thread panicked");
            }
        }
        debug!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.shared.shutdown.load(Ordering::Acquire) {
            self.shutdown();
        }
    }
}

/// Worker thread main loop.
fn worker_loop(id: usize, shared: &Shared) {
    let _ = shared.homes[id].set(thread::current().id());
    let worker = Worker::new();
    let inbox = &shared.inboxes[id];
    loop {
        let next = {
            let mut frames = inbox.frames.lock();
            loop {
                if let Some(frame) = frames.pop_front() {
                    break Some(frame);
                }
                if shared.shutdown.load(Ordering::Acquire) {
                    break None;
                }
                inbox.available.wait(&mut frames);
            }
        };
        let Some(frame) = next else {
            break;
        };
        worker.schedule(frame);
        worker.pump();
    }
    debug!(worker = id, stats = ?worker.stats(), "worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coro::park::{park, LockToken, ParkSlot};
    use crate::coro::task::spawn_detached;
    use std::sync::atomic::AtomicI32;

    fn pool(workers: usize) -> WorkerPool {
        WorkerPool::new(RuntimeConfig::builder().workers(workers).build()).unwrap()
    }

    #[test]
    fn spawn_and_shutdown() {
        let pool = pool(2);
        let counter = Arc::new(AtomicI32::new(0));
        for _ in 0..10 {
            let c = counter.clone();
            pool.spawn_detached(async move {
                c.fetch_add(1, Ordering::Relaxed);
            });
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::Relaxed), 10);
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn thread_names_follow_config() {
        let pool = WorkerPool::new(
            RuntimeConfig::builder()
                .workers(1)
                .thread_name("vireo-test")
                .build(),
        )
        .unwrap();
        let seen = Arc::new(Mutex::new(String::new()));
        let s = seen.clone();
        pool.spawn_detached(async move {
            *s.lock() = thread::current().name().unwrap_or_default().to_string();
        });
        pool.shutdown();
        assert_eq!(*seen.lock(), "vireo-test-0");
    }

    #[test]
    fn drop_waits_for_work() {
        let counter = Arc::new(AtomicI32::new(0));
        {
            let pool = pool(3);
            assert_eq!(pool.worker_count(), 3);
            for _ in 0..50 {
                let c = counter.clone();
                pool.spawn_detached(async move {
                    c.fetch_add(1, Ordering::Relaxed);
                });
            }
        }
        assert_eq!(counter.load(Ordering::Relaxed), 50);
    }

    #[test]
    fn thread_bound_frames_resume_on_their_own_worker() {
        let pool = pool(3);
        let slot = Arc::new(ParkSlot::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let (s, t) = (slot.clone(), seen.clone());
        pool.spawn_detached(async move {
            spawn_detached(async move {
                t.lock().push(thread::current().id());
                park(&s, LockToken::NONE).await;
                t.lock().push(thread::current().id());
            });
        });

        while !slot.is_occupied() {
            thread::yield_now();
        }
        pool.resume(slot.take().unwrap());
        pool.shutdown();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], seen[1]);
    }

    #[test]
    #[should_panic(expected = "belongs to another thread")]
    fn resuming_a_frame_bound_outside_the_pool_is_fatal() {
        let w = Worker::new();
        let slot = Arc::new(ParkSlot::new());
        let s = slot.clone();
        w.spawn_detached(async move { park(&s, LockToken::NONE).await });
        w.pump();

        let pool = pool(1);
        pool.resume(slot.take().unwrap());
    }
}
