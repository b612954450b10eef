//! Shared retry scheduler.
//!
//! One wheel per [`Endpoint`](crate::Endpoint). Retransmission and
//! termination timers of every transaction and dialog are armed here
//! instead of each entity sleeping on its own. Callbacks run on the
//! wheel's worker strand; anything that blocks or awaits must be
//! spawned by the callback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::poll_fn;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::time::delay_queue::{DelayQueue, Key};

type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

struct Entry {
    id: u64,
    cancelled: Arc<AtomicBool>,
    callback: TimerCallback,
}

enum Command {
    Schedule { deadline: Instant, entry: Entry },
    Cancel { id: u64 },
}

/// Handle to a scheduled timer. Cancelling through it is idempotent and,
/// when it happens before the callback starts, guaranteed to prevent the
/// callback.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    id: u64,
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// The shared timer wheel.
///
/// Cloning is cheap; all clones feed the same worker strand.
#[derive(Clone)]
pub struct TimerWheel {
    tx: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
}

impl TimerWheel {
    /// Creates the wheel and spawns its worker strand.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(run_wheel(rx));

        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// The wheel's monotonic clock.
    pub fn now(&self) -> Instant {
        Instant::now()
    }

    /// Schedules `callback` to run after `delay`.
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_at(Instant::now() + delay, callback)
    }

    /// Schedules `callback` to run at `deadline`. A deadline already in
    /// the past fires once, immediately.
    pub fn schedule_at<F>(&self, deadline: Instant, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));

        let entry = Entry {
            id,
            cancelled: cancelled.clone(),
            callback: Box::new(callback),
        };

        // Failure means the worker is gone; the flag keeps cancel
        // semantics coherent for the caller.
        let _ = self.tx.send(Command::Schedule { deadline, entry });

        TimerHandle { id, cancelled }
    }

    /// Cancels a scheduled timer. Synchronous and idempotent: once this
    /// returns, a callback that has not started will never run.
    pub fn cancel(&self, handle: &TimerHandle) {
        handle.cancelled.store(true, Ordering::SeqCst);
        let _ = self.tx.send(Command::Cancel { id: handle.id });
    }
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_wheel(mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut queue: DelayQueue<Entry> = DelayQueue::new();
    let mut keys: HashMap<u64, Key> = HashMap::new();

    loop {
        tokio::select! {
            cmd = rx.recv() => {
                match cmd {
                    Some(Command::Schedule { deadline, entry }) => {
                        let id = entry.id;
                        let key = queue.insert_at(entry, deadline);
                        keys.insert(id, key);
                    }
                    Some(Command::Cancel { id }) => {
                        if let Some(key) = keys.remove(&id) {
                            queue.try_remove(&key);
                        }
                    }
                    // All wheel handles dropped.
                    None => break,
                }
            }
            expired = poll_fn(|cx| queue.poll_expired(cx)), if !queue.is_empty() => {
                if let Some(expired) = expired {
                    let entry = expired.into_inner();
                    keys.remove(&entry.id);

                    // A cancel that raced the expiry wins.
                    if !entry.cancelled.load(Ordering::SeqCst) {
                        (entry.callback)();
                    }
                }
            }
        }
    }
}
