//! Hashed timer wheel for deferred work (key expiry).
//!
//! A circular array of slots ticked once per second by a single owning
//! thread. Scheduling a delay of `d` seconds places the task
//! `d mod slot_count` slots ahead, with a `circle` counter recording how
//! many full rotations must pass first. One rotation covers an hour, so
//! arbitrarily long TTLs cost one slot entry regardless of distance.
//!
//! Only the driver thread touches the slot array; everyone else talks to
//! it through a mailbox of add/cancel/stop messages. Due tasks run on
//! fresh worker threads so a slow callback cannot stall the tick, and a
//! panicking callback is caught and logged.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::error;

/// Tick interval. One slot is processed per tick.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Number of slots: one hour per rotation at a one-second tick.
const SLOT_COUNT: usize = 3600;

/// Mailbox depth. Senders block briefly if the driver falls behind.
const MAILBOX_CAPACITY: usize = 4096;

type Job = Box<dyn FnOnce() + Send + 'static>;

enum WheelCmd {
    Add { key: Bytes, delay: Duration, job: Job },
    Cancel { key: Bytes },
    Stop,
}

/// Handle to a running timer wheel. Cheap to clone; all clones feed the
/// same driver thread.
#[derive(Clone)]
pub struct TimeWheel {
    tx: SyncSender<WheelCmd>,
}

impl TimeWheel {
    /// Spawns the driver thread and returns a handle to it.
    pub fn start() -> Self {
        let (tx, rx) = sync_channel(MAILBOX_CAPACITY);
        std::thread::Builder::new()
            .name("time-wheel".into())
            .spawn(move || drive(rx))
            .expect("spawn time-wheel thread");
        Self { tx }
    }

    /// Schedules `job` to run after `delay`. A task with the same key
    /// already on the wheel is cancelled first, so re-scheduling an
    /// expiry replaces the previous one.
    pub fn schedule(&self, delay: Duration, key: Bytes, job: Job) {
        let _ = self.tx.send(WheelCmd::Add { key, delay, job });
    }

    /// Schedules `job` at an absolute epoch-milliseconds instant.
    /// Instants in the past fire on the next tick.
    pub fn schedule_at(&self, at_ms: u64, key: Bytes, job: Job) {
        let delay = Duration::from_millis(at_ms.saturating_sub(crate::time::now_ms()));
        self.schedule(delay, key, job);
    }

    /// Cancels the task with the given key, if present.
    pub fn cancel(&self, key: &Bytes) {
        let _ = self.tx.send(WheelCmd::Cancel { key: key.clone() });
    }

    /// Stops the driver thread. In-flight callback workers are not
    /// interrupted. Tasks still on the wheel never fire.
    pub fn stop(&self) {
        let _ = self.tx.send(WheelCmd::Stop);
    }
}

impl std::fmt::Debug for TimeWheel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeWheel").finish_non_exhaustive()
    }
}

struct Task {
    circle: usize,
    job: Job,
}

struct Driver {
    /// Per-slot task table, keyed by task key. Order within a slot does
    /// not matter; keying by task key gives O(1) cancel together with
    /// `index`.
    slots: Vec<HashMap<Bytes, Task>>,
    /// Task key -> occupied slot.
    index: HashMap<Bytes, usize>,
    current: usize,
}

fn drive(rx: Receiver<WheelCmd>) {
    let mut driver = Driver {
        slots: (0..SLOT_COUNT).map(|_| HashMap::new()).collect(),
        index: HashMap::new(),
        current: 0,
    };
    let mut next_tick = Instant::now() + TICK_INTERVAL;

    loop {
        let timeout = next_tick.saturating_duration_since(Instant::now());
        match rx.recv_timeout(timeout) {
            Ok(WheelCmd::Add { key, delay, job }) => driver.add(key, delay, job),
            Ok(WheelCmd::Cancel { key }) => driver.cancel(&key),
            Ok(WheelCmd::Stop) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {
                driver.tick();
                next_tick += TICK_INTERVAL;
            }
        }
    }
}

impl Driver {
    fn add(&mut self, key: Bytes, delay: Duration, job: Job) {
        // re-adding an existing key replaces the earlier task
        self.cancel(&key);

        let ticks = delay.as_secs() as usize;
        let circle = ticks / SLOT_COUNT;
        let pos = (self.current + ticks % SLOT_COUNT) % SLOT_COUNT;

        self.slots[pos].insert(key.clone(), Task { circle, job });
        self.index.insert(key, pos);
    }

    fn cancel(&mut self, key: &Bytes) {
        if let Some(pos) = self.index.remove(key) {
            self.slots[pos].remove(key);
        }
    }

    fn tick(&mut self) {
        let pos = self.current;
        self.current = (self.current + 1) % SLOT_COUNT;

        let slot = std::mem::take(&mut self.slots[pos]);
        let mut kept = HashMap::new();
        for (key, mut task) in slot {
            if task.circle > 0 {
                task.circle -= 1;
                kept.insert(key, task);
            } else {
                self.index.remove(&key);
                fire(task.job);
            }
        }
        self.slots[pos] = kept;
    }
}

/// Runs a due task on a fresh worker so the wheel keeps ticking, with a
/// panic boundary around the callback.
fn fire(job: Job) {
    let _ = std::thread::Builder::new()
        .name("wheel-task".into())
        .spawn(move || {
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                error!("time wheel task panicked");
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn key(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn counter_job(counter: &Arc<AtomicUsize>) -> Job {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn scheduled_task_fires() {
        let wheel = TimeWheel::start();
        let fired = Arc::new(AtomicUsize::new(0));
        wheel.schedule(Duration::from_secs(1), key("t1"), counter_job(&fired));
        std::thread::sleep(Duration::from_millis(2500));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        wheel.stop();
    }

    #[test]
    fn cancelled_task_never_fires() {
        let wheel = TimeWheel::start();
        let fired = Arc::new(AtomicUsize::new(0));
        wheel.schedule(Duration::from_secs(1), key("t2"), counter_job(&fired));
        wheel.cancel(&key("t2"));
        std::thread::sleep(Duration::from_millis(2500));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        wheel.stop();
    }

    #[test]
    fn rescheduling_replaces_the_previous_task() {
        let wheel = TimeWheel::start();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        wheel.schedule(Duration::from_secs(1), key("t3"), counter_job(&first));
        wheel.schedule(Duration::from_secs(1), key("t3"), counter_job(&second));
        std::thread::sleep(Duration::from_millis(2500));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        wheel.stop();
    }

    #[test]
    fn panicking_task_does_not_stop_the_wheel() {
        let wheel = TimeWheel::start();
        let fired = Arc::new(AtomicUsize::new(0));
        wheel.schedule(
            Duration::from_secs(1),
            key("boom"),
            Box::new(|| panic!("task panic")),
        );
        wheel.schedule(Duration::from_secs(2), key("after"), counter_job(&fired));
        std::thread::sleep(Duration::from_millis(3500));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        wheel.stop();
    }

    #[test]
    fn stop_prevents_pending_tasks() {
        let wheel = TimeWheel::start();
        let fired = Arc::new(AtomicUsize::new(0));
        wheel.schedule(Duration::from_secs(1), key("t4"), counter_job(&fired));
        wheel.stop();
        std::thread::sleep(Duration::from_millis(2500));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
