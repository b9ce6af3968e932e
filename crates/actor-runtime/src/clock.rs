//! The system clock and timer heap.
//!
//! Timers schedule envelope deliveries (`after(delay, msg)`); a single
//! driver task owns the heap. The clock can be paused, advanced, and resumed
//! so tests drive timers deterministically: in paused mode a timer fires
//! only when `advance` crosses its deadline.

use crate::addr::ActorAddr;
use crate::envelope::Envelope;
use bytes::Bytes;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::trace;

#[derive(Debug, PartialEq, Eq)]
struct TimerEntry {
    deadline_ms: u64,
    seq: u64,
    target: ActorAddr,
    name: String,
    body: Bytes,
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline_ms, self.seq).cmp(&(other.deadline_ms, other.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct ClockState {
    base: Instant,
    offset_ms: u64,
    paused: bool,
    timers: BinaryHeap<Reverse<TimerEntry>>,
    next_seq: u64,
}

impl ClockState {
    fn now_ms(&self) -> u64 {
        if self.paused {
            self.offset_ms
        } else {
            self.offset_ms + self.base.elapsed().as_millis() as u64
        }
    }
}

/// A pausable clock shared by every actor in one system.
#[derive(Clone)]
pub struct Clock {
    state: Arc<Mutex<ClockState>>,
    changed: Arc<Notify>,
}

impl Clock {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                base: Instant::now(),
                offset_ms: 0,
                paused: false,
                timers: BinaryHeap::new(),
                next_seq: 0,
            })),
            changed: Arc::new(Notify::new()),
        }
    }

    /// Current virtual time in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.state.lock().expect("clock lock poisoned").now_ms()
    }

    /// Freezes time; timers stop firing until `advance` or `resume`.
    pub fn pause(&self) {
        let mut state = self.state.lock().expect("clock lock poisoned");
        state.offset_ms = state.now_ms();
        state.paused = true;
        drop(state);
        self.changed.notify_one();
    }

    /// Moves a paused clock forward, firing every timer whose deadline is
    /// crossed. Also valid on a running clock, where it skips time ahead.
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock().expect("clock lock poisoned");
        state.offset_ms += by.as_millis() as u64;
        drop(state);
        self.changed.notify_one();
    }

    /// Resumes real-time progression from the current virtual time.
    pub fn resume(&self) {
        let mut state = self.state.lock().expect("clock lock poisoned");
        state.offset_ms = state.now_ms();
        state.base = Instant::now();
        state.paused = false;
        drop(state);
        self.changed.notify_one();
    }

    /// Schedules `name`/`body` for delivery to `target` after `delay`.
    pub fn after(&self, delay: Duration, target: ActorAddr, name: &str, body: Bytes) {
        let mut state = self.state.lock().expect("clock lock poisoned");
        let deadline_ms = state.now_ms() + delay.as_millis() as u64;
        let seq = state.next_seq;
        state.next_seq += 1;
        trace!(%target, name, deadline_ms, "timer armed");
        state.timers.push(Reverse(TimerEntry {
            deadline_ms,
            seq,
            target,
            name: name.to_string(),
            body,
        }));
        drop(state);
        self.changed.notify_one();
    }

    /// Runs the timer driver until the task is aborted. `deliver` hands a
    /// fired timer's envelope to the local registry.
    pub(crate) async fn drive(self, deliver: impl Fn(&ActorAddr, Envelope)) {
        loop {
            let (due, wait) = {
                let mut state = self.state.lock().expect("clock lock poisoned");
                let now = state.now_ms();
                let mut due = Vec::new();
                while state
                    .timers
                    .peek()
                    .is_some_and(|Reverse(entry)| entry.deadline_ms <= now)
                {
                    if let Some(Reverse(entry)) = state.timers.pop() {
                        due.push(entry);
                    }
                }
                let wait = if state.paused {
                    None
                } else {
                    state
                        .timers
                        .peek()
                        .map(|Reverse(entry)| Duration::from_millis(entry.deadline_ms - now))
                };
                (due, wait)
            };

            let fired = !due.is_empty();
            for entry in due {
                let TimerEntry {
                    target, name, body, ..
                } = entry;
                let envelope = Envelope::new(name, target.clone(), body);
                deliver(&target, envelope);
            }
            if fired {
                continue;
            }

            match wait {
                Some(duration) => {
                    tokio::select! {
                        _ = tokio::time::sleep(duration) => {}
                        _ = self.changed.notified() => {}
                    }
                }
                None => self.changed.notified().await,
            }
        }
    }
}
