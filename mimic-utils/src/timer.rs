//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

use crate::task::Task;

/// Token identifying a scheduled timer. Tokens are never reused.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TimerToken(u64);

/// Owner of a set of scheduled timers (an interface, a neighbor).
///
/// Destroying an owner cancels all of its pending timers in one call.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TimerOwner(pub u32);

/// Handle to the timer-wheel task.
///
/// The wheel owns a deadline-ordered queue of scheduled messages and
/// delivers each one to the channel registered with it. Expired entries
/// fire in non-decreasing deadline order. Cancellation is idempotent.
///
/// Cloned handles share the same underlying task; the wheel stops once the
/// last handle is dropped.
#[derive(Debug)]
pub struct TimerWheel<T> {
    ctl: UnboundedSender<Ctl<T>>,
    start: Instant,
    next_token: Arc<AtomicU64>,
    _task: Arc<Task<()>>,
}

impl<T> Clone for TimerWheel<T> {
    fn clone(&self) -> Self {
        TimerWheel {
            ctl: self.ctl.clone(),
            start: self.start,
            next_token: self.next_token.clone(),
            _task: self._task.clone(),
        }
    }
}

#[derive(Debug)]
enum Ctl<T> {
    Schedule {
        fire_at: Instant,
        token: u64,
        owner: TimerOwner,
        tx: UnboundedSender<T>,
        msg: T,
    },
    Cancel(u64),
    CancelOwner(TimerOwner),
}

#[derive(Debug)]
struct Entry<T> {
    owner: TimerOwner,
    tx: UnboundedSender<T>,
    msg: T,
}

// ===== impl TimerWheel =====

impl<T> TimerWheel<T>
where
    T: Send + std::fmt::Debug + 'static,
{
    /// Spawns the timer-wheel task and returns a handle to it.
    pub fn spawn() -> TimerWheel<T> {
        let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();
        let task = Task::spawn(run(ctl_rx));
        TimerWheel {
            ctl: ctl_tx,
            start: Instant::now(),
            next_token: Arc::new(AtomicU64::new(1)),
            _task: Arc::new(task),
        }
    }

    /// Monotonic nanoseconds since the wheel was created.
    pub fn uptime(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }

    /// Schedules `msg` for delivery on `tx` at the given deadline.
    pub fn schedule_at(
        &self,
        fire_at: Instant,
        owner: TimerOwner,
        tx: UnboundedSender<T>,
        msg: T,
    ) -> TimerToken {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let _ = self.ctl.send(Ctl::Schedule {
            fire_at,
            token,
            owner,
            tx,
            msg,
        });
        TimerToken(token)
    }

    /// Schedules `msg` for delivery on `tx` after the given delay.
    pub fn schedule_in(
        &self,
        delay: Duration,
        owner: TimerOwner,
        tx: UnboundedSender<T>,
        msg: T,
    ) -> TimerToken {
        self.schedule_at(Instant::now() + delay, owner, tx, msg)
    }

    /// Cancels a scheduled timer.
    ///
    /// Canceling a timer that already fired (or was never scheduled) is a
    /// no-op.
    pub fn cancel(&self, token: TimerToken) {
        let _ = self.ctl.send(Ctl::Cancel(token.0));
    }

    /// Cancels every pending timer belonging to `owner`.
    pub fn cancel_owner(&self, owner: TimerOwner) {
        let _ = self.ctl.send(Ctl::CancelOwner(owner));
    }
}

// Timer-wheel event loop.
//
// Entries are keyed by (deadline, token); tokens are allocated from a
// monotonic counter, so iteration order within an instant follows
// scheduling order.
async fn run<T>(mut ctl_rx: UnboundedReceiver<Ctl<T>>)
where
    T: Send + std::fmt::Debug + 'static,
{
    let mut queue: BTreeMap<(Instant, u64), Entry<T>> = BTreeMap::new();
    let mut index: HashMap<u64, Instant> = HashMap::new();

    loop {
        let next_deadline = queue.first_key_value().map(|((t, _), _)| *t);

        tokio::select! {
            biased;

            msg = ctl_rx.recv() => {
                match msg {
                    Some(Ctl::Schedule { fire_at, token, owner, tx, msg }) => {
                        index.insert(token, fire_at);
                        queue.insert(
                            (fire_at, token),
                            Entry { owner, tx, msg },
                        );
                    }
                    Some(Ctl::Cancel(token)) => {
                        if let Some(fire_at) = index.remove(&token) {
                            queue.remove(&(fire_at, token));
                        }
                    }
                    Some(Ctl::CancelOwner(owner)) => {
                        queue.retain(|(_, token), entry| {
                            if entry.owner == owner {
                                index.remove(token);
                                false
                            } else {
                                true
                            }
                        });
                    }
                    // All handles were dropped.
                    None => break,
                }
            }
            _ = sleep_until_opt(next_deadline) => {
                let now = Instant::now();
                while let Some(entry) = queue.first_entry()
                    && entry.key().0 <= now
                {
                    let ((_, token), entry) = entry.remove_entry();
                    index.remove(&token);
                    let _ = entry.tx.send(entry.msg);
                }
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain<T>(rx: &mut UnboundedReceiver<T>) -> Vec<T> {
        let mut out = vec![];
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn fires_in_deadline_order() {
        let wheel = TimerWheel::spawn();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let owner = TimerOwner(1);

        let now = Instant::now();
        wheel.schedule_at(now + Duration::from_millis(30), owner, tx.clone(), 3);
        wheel.schedule_at(now + Duration::from_millis(10), owner, tx.clone(), 1);
        wheel.schedule_at(now + Duration::from_millis(20), owner, tx.clone(), 2);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(drain(&mut rx).await, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn same_deadline_fires_in_schedule_order() {
        let wheel = TimerWheel::spawn();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let owner = TimerOwner(1);

        let fire_at = Instant::now() + Duration::from_millis(10);
        for n in 0..5 {
            wheel.schedule_at(fire_at, owner, tx.clone(), n);
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(drain(&mut rx).await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_fire() {
        let wheel = TimerWheel::spawn();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let owner = TimerOwner(1);

        let token =
            wheel.schedule_in(Duration::from_millis(10), owner, tx.clone(), 1);
        wheel.schedule_in(Duration::from_millis(10), owner, tx.clone(), 2);
        wheel.cancel(token);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(drain(&mut rx).await, vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_fire_is_noop() {
        let wheel = TimerWheel::spawn();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let owner = TimerOwner(1);

        let token =
            wheel.schedule_in(Duration::from_millis(10), owner, tx.clone(), 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        wheel.cancel(token);
        wheel.cancel(token);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(drain(&mut rx).await, vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_owner_drops_all_pending() {
        let wheel = TimerWheel::spawn();
        let (tx, mut rx) = mpsc::unbounded_channel();

        wheel.schedule_in(
            Duration::from_millis(10),
            TimerOwner(1),
            tx.clone(),
            1,
        );
        wheel.schedule_in(
            Duration::from_millis(20),
            TimerOwner(1),
            tx.clone(),
            2,
        );
        wheel.schedule_in(
            Duration::from_millis(30),
            TimerOwner(2),
            tx.clone(),
            3,
        );
        wheel.cancel_owner(TimerOwner(1));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(drain(&mut rx).await, vec![3]);
    }
}
