use std::{
    cell::RefCell,
    collections::BTreeMap,
    rc::{Rc, Weak},
    thread,
    time::{Duration, Instant},
};

use derive_ex::derive_ex;
use slabmap::SlabMap;

use crate::Subscription;


/// Clock and timer capability used by operators that defer work.
pub trait Scheduler {
    fn now(&self) -> Instant;

    /// Runs `task` once `delay` has elapsed.
    ///
    /// Dropping the returned subscription cancels the task.
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce()>) -> Subscription;
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    instant: Instant,
    seq: u64,
}

struct Entry {
    key: Key,
    task: Box<dyn FnOnce()>,
}

/// Pending tasks ordered by due instant, then by scheduling order.
struct TimerQueue {
    next_seq: u64,
    tasks: BTreeMap<Key, usize>,
    entries: SlabMap<Entry>,
}

impl TimerQueue {
    fn new() -> Self {
        Self {
            next_seq: 0,
            tasks: BTreeMap::new(),
            entries: SlabMap::new(),
        }
    }
    fn insert(&mut self, instant: Instant, task: Box<dyn FnOnce()>) -> (usize, Key) {
        let key = Key {
            instant,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        let id = self.entries.insert(Entry { key, task });
        self.tasks.insert(key, id);
        (id, key)
    }
    fn remove(&mut self, id: usize, key: Key) -> Option<Entry> {
        if !self.entries.get(id).is_some_and(|e| e.key == key) {
            return None;
        }
        self.tasks.remove(&key);
        self.entries.remove(id)
    }
    fn pop_due(&mut self, now: Instant) -> Option<(Instant, Box<dyn FnOnce()>)> {
        let (key, id) = self.tasks.first_key_value()?;
        if key.instant > now {
            return None;
        }
        let id = *id;
        let e = self.entries.remove(id)?;
        self.tasks.remove(&e.key);
        Some((e.key.instant, e.task))
    }
    fn next_due(&self) -> Option<Instant> {
        self.tasks.first_key_value().map(|(key, _)| key.instant)
    }
    fn len(&self) -> usize {
        self.tasks.len()
    }
}

struct SchedulerData {
    now: Instant,
    queue: TimerQueue,
}

fn cancel_subscription(this: Weak<RefCell<SchedulerData>>, (id, key): (usize, Key)) -> Subscription {
    Subscription::from_weak_fn(this, move |this| {
        let entry = this.borrow_mut().queue.remove(id, key);
        drop(entry);
    })
}

/// A scheduler driven by virtual time.
///
/// Time only advances through [`advance_by`](Self::advance_by) and
/// [`advance_to`](Self::advance_to); tasks run synchronously inside those calls, in due order.
#[derive_ex(Clone, Default)]
#[default(Self::new())]
pub struct TestScheduler(Rc<RefCell<SchedulerData>>);

impl TestScheduler {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(SchedulerData {
            now: Instant::now(),
            queue: TimerQueue::new(),
        })))
    }

    pub fn advance_by(&self, duration: Duration) {
        let now = self.now();
        self.advance_to(now + duration)
    }

    /// Runs every task due at or before `instant`, moving the clock to each task's due time
    /// before running it.
    pub fn advance_to(&self, instant: Instant) {
        loop {
            let task = {
                let mut d = self.0.borrow_mut();
                let Some((due, task)) = d.queue.pop_due(instant) else {
                    if d.now < instant {
                        d.now = instant;
                    }
                    return;
                };
                if d.now < due {
                    d.now = due;
                }
                task
            };
            task();
        }
    }

    /// Runs tasks until the queue is empty, advancing the clock as far as needed.
    pub fn run_all(&self) {
        while let Some(due) = self.next_due() {
            self.advance_to(due);
        }
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.0.borrow().queue.next_due()
    }
    pub fn pending_count(&self) -> usize {
        self.0.borrow().queue.len()
    }
}

impl Scheduler for TestScheduler {
    fn now(&self) -> Instant {
        self.0.borrow().now
    }
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce()>) -> Subscription {
        let mut d = self.0.borrow_mut();
        let instant = d.now + delay;
        let entry = d.queue.insert(instant, task);
        cancel_subscription(Rc::downgrade(&self.0), entry)
    }
}

/// A scheduler driven by the wall clock, pumped by the host's event loop.
#[derive_ex(Clone, Default)]
#[default(Self::new())]
pub struct RealtimeScheduler(Rc<RefCell<SchedulerData>>);

impl RealtimeScheduler {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(SchedulerData {
            now: Instant::now(),
            queue: TimerQueue::new(),
        })))
    }

    /// Runs every task whose due time has passed. Returns the number of tasks run.
    pub fn run_due(&self) -> usize {
        let mut count = 0;
        loop {
            let task = {
                let mut d = self.0.borrow_mut();
                match d.queue.pop_due(Instant::now()) {
                    Some((_, task)) => task,
                    None => return count,
                }
            };
            task();
            count += 1;
        }
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.0.borrow().queue.next_due()
    }

    /// Blocks the current thread, running tasks as they fall due, until none are left.
    pub fn run_until_idle(&self) {
        while let Some(due) = self.next_due() {
            let wait = due.saturating_duration_since(Instant::now());
            if wait > Duration::ZERO {
                thread::sleep(wait);
            }
            self.run_due();
        }
    }
}

impl Scheduler for RealtimeScheduler {
    fn now(&self) -> Instant {
        Instant::now()
    }
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce()>) -> Subscription {
        let entry = self.0.borrow_mut().queue.insert(Instant::now() + delay, task);
        log::trace!("scheduled task {} in {:?}", entry.0, delay);
        cancel_subscription(Rc::downgrade(&self.0), entry)
    }
}
