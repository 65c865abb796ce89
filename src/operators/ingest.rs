use std::{
    cell::RefCell,
    collections::HashMap,
    mem::take,
    rc::{Rc, Weak},
    time::Duration,
};

use derive_ex::derive_ex;

use crate::{
    utils::{Edit, KeyedList},
    Change, ChangeSet, Error, Notification, Observable, Observer, Result, Scheduler, SourceList,
    Subscription,
};


pub type ExpireSelector<T> = Rc<dyn Fn(&T) -> Option<Duration>>;

/// Options of [`to_change_set`].
#[derive_ex(Clone(bound()))]
pub struct ToChangeSetOptions<T: 'static> {
    /// Evicts the oldest items once more than this many are held.
    pub limit_size_to: Option<usize>,
    /// How long each item is kept, or `None` to keep it.
    pub expire_after: Option<ExpireSelector<T>>,
    pub scheduler: Option<Rc<dyn Scheduler>>,
}

impl<T: 'static> ToChangeSetOptions<T> {
    pub fn new() -> Self {
        Self {
            limit_size_to: None,
            expire_after: None,
            scheduler: None,
        }
    }
    pub fn limit_size_to(self, limit: usize) -> Self {
        Self {
            limit_size_to: Some(limit),
            ..self
        }
    }
    pub fn expire_after(
        self,
        selector: impl Fn(&T) -> Option<Duration> + 'static,
        scheduler: Rc<dyn Scheduler>,
    ) -> Self {
        Self {
            expire_after: Some(Rc::new(selector)),
            scheduler: Some(scheduler),
            ..self
        }
    }
}

impl<T: 'static> Default for ToChangeSetOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> Observable<T> {
    /// Collects the items of this stream into a list. See [`to_change_set`].
    pub fn to_change_set(&self, options: ToChangeSetOptions<T>) -> Result<Observable<ChangeSet<T>>> {
        to_change_set(self.clone(), options)
    }
}

/// Appends every item of `items` to a list and publishes the list's change-sets.
///
/// The first change-set is empty and is sent on subscription. The output completes once
/// `items` has completed and every pending expiration has run.
pub fn to_change_set<T: Clone + 'static>(
    items: Observable<T>,
    options: ToChangeSetOptions<T>,
) -> Result<Observable<ChangeSet<T>>> {
    if options.limit_size_to == Some(0) {
        return Err(Error::InvalidArgument("size limit must be positive".into()));
    }
    let expiry = match (options.expire_after, options.scheduler) {
        (Some(selector), Some(scheduler)) => Some((selector, scheduler)),
        (Some(_), None) => {
            return Err(Error::InvalidArgument("expiring items requires a scheduler".into()))
        }
        (None, _) => None,
    };
    let limit = options.limit_size_to;
    Ok(Observable::new(move |o| {
        let state = Rc::new(RefCell::new(Ingest {
            items: KeyedList::new(),
            timers: HashMap::new(),
            is_source_completed: false,
        }));
        o.next(ChangeSet::new());
        let s = items.subscribe(Observer::new({
            let state = state.clone();
            let expiry = expiry.clone();
            move |n| match n {
                Notification::Next(item) => {
                    let (out, cancelled) = {
                        let mut d = state.borrow_mut();
                        let mut out = ChangeSet::new();
                        let index = d.items.len();
                        let key = d.items.push(item.clone());
                        out.push(Change::Add { item, index });
                        let mut cancelled = Vec::new();
                        if let Some(limit) = limit {
                            while d.items.len() > limit {
                                let (key, item) = d.items.remove(0);
                                cancelled.extend(d.timers.remove(&key));
                                out.push(Change::Remove { item, index: 0 });
                            }
                        }
                        if out.len() > 1 {
                            log::debug!("evicted {} items over the size limit", out.len() - 1);
                        }
                        if let Some((selector, scheduler)) = &expiry {
                            if let Some(delay) = selector(d.items.get(key)) {
                                let node = Rc::downgrade(&state);
                                let o = o.clone();
                                let timer = scheduler
                                    .schedule(delay, Box::new(move || on_expired(&node, &o, key)));
                                d.timers.insert(key, timer);
                            }
                        }
                        (out, cancelled)
                    };
                    drop(cancelled);
                    o.next(out);
                }
                Notification::Error(e) => o.error(e),
                Notification::Completed => {
                    let is_done = {
                        let mut d = state.borrow_mut();
                        d.is_source_completed = true;
                        d.timers.is_empty()
                    };
                    if is_done {
                        o.completed();
                    }
                }
            }
        }));
        Subscription::from_fn(move || {
            drop(s);
            let timers = take(&mut state.borrow_mut().timers);
            drop(timers);
        })
    }))
}

struct Ingest<T> {
    items: KeyedList<T>,
    timers: HashMap<usize, Subscription>,
    is_source_completed: bool,
}

fn on_expired<T: Clone + 'static>(
    state: &Weak<RefCell<Ingest<T>>>,
    o: &Observer<ChangeSet<T>>,
    key: usize,
) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let (out, is_done) = {
        let mut d = state.borrow_mut();
        let timer = d.timers.remove(&key);
        let out = d.items.position(key).map(|index| {
            let (_, item) = d.items.remove(index);
            ChangeSet::from(vec![Change::Remove { item, index }])
        });
        drop(timer);
        (out, d.is_source_completed && d.timers.is_empty())
    };
    if let Some(out) = out {
        log::debug!("item expired");
        o.next(out);
    }
    if is_done {
        o.completed();
    }
}

impl<T: Clone + 'static> SourceList<T> {
    /// Keeps at most `limit` items in this list by removing the earliest inserted ones.
    ///
    /// Eviction runs as one edit, scheduled on `scheduler` so that it follows the delivery of
    /// the edit that grew the list. The returned stream publishes each batch of evicted items
    /// and does the evicting only while subscribed.
    pub fn limit_size_to(
        &self,
        limit: usize,
        scheduler: Rc<dyn Scheduler>,
    ) -> Result<Observable<Vec<T>>> {
        if limit == 0 {
            return Err(Error::InvalidArgument("size limit must be positive".into()));
        }
        let list = self.clone();
        Ok(Observable::new(move |o| {
            let state = Rc::new(RefCell::new(Tracker::new()));
            let s = list.connect().subscribe(Observer::new({
                let state = state.clone();
                let list = list.clone();
                let scheduler = scheduler.clone();
                move |n| match n {
                    Notification::Next(changes) => {
                        let mut t = state.borrow_mut();
                        if let Err(e) = t.track(changes) {
                            drop(t);
                            o.error(e);
                            return;
                        }
                        if t.items.len() > limit && t.eviction.is_none() {
                            let node = Rc::downgrade(&state);
                            let list = list.clone();
                            let o = o.clone();
                            t.eviction = Some(scheduler.schedule(
                                Duration::ZERO,
                                Box::new(move || evict(&node, &list, &o, limit)),
                            ));
                        }
                    }
                    Notification::Error(e) => o.error(e),
                    Notification::Completed => o.completed(),
                }
            }));
            Subscription::from_fn(move || {
                drop(s);
                let (timers, eviction) = {
                    let mut t = state.borrow_mut();
                    (take(&mut t.timers), t.eviction.take())
                };
                drop(timers);
                drop(eviction);
            })
        }))
    }

    /// Removes each item once the duration `selector` returns for it has elapsed.
    ///
    /// The returned stream publishes the expired items and does the expiring only while
    /// subscribed.
    pub fn expire_after(
        &self,
        selector: impl Fn(&T) -> Option<Duration> + 'static,
        scheduler: Rc<dyn Scheduler>,
    ) -> Observable<Vec<T>> {
        let list = self.clone();
        let selector: ExpireSelector<T> = Rc::new(selector);
        Observable::new(move |o| {
            let state = Rc::new(RefCell::new(Tracker::new()));
            let s = list.connect().subscribe(Observer::new({
                let state = state.clone();
                let list = list.clone();
                let scheduler = scheduler.clone();
                let selector = selector.clone();
                move |n| match n {
                    Notification::Next(changes) => {
                        let (inserted, cancelled) = {
                            let mut t = state.borrow_mut();
                            match t.track(changes) {
                                Ok(r) => r,
                                Err(e) => {
                                    drop(t);
                                    o.error(e);
                                    return;
                                }
                            }
                        };
                        drop(cancelled);
                        for (key, item) in inserted {
                            let Some(delay) = selector(&item) else {
                                continue;
                            };
                            let node = Rc::downgrade(&state);
                            let list = list.clone();
                            let o = o.clone();
                            let timer = scheduler
                                .schedule(delay, Box::new(move || expire(&node, &list, &o, key)));
                            state.borrow_mut().timers.insert(key, timer);
                        }
                    }
                    Notification::Error(e) => o.error(e),
                    Notification::Completed => o.completed(),
                }
            }));
            Subscription::from_fn(move || {
                drop(s);
                let timers = take(&mut state.borrow_mut().timers);
                drop(timers);
            })
        })
    }
}

/// Mirror of a source list that remembers insertion order.
struct Tracker<T> {
    items: KeyedList<T>,
    seqs: HashMap<usize, u64>,
    next_seq: u64,
    timers: HashMap<usize, Subscription>,
    eviction: Option<Subscription>,
}

impl<T: Clone> Tracker<T> {
    fn new() -> Self {
        Self {
            items: KeyedList::new(),
            seqs: HashMap::new(),
            next_seq: 0,
            timers: HashMap::new(),
            eviction: None,
        }
    }

    /// Returns the inserted items and the timers of removed ones.
    #[allow(clippy::type_complexity)]
    fn track(&mut self, changes: ChangeSet<T>) -> Result<(Vec<(usize, T)>, Vec<Subscription>)> {
        let mut inserted = Vec::new();
        let mut cancelled = Vec::new();
        let Self {
            items,
            seqs,
            next_seq,
            timers,
            ..
        } = self;
        for change in changes {
            items.apply(change, |list, edit| match edit {
                Edit::Inserted { key, .. } => {
                    seqs.insert(key, *next_seq);
                    *next_seq += 1;
                    inserted.push((key, list.get(key).clone()));
                }
                Edit::Removed { key, .. } => {
                    seqs.remove(&key);
                    cancelled.extend(timers.remove(&key));
                }
                Edit::Replaced { .. } | Edit::Moved { .. } | Edit::Refreshed { .. } => {}
            })?;
        }
        Ok((inserted, cancelled))
    }

    /// Positions of the `count` earliest inserted items, highest first, with the items in
    /// insertion order.
    fn oldest(&self, count: usize) -> (Vec<usize>, Vec<T>) {
        let mut keys: Vec<usize> = self.items.keys().to_vec();
        keys.sort_by_key(|key| self.seqs.get(key).copied().unwrap_or(u64::MAX));
        keys.truncate(count);
        let items = keys.iter().map(|&key| self.items.get(key).clone()).collect();
        let mut positions: Vec<usize> =
            keys.iter().filter_map(|&key| self.items.position(key)).collect();
        positions.sort_unstable_by(|a, b| b.cmp(a));
        (positions, items)
    }
}

fn evict<T: Clone + 'static>(
    state: &Weak<RefCell<Tracker<T>>>,
    list: &SourceList<T>,
    o: &Observer<Vec<T>>,
    limit: usize,
) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let (positions, items) = {
        let mut t = state.borrow_mut();
        t.eviction = None;
        let excess = t.items.len().saturating_sub(limit);
        t.oldest(excess)
    };
    if items.is_empty() {
        return;
    }
    log::debug!("evicting {} items over the size limit of {}", items.len(), limit);
    let r = list.edit(|l| {
        for &index in &positions {
            l.remove_at(index)?;
        }
        Ok(())
    });
    match r {
        Ok(()) => o.next(items),
        Err(e) => o.error(e),
    }
}

fn expire<T: Clone + 'static>(
    state: &Weak<RefCell<Tracker<T>>>,
    list: &SourceList<T>,
    o: &Observer<Vec<T>>,
    key: usize,
) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let position = {
        let mut t = state.borrow_mut();
        let timer = t.timers.remove(&key);
        drop(timer);
        t.items.position(key)
    };
    let Some(index) = position else {
        return;
    };
    log::debug!("expiring item at {}", index);
    match list.remove_at(index) {
        Ok(item) => o.next(vec![item]),
        Err(e) => o.error(e),
    }
}
