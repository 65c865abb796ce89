use std::{
    cell::RefCell,
    collections::HashMap,
    rc::{Rc, Weak},
    time::Duration,
};

use derive_ex::derive_ex;

use crate::{
    utils::{Edit, KeyedList},
    Change, ChangeSet, Error, Notification, Observable, Observer, Result, Scheduler, Subscription,
};

use super::{emit, EmitGate};


/// An item that announces mutations of its own properties.
pub trait PropertyChanged {
    /// The names of properties as they change, or `None` if this item never announces
    /// changes.
    fn property_changed(&self) -> Option<Observable<&'static str>>;
}

#[derive(Clone)]
#[derive_ex(Default)]
#[default(Self::new())]
pub struct AutoRefreshOptions {
    /// Coalesces the refreshes signalled within this window into one change-set.
    pub buffer: Option<Duration>,
    pub scheduler: Option<Rc<dyn Scheduler>>,
}

impl AutoRefreshOptions {
    pub fn new() -> Self {
        Self {
            buffer: None,
            scheduler: None,
        }
    }
    pub fn buffer(self, buffer: Duration, scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            buffer: Some(buffer),
            scheduler: Some(scheduler),
        }
    }
}

impl<T: PropertyChanged + Clone + 'static> Observable<ChangeSet<T>> {
    /// Emits a `Refresh` for an item whenever it announces a change of `property`, or of any
    /// property if `property` is `None`.
    pub fn auto_refresh(&self, property: Option<&'static str>, options: AutoRefreshOptions) -> Self {
        self.auto_refresh_on(
            move |item: &T| {
                let changes = item.property_changed()?;
                Some(match property {
                    Some(property) => changes.filter(move |name| *name == property).map(|_| ()),
                    None => changes.map(|_| ()),
                })
            },
            options,
        )
    }
}

impl<T: Clone + 'static> Observable<ChangeSet<T>> {
    /// Emits a `Refresh` for an item whenever the stream `signal` derives from it emits.
    ///
    /// Signals are subscribed when an item is added and unsubscribed when it is removed.
    pub fn auto_refresh_on(
        &self,
        signal: impl Fn(&T) -> Option<Observable<()>> + 'static,
        options: AutoRefreshOptions,
    ) -> Self {
        auto_refresh_on(self.clone(), signal, options)
    }
}

pub fn auto_refresh_on<T: Clone + 'static>(
    source: Observable<ChangeSet<T>>,
    signal: impl Fn(&T) -> Option<Observable<()>> + 'static,
    options: AutoRefreshOptions,
) -> Observable<ChangeSet<T>> {
    let buffer = match (options.buffer, options.scheduler) {
        (Some(buffer), Some(scheduler)) => Some((buffer, scheduler)),
        (Some(_), None) => {
            return Observable::throw(Error::InvalidArgument(
                "a buffered auto refresh requires a scheduler".into(),
            ))
        }
        (None, _) => None,
    };
    let signal = Rc::new(signal);
    Observable::new(move |o| {
        let state = Rc::new(RefCell::new(Refresher::new(buffer.clone())));
        let s = source.subscribe(Observer::new({
            let state = state.clone();
            let signal = signal.clone();
            move |n| match n {
                Notification::Next(changes) => on_source(&state, &o, &*signal, changes),
                Notification::Error(e) => o.error(e),
                Notification::Completed => {
                    let is_done = {
                        let mut r = state.borrow_mut();
                        r.is_source_completed = true;
                        r.flush.is_none()
                    };
                    if is_done {
                        o.completed();
                    }
                }
            }
        }));
        Subscription::from_fn(move || {
            drop(s);
            let (watches, flush) = {
                let mut r = state.borrow_mut();
                (std::mem::take(&mut r.watches), r.flush.take())
            };
            drop(watches);
            drop(flush);
        })
    })
}

fn on_source<T: Clone + 'static>(
    state: &Rc<RefCell<Refresher<T>>>,
    o: &Observer<ChangeSet<T>>,
    signal: &dyn Fn(&T) -> Option<Observable<()>>,
    changes: ChangeSet<T>,
) {
    let (out, watch, unwatched) = state.borrow_mut().process(changes, signal);
    drop(unwatched);
    emit(o, out);
    for Watch { key, id, signal } in watch {
        let node = Rc::downgrade(state);
        let o = o.clone();
        let s = signal.subscribe_fn(move |()| on_signal(&node, &o, key));
        let rejected = {
            let mut r = state.borrow_mut();
            if r.ids.get(&key) == Some(&id) {
                r.watches.insert(key, s)
            } else {
                Some(s)
            }
        };
        drop(rejected);
    }
}

fn on_signal<T: Clone + 'static>(
    state: &Weak<RefCell<Refresher<T>>>,
    o: &Observer<ChangeSet<T>>,
    key: usize,
) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let out = {
        let mut r = state.borrow_mut();
        if let Some((delay, scheduler)) = r.buffer.clone() {
            r.enqueue(key);
            if r.flush.is_none() {
                let node = Rc::downgrade(&state);
                let o = o.clone();
                log::debug!("auto refresh flush scheduled in {:?}", delay);
                r.flush = Some(scheduler.schedule(delay, Box::new(move || on_flush(&node, &o))));
            }
            None
        } else {
            r.refresh(&[key])
        }
    };
    if let Some(out) = out {
        o.next(out);
    }
}

fn on_flush<T: Clone + 'static>(state: &Weak<RefCell<Refresher<T>>>, o: &Observer<ChangeSet<T>>) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let (out, is_done) = {
        let mut r = state.borrow_mut();
        r.flush = None;
        let keys = std::mem::take(&mut r.pending);
        (r.refresh(&keys), r.is_source_completed)
    };
    if let Some(out) = out {
        o.next(out);
    }
    if is_done {
        o.completed();
    }
}

/// A signal to subscribe once the change-set that added its item has been delivered.
struct Watch {
    key: usize,
    id: u64,
    signal: Observable<()>,
}

struct Refresher<T> {
    mirror: KeyedList<T>,
    watches: HashMap<usize, Subscription>,
    ids: HashMap<usize, u64>,
    next_id: u64,
    buffer: Option<(Duration, Rc<dyn Scheduler>)>,
    pending: Vec<usize>,
    flush: Option<Subscription>,
    is_source_completed: bool,
    gate: EmitGate,
}

impl<T: Clone + 'static> Refresher<T> {
    fn new(buffer: Option<(Duration, Rc<dyn Scheduler>)>) -> Self {
        Self {
            mirror: KeyedList::new(),
            watches: HashMap::new(),
            ids: HashMap::new(),
            next_id: 0,
            buffer,
            pending: Vec::new(),
            flush: None,
            is_source_completed: false,
            gate: EmitGate::default(),
        }
    }

    #[allow(clippy::type_complexity)]
    fn process(
        &mut self,
        changes: ChangeSet<T>,
        signal: &dyn Fn(&T) -> Option<Observable<()>>,
    ) -> (Result<Option<ChangeSet<T>>>, Vec<Watch>, Vec<Subscription>) {
        let mut watch = Vec::new();
        let mut unwatched = Vec::new();
        let Self {
            mirror,
            watches,
            ids,
            next_id,
            pending,
            ..
        } = self;
        for change in changes.clone() {
            let r = mirror.apply(change, |list, edit| match edit {
                Edit::Inserted { key, .. } => {
                    watch.extend(track(ids, next_id, key, signal(list.get(key))));
                }
                Edit::Removed { key, .. } => {
                    ids.remove(&key);
                    unwatched.extend(watches.remove(&key));
                    pending.retain(|k| *k != key);
                }
                Edit::Replaced { key, .. } => {
                    unwatched.extend(watches.remove(&key));
                    watch.extend(track(ids, next_id, key, signal(list.get(key))));
                }
                Edit::Moved { .. } | Edit::Refreshed { .. } => {}
            });
            if let Err(e) = r {
                return (Err(e), Vec::new(), unwatched);
            }
        }
        (Ok(self.gate.pass(changes)), watch, unwatched)
    }

    fn enqueue(&mut self, key: usize) {
        if !self.pending.contains(&key) {
            self.pending.push(key);
        }
    }

    /// One `Refresh` per key still present, at its current index.
    fn refresh(&mut self, keys: &[usize]) -> Option<ChangeSet<T>> {
        let mut out = ChangeSet::new();
        for &key in keys {
            let Some(index) = self.mirror.position(key) else {
                continue;
            };
            out.push(Change::Refresh {
                item: self.mirror.get(key).clone(),
                index,
            });
        }
        if out.is_empty() {
            return None;
        }
        log::trace!("auto refresh: {} items", out.len());
        self.gate.pass(out)
    }
}

fn track(
    ids: &mut HashMap<usize, u64>,
    next_id: &mut u64,
    key: usize,
    signal: Option<Observable<()>>,
) -> Option<Watch> {
    let id = *next_id;
    *next_id += 1;
    ids.insert(key, id);
    Some(Watch {
        key,
        id,
        signal: signal?,
    })
}
