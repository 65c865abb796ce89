use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use crate::{Change, ChangeSet, Notification, Observable, Observer, Result, Subscription};

use super::{emit, EmitGate};

#[cfg(test)]
mod tests;

impl<T: Clone + 'static> Observable<ChangeSet<T>> {
    /// Subscribes to the stream `selector` derives from each item and concatenates their
    /// contents, in the order of the items they belong to.
    ///
    /// Removing an item unsubscribes its stream and removes everything it contributed.
    pub fn merge_many<U: Clone + 'static>(
        &self,
        selector: impl Fn(&T) -> Observable<ChangeSet<U>> + 'static,
    ) -> Observable<ChangeSet<U>> {
        merge_many(self.clone(), selector)
    }
}

pub fn merge_many<T: Clone + 'static, U: Clone + 'static>(
    source: Observable<ChangeSet<T>>,
    selector: impl Fn(&T) -> Observable<ChangeSet<U>> + 'static,
) -> Observable<ChangeSet<U>> {
    let selector = Rc::new(selector);
    Observable::new(move |o| {
        let state = Rc::new(RefCell::new(Merger::new()));
        let s_outer = source.subscribe(Observer::new({
            let state = state.clone();
            let selector = selector.clone();
            move |n| match n {
                Notification::Next(changes) => on_outer(&state, &o, &*selector, changes),
                Notification::Error(e) => o.error(e),
                Notification::Completed => {
                    let is_done = {
                        let mut m = state.borrow_mut();
                        m.is_outer_completed = true;
                        m.is_done()
                    };
                    if is_done {
                        o.completed();
                    }
                }
            }
        }));
        Subscription::from_fn(move || {
            drop(s_outer);
            let inner: Vec<_> = state
                .borrow_mut()
                .entries
                .iter_mut()
                .filter_map(|e| e.subscription.take())
                .collect();
            drop(inner);
        })
    })
}

fn on_outer<T, U: Clone + 'static>(
    state: &Rc<RefCell<Merger<U>>>,
    o: &Observer<ChangeSet<U>>,
    selector: &dyn Fn(&T) -> Observable<ChangeSet<U>>,
    changes: ChangeSet<T>,
) {
    let (added, dropped) = {
        let mut m = state.borrow_mut();
        m.batch = Some(ChangeSet::new());
        m.outer(changes, selector)
    };
    drop(dropped);
    for (id, source) in added {
        let node = Rc::downgrade(state);
        let o = o.clone();
        let s = source.subscribe(Observer::new(move |n| on_inner(&node, &o, id, n)));
        let rejected = match state.borrow_mut().entry_mut(id) {
            Some(entry) => {
                entry.subscription = Some(s);
                None
            }
            None => Some(s),
        };
        drop(rejected);
    }
    let (out, is_done) = {
        let mut m = state.borrow_mut();
        let out = m.batch.take().and_then(|b| m.gate.pass(b));
        (out, m.is_done())
    };
    if let Some(out) = out {
        o.next(out);
    }
    if is_done {
        o.completed();
    }
}

fn on_inner<U: Clone + 'static>(
    state: &Weak<RefCell<Merger<U>>>,
    o: &Observer<ChangeSet<U>>,
    id: usize,
    n: Notification<ChangeSet<U>>,
) {
    let Some(state) = state.upgrade() else {
        return;
    };
    match n {
        Notification::Next(changes) => {
            let out = state.borrow_mut().inner(id, changes);
            emit(o, out)
        }
        Notification::Error(e) => o.error(e),
        Notification::Completed => {
            let is_done = {
                let mut m = state.borrow_mut();
                if let Some(entry) = m.entry_mut(id) {
                    entry.is_completed = true;
                }
                m.is_done()
            };
            if is_done {
                o.completed();
            }
        }
    }
}

struct Entry<U> {
    id: usize,
    items: Vec<U>,
    subscription: Option<Subscription>,
    is_completed: bool,
}

struct Merger<U> {
    entries: Vec<Entry<U>>,
    next_id: usize,
    batch: Option<ChangeSet<U>>,
    is_outer_completed: bool,
    gate: EmitGate,
}

impl<U: Clone + 'static> Merger<U> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
            batch: None,
            is_outer_completed: false,
            gate: EmitGate::default(),
        }
    }

    fn entry_mut(&mut self, id: usize) -> Option<&mut Entry<U>> {
        self.entries.iter_mut().find(|e| e.id == id)
    }
    fn is_done(&self) -> bool {
        self.is_outer_completed && self.entries.iter().all(|e| e.is_completed)
    }
    fn offset(&self, position: usize) -> usize {
        self.entries[..position].iter().map(|e| e.items.len()).sum()
    }

    #[allow(clippy::type_complexity)]
    fn outer<T>(
        &mut self,
        changes: ChangeSet<T>,
        selector: &dyn Fn(&T) -> Observable<ChangeSet<U>>,
    ) -> (Vec<(usize, Observable<ChangeSet<U>>)>, Vec<Subscription>) {
        let mut added = Vec::new();
        let mut dropped = Vec::new();
        let mut out = ChangeSet::new();
        for change in changes {
            match change {
                Change::Add { item, index } => added.push(self.insert(index, selector(&item))),
                Change::AddRange { items, index } => {
                    for (i, item) in items.iter().enumerate() {
                        added.push(self.insert(index + i, selector(item)));
                    }
                }
                Change::Remove { index, .. } => self.remove(index, &mut out, &mut dropped),
                Change::RemoveRange { items, index } => {
                    for _ in 0..items.len() {
                        self.remove(index, &mut out, &mut dropped);
                    }
                }
                Change::Clear { .. } => {
                    let items: Vec<U> = self
                        .entries
                        .iter()
                        .flat_map(|e| e.items.iter().cloned())
                        .collect();
                    dropped.extend(self.entries.drain(..).filter_map(|e| e.subscription));
                    if !items.is_empty() {
                        out.push(Change::Clear { items });
                    }
                }
                Change::Replace {
                    item,
                    index,
                    previous_index,
                    ..
                } => {
                    self.remove(previous_index, &mut out, &mut dropped);
                    added.push(self.insert(index, selector(&item)));
                }
                Change::Move {
                    index,
                    previous_index,
                    ..
                } => self.move_entry(previous_index, index, &mut out),
                Change::Refresh { .. } => {}
            }
        }
        log::trace!(
            "merge_many: {} inner streams opened, {} closed",
            added.len(),
            dropped.len()
        );
        if let Some(batch) = &mut self.batch {
            batch.extend(out);
        }
        (added, dropped)
    }

    fn insert(
        &mut self,
        index: usize,
        source: Observable<ChangeSet<U>>,
    ) -> (usize, Observable<ChangeSet<U>>) {
        let id = self.next_id;
        self.next_id += 1;
        let index = index.min(self.entries.len());
        self.entries.insert(
            index,
            Entry {
                id,
                items: Vec::new(),
                subscription: None,
                is_completed: false,
            },
        );
        (id, source)
    }

    fn remove(&mut self, index: usize, out: &mut ChangeSet<U>, dropped: &mut Vec<Subscription>) {
        if index >= self.entries.len() {
            return;
        }
        let offset = self.offset(index);
        let entry = self.entries.remove(index);
        dropped.extend(entry.subscription);
        if !entry.items.is_empty() {
            out.push(Change::RemoveRange {
                items: entry.items,
                index: offset,
            });
        }
    }

    fn move_entry(&mut self, from: usize, to: usize, out: &mut ChangeSet<U>) {
        if from >= self.entries.len() || to >= self.entries.len() || from == to {
            return;
        }
        let old_offset = self.offset(from);
        let entry = self.entries.remove(from);
        self.entries.insert(to, entry);
        let items = self.entries[to].items.clone();
        if items.is_empty() {
            return;
        }
        out.push(Change::RemoveRange {
            items: items.clone(),
            index: old_offset,
        });
        out.push(Change::AddRange {
            items,
            index: self.offset(to),
        });
    }

    /// Applies a change-set of one inner stream, shifting its indices past the items of the
    /// streams before it.
    fn inner(&mut self, id: usize, changes: ChangeSet<U>) -> Result<Option<ChangeSet<U>>> {
        let Some(position) = self.entries.iter().position(|e| e.id == id) else {
            return Ok(None);
        };
        let offset = self.offset(position);
        let mut out = ChangeSet::new();
        for change in changes {
            if matches!(&change, Change::Clear { items } if items.is_empty()) {
                continue;
            }
            change.clone().apply_to(&mut self.entries[position].items)?;
            out.push(shift(change, offset));
        }
        if let Some(batch) = &mut self.batch {
            batch.extend(out);
            return Ok(None);
        }
        Ok(self.gate.pass(out))
    }
}

fn shift<U>(change: Change<U>, offset: usize) -> Change<U> {
    match change {
        Change::Add { item, index } => Change::Add {
            item,
            index: index + offset,
        },
        Change::Remove { item, index } => Change::Remove {
            item,
            index: index + offset,
        },
        Change::Replace {
            item,
            previous,
            index,
            previous_index,
        } => Change::Replace {
            item,
            previous,
            index: index + offset,
            previous_index: previous_index + offset,
        },
        Change::Move {
            item,
            index,
            previous_index,
        } => Change::Move {
            item,
            index: index + offset,
            previous_index: previous_index + offset,
        },
        Change::Refresh { item, index } => Change::Refresh {
            item,
            index: index + offset,
        },
        Change::AddRange { items, index } => Change::AddRange {
            items,
            index: index + offset,
        },
        Change::RemoveRange { items, index } => Change::RemoveRange {
            items,
            index: index + offset,
        },
        Change::Clear { items } => Change::RemoveRange {
            items,
            index: offset,
        },
    }
}
