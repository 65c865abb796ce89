use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    hash::Hash,
    mem::take,
    rc::{Rc, Weak},
};

use parse_display::Display;

use crate::{Change, ChangeSet, Notification, Observable, Observer, Result, Subscription};

use super::{emit, EmitGate};


/// How the items of several sources are combined.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CombineOperator {
    /// Items present in every source.
    And,
    /// Items present in at least one source.
    Or,
    /// Items present in exactly one source.
    Xor,
    /// Items of the first source that no other source contains.
    Except,
}

impl<T: Eq + Hash + Clone + 'static> Observable<ChangeSet<T>> {
    pub fn and(&self, others: impl IntoIterator<Item = Self>) -> Self {
        combine_fixed(CombineOperator::And, self, others)
    }
    pub fn or(&self, others: impl IntoIterator<Item = Self>) -> Self {
        combine_fixed(CombineOperator::Or, self, others)
    }
    pub fn xor(&self, others: impl IntoIterator<Item = Self>) -> Self {
        combine_fixed(CombineOperator::Xor, self, others)
    }
    /// Items of `self` contained in none of `others`.
    pub fn except(&self, others: impl IntoIterator<Item = Self>) -> Self {
        combine_fixed(CombineOperator::Except, self, others)
    }
}

fn combine_fixed<T: Eq + Hash + Clone + 'static>(
    op: CombineOperator,
    first: &Observable<ChangeSet<T>>,
    others: impl IntoIterator<Item = Observable<ChangeSet<T>>>,
) -> Observable<ChangeSet<T>> {
    let sources = [first.clone()].into_iter().chain(others).collect();
    combine(op, Observable::of(ChangeSet::initial(sources)))
}

pub fn and<T: Eq + Hash + Clone + 'static>(
    sources: Vec<Observable<ChangeSet<T>>>,
) -> Observable<ChangeSet<T>> {
    combine(CombineOperator::And, Observable::of(ChangeSet::initial(sources)))
}
pub fn or<T: Eq + Hash + Clone + 'static>(
    sources: Vec<Observable<ChangeSet<T>>>,
) -> Observable<ChangeSet<T>> {
    combine(CombineOperator::Or, Observable::of(ChangeSet::initial(sources)))
}
pub fn xor<T: Eq + Hash + Clone + 'static>(
    sources: Vec<Observable<ChangeSet<T>>>,
) -> Observable<ChangeSet<T>> {
    combine(CombineOperator::Xor, Observable::of(ChangeSet::initial(sources)))
}
pub fn except<T: Eq + Hash + Clone + 'static>(
    sources: Vec<Observable<ChangeSet<T>>>,
) -> Observable<ChangeSet<T>> {
    combine(CombineOperator::Except, Observable::of(ChangeSet::initial(sources)))
}

pub fn dynamic_and<T: Eq + Hash + Clone + 'static>(
    sources: Observable<ChangeSet<Observable<ChangeSet<T>>>>,
) -> Observable<ChangeSet<T>> {
    combine(CombineOperator::And, sources)
}
pub fn dynamic_or<T: Eq + Hash + Clone + 'static>(
    sources: Observable<ChangeSet<Observable<ChangeSet<T>>>>,
) -> Observable<ChangeSet<T>> {
    combine(CombineOperator::Or, sources)
}
pub fn dynamic_xor<T: Eq + Hash + Clone + 'static>(
    sources: Observable<ChangeSet<Observable<ChangeSet<T>>>>,
) -> Observable<ChangeSet<T>> {
    combine(CombineOperator::Xor, sources)
}
pub fn dynamic_except<T: Eq + Hash + Clone + 'static>(
    sources: Observable<ChangeSet<Observable<ChangeSet<T>>>>,
) -> Observable<ChangeSet<T>> {
    combine(CombineOperator::Except, sources)
}

/// Combines a changing list of sources with `op`.
///
/// Items are compared by value and appended to the output in the order they become included.
/// The output completes once `sources` and every source it holds have completed.
pub fn combine<T: Eq + Hash + Clone + 'static>(
    op: CombineOperator,
    sources: Observable<ChangeSet<Observable<ChangeSet<T>>>>,
) -> Observable<ChangeSet<T>> {
    Observable::new(move |o| {
        let state = Rc::new(RefCell::new(Combiner::new(op)));
        let s_outer = sources.subscribe(Observer::new({
            let state = state.clone();
            move |n| on_outer(&state, &o, n)
        }));
        Subscription::from_fn(move || {
            drop(s_outer);
            let inner: Vec<_> = state
                .borrow_mut()
                .sources
                .iter_mut()
                .filter_map(|s| s.subscription.take())
                .collect();
            drop(inner);
        })
    })
}

fn on_outer<T: Eq + Hash + Clone + 'static>(
    state: &Rc<RefCell<Combiner<T>>>,
    o: &Observer<ChangeSet<T>>,
    n: Notification<ChangeSet<Observable<ChangeSet<T>>>>,
) {
    match n {
        Notification::Next(changes) => {
            let (added, dropped) = {
                let mut c = state.borrow_mut();
                c.batch = Some(ChangeSet::new());
                c.outer(changes)
            };
            drop(dropped);
            for (id, source) in added {
                let node = Rc::downgrade(state);
                let o = o.clone();
                let s = source.subscribe(Observer::new(move |n| on_inner(&node, &o, id, n)));
                let rejected = match state.borrow_mut().source_mut(id) {
                    Some(entry) => {
                        entry.subscription = Some(s);
                        None
                    }
                    None => Some(s),
                };
                drop(rejected);
            }
            let (out, is_done) = {
                let mut c = state.borrow_mut();
                (c.finish_batch(), c.is_done())
            };
            if let Some(out) = out {
                o.next(out);
            }
            if is_done {
                o.completed();
            }
        }
        Notification::Error(e) => o.error(e),
        Notification::Completed => {
            let is_done = {
                let mut c = state.borrow_mut();
                c.is_outer_completed = true;
                c.is_done()
            };
            if is_done {
                o.completed();
            }
        }
    }
}

fn on_inner<T: Eq + Hash + Clone + 'static>(
    state: &Weak<RefCell<Combiner<T>>>,
    o: &Observer<ChangeSet<T>>,
    id: usize,
    n: Notification<ChangeSet<T>>,
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
                let mut c = state.borrow_mut();
                if let Some(entry) = c.source_mut(id) {
                    entry.is_completed = true;
                }
                c.is_done()
            };
            if is_done {
                o.completed();
            }
        }
    }
}

struct SourceEntry<T> {
    id: usize,
    items: Vec<T>,
    counts: HashMap<T, usize>,
    subscription: Option<Subscription>,
    /// Set by the first change-set. Until then the source holds nothing and `And` ignores it.
    is_ready: bool,
    is_completed: bool,
}

struct Combiner<T> {
    op: CombineOperator,
    sources: Vec<SourceEntry<T>>,
    next_id: usize,
    tally: HashMap<T, usize>,
    items: Vec<T>,
    included: HashSet<T>,
    /// Items whose inclusion may have changed since the last flush.
    dirty: Vec<T>,
    batch: Option<ChangeSet<T>>,
    is_outer_completed: bool,
    gate: EmitGate,
}

impl<T: Eq + Hash + Clone + 'static> Combiner<T> {
    fn new(op: CombineOperator) -> Self {
        Self {
            op,
            sources: Vec::new(),
            next_id: 0,
            tally: HashMap::new(),
            items: Vec::new(),
            included: HashSet::new(),
            dirty: Vec::new(),
            batch: None,
            is_outer_completed: false,
            gate: EmitGate::default(),
        }
    }

    fn source_mut(&mut self, id: usize) -> Option<&mut SourceEntry<T>> {
        self.sources.iter_mut().find(|s| s.id == id)
    }
    fn is_done(&self) -> bool {
        self.is_outer_completed && self.sources.iter().all(|s| s.is_completed)
    }

    fn should_include(&self, item: &T, ready: usize) -> bool {
        let tally = self.tally.get(item).copied().unwrap_or(0);
        match self.op {
            CombineOperator::And => ready > 0 && tally == ready,
            CombineOperator::Or => tally > 0,
            CombineOperator::Xor => tally == 1,
            CombineOperator::Except => {
                tally == 1 && self.sources.first().is_some_and(|s| s.counts.contains_key(item))
            }
        }
    }

    /// Emits the items of `dirty` that crossed the inclusion threshold, once each.
    fn flush(&mut self, out: &mut ChangeSet<T>) {
        let dirty = take(&mut self.dirty);
        let ready = self.sources.iter().filter(|s| s.is_ready).count();
        let mut seen = HashSet::new();
        for item in dirty {
            if seen.insert(item.clone()) {
                self.reevaluate(&item, ready, out);
            }
        }
    }

    fn reevaluate(&mut self, item: &T, ready: usize, out: &mut ChangeSet<T>) {
        let should = self.should_include(item, ready);
        if should == self.included.contains(item) {
            return;
        }
        if should {
            self.included.insert(item.clone());
            self.items.push(item.clone());
            out.push(Change::Add {
                item: item.clone(),
                index: self.items.len() - 1,
            });
        } else {
            self.included.remove(item);
            if let Some(index) = self.items.iter().position(|x| x == item) {
                let item = self.items.remove(index);
                out.push(Change::Remove { item, index });
            }
        }
    }

    /// The change-set of the outer batch, with every inclusion change it caused.
    fn finish_batch(&mut self) -> Option<ChangeSet<T>> {
        let mut out = self.batch.take()?;
        self.flush(&mut out);
        self.gate.pass(out)
    }

    fn add_item(&mut self, source: usize, item: T) {
        let count = self.sources[source].counts.entry(item.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            *self.tally.entry(item.clone()).or_insert(0) += 1;
            self.dirty.push(item);
        }
    }
    fn remove_item(&mut self, source: usize, item: T) {
        let counts = &mut self.sources[source].counts;
        let Some(count) = counts.get_mut(&item) else {
            return;
        };
        *count -= 1;
        if *count > 0 {
            return;
        }
        counts.remove(&item);
        self.untally(&item);
        self.dirty.push(item);
    }
    fn untally(&mut self, item: &T) {
        if let Some(t) = self.tally.get_mut(item) {
            *t -= 1;
            if *t == 0 {
                self.tally.remove(item);
            }
        }
    }

    /// Applies a change-set of one source.
    fn inner(&mut self, id: usize, changes: ChangeSet<T>) -> Result<Option<ChangeSet<T>>> {
        let Some(source) = self.sources.iter().position(|s| s.id == id) else {
            return Ok(None);
        };
        if !self.sources[source].is_ready {
            self.sources[source].is_ready = true;
            if self.op == CombineOperator::And {
                // One more source to be present in.
                self.dirty.extend(self.items.iter().cloned());
            }
        }
        let mut out = ChangeSet::new();
        for change in changes {
            change.clone().apply_to(&mut self.sources[source].items)?;
            match change {
                Change::Add { item, .. } => self.add_item(source, item),
                Change::AddRange { items, .. } => {
                    for item in items {
                        self.add_item(source, item);
                    }
                }
                Change::Remove { item, .. } => self.remove_item(source, item),
                Change::RemoveRange { items, .. } | Change::Clear { items } => {
                    for item in items {
                        self.remove_item(source, item);
                    }
                }
                Change::Replace { item, previous, .. } => {
                    if item == previous {
                        self.refresh(&item, &mut out);
                    } else {
                        self.remove_item(source, previous);
                        self.add_item(source, item);
                    }
                }
                Change::Refresh { item, .. } => self.refresh(&item, &mut out),
                Change::Move { .. } => {}
            }
        }
        if let Some(batch) = &mut self.batch {
            batch.extend(out);
            return Ok(None);
        }
        self.flush(&mut out);
        Ok(self.gate.pass(out))
    }

    fn refresh(&mut self, item: &T, out: &mut ChangeSet<T>) {
        if !self.included.contains(item) {
            return;
        }
        if let Some(index) = self.items.iter().position(|x| x == item) {
            out.push(Change::Refresh {
                item: item.clone(),
                index,
            });
        }
    }

    /// Applies a change-set of the source list. Returns the sources to subscribe to and the
    /// subscriptions of removed sources.
    ///
    /// Only the items the removed sources held, and for `Except` the items of the old and new
    /// primary source, are marked for evaluation. Added sources count once they deliver.
    #[allow(clippy::type_complexity)]
    fn outer(
        &mut self,
        changes: ChangeSet<Observable<ChangeSet<T>>>,
    ) -> (Vec<(usize, Observable<ChangeSet<T>>)>, Vec<Subscription>) {
        let mut added = Vec::new();
        let mut dropped = Vec::new();
        let primary = self.sources.first().map(|s| s.id);
        for change in changes {
            match change {
                Change::Add { item, index } => added.push(self.insert_source(index, item)),
                Change::AddRange { items, index } => {
                    for (i, item) in items.into_iter().enumerate() {
                        added.push(self.insert_source(index + i, item));
                    }
                }
                Change::Remove { index, .. } => self.remove_source(index, &mut dropped),
                Change::RemoveRange { items, index } => {
                    for _ in 0..items.len() {
                        self.remove_source(index, &mut dropped);
                    }
                }
                Change::Clear { .. } => {
                    while !self.sources.is_empty() {
                        self.remove_source(self.sources.len() - 1, &mut dropped);
                    }
                }
                Change::Replace {
                    item,
                    index,
                    previous_index,
                    ..
                } => {
                    self.remove_source(previous_index, &mut dropped);
                    added.push(self.insert_source(index, item));
                }
                Change::Move {
                    index,
                    previous_index,
                    ..
                } => {
                    if previous_index < self.sources.len() && index < self.sources.len() {
                        let entry = self.sources.remove(previous_index);
                        self.sources.insert(index, entry);
                    }
                }
                Change::Refresh { .. } => {}
            }
        }
        if self.op == CombineOperator::Except && self.sources.first().map(|s| s.id) != primary {
            self.dirty.extend(self.items.iter().cloned());
            if let Some(first) = self.sources.first() {
                self.dirty.extend(first.items.iter().cloned());
            }
        }
        log::trace!(
            "{} combinator: {} sources added, {} removed",
            self.op,
            added.len(),
            dropped.len()
        );
        (added, dropped)
    }

    fn insert_source(
        &mut self,
        index: usize,
        source: Observable<ChangeSet<T>>,
    ) -> (usize, Observable<ChangeSet<T>>) {
        let id = self.next_id;
        self.next_id += 1;
        let index = index.min(self.sources.len());
        self.sources.insert(
            index,
            SourceEntry {
                id,
                items: Vec::new(),
                counts: HashMap::new(),
                subscription: None,
                is_ready: false,
                is_completed: false,
            },
        );
        (id, source)
    }

    fn remove_source(&mut self, index: usize, dropped: &mut Vec<Subscription>) {
        if index >= self.sources.len() {
            return;
        }
        let entry = self.sources.remove(index);
        for item in entry.counts.keys() {
            self.untally(item);
        }
        if self.op == CombineOperator::And && entry.is_ready {
            // Items now present in every remaining source are all in the smallest one.
            let smallest = self
                .sources
                .iter()
                .filter(|s| s.is_ready)
                .min_by_key(|s| s.counts.len());
            if let Some(smallest) = smallest {
                self.dirty.extend(smallest.items.iter().cloned());
            }
        }
        self.dirty.extend(entry.items);
        dropped.extend(entry.subscription);
    }
}
