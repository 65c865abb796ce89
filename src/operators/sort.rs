use std::{
    cell::RefCell,
    cmp::Ordering,
    collections::HashMap,
    mem::take,
    rc::Rc,
};

use derive_ex::derive_ex;

use crate::{
    utils::{longest_increasing_subsequence, reorder, Edit, KeyedList},
    Change, ChangeSet, Notification, Observable, Observer, Result, Subscription,
};

use super::{emit, EmitGate};

#[cfg(test)]
mod tests;

/// A shared comparison function.
pub type Comparer<T> = Rc<dyn Fn(&T, &T) -> Ordering>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive_ex(Default)]
#[default(Self::new())]
pub struct SortOptions {
    /// When an update would move or change more items than this, the sorted list is emitted
    /// again as a `Clear` followed by an `AddRange`.
    pub reset_threshold: usize,
}

impl SortOptions {
    pub fn new() -> Self {
        Self {
            reset_threshold: 100,
        }
    }
    pub fn reset_threshold(self, reset_threshold: usize) -> Self {
        Self { reset_threshold }
    }
}

impl<T: Clone + 'static> Observable<ChangeSet<T>> {
    /// Keeps the items sorted by `comparer`. Items comparing equal keep the order in which they
    /// were added.
    pub fn sort(&self, comparer: impl Fn(&T, &T) -> Ordering + 'static) -> Self {
        let comparer: Comparer<T> = Rc::new(comparer);
        sort_with(
            self.clone(),
            Observable::of(comparer),
            Observable::never(),
            SortOptions::default(),
        )
    }
    pub fn sort_by_key<K: Ord>(&self, f: impl Fn(&T) -> K + 'static) -> Self {
        self.sort(move |a, b| f(a).cmp(&f(b)))
    }

    /// Sorts by the latest comparer of `comparers`, re-sorting when a new comparer arrives or
    /// when `resort` emits.
    ///
    /// Nothing is emitted until the first comparer arrives.
    pub fn sort_with(
        &self,
        comparers: Observable<Comparer<T>>,
        resort: Observable<()>,
        options: SortOptions,
    ) -> Self {
        sort_with(self.clone(), comparers, resort, options)
    }
}

pub fn sort_with<T: Clone + 'static>(
    source: Observable<ChangeSet<T>>,
    comparers: Observable<Comparer<T>>,
    resort: Observable<()>,
    options: SortOptions,
) -> Observable<ChangeSet<T>> {
    Observable::new(move |o| {
        let sorter = Rc::new(RefCell::new(Sorter::new(options)));
        let s_comparers = comparers.subscribe(side_input(&sorter, &o, Sorter::set_comparer));
        let s_resort = resort.subscribe(side_input(&sorter, &o, |s, ()| s.resort()));
        let s_source = source.subscribe(Observer::new({
            let sorter = sorter.clone();
            move |n| match n {
                Notification::Next(changes) => {
                    let out = sorter.borrow_mut().process(changes);
                    emit(&o, out)
                }
                Notification::Error(e) => o.error(e),
                Notification::Completed => o.completed(),
            }
        }));
        Subscription::from_vec(vec![s_source, s_resort, s_comparers])
    })
}

/// Observer of a configuration stream: values update the sorter, errors end the output and
/// completion is ignored.
fn side_input<T: Clone + 'static, U: 'static>(
    sorter: &Rc<RefCell<Sorter<T>>>,
    o: &Observer<ChangeSet<T>>,
    f: impl Fn(&mut Sorter<T>, U) -> Result<Option<ChangeSet<T>>> + 'static,
) -> Observer<U> {
    let sorter = sorter.clone();
    let o = o.clone();
    Observer::new(move |n| match n {
        Notification::Next(value) => {
            let out = f(&mut sorter.borrow_mut(), value);
            emit(&o, out)
        }
        Notification::Error(e) => o.error(e),
        Notification::Completed => {}
    })
}

struct Sorter<T> {
    mirror: KeyedList<T>,
    seqs: HashMap<usize, u64>,
    next_seq: u64,
    sorted: Vec<usize>,
    comparer: Option<Comparer<T>>,
    has_upstream: bool,
    options: SortOptions,
    gate: EmitGate,
}

fn order<T>(
    comparer: &Comparer<T>,
    mirror: &KeyedList<T>,
    seqs: &HashMap<usize, u64>,
    a: usize,
    b: usize,
) -> Ordering {
    comparer(mirror.get(a), mirror.get(b)).then_with(|| seqs[&a].cmp(&seqs[&b]))
}

fn sorted_position<T>(
    sorted: &[usize],
    comparer: &Comparer<T>,
    mirror: &KeyedList<T>,
    seqs: &HashMap<usize, u64>,
    key: usize,
) -> usize {
    sorted.partition_point(|&k| order(comparer, mirror, seqs, k, key) == Ordering::Less)
}

impl<T: Clone + 'static> Sorter<T> {
    fn new(options: SortOptions) -> Self {
        Self {
            mirror: KeyedList::new(),
            seqs: HashMap::new(),
            next_seq: 0,
            sorted: Vec::new(),
            comparer: None,
            has_upstream: false,
            options,
            gate: EmitGate::default(),
        }
    }

    fn sorted_items(&self) -> Vec<T> {
        self.sorted.iter().map(|&k| self.mirror.get(k).clone()).collect()
    }

    fn process(&mut self, changes: ChangeSet<T>) -> Result<Option<ChangeSet<T>>> {
        self.has_upstream = true;
        let Some(comparer) = self.comparer.clone() else {
            for change in changes {
                self.track(change)?;
            }
            return Ok(None);
        };
        if self.sorted.is_empty() || changes.total_changes() > self.options.reset_threshold {
            return self.rebuild(changes);
        }

        let Self {
            mirror,
            seqs,
            next_seq,
            sorted,
            ..
        } = self;
        let mut out = ChangeSet::new();
        for change in changes {
            if let Change::Clear { .. } = change {
                if !sorted.is_empty() {
                    out.push(Change::Clear {
                        items: sorted.iter().map(|&k| mirror.get(k).clone()).collect(),
                    });
                }
                mirror.clear();
                seqs.clear();
                sorted.clear();
                continue;
            }
            mirror.apply(change, |m, edit| match edit {
                Edit::Inserted { key, .. } => {
                    seqs.insert(key, *next_seq);
                    *next_seq += 1;
                    let index = sorted_position(sorted, &comparer, m, seqs, key);
                    sorted.insert(index, key);
                    out.push(Change::Add {
                        item: m.get(key).clone(),
                        index,
                    });
                }
                Edit::Removed { key, item, .. } => {
                    seqs.remove(&key);
                    if let Some(index) = sorted.iter().position(|&k| k == key) {
                        sorted.remove(index);
                        out.push(Change::Remove { item, index });
                    }
                }
                Edit::Replaced { key, previous, .. } => {
                    let Some(previous_index) = sorted.iter().position(|&k| k == key) else {
                        return;
                    };
                    sorted.remove(previous_index);
                    let index = sorted_position(sorted, &comparer, m, seqs, key);
                    sorted.insert(index, key);
                    let item = m.get(key).clone();
                    if index == previous_index {
                        out.push(Change::Replace {
                            item,
                            previous,
                            index,
                            previous_index,
                        });
                    } else {
                        out.push(Change::Remove {
                            item: previous,
                            index: previous_index,
                        });
                        out.push(Change::Add { item, index });
                    }
                }
                Edit::Refreshed { key, .. } => {
                    let Some(previous_index) = sorted.iter().position(|&k| k == key) else {
                        return;
                    };
                    sorted.remove(previous_index);
                    let index = sorted_position(sorted, &comparer, m, seqs, key);
                    sorted.insert(index, key);
                    let item = m.get(key).clone();
                    if index == previous_index {
                        out.push(Change::Refresh { item, index });
                    } else {
                        out.push(Change::Move {
                            item,
                            index,
                            previous_index,
                        });
                    }
                }
                Edit::Moved { .. } => {}
            })?;
        }
        Ok(self.gate.pass(out))
    }

    /// Applies `change` to the mirror without computing any sorted position.
    fn track(&mut self, change: Change<T>) -> Result<()> {
        let Self {
            mirror,
            seqs,
            next_seq,
            ..
        } = self;
        mirror.apply(change, |_, edit| match edit {
            Edit::Inserted { key, .. } => {
                seqs.insert(key, *next_seq);
                *next_seq += 1;
            }
            Edit::Removed { key, .. } => {
                seqs.remove(&key);
            }
            _ => {}
        })
    }

    /// Applies `changes` and emits the whole sorted list again.
    fn rebuild(&mut self, changes: ChangeSet<T>) -> Result<Option<ChangeSet<T>>> {
        let before = self.sorted_items();
        for change in changes {
            self.track(change)?;
        }
        let Some(comparer) = self.comparer.clone() else {
            return Ok(None);
        };
        let mut sorted = self.mirror.keys().to_vec();
        sorted.sort_by(|&a, &b| order(&comparer, &self.mirror, &self.seqs, a, b));
        self.sorted = sorted;
        if !before.is_empty() {
            log::debug!("sort: resetting {} items", before.len());
        }
        Ok(self.gate.pass(reset(before, self.sorted_items())))
    }

    fn set_comparer(&mut self, comparer: Comparer<T>) -> Result<Option<ChangeSet<T>>> {
        self.comparer = Some(comparer);
        if !self.has_upstream {
            return Ok(None);
        }
        if self.sorted.is_empty() {
            return self.rebuild(ChangeSet::new());
        }
        self.resort()
    }

    /// Recomputes the order of every item and moves the items out of place.
    fn resort(&mut self) -> Result<Option<ChangeSet<T>>> {
        let Some(comparer) = self.comparer.clone() else {
            return Ok(None);
        };
        let mut target = self.sorted.clone();
        target.sort_by(|&a, &b| order(&comparer, &self.mirror, &self.seqs, a, b));

        let target_index: HashMap<usize, usize> =
            target.iter().enumerate().map(|(i, &k)| (k, i)).collect();
        let seq: Vec<usize> = self.sorted.iter().map(|k| target_index[k]).collect();
        let stable = longest_increasing_subsequence(&seq)
            .into_iter()
            .filter(|x| *x)
            .count();
        if self.sorted.len() - stable > self.options.reset_threshold {
            log::debug!("sort: {} items out of place, resetting", self.sorted.len() - stable);
            let before = self.sorted_items();
            self.sorted = target;
            return Ok(self.gate.pass(reset(before, self.sorted_items())));
        }
        let mut working = take(&mut self.sorted);
        let mut changes = Vec::new();
        let mirror = &self.mirror;
        reorder(&mut working, &target, |k| mirror.get(k).clone(), &mut changes);
        self.sorted = working;
        Ok(self.gate.pass(ChangeSet::from(changes)))
    }
}

fn reset<T>(before: Vec<T>, after: Vec<T>) -> ChangeSet<T> {
    let mut out = ChangeSet::new();
    if !before.is_empty() {
        out.push(Change::Clear { items: before });
    }
    if !after.is_empty() {
        out.push(Change::AddRange {
            items: after,
            index: 0,
        });
    }
    out
}
