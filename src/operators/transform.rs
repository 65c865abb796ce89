use std::rc::Rc;

use crate::{observable::forward, Change, ChangeSet, Error, Observable, Result};

use super::{emit, EmitGate};


impl<T: 'static> Observable<ChangeSet<T>> {
    /// Maps every item, keeping indices unchanged.
    ///
    /// `f` is applied again to the item carried by a removal, so it should be pure.
    pub fn transform<U: 'static>(&self, f: impl Fn(T) -> U + 'static) -> Observable<ChangeSet<U>> {
        self.map(move |changes| changes.map(&f))
    }

    /// Keeps the items matching `predicate`.
    ///
    /// The predicate is evaluated again for an item when it is refreshed or replaced.
    pub fn filter_items(&self, predicate: impl Fn(&T) -> bool + 'static) -> Self {
        let source = self.clone();
        let predicate = Rc::new(predicate);
        Observable::new(move |o| {
            let mut filter = Filter {
                predicate: predicate.clone(),
                included: Vec::new(),
                gate: EmitGate::default(),
            };
            source.subscribe(forward(o, move |o, changes| emit(o, filter.process(changes))))
        })
    }

    /// The number of items, the first value then every time it changes.
    pub fn count_changed(&self) -> Observable<usize> {
        let source = self.clone();
        Observable::new(move |o| {
            let mut count = None;
            source.subscribe(forward(o, move |o, changes: ChangeSet<T>| {
                let next = (count.unwrap_or(0) + changes.adds()).saturating_sub(changes.removes());
                if count != Some(next) {
                    count = Some(next);
                    o.next(next);
                }
            }))
        })
    }
}

struct Filter<T> {
    predicate: Rc<dyn Fn(&T) -> bool>,
    included: Vec<bool>,
    gate: EmitGate,
}

impl<T> Filter<T> {
    fn position(&self, index: usize) -> usize {
        self.included[..index].iter().filter(|x| **x).count()
    }

    fn process(&mut self, changes: ChangeSet<T>) -> Result<Option<ChangeSet<T>>> {
        let mut out = ChangeSet::new();
        for change in changes {
            self.apply(change, &mut out)?;
        }
        Ok(self.gate.pass(out))
    }

    fn apply(&mut self, change: Change<T>, out: &mut ChangeSet<T>) -> Result<()> {
        let len = self.included.len();
        match change {
            Change::Add { item, index } => {
                Error::check_insert_index(index, len)?;
                let is_included = (self.predicate)(&item);
                self.included.insert(index, is_included);
                if is_included {
                    out.push(Change::Add {
                        item,
                        index: self.position(index),
                    });
                }
            }
            Change::AddRange { items, index } => {
                Error::check_insert_index(index, len)?;
                let at = self.position(index);
                let mut added = Vec::new();
                for (i, item) in items.into_iter().enumerate() {
                    let is_included = (self.predicate)(&item);
                    self.included.insert(index + i, is_included);
                    if is_included {
                        added.push(item);
                    }
                }
                if !added.is_empty() {
                    out.push(Change::AddRange {
                        items: added,
                        index: at,
                    });
                }
            }
            Change::Remove { item, index } => {
                Error::check_index(index, len)?;
                if self.included.remove(index) {
                    out.push(Change::Remove {
                        item,
                        index: self.position(index),
                    });
                }
            }
            Change::RemoveRange { items, index } => {
                if index + items.len() > len {
                    return Err(Error::OutOfRange {
                        index: index + items.len(),
                        len,
                    });
                }
                let at = self.position(index);
                let flags: Vec<bool> = self.included.drain(index..index + items.len()).collect();
                let removed: Vec<T> = items
                    .into_iter()
                    .zip(flags)
                    .filter_map(|(item, is_included)| is_included.then_some(item))
                    .collect();
                if !removed.is_empty() {
                    out.push(Change::RemoveRange {
                        items: removed,
                        index: at,
                    });
                }
            }
            Change::Clear { items } => {
                let removed: Vec<T> = items
                    .into_iter()
                    .zip(self.included.drain(..))
                    .filter_map(|(item, is_included)| is_included.then_some(item))
                    .collect();
                if !removed.is_empty() {
                    out.push(Change::Clear { items: removed });
                }
            }
            Change::Replace {
                item,
                previous,
                index,
                previous_index,
            } => {
                Error::check_index(previous_index, len)?;
                Error::check_index(index, len)?;
                let from = self.position(previous_index);
                let was_included = self.included.remove(previous_index);
                let is_included = (self.predicate)(&item);
                let to = self.position(index);
                self.included.insert(index, is_included);
                match (was_included, is_included) {
                    (true, true) => out.push(Change::Replace {
                        item,
                        previous,
                        index: to,
                        previous_index: from,
                    }),
                    (true, false) => out.push(Change::Remove {
                        item: previous,
                        index: from,
                    }),
                    (false, true) => out.push(Change::Add { item, index: to }),
                    (false, false) => {}
                }
            }
            Change::Move {
                item,
                index,
                previous_index,
            } => {
                Error::check_index(previous_index, len)?;
                Error::check_index(index, len)?;
                let from = self.position(previous_index);
                let is_included = self.included.remove(previous_index);
                let to = self.position(index);
                self.included.insert(index, is_included);
                if is_included && from != to {
                    out.push(Change::Move {
                        item,
                        index: to,
                        previous_index: from,
                    });
                }
            }
            Change::Refresh { item, index } => {
                Error::check_index(index, len)?;
                let at = self.position(index);
                let is_included = (self.predicate)(&item);
                match (self.included[index], is_included) {
                    (true, true) => out.push(Change::Refresh { item, index: at }),
                    (true, false) => out.push(Change::Remove { item, index: at }),
                    (false, true) => out.push(Change::Add { item, index: at }),
                    (false, false) => {}
                }
                self.included[index] = is_included;
            }
        }
        Ok(())
    }
}
