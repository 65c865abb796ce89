use std::{cell::RefCell, collections::HashSet, fmt, hash::Hash, marker::PhantomData, mem::take, rc::Rc};

use derive_ex::derive_ex;
use serde::{Deserialize, Serialize};

use crate::{Change, ChangeSet, Error, Observable, Result, Subject};

#[cfg(test)]
mod tests;

/// A mutable list that publishes every committed edit as a [`ChangeSet`].
///
/// All mutation happens inside [`edit`](Self::edit). An edit issued from inside the action of
/// another edit joins it, so the outer call emits one preview and one change-set for all of
/// them. An edit issued while a preview is being delivered fails with
/// [`Error::InvalidOperation`].
#[derive_ex(Clone(bound()))]
pub struct SourceList<T: 'static>(Rc<RawSourceList<T>>);

struct RawSourceList<T: 'static> {
    data: RefCell<SourceListData<T>>,
    changes: Subject<ChangeSet<T>>,
    previews: Subject<ChangeSet<T>>,
}

struct SourceListData<T> {
    items: Vec<T>,
    log: Vec<Change<T>>,
    /// Changes reverting `log`, in the order they were made.
    undo: Vec<Change<T>>,
    state: EditState,
    is_disposed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditState {
    Idle,
    Editing,
    Previewing,
}

impl<T: Clone + 'static> SourceList<T> {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }
    fn from_vec(items: Vec<T>) -> Self {
        Self(Rc::new(RawSourceList {
            data: RefCell::new(SourceListData {
                items,
                log: Vec::new(),
                undo: Vec::new(),
                state: EditState::Idle,
                is_disposed: false,
            }),
            changes: Subject::new(),
            previews: Subject::new(),
        }))
    }

    /// Runs `action` as one edit session and publishes what it did as one change-set.
    ///
    /// If `action` fails, every edit it made is rolled back and nothing is published.
    pub fn edit<R>(&self, action: impl FnOnce(&mut ListEditor<T>) -> Result<R>) -> Result<R> {
        let state = {
            let mut d = self.0.data.borrow_mut();
            if d.is_disposed {
                return Err(Error::InvalidOperation("the source list is disposed".into()));
            }
            let state = d.state;
            if state == EditState::Idle {
                d.state = EditState::Editing;
            }
            state
        };
        match state {
            EditState::Idle => {}
            EditState::Editing => return action(&mut ListEditor { list: &self.0 }),
            EditState::Previewing => {
                return Err(Error::InvalidOperation(
                    "cannot edit while a preview is being delivered".into(),
                ))
            }
        }
        let result = action(&mut ListEditor { list: &self.0 });
        let (changes, undo) = {
            let mut d = self.0.data.borrow_mut();
            let changes = ChangeSet::from(take(&mut d.log));
            let undo = take(&mut d.undo);
            if result.is_err() {
                rollback(&mut d.items, undo);
                d.state = EditState::Idle;
                return result;
            }
            (changes, undo)
        };
        if self.0.previews.has_observers() {
            {
                let mut d = self.0.data.borrow_mut();
                rollback(&mut d.items, undo);
                d.state = EditState::Previewing;
            }
            self.0.previews.next(changes.clone());
            let mut d = self.0.data.borrow_mut();
            d.state = EditState::Idle;
            changes.clone().apply_to(&mut d.items)?;
        } else {
            self.0.data.borrow_mut().state = EditState::Idle;
        }
        if !changes.is_empty() {
            log::trace!(
                "source list committed {} changes ({} items)",
                changes.len(),
                changes.total_changes()
            );
            self.0.changes.next(changes);
        }
        result
    }

    /// The change-set stream of this list.
    ///
    /// Each subscriber first receives the committed contents as one change-set (empty if the
    /// list is empty), then every change-set committed afterwards.
    pub fn connect(&self) -> Observable<ChangeSet<T>> {
        let this = self.clone();
        Observable::new(move |o| {
            let s = this.0.changes.to_observable().subscribe(o.clone());
            if !o.is_stopped() {
                o.next(ChangeSet::initial(this.items()));
            }
            s
        })
    }

    /// Change-sets about to be committed, delivered while the list still holds the previous
    /// contents.
    pub fn preview(&self) -> Observable<ChangeSet<T>> {
        self.0.previews.to_observable()
    }

    /// The number of items, current value first, then every time it changes.
    pub fn count_changed(&self) -> Observable<usize> {
        self.connect().count_changed()
    }

    /// The committed contents. Inside an edit action this excludes the edits made so far.
    pub fn items(&self) -> Vec<T> {
        let d = self.0.data.borrow();
        if d.log.is_empty() {
            return d.items.clone();
        }
        let mut items = d.items.clone();
        rollback(&mut items, d.undo.clone());
        items
    }
    pub fn len(&self) -> usize {
        let d = self.0.data.borrow();
        let added: usize = d.log.iter().map(|c| added_count(c)).sum();
        let removed: usize = d.log.iter().map(|c| removed_count(c)).sum();
        d.items.len() + removed - added
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn get(&self, index: usize) -> Option<T> {
        if self.0.data.borrow().log.is_empty() {
            return self.0.data.borrow().items.get(index).cloned();
        }
        self.items().get(index).cloned()
    }

    /// Completes the change and preview streams. Every later edit fails.
    pub fn dispose(&self) {
        {
            let mut d = self.0.data.borrow_mut();
            if d.is_disposed {
                return;
            }
            d.is_disposed = true;
        }
        log::debug!("source list disposed");
        self.0.previews.completed();
        self.0.changes.completed();
    }
    pub fn is_disposed(&self) -> bool {
        self.0.data.borrow().is_disposed
    }

    /// Terminates both streams with `e` and disposes the list.
    pub(crate) fn fail(&self, e: Error) {
        {
            let mut d = self.0.data.borrow_mut();
            if d.is_disposed {
                return;
            }
            d.is_disposed = true;
        }
        self.0.previews.error(e.clone());
        self.0.changes.error(e);
    }

    pub fn add(&self, item: T) -> Result<()> {
        self.edit(|l| {
            l.add(item);
            Ok(())
        })
    }
    pub fn add_range(&self, items: impl IntoIterator<Item = T>) -> Result<()> {
        self.edit(|l| {
            l.add_range(items);
            Ok(())
        })
    }
    pub fn insert(&self, index: usize, item: T) -> Result<()> {
        self.edit(|l| l.insert(index, item))
    }
    pub fn insert_range(&self, index: usize, items: impl IntoIterator<Item = T>) -> Result<()> {
        self.edit(|l| l.insert_range(index, items))
    }
    pub fn remove_at(&self, index: usize) -> Result<T> {
        self.edit(|l| l.remove_at(index))
    }
    pub fn remove_range(&self, index: usize, count: usize) -> Result<Vec<T>> {
        self.edit(|l| l.remove_range(index, count))
    }
    /// Removes the first item equal to `item`. Returns whether an item was removed.
    pub fn remove(&self, item: &T) -> Result<bool>
    where
        T: PartialEq,
    {
        self.edit(|l| Ok(l.remove(item)))
    }
    /// Removes the first equal item for each of `items`. Returns the number removed.
    pub fn remove_many(&self, items: impl IntoIterator<Item = T>) -> Result<usize>
    where
        T: PartialEq,
    {
        self.edit(|l| Ok(l.remove_many(items)))
    }
    pub fn replace_at(&self, index: usize, item: T) -> Result<T> {
        self.edit(|l| l.replace_at(index, item))
    }
    pub fn replace(&self, original: &T, item: T) -> Result<()>
    where
        T: PartialEq,
    {
        self.edit(|l| l.replace(original, item))
    }
    pub fn move_item(&self, from: usize, to: usize) -> Result<()> {
        self.edit(|l| l.move_item(from, to))
    }
    pub fn clear(&self) -> Result<()> {
        self.edit(|l| {
            l.clear();
            Ok(())
        })
    }
    pub fn refresh_at(&self, index: usize) -> Result<()> {
        self.edit(|l| l.refresh_at(index))
    }
    pub fn edit_diff(&self, target: impl IntoIterator<Item = T>) -> Result<()>
    where
        T: Eq + Hash,
    {
        self.edit(|l| {
            l.edit_diff(target);
            Ok(())
        })
    }
    pub fn edit_diff_by(
        &self,
        target: impl IntoIterator<Item = T>,
        eq: impl Fn(&T, &T) -> bool,
    ) -> Result<()> {
        self.edit(|l| {
            l.edit_diff_by(target, eq);
            Ok(())
        })
    }
}

impl<T: Clone + 'static> Default for SourceList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> FromIterator<T> for SourceList<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().collect())
    }
}

impl<T: Clone + Serialize + 'static> Serialize for SourceList<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_seq(self.items())
    }
}
impl<'de, T: Clone + Deserialize<'de> + 'static> Deserialize<'de> for SourceList<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct SourceListVisitor<T>(PhantomData<fn(T)>);
        impl<'de, T: Clone + Deserialize<'de> + 'static> serde::de::Visitor<'de> for SourceListVisitor<T> {
            type Value = SourceList<T>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("sequence")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(value) = seq.next_element()? {
                    items.push(value)
                }
                Ok(SourceList::from_vec(items))
            }
        }
        deserializer.deserialize_seq(SourceListVisitor(PhantomData))
    }
}

fn rollback<T>(items: &mut Vec<T>, undo: Vec<Change<T>>) {
    for change in undo.into_iter().rev() {
        let r = change.apply_to(items);
        debug_assert!(r.is_ok(), "inverse of an applied change applies");
    }
}
fn added_count<T>(c: &Change<T>) -> usize {
    match c {
        Change::Add { .. } | Change::AddRange { .. } => c.item_count(),
        _ => 0,
    }
}
fn removed_count<T>(c: &Change<T>) -> usize {
    match c {
        Change::Remove { .. } | Change::RemoveRange { .. } | Change::Clear { .. } => c.item_count(),
        _ => 0,
    }
}

/// Mutable access to a [`SourceList`] during an edit session.
///
/// Reads observe the edits made so far in the session.
pub struct ListEditor<'a, T: 'static> {
    list: &'a RawSourceList<T>,
}

impl<T: Clone> SourceListData<T> {
    fn record(&mut self, change: Change<T>) {
        self.undo.extend(change.clone().inverse());
        self.log.push(change);
    }
}

impl<T: Clone + 'static> ListEditor<'_, T> {
    fn push(&mut self, change: Change<T>) -> Result<()> {
        let mut d = self.list.data.borrow_mut();
        change.clone().apply_to(&mut d.items)?;
        d.record(change);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.list.data.borrow().items.len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn get(&self, index: usize) -> Option<T> {
        self.list.data.borrow().items.get(index).cloned()
    }
    pub fn items(&self) -> Vec<T> {
        self.list.data.borrow().items.clone()
    }
    pub fn index_of(&self, item: &T) -> Option<usize>
    where
        T: PartialEq,
    {
        self.list.data.borrow().items.iter().position(|x| x == item)
    }
    pub fn contains(&self, item: &T) -> bool
    where
        T: PartialEq,
    {
        self.index_of(item).is_some()
    }

    pub fn add(&mut self, item: T) {
        let index = self.len();
        let mut d = self.list.data.borrow_mut();
        d.items.push(item.clone());
        d.record(Change::Add { item, index });
    }
    pub fn add_range(&mut self, items: impl IntoIterator<Item = T>) {
        let items: Vec<T> = items.into_iter().collect();
        if items.is_empty() {
            return;
        }
        let mut d = self.list.data.borrow_mut();
        let index = d.items.len();
        d.items.extend(items.iter().cloned());
        d.record(Change::AddRange { items, index });
    }
    pub fn insert(&mut self, index: usize, item: T) -> Result<()> {
        self.push(Change::Add { item, index })
    }
    pub fn insert_range(&mut self, index: usize, items: impl IntoIterator<Item = T>) -> Result<()> {
        let items: Vec<T> = items.into_iter().collect();
        Error::check_insert_index(index, self.len())?;
        if items.is_empty() {
            return Ok(());
        }
        self.push(Change::AddRange { items, index })
    }
    pub fn remove_at(&mut self, index: usize) -> Result<T> {
        let mut d = self.list.data.borrow_mut();
        Error::check_index(index, d.items.len())?;
        let item = d.items.remove(index);
        d.record(Change::Remove {
            item: item.clone(),
            index,
        });
        Ok(item)
    }
    pub fn remove_range(&mut self, index: usize, count: usize) -> Result<Vec<T>> {
        let mut d = self.list.data.borrow_mut();
        let len = d.items.len();
        Error::check_insert_index(index, len)?;
        if index + count > len {
            return Err(Error::OutOfRange {
                index: index + count,
                len,
            });
        }
        if count == 0 {
            return Ok(Vec::new());
        }
        let items: Vec<T> = d.items.drain(index..index + count).collect();
        d.record(Change::RemoveRange {
            items: items.clone(),
            index,
        });
        Ok(items)
    }
    pub fn remove(&mut self, item: &T) -> bool
    where
        T: PartialEq,
    {
        match self.index_of(item) {
            Some(index) => self.remove_at(index).is_ok(),
            None => false,
        }
    }
    pub fn remove_many(&mut self, items: impl IntoIterator<Item = T>) -> usize
    where
        T: PartialEq,
    {
        items.into_iter().filter(|item| self.remove(item)).count()
    }
    pub fn replace_at(&mut self, index: usize, item: T) -> Result<T> {
        let mut d = self.list.data.borrow_mut();
        Error::check_index(index, d.items.len())?;
        let previous = std::mem::replace(&mut d.items[index], item.clone());
        d.record(Change::Replace {
            item,
            previous: previous.clone(),
            index,
            previous_index: index,
        });
        Ok(previous)
    }
    pub fn replace(&mut self, original: &T, item: T) -> Result<()>
    where
        T: PartialEq,
    {
        let Some(index) = self.index_of(original) else {
            return Err(Error::InvalidArgument("the item to replace is not in the list".into()));
        };
        self.replace_at(index, item)?;
        Ok(())
    }
    pub fn move_item(&mut self, from: usize, to: usize) -> Result<()> {
        let len = self.len();
        Error::check_index(from, len)?;
        Error::check_index(to, len)?;
        if from == to {
            return Ok(());
        }
        let Some(item) = self.get(from) else {
            return Ok(());
        };
        self.push(Change::Move {
            item,
            index: to,
            previous_index: from,
        })
    }
    pub fn clear(&mut self) {
        let mut d = self.list.data.borrow_mut();
        if d.items.is_empty() {
            return;
        }
        let items = take(&mut d.items);
        d.record(Change::Clear { items });
    }
    /// Publishes a `Refresh` for the item at `index` without changing it.
    pub fn refresh_at(&mut self, index: usize) -> Result<()> {
        let mut d = self.list.data.borrow_mut();
        Error::check_index(index, d.items.len())?;
        let item = d.items[index].clone();
        d.record(Change::Refresh { item, index });
        Ok(())
    }
    /// Publishes a `Refresh` carrying `item`, which takes the place of the item at `index`.
    pub(crate) fn refresh_with(&mut self, index: usize, item: T) -> Result<()> {
        let mut d = self.list.data.borrow_mut();
        Error::check_index(index, d.items.len())?;
        let previous = std::mem::replace(&mut d.items[index], item.clone());
        d.undo.push(Change::Refresh {
            item: previous,
            index,
        });
        d.log.push(Change::Refresh { item, index });
        Ok(())
    }

    /// Makes the list hold exactly the distinct items of `target`.
    ///
    /// Items missing from `target` are removed; items of `target` missing from the list are
    /// appended in `target` order. Items present in both are left untouched.
    pub fn edit_diff(&mut self, target: impl IntoIterator<Item = T>)
    where
        T: Eq + Hash,
    {
        let target: Vec<T> = target.into_iter().collect();
        let wanted: HashSet<&T> = target.iter().collect();
        let stale: Vec<usize> = {
            let d = self.list.data.borrow();
            (0..d.items.len()).rev().filter(|&i| !wanted.contains(&d.items[i])).collect()
        };
        for index in stale {
            self.remove_at(index).ok();
        }
        let mut present: HashSet<T> = self.list.data.borrow().items.iter().cloned().collect();
        let adds: Vec<T> = target
            .iter()
            .filter(|x| present.insert((*x).clone()))
            .cloned()
            .collect();
        self.add_range(adds);
    }

    /// Like [`edit_diff`](Self::edit_diff), comparing items with `eq`.
    pub fn edit_diff_by(&mut self, target: impl IntoIterator<Item = T>, eq: impl Fn(&T, &T) -> bool) {
        let target: Vec<T> = target.into_iter().collect();
        let stale: Vec<usize> = {
            let d = self.list.data.borrow();
            (0..d.items.len())
                .rev()
                .filter(|&i| !target.iter().any(|t| eq(&d.items[i], t)))
                .collect()
        };
        for index in stale {
            self.remove_at(index).ok();
        }
        let mut adds: Vec<T> = Vec::new();
        for t in target {
            let exists = self.list.data.borrow().items.iter().any(|x| eq(x, &t));
            if !exists && !adds.iter().any(|x| eq(x, &t)) {
                adds.push(t);
            }
        }
        self.add_range(adds);
    }
}
