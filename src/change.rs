use std::{
    ops::Index,
    slice,
    vec,
};

use derive_ex::derive_ex;
use parse_display::Display;

use crate::{Error, Result};

#[cfg(test)]
mod tests;

/// The kind of mutation a [`Change`] describes.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeReason {
    Add,
    Remove,
    Replace,
    Move,
    Refresh,
    AddRange,
    RemoveRange,
    Clear,
}

/// A single mutation of a list.
///
/// Indices are valid only against the list state produced by every change that precedes this
/// one in the same [`ChangeSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change<T> {
    Add {
        item: T,
        index: usize,
    },
    Remove {
        item: T,
        index: usize,
    },
    /// `previous` at `previous_index` is removed and `item` is inserted at `index`.
    Replace {
        item: T,
        previous: T,
        index: usize,
        previous_index: usize,
    },
    /// `item` is removed from `previous_index` and inserted again at `index`.
    Move {
        item: T,
        index: usize,
        previous_index: usize,
    },
    Refresh {
        item: T,
        index: usize,
    },
    AddRange {
        items: Vec<T>,
        index: usize,
    },
    RemoveRange {
        items: Vec<T>,
        index: usize,
    },
    /// Removes every item. `items` holds the removed items in list order.
    Clear {
        items: Vec<T>,
    },
}

impl<T> Change<T> {
    pub fn reason(&self) -> ChangeReason {
        match self {
            Change::Add { .. } => ChangeReason::Add,
            Change::Remove { .. } => ChangeReason::Remove,
            Change::Replace { .. } => ChangeReason::Replace,
            Change::Move { .. } => ChangeReason::Move,
            Change::Refresh { .. } => ChangeReason::Refresh,
            Change::AddRange { .. } => ChangeReason::AddRange,
            Change::RemoveRange { .. } => ChangeReason::RemoveRange,
            Change::Clear { .. } => ChangeReason::Clear,
        }
    }

    /// The index the change applies to. `Clear` starts at zero.
    pub fn index(&self) -> usize {
        match self {
            Change::Add { index, .. }
            | Change::Remove { index, .. }
            | Change::Replace { index, .. }
            | Change::Move { index, .. }
            | Change::Refresh { index, .. }
            | Change::AddRange { index, .. }
            | Change::RemoveRange { index, .. } => *index,
            Change::Clear { .. } => 0,
        }
    }

    /// Iterates the current items carried by the change (not the previous item of a `Replace`).
    pub fn items(&self) -> impl Iterator<Item = &T> + '_ {
        use iter_n::iter2::*;
        match self {
            Change::Add { item, .. }
            | Change::Remove { item, .. }
            | Change::Replace { item, .. }
            | Change::Move { item, .. }
            | Change::Refresh { item, .. } => Some(item).into_iter().into_iter0(),
            Change::AddRange { items, .. }
            | Change::RemoveRange { items, .. }
            | Change::Clear { items } => items.iter().into_iter1(),
        }
    }

    /// Number of items this change accounts for.
    pub fn item_count(&self) -> usize {
        match self {
            Change::AddRange { items, .. }
            | Change::RemoveRange { items, .. }
            | Change::Clear { items } => items.len(),
            _ => 1,
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> Change<U> {
        match self {
            Change::Add { item, index } => Change::Add {
                item: f(item),
                index,
            },
            Change::Remove { item, index } => Change::Remove {
                item: f(item),
                index,
            },
            Change::Replace {
                item,
                previous,
                index,
                previous_index,
            } => Change::Replace {
                item: f(item),
                previous: f(previous),
                index,
                previous_index,
            },
            Change::Move {
                item,
                index,
                previous_index,
            } => Change::Move {
                item: f(item),
                index,
                previous_index,
            },
            Change::Refresh { item, index } => Change::Refresh {
                item: f(item),
                index,
            },
            Change::AddRange { items, index } => Change::AddRange {
                items: items.into_iter().map(f).collect(),
                index,
            },
            Change::RemoveRange { items, index } => Change::RemoveRange {
                items: items.into_iter().map(f).collect(),
                index,
            },
            Change::Clear { items } => Change::Clear {
                items: items.into_iter().map(f).collect(),
            },
        }
    }

    /// The change that undoes this one. `Refresh` carries no previous value and has none.
    pub(crate) fn inverse(self) -> Option<Change<T>> {
        Some(match self {
            Change::Add { item, index } => Change::Remove { item, index },
            Change::Remove { item, index } => Change::Add { item, index },
            Change::Replace {
                item,
                previous,
                index,
                previous_index,
            } => Change::Replace {
                item: previous,
                previous: item,
                index: previous_index,
                previous_index: index,
            },
            Change::Move {
                item,
                index,
                previous_index,
            } => Change::Move {
                item,
                index: previous_index,
                previous_index: index,
            },
            Change::Refresh { .. } => return None,
            Change::AddRange { items, index } => Change::RemoveRange { items, index },
            Change::RemoveRange { items, index } => Change::AddRange { items, index },
            Change::Clear { items } => Change::AddRange { items, index: 0 },
        })
    }

    /// Applies the change to `items`.
    ///
    /// Fails with [`Error::OutOfRange`] without modifying `items` if an index is invalid.
    pub fn apply_to(self, items: &mut Vec<T>) -> Result<()> {
        let len = items.len();
        match self {
            Change::Add { item, index } => {
                Error::check_insert_index(index, len)?;
                items.insert(index, item);
            }
            Change::Remove { index, .. } => {
                Error::check_index(index, len)?;
                items.remove(index);
            }
            Change::Replace {
                item,
                index,
                previous_index,
                ..
            } => {
                Error::check_index(previous_index, len)?;
                if index == previous_index {
                    items[index] = item;
                } else {
                    Error::check_index(index, len)?;
                    items.remove(previous_index);
                    items.insert(index, item);
                }
            }
            Change::Move {
                index,
                previous_index,
                ..
            } => {
                Error::check_index(previous_index, len)?;
                Error::check_index(index, len)?;
                let item = items.remove(previous_index);
                items.insert(index, item);
            }
            Change::Refresh { item, index } => {
                Error::check_index(index, len)?;
                items[index] = item;
            }
            Change::AddRange {
                items: new_items,
                index,
            } => {
                Error::check_insert_index(index, len)?;
                items.splice(index..index, new_items);
            }
            Change::RemoveRange {
                items: old_items,
                index,
            } => {
                let end = index + old_items.len();
                if end > len {
                    return Err(Error::OutOfRange { index: end, len });
                }
                items.drain(index..end);
            }
            Change::Clear { .. } => items.clear(),
        }
        Ok(())
    }
}

/// An ordered batch of [`Change`]s describing one logical update.
#[derive(Debug, Clone, PartialEq, Eq)]
#[derive_ex(Default)]
#[default(Self::new())]
pub struct ChangeSet<T>(Vec<Change<T>>);

impl<T> ChangeSet<T> {
    pub fn new() -> Self {
        Self(Vec::new())
    }
    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    /// A change-set describing `items` as the whole current state: a single `AddRange`, or no
    /// change at all if `items` is empty.
    pub fn initial(items: Vec<T>) -> Self {
        let mut this = Self::new();
        if !items.is_empty() {
            this.push(Change::AddRange { items, index: 0 });
        }
        this
    }

    pub fn push(&mut self, change: Change<T>) {
        self.0.push(change);
    }

    /// Number of [`Change`] entries (a range counts once).
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn iter(&self) -> slice::Iter<'_, Change<T>> {
        self.0.iter()
    }
    pub fn as_slice(&self) -> &[Change<T>] {
        &self.0
    }

    /// Items added by `Add` and `AddRange`.
    pub fn adds(&self) -> usize {
        self.count(|c| matches!(c, Change::Add { .. } | Change::AddRange { .. }))
    }
    /// Items removed by `Remove`, `RemoveRange` and `Clear`.
    pub fn removes(&self) -> usize {
        self.count(|c| {
            matches!(
                c,
                Change::Remove { .. } | Change::RemoveRange { .. } | Change::Clear { .. }
            )
        })
    }
    pub fn replaced(&self) -> usize {
        self.count(|c| matches!(c, Change::Replace { .. }))
    }
    pub fn moves(&self) -> usize {
        self.count(|c| matches!(c, Change::Move { .. }))
    }
    pub fn refreshes(&self) -> usize {
        self.count(|c| matches!(c, Change::Refresh { .. }))
    }
    /// Sum of every per-kind item count.
    pub fn total_changes(&self) -> usize {
        self.0.iter().map(Change::item_count).sum()
    }
    fn count(&self, f: impl Fn(&Change<T>) -> bool) -> usize {
        self.0
            .iter()
            .filter(|c| f(c))
            .map(Change::item_count)
            .sum()
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> ChangeSet<U> {
        ChangeSet(self.0.into_iter().map(|c| c.map(&mut f)).collect())
    }

    /// Replays every change in order onto `items`.
    ///
    /// Changes preceding a failing change stay applied.
    pub fn apply_to(self, items: &mut Vec<T>) -> Result<()> {
        for change in self.0 {
            change.apply_to(items)?;
        }
        Ok(())
    }
}

impl<T> Index<usize> for ChangeSet<T> {
    type Output = Change<T>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}
impl<T> IntoIterator for ChangeSet<T> {
    type Item = Change<T>;
    type IntoIter = vec::IntoIter<Change<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
impl<'a, T> IntoIterator for &'a ChangeSet<T> {
    type Item = &'a Change<T>;
    type IntoIter = slice::Iter<'a, Change<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
impl<T> FromIterator<Change<T>> for ChangeSet<T> {
    fn from_iter<I: IntoIterator<Item = Change<T>>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
impl<T> Extend<Change<T>> for ChangeSet<T> {
    fn extend<I: IntoIterator<Item = Change<T>>>(&mut self, iter: I) {
        self.0.extend(iter)
    }
}
impl<T> From<Vec<Change<T>>> for ChangeSet<T> {
    fn from(value: Vec<Change<T>>) -> Self {
        Self(value)
    }
}
