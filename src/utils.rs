use std::{
    collections::{HashMap, HashSet},
    mem::{replace, take},
};

use slabmap::SlabMap;

use crate::{Change, Error, Result};


/// A list whose items carry a stable key for as long as they stay in the list.
///
/// Operators mirror their upstream with this so that duplicate values are told apart by
/// identity rather than by equality.
pub(crate) struct KeyedList<T> {
    keys: Vec<usize>,
    values: SlabMap<T>,
}

/// One elementary effect of applying a [`Change`] to a [`KeyedList`].
#[derive(Debug, PartialEq)]
pub(crate) enum Edit<T> {
    Inserted { key: usize, index: usize },
    Removed { key: usize, index: usize, item: T },
    Replaced { key: usize, index: usize, previous: T },
    Moved { key: usize, from: usize, to: usize },
    Refreshed { key: usize, index: usize },
}

impl<T> KeyedList<T> {
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            values: SlabMap::new(),
        }
    }
    pub fn len(&self) -> usize {
        self.keys.len()
    }
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
    pub fn keys(&self) -> &[usize] {
        &self.keys
    }
    pub fn key_at(&self, index: usize) -> usize {
        self.keys[index]
    }
    pub fn get(&self, key: usize) -> &T {
        &self.values[key]
    }
    pub fn get_mut(&mut self, key: usize) -> &mut T {
        &mut self.values[key]
    }
    pub fn contains_key(&self, key: usize) -> bool {
        self.values.get(key).is_some()
    }
    pub fn position(&self, key: usize) -> Option<usize> {
        self.keys.iter().position(|&k| k == key)
    }
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.keys.iter().map(|&key| &self.values[key])
    }
    pub fn items(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.iter().cloned().collect()
    }

    pub fn insert(&mut self, index: usize, value: T) -> usize {
        let key = self.values.insert(value);
        self.keys.insert(index, key);
        key
    }
    pub fn push(&mut self, value: T) -> usize {
        self.insert(self.len(), value)
    }
    pub fn remove(&mut self, index: usize) -> (usize, T) {
        let key = self.keys.remove(index);
        let value = self.values.remove(key).expect("key of a listed item is live");
        (key, value)
    }
    pub fn move_item(&mut self, from: usize, to: usize) {
        let key = self.keys.remove(from);
        self.keys.insert(to, key);
    }
    pub fn clear(&mut self) -> Vec<(usize, T)> {
        let keys = take(&mut self.keys);
        let mut values = replace(&mut self.values, SlabMap::new());
        keys.into_iter()
            .filter_map(|key| Some((key, values.remove(key)?)))
            .collect()
    }

    /// Applies `change`, reporting every elementary effect to `f` in order.
    ///
    /// Range changes are split into single-item effects. `Clear` removes from the end.
    pub fn apply(&mut self, change: Change<T>, mut f: impl FnMut(&Self, Edit<T>)) -> Result<()> {
        match change {
            Change::Add { item, index } => {
                Error::check_insert_index(index, self.len())?;
                let key = self.insert(index, item);
                f(self, Edit::Inserted { key, index });
            }
            Change::AddRange { items, index } => {
                Error::check_insert_index(index, self.len())?;
                for (i, item) in items.into_iter().enumerate() {
                    let key = self.insert(index + i, item);
                    f(self, Edit::Inserted { key, index: index + i });
                }
            }
            Change::Remove { index, .. } => {
                Error::check_index(index, self.len())?;
                let (key, item) = self.remove(index);
                f(self, Edit::Removed { key, index, item });
            }
            Change::RemoveRange { items, index } => {
                let end = index + items.len();
                if end > self.len() {
                    return Err(Error::OutOfRange {
                        index: end,
                        len: self.len(),
                    });
                }
                for _ in 0..items.len() {
                    let (key, item) = self.remove(index);
                    f(self, Edit::Removed { key, index, item });
                }
            }
            Change::Clear { .. } => {
                while let Some(index) = self.len().checked_sub(1) {
                    let (key, item) = self.remove(index);
                    f(self, Edit::Removed { key, index, item });
                }
            }
            Change::Replace {
                item,
                index,
                previous_index,
                ..
            } => {
                Error::check_index(previous_index, self.len())?;
                Error::check_index(index, self.len())?;
                let key = self.keys[previous_index];
                let previous = replace(&mut self.values[key], item);
                if index != previous_index {
                    self.move_item(previous_index, index);
                }
                f(
                    self,
                    Edit::Replaced {
                        key,
                        index,
                        previous,
                    },
                );
            }
            Change::Move {
                index,
                previous_index,
                ..
            } => {
                Error::check_index(previous_index, self.len())?;
                Error::check_index(index, self.len())?;
                let key = self.keys[previous_index];
                self.move_item(previous_index, index);
                f(
                    self,
                    Edit::Moved {
                        key,
                        from: previous_index,
                        to: index,
                    },
                );
            }
            Change::Refresh { item, index } => {
                Error::check_index(index, self.len())?;
                let key = self.keys[index];
                self.values[key] = item;
                f(self, Edit::Refreshed { key, index });
            }
        }
        Ok(())
    }
}

/// Marks the members of one longest strictly increasing subsequence of `seq`.
pub(crate) fn longest_increasing_subsequence(seq: &[usize]) -> Vec<bool> {
    let mut tails: Vec<usize> = Vec::new();
    let mut prev = vec![usize::MAX; seq.len()];
    for (i, &x) in seq.iter().enumerate() {
        let pos = tails.partition_point(|&t| seq[t] < x);
        if pos > 0 {
            prev[i] = tails[pos - 1];
        }
        if pos == tails.len() {
            tails.push(i);
        } else {
            tails[pos] = i;
        }
    }
    let mut mask = vec![false; seq.len()];
    let mut i = tails.last().copied().unwrap_or(usize::MAX);
    while i != usize::MAX {
        mask[i] = true;
        i = prev[i];
    }
    mask
}

/// Reorders `working` into `target` (same keys, different order) with as few moves as
/// possible, pushing one `Move` per relocated item.
pub(crate) fn reorder<T>(
    working: &mut Vec<usize>,
    target: &[usize],
    value: impl Fn(usize) -> T,
    changes: &mut Vec<Change<T>>,
) {
    let target_index: HashMap<usize, usize> =
        target.iter().enumerate().map(|(i, &k)| (k, i)).collect();
    let seq: Vec<usize> = working
        .iter()
        .map(|k| target_index.get(k).copied().unwrap_or(usize::MAX))
        .collect();
    let stable: HashSet<usize> = longest_increasing_subsequence(&seq)
        .into_iter()
        .zip(working.iter())
        .filter(|(is_stable, _)| *is_stable)
        .map(|(_, &k)| k)
        .collect();

    for (t, &key) in target.iter().enumerate() {
        if stable.contains(&key) {
            continue;
        }
        let Some(from) = working.iter().position(|&k| k == key) else {
            continue;
        };
        working.remove(from);
        let to = if t == 0 {
            0
        } else {
            match working.iter().position(|&k| k == target[t - 1]) {
                Some(p) => p + 1,
                None => t.min(working.len()),
            }
        };
        working.insert(to, key);
        if from != to {
            changes.push(Change::Move {
                item: value(key),
                index: to,
                previous_index: from,
            });
        }
    }
}

/// Computes the changes turning the keyed sequence `old` into `new`: removes (from the back),
/// then moves among the items kept, then adds in ascending index order.
///
/// `old_value` resolves keys that are only in `old`; `new_value` resolves every key in `new`.
pub(crate) fn reconcile<T>(
    old: &[usize],
    new: &[usize],
    old_value: impl Fn(usize) -> T,
    new_value: impl Fn(usize) -> T,
) -> Vec<Change<T>> {
    let old_set: HashSet<usize> = old.iter().copied().collect();
    let new_set: HashSet<usize> = new.iter().copied().collect();
    let mut changes = Vec::new();
    let mut working = old.to_vec();
    for index in (0..working.len()).rev() {
        if !new_set.contains(&working[index]) {
            let key = working.remove(index);
            changes.push(Change::Remove {
                item: old_value(key),
                index,
            });
        }
    }
    let kept: Vec<usize> = new.iter().copied().filter(|k| old_set.contains(k)).collect();
    reorder(&mut working, &kept, &new_value, &mut changes);
    for (index, &key) in new.iter().enumerate() {
        if !old_set.contains(&key) {
            working.insert(index, key);
            changes.push(Change::Add {
                item: new_value(key),
                index,
            });
        }
    }
    changes
}
