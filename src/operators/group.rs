use std::{
    cell::RefCell,
    collections::{hash_map::Entry, HashMap},
    fmt,
    hash::Hash,
    rc::Rc,
};

use derive_ex::derive_ex;

use crate::{
    utils::{Edit, KeyedList},
    ChangeSet, Change, Notification, Observable, Observer, Result, SourceList, Subscription,
};

use super::EmitGate;


/// A live group of items sharing a key.
///
/// The group's list is updated before the change-set announcing the group is emitted, so a
/// subscriber connecting on arrival sees the members. A group is removed as soon as it becomes
/// empty, and its change-set stream completes.
#[derive_ex(Clone(bound()))]
pub struct Group<T: 'static, K: 'static>(Rc<RawGroup<T, K>>);

struct RawGroup<T: 'static, K> {
    key: K,
    list: SourceList<T>,
}

impl<T: Clone + 'static, K> Group<T, K> {
    fn new(key: K) -> Self {
        Self(Rc::new(RawGroup {
            key,
            list: SourceList::new(),
        }))
    }
    pub fn key(&self) -> &K {
        &self.0.key
    }
    pub fn connect(&self) -> Observable<ChangeSet<T>> {
        self.0.list.connect()
    }
    pub fn items(&self) -> Vec<T> {
        self.0.list.items()
    }
    pub fn len(&self) -> usize {
        self.0.list.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.list.is_empty()
    }
    pub fn count_changed(&self) -> Observable<usize> {
        self.0.list.count_changed()
    }

    fn apply(&self, ops: Vec<InnerOp<T>>) -> Result<()> {
        self.0.list.edit(|l| {
            for op in ops {
                match op {
                    InnerOp::Add(item) => l.add(item),
                    InnerOp::RemoveAt(index) => {
                        l.remove_at(index)?;
                    }
                    InnerOp::ReplaceAt(index, item) => {
                        l.replace_at(index, item)?;
                    }
                    InnerOp::RefreshAt(index, item) => l.refresh_with(index, item)?,
                }
            }
            Ok(())
        })
    }
}
impl<T: 'static, K: 'static> PartialEq for Group<T, K> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
impl<T: 'static, K: fmt::Debug + 'static> fmt::Debug for Group<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("key", &self.0.key)
            .finish_non_exhaustive()
    }
}

/// The members of a group at the time a change-set was emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSnapshot<T, K> {
    pub key: K,
    pub items: Vec<T>,
}

impl<T: Clone + 'static> Observable<ChangeSet<T>> {
    /// Partitions the items by `selector` into live groups.
    pub fn group_on<K>(&self, selector: impl Fn(&T) -> K + 'static) -> Observable<ChangeSet<Group<T, K>>>
    where
        K: Eq + Hash + Clone + 'static,
    {
        self.group_on_with(selector, Observable::never())
    }

    /// Like [`group_on`](Self::group_on), evaluating the key of every item again when `regroup`
    /// emits.
    pub fn group_on_with<K>(
        &self,
        selector: impl Fn(&T) -> K + 'static,
        regroup: Observable<()>,
    ) -> Observable<ChangeSet<Group<T, K>>>
    where
        K: Eq + Hash + Clone + 'static,
    {
        group(self.clone(), Rc::new(selector), regroup, LiveGroups::new)
    }

    /// Partitions the items by `selector`, emitting a new snapshot of every group that changed.
    pub fn group_with_immutable_state<K>(
        &self,
        selector: impl Fn(&T) -> K + 'static,
    ) -> Observable<ChangeSet<GroupSnapshot<T, K>>>
    where
        K: Eq + Hash + Clone + 'static,
    {
        group(self.clone(), Rc::new(selector), Observable::never(), Snapshots::new)
    }
}

fn group<T, K, V>(
    source: Observable<ChangeSet<T>>,
    selector: Rc<dyn Fn(&T) -> K>,
    regroup: Observable<()>,
    view: fn() -> V,
) -> Observable<ChangeSet<V::Item>>
where
    T: Clone + 'static,
    K: Eq + Hash + Clone + 'static,
    V: GroupView<T, K> + 'static,
{
    Observable::new(move |o| {
        let state = Rc::new(RefCell::new((Grouper::new(selector.clone()), view())));
        let s_regroup = regroup.subscribe(Observer::new({
            let state = state.clone();
            let o = o.clone();
            move |n| match n {
                Notification::Next(()) => {
                    let step = {
                        let mut state = state.borrow_mut();
                        let (grouper, view) = &mut *state;
                        let pending = grouper.regroup();
                        view.step(grouper, pending)
                    };
                    step.run(&o)
                }
                Notification::Error(e) => o.error(e),
                Notification::Completed => {}
            }
        }));
        let s_source = source.subscribe(Observer::new(move |n| match n {
            Notification::Next(changes) => {
                let step = {
                    let mut state = state.borrow_mut();
                    let (grouper, view) = &mut *state;
                    grouper.process(changes).map(|pending| view.step(grouper, pending))
                };
                match step {
                    Ok(step) => step.run(&o),
                    Err(e) => o.error(e),
                }
            }
            Notification::Error(e) => o.error(e),
            Notification::Completed => o.completed(),
        }));
        Subscription::from_vec(vec![s_source, s_regroup])
    })
}

enum InnerOp<T> {
    Add(T),
    RemoveAt(usize),
    ReplaceAt(usize, T),
    RefreshAt(usize, T),
}

enum Update {
    Replace,
    Refresh,
    Regroup,
}

enum Member<T> {
    Added(usize, T),
    Removed(usize),
    Updated(usize, T, Update),
}

/// Group operations produced by one upstream change-set, by group in order of first touch.
struct Pending<T, K> {
    touched: Vec<K>,
    ops: HashMap<K, Vec<InnerOp<T>>>,
}

impl<T, K: Eq + Hash + Clone> Pending<T, K> {
    fn new() -> Self {
        Self {
            touched: Vec::new(),
            ops: HashMap::new(),
        }
    }
    fn push(&mut self, key: &K, op: InnerOp<T>) {
        let ops = match self.ops.entry(key.clone()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                self.touched.push(key.clone());
                e.insert(Vec::new())
            }
        };
        ops.push(op);
    }
}

/// How the emitted group list changed: `removed` indices apply first, `changed` indices are
/// valid after the removals, `added` indices after that.
struct Settled<K> {
    removed: Vec<(usize, K)>,
    discarded: Vec<K>,
    changed: Vec<(usize, K)>,
    added: Vec<(usize, K)>,
}

/// Item to group assignment shared by every grouping variant.
struct Grouper<T, K> {
    selector: Rc<dyn Fn(&T) -> K>,
    mirror: KeyedList<T>,
    item_groups: HashMap<usize, K>,
    members: HashMap<K, Vec<usize>>,
    order: Vec<K>,
}

impl<T: Clone, K: Eq + Hash + Clone> Grouper<T, K> {
    fn new(selector: Rc<dyn Fn(&T) -> K>) -> Self {
        Self {
            selector,
            mirror: KeyedList::new(),
            item_groups: HashMap::new(),
            members: HashMap::new(),
            order: Vec::new(),
        }
    }

    fn process(&mut self, changes: ChangeSet<T>) -> Result<Pending<T, K>> {
        let mut events = Vec::new();
        for change in changes {
            self.mirror.apply(change, |m, edit| match edit {
                Edit::Inserted { key, .. } => events.push(Member::Added(key, m.get(key).clone())),
                Edit::Removed { key, .. } => events.push(Member::Removed(key)),
                Edit::Replaced { key, .. } => {
                    events.push(Member::Updated(key, m.get(key).clone(), Update::Replace))
                }
                Edit::Refreshed { key, .. } => {
                    events.push(Member::Updated(key, m.get(key).clone(), Update::Refresh))
                }
                Edit::Moved { .. } => {}
            })?;
        }
        let mut pending = Pending::new();
        for event in events {
            self.handle(event, &mut pending);
        }
        Ok(pending)
    }

    fn regroup(&mut self) -> Pending<T, K> {
        let mut pending = Pending::new();
        let keys = self.mirror.keys().to_vec();
        for key in keys {
            let item = self.mirror.get(key).clone();
            self.handle(Member::Updated(key, item, Update::Regroup), &mut pending);
        }
        pending
    }

    fn handle(&mut self, event: Member<T>, pending: &mut Pending<T, K>) {
        match event {
            Member::Added(key, item) => {
                let group = (self.selector)(&item);
                self.join(key, &group);
                pending.push(&group, InnerOp::Add(item));
            }
            Member::Removed(key) => {
                if let Some(group) = self.item_groups.remove(&key) {
                    if let Some(index) = self.leave(key, &group) {
                        pending.push(&group, InnerOp::RemoveAt(index));
                    }
                }
            }
            Member::Updated(key, item, update) => {
                let group = (self.selector)(&item);
                let Some(old) = self.item_groups.get(&key).cloned() else {
                    return;
                };
                if old == group {
                    let Some(index) = self.index_in(key, &group) else {
                        return;
                    };
                    match update {
                        Update::Replace => pending.push(&group, InnerOp::ReplaceAt(index, item)),
                        Update::Refresh => pending.push(&group, InnerOp::RefreshAt(index, item)),
                        Update::Regroup => {}
                    }
                    return;
                }
                if let Some(index) = self.leave(key, &old) {
                    pending.push(&old, InnerOp::RemoveAt(index));
                }
                self.join(key, &group);
                pending.push(&group, InnerOp::Add(item));
            }
        }
    }

    fn join(&mut self, key: usize, group: &K) {
        self.item_groups.insert(key, group.clone());
        self.members.entry(group.clone()).or_default().push(key);
    }
    fn leave(&mut self, key: usize, group: &K) -> Option<usize> {
        let members = self.members.get_mut(group)?;
        let index = members.iter().position(|&k| k == key)?;
        members.remove(index);
        Some(index)
    }
    fn index_in(&self, key: usize, group: &K) -> Option<usize> {
        self.members.get(group)?.iter().position(|&k| k == key)
    }

    fn items_of(&self, group: &K) -> Vec<T> {
        self.members
            .get(group)
            .map(|keys| keys.iter().map(|&k| self.mirror.get(k).clone()).collect())
            .unwrap_or_default()
    }

    /// Drops the groups `touched` emptied and appends the groups it created to the emitted order.
    fn settle(&mut self, touched: &[K]) -> Settled<K> {
        let mut removed = Vec::new();
        let mut discarded = Vec::new();
        for group in touched {
            if self.members.get(group).is_some_and(|m| !m.is_empty()) {
                continue;
            }
            self.members.remove(group);
            match self.order.iter().position(|g| g == group) {
                Some(index) => {
                    self.order.remove(index);
                    removed.push((index, group.clone()));
                }
                None => discarded.push(group.clone()),
            }
        }
        let mut changed = Vec::new();
        let mut added = Vec::new();
        for group in touched {
            if !self.members.contains_key(group) {
                continue;
            }
            match self.order.iter().position(|g| g == group) {
                Some(index) => changed.push((index, group.clone())),
                None => added.push(group.clone()),
            }
        }
        let added = added
            .into_iter()
            .map(|group| {
                self.order.push(group.clone());
                (self.order.len() - 1, group)
            })
            .collect();
        if !removed.is_empty() || !discarded.is_empty() {
            log::trace!("grouping: {} groups removed", removed.len() + discarded.len());
        }
        Settled {
            removed,
            discarded,
            changed,
            added,
        }
    }
}

/// Work left after the grouping state has been updated: inner edits, disposals and the outer
/// change-set, performed in that order.
struct Step<T: 'static, K: 'static, U> {
    edits: Vec<(Group<T, K>, Vec<InnerOp<T>>)>,
    disposed: Vec<Group<T, K>>,
    out: Option<ChangeSet<U>>,
}

impl<T: Clone + 'static, K: 'static, U: 'static> Step<T, K, U> {
    fn run(self, o: &Observer<ChangeSet<U>>) {
        for (group, ops) in self.edits {
            if let Err(e) = group.apply(ops) {
                o.error(e);
                return;
            }
        }
        for group in self.disposed {
            group.0.list.dispose();
        }
        if let Some(out) = self.out {
            o.next(out);
        }
    }
}

/// Turns grouping updates into the emitted representation of groups.
trait GroupView<T: 'static, K: 'static> {
    type Item: 'static;

    fn step(&mut self, grouper: &mut Grouper<T, K>, pending: Pending<T, K>) -> Step<T, K, Self::Item>;
}

struct LiveGroups<T: 'static, K: 'static> {
    groups: HashMap<K, Group<T, K>>,
    gate: EmitGate,
}

impl<T: 'static, K: 'static> LiveGroups<T, K> {
    fn new() -> Self {
        Self {
            groups: HashMap::new(),
            gate: EmitGate::default(),
        }
    }
}

impl<T: Clone + 'static, K: Eq + Hash + Clone + 'static> GroupView<T, K> for LiveGroups<T, K> {
    type Item = Group<T, K>;

    fn step(&mut self, grouper: &mut Grouper<T, K>, mut pending: Pending<T, K>) -> Step<T, K, Group<T, K>> {
        let mut edits = Vec::new();
        for key in &pending.touched {
            let ops = pending.ops.remove(key).unwrap_or_default();
            let group = self
                .groups
                .entry(key.clone())
                .or_insert_with(|| Group::new(key.clone()));
            edits.push((group.clone(), ops));
        }
        let settled = grouper.settle(&pending.touched);
        let mut disposed = Vec::new();
        let mut out = ChangeSet::new();
        for (index, key) in settled.removed {
            if let Some(group) = self.groups.remove(&key) {
                disposed.push(group.clone());
                out.push(Change::Remove { item: group, index });
            }
        }
        for key in settled.discarded {
            disposed.extend(self.groups.remove(&key));
        }
        for (index, key) in settled.added {
            if let Some(group) = self.groups.get(&key) {
                out.push(Change::Add {
                    item: group.clone(),
                    index,
                });
            }
        }
        Step {
            edits,
            disposed,
            out: self.gate.pass(out),
        }
    }
}

struct Snapshots<T, K> {
    emitted: HashMap<K, GroupSnapshot<T, K>>,
    gate: EmitGate,
}

impl<T, K> Snapshots<T, K> {
    fn new() -> Self {
        Self {
            emitted: HashMap::new(),
            gate: EmitGate::default(),
        }
    }
}

impl<T: Clone + 'static, K: Eq + Hash + Clone + 'static> GroupView<T, K> for Snapshots<T, K> {
    type Item = GroupSnapshot<T, K>;

    fn step(&mut self, grouper: &mut Grouper<T, K>, pending: Pending<T, K>) -> Step<T, K, Self::Item> {
        let settled = grouper.settle(&pending.touched);
        let mut out = ChangeSet::new();
        for (index, key) in settled.removed {
            if let Some(item) = self.emitted.remove(&key) {
                out.push(Change::Remove { item, index });
            }
        }
        for (index, key) in settled.changed {
            let item = GroupSnapshot {
                items: grouper.items_of(&key),
                key: key.clone(),
            };
            if let Some(previous) = self.emitted.insert(key, item.clone()) {
                out.push(Change::Replace {
                    item,
                    previous,
                    index,
                    previous_index: index,
                });
            }
        }
        for (index, key) in settled.added {
            let item = GroupSnapshot {
                items: grouper.items_of(&key),
                key: key.clone(),
            };
            self.emitted.insert(key, item.clone());
            out.push(Change::Add { item, index });
        }
        Step {
            edits: Vec::new(),
            disposed: Vec::new(),
            out: self.gate.pass(out),
        }
    }
}
