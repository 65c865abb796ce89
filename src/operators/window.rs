use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    mem::take,
    rc::Rc,
};

use crate::{
    utils::{reconcile, Edit, KeyedList},
    Change, ChangeSet, Error, Notification, Observable, Observer, Result, Subscription,
};

use super::{emit, EmitGate};


/// A window given by its first index and its length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VirtualRequest {
    pub start: usize,
    pub size: usize,
}

impl VirtualRequest {
    pub fn new(start: usize, size: usize) -> Self {
        Self { start, size }
    }
}

/// A window given by a page number, starting at 1, and a page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRequest {
    pub page: usize,
    pub size: usize,
}

impl PageRequest {
    pub fn new(page: usize, size: usize) -> Self {
        Self { page, size }
    }
}

impl From<PageRequest> for VirtualRequest {
    fn from(value: PageRequest) -> Self {
        let page = value.page.max(1);
        VirtualRequest {
            start: (page - 1) * value.size,
            size: value.size,
        }
    }
}

impl<T: Clone + 'static> Observable<ChangeSet<T>> {
    /// Keeps the slice of the items selected by the latest request.
    ///
    /// The window is empty until the first request arrives. A window past the end of the items
    /// is empty.
    pub fn virtualise(&self, requests: Observable<VirtualRequest>) -> Self {
        window(self.clone(), requests)
    }

    /// Keeps the page selected by the latest request. Page 0 is treated as page 1.
    pub fn page(&self, requests: Observable<PageRequest>) -> Self {
        window(self.clone(), requests.map(VirtualRequest::from))
    }

    /// Keeps the first `count` items.
    pub fn top(&self, count: usize) -> Result<Self> {
        if count == 0 {
            return Err(Error::InvalidArgument("top requires a positive count".into()));
        }
        Ok(self.virtualise(Observable::of(VirtualRequest::new(0, count))))
    }
}

fn window<T: Clone + 'static>(
    source: Observable<ChangeSet<T>>,
    requests: Observable<VirtualRequest>,
) -> Observable<ChangeSet<T>> {
    Observable::new(move |o| {
        let window = Rc::new(RefCell::new(Window::new()));
        let s_requests = requests.subscribe(Observer::new({
            let window = window.clone();
            let o = o.clone();
            move |n| match n {
                Notification::Next(request) => {
                    let out = window.borrow_mut().set_request(request);
                    emit(&o, Ok(out))
                }
                Notification::Error(e) => o.error(e),
                Notification::Completed => {}
            }
        }));
        let s_source = source.subscribe(Observer::new(move |n| match n {
            Notification::Next(changes) => {
                let out = window.borrow_mut().process(changes);
                emit(&o, out)
            }
            Notification::Error(e) => o.error(e),
            Notification::Completed => o.completed(),
        }));
        Subscription::from_vec(vec![s_source, s_requests])
    })
}

struct Window<T> {
    mirror: KeyedList<T>,
    ids: HashMap<usize, usize>,
    next_id: usize,
    request: Option<VirtualRequest>,
    visible: Vec<(usize, T)>,
    has_upstream: bool,
    gate: EmitGate,
}

impl<T: Clone> Window<T> {
    fn new() -> Self {
        Self {
            mirror: KeyedList::new(),
            ids: HashMap::new(),
            next_id: 0,
            request: None,
            visible: Vec::new(),
            has_upstream: false,
            gate: EmitGate::default(),
        }
    }

    fn set_request(&mut self, request: VirtualRequest) -> Option<ChangeSet<T>> {
        self.request = Some(request);
        if !self.has_upstream {
            return None;
        }
        let out = self.recompute(&HashSet::new(), &HashSet::new());
        self.gate.pass(out)
    }

    fn process(&mut self, changes: ChangeSet<T>) -> Result<Option<ChangeSet<T>>> {
        self.has_upstream = true;
        let mut replaced = HashSet::new();
        let mut refreshed = HashSet::new();
        let Self {
            mirror,
            ids,
            next_id,
            ..
        } = self;
        for change in changes {
            mirror.apply(change, |_, edit| match edit {
                Edit::Inserted { key, .. } => {
                    ids.insert(key, *next_id);
                    *next_id += 1;
                }
                Edit::Removed { key, .. } => {
                    ids.remove(&key);
                }
                Edit::Replaced { key, .. } => {
                    replaced.insert(ids[&key]);
                }
                Edit::Refreshed { key, .. } => {
                    refreshed.insert(ids[&key]);
                }
                Edit::Moved { .. } => {}
            })?;
        }
        let out = self.recompute(&replaced, &refreshed);
        Ok(self.gate.pass(out))
    }

    fn recompute(&mut self, replaced: &HashSet<usize>, refreshed: &HashSet<usize>) -> ChangeSet<T> {
        let slice: Vec<usize> = match self.request {
            Some(r) => self.mirror.keys().iter().skip(r.start).take(r.size).copied().collect(),
            None => Vec::new(),
        };
        let new: Vec<(usize, T)> = slice
            .iter()
            .map(|&key| (self.ids[&key], self.mirror.get(key).clone()))
            .collect();
        let old = take(&mut self.visible);
        let old_values: HashMap<usize, &T> = old.iter().map(|(id, x)| (*id, x)).collect();
        let new_values: HashMap<usize, &T> = new.iter().map(|(id, x)| (*id, x)).collect();
        let old_ids: Vec<usize> = old.iter().map(|(id, _)| *id).collect();
        let new_ids: Vec<usize> = new.iter().map(|(id, _)| *id).collect();

        let mut out: ChangeSet<T> = reconcile(
            &old_ids,
            &new_ids,
            |id| old_values[&id].clone(),
            |id| new_values[&id].clone(),
        )
        .into();
        for (index, (id, item)) in new.iter().enumerate() {
            let Some(previous) = old_values.get(id) else {
                continue;
            };
            if replaced.contains(id) {
                out.push(Change::Replace {
                    item: item.clone(),
                    previous: (*previous).clone(),
                    index,
                    previous_index: index,
                });
            } else if refreshed.contains(id) {
                out.push(Change::Refresh {
                    item: item.clone(),
                    index,
                });
            }
        }
        if !out.is_empty() {
            log::trace!("window: {} changes", out.len());
        }
        self.visible = new;
        out
    }
}
