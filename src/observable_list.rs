use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use derive_ex::derive_ex;

use crate::{ChangeSet, Notification, Observable, Observer, Subject, Subscription};

#[cfg(test)]
mod tests;

/// A read-only list kept in sync with a change-set stream.
///
/// Subscribers connecting late receive the current contents first, the same way they would
/// from a [`SourceList`](crate::SourceList).
#[derive_ex(Clone(bound()))]
pub struct ObservableList<T: 'static>(Rc<RawObservableList<T>>);

struct RawObservableList<T: 'static> {
    items: RefCell<Vec<T>>,
    changes: Subject<ChangeSet<T>>,
    upstream: RefCell<Option<Subscription>>,
}

impl<T: Clone + 'static> ObservableList<T> {
    fn new(source: &Observable<ChangeSet<T>>) -> Self {
        let raw = Rc::new(RawObservableList {
            items: RefCell::new(Vec::new()),
            changes: Subject::new(),
            upstream: RefCell::new(None),
        });
        let node = Rc::downgrade(&raw);
        let s = source.subscribe(Observer::new(move |n| {
            if let Some(node) = node.upgrade() {
                node.on_notify(n);
            }
        }));
        *raw.upstream.borrow_mut() = Some(s);
        Self(raw)
    }

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
    pub fn items(&self) -> Vec<T> {
        self.0.items.borrow().clone()
    }
    pub fn len(&self) -> usize {
        self.0.items.borrow().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn count_changed(&self) -> Observable<usize> {
        self.connect().count_changed()
    }
}

impl<T: Clone + 'static> RawObservableList<T> {
    fn on_notify(&self, n: Notification<ChangeSet<T>>) {
        match n {
            Notification::Next(changes) => {
                let r = changes.clone().apply_to(&mut self.items.borrow_mut());
                match r {
                    Ok(()) if changes.is_empty() => {}
                    Ok(()) => self.changes.next(changes),
                    Err(e) => self.changes.error(e),
                }
            }
            Notification::Error(e) => self.changes.error(e),
            Notification::Completed => self.changes.completed(),
        }
    }
}

struct RefCountData<T: 'static> {
    list: Option<ObservableList<T>>,
    count: usize,
}

impl<T: Clone + 'static> Observable<ChangeSet<T>> {
    /// Subscribes to `self` and materializes it.
    pub fn as_observable_list(&self) -> ObservableList<T> {
        ObservableList::new(self)
    }

    /// Shares one subscription to `self` among every subscriber.
    ///
    /// The first subscriber connects to the upstream, later subscribers start from the shared
    /// materialized state, and the last unsubscription disconnects.
    pub fn ref_count(&self) -> Observable<ChangeSet<T>> {
        let source = self.clone();
        let data = Rc::new(RefCell::new(RefCountData {
            list: None,
            count: 0,
        }));
        Observable::new(move |o| {
            let list = data.borrow().list.clone();
            let list = match list {
                Some(list) => list,
                None => {
                    log::debug!("ref_count: connecting upstream");
                    let list = source.as_observable_list();
                    data.borrow_mut().list = Some(list.clone());
                    list
                }
            };
            data.borrow_mut().count += 1;
            let s = list.connect().subscribe(o);
            drop(list);
            let data = Rc::downgrade(&data);
            Subscription::from_fn(move || {
                drop(s);
                release(&data);
            })
        })
    }
}

fn release<T: 'static>(data: &Weak<RefCell<RefCountData<T>>>) {
    let Some(data) = data.upgrade() else {
        return;
    };
    let list = {
        let mut d = data.borrow_mut();
        d.count -= 1;
        if d.count > 0 {
            return;
        }
        d.list.take()
    };
    log::debug!("ref_count: last subscriber left, disconnecting upstream");
    drop(list);
}
