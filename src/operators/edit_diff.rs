use std::{cell::RefCell, hash::Hash, rc::Rc};

use crate::{ChangeSet, Notification, Observable, Observer, Result, SourceList, Subscription};

use super::EmitGate;


impl<T: Eq + Hash + Clone + 'static> Observable<Vec<T>> {
    /// Turns a stream of whole snapshots into the change-sets between consecutive snapshots.
    pub fn edit_diff(&self) -> Observable<ChangeSet<T>> {
        let source = self.clone();
        diff_stream(move |list: &SourceList<T>, items| list.edit_diff(items), source)
    }
}

impl<T: Clone + 'static> Observable<Vec<T>> {
    /// Like [`edit_diff`](Self::edit_diff), comparing items with `eq`.
    pub fn edit_diff_by(&self, eq: impl Fn(&T, &T) -> bool + 'static) -> Observable<ChangeSet<T>> {
        let source = self.clone();
        let eq = Rc::new(eq);
        diff_stream(
            move |list: &SourceList<T>, items| list.edit_diff_by(items, &*eq),
            source,
        )
    }
}

fn diff_stream<T: Clone + 'static>(
    apply: impl Fn(&SourceList<T>, Vec<T>) -> Result<()> + 'static,
    source: Observable<Vec<T>>,
) -> Observable<ChangeSet<T>> {
    let apply = Rc::new(apply);
    Observable::new(move |o| {
        let list = SourceList::new();
        let gate = Rc::new(RefCell::new(EmitGate::default()));
        let mut is_connected = false;
        let s_list = list.connect().subscribe(Observer::new({
            let gate = gate.clone();
            let o = o.clone();
            move |n| match n {
                Notification::Next(changes) => {
                    if !is_connected {
                        is_connected = true;
                        return;
                    }
                    let out = gate.borrow_mut().pass(changes);
                    if let Some(out) = out {
                        o.next(out);
                    }
                }
                n => o.notify(n),
            }
        }));
        let apply = apply.clone();
        let s_source = source.subscribe(Observer::new({
            let list = list.clone();
            move |n| match n {
                Notification::Next(items) => {
                    if let Err(e) = apply(&list, items) {
                        list.fail(e);
                        return;
                    }
                    let out = gate.borrow_mut().pass(ChangeSet::new());
                    if let Some(out) = out {
                        o.next(out);
                    }
                }
                Notification::Error(e) => list.fail(e),
                Notification::Completed => list.dispose(),
            }
        }));
        Subscription::from_vec(vec![s_source, s_list])
    })
}
