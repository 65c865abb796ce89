use std::{cell::RefCell, rc::Rc};

use crate::{
    Change, ChangeSet, Notification, Observable, Observer, Result, SerialSubscription, Subscription,
};

use super::{emit, EmitGate};

#[cfg(test)]
mod tests;

impl<T: Clone + 'static> Observable<Observable<ChangeSet<T>>> {
    /// Mirrors the latest source only. See [`switch`].
    pub fn switch(&self) -> Observable<ChangeSet<T>> {
        switch(self.clone())
    }
}

/// Mirrors the most recent change-set stream emitted by `sources`.
///
/// When a new source arrives the previous one is unsubscribed and everything it contributed is
/// cleared, in the same change-set as the new source's first change-set if the new source
/// delivers while being subscribed.
pub fn switch<T: Clone + 'static>(
    sources: Observable<Observable<ChangeSet<T>>>,
) -> Observable<ChangeSet<T>> {
    Observable::new(move |o| {
        let state = Rc::new(RefCell::new(Switcher::new()));
        let inner = Rc::new(SerialSubscription::new());
        let s_outer = sources.subscribe(Observer::new({
            let inner = inner.clone();
            move |n| match n {
                Notification::Next(source) => {
                    inner.clear();
                    let generation = state.borrow_mut().switch();
                    inner.set(source.subscribe(Observer::new({
                        let state = state.clone();
                        let o = o.clone();
                        move |n| on_inner(&state, &o, generation, n)
                    })));
                    let out = state.borrow_mut().take_pending();
                    emit(&o, Ok(out));
                }
                Notification::Error(e) => o.error(e),
                Notification::Completed => {
                    let is_done = {
                        let mut s = state.borrow_mut();
                        s.is_outer_completed = true;
                        s.is_inner_completed
                    };
                    if is_done {
                        o.completed();
                    }
                }
            }
        }));
        Subscription::from_fn(move || {
            drop(s_outer);
            inner.clear();
        })
    })
}

fn on_inner<T: Clone + 'static>(
    state: &RefCell<Switcher<T>>,
    o: &Observer<ChangeSet<T>>,
    generation: u64,
    n: Notification<ChangeSet<T>>,
) {
    if state.borrow().generation != generation {
        return;
    }
    match n {
        Notification::Next(changes) => {
            let out = state.borrow_mut().process(changes);
            emit(o, out)
        }
        Notification::Error(e) => o.error(e),
        Notification::Completed => {
            let is_done = {
                let mut s = state.borrow_mut();
                s.is_inner_completed = true;
                s.is_outer_completed
            };
            if is_done {
                o.completed();
            }
        }
    }
}

struct Switcher<T> {
    generation: u64,
    items: Vec<T>,
    pending: Option<ChangeSet<T>>,
    is_outer_completed: bool,
    is_inner_completed: bool,
    gate: EmitGate,
}

impl<T: Clone> Switcher<T> {
    fn new() -> Self {
        Self {
            generation: 0,
            items: Vec::new(),
            pending: None,
            is_outer_completed: false,
            is_inner_completed: true,
            gate: EmitGate::default(),
        }
    }

    fn switch(&mut self) -> u64 {
        self.generation += 1;
        self.is_inner_completed = false;
        let mut clear = ChangeSet::new();
        if !self.items.is_empty() {
            clear.push(Change::Clear {
                items: std::mem::take(&mut self.items),
            });
        }
        log::trace!("switched to source {}", self.generation);
        self.pending = Some(clear);
        self.generation
    }

    /// The clear of the previous source, if the new source has not delivered yet.
    fn take_pending(&mut self) -> Option<ChangeSet<T>> {
        let pending = self.pending.take()?;
        if pending.is_empty() {
            return None;
        }
        self.gate.pass(pending)
    }

    fn process(&mut self, changes: ChangeSet<T>) -> Result<Option<ChangeSet<T>>> {
        changes.clone().apply_to(&mut self.items)?;
        let mut out = self.pending.take().unwrap_or_default();
        out.extend(changes);
        Ok(self.gate.pass(out))
    }
}
