use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use derive_ex::derive_ex;
use slabmap::SlabMap;

use crate::{Error, Notification, Observable, Observer, Subscription};

#[cfg(test)]
mod tests;

/// Multicasts notifications to every current subscriber.
///
/// A notification raised while the subject is already delivering is queued together with the
/// subscribers present at that moment, so all subscribers observe notifications in the order
/// they were raised and a late subscriber never receives a notification raised before it
/// subscribed.
#[derive_ex(Clone(bound()))]
pub struct Subject<T: 'static>(Rc<RawSubject<T>>);

struct RawSubject<T: 'static> {
    data: RefCell<SubjectData<T>>,
}

struct SubjectData<T: 'static> {
    observers: SlabMap<Observer<T>>,
    queue: VecDeque<(Notification<T>, Vec<Observer<T>>)>,
    is_delivering: bool,
    terminal: Option<Notification<T>>,
}

impl<T: Clone + 'static> Subject<T> {
    pub fn new() -> Self {
        Self(Rc::new(RawSubject {
            data: RefCell::new(SubjectData {
                observers: SlabMap::new(),
                queue: VecDeque::new(),
                is_delivering: false,
                terminal: None,
            }),
        }))
    }

    pub fn next(&self, value: T) {
        self.notify(Notification::Next(value))
    }
    pub fn error(&self, e: Error) {
        self.notify(Notification::Error(e))
    }
    pub fn completed(&self) {
        self.notify(Notification::Completed)
    }

    pub fn is_terminated(&self) -> bool {
        self.0.data.borrow().terminal.is_some()
    }
    pub fn has_observers(&self) -> bool {
        !self.0.data.borrow().observers.is_empty()
    }
    pub fn observer_count(&self) -> usize {
        self.0.data.borrow().observers.len()
    }

    pub fn notify(&self, n: Notification<T>) {
        {
            let mut d = self.0.data.borrow_mut();
            if d.terminal.is_some() {
                return;
            }
            if n.is_terminal() {
                d.terminal = Some(n.clone());
            }
            let observers = d.observers.values().cloned().collect();
            d.queue.push_back((n, observers));
            if d.is_delivering {
                return;
            }
            d.is_delivering = true;
        }
        loop {
            let Some((n, observers)) = self.pop() else {
                return;
            };
            for o in observers {
                o.notify(n.clone());
            }
        }
    }
    fn pop(&self) -> Option<(Notification<T>, Vec<Observer<T>>)> {
        let mut d = self.0.data.borrow_mut();
        let item = d.queue.pop_front();
        if item.is_none() {
            d.is_delivering = false;
            if d.terminal.is_some() {
                d.observers.clear();
            }
        }
        item
    }

    /// Registers `o` without replaying anything. Returns `None` if the subject has terminated,
    /// after delivering the terminal notification to `o`.
    fn register(&self, o: Observer<T>) -> Option<Subscription> {
        let terminal = {
            let mut d = self.0.data.borrow_mut();
            if d.terminal.is_none() {
                let key = d.observers.insert(o);
                let this = Rc::downgrade(&self.0);
                return Some(Subscription::from_weak_fn(this, move |this| {
                    let o = this.data.borrow_mut().observers.remove(key);
                    drop(o);
                }));
            }
            d.terminal.clone()
        };
        if let Some(n) = terminal {
            o.notify(n);
        }
        None
    }

    pub fn to_observable(&self) -> Observable<T> {
        let this = self.clone();
        Observable::new(move |o| this.register(o).unwrap_or_default())
    }
}

impl<T: Clone + 'static> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A [`Subject`] that remembers its latest value and sends it to each new subscriber first.
#[derive_ex(Clone(bound()))]
pub struct BehaviorSubject<T: 'static> {
    subject: Subject<T>,
    value: Rc<RefCell<T>>,
}

impl<T: Clone + 'static> BehaviorSubject<T> {
    pub fn new(value: T) -> Self {
        Self {
            subject: Subject::new(),
            value: Rc::new(RefCell::new(value)),
        }
    }
    pub fn get(&self) -> T {
        self.value.borrow().clone()
    }
    pub fn set(&self, value: T) {
        if self.subject.is_terminated() {
            return;
        }
        *self.value.borrow_mut() = value.clone();
        self.subject.next(value);
    }
    pub fn error(&self, e: Error) {
        self.subject.error(e)
    }
    pub fn completed(&self) {
        self.subject.completed()
    }

    pub fn to_observable(&self) -> Observable<T> {
        let this = self.clone();
        Observable::new(move |o| {
            let Some(s) = this.subject.register(o.clone()) else {
                return Subscription::empty();
            };
            o.next(this.get());
            s
        })
    }
}
