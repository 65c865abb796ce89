use std::{
    cell::RefCell,
    collections::VecDeque,
    mem::take,
    rc::Rc,
};

use derive_ex::derive_ex;

use crate::{Error, Subscription};


/// One notification delivered to an [`Observer`].
#[derive(Debug, Clone)]
pub enum Notification<T> {
    Next(T),
    Error(Error),
    Completed,
}

impl<T> Notification<T> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Notification::Next(_))
    }
}

/// Receiving side of a stream.
///
/// Notifications pushed while the observer is already running its callback are queued and
/// delivered, in order, once the running callback returns. After `error` or `completed` the
/// callback is dropped and every further notification is ignored.
#[derive_ex(Clone(bound()))]
pub struct Observer<T: 'static>(Rc<RefCell<ObserverData<T>>>);

struct ObserverData<T> {
    sink: Option<Box<dyn FnMut(Notification<T>)>>,
    queue: VecDeque<Notification<T>>,
    is_running: bool,
    is_stopped: bool,
}

impl<T: 'static> Observer<T> {
    pub fn new(f: impl FnMut(Notification<T>) + 'static) -> Self {
        Self(Rc::new(RefCell::new(ObserverData {
            sink: Some(Box::new(f)),
            queue: VecDeque::new(),
            is_running: false,
            is_stopped: false,
        })))
    }
    pub fn from_fns(
        mut on_next: impl FnMut(T) + 'static,
        mut on_error: impl FnMut(Error) + 'static,
        mut on_completed: impl FnMut() + 'static,
    ) -> Self {
        Self::new(move |n| match n {
            Notification::Next(value) => on_next(value),
            Notification::Error(e) => on_error(e),
            Notification::Completed => on_completed(),
        })
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

    pub fn notify(&self, n: Notification<T>) {
        {
            let mut d = self.0.borrow_mut();
            if d.is_stopped {
                return;
            }
            if n.is_terminal() {
                d.is_stopped = true;
            }
            d.queue.push_back(n);
            if d.is_running {
                return;
            }
            d.is_running = true;
        }
        loop {
            let (n, mut sink) = {
                let mut d = self.0.borrow_mut();
                let Some(n) = d.queue.pop_front() else {
                    d.is_running = false;
                    return;
                };
                let Some(sink) = d.sink.take() else {
                    d.queue.clear();
                    d.is_running = false;
                    return;
                };
                (n, sink)
            };
            let is_terminal = n.is_terminal();
            sink(n);
            let mut d = self.0.borrow_mut();
            if is_terminal || (d.is_stopped && d.queue.is_empty()) {
                d.queue.clear();
                d.is_running = false;
                drop(d);
                drop(sink);
                return;
            }
            d.sink = Some(sink);
        }
    }

    /// Stops delivery without notifying: pending and future notifications are dropped.
    pub fn stop(&self) {
        let sink = {
            let mut d = self.0.borrow_mut();
            d.is_stopped = true;
            d.queue.clear();
            d.sink.take()
        };
        drop(sink);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.borrow().is_stopped
    }
}

/// A push-based stream that starts producing when subscribed.
///
/// Each subscription runs the subscribe function again, so operator state is owned by the
/// subscription and never shared between subscribers.
#[derive_ex(Clone(bound()))]
pub struct Observable<T: 'static>(Rc<dyn Fn(Observer<T>) -> Subscription>);

impl<T: 'static> Observable<T> {
    pub fn new(subscribe: impl Fn(Observer<T>) -> Subscription + 'static) -> Self {
        Self(Rc::new(subscribe))
    }

    pub fn of(value: T) -> Self
    where
        T: Clone,
    {
        Self::new(move |o| {
            o.next(value.clone());
            o.completed();
            Subscription::empty()
        })
    }
    pub fn from_values(values: impl IntoIterator<Item = T>) -> Self
    where
        T: Clone,
    {
        let values: Rc<[T]> = values.into_iter().collect();
        Self::new(move |o| {
            for value in values.iter() {
                if o.is_stopped() {
                    break;
                }
                o.next(value.clone());
            }
            o.completed();
            Subscription::empty()
        })
    }
    pub fn empty() -> Self {
        Self::new(|o| {
            o.completed();
            Subscription::empty()
        })
    }
    pub fn never() -> Self {
        Self::new(|_| Subscription::empty())
    }
    pub fn throw(e: Error) -> Self {
        Self::new(move |o| {
            o.error(e.clone());
            Subscription::empty()
        })
    }

    pub fn subscribe(&self, observer: Observer<T>) -> Subscription {
        let upstream = (self.0)(observer.clone());
        Subscription::from_fn(move || {
            observer.stop();
            drop(upstream);
        })
    }
    pub fn subscribe_fn(&self, on_next: impl FnMut(T) + 'static) -> Subscription {
        self.subscribe(Observer::from_fns(on_next, |_| {}, || {}))
    }
    pub fn subscribe_with(
        &self,
        on_next: impl FnMut(T) + 'static,
        on_error: impl FnMut(Error) + 'static,
        on_completed: impl FnMut() + 'static,
    ) -> Subscription {
        self.subscribe(Observer::from_fns(on_next, on_error, on_completed))
    }

    pub fn map<U: 'static>(&self, f: impl Fn(T) -> U + 'static) -> Observable<U> {
        let source = self.clone();
        let f = Rc::new(f);
        Observable::new(move |o: Observer<U>| {
            let f = f.clone();
            source.subscribe(forward(o, move |o, value| o.next(f(value))))
        })
    }
    pub fn filter(&self, f: impl Fn(&T) -> bool + 'static) -> Observable<T> {
        let source = self.clone();
        let f = Rc::new(f);
        Observable::new(move |o: Observer<T>| {
            let f = f.clone();
            source.subscribe(forward(o, move |o, value| {
                if f(&value) {
                    o.next(value)
                }
            }))
        })
    }
}

/// Builds an observer that hands values to `on_next` together with `o` and forwards error and
/// completion to `o` unchanged.
pub(crate) fn forward<T: 'static, U: 'static>(
    o: Observer<U>,
    mut on_next: impl FnMut(&Observer<U>, T) + 'static,
) -> Observer<T> {
    Observer::new(move |n| match n {
        Notification::Next(value) => on_next(&o, value),
        Notification::Error(e) => o.error(e),
        Notification::Completed => o.completed(),
    })
}

/// Records every notification of an observable, for tests and diagnostics.
pub struct Recorder<T: 'static> {
    notifications: Rc<RefCell<Vec<Notification<T>>>>,
    _subscription: Subscription,
}

impl<T: 'static> Recorder<T> {
    pub fn new(source: &Observable<T>) -> Self {
        let notifications = Rc::new(RefCell::new(Vec::new()));
        let n = notifications.clone();
        let subscription = source.subscribe(Observer::new(move |x| n.borrow_mut().push(x)));
        Self {
            notifications,
            _subscription: subscription,
        }
    }

    /// Takes the values received so far.
    pub fn take_values(&self) -> Vec<T> {
        let mut values = Vec::new();
        let mut notifications = self.notifications.borrow_mut();
        let mut rest = Vec::new();
        for n in take(&mut *notifications) {
            match n {
                Notification::Next(value) => values.push(value),
                n => rest.push(n),
            }
        }
        *notifications = rest;
        values
    }
    pub fn error(&self) -> Option<Error> {
        self.notifications.borrow().iter().find_map(|n| match n {
            Notification::Error(e) => Some(e.clone()),
            _ => None,
        })
    }
    pub fn is_completed(&self) -> bool {
        self.notifications
            .borrow()
            .iter()
            .any(|n| matches!(n, Notification::Completed))
    }
    pub fn is_terminated(&self) -> bool {
        self.notifications.borrow().iter().any(|n| n.is_terminal())
    }
}
