use std::{
    any::Any,
    cell::RefCell,
    mem::take,
    rc::{Rc, Weak},
};


/// Releases a resource when dropped.
///
/// Returned by every subscribe operation; dropping it stops delivery synchronously and
/// releases whatever the subscription owns.
#[derive(Default)]
#[must_use]
pub struct Subscription(RawSubscription);

impl Subscription {
    pub fn empty() -> Self {
        Subscription(RawSubscription::Empty)
    }
    pub fn from_fn(f: impl FnOnce() + 'static) -> Self {
        Subscription(RawSubscription::Fn(Box::new(f)))
    }
    /// Keeps `rc` alive until the subscription is dropped.
    pub fn from_rc(rc: Rc<dyn Any>) -> Self {
        Subscription(RawSubscription::Rc(rc))
    }
    /// Calls `unsubscribe` on drop if `this` is still alive.
    pub fn from_weak_fn<T: 'static>(this: Weak<T>, unsubscribe: impl FnOnce(Rc<T>) + 'static) -> Self {
        Self::from_fn(move || {
            if let Some(this) = this.upgrade() {
                unsubscribe(this)
            }
        })
    }
    /// Drops the subscriptions in order.
    pub fn from_vec(subscriptions: Vec<Subscription>) -> Self {
        Subscription(RawSubscription::Vec(subscriptions))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.0, RawSubscription::Empty)
    }
}
impl Drop for Subscription {
    fn drop(&mut self) {
        match take(&mut self.0) {
            RawSubscription::Empty => {}
            RawSubscription::Fn(f) => f(),
            RawSubscription::Rc(_) => {}
            RawSubscription::Vec(subscriptions) => drop(subscriptions),
        }
    }
}
impl From<Vec<Subscription>> for Subscription {
    fn from(value: Vec<Subscription>) -> Self {
        Self::from_vec(value)
    }
}

#[derive(Default)]
enum RawSubscription {
    #[default]
    Empty,
    Fn(Box<dyn FnOnce() + 'static>),
    Rc(#[allow(unused)] Rc<dyn Any>),
    Vec(Vec<Subscription>),
}

/// A slot holding at most one subscription.
///
/// Setting a new subscription drops the previous one after the slot has been updated, so the
/// previous subscription may safely set the slot again while it is being dropped.
#[derive(Default)]
pub struct SerialSubscription(RefCell<Option<Subscription>>);

impl SerialSubscription {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set(&self, subscription: Subscription) {
        let old = self.0.borrow_mut().replace(subscription);
        drop(old);
    }
    pub fn clear(&self) {
        let old = self.0.borrow_mut().take();
        drop(old);
    }
    pub fn is_set(&self) -> bool {
        self.0.borrow().is_some()
    }
}
