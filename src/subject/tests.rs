use assert_call::{call, CallRecorder};

use super::*;

#[test]
fn multicasts_in_order() {
    let mut cr = CallRecorder::new();
    let s = Subject::new();
    let _a = s.to_observable().subscribe_fn(|x: i32| call!("a {}", x));
    let _b = s.to_observable().subscribe_fn(|x: i32| call!("b {}", x));
    s.next(1);
    cr.verify(["a 1", "b 1"]);
}

#[test]
fn reentrant_next_is_delivered_after_current_round() {
    let mut cr = CallRecorder::new();
    let s = Subject::new();
    let s0 = s.clone();
    let _a = s.to_observable().subscribe_fn(move |x: i32| {
        call!("a {}", x);
        if x == 1 {
            s0.next(2);
        }
    });
    let _b = s.to_observable().subscribe_fn(|x: i32| call!("b {}", x));
    s.next(1);
    cr.verify(["a 1", "b 1", "a 2", "b 2"]);
}

#[test]
fn late_subscriber_misses_queued_notification() {
    let mut cr = CallRecorder::new();
    let s = Subject::new();
    let s0 = s.clone();
    let late = Rc::new(RefCell::new(None));
    let late0 = late.clone();
    let _a = s.to_observable().subscribe_fn(move |x: i32| {
        call!("a {}", x);
        if x == 1 {
            s0.next(2);
            *late0.borrow_mut() = Some(s0.to_observable().subscribe_fn(|x: i32| call!("late {}", x)));
        }
    });
    s.next(1);
    cr.verify(["a 1", "a 2"]);
    s.next(3);
    cr.verify(["a 3", "late 3"]);
}

#[test]
fn terminal_is_replayed_to_new_subscribers() {
    let mut cr = CallRecorder::new();
    let s = Subject::<i32>::new();
    s.completed();
    assert!(s.is_terminated());
    let _a = s
        .to_observable()
        .subscribe_with(|x| call!("{}", x), |_| {}, || call!("completed"));
    cr.verify("completed");
    s.next(1);
    cr.verify(());
}

#[test]
fn unsubscribe_removes_observer() {
    let s = Subject::<i32>::new();
    let a = s.to_observable().subscribe_fn(|_| {});
    assert_eq!(s.observer_count(), 1);
    drop(a);
    assert!(!s.has_observers());
}

#[test]
fn behavior_subject_replays_current_value() {
    let mut cr = CallRecorder::new();
    let s = BehaviorSubject::new(1);
    let _a = s.to_observable().subscribe_fn(|x: i32| call!("a {}", x));
    cr.verify("a 1");
    s.set(2);
    cr.verify("a 2");
    let _b = s.to_observable().subscribe_fn(|x: i32| call!("b {}", x));
    cr.verify("b 2");
    assert_eq!(s.get(), 2);
}
