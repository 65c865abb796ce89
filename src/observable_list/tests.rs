use assert_call::{call, CallRecorder};
use pretty_assertions::assert_eq;

use crate::{observable::Recorder, Change, Error, SourceList};

use super::*;

#[test]
fn mirrors_upstream() {
    let source = SourceList::from_iter([1, 2]);
    let list = source.connect().as_observable_list();
    assert_eq!(list.items(), vec![1, 2]);
    source.add(3).unwrap();
    source.remove_at(0).unwrap();
    assert_eq!(list.items(), vec![2, 3]);
    assert_eq!(list.len(), 2);
}

#[test]
fn late_connect_starts_from_current_state() {
    let source = SourceList::from_iter([1, 2]);
    let list = source.connect().as_observable_list();
    source.add(3).unwrap();
    let r = Recorder::new(&list.connect());
    assert_eq!(r.take_values(), vec![ChangeSet::initial(vec![1, 2, 3])]);
    source.clear().unwrap();
    assert_eq!(r.take_values()[0].removes(), 3);
}

#[test]
fn forwards_error() {
    let list = Observable::<ChangeSet<i32>>::throw(Error::InvalidOperation("boom".into()))
        .as_observable_list();
    let r = Recorder::new(&list.connect());
    assert!(r.error().is_some());
    assert!(r.take_values().is_empty());
}

#[test]
fn ref_count_connects_once() {
    let mut cr = CallRecorder::new();
    let source = SourceList::from_iter([1]);
    let s0 = source.clone();
    let upstream = Observable::new(move |o| {
        call!("connect");
        let s = s0.connect().subscribe(o);
        Subscription::from_fn(move || {
            drop(s);
            call!("disconnect");
        })
    });
    let shared = upstream.ref_count();
    let a = Recorder::new(&shared);
    let b = Recorder::new(&shared);
    cr.verify("connect");
    source.add(2).unwrap();
    assert_eq!(a.take_values().len(), 2);
    assert_eq!(
        b.take_values(),
        vec![
            ChangeSet::initial(vec![1]),
            ChangeSet::from(vec![Change::Add { item: 2, index: 1 }]),
        ]
    );
    drop(a);
    cr.verify(());
    drop(b);
    cr.verify("disconnect");

    let _c = Recorder::new(&shared);
    cr.verify("connect");
}

#[test]
fn count_changed_follows_upstream() {
    let mut cr = CallRecorder::new();
    let source = SourceList::<i32>::new();
    let list = source.connect().as_observable_list();
    let _s = list.count_changed().subscribe_fn(|n| call!("{}", n));
    cr.verify("0");
    source.add_range([1, 2]).unwrap();
    cr.verify("2");
}
