use pretty_assertions::assert_eq;

use crate::{observable::Recorder, Error, SourceList, Subject};

use super::*;

#[test]
fn switching_clears_previous_source() {
    let a = SourceList::from_iter([1, 2]);
    let b = SourceList::from_iter([3]);
    let sources = Subject::<Observable<ChangeSet<i32>>>::new();
    let r = Recorder::new(&sources.to_observable().switch());
    assert!(r.take_values().is_empty());

    sources.next(a.connect());
    assert_eq!(r.take_values(), vec![ChangeSet::initial(vec![1, 2])]);

    sources.next(b.connect());
    assert_eq!(
        r.take_values(),
        vec![ChangeSet::from(vec![
            Change::Clear { items: vec![1, 2] },
            Change::AddRange {
                items: vec![3],
                index: 0,
            },
        ])]
    );

    a.add(10).unwrap();
    b.add(4).unwrap();
    assert_eq!(
        r.take_values(),
        vec![ChangeSet::from(vec![Change::Add { item: 4, index: 1 }])]
    );
}

#[test]
fn clear_is_emitted_when_new_source_is_silent() {
    let a = SourceList::from_iter([1]);
    let silent = Subject::<ChangeSet<i32>>::new();
    let sources = Subject::<Observable<ChangeSet<i32>>>::new();
    let r = Recorder::new(&sources.to_observable().switch());
    sources.next(a.connect());
    r.take_values();
    sources.next(silent.to_observable());
    assert_eq!(
        r.take_values(),
        vec![ChangeSet::from(vec![Change::Clear { items: vec![1] }])]
    );
    silent.next(ChangeSet::initial(vec![5]));
    assert_eq!(r.take_values(), vec![ChangeSet::initial(vec![5])]);
}

#[test]
fn completes_after_outer_and_current_inner() {
    let sources = Subject::<Observable<ChangeSet<i32>>>::new();
    let inner = Subject::<ChangeSet<i32>>::new();
    let r = Recorder::new(&sources.to_observable().switch());
    sources.next(inner.to_observable());
    sources.completed();
    assert!(!r.is_completed());
    inner.completed();
    assert!(r.is_completed());
}

#[test]
fn inner_error_is_forwarded() {
    let sources = Subject::<Observable<ChangeSet<i32>>>::new();
    let r = Recorder::new(&sources.to_observable().switch());
    sources.next(Observable::throw(Error::InvalidOperation("gone".into())));
    assert!(r.error().is_some_and(|e| e.is_invalid_operation()));
}
