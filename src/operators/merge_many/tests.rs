use std::collections::HashMap;

use assert_call::{call, CallRecorder};
use pretty_assertions::assert_eq;

use crate::{observable::Recorder, SourceList};

use super::*;

fn materialize<T: Clone>(r: &Recorder<ChangeSet<T>>, items: &mut Vec<T>) {
    for c in r.take_values() {
        c.apply_to(items).unwrap();
    }
}

fn children() -> HashMap<&'static str, SourceList<i32>> {
    HashMap::from([
        ("a", SourceList::from_iter([1, 2])),
        ("b", SourceList::from_iter([10])),
        ("c", SourceList::from_iter([20, 21])),
    ])
}

#[test]
fn concatenates_inner_streams() {
    let children = children();
    let parents = SourceList::from_iter(["a", "b"]);
    let r = Recorder::new(&parents.connect().merge_many({
        let children = children.clone();
        move |k| children[k].connect()
    }));
    let values = r.take_values();
    assert_eq!(values.len(), 1);
    let mut items = Vec::new();
    for c in values {
        c.apply_to(&mut items).unwrap();
    }
    assert_eq!(items, vec![1, 2, 10]);

    children["a"].add(3).unwrap();
    assert_eq!(
        r.take_values(),
        vec![ChangeSet::from(vec![Change::Add { item: 3, index: 2 }])]
    );
    items.insert(2, 3);
    children["b"].insert(0, 9).unwrap();
    materialize(&r, &mut items);
    assert_eq!(items, vec![1, 2, 3, 9, 10]);
}

#[test]
fn outer_edits_add_and_remove_contributions() {
    let children = children();
    let parents = SourceList::from_iter(["a", "b"]);
    let r = Recorder::new(&parents.connect().merge_many({
        let children = children.clone();
        move |k| children[k].connect()
    }));
    let mut items = Vec::new();
    materialize(&r, &mut items);

    parents.insert(1, "c").unwrap();
    materialize(&r, &mut items);
    assert_eq!(items, vec![1, 2, 20, 21, 10]);

    parents.remove_at(0).unwrap();
    assert_eq!(
        r.take_values(),
        vec![ChangeSet::from(vec![Change::RemoveRange {
            items: vec![1, 2],
            index: 0,
        }])]
    );
    items.drain(0..2);

    parents.replace_at(1, "a").unwrap();
    materialize(&r, &mut items);
    assert_eq!(items, vec![20, 21, 1, 2]);

    parents.move_item(1, 0).unwrap();
    materialize(&r, &mut items);
    assert_eq!(items, vec![1, 2, 20, 21]);

    parents.clear().unwrap();
    materialize(&r, &mut items);
    assert!(items.is_empty());
}

#[test]
fn removed_item_is_unsubscribed() {
    let mut cr = CallRecorder::new();
    let parents = SourceList::from_iter([1]);
    let r = Recorder::new(&parents.connect().merge_many(|_: &i32| {
        Observable::new(|o| {
            o.next(ChangeSet::initial(vec!["x"]));
            Subscription::from_fn(|| call!("unsubscribed"))
        })
    }));
    r.take_values();
    parents.remove_at(0).unwrap();
    cr.verify("unsubscribed");
}

#[test]
fn dropping_the_subscription_releases_inner_streams() {
    let mut cr = CallRecorder::new();
    let parents = SourceList::from_iter([1, 2]);
    let s = parents.connect().merge_many(|x: &i32| {
        let x = *x;
        Observable::new(move |_| Subscription::from_fn(move || call!("drop {x}")))
    });
    let s = s.subscribe_fn(|_| {});
    drop(s);
    cr.verify(["drop 1", "drop 2"]);
}
