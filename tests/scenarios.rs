mod test_utils;

use std::{cell::Cell, rc::Rc};

use assert_call::{call, CallRecorder};
use livelist::*;
use pretty_assertions::assert_eq;
use rstest::rstest;

use self::test_utils::*;

#[test]
fn window_over_sorted_list() {
    let list = SourceList::from_iter((0..100).rev());
    let requests = BehaviorSubject::new(VirtualRequest::new(0, 25));
    let view = list
        .connect()
        .sort_by_key(|x: &i32| *x)
        .virtualise(requests.to_observable());
    let r = Recorder::new(&view);
    let mut items = Vec::new();
    materialize(&r, &mut items);
    assert_eq!(items, (0..25).collect::<Vec<_>>());

    requests.set(VirtualRequest::new(25, 25));
    let values = r.take_values();
    assert_eq!(values.iter().map(|c| c.removes()).sum::<usize>(), 25);
    assert_eq!(values.iter().map(|c| c.adds()).sum::<usize>(), 25);
    for c in values {
        c.apply_to(&mut items).unwrap();
    }
    assert_eq!(items, (25..50).collect::<Vec<_>>());
}

#[test]
fn edit_diff_keeps_shared_items() {
    let list = SourceList::from_iter(0..10);
    let r = Recorder::new(&list.connect());
    r.take_values();
    let target = vec![7, 8, 9, 20, 21, 22, 23];
    list.edit_diff(target.clone()).unwrap();
    let values = r.take_values();
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].adds(), target.len() - 3);
    assert_eq!(values[0].removes(), 10 - 3);

    list.edit_diff(target).unwrap();
    assert!(r.take_values().is_empty());
}

#[test]
fn grouping_buckets() {
    let list = SourceList::from_iter((0..100).map(|x| (x, x % 10)));
    let r = Recorder::new(&list.connect().group_on(|x: &(i32, i32)| x.1));
    let mut groups = Vec::new();
    materialize(&r, &mut groups);
    assert_eq!(groups.len(), 10);
    assert_eq!(groups.iter().map(|g| g.len()).sum::<usize>(), 100);

    list.replace_at(42, (42, 99)).unwrap();
    materialize(&r, &mut groups);
    assert_eq!(groups.len(), 11);
    assert_eq!(groups.iter().map(|g| g.len()).sum::<usize>(), 100);

    list.replace_at(42, (42, 2)).unwrap();
    materialize(&r, &mut groups);
    assert_eq!(groups.len(), 10);
}

#[test]
fn nested_edit_commits_once() {
    let mut cr = CallRecorder::new();
    let list = SourceList::<i32>::new();
    let _s = list.connect().subscribe_fn(|c: ChangeSet<i32>| call!("{}", c.total_changes()));
    cr.verify("0");
    list.edit(|l| {
        l.add(1);
        list.edit(|_| {
            call!("nested");
            Ok(())
        })?;
        list.add(2)?;
        Ok(())
    })
    .unwrap();
    cr.verify(["nested", "2"]);
    assert_eq!(list.items(), vec![1, 2]);
}

#[rstest]
#[case(CombineOperator::Or, (6..=15).collect())]
#[case(CombineOperator::Except, vec![])]
#[case(CombineOperator::Xor, (6..=15).collect())]
#[case(CombineOperator::And, vec![])]
fn clearing_one_source(#[case] op: CombineOperator, #[case] expected: Vec<i32>) {
    let a = SourceList::from_iter(1..=10);
    let b = SourceList::from_iter(6..=15);
    let r = Recorder::new(&combine(
        op,
        Observable::of(ChangeSet::initial(vec![a.connect(), b.connect()])),
    ));
    let mut items = Vec::new();
    materialize(&r, &mut items);
    a.clear().unwrap();
    materialize(&r, &mut items);
    items.sort();
    assert_eq!(items, expected);
}

#[test]
fn clearing_the_other_source_keeps_the_primary() {
    let a = SourceList::from_iter(1..=10);
    let b = SourceList::from_iter(6..=15);
    let except = Recorder::new(&a.connect().except([b.connect()]));
    let mut items = Vec::new();
    materialize(&except, &mut items);
    b.clear().unwrap();
    materialize(&except, &mut items);
    items.sort();
    assert_eq!(items, (1..=10).collect::<Vec<_>>());
}

#[test]
fn shared_upstream_runs_once() {
    let mut cr = CallRecorder::new();
    let list = SourceList::from_iter([3, 1, 2]);
    let sorted = list
        .connect()
        .sort_by_key(|x: &i32| *x)
        .map(|c| {
            call!("sorted");
            c
        })
        .ref_count();
    let a = Recorder::new(&sorted);
    let b = Recorder::new(&sorted);
    cr.verify("sorted");
    list.add(0).unwrap();
    cr.verify("sorted");
    assert_eq!(snapshot(&sorted), vec![0, 1, 2, 3]);
    drop(a);
    drop(b);
}

#[test]
fn auto_refresh_resorts() {
    #[derive(Clone)]
    struct Item {
        rank: Rc<Cell<i32>>,
        changed: Subject<&'static str>,
    }
    impl PropertyChanged for Item {
        fn property_changed(&self) -> Option<Observable<&'static str>> {
            Some(self.changed.to_observable())
        }
    }
    let items: Vec<Item> = [3, 1, 2]
        .into_iter()
        .map(|x| Item {
            rank: Rc::new(Cell::new(x)),
            changed: Subject::new(),
        })
        .collect();
    let list = SourceList::from_iter(items.clone());
    let r = Recorder::new(
        &list
            .connect()
            .auto_refresh(Some("rank"), AutoRefreshOptions::default())
            .sort_by_key(|x: &Item| x.rank.get()),
    );
    let mut view = Vec::new();
    materialize(&r, &mut view);
    items[0].rank.set(0);
    items[0].changed.next("rank");
    materialize(&r, &mut view);
    assert_eq!(
        view.iter().map(|x| x.rank.get()).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
}

#[test]
fn stream_adapter_yields_change_sets() {
    use futures::{executor::block_on, StreamExt};
    let list = SourceList::from_iter([1, 2]);
    let stream = list.connect().to_stream();
    list.add(3).unwrap();
    list.dispose();
    let values: Vec<_> = block_on(stream.collect());
    assert_eq!(values.len(), 2);
    assert!(values.iter().all(|v| v.is_ok()));
}
