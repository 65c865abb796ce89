use assert_call::{call, CallRecorder};
use pretty_assertions::assert_eq;

use crate::observable::Recorder;

use super::*;

#[test]
fn connect_starts_with_current_contents() {
    let list = SourceList::from_iter([1, 2, 3]);
    let r = Recorder::new(&list.connect());
    assert_eq!(r.take_values(), vec![ChangeSet::initial(vec![1, 2, 3])]);
}

#[test]
fn connect_to_empty_list_emits_empty_change_set() {
    let list = SourceList::<i32>::new();
    let r = Recorder::new(&list.connect());
    assert_eq!(r.take_values(), vec![ChangeSet::new()]);
}

#[test]
fn edit_emits_one_change_set() {
    let list = SourceList::new();
    let r = Recorder::new(&list.connect());
    r.take_values();
    list.edit(|l| {
        l.add(1);
        l.add(2);
        l.insert(0, 0)
    })
    .unwrap();
    let values = r.take_values();
    assert_eq!(values.len(), 1);
    assert_eq!(
        values[0].as_slice(),
        &[
            Change::Add { item: 1, index: 0 },
            Change::Add { item: 2, index: 1 },
            Change::Add { item: 0, index: 0 },
        ]
    );
    assert_eq!(list.items(), vec![0, 1, 2]);
}

#[test]
fn empty_edit_is_not_published() {
    let mut cr = CallRecorder::new();
    let list = SourceList::<i32>::new();
    let _s = list.connect().subscribe_fn(|c| call!("changes {}", c.len()));
    cr.verify("changes 0");
    list.edit(|_| Ok(())).unwrap();
    list.add_range([]).unwrap();
    cr.verify(());
}

#[test]
fn nested_edit_folds_into_outer_change_set() {
    let mut cr = CallRecorder::new();
    let list = SourceList::new();
    let _s = list
        .connect()
        .subscribe_fn(|c: ChangeSet<i32>| call!("adds {}", c.adds()));
    cr.verify("adds 0");
    let list0 = list.clone();
    list.edit(|l| {
        l.add(1);
        list0.add(2)?;
        call!("nested done");
        l.add(3);
        Ok(())
    })
    .unwrap();
    cr.verify(["nested done", "adds 3"]);
    assert_eq!(list.items(), vec![1, 2, 3]);
}

#[test]
fn failed_edit_rolls_back_and_publishes_nothing() {
    let mut cr = CallRecorder::new();
    let list = SourceList::from_iter(["a", "b"]);
    let _s = list
        .connect()
        .subscribe_fn(|c: ChangeSet<&str>| call!("changes {}", c.len()));
    cr.verify("changes 1");
    let e = list
        .edit(|l| {
            l.add("c");
            l.move_item(0, 2)?;
            l.clear();
            l.remove_at(5)
        })
        .unwrap_err();
    assert!(e.is_out_of_range());
    cr.verify(());
    assert_eq!(list.items(), vec!["a", "b"]);
}

#[test]
fn preview_sees_previous_contents() {
    let mut cr = CallRecorder::new();
    let list = SourceList::from_iter([1]);
    let list0 = list.clone();
    let _p = list.preview().subscribe_fn(move |c: ChangeSet<i32>| {
        call!("preview {} {:?}", c.adds(), list0.items());
    });
    let list1 = list.clone();
    let _c = list.connect().subscribe_fn(move |c: ChangeSet<i32>| {
        call!("change {} {:?}", c.adds(), list1.items());
    });
    cr.verify("change 1 [1]");
    list.add(2).unwrap();
    cr.verify(["preview 1 [1]", "change 1 [1, 2]"]);
}

#[test]
fn failed_edit_restores_refreshed_value() {
    let list = SourceList::from_iter(["a", "b"]);
    let r = Recorder::new(&list.connect());
    r.take_values();
    let e = list
        .edit(|l| {
            l.refresh_with(1, "B")?;
            assert_eq!(l.items(), vec!["a", "B"]);
            assert_eq!(list.items(), vec!["a", "b"]);
            l.remove_at(5)
        })
        .unwrap_err();
    assert!(e.is_out_of_range());
    assert_eq!(list.items(), vec!["a", "b"]);
    assert!(r.take_values().is_empty());
}

#[test]
fn preview_of_refresh_sees_previous_value() {
    let mut cr = CallRecorder::new();
    let list = SourceList::from_iter([1, 2]);
    let list0 = list.clone();
    let _p = list.preview().subscribe_fn(move |_: ChangeSet<i32>| {
        call!("preview {:?}", list0.items());
    });
    list.edit(|l| l.refresh_with(0, 10)).unwrap();
    cr.verify("preview [1, 2]");
    assert_eq!(list.items(), vec![10, 2]);
}

#[test]
fn edit_inside_preview_fails() {
    let mut cr = CallRecorder::new();
    let list = SourceList::new();
    let list0 = list.clone();
    let _p = list.preview().subscribe_fn(move |_: ChangeSet<i32>| {
        let e = list0.add(10).unwrap_err();
        call!("{}", e.is_invalid_operation());
    });
    list.add(1).unwrap();
    cr.verify("true");
    assert_eq!(list.items(), vec![1]);
}

#[test]
fn edit_inside_change_callback_is_queued() {
    let mut cr = CallRecorder::new();
    let list = SourceList::new();
    let list0 = list.clone();
    let _a = list.connect().subscribe_fn(move |c: ChangeSet<i32>| {
        call!("a {}", c.total_changes());
        if list0.len() == 1 {
            list0.add(2).unwrap();
        }
    });
    let _b = list
        .connect()
        .subscribe_fn(|c: ChangeSet<i32>| call!("b {}", c.total_changes()));
    cr.verify(["a 0", "b 0"]);
    list.add(1).unwrap();
    cr.verify(["a 1", "b 1", "a 1", "b 1"]);
    assert_eq!(list.items(), vec![1, 2]);
}

#[test]
fn connect_inside_edit_sees_committed_contents() {
    let list = SourceList::from_iter([1]);
    let list0 = list.clone();
    let r = list
        .edit(|l| {
            l.add(2);
            Ok(Recorder::new(&list0.connect()))
        })
        .unwrap();
    let mut items = Vec::new();
    for c in r.take_values() {
        c.apply_to(&mut items).unwrap();
    }
    assert_eq!(items, vec![1, 2]);
}

#[test]
fn positional_errors() {
    let list = SourceList::from_iter([1, 2]);
    assert!(list.insert(3, 0).unwrap_err().is_out_of_range());
    assert!(list.remove_at(2).unwrap_err().is_out_of_range());
    assert!(list.remove_range(1, 2).unwrap_err().is_out_of_range());
    assert!(list.move_item(0, 2).unwrap_err().is_out_of_range());
    assert!(list.replace(&5, 6).unwrap_err().is_invalid_argument());
    assert_eq!(list.items(), vec![1, 2]);
}

#[test]
fn sugar_operations() {
    let list = SourceList::new();
    let r = Recorder::new(&list.connect());
    list.add_range([1, 2, 3, 4, 5]).unwrap();
    list.insert_range(1, [10, 11]).unwrap();
    assert_eq!(list.remove_at(0).unwrap(), 1);
    assert_eq!(list.remove_range(0, 2).unwrap(), vec![10, 11]);
    assert!(list.remove(&3).unwrap());
    assert!(!list.remove(&3).unwrap());
    assert_eq!(list.replace_at(0, 20).unwrap(), 2);
    list.replace(&20, 2).unwrap();
    list.move_item(0, 2).unwrap();
    list.refresh_at(0).unwrap();
    assert_eq!(list.items(), vec![4, 5, 2]);
    assert_eq!(list.remove_many([2, 9, 4]).unwrap(), 2);
    list.clear().unwrap();

    let mut mirror = Vec::new();
    for c in r.take_values() {
        c.apply_to(&mut mirror).unwrap();
    }
    assert!(mirror.is_empty());
    assert!(list.is_empty());
}

#[test]
fn edit_diff_changes_only_the_difference() {
    let list = SourceList::from_iter(0..10);
    let r = Recorder::new(&list.connect());
    r.take_values();
    list.edit_diff([7, 8, 9, 10, 11]).unwrap();
    let values = r.take_values();
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].adds(), 2);
    assert_eq!(values[0].removes(), 7);
    assert_eq!(list.items(), vec![7, 8, 9, 10, 11]);

    list.edit_diff([7, 8, 9, 10, 11]).unwrap();
    assert!(r.take_values().is_empty());
}

#[test]
fn edit_diff_by_uses_custom_equality() {
    let list = SourceList::from_iter([(1, "a"), (2, "b")]);
    list.edit_diff_by([(2, "x"), (3, "c")], |a, b| a.0 == b.0)
        .unwrap();
    assert_eq!(list.items(), vec![(2, "b"), (3, "c")]);
}

#[test]
fn count_changed_emits_distinct_lengths() {
    let mut cr = CallRecorder::new();
    let list = SourceList::from_iter([1, 2]);
    let _s = list.count_changed().subscribe_fn(|n| call!("{}", n));
    cr.verify("2");
    list.add(3).unwrap();
    list.replace_at(0, 5).unwrap();
    list.clear().unwrap();
    cr.verify(["3", "0"]);
}

#[test]
fn dispose_completes_streams_and_rejects_edits() {
    let mut cr = CallRecorder::new();
    let list = SourceList::<i32>::new();
    let _s = list
        .connect()
        .subscribe_with(|_| call!("next"), |_| call!("error"), || call!("completed"));
    cr.verify("next");
    list.dispose();
    cr.verify("completed");
    assert!(list.is_disposed());
    assert!(list.add(1).unwrap_err().is_invalid_operation());
    let _t = list
        .connect()
        .subscribe_with(|_| call!("next"), |_| call!("error"), || call!("completed"));
    cr.verify("completed");
}

#[test]
fn serializes_as_sequence() {
    let list = SourceList::from_iter([3, 1, 2]);
    let json = serde_json::to_string(&list).unwrap();
    assert_eq!(json, "[3,1,2]");
    let back: SourceList<i32> = serde_json::from_str(&json).unwrap();
    assert_eq!(back.items(), vec![3, 1, 2]);
}
