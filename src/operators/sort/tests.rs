use std::cell::Cell;

use pretty_assertions::assert_eq;

use crate::{observable::Recorder, BehaviorSubject, SourceList, Subject};

use super::*;

fn replay<T>(r: &Recorder<ChangeSet<T>>, items: &mut Vec<T>) -> Vec<ChangeSet<T>>
where
    T: Clone,
{
    let values = r.take_values();
    for c in values.clone() {
        c.apply_to(items).unwrap();
    }
    values
}

#[test]
fn initial_contents_are_sorted() {
    let list = SourceList::from_iter([3, 1, 2]);
    let r = Recorder::new(&list.connect().sort(i32::cmp));
    assert_eq!(r.take_values(), vec![ChangeSet::initial(vec![1, 2, 3])]);
}

#[test]
fn empty_source_emits_empty_change_set() {
    let list = SourceList::<i32>::new();
    let r = Recorder::new(&list.connect().sort(i32::cmp));
    assert_eq!(r.take_values(), vec![ChangeSet::new()]);
}

#[test]
fn add_and_remove_at_sorted_position() {
    let list = SourceList::from_iter([10, 30]);
    let r = Recorder::new(&list.connect().sort(i32::cmp));
    r.take_values();
    list.add(20).unwrap();
    list.remove(&10).unwrap();
    assert_eq!(
        r.take_values(),
        vec![
            ChangeSet::from(vec![Change::Add { item: 20, index: 1 }]),
            ChangeSet::from(vec![Change::Remove { item: 10, index: 0 }]),
        ]
    );
}

#[test]
fn equal_items_keep_insertion_order() {
    let list = SourceList::from_iter([(1, "a"), (0, "b"), (1, "c")]);
    let mut items = Vec::new();
    let r = Recorder::new(&list.connect().sort_by_key(|x: &(i32, &str)| x.0));
    list.add((1, "d")).unwrap();
    list.insert(0, (1, "e")).unwrap();
    replay(&r, &mut items);
    assert_eq!(items, vec![(0, "b"), (1, "a"), (1, "c"), (1, "d"), (1, "e")]);
}

#[test]
fn refresh_moves_or_refreshes() {
    let cells: Vec<Rc<Cell<i32>>> = (0..4).map(|x| Rc::new(Cell::new(x * 10))).collect();
    let list = SourceList::from_iter(cells.clone());
    let r = Recorder::new(&list.connect().sort_by_key(|x: &Rc<Cell<i32>>| x.get()));
    r.take_values();

    cells[1].set(11);
    list.refresh_at(1).unwrap();
    let values = r.take_values();
    assert_eq!(values[0].refreshes(), 1);

    cells[0].set(25);
    list.refresh_at(0).unwrap();
    let values = r.take_values();
    assert_eq!(values.len(), 1);
    match &values[0][0] {
        Change::Move {
            item,
            index,
            previous_index,
        } => {
            assert_eq!(item.get(), 25);
            assert_eq!((*previous_index, *index), (0, 2));
        }
        c => panic!("unexpected change {c:?}"),
    }
}

#[test]
fn replace_keeps_or_changes_position() {
    let list = SourceList::from_iter([10, 20, 30]);
    let r = Recorder::new(&list.connect().sort(i32::cmp));
    r.take_values();
    list.replace(&20, 21).unwrap();
    list.replace(&21, 40).unwrap();
    assert_eq!(
        r.take_values(),
        vec![
            ChangeSet::from(vec![Change::Replace {
                item: 21,
                previous: 20,
                index: 1,
                previous_index: 1,
            }]),
            ChangeSet::from(vec![
                Change::Remove { item: 21, index: 1 },
                Change::Add { item: 40, index: 2 },
            ]),
        ]
    );
}

#[test]
fn upstream_moves_are_ignored() {
    let list = SourceList::from_iter([1, 2, 3]);
    let r = Recorder::new(&list.connect().sort(i32::cmp));
    r.take_values();
    list.move_item(0, 2).unwrap();
    assert!(r.take_values().is_empty());
}

#[test]
fn clear_is_forwarded() {
    let list = SourceList::from_iter([2, 1]);
    let r = Recorder::new(&list.connect().sort(i32::cmp));
    r.take_values();
    list.clear().unwrap();
    assert_eq!(
        r.take_values(),
        vec![ChangeSet::from(vec![Change::Clear { items: vec![1, 2] }])]
    );
}

#[test]
fn large_update_resets() {
    let list = SourceList::from_iter([5, 1]);
    let options = SortOptions::new().reset_threshold(2);
    let comparer: Comparer<i32> = Rc::new(i32::cmp);
    let r = Recorder::new(&list.connect().sort_with(
        Observable::of(comparer),
        Observable::never(),
        options,
    ));
    r.take_values();
    list.add_range([4, 3, 2]).unwrap();
    assert_eq!(
        r.take_values(),
        vec![ChangeSet::from(vec![
            Change::Clear { items: vec![1, 5] },
            Change::AddRange {
                items: vec![1, 2, 3, 4, 5],
                index: 0,
            },
        ])]
    );
}

#[test]
fn comparer_change_emits_minimal_moves() {
    let list = SourceList::from_iter([1, 2, 3, 4]);
    let ascending: Comparer<i32> = Rc::new(i32::cmp);
    let comparers = BehaviorSubject::new(ascending);
    let mut items = Vec::new();
    let r = Recorder::new(&list.connect().sort_with(
        comparers.to_observable(),
        Observable::never(),
        SortOptions::default(),
    ));
    replay(&r, &mut items);
    assert_eq!(items, vec![1, 2, 3, 4]);

    comparers.set(Rc::new(|a: &i32, b: &i32| (a % 4).cmp(&(b % 4))));
    let values = replay(&r, &mut items);
    assert_eq!(items, vec![4, 1, 2, 3]);
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].moves(), 1);
}

#[test]
fn resort_picks_up_in_place_mutation() {
    let cells: Vec<Rc<Cell<i32>>> = (0..3).map(|x| Rc::new(Cell::new(x))).collect();
    let list = SourceList::from_iter(cells.clone());
    let resort = Subject::new();
    let comparer: Comparer<Rc<Cell<i32>>> = Rc::new(|a: &Rc<Cell<i32>>, b: &Rc<Cell<i32>>| a.get().cmp(&b.get()));
    let mut items = Vec::new();
    let r = Recorder::new(&list.connect().sort_with(
        Observable::of(comparer),
        resort.to_observable(),
        SortOptions::default(),
    ));
    replay(&r, &mut items);
    cells[0].set(10);
    resort.next(());
    replay(&r, &mut items);
    let values: Vec<i32> = items.iter().map(|x| x.get()).collect();
    assert_eq!(values, vec![1, 2, 10]);
}

#[test]
fn resort_moves_only_items_out_of_place() {
    let cells: Vec<Rc<Cell<i32>>> = (1..=3).map(|x| Rc::new(Cell::new(x))).collect();
    let list = SourceList::from_iter(cells.clone());
    let resort = Subject::new();
    let comparer: Comparer<Rc<Cell<i32>>> =
        Rc::new(|a: &Rc<Cell<i32>>, b: &Rc<Cell<i32>>| a.get().cmp(&b.get()));
    let mut items = Vec::new();
    let r = Recorder::new(&list.connect().sort_with(
        Observable::of(comparer),
        resort.to_observable(),
        SortOptions::default(),
    ));
    replay(&r, &mut items);
    cells[0].set(2);
    cells[2].set(0);
    resort.next(());
    let values = replay(&r, &mut items);
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].total_changes(), 1);
    assert_eq!(values[0].moves(), 1);
    assert_eq!(values[0].refreshes(), 0);
    let order: Vec<_> = items.iter().map(|x| Rc::as_ptr(x)).collect();
    let expected: Vec<_> = [2, 0, 1].iter().map(|&i| Rc::as_ptr(&cells[i])).collect();
    assert_eq!(order, expected);

    resort.next(());
    assert!(r.take_values().is_empty());
}

#[test]
fn waits_for_first_comparer() {
    let list = SourceList::from_iter([2, 1]);
    let comparers = Subject::<Comparer<i32>>::new();
    let r = Recorder::new(&list.connect().sort_with(
        comparers.to_observable(),
        Observable::never(),
        SortOptions::default(),
    ));
    assert!(r.take_values().is_empty());
    comparers.next(Rc::new(i32::cmp));
    assert_eq!(r.take_values(), vec![ChangeSet::initial(vec![1, 2])]);
}
