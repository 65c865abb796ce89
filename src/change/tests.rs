use pretty_assertions::assert_eq;

use super::*;

#[test]
fn range_items_are_counted_individually() {
    let cs = ChangeSet::from(vec![
        Change::AddRange {
            items: vec![1, 2, 3, 4, 5],
            index: 0,
        },
        Change::Remove { item: 3, index: 2 },
        Change::Move {
            item: 5,
            index: 0,
            previous_index: 3,
        },
    ]);
    assert_eq!(cs.len(), 3);
    assert_eq!(cs.adds(), 5);
    assert_eq!(cs.removes(), 1);
    assert_eq!(cs.moves(), 1);
    assert_eq!(cs.replaced(), 0);
    assert_eq!(cs.refreshes(), 0);
    assert_eq!(cs.total_changes(), 7);
}

#[test]
fn clear_counts_every_removed_item() {
    let cs = ChangeSet::from(vec![Change::Clear {
        items: vec!["a", "b", "c"],
    }]);
    assert_eq!(cs.removes(), 3);
    assert_eq!(cs.total_changes(), 3);
    assert_eq!(cs[0].reason(), ChangeReason::Clear);
}

#[test]
fn initial_of_empty_is_empty() {
    let cs = ChangeSet::<i32>::initial(Vec::new());
    assert!(cs.is_empty());

    let cs = ChangeSet::initial(vec![1, 2]);
    assert_eq!(
        cs.as_slice(),
        &[Change::AddRange {
            items: vec![1, 2],
            index: 0
        }]
    );
}

#[test]
fn apply_in_order() {
    let mut items = vec![10, 20, 30];
    let cs = ChangeSet::from(vec![
        Change::Add { item: 5, index: 0 },
        Change::Move {
            item: 5,
            index: 3,
            previous_index: 0,
        },
        Change::Replace {
            item: 21,
            previous: 20,
            index: 1,
            previous_index: 1,
        },
        Change::RemoveRange {
            items: vec![10, 21],
            index: 0,
        },
        Change::AddRange {
            items: vec![1, 2],
            index: 1,
        },
        Change::Refresh { item: 2, index: 2 },
    ]);
    cs.apply_to(&mut items).unwrap();
    assert_eq!(items, vec![30, 1, 2, 5]);
}

#[test]
fn replace_with_different_indices_moves_the_new_item() {
    let mut items = vec!['a', 'b', 'c'];
    Change::Replace {
        item: 'x',
        previous: 'a',
        index: 2,
        previous_index: 0,
    }
    .apply_to(&mut items)
    .unwrap();
    assert_eq!(items, vec!['b', 'c', 'x']);
}

#[test]
fn apply_out_of_range_fails_without_modification() {
    let mut items = vec![1, 2];
    let e = Change::Remove { item: 9, index: 2 }
        .apply_to(&mut items)
        .unwrap_err();
    assert!(e.is_out_of_range());
    assert_eq!(items, vec![1, 2]);

    let e = Change::RemoveRange {
        items: vec![2, 3],
        index: 1,
    }
    .apply_to(&mut items)
    .unwrap_err();
    assert!(e.is_out_of_range());
    assert_eq!(items, vec![1, 2]);
}

#[test]
fn map_keeps_shape() {
    let cs = ChangeSet::from(vec![
        Change::Replace {
            item: 2,
            previous: 1,
            index: 0,
            previous_index: 0,
        },
        Change::Clear { items: vec![2] },
    ]);
    let mapped = cs.map(|x| x.to_string());
    assert_eq!(
        mapped.as_slice(),
        &[
            Change::Replace {
                item: "2".to_string(),
                previous: "1".to_string(),
                index: 0,
                previous_index: 0,
            },
            Change::Clear {
                items: vec!["2".to_string()]
            },
        ]
    );
}

#[test]
fn items_iterates_current_items() {
    let single = Change::Replace {
        item: 2,
        previous: 1,
        index: 0,
        previous_index: 0,
    };
    assert_eq!(single.items().copied().collect::<Vec<_>>(), vec![2]);
    let range = Change::AddRange {
        items: vec![3, 4],
        index: 0,
    };
    assert_eq!(range.items().copied().collect::<Vec<_>>(), vec![3, 4]);
    assert_eq!(ChangeReason::AddRange.to_string(), "AddRange");
}
