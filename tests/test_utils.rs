#![allow(dead_code)]
use livelist::*;

/// Replays every change-set received so far onto `items`.
pub fn materialize<T: Clone>(r: &Recorder<ChangeSet<T>>, items: &mut Vec<T>) {
    for c in r.take_values() {
        c.apply_to(items).unwrap();
    }
}

/// Subscribes to `source` and returns what its change-sets describe.
pub fn snapshot<T: Clone>(source: &Observable<ChangeSet<T>>) -> Vec<T> {
    let r = Recorder::new(source);
    let mut items = Vec::new();
    materialize(&r, &mut items);
    items
}
