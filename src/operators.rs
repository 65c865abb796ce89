use crate::{ChangeSet, Observer, Result};

mod auto_refresh;
mod combine;
mod edit_diff;
mod group;
mod ingest;
mod merge_many;
mod sort;
mod switch;
mod transform;
mod window;

pub use auto_refresh::*;
pub use combine::*;
pub use group::*;
pub use ingest::*;
pub use merge_many::*;
pub use sort::*;
pub use switch::*;
pub use window::*;

/// Drops empty change-sets, except the first one an operator emits.
#[derive(Default)]
pub(crate) struct EmitGate {
    has_emitted: bool,
}

impl EmitGate {
    pub fn pass<T>(&mut self, changes: ChangeSet<T>) -> Option<ChangeSet<T>> {
        if changes.is_empty() && self.has_emitted {
            return None;
        }
        self.has_emitted = true;
        Some(changes)
    }
    pub fn has_emitted(&self) -> bool {
        self.has_emitted
    }
}

/// Sends the outcome of one step of an operator to `o`.
///
/// Operators compute their output while holding their state and call this after releasing
/// it, so downstream code may feed the operator again without a double borrow.
pub(crate) fn emit<T: 'static>(o: &Observer<ChangeSet<T>>, out: Result<Option<ChangeSet<T>>>) {
    match out {
        Ok(Some(changes)) => o.next(changes),
        Ok(None) => {}
        Err(e) => o.error(e),
    }
}
