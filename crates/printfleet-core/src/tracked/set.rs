//! Unordered-collection tracker.

use std::collections::BTreeSet;

use serde::Serialize;

use super::{Accessor, Tracked};

/// Membership diff of two sets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SetChanges<T: Ord> {
    /// Members of the current set missing from the previous one.
    pub inserted: BTreeSet<T>,
    /// Members of the previous set missing from the current one.
    pub removed: BTreeSet<T>,
}

impl<T: Ord> SetChanges<T> {
    /// Whether the diff reports nothing.
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty()
    }
}

/// Symmetric difference of `previous` and `current`, split by side.
pub fn diff_sets<T: Ord + Clone>(previous: &BTreeSet<T>, current: &BTreeSet<T>) -> SetChanges<T> {
    SetChanges {
        inserted: current.difference(previous).cloned().collect(),
        removed: previous.difference(current).cloned().collect(),
    }
}

/// Tracks a set by membership. Order never matters.
pub struct SetTracker<T: Ord> {
    accessor: Accessor<BTreeSet<T>>,
    last: BTreeSet<T>,
}

impl<T: Ord + Clone> SetTracker<T> {
    /// Wrap `accessor`, acknowledging its current value.
    pub fn new(accessor: impl Fn() -> BTreeSet<T> + Send + Sync + 'static) -> Self {
        let last = accessor();
        Self {
            accessor: Box::new(accessor),
            last,
        }
    }

    /// The last acknowledged set.
    pub fn last(&self) -> &BTreeSet<T> {
        &self.last
    }
}

impl<T: Ord + Clone> Tracked for SetTracker<T> {
    type Changes = SetChanges<T>;

    fn has_changed(&self) -> bool {
        (self.accessor)() != self.last
    }

    fn use_changes(&mut self, mark_as_seen: bool) -> SetChanges<T> {
        let current = (self.accessor)();
        let changes = diff_sets(&self.last, &current);
        if mark_as_seen {
            self.last = current;
        }
        changes
    }

    fn view(&mut self) {
        self.last = (self.accessor)();
    }
}
