//! Key/value tracker.

use std::collections::BTreeMap;

use serde::Serialize;

use super::{Accessor, Tracked};

/// Diff of two maps. Added and updated keys are not distinguished.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MapChanges<K: Ord, V> {
    /// Keys that are new, or whose value changed, with their current value.
    pub inserted: BTreeMap<K, V>,
    /// Keys that disappeared, with their last acknowledged value.
    pub removed: BTreeMap<K, V>,
}

impl<K: Ord, V> MapChanges<K, V> {
    /// Whether the diff reports nothing.
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty()
    }
}

/// Diff `current` against `previous`.
pub fn diff_maps<K, V>(previous: &BTreeMap<K, V>, current: &BTreeMap<K, V>) -> MapChanges<K, V>
where
    K: Ord + Clone,
    V: Clone + PartialEq,
{
    let inserted = current
        .iter()
        .filter(|(key, value)| previous.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    let removed = previous
        .iter()
        .filter(|(key, _)| !current.contains_key(*key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    MapChanges { inserted, removed }
}

/// Tracks a map by key set and per-key value equality.
pub struct MapTracker<K: Ord, V> {
    accessor: Accessor<BTreeMap<K, V>>,
    last: BTreeMap<K, V>,
}

impl<K: Ord + Clone, V: Clone + PartialEq> MapTracker<K, V> {
    /// Wrap `accessor`, acknowledging its current value.
    pub fn new(accessor: impl Fn() -> BTreeMap<K, V> + Send + Sync + 'static) -> Self {
        let last = accessor();
        Self {
            accessor: Box::new(accessor),
            last,
        }
    }

    /// The last acknowledged map.
    pub fn last(&self) -> &BTreeMap<K, V> {
        &self.last
    }
}

impl<K: Ord + Clone, V: Clone + PartialEq> Tracked for MapTracker<K, V> {
    type Changes = MapChanges<K, V>;

    fn has_changed(&self) -> bool {
        (self.accessor)() != self.last
    }

    fn use_changes(&mut self, mark_as_seen: bool) -> MapChanges<K, V> {
        let current = (self.accessor)();
        let changes = diff_maps(&self.last, &current);
        if mark_as_seen {
            self.last = current;
        }
        changes
    }

    fn view(&mut self) {
        self.last = (self.accessor)();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn map(pairs: &[(&'static str, i32)]) -> BTreeMap<&'static str, i32> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn value_change_counts_as_inserted() {
        let changes = diff_maps(&map(&[("a", 1), ("b", 2)]), &map(&[("a", 1), ("b", 3)]));
        assert_eq!(changes.inserted, map(&[("b", 3)]));
        assert!(changes.removed.is_empty());
    }

    #[test]
    fn new_and_removed_keys() {
        let changes = diff_maps(&map(&[("a", 1), ("b", 2)]), &map(&[("b", 2), ("c", 9)]));
        assert_eq!(changes.inserted, map(&[("c", 9)]));
        assert_eq!(changes.removed, map(&[("a", 1)]));
    }

    #[test]
    fn tracker_round() {
        let cell = Arc::new(Mutex::new(map(&[("a", 1)])));
        let read = cell.clone();
        let mut tracker = MapTracker::new(move || read.lock().clone());
        assert!(!tracker.has_changed());

        let _ = cell.lock().insert("a", 2);
        assert!(tracker.has_changed());
        assert_eq!(tracker.use_changes(true).inserted, map(&[("a", 2)]));
        assert!(tracker.try_use(true).is_none());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn acknowledged_tracker_reports_nothing(
                initial in proptest::collection::btree_map(0u8..8, 0i32..4, 0..6),
                edits in proptest::collection::vec(proptest::collection::btree_map(0u8..8, 0i32..4, 0..6), 1..5),
            ) {
                let cell = Arc::new(Mutex::new(initial));
                let read = cell.clone();
                let mut tracker = MapTracker::new(move || read.lock().clone());
                for edit in edits {
                    *cell.lock() = edit;
                }
                let _ = tracker.use_changes(true);
                prop_assert!(!tracker.has_changed());
                prop_assert!(tracker.use_changes(false).is_empty());
            }
        }
    }
}
