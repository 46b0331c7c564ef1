//! Ordered-sequence tracker with a positional diff.
//!
//! The diff is index-aligned and O(n), not an edit-distance diff. A single
//! insertion in the middle of a sequence therefore shows up as a run of
//! replace pairs followed by one trailing insertion.

use serde::Serialize;

use super::{Accessor, Tracked};

/// Positional diff of two sequences.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListChanges<T> {
    /// Elements of the current sequence that differ at their position, then
    /// any trailing elements beyond the previous length.
    pub inserted: Vec<T>,
    /// Elements of the previous sequence that differ at their position, then
    /// any trailing elements beyond the current length.
    pub removed: Vec<T>,
    /// The acknowledged snapshot the diff was taken against.
    #[serde(skip)]
    pub previous: Vec<T>,
}

impl<T> ListChanges<T> {
    /// Whether the diff reports nothing.
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty()
    }
}

/// Index-aligned diff of `previous` against `current`.
///
/// Returns `(inserted, removed)`.
pub fn diff_positional<T: Clone + PartialEq>(previous: &[T], current: &[T]) -> (Vec<T>, Vec<T>) {
    let mut inserted = Vec::new();
    let mut removed = Vec::new();

    let shared = previous.len().min(current.len());
    for (old, new) in previous[..shared].iter().zip(&current[..shared]) {
        if old != new {
            removed.push(old.clone());
            inserted.push(new.clone());
        }
    }
    inserted.extend_from_slice(&current[shared..]);
    removed.extend_from_slice(&previous[shared..]);

    (inserted, removed)
}

/// Tracks an ordered sequence by positional equality.
pub struct ListTracker<T> {
    accessor: Accessor<Vec<T>>,
    last: Vec<T>,
}

impl<T: Clone + PartialEq> ListTracker<T> {
    /// Wrap `accessor`, acknowledging its current value.
    pub fn new(accessor: impl Fn() -> Vec<T> + Send + Sync + 'static) -> Self {
        let last = accessor();
        Self {
            accessor: Box::new(accessor),
            last,
        }
    }

    /// The last acknowledged sequence.
    pub fn last(&self) -> &[T] {
        &self.last
    }
}

impl<T: Clone + PartialEq> Tracked for ListTracker<T> {
    type Changes = ListChanges<T>;

    fn has_changed(&self) -> bool {
        (self.accessor)() != self.last
    }

    fn use_changes(&mut self, mark_as_seen: bool) -> ListChanges<T> {
        let current = (self.accessor)();
        let (inserted, removed) = diff_positional(&self.last, &current);
        let previous = if mark_as_seen {
            std::mem::replace(&mut self.last, current)
        } else {
            self.last.clone()
        };
        ListChanges {
            inserted,
            removed,
            previous,
        }
    }

    fn view(&mut self) {
        self.last = (self.accessor)();
    }
}
