//! Scalar tracker.

use serde::Serialize;

use super::{Accessor, Tracked};

/// Before/after pair of a scalar.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScalarChange<T> {
    /// Last acknowledged value.
    pub previous: T,
    /// Value observed when the change was taken.
    pub current: T,
}

/// Tracks a single value by equality.
pub struct ValueTracker<T> {
    accessor: Accessor<T>,
    last: T,
}

impl<T: Clone + PartialEq> ValueTracker<T> {
    /// Wrap `accessor`, acknowledging its current value.
    pub fn new(accessor: impl Fn() -> T + Send + Sync + 'static) -> Self {
        let last = accessor();
        Self {
            accessor: Box::new(accessor),
            last,
        }
    }

    /// The last acknowledged value.
    pub fn last(&self) -> &T {
        &self.last
    }
}

impl<T: Clone + PartialEq> Tracked for ValueTracker<T> {
    type Changes = ScalarChange<T>;

    fn has_changed(&self) -> bool {
        (self.accessor)() != self.last
    }

    fn use_changes(&mut self, mark_as_seen: bool) -> ScalarChange<T> {
        let current = (self.accessor)();
        let change = ScalarChange {
            previous: self.last.clone(),
            current: current.clone(),
        };
        if mark_as_seen {
            self.last = current;
        }
        change
    }

    fn view(&mut self) {
        self.last = (self.accessor)();
    }
}
