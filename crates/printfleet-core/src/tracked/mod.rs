//! Change tracking over observed values.
//!
//! A tracker wraps an accessor returning the *current* value of some observed
//! quantity and keeps the last *acknowledged* snapshot of it. "Changed" is
//! always relative to that snapshot: any number of mutations between two
//! acknowledgements collapse into a single diff.
//!
//! | Tracker | Equality | Diff |
//! |---------|----------|------|
//! | [`ValueTracker`] | value | previous / current |
//! | [`ListTracker`] | positional | index-aligned replace pairs plus tail |
//! | [`SetTracker`] | membership | symmetric difference |
//! | [`MapTracker`] | keys and values | added-or-updated / removed |
//!
//! Trackers do not synchronize internally. The owner serializes access.

pub mod list;
pub mod map;
pub mod set;
pub mod value;

pub use list::{ListChanges, ListTracker, diff_positional};
pub use map::{MapChanges, MapTracker, diff_maps};
pub use set::{SetChanges, SetTracker, diff_sets};
pub use value::{ScalarChange, ValueTracker};

/// Accessor returning the current value of a tracked quantity.
pub type Accessor<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Common contract of every tracker.
pub trait Tracked {
    /// Diff produced by [`Tracked::use_changes`].
    type Changes;

    /// Whether the current value differs from the last acknowledged snapshot.
    fn has_changed(&self) -> bool;

    /// Compute the diff between the acknowledged snapshot and the current
    /// value. With `mark_as_seen` the current value read for the diff becomes
    /// the new acknowledged snapshot; without it the diff can be recomputed
    /// later without losing anything.
    fn use_changes(&mut self, mark_as_seen: bool) -> Self::Changes;

    /// Acknowledge the current value without computing a diff.
    fn view(&mut self);

    /// Like [`Tracked::use_changes`], but returns `None` when nothing changed.
    fn try_use(&mut self, mark_as_seen: bool) -> Option<Self::Changes> {
        if self.has_changed() {
            Some(self.use_changes(mark_as_seen))
        } else {
            None
        }
    }
}
