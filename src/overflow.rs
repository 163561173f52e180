//! Overflow protection for bucket backlogs.
//!
//! A bucket's overflow queue grows without bound while the server keeps a
//! route throttled; the [`OverflowPolicy`] runs whenever the backlog crosses
//! the configured threshold and decides what to shed. Removing a task leaves
//! its ticket pending forever unless the caller times it out separately;
//! that is the documented contract of shedding, not an accident.
//!
//! Filtering is bounded at two passes per overflow event so the check itself
//! stays cheap. Predicates must not block; they run under the backlog lock.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// What the policy may learn about one queued task.
#[derive(Debug, Clone, Copy)]
pub struct QueuedTask {
    /// The caller already cancelled the ticket.
    pub cancelled: bool,
    /// Time spent in this bucket's overflow queue.
    pub queued_for: Duration,
}

/// Predicate deciding whether one queued task should be removed.
pub type FilterPredicate = Arc<dyn Fn(&QueuedTask) -> bool + Send + Sync>;

/// Decision returned by an [`OverflowPolicy`].
pub enum OverflowAction {
    /// Keep everything; the depth is acceptable.
    Retain,
    /// Drop every queued task.
    RemoveAll,
    /// Remove tasks the predicate selects; optionally run one more pass over
    /// the remainder.
    Filter { predicate: FilterPredicate, second_pass: bool },
}

impl fmt::Debug for OverflowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowAction::Retain => f.write_str("Retain"),
            OverflowAction::RemoveAll => f.write_str("RemoveAll"),
            OverflowAction::Filter { second_pass, .. } => {
                f.debug_struct("Filter").field("second_pass", second_pass).finish()
            }
        }
    }
}

/// Strategy invoked when a bucket backlog crosses its threshold.
pub trait OverflowPolicy: Send + Sync + fmt::Debug {
    fn evaluate(&self, depth: usize) -> OverflowAction;
}

/// Factory producing one policy instance per bucket, so policies may keep
/// per-bucket state.
pub type OverflowPolicyFactory = Arc<dyn Fn() -> Box<dyn OverflowPolicy> + Send + Sync>;

/// Shed nothing, ever. The backlog is allowed to grow.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeepAll;

impl OverflowPolicy for KeepAll {
    fn evaluate(&self, _depth: usize) -> OverflowAction {
        OverflowAction::Retain
    }
}

/// Drop the entire backlog once the threshold is crossed.
#[derive(Debug, Default, Clone, Copy)]
pub struct DropAll;

impl OverflowPolicy for DropAll {
    fn evaluate(&self, _depth: usize) -> OverflowAction {
        OverflowAction::RemoveAll
    }
}

/// Remove tasks whose tickets were already cancelled. The stock default:
/// cancelled tasks would be skipped by the worker anyway, so they are pure
/// backlog weight.
#[derive(Debug, Clone, Copy)]
pub struct DropCancelled {
    second_pass: bool,
}

impl DropCancelled {
    pub fn new() -> Self {
        Self { second_pass: false }
    }

    /// Run a second pass over the survivors of the first.
    pub fn twice() -> Self {
        Self { second_pass: true }
    }
}

impl Default for DropCancelled {
    fn default() -> Self {
        Self::new()
    }
}

impl OverflowPolicy for DropCancelled {
    fn evaluate(&self, _depth: usize) -> OverflowAction {
        OverflowAction::Filter {
            predicate: Arc::new(|task: &QueuedTask| task.cancelled),
            second_pass: self.second_pass,
        }
    }
}

/// Remove tasks that have waited longer than `max_age`; stale work is often
/// pointless to retry.
#[derive(Debug, Clone, Copy)]
pub struct DropOlderThan {
    max_age: Duration,
}

impl DropOlderThan {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }
}

impl OverflowPolicy for DropOlderThan {
    fn evaluate(&self, _depth: usize) -> OverflowAction {
        let max_age = self.max_age;
        OverflowAction::Filter {
            predicate: Arc::new(move |task: &QueuedTask| task.queued_for > max_age),
            second_pass: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_all_retains() {
        assert!(matches!(KeepAll.evaluate(1_000), OverflowAction::Retain));
    }

    #[test]
    fn drop_all_removes_everything() {
        assert!(matches!(DropAll.evaluate(10), OverflowAction::RemoveAll));
    }

    #[test]
    fn drop_cancelled_selects_cancelled_tasks() {
        match DropCancelled::new().evaluate(10) {
            OverflowAction::Filter { predicate, second_pass } => {
                assert!(!second_pass);
                assert!(predicate(&QueuedTask { cancelled: true, queued_for: Duration::ZERO }));
                assert!(!predicate(&QueuedTask { cancelled: false, queued_for: Duration::ZERO }));
            }
            other => panic!("expected filter, got {:?}", other),
        }
        assert!(matches!(
            DropCancelled::twice().evaluate(10),
            OverflowAction::Filter { second_pass: true, .. }
        ));
    }

    #[test]
    fn drop_older_than_selects_stale_tasks() {
        match DropOlderThan::new(Duration::from_secs(30)).evaluate(10) {
            OverflowAction::Filter { predicate, .. } => {
                assert!(predicate(&QueuedTask {
                    cancelled: false,
                    queued_for: Duration::from_secs(31),
                }));
                assert!(!predicate(&QueuedTask {
                    cancelled: false,
                    queued_for: Duration::from_secs(29),
                }));
            }
            other => panic!("expected filter, got {:?}", other),
        }
    }
}
