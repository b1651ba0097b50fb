use serde::{Deserialize, Serialize};

/// Lifecycle of a run. Transitions only move forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Draining,
    Completed,
}

/// Counters and status of a run.
///
/// Only the run controller writes this (through a `watch` sender); everyone
/// else gets copies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub status: RunStatus,
    pub ticks_emitted: u64,
    pub ticks_dispatched: u64,
    /// Ticks that found no free worker.
    pub ticks_dropped: u64,
    /// Emitted ticks that were already overdue when checked.
    pub ticks_late: u64,
}

impl RunState {
    /// Every emitted tick has been either dispatched or dropped.
    pub fn is_balanced(&self) -> bool {
        self.ticks_dispatched + self.ticks_dropped == self.ticks_emitted
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Move to `next` if that is a forward transition. Returns whether the
    /// status changed.
    pub(crate) fn advance(&mut self, next: RunStatus) -> bool {
        if next > self.status {
            tracing::info!(from = ?self.status, to = ?next, "Run status changed");
            self.status = next;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_only_moves_forward() {
        let mut state = RunState::default();
        assert_eq!(state.status, RunStatus::Pending);
        assert!(state.advance(RunStatus::Running));
        assert!(state.advance(RunStatus::Draining));
        assert!(!state.advance(RunStatus::Running));
        assert!(!state.advance(RunStatus::Draining));
        assert!(state.advance(RunStatus::Completed));
        assert!(state.is_completed());
    }

    #[test]
    fn balance() {
        let state = RunState {
            ticks_emitted: 10,
            ticks_dispatched: 7,
            ticks_dropped: 3,
            ..Default::default()
        };
        assert!(state.is_balanced());
        let state = RunState {
            ticks_dropped: 2,
            ..state
        };
        assert!(!state.is_balanced());
    }
}
