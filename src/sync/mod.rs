//! Local snapshots of server state, kept in step with the backend by refetch
//! and push notifications.
//!
//! A view never merges: each refetch replaces its snapshot wholesale. Two
//! refetches may overlap; results are tagged with a monotonically increasing
//! sequence number and a result older than the last one applied is dropped.
//! Once a view is unmounted, late results are dropped too.

mod board;
mod detail;

use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, warn};
use serde::Serialize;

use crate::error::{PipewatchError, Result};

pub use board::{Board, BoardView, DashboardReport};
pub use detail::{Detail, DetailView};

/// Lifecycle of a mounted view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Uninitialized,
    Loading,
    Ready,
}

/// Permission to apply the result of one refetch.
#[derive(Debug)]
#[must_use]
pub struct Ticket {
    seq: u64,
}

struct SyncState<T> {
    phase: Phase,
    snapshot: T,
    issued: u64,
    applied: u64,
    detached: bool,
}

/// A snapshot guarded against stale and late refetch results.
pub struct Synced<T> {
    state: Mutex<SyncState<T>>,
}

impl<T: Clone + Default> Default for Synced<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Default> Synced<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SyncState {
                phase: Phase::Uninitialized,
                snapshot: T::default(),
                issued: 0,
                applied: 0,
                detached: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SyncState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a refetch. `None` once the view is detached.
    pub fn begin(&self) -> Option<Ticket> {
        let mut state = self.lock();
        if state.detached {
            return None;
        }
        if state.phase == Phase::Uninitialized {
            state.phase = Phase::Loading;
        }
        state.issued += 1;
        Some(Ticket { seq: state.issued })
    }

    /// Replace the snapshot with a refetch result.
    ///
    /// Returns `false` and leaves the snapshot alone if the view is detached or
    /// a newer result was applied already.
    pub fn apply(&self, ticket: Ticket, snapshot: T) -> bool {
        let mut state = self.lock();
        if state.detached {
            debug!("Discarding refetch #{} for unmounted view", ticket.seq);
            return false;
        }
        if ticket.seq <= state.applied {
            debug!(
                "Discarding stale refetch #{} (already applied #{})",
                ticket.seq, state.applied
            );
            return false;
        }

        state.applied = ticket.seq;
        state.snapshot = snapshot;
        state.phase = Phase::Ready;
        true
    }

    /// Edit the snapshot in place, ahead of any refetch.
    pub fn modify(&self, edit: impl FnOnce(&mut T)) -> bool {
        let mut state = self.lock();
        if state.detached {
            return false;
        }
        edit(&mut state.snapshot);
        true
    }

    pub fn read<R>(&self, view: impl FnOnce(&T) -> R) -> R {
        view(&self.lock().snapshot)
    }

    pub fn snapshot(&self) -> T {
        self.lock().snapshot.clone()
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    pub fn detach(&self) {
        self.lock().detached = true;
    }
}

/// Resolve a read for a snapshot: failures degrade to the empty value.
///
/// A rejected credential still degrades, but is remembered in `rejected` so
/// the caller can report it once the snapshot is applied.
fn settle<T: Default>(result: Result<T>, what: &str, rejected: &mut Option<PipewatchError>) -> T {
    match result {
        Ok(value) => value,
        Err(e) if e.requires_login() => {
            *rejected = Some(e);
            T::default()
        }
        Err(e) => {
            warn!("Failed to fetch {what}, showing none: {e}");
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phases() {
        let synced: Synced<Vec<u32>> = Synced::new();
        assert_eq!(synced.phase(), Phase::Uninitialized);

        let ticket = synced.begin().unwrap();
        assert_eq!(synced.phase(), Phase::Loading);

        assert!(synced.apply(ticket, vec![]));
        assert_eq!(synced.phase(), Phase::Ready);

        // Later refetches stay Ready
        let _ticket = synced.begin().unwrap();
        assert_eq!(synced.phase(), Phase::Ready);
    }

    #[test]
    fn test_out_of_order_result_is_discarded() {
        let synced: Synced<Vec<u32>> = Synced::new();
        let older = synced.begin().unwrap();
        let newer = synced.begin().unwrap();

        assert!(synced.apply(newer, vec![2]));
        assert!(!synced.apply(older, vec![1]));
        assert_eq!(synced.snapshot(), vec![2]);
    }

    #[test]
    fn test_in_order_results_replace_wholesale() {
        let synced: Synced<Vec<u32>> = Synced::new();
        let first = synced.begin().unwrap();
        let second = synced.begin().unwrap();

        assert!(synced.apply(first, vec![1, 2, 3]));
        assert!(synced.apply(second, vec![4]));
        assert_eq!(synced.snapshot(), vec![4]);
    }

    #[test]
    fn test_results_after_detach_are_discarded() {
        let synced: Synced<Vec<u32>> = Synced::new();
        let in_flight = synced.begin().unwrap();

        synced.detach();

        assert!(!synced.apply(in_flight, vec![1]));
        assert!(synced.begin().is_none());
        assert!(!synced.modify(|s| s.push(9)));
        assert!(synced.snapshot().is_empty());
    }

    #[test]
    fn test_modify_applies_immediately() {
        let synced: Synced<Vec<u32>> = Synced::new();
        let ticket = synced.begin().unwrap();
        assert!(synced.apply(ticket, vec![1, 2, 3]));

        assert!(synced.modify(|s| s.retain(|&x| x != 2)));
        assert_eq!(synced.read(Vec::len), 2);
    }

    #[test]
    fn test_settle_degrades_and_remembers_rejection() {
        let mut rejected = None;
        let value: Vec<u32> = settle(
            Err(PipewatchError::Api {
                status: 500,
                message: "boom".into(),
            }),
            "things",
            &mut rejected,
        );
        assert!(value.is_empty());
        assert!(rejected.is_none());

        let value: Vec<u32> = settle(Err(PipewatchError::Unauthorized), "things", &mut rejected);
        assert!(value.is_empty());
        assert!(matches!(rejected, Some(PipewatchError::Unauthorized)));
    }
}
