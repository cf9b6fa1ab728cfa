//! Run → connection-set membership.
//!
//! Plain data structure owned by the hub actor; never shared. A run has an
//! entry exactly while at least one connection is registered for it.

use std::collections::HashMap;

use super::peer::{ConnectionId, Peer};
use crate::run_id::RunId;

/// Result of removing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unregistered {
    /// The connection was not registered for that run.
    NotMember,
    /// Removed; other connections remain.
    Removed {
        /// Connections still registered for the run.
        remaining: usize,
    },
    /// Removed the last connection, so the run entry is gone too.
    RunClosed,
}

/// Membership table.
#[derive(Debug, Default)]
pub struct Registry {
    runs: HashMap<RunId, HashMap<ConnectionId, Peer>>,
}

impl Registry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `peer` to `run`. Re-registering the same connection is a no-op.
    ///
    /// Returns the run's member count afterwards.
    pub fn register(&mut self, run: RunId, peer: Peer) -> usize {
        let members = self.runs.entry(run).or_default();
        members.entry(peer.id()).or_insert(peer);
        members.len()
    }

    /// Remove connection `id` from `run`, dropping the run entry when empty.
    pub fn unregister(&mut self, run: &RunId, id: ConnectionId) -> Unregistered {
        let Some(members) = self.runs.get_mut(run) else {
            return Unregistered::NotMember;
        };
        if members.remove(&id).is_none() {
            return Unregistered::NotMember;
        }
        if members.is_empty() {
            self.runs.remove(run);
            Unregistered::RunClosed
        } else {
            Unregistered::Removed {
                remaining: members.len(),
            }
        }
    }

    /// Snapshot of `run`'s members, minus `exclude`.
    #[must_use]
    pub fn recipients(&self, run: &RunId, exclude: Option<ConnectionId>) -> Vec<Peer> {
        self.runs
            .get(run)
            .map(|members| {
                members
                    .values()
                    .filter(|peer| Some(peer.id()) != exclude)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Connection ids registered for `run`, sorted.
    #[must_use]
    pub fn members(&self, run: &RunId) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .runs
            .get(run)
            .map(|members| members.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    /// Whether `run` has an entry.
    #[cfg(test)]
    pub(crate) fn contains_run(&self, run: &RunId) -> bool {
        self.runs.contains_key(run)
    }

    /// Number of runs with at least one connection.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Total registered connections across all runs.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.runs.values().map(HashMap::len).sum()
    }

    /// Forget everything. Used at shutdown.
    pub fn clear(&mut self) {
        self.runs.clear();
    }
}
