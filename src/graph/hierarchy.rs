//! Formal reports-to hierarchy
//!
//! The hierarchy is a parent-pointer forest, kept separate from the
//! informal edge list: each player has at most one manager and the
//! manager chain can never loop. Both invariants are enforced at
//! insertion time so the stored forest is always valid.

use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Rejected relationship edit; the existing forest is left unchanged
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    /// The player already reports to a different manager
    #[error("Player {player} already reports to {existing_manager}")]
    DuplicateParent {
        player: Uuid,
        existing_manager: Uuid,
    },

    /// The edit would close a reporting cycle
    #[error("Edge {manager} -> {player} would create a reporting cycle")]
    Cycle { manager: Uuid, player: Uuid },

    /// A player cannot report to themselves
    #[error("Player {player} cannot report to themselves")]
    SelfReport { player: Uuid },
}

/// Parent-pointer forest of formal reporting edges
#[derive(Debug, Clone, Default)]
pub struct ReportingForest {
    /// player -> manager
    parent: HashMap<Uuid, Uuid>,
}

impl ReportingForest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `player` reports to `manager`.
    ///
    /// Re-asserting the existing manager is a no-op. Fails with
    /// `ConflictError` on self-edges, a second parent, or a cycle,
    /// leaving the forest untouched.
    pub fn set_manager(&mut self, manager: Uuid, player: Uuid) -> Result<(), ConflictError> {
        if manager == player {
            return Err(ConflictError::SelfReport { player });
        }

        if let Some(&existing) = self.parent.get(&player) {
            if existing == manager {
                return Ok(());
            }
            return Err(ConflictError::DuplicateParent {
                player,
                existing_manager: existing,
            });
        }

        // Walk up from the proposed manager; reaching `player` means the
        // new edge would close a loop.
        let mut cursor = manager;
        while let Some(&above) = self.parent.get(&cursor) {
            if above == player {
                return Err(ConflictError::Cycle { manager, player });
            }
            cursor = above;
        }

        self.parent.insert(player, manager);
        Ok(())
    }

    /// The player's manager, if any
    pub fn manager_of(&self, player: Uuid) -> Option<Uuid> {
        self.parent.get(&player).copied()
    }

    /// Direct reports of a manager
    pub fn reports_of(&self, manager: Uuid) -> Vec<Uuid> {
        let mut reports: Vec<Uuid> = self
            .parent
            .iter()
            .filter(|(_, &m)| m == manager)
            .map(|(&p, _)| p)
            .collect();
        reports.sort();
        reports
    }

    /// Remove the player's reporting edge, if present
    pub fn clear_manager(&mut self, player: Uuid) -> bool {
        self.parent.remove(&player).is_some()
    }

    /// Cascade removal when a player is deleted: drops their own
    /// reporting edge and detaches all of their direct reports.
    pub fn remove_player(&mut self, player: Uuid) {
        self.parent.remove(&player);
        self.parent.retain(|_, manager| *manager != player);
    }

    /// All (manager, player) edges, deterministically ordered
    pub fn edges(&self) -> Vec<(Uuid, Uuid)> {
        let mut edges: Vec<(Uuid, Uuid)> = self.parent.iter().map(|(&p, &m)| (m, p)).collect();
        edges.sort();
        edges
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn test_simple_chain() {
        let p = ids(3);
        let mut forest = ReportingForest::new();
        forest.set_manager(p[0], p[1]).unwrap();
        forest.set_manager(p[1], p[2]).unwrap();
        assert_eq!(forest.manager_of(p[1]), Some(p[0]));
        assert_eq!(forest.manager_of(p[2]), Some(p[1]));
        assert_eq!(forest.reports_of(p[0]), vec![p[1]]);
    }

    #[test]
    fn test_second_parent_rejected() {
        let p = ids(3);
        let mut forest = ReportingForest::new();
        forest.set_manager(p[0], p[2]).unwrap();
        let err = forest.set_manager(p[1], p[2]).unwrap_err();
        assert_eq!(
            err,
            ConflictError::DuplicateParent {
                player: p[2],
                existing_manager: p[0],
            }
        );
        // Forest unchanged
        assert_eq!(forest.manager_of(p[2]), Some(p[0]));
    }

    #[test]
    fn test_reassert_same_manager_is_noop() {
        let p = ids(2);
        let mut forest = ReportingForest::new();
        forest.set_manager(p[0], p[1]).unwrap();
        assert!(forest.set_manager(p[0], p[1]).is_ok());
        assert_eq!(forest.len(), 1);
    }

    #[test]
    fn test_cycle_rejected() {
        // A manages B, C manages A; then B managing A would loop.
        let (a, b, c) = {
            let p = ids(3);
            (p[0], p[1], p[2])
        };
        let mut forest = ReportingForest::new();
        forest.set_manager(a, b).unwrap();
        forest.set_manager(c, a).unwrap();

        let err = forest.set_manager(b, a).unwrap_err();
        // A already reports to C, so the duplicate parent fires first
        assert!(matches!(err, ConflictError::DuplicateParent { .. }));

        // Direct two-node loop without an existing parent
        let mut forest = ReportingForest::new();
        forest.set_manager(a, b).unwrap();
        let err = forest.set_manager(b, a).unwrap_err();
        assert_eq!(err, ConflictError::Cycle { manager: b, player: a });
        assert_eq!(forest.manager_of(a), None);
    }

    #[test]
    fn test_deep_cycle_rejected() {
        let p = ids(4);
        let mut forest = ReportingForest::new();
        forest.set_manager(p[0], p[1]).unwrap();
        forest.set_manager(p[1], p[2]).unwrap();
        forest.set_manager(p[2], p[3]).unwrap();
        let err = forest.set_manager(p[3], p[0]).unwrap_err();
        assert!(matches!(err, ConflictError::Cycle { .. }));
    }

    #[test]
    fn test_self_report_rejected() {
        let p = ids(1);
        let mut forest = ReportingForest::new();
        assert!(matches!(
            forest.set_manager(p[0], p[0]),
            Err(ConflictError::SelfReport { .. })
        ));
    }

    #[test]
    fn test_remove_player_cascades() {
        let p = ids(3);
        let mut forest = ReportingForest::new();
        forest.set_manager(p[0], p[1]).unwrap();
        forest.set_manager(p[1], p[2]).unwrap();

        forest.remove_player(p[1]);
        assert_eq!(forest.manager_of(p[1]), None);
        assert_eq!(forest.manager_of(p[2]), None);
        assert!(forest.is_empty());
    }
}
