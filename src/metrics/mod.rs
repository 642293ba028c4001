//! Graph metrics
//!
//! Pure functions over an immutable `GraphSnapshot`: weighted degree,
//! shortest-path betweenness (Brandes), and Burt structural constraint.
//! The snapshot multigraph is flattened to an undirected weighted view
//! before computation; parallel edge weights sum.

use crate::graph::GraphSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

mod betweenness;
mod constraint;

/// Per-player metric scores
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerScore {
    pub player_id: Uuid,
    /// Weighted degree, normalized by the snapshot maximum
    pub degree: f64,
    /// Shortest-path betweenness, min-max normalized within the snapshot
    pub betweenness: f64,
    /// Burt structural constraint, raw; `None` for zero-degree nodes
    pub constraint: Option<f64>,
}

/// Metrics computed against exactly one immutable snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResult {
    pub snapshot_id: Uuid,
    pub scores: Vec<PlayerScore>,
}

impl MetricsResult {
    /// Score entry for a player, if present in the snapshot
    pub fn score_for(&self, player_id: Uuid) -> Option<&PlayerScore> {
        self.scores.iter().find(|s| s.player_id == player_id)
    }
}

/// Undirected, integer-indexed view of a snapshot for algorithm execution
pub(crate) struct AdjacencyView {
    pub node_count: usize,
    pub index_to_player: Vec<Uuid>,
    /// adjacency[i] maps neighbor index -> combined edge weight
    pub adjacency: Vec<HashMap<usize, f64>>,
}

impl AdjacencyView {
    pub fn from_snapshot(snapshot: &GraphSnapshot) -> Self {
        let index_to_player: Vec<Uuid> = snapshot.nodes.iter().map(|n| n.player_id).collect();
        let player_to_index: HashMap<Uuid, usize> = index_to_player
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();

        let mut adjacency: Vec<HashMap<usize, f64>> =
            vec![HashMap::new(); index_to_player.len()];
        for edge in &snapshot.edges {
            if edge.weight <= 0.0 || edge.from == edge.to {
                continue;
            }
            // Snapshot verification guarantees both endpoints are present
            let (Some(&a), Some(&b)) = (
                player_to_index.get(&edge.from),
                player_to_index.get(&edge.to),
            ) else {
                continue;
            };
            *adjacency[a].entry(b).or_insert(0.0) += edge.weight;
            *adjacency[b].entry(a).or_insert(0.0) += edge.weight;
        }

        Self {
            node_count: index_to_player.len(),
            index_to_player,
            adjacency,
        }
    }

    /// Sum of incident edge weights
    pub fn strength(&self, idx: usize) -> f64 {
        self.adjacency[idx].values().sum()
    }
}

/// Compute all metrics for a snapshot.
///
/// Results are attached to the snapshot id; callers must not pair them
/// with any other snapshot.
pub fn compute(snapshot: &GraphSnapshot) -> MetricsResult {
    let view = AdjacencyView::from_snapshot(snapshot);

    let strengths: Vec<f64> = (0..view.node_count).map(|i| view.strength(i)).collect();
    let max_strength = strengths.iter().cloned().fold(0.0_f64, f64::max);
    let degree: Vec<f64> = if view.node_count <= 1 || max_strength <= 0.0 {
        vec![0.0; view.node_count]
    } else {
        strengths.iter().map(|s| s / max_strength).collect()
    };

    let betweenness = normalize_min_max(&betweenness::betweenness(&view));
    let constraint = constraint::constraint(&view);

    let scores = (0..view.node_count)
        .map(|i| PlayerScore {
            player_id: view.index_to_player[i],
            degree: degree[i],
            betweenness: betweenness[i],
            constraint: constraint[i],
        })
        .collect();

    MetricsResult {
        snapshot_id: snapshot.id,
        scores,
    }
}

/// Min-max normalization to [0,1]; a degenerate range maps to all zeros
fn normalize_min_max(values: &[f64]) -> Vec<f64> {
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if values.is_empty() || max - min <= f64::EPSILON {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - min) / (max - min)).collect()
}
