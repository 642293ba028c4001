//! Insight composition
//!
//! Merges a snapshot, its metrics, and player metadata into a ranked
//! report: brokers, brokerage opportunities, high-influence risks, and
//! underleveraged allies. Every entry carries a machine-readable reason
//! code and the numeric metric so the narrative layer never has to
//! re-derive the analysis. Natural-language rendering is delegated to a
//! `NarrativeProvider`; a provider failure degrades the entry's
//! narrative, never the report.

use crate::graph::{GraphSnapshot, Player, RelationshipStatus};
use crate::metrics::MetricsResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub mod narrative;

pub use narrative::{
    ApiNarrative, NarrativeError, NarrativeProvider, NarrativeRequest, TemplateNarrative,
};

/// Nodes at or above this normalized centrality count as high influence
const RISK_CENTRALITY_THRESHOLD: f64 = 0.5;
/// Allies at or below this normalized degree count as underleveraged
const UNDERLEVERAGED_DEGREE_THRESHOLD: f64 = 0.25;
/// Related players listed per entry
const RELATED_LIMIT: usize = 3;

/// Machine-readable reason for an insight entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    Broker,
    BrokerageOpportunity,
    HighInfluenceRisk,
    UnderleveragedAlly,
}

/// One ranked entry in an insight report
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightEntry {
    pub player_id: Uuid,
    pub label: String,
    pub reason: ReasonCode,
    pub metric: f64,
    /// Strongest connections of this player, for routing advice
    #[serde(default)]
    pub related_players: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
}

/// Ranked insight report for one snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightReport {
    pub snapshot_id: Uuid,
    pub brokers: Vec<InsightEntry>,
    pub opportunities: Vec<InsightEntry>,
    pub risks: Vec<InsightEntry>,
    pub underleveraged: Vec<InsightEntry>,
    pub partial: bool,
    #[serde(default)]
    pub failed_sources: Vec<String>,
}

/// Composes ranked insight reports
pub struct InsightComposer {
    top_k: usize,
    provider: Box<dyn NarrativeProvider>,
}

impl InsightComposer {
    /// Composer with the deterministic template provider
    pub fn new(top_k: usize) -> Self {
        Self {
            top_k,
            provider: Box::new(TemplateNarrative),
        }
    }

    /// Composer with an explicit narrative provider
    pub fn with_provider(top_k: usize, provider: Box<dyn NarrativeProvider>) -> Self {
        Self { top_k, provider }
    }

    /// Compose a report from a snapshot and its metrics.
    ///
    /// `decrypted_notes` is optional; when absent the report simply
    /// omits note-derived context. Metrics must belong to the snapshot.
    pub fn compose(
        &self,
        snapshot: &GraphSnapshot,
        metrics: &MetricsResult,
        players: &[Player],
        decrypted_notes: Option<&HashMap<Uuid, String>>,
    ) -> InsightReport {
        debug_assert_eq!(metrics.snapshot_id, snapshot.id);

        let by_id: HashMap<Uuid, &Player> = players.iter().map(|p| (p.id, p)).collect();
        let labels: HashMap<Uuid, &str> = snapshot
            .nodes
            .iter()
            .map(|n| (n.player_id, n.label.as_str()))
            .collect();
        let neighbors = strongest_neighbors(snapshot);

        let mut brokers: Vec<(Uuid, f64)> = metrics
            .scores
            .iter()
            .filter(|s| s.betweenness > 0.0)
            .map(|s| (s.player_id, s.betweenness))
            .collect();
        brokers.sort_by(|a, b| b.1.total_cmp(&a.1));
        brokers.truncate(self.top_k);

        let mut opportunities: Vec<(Uuid, f64)> = metrics
            .scores
            .iter()
            .filter_map(|s| s.constraint.map(|c| (s.player_id, c)))
            .collect();
        opportunities.sort_by(|a, b| b.1.total_cmp(&a.1));
        opportunities.truncate(self.top_k);

        let mut risks: Vec<(Uuid, f64)> = metrics
            .scores
            .iter()
            .filter(|s| {
                let hostile = by_id.get(&s.player_id).is_some_and(|p| {
                    matches!(
                        p.relationship_status,
                        RelationshipStatus::Rival | RelationshipStatus::Enemy
                    )
                });
                hostile
                    && (s.degree >= RISK_CENTRALITY_THRESHOLD
                        || s.betweenness >= RISK_CENTRALITY_THRESHOLD)
            })
            .map(|s| (s.player_id, s.degree))
            .collect();
        risks.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut underleveraged: Vec<(Uuid, f64)> = metrics
            .scores
            .iter()
            .filter(|s| {
                by_id
                    .get(&s.player_id)
                    .is_some_and(|p| p.relationship_status == RelationshipStatus::Ally)
                    && s.degree <= UNDERLEVERAGED_DEGREE_THRESHOLD
            })
            .map(|s| (s.player_id, s.degree))
            .collect();
        underleveraged.sort_by(|a, b| a.1.total_cmp(&b.1));

        let entry = |player_id: Uuid, reason: ReasonCode, metric: f64| -> InsightEntry {
            let label = labels
                .get(&player_id)
                .map(|l| l.to_string())
                .unwrap_or_else(|| player_id.to_string());
            let related_players = neighbors.get(&player_id).cloned().unwrap_or_default();

            let request = NarrativeRequest {
                reason,
                player_label: label.clone(),
                metric,
                related_labels: related_players
                    .iter()
                    .filter_map(|id| labels.get(id).map(|l| l.to_string()))
                    .collect(),
                note: decrypted_notes.and_then(|notes| notes.get(&player_id).cloned()),
            };
            let narrative = match self.provider.narrate(&request) {
                Ok(text) => Some(text),
                Err(e) => {
                    tracing::warn!("Narrative provider failed for {}: {}", label, e);
                    None
                }
            };

            InsightEntry {
                player_id,
                label,
                reason,
                metric,
                related_players,
                narrative,
            }
        };

        InsightReport {
            snapshot_id: snapshot.id,
            brokers: brokers
                .into_iter()
                .map(|(id, m)| entry(id, ReasonCode::Broker, m))
                .collect(),
            opportunities: opportunities
                .into_iter()
                .map(|(id, m)| entry(id, ReasonCode::BrokerageOpportunity, m))
                .collect(),
            risks: risks
                .into_iter()
                .map(|(id, m)| entry(id, ReasonCode::HighInfluenceRisk, m))
                .collect(),
            underleveraged: underleveraged
                .into_iter()
                .map(|(id, m)| entry(id, ReasonCode::UnderleveragedAlly, m))
                .collect(),
            partial: snapshot.partial,
            failed_sources: snapshot.failed_sources.clone(),
        }
    }
}

/// Up to `RELATED_LIMIT` strongest-connected neighbors per player
fn strongest_neighbors(snapshot: &GraphSnapshot) -> HashMap<Uuid, Vec<Uuid>> {
    let mut weighted: HashMap<Uuid, Vec<(Uuid, f64)>> = HashMap::new();
    for edge in &snapshot.edges {
        weighted
            .entry(edge.from)
            .or_default()
            .push((edge.to, edge.weight));
        weighted
            .entry(edge.to)
            .or_default()
            .push((edge.from, edge.weight));
    }

    weighted
        .into_iter()
        .map(|(id, mut list)| {
            list.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
            let mut seen = std::collections::HashSet::new();
            let related: Vec<Uuid> = list
                .into_iter()
                .filter(|(n, _)| seen.insert(*n))
                .take(RELATED_LIMIT)
                .map(|(n, _)| n)
                .collect();
            (id, related)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Provenance, SnapshotEdge, SnapshotNode};
    use chrono::Utc;

    struct FailingProvider;

    impl NarrativeProvider for FailingProvider {
        fn narrate(&self, _request: &NarrativeRequest) -> Result<String, NarrativeError> {
            Err(NarrativeError::Communication("offline".to_string()))
        }
    }

    fn fixture() -> (GraphSnapshot, MetricsResult, Vec<Player>) {
        // Star with a hostile center and one detached ally:
        // center 0 connects leaves 1..=3; player 4 is isolated.
        let mut players: Vec<Player> = (0..5).map(|i| Player::new(format!("P{}", i))).collect();
        players.sort_by_key(|p| p.id);
        players[0].relationship_status = RelationshipStatus::Enemy;
        players[4].relationship_status = RelationshipStatus::Ally;

        let nodes: Vec<SnapshotNode> = players
            .iter()
            .map(|p| SnapshotNode {
                player_id: p.id,
                label: p.name.clone(),
            })
            .collect();
        let edges = (1..=3)
            .map(|i| SnapshotEdge {
                from: players[0].id,
                to: players[i].id,
                weight: i as f64,
                provenance: Provenance::Manual,
                reciprocity: None,
            })
            .collect();

        let snapshot = GraphSnapshot {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            as_of: Utc::now(),
            nodes,
            edges,
            partial: true,
            failed_sources: vec!["calendar".to_string()],
        };
        let metrics = crate::metrics::compute(&snapshot);
        (snapshot, metrics, players)
    }

    #[test]
    fn test_report_sections() {
        let (snapshot, metrics, players) = fixture();
        let composer = InsightComposer::new(5);
        let report = composer.compose(&snapshot, &metrics, &players, None);

        // The hostile center is both the top broker and a flagged risk
        assert_eq!(report.brokers[0].player_id, players[0].id);
        assert_eq!(report.brokers[0].reason, ReasonCode::Broker);
        assert_eq!(report.risks.len(), 1);
        assert_eq!(report.risks[0].player_id, players[0].id);

        // The isolated ally is underleveraged
        assert_eq!(report.underleveraged.len(), 1);
        assert_eq!(report.underleveraged[0].player_id, players[4].id);

        // Leaves carry full constraint and fill the opportunity list
        assert!(!report.opportunities.is_empty());

        assert!(report.partial);
        assert_eq!(report.failed_sources, vec!["calendar".to_string()]);
    }

    #[test]
    fn test_related_players_ranked_by_weight() {
        let (snapshot, metrics, players) = fixture();
        let report = InsightComposer::new(5).compose(&snapshot, &metrics, &players, None);

        // The center's strongest tie is the weight-3 leaf
        assert_eq!(report.brokers[0].related_players[0], players[3].id);
    }

    #[test]
    fn test_top_k_truncation() {
        let (snapshot, metrics, players) = fixture();
        let report = InsightComposer::new(2).compose(&snapshot, &metrics, &players, None);
        assert!(report.opportunities.len() <= 2);
        assert!(report.brokers.len() <= 2);
    }

    #[test]
    fn test_provider_failure_degrades_narrative_only() {
        let (snapshot, metrics, players) = fixture();
        let composer = InsightComposer::with_provider(5, Box::new(FailingProvider));
        let report = composer.compose(&snapshot, &metrics, &players, None);

        assert!(!report.brokers.is_empty());
        assert!(report.brokers.iter().all(|e| e.narrative.is_none()));
    }

    #[test]
    fn test_notes_feed_narrative_context() {
        let (snapshot, metrics, players) = fixture();
        let mut notes = HashMap::new();
        notes.insert(players[0].id, "pushing for the budget veto".to_string());

        let composer = InsightComposer::new(5);
        let with_notes = composer.compose(&snapshot, &metrics, &players, Some(&notes));
        let without = composer.compose(&snapshot, &metrics, &players, None);

        let narrated = with_notes.brokers[0].narrative.as_ref().unwrap();
        assert!(narrated.contains("budget veto"));
        assert!(!without.brokers[0]
            .narrative
            .as_ref()
            .unwrap()
            .contains("budget veto"));
    }
}
