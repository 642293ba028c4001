//! Snapshot construction
//!
//! `GraphBuilder::build` is deterministic for identical inputs and `as_of`
//! time: formal edges carry a fixed weight, informal edges their manual
//! weight, and communication events accumulate into decayed derived
//! weights which merge with manual weights under the configured policy.

use crate::config::{EngineConfig, MergePolicy};
use crate::error::{PowerMapError, Result};
use crate::graph::{
    CommunicationEvent, GraphSnapshot, Provenance, Relationship, RelationshipKind,
    ReportingForest, Roster, SnapshotEdge, SnapshotNode, SourceKind,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// A communication event with participants resolved to player ids
#[derive(Debug, Clone)]
pub struct ResolvedEvent {
    pub source: SourceKind,
    pub participants: Vec<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub weight_hint: f64,
}

/// Everything a snapshot build needs, captured at one point in time
#[derive(Debug, Clone, Default)]
pub struct BuildInputs {
    pub players: Vec<(Uuid, String)>,
    /// (manager, player) formal edges
    pub formal: Vec<(Uuid, Uuid)>,
    pub informal: Vec<Relationship>,
    pub events: Vec<ResolvedEvent>,
    pub failed_sources: Vec<String>,
}

impl BuildInputs {
    /// Resolve normalized events against a roster, creating first-seen
    /// players, and capture the tenant state as build inputs.
    pub fn resolve(
        roster: &mut Roster,
        forest: &ReportingForest,
        informal: &[Relationship],
        events: &[CommunicationEvent],
        failed_sources: Vec<String>,
    ) -> Self {
        let resolved: Vec<ResolvedEvent> = events
            .iter()
            .map(|event| ResolvedEvent {
                source: event.source,
                participants: event
                    .participants
                    .iter()
                    .map(|handle| roster.resolve_or_create(handle))
                    .collect(),
                timestamp: event.timestamp,
                weight_hint: event.weight_hint,
            })
            .collect();

        let mut players: Vec<(Uuid, String)> = roster
            .players()
            .map(|p| (p.id, p.name.clone()))
            .collect();
        players.sort();

        Self {
            players,
            formal: forest.edges(),
            informal: informal.to_vec(),
            events: resolved,
            failed_sources,
        }
    }
}

/// Accumulated state for one unordered player pair
#[derive(Debug, Clone, Copy, Default)]
struct PairAccumulator {
    /// Strongest manual informal weight, with its original direction
    manual: Option<(f64, Uuid, Uuid)>,
    /// Sum of decayed communication contributions
    derived: f64,
    /// Directed totals for reciprocity, keyed low -> high / high -> low
    forward: f64,
    backward: f64,
}

/// Builds per-tenant graph snapshots
pub struct GraphBuilder {
    config: EngineConfig,
}

impl GraphBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Exponential decay of an event's contribution by age.
    ///
    /// Half-life comes from configuration; contributions outside the
    /// retention window are floored to zero. Future-dated events count
    /// at full weight.
    pub fn decay(&self, age: chrono::Duration) -> f64 {
        let days = age.num_seconds() as f64 / SECONDS_PER_DAY;
        if days <= 0.0 {
            return 1.0;
        }
        if days > self.config.retention_days as f64 {
            return 0.0;
        }
        2_f64.powf(-days / self.config.half_life_days as f64)
    }

    /// Build a snapshot. Deterministic for identical inputs and `as_of`.
    pub fn build(
        &self,
        tenant_id: Uuid,
        inputs: &BuildInputs,
        as_of: DateTime<Utc>,
    ) -> Result<GraphSnapshot> {
        let known: HashSet<Uuid> = inputs.players.iter().map(|(id, _)| *id).collect();

        let mut edges: Vec<SnapshotEdge> = Vec::new();

        // Formal edges: hierarchy is certain, fixed high weight.
        for &(manager, player) in &inputs.formal {
            Self::check_endpoint(&known, manager)?;
            Self::check_endpoint(&known, player)?;
            edges.push(SnapshotEdge {
                from: manager,
                to: player,
                weight: self.config.formal_edge_weight,
                provenance: Provenance::Manual,
                reciprocity: None,
            });
        }

        // Accumulate manual informal weights and decayed event
        // contributions per unordered pair. BTreeMap keeps the merge
        // pass deterministic.
        let mut pairs: BTreeMap<(Uuid, Uuid), PairAccumulator> = BTreeMap::new();

        for rel in &inputs.informal {
            let strength = match rel.kind {
                RelationshipKind::Informal { strength, .. } => strength as f64,
                RelationshipKind::Formal => {
                    return Err(PowerMapError::GraphBuild(
                        "formal relationship in informal edge list".to_string(),
                    ))
                }
            };
            Self::check_endpoint(&known, rel.from_player)?;
            Self::check_endpoint(&known, rel.to_player)?;

            let acc = pairs
                .entry(ordered_pair(rel.from_player, rel.to_player))
                .or_default();
            match acc.manual {
                Some((existing, _, _)) if existing >= strength => {}
                _ => acc.manual = Some((strength, rel.from_player, rel.to_player)),
            }
        }

        for event in &inputs.events {
            if event.weight_hint < 0.0 {
                return Err(PowerMapError::GraphBuild(format!(
                    "negative event weight hint: {}",
                    event.weight_hint
                )));
            }
            let contribution = event.weight_hint * self.decay(as_of - event.timestamp);
            if contribution <= 0.0 {
                continue;
            }

            for (a, b) in event_pairs(event) {
                Self::check_endpoint(&known, a)?;
                Self::check_endpoint(&known, b)?;
                let key = ordered_pair(a, b);
                let acc = pairs.entry(key).or_default();
                acc.derived += contribution;
                if (a, b) == key {
                    acc.forward += contribution;
                } else {
                    acc.backward += contribution;
                }
            }
        }

        // Merge manual and derived weights per pair.
        for ((low, high), acc) in &pairs {
            let edge = match (acc.manual, acc.derived > 0.0) {
                (Some((manual, from, to)), true) => {
                    let weight = match self.config.merge_policy {
                        MergePolicy::Max => manual.max(acc.derived),
                        MergePolicy::Sum => manual + acc.derived,
                        MergePolicy::Override => manual,
                    };
                    SnapshotEdge {
                        from,
                        to,
                        weight,
                        provenance: Provenance::Both,
                        reciprocity: Some(acc.reciprocity()),
                    }
                }
                (Some((manual, from, to)), false) => SnapshotEdge {
                    from,
                    to,
                    weight: manual,
                    provenance: Provenance::Manual,
                    reciprocity: None,
                },
                (None, true) => SnapshotEdge {
                    from: *low,
                    to: *high,
                    weight: acc.derived,
                    provenance: Provenance::Derived,
                    reciprocity: Some(acc.reciprocity()),
                },
                (None, false) => continue,
            };
            edges.push(edge);
        }

        let mut nodes: Vec<SnapshotNode> = inputs
            .players
            .iter()
            .map(|(id, name)| SnapshotNode {
                player_id: *id,
                label: name.clone(),
            })
            .collect();
        nodes.sort_by_key(|n| n.player_id);
        edges.sort_by(|a, b| (a.from, a.to).cmp(&(b.from, b.to)));

        let snapshot = GraphSnapshot {
            id: Uuid::new_v4(),
            tenant_id,
            as_of,
            nodes,
            edges,
            partial: !inputs.failed_sources.is_empty(),
            failed_sources: inputs.failed_sources.clone(),
        };

        self.verify(&snapshot)?;

        tracing::debug!(
            "Built snapshot {} for tenant {}: {} nodes, {} edges{}",
            snapshot.id,
            tenant_id,
            snapshot.nodes.len(),
            snapshot.edges.len(),
            if snapshot.partial { " (partial)" } else { "" }
        );

        Ok(snapshot)
    }

    fn check_endpoint(known: &HashSet<Uuid>, id: Uuid) -> Result<()> {
        if known.contains(&id) {
            Ok(())
        } else {
            Err(PowerMapError::GraphBuild(format!(
                "edge references unknown player {}",
                id
            )))
        }
    }

    /// Node set must be a superset of all edge endpoints, and every
    /// weight must be a non-negative finite number.
    fn verify(&self, snapshot: &GraphSnapshot) -> Result<()> {
        let nodes: HashSet<Uuid> = snapshot.nodes.iter().map(|n| n.player_id).collect();
        for edge in &snapshot.edges {
            if !nodes.contains(&edge.from) || !nodes.contains(&edge.to) {
                return Err(PowerMapError::GraphBuild(format!(
                    "dangling edge {} -> {}",
                    edge.from, edge.to
                )));
            }
            if !edge.weight.is_finite() || edge.weight < 0.0 {
                return Err(PowerMapError::GraphBuild(format!(
                    "invalid edge weight {} on {} -> {}",
                    edge.weight, edge.from, edge.to
                )));
            }
        }
        Ok(())
    }
}

impl PairAccumulator {
    /// Balance of the two directed totals: 1.0 is perfectly mutual,
    /// 0.0 is one-way traffic.
    fn reciprocity(&self) -> f64 {
        let max = self.forward.max(self.backward);
        if max <= 0.0 {
            return 0.0;
        }
        self.forward.min(self.backward) / max
    }
}

fn ordered_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Expand an event into contributing pairs. Messages connect the sender
/// to each recipient; meetings connect every attendee pair.
fn event_pairs(event: &ResolvedEvent) -> Vec<(Uuid, Uuid)> {
    let participants = &event.participants;
    let mut out = Vec::new();
    match event.source {
        SourceKind::Message => {
            if let Some((&sender, recipients)) = participants.split_first() {
                for &recipient in recipients {
                    if recipient != sender {
                        out.push((sender, recipient));
                    }
                }
            }
        }
        SourceKind::Meeting => {
            for i in 0..participants.len() {
                for j in (i + 1)..participants.len() {
                    if participants[i] != participants[j] {
                        out.push((participants[i], participants[j]));
                    }
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TieType;
    use chrono::{Duration, TimeZone};

    fn builder() -> GraphBuilder {
        GraphBuilder::new(EngineConfig::default())
    }

    fn as_of() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn players(n: usize) -> Vec<(Uuid, String)> {
        let mut out: Vec<(Uuid, String)> = (0..n)
            .map(|i| (Uuid::new_v4(), format!("P{}", i)))
            .collect();
        out.sort();
        out
    }

    fn message(from: Uuid, to: Uuid, at: DateTime<Utc>, hint: f64) -> ResolvedEvent {
        ResolvedEvent {
            source: SourceKind::Message,
            participants: vec![from, to],
            timestamp: at,
            weight_hint: hint,
        }
    }

    #[test]
    fn test_decay_half_life_is_exact() {
        let b = builder();
        assert_eq!(b.decay(Duration::zero()), 1.0);
        let half = b.decay(Duration::days(30));
        assert!((half - 0.5).abs() < 1e-12);
        // Outside the retention window the contribution is floored
        assert_eq!(b.decay(Duration::days(91)), 0.0);
    }

    #[test]
    fn test_empty_graph_is_valid() {
        let snapshot = builder()
            .build(Uuid::new_v4(), &BuildInputs::default(), as_of())
            .unwrap();
        assert!(snapshot.nodes.is_empty());
        assert!(snapshot.edges.is_empty());
        assert!(!snapshot.partial);
    }

    #[test]
    fn test_isolated_players_are_zero_degree_nodes() {
        let ps = players(3);
        let inputs = BuildInputs {
            players: ps.clone(),
            ..Default::default()
        };
        let snapshot = builder().build(Uuid::new_v4(), &inputs, as_of()).unwrap();
        assert_eq!(snapshot.nodes.len(), 3);
        assert!(snapshot.edges.is_empty());
    }

    #[test]
    fn test_reference_scenario() {
        // A manages B; 10 messages between B and C over the last 5 days.
        let ps = players(3);
        let (a, b, c) = (ps[0].0, ps[1].0, ps[2].0);
        let five_days_ago = as_of() - Duration::days(5);

        let events: Vec<ResolvedEvent> = (0..10)
            .map(|i| message(b, c, five_days_ago + Duration::seconds(i), 1.0))
            .collect();

        let inputs = BuildInputs {
            players: ps,
            formal: vec![(a, b)],
            events,
            ..Default::default()
        };
        let snapshot = builder().build(Uuid::new_v4(), &inputs, as_of()).unwrap();

        let bc = snapshot
            .edges
            .iter()
            .find(|e| e.provenance == Provenance::Derived)
            .unwrap();
        assert!(
            (bc.from == b && bc.to == c) || (bc.from == c && bc.to == b),
            "derived edge must connect B and C"
        );
        let expected = 10.0 * 2_f64.powf(-5.0 / 30.0);
        assert!(
            (bc.weight - expected).abs() < 1e-6,
            "got {}, expected {}",
            bc.weight,
            expected
        );

        let formal = snapshot
            .edges
            .iter()
            .find(|e| e.from == a && e.to == b)
            .unwrap();
        assert_eq!(formal.weight, 10.0);
        assert_eq!(formal.provenance, Provenance::Manual);
    }

    #[test]
    fn test_duplicate_pair_events_sum() {
        let ps = players(2);
        let (a, b) = (ps[0].0, ps[1].0);
        let now = as_of();
        let inputs = BuildInputs {
            players: ps,
            events: vec![message(a, b, now, 1.0), message(b, a, now, 1.0)],
            ..Default::default()
        };
        let snapshot = builder().build(Uuid::new_v4(), &inputs, now).unwrap();
        assert_eq!(snapshot.edges.len(), 1);
        assert!((snapshot.edges[0].weight - 2.0).abs() < 1e-12);
        // Balanced traffic in both directions
        assert_eq!(snapshot.edges[0].reciprocity, Some(1.0));
    }

    #[test]
    fn test_merge_policy_max_keeps_manual_floor() {
        let ps = players(2);
        let (a, b) = (ps[0].0, ps[1].0);
        let now = as_of();
        let informal = vec![Relationship::informal(a, b, TieType::Alliance, 7).unwrap()];

        // Derived weight well below the manual weight
        let inputs = BuildInputs {
            players: ps.clone(),
            informal: informal.clone(),
            events: vec![message(a, b, now - Duration::days(60), 1.0)],
            ..Default::default()
        };
        let snapshot = builder().build(Uuid::new_v4(), &inputs, now).unwrap();
        assert_eq!(snapshot.edges.len(), 1);
        assert_eq!(snapshot.edges[0].weight, 7.0);
        assert_eq!(snapshot.edges[0].provenance, Provenance::Both);

        // Sum policy adds the contributions instead
        let mut config = EngineConfig::default();
        config.merge_policy = MergePolicy::Sum;
        let snapshot = GraphBuilder::new(config)
            .build(Uuid::new_v4(), &inputs, now)
            .unwrap();
        assert!(snapshot.edges[0].weight > 7.0);
    }

    #[test]
    fn test_manual_only_edge_keeps_direction_and_provenance() {
        let ps = players(2);
        let (a, b) = (ps[1].0, ps[0].0); // deliberately reversed order
        let informal = vec![Relationship::informal(a, b, TieType::Mentorship, 4).unwrap()];
        let inputs = BuildInputs {
            players: ps,
            informal,
            ..Default::default()
        };
        let snapshot = builder().build(Uuid::new_v4(), &inputs, as_of()).unwrap();
        assert_eq!(snapshot.edges.len(), 1);
        assert_eq!(snapshot.edges[0].from, a);
        assert_eq!(snapshot.edges[0].to, b);
        assert_eq!(snapshot.edges[0].provenance, Provenance::Manual);
        assert_eq!(snapshot.edges[0].reciprocity, None);
    }

    #[test]
    fn test_meeting_connects_all_pairs() {
        let ps = players(3);
        let now = as_of();
        let inputs = BuildInputs {
            players: ps.clone(),
            events: vec![ResolvedEvent {
                source: SourceKind::Meeting,
                participants: ps.iter().map(|(id, _)| *id).collect(),
                timestamp: now,
                weight_hint: 2.0,
            }],
            ..Default::default()
        };
        let snapshot = builder().build(Uuid::new_v4(), &inputs, now).unwrap();
        assert_eq!(snapshot.edges.len(), 3);
        for edge in &snapshot.edges {
            assert!((edge.weight - 2.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_dangling_edge_aborts_build() {
        let ps = players(1);
        let inputs = BuildInputs {
            players: ps,
            formal: vec![(Uuid::new_v4(), Uuid::new_v4())],
            ..Default::default()
        };
        let err = builder().build(Uuid::new_v4(), &inputs, as_of()).unwrap_err();
        assert!(matches!(err, PowerMapError::GraphBuild(_)));
    }

    #[test]
    fn test_build_is_deterministic() {
        let ps = players(4);
        let now = as_of();
        let inputs = BuildInputs {
            players: ps.clone(),
            formal: vec![(ps[0].0, ps[1].0)],
            informal: vec![
                Relationship::informal(ps[2].0, ps[3].0, TieType::Alliance, 3).unwrap(),
            ],
            events: vec![message(ps[1].0, ps[2].0, now - Duration::days(3), 1.0)],
            ..Default::default()
        };

        let b = builder();
        let s1 = b.build(Uuid::new_v4(), &inputs, now).unwrap();
        let s2 = b.build(Uuid::new_v4(), &inputs, now).unwrap();
        assert_eq!(
            serde_json::to_value(&s1.edges).unwrap(),
            serde_json::to_value(&s2.edges).unwrap()
        );
        assert_eq!(
            serde_json::to_value(&s1.nodes).unwrap(),
            serde_json::to_value(&s2.nodes).unwrap()
        );
    }

    #[test]
    fn test_failed_sources_mark_snapshot_partial() {
        let inputs = BuildInputs {
            failed_sources: vec!["calendar".to_string()],
            ..Default::default()
        };
        let snapshot = builder().build(Uuid::new_v4(), &inputs, as_of()).unwrap();
        assert!(snapshot.partial);
        assert_eq!(snapshot.failed_sources, vec!["calendar".to_string()]);
    }
}
