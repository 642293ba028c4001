//! Per-tenant relationship graph: players, relationships, events, snapshots
//!
//! The formal reports-to hierarchy and the informal influence edges are kept
//! in two separate structures (see `hierarchy`); `builder` merges both with
//! decayed communication signals into an immutable `GraphSnapshot`.

use crate::crypto::EncryptedField;
use crate::error::{PowerMapError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub mod builder;
pub mod hierarchy;

pub use builder::{BuildInputs, GraphBuilder, ResolvedEvent};
pub use hierarchy::ReportingForest;

/// User-declared stance toward a player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipStatus {
    Ally,
    Neutral,
    Rival,
    Enemy,
    Unknown,
}

/// A person in the tenant's organization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Unique player identifier (per tenant)
    pub id: Uuid,

    /// Display name
    pub name: String,

    /// Role or title, if known
    pub role: Option<String>,

    /// Department, if known
    pub department: Option<String>,

    /// User-assigned influence prior, 1-10
    pub influence_level: u8,

    /// Declared relationship status
    pub relationship_status: RelationshipStatus,

    /// Canonical lowercase communication handles (email addresses)
    #[serde(default)]
    pub handles: Vec<String>,

    /// Sensitive notes, stored only as a ciphertext token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<EncryptedField>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Player {
    /// Create a new player with neutral defaults
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            role: None,
            department: None,
            influence_level: 5,
            relationship_status: RelationshipStatus::Unknown,
            handles: Vec::new(),
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach a communication handle, canonicalized to lowercase
    pub fn add_handle(&mut self, handle: impl AsRef<str>) {
        let handle = handle.as_ref().trim().to_lowercase();
        if !handle.is_empty() && !self.handles.contains(&handle) {
            self.handles.push(handle);
            self.updated_at = Utc::now();
        }
    }
}

/// Type tag for informal ties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TieType {
    Mentorship,
    Alliance,
    Tension,
    Other,
}

/// Kind of directed relationship between two players
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RelationshipKind {
    /// `from` manages `to` (the target reports to the source).
    /// Formal edges must keep the hierarchy a forest.
    Formal,
    /// Influence or alliance tie with a user-assigned weight 1-10
    Informal {
        #[serde(rename = "type")]
        tie: TieType,
        strength: u8,
    },
}

/// A directed edge between two players
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub id: Uuid,
    pub from_player: Uuid,
    pub to_player: Uuid,
    #[serde(flatten)]
    pub kind: RelationshipKind,
    pub created_at: DateTime<Utc>,
}

impl Relationship {
    /// Create a formal reports-to edge: `to` reports to `from`
    pub fn formal(from_player: Uuid, to_player: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            from_player,
            to_player,
            kind: RelationshipKind::Formal,
            created_at: Utc::now(),
        }
    }

    /// Create an informal tie; strength must be 1-10
    pub fn informal(from_player: Uuid, to_player: Uuid, tie: TieType, strength: u8) -> Result<Self> {
        if !(1..=10).contains(&strength) {
            return Err(PowerMapError::InvalidInput {
                field: "strength".to_string(),
                message: format!("must be 1-10, got {}", strength),
            });
        }
        Ok(Self {
            id: Uuid::new_v4(),
            from_player,
            to_player,
            kind: RelationshipKind::Informal { tie, strength },
            created_at: Utc::now(),
        })
    }
}

/// Source of a communication event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Message,
    Meeting,
}

/// A normalized communication signal
///
/// Immutable once created. For messages the first participant is the
/// sender; meetings are symmetric. Payload bodies are never retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationEvent {
    #[serde(rename = "sourceType")]
    pub source: SourceKind,
    /// Canonical participant handles, ordered
    pub participants: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub weight_hint: f64,
}

/// Where a snapshot edge's weight came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Manual,
    Derived,
    Both,
}

/// A node entry in a published snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotNode {
    pub player_id: Uuid,
    pub label: String,
}

/// A weighted edge in a published snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEdge {
    pub from: Uuid,
    pub to: Uuid,
    pub weight: f64,
    pub provenance: Provenance,
    /// min/max balance of the two directed communication totals,
    /// present on derived edges only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reciprocity: Option<f64>,
}

/// An immutable, fully-built graph state at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphSnapshot {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub as_of: DateTime<Utc>,
    pub nodes: Vec<SnapshotNode>,
    pub edges: Vec<SnapshotEdge>,
    /// True when at least one ingestion source failed to contribute
    pub partial: bool,
    #[serde(default)]
    pub failed_sources: Vec<String>,
}

impl GraphSnapshot {
    /// Whether a player is present in this snapshot
    pub fn contains(&self, player_id: Uuid) -> bool {
        self.nodes.iter().any(|n| n.player_id == player_id)
    }
}

/// Per-tenant player registry
///
/// Maps canonical handles to players and creates a player the first time
/// an unknown handle appears in a communication event.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    players: HashMap<Uuid, Player>,
    by_handle: HashMap<String, Uuid>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a player; influence level must be 1-10
    pub fn upsert(&mut self, player: Player) -> Result<Uuid> {
        if !(1..=10).contains(&player.influence_level) {
            return Err(PowerMapError::InvalidInput {
                field: "influence_level".to_string(),
                message: format!("must be 1-10, got {}", player.influence_level),
            });
        }
        let id = player.id;
        if let Some(existing) = self.players.get(&id) {
            for handle in &existing.handles {
                self.by_handle.remove(handle);
            }
        }
        for handle in &player.handles {
            self.by_handle.insert(handle.clone(), id);
        }
        self.players.insert(id, player);
        Ok(id)
    }

    /// Look up a player by id
    pub fn get(&self, id: Uuid) -> Option<&Player> {
        self.players.get(&id)
    }

    /// Look up a player by canonical handle
    pub fn resolve(&self, handle: &str) -> Option<Uuid> {
        self.by_handle.get(handle).copied()
    }

    /// Resolve a handle, creating a player on first sight
    pub fn resolve_or_create(&mut self, handle: &str) -> Uuid {
        if let Some(id) = self.resolve(handle) {
            return id;
        }
        let mut player = Player::new(handle);
        player.add_handle(handle);
        let id = player.id;
        for h in &player.handles {
            self.by_handle.insert(h.clone(), id);
        }
        self.players.insert(id, player);
        tracing::debug!("Created player {} for first-seen handle {}", id, handle);
        id
    }

    /// Remove a player; the caller cascades relationship removal
    pub fn remove(&mut self, id: Uuid) -> Option<Player> {
        let player = self.players.remove(&id)?;
        for handle in &player.handles {
            self.by_handle.remove(handle);
        }
        Some(player)
    }

    /// All players, unordered
    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
