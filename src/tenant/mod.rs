//! Per-tenant engine state
//!
//! A `TenantContext` owns one tenant's roster, hierarchy, informal edge
//! list, and event log, plus the published snapshot and the rebuild
//! worker. Graph state is never shared across tenants. Readers of the
//! published snapshot never block on rebuilds: publish is an `Arc`
//! pointer swap and readers clone the pointer.

use crate::config::Config;
use crate::crypto::{EncryptionService, TenantKey};
use crate::error::{PowerMapError, Result};
use crate::graph::{
    BuildInputs, CommunicationEvent, GraphBuilder, GraphSnapshot, Player, Relationship,
    RelationshipKind, ReportingForest, Roster,
};
use crate::normalizer::{NormalizedBatch, Normalizer, RawSourceRecord};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use uuid::Uuid;

mod scheduler;

use scheduler::RebuildScheduler;

/// Mutable tenant state: roster, hierarchy, informal edges, event log
#[derive(Debug, Default)]
pub struct TenantState {
    pub roster: Roster,
    pub forest: ReportingForest,
    pub informal: Vec<Relationship>,
    pub events: Vec<CommunicationEvent>,
}

/// Shared interior of a tenant context
pub(crate) struct TenantInner {
    pub tenant_id: Uuid,
    state: RwLock<TenantState>,
    published: RwLock<Option<Arc<GraphSnapshot>>>,
}

impl TenantInner {
    /// Capture build inputs under the state lock, resolving event
    /// participants and creating first-seen players.
    pub(crate) fn prepare_inputs(&self, failed_sources: Vec<String>) -> BuildInputs {
        let mut state = self.state.write().expect("tenant state lock poisoned");
        let TenantState {
            roster,
            forest,
            informal,
            events,
        } = &mut *state;
        BuildInputs::resolve(roster, forest, informal, events, failed_sources)
    }

    /// Atomically replace the published snapshot
    pub(crate) fn publish(&self, snapshot: Arc<GraphSnapshot>) {
        let mut published = self.published.write().expect("snapshot lock poisoned");
        *published = Some(snapshot);
    }
}

/// A named, deadline-bounded source of raw records
pub struct SourceFeed {
    name: String,
    future: Pin<Box<dyn Future<Output = anyhow::Result<Vec<RawSourceRecord>>> + Send>>,
}

impl SourceFeed {
    pub fn new(
        name: impl Into<String>,
        future: impl Future<Output = anyhow::Result<Vec<RawSourceRecord>>> + Send + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            future: Box::pin(future),
        }
    }
}

/// Per-tenant engine entry point.
///
/// Must be created within a Tokio runtime; creation spawns the tenant's
/// rebuild worker. The context lives from first player creation to
/// tenant deletion (`shutdown`).
pub struct TenantContext {
    inner: Arc<TenantInner>,
    scheduler: RebuildScheduler,
    normalizer: Normalizer,
    source_deadline: Duration,
}

impl TenantContext {
    pub fn new(tenant_id: Uuid, config: &Config) -> Result<Self> {
        let inner = Arc::new(TenantInner {
            tenant_id,
            state: RwLock::new(TenantState::default()),
            published: RwLock::new(None),
        });
        let scheduler = RebuildScheduler::new(
            inner.clone(),
            GraphBuilder::new(config.engine.clone()),
            config.ingestion.max_batch.max(16),
        );

        Ok(Self {
            inner,
            scheduler,
            normalizer: Normalizer::new(&config.engine),
            source_deadline: config.source_deadline()?,
        })
    }

    pub fn tenant_id(&self) -> Uuid {
        self.inner.tenant_id
    }

    /// Insert or update a player
    pub fn upsert_player(&self, player: Player) -> Result<Uuid> {
        let mut state = self.write_state();
        state.roster.upsert(player)
    }

    /// Delete a player, cascading removal of their relationships.
    /// Communication events are retained; they only influence the graph
    /// within the retention window.
    pub fn remove_player(&self, id: Uuid) -> Result<()> {
        let mut state = self.write_state();
        if state.roster.remove(id).is_none() {
            return Err(PowerMapError::UnknownPlayer { id });
        }
        state.forest.remove_player(id);
        state
            .informal
            .retain(|rel| rel.from_player != id && rel.to_player != id);
        Ok(())
    }

    /// Upsert a relationship.
    ///
    /// Formal edges are validated against the reporting forest and
    /// rejected with `ConflictError` on a cycle or second parent.
    /// Informal edges replace an existing edge with the same endpoints
    /// and tie type.
    pub fn upsert_relationship(&self, relationship: Relationship) -> Result<()> {
        let mut state = self.write_state();
        for id in [relationship.from_player, relationship.to_player] {
            if state.roster.get(id).is_none() {
                return Err(PowerMapError::UnknownPlayer { id });
            }
        }

        match relationship.kind {
            RelationshipKind::Formal => {
                state
                    .forest
                    .set_manager(relationship.from_player, relationship.to_player)?;
            }
            RelationshipKind::Informal { tie, .. } => {
                state.informal.retain(|rel| {
                    !(rel.from_player == relationship.from_player
                        && rel.to_player == relationship.to_player
                        && matches!(rel.kind, RelationshipKind::Informal { tie: t, .. } if t == tie))
                });
                state.informal.push(relationship);
            }
        }
        Ok(())
    }

    /// Remove all relationships between two players (both directions for
    /// informal ties, the formal edge if it matches). Returns the count.
    pub fn remove_relationship(&self, from: Uuid, to: Uuid) -> usize {
        let mut state = self.write_state();
        let mut removed = 0;

        if state.forest.manager_of(to) == Some(from) && state.forest.clear_manager(to) {
            removed += 1;
        }

        let before = state.informal.len();
        state.informal.retain(|rel| {
            !((rel.from_player == from && rel.to_player == to)
                || (rel.from_player == to && rel.to_player == from))
        });
        removed + (before - state.informal.len())
    }

    /// Normalize a batch of raw records against `now` and append the
    /// surviving events to the tenant's event log.
    pub fn ingest_batch(&self, records: &[RawSourceRecord], now: DateTime<Utc>) -> NormalizedBatch {
        let batch = self.normalizer.normalize_batch(records, now);
        if !batch.events.is_empty() {
            let mut state = self.write_state();
            state.events.extend(batch.events.iter().cloned());
        }
        batch
    }

    /// Ingest from independent sources concurrently, then rebuild.
    ///
    /// Each source runs under the configured deadline; a source that
    /// times out or fails contributes nothing and is recorded in the
    /// snapshot's `failed_sources`, marking it partial. The build runs
    /// with whatever arrived in time.
    pub async fn ingest_sources(
        &self,
        feeds: Vec<SourceFeed>,
        as_of: DateTime<Utc>,
    ) -> Result<Arc<GraphSnapshot>> {
        let mut failed_sources = Vec::new();
        let mut merged: Vec<RawSourceRecord> = Vec::new();

        let handles: Vec<(String, tokio::task::JoinHandle<_>)> = feeds
            .into_iter()
            .map(|feed| {
                let deadline = self.source_deadline;
                let name = feed.name;
                let future = feed.future;
                (
                    name,
                    tokio::spawn(async move { tokio::time::timeout(deadline, future).await }),
                )
            })
            .collect();

        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(Ok(records))) => {
                    tracing::debug!("Source '{}' contributed {} records", name, records.len());
                    merged.extend(records);
                }
                Ok(Ok(Err(e))) => {
                    tracing::warn!("Source '{}' failed: {}", name, e);
                    failed_sources.push(name);
                }
                Ok(Err(_elapsed)) => {
                    let timeout = PowerMapError::Timeout {
                        source_name: name.clone(),
                    };
                    tracing::warn!("{} ({}s)", timeout, self.source_deadline.as_secs());
                    failed_sources.push(name);
                }
                Err(join_error) => {
                    tracing::warn!("Source '{}' panicked: {}", name, join_error);
                    failed_sources.push(name);
                }
            }
        }

        self.ingest_batch(&merged, as_of);
        self.scheduler
            .request(self.inner.tenant_id, as_of, failed_sources)
            .await
    }

    /// Request a rebuild and wait for a covering build.
    ///
    /// Concurrent requests for the same tenant coalesce into at most one
    /// in-flight build plus one follow-up.
    pub async fn rebuild(&self, as_of: DateTime<Utc>) -> Result<Arc<GraphSnapshot>> {
        self.scheduler
            .request(self.inner.tenant_id, as_of, Vec::new())
            .await
    }

    /// The last completed snapshot, if any. Never blocks on rebuilds.
    pub fn current_snapshot(&self) -> Option<Arc<GraphSnapshot>> {
        self.inner
            .published
            .read()
            .expect("snapshot lock poisoned")
            .clone()
    }

    /// Listing view of all players. Notes stay ciphertext tokens here;
    /// plaintext requires the explicit `decrypted_notes` call.
    pub fn players(&self) -> Vec<Player> {
        let state = self.read_state();
        let mut players: Vec<Player> = state.roster.players().cloned().collect();
        players.sort_by_key(|p| p.id);
        players
    }

    /// Attach encrypted notes to a player
    pub fn set_player_notes(&self, id: Uuid, key: &TenantKey, plaintext: &str) -> Result<()> {
        let field = EncryptionService::encrypt(key, plaintext)?;
        let mut state = self.write_state();
        let mut player = state
            .roster
            .get(id)
            .cloned()
            .ok_or(PowerMapError::UnknownPlayer { id })?;
        player.notes = Some(field);
        player.updated_at = Utc::now();
        state.roster.upsert(player)?;
        Ok(())
    }

    /// Explicit, separately-authorized decrypt path: returns plaintext
    /// notes for every player that has them. Fails closed on the first
    /// token the key cannot open.
    pub fn decrypted_notes(&self, key: &TenantKey) -> Result<HashMap<Uuid, String>> {
        let state = self.read_state();
        let mut notes = HashMap::new();
        for player in state.roster.players() {
            if let Some(field) = &player.notes {
                let plaintext = EncryptionService::decrypt(key, field)?;
                notes.insert(player.id, plaintext);
            }
        }
        Ok(notes)
    }

    /// Number of build computations run so far (including superseded)
    pub fn builds_completed(&self) -> u64 {
        self.scheduler.builds_completed()
    }

    /// Tenant deletion: stop the rebuild worker and drop all state
    pub async fn shutdown(self) {
        self.scheduler.shutdown().await;
        tracing::info!("Tenant {} shut down", self.inner.tenant_id);
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, TenantState> {
        self.inner.state.read().expect("tenant state lock poisoned")
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, TenantState> {
        self.inner.state.write().expect("tenant state lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TieType;

    fn config() -> Config {
        Config::default()
    }

    fn player_named(name: &str) -> Player {
        Player::new(name)
    }

    #[tokio::test]
    async fn test_relationship_upserts() {
        let ctx = TenantContext::new(Uuid::new_v4(), &config()).unwrap();
        let a = ctx.upsert_player(player_named("A")).unwrap();
        let b = ctx.upsert_player(player_named("B")).unwrap();

        ctx.upsert_relationship(Relationship::formal(a, b)).unwrap();
        // Reverse formal edge closes a loop
        let err = ctx
            .upsert_relationship(Relationship::formal(b, a))
            .unwrap_err();
        assert!(matches!(err, PowerMapError::Conflict(_)));

        // Informal upsert replaces the same tie type
        ctx.upsert_relationship(Relationship::informal(a, b, TieType::Alliance, 3).unwrap())
            .unwrap();
        ctx.upsert_relationship(Relationship::informal(a, b, TieType::Alliance, 8).unwrap())
            .unwrap();
        let snapshot = ctx.rebuild(Utc::now()).await.unwrap();
        // One formal edge plus one merged informal edge
        assert_eq!(snapshot.edges.len(), 2);

        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_player_rejected() {
        let ctx = TenantContext::new(Uuid::new_v4(), &config()).unwrap();
        let a = ctx.upsert_player(player_named("A")).unwrap();
        let ghost = Uuid::new_v4();

        let err = ctx
            .upsert_relationship(Relationship::formal(a, ghost))
            .unwrap_err();
        assert!(matches!(err, PowerMapError::UnknownPlayer { .. }));
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_remove_player_cascades() {
        let ctx = TenantContext::new(Uuid::new_v4(), &config()).unwrap();
        let a = ctx.upsert_player(player_named("A")).unwrap();
        let b = ctx.upsert_player(player_named("B")).unwrap();
        let c = ctx.upsert_player(player_named("C")).unwrap();
        ctx.upsert_relationship(Relationship::formal(a, b)).unwrap();
        ctx.upsert_relationship(Relationship::informal(b, c, TieType::Tension, 5).unwrap())
            .unwrap();

        ctx.remove_player(b).unwrap();
        let snapshot = ctx.rebuild(Utc::now()).await.unwrap();
        assert_eq!(snapshot.nodes.len(), 2);
        assert!(snapshot.edges.is_empty());
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_notes_roundtrip_via_explicit_path() {
        let ctx = TenantContext::new(Uuid::new_v4(), &config()).unwrap();
        let a = ctx.upsert_player(player_named("A")).unwrap();
        let key = TenantKey::generate();

        ctx.set_player_notes(a, &key, "keeps score in meetings").unwrap();

        // Listing exposes only the token
        let listed = ctx.players();
        let field = listed[0].notes.as_ref().unwrap();
        assert!(!field.ciphertext.contains("keeps score"));

        // Explicit decrypt path returns plaintext
        let notes = ctx.decrypted_notes(&key).unwrap();
        assert_eq!(notes[&a], "keeps score in meetings");

        // Wrong key fails closed
        let wrong = TenantKey::generate();
        assert!(ctx.decrypted_notes(&wrong).is_err());
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_current_snapshot_is_stable_until_publish() {
        let ctx = TenantContext::new(Uuid::new_v4(), &config()).unwrap();
        assert!(ctx.current_snapshot().is_none());

        ctx.upsert_player(player_named("A")).unwrap();
        let first = ctx.rebuild(Utc::now()).await.unwrap();
        assert_eq!(ctx.current_snapshot().unwrap().id, first.id);

        ctx.upsert_player(player_named("B")).unwrap();
        let second = ctx.rebuild(Utc::now()).await.unwrap();
        assert_eq!(ctx.current_snapshot().unwrap().id, second.id);
        assert_ne!(first.id, second.id);
        // The old Arc is still a complete, readable snapshot
        assert_eq!(first.nodes.len(), 1);
        ctx.shutdown().await;
    }
}
