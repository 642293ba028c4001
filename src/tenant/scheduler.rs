//! Rebuild scheduling
//!
//! One worker task per tenant owns all snapshot builds, which serializes
//! them without an explicit lock. Requests are tickets on a channel: the
//! worker drains queued tickets before building (coalescing), and a
//! build finished while a newer ticket waits is discarded and redone
//! (latest-request-wins). Requesters attach to a watch channel and wake
//! when an outcome at or past their sequence number is published.

use crate::error::{PowerMapError, Result};
use crate::graph::{GraphBuilder, GraphSnapshot};
use crate::tenant::TenantInner;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Queued rebuild request
#[derive(Debug)]
pub(crate) struct RebuildTicket {
    pub seq: u64,
    pub as_of: DateTime<Utc>,
    pub failed_sources: Vec<String>,
}

/// Latest completed build, broadcast to waiting requesters
#[derive(Debug, Clone, Default)]
pub(crate) struct BuildOutcome {
    pub seq: u64,
    pub snapshot: Option<Arc<GraphSnapshot>>,
    pub error: Option<String>,
}

pub(crate) struct RebuildScheduler {
    ticket_tx: mpsc::Sender<RebuildTicket>,
    outcome_rx: watch::Receiver<BuildOutcome>,
    next_seq: AtomicU64,
    builds_completed: Arc<AtomicU64>,
    worker: Option<tokio::task::JoinHandle<()>>,
}

impl RebuildScheduler {
    /// Spawn the rebuild worker. Must be called within a Tokio runtime.
    pub fn new(inner: Arc<TenantInner>, builder: GraphBuilder, buffer: usize) -> Self {
        let (ticket_tx, ticket_rx) = mpsc::channel(buffer);
        let (outcome_tx, outcome_rx) = watch::channel(BuildOutcome::default());
        let builds_completed = Arc::new(AtomicU64::new(0));

        let counter = builds_completed.clone();
        let worker = Some(tokio::spawn(async move {
            rebuild_worker(ticket_rx, outcome_tx, inner, builder, counter).await;
        }));

        Self {
            ticket_tx,
            outcome_rx,
            next_seq: AtomicU64::new(0),
            builds_completed,
            worker,
        }
    }

    /// Request a rebuild and wait for a covering build to complete.
    ///
    /// Concurrent requests coalesce; the returned snapshot may come from
    /// a build that also served later requests.
    pub async fn request(
        &self,
        tenant_id: uuid::Uuid,
        as_of: DateTime<Utc>,
        failed_sources: Vec<String>,
    ) -> Result<Arc<GraphSnapshot>> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.ticket_tx
            .send(RebuildTicket {
                seq,
                as_of,
                failed_sources,
            })
            .await
            .map_err(|_| PowerMapError::TenantShutdown { tenant_id })?;

        let mut rx = self.outcome_rx.clone();
        loop {
            {
                let outcome = rx.borrow_and_update();
                if outcome.seq >= seq {
                    return match (&outcome.snapshot, &outcome.error) {
                        (_, Some(message)) => Err(PowerMapError::GraphBuild(message.clone())),
                        (Some(snapshot), None) => Ok(snapshot.clone()),
                        (None, None) => Err(PowerMapError::GraphBuild(
                            "build completed without a snapshot".to_string(),
                        )),
                    };
                }
            }
            rx.changed()
                .await
                .map_err(|_| PowerMapError::TenantShutdown { tenant_id })?;
        }
    }

    /// Number of build computations the worker has run
    pub fn builds_completed(&self) -> u64 {
        self.builds_completed.load(Ordering::SeqCst)
    }

    /// Close the ticket channel and wait for the worker to drain
    pub async fn shutdown(mut self) {
        drop(self.ticket_tx);
        if let Some(handle) = self.worker.take() {
            tracing::info!("Waiting for rebuild worker to drain...");
            let _ = handle.await;
        }
    }
}

async fn rebuild_worker(
    mut ticket_rx: mpsc::Receiver<RebuildTicket>,
    outcome_tx: watch::Sender<BuildOutcome>,
    inner: Arc<TenantInner>,
    builder: GraphBuilder,
    builds_completed: Arc<AtomicU64>,
) {
    while let Some(first) = ticket_rx.recv().await {
        let mut ticket = first;
        loop {
            // Coalesce: everything queued by now is covered by one build
            // of the latest ticket.
            while let Ok(newer) = ticket_rx.try_recv() {
                tracing::debug!("Coalescing rebuild request {} into {}", ticket.seq, newer.seq);
                ticket = newer;
            }

            let inputs = inner.prepare_inputs(ticket.failed_sources.clone());
            let result = builder.build(inner.tenant_id, &inputs, ticket.as_of);
            builds_completed.fetch_add(1, Ordering::SeqCst);

            // A request that arrived mid-build supersedes this result.
            if let Ok(newer) = ticket_rx.try_recv() {
                tracing::debug!(
                    "Discarding superseded build for request {} (newer: {})",
                    ticket.seq,
                    newer.seq
                );
                ticket = newer;
                continue;
            }

            match result {
                Ok(snapshot) => {
                    let snapshot = Arc::new(snapshot);
                    inner.publish(snapshot.clone());
                    let _ = outcome_tx.send(BuildOutcome {
                        seq: ticket.seq,
                        snapshot: Some(snapshot),
                        error: None,
                    });
                }
                Err(e) => {
                    // The previously published snapshot stays authoritative.
                    tracing::error!(
                        "Snapshot build failed for tenant {}: {}",
                        inner.tenant_id,
                        e
                    );
                    let _ = outcome_tx.send(BuildOutcome {
                        seq: ticket.seq,
                        snapshot: None,
                        error: Some(e.to_string()),
                    });
                }
            }
            break;
        }
    }

    tracing::info!(
        "Rebuild worker for tenant {} stopped after {} builds",
        inner.tenant_id,
        builds_completed.load(Ordering::SeqCst)
    );
}
