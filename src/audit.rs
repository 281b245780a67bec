//! Audit loop orchestrator: the top-level coroutine that ticks
//! on a fixed interval, aggregates violations via either cache-based or
//! discovery-based sourcing, and hands the result to the write-back loop.
//!
//! States: *Idle* (waiting for the next tick or for shutdown), *Tick* (one
//! full aggregation + write-back handoff), and *Terminating* (cancellation
//! observed; the last write-back is cancelled and bounded-joined, then the
//! loop returns). A `tokio::time::interval` drives a single coroutine, with
//! a `CancellationToken` for graceful shutdown.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AuditConfig;
use crate::discovery::{self, Aggregates, EventEmitter, ResourceDiscovery};
use crate::engine::EvaluationEngine;
use crate::error::MergedError;
use crate::exclude::ProcessExcluder;
use crate::stats::StatsReporter;
use crate::store::{ListOptions, ObjectStore};
use crate::types::{ConstraintKey, KindId};
use crate::watched::WatchedKindSet;
use crate::writeback::{self, ConstraintRef, WriteBackHandle};

/// The constraint-kind catalog: "does any constraint template CRD exist
/// yet" and "which kinds does the constraint API group currently serve"
///. A thin seam so tests can script both without
/// a live API server.
pub trait ConstraintCatalog: Send + Sync {
    fn template_crd_present(&self) -> impl Future<Output = Result<bool, anyhow::Error>> + Send;

    fn constraint_kinds(&self) -> impl Future<Output = Result<Vec<KindId>, anyhow::Error>> + Send;
}

/// A scripted catalog for tests.
pub struct FakeCatalog {
    pub template_present: bool,
    pub kinds: Vec<KindId>,
}

impl ConstraintCatalog for FakeCatalog {
    async fn template_crd_present(&self) -> Result<bool, anyhow::Error> {
        Ok(self.template_present)
    }

    async fn constraint_kinds(&self) -> Result<Vec<KindId>, anyhow::Error> {
        Ok(self.kinds.clone())
    }
}

/// Deduplicate while preserving first-seen order.
fn dedupe_kinds(kinds: Vec<KindId>) -> Vec<KindId> {
    let mut seen = std::collections::HashSet::new();
    kinds.into_iter().filter(|k| seen.insert(k.clone())).collect()
}

/// Enumerate every constraint instance of every kind in `kinds`, building
/// the write-back candidate set. Every known constraint gets a candidate —
/// including ones with zero violations this tick, so a previously-violating
/// constraint's status is cleared once it stops violating.
async fn collect_pending<S: ObjectStore>(
    store: &S,
    kinds: &[KindId],
) -> HashMap<ConstraintKey, ConstraintRef> {
    let mut pending = HashMap::new();

    for kind in kinds {
        let mut continue_token = None;
        loop {
            let page = match store
                .list(kind, None, ListOptions { continue_token: continue_token.clone(), ..Default::default() })
                .await
            {
                Ok(p) => p,
                Err(e) => {
                    warn!(kind = %kind, error = %e, "audit_constraint_list_failed_skipping_kind");
                    break;
                }
            };

            for obj in &page.items {
                let Some(name) = obj.name_str() else { continue };
                let key = ConstraintKey::new(kind.gvk.api_version(), kind.gvk.kind.clone(), name);
                pending.insert(
                    key.clone(),
                    ConstraintRef { key, kind: kind.clone(), namespace: obj.namespace_str().map(str::to_string) },
                );
            }

            continue_token = page.continue_token;
            if continue_token.is_none() {
                break;
            }
        }
    }

    pending
}

/// Owns every collaborator the audit loop needs across ticks: the object
/// store, evaluation engine, discovery source, event emitter, namespace
/// excluder, watched-kind set (from-cache mode), constraint catalog,
/// configuration, metrics reporter, and the previous tick's still-running
/// write-back handle, if any.
pub struct AuditLoop<S, E, D, Em, C> {
    store: Arc<S>,
    engine: Arc<E>,
    discovery: Arc<D>,
    emitter: Arc<Em>,
    excluder: Arc<ProcessExcluder>,
    watched: Arc<WatchedKindSet>,
    catalog: Arc<C>,
    config: AuditConfig,
    stats: StatsReporter,
    prior_writeback: Option<WriteBackHandle>,
}

impl<S, E, D, Em, C> AuditLoop<S, E, D, Em, C>
where
    S: ObjectStore + Send + Sync + 'static,
    E: EvaluationEngine,
    D: ResourceDiscovery,
    Em: EventEmitter,
    C: ConstraintCatalog,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<S>,
        engine: Arc<E>,
        discovery: Arc<D>,
        emitter: Arc<Em>,
        excluder: Arc<ProcessExcluder>,
        watched: Arc<WatchedKindSet>,
        catalog: Arc<C>,
        config: AuditConfig,
        stats: StatsReporter,
    ) -> Self {
        AuditLoop {
            store,
            engine,
            discovery,
            emitter,
            excluder,
            watched,
            catalog,
            config,
            stats,
            prior_writeback: None,
        }
    }

    /// Take the write-back handle spawned by the most recent tick, if the
    /// loop is still tracking one. Lets a caller that drives ticks one at a
    /// time (rather than via [`Self::run`]) observe or await completion
    /// without reaching into private state.
    pub fn take_prior_writeback(&mut self) -> Option<WriteBackHandle> {
        self.prior_writeback.take()
    }

    /// Run one audit tick end to end. Returns without
    /// error when auditing short-circuits because no constraint template
    /// CRD is installed yet — that is a valid, quiet outcome, not a failure.
    pub async fn tick(&mut self) -> Result<(), anyhow::Error> {
        let start = Instant::now();
        let tick_started_at = chrono::Utc::now();
        self.stats.record_run_start(tick_started_at.timestamp());

        if !self.catalog.template_crd_present().await? {
            info!("audit_tick_skipped_no_constraint_template_installed");
            self.stats.record_run_end(chrono::Utc::now().timestamp());
            return Ok(());
        }

        let kinds = dedupe_kinds(self.catalog.constraint_kinds().await?);
        if kinds.is_empty() {
            info!("audit_tick_skipped_no_constraints_of_expected_api_version");
            self.stats.record_run_end(chrono::Utc::now().timestamp());
            return Ok(());
        }

        let tick_timestamp = tick_started_at.to_rfc3339();

        let mut aggregates = Aggregates::new(self.config.constraint_violations_limit as usize);
        let mut errors: Vec<anyhow::Error> = Vec::new();

        if self.config.audit_from_cache {
            match self.engine.audit().await {
                Ok(results) => {
                    for r in results {
                        let audit_result = crate::types::AuditResult::new(
                            r.constraint_key,
                            r.constraint_gvk,
                            r.resource_kind,
                            r.resource_name,
                            r.resource_namespace,
                            r.msg,
                            r.enforcement_action,
                        );
                        aggregates.record(audit_result);
                    }
                }
                Err(e) => errors.push(anyhow::anyhow!(e)),
            }
        } else {
            let outcome = discovery::enumerate(
                self.store.as_ref(),
                self.discovery.as_ref(),
                self.engine.as_ref(),
                self.excluder.as_ref(),
                self.emitter.as_ref(),
                &kinds,
                &mut aggregates,
                self.config.audit_match_kind_only,
                self.config.audit_chunk_size,
                self.config.emit_audit_events,
            )
            .await;
            errors.extend(outcome.errors);
        }

        // `watched` currently has no independent role once from-cache mode
        // delegates entirely to the engine's own cache; kept wired in so a
        // future cache-backed `ObjectStore` implementation can use it
        // without changing this loop's signature.
        let _ = self.watched.len().await;

        if !errors.is_empty() {
            let merged = MergedError::merge(&errors.iter().map(|e| e.to_string()).collect::<Vec<_>>());
            warn!(errors = merged.count(), "audit_tick_completed_with_errors");
        }

        self.stats.record_violations_by_action(&aggregates.total_per_action);

        let pending = collect_pending(self.store.as_ref(), &kinds).await;

        if let Some(prior) = self.prior_writeback.take() {
            prior.cancel();
            let join_timeout = self.config.interval().unwrap_or(std::time::Duration::from_secs(60));
            prior.join_with_timeout(join_timeout).await;
        }

        self.prior_writeback = Some(writeback::spawn(
            Arc::clone(&self.store),
            pending,
            aggregates.update_lists,
            aggregates.total_per_constraint,
            tick_timestamp,
            self.config.constraint_violations_limit as usize,
        ));

        self.stats.record_run_end(chrono::Utc::now().timestamp());
        self.stats.record_duration(start.elapsed().as_secs_f64());

        Ok(())
    }

    /// Drive ticks on `audit_interval` until `cancel` fires, then cancel and
    /// bounded-join the last write-back loop before returning. Callers that disabled auditing entirely
    /// (`audit_interval == 0`) must not call this — the loop is not started
    /// at all in that case.
    pub async fn run(mut self, cancel: CancellationToken) {
        let Some(interval) = self.config.interval() else {
            warn!("audit_loop_run_called_with_auditing_disabled");
            return;
        };

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("audit_loop_terminating");
                    if let Some(prior) = self.prior_writeback.take() {
                        prior.cancel();
                        prior.join_with_timeout(interval).await;
                    }
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "audit_tick_failed");
                    }
                }
            }
        }
    }
}
