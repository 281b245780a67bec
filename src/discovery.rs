//! Discovery-driven resource enumerator: lists every listable
//! kind reported by the API server, paginated, filtered to kinds referenced
//! by constraints, reviews each object through the evaluation engine.

use std::collections::{HashMap, HashSet};
use std::future::Future;

use tracing::{info, warn};

use crate::engine::{AugmentedObject, EvaluationEngine};
use crate::exclude::ProcessExcluder;
use crate::exclude::ProcessTag;
use crate::store::{DynamicObject, ListOptions, ObjectStore};
use crate::types::{AuditResult, ConstraintKey, EnforcementAction, Gvk, KindId};

/// The external discovery collaborator: "fetch server preferred resources,
/// restricted to kinds whose verb list includes `list`".
/// A group-discovery failure for one group is logged and treated as partial
/// success by the caller of this trait, not by the trait itself.
pub trait ResourceDiscovery: Send + Sync {
    fn server_preferred_resources(&self) -> impl Future<Output = Result<Vec<KindId>, anyhow::Error>> + Send;
}

/// Which kinds the discovery pass actually visits.
#[derive(Debug, Clone)]
pub enum KindFilter {
    All,
    Only(HashSet<String>),
}

impl KindFilter {
    fn accepts(&self, kind: &str) -> bool {
        match self {
            KindFilter::All => true,
            KindFilter::Only(set) => set.contains(kind),
        }
    }
}

/// Publishes one `Warning`/`AuditViolation` event per violation, when
/// enabled.
pub trait EventEmitter: Send + Sync {
    fn emit_violation(&self, violation: &AuditResult, uid: &str) -> impl Future<Output = Result<(), anyhow::Error>> + Send;
}

pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    async fn emit_violation(&self, _violation: &AuditResult, _uid: &str) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

/// Derive the synthetic, stable UID used to deduplicate identical
/// violation events.
pub fn violation_event_uid(result: &AuditResult) -> String {
    format!(
        "{}/{}/{}/{}/{}/{}",
        result.resource_kind,
        result.resource_namespace.as_deref().unwrap_or(""),
        result.resource_name,
        result.constraint_gvk.kind,
        "", // constraint namespace: constraints are cluster-scoped in this model
        result.constraint_key.name,
    )
}

/// Scan every constraint of every constraint kind and collect the union of
/// kinds named in `spec.match.kinds[*].kinds[*]`. If any constraint names
/// `""` or `"*"`, or a constraint's match spec fails to parse, the filter
/// widens to [`KindFilter::All`].
pub async fn build_kind_filter<S: ObjectStore>(
    store: &S,
    constraint_kinds: &[KindId],
    match_kind_only: bool,
) -> KindFilter {
    if !match_kind_only {
        return KindFilter::All;
    }

    let mut kinds = HashSet::new();
    for kind in constraint_kinds {
        let list = match store.list(kind, None, ListOptions::default()).await {
            Ok(l) => l,
            Err(e) => {
                warn!(kind = %kind, error = %e, "discovery_constraint_list_failed_widening_filter");
                return KindFilter::All;
            }
        };
        for obj in &list.items {
            match extract_match_kinds(&obj.0) {
                Some(names) => {
                    for name in names {
                        if name.is_empty() || name == "*" {
                            return KindFilter::All;
                        }
                        kinds.insert(name);
                    }
                }
                None => {
                    warn!(kind = %kind, "discovery_constraint_match_kinds_unparseable_widening_filter");
                    return KindFilter::All;
                }
            }
        }
    }

    KindFilter::Only(kinds)
}

fn extract_match_kinds(constraint: &serde_json::Value) -> Option<Vec<String>> {
    let kinds_groups = constraint.get("spec")?.get("match")?.get("kinds")?.as_array()?;
    let mut out = Vec::new();
    for group in kinds_groups {
        let names = group.get("kinds")?.as_array()?;
        for name in names {
            out.push(name.as_str()?.to_string());
        }
    }
    Some(out)
}

/// Per-tick aggregation state the enumerator mutates in place.
pub struct Aggregates {
    pub update_lists: HashMap<ConstraintKey, Vec<AuditResult>>,
    pub total_per_constraint: HashMap<ConstraintKey, i64>,
    pub total_per_action: HashMap<EnforcementAction, i64>,
    pub per_constraint_cap: usize,
}

impl Aggregates {
    pub fn new(per_constraint_cap: usize) -> Self {
        let mut total_per_action = HashMap::new();
        for action in EnforcementAction::KNOWN {
            total_per_action.insert(action, 0);
        }
        Aggregates {
            update_lists: HashMap::new(),
            total_per_constraint: HashMap::new(),
            total_per_action,
            per_constraint_cap,
        }
    }

    pub fn record(&mut self, result: AuditResult) {
        let key = result.constraint_key.clone();
        let entry = self.update_lists.entry(key.clone()).or_default();
        if entry.len() < self.per_constraint_cap {
            entry.push(result.clone());
        }
        *self.total_per_constraint.entry(key).or_insert(0) += 1;
        *self.total_per_action.entry(result.enforcement_action).or_insert(0) += 1;
    }
}

#[derive(Debug, Default)]
pub struct EnumerateOutcome {
    pub errors: Vec<anyhow::Error>,
}

#[allow(clippy::too_many_arguments)]
pub async fn enumerate<S, D, E, Em>(
    store: &S,
    discovery: &D,
    engine: &E,
    excluder: &ProcessExcluder,
    emitter: &Em,
    constraint_kinds: &[KindId],
    aggregates: &mut Aggregates,
    match_kind_only: bool,
    chunk_size: u64,
    emit_events: bool,
) -> EnumerateOutcome
where
    S: ObjectStore,
    D: ResourceDiscovery,
    E: EvaluationEngine,
    Em: EventEmitter,
{
    let mut outcome = EnumerateOutcome::default();

    let server_kinds = match discovery.server_preferred_resources().await {
        Ok(k) => k,
        Err(e) => {
            outcome.errors.push(e);
            return outcome;
        }
    };

    let filter = build_kind_filter(store, constraint_kinds, match_kind_only).await;

    let mut namespace_cache: HashMap<String, DynamicObject> = HashMap::new();

    for kind in &server_kinds {
        if !filter.accepts(&kind.gvk.kind) {
            continue;
        }

        let mut continue_token = None;
        loop {
            let opts = ListOptions {
                limit: if chunk_size == 0 { None } else { Some(chunk_size as i64) },
                continue_token: continue_token.clone(),
            };

            let page = match store.list(kind, None, opts).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(kind = %kind, error = %e, "discovery_list_failed_skipping_kind");
                    break;
                }
            };

            for obj in &page.items {
                match excluder.is_namespace_excluded(ProcessTag::Audit, obj) {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(error = %e, "discovery_namespace_exclusion_check_failed_skipping_object");
                        continue;
                    }
                }

                let ns_object = if let Some(ns) = obj.namespace_str() {
                    if let Some(cached) = namespace_cache.get(ns) {
                        Some(cached.clone())
                    } else {
                        match store
                            .get(
                                &KindId {
                                    gvk: Gvk { group: String::new(), version: "v1".to_string(), kind: "Namespace".to_string() },
                                    plural: "namespaces".to_string(),
                                },
                                None,
                                ns,
                            )
                            .await
                        {
                            Ok(nsobj) => {
                                namespace_cache.insert(ns.to_string(), nsobj.clone());
                                Some(nsobj)
                            }
                            Err(_) => {
                                warn!(namespace = %ns, object = ?obj.name_str(), "discovery_namespace_lookup_failed_skipping_object");
                                continue;
                            }
                        }
                    }
                } else {
                    None
                };

                let review = engine
                    .review(AugmentedObject {
                        object: obj.clone(),
                        namespace_object: ns_object,
                    })
                    .await;

                let results = match review {
                    Ok(r) => r,
                    Err(e) => {
                        outcome.errors.push(anyhow::anyhow!(e));
                        continue;
                    }
                };

                for r in results {
                    let audit_result = AuditResult::new(
                        r.constraint_key.clone(),
                        r.constraint_gvk.clone(),
                        r.resource_kind.clone(),
                        r.resource_name.clone(),
                        r.resource_namespace.clone(),
                        r.msg.clone(),
                        r.enforcement_action,
                    );

                    info!(
                        constraint = %audit_result.constraint_key,
                        resource = %audit_result.resource_name,
                        action = %audit_result.enforcement_action,
                        "audit_violation_found"
                    );

                    if emit_events {
                        let uid = violation_event_uid(&audit_result);
                        if let Err(e) = emitter.emit_violation(&audit_result, &uid).await {
                            warn!(error = %e, "discovery_event_emission_failed");
                        }
                    }

                    aggregates.record(audit_result);
                }
            }

            continue_token = page.continue_token;
            if continue_token.is_none() {
                break;
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineResult, EvaluationEngine};
    use crate::exclude::ExclusionEntry;
    use crate::store::InMemoryStore;
    use crate::types::EnforcementAction;

    struct FakeDiscovery(Vec<KindId>);

    impl ResourceDiscovery for FakeDiscovery {
        async fn server_preferred_resources(&self) -> Result<Vec<KindId>, anyhow::Error> {
            Ok(self.0.clone())
        }
    }

    struct ReviewAllEngine;

    impl EvaluationEngine for ReviewAllEngine {
        async fn audit(&self) -> Result<Vec<EngineResult>, crate::engine::EngineError> {
            Ok(vec![])
        }

        async fn review(&self, object: AugmentedObject) -> Result<Vec<EngineResult>, crate::engine::EngineError> {
            Ok(vec![EngineResult {
                constraint_key: ConstraintKey::new("constraints.example.io/v1beta1", "K8sRequiredLabels", "must-have-team"),
                constraint_gvk: Gvk { group: "constraints.example.io".to_string(), version: "v1beta1".to_string(), kind: "K8sRequiredLabels".to_string() },
                msg: "missing label 'team'".to_string(),
                enforcement_action: EnforcementAction::Warn,
                resource_kind: "Pod".to_string(),
                resource_name: object.object.name_str().unwrap_or_default().to_string(),
                resource_namespace: object.object.namespace_str().map(str::to_string),
            }])
        }
    }

    fn pod_kind() -> KindId {
        KindId {
            gvk: Gvk { group: String::new(), version: "v1".to_string(), kind: "Pod".to_string() },
            plural: "pods".to_string(),
        }
    }

    #[tokio::test]
    async fn excluded_namespace_pod_produces_no_results() {
        let store = InMemoryStore::new();
        store.insert(&pod_kind(), Some("kube-system"), "p1", serde_json::json!({"kind": "Pod", "metadata": {"name": "p1", "namespace": "kube-system"}}));
        store.insert(&pod_kind(), Some("default"), "p2", serde_json::json!({"kind": "Pod", "metadata": {"name": "p2", "namespace": "default"}}));

        let excluder = ProcessExcluder::new();
        excluder.add(&[ExclusionEntry { namespaces: vec!["kube-*".to_string()], tags: vec!["audit".to_string()] }]);

        let discovery = FakeDiscovery(vec![pod_kind()]);
        let engine = ReviewAllEngine;
        let emitter = NoopEventEmitter;
        let mut aggregates = Aggregates::new(20);

        let outcome = enumerate(&store, &discovery, &engine, &excluder, &emitter, &[], &mut aggregates, false, 0, false).await;
        assert!(outcome.errors.is_empty());

        let total: i64 = aggregates.total_per_constraint.values().sum();
        assert_eq!(total, 1);
        let key = ConstraintKey::new("constraints.example.io/v1beta1", "K8sRequiredLabels", "must-have-team");
        assert_eq!(aggregates.update_lists[&key].len(), 1);
        assert_eq!(aggregates.update_lists[&key][0].resource_name, "p2");
    }

    #[tokio::test]
    async fn per_constraint_cap_bounds_stored_list_but_not_total() {
        struct ManyEngine;
        impl EvaluationEngine for ManyEngine {
            async fn audit(&self) -> Result<Vec<EngineResult>, crate::engine::EngineError> {
                Ok(vec![])
            }
            async fn review(&self, object: AugmentedObject) -> Result<Vec<EngineResult>, crate::engine::EngineError> {
                Ok(vec![EngineResult {
                    constraint_key: ConstraintKey::new("g/v1", "K", "c1"),
                    constraint_gvk: Gvk { group: "g".to_string(), version: "v1".to_string(), kind: "K".to_string() },
                    msg: "violation".to_string(),
                    enforcement_action: EnforcementAction::Deny,
                    resource_kind: "Pod".to_string(),
                    resource_name: object.object.name_str().unwrap_or_default().to_string(),
                    resource_namespace: None,
                }])
            }
        }

        let store = InMemoryStore::new();
        for i in 0..10 {
            store.insert(&pod_kind(), None, &format!("p{i}"), serde_json::json!({"kind": "Pod", "metadata": {"name": format!("p{i}")}}));
        }

        let excluder = ProcessExcluder::new();
        let discovery = FakeDiscovery(vec![pod_kind()]);
        let engine = ManyEngine;
        let emitter = NoopEventEmitter;
        let mut aggregates = Aggregates::new(3);

        enumerate(&store, &discovery, &engine, &excluder, &emitter, &[], &mut aggregates, false, 0, false).await;

        let key = ConstraintKey::new("g/v1", "K", "c1");
        assert_eq!(aggregates.update_lists[&key].len(), 3);
        assert_eq!(aggregates.total_per_constraint[&key], 10);
    }

    #[test]
    fn violation_event_uid_is_stable() {
        let result = AuditResult::new(
            ConstraintKey::new("g/v1", "K", "c1"),
            Gvk { group: "g".to_string(), version: "v1".to_string(), kind: "K".to_string() },
            "Pod",
            "p1",
            Some("default".to_string()),
            "msg",
            EnforcementAction::Warn,
        );
        let uid1 = violation_event_uid(&result);
        let uid2 = violation_event_uid(&result);
        assert_eq!(uid1, uid2);
        assert!(uid1.contains("Pod"));
        assert!(uid1.contains("p1"));
    }
}
