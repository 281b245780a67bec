//! Evaluation engine: the policy compiler, consumed but not defined here
//!. `Audit` is cache-based bulk evaluation; `Review` is
//! single-object evaluation against an object plus its namespace object.

use std::future::Future;

use crate::store::DynamicObject;
use crate::types::{ConstraintKey, EnforcementAction, Gvk};

/// A single result returned by the evaluation engine for one reviewed
/// object against one constraint.
#[derive(Debug, Clone)]
pub struct EngineResult {
    pub constraint_key: ConstraintKey,
    pub constraint_gvk: Gvk,
    pub msg: String,
    pub enforcement_action: EnforcementAction,
    pub resource_kind: String,
    pub resource_name: String,
    pub resource_namespace: Option<String>,
}

/// `{object, namespaceObject}` — the input to a single-object review.
#[derive(Debug, Clone)]
pub struct AugmentedObject {
    pub object: DynamicObject,
    pub namespace_object: Option<DynamicObject>,
}

#[derive(Debug, thiserror::Error)]
#[error("evaluation engine error: {0}")]
pub struct EngineError(#[from] anyhow::Error);

/// The policy compiler's runtime surface, as consumed by the audit core.
pub trait EvaluationEngine: Send + Sync {
    /// Cache-based bulk evaluation: one call reviews every already-admitted
    /// object the engine knows about against every installed constraint.
    fn audit(&self) -> impl Future<Output = Result<Vec<EngineResult>, EngineError>> + Send;

    /// Single-object evaluation, used by the discovery-driven enumerator.
    fn review(
        &self,
        object: AugmentedObject,
    ) -> impl Future<Output = Result<Vec<EngineResult>, EngineError>> + Send;
}

/// A scripted fake engine for tests: returns pre-seeded results from
/// `audit()`, and from `review()` looks up results keyed by resource name.
#[derive(Default)]
pub struct FakeEngine {
    pub audit_results: Vec<EngineResult>,
    pub review_results: std::collections::HashMap<String, Vec<EngineResult>>,
    pub review_error_for: std::collections::HashSet<String>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EvaluationEngine for FakeEngine {
    async fn audit(&self) -> Result<Vec<EngineResult>, EngineError> {
        Ok(self.audit_results.clone())
    }

    async fn review(&self, object: AugmentedObject) -> Result<Vec<EngineResult>, EngineError> {
        let name = object.object.name_str().unwrap_or_default().to_string();
        if self.review_error_for.contains(&name) {
            return Err(EngineError(anyhow::anyhow!("review failed for {name}")));
        }
        Ok(self.review_results.get(&name).cloned().unwrap_or_default())
    }
}
