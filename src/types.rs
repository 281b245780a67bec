//! Shared data model: constraint identity, violation records, and the
//! semi-structured status shape the write-back loop patches onto constraints.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum stored length of an [`AuditResult::message`], reserving room for
/// a trailing `"..."` when truncated.
pub const MESSAGE_SIZE_CAP: usize = 256;
const ELLIPSIS: &str = "...";

/// One of the enforcement actions a constraint may declare.
///
/// Unknown values deserialize to `Unrecognized` rather than failing, since
/// constraints are user-authored and the audit core must not refuse to
/// evaluate an otherwise-valid object over an unfamiliar action string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementAction {
    Deny,
    Dryrun,
    Warn,
    #[serde(other)]
    Unrecognized,
}

impl fmt::Display for EnforcementAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnforcementAction::Deny => "deny",
            EnforcementAction::Dryrun => "dryrun",
            EnforcementAction::Warn => "warn",
            EnforcementAction::Unrecognized => "unrecognized",
        };
        f.write_str(s)
    }
}

impl EnforcementAction {
    /// All known (non-`Unrecognized`) actions, used to pre-populate
    /// per-action totals with zero so silent actions still report.
    pub const KNOWN: [EnforcementAction; 3] = [
        EnforcementAction::Deny,
        EnforcementAction::Dryrun,
        EnforcementAction::Warn,
    ];
}

/// A GroupVersionKind tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Gvk {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl Gvk {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

/// Internal aggregation key for a constraint: `(apiVersion, kind, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConstraintKey {
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

impl ConstraintKey {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ConstraintKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.api_version, self.kind, self.name)
    }
}

/// One violation record produced during an audit tick.
///
/// Constructed during the tick, handed to the write-back loop, discarded at
/// tick end — it never outlives a single `AuditLoop::tick`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditResult {
    pub constraint_key: ConstraintKey,
    pub constraint_gvk: Gvk,
    pub resource_kind: String,
    pub resource_name: String,
    pub resource_namespace: Option<String>,
    pub message: String,
    pub enforcement_action: EnforcementAction,
}

impl AuditResult {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        constraint_key: ConstraintKey,
        constraint_gvk: Gvk,
        resource_kind: impl Into<String>,
        resource_name: impl Into<String>,
        resource_namespace: Option<String>,
        message: impl Into<String>,
        enforcement_action: EnforcementAction,
    ) -> Self {
        Self {
            constraint_key,
            constraint_gvk,
            resource_kind: resource_kind.into(),
            resource_name: resource_name.into(),
            resource_namespace,
            message: truncate_message(&message.into()),
            enforcement_action,
        }
    }
}

/// Truncate a message to [`MESSAGE_SIZE_CAP`] bytes, abbreviating with a
/// trailing `"..."` when it would otherwise exceed the cap.
pub fn truncate_message(s: &str) -> String {
    if s.len() <= MESSAGE_SIZE_CAP {
        return s.to_string();
    }
    let keep = MESSAGE_SIZE_CAP - ELLIPSIS.len();
    let mut end = keep;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &s[..end], ELLIPSIS)
}

/// One entry of `status.violations[]` as persisted on a constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedViolation {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub message: String,
    pub enforcement_action: String,
}

impl From<&AuditResult> for PersistedViolation {
    fn from(r: &AuditResult) -> Self {
        PersistedViolation {
            kind: r.resource_kind.clone(),
            name: r.resource_name.clone(),
            namespace: r.resource_namespace.clone(),
            message: r.message.clone(),
            enforcement_action: r.enforcement_action.to_string(),
        }
    }
}

/// The status subresource fields this crate owns: `auditTimestamp`,
/// `totalViolations`, `violations[]`. `byPod[]` is modeled separately
/// (see [`crate::ha`]) since it is read/written as raw JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_timestamp: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_violations: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violations: Option<Vec<PersistedViolation>>,
}

/// A minimal identifier for a watchable/listable kind: its GVK plus the
/// plural resource name needed to build a dynamic API handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KindId {
    pub gvk: Gvk,
    pub plural: String,
}

impl fmt::Display for KindId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.gvk.api_version(), self.gvk.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_under_cap_is_unchanged() {
        let s = "a short message";
        assert_eq!(truncate_message(s), s);
    }

    #[test]
    fn message_at_cap_is_unchanged() {
        let s = "a".repeat(MESSAGE_SIZE_CAP);
        let out = truncate_message(&s);
        assert_eq!(out.len(), MESSAGE_SIZE_CAP);
        assert_eq!(out, s);
    }

    #[test]
    fn message_over_cap_is_truncated_with_ellipsis() {
        let s = "a".repeat(MESSAGE_SIZE_CAP + 50);
        let out = truncate_message(&s);
        assert_eq!(out.len(), MESSAGE_SIZE_CAP);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn constraint_key_display() {
        let k = ConstraintKey::new("constraints.policy.example.io/v1beta1", "K8sRequiredLabels", "ns-must-have-team");
        assert_eq!(k.to_string(), "constraints.policy.example.io/v1beta1/K8sRequiredLabels/ns-must-have-team");
    }

    #[test]
    fn enforcement_action_unknown_deserializes_as_unrecognized() {
        let v: EnforcementAction = serde_json::from_str(r#""totallyNovel""#).unwrap();
        assert_eq!(v, EnforcementAction::Unrecognized);
    }

    #[test]
    fn enforcement_action_known_roundtrip() {
        for (a, s) in [
            (EnforcementAction::Deny, "\"deny\""),
            (EnforcementAction::Dryrun, "\"dryrun\""),
            (EnforcementAction::Warn, "\"warn\""),
        ] {
            assert_eq!(serde_json::to_string(&a).unwrap(), s);
        }
    }
}
