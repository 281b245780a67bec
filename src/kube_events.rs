//! `kube::Client`-backed [`EventEmitter`]. Publishes a core `v1.Event` per violation, deduplicated by the
//! synthetic UID the caller derives via [`crate::discovery::violation_event_uid`].

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::Client;
use kube::api::{Api, PostParams};

use crate::config::event_namespace;
use crate::discovery::EventEmitter;
use crate::types::AuditResult;

const EVENT_REASON: &str = "AuditViolation";
const REPORTING_COMPONENT: &str = "constraint-audit";

pub struct KubeEventEmitter {
    client: Client,
}

impl KubeEventEmitter {
    pub fn new(client: Client) -> Self {
        KubeEventEmitter { client }
    }
}

/// Kubernetes object names are DNS subdomains: lowercase alphanumerics, `-`,
/// `.` only, no `/`. The synthetic UID (`{rkind}/{rns}/{rname}/{ckind}/{cns}/{cname}`)
/// is unsuitable as a name directly, so it's sanitized into one deterministically —
/// the same violation always maps to the same name, so re-emission hits the
/// same object and the resulting 409 is the dedup signal.
fn sanitize_name_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_dash = false;
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() { "violation".to_string() } else { trimmed.chars().take(200).collect() }
}

impl EventEmitter for KubeEventEmitter {
    async fn emit_violation(&self, violation: &AuditResult, uid: &str) -> Result<(), anyhow::Error> {
        let namespace = event_namespace();
        let events: Api<Event> = Api::namespaced(self.client.clone(), &namespace);

        let mut annotations = BTreeMap::new();
        annotations.insert("constraint-audit.io/constraint-kind".to_string(), violation.constraint_gvk.kind.clone());
        annotations.insert("constraint-audit.io/constraint-name".to_string(), violation.constraint_key.name.clone());
        annotations.insert("constraint-audit.io/resource-kind".to_string(), violation.resource_kind.clone());
        annotations.insert("constraint-audit.io/resource-name".to_string(), violation.resource_name.clone());
        if let Some(ns) = &violation.resource_namespace {
            annotations.insert("constraint-audit.io/resource-namespace".to_string(), ns.clone());
        }

        let now = Time(chrono::Utc::now());
        let event = Event {
            metadata: ObjectMeta {
                name: Some(format!("audit-violation-{}", sanitize_name_component(uid))),
                namespace: Some(namespace.clone()),
                annotations: Some(annotations),
                ..Default::default()
            },
            involved_object: ObjectReference {
                kind: Some(violation.resource_kind.clone()),
                name: Some(violation.resource_name.clone()),
                namespace: violation.resource_namespace.clone(),
                uid: Some(uid.to_string()),
                ..Default::default()
            },
            reason: Some(EVENT_REASON.to_string()),
            message: Some(violation.message.clone()),
            type_: Some("Warning".to_string()),
            source: Some(EventSource { component: Some(REPORTING_COMPONENT.to_string()), ..Default::default() }),
            first_timestamp: Some(now.clone()),
            last_timestamp: Some(now.clone()),
            event_time: None,
            count: Some(1),
            ..Default::default()
        };

        match events.create(&PostParams::default(), &event).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 409 => Ok(()),
            Err(e) => Err(anyhow::anyhow!(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_slashes_and_lowercases() {
        let raw = "Pod/default/p1/K8sRequiredLabels//must-have-team";
        let out = sanitize_name_component(raw);
        assert!(!out.contains('/'));
        assert!(!out.chars().any(|c| c.is_ascii_uppercase()));
        assert!(!out.starts_with('-'));
        assert!(!out.ends_with('-'));
    }

    #[test]
    fn sanitize_is_deterministic() {
        let raw = "Pod/kube-system/p1/K/ns/c1";
        assert_eq!(sanitize_name_component(raw), sanitize_name_component(raw));
    }
}
