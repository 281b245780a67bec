//! Process excluder: maps `{process tag -> set(pattern)}` and answers "is
//! this object's namespace excluded from process P?".

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use crate::error::AccessorError;
use crate::wildcard;

/// Identifies which subsystem a namespace-exclusion rule targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProcessTag {
    Audit,
    Sync,
    Webhook,
    MutationWebhook,
}

impl ProcessTag {
    /// All real tags, the expansion target of the pseudo-tag `*`.
    pub const ALL: [ProcessTag; 4] = [
        ProcessTag::Audit,
        ProcessTag::Sync,
        ProcessTag::Webhook,
        ProcessTag::MutationWebhook,
    ];
}

impl fmt::Display for ProcessTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessTag::Audit => "audit",
            ProcessTag::Sync => "sync",
            ProcessTag::Webhook => "webhook",
            ProcessTag::MutationWebhook => "mutation-webhook",
        };
        f.write_str(s)
    }
}

impl FromStr for ProcessTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audit" => Ok(ProcessTag::Audit),
            "sync" => Ok(ProcessTag::Sync),
            "webhook" => Ok(ProcessTag::Webhook),
            "mutation-webhook" => Ok(ProcessTag::MutationWebhook),
            other => Err(format!("unknown process tag: {other}")),
        }
    }
}

/// One exclusion entry as supplied to [`ProcessExcluder::add`]: a set of
/// namespace patterns and the process tags they apply to. `*` in `tags`
/// expands to [`ProcessTag::ALL`] at insert time.
#[derive(Debug, Clone)]
pub struct ExclusionEntry {
    pub namespaces: Vec<String>,
    pub tags: Vec<String>,
}

/// Minimal accessor over an object's own kind/name/namespace, so the
/// excluder can work against real typed k8s objects and dynamic objects
/// alike without depending on a specific client type.
pub trait HasNamespaceAndKind {
    fn kind(&self) -> Option<&str>;
    fn name(&self) -> Option<&str>;
    fn namespace(&self) -> Option<&str>;
}

/// Thread-safe `{ProcessTag -> Vec<pattern>}` map. Shared across audit,
/// admission, and sync workers: lookups take the read lock, so
/// concurrent `is_namespace_excluded` calls never block each other.
#[derive(Default)]
pub struct ProcessExcluder {
    inner: RwLock<HashMap<ProcessTag, Vec<String>>>,
}

impl ProcessExcluder {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Add entries, expanding `*` tags and deduping patterns per tag.
    /// Idempotent: adding the same entry twice has no further effect.
    pub fn add(&self, entries: &[ExclusionEntry]) {
        let mut guard = self.inner.write().expect("exclusion map lock poisoned");
        for entry in entries {
            let tags = expand_tags(&entry.tags);
            for tag in tags {
                let patterns = guard.entry(tag).or_default();
                for ns in &entry.namespaces {
                    if !patterns.contains(ns) {
                        patterns.push(ns.clone());
                    }
                }
            }
        }
    }

    /// Atomically replace the whole map.
    pub fn replace(&self, other: HashMap<ProcessTag, Vec<String>>) {
        let mut guard = self.inner.write().expect("exclusion map lock poisoned");
        *guard = other;
    }

    /// Structural comparison against another map.
    pub fn equals(&self, other: &HashMap<ProcessTag, Vec<String>>) -> bool {
        let guard = self.inner.read().expect("exclusion map lock poisoned");
        *guard == *other
    }

    /// Structural comparison restricted to a single process tag.
    pub fn equals_for_process(&self, tag: ProcessTag, other: &HashMap<ProcessTag, Vec<String>>) -> bool {
        let guard = self.inner.read().expect("exclusion map lock poisoned");
        guard.get(&tag) == other.get(&tag)
    }

    /// If `obj`'s own kind is `Namespace` (core group), match its own name;
    /// otherwise match its namespace. All matching is total: the only
    /// reported error is a failed meta-accessor lookup.
    pub fn is_namespace_excluded(
        &self,
        tag: ProcessTag,
        obj: &dyn HasNamespaceAndKind,
    ) -> Result<bool, AccessorError> {
        let candidate = if obj.kind() == Some("Namespace") {
            obj.name().ok_or(AccessorError::MissingMeta)?
        } else {
            match obj.namespace() {
                Some(ns) => ns,
                None => return Ok(false),
            }
        };

        let guard = self.inner.read().expect("exclusion map lock poisoned");
        let Some(patterns) = guard.get(&tag) else {
            return Ok(false);
        };
        Ok(patterns.iter().any(|p| wildcard::matches(p, candidate)))
    }
}

fn expand_tags(tags: &[String]) -> Vec<ProcessTag> {
    if tags.iter().any(|t| t == "*") {
        return ProcessTag::ALL.to_vec();
    }
    tags.iter().filter_map(|t| t.parse().ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Obj {
        kind: Option<&'static str>,
        name: Option<&'static str>,
        namespace: Option<&'static str>,
    }

    impl HasNamespaceAndKind for Obj {
        fn kind(&self) -> Option<&str> {
            self.kind
        }
        fn name(&self) -> Option<&str> {
            self.name
        }
        fn namespace(&self) -> Option<&str> {
            self.namespace
        }
    }

    #[test]
    fn star_tag_expands_to_all_real_tags() {
        let excluder = ProcessExcluder::new();
        excluder.add(&[ExclusionEntry {
            namespaces: vec!["kube-*".to_string()],
            tags: vec!["*".to_string()],
        }]);
        let pod = Obj {
            kind: Some("Pod"),
            name: Some("p"),
            namespace: Some("kube-system"),
        };
        for tag in ProcessTag::ALL {
            assert!(excluder.is_namespace_excluded(tag, &pod).unwrap());
        }
    }

    #[test]
    fn add_is_idempotent() {
        let excluder = ProcessExcluder::new();
        let entries = [ExclusionEntry {
            namespaces: vec!["kube-system".to_string()],
            tags: vec!["audit".to_string()],
        }];
        excluder.add(&entries);
        excluder.add(&entries);
        let guard = excluder.inner.read().unwrap();
        assert_eq!(guard.get(&ProcessTag::Audit).unwrap().len(), 1);
    }

    #[test]
    fn namespace_kind_matches_against_own_name() {
        let excluder = ProcessExcluder::new();
        excluder.add(&[ExclusionEntry {
            namespaces: vec!["kube-*".to_string()],
            tags: vec!["audit".to_string()],
        }]);
        let ns_obj = Obj {
            kind: Some("Namespace"),
            name: Some("kube-system"),
            namespace: None,
        };
        assert!(excluder
            .is_namespace_excluded(ProcessTag::Audit, &ns_obj)
            .unwrap());
    }

    #[test]
    fn non_namespace_object_matches_against_its_namespace() {
        let excluder = ProcessExcluder::new();
        excluder.add(&[ExclusionEntry {
            namespaces: vec!["kube-*".to_string()],
            tags: vec!["audit".to_string()],
        }]);
        let pod = Obj {
            kind: Some("Pod"),
            name: Some("p"),
            namespace: Some("default"),
        };
        assert!(!excluder
            .is_namespace_excluded(ProcessTag::Audit, &pod)
            .unwrap());
    }

    #[test]
    fn unrelated_process_tag_is_not_excluded() {
        let excluder = ProcessExcluder::new();
        excluder.add(&[ExclusionEntry {
            namespaces: vec!["kube-*".to_string()],
            tags: vec!["sync".to_string()],
        }]);
        let pod = Obj {
            kind: Some("Pod"),
            name: Some("p"),
            namespace: Some("kube-system"),
        };
        assert!(!excluder
            .is_namespace_excluded(ProcessTag::Audit, &pod)
            .unwrap());
    }

    #[test]
    fn replace_is_atomic_swap() {
        let excluder = ProcessExcluder::new();
        excluder.add(&[ExclusionEntry {
            namespaces: vec!["a".to_string()],
            tags: vec!["audit".to_string()],
        }]);
        let mut replacement = HashMap::new();
        replacement.insert(ProcessTag::Sync, vec!["b".to_string()]);
        excluder.replace(replacement.clone());
        assert!(excluder.equals(&replacement));
    }
}
