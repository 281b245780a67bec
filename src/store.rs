//! Object store: the external collaborator that lists/gets/updates cluster
//! objects, consumed through the [`ObjectStore`] trait. The live
//! `kube::Api`-backed adapter lives in `kube_store.rs`. [`InMemoryStore`]
//! is the fake used by this crate's own tests: a real typed fixture rather
//! than a mocking library.

use std::collections::HashMap;
use std::future::Future;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::exclude::HasNamespaceAndKind;
use crate::types::KindId;

/// A semi-structured cluster object: metadata plus an opaque body. Kept as
/// `serde_json::Value` throughout (Design Note §9: schemas are open-ended by
/// design, so a "dynamic object with typed accessors" shape is retained
/// rather than forcing every kind through a fixed Rust struct).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicObject(pub serde_json::Value);

impl DynamicObject {
    pub fn kind_str(&self) -> Option<&str> {
        self.0.get("kind").and_then(|v| v.as_str())
    }

    pub fn name_str(&self) -> Option<&str> {
        self.0
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(|v| v.as_str())
    }

    pub fn namespace_str(&self) -> Option<&str> {
        self.0
            .get("metadata")
            .and_then(|m| m.get("namespace"))
            .and_then(|v| v.as_str())
    }

    pub fn status(&self) -> serde_json::Value {
        self.0
            .get("status")
            .cloned()
            .unwrap_or(serde_json::json!({}))
    }
}

impl HasNamespaceAndKind for DynamicObject {
    fn kind(&self) -> Option<&str> {
        self.kind_str()
    }
    fn name(&self) -> Option<&str> {
        self.name_str()
    }
    fn namespace(&self) -> Option<&str> {
        self.namespace_str()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub limit: Option<i64>,
    pub continue_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ObjectList {
    pub items: Vec<DynamicObject>,
    pub continue_token: Option<String>,
    pub resource_version: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found")]
    NotFound,
    #[error("store error: {0}")]
    Other(#[source] anyhow::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

/// A typed list/get/update API with status-subresource support, optional
/// pagination, and "not found" discrimination.
pub trait ObjectStore: Send + Sync {
    fn list(
        &self,
        kind: &KindId,
        namespace: Option<&str>,
        opts: ListOptions,
    ) -> impl Future<Output = Result<ObjectList, StoreError>> + Send;

    fn get(
        &self,
        kind: &KindId,
        namespace: Option<&str>,
        name: &str,
    ) -> impl Future<Output = Result<DynamicObject, StoreError>> + Send;

    fn update_status(
        &self,
        kind: &KindId,
        namespace: Option<&str>,
        name: &str,
        status: serde_json::Value,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// In-memory fake store keyed by `(kind display, namespace, name)`.
#[derive(Default)]
pub struct InMemoryStore {
    objects: RwLock<HashMap<(String, Option<String>, String), serde_json::Value>>,
    /// Page size override for tests that want to exercise pagination without
    /// a large fixture; `None` means "serve everything in one page".
    pub page_size: Option<usize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, kind: &KindId, namespace: Option<&str>, name: &str, obj: serde_json::Value) {
        let mut guard = self.objects.write().expect("in-memory store lock poisoned");
        guard.insert(
            (kind.to_string(), namespace.map(str::to_string), name.to_string()),
            obj,
        );
    }

    pub fn remove(&self, kind: &KindId, namespace: Option<&str>, name: &str) {
        let mut guard = self.objects.write().expect("in-memory store lock poisoned");
        guard.remove(&(kind.to_string(), namespace.map(str::to_string), name.to_string()));
    }
}

impl ObjectStore for InMemoryStore {
    async fn list(&self, kind: &KindId, namespace: Option<&str>, opts: ListOptions) -> Result<ObjectList, StoreError> {
        let guard = self.objects.read().expect("in-memory store lock poisoned");
        let mut items: Vec<_> = guard
            .iter()
            .filter(|((k, ns, _), _)| k == &kind.to_string() && (namespace.is_none() || ns.as_deref() == namespace))
            .map(|(_, v)| DynamicObject(v.clone()))
            .collect();
        items.sort_by(|a, b| a.name_str().cmp(&b.name_str()));

        let page = self.page_size.unwrap_or(items.len().max(1));
        let start = opts
            .continue_token
            .as_deref()
            .and_then(|t| t.parse::<usize>().ok())
            .unwrap_or(0);
        let end = (start + page).min(items.len());
        let page_items = items.get(start..end).unwrap_or_default().to_vec();
        let continue_token = if end < items.len() {
            Some(end.to_string())
        } else {
            None
        };

        Ok(ObjectList {
            items: page_items,
            continue_token,
            resource_version: Some("1".to_string()),
        })
    }

    async fn get(&self, kind: &KindId, namespace: Option<&str>, name: &str) -> Result<DynamicObject, StoreError> {
        let guard = self.objects.read().expect("in-memory store lock poisoned");
        guard
            .get(&(kind.to_string(), namespace.map(str::to_string), name.to_string()))
            .cloned()
            .map(DynamicObject)
            .ok_or(StoreError::NotFound)
    }

    async fn update_status(
        &self,
        kind: &KindId,
        namespace: Option<&str>,
        name: &str,
        status: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut guard = self.objects.write().expect("in-memory store lock poisoned");
        let key = (kind.to_string(), namespace.map(str::to_string), name.to_string());
        let obj = guard.get_mut(&key).ok_or(StoreError::NotFound)?;
        obj["status"] = status;
        Ok(())
    }
}
