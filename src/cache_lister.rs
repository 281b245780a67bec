//! Enumerates all objects of all currently-watched kinds from the
//! read-only object cache, under the watched-set lock.
//!
//! Failure of any inner list aborts the iteration and surfaces the first
//! error. The aggregate result order is undefined; callers must not depend
//! on it.

use crate::store::{DynamicObject, ListOptions, ObjectStore, StoreError};
use crate::watched::WatchedKindSet;

/// List every object of every watched kind. The whole pass — including
/// every `store.list()` call — runs inside [`WatchedKindSet::for_each`]'s
/// held read guard, so a kind cannot be removed from the watched set
/// between being selected for listing and actually being listed.
pub async fn list_all<S: ObjectStore>(
    watched: &WatchedKindSet,
    store: &S,
) -> Result<Vec<DynamicObject>, StoreError> {
    let mut all = Vec::new();
    watched
        .for_each(|kind| {
            let all = &mut all;
            async move {
                let mut continue_token = None;
                loop {
                    let page = store
                        .list(
                            kind,
                            None,
                            ListOptions {
                                continue_token: continue_token.clone(),
                                ..Default::default()
                            },
                        )
                        .await?;
                    all.extend(page.items);
                    continue_token = page.continue_token;
                    if continue_token.is_none() {
                        break;
                    }
                }
                Ok(())
            }
        })
        .await?;
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, ObjectList};
    use crate::types::{Gvk, KindId};

    fn kind(name: &str) -> KindId {
        KindId {
            gvk: Gvk {
                group: "constraints.example.io".to_string(),
                version: "v1beta1".to_string(),
                kind: name.to_string(),
            },
            plural: name.to_lowercase(),
        }
    }

    #[tokio::test]
    async fn lists_only_watched_kinds() {
        let store = InMemoryStore::new();
        store.insert(&kind("A"), None, "a1", serde_json::json!({"metadata": {"name": "a1"}}));
        store.insert(&kind("B"), None, "b1", serde_json::json!({"metadata": {"name": "b1"}}));

        let watched = WatchedKindSet::new();
        watched.insert(kind("A")).await;

        let all = list_all(&watched, &store).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name_str(), Some("a1"));
    }

    #[tokio::test]
    async fn empty_watched_set_lists_nothing() {
        let store = InMemoryStore::new();
        store.insert(&kind("A"), None, "a1", serde_json::json!({"metadata": {"name": "a1"}}));
        let watched = WatchedKindSet::new();
        let all = list_all(&watched, &store).await.unwrap();
        assert!(all.is_empty());
    }

    /// Wraps an in-memory store but fails every `list()` for one configured
    /// kind, mirroring the `SlowStore` double in
    /// `tests/writeback_preemption_integration.rs`: a real typed fixture
    /// with one method overridden to inject the behavior under test rather
    /// than a mocking library.
    struct FailingStore {
        inner: InMemoryStore,
        fail_kind: KindId,
        listed: std::sync::Mutex<Vec<KindId>>,
    }

    impl ObjectStore for FailingStore {
        async fn list(&self, kind: &KindId, namespace: Option<&str>, opts: ListOptions) -> Result<ObjectList, StoreError> {
            self.listed.lock().expect("listed lock poisoned").push(kind.clone());
            if kind == &self.fail_kind {
                return Err(StoreError::Other(anyhow::anyhow!("simulated list failure for {kind}")));
            }
            self.inner.list(kind, namespace, opts).await
        }

        async fn get(&self, kind: &KindId, namespace: Option<&str>, name: &str) -> Result<DynamicObject, StoreError> {
            self.inner.get(kind, namespace, name).await
        }

        async fn update_status(
            &self,
            kind: &KindId,
            namespace: Option<&str>,
            name: &str,
            status: serde_json::Value,
        ) -> Result<(), StoreError> {
            self.inner.update_status(kind, namespace, name, status).await
        }
    }

    #[tokio::test]
    async fn first_list_error_aborts_iteration() {
        let store = FailingStore {
            inner: InMemoryStore::new(),
            fail_kind: kind("B"),
            listed: std::sync::Mutex::new(Vec::new()),
        };
        store.inner.insert(&kind("A"), None, "a1", serde_json::json!({"metadata": {"name": "a1"}}));
        store.inner.insert(&kind("C"), None, "c1", serde_json::json!({"metadata": {"name": "c1"}}));

        let watched = WatchedKindSet::new();
        // Membership order is insertion order (`IndexSet`), so B fails
        // before C would ever be listed.
        watched.insert(kind("A")).await;
        watched.insert(kind("B")).await;
        watched.insert(kind("C")).await;

        let err = list_all(&watched, &store).await.unwrap_err();
        assert!(!err.is_not_found());

        let listed = store.listed.lock().unwrap().clone();
        assert_eq!(listed, vec![kind("A"), kind("B")]);
    }
}
