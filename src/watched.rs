//! Thread-safe set of kind identifiers currently under watch.
//!
//! Invariant: any read of the audit object cache for a kind must occur while
//! holding this set's read lock and only for kinds currently in the set.
//! [`WatchedKindSet::for_each`] is the *only* sanctioned way to do that: the
//! lock is `tokio::sync::RwLock`, so the guard can be held across the
//! `.await` points inside the callback, meaning a list call driven from
//! inside `for_each` genuinely runs under the lock rather than after a
//! snapshot of it. Callbacks must not attempt to take the write lock or
//! re-enter iteration, and should complete promptly.

use std::future::Future;

use indexmap::IndexSet;
use tokio::sync::RwLock;

use crate::types::KindId;

#[derive(Default)]
pub struct WatchedKindSet {
    inner: RwLock<IndexSet<KindId>>,
}

impl WatchedKindSet {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(IndexSet::new()),
        }
    }

    pub async fn insert(&self, kind: KindId) {
        self.inner.write().await.insert(kind);
    }

    pub async fn remove(&self, kind: &KindId) {
        self.inner.write().await.shift_remove(kind);
    }

    pub async fn contains(&self, kind: &KindId) -> bool {
        self.inner.read().await.contains(kind)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Acquire the read lock and hold it for the entire call, invoking `f`
    /// once per member in membership order. `f` returns a future so it may
    /// `.await` inside the guard — e.g. to drive a list call against the
    /// object store — which is the whole point: the set cannot change out
    /// from under a caller that lists while iterating. Aborts and returns
    /// the first error `f` produces; kinds after the failing one are never
    /// visited.
    pub async fn for_each<F, Fut, E>(&self, mut f: F) -> Result<(), E>
    where
        F: FnMut(&KindId) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let guard = self.inner.read().await;
        for kind in guard.iter() {
            f(kind).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Gvk;

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
    async fn for_each_visits_every_member() {
        let set = WatchedKindSet::new();
        set.insert(kind("A")).await;
        set.insert(kind("B")).await;
        let mut seen = Vec::new();
        set.for_each::<_, _, std::convert::Infallible>(|k| {
            seen.push(k.gvk.kind.clone());
            async { Ok(()) }
        })
        .await
        .unwrap();
        seen.sort();
        assert_eq!(seen, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn for_each_aborts_on_first_error() {
        let set = WatchedKindSet::new();
        set.insert(kind("A")).await;
        set.insert(kind("B")).await;
        let mut calls = 0;
        let result: Result<(), &str> = set
            .for_each(|_| {
                calls += 1;
                async { Err("boom") }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn remove_drops_membership() {
        let set = WatchedKindSet::new();
        let a = kind("A");
        set.insert(a.clone()).await;
        assert!(set.contains(&a).await);
        set.remove(&a).await;
        assert!(!set.contains(&a).await);
    }

    #[tokio::test]
    async fn for_each_holds_guard_across_await_points() {
        // A write attempted from a second task while `for_each` is mid-await
        // must not observe the guard released early: it has to wait until
        // the whole iteration completes.
        let set = std::sync::Arc::new(WatchedKindSet::new());
        set.insert(kind("A")).await;
        set.insert(kind("B")).await;

        let set2 = set.clone();
        let iter = tokio::spawn(async move {
            set2.for_each::<_, _, std::convert::Infallible>(|_| async {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                Ok(())
            })
            .await
            .unwrap();
        });

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let start = std::time::Instant::now();
        set.insert(kind("C")).await;
        assert!(start.elapsed() >= std::time::Duration::from_millis(20));

        iter.await.unwrap();
        assert_eq!(set.len().await, 3);
    }
}
