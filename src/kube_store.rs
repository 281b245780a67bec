//! `kube::Client`-backed [`ObjectStore`] adapter.
//!
//! Every other module in this crate is generic over `S: ObjectStore` and
//! never mentions `kube` directly — this is the one file where the
//! abstraction meets a real API server, following the same split the
//! teacher keeps between `commands::reconcile`'s controller wiring and the
//! policy-evaluation helpers it calls into.

use kube::Client;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::core::{ApiResource, DynamicObject as KubeDynamicObject, GroupVersionKind};

use crate::store::{DynamicObject, ListOptions, ObjectList, ObjectStore, StoreError};
use crate::types::KindId;

const FIELD_MANAGER: &str = "constraint-audit";

pub struct KubeObjectStore {
    client: Client,
}

impl KubeObjectStore {
    pub fn new(client: Client) -> Self {
        KubeObjectStore { client }
    }

    fn api_resource(kind: &KindId) -> ApiResource {
        let gvk = GroupVersionKind {
            group: kind.gvk.group.clone(),
            version: kind.gvk.version.clone(),
            kind: kind.gvk.kind.clone(),
        };
        ApiResource::from_gvk_with_plural(&gvk, &kind.plural)
    }

    fn api(&self, kind: &KindId, namespace: Option<&str>) -> Api<KubeDynamicObject> {
        let ar = Self::api_resource(kind);
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

fn map_err(e: kube::Error) -> StoreError {
    if let kube::Error::Api(ref resp) = e {
        if resp.code == 404 {
            return StoreError::NotFound;
        }
    }
    StoreError::Other(anyhow::anyhow!(e))
}

fn to_dynamic(obj: KubeDynamicObject) -> Result<DynamicObject, StoreError> {
    serde_json::to_value(&obj)
        .map(DynamicObject)
        .map_err(|e| StoreError::Other(anyhow::anyhow!(e)))
}

impl ObjectStore for KubeObjectStore {
    async fn list(&self, kind: &KindId, namespace: Option<&str>, opts: ListOptions) -> Result<ObjectList, StoreError> {
        let api = self.api(kind, namespace);
        let mut lp = ListParams::default();
        if let Some(limit) = opts.limit {
            lp = lp.limit(limit as u32);
        }
        if let Some(token) = opts.continue_token {
            lp = lp.continue_token(&token);
        }

        let list = api.list(&lp).await.map_err(map_err)?;
        let continue_token = list.metadata.continue_.clone().filter(|t| !t.is_empty());
        let resource_version = list.metadata.resource_version.clone();

        let mut items = Vec::with_capacity(list.items.len());
        for item in list.items {
            items.push(to_dynamic(item)?);
        }

        Ok(ObjectList { items, continue_token, resource_version })
    }

    async fn get(&self, kind: &KindId, namespace: Option<&str>, name: &str) -> Result<DynamicObject, StoreError> {
        let api = self.api(kind, namespace);
        let obj = api.get(name).await.map_err(map_err)?;
        to_dynamic(obj)
    }

    async fn update_status(
        &self,
        kind: &KindId,
        namespace: Option<&str>,
        name: &str,
        status: serde_json::Value,
    ) -> Result<(), StoreError> {
        let api = self.api(kind, namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(map_err)?;
        Ok(())
    }
}
