//! `kube::discovery`-backed implementations of [`ResourceDiscovery`] and
//! [`ConstraintCatalog`].
//!
//! Constraint kinds are served dynamically, one per installed constraint
//! kind, all under one API group; template presence is "does that group
//! exist yet". Both groups are configuration, not hard-coded, so this
//! module works against any policy-CRD API group shaped the same way.

use kube::Client;
use kube::discovery::{Discovery, verbs};

use crate::audit::ConstraintCatalog;
use crate::discovery::ResourceDiscovery;
use crate::types::{Gvk, KindId};

pub struct KubeDiscovery {
    client: Client,
}

impl KubeDiscovery {
    pub fn new(client: Client) -> Self {
        KubeDiscovery { client }
    }
}

impl ResourceDiscovery for KubeDiscovery {
    async fn server_preferred_resources(&self) -> Result<Vec<KindId>, anyhow::Error> {
        let discovery = Discovery::new(self.client.clone()).run().await?;
        let mut kinds = Vec::new();
        for group in discovery.groups() {
            for (ar, caps) in group.recommended_resources() {
                if !caps.supports_operation(verbs::LIST) {
                    continue;
                }
                kinds.push(KindId {
                    gvk: Gvk { group: ar.group.clone(), version: ar.version.clone(), kind: ar.kind.clone() },
                    plural: ar.plural.clone(),
                });
            }
        }
        Ok(kinds)
    }
}

pub struct KubeConstraintCatalog {
    client: Client,
    constraint_group: String,
}

impl KubeConstraintCatalog {
    pub fn new(client: Client, constraint_group: String) -> Self {
        KubeConstraintCatalog { client, constraint_group }
    }
}

impl ConstraintCatalog for KubeConstraintCatalog {
    async fn template_crd_present(&self) -> Result<bool, anyhow::Error> {
        let discovery = Discovery::new(self.client.clone()).run().await?;
        Ok(discovery.groups().any(|g| g.name() == self.constraint_group))
    }

    async fn constraint_kinds(&self) -> Result<Vec<KindId>, anyhow::Error> {
        let discovery = Discovery::new(self.client.clone()).run().await?;
        let mut kinds = Vec::new();
        for group in discovery.groups().filter(|g| g.name() == self.constraint_group) {
            for (ar, caps) in group.recommended_resources() {
                if !caps.supports_operation(verbs::LIST) {
                    continue;
                }
                kinds.push(KindId {
                    gvk: Gvk { group: ar.group.clone(), version: ar.version.clone(), kind: ar.kind.clone() },
                    plural: ar.plural.clone(),
                });
            }
        }
        Ok(kinds)
    }
}
