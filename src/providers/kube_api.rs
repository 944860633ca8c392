//! Kubernetes-backed provider implementation
//!
//! Typed listings go through `Api<T>::all` with an explicit page limit so a
//! large cluster never produces an unbounded response; the continue token is
//! surfaced as the page cursor. Cilium policies are CRD-backed and listed
//! dynamically.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::api::{Api, DynamicObject, ListParams, ObjectList};
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use kube::Client;

use super::{ClusterRbacApi, Page};
use crate::error::Result;
use crate::LIST_PAGE_LIMIT;

/// Cluster provider over a `kube::Client`.
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// One page of a cluster-wide listing for any typed resource.
    async fn list_page<K>(&self, continue_token: Option<String>) -> Result<Page<K>>
    where
        K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::all(self.client.clone());
        let list = api.list(&page_params(continue_token)).await?;
        Ok(page_from(list))
    }
}

fn page_params(continue_token: Option<String>) -> ListParams {
    let mut params = ListParams::default().limit(LIST_PAGE_LIMIT);
    if let Some(token) = continue_token.as_deref() {
        params = params.continue_token(token);
    }
    params
}

fn page_from<T: Clone>(list: ObjectList<T>) -> Page<T> {
    Page {
        items: list.items,
        continue_token: list.metadata.continue_.filter(|c| !c.is_empty()),
    }
}

fn cilium_resource(cluster_wide: bool) -> ApiResource {
    let (kind, plural) = if cluster_wide {
        (
            "CiliumClusterwideNetworkPolicy",
            "ciliumclusterwidenetworkpolicies",
        )
    } else {
        ("CiliumNetworkPolicy", "ciliumnetworkpolicies")
    };
    let gvk = GroupVersionKind {
        group: "cilium.io".to_string(),
        version: "v2".to_string(),
        kind: kind.to_string(),
    };
    ApiResource::from_gvk_with_plural(&gvk, plural)
}

#[async_trait]
impl ClusterRbacApi for KubeClusterApi {
    async fn list_service_accounts(
        &self,
        continue_token: Option<String>,
    ) -> Result<Page<ServiceAccount>> {
        self.list_page(continue_token).await
    }

    async fn list_role_bindings(
        &self,
        continue_token: Option<String>,
    ) -> Result<Page<RoleBinding>> {
        self.list_page(continue_token).await
    }

    async fn list_cluster_role_bindings(
        &self,
        continue_token: Option<String>,
    ) -> Result<Page<ClusterRoleBinding>> {
        self.list_page(continue_token).await
    }

    async fn list_roles(&self, continue_token: Option<String>) -> Result<Page<Role>> {
        self.list_page(continue_token).await
    }

    async fn list_cluster_roles(
        &self,
        continue_token: Option<String>,
    ) -> Result<Page<ClusterRole>> {
        self.list_page(continue_token).await
    }

    async fn get_role(&self, namespace: &str, name: &str) -> Result<Role> {
        let api: Api<Role> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn get_cluster_role(&self, name: &str) -> Result<ClusterRole> {
        let api: Api<ClusterRole> = Api::all(self.client.clone());
        Ok(api.get(name).await?)
    }

    async fn list_cilium_policies(&self, cluster_wide: bool) -> Result<Vec<DynamicObject>> {
        let resource = cilium_resource(cluster_wide);
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items)
    }
}
