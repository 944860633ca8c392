//! Provider seams for the cluster and cloud identity APIs
//!
//! Both data sources are consumed behind traits so the audit pipeline can be
//! exercised end-to-end against in-memory fixtures. All listings are exposed
//! as cursor pages; [`drain_pages`] follows the cursor until exhaustion, so
//! callers never see a partial listing.

use std::future::Future;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::api::DynamicObject;

use crate::error::Result;

mod kube_api;
pub mod mock;

pub use kube_api::KubeClusterApi;
pub use mock::{MockCloud, MockCluster};

/// One page of a cursor-driven listing.
///
/// An absent or empty `continue_token` means the listing is exhausted.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub continue_token: Option<String>,
}

/// Access entry detail as reported by the cloud control plane.
#[derive(Debug, Clone)]
pub struct AccessEntryDetail {
    pub principal_arn: String,
    pub kubernetes_groups: Vec<String>,
}

/// Pod identity association detail.
///
/// `role_arn` is the primary field; some control-plane responses only carry
/// `target_role_arn`, which callers fall back to.
#[derive(Debug, Clone, Default)]
pub struct PodIdentityDetail {
    pub role_arn: Option<String>,
    pub target_role_arn: Option<String>,
    pub namespace: Option<String>,
    pub service_account: Option<String>,
}

/// Read access to the cluster's RBAC surface.
#[async_trait]
pub trait ClusterRbacApi: Send + Sync {
    async fn list_service_accounts(
        &self,
        continue_token: Option<String>,
    ) -> Result<Page<ServiceAccount>>;

    async fn list_role_bindings(&self, continue_token: Option<String>)
        -> Result<Page<RoleBinding>>;

    async fn list_cluster_role_bindings(
        &self,
        continue_token: Option<String>,
    ) -> Result<Page<ClusterRoleBinding>>;

    async fn list_roles(&self, continue_token: Option<String>) -> Result<Page<Role>>;

    async fn list_cluster_roles(&self, continue_token: Option<String>)
        -> Result<Page<ClusterRole>>;

    async fn get_role(&self, namespace: &str, name: &str) -> Result<Role>;

    async fn get_cluster_role(&self, name: &str) -> Result<ClusterRole>;

    /// List Cilium network policies; `cluster_wide` selects CCNP over CNP.
    ///
    /// Errors here are expected (the CRDs may not be installed) and callers
    /// treat them as an empty listing.
    async fn list_cilium_policies(&self, cluster_wide: bool) -> Result<Vec<DynamicObject>>;
}

/// Read access to the cloud identity control plane (access entries and pod
/// identity associations).
#[async_trait]
pub trait CloudIdentityApi: Send + Sync {
    /// Principal ARNs with an access entry on the cluster.
    async fn list_access_entries(
        &self,
        cluster: &str,
        continue_token: Option<String>,
    ) -> Result<Page<String>>;

    async fn describe_access_entry(
        &self,
        cluster: &str,
        principal_arn: &str,
    ) -> Result<Option<AccessEntryDetail>>;

    /// Policy ARNs associated with an access entry principal.
    async fn list_associated_access_policies(
        &self,
        cluster: &str,
        principal_arn: &str,
        continue_token: Option<String>,
    ) -> Result<Page<String>>;

    /// Pod identity association ids for the cluster.
    async fn list_pod_identity_associations(
        &self,
        cluster: &str,
        continue_token: Option<String>,
    ) -> Result<Page<String>>;

    async fn describe_pod_identity_association(
        &self,
        cluster: &str,
        association_id: &str,
    ) -> Result<Option<PodIdentityDetail>>;
}

/// Cloud identity provider for clusters audited without cloud credentials.
///
/// Every listing is empty, so access-entry and pod-identity attachments
/// simply do not appear; IRSA and RBAC data are unaffected.
pub struct OfflineCloudApi;

#[async_trait]
impl CloudIdentityApi for OfflineCloudApi {
    async fn list_access_entries(
        &self,
        _cluster: &str,
        _continue_token: Option<String>,
    ) -> Result<Page<String>> {
        Ok(Page {
            items: Vec::new(),
            continue_token: None,
        })
    }

    async fn describe_access_entry(
        &self,
        _cluster: &str,
        _principal_arn: &str,
    ) -> Result<Option<AccessEntryDetail>> {
        Ok(None)
    }

    async fn list_associated_access_policies(
        &self,
        _cluster: &str,
        _principal_arn: &str,
        _continue_token: Option<String>,
    ) -> Result<Page<String>> {
        Ok(Page {
            items: Vec::new(),
            continue_token: None,
        })
    }

    async fn list_pod_identity_associations(
        &self,
        _cluster: &str,
        _continue_token: Option<String>,
    ) -> Result<Page<String>> {
        Ok(Page {
            items: Vec::new(),
            continue_token: None,
        })
    }

    async fn describe_pod_identity_association(
        &self,
        _cluster: &str,
        _association_id: &str,
    ) -> Result<Option<PodIdentityDetail>> {
        Ok(None)
    }
}

/// Follow a cursor-paged listing to exhaustion.
///
/// A failed page fails the whole listing; partial listings are never
/// returned.
pub async fn drain_pages<T, F, Fut>(mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut items = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let page = fetch(token.take()).await?;
        items.extend(page.items);
        match page.continue_token {
            Some(next) if !next.is_empty() => token = Some(next),
            _ => break,
        }
    }
    Ok(items)
}
