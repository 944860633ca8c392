//! In-memory fixture providers
//!
//! Used by the integration tests and by `--mock` mode, which serves a small
//! but representative cluster: an IRSA-annotated service account, a pod
//! identity consumer, an unattached service account, an access-entry admin
//! group and a read-only auditor group.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use kube::api::{DynamicObject, ObjectMeta, TypeMeta};

use super::{AccessEntryDetail, CloudIdentityApi, ClusterRbacApi, Page, PodIdentityDetail};
use crate::error::{Error, Result};
use crate::IRSA_ROLE_ANNOTATION;

/// In-memory cluster RBAC surface.
///
/// `page_size` forces multi-page listings so pagination handling is
/// exercised; `None` serves everything in one page.
#[derive(Default)]
pub struct MockCluster {
    pub service_accounts: Vec<ServiceAccount>,
    pub role_bindings: Vec<RoleBinding>,
    pub cluster_role_bindings: Vec<ClusterRoleBinding>,
    pub roles: Vec<Role>,
    pub cluster_roles: Vec<ClusterRole>,
    pub cilium_namespaced: Vec<DynamicObject>,
    pub cilium_cluster_wide: Vec<DynamicObject>,
    pub page_size: Option<usize>,
    pub role_gets: AtomicUsize,
    pub cluster_role_gets: AtomicUsize,
}

impl MockCluster {
    /// The standard fixture cast.
    pub fn with_fixtures() -> Self {
        Self {
            service_accounts: vec![
                service_account(
                    "payments",
                    "payments-api",
                    Some("arn:aws:iam::111122223333:role/eks-irsa-payments-api"),
                ),
                service_account("ops", "inventory-sync", None),
                service_account("monitoring", "metrics-agent", None),
            ],
            role_bindings: vec![
                role_binding(
                    "payments",
                    "payments-api-reader-binding",
                    vec![sa_subject("payments-api", Some("payments"))],
                    role_ref("Role", "payments-api-reader"),
                ),
                role_binding(
                    "monitoring",
                    "metrics-agent-reader",
                    vec![sa_subject("metrics-agent", Some("monitoring"))],
                    role_ref("Role", "metrics-read"),
                ),
                role_binding(
                    "payments",
                    "auditors-view",
                    vec![group_subject("eks:readonly-auditors")],
                    role_ref("ClusterRole", "view"),
                ),
            ],
            cluster_role_bindings: vec![
                cluster_role_binding(
                    "inventory-sync-view",
                    vec![sa_subject("inventory-sync", Some("ops"))],
                    role_ref("ClusterRole", "view"),
                ),
                cluster_role_binding(
                    "platform-admins-cluster-admin",
                    vec![group_subject("eks:platform-admins")],
                    role_ref("ClusterRole", "cluster-admin"),
                ),
            ],
            roles: vec![
                role(
                    "payments",
                    "payments-api-reader",
                    read_rules(&["pods", "services", "configmaps"]),
                ),
                role(
                    "monitoring",
                    "metrics-read",
                    read_rules(&["pods", "nodes", "events"]),
                ),
            ],
            cluster_roles: vec![
                cluster_role("view", read_rules(&["pods", "services", "configmaps"])),
                cluster_role("cluster-admin", admin_rules()),
            ],
            cilium_namespaced: vec![cilium_policy(
                "allow-payments-to-db",
                Some("payments"),
                false,
                serde_json::json!({
                    "endpointSelector": { "matchLabels": { "app": "payments-api" } },
                    "egress": [
                        { "toEndpoints": [ { "matchLabels": { "app": "postgres" } } ] }
                    ]
                }),
            )],
            cilium_cluster_wide: vec![cilium_policy(
                "deny-all-except-dns",
                None,
                true,
                serde_json::json!({
                    "endpointSelector": {},
                    "ingress": [ {} ],
                    "egress": [
                        { "toEndpoints": [ { "matchLabels": { "k8s:io.kubernetes.pod.namespace": "kube-system" } } ] }
                    ]
                }),
            )],
            ..Default::default()
        }
    }

    /// Remote role fetches performed so far, for memoization assertions.
    pub fn role_get_count(&self) -> usize {
        self.role_gets.load(Ordering::SeqCst)
    }

    pub fn cluster_role_get_count(&self) -> usize {
        self.cluster_role_gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterRbacApi for MockCluster {
    async fn list_service_accounts(
        &self,
        continue_token: Option<String>,
    ) -> Result<Page<ServiceAccount>> {
        page_of(&self.service_accounts, continue_token, self.page_size)
    }

    async fn list_role_bindings(
        &self,
        continue_token: Option<String>,
    ) -> Result<Page<RoleBinding>> {
        page_of(&self.role_bindings, continue_token, self.page_size)
    }

    async fn list_cluster_role_bindings(
        &self,
        continue_token: Option<String>,
    ) -> Result<Page<ClusterRoleBinding>> {
        page_of(&self.cluster_role_bindings, continue_token, self.page_size)
    }

    async fn list_roles(&self, continue_token: Option<String>) -> Result<Page<Role>> {
        page_of(&self.roles, continue_token, self.page_size)
    }

    async fn list_cluster_roles(
        &self,
        continue_token: Option<String>,
    ) -> Result<Page<ClusterRole>> {
        page_of(&self.cluster_roles, continue_token, self.page_size)
    }

    async fn get_role(&self, namespace: &str, name: &str) -> Result<Role> {
        self.role_gets.fetch_add(1, Ordering::SeqCst);
        self.roles
            .iter()
            .find(|r| {
                r.metadata.namespace.as_deref() == Some(namespace)
                    && r.metadata.name.as_deref() == Some(name)
            })
            .cloned()
            .ok_or_else(|| Error::provider(format!("role {namespace}/{name} not found")))
    }

    async fn get_cluster_role(&self, name: &str) -> Result<ClusterRole> {
        self.cluster_role_gets.fetch_add(1, Ordering::SeqCst);
        self.cluster_roles
            .iter()
            .find(|r| r.metadata.name.as_deref() == Some(name))
            .cloned()
            .ok_or_else(|| Error::provider(format!("cluster role {name} not found")))
    }

    async fn list_cilium_policies(&self, cluster_wide: bool) -> Result<Vec<DynamicObject>> {
        if cluster_wide {
            Ok(self.cilium_cluster_wide.clone())
        } else {
            Ok(self.cilium_namespaced.clone())
        }
    }
}

/// One access entry fixture.
#[derive(Debug, Clone)]
pub struct MockAccessEntry {
    pub principal_arn: String,
    pub kubernetes_groups: Vec<String>,
    pub policy_arns: Vec<String>,
}

/// One pod identity association fixture.
#[derive(Debug, Clone)]
pub struct MockPodIdentity {
    pub association_id: String,
    pub detail: PodIdentityDetail,
}

/// In-memory cloud identity control plane.
///
/// `failing_describes` holds principal ARNs and association ids whose
/// describe call errors; `vanished` holds ones that still list but describe
/// to nothing, as if deleted mid-audit.
#[derive(Default)]
pub struct MockCloud {
    pub access_entries: Vec<MockAccessEntry>,
    pub pod_identities: Vec<MockPodIdentity>,
    pub page_size: Option<usize>,
    pub failing_describes: HashSet<String>,
    pub vanished: HashSet<String>,
}

impl MockCloud {
    pub fn with_fixtures() -> Self {
        Self {
            access_entries: vec![MockAccessEntry {
                principal_arn: "arn:aws:iam::111122223333:role/eks-accessentry-platform-admins"
                    .to_string(),
                kubernetes_groups: vec!["eks:platform-admins".to_string()],
                policy_arns: vec![
                    "arn:aws:eks::aws:cluster-access-policy/AmazonEKSClusterAdminPolicy"
                        .to_string(),
                ],
            }],
            pod_identities: vec![MockPodIdentity {
                association_id: "a-1".to_string(),
                detail: PodIdentityDetail {
                    role_arn: Some(
                        "arn:aws:iam::111122223333:role/eks-podid-inventory-sync".to_string(),
                    ),
                    target_role_arn: None,
                    namespace: Some("ops".to_string()),
                    service_account: Some("inventory-sync".to_string()),
                },
            }],
            ..Default::default()
        }
    }

    /// Principal to Kubernetes-group mapping, as a fixture convenience.
    pub fn group_mapping(&self) -> BTreeMap<String, Vec<String>> {
        self.access_entries
            .iter()
            .map(|e| (e.principal_arn.clone(), e.kubernetes_groups.clone()))
            .collect()
    }
}

#[async_trait]
impl CloudIdentityApi for MockCloud {
    async fn list_access_entries(
        &self,
        _cluster: &str,
        continue_token: Option<String>,
    ) -> Result<Page<String>> {
        let arns: Vec<String> = self
            .access_entries
            .iter()
            .map(|e| e.principal_arn.clone())
            .collect();
        page_of(&arns, continue_token, self.page_size)
    }

    async fn describe_access_entry(
        &self,
        _cluster: &str,
        principal_arn: &str,
    ) -> Result<Option<AccessEntryDetail>> {
        if self.failing_describes.contains(principal_arn) {
            return Err(Error::provider(format!(
                "describe access entry {principal_arn}: throttled"
            )));
        }
        if self.vanished.contains(principal_arn) {
            return Ok(None);
        }
        Ok(self
            .access_entries
            .iter()
            .find(|e| e.principal_arn == principal_arn)
            .map(|e| AccessEntryDetail {
                principal_arn: e.principal_arn.clone(),
                kubernetes_groups: e.kubernetes_groups.clone(),
            }))
    }

    async fn list_associated_access_policies(
        &self,
        _cluster: &str,
        principal_arn: &str,
        continue_token: Option<String>,
    ) -> Result<Page<String>> {
        let arns = self
            .access_entries
            .iter()
            .find(|e| e.principal_arn == principal_arn)
            .map(|e| e.policy_arns.clone())
            .unwrap_or_default();
        page_of(&arns, continue_token, self.page_size)
    }

    async fn list_pod_identity_associations(
        &self,
        _cluster: &str,
        continue_token: Option<String>,
    ) -> Result<Page<String>> {
        let ids: Vec<String> = self
            .pod_identities
            .iter()
            .map(|p| p.association_id.clone())
            .collect();
        page_of(&ids, continue_token, self.page_size)
    }

    async fn describe_pod_identity_association(
        &self,
        _cluster: &str,
        association_id: &str,
    ) -> Result<Option<PodIdentityDetail>> {
        if self.failing_describes.contains(association_id) {
            return Err(Error::provider(format!(
                "describe pod identity association {association_id}: throttled"
            )));
        }
        if self.vanished.contains(association_id) {
            return Ok(None);
        }
        Ok(self
            .pod_identities
            .iter()
            .find(|p| p.association_id == association_id)
            .map(|p| p.detail.clone()))
    }
}

fn page_of<T: Clone>(
    items: &[T],
    continue_token: Option<String>,
    page_size: Option<usize>,
) -> Result<Page<T>> {
    let start: usize = match continue_token {
        Some(token) => token
            .parse()
            .map_err(|_| Error::provider(format!("bad continue token {token}")))?,
        None => 0,
    };
    let size = page_size.unwrap_or(items.len().max(1));
    let end = (start + size).min(items.len());
    let continue_token = if end < items.len() {
        Some(end.to_string())
    } else {
        None
    };
    Ok(Page {
        items: items[start..end].to_vec(),
        continue_token,
    })
}

pub fn service_account(namespace: &str, name: &str, irsa_role: Option<&str>) -> ServiceAccount {
    let annotations = irsa_role.map(|arn| {
        BTreeMap::from([(IRSA_ROLE_ANNOTATION.to_string(), arn.to_string())])
    });
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            annotations,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn sa_subject(name: &str, namespace: Option<&str>) -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: name.to_string(),
        namespace: namespace.map(String::from),
        ..Default::default()
    }
}

pub fn group_subject(name: &str) -> Subject {
    Subject {
        api_group: Some("rbac.authorization.k8s.io".to_string()),
        kind: "Group".to_string(),
        name: name.to_string(),
        ..Default::default()
    }
}

pub fn role_ref(kind: &str, name: &str) -> RoleRef {
    RoleRef {
        api_group: "rbac.authorization.k8s.io".to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

pub fn role_binding(
    namespace: &str,
    name: &str,
    subjects: Vec<Subject>,
    role_ref: RoleRef,
) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        subjects: Some(subjects),
        role_ref,
    }
}

pub fn cluster_role_binding(
    name: &str,
    subjects: Vec<Subject>,
    role_ref: RoleRef,
) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        subjects: Some(subjects),
        role_ref,
    }
}

pub fn role(namespace: &str, name: &str, rules: Vec<PolicyRule>) -> Role {
    Role {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        rules: Some(rules),
    }
}

pub fn cluster_role(name: &str, rules: Vec<PolicyRule>) -> ClusterRole {
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        rules: Some(rules),
        ..Default::default()
    }
}

pub fn read_rules(resources: &[&str]) -> Vec<PolicyRule> {
    vec![PolicyRule {
        api_groups: Some(vec![String::new()]),
        resources: Some(resources.iter().map(|r| r.to_string()).collect()),
        verbs: vec!["get".to_string(), "list".to_string(), "watch".to_string()],
        ..Default::default()
    }]
}

pub fn admin_rules() -> Vec<PolicyRule> {
    vec![PolicyRule {
        api_groups: Some(vec!["*".to_string()]),
        resources: Some(vec!["*".to_string()]),
        verbs: vec!["*".to_string()],
        ..Default::default()
    }]
}

pub fn cilium_policy(
    name: &str,
    namespace: Option<&str>,
    cluster_wide: bool,
    spec: serde_json::Value,
) -> DynamicObject {
    let kind = if cluster_wide {
        "CiliumClusterwideNetworkPolicy"
    } else {
        "CiliumNetworkPolicy"
    };
    DynamicObject {
        types: Some(TypeMeta {
            api_version: "cilium.io/v2".to_string(),
            kind: kind.to_string(),
        }),
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: namespace.map(String::from),
            ..Default::default()
        },
        data: serde_json::json!({ "spec": spec }),
    }
}
