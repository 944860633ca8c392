//! Supplementary flat views: per-service-account and per-group
//!
//! These are bulk-join views over the cluster alone; no cloud identity data
//! beyond the IRSA annotation is involved. Role content comes from listed
//! lookup maps (service-account view) or point fetches (group view).

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::resolver::{BindingKind, RoleRefKind};
use crate::error::Result;
use crate::providers::{drain_pages, ClusterRbacApi};
use crate::yaml::to_yaml;
use crate::IRSA_ROLE_ANNOTATION;

/// A Kubernetes manifest with enough metadata to render it standalone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YamlBlock {
    pub kind: String,
    pub name: String,
    pub data: String,
    pub namespace: String,
}

/// One binding edge for a ServiceAccount subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectRow {
    pub sa: String,
    pub namespace: String,
    /// IRSA role ARN, or the literal `"None"` when unannotated.
    pub iam_role: String,
    pub binding_type: BindingKind,
    pub binding_name: String,
    pub binding_yaml: String,
    pub role_yaml: String,
    #[serde(rename = "role")]
    pub role_name: String,
    pub role_kind: RoleRefKind,
    pub is_global: bool,
}

/// Accumulated permissions of one Kubernetes group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupRow {
    pub group_name: String,
    pub roles: Vec<String>,
    pub namespaces: Vec<String>,
    pub all_yamls: Vec<YamlBlock>,
}

/// Build the service-account view: one row per ServiceAccount subject of
/// every binding, with the IRSA role joined in.
pub async fn collect_subject_rows(api: &dyn ClusterRbacApi) -> Result<Vec<SubjectRow>> {
    let service_accounts = drain_pages(|t| api.list_service_accounts(t)).await?;
    let role_bindings = drain_pages(|t| api.list_role_bindings(t)).await?;
    let cluster_role_bindings = drain_pages(|t| api.list_cluster_role_bindings(t)).await?;
    let roles = drain_pages(|t| api.list_roles(t)).await?;
    let cluster_roles = drain_pages(|t| api.list_cluster_roles(t)).await?;

    let mut role_yaml: HashMap<(String, String), String> = HashMap::new();
    for role in roles {
        let namespace = role.metadata.namespace.clone().unwrap_or_default();
        let name = role.metadata.name.clone().unwrap_or_default();
        role_yaml.insert((namespace, name), to_yaml(&role));
    }

    let mut cluster_role_yaml: HashMap<String, String> = HashMap::new();
    for role in cluster_roles {
        let name = role.metadata.name.clone().unwrap_or_default();
        cluster_role_yaml.insert(name, to_yaml(&role));
    }

    let mut irsa: HashMap<(String, String), String> = HashMap::new();
    for sa in service_accounts {
        if let Some(arn) = sa
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(IRSA_ROLE_ANNOTATION))
        {
            let namespace = sa.metadata.namespace.clone().unwrap_or_default();
            let name = sa.metadata.name.clone().unwrap_or_default();
            irsa.insert((namespace, name), arn.clone());
        }
    }

    let iam_for = |namespace: &str, name: &str| -> String {
        irsa.get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .unwrap_or_else(|| "None".to_string())
    };

    let mut rows = Vec::new();

    for rb in role_bindings {
        let namespace = rb.metadata.namespace.clone().unwrap_or_default();
        let binding_name = rb.metadata.name.clone().unwrap_or_default();
        let binding_yaml = to_yaml(&rb);

        let (yaml, kind) = if rb.role_ref.kind == "ClusterRole" {
            (
                cluster_role_yaml
                    .get(&rb.role_ref.name)
                    .cloned()
                    .unwrap_or_default(),
                RoleRefKind::ClusterRole,
            )
        } else {
            (
                role_yaml
                    .get(&(namespace.clone(), rb.role_ref.name.clone()))
                    .cloned()
                    .unwrap_or_default(),
                RoleRefKind::Role,
            )
        };

        for subject in rb.subjects.as_deref().unwrap_or_default() {
            if subject.kind != "ServiceAccount" {
                continue;
            }
            rows.push(SubjectRow {
                sa: subject.name.clone(),
                namespace: namespace.clone(),
                iam_role: iam_for(&namespace, &subject.name),
                binding_type: BindingKind::RoleBinding,
                binding_name: binding_name.clone(),
                binding_yaml: binding_yaml.clone(),
                role_yaml: yaml.clone(),
                role_name: rb.role_ref.name.clone(),
                role_kind: kind,
                is_global: false,
            });
        }
    }

    for crb in cluster_role_bindings {
        let binding_name = crb.metadata.name.clone().unwrap_or_default();
        let binding_yaml = to_yaml(&crb);
        let yaml = cluster_role_yaml
            .get(&crb.role_ref.name)
            .cloned()
            .unwrap_or_default();

        for subject in crb.subjects.as_deref().unwrap_or_default() {
            if subject.kind != "ServiceAccount" {
                continue;
            }
            // Subject's own namespace keys the IRSA lookup here.
            let namespace = subject.namespace.clone().unwrap_or_default();
            rows.push(SubjectRow {
                sa: subject.name.clone(),
                namespace: namespace.clone(),
                iam_role: iam_for(&namespace, &subject.name),
                binding_type: BindingKind::ClusterRoleBinding,
                binding_name: binding_name.clone(),
                binding_yaml: binding_yaml.clone(),
                role_yaml: yaml.clone(),
                role_name: crb.role_ref.name.clone(),
                role_kind: RoleRefKind::ClusterRole,
                is_global: true,
            });
        }
    }

    rows.sort_by(|a, b| {
        (&a.sa, &a.namespace, a.binding_type, &a.binding_name).cmp(&(
            &b.sa,
            &b.namespace,
            b.binding_type,
            &b.binding_name,
        ))
    });
    Ok(rows)
}

/// Build the group view: accumulate every Group subject's bindings with the
/// resolved role content, ordered by group name.
pub async fn collect_group_rows(api: &dyn ClusterRbacApi) -> Result<Vec<GroupRow>> {
    let role_bindings = drain_pages(|t| api.list_role_bindings(t)).await?;
    let cluster_role_bindings = drain_pages(|t| api.list_cluster_role_bindings(t)).await?;

    let mut groups: BTreeMap<String, GroupRow> = BTreeMap::new();

    let mut add_entry = |group: &str,
                         role: &str,
                         namespace: &str,
                         binding_name: &str,
                         binding_kind: BindingKind,
                         binding_yaml: &str,
                         role_kind: RoleRefKind,
                         role_yaml: &str| {
        let row = groups.entry(group.to_string()).or_insert_with(|| GroupRow {
            group_name: group.to_string(),
            ..Default::default()
        });
        row.roles.push(role.to_string());
        row.namespaces.push(namespace.to_string());
        row.all_yamls.push(YamlBlock {
            kind: binding_kind.as_str().to_string(),
            name: binding_name.to_string(),
            data: binding_yaml.to_string(),
            namespace: namespace.to_string(),
        });
        row.all_yamls.push(YamlBlock {
            kind: role_kind.as_str().to_string(),
            name: role.to_string(),
            data: role_yaml.to_string(),
            namespace: namespace.to_string(),
        });
    };

    for rb in role_bindings {
        let namespace = rb.metadata.namespace.clone().unwrap_or_default();
        let binding_name = rb.metadata.name.clone().unwrap_or_default();
        let subjects = rb.subjects.as_deref().unwrap_or_default();
        if !subjects.iter().any(|s| s.kind == "Group") {
            continue;
        }

        let binding_yaml = to_yaml(&rb);
        let (role_yaml, role_kind) = if rb.role_ref.kind == "ClusterRole" {
            match api.get_cluster_role(&rb.role_ref.name).await {
                Ok(role) => (to_yaml(&role), RoleRefKind::ClusterRole),
                Err(e) => {
                    warn!(binding = %format!("{namespace}/{binding_name}"), error = %e, "fetch cluster role failed, skipping binding");
                    continue;
                }
            }
        } else {
            match api.get_role(&namespace, &rb.role_ref.name).await {
                Ok(role) => (to_yaml(&role), RoleRefKind::Role),
                Err(e) => {
                    warn!(binding = %format!("{namespace}/{binding_name}"), error = %e, "fetch role failed, skipping binding");
                    continue;
                }
            }
        };

        for subject in subjects {
            if subject.kind == "Group" {
                add_entry(
                    &subject.name,
                    &rb.role_ref.name,
                    &namespace,
                    &binding_name,
                    BindingKind::RoleBinding,
                    &binding_yaml,
                    role_kind,
                    &role_yaml,
                );
            }
        }
    }

    for crb in cluster_role_bindings {
        let binding_name = crb.metadata.name.clone().unwrap_or_default();
        let subjects = crb.subjects.as_deref().unwrap_or_default();
        if !subjects.iter().any(|s| s.kind == "Group") {
            continue;
        }

        let binding_yaml = to_yaml(&crb);
        let role_yaml = match api.get_cluster_role(&crb.role_ref.name).await {
            Ok(role) => to_yaml(&role),
            Err(e) => {
                warn!(binding = %binding_name, error = %e, "fetch cluster role failed, skipping binding");
                continue;
            }
        };

        for subject in subjects {
            if subject.kind == "Group" {
                add_entry(
                    &subject.name,
                    &crb.role_ref.name,
                    "Cluster-Wide",
                    &binding_name,
                    BindingKind::ClusterRoleBinding,
                    &binding_yaml,
                    RoleRefKind::ClusterRole,
                    &role_yaml,
                );
            }
        }
    }

    Ok(groups.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockCluster;

    #[tokio::test]
    async fn test_subject_rows_join_irsa_and_flag_global_bindings() {
        let cluster = MockCluster::with_fixtures();
        let rows = collect_subject_rows(&cluster).await.unwrap();

        // Group-only bindings contribute no service-account rows.
        assert_eq!(rows.len(), 3);

        let payments = rows.iter().find(|r| r.sa == "payments-api").unwrap();
        assert_eq!(
            payments.iam_role,
            "arn:aws:iam::111122223333:role/eks-irsa-payments-api"
        );
        assert_eq!(payments.binding_type, BindingKind::RoleBinding);
        assert!(!payments.is_global);
        assert!(payments.role_yaml.contains("payments-api-reader"));

        let inventory = rows.iter().find(|r| r.sa == "inventory-sync").unwrap();
        assert_eq!(inventory.iam_role, "None");
        assert_eq!(inventory.namespace, "ops");
        assert!(inventory.is_global);
        assert_eq!(inventory.role_kind, RoleRefKind::ClusterRole);
    }

    #[tokio::test]
    async fn test_group_rows_pair_binding_and_role_blocks() {
        let cluster = MockCluster::with_fixtures();
        let rows = collect_group_rows(&cluster).await.unwrap();

        // Sorted by group name.
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].group_name, "eks:platform-admins");
        assert_eq!(rows[1].group_name, "eks:readonly-auditors");

        let admins = &rows[0];
        assert_eq!(admins.roles, vec!["cluster-admin"]);
        assert_eq!(admins.namespaces, vec!["Cluster-Wide"]);
        assert_eq!(admins.all_yamls.len(), 2);
        assert_eq!(admins.all_yamls[0].kind, "ClusterRoleBinding");
        assert_eq!(admins.all_yamls[1].kind, "ClusterRole");

        let auditors = &rows[1];
        assert_eq!(auditors.roles, vec!["view"]);
        assert_eq!(auditors.namespaces, vec!["payments"]);
        assert_eq!(auditors.all_yamls[0].kind, "RoleBinding");
        assert_eq!(auditors.all_yamls[1].kind, "ClusterRole");
    }
}
