//! RBAC resolution: bindings to role content, per matched subject
//!
//! Scans every role binding and cluster role binding, keeps only those with
//! at least one indexed subject, and resolves each RoleRef at most once per
//! invocation through an in-memory memo. A binding whose role cannot be
//! fetched is logged and dropped for all of its subjects; the scan continues.

use std::collections::HashMap;

use k8s_openapi::api::rbac::v1::PolicyRule;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::attachment::SubjectKey;
use super::subjects::{match_subjects, SubjectIndex};
use crate::error::Result;
use crate::providers::{drain_pages, ClusterRbacApi};
use crate::yaml::to_yaml;

/// Binding kinds, declared in lexicographic order of their names so the
/// derived `Ord` matches the serialized sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BindingKind {
    ClusterRoleBinding,
    RoleBinding,
}

impl BindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindingKind::ClusterRoleBinding => "ClusterRoleBinding",
            BindingKind::RoleBinding => "RoleBinding",
        }
    }
}

/// Role reference kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RoleRefKind {
    ClusterRole,
    Role,
}

impl RoleRefKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleRefKind::ClusterRole => "ClusterRole",
            RoleRefKind::Role => "Role",
        }
    }
}

/// A role fetched and rendered once, shared across bindings via the memo.
#[derive(Debug, Clone)]
pub struct RoleResolved {
    pub kind: RoleRefKind,
    pub name: String,
    /// Empty for cluster roles.
    pub namespace: String,
    pub yaml: String,
    pub rules: Vec<PolicyRule>,
}

/// One binding-to-role grant for a matched subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RbacDetail {
    pub binding_kind: BindingKind,
    pub binding_name: String,
    /// Empty for cluster role bindings.
    pub binding_namespace: String,
    pub binding_yaml: String,
    pub role_kind: RoleRefKind,
    pub role_name: String,
    pub role_namespace: String,
    pub role_yaml: String,
    pub rules: Vec<PolicyRule>,
}

type RoleMemo = HashMap<(RoleRefKind, String, String), RoleResolved>;

/// Resolve the RBAC grants for every indexed subject.
///
/// The returned lists are sorted by (binding kind, binding namespace,
/// binding name).
pub async fn build_details_by_subject(
    api: &dyn ClusterRbacApi,
    index: &SubjectIndex,
) -> Result<HashMap<SubjectKey, Vec<RbacDetail>>> {
    let role_bindings = drain_pages(|t| api.list_role_bindings(t)).await?;
    let cluster_role_bindings = drain_pages(|t| api.list_cluster_role_bindings(t)).await?;

    let mut result: HashMap<SubjectKey, Vec<RbacDetail>> = HashMap::new();
    let mut memo: RoleMemo = HashMap::new();

    for rb in role_bindings {
        let namespace = rb.metadata.namespace.clone().unwrap_or_default();
        let name = rb.metadata.name.clone().unwrap_or_default();
        let subjects = rb.subjects.as_deref().unwrap_or_default();
        let keys = match_subjects(subjects, &namespace, index);
        if keys.is_empty() {
            continue;
        }

        let binding_yaml = to_yaml(&rb);
        let resolved = match resolve_role_ref(
            api,
            &mut memo,
            &rb.role_ref.kind,
            &rb.role_ref.name,
            &namespace,
        )
        .await
        {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(binding = %format!("{namespace}/{name}"), error = %e, "resolve role ref failed, dropping binding");
                continue;
            }
        };

        let detail = RbacDetail {
            binding_kind: BindingKind::RoleBinding,
            binding_name: name,
            binding_namespace: namespace,
            binding_yaml,
            role_kind: resolved.kind,
            role_name: resolved.name,
            role_namespace: resolved.namespace,
            role_yaml: resolved.yaml,
            rules: resolved.rules,
        };
        for key in keys {
            result.entry(key).or_default().push(detail.clone());
        }
    }

    for crb in cluster_role_bindings {
        let name = crb.metadata.name.clone().unwrap_or_default();
        let subjects = crb.subjects.as_deref().unwrap_or_default();
        let keys = match_subjects(subjects, "", index);
        if keys.is_empty() {
            continue;
        }

        let binding_yaml = to_yaml(&crb);
        let resolved =
            match resolve_role_ref(api, &mut memo, &crb.role_ref.kind, &crb.role_ref.name, "")
                .await
            {
                Ok(resolved) => resolved,
                Err(e) => {
                    warn!(binding = %name, error = %e, "resolve cluster role ref failed, dropping binding");
                    continue;
                }
            };

        let detail = RbacDetail {
            binding_kind: BindingKind::ClusterRoleBinding,
            binding_name: name,
            binding_namespace: String::new(),
            binding_yaml,
            role_kind: resolved.kind,
            role_name: resolved.name,
            role_namespace: resolved.namespace,
            role_yaml: resolved.yaml,
            rules: resolved.rules,
        };
        for key in keys {
            result.entry(key).or_default().push(detail.clone());
        }
    }

    for details in result.values_mut() {
        details.sort_by(|a, b| {
            (a.binding_kind, &a.binding_namespace, &a.binding_name)
                .cmp(&(b.binding_kind, &b.binding_namespace, &b.binding_name))
        });
    }

    Ok(result)
}

/// Fetch and render a role reference, memoized per (kind, namespace, name).
///
/// ClusterRole references normalize to an empty namespace, so the same
/// cluster role referenced from several namespaces resolves exactly once.
async fn resolve_role_ref(
    api: &dyn ClusterRbacApi,
    memo: &mut RoleMemo,
    ref_kind: &str,
    name: &str,
    binding_namespace: &str,
) -> Result<RoleResolved> {
    let (kind, namespace) = if ref_kind == "ClusterRole" {
        (RoleRefKind::ClusterRole, String::new())
    } else {
        (RoleRefKind::Role, binding_namespace.to_string())
    };

    let key = (kind, namespace.clone(), name.to_string());
    if let Some(hit) = memo.get(&key) {
        return Ok(hit.clone());
    }

    let resolved = match kind {
        RoleRefKind::ClusterRole => {
            let role = api.get_cluster_role(name).await?;
            RoleResolved {
                kind,
                name: name.to_string(),
                namespace: namespace.clone(),
                yaml: to_yaml(&role),
                rules: role.rules.unwrap_or_default(),
            }
        }
        RoleRefKind::Role => {
            let role = api.get_role(&namespace, name).await?;
            RoleResolved {
                kind,
                name: name.to_string(),
                namespace: namespace.clone(),
                yaml: to_yaml(&role),
                rules: role.rules.unwrap_or_default(),
            }
        }
    };

    memo.insert(key, resolved.clone());
    Ok(resolved)
}
