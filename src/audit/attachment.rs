//! Identity attachment model and collectors
//!
//! Three mechanisms attach an IAM principal to a Kubernetes identity:
//! access entries (principal to group), pod identity associations and IRSA
//! annotations (principal to service account). Each collector normalizes its
//! mechanism into [`PrincipalAttachment`] records; the pipeline never cares
//! which control plane a record came from after this point.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::providers::{drain_pages, CloudIdentityApi, ClusterRbacApi};
use crate::IRSA_ROLE_ANNOTATION;

/// Kubernetes subject kinds an IAM principal can reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SubjectKind {
    Group,
    ServiceAccount,
}

/// Identity of a Kubernetes subject; `namespace` is empty for groups.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubjectKey {
    pub kind: SubjectKind,
    pub name: String,
    pub namespace: String,
}

impl SubjectKey {
    pub fn group(name: impl Into<String>) -> Self {
        Self {
            kind: SubjectKind::Group,
            name: name.into(),
            namespace: String::new(),
        }
    }

    pub fn service_account(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: SubjectKind::ServiceAccount,
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

/// Attachment mechanism.
///
/// Variant order matches the lexicographic order of the serialized names, so
/// the derived `Ord` sorts rows the same way their wire form would.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AttachmentType {
    AccessEntry,
    #[serde(rename = "IRSA")]
    Irsa,
    PodIdentity,
}

/// One resolved attachment edge from an IAM principal to a subject.
#[derive(Debug, Clone, PartialEq)]
pub struct PrincipalAttachment {
    pub iam_principal: String,
    pub attachment_type: AttachmentType,
    /// Associated access policy names; only access entries carry these.
    pub access_policies: Vec<String>,
    /// Display form of the subject: group name, or `namespace/name`.
    pub k8s_subject: String,
    pub subject_key: SubjectKey,
}

/// Collect access-entry attachments: one record per Kubernetes group of each
/// access entry principal. A principal with no groups yields no records.
pub async fn collect_access_entry_attachments(
    cloud: &dyn CloudIdentityApi,
    cluster: &str,
) -> Result<Vec<PrincipalAttachment>> {
    let principals = drain_pages(|t| cloud.list_access_entries(cluster, t)).await?;

    let mut attachments = Vec::new();
    for principal_arn in principals {
        let detail = match cloud.describe_access_entry(cluster, &principal_arn).await {
            Ok(Some(detail)) => detail,
            Ok(None) => continue,
            Err(e) => {
                warn!(principal = %principal_arn, error = %e, "describe access entry failed, skipping");
                continue;
            }
        };

        let policy_names = collect_access_policy_names(cloud, cluster, &principal_arn).await;
        for group in detail.kubernetes_groups {
            let group = group.trim();
            if group.is_empty() {
                continue;
            }
            attachments.push(PrincipalAttachment {
                iam_principal: principal_arn.clone(),
                attachment_type: AttachmentType::AccessEntry,
                access_policies: policy_names.clone(),
                k8s_subject: group.to_string(),
                subject_key: SubjectKey::group(group),
            });
        }
    }

    Ok(attachments)
}

/// Associated access policy names for a principal, deduplicated and sorted.
///
/// Policy names are best-effort enrichment: a failed page stops the listing
/// but keeps what was already fetched.
async fn collect_access_policy_names(
    cloud: &dyn CloudIdentityApi,
    cluster: &str,
    principal_arn: &str,
) -> Vec<String> {
    let mut names = Vec::new();
    let mut seen = HashSet::new();
    let mut token: Option<String> = None;

    loop {
        let page = match cloud
            .list_associated_access_policies(cluster, principal_arn, token.take())
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(principal = %principal_arn, error = %e, "list associated access policies failed");
                break;
            }
        };

        for policy_arn in page.items {
            let policy_arn = policy_arn.trim();
            if policy_arn.is_empty() {
                continue;
            }
            let name = policy_display_name(policy_arn);
            if seen.insert(name.clone()) {
                names.push(name);
            }
        }

        match page.continue_token {
            Some(next) if !next.is_empty() => token = Some(next),
            _ => break,
        }
    }

    names.sort();
    names
}

/// Last path segment of a policy ARN, falling back to the whole ARN.
fn policy_display_name(policy_arn: &str) -> String {
    match policy_arn.rsplit('/').next().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => policy_arn.to_string(),
    }
}

/// Collect pod-identity attachments. Associations missing a role ARN,
/// namespace or service account name are incomplete and skipped whole.
pub async fn collect_pod_identity_attachments(
    cloud: &dyn CloudIdentityApi,
    cluster: &str,
) -> Result<Vec<PrincipalAttachment>> {
    let association_ids = drain_pages(|t| cloud.list_pod_identity_associations(cluster, t)).await?;

    let mut attachments = Vec::new();
    for association_id in association_ids {
        if association_id.is_empty() {
            continue;
        }
        let detail = match cloud
            .describe_pod_identity_association(cluster, &association_id)
            .await
        {
            Ok(Some(detail)) => detail,
            Ok(None) => continue,
            Err(e) => {
                warn!(association = %association_id, error = %e, "describe pod identity association failed, skipping");
                continue;
            }
        };

        let role_arn = non_blank(detail.role_arn).or_else(|| non_blank(detail.target_role_arn));
        let namespace = non_blank(detail.namespace);
        let service_account = non_blank(detail.service_account);
        let (Some(role_arn), Some(namespace), Some(service_account)) =
            (role_arn, namespace, service_account)
        else {
            continue;
        };

        attachments.push(PrincipalAttachment {
            iam_principal: role_arn,
            attachment_type: AttachmentType::PodIdentity,
            access_policies: Vec::new(),
            k8s_subject: format!("{namespace}/{service_account}"),
            subject_key: SubjectKey::service_account(namespace, service_account),
        });
    }

    Ok(attachments)
}

/// Collect IRSA attachments from service account annotations across all
/// namespaces.
pub async fn collect_irsa_attachments(
    api: &dyn ClusterRbacApi,
) -> Result<Vec<PrincipalAttachment>> {
    let service_accounts = drain_pages(|t| api.list_service_accounts(t)).await?;

    let mut attachments = Vec::new();
    for sa in service_accounts {
        let role_arn = sa
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(IRSA_ROLE_ANNOTATION))
            .map(|v| v.trim())
            .filter(|v| !v.is_empty());
        let Some(role_arn) = role_arn else {
            continue;
        };

        let namespace = sa.metadata.namespace.clone().unwrap_or_default();
        let name = sa.metadata.name.clone().unwrap_or_default();
        attachments.push(PrincipalAttachment {
            iam_principal: role_arn.to_string(),
            attachment_type: AttachmentType::Irsa,
            access_policies: Vec::new(),
            k8s_subject: format!("{namespace}/{name}"),
            subject_key: SubjectKey::service_account(namespace, name),
        });
    }

    Ok(attachments)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_type_sorts_like_wire_names() {
        let mut types = vec![
            AttachmentType::PodIdentity,
            AttachmentType::Irsa,
            AttachmentType::AccessEntry,
        ];
        types.sort();
        assert_eq!(
            types,
            vec![
                AttachmentType::AccessEntry,
                AttachmentType::Irsa,
                AttachmentType::PodIdentity,
            ]
        );
        assert_eq!(
            serde_json::to_string(&AttachmentType::Irsa).unwrap(),
            "\"IRSA\""
        );
    }

    #[test]
    fn test_policy_display_name_takes_last_arn_segment() {
        assert_eq!(
            policy_display_name("arn:aws:eks::aws:cluster-access-policy/AmazonEKSClusterAdminPolicy"),
            "AmazonEKSClusterAdminPolicy"
        );
        // No path separator: the whole ARN stands in.
        assert_eq!(policy_display_name("not-an-arn"), "not-an-arn");
        assert_eq!(policy_display_name("trailing/"), "trailing/");
    }

    #[tokio::test]
    async fn test_access_entry_with_no_groups_yields_no_attachments() {
        use crate::providers::mock::{MockAccessEntry, MockCloud};

        let cloud = MockCloud {
            access_entries: vec![MockAccessEntry {
                principal_arn: "arn:aws:iam::111122223333:role/no-groups".to_string(),
                kubernetes_groups: vec![],
                policy_arns: vec![],
            }],
            ..Default::default()
        };
        let attachments = collect_access_entry_attachments(&cloud, "prod")
            .await
            .unwrap();
        assert!(attachments.is_empty());
    }

    #[tokio::test]
    async fn test_access_entry_skips_blank_groups() {
        use crate::providers::mock::{MockAccessEntry, MockCloud};

        let cloud = MockCloud {
            access_entries: vec![MockAccessEntry {
                principal_arn: "arn:aws:iam::111122223333:role/admins".to_string(),
                kubernetes_groups: vec![
                    "  ".to_string(),
                    " eks:platform-admins ".to_string(),
                    String::new(),
                ],
                policy_arns: vec![],
            }],
            ..Default::default()
        };
        let attachments = collect_access_entry_attachments(&cloud, "prod")
            .await
            .unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].k8s_subject, "eks:platform-admins");
        assert_eq!(
            attachments[0].subject_key,
            SubjectKey::group("eks:platform-admins")
        );
    }

    #[tokio::test]
    async fn test_access_entry_describe_failure_skips_one_principal() {
        use std::collections::HashSet;

        use crate::providers::mock::{MockAccessEntry, MockCloud};

        let entry = |arn: &str, group: &str| MockAccessEntry {
            principal_arn: arn.to_string(),
            kubernetes_groups: vec![group.to_string()],
            policy_arns: vec![],
        };
        let cloud = MockCloud {
            access_entries: vec![
                entry("arn:aws:iam::1:role/healthy", "eks:platform-admins"),
                entry("arn:aws:iam::1:role/broken", "eks:broken"),
                entry("arn:aws:iam::1:role/gone", "eks:gone"),
            ],
            failing_describes: HashSet::from(["arn:aws:iam::1:role/broken".to_string()]),
            // Listed but describes to nothing, as if deleted mid-audit.
            vanished: HashSet::from(["arn:aws:iam::1:role/gone".to_string()]),
            ..Default::default()
        };

        let attachments = collect_access_entry_attachments(&cloud, "prod")
            .await
            .unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].iam_principal, "arn:aws:iam::1:role/healthy");
        assert_eq!(attachments[0].k8s_subject, "eks:platform-admins");
    }

    #[tokio::test]
    async fn test_pod_identity_describe_failure_skips_one_association() {
        use std::collections::HashSet;

        use crate::providers::mock::{MockCloud, MockPodIdentity};
        use crate::providers::PodIdentityDetail;

        let assoc = |id: &str, sa: &str| MockPodIdentity {
            association_id: id.to_string(),
            detail: PodIdentityDetail {
                role_arn: Some(format!("arn:aws:iam::1:role/{sa}")),
                target_role_arn: None,
                namespace: Some("ops".to_string()),
                service_account: Some(sa.to_string()),
            },
        };
        let cloud = MockCloud {
            pod_identities: vec![
                assoc("a-1", "inventory-sync"),
                assoc("a-broken", "broken"),
                assoc("a-gone", "gone"),
            ],
            failing_describes: HashSet::from(["a-broken".to_string()]),
            vanished: HashSet::from(["a-gone".to_string()]),
            ..Default::default()
        };

        let attachments = collect_pod_identity_attachments(&cloud, "prod")
            .await
            .unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].k8s_subject, "ops/inventory-sync");
    }

    #[tokio::test]
    async fn test_pod_identity_falls_back_to_target_role_arn() {
        use crate::providers::mock::{MockCloud, MockPodIdentity};
        use crate::providers::PodIdentityDetail;

        let cloud = MockCloud {
            pod_identities: vec![
                MockPodIdentity {
                    association_id: "a-1".to_string(),
                    detail: PodIdentityDetail {
                        role_arn: None,
                        target_role_arn: Some("arn:aws:iam::1:role/target".to_string()),
                        namespace: Some("ops".to_string()),
                        service_account: Some("sync".to_string()),
                    },
                },
                // Missing namespace: the whole record is skipped.
                MockPodIdentity {
                    association_id: "a-2".to_string(),
                    detail: PodIdentityDetail {
                        role_arn: Some("arn:aws:iam::1:role/other".to_string()),
                        target_role_arn: None,
                        namespace: None,
                        service_account: Some("sync".to_string()),
                    },
                },
            ],
            ..Default::default()
        };
        let attachments = collect_pod_identity_attachments(&cloud, "prod")
            .await
            .unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].iam_principal, "arn:aws:iam::1:role/target");
        assert_eq!(attachments[0].k8s_subject, "ops/sync");
    }

    #[tokio::test]
    async fn test_irsa_requires_non_blank_annotation() {
        use crate::providers::mock::{service_account, MockCluster};

        let cluster = MockCluster {
            service_accounts: vec![
                service_account("payments", "payments-api", Some("arn:aws:iam::1:role/p")),
                service_account("payments", "blank", Some("   ")),
                service_account("payments", "none", None),
            ],
            ..Default::default()
        };
        let attachments = collect_irsa_attachments(&cluster).await.unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].attachment_type, AttachmentType::Irsa);
        assert_eq!(attachments[0].k8s_subject, "payments/payments-api");
    }
}
