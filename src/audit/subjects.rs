//! Subject target index and RBAC subject matching

use k8s_openapi::api::rbac::v1::Subject;
use std::collections::BTreeSet;

use super::attachment::{PrincipalAttachment, SubjectKey, SubjectKind};

/// Set of subjects reachable from at least one IAM attachment.
///
/// Bindings whose subjects miss this index entirely are skipped before any
/// role resolution cost is paid.
#[derive(Debug, Default)]
pub struct SubjectIndex {
    groups: BTreeSet<String>,
    service_accounts: BTreeSet<(String, String)>,
}

impl SubjectIndex {
    pub fn from_attachments(attachments: &[PrincipalAttachment]) -> Self {
        let mut index = Self::default();
        for attachment in attachments {
            let key = &attachment.subject_key;
            match key.kind {
                SubjectKind::Group => {
                    index.groups.insert(key.name.clone());
                }
                SubjectKind::ServiceAccount => {
                    index
                        .service_accounts
                        .insert((key.namespace.clone(), key.name.clone()));
                }
            }
        }
        index
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.service_accounts.is_empty()
    }

    fn has_group(&self, name: &str) -> bool {
        self.groups.contains(name)
    }

    fn has_service_account(&self, namespace: &str, name: &str) -> bool {
        self.service_accounts
            .contains(&(namespace.to_string(), name.to_string()))
    }
}

/// Match a binding's subject list against the index.
///
/// Group subjects match on name alone. ServiceAccount subjects without a
/// namespace default to the binding's namespace, per RBAC semantics; for
/// cluster role bindings the default namespace is empty.
pub fn match_subjects(
    subjects: &[Subject],
    default_namespace: &str,
    index: &SubjectIndex,
) -> Vec<SubjectKey> {
    let mut keys = Vec::new();
    for subject in subjects {
        match subject.kind.as_str() {
            "Group" => {
                if index.has_group(&subject.name) {
                    keys.push(SubjectKey::group(subject.name.clone()));
                }
            }
            "ServiceAccount" => {
                let namespace = match subject.namespace.as_deref() {
                    Some(ns) if !ns.is_empty() => ns,
                    _ => default_namespace,
                };
                if index.has_service_account(namespace, &subject.name) {
                    keys.push(SubjectKey::service_account(namespace, subject.name.clone()));
                }
            }
            _ => {}
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::attachment::AttachmentType;
    use crate::providers::mock::{group_subject, sa_subject};

    fn attachment(subject_key: SubjectKey) -> PrincipalAttachment {
        PrincipalAttachment {
            iam_principal: "arn:aws:iam::1:role/test".to_string(),
            attachment_type: AttachmentType::Irsa,
            access_policies: Vec::new(),
            k8s_subject: String::new(),
            subject_key,
        }
    }

    fn index() -> SubjectIndex {
        SubjectIndex::from_attachments(&[
            attachment(SubjectKey::group("eks:platform-admins")),
            attachment(SubjectKey::service_account("payments", "payments-api")),
        ])
    }

    #[test]
    fn test_group_matches_regardless_of_binding_namespace() {
        let subjects = vec![group_subject("eks:platform-admins")];
        let keys = match_subjects(&subjects, "some-namespace", &index());
        assert_eq!(keys, vec![SubjectKey::group("eks:platform-admins")]);
    }

    #[test]
    fn test_unknown_subjects_are_filtered() {
        let subjects = vec![
            group_subject("eks:other"),
            sa_subject("payments-api", Some("other-namespace")),
        ];
        assert!(match_subjects(&subjects, "payments", &index()).is_empty());
    }

    #[test]
    fn test_service_account_defaults_to_binding_namespace() {
        let subjects = vec![sa_subject("payments-api", None)];
        let keys = match_subjects(&subjects, "payments", &index());
        assert_eq!(
            keys,
            vec![SubjectKey::service_account("payments", "payments-api")]
        );
    }

    #[test]
    fn test_cluster_binding_default_namespace_is_empty() {
        // A ClusterRoleBinding subject without a namespace cannot match a
        // namespaced service account target.
        let subjects = vec![sa_subject("payments-api", None)];
        assert!(match_subjects(&subjects, "", &index()).is_empty());
    }

    #[test]
    fn test_non_identity_kinds_are_ignored() {
        let subjects = vec![k8s_openapi::api::rbac::v1::Subject {
            kind: "User".to_string(),
            name: "alice".to_string(),
            ..Default::default()
        }];
        assert!(match_subjects(&subjects, "", &index()).is_empty());
    }

    #[test]
    fn test_empty_attachments_empty_index() {
        let index = SubjectIndex::from_attachments(&[]);
        assert!(index.is_empty());
    }
}
