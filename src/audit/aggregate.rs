//! Aggregation: subject-centric mapping rows and the principal-centric
//! reverse lookup

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::attachment::{AttachmentType, PrincipalAttachment, SubjectKey};
use super::resolver::RbacDetail;
use super::views::{GroupRow, SubjectRow, YamlBlock};

/// Fixed summary on every principal report; a later analysis pass fills in
/// the real evaluation.
pub const SUMMARY_PLACEHOLDER: &str = "Identity found. Click 'Analyze' to evaluate permissions.";

/// Subject-centric audit row: one attachment edge with its RBAC grants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRow {
    pub iam_principal: String,
    pub attachment_type: AttachmentType,
    pub access_policies: Vec<String>,
    pub k8s_subject: String,
    pub rbac_details: Vec<RbacDetail>,
    pub summary: String,
}

/// Principal-centric report: everything one IAM principal can reach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrincipalReport {
    pub iam_role: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub all_yamls: Vec<YamlBlock>,
    pub summary: String,
}

impl PrincipalReport {
    fn new(iam_role: impl Into<String>) -> Self {
        Self {
            iam_role: iam_role.into(),
            kind: "iam".to_string(),
            all_yamls: Vec::new(),
            summary: String::new(),
        }
    }
}

/// Join attachments with their resolved grants into sorted mapping rows.
///
/// An attachment whose subject has no grants still produces a row with an
/// empty detail list; "attached but unprivileged" is a finding.
pub fn join_rows(
    attachments: Vec<PrincipalAttachment>,
    details: &HashMap<SubjectKey, Vec<RbacDetail>>,
) -> Vec<MappingRow> {
    let mut rows: Vec<MappingRow> = attachments
        .into_iter()
        .map(|attachment| {
            let rbac_details = details
                .get(&attachment.subject_key)
                .cloned()
                .unwrap_or_default();
            MappingRow {
                iam_principal: attachment.iam_principal,
                attachment_type: attachment.attachment_type,
                access_policies: attachment.access_policies,
                k8s_subject: attachment.k8s_subject,
                rbac_details,
                summary: String::new(),
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        (&a.iam_principal, a.attachment_type, &a.k8s_subject).cmp(&(
            &b.iam_principal,
            b.attachment_type,
            &b.k8s_subject,
        ))
    });
    rows
}

/// Reverse lookup: fold the flat views into one report per IAM principal.
///
/// Service-account rows seed reports directly from their IRSA role. Group
/// rows only reach a report through `access_entry_groups` (principal ARN to
/// Kubernetes groups); a group no principal maps to contributes nothing.
/// Merging is additive and a first reference creates an empty report, so an
/// access entry principal whose groups hold no bindings still appears.
pub fn aggregate_by_principal(
    subject_rows: &[SubjectRow],
    group_rows: &[GroupRow],
    access_entry_groups: &BTreeMap<String, Vec<String>>,
) -> Vec<PrincipalReport> {
    let mut reports: BTreeMap<String, PrincipalReport> = BTreeMap::new();

    for row in subject_rows {
        if row.iam_role.is_empty() || row.iam_role == "None" {
            continue;
        }
        let report = reports
            .entry(row.iam_role.clone())
            .or_insert_with(|| PrincipalReport::new(&row.iam_role));
        report.all_yamls.push(YamlBlock {
            kind: row.binding_type.as_str().to_string(),
            name: row.binding_name.clone(),
            data: row.binding_yaml.clone(),
            namespace: row.namespace.clone(),
        });
        report.all_yamls.push(YamlBlock {
            kind: row.role_kind.as_str().to_string(),
            name: row.role_name.clone(),
            data: row.role_yaml.clone(),
            namespace: row.namespace.clone(),
        });
    }

    for (principal_arn, groups) in access_entry_groups {
        let report = reports
            .entry(principal_arn.clone())
            .or_insert_with(|| PrincipalReport::new(principal_arn));
        for group_name in groups {
            for group_row in group_rows.iter().filter(|g| &g.group_name == group_name) {
                report.all_yamls.extend(group_row.all_yamls.iter().cloned());
            }
        }
    }

    let mut result: Vec<PrincipalReport> = reports.into_values().collect();
    for report in &mut result {
        report.summary = SUMMARY_PLACEHOLDER.to_string();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::resolver::{BindingKind, RoleRefKind};

    fn subject_row(sa: &str, namespace: &str, iam_role: &str) -> SubjectRow {
        SubjectRow {
            sa: sa.to_string(),
            namespace: namespace.to_string(),
            iam_role: iam_role.to_string(),
            binding_type: BindingKind::RoleBinding,
            binding_name: format!("{sa}-binding"),
            binding_yaml: format!("kind: RoleBinding\nname: {sa}-binding\n"),
            role_yaml: format!("kind: Role\nname: {sa}-role\n"),
            role_name: format!("{sa}-role"),
            role_kind: RoleRefKind::Role,
            is_global: false,
        }
    }

    fn group_row(name: &str) -> GroupRow {
        GroupRow {
            group_name: name.to_string(),
            roles: vec!["cluster-admin".to_string()],
            namespaces: vec!["Cluster-Wide".to_string()],
            all_yamls: vec![
                YamlBlock {
                    kind: "ClusterRoleBinding".to_string(),
                    name: format!("{name}-binding"),
                    data: String::new(),
                    namespace: "Cluster-Wide".to_string(),
                },
                YamlBlock {
                    kind: "ClusterRole".to_string(),
                    name: "cluster-admin".to_string(),
                    data: String::new(),
                    namespace: "Cluster-Wide".to_string(),
                },
            ],
        }
    }

    #[test]
    fn test_unattached_rows_are_skipped() {
        let rows = vec![
            subject_row("a", "ns", "None"),
            subject_row("b", "ns", ""),
        ];
        let reports = aggregate_by_principal(&rows, &[], &BTreeMap::new());
        assert!(reports.is_empty());
    }

    #[test]
    fn test_service_account_row_contributes_binding_and_role_pair() {
        let rows = vec![subject_row("payments-api", "payments", "arn:aws:iam::1:role/p")];
        let reports = aggregate_by_principal(&rows, &[], &BTreeMap::new());

        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.iam_role, "arn:aws:iam::1:role/p");
        assert_eq!(report.kind, "iam");
        assert_eq!(report.all_yamls.len(), 2);
        assert_eq!(report.all_yamls[0].kind, "RoleBinding");
        assert_eq!(report.all_yamls[1].kind, "Role");
        assert_eq!(report.summary, SUMMARY_PLACEHOLDER);
    }

    #[test]
    fn test_group_rows_fold_through_access_entry_mapping() {
        let groups = vec![group_row("eks:platform-admins"), group_row("eks:other")];
        let mapping = BTreeMap::from([(
            "arn:aws:iam::1:role/admins".to_string(),
            vec!["eks:platform-admins".to_string()],
        )]);
        let reports = aggregate_by_principal(&[], &groups, &mapping);

        // eks:other has no principal and contributes nothing.
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].iam_role, "arn:aws:iam::1:role/admins");
        assert_eq!(reports[0].all_yamls.len(), 2);
    }

    #[test]
    fn test_access_entry_with_unbound_group_still_appears() {
        let mapping = BTreeMap::from([(
            "arn:aws:iam::1:role/ghost".to_string(),
            vec!["eks:unbound".to_string()],
        )]);
        let reports = aggregate_by_principal(&[], &[], &mapping);

        assert_eq!(reports.len(), 1);
        assert!(reports[0].all_yamls.is_empty());
        assert_eq!(reports[0].summary, SUMMARY_PLACEHOLDER);
    }

    #[test]
    fn test_reports_sorted_by_principal() {
        let rows = vec![
            subject_row("b", "ns", "arn:b"),
            subject_row("a", "ns", "arn:a"),
        ];
        let reports = aggregate_by_principal(&rows, &[], &BTreeMap::new());
        assert_eq!(reports[0].iam_role, "arn:a");
        assert_eq!(reports[1].iam_role, "arn:b");
    }
}
