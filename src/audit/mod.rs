//! Audit pipeline: parameter resolution, collector fan-out, orchestration
//!
//! `build_iam_rbac_map` is the subject-centric pipeline (attachments, index,
//! resolver, join); `build_principal_reports` is the principal-centric
//! reverse lookup over the flat views.

pub mod aggregate;
pub mod attachment;
pub mod resolver;
pub mod subjects;
pub mod views;

use std::collections::BTreeMap;

use tracing::warn;

use crate::error::{Error, Result};
use crate::providers::{drain_pages, CloudIdentityApi, ClusterRbacApi};
use aggregate::{aggregate_by_principal, join_rows, MappingRow, PrincipalReport};
use attachment::{
    collect_access_entry_attachments, collect_irsa_attachments, collect_pod_identity_attachments,
};
use resolver::build_details_by_subject;
use subjects::SubjectIndex;
use views::{collect_group_rows, collect_subject_rows};

/// Resolved audit target.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditParams {
    pub cluster: String,
    pub region: String,
}

/// Resolve the audit target from explicit values with environment fallbacks:
/// `EKS_CLUSTER_NAME` for the cluster, `AWS_REGION` then `AWS_DEFAULT_REGION`
/// for the region.
pub fn resolve_params(cluster: Option<&str>, region: Option<&str>) -> Result<AuditParams> {
    resolve_params_with(cluster, region, |key| std::env::var(key).ok())
}

/// Resolution with an injected environment lookup, so the fallback chain can
/// be tested without touching process-wide state.
fn resolve_params_with<E>(
    cluster: Option<&str>,
    region: Option<&str>,
    env: E,
) -> Result<AuditParams>
where
    E: Fn(&str) -> Option<String>,
{
    let env_non_blank = |key: &str| {
        env(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let cluster = non_blank(cluster)
        .or_else(|| env_non_blank("EKS_CLUSTER_NAME"))
        .ok_or_else(|| {
            Error::config("missing EKS cluster name: set query param 'cluster' or EKS_CLUSTER_NAME")
        })?;

    let region = non_blank(region)
        .or_else(|| env_non_blank("AWS_REGION"))
        .or_else(|| env_non_blank("AWS_DEFAULT_REGION"))
        .ok_or_else(|| {
            Error::config(
                "missing AWS region: set query param 'region', AWS_REGION, or AWS_DEFAULT_REGION",
            )
        })?;

    Ok(AuditParams { cluster, region })
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Build the subject-centric IAM-to-RBAC mapping.
///
/// The three collectors run concurrently; their outputs are disjoint and the
/// final order comes from sorting, never from arrival order. Access-entry and
/// pod-identity listings are supplementary: if one fails the audit continues
/// without that mechanism. The IRSA and RBAC listings come from the same API
/// the rest of the audit needs, so their failure fails the request.
pub async fn build_iam_rbac_map(
    cluster_api: &dyn ClusterRbacApi,
    cloud_api: &dyn CloudIdentityApi,
    params: &AuditParams,
) -> Result<Vec<MappingRow>> {
    let (access_entries, pod_identities, irsa) = tokio::join!(
        collect_access_entry_attachments(cloud_api, &params.cluster),
        collect_pod_identity_attachments(cloud_api, &params.cluster),
        collect_irsa_attachments(cluster_api),
    );

    let mut attachments = access_entries.unwrap_or_else(|e| {
        warn!(cluster = %params.cluster, error = %e, "access entry listing failed, continuing without access entries");
        Vec::new()
    });
    attachments.extend(pod_identities.unwrap_or_else(|e| {
        warn!(cluster = %params.cluster, error = %e, "pod identity listing failed, continuing without pod identities");
        Vec::new()
    }));
    attachments.extend(irsa?);

    if attachments.is_empty() {
        return Ok(Vec::new());
    }

    let index = SubjectIndex::from_attachments(&attachments);
    let details = build_details_by_subject(cluster_api, &index).await?;
    Ok(join_rows(attachments, &details))
}

/// Build the principal-centric reverse reports.
pub async fn build_principal_reports(
    cluster_api: &dyn ClusterRbacApi,
    cloud_api: &dyn CloudIdentityApi,
    params: &AuditParams,
) -> Result<Vec<PrincipalReport>> {
    let (subject_rows, group_rows) = tokio::join!(
        collect_subject_rows(cluster_api),
        collect_group_rows(cluster_api),
    );
    let subject_rows = subject_rows?;
    let group_rows = group_rows?;

    let entry_groups = access_entry_groups(cloud_api, &params.cluster).await;
    Ok(aggregate_by_principal(
        &subject_rows,
        &group_rows,
        &entry_groups,
    ))
}

/// Principal ARN to Kubernetes groups, from the access entry listing.
///
/// Supplementary data: failures degrade to an empty mapping.
async fn access_entry_groups(
    cloud: &dyn CloudIdentityApi,
    cluster: &str,
) -> BTreeMap<String, Vec<String>> {
    let principals = match drain_pages(|t| cloud.list_access_entries(cluster, t)).await {
        Ok(principals) => principals,
        Err(e) => {
            warn!(cluster = %cluster, error = %e, "access entry listing failed, reverse lookup proceeds without it");
            return BTreeMap::new();
        }
    };

    let mut mapping = BTreeMap::new();
    for principal_arn in principals {
        match cloud.describe_access_entry(cluster, &principal_arn).await {
            Ok(Some(detail)) => {
                mapping.insert(detail.principal_arn, detail.kubernetes_groups);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(principal = %principal_arn, error = %e, "describe access entry failed, skipping");
            }
        }
    }
    mapping
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_key: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_explicit_params_win_and_are_trimmed() {
        // The environment is populated but must not be consulted.
        let env = |key: &str| Some(format!("env-{key}"));
        let params = resolve_params_with(Some("  prod-eks  "), Some(" us-east-1 "), env).unwrap();
        assert_eq!(
            params,
            AuditParams {
                cluster: "prod-eks".to_string(),
                region: "us-east-1".to_string(),
            }
        );
    }

    #[test]
    fn test_env_fallbacks_fill_missing_params() {
        let env = |key: &str| match key {
            "EKS_CLUSTER_NAME" => Some("prod-eks".to_string()),
            "AWS_DEFAULT_REGION" => Some("eu-west-1".to_string()),
            _ => None,
        };
        let params = resolve_params_with(None, None, env).unwrap();
        assert_eq!(params.cluster, "prod-eks");
        assert_eq!(params.region, "eu-west-1");

        // AWS_REGION takes precedence over AWS_DEFAULT_REGION.
        let env = |key: &str| match key {
            "EKS_CLUSTER_NAME" => Some("prod-eks".to_string()),
            "AWS_REGION" => Some("us-east-1".to_string()),
            "AWS_DEFAULT_REGION" => Some("eu-west-1".to_string()),
            _ => None,
        };
        let params = resolve_params_with(None, None, env).unwrap();
        assert_eq!(params.region, "us-east-1");
    }

    #[test]
    fn test_blank_cluster_is_a_config_error() {
        let err = resolve_params_with(Some("   "), Some("us-east-1"), no_env).unwrap_err();
        match err {
            Error::Config(msg) => assert!(msg.contains("EKS_CLUSTER_NAME")),
            other => panic!("expected Config error, got {other}"),
        }
    }

    #[test]
    fn test_missing_region_is_a_config_error() {
        let err = resolve_params_with(Some("prod-eks"), None, no_env).unwrap_err();
        match err {
            Error::Config(msg) => assert!(msg.contains("AWS_DEFAULT_REGION")),
            other => panic!("expected Config error, got {other}"),
        }
    }

    #[test]
    fn test_blank_env_values_are_ignored() {
        let env = |_key: &str| Some("   ".to_string());
        let err = resolve_params_with(None, None, env).unwrap_err();
        match err {
            Error::Config(msg) => assert!(msg.contains("cluster")),
            other => panic!("expected Config error, got {other}"),
        }
    }
}
