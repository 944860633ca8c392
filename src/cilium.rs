//! Cilium network policy inventory
//!
//! CNP and CCNP are CRD-backed, so they are listed dynamically and parsed
//! structurally: endpoint selector labels become a display string and the
//! presence of ingress/egress sections classifies the traffic direction.
//! A missing CRD is not an error; that listing is simply empty.

use serde::{Deserialize, Serialize};
use tracing::warn;

use kube::api::DynamicObject;

use crate::providers::ClusterRbacApi;
use crate::yaml::to_yaml;

/// One Cilium policy, flattened for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiliumPolicyRow {
    pub name: String,
    pub namespace: String,
    pub kind: String,
    pub is_cluster_wide: bool,
    pub target_selector: String,
    #[serde(rename = "type")]
    pub traffic: String,
    pub yaml: String,
}

/// List and classify all Cilium policies, sorted by name.
pub async fn collect_cilium_policies(api: &dyn ClusterRbacApi) -> Vec<CiliumPolicyRow> {
    let mut policies = Vec::new();

    match api.list_cilium_policies(false).await {
        Ok(items) => {
            for item in items {
                policies.push(parse_policy(&item, false));
            }
        }
        Err(e) => warn!(error = %e, "list CiliumNetworkPolicies failed, skipping"),
    }

    match api.list_cilium_policies(true).await {
        Ok(items) => {
            for item in items {
                policies.push(parse_policy(&item, true));
            }
        }
        Err(e) => warn!(error = %e, "list CiliumClusterwideNetworkPolicies failed, skipping"),
    }

    policies.sort_by(|a, b| a.name.cmp(&b.name));
    policies
}

fn parse_policy(obj: &DynamicObject, cluster_wide: bool) -> CiliumPolicyRow {
    let kind = if cluster_wide {
        "CiliumClusterwideNetworkPolicy"
    } else {
        "CiliumNetworkPolicy"
    };

    let spec = obj.data.get("spec");
    let target_selector = spec
        .and_then(|s| s.get("endpointSelector"))
        .and_then(|s| s.get("matchLabels"))
        .and_then(|l| l.as_object())
        .filter(|labels| !labels.is_empty())
        .map(selector_text)
        .unwrap_or_else(|| "All Endpoints".to_string());

    let has_ingress = spec.map(|s| s.get("ingress").is_some()).unwrap_or(false);
    let has_egress = spec.map(|s| s.get("egress").is_some()).unwrap_or(false);
    let traffic = match (has_ingress, has_egress) {
        (true, true) => "Ingress + Egress",
        (true, false) => "Ingress Only",
        (false, true) => "Egress Only",
        (false, false) => "L3/L4",
    };

    CiliumPolicyRow {
        name: obj.metadata.name.clone().unwrap_or_default(),
        namespace: obj.metadata.namespace.clone().unwrap_or_default(),
        kind: kind.to_string(),
        is_cluster_wide: cluster_wide,
        target_selector,
        traffic: traffic.to_string(),
        yaml: to_yaml(obj),
    }
}

fn selector_text(labels: &serde_json::Map<String, serde_json::Value>) -> String {
    labels
        .iter()
        .map(|(key, value)| match value.as_str() {
            Some(s) => format!("{key}={s}"),
            None => format!("{key}={value}"),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::{cilium_policy, MockCluster};

    #[tokio::test]
    async fn test_fixture_policies_classify_and_sort() {
        let cluster = MockCluster::with_fixtures();
        let policies = collect_cilium_policies(&cluster).await;

        assert_eq!(policies.len(), 2);
        // Sorted by name across both kinds.
        assert_eq!(policies[0].name, "allow-payments-to-db");
        assert_eq!(policies[1].name, "deny-all-except-dns");

        let payments = &policies[0];
        assert_eq!(payments.kind, "CiliumNetworkPolicy");
        assert_eq!(payments.namespace, "payments");
        assert!(!payments.is_cluster_wide);
        assert_eq!(payments.target_selector, "app=payments-api");
        assert_eq!(payments.traffic, "Egress Only");
        assert!(payments.yaml.contains("allow-payments-to-db"));

        let deny_all = &policies[1];
        assert!(deny_all.is_cluster_wide);
        assert_eq!(deny_all.target_selector, "All Endpoints");
        assert_eq!(deny_all.traffic, "Ingress + Egress");
    }

    #[test]
    fn test_policy_without_spec_defaults() {
        let obj = DynamicObject {
            types: None,
            metadata: kube::api::ObjectMeta {
                name: Some("bare".to_string()),
                ..Default::default()
            },
            data: serde_json::json!({}),
        };
        let row = parse_policy(&obj, false);
        assert_eq!(row.target_selector, "All Endpoints");
        assert_eq!(row.traffic, "L3/L4");
    }

    #[test]
    fn test_selector_text_is_sorted_and_unquoted() {
        let obj = cilium_policy(
            "multi",
            Some("ns"),
            false,
            serde_json::json!({
                "endpointSelector": { "matchLabels": { "b": "2", "a": "1" } },
                "ingress": []
            }),
        );
        let row = parse_policy(&obj, false);
        // serde_json objects iterate in key order, so the text is stable.
        assert_eq!(row.target_selector, "a=1 b=2");
        assert_eq!(row.traffic, "Ingress Only");
    }
}
