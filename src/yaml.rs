//! YAML rendition of Kubernetes objects for report rows

use serde::Serialize;

/// Serialize an API object to YAML for embedding in a report row.
///
/// A row with an empty manifest is more useful than a failed audit, so
/// serialization failures collapse to an empty string.
pub fn to_yaml<T: Serialize>(value: &T) -> String {
    serde_yaml::to_string(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::rbac::v1::{PolicyRule, Role};
    use kube::api::ObjectMeta;

    #[test]
    fn test_role_renders_name_and_rules() {
        let role = Role {
            metadata: ObjectMeta {
                name: Some("payments-api-reader".to_string()),
                namespace: Some("payments".to_string()),
                ..Default::default()
            },
            rules: Some(vec![PolicyRule {
                api_groups: Some(vec![String::new()]),
                resources: Some(vec!["pods".to_string()]),
                verbs: vec!["get".to_string(), "list".to_string()],
                ..Default::default()
            }]),
        };
        let yaml = to_yaml(&role);
        assert!(yaml.contains("payments-api-reader"));
        assert!(yaml.contains("pods"));
        assert!(yaml.contains("- get"));
    }
}
