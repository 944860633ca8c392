//! kube-guard - EKS IAM to Kubernetes RBAC audit service
//!
//! Correlates the three IAM attachment mechanisms (access entries, pod
//! identity associations, IRSA annotations) against the cluster's RBAC
//! graph and reports, per IAM principal, the permissions it holds and the
//! binding chain that grants them.

pub mod audit;
pub mod cache;
pub mod cilium;
pub mod error;
pub mod providers;
pub mod server;
pub mod yaml;

pub use error::{Error, Result};

/// ServiceAccount annotation carrying the IRSA role ARN.
pub const IRSA_ROLE_ANNOTATION: &str = "eks.amazonaws.com/role-arn";

/// Page limit for cluster listings.
pub const LIST_PAGE_LIMIT: u32 = 500;
