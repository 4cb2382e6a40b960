//! Read-only listing of controllers carrying a given business category
//!
//! Filtering happens on the API server through a label selector, so a
//! cluster-wide listing needs list access to controllers only, not to
//! namespaces.

use crate::cluster::{WorkloadIdentity, WorkloadKind};
use crate::enumerate::ResourceEnumerator;
use crate::error::{ReconcileError, Result};
use crate::labels::LabelSet;
use labeler_config::is_valid_label_value;
use serde::Serialize;
use std::fmt::Write as _;

/// Controllers labelled with one category, grouped by kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessListing {
    pub deployments: Vec<WorkloadIdentity>,
    pub stateful_sets: Vec<WorkloadIdentity>,
}

impl BusinessListing {
    /// `=== Deployments ===` and `=== StatefulSets ===` sections of
    /// `namespace/name` lines
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::from("=== Deployments ===\n");
        for identity in &self.deployments {
            let _ = writeln!(out, "{}/{}", identity.namespace, identity.name);
        }
        out.push_str("=== StatefulSets ===\n");
        for identity in &self.stateful_sets {
            let _ = writeln!(out, "{}/{}", identity.namespace, identity.name);
        }
        out
    }
}

/// Controllers whose `label_key` label equals `business`. `None` or an
/// empty namespace lists across every namespace.
///
/// # Errors
///
/// Returns [`ReconcileError::InvalidCategory`] for an empty or malformed
/// `business`, and [`ReconcileError::Listing`] when a listing call fails.
pub async fn list_by_business(
    enumerator: &ResourceEnumerator,
    label_key: &str,
    business: &str,
    namespace: Option<&str>,
) -> Result<BusinessListing> {
    if business.is_empty() || !is_valid_label_value(business) {
        return Err(ReconcileError::InvalidCategory(business.to_string()));
    }

    let namespace = namespace.filter(|ns| !ns.is_empty());
    let selector: LabelSet = [(label_key.to_string(), business.to_string())].into();

    let mut listing = BusinessListing::default();
    for kind in WorkloadKind::ALL {
        let matching = enumerator
            .list_labelled_controllers(namespace, kind, &selector)
            .await
            .map_err(ReconcileError::Listing)?
            .into_iter()
            .map(|controller| controller.identity);

        match kind {
            WorkloadKind::Deployment => listing.deployments.extend(matching),
            WorkloadKind::StatefulSet => listing.stateful_sets.extend(matching),
        }
    }

    Ok(listing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::FakeCluster;
    use crate::error::ApiError;
    use crate::labels::label_set;
    use crate::retry::fast_policy;
    use std::sync::Arc;

    fn cluster() -> Arc<FakeCluster> {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_workload("prod", "svc-a", WorkloadKind::Deployment, label_set(&[("business", "chief")]));
        cluster.add_workload("prod", "svc-b", WorkloadKind::Deployment, label_set(&[("business", "quote")]));
        cluster.add_workload("prod", "db", WorkloadKind::StatefulSet, label_set(&[("business", "chief")]));
        cluster.add_workload("staging", "svc-a", WorkloadKind::Deployment, label_set(&[("business", "chief")]));
        cluster.add_workload("staging", "cache", WorkloadKind::StatefulSet, LabelSet::new());
        cluster
    }

    #[tokio::test]
    async fn lists_matching_controllers_in_every_namespace() {
        let enumerator = ResourceEnumerator::new(cluster(), fast_policy(), "business");
        let listing = list_by_business(&enumerator, "business", "chief", None)
            .await
            .unwrap();

        assert_eq!(
            listing.render(),
            "=== Deployments ===\nprod/svc-a\nstaging/svc-a\n=== StatefulSets ===\nprod/db\n"
        );
    }

    #[tokio::test]
    async fn scopes_to_one_namespace() {
        let enumerator = ResourceEnumerator::new(cluster(), fast_policy(), "business");
        let listing = list_by_business(&enumerator, "business", "chief", Some("staging"))
            .await
            .unwrap();

        assert_eq!(
            listing.deployments,
            vec![WorkloadIdentity::new("staging", "svc-a", WorkloadKind::Deployment)]
        );
        assert!(listing.stateful_sets.is_empty());
    }

    #[tokio::test]
    async fn empty_listing_still_prints_headers() {
        let enumerator = ResourceEnumerator::new(cluster(), fast_policy(), "business");
        let listing = list_by_business(&enumerator, "business", "payments", Some(""))
            .await
            .unwrap();

        assert_eq!(listing.render(), "=== Deployments ===\n=== StatefulSets ===\n");
    }

    #[tokio::test]
    async fn does_not_need_namespace_listing() {
        let cluster = cluster();
        cluster.fail_namespace_list(ApiError::Rejected {
            status: 403,
            message: "namespaces is forbidden".to_string(),
        });
        let enumerator = ResourceEnumerator::new(cluster, fast_policy(), "business");

        let listing = list_by_business(&enumerator, "business", "chief", None)
            .await
            .unwrap();
        assert_eq!(listing.deployments.len(), 2);
        assert_eq!(listing.stateful_sets.len(), 1);
    }

    #[tokio::test]
    async fn rejects_empty_or_malformed_category() {
        let enumerator = ResourceEnumerator::new(cluster(), fast_policy(), "business");

        for business in ["", "not a label"] {
            let err = list_by_business(&enumerator, "business", business, None)
                .await
                .unwrap_err();
            assert!(matches!(err, ReconcileError::InvalidCategory(ref value) if value == business));
        }
    }

    #[tokio::test]
    async fn listing_failure_is_reported() {
        let cluster = cluster();
        cluster.fail_controller_list(
            "prod",
            ApiError::Rejected {
                status: 403,
                message: "forbidden".to_string(),
            },
        );
        let enumerator = ResourceEnumerator::new(cluster, fast_policy(), "business");

        let err = list_by_business(&enumerator, "business", "chief", Some("prod"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Listing(ApiError::Rejected { status: 403, .. })));
    }
}
