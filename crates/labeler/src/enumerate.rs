//! # Resource Enumeration
//!
//! Reads namespaces, controllers and the dependents of a controller. The
//! dependent walk has two hops, each a separate stage:
//!
//! 1. [`pod_selector`]: the controller's labels minus the classification key
//! 2. [`ResourceEnumerator::list_pods_for`]: pods matching that selector
//! 3. [`project_pod_labels`]: each pod's labels as they will be after the write
//! 4. [`ResourceEnumerator::list_services_for`]: services whose selector
//!    matches a projected pod ([`select_services`])

use crate::cluster::{ClusterApi, ResourceSnapshot, WorkloadIdentity, WorkloadKind};
use crate::error::ApiError;
use crate::labels::{selector_matches, selector_string, with_label, without_label, LabelSet};
use crate::retry::RetryPolicy;
use std::sync::Arc;
use tracing::{debug, warn};

/// A controller resource as listed from the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Controller {
    pub identity: WorkloadIdentity,
    pub snapshot: ResourceSnapshot,
}

impl Controller {
    #[must_use]
    pub fn labels(&self) -> &LabelSet {
        &self.snapshot.labels
    }
}

/// Pods and services reachable from one controller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependents {
    pub pods: Vec<ResourceSnapshot>,
    pub services: Vec<ResourceSnapshot>,
}

/// Selector for a controller's pods: its labels without the classification
/// key. `None` when nothing is left, since an empty selector would match
/// every pod in the namespace.
#[must_use]
pub fn pod_selector(controller_labels: &LabelSet, label_key: &str) -> Option<LabelSet> {
    let selector = without_label(controller_labels, label_key);
    (!selector.is_empty()).then_some(selector)
}

/// Pod label sets with the classification key set to `target`
#[must_use]
pub fn project_pod_labels(pods: &[ResourceSnapshot], label_key: &str, target: &str) -> Vec<LabelSet> {
    pods.iter()
        .map(|pod| with_label(&pod.labels, label_key, target))
        .collect()
}

/// Services whose selector matches at least one projected pod label set.
/// Services without a selector, or with an empty one, select nothing.
#[must_use]
pub fn select_services(
    services: Vec<ResourceSnapshot>,
    pod_labels: &[LabelSet],
) -> Vec<ResourceSnapshot> {
    services
        .into_iter()
        .filter(|service| match &service.selector {
            Some(selector) if !selector.is_empty() => pod_labels
                .iter()
                .any(|labels| selector_matches(selector, labels)),
            _ => false,
        })
        .collect()
}

fn into_controllers(snapshots: Vec<ResourceSnapshot>) -> Vec<Controller> {
    snapshots
        .into_iter()
        .filter_map(|snapshot| {
            snapshot
                .id
                .workload()
                .map(|identity| Controller { identity, snapshot })
        })
        .collect()
}

/// Read side of the engine
#[derive(Clone)]
pub struct ResourceEnumerator {
    api: Arc<dyn ClusterApi>,
    policy: RetryPolicy,
    label_key: String,
}

impl ResourceEnumerator {
    #[must_use]
    pub fn new(api: Arc<dyn ClusterApi>, policy: RetryPolicy, label_key: impl Into<String>) -> Self {
        Self {
            api,
            policy,
            label_key: label_key.into(),
        }
    }

    pub async fn list_namespaces(&self) -> Result<Vec<String>, ApiError> {
        let api = self.api.as_ref();
        self.policy
            .run("list namespaces", move || api.list_namespaces())
            .await
    }

    /// Controllers of one kind in `namespace`
    pub async fn list_controllers_of_kind(
        &self,
        namespace: &str,
        kind: WorkloadKind,
    ) -> Result<Vec<Controller>, ApiError> {
        let api = self.api.as_ref();
        let snapshots = self
            .policy
            .run(&format!("list {kind}"), move || {
                api.list_controllers(namespace, kind)
            })
            .await?;

        Ok(into_controllers(snapshots))
    }

    /// Controllers of every supported kind in `namespace`
    pub async fn list_controllers(&self, namespace: &str) -> Result<Vec<Controller>, ApiError> {
        let mut controllers = Vec::new();
        for kind in WorkloadKind::ALL {
            controllers.extend(self.list_controllers_of_kind(namespace, kind).await?);
        }
        debug!(namespace, count = controllers.len(), "Listed controllers");
        Ok(controllers)
    }

    /// Controllers of one kind carrying every label in `selector`, filtered
    /// server-side. `None` lists across all namespaces without enumerating
    /// them first.
    pub async fn list_labelled_controllers(
        &self,
        namespace: Option<&str>,
        kind: WorkloadKind,
        selector: &LabelSet,
    ) -> Result<Vec<Controller>, ApiError> {
        let api = self.api.as_ref();
        let snapshots = self
            .policy
            .run(&format!("list {kind}"), move || {
                api.list_labelled_controllers(namespace, kind, selector)
            })
            .await?;

        Ok(into_controllers(snapshots))
    }

    /// Pods selected by the controller's labels. Empty when the controller
    /// carries nothing besides the classification key.
    pub async fn list_pods_for(
        &self,
        namespace: &str,
        controller_labels: &LabelSet,
    ) -> Result<Vec<ResourceSnapshot>, ApiError> {
        let Some(selector) = pod_selector(controller_labels, &self.label_key) else {
            warn!(
                namespace,
                "Controller has no labels besides '{}', skipping dependents", self.label_key
            );
            return Ok(Vec::new());
        };

        let api = self.api.as_ref();
        let selector_ref = &selector;
        let pods = self
            .policy
            .run("list pods", move || api.list_pods(namespace, selector_ref))
            .await?;

        debug!(
            namespace,
            selector = %selector_string(&selector),
            pods = pods.len(),
            "Listed pods"
        );
        Ok(pods)
    }

    /// Services routing to at least one of `pods` once they carry `target`
    pub async fn list_services_for(
        &self,
        namespace: &str,
        pods: &[ResourceSnapshot],
        target: &str,
    ) -> Result<Vec<ResourceSnapshot>, ApiError> {
        if pods.is_empty() {
            return Ok(Vec::new());
        }

        let projected = project_pod_labels(pods, &self.label_key, target);
        let api = self.api.as_ref();
        let all_services = self
            .policy
            .run("list services", move || api.list_services(namespace))
            .await?;
        let services = select_services(all_services, &projected);

        debug!(namespace, services = services.len(), "Listed services");
        Ok(services)
    }

    /// Both dependent hops at once. Propagation calls the hops separately and
    /// writes the pods in between.
    pub async fn list_dependents(
        &self,
        namespace: &str,
        controller_labels: &LabelSet,
        target: &str,
    ) -> Result<Dependents, ApiError> {
        let pods = self.list_pods_for(namespace, controller_labels).await?;
        let services = self.list_services_for(namespace, &pods, target).await?;
        Ok(Dependents { pods, services })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{FakeCluster, ResourceId};
    use crate::labels::label_set;
    use crate::retry::fast_policy;

    fn service(name: &str, selector: Option<LabelSet>) -> ResourceSnapshot {
        let snapshot = ResourceSnapshot::new(ResourceId::service("prod", name), LabelSet::new());
        match selector {
            Some(selector) => snapshot.with_selector(selector),
            None => snapshot,
        }
    }

    #[test]
    fn pod_selector_drops_classification_key() {
        let labels = label_set(&[("app", "web"), ("business", "other")]);
        assert_eq!(
            pod_selector(&labels, "business"),
            Some(label_set(&[("app", "web")]))
        );
        assert_eq!(
            pod_selector(&label_set(&[("business", "other")]), "business"),
            None
        );
    }

    #[test]
    fn projection_sets_target() {
        let pods = vec![ResourceSnapshot::new(
            ResourceId::pod("prod", "web-0"),
            label_set(&[("app", "web"), ("business", "other")]),
        )];
        assert_eq!(
            project_pod_labels(&pods, "business", "chief"),
            vec![label_set(&[("app", "web"), ("business", "chief")])]
        );
    }

    #[test]
    fn services_match_projected_pod_labels() {
        let projected = vec![label_set(&[("app", "web"), ("business", "chief")])];
        let services = vec![
            service("web", Some(label_set(&[("app", "web")]))),
            service("web-chief", Some(label_set(&[("app", "web"), ("business", "chief")]))),
            service("web-old", Some(label_set(&[("app", "web"), ("business", "other")]))),
            service("db", Some(label_set(&[("app", "db")]))),
            service("headless", None),
            service("empty", Some(LabelSet::new())),
        ];

        let names: Vec<String> = select_services(services, &projected)
            .into_iter()
            .map(|s| s.id.name)
            .collect();
        assert_eq!(names, vec!["web".to_string(), "web-chief".to_string()]);
    }

    #[tokio::test]
    async fn lists_dependents_two_hops() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_pod("prod", "web-0", label_set(&[("app", "web"), ("business", "other")]));
        cluster.add_pod("prod", "web-1", label_set(&[("app", "web")]));
        cluster.add_pod("prod", "db-0", label_set(&[("app", "db")]));
        cluster.add_service("prod", "web", LabelSet::new(), label_set(&[("app", "web")]));
        cluster.add_service("prod", "db", LabelSet::new(), label_set(&[("app", "db")]));

        let enumerator = ResourceEnumerator::new(cluster, fast_policy(), "business");
        let dependents = enumerator
            .list_dependents(
                "prod",
                &label_set(&[("app", "web"), ("business", "other")]),
                "chief",
            )
            .await
            .unwrap();

        let pods: Vec<&str> = dependents.pods.iter().map(|p| p.id.name.as_str()).collect();
        let services: Vec<&str> = dependents.services.iter().map(|s| s.id.name.as_str()).collect();
        assert_eq!(pods, vec!["web-0", "web-1"]);
        assert_eq!(services, vec!["web"]);
    }

    #[tokio::test]
    async fn empty_selector_yields_no_dependents() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_pod("prod", "web-0", label_set(&[("app", "web")]));

        let enumerator = ResourceEnumerator::new(cluster, fast_policy(), "business");
        let dependents = enumerator
            .list_dependents("prod", &label_set(&[("business", "other")]), "chief")
            .await
            .unwrap();
        assert_eq!(dependents, Dependents::default());
    }

    #[tokio::test]
    async fn lists_every_controller_kind() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_workload("prod", "svc-a", WorkloadKind::Deployment, label_set(&[("app", "a")]));
        cluster.add_workload("prod", "svc-b", WorkloadKind::StatefulSet, label_set(&[("app", "b")]));
        cluster.add_pod("prod", "svc-a-0", label_set(&[("app", "a")]));

        let enumerator = ResourceEnumerator::new(cluster, fast_policy(), "business");
        let controllers = enumerator.list_controllers("prod").await.unwrap();
        let identities: Vec<WorkloadIdentity> =
            controllers.into_iter().map(|c| c.identity).collect();
        assert_eq!(
            identities,
            vec![
                WorkloadIdentity::new("prod", "svc-a", WorkloadKind::Deployment),
                WorkloadIdentity::new("prod", "svc-b", WorkloadKind::StatefulSet),
            ]
        );
    }
}
