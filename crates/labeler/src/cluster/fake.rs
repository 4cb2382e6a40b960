//! In-memory cluster with fault injection
//!
//! Tracks resource versions so optimistic-concurrency conflicts behave like
//! the API server, and records every successful label write. Label writes
//! can be held open with [`FakeCluster::pause_updates`] to observe how many
//! run at once.

use super::{ClusterApi, ResourceId, ResourceKind, ResourceSnapshot, WorkloadKind};
use crate::error::ApiError;
use crate::labels::{selector_matches, LabelSet};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct StoredResource {
    labels: LabelSet,
    selector: Option<LabelSet>,
    version: u64,
}

#[derive(Debug, Default)]
struct State {
    namespaces: BTreeSet<String>,
    resources: BTreeMap<ResourceId, StoredResource>,
    writes: Vec<(ResourceId, LabelSet)>,

    namespace_list_error: Option<ApiError>,
    controller_list_errors: HashMap<String, ApiError>,
    pod_list_errors: HashMap<String, ApiError>,
    service_list_errors: HashMap<String, ApiError>,
    update_errors: HashMap<ResourceId, ApiError>,
    transient_update_failures: HashMap<ResourceId, u32>,
    competing_writes: HashMap<ResourceId, LabelSet>,
    update_gate: Option<CancellationToken>,
}

/// In-memory [`ClusterApi`] implementation
#[derive(Debug, Default)]
pub struct FakeCluster {
    state: Mutex<State>,
    updates_in_flight: AtomicUsize,
    peak_updates_in_flight: AtomicUsize,
}

impl FakeCluster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_namespace(&self, namespace: &str) {
        self.state().namespaces.insert(namespace.to_string());
    }

    pub fn add_workload(&self, namespace: &str, name: &str, kind: WorkloadKind, labels: LabelSet) {
        self.insert(
            ResourceId::new(namespace, name, ResourceKind::Workload(kind)),
            labels,
            None,
        );
    }

    pub fn add_pod(&self, namespace: &str, name: &str, labels: LabelSet) {
        self.insert(ResourceId::pod(namespace, name), labels, None);
    }

    pub fn add_service(&self, namespace: &str, name: &str, labels: LabelSet, selector: LabelSet) {
        self.insert(ResourceId::service(namespace, name), labels, Some(selector));
    }

    fn insert(&self, id: ResourceId, labels: LabelSet, selector: Option<LabelSet>) {
        let mut state = self.state();
        state.namespaces.insert(id.namespace.clone());
        state.resources.insert(
            id,
            StoredResource {
                labels,
                selector,
                version: 1,
            },
        );
    }

    /// Fail every namespace listing
    pub fn fail_namespace_list(&self, error: ApiError) {
        self.state().namespace_list_error = Some(error);
    }

    /// Fail controller listing in one namespace
    pub fn fail_controller_list(&self, namespace: &str, error: ApiError) {
        self.state()
            .controller_list_errors
            .insert(namespace.to_string(), error);
    }

    pub fn fail_pod_list(&self, namespace: &str, error: ApiError) {
        self.state()
            .pod_list_errors
            .insert(namespace.to_string(), error);
    }

    pub fn fail_service_list(&self, namespace: &str, error: ApiError) {
        self.state()
            .service_list_errors
            .insert(namespace.to_string(), error);
    }

    /// Fail every label write to `id`
    pub fn fail_updates(&self, id: &ResourceId, error: ApiError) {
        self.state().update_errors.insert(id.clone(), error);
    }

    /// Fail the next `times` label writes to `id` with a transient error
    pub fn fail_updates_transiently(&self, id: &ResourceId, times: u32) {
        self.state()
            .transient_update_failures
            .insert(id.clone(), times);
    }

    /// Simulate another writer landing `labels` on `id` just before the next
    /// write, so that write fails with a conflict
    pub fn compete_on_next_update(&self, id: &ResourceId, labels: LabelSet) {
        self.state().competing_writes.insert(id.clone(), labels);
    }

    /// Hold every label write until the returned token is cancelled
    pub fn pause_updates(&self) -> CancellationToken {
        let gate = CancellationToken::new();
        self.state().update_gate = Some(gate.clone());
        gate
    }

    /// Yield until `count` label writes are held by the update gate
    pub async fn wait_for_updates_in_flight(&self, count: usize) {
        while self.updates_in_flight.load(Ordering::SeqCst) < count {
            tokio::task::yield_now().await;
        }
    }

    /// Most label writes ever in progress at the same time
    #[must_use]
    pub fn peak_updates_in_flight(&self) -> usize {
        self.peak_updates_in_flight.load(Ordering::SeqCst)
    }

    /// Current labels of a resource
    #[must_use]
    pub fn labels_of(&self, id: &ResourceId) -> Option<LabelSet> {
        self.state()
            .resources
            .get(id)
            .map(|resource| resource.labels.clone())
    }

    /// Every successful label write, in order
    #[must_use]
    pub fn writes(&self) -> Vec<(ResourceId, LabelSet)> {
        self.state().writes.clone()
    }

    #[must_use]
    pub fn write_count(&self) -> usize {
        self.state().writes.len()
    }

    fn snapshot(id: &ResourceId, resource: &StoredResource) -> ResourceSnapshot {
        let snapshot = ResourceSnapshot::new(id.clone(), resource.labels.clone())
            .with_resource_version(resource.version.to_string());
        match &resource.selector {
            Some(selector) => snapshot.with_selector(selector.clone()),
            None => snapshot,
        }
    }

    async fn hold_at_gate(&self) {
        let gate = self.state().update_gate.clone();
        let Some(gate) = gate else {
            return;
        };
        let now = self.updates_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_updates_in_flight.fetch_max(now, Ordering::SeqCst);
        gate.cancelled().await;
        self.updates_in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn list_kind(state: &State, namespace: &str, kind: ResourceKind) -> Vec<ResourceSnapshot> {
        state
            .resources
            .iter()
            .filter(|(id, _)| id.namespace == namespace && id.kind == kind)
            .map(|(id, resource)| Self::snapshot(id, resource))
            .collect()
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn list_namespaces(&self) -> Result<Vec<String>, ApiError> {
        let state = self.state();
        if let Some(error) = &state.namespace_list_error {
            return Err(error.clone());
        }
        Ok(state.namespaces.iter().cloned().collect())
    }

    async fn list_controllers(
        &self,
        namespace: &str,
        kind: WorkloadKind,
    ) -> Result<Vec<ResourceSnapshot>, ApiError> {
        let state = self.state();
        if let Some(error) = state.controller_list_errors.get(namespace) {
            return Err(error.clone());
        }
        Ok(Self::list_kind(
            &state,
            namespace,
            ResourceKind::Workload(kind),
        ))
    }

    async fn list_labelled_controllers(
        &self,
        namespace: Option<&str>,
        kind: WorkloadKind,
        selector: &LabelSet,
    ) -> Result<Vec<ResourceSnapshot>, ApiError> {
        let state = self.state();
        if let Some(error) = namespace.and_then(|ns| state.controller_list_errors.get(ns)) {
            return Err(error.clone());
        }
        Ok(state
            .resources
            .iter()
            .filter(|(id, _)| id.kind == ResourceKind::Workload(kind))
            .filter(|(id, _)| namespace.map_or(true, |ns| id.namespace == ns))
            .filter(|(_, resource)| selector_matches(selector, &resource.labels))
            .map(|(id, resource)| Self::snapshot(id, resource))
            .collect())
    }

    async fn get(&self, id: &ResourceId) -> Result<ResourceSnapshot, ApiError> {
        let state = self.state();
        state
            .resources
            .get(id)
            .map(|resource| Self::snapshot(id, resource))
            .ok_or_else(|| ApiError::NotFound {
                resource: id.to_string(),
            })
    }

    async fn update_labels(
        &self,
        id: &ResourceId,
        labels: &LabelSet,
        resource_version: Option<&str>,
    ) -> Result<(), ApiError> {
        self.hold_at_gate().await;
        let mut state = self.state();

        if let Some(error) = state.update_errors.get(id) {
            return Err(error.clone());
        }

        if let Some(remaining) = state.transient_update_failures.get_mut(id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ApiError::Transient {
                    operation: format!("update {id}"),
                    message: "injected failure".to_string(),
                });
            }
        }

        if let Some(competing) = state.competing_writes.remove(id) {
            if let Some(resource) = state.resources.get_mut(id) {
                resource.labels = competing;
                resource.version += 1;
            }
        }

        let resource = state.resources.get_mut(id).ok_or_else(|| ApiError::NotFound {
            resource: id.to_string(),
        })?;

        if let Some(expected) = resource_version {
            if expected != resource.version.to_string() {
                return Err(ApiError::Conflict {
                    resource: id.to_string(),
                });
            }
        }

        resource.labels = labels.clone();
        resource.version += 1;
        state.writes.push((id.clone(), labels.clone()));
        Ok(())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &LabelSet,
    ) -> Result<Vec<ResourceSnapshot>, ApiError> {
        let state = self.state();
        if let Some(error) = state.pod_list_errors.get(namespace) {
            return Err(error.clone());
        }
        Ok(Self::list_kind(&state, namespace, ResourceKind::Pod)
            .into_iter()
            .filter(|pod| selector_matches(selector, &pod.labels))
            .collect())
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<ResourceSnapshot>, ApiError> {
        let state = self.state();
        if let Some(error) = state.service_list_errors.get(namespace) {
            return Err(error.clone());
        }
        Ok(Self::list_kind(&state, namespace, ResourceKind::Service))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::label_set;

    #[tokio::test]
    async fn stale_resource_version_conflicts() {
        let cluster = FakeCluster::new();
        cluster.add_pod("prod", "web-0", label_set(&[("app", "web")]));
        let id = ResourceId::pod("prod", "web-0");

        let snapshot = cluster.get(&id).await.unwrap();
        let rv = snapshot.resource_version.clone().unwrap();

        cluster
            .update_labels(&id, &label_set(&[("app", "web"), ("x", "1")]), Some(&rv))
            .await
            .unwrap();

        let err = cluster
            .update_labels(&id, &label_set(&[("app", "web"), ("x", "2")]), Some(&rv))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(cluster.write_count(), 1);
    }

    #[tokio::test]
    async fn competing_write_lands_before_conflict() {
        let cluster = FakeCluster::new();
        cluster.add_pod("prod", "web-0", label_set(&[("app", "web")]));
        let id = ResourceId::pod("prod", "web-0");
        cluster.compete_on_next_update(&id, label_set(&[("app", "web"), ("x", "theirs")]));

        let err = cluster
            .update_labels(&id, &label_set(&[("x", "ours")]), Some("1"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(
            cluster.labels_of(&id),
            Some(label_set(&[("app", "web"), ("x", "theirs")]))
        );
    }

    #[tokio::test]
    async fn labelled_controllers_span_namespaces() {
        let cluster = FakeCluster::new();
        let chief = label_set(&[("business", "chief")]);
        cluster.add_workload("prod", "svc-a", WorkloadKind::Deployment, chief.clone());
        cluster.add_workload("dev", "svc-a", WorkloadKind::Deployment, chief.clone());
        cluster.add_workload("dev", "db", WorkloadKind::StatefulSet, chief.clone());
        cluster.add_workload("dev", "web", WorkloadKind::Deployment, label_set(&[("business", "other")]));

        let everywhere = cluster
            .list_labelled_controllers(None, WorkloadKind::Deployment, &chief)
            .await
            .unwrap();
        assert_eq!(everywhere.len(), 2);

        let dev = cluster
            .list_labelled_controllers(Some("dev"), WorkloadKind::Deployment, &chief)
            .await
            .unwrap();
        assert_eq!(dev.len(), 1);
        assert_eq!(dev[0].id.name, "svc-a");
    }

    #[tokio::test]
    async fn paused_updates_wait_for_release() {
        let cluster = FakeCluster::new();
        cluster.add_pod("prod", "web-0", label_set(&[("app", "web")]));
        let id = ResourceId::pod("prod", "web-0");
        let gate = cluster.pause_updates();

        let labels = label_set(&[("app", "web"), ("x", "1")]);
        let ((), result) = tokio::join!(
            async {
                cluster.wait_for_updates_in_flight(1).await;
                assert_eq!(cluster.write_count(), 0);
                gate.cancel();
            },
            cluster.update_labels(&id, &labels, None)
        );

        result.unwrap();
        assert_eq!(cluster.write_count(), 1);
        assert_eq!(cluster.peak_updates_in_flight(), 1);
    }

    #[tokio::test]
    async fn pods_filtered_by_selector() {
        let cluster = FakeCluster::new();
        cluster.add_pod("prod", "web-0", label_set(&[("app", "web")]));
        cluster.add_pod("prod", "db-0", label_set(&[("app", "db")]));
        cluster.add_pod("dev", "web-0", label_set(&[("app", "web")]));

        let pods = cluster
            .list_pods("prod", &label_set(&[("app", "web")]))
            .await
            .unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].id, ResourceId::pod("prod", "web-0"));
    }
}
