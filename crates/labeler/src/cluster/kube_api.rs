//! # Kubernetes Cluster API
//!
//! [`ClusterApi`] implementation over kube-rs. Label writes are JSON merge
//! patches of `metadata.labels`; when a resource version is supplied it is
//! sent in the same patch so the API server rejects stale writes with 409.

use super::{ClusterApi, ResourceId, ResourceKind, ResourceSnapshot, WorkloadKind};
use crate::error::ApiError;
use crate::labels::{selector_string, LabelSet};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{Namespace, Pod, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::fmt::Debug;
use tracing::debug;

/// [`ClusterApi`] backed by a kube client
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Namespaced API, or cluster-wide when `namespace` is `None`
    fn scoped<K>(&self, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        match namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        }
    }

    fn snapshot<K>(namespace: &str, kind: ResourceKind, object: &K) -> ResourceSnapshot
    where
        K: Resource,
    {
        let namespace = object.namespace().unwrap_or_else(|| namespace.to_string());
        ResourceSnapshot {
            id: ResourceId::new(namespace, object.name_any(), kind),
            labels: object.labels().clone(),
            resource_version: object.resource_version(),
            selector: None,
        }
    }

    async fn list<K>(
        api: Api<K>,
        namespace: &str,
        kind: ResourceKind,
        params: &ListParams,
    ) -> Result<Vec<ResourceSnapshot>, ApiError>
    where
        K: Resource + Clone + DeserializeOwned + Debug,
    {
        let list = api
            .list(params)
            .await
            .map_err(|e| ApiError::from_kube(&format!("list {kind}"), namespace, e))?;

        Ok(list
            .items
            .iter()
            .map(|object| Self::snapshot(namespace, kind, object))
            .collect())
    }

    async fn get_object<K>(api: Api<K>, id: &ResourceId) -> Result<ResourceSnapshot, ApiError>
    where
        K: Resource + Clone + DeserializeOwned + Debug,
    {
        let object = api
            .get(&id.name)
            .await
            .map_err(|e| ApiError::from_kube("get", &id.to_string(), e))?;
        Ok(Self::snapshot(&id.namespace, id.kind, &object))
    }

    async fn patch_labels<K>(
        api: Api<K>,
        id: &ResourceId,
        labels: &LabelSet,
        resource_version: Option<&str>,
    ) -> Result<(), ApiError>
    where
        K: Resource + Clone + DeserializeOwned + Debug,
    {
        let mut metadata = json!({ "labels": labels });
        if let Some(resource_version) = resource_version {
            metadata["resourceVersion"] = json!(resource_version);
        }
        let patch = json!({ "metadata": metadata });

        api.patch(&id.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| ApiError::from_kube("update labels", &id.to_string(), e))?;

        debug!(resource = %id, "Patched labels");
        Ok(())
    }

    fn service_snapshot(namespace: &str, service: &Service) -> ResourceSnapshot {
        let selector = service
            .spec
            .as_ref()
            .and_then(|spec| spec.selector.clone())
            .unwrap_or_default();
        Self::snapshot(namespace, ResourceKind::Service, service).with_selector(selector)
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn list_namespaces(&self) -> Result<Vec<String>, ApiError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| ApiError::from_kube("list namespaces", "cluster", e))?;
        Ok(list.items.iter().map(ResourceExt::name_any).collect())
    }

    async fn list_controllers(
        &self,
        namespace: &str,
        kind: WorkloadKind,
    ) -> Result<Vec<ResourceSnapshot>, ApiError> {
        let params = ListParams::default();
        let resource_kind = ResourceKind::Workload(kind);
        match kind {
            WorkloadKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
                Self::list(api, namespace, resource_kind, &params).await
            }
            WorkloadKind::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
                Self::list(api, namespace, resource_kind, &params).await
            }
        }
    }

    async fn list_labelled_controllers(
        &self,
        namespace: Option<&str>,
        kind: WorkloadKind,
        selector: &LabelSet,
    ) -> Result<Vec<ResourceSnapshot>, ApiError> {
        let params = ListParams::default().labels(&selector_string(selector));
        let scope = namespace.unwrap_or("all namespaces");
        let resource_kind = ResourceKind::Workload(kind);
        match kind {
            WorkloadKind::Deployment => {
                let api: Api<Deployment> = self.scoped(namespace);
                Self::list(api, scope, resource_kind, &params).await
            }
            WorkloadKind::StatefulSet => {
                let api: Api<StatefulSet> = self.scoped(namespace);
                Self::list(api, scope, resource_kind, &params).await
            }
        }
    }

    async fn get(&self, id: &ResourceId) -> Result<ResourceSnapshot, ApiError> {
        let client = self.client.clone();
        match id.kind {
            ResourceKind::Workload(WorkloadKind::Deployment) => {
                Self::get_object(Api::<Deployment>::namespaced(client, &id.namespace), id).await
            }
            ResourceKind::Workload(WorkloadKind::StatefulSet) => {
                Self::get_object(Api::<StatefulSet>::namespaced(client, &id.namespace), id).await
            }
            ResourceKind::Pod => {
                Self::get_object(Api::<Pod>::namespaced(client, &id.namespace), id).await
            }
            ResourceKind::Service => {
                let api: Api<Service> = Api::namespaced(client, &id.namespace);
                let service = api
                    .get(&id.name)
                    .await
                    .map_err(|e| ApiError::from_kube("get", &id.to_string(), e))?;
                Ok(Self::service_snapshot(&id.namespace, &service))
            }
        }
    }

    async fn update_labels(
        &self,
        id: &ResourceId,
        labels: &LabelSet,
        resource_version: Option<&str>,
    ) -> Result<(), ApiError> {
        let client = self.client.clone();
        let ns = id.namespace.as_str();
        match id.kind {
            ResourceKind::Workload(WorkloadKind::Deployment) => {
                let api: Api<Deployment> = Api::namespaced(client, ns);
                Self::patch_labels(api, id, labels, resource_version).await
            }
            ResourceKind::Workload(WorkloadKind::StatefulSet) => {
                let api: Api<StatefulSet> = Api::namespaced(client, ns);
                Self::patch_labels(api, id, labels, resource_version).await
            }
            ResourceKind::Pod => {
                let api: Api<Pod> = Api::namespaced(client, ns);
                Self::patch_labels(api, id, labels, resource_version).await
            }
            ResourceKind::Service => {
                let api: Api<Service> = Api::namespaced(client, ns);
                Self::patch_labels(api, id, labels, resource_version).await
            }
        }
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &LabelSet,
    ) -> Result<Vec<ResourceSnapshot>, ApiError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&selector_string(selector));
        Self::list(api, namespace, ResourceKind::Pod, &params).await
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<ResourceSnapshot>, ApiError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| ApiError::from_kube("list Service", namespace, e))?;
        Ok(list
            .items
            .iter()
            .map(|service| Self::service_snapshot(namespace, service))
            .collect())
    }
}
