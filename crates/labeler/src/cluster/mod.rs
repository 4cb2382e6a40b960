//! # Cluster API Seam
//!
//! The reconciliation engine only talks to the cluster through [`ClusterApi`].
//! [`KubeClusterApi`] backs it with kube-rs; [`FakeCluster`] is an in-memory
//! store with fault injection used by the tests.

pub mod fake;
pub mod kube_api;

pub use self::fake::FakeCluster;
pub use self::kube_api::KubeClusterApi;

use crate::error::ApiError;
use crate::labels::LabelSet;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported controller resource kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
}

impl WorkloadKind {
    pub const ALL: [WorkloadKind; 2] = [WorkloadKind::Deployment, WorkloadKind::StatefulSet];
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadKind::Deployment => write!(f, "Deployment"),
            WorkloadKind::StatefulSet => write!(f, "StatefulSet"),
        }
    }
}

/// Any resource kind the engine may label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Workload(WorkloadKind),
    Pod,
    Service,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Workload(kind) => fmt::Display::fmt(kind, f),
            ResourceKind::Pod => write!(f, "Pod"),
            ResourceKind::Service => write!(f, "Service"),
        }
    }
}

/// Identity of a controller resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkloadIdentity {
    pub namespace: String,
    pub name: String,
    pub kind: WorkloadKind,
}

impl WorkloadIdentity {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, kind: WorkloadKind) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            kind,
        }
    }

    #[must_use]
    pub fn resource_id(&self) -> ResourceId {
        ResourceId {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            kind: ResourceKind::Workload(self.kind),
        }
    }
}

impl fmt::Display for WorkloadIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Identity of any labelled resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub namespace: String,
    pub name: String,
    pub kind: ResourceKind,
}

impl ResourceId {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            kind,
        }
    }

    #[must_use]
    pub fn pod(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(namespace, name, ResourceKind::Pod)
    }

    #[must_use]
    pub fn service(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(namespace, name, ResourceKind::Service)
    }

    /// Workload identity, when this id names a controller
    #[must_use]
    pub fn workload(&self) -> Option<WorkloadIdentity> {
        match self.kind {
            ResourceKind::Workload(kind) => Some(WorkloadIdentity::new(
                self.namespace.clone(),
                self.name.clone(),
                kind,
            )),
            ResourceKind::Pod | ResourceKind::Service => None,
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Labels of a resource as read from the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSnapshot {
    pub id: ResourceId,
    pub labels: LabelSet,
    /// Optimistic-concurrency token; writes carrying it fail on a stale read
    pub resource_version: Option<String>,
    /// Traffic selector, only ever set on services
    pub selector: Option<LabelSet>,
}

impl ResourceSnapshot {
    #[must_use]
    pub fn new(id: ResourceId, labels: LabelSet) -> Self {
        Self {
            id,
            labels,
            resource_version: None,
            selector: None,
        }
    }

    #[must_use]
    pub fn with_resource_version(mut self, resource_version: impl Into<String>) -> Self {
        self.resource_version = Some(resource_version.into());
        self
    }

    #[must_use]
    pub fn with_selector(mut self, selector: LabelSet) -> Self {
        self.selector = Some(selector);
        self
    }

    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Operations the engine needs from the cluster
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Names of every namespace
    async fn list_namespaces(&self) -> Result<Vec<String>, ApiError>;

    /// Controllers of one kind in a namespace
    async fn list_controllers(
        &self,
        namespace: &str,
        kind: WorkloadKind,
    ) -> Result<Vec<ResourceSnapshot>, ApiError>;

    /// Controllers of one kind carrying every label in `selector`, in one
    /// namespace or, with `None`, across the whole cluster
    async fn list_labelled_controllers(
        &self,
        namespace: Option<&str>,
        kind: WorkloadKind,
        selector: &LabelSet,
    ) -> Result<Vec<ResourceSnapshot>, ApiError>;

    /// Fresh read of a single resource
    async fn get(&self, id: &ResourceId) -> Result<ResourceSnapshot, ApiError>;

    /// Write `labels` onto the resource. With `resource_version` set the write
    /// fails with [`ApiError::Conflict`] if the resource changed since that read.
    async fn update_labels(
        &self,
        id: &ResourceId,
        labels: &LabelSet,
        resource_version: Option<&str>,
    ) -> Result<(), ApiError>;

    /// Pods whose labels match every entry of `selector`
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &LabelSet,
    ) -> Result<Vec<ResourceSnapshot>, ApiError>;

    /// Every service in a namespace, selectors included
    async fn list_services(&self, namespace: &str) -> Result<Vec<ResourceSnapshot>, ApiError>;
}
