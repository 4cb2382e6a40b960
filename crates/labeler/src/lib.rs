//! Business label reconciler
//!
//! Keeps the business classification label (`business` by default)
//! consistent across every `Deployment` and `StatefulSet` in a cluster and
//! pushes the value down to the pods each controller selects and the
//! services routing to those pods.
//!
//! - [`classify`] maps a workload name to its category
//! - [`drift::DriftDetector`] decides whether a write is needed
//! - [`enumerate::ResourceEnumerator`] reads namespaces, controllers and dependents
//! - [`propagate::LabelPropagator`] writes one controller and its dependents
//! - [`coordinator::RunCoordinator`] drives a full pass and builds a [`RunSummary`]
//!
//! All cluster access goes through the [`ClusterApi`] trait, implemented by
//! [`KubeClusterApi`] for real clusters and [`FakeCluster`] for tests.

pub mod classify;
pub mod cluster;
pub mod coordinator;
pub mod drift;
pub mod enumerate;
pub mod error;
pub mod labels;
pub mod list;
pub mod propagate;
pub mod retry;
pub mod summary;

pub use classify::classify;
pub use cluster::{
    ClusterApi, FakeCluster, KubeClusterApi, ResourceId, ResourceKind, ResourceSnapshot,
    WorkloadIdentity, WorkloadKind,
};
pub use coordinator::RunCoordinator;
pub use drift::DriftDetector;
pub use enumerate::{Controller, Dependents, ResourceEnumerator};
pub use error::{ApiError, ReconcileError, Result};
pub use labels::LabelSet;
pub use list::{list_by_business, BusinessListing};
pub use propagate::{
    DependentAction, DependentOutcome, LabelPropagator, ReconcileAction, ReconciliationResult,
};
pub use retry::RetryPolicy;
pub use summary::{NamespaceFailure, RunSummary};

pub use labeler_config as config;
