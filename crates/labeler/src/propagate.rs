//! # Label Propagation
//!
//! Reconciles one controller and its dependents. The steps are strictly
//! sequential: classify, check drift, write the controller, and only after
//! that write succeeds list and write pods, then list and write services.
//! A failed dependent write is recorded and does not stop its siblings, and
//! a failed service listing does not undo or skip the pod writes.

use crate::classify::classify;
use crate::cluster::{ClusterApi, ResourceId, ResourceSnapshot, WorkloadIdentity};
use crate::drift::DriftDetector;
use crate::enumerate::{Controller, ResourceEnumerator};
use crate::error::ApiError;
use crate::labels::{with_label, LabelSet};
use crate::retry::RetryPolicy;
use labeler_config::{CategoryTable, LabelerConfig};
use serde::{Serialize, Serializer};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// What happened to a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconcileAction {
    SkippedNoDrift,
    Updated,
    UpdateFailed,
    /// Dry run: the controller has drift but nothing was written
    WouldUpdate,
}

/// What happened to a pod or service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependentAction {
    AlreadyConverged,
    Updated,
    UpdateFailed,
    WouldUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependentOutcome {
    pub resource: ResourceId,
    pub previous: Option<String>,
    pub action: DependentAction,
    #[serde(serialize_with = "error_text", skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

/// Outcome of reconciling one controller and its dependents
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationResult {
    pub identity: WorkloadIdentity,
    pub previous: Option<String>,
    pub target: String,
    pub action: ReconcileAction,
    #[serde(serialize_with = "error_text", skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    pub pods: Vec<DependentOutcome>,
    pub services: Vec<DependentOutcome>,
    /// Set when the controller was written but its pods could not be listed
    #[serde(serialize_with = "error_text", skip_serializing_if = "Option::is_none")]
    pub pod_listing_error: Option<ApiError>,
    /// Set when the pods were handled but services could not be listed
    #[serde(serialize_with = "error_text", skip_serializing_if = "Option::is_none")]
    pub service_listing_error: Option<ApiError>,
}

impl ReconciliationResult {
    fn new(identity: WorkloadIdentity, previous: Option<String>, target: &str) -> Self {
        Self {
            identity,
            previous,
            target: target.to_string(),
            action: ReconcileAction::SkippedNoDrift,
            error: None,
            pods: Vec::new(),
            services: Vec::new(),
            pod_listing_error: None,
            service_listing_error: None,
        }
    }

    /// Dependent listings that failed, pods first
    pub fn listing_errors(&self) -> impl Iterator<Item = &ApiError> {
        self.pod_listing_error
            .iter()
            .chain(self.service_listing_error.iter())
    }

    /// Pod and service outcomes, pods first
    pub fn dependents(&self) -> impl Iterator<Item = &DependentOutcome> {
        self.pods.iter().chain(self.services.iter())
    }

    /// Dependent writes that failed
    pub fn dependent_failures(&self) -> impl Iterator<Item = &DependentOutcome> {
        self.dependents()
            .filter(|outcome| outcome.action == DependentAction::UpdateFailed)
    }

    /// Number of label writes this reconciliation issued
    #[must_use]
    pub fn writes(&self) -> usize {
        let controller = usize::from(self.action == ReconcileAction::Updated);
        controller
            + self
                .dependents()
                .filter(|outcome| outcome.action == DependentAction::Updated)
                .count()
    }
}

#[allow(clippy::ref_option)]
fn error_text<S: Serializer>(error: &Option<ApiError>, serializer: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(error) => serializer.serialize_str(&error.to_string()),
        None => serializer.serialize_none(),
    }
}

enum WriteOutcome {
    /// The labels that were written
    Written(LabelSet),
    /// A fresh read showed the target already in place
    AlreadyConverged,
}

/// Applies the classification label to a controller and its dependents
#[derive(Clone)]
pub struct LabelPropagator {
    api: Arc<dyn ClusterApi>,
    enumerator: ResourceEnumerator,
    table: Arc<CategoryTable>,
    detector: DriftDetector,
    policy: RetryPolicy,
    dry_run: bool,
}

impl LabelPropagator {
    #[must_use]
    pub fn new(api: Arc<dyn ClusterApi>, config: &LabelerConfig) -> Self {
        let policy = RetryPolicy::from_engine(&config.engine);
        Self {
            enumerator: ResourceEnumerator::new(api.clone(), policy.clone(), &config.label_key),
            api,
            table: Arc::new(config.table.clone()),
            detector: DriftDetector::new(
                &config.label_key,
                &config.table.fallback,
                config.unset_policy,
            ),
            policy,
            dry_run: false,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.enumerator = ResourceEnumerator::new(self.api.clone(), policy.clone(), self.detector.key());
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    #[must_use]
    pub fn enumerator(&self) -> &ResourceEnumerator {
        &self.enumerator
    }

    /// Reconcile one controller and, if it drifted, its pods and services
    #[instrument(skip_all, fields(workload = %controller.identity))]
    pub async fn propagate(&self, controller: &Controller) -> ReconciliationResult {
        let key = self.detector.key();
        let identity = &controller.identity;
        let target = classify(&identity.name, &self.table);
        let previous = controller.snapshot.label(key).map(str::to_string);
        let mut result = ReconciliationResult::new(identity.clone(), previous, target);

        if !self.detector.needs_update(controller.labels(), target) {
            debug!(target, "Controller already converged");
            return result;
        }

        let written_labels = if self.dry_run {
            result.action = ReconcileAction::WouldUpdate;
            with_label(controller.labels(), key, target)
        } else {
            match self.converge(&controller.snapshot, target).await {
                Ok(WriteOutcome::Written(labels)) => {
                    info!(
                        previous = result.previous.as_deref().unwrap_or("<unset>"),
                        target, "Updated controller label"
                    );
                    result.action = ReconcileAction::Updated;
                    labels
                }
                Ok(WriteOutcome::AlreadyConverged) => {
                    // Dependents are left to the writer that converged the controller
                    debug!(target, "Controller converged by another writer");
                    return result;
                }
                Err(e) => {
                    warn!(target, error = %e, "Failed to update controller label");
                    result.action = ReconcileAction::UpdateFailed;
                    result.error = Some(e);
                    return result;
                }
            }
        };

        let namespace = &identity.namespace;
        let pods = match self.enumerator.list_pods_for(namespace, &written_labels).await {
            Ok(pods) => pods,
            Err(e) => {
                warn!(target, error = %e, "Failed to list pods");
                result.pod_listing_error = Some(e);
                return result;
            }
        };
        result.pods = self.apply_to_dependents(&pods, target).await;

        match self.enumerator.list_services_for(namespace, &pods, target).await {
            Ok(services) => result.services = self.apply_to_dependents(&services, target).await,
            Err(e) => {
                warn!(target, error = %e, "Failed to list services");
                result.service_listing_error = Some(e);
            }
        }

        result
    }

    async fn apply_to_dependents(
        &self,
        resources: &[ResourceSnapshot],
        target: &str,
    ) -> Vec<DependentOutcome> {
        let mut outcomes = Vec::with_capacity(resources.len());
        for resource in resources {
            outcomes.push(self.apply_to_dependent(resource, target).await);
        }
        outcomes
    }

    async fn apply_to_dependent(&self, resource: &ResourceSnapshot, target: &str) -> DependentOutcome {
        let mut outcome = DependentOutcome {
            resource: resource.id.clone(),
            previous: resource.label(self.detector.key()).map(str::to_string),
            action: DependentAction::AlreadyConverged,
            error: None,
        };

        if !self.detector.needs_update(&resource.labels, target) {
            return outcome;
        }

        if self.dry_run {
            outcome.action = DependentAction::WouldUpdate;
            return outcome;
        }

        match self.converge(resource, target).await {
            Ok(WriteOutcome::Written(_)) => {
                debug!(resource = %resource.id, target, "Updated dependent label");
                outcome.action = DependentAction::Updated;
            }
            Ok(WriteOutcome::AlreadyConverged) => {}
            Err(e) => {
                warn!(resource = %resource.id, target, error = %e, "Failed to update dependent label");
                outcome.action = DependentAction::UpdateFailed;
                outcome.error = Some(e);
            }
        }

        outcome
    }

    /// Write `target` onto the resource, re-reading and re-deciding after a
    /// write conflict instead of replaying the stale write
    async fn converge(&self, snapshot: &ResourceSnapshot, target: &str) -> Result<WriteOutcome, ApiError> {
        let api = self.api.as_ref();
        let id = &snapshot.id;
        let max_attempts = self.policy.max_attempts();
        let mut current = snapshot.clone();
        let mut attempt = 1;

        loop {
            if !self.detector.needs_update(&current.labels, target) {
                return Ok(WriteOutcome::AlreadyConverged);
            }

            let labels = with_label(&current.labels, self.detector.key(), target);
            let labels_ref = &labels;
            let resource_version = current.resource_version.as_deref();

            match self
                .policy
                .run("update labels", move || {
                    api.update_labels(id, labels_ref, resource_version)
                })
                .await
            {
                Ok(()) => return Ok(WriteOutcome::Written(labels)),
                Err(e) if e.is_conflict() && attempt < max_attempts => {
                    debug!(resource = %id, attempt, "Write conflict, re-reading");
                    sleep(self.policy.backoff(attempt)).await;
                    current = self.policy.run("get", move || api.get(id)).await?;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
