//! # Run Coordination
//!
//! Drives one reconciliation pass over the cluster: namespaces, then the
//! controllers in each, then propagation for every controller through a
//! bounded worker pool. Only a failure to enumerate namespaces aborts the
//! run; everything below that is recorded in the [`RunSummary`].

use crate::cluster::ClusterApi;
use crate::enumerate::Controller;
use crate::error::{ReconcileError, Result};
use crate::propagate::{LabelPropagator, ReconciliationResult};
use crate::retry::RetryPolicy;
use crate::summary::{NamespaceFailure, RunSummary};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use labeler_config::{LabelerConfig, Overlap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Runs reconciliation passes against a cluster
pub struct RunCoordinator {
    propagator: LabelPropagator,
    overlaps: Vec<Overlap>,
    namespace: Option<String>,
    workers: usize,
    cancel: CancellationToken,
}

impl RunCoordinator {
    #[must_use]
    pub fn new(api: Arc<dyn ClusterApi>, config: &LabelerConfig) -> Self {
        Self {
            propagator: LabelPropagator::new(api, config),
            overlaps: config.table.overlaps(),
            namespace: None,
            workers: config.engine.workers.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Restrict the run to one namespace
    #[must_use]
    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace.filter(|ns| !ns.is_empty());
        self
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.propagator = self.propagator.with_dry_run(dry_run);
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.propagator = self.propagator.with_policy(policy);
        self
    }

    /// Token that stops new reconciliations when cancelled
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Reconcile every controller in scope and summarize the outcome
    #[instrument(skip(self), fields(namespace = self.namespace.as_deref().unwrap_or("<all>"), workers = self.workers))]
    pub async fn run(&self) -> Result<RunSummary> {
        let mut summary = RunSummary::new(Utc::now(), self.propagator.is_dry_run());

        for overlap in &self.overlaps {
            warn!(
                member = %overlap.member,
                categories = ?overlap.categories,
                "Workload is listed under more than one category, first declared wins"
            );
        }
        summary.ambiguous_members.clone_from(&self.overlaps);

        let namespaces = self.namespaces().await?;
        summary.namespaces_scanned = namespaces.len();

        let controllers = self.collect_controllers(namespaces, &mut summary).await;
        summary.controllers_seen = controllers.len();
        info!(
            namespaces = summary.namespaces_scanned,
            controllers = controllers.len(),
            "Starting reconciliation"
        );

        let mut results = self.reconcile_all(&controllers).await;
        summary.not_started = controllers.len() - results.len();
        results.sort_by(|a, b| a.identity.cmp(&b.identity));
        for result in results {
            summary.record(result);
        }

        summary.cancelled = self.cancel.is_cancelled();
        summary.finished_at = Utc::now();

        info!(
            updated = summary.updated,
            skipped = summary.skipped,
            failed = summary.failed,
            would_update = summary.would_update,
            pods_updated = summary.pods_updated,
            services_updated = summary.services_updated,
            dependent_failures = summary.dependent_failures,
            cancelled = summary.cancelled,
            "Reconciliation finished"
        );

        Ok(summary)
    }

    async fn namespaces(&self) -> Result<Vec<String>> {
        if let Some(namespace) = &self.namespace {
            return Ok(vec![namespace.clone()]);
        }

        self.propagator
            .enumerator()
            .list_namespaces()
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to list namespaces");
                ReconcileError::FatalEnumeration(e)
            })
    }

    /// List controllers in every namespace; a failing namespace is recorded
    /// and skipped
    async fn collect_controllers(
        &self,
        namespaces: Vec<String>,
        summary: &mut RunSummary,
    ) -> Vec<Controller> {
        let enumerator = self.propagator.enumerator();

        let listings: Vec<_> = stream::iter(namespaces)
            .map(|namespace| async move {
                let listed = enumerator.list_controllers(&namespace).await;
                (namespace, listed)
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let mut controllers = Vec::new();
        for (namespace, listed) in listings {
            match listed {
                Ok(found) => controllers.extend(found),
                Err(e) => {
                    warn!(namespace = %namespace, error = %e, "Failed to list controllers, skipping namespace");
                    summary.namespace_failures.push(NamespaceFailure {
                        namespace,
                        error: e.to_string(),
                    });
                }
            }
        }

        summary
            .namespace_failures
            .sort_by(|a, b| a.namespace.cmp(&b.namespace));
        controllers.sort_by(|a, b| a.identity.cmp(&b.identity));
        controllers
    }

    /// Propagate every controller with at most `workers` in flight. Once the
    /// token is cancelled no further controller is started.
    async fn reconcile_all(&self, controllers: &[Controller]) -> Vec<ReconciliationResult> {
        let propagator = &self.propagator;
        let cancel = &self.cancel;

        stream::iter(controllers)
            .map(|controller| async move {
                if cancel.is_cancelled() {
                    return None;
                }
                Some(propagator.propagate(controller).await)
            })
            .buffer_unordered(self.workers)
            .filter_map(|result| async move { result })
            .collect()
            .await
    }
}
