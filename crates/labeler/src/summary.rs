//! Run summary aggregated from per-controller results

use crate::propagate::{DependentAction, ReconcileAction, ReconciliationResult};
use chrono::{DateTime, Utc};
use labeler_config::Overlap;
use serde::Serialize;
use std::fmt::Write as _;

/// A namespace whose controllers could not be listed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamespaceFailure {
    pub namespace: String,
    pub error: String,
}

/// Structured report of one reconciliation run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub cancelled: bool,
    pub namespaces_scanned: usize,
    pub controllers_seen: usize,
    /// Controllers left untouched because the run was cancelled first
    pub not_started: usize,
    pub skipped: usize,
    pub updated: usize,
    pub failed: usize,
    pub would_update: usize,
    pub pods_updated: usize,
    pub services_updated: usize,
    pub dependent_failures: usize,
    pub namespace_failures: Vec<NamespaceFailure>,
    pub ambiguous_members: Vec<Overlap>,
    pub results: Vec<ReconciliationResult>,
}

impl RunSummary {
    #[must_use]
    pub fn new(started_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            dry_run,
            cancelled: false,
            namespaces_scanned: 0,
            controllers_seen: 0,
            not_started: 0,
            skipped: 0,
            updated: 0,
            failed: 0,
            would_update: 0,
            pods_updated: 0,
            services_updated: 0,
            dependent_failures: 0,
            namespace_failures: Vec::new(),
            ambiguous_members: Vec::new(),
            results: Vec::new(),
        }
    }

    /// Fold one controller result into the counters
    pub fn record(&mut self, result: ReconciliationResult) {
        match result.action {
            ReconcileAction::SkippedNoDrift => self.skipped += 1,
            ReconcileAction::Updated => self.updated += 1,
            ReconcileAction::UpdateFailed => self.failed += 1,
            ReconcileAction::WouldUpdate => self.would_update += 1,
        }

        let updated = |outcomes: &[crate::propagate::DependentOutcome]| {
            outcomes
                .iter()
                .filter(|o| o.action == DependentAction::Updated)
                .count()
        };
        self.pods_updated += updated(&result.pods);
        self.services_updated += updated(&result.services);
        self.dependent_failures +=
            result.dependent_failures().count() + result.listing_errors().count();

        self.results.push(result);
    }

    /// Total label writes issued during the run
    #[must_use]
    pub fn writes(&self) -> usize {
        self.results.iter().map(ReconciliationResult::writes).sum()
    }

    /// True when any controller, dependent or namespace failed
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.dependent_failures > 0 || !self.namespace_failures.is_empty()
    }

    /// Human-readable report: every change, every failure, then totals
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();

        for overlap in &self.ambiguous_members {
            let _ = writeln!(
                out,
                "WARN  '{}' is listed under {} (using '{}')",
                overlap.member,
                overlap.categories.join(", "),
                overlap.categories.first().map_or("", String::as_str)
            );
        }

        for failure in &self.namespace_failures {
            let _ = writeln!(out, "FAIL  namespace {}: {}", failure.namespace, failure.error);
        }

        for result in &self.results {
            let previous = result.previous.as_deref().unwrap_or("<unset>");
            match result.action {
                ReconcileAction::SkippedNoDrift => continue,
                ReconcileAction::Updated | ReconcileAction::WouldUpdate => {
                    let verb = if result.action == ReconcileAction::Updated {
                        "UPDATED"
                    } else {
                        "PLAN "
                    };
                    let _ = writeln!(
                        out,
                        "{verb} {}: {previous} -> {}",
                        result.identity, result.target
                    );
                }
                ReconcileAction::UpdateFailed => {
                    let _ = writeln!(
                        out,
                        "FAIL  {}: {previous} -> {}: {}",
                        result.identity,
                        result.target,
                        result
                            .error
                            .as_ref()
                            .map(ToString::to_string)
                            .unwrap_or_default()
                    );
                }
            }

            for outcome in result.dependents() {
                let line = match outcome.action {
                    DependentAction::AlreadyConverged => continue,
                    DependentAction::Updated => format!("updated {}", outcome.resource),
                    DependentAction::WouldUpdate => format!("would update {}", outcome.resource),
                    DependentAction::UpdateFailed => format!(
                        "FAILED {}: {}",
                        outcome.resource,
                        outcome
                            .error
                            .as_ref()
                            .map(ToString::to_string)
                            .unwrap_or_default()
                    ),
                };
                let _ = writeln!(out, "        {line}");
            }

            if let Some(error) = &result.pod_listing_error {
                let _ = writeln!(out, "        FAILED listing pods: {error}");
            }
            if let Some(error) = &result.service_listing_error {
                let _ = writeln!(out, "        FAILED listing services: {error}");
            }
        }

        let _ = writeln!(
            out,
            "{} namespaces, {} controllers: {} updated, {} skipped, {} failed{}; {} pods and {} services updated, {} dependent failures{}",
            self.namespaces_scanned,
            self.controllers_seen,
            self.updated,
            self.skipped,
            self.failed,
            if self.dry_run {
                format!(", {} would update (dry run)", self.would_update)
            } else {
                String::new()
            },
            self.pods_updated,
            self.services_updated,
            self.dependent_failures,
            if self.cancelled {
                format!(" (cancelled, {} not started)", self.not_started)
            } else {
                String::new()
            },
        );

        out
    }
}
