//! Drift detection for the classification label

use crate::labels::LabelSet;
use labeler_config::UnsetPolicy;

/// Decides whether a label set needs its classification label rewritten
#[derive(Debug, Clone)]
pub struct DriftDetector {
    key: String,
    fallback: String,
    unset_policy: UnsetPolicy,
}

impl DriftDetector {
    #[must_use]
    pub fn new(key: impl Into<String>, fallback: impl Into<String>, unset_policy: UnsetPolicy) -> Self {
        Self {
            key: key.into(),
            fallback: fallback.into(),
            unset_policy,
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// True when `current` does not already carry `target` under the
    /// classification key. An absent key differs from every target, except
    /// the fallback under [`UnsetPolicy::FallbackConverged`].
    #[must_use]
    pub fn needs_update(&self, current: &LabelSet, target: &str) -> bool {
        match current.get(&self.key) {
            Some(value) => value != target,
            None => match self.unset_policy {
                UnsetPolicy::Write => true,
                UnsetPolicy::FallbackConverged => target != self.fallback,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::label_set;

    #[test]
    fn equal_value_is_converged() {
        let detector = DriftDetector::new("business", "other", UnsetPolicy::Write);
        assert!(!detector.needs_update(&label_set(&[("business", "chief")]), "chief"));
        assert!(detector.needs_update(&label_set(&[("business", "other")]), "chief"));
    }

    #[test]
    fn absent_key_is_drift_under_write_policy() {
        let detector = DriftDetector::new("business", "other", UnsetPolicy::Write);
        assert!(detector.needs_update(&label_set(&[("app", "web")]), "chief"));
        assert!(detector.needs_update(&label_set(&[("app", "web")]), "other"));
    }

    #[test]
    fn absent_key_matches_fallback_under_converged_policy() {
        let detector = DriftDetector::new("business", "other", UnsetPolicy::FallbackConverged);
        assert!(!detector.needs_update(&label_set(&[("app", "web")]), "other"));
        assert!(detector.needs_update(&label_set(&[("app", "web")]), "chief"));
    }

    #[test]
    fn empty_value_is_not_absent() {
        let detector = DriftDetector::new("business", "other", UnsetPolicy::FallbackConverged);
        assert!(detector.needs_update(&label_set(&[("business", "")]), "other"));
    }
}
