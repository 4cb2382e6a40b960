//! Label set helpers and selector matching

use std::collections::BTreeMap;

/// Label key to value mapping, as carried in Kubernetes object metadata
pub type LabelSet = BTreeMap<String, String>;

/// Conjunctive equality match: every selector key is present in `labels`
/// with the same value. An empty selector matches everything; callers that
/// need Kubernetes "selects nothing" semantics check for emptiness first.
#[must_use]
pub fn selector_matches(selector: &LabelSet, labels: &LabelSet) -> bool {
    selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

/// Copy of `labels` with `key` set to `value`
#[must_use]
pub fn with_label(labels: &LabelSet, key: &str, value: &str) -> LabelSet {
    let mut updated = labels.clone();
    updated.insert(key.to_string(), value.to_string());
    updated
}

/// Copy of `labels` without `key`
#[must_use]
pub fn without_label(labels: &LabelSet, key: &str) -> LabelSet {
    labels
        .iter()
        .filter(|(k, _)| k.as_str() != key)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Render a selector in Kubernetes `k=v,k2=v2` form
#[must_use]
pub fn selector_string(selector: &LabelSet) -> String {
    selector
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
pub(crate) fn label_set(pairs: &[(&str, &str)]) -> LabelSet {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}
