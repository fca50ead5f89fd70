//! Pod labels recognized by the core, and the names fluxnetes falls back to when they
//! are absent. Mirrors `k8s.io/kubernetes/pkg/scheduler/framework/plugins/fluxnetes/labels`.

use std::collections::HashMap;

/// Groups pods into a gang. Absent -> a name is synthesized from namespace/name.
pub const POD_GROUP_LABEL: &str = "scheduling.x-k8s.io/pod-group";
/// Declared group size. Absent -> 1.
pub const POD_GROUP_SIZE_LABEL: &str = "fluxnetes.group-size";
/// Declared duration in seconds. Absent -> 3600.
pub const POD_GROUP_DURATION_LABEL: &str = "fluxnetes.duration-seconds";

pub const DEFAULT_GROUP_SIZE: u32 = 1;
pub const DEFAULT_DURATION_SECONDS: u64 = 3600;

/// Group name, synthesized as `<namespace>-<name>` when the pod carries no label.
pub fn group_name(namespace: &str, name: &str, labels: &HashMap<String, String>) -> String {
    match labels.get(POD_GROUP_LABEL) {
        Some(v) if !v.is_empty() => v.clone(),
        _ => format!("{namespace}-{name}"),
    }
}

/// Parses the group size label, defaulting to 1. Fails on a non-parseable or negative value.
pub fn group_size(labels: &HashMap<String, String>) -> Result<u32, LabelParseError> {
    match labels.get(POD_GROUP_SIZE_LABEL) {
        None => Ok(DEFAULT_GROUP_SIZE),
        Some(raw) => raw
            .parse::<i64>()
            .ok()
            .filter(|v| *v > 0)
            .map(|v| v as u32)
            .ok_or_else(|| LabelParseError::new(POD_GROUP_SIZE_LABEL, raw)),
    }
}

/// Parses the duration label (seconds), defaulting to 3600. Fails on non-parseable or negative.
pub fn duration_seconds(labels: &HashMap<String, String>) -> Result<u64, LabelParseError> {
    match labels.get(POD_GROUP_DURATION_LABEL) {
        None => Ok(DEFAULT_DURATION_SECONDS),
        Some(raw) => raw
            .parse::<i64>()
            .ok()
            .filter(|v| *v >= 0)
            .map(|v| v as u64)
            .ok_or_else(|| LabelParseError::new(POD_GROUP_DURATION_LABEL, raw)),
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("label {label} has unparseable or out-of-range value {value:?}")]
pub struct LabelParseError {
    pub label: String,
    pub value: String,
}

impl LabelParseError {
    fn new(label: &str, value: &str) -> Self {
        Self {
            label: label.to_string(),
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn group_name_falls_back_to_namespace_name() {
        assert_eq!(group_name("ns", "pod", &labels(&[])), "ns-pod");
    }

    #[test]
    fn group_name_uses_label_when_present() {
        let l = labels(&[(POD_GROUP_LABEL, "g1")]);
        assert_eq!(group_name("ns", "pod", &l), "g1");
    }

    #[test]
    fn group_size_defaults_to_one() {
        assert_eq!(group_size(&labels(&[])).unwrap(), 1);
    }

    #[test]
    fn group_size_rejects_negative() {
        let l = labels(&[(POD_GROUP_SIZE_LABEL, "-3")]);
        assert!(group_size(&l).is_err());
    }

    #[test]
    fn group_size_rejects_garbage() {
        let l = labels(&[(POD_GROUP_SIZE_LABEL, "nope")]);
        assert!(group_size(&l).is_err());
    }

    #[test]
    fn duration_defaults_to_one_hour() {
        assert_eq!(duration_seconds(&labels(&[])).unwrap(), 3600);
    }

    #[test]
    fn duration_allows_zero() {
        let l = labels(&[(POD_GROUP_DURATION_LABEL, "0")]);
        assert_eq!(duration_seconds(&l).unwrap(), 0);
    }

    #[test]
    fn duration_rejects_negative() {
        let l = labels(&[(POD_GROUP_DURATION_LABEL, "-1")]);
        assert!(duration_seconds(&l).is_err());
    }
}
