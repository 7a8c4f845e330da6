use k8s_openapi::api::core::v1::Pod;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PodStatus {
    Creating,
    Active,
    Terminating,
    Error,
}

impl PodStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PodStatus::Creating => "CREATING",
            PodStatus::Active => "ACTIVE",
            PodStatus::Terminating => "TERMINATING",
            PodStatus::Error => "ERROR",
        }
    }
}

/// Standardizes a pod's raw phase into the four states callers care about.
/// A deletion timestamp wins over phase because Kubernetes keeps reporting
/// `Running` for pods that are mid-termination.
pub fn standardize_pod_status(pod: &Pod) -> PodStatus {
    if pod.metadata.deletion_timestamp.is_some() {
        return PodStatus::Terminating;
    }

    match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
        Some("Pending") => PodStatus::Creating,
        Some("Running") | Some("Succeeded") => PodStatus::Active,
        Some("Failed") => PodStatus::Error,
        _ => PodStatus::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus as K8sPodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    fn pod_with(phase: Option<&str>, deletion_timestamp: bool) -> Pod {
        Pod {
            metadata: ObjectMeta {
                deletion_timestamp: deletion_timestamp.then(|| Time(chrono::Utc::now())),
                ..Default::default()
            },
            status: Some(K8sPodStatus { phase: phase.map(String::from), ..Default::default() }),
            ..Default::default()
        }
    }

    #[test]
    fn deletion_timestamp_overrides_running_phase() {
        assert_eq!(standardize_pod_status(&pod_with(Some("Running"), true)), PodStatus::Terminating);
    }

    #[test]
    fn maps_known_phases() {
        assert_eq!(standardize_pod_status(&pod_with(Some("Pending"), false)), PodStatus::Creating);
        assert_eq!(standardize_pod_status(&pod_with(Some("Running"), false)), PodStatus::Active);
        assert_eq!(standardize_pod_status(&pod_with(Some("Succeeded"), false)), PodStatus::Active);
        assert_eq!(standardize_pod_status(&pod_with(Some("Failed"), false)), PodStatus::Error);
    }

    #[test]
    fn unknown_phase_defaults_to_error() {
        assert_eq!(standardize_pod_status(&pod_with(None, false)), PodStatus::Error);
    }
}
