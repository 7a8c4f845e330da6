use k8s_openapi::api::core::v1::{PodSecurityContext, SeccompProfile, SecurityContext};

/// Pod-level security defaults applied to every challenge pod. Per-container
/// overrides supplied by a CTD take precedence over these.
pub fn default_pod_security_context() -> PodSecurityContext {
    PodSecurityContext {
        run_as_non_root: Some(true),
        run_as_user: Some(1000),
        run_as_group: Some(1000),
        fs_group: Some(1000),
        seccomp_profile: Some(SeccompProfile { type_: "RuntimeDefault".to_string(), ..Default::default() }),
        ..Default::default()
    }
}

pub fn default_container_security_context() -> SecurityContext {
    SecurityContext { allow_privilege_escalation: Some(false), ..Default::default() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_defaults_enforce_non_root() {
        let ctx = default_pod_security_context();
        assert_eq!(ctx.run_as_non_root, Some(true));
        assert_eq!(ctx.run_as_user, Some(1000));
    }

    #[test]
    fn container_defaults_disallow_privilege_escalation() {
        assert_eq!(default_container_security_context().allow_privilege_escalation, Some(false));
    }
}
