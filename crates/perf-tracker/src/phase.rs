#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Validation,
    Preparation,
    QueueWait,
    K8sResourcesCreation,
    WaitForRunning,
    Configuration,
    NetworkSetup,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Validation => "validation",
            Phase::Preparation => "preparation",
            Phase::QueueWait => "queue_wait",
            Phase::K8sResourcesCreation => "k8s_resources_creation",
            Phase::WaitForRunning => "wait_for_running",
            Phase::Configuration => "configuration",
            Phase::NetworkSetup => "network_setup",
        }
    }
}
