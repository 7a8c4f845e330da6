use ctd_resolver::ResolvedObject;
use kube::api::Api;
use kube::Client;
use shared::AppError;
use tracing::info;

use crate::adapter::KubernetesAdapter;

fn defender_name(competition_id: &str) -> String {
    format!("defense-{competition_id}")
}

/// Deploys and reuses a single shared "defender" pod/service/ingress per
/// competition for red-vs-blue challenge types. Attacker deployments for
/// the same competition all reference the defender; cleaning up an
/// attacker instance never removes it because its lifecycle is scoped to
/// the competition, not to any one deployment.
#[derive(Clone)]
pub struct RedBlueHandler {
    adapter: KubernetesAdapter,
    client: Client,
}

impl RedBlueHandler {
    pub fn new(adapter: KubernetesAdapter, client: Client) -> Self {
        Self { adapter, client }
    }

    pub async fn ensure_defender(&self, namespace: &str, competition_id: &str, defender_objects: &[ResolvedObject]) -> Result<bool, AppError> {
        let name = defender_name(competition_id);
        let pods: Api<k8s_openapi::api::core::v1::Pod> = Api::namespaced(self.client.clone(), namespace);

        if pods.get_opt(&name).await.map_err(AppError::KubeError)?.is_some() {
            info!(competition_id, "defender already deployed, skipping");
            return Ok(false);
        }

        for object in defender_objects {
            self.adapter.create_object(object).await?;
        }

        info!(competition_id, "deployed shared defender");
        Ok(true)
    }

    /// Attacker-only cleanup: deletes objects labeled with the attacker's
    /// instance name, never the defender's `defense-<competition_id>` name.
    pub async fn cleanup_attacker(&self, namespace: &str, attacker_instance_name: &str) -> Result<Vec<String>, AppError> {
        self.adapter.delete_by_instance_label(namespace, attacker_instance_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defender_name_is_scoped_to_competition() {
        assert_eq!(defender_name("comp-42"), "defense-comp-42");
    }
}
