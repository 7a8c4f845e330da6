use std::path::PathBuf;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config as KubeConfig};
use shared::{AppError, Config};
use tracing::info;

/// Builds a `kube::Client` the way both services start up: in-cluster
/// service account when `k8s_in_cluster` is set, otherwise a kubeconfig
/// file (explicit path or the usual inference rules).
pub async fn build_client(config: &Config) -> Result<Client, AppError> {
    let client = if config.k8s_in_cluster {
        let kube_config = KubeConfig::incluster()?;
        info!("connected from incluster environment");
        Client::try_from(kube_config)?
    } else {
        let kube_config = if let Some(path) = &config.k8s_config_path {
            let kubeconfig = Kubeconfig::read_from(PathBuf::from(path))?;
            let options = KubeConfigOptions::default();
            KubeConfig::from_custom_kubeconfig(kubeconfig, &options).await?
        } else {
            KubeConfig::infer().await?
        };

        info!("connected from local environment");
        Client::try_from(kube_config)?
    };

    Ok(client)
}
