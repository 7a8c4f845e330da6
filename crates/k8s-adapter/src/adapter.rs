use std::collections::BTreeMap;

use ctd_resolver::{CtdContainer, ResolvedObject};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, Pod, PodSpec, Secret, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, IPBlock, Ingress, IngressBackend, IngressRule, IngressServiceBackend, IngressSpec, NetworkPolicy,
    NetworkPolicyEgressRule, NetworkPolicyIngressRule, NetworkPolicyPeer, NetworkPolicyPort, NetworkPolicySpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{DeleteParams, ObjectMeta, Patch, PatchParams, PostParams, PropagationPolicy};
use kube::{Api, Client};
use serde_json::Value;
use shared::AppError;
use tracing::{info, warn};

use crate::pod_status::{standardize_pod_status, PodStatus};
use crate::security::{default_container_security_context, default_pod_security_context};

pub const CHALLENGE_LABEL: &str = "app";
pub const CHALLENGE_LABEL_VALUE: &str = "ctfchal";

fn object_meta(resolved: &ResolvedObject) -> ObjectMeta {
    ObjectMeta {
        name: Some(resolved.name.clone()),
        namespace: Some(resolved.namespace.clone()),
        labels: Some(resolved.labels.clone().into_iter().collect::<BTreeMap<_, _>>()),
        ..Default::default()
    }
}

fn match_labels_from(map: &serde_json::Map<String, Value>) -> BTreeMap<String, String> {
    map.iter().filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string()))).collect()
}

fn network_policy_peer(peer: &Value) -> NetworkPolicyPeer {
    let pod_selector = peer
        .get("podSelector")
        .and_then(|s| s.get("matchLabels"))
        .and_then(Value::as_object)
        .map(|labels| LabelSelector { match_labels: Some(match_labels_from(labels)), ..Default::default() });

    let namespace_selector = peer
        .get("namespaceSelector")
        .and_then(|s| s.get("matchLabels"))
        .and_then(Value::as_object)
        .map(|labels| LabelSelector { match_labels: Some(match_labels_from(labels)), ..Default::default() });

    let ip_block = peer.get("ipBlock").and_then(Value::as_object).and_then(|block| {
        let cidr = block.get("cidr").and_then(Value::as_str)?.to_string();
        let except = block.get("except").and_then(Value::as_array).map(|ex| ex.iter().filter_map(|v| v.as_str().map(String::from)).collect());
        Some(IPBlock { cidr, except })
    });

    NetworkPolicyPeer { pod_selector, namespace_selector, ip_block }
}

fn network_policy_port(port: &Value) -> Option<NetworkPolicyPort> {
    let port_value = port.get("port")?;
    let protocol = port.get("protocol").and_then(Value::as_str).unwrap_or("TCP").to_string();
    let port = if let Some(n) = port_value.as_i64() {
        IntOrString::Int(n as i32)
    } else {
        IntOrString::String(port_value.as_str()?.to_string())
    };
    Some(NetworkPolicyPort { port: Some(port), protocol: Some(protocol), end_port: None })
}

/// Creates and deletes the Kubernetes objects that back one challenge
/// instance, all scoped to a single namespace (`default` in production,
/// overridable for tests).
#[derive(Clone)]
pub struct KubernetesAdapter {
    client: Client,
    ingress_class_name: Option<String>,
}

impl KubernetesAdapter {
    pub fn new(client: Client, ingress_class_name: Option<String>) -> Self {
        Self { client, ingress_class_name }
    }

    pub async fn create_object(&self, resolved: &ResolvedObject) -> Result<(), AppError> {
        match resolved.kind.as_str() {
            "Pod" => self.create_pod(resolved).await,
            "Service" => self.create_service(resolved).await,
            "Ingress" => self.create_ingress(resolved).await,
            "NetworkPolicy" => self.create_network_policy(resolved).await,
            other => {
                warn!(kind = other, "unsupported resolved object kind, skipping create");
                Ok(())
            }
        }
    }

    fn containers_from_spec(spec: &Value) -> Result<Vec<CtdContainer>, AppError> {
        let containers = spec.get("containers").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(containers).map_err(|e| AppError::ValidationError(format!("invalid pod container spec: {e}")))
    }

    pub async fn create_pod(&self, resolved: &ResolvedObject) -> Result<(), AppError> {
        let containers = Self::containers_from_spec(&resolved.spec)?;
        let pod_containers: Vec<Container> = containers
            .into_iter()
            .map(|c| Container {
                name: c.name,
                image: Some(c.image),
                env: Some(c.env.into_iter().map(|e| EnvVar { name: e.name, value: Some(e.value), ..Default::default() }).collect()),
                ports: Some(
                    c.ports
                        .into_iter()
                        .filter_map(|p| p.get("containerPort").and_then(Value::as_i64))
                        .map(|port| ContainerPort { container_port: port as i32, protocol: Some("TCP".to_string()), ..Default::default() })
                        .collect(),
                ),
                security_context: Some(default_container_security_context()),
                ..Default::default()
            })
            .collect();

        let pod = Pod {
            metadata: object_meta(resolved),
            spec: Some(PodSpec {
                containers: pod_containers,
                security_context: Some(default_pod_security_context()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let api: Api<Pod> = Api::namespaced(self.client.clone(), &resolved.namespace);
        api.create(&PostParams::default(), &pod).await.map_err(AppError::KubeError)?;
        info!(pod = %resolved.name, namespace = %resolved.namespace, "created pod");
        Ok(())
    }

    pub async fn create_service(&self, resolved: &ResolvedObject) -> Result<(), AppError> {
        let ports: Vec<ServicePort> = resolved
            .spec
            .get("ports")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|p| {
                let port = p.get("port")?.as_i64()? as i32;
                let target = p.get("target_port").and_then(Value::as_i64).unwrap_or(port as i64) as i32;
                Some(ServicePort {
                    port,
                    target_port: Some(IntOrString::Int(target)),
                    protocol: Some(p.get("protocol").and_then(Value::as_str).unwrap_or("TCP").to_string()),
                    name: p.get("name").and_then(Value::as_str).map(String::from),
                    ..Default::default()
                })
            })
            .collect();

        let selector = resolved.spec.get("selector").cloned().unwrap_or(Value::Object(Default::default()));
        let selector: BTreeMap<String, String> = serde_json::from_value(selector).unwrap_or_default();

        let service = Service {
            metadata: object_meta(resolved),
            spec: Some(ServiceSpec {
                selector: Some(if selector.is_empty() { resolved.labels.clone().into_iter().collect() } else { selector }),
                ports: Some(ports),
                type_: Some(resolved.spec.get("type").and_then(Value::as_str).unwrap_or("ClusterIP").to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let api: Api<Service> = Api::namespaced(self.client.clone(), &resolved.namespace);
        api.create(&PostParams::default(), &service).await.map_err(AppError::KubeError)?;
        info!(service = %resolved.name, namespace = %resolved.namespace, "created service");
        Ok(())
    }

    pub async fn create_ingress(&self, resolved: &ResolvedObject) -> Result<(), AppError> {
        let host = resolved.spec.get("host").and_then(Value::as_str).map(String::from);
        let service_name = resolved.spec.get("service_name").and_then(Value::as_str).unwrap_or(&resolved.name).to_string();
        let service_port = resolved.spec.get("service_port").and_then(Value::as_i64).unwrap_or(80) as i32;
        let path = resolved.spec.get("path").and_then(Value::as_str).unwrap_or("/").to_string();

        let rule = IngressRule {
            host,
            http: Some(HTTPIngressRuleValue {
                paths: vec![HTTPIngressPath {
                    path: Some(path),
                    path_type: "Prefix".to_string(),
                    backend: IngressBackend {
                        service: Some(IngressServiceBackend { name: service_name, port: Some(ServiceBackendPort { number: Some(service_port), ..Default::default() }) }),
                        ..Default::default()
                    },
                }],
            }),
        };

        let ingress = Ingress {
            metadata: object_meta(resolved),
            spec: Some(IngressSpec { rules: Some(vec![rule]), ingress_class_name: self.ingress_class_name.clone(), ..Default::default() }),
            ..Default::default()
        };

        let api: Api<Ingress> = Api::namespaced(self.client.clone(), &resolved.namespace);
        api.create(&PostParams::default(), &ingress).await.map_err(AppError::KubeError)?;
        info!(ingress = %resolved.name, namespace = %resolved.namespace, "created ingress");
        Ok(())
    }

    /// Requires `podSelector.matchLabels` in the resolved spec; ingress and
    /// egress rules and `policyTypes` are optional, defaulting to a single
    /// `Ingress` policy type with no rules (deny-all on the selected pods).
    pub async fn create_network_policy(&self, resolved: &ResolvedObject) -> Result<(), AppError> {
        let pod_selector = resolved
            .spec
            .get("podSelector")
            .and_then(|s| s.get("matchLabels"))
            .and_then(Value::as_object)
            .ok_or_else(|| AppError::ValidationError(format!("network policy {} missing podSelector.matchLabels", resolved.name)))?;
        let pod_selector = LabelSelector { match_labels: Some(match_labels_from(pod_selector)), ..Default::default() };

        let ingress_rules: Vec<NetworkPolicyIngressRule> = resolved
            .spec
            .get("ingress")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
            .iter()
            .map(|rule| NetworkPolicyIngressRule {
                from: rule.get("from").and_then(Value::as_array).map(|peers| peers.iter().map(network_policy_peer).collect()),
                ports: rule.get("ports").and_then(Value::as_array).map(|ports| ports.iter().filter_map(network_policy_port).collect()),
            })
            .collect();

        let egress_rules: Vec<NetworkPolicyEgressRule> = resolved
            .spec
            .get("egress")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
            .iter()
            .map(|rule| NetworkPolicyEgressRule {
                to: rule.get("to").and_then(Value::as_array).map(|peers| peers.iter().map(network_policy_peer).collect()),
                ports: rule.get("ports").and_then(Value::as_array).map(|ports| ports.iter().filter_map(network_policy_port).collect()),
            })
            .collect();

        let policy_types = resolved
            .spec
            .get("policyTypes")
            .and_then(Value::as_array)
            .map(|types| types.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_else(|| vec!["Ingress".to_string()]);

        let policy = NetworkPolicy {
            metadata: object_meta(resolved),
            spec: Some(NetworkPolicySpec {
                pod_selector: Some(pod_selector),
                policy_types: Some(policy_types),
                ingress: if ingress_rules.is_empty() { None } else { Some(ingress_rules) },
                egress: if egress_rules.is_empty() { None } else { Some(egress_rules) },
            }),
            ..Default::default()
        };

        let api: Api<NetworkPolicy> = Api::namespaced(self.client.clone(), &resolved.namespace);
        api.create(&PostParams::default(), &policy).await.map_err(AppError::KubeError)?;
        info!(network_policy = %resolved.name, namespace = %resolved.namespace, "created network policy");
        Ok(())
    }

    pub async fn create_flag_secret(&self, namespace: &str, name: &str, flag: &str, labels: &BTreeMap<String, String>) -> Result<(), AppError> {
        let mut string_data = BTreeMap::new();
        string_data.insert("flag".to_string(), flag.to_string());
        self.create_secret(namespace, name, string_data, labels).await
    }

    pub async fn create_secret(&self, namespace: &str, name: &str, string_data: BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> Result<(), AppError> {
        let secret = Secret {
            metadata: ObjectMeta { name: Some(name.to_string()), namespace: Some(namespace.to_string()), labels: Some(labels.clone()), ..Default::default() },
            string_data: Some(string_data),
            ..Default::default()
        };

        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.create(&PostParams::default(), &secret).await {
            Ok(_) => {
                info!(secret = name, namespace, "created secret");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                let patch = serde_json::json!({ "stringData": secret.string_data });
                api.patch(name, &PatchParams::default(), &Patch::Merge(patch)).await.map_err(AppError::KubeError)?;
                Ok(())
            }
            Err(e) => Err(AppError::KubeError(e)),
        }
    }

    pub async fn get_pod_status(&self, namespace: &str, pod_name: &str) -> Result<Option<PodStatus>, AppError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.get(pod_name).await {
            Ok(pod) => Ok(Some(standardize_pod_status(&pod))),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(AppError::KubeError(e)),
        }
    }

    /// Fetches the raw pod so callers needing fields beyond the
    /// standardized status (labels, node, podIP, container list) can read
    /// them directly.
    pub async fn get_pod(&self, namespace: &str, pod_name: &str) -> Result<Option<Pod>, AppError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.get(pod_name).await {
            Ok(pod) => Ok(Some(pod)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(AppError::KubeError(e)),
        }
    }

    pub async fn list_challenge_pods(&self, namespace: &str) -> Result<Vec<Pod>, AppError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = kube::api::ListParams::default().labels(&format!("{CHALLENGE_LABEL}={CHALLENGE_LABEL_VALUE}"));
        let list = api.list(&params).await.map_err(AppError::KubeError)?;
        Ok(list.items)
    }

    /// Reads a secret's string data, trying `secret_name` first and then
    /// `<secret_name>-flag` so callers can pass either an instance name or
    /// its already-suffixed flag secret name.
    pub async fn get_secret_value(&self, namespace: &str, secret_name: &str, key: &str) -> Result<Option<String>, AppError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);

        for candidate in [secret_name.to_string(), format!("{secret_name}-flag")] {
            match api.get(&candidate).await {
                Ok(secret) => {
                    if let Some(data) = secret.string_data.as_ref().and_then(|d| d.get(key)) {
                        return Ok(Some(data.clone()));
                    }
                    if let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(key)) {
                        return Ok(Some(String::from_utf8_lossy(&bytes.0).to_string()));
                    }
                }
                Err(kube::Error::Api(e)) if e.code == 404 => continue,
                Err(e) => return Err(AppError::KubeError(e)),
            }
        }

        Ok(None)
    }

    /// Deletes every object labeled `instance=<name>`, sweeping kinds in
    /// the order Ingress, Service, Pod, ConfigMap, Secret, Deployment,
    /// StatefulSet so dependents go before owners, with foreground
    /// propagation so the caller can observe completion.
    pub async fn delete_by_instance_label(&self, namespace: &str, instance_name: &str) -> Result<Vec<String>, AppError> {
        let selector = format!("instance={instance_name}");
        let params = kube::api::ListParams::default().labels(&selector);
        let delete_params = DeleteParams { propagation_policy: Some(PropagationPolicy::Foreground), ..Default::default() };
        let mut deleted_kinds = Vec::new();

        macro_rules! sweep {
            ($ty:ty, $kind:literal) => {{
                let api: Api<$ty> = Api::namespaced(self.client.clone(), namespace);
                match api.list(&params).await {
                    Ok(list) if !list.items.is_empty() => {
                        deleted_kinds.push($kind.to_string());
                        for item in &list.items {
                            if let Some(name) = &item.metadata.name {
                                if let Err(e) = api.delete(name, &delete_params).await {
                                    warn!(kind = $kind, name, error = %e, "failed to delete object during instance cleanup");
                                }
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!(kind = $kind, error = %e, "failed to list objects during instance cleanup"),
                }
            }};
        }

        sweep!(Ingress, "Ingress");
        sweep!(Service, "Service");
        sweep!(Pod, "Pod");
        sweep!(k8s_openapi::api::core::v1::ConfigMap, "ConfigMap");
        sweep!(Secret, "Secret");
        sweep!(k8s_openapi::api::apps::v1::Deployment, "Deployment");
        sweep!(k8s_openapi::api::apps::v1::StatefulSet, "StatefulSet");

        Ok(deleted_kinds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_meta_copies_labels_from_resolved_object() {
        let mut labels = std::collections::HashMap::new();
        labels.insert("instance".to_string(), "chal-1".to_string());
        let resolved = ResolvedObject { kind: "Pod".into(), name: "chal-1".into(), namespace: "default".into(), labels, spec: Value::Null };
        let meta = object_meta(&resolved);
        assert_eq!(meta.name.unwrap(), "chal-1");
        assert_eq!(meta.labels.unwrap().get("instance").unwrap(), "chal-1");
    }
}
