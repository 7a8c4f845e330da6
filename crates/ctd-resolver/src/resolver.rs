use serde_json::Value;
use shared::AppError;
use std::collections::HashMap;

use crate::context::InstanceContext;
use crate::overrides::apply_type_config_overrides;
use crate::types::{Cdf, Ctd, CtdContainer, ResolvedObject};

fn sanitize_label(value: &str) -> String {
    let mut sanitized: String = value
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' { c } else { '-' })
        .collect();

    while sanitized.starts_with(|c: char| !c.is_ascii_alphanumeric()) {
        sanitized.remove(0);
    }
    while sanitized.ends_with(|c: char| !c.is_ascii_alphanumeric()) {
        sanitized.pop();
    }
    sanitized.truncate(63);

    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized
    }
}

fn substitute_value(value: &Value, context: &InstanceContext) -> Value {
    match value {
        Value::String(s) => Value::String(context.substitute(s)),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute_value(v, context)).collect()),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), substitute_value(v, context))).collect()),
        other => other.clone(),
    }
}

fn substitute_container(container: &CtdContainer, context: &InstanceContext) -> CtdContainer {
    CtdContainer {
        name: container.name.clone(),
        image: context.substitute(&container.image),
        env: container
            .env
            .iter()
            .map(|e| crate::types::EnvEntry { name: e.name.clone(), value: context.substitute(&e.value) })
            .collect(),
        ports: container.ports.iter().map(|p| substitute_value(p, context)).collect(),
        volumes: container.volumes.iter().map(|v| substitute_value(v, context)).collect(),
        security_context: container.security_context.as_ref().map(|v| substitute_value(v, context)),
    }
}

fn base_labels(instance_name: &str, context: &InstanceContext, challenge_type: &str, challenge_name: &str) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    labels.insert("app".to_string(), "ctfchal".to_string());
    labels.insert("instance".to_string(), sanitize_label(instance_name));
    if let Some(user) = context.get("USER_ID") {
        labels.insert("user".to_string(), sanitize_label(user));
    }
    if let Some(competition) = context.get("COMPETITION_ID") {
        labels.insert("competition_id".to_string(), sanitize_label(competition));
    }
    labels.insert("challenge_type".to_string(), sanitize_label(challenge_type));
    labels.insert("challenge_name".to_string(), sanitize_label(challenge_name));
    labels
}

/// Resolves a CTD against a CDF and an instance context into the ordered
/// list of Kubernetes object specs the adapter should create. Performs
/// steps 5-6 of the resolution pipeline: substitution and typeConfig
/// overrides. Flag/secret generation and APPS_CONFIG assembly happen
/// upstream and feed their results into `context` before this is called.
pub fn resolve(cdf: &Cdf, ctd: &Ctd, context: &InstanceContext, namespace: &str) -> Result<Vec<ResolvedObject>, AppError> {
    let instance_name = context.get("INSTANCE_NAME").ok_or_else(|| AppError::ValidationError("instance context missing INSTANCE_NAME".to_string()))?;
    let challenge_name = cdf.challenge_id(instance_name);

    let mut containers: Vec<CtdContainer> = ctd.containers.iter().map(|c| substitute_container(c, context)).collect();
    apply_type_config_overrides(&mut containers, ctd, &cdf.type_config);

    let labels = base_labels(instance_name, context, &cdf.metadata.challenge_type, &challenge_name);

    let mut objects = Vec::new();

    objects.push(ResolvedObject {
        kind: "Pod".to_string(),
        name: instance_name.to_string(),
        namespace: namespace.to_string(),
        labels: labels.clone(),
        spec: serde_json::json!({ "containers": containers }),
    });

    for (idx, service) in ctd.services.iter().enumerate() {
        let resolved = substitute_value(service, context);
        let name = resolved.get("name").and_then(Value::as_str).map(String::from).unwrap_or_else(|| format!("{instance_name}-svc-{idx}"));
        objects.push(ResolvedObject { kind: "Service".to_string(), name, namespace: namespace.to_string(), labels: labels.clone(), spec: resolved });
    }

    for (idx, ingress) in ctd.ingresses.iter().enumerate() {
        let resolved = substitute_value(ingress, context);
        let name = resolved.get("name").and_then(Value::as_str).map(String::from).unwrap_or_else(|| format!("{instance_name}-ing-{idx}"));
        objects.push(ResolvedObject { kind: "Ingress".to_string(), name, namespace: namespace.to_string(), labels: labels.clone(), spec: resolved });
    }

    for (idx, policy) in ctd.network_policies.iter().enumerate() {
        let resolved = substitute_value(policy, context);
        let name = resolved.get("name").and_then(Value::as_str).map(String::from).unwrap_or_else(|| format!("{instance_name}-np-{idx}"));
        objects.push(ResolvedObject { kind: "NetworkPolicy".to_string(), name, namespace: namespace.to_string(), labels: labels.clone(), spec: resolved });
    }

    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CdfMetadata, EnvEntry, ExtensionPoint};
    use std::collections::HashMap as StdHashMap;

    fn sample_ctd() -> Ctd {
        Ctd {
            type_id: "webos".into(),
            version: None,
            description: None,
            containers: vec![CtdContainer {
                name: "app".into(),
                image: "registry/{{CHALLENGE_TYPE}}:latest".into(),
                env: vec![EnvEntry { name: "FLAG".into(), value: "{{FLAG}}".into() }],
                ports: vec![],
                volumes: vec![],
                security_context: None,
            }],
            services: vec![],
            ingresses: vec![],
            network_policies: vec![],
            extension_points: StdHashMap::new(),
        }
    }

    fn sample_cdf() -> Cdf {
        Cdf {
            metadata: CdfMetadata { id: Some("chal-1".into()), name: "test".into(), challenge_type: "webos".into(), difficulty: None, description: None },
            components: vec![],
            type_config: serde_json::Map::new(),
            variables: serde_json::Map::new(),
            templates: vec![],
        }
    }

    #[test]
    fn resolves_pod_with_substituted_image_and_env() {
        let ctd = sample_ctd();
        let cdf = sample_cdf();
        let mut context = InstanceContext::new();
        context.insert("INSTANCE_NAME", "chal-1-alice");
        context.insert("CHALLENGE_TYPE", "webos");
        context.insert("FLAG", "flag{abc}");

        let objects = resolve(&cdf, &ctd, &context, "default").unwrap();
        let pod = &objects[0];
        assert_eq!(pod.kind, "Pod");
        assert_eq!(pod.labels.get("instance").unwrap(), "chal-1-alice");
        let containers = pod.spec["containers"].as_array().unwrap();
        assert_eq!(containers[0]["image"], "registry/webos:latest");
        assert_eq!(containers[0]["env"][0]["value"], "flag{abc}");
    }

    #[test]
    fn fails_without_instance_name_in_context() {
        let ctd = sample_ctd();
        let cdf = sample_cdf();
        let context = InstanceContext::new();
        assert!(resolve(&cdf, &ctd, &context, "default").is_err());
    }

    #[test]
    fn sanitize_label_lowercases_to_valid_dns_label_form() {
        assert_eq!(sanitize_label("Alice"), "alice");
        assert_eq!(sanitize_label("User_Name.42"), "user_name.42");
    }
}
