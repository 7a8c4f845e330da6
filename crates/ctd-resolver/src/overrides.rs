use serde_json::Value;
use tracing::{debug, warn};

use crate::types::{Ctd, CtdContainer, EnvEntry, ExtensionPoint};

/// Applies `typeConfig` overrides to a resolved set of containers.
/// For each extension point whose key appears in `type_config`, locate the
/// target container by name and apply the override at `extension.property`.
/// Only `image` and `env` are supported; anything else is logged and
/// skipped, matching how the original template resolver treats unknown
/// extension properties as non-fatal.
pub fn apply_type_config_overrides(containers: &mut [CtdContainer], ctd: &Ctd, type_config: &serde_json::Map<String, Value>) {
    for (key, extension) in &ctd.extension_points {
        let Some(override_value) = type_config.get(key) else {
            continue;
        };

        let Some(container) = containers.iter_mut().find(|c| c.name == extension.container) else {
            warn!(container = extension.container, extension = key, "typeConfig override target container not found");
            continue;
        };

        apply_override(container, extension, override_value, key);
    }
}

fn apply_override(container: &mut CtdContainer, extension: &ExtensionPoint, value: &Value, key: &str) {
    match extension.property.as_str() {
        "image" => {
            if let Some(image) = value.as_str() {
                debug!(container = %container.name, extension = key, "applying image override");
                container.image = image.to_string();
            } else {
                warn!(extension = key, "image override value is not a string");
            }
        }
        "env" => {
            let Some(name) = value.get("name").and_then(Value::as_str) else {
                warn!(extension = key, "env override missing 'name' field");
                return;
            };
            let new_value = value.get("value").and_then(Value::as_str).unwrap_or_default().to_string();

            if let Some(existing) = container.env.iter_mut().find(|e| e.name == name) {
                existing.value = new_value;
            } else {
                container.env.push(EnvEntry { name: name.to_string(), value: new_value });
            }
        }
        other => {
            warn!(property = other, extension = key, "unsupported typeConfig override path, skipping");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_containers() -> Vec<CtdContainer> {
        vec![CtdContainer {
            name: "app".into(),
            image: "registry/base:latest".into(),
            env: vec![EnvEntry { name: "MODE".into(), value: "default".into() }],
            ports: vec![],
            volumes: vec![],
            security_context: None,
        }]
    }

    fn sample_ctd() -> Ctd {
        let mut extension_points = HashMap::new();
        extension_points.insert("customImage".to_string(), ExtensionPoint { container: "app".into(), property: "image".into() });
        extension_points.insert("mode".to_string(), ExtensionPoint { container: "app".into(), property: "env".into() });

        Ctd {
            type_id: "test-type".into(),
            version: None,
            description: None,
            containers: vec![],
            services: vec![],
            ingresses: vec![],
            network_policies: vec![],
            extension_points,
        }
    }

    #[test]
    fn applies_image_override() {
        let mut containers = sample_containers();
        let ctd = sample_ctd();
        let mut type_config = serde_json::Map::new();
        type_config.insert("customImage".into(), serde_json::json!("registry/custom:v2"));

        apply_type_config_overrides(&mut containers, &ctd, &type_config);
        assert_eq!(containers[0].image, "registry/custom:v2");
    }

    #[test]
    fn applies_env_override_by_updating_existing_entry() {
        let mut containers = sample_containers();
        let ctd = sample_ctd();
        let mut type_config = serde_json::Map::new();
        type_config.insert("mode".into(), serde_json::json!({"name": "MODE", "value": "debug"}));

        apply_type_config_overrides(&mut containers, &ctd, &type_config);
        assert_eq!(containers[0].env[0].value, "debug");
    }

    #[test]
    fn skips_unsupported_property_without_panicking() {
        let mut containers = sample_containers();
        let mut ctd = sample_ctd();
        ctd.extension_points.insert("volumes".to_string(), ExtensionPoint { container: "app".into(), property: "volumeMounts".into() });
        let mut type_config = serde_json::Map::new();
        type_config.insert("volumes".into(), serde_json::json!([]));

        apply_type_config_overrides(&mut containers, &ctd, &type_config);
        assert_eq!(containers[0].image, "registry/base:latest");
    }
}
