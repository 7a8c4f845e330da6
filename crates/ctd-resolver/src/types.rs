use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CdfMetadata {
    pub id: Option<String>,
    pub name: String,
    pub challenge_type: String,
    pub difficulty: Option<String>,
    pub description: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CdfComponent {
    WebosApp(WebosAppComponent),
    Question(QuestionComponent),
    Container(Map<String, Value>),
    ConfigMap(Map<String, Value>),
    Secret(Map<String, Value>),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebosAppComponent {
    pub id: String,
    pub icon: Option<String>,
    pub title: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub screen: Option<String>,
    pub disabled: Option<bool>,
    pub favourite: Option<bool>,
    pub desktop_shortcut: Option<bool>,
    pub launch_on_startup: Option<bool>,
    #[serde(default)]
    pub additional_config: Map<String, Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuestionComponent {
    pub id: String,
    #[serde(rename = "type")]
    pub question_type: String,
    pub prompt: Option<String>,
    pub text: Option<String>,
    pub points: Option<i64>,
    pub answer: Option<String>,
    pub explanation: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cdf {
    pub metadata: CdfMetadata,
    pub components: Vec<CdfComponent>,
    #[serde(default)]
    pub type_config: Map<String, Value>,
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub templates: Vec<Value>,
}

impl Cdf {
    pub fn challenge_id(&self, deployment_name: &str) -> String {
        self.metadata.id.clone().unwrap_or_else(|| deployment_name.to_string())
    }

    pub fn questions(&self) -> Vec<&QuestionComponent> {
        self.components
            .iter()
            .filter_map(|c| match c {
                CdfComponent::Question(q) => Some(q),
                _ => None,
            })
            .collect()
    }

    pub fn webos_apps(&self) -> Vec<&WebosAppComponent> {
        self.components
            .iter()
            .filter_map(|c| match c {
                CdfComponent::WebosApp(a) => Some(a),
                _ => None,
            })
            .collect()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvEntry {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CtdContainer {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub env: Vec<EnvEntry>,
    #[serde(default)]
    pub ports: Vec<Value>,
    #[serde(default)]
    pub volumes: Vec<Value>,
    #[serde(default)]
    pub security_context: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtensionPoint {
    pub container: String,
    pub property: String,
}

/// A loaded, schema-validated Challenge Type Definition. Structurally
/// templated: container images, env values and service/ingress bodies
/// still contain `{{NAME}}` placeholders until resolved against an
/// instance context.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ctd {
    #[serde(rename = "typeId")]
    pub type_id: String,
    pub version: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub containers: Vec<CtdContainer>,
    #[serde(default)]
    pub services: Vec<Value>,
    #[serde(default)]
    pub ingresses: Vec<Value>,
    #[serde(rename = "networkPolicies", default)]
    pub network_policies: Vec<Value>,
    #[serde(rename = "extensionPoints", default)]
    pub extension_points: std::collections::HashMap<String, ExtensionPoint>,
}

/// One fully-resolved Kubernetes object ready for the adapter to create.
/// `spec` carries the substituted object body verbatim; the adapter
/// decides how to deserialize it into a concrete typed request.
#[derive(Clone, Debug, Serialize)]
pub struct ResolvedObject {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub labels: std::collections::HashMap<String, String>,
    pub spec: Value,
}
