use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use tracing::warn;

use crate::apps_config::build_apps_config;
use crate::flag::{flag_secret_name, generate_db_credentials, generate_flag, DbCredentials};
use crate::types::Cdf;

#[cfg(test)]
use crate::types::CdfMetadata;

const SQL_INJECTION_CHALLENGE_TYPE: &str = "sql-injection";

static VAR_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{([^{}]+)\}\}").unwrap());

/// The per-deployment substitution map: `INSTANCE_NAME`, `DOMAIN`,
/// `USER_ID`, `FLAG`, and whatever a challenge type layers on top.
#[derive(Clone, Debug, Default)]
pub struct InstanceContext {
    values: HashMap<String, String>,
}

impl InstanceContext {
    pub fn new() -> Self {
        Self { values: HashMap::new() }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn as_map(&self) -> &HashMap<String, String> {
        &self.values
    }

    /// Substitutes `{{NAME}}` placeholders. The `{{INSTANCE_NAME}}.{{DOMAIN}}`
    /// pair is resolved as a single unit first (preferring a precomputed
    /// `INSTANCE_NAME.DOMAIN` entry), then remaining placeholders are
    /// substituted independently. Unresolved names are left in place.
    pub fn substitute(&self, template: &str) -> String {
        let joined_pattern = "{{INSTANCE_NAME}}.{{DOMAIN}}";
        let resolved = if template.contains(joined_pattern) {
            let joined = self.values.get("INSTANCE_NAME.DOMAIN").cloned().or_else(|| {
                match (self.values.get("INSTANCE_NAME"), self.values.get("DOMAIN")) {
                    (Some(instance), Some(domain)) => Some(format!("{instance}.{domain}")),
                    _ => None,
                }
            });
            match joined {
                Some(joined) => template.replace(joined_pattern, &joined),
                None => template.to_string(),
            }
        } else {
            template.to_string()
        };

        VAR_PATTERN
            .replace_all(&resolved, |caps: &regex::Captures| {
                let name = caps[1].trim();
                match self.values.get(name) {
                    Some(value) => value.clone(),
                    None => {
                        warn!(variable = name, "template variable not found in instance context");
                        caps[0].to_string()
                    }
                }
            })
            .into_owned()
    }
}

/// Builds the per-instance substitution context a worker needs before
/// calling [`crate::resolve`], plus the generated flag value so the
/// caller can report it back to the platform once deployment succeeds.
/// For the `sql-injection` challenge type, also generates a database
/// password pair and returns it so the caller can create its secret.
pub fn build_instance_context(cdf: &Cdf, deployment_name: &str, competition_id: &str, user_id: &str, domain: &str) -> (InstanceContext, String, Option<DbCredentials>) {
    let challenge_id = cdf.challenge_id(deployment_name);
    let flag = generate_flag(&challenge_id);
    let secret_name = flag_secret_name(deployment_name);
    let apps_config = build_apps_config(cdf, &secret_name);

    let mut context = InstanceContext::new();
    context.insert("INSTANCE_NAME", deployment_name);
    context.insert("DOMAIN", domain);
    context.insert("USER_ID", user_id);
    context.insert("COMPETITION_ID", competition_id);
    context.insert("CHALLENGE_TYPE", cdf.metadata.challenge_type.clone());
    context.insert("FLAG", flag.clone());
    context.insert("FLAG_SECRET_NAME", secret_name);
    context.insert("APPS_CONFIG", apps_config.to_string());

    let db_credentials = if cdf.metadata.challenge_type == SQL_INJECTION_CHALLENGE_TYPE {
        let credentials = generate_db_credentials(deployment_name);
        context.insert("DB_SECRET_NAME", credentials.secret_name.clone());
        context.insert("RANDOM_PASSWORD", credentials.password.clone());
        context.insert("RANDOM_ROOT_PASSWORD", credentials.root_password.clone());
        Some(credentials)
    } else {
        None
    };

    (context, flag, db_credentials)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_variables() {
        let mut ctx = InstanceContext::new();
        ctx.insert("USER_ID", "alice");
        assert_eq!(ctx.substitute("user-{{USER_ID}}"), "user-alice");
    }

    #[test]
    fn leaves_unknown_variables_untouched() {
        let ctx = InstanceContext::new();
        assert_eq!(ctx.substitute("{{MISSING}}"), "{{MISSING}}");
    }

    #[test]
    fn joins_instance_name_and_domain_as_a_unit() {
        let mut ctx = InstanceContext::new();
        ctx.insert("INSTANCE_NAME", "chal-1");
        ctx.insert("DOMAIN", "edurange.cloud");
        assert_eq!(ctx.substitute("https://{{INSTANCE_NAME}}.{{DOMAIN}}/"), "https://chal-1.edurange.cloud/");
    }

    #[test]
    fn prefers_precomputed_joined_entry() {
        let mut ctx = InstanceContext::new();
        ctx.insert("INSTANCE_NAME.DOMAIN", "override.example.com");
        ctx.insert("INSTANCE_NAME", "chal-1");
        ctx.insert("DOMAIN", "edurange.cloud");
        assert_eq!(ctx.substitute("{{INSTANCE_NAME}}.{{DOMAIN}}"), "override.example.com");
    }

    fn cdf_with_challenge_type(challenge_type: &str) -> Cdf {
        Cdf {
            metadata: CdfMetadata { id: None, name: "test".to_string(), challenge_type: challenge_type.to_string(), difficulty: None, description: None },
            components: Vec::new(),
            type_config: Default::default(),
            variables: Default::default(),
            templates: Vec::new(),
        }
    }

    #[test]
    fn sql_injection_challenge_type_generates_db_credentials() {
        let cdf = cdf_with_challenge_type(SQL_INJECTION_CHALLENGE_TYPE);
        let (context, _flag, db_credentials) = build_instance_context(&cdf, "chal-1", "comp-1", "alice", "edurange.cloud");

        let credentials = db_credentials.expect("sql-injection challenge type must generate db credentials");
        assert_eq!(context.get("DB_SECRET_NAME"), Some(credentials.secret_name.as_str()));
        assert_eq!(context.get("RANDOM_PASSWORD"), Some(credentials.password.as_str()));
        assert_eq!(context.get("RANDOM_ROOT_PASSWORD"), Some(credentials.root_password.as_str()));
    }

    #[test]
    fn other_challenge_types_skip_db_credentials() {
        let cdf = cdf_with_challenge_type("web");
        let (context, _flag, db_credentials) = build_instance_context(&cdf, "chal-1", "comp-1", "alice", "edurange.cloud");

        assert!(db_credentials.is_none());
        assert_eq!(context.get("DB_SECRET_NAME"), None);
    }
}
