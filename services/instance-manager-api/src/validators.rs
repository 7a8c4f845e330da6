use once_cell::sync::Lazy;
use regex::Regex;
use shared::AppError;

static DNS_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z]([-a-z0-9]*[a-z0-9])?$").unwrap());
static TEMPLATE_VAR_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());

/// Metacharacters and shell operators that could chain into another
/// command if this string were ever interpolated into one. Rejecting
/// these at ingress means downstream code never has to think about it.
const SHELL_METACHARACTERS: &[char] = &[';', '|', '&', '$', '`', '>', '<', '\n', '\\', '(', ')', '{', '}'];
const DANGEROUS_BINARIES: &[&str] = &["rm", "curl", "wget", "nc", "bash", "sh", "eval", "exec"];

pub fn validate_dns_label_or_uuid(name: &str) -> Result<(), AppError> {
    if DNS_LABEL.is_match(name) && name.len() <= 63 {
        return Ok(());
    }
    if uuid::Uuid::parse_str(name).is_ok() {
        return Ok(());
    }
    Err(AppError::ValidationError(format!("'{name}' is not a valid DNS label or UUID")))
}

pub fn validate_dns_label(name: &str) -> Result<(), AppError> {
    if DNS_LABEL.is_match(name) && name.len() <= 63 {
        Ok(())
    } else {
        Err(AppError::ValidationError(format!("'{name}' is not a valid DNS label")))
    }
}

pub fn validate_command(command: &str) -> Result<(), AppError> {
    if command.chars().any(|c| SHELL_METACHARACTERS.contains(&c)) {
        return Err(AppError::ValidationError("command contains shell metacharacters".to_string()));
    }
    let first_word = command.split_whitespace().next().unwrap_or("");
    if DANGEROUS_BINARIES.contains(&first_word) {
        return Err(AppError::ValidationError(format!("command '{first_word}' is not permitted")));
    }
    Ok(())
}

pub fn validate_flag(flag: &str) -> Result<(), AppError> {
    if flag.len() > 1000 {
        return Err(AppError::ValidationError("flag must be at most 1000 bytes".to_string()));
    }
    Ok(())
}

/// Template variable values must be scalar strings, not composite
/// (array/object) values, and bounded the same as flags.
pub fn validate_template_variable(key: &str, value: &str) -> Result<(), AppError> {
    if !TEMPLATE_VAR_KEY.is_match(key) {
        return Err(AppError::ValidationError(format!("'{key}' is not a valid template variable key")));
    }
    if value.len() > 1000 {
        return Err(AppError::ValidationError(format!("template variable '{key}' value exceeds 1000 bytes")));
    }
    if serde_json::from_str::<serde_json::Value>(value).is_ok_and(|v| v.is_array() || v.is_object()) {
        return Err(AppError::ValidationError(format!("template variable '{key}' must not be a composite value")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_dns_labels_and_uuids() {
        assert!(validate_dns_label_or_uuid("web-abc123").is_ok());
        assert!(validate_dns_label_or_uuid("550e8400-e29b-41d4-a716-446655440000").is_ok());
    }

    #[test]
    fn rejects_uppercase_and_overlong_labels() {
        assert!(validate_dns_label_or_uuid("Web-ABC").is_err());
        assert!(validate_dns_label("-leading-dash").is_err());
    }

    #[test]
    fn rejects_commands_with_shell_metacharacters() {
        assert!(validate_command("ls; rm -rf /").is_err());
        assert!(validate_command("echo hello").is_ok());
    }

    #[test]
    fn rejects_dangerous_binaries() {
        assert!(validate_command("curl http://evil").is_err());
    }

    #[test]
    fn rejects_composite_template_values() {
        assert!(validate_template_variable("FOO", "[1,2,3]").is_err());
        assert!(validate_template_variable("FOO", "plain").is_ok());
        assert!(validate_template_variable("bad key", "plain").is_err());
    }
}
