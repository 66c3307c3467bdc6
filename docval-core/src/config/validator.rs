//! Configuration validation utilities

use super::env::ENV_VAR_PATTERN;
use super::error::{ValidationError, ValidationErrorKind};
use super::schema::DocvalConfig;
use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

static SENSITIVE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(api_key|secret|token|password|credential)").expect("valid sensitive pattern")
});

/// Configuration validator with cross-field rules
#[derive(Debug, Default)]
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a configuration with extended rules
    pub fn validate(&self, config: &DocvalConfig) -> Result<(), ValidationError> {
        // First run the built-in validation
        config.validate()?;

        self.validate_enabled(config)?;
        self.validate_credentials(config)?;
        self.validate_overrides(config)?;
        self.validate_budget(config);

        Ok(())
    }

    fn validate_enabled(&self, config: &DocvalConfig) -> Result<(), ValidationError> {
        if config.enabled_backends().next().is_none() {
            return Err(ValidationError::new("backends", ValidationErrorKind::NoEnabledBackend));
        }
        Ok(())
    }

    /// Cloud backends must carry a resolved API key
    fn validate_credentials(&self, config: &DocvalConfig) -> Result<(), ValidationError> {
        for (i, backend) in config.backends.iter().enumerate() {
            if !backend.enabled || !backend.kind.requires_api_key() {
                continue;
            }
            let path = format!("backends[{}].api_key", i);
            let missing = || {
                ValidationError::new(
                    path.clone(),
                    ValidationErrorKind::MissingCredential {
                        backend: backend.name.clone(),
                    },
                )
            };
            match &backend.api_key {
                None => return Err(missing()),
                Some(key) if key.is_empty() => return Err(missing().with_hint("key is blank")),
                Some(key) => {
                    if let Some(found) = ENV_VAR_PATTERN.find(key.expose_secret()) {
                        return Err(ValidationError::new(
                            path.as_str(),
                            ValidationErrorKind::UnresolvedPlaceholder {
                                placeholder: found.as_str().to_string(),
                            },
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Routing overrides must name an enabled backend
    fn validate_overrides(&self, config: &DocvalConfig) -> Result<(), ValidationError> {
        for (task, name) in &config.routing.overrides {
            if !config.enabled_backends().any(|b| &b.name == name) {
                return Err(ValidationError::new(
                    format!("routing.overrides.{}", task),
                    ValidationErrorKind::UnknownBackend { name: name.clone() },
                ));
            }
        }
        Ok(())
    }

    fn validate_budget(&self, config: &DocvalConfig) {
        let budget = &config.budget;
        let capped = budget.daily_cost_cap.is_some() || budget.daily_token_cap.is_some();
        let has_free_offline = config.enabled_backends().any(|b| {
            !b.kind.requires_api_key() && b.cost.input_per_1k == 0.0 && b.cost.output_per_1k == 0.0
        });
        if capped && config.budget.downgrade_to_offline && !has_free_offline {
            warn!("Budget downgrade is enabled but no free offline backend is configured");
        }
    }

    /// Check if a field name appears to contain sensitive information
    pub fn is_sensitive_field(&self, field_name: &str) -> bool {
        SENSITIVE_PATTERN.is_match(field_name)
    }

    /// Extract environment variables from a string
    pub fn extract_env_vars(&self, text: &str) -> Vec<String> {
        ENV_VAR_PATTERN
            .captures_iter(text)
            .map(|cap| cap[1].to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> DocvalConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_env_var_extraction() {
        let validator = ConfigValidator::new();
        let vars = validator.extract_env_vars("api_key: ${OPENAI_API_KEY}, url: ${API_BASE_URL}");
        assert_eq!(vars, vec!["OPENAI_API_KEY", "API_BASE_URL"]);
    }

    #[test]
    fn test_sensitive_field_detection() {
        let validator = ConfigValidator::new();
        assert!(validator.is_sensitive_field("api_key"));
        assert!(validator.is_sensitive_field("secret_token"));
        assert!(!validator.is_sensitive_field("model"));
    }

    #[test]
    fn test_cloud_backend_without_key_rejected() {
        let config = parse(
            r#"
version: "0.1"
backends:
  - name: gpt
    type: openai
    model: gpt-4o-mini
"#,
        );
        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert_eq!(err.field, "backends[0].api_key");
        assert_eq!(
            err.kind,
            ValidationErrorKind::MissingCredential {
                backend: "gpt".to_string()
            }
        );
    }

    #[test]
    fn test_local_backend_needs_no_key() {
        let config = parse(
            r#"
version: "0.1"
backends:
  - name: local
    type: ollama
    model: llama3
"#,
        );
        assert!(ConfigValidator::new().validate(&config).is_ok());
    }

    #[test]
    fn test_override_must_reference_enabled_backend() {
        let config = parse(
            r#"
version: "0.1"
backends:
  - name: local
    type: ollama
    model: llama3
  - name: spare
    type: ollama
    model: llama3
    enabled: false
routing:
  overrides:
    interpret_error: spare
"#,
        );
        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert_eq!(err.field, "routing.overrides.interpret_error");
    }

    #[test]
    fn test_all_disabled_rejected() {
        let config = parse(
            r#"
version: "0.1"
backends:
  - name: local
    type: ollama
    model: llama3
    enabled: false
"#,
        );
        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::NoEnabledBackend);
    }
}
