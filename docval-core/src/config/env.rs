//! Environment variable interpolation for configuration

use super::error::ConfigError;
use regex::Regex;
use std::env;
use std::sync::LazyLock;

/// `${VAR}` placeholders
pub(crate) static ENV_VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern"));

/// Interpolate environment variables in a configuration string
///
/// Every placeholder must resolve; the first missing variable is reported.
pub fn interpolate_env_vars(content: &str) -> Result<String, ConfigError> {
    interpolate_with(content, |name| env::var(name).ok())
}

fn interpolate_with<F>(content: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing = None;
    let result = ENV_VAR_PATTERN.replace_all(content, |cap: &regex::Captures<'_>| {
        match lookup(&cap[1]) {
            Some(value) => value,
            None => {
                missing.get_or_insert_with(|| cap[1].to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(var) => Err(ConfigError::MissingEnvVar { var }),
        None => Ok(result.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_interpolate_env_vars() {
        let vars = lookup(&[("TEST_VAR", "test_value")]);
        let result = interpolate_with("api_key: ${TEST_VAR}", vars).unwrap();
        assert_eq!(result, "api_key: test_value");
    }

    #[test]
    fn test_missing_env_var() {
        match interpolate_with("api_key: ${MISSING_VAR}", lookup(&[])) {
            Err(ConfigError::MissingEnvVar { var }) => assert_eq!(var, "MISSING_VAR"),
            other => panic!("Expected MissingEnvVar error, got {:?}", other),
        }
    }

    #[test]
    fn test_multiple_env_vars() {
        let result = interpolate_with(
            "key1: ${VAR1}, key2: ${VAR2}, again: ${VAR1}",
            lookup(&[("VAR1", "value1"), ("VAR2", "value2")]),
        )
        .unwrap();
        assert_eq!(result, "key1: value1, key2: value2, again: value1");
    }

    #[test]
    fn test_lowercase_placeholders_are_left_alone() {
        let result = interpolate_with("path: ${home}", lookup(&[])).unwrap();
        assert_eq!(result, "path: ${home}");
    }
}
