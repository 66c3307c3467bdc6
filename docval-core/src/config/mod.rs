//! Configuration for the orchestration layer
//!
//! Backends, client resilience settings, routing defaults, cache TTLs and
//! budget caps, loaded from YAML or JSON with `${ENV}` interpolation.

mod env;
mod error;
mod schema;
mod secrets;
mod validator;

pub use env::interpolate_env_vars;
pub use error::{ConfigError, ConfigResult, ValidationError, ValidationErrorKind};
pub use schema::{
    BackendConfig, BudgetConfig, CacheConfig, ClientConfig, ConstraintsConfig, CostConfig,
    DocvalConfig, LatencyConfig, RoutingConfig,
};
pub use secrets::{SafeLogging, SecretString};
pub use validator::ConfigValidator;

use std::fs;
use std::path::Path;

fn read(path: &Path) -> ConfigResult<String> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_string_lossy().to_string(),
        source: e,
    })?;
    // Interpolate environment variables before parsing
    env::interpolate_env_vars(&content)
}

/// Load a configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> ConfigResult<DocvalConfig> {
    let path = path.as_ref();
    let content = read(path)?;
    parse_yaml(&content, &path.to_string_lossy())
}

/// Load a configuration from a JSON file
pub fn load_from_json<P: AsRef<Path>>(path: P) -> ConfigResult<DocvalConfig> {
    let path = path.as_ref();
    let content = read(path)?;

    let config: DocvalConfig = serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_string_lossy().to_string(),
        line: Some(e.line()),
        column: Some(e.column()),
        message: e.to_string(),
    })?;

    ConfigValidator::new().validate(&config)?;
    Ok(config)
}

/// Parse and validate already-interpolated YAML
pub fn parse_yaml(content: &str, origin: &str) -> ConfigResult<DocvalConfig> {
    let config: DocvalConfig = serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
        path: origin.to_string(),
        line: e.location().map(|l| l.line()),
        column: e.location().map(|l| l.column()),
        message: e.to_string(),
    })?;

    ConfigValidator::new().validate(&config)?;
    Ok(config)
}
