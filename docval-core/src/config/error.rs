//! Errors raised while loading a backend configuration

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config '{path}' (line {}, column {}): {message}",
            .line.unwrap_or(0), .column.unwrap_or(0))]
    Parse {
        path: String,
        line: Option<usize>,
        column: Option<usize>,
        message: String,
    },

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("environment variable '{var}' referenced by the config is not set")]
    MissingEnvVar { var: String },
}

/// A rejected field, addressed by its path (e.g. `backends[0].api_key`)
#[derive(Debug, Error)]
pub struct ValidationError {
    pub field: String,
    pub kind: ValidationErrorKind,
    pub hint: Option<String>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid config at '{}': {}", self.field, self.kind)?;
        match &self.hint {
            Some(hint) => write!(f, " ({})", hint),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationErrorKind {
    #[error("field is required")]
    Missing,

    #[error("unsupported config version '{found}', expected '{supported}'")]
    UnsupportedVersion { found: String, supported: String },

    #[error("backend name '{name}' is used more than once")]
    DuplicateBackend { name: String },

    #[error("'{name}' is not an enabled backend")]
    UnknownBackend { name: String },

    #[error("no backend is enabled")]
    NoEnabledBackend,

    #[error("backend '{backend}' needs an API key")]
    MissingCredential { backend: String },

    #[error("placeholder '{placeholder}' was not resolved")]
    UnresolvedPlaceholder { placeholder: String },

    #[error("out of range: {message}")]
    OutOfRange { message: String },

    #[error("{message}")]
    Inconsistent { message: String },

    #[error("bad URL: {message}")]
    InvalidUrl { message: String },
}

impl ValidationError {
    pub fn new(field: impl Into<String>, kind: ValidationErrorKind) -> Self {
        Self {
            field: field.into(),
            kind,
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Self::new(field, ValidationErrorKind::Missing)
    }

    pub fn out_of_range(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            field,
            ValidationErrorKind::OutOfRange {
                message: message.into(),
            },
        )
    }

    pub fn inconsistent(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            field,
            ValidationErrorKind::Inconsistent {
                message: message.into(),
            },
        )
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_field_and_hint() {
        let err = ValidationError::new(
            "routing.overrides.parse_instruction",
            ValidationErrorKind::UnknownBackend {
                name: "spare".to_string(),
            },
        )
        .with_hint("disabled backends cannot serve overrides");
        assert_eq!(
            err.to_string(),
            "invalid config at 'routing.overrides.parse_instruction': 'spare' is not an enabled backend (disabled backends cannot serve overrides)"
        );
    }

    #[test]
    fn test_validation_error_is_transparent() {
        let err: ConfigError = ValidationError::missing("backends").into();
        assert_eq!(err.to_string(), "invalid config at 'backends': field is required");
    }
}
