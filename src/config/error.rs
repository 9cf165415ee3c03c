//! Configuration errors.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// File or environment source could not be read or parsed
    #[error("Failed to load configuration from {source_name}: {error}")]
    Load { source_name: String, error: String },

    /// Required configuration directory does not exist
    #[error("Configuration directory not found: {}", path.display())]
    DirectoryNotFound { path: PathBuf },

    #[error("Invalid value for {field}: {value} ({context})")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },

    #[error("Missing required configuration field: {field} in {component}")]
    MissingRequiredField { field: String, component: String },
}

impl ConfigurationError {
    pub fn load(source_name: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::Load {
            source_name: source_name.into(),
            error: error.to_string(),
        }
    }

    pub fn invalid_value(
        field: impl Into<String>,
        value: impl std::fmt::Display,
        context: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            context: context.into(),
        }
    }

    pub fn missing_required_field(field: impl Into<String>, component: impl Into<String>) -> Self {
        Self::MissingRequiredField {
            field: field.into(),
            component: component.into(),
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        Self::load("config sources", err)
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;
