//! # Configuration Errors
//!
//! Raised while loading configuration and while registering components at
//! startup. Everything here is meant to fail fast, before traffic is accepted.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ConfigurationError {
    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    #[error("Invalid configuration value for {field}: {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to load configuration from {source_name}: {message}")]
    Load {
        source_name: String,
        message: String,
    },

    #[error("Duplicate {kind} registration: {key}")]
    DuplicateRegistration { kind: String, key: String },

    #[error("No itinerary planner registered for sub-task type {sub_task_type}")]
    PlannerNotRegistered { sub_task_type: String },

    #[error("Itinerary planner for {sub_task_type} references unregistered activity {activity}")]
    ActivityNotRegistered {
        sub_task_type: String,
        activity: String,
    },
}

impl ConfigurationError {
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub fn invalid_value(
        field: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub fn load(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Load {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn duplicate_registration(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::DuplicateRegistration {
            kind: kind.into(),
            key: key.into(),
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;
