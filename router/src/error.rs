//! Typed errors for template loading, definition loading and mount resolution.
//!
//! Every variant names the resource logical id and the property that caused it so the caller can
//! report an actionable message.

use thiserror::Error;

/// Failures while obtaining an api resource's description document.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("api {api}: neither DefinitionUri nor DefinitionBody is set")]
    NotFound { api: String },

    #[error("api {api}: cannot read {property}: {source}")]
    Unreadable {
        api: String,
        property: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("api {api}: {property} is neither valid JSON nor YAML: {reason}")]
    Malformed {
        api: String,
        property: &'static str,
        reason: String,
    },
}

impl DefinitionError {
    /// Logical id of the api resource the error belongs to.
    pub fn api(&self) -> &str {
        match self {
            Self::NotFound { api } | Self::Unreadable { api, .. } | Self::Malformed { api, .. } => {
                api
            }
        }
    }
}

/// Failures while turning a function or api resource into mounts.
#[derive(Debug, Error)]
pub enum MountError {
    #[error("function {function}: no Api event sources found in Events")]
    NoApiEventsFound { function: String },

    #[error("function {function}: Events.{event}.Properties.Method has unsupported value {method:?}")]
    InvalidMethod {
        function: String,
        event: String,
        method: String,
    },

    #[error(transparent)]
    Definition(#[from] DefinitionError),
}

impl MountError {
    /// Logical id of the resource that failed to contribute mounts.
    pub fn resource(&self) -> &str {
        match self {
            Self::NoApiEventsFound { function } | Self::InvalidMethod { function, .. } => function,
            Self::Definition(err) => err.api(),
        }
    }
}

/// A mount that could not be placed in the dispatch table.
#[derive(Debug, Clone, Error)]
pub enum RouteError {
    #[error("invalid path template {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("path template {path} conflicts with an existing route: {reason}")]
    Conflict { path: String, reason: String },
}

/// Failures while reading the resolved template document itself.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template is not valid YAML or JSON: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("template has no Resources section")]
    MissingResources,

    #[error("resource {resource}: invalid Properties: {reason}")]
    InvalidResource { resource: String, reason: String },
}
