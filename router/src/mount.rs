//! Turning template resources into mounts: resolved `(path, verb) -> function` bindings.
//!
//! [`FunctionRoutes`] and [`ApiRoutes`] are thin adapters over the plain resource data; the
//! resources themselves stay purely structural.

use std::collections::BTreeSet;

use http::Method;

use crate::{
    definition::DefinitionLoader,
    error::MountError,
    integration::extract_routes,
    template::{Api, EventSource, Function},
};

/// The verbs an `ANY` route expands to, in the order they are registered.
pub const CANONICAL_METHODS: [Method; 7] = [
    Method::OPTIONS,
    Method::GET,
    Method::HEAD,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::PATCH,
];

const ANY_METHOD: &str = "ANY";

/// Method declared on an Api event source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ApiMethod {
    Any,
    One(Method),
}

impl ApiMethod {
    /// Parse a method name case-insensitively. Only `ANY` and the canonical verbs are accepted.
    pub fn parse(raw: &str) -> Option<Self> {
        let upper = raw.trim().to_ascii_uppercase();
        if upper == ANY_METHOD {
            return Some(Self::Any);
        }
        CANONICAL_METHODS
            .into_iter()
            .find(|m| m.as_str() == upper)
            .map(Self::One)
    }

    /// Concrete verbs this method covers.
    pub fn methods(&self) -> Vec<Method> {
        match self {
            Self::Any => CANONICAL_METHODS.to_vec(),
            Self::One(method) => vec![method.clone()],
        }
    }
}

impl std::fmt::Display for ApiMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => f.write_str(ANY_METHOD),
            Self::One(method) => f.write_str(method.as_str()),
        }
    }
}

/// Which kind of declaration produced a mount.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MountOrigin {
    /// A function's own `Events` entry.
    FunctionEvent,
    /// An api resource's description document (api logical id).
    ApiDefinition(String),
}

/// A resolved route.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Mount {
    /// Path template, e.g. `/users/{id}` or `/{proxy+}`.
    pub path: String,
    /// Kept as declared; `ANY` is expanded into the canonical verbs only when the dispatch table
    /// is built, so the table itself never holds an `ANY` entry.
    pub method: ApiMethod,
    /// Registered function to invoke. `None` when an api integration names no known function.
    pub function: Option<String>,
    pub binary_media_types: Vec<String>,
    /// Function identity as written in the integration URI (api mounts only).
    pub integration_function: Option<String>,
    pub origin: MountOrigin,
}

impl Mount {
    /// Concrete verbs this mount is registered under.
    pub fn methods(&self) -> Vec<Method> {
        self.method.methods()
    }
}

/// Route-producing view over a [`Function`].
#[derive(Debug, Clone, Copy)]
pub struct FunctionRoutes<'a> {
    function: &'a Function,
    binary_media_types: &'a [String],
}

impl<'a> FunctionRoutes<'a> {
    pub fn new(function: &'a Function) -> Self {
        Self {
            function,
            binary_media_types: &[],
        }
    }

    /// Binary media types of the implicit api the function's events are served from.
    pub fn with_binary_media_types(mut self, binary_media_types: &'a [String]) -> Self {
        self.binary_media_types = binary_media_types;
        self
    }

    /// One mount per Api event source, path and method taken verbatim.
    pub fn mounts(&self) -> Result<Vec<Mount>, MountError> {
        let mut mounts = Vec::new();
        for (event_name, source) in &self.function.events {
            let (path, method) = match source {
                EventSource::Api { path, method } => (path, method),
                EventSource::Other { .. } => continue,
            };
            let Some(parsed) = ApiMethod::parse(method) else {
                return Err(MountError::InvalidMethod {
                    function: self.function.name.clone(),
                    event: event_name.clone(),
                    method: method.clone(),
                });
            };
            mounts.push(Mount {
                path: path.clone(),
                method: parsed,
                function: Some(self.function.name.clone()),
                binary_media_types: self.binary_media_types.to_vec(),
                integration_function: None,
                origin: MountOrigin::FunctionEvent,
            });
        }

        if mounts.is_empty() {
            return Err(MountError::NoApiEventsFound {
                function: self.function.name.clone(),
            });
        }
        Ok(mounts)
    }
}

/// Route-producing view over an [`Api`].
#[derive(Debug, Clone, Copy)]
pub struct ApiRoutes<'a> {
    api: &'a Api,
}

impl<'a> ApiRoutes<'a> {
    pub fn new(api: &'a Api) -> Self {
        Self { api }
    }

    /// Load the api's document and bind each integration to a known function.
    ///
    /// An api whose document declares no integrations is valid and yields no mounts.
    pub async fn mounts(
        &self,
        loader: &DefinitionLoader,
        known_functions: &BTreeSet<String>,
    ) -> Result<Vec<Mount>, MountError> {
        let document = loader.resolve(self.api).await?;

        let mounts = extract_routes(&self.api.name, &document)
            .into_iter()
            .map(|route| {
                let function = route
                    .function
                    .as_deref()
                    .and_then(|identity| match_function(identity, known_functions))
                    .map(str::to_string);
                if function.is_none() {
                    tracing::warn!(
                        event = "integration_unbound",
                        api = %self.api.name,
                        path = %route.path,
                        method = %route.method,
                        integration = ?route.function,
                        "integration does not name a registered function"
                    );
                }
                Mount {
                    path: route.path,
                    method: ApiMethod::One(route.method),
                    function,
                    binary_media_types: self.api.binary_media_types.clone(),
                    integration_function: route.function,
                    origin: MountOrigin::ApiDefinition(self.api.name.clone()),
                }
            })
            .collect();
        Ok(mounts)
    }
}

/// Find the registered function an integration identity refers to.
///
/// An exact match wins; otherwise the identity must end with `:<name>` or `/<name>` (an ARN or a
/// path ending in the logical id). The longest such name is chosen.
pub fn match_function<'f>(identity: &str, known: &'f BTreeSet<String>) -> Option<&'f str> {
    if let Some(exact) = known.get(identity) {
        return Some(exact.as_str());
    }
    known
        .iter()
        .filter(|name| {
            identity
                .strip_suffix(name.as_str())
                .is_some_and(|head| head.ends_with(':') || head.ends_with('/'))
        })
        .max_by_key(|name| name.len())
        .map(String::as_str)
}
