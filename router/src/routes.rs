//! Route accumulation, the compiled dispatch table, and the handle the server reads it through.
//!
//! [`RouterBuilder`] collects mounts from functions and apis (build phase, single task).
//! [`RouterBuilder::build`] compiles them into an immutable [`RouteTable`]; [`RouteHandle`] swaps
//! whole tables in atomically so serving never observes a half-built table.

use std::{
    collections::{hash_map::Entry, BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use http::Method;
use matchit::Router;
use percent_encoding::percent_decode_str;
use tokio::sync::watch;

use crate::{
    definition::DefinitionLoader,
    error::{MountError, RouteError},
    mount::{ApiRoutes, FunctionRoutes, Mount, MountOrigin},
    template::{Api, Function, Template},
};

/// Accumulates mounts from every registered function and api.
pub struct RouterBuilder {
    loader: DefinitionLoader,
    functions: BTreeSet<String>,
    implicit_binary_media_types: Vec<String>,
    mounts: Vec<Mount>,
}

impl RouterBuilder {
    pub fn new(loader: DefinitionLoader) -> Self {
        Self {
            loader,
            functions: BTreeSet::new(),
            implicit_binary_media_types: Vec::new(),
            mounts: Vec::new(),
        }
    }

    /// Binary media types applied to routes declared by function events.
    pub fn with_implicit_binary_media_types(mut self, binary_media_types: Vec<String>) -> Self {
        self.implicit_binary_media_types = binary_media_types;
        self
    }

    /// Register every function, then every api, in logical-id order.
    ///
    /// Per-resource failures are returned alongside the builder; they never stop other resources
    /// from contributing.
    pub async fn from_template(
        template: &Template,
        loader: DefinitionLoader,
    ) -> (Self, Vec<MountError>) {
        let mut builder = Self::new(loader)
            .with_implicit_binary_media_types(template.implicit_binary_media_types.clone());
        let mut errors = Vec::new();

        for function in template.functions.values() {
            match builder.add_function(function) {
                Ok(_) => {}
                Err(err @ MountError::NoApiEventsFound { .. }) => {
                    tracing::debug!(event = "function_without_routes", error = %err, "no api events");
                    errors.push(err);
                }
                Err(err) => {
                    tracing::warn!(event = "resource_rejected", error = %err, "skipping function");
                    errors.push(err);
                }
            }
        }

        for api in template.apis.values() {
            if let Err(err) = builder.add_api(api).await {
                tracing::warn!(event = "resource_rejected", error = %err, "skipping api");
                errors.push(err);
            }
        }

        (builder, errors)
    }

    /// Register a function and mount its Api event sources.
    ///
    /// The function's identity is known to later apis even when it has no Api events of its own.
    pub fn add_function(&mut self, function: &Function) -> Result<usize, MountError> {
        self.functions.insert(function.name.clone());
        let mounts = FunctionRoutes::new(function)
            .with_binary_media_types(&self.implicit_binary_media_types)
            .mounts()?;
        let added = mounts.len();
        self.mounts.extend(mounts);
        Ok(added)
    }

    /// Mount every integration in an api's description document.
    pub async fn add_api(&mut self, api: &Api) -> Result<usize, MountError> {
        let mounts = ApiRoutes::new(api)
            .mounts(&self.loader, &self.functions)
            .await?;
        let added = mounts.len();
        self.mounts.extend(mounts);
        Ok(added)
    }

    /// All mounts accumulated so far, in registration order.
    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }

    /// Compile the accumulated mounts into a dispatch table.
    ///
    /// Function-declared routes take precedence over api-document routes for the same path and
    /// verb; within one origin the first registration wins.
    pub fn build(&self) -> RouteTable {
        let mut ordered: Vec<&Mount> = self.mounts.iter().collect();
        ordered.sort_by_key(|m| !matches!(m.origin, MountOrigin::FunctionEvent));

        let mut rejected = Vec::new();
        let mut by_pattern: BTreeMap<String, RouteConfig> = BTreeMap::new();
        for mount in ordered {
            let pattern = match to_matchit_pattern(&mount.path) {
                Ok(p) => p,
                Err(err) => {
                    tracing::warn!(event = "mount_rejected", error = %err, "skipping mount");
                    rejected.push(err);
                    continue;
                }
            };

            let route = by_pattern.entry(pattern).or_insert_with(|| RouteConfig {
                resource: mount.path.clone(),
                ops_by_method: HashMap::new(),
            });
            for method in mount.methods() {
                match route.ops_by_method.entry(method) {
                    Entry::Occupied(existing) => {
                        tracing::debug!(
                            event = "mount_shadowed",
                            method = %existing.key(),
                            path = %mount.path,
                            kept = ?existing.get().origin,
                            dropped = ?mount.origin,
                            "duplicate mount dropped"
                        );
                    }
                    Entry::Vacant(slot) => {
                        tracing::info!(
                            event = "mount",
                            method = %slot.key(),
                            path = %mount.path,
                            function = ?mount.function,
                            "mounted"
                        );
                        slot.insert(mount.clone());
                    }
                }
            }
        }

        let mut router = Router::new();
        for (pattern, route) in by_pattern {
            let resource = route.resource.clone();
            if let Err(err) = router.insert(pattern, route) {
                let err = RouteError::Conflict {
                    path: resource,
                    reason: err.to_string(),
                };
                tracing::warn!(event = "mount_rejected", error = %err, "skipping route");
                rejected.push(err);
            }
        }

        RouteTable { router, rejected }
    }
}

#[derive(Debug, Clone)]
struct RouteConfig {
    /// Path template as declared (`/users/{id}`), reported as the event's `resource`.
    resource: String,
    ops_by_method: HashMap<Method, Mount>,
}

/// Immutable dispatch table.
#[derive(Debug, Clone)]
pub struct RouteTable {
    router: Router<RouteConfig>,
    rejected: Vec<RouteError>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            router: Router::new(),
            rejected: Vec::new(),
        }
    }
}

/// A request resolved to a function.
#[derive(Debug, Clone)]
pub struct MatchedRoute<'a> {
    pub mount: &'a Mount,
    pub function: &'a str,
    /// Declared path template.
    pub resource: &'a str,
    /// Captured template variables; `None` when the template has none.
    pub path_params: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone)]
/// Outcome of matching an incoming request against the table.
pub enum RouteMatch<'a> {
    /// No registered path template matches.
    NotFound,
    /// The path exists but this verb has no integration bound to a function.
    NoIntegration { resource: &'a str },
    Matched(MatchedRoute<'a>),
}

impl RouteTable {
    /// Match an `(HTTP method, path)` pair.
    pub fn match_request<'a>(&'a self, method: &Method, path: &str) -> RouteMatch<'a> {
        let Ok(matched) = self.router.at(path) else {
            return RouteMatch::NotFound;
        };
        let route = matched.value;

        let Some((mount, function)) = route
            .ops_by_method
            .get(method)
            .and_then(|m| m.function.as_deref().map(|f| (m, f)))
        else {
            return RouteMatch::NoIntegration {
                resource: &route.resource,
            };
        };

        let params: HashMap<String, String> = matched
            .params
            .iter()
            .map(|(k, v)| {
                let value = percent_decode_str(v).decode_utf8_lossy().into_owned();
                (k.to_string(), value)
            })
            .collect();

        RouteMatch::Matched(MatchedRoute {
            mount,
            function,
            resource: &route.resource,
            path_params: (!params.is_empty()).then_some(params),
        })
    }

    /// Mounts that could not be placed in the table.
    pub fn rejected(&self) -> &[RouteError] {
        &self.rejected
    }
}

/// Shared, atomically replaceable reference to the live [`RouteTable`].
#[derive(Clone)]
pub struct RouteHandle {
    tx: Arc<watch::Sender<Arc<RouteTable>>>,
}

impl RouteHandle {
    pub fn new(table: RouteTable) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(table));
        Self { tx: Arc::new(tx) }
    }

    /// The table in effect right now. Requests hold on to it for their whole lifetime.
    pub fn snapshot(&self) -> Arc<RouteTable> {
        self.tx.borrow().clone()
    }

    /// Replace the live table with a freshly built one.
    pub fn swap(&self, table: RouteTable) -> Arc<RouteTable> {
        self.tx.send_replace(Arc::new(table))
    }
}

enum Segment<'a> {
    Literal,
    Param(&'a str),
    Greedy(&'a str),
}

/// Rewrite a path template into `matchit` syntax.
///
/// `{name}` passes through; the greedy `{name+}` becomes `{*name}`, which matches the rest of the
/// path including slashes and must be the final segment.
pub fn to_matchit_pattern(path: &str) -> Result<String, RouteError> {
    let invalid = |reason: &str| RouteError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let Some(rest) = path.strip_prefix('/') else {
        return Err(invalid("path templates must start with '/'"));
    };

    let segments: Vec<&str> = rest.split('/').collect();
    let last = segments.len() - 1;
    let mut out = String::with_capacity(path.len() + 1);
    for (i, segment) in segments.iter().enumerate() {
        out.push('/');
        match classify_segment(segment).map_err(invalid)? {
            Segment::Literal => out.push_str(segment),
            Segment::Param(name) => {
                out.push('{');
                out.push_str(name);
                out.push('}');
            }
            Segment::Greedy(name) => {
                if i != last {
                    return Err(invalid("greedy parameter must be the last segment"));
                }
                out.push_str("{*");
                out.push_str(name);
                out.push('}');
            }
        }
    }
    Ok(out)
}

fn classify_segment(segment: &str) -> Result<Segment<'_>, &'static str> {
    let is_brace = |c: char| c == '{' || c == '}';
    if !segment.contains(is_brace) {
        return Ok(Segment::Literal);
    }

    let inner = segment
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or("parameters must span a whole segment")?;
    if inner.contains(is_brace) {
        return Err("nested braces in parameter");
    }

    match inner.strip_suffix('+') {
        Some("") => Err("empty greedy parameter name"),
        Some(name) => Ok(Segment::Greedy(name)),
        None if inner.is_empty() => Err("empty parameter name"),
        None => Ok(Segment::Param(inner)),
    }
}
