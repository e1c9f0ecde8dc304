//! Reading gateway integrations out of an api description document.
//!
//! Only operations carrying `x-amazon-apigateway-integration` are routable. A path item may also
//! carry `x-amazon-apigateway-any-method`, which covers every verb the path does not declare
//! explicitly.

use std::collections::{BTreeMap, HashSet};

use http::Method;
use serde::Deserialize;

use crate::mount::CANONICAL_METHODS;

const INVOCATIONS_SUFFIX: &str = "/invocations";
const FUNCTIONS_SEGMENT: &str = "/functions/";

#[derive(Debug, Clone, Deserialize, Default)]
/// `x-amazon-apigateway-integration` object.
pub struct Integration {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Usually `arn:aws:apigateway:<region>:lambda:path/2015-03-31/functions/<fn>/invocations`.
    #[serde(default)]
    pub uri: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Default)]
/// One operation entry under a path item.
pub struct Operation {
    #[serde(rename = "x-amazon-apigateway-integration", default)]
    pub integration: Option<Integration>,
}

#[derive(Debug, Clone, Deserialize, Default)]
/// Path item: the seven verbs plus the any-method extension.
pub struct PathItem {
    #[serde(default)]
    pub get: Option<Operation>,
    #[serde(default)]
    pub post: Option<Operation>,
    #[serde(default)]
    pub put: Option<Operation>,
    #[serde(default)]
    pub delete: Option<Operation>,
    #[serde(default)]
    pub patch: Option<Operation>,
    #[serde(default)]
    pub head: Option<Operation>,
    #[serde(default)]
    pub options: Option<Operation>,
    #[serde(rename = "x-amazon-apigateway-any-method", default)]
    pub any_method: Option<Operation>,
}

impl PathItem {
    fn operation(&self, method: &Method) -> Option<&Operation> {
        match *method {
            Method::GET => self.get.as_ref(),
            Method::POST => self.post.as_ref(),
            Method::PUT => self.put.as_ref(),
            Method::DELETE => self.delete.as_ref(),
            Method::PATCH => self.patch.as_ref(),
            Method::HEAD => self.head.as_ref(),
            Method::OPTIONS => self.options.as_ref(),
            _ => None,
        }
    }
}

/// One routable operation found in a description document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedRoute {
    pub path: String,
    pub method: Method,
    /// Function named by the integration URI; `None` when the URI has an unexpected shape.
    pub function: Option<String>,
}

/// Extract every routable `(path, verb, function)` from a description document.
///
/// Explicit verbs are collected before the any-method fallback so an explicit integration is
/// never shadowed. Path items that fail to parse are skipped with a warning.
pub fn extract_routes(api: &str, document: &serde_json::Value) -> Vec<ExtractedRoute> {
    let Some(paths) = document.get("paths").and_then(|p| p.as_object()) else {
        return Vec::new();
    };

    let mut routes = Vec::new();
    let sorted: BTreeMap<&String, &serde_json::Value> = paths.iter().collect();
    for (path, raw_item) in sorted {
        let item = match PathItem::deserialize(raw_item) {
            Ok(item) => item,
            Err(err) => {
                tracing::warn!(
                    event = "integration_malformed",
                    api = %api,
                    path = %path,
                    error = %err,
                    "skipping path item"
                );
                continue;
            }
        };

        let mut mounted = HashSet::new();
        for method in CANONICAL_METHODS {
            let Some(integration) = item
                .operation(&method)
                .and_then(|op| op.integration.as_ref())
            else {
                continue;
            };
            routes.push(ExtractedRoute {
                path: path.clone(),
                method: method.clone(),
                function: integration_function(api, path, integration),
            });
            mounted.insert(method);
        }

        let Some(any) = item
            .any_method
            .as_ref()
            .and_then(|op| op.integration.as_ref())
        else {
            continue;
        };
        let function = integration_function(api, path, any);
        for method in CANONICAL_METHODS {
            if mounted.contains(&method) {
                continue;
            }
            routes.push(ExtractedRoute {
                path: path.clone(),
                method,
                function: function.clone(),
            });
        }
    }

    routes
}

fn integration_function(api: &str, path: &str, integration: &Integration) -> Option<String> {
    let uri = integration.uri.as_ref().and_then(|u| u.as_str());
    let function = uri.and_then(function_from_invocation_uri);
    if function.is_none() {
        tracing::warn!(
            event = "integration_malformed",
            api = %api,
            path = %path,
            uri = ?integration.uri,
            integration_type = ?integration.kind,
            "integration uri does not name a function"
        );
    }
    function
}

/// Pull `<fn>` out of `.../functions/<fn>/invocations`.
pub fn function_from_invocation_uri(uri: &str) -> Option<String> {
    let prefix = uri.strip_suffix(INVOCATIONS_SUFFIX)?;
    let start = prefix.find(FUNCTIONS_SEGMENT)? + FUNCTIONS_SEGMENT.len();
    let function = &prefix[start..];
    if function.is_empty() {
        return None;
    }
    Some(function.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const URI_A: &str = "arn:aws:apigateway:us-east-1:lambda:path/2015-03-31/functions/arn:aws:lambda:us-east-1:123456789012:function:FnA/invocations";
    const URI_B: &str = "arn:aws:apigateway:us-east-1:lambda:path/2015-03-31/functions/FnB/invocations";

    fn methods_for<'a>(routes: &'a [ExtractedRoute], path: &str) -> Vec<&'a Method> {
        routes
            .iter()
            .filter(|r| r.path == path)
            .map(|r| &r.method)
            .collect()
    }

    #[test]
    fn extracts_function_from_invocation_uri() {
        assert_eq!(
            function_from_invocation_uri(URI_A).as_deref(),
            Some("arn:aws:lambda:us-east-1:123456789012:function:FnA")
        );
        assert_eq!(function_from_invocation_uri(URI_B).as_deref(), Some("FnB"));
        assert_eq!(function_from_invocation_uri("http://example.com/backend"), None);
        assert_eq!(function_from_invocation_uri("x/functions//invocations"), None);
    }

    #[test]
    fn operations_without_integration_are_skipped() {
        let doc = serde_json::json!({
            "swagger": "2.0",
            "paths": {
                "/things": {
                    "get": { "x-amazon-apigateway-integration": { "type": "aws_proxy", "uri": URI_B } },
                    "options": { "x-amazon-apigateway-integration": { "uri": URI_B } },
                    "delete": { "responses": {} }
                }
            }
        });
        let routes = extract_routes("MyApi", &doc);
        assert_eq!(
            methods_for(&routes, "/things"),
            vec![&Method::OPTIONS, &Method::GET]
        );
        assert!(routes.iter().all(|r| r.function.as_deref() == Some("FnB")));
    }

    #[test]
    fn any_method_fills_only_undeclared_verbs() {
        let doc = serde_json::json!({
            "paths": {
                "/mixed": {
                    "post": { "x-amazon-apigateway-integration": { "uri": URI_A } },
                    "x-amazon-apigateway-any-method": {
                        "x-amazon-apigateway-integration": { "uri": URI_B }
                    }
                }
            }
        });
        let routes = extract_routes("MyApi", &doc);
        assert_eq!(routes.len(), 7);

        let post = routes.iter().find(|r| r.method == Method::POST).unwrap();
        assert_eq!(
            post.function.as_deref(),
            Some("arn:aws:lambda:us-east-1:123456789012:function:FnA")
        );
        let get = routes.iter().find(|r| r.method == Method::GET).unwrap();
        assert_eq!(get.function.as_deref(), Some("FnB"));
    }

    #[test]
    fn malformed_integration_does_not_abort_extraction() {
        let doc = serde_json::json!({
            "paths": {
                "/a": { "get": { "x-amazon-apigateway-integration": { "uri": { "Fn::Sub": "..." } } } },
                "/b": { "get": { "x-amazon-apigateway-integration": { "uri": URI_B } } },
                "/c": { "get": "not an operation" }
            }
        });
        let routes = extract_routes("MyApi", &doc);
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].path, "/a");
        assert_eq!(routes[0].function, None);
        assert_eq!(routes[1].function.as_deref(), Some("FnB"));
    }

    #[test]
    fn document_without_paths_yields_nothing() {
        assert!(extract_routes("MyApi", &serde_json::json!({ "swagger": "2.0" })).is_empty());
    }
}
