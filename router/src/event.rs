//! HTTP request -> Lambda proxy integration event.
//!
//! Field names follow the REST API (v1) proxy event exactly so handlers written against the cloud
//! contract see no difference locally.

use std::{
    collections::HashMap,
    net::SocketAddr,
    time::{SystemTime, UNIX_EPOCH},
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use http::{header, request::Parts, HeaderMap};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::routes::MatchedRoute;

const LOCAL_ACCOUNT_ID: &str = "123456789012";
const LOCAL_API_ID: &str = "1234567890";
const LOCAL_RESOURCE_ID: &str = "123456";
const DEFAULT_FORWARDED_PROTO: &str = "http";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyIdentity {
    pub source_ip: String,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRequestContext {
    pub account_id: String,
    pub api_id: String,
    pub request_id: String,
    pub resource_id: String,
    pub resource_path: String,
    pub http_method: String,
    pub path: String,
    pub stage: String,
    pub protocol: String,
    pub request_time_epoch: u64,
    pub identity: ProxyIdentity,
}

/// The event a proxy-integrated function receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyEvent {
    pub http_method: String,
    pub path: String,
    pub resource: String,
    pub headers: HashMap<String, String>,
    /// `None` when the request had no query string.
    pub query_string_parameters: Option<HashMap<String, String>>,
    /// `None` when the matched template has no variables.
    pub path_parameters: Option<HashMap<String, String>>,
    pub stage_variables: Option<HashMap<String, String>>,
    pub request_context: ProxyRequestContext,
    /// `None` for an empty request body.
    pub body: Option<String>,
    pub is_base64_encoded: bool,
}

/// Per-request inputs that do not come from the HTTP message itself.
#[derive(Debug, Clone)]
pub struct EventContext<'a> {
    pub stage: &'a str,
    /// Address of the connected client.
    pub source: SocketAddr,
}

/// Build the proxy event for a matched request.
pub fn translate(
    parts: &Parts,
    body: &[u8],
    route: &MatchedRoute<'_>,
    ctx: &EventContext<'_>,
) -> ProxyEvent {
    let method = parts.method.as_str().to_string();
    let path = parts.uri.path().to_string();

    let mut headers = fold_headers(&parts.headers);
    add_forwarded_headers(&mut headers, &parts.headers, ctx.source);

    let query_string_parameters = parts.uri.query().filter(|q| !q.is_empty()).map(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect::<HashMap<_, _>>()
    });

    let is_binary = is_binary_content(&parts.headers, &route.mount.binary_media_types);
    let body_text = if body.is_empty() {
        None
    } else if is_binary {
        Some(STANDARD.encode(body))
    } else {
        Some(String::from_utf8_lossy(body).into_owned())
    };

    let user_agent = parts
        .headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let request_time_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    ProxyEvent {
        http_method: method.clone(),
        path: path.clone(),
        resource: route.resource.to_string(),
        headers,
        query_string_parameters,
        path_parameters: route.path_params.clone(),
        stage_variables: None,
        request_context: ProxyRequestContext {
            account_id: LOCAL_ACCOUNT_ID.to_string(),
            api_id: LOCAL_API_ID.to_string(),
            request_id: Uuid::new_v4().to_string(),
            resource_id: LOCAL_RESOURCE_ID.to_string(),
            resource_path: route.resource.to_string(),
            http_method: method,
            path,
            stage: ctx.stage.to_string(),
            protocol: format!("{:?}", parts.version),
            request_time_epoch,
            identity: ProxyIdentity {
                source_ip: ctx.source.ip().to_string(),
                user_agent,
            },
        },
        body: body_text,
        is_base64_encoded: is_binary && !body.is_empty(),
    }
}

/// Last value wins for repeated header names.
fn fold_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut out = HashMap::with_capacity(headers.keys_len() + 3);
    for (name, value) in headers {
        out.insert(
            name.as_str().to_string(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        );
    }
    out
}

/// Add the headers a cloud front door would inject.
fn add_forwarded_headers(
    out: &mut HashMap<String, String>,
    headers: &HeaderMap,
    source: SocketAddr,
) {
    let client = source.ip().to_string();
    let forwarded_for = match out.get("x-forwarded-for") {
        Some(existing) if !existing.is_empty() => format!("{existing}, {client}"),
        _ => client,
    };
    out.insert("x-forwarded-for".to_string(), forwarded_for);

    out.entry("x-forwarded-proto".to_string())
        .or_insert_with(|| DEFAULT_FORWARDED_PROTO.to_string());

    let port = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .and_then(host_port)
        .unwrap_or("80")
        .to_string();
    out.entry("x-forwarded-port".to_string()).or_insert(port);
}

fn host_port(host: &str) -> Option<&str> {
    let (_, port) = host.rsplit_once(':')?;
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(port)
}

/// Compare the request's media type (parameters stripped) against the configured binary types.
pub fn is_binary_content(headers: &HeaderMap, binary_media_types: &[String]) -> bool {
    if binary_media_types.is_empty() {
        return false;
    }
    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let media_type = content_type.split(';').next().unwrap_or_default().trim();
    binary_media_types.iter().any(|t| t == media_type)
}

#[cfg(test)]
mod tests {
    use http::{Method, Request};

    use super::*;
    use crate::mount::{ApiMethod, Mount, MountOrigin};

    fn mount(binary_media_types: &[&str]) -> Mount {
        Mount {
            path: "/get/{parameter}".to_string(),
            method: ApiMethod::One(Method::POST),
            function: Some("Fn".to_string()),
            binary_media_types: binary_media_types.iter().map(|s| s.to_string()).collect(),
            integration_function: None,
            origin: MountOrigin::FunctionEvent,
        }
    }

    fn route<'a>(
        mount: &'a Mount,
        path_params: Option<HashMap<String, String>>,
    ) -> MatchedRoute<'a> {
        MatchedRoute {
            mount,
            function: "Fn",
            resource: &mount.path,
            path_params,
        }
    }

    fn ctx() -> EventContext<'static> {
        EventContext {
            stage: "prod",
            source: "10.0.0.7:51234".parse().unwrap(),
        }
    }

    fn parts(builder: http::request::Builder) -> Parts {
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn binary_content_is_base64_encoded() {
        let m = mount(&["image/png"]);
        let p = parts(
            Request::builder()
                .method("POST")
                .uri("/get/1")
                .header("content-type", "image/png; charset=binary"),
        );
        let raw = [0x89u8, b'P', b'N', b'G', 0xff, 0x00];
        let event = translate(&p, &raw, &route(&m, None), &ctx());
        assert!(event.is_base64_encoded);
        assert_eq!(event.body.as_deref(), Some(STANDARD.encode(raw).as_str()));
    }

    #[test]
    fn non_binary_content_is_passed_as_text() {
        let m = mount(&["image/png"]);
        let p = parts(
            Request::builder()
                .method("POST")
                .uri("/get/1")
                .header("content-type", "image/jpeg"),
        );
        let event = translate(&p, b"hello there", &route(&m, None), &ctx());
        assert!(!event.is_base64_encoded);
        assert_eq!(event.body.as_deref(), Some("hello there"));

        let p = parts(Request::builder().method("POST").uri("/get/1"));
        let event = translate(&p, &[0xff, 0xfe], &route(&m, None), &ctx());
        assert!(!event.is_base64_encoded);
        assert!(event.body.is_some());
    }

    #[test]
    fn repeated_headers_and_query_params_keep_last_value() {
        let m = mount(&[]);
        let p = parts(
            Request::builder()
                .method("GET")
                .uri("/get/1?a=1&a=2&b=x%20y")
                .header("x-multi", "first")
                .header("x-multi", "second")
                .header("host", "localhost:3000"),
        );
        let event = translate(&p, b"", &route(&m, None), &ctx());
        assert_eq!(event.headers["x-multi"], "second");
        assert_eq!(
            event.query_string_parameters,
            Some(HashMap::from([
                ("a".to_string(), "2".to_string()),
                ("b".to_string(), "x y".to_string()),
            ]))
        );
        assert_eq!(event.body, None);
        assert!(!event.is_base64_encoded);
    }

    #[test]
    fn forwarded_headers_are_synthesized() {
        let m = mount(&[]);
        let p = parts(
            Request::builder()
                .uri("/get/1")
                .header("host", "localhost:3000")
                .header("x-forwarded-for", "203.0.113.9"),
        );
        let event = translate(&p, b"", &route(&m, None), &ctx());
        assert_eq!(event.headers["x-forwarded-for"], "203.0.113.9, 10.0.0.7");
        assert_eq!(event.headers["x-forwarded-proto"], "http");
        assert_eq!(event.headers["x-forwarded-port"], "3000");

        let p = parts(Request::builder().uri("/get/1").header("host", "example.com"));
        let event = translate(&p, b"", &route(&m, None), &ctx());
        assert_eq!(event.headers["x-forwarded-for"], "10.0.0.7");
        assert_eq!(event.headers["x-forwarded-port"], "80");
    }

    #[test]
    fn request_context_mirrors_request() {
        let m = mount(&[]);
        let params = HashMap::from([("parameter".to_string(), "1".to_string())]);
        let p = parts(
            Request::builder()
                .method("GET")
                .uri("/get/1")
                .header("user-agent", "curl/8"),
        );
        let event = translate(&p, b"", &route(&m, Some(params.clone())), &ctx());

        assert_eq!(event.http_method, "GET");
        assert_eq!(event.path, "/get/1");
        assert_eq!(event.resource, "/get/{parameter}");
        assert_eq!(event.path_parameters, Some(params));
        assert_eq!(event.query_string_parameters, None);
        assert_eq!(event.request_context.stage, "prod");
        assert_eq!(event.request_context.resource_path, "/get/{parameter}");
        assert_eq!(event.request_context.http_method, "GET");
        assert_eq!(event.request_context.identity.source_ip, "10.0.0.7");
        assert_eq!(
            event.request_context.identity.user_agent.as_deref(),
            Some("curl/8")
        );
        assert!(!event.request_context.request_id.is_empty());
    }

    #[test]
    fn absent_path_parameters_serialize_as_null() {
        let m = mount(&[]);
        let p = parts(Request::builder().uri("/get"));
        let event = translate(&p, b"", &route(&m, None), &ctx());
        let json = serde_json::to_value(&event).unwrap();
        assert!(json["pathParameters"].is_null());
        assert!(json.get("pathParameters").is_some());
        assert_eq!(json["isBase64Encoded"], false);
        assert_eq!(json["requestContext"]["identity"]["sourceIp"], "10.0.0.7");
    }
}
