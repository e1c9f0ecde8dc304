//! axum server wiring.
//!
//! Every path belongs to the template, so the app is a single fallback handler that consults the
//! live route table, translates the request into a proxy event and invokes the bound function.

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, State},
    http::Request,
    response::IntoResponse,
    Router,
};
use bytes::Bytes;
use http_body_util::LengthLimitError;

use crate::{
    event::{translate, EventContext},
    lambda::LambdaInvoker,
    response::GatewayResponse,
    routes::{RouteHandle, RouteMatch},
};

#[derive(Clone)]
pub struct AppState {
    routes: RouteHandle,
    invoker: Arc<dyn LambdaInvoker>,
    max_body_bytes: usize,
    stage: Arc<str>,
}

impl AppState {
    pub fn new(
        routes: RouteHandle,
        invoker: Arc<dyn LambdaInvoker>,
        max_body_bytes: usize,
        stage: &str,
    ) -> Self {
        Self {
            routes,
            invoker,
            max_body_bytes,
            stage: Arc::from(stage),
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new().fallback(handle_any).with_state(state)
}

/// Bind `listen_addr` and serve until the process is stopped.
pub async fn run(listen_addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(event = "listening", addr = %listen_addr, "gateway ready");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn handle_any(State(state): State<AppState>, req: Request<Body>) -> axum::response::Response {
    let (parts, body) = req.into_parts();
    let method = parts.method.clone();
    let path = parts.uri.path().to_string();

    let table = state.routes.snapshot();
    let route = match table.match_request(&method, &path) {
        RouteMatch::NotFound => {
            tracing::warn!(
                event = "route_not_found",
                method = %method,
                path = %path,
                "no route matches path"
            );
            return GatewayResponse::not_found().into_response();
        }
        RouteMatch::NoIntegration { resource } => {
            tracing::warn!(
                event = "no_integration",
                method = %method,
                path = %path,
                route = %resource,
                "no function bound to this method"
            );
            return GatewayResponse::no_integration().into_response();
        }
        RouteMatch::Matched(route) => route,
    };

    let body = match to_bytes(body, state.max_body_bytes).await {
        Ok(b) => b,
        Err(err) if is_length_limit(&err) => {
            return GatewayResponse::payload_too_large().into_response()
        }
        Err(err) => {
            tracing::warn!(
                event = "body_read_failed",
                method = %method,
                path = %path,
                error = %err,
                "cannot read request body"
            );
            return GatewayResponse::bad_request_body().into_response();
        }
    };

    let source = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
        .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::LOCALHOST, 0)));

    let event = translate(
        &parts,
        &body,
        &route,
        &EventContext {
            stage: &state.stage,
            source,
        },
    );
    let payload = match serde_json::to_vec(&event) {
        Ok(p) => Bytes::from(p),
        Err(err) => {
            tracing::warn!(event = "encode_failed", error = %err, "cannot encode proxy event");
            return GatewayResponse::internal_error().into_response();
        }
    };

    tracing::info!(
        event = "invoke",
        method = %method,
        route = %route.resource,
        function = %route.function,
        request_id = %event.request_context.request_id,
        "invoking function"
    );

    let output = match state.invoker.invoke(route.function, payload).await {
        Ok(out) => out,
        Err(err) => {
            tracing::warn!(
                event = "invoke_failed",
                function = %route.function,
                error = %err,
                "function invocation failed"
            );
            return GatewayResponse::internal_error().into_response();
        }
    };

    match GatewayResponse::from_function_output(&output) {
        Ok(resp) => resp.into_response(),
        Err(err) => {
            tracing::warn!(
                event = "invalid_function_response",
                function = %route.function,
                error = %err,
                "function returned an invalid proxy response"
            );
            GatewayResponse::internal_error().into_response()
        }
    }
}

fn is_length_limit(err: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = source {
        if e.is::<LengthLimitError>() {
            return true;
        }
        source = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use std::{path::Path, sync::Mutex};

    use async_trait::async_trait;
    use axum::http::StatusCode;
    use tower::ServiceExt as _;

    use super::*;
    use crate::{
        definition::DefinitionLoader,
        routes::RouterBuilder,
        template::Template,
    };

    const TEMPLATE: &str = r#"
Resources:
  HelloFunction:
    Type: AWS::Serverless::Function
    Properties:
      Handler: index.handler
      Runtime: python3.12
      Events:
        Hello:
          Type: Api
          Properties:
            Path: /hello/{name}
            Method: get
        Upload:
          Type: Api
          Properties:
            Path: /upload
            Method: post
"#;

    /// Echoes the received event back as the response body.
    #[derive(Default)]
    struct EchoInvoker {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LambdaInvoker for EchoInvoker {
        async fn invoke(&self, function_name: &str, payload: Bytes) -> anyhow::Result<Bytes> {
            self.calls.lock().unwrap().push(function_name.to_string());
            let out = serde_json::json!({
                "statusCode": 200,
                "headers": { "content-type": "application/json" },
                "body": String::from_utf8(payload.to_vec())?,
            });
            Ok(Bytes::from(serde_json::to_vec(&out)?))
        }
    }

    struct StaticInvoker(&'static [u8]);

    #[async_trait]
    impl LambdaInvoker for StaticInvoker {
        async fn invoke(&self, _function_name: &str, _payload: Bytes) -> anyhow::Result<Bytes> {
            Ok(Bytes::from_static(self.0))
        }
    }

    struct FailingInvoker;

    #[async_trait]
    impl LambdaInvoker for FailingInvoker {
        async fn invoke(&self, function_name: &str, _payload: Bytes) -> anyhow::Result<Bytes> {
            anyhow::bail!("lambda function error (Unhandled) for {function_name}")
        }
    }

    async fn app(invoker: Arc<dyn LambdaInvoker>, max_body_bytes: usize) -> Router {
        let template = Template::from_slice(TEMPLATE.as_bytes(), Path::new(".")).unwrap();
        let (builder, errors) =
            RouterBuilder::from_template(&template, DefinitionLoader::local()).await;
        assert!(errors.is_empty());
        let routes = RouteHandle::new(builder.build());
        build_app(AppState::new(routes, invoker, max_body_bytes, "prod"))
    }

    async fn body_json(res: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn matched_route_invokes_function_with_proxy_event() {
        let invoker = Arc::new(EchoInvoker::default());
        let app = app(invoker.clone(), 1024).await;

        let res = app
            .oneshot(
                Request::builder()
                    .uri("/hello/world?greeting=hi")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(invoker.calls.lock().unwrap().as_slice(), ["HelloFunction"]);

        let event = body_json(res).await;
        assert_eq!(event["httpMethod"], "GET");
        assert_eq!(event["resource"], "/hello/{name}");
        assert_eq!(event["pathParameters"]["name"], "world");
        assert_eq!(event["queryStringParameters"]["greeting"], "hi");
        assert_eq!(event["requestContext"]["stage"], "prod");
        assert_eq!(event["requestContext"]["identity"]["sourceIp"], "127.0.0.1");
    }

    #[tokio::test]
    async fn not_found_when_no_route_matches() {
        let app = app(Arc::new(EchoInvoker::default()), 1024).await;
        let res = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unmounted_method_on_known_path_is_bad_gateway() {
        let invoker = Arc::new(EchoInvoker::default());
        let app = app(invoker.clone(), 1024).await;
        let res = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/hello/world")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
        assert!(invoker.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn payload_too_large_is_rejected() {
        let app = app(Arc::new(EchoInvoker::default()), 4).await;
        let res = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/upload")
                    .body(Body::from("0123456789"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn interrupted_body_is_bad_request() {
        let chunks = vec![
            Ok(Bytes::from_static(b"part")),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "client went away",
            )),
        ];
        let invoker = Arc::new(EchoInvoker::default());
        let app = app(invoker.clone(), 1024).await;
        let res = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/upload")
                    .body(Body::from_stream(futures::stream::iter(chunks)))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(invoker.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn function_response_is_passed_through() {
        let app = app(
            Arc::new(StaticInvoker(
                br#"{"statusCode": "201", "headers": {"x-made-by": "fn"}, "body": "created"}"#,
            )),
            1024,
        )
        .await;
        let res = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/upload")
                    .body(Body::from("payload"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(res.headers()["x-made-by"], "fn");
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.as_ref(), b"created");
    }

    #[tokio::test]
    async fn invalid_function_response_is_bad_gateway() {
        let app = app(Arc::new(StaticInvoker(b"[1, 2, 3]")), 1024).await;
        let res = app
            .oneshot(
                Request::builder()
                    .uri("/hello/x")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_json(res).await["message"], "Internal server error");
    }

    #[tokio::test]
    async fn invocation_failure_is_bad_gateway() {
        let app = app(Arc::new(FailingInvoker), 1024).await;
        let res = app
            .oneshot(
                Request::builder()
                    .uri("/hello/x")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn swapped_table_is_used_by_later_requests() {
        let routes = RouteHandle::new(Default::default());
        let app = build_app(AppState::new(
            routes.clone(),
            Arc::new(EchoInvoker::default()),
            1024,
            "prod",
        ));

        let res = app
            .clone()
            .oneshot(Request::builder().uri("/hello/x").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let template = Template::from_slice(TEMPLATE.as_bytes(), Path::new(".")).unwrap();
        let (builder, _) = RouterBuilder::from_template(&template, DefinitionLoader::local()).await;
        routes.swap(builder.build());

        let res = app
            .oneshot(Request::builder().uri("/hello/x").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
