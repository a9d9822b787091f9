//! HTTP adapter in front of [`RelayHandler`].
//!
//! Maps routes to the relay, test, info and status endpoints and renders the
//! JSON error responses for everything else. Every response allows any
//! origin.

use crate::config::Environment;
use crate::errors::RelayError;
use crate::handler::RelayHandler;
use crate::receipt::epoch_secs;
use crate::test_signal::send_test_signal;
use chrono::Utc;
use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_REQUEST_HEADERS, ALLOW, HeaderMap, HeaderValue,
};
use http::{Method, Request, Response, StatusCode};
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use hyper::body::{Body, Bytes};
use hyper::service::Service;
use serde::Serialize;
use shared::http::{make_empty_response, make_json_response};
use std::fmt::Display;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;

pub type ResponseBody = BoxBody<Bytes, RelayError>;

const SERVER_NAME: &str = "Webhook Relay";
const AVAILABLE_ENDPOINTS: &str = "Available endpoints: /, /webhook, /test, /status";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Info,
    Webhook,
    Test,
    Status,
}

impl Route {
    fn from_path(path: &str) -> Option<Self> {
        match path {
            "/" => Some(Route::Info),
            "/webhook" => Some(Route::Webhook),
            "/test" => Some(Route::Test),
            "/status" => Some(Route::Status),
            _ => None,
        }
    }

    fn allows(&self, method: &Method) -> bool {
        match self {
            Route::Info | Route::Status => *method == Method::GET || *method == Method::HEAD,
            Route::Webhook => *method == Method::POST,
            Route::Test => {
                *method == Method::GET || *method == Method::HEAD || *method == Method::POST
            }
        }
    }

    fn allowed_methods(&self) -> &'static str {
        match self {
            Route::Info | Route::Status => "GET, HEAD, OPTIONS",
            Route::Webhook => "POST, OPTIONS",
            Route::Test => "GET, HEAD, POST, OPTIONS",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

#[derive(Serialize)]
struct Info<'a> {
    status: &'static str,
    timestamp: f64,
    local_server: &'a str,
    message: &'static str,
}

#[derive(Serialize)]
struct Endpoints {
    webhook: &'static str,
    test: &'static str,
    status: &'static str,
}

#[derive(Serialize)]
struct ServerStatus<'a> {
    server: &'static str,
    status: &'static str,
    local_server_url: &'a str,
    endpoints: Endpoints,
    timestamp: f64,
    environment: Environment,
}

/// Per-connection service; the handler is shared by all connections.
pub struct RelayService {
    handler: Arc<RelayHandler>,
    peer: Option<SocketAddr>,
}

impl RelayService {
    pub fn new(handler: Arc<RelayHandler>, peer: Option<SocketAddr>) -> Self {
        Self { handler, peer }
    }
}

impl<B> Service<Request<B>> for RelayService
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Display,
{
    type Response = Response<ResponseBody>;
    type Error = RelayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let handler = self.handler.clone();
        let peer = self.peer.map(|addr| addr.ip());

        Box::pin(async move {
            let mut response = dispatch(&handler, peer, req).await;
            response
                .headers_mut()
                .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
            Ok(response)
        })
    }
}

async fn dispatch<B>(
    handler: &RelayHandler,
    peer: Option<IpAddr>,
    req: Request<B>,
) -> Response<ResponseBody>
where
    B: Body,
    B::Error: Display,
{
    let Some(route) = Route::from_path(req.uri().path()) else {
        tracing::debug!(path = req.uri().path(), "No route matched");
        return not_found();
    };

    if req.method() == Method::OPTIONS {
        return preflight(route, req.headers());
    }
    if !route.allows(req.method()) {
        return method_not_allowed(route);
    }

    match route {
        Route::Info => info(handler),
        Route::Status => status(handler),
        Route::Test => make_json_response(
            StatusCode::OK,
            &send_test_signal(handler.forwarder()).await,
        ),
        Route::Webhook => webhook(handler, peer, req).await,
    }
}

async fn webhook<B>(
    handler: &RelayHandler,
    peer: Option<IpAddr>,
    req: Request<B>,
) -> Response<ResponseBody>
where
    B: Body,
    B::Error: Display,
{
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to read webhook body");
            return internal_error();
        }
    };

    let (ack, status) = handler.handle(&parts.headers, peer, &body).await;
    make_json_response(status, &ack)
}

fn info(handler: &RelayHandler) -> Response<ResponseBody> {
    make_json_response(
        StatusCode::OK,
        &Info {
            status: "Webhook Relay Running",
            timestamp: epoch_secs(Utc::now()),
            local_server: handler.forwarder().target_url(),
            message: "Ready to receive webhooks",
        },
    )
}

fn status(handler: &RelayHandler) -> Response<ResponseBody> {
    make_json_response(
        StatusCode::OK,
        &ServerStatus {
            server: SERVER_NAME,
            status: "running",
            local_server_url: handler.forwarder().target_url(),
            endpoints: Endpoints {
                webhook: "/webhook (POST)",
                test: "/test (POST/GET)",
                status: "/status (GET)",
            },
            timestamp: epoch_secs(Utc::now()),
            environment: handler.config().environment,
        },
    )
}

fn preflight(route: Route, headers: &HeaderMap) -> Response<ResponseBody> {
    let mut response = make_empty_response(StatusCode::OK);
    let response_headers = response.headers_mut();
    response_headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(route.allowed_methods()),
    );
    if let Some(requested) = headers.get(ACCESS_CONTROL_REQUEST_HEADERS) {
        response_headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
    }
    response
}

fn not_found() -> Response<ResponseBody> {
    make_json_response(
        StatusCode::NOT_FOUND,
        &ErrorBody {
            error: "Endpoint not found",
            message: AVAILABLE_ENDPOINTS.into(),
        },
    )
}

fn method_not_allowed(route: Route) -> Response<ResponseBody> {
    let mut response = make_json_response(
        StatusCode::METHOD_NOT_ALLOWED,
        &ErrorBody {
            error: "Method not allowed",
            message: format!("Allowed methods: {}", route.allowed_methods()),
        },
    );
    response
        .headers_mut()
        .insert(ALLOW, HeaderValue::from_static(route.allowed_methods()));
    response
}

fn internal_error() -> Response<ResponseBody> {
    make_json_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        &ErrorBody {
            error: "Internal server error",
            message: "Something went wrong on the server".into(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Downstream};
    use crate::testutils::{start_downstream, unreachable_url};
    use http::header::CONTENT_TYPE;
    use http_body_util::Full;
    use serde_json::{Value, json};

    fn service(url: &str, environment: Environment) -> RelayService {
        let handler = RelayHandler::new(Config {
            downstream: Downstream {
                url: url.into(),
                timeout_secs: 5,
            },
            environment,
            ..Default::default()
        })
        .unwrap();
        RelayService::new(Arc::new(handler), Some("203.0.113.9:41000".parse().unwrap()))
    }

    fn request(method: Method, path: &str, content_type: &str, body: &'static str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(path)
            .header(CONTENT_TYPE, content_type)
            .body(Full::new(Bytes::from_static(body.as_bytes())))
            .unwrap()
    }

    async fn send(
        service: &RelayService,
        req: Request<Full<Bytes>>,
    ) -> (StatusCode, HeaderMap, Value) {
        let response = service.call(req).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = match bytes.is_empty() {
            true => Value::Null,
            false => serde_json::from_slice(&bytes).unwrap(),
        };
        (status, headers, body)
    }

    #[tokio::test]
    async fn webhook_route_relays() {
        let downstream = start_downstream(StatusCode::OK).await;
        let service = service(&downstream.url, Environment::Local);

        let (status, headers, body) = send(
            &service,
            request(Method::POST, "/webhook", "text/plain", "BTCUSDT crossed 45000"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["data_received"]["message"], json!("BTCUSDT crossed 45000"));
        assert_eq!(body["data_received"]["client_ip"], json!("203.0.113.9"));
        assert_eq!(body["local_delivery"]["success"], json!(true));
    }

    #[tokio::test]
    async fn webhook_route_malformed_json() {
        let url = unreachable_url().await;
        let (status, _, body) = send(
            &service(&url, Environment::Local),
            request(Method::POST, "/webhook", "application/json", "{bad json"),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], json!(false));
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_route_sends_fixed_signal() {
        let mut downstream = start_downstream(StatusCode::OK).await;
        let service = service(&downstream.url, Environment::Local);

        for method in [Method::GET, Method::POST] {
            let (status, _, body) = send(&service, request(method, "/test", "text/plain", "")).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["success"], json!(true));
            assert_eq!(body["local_response"], json!(200));

            let forwarded = downstream.received.recv().await.unwrap();
            assert_eq!(forwarded.body["symbol"], json!("BTCUSDT"));
            assert_eq!(forwarded.body["action"], json!("buy"));
            assert_eq!(forwarded.body["price"], json!(45000));
        }
    }

    #[tokio::test]
    async fn info_route() {
        let url = unreachable_url().await;
        let (status, _, body) =
            send(&service(&url, Environment::Local), request(Method::GET, "/", "", "")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["local_server"], json!(url));
        assert!(body["timestamp"].is_f64());
    }

    #[tokio::test]
    async fn status_route_reports_environment() {
        let url = unreachable_url().await;
        for (environment, expected) in [(Environment::Heroku, "heroku"), (Environment::Local, "local")] {
            let (status, _, body) = send(
                &service(&url, environment),
                request(Method::GET, "/status", "", ""),
            )
            .await;

            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["environment"], json!(expected));
            assert_eq!(body["status"], json!("running"));
            assert_eq!(body["local_server_url"], json!(url));
            assert_eq!(body["endpoints"]["webhook"], json!("/webhook (POST)"));
        }
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let url = unreachable_url().await;
        let (status, _, body) = send(
            &service(&url, Environment::Local),
            request(Method::POST, "/webhooks", "application/json", "{}"),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], json!("Endpoint not found"));
        assert_eq!(body["message"], json!(AVAILABLE_ENDPOINTS));
    }

    #[tokio::test]
    async fn wrong_method_is_405() {
        let url = unreachable_url().await;
        let (status, headers, body) = send(
            &service(&url, Environment::Local),
            request(Method::GET, "/webhook", "", ""),
        )
        .await;

        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(headers.get(ALLOW).unwrap(), "POST, OPTIONS");
        assert_eq!(body["error"], json!("Method not allowed"));
    }

    #[tokio::test]
    async fn cors_preflight() {
        let url = unreachable_url().await;
        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/webhook")
            .header(ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let (status, headers, body) = send(&service(&url, Environment::Local), req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
        assert_eq!(headers.get(ACCESS_CONTROL_ALLOW_METHODS).unwrap(), "POST, OPTIONS");
        assert_eq!(headers.get(ACCESS_CONTROL_ALLOW_HEADERS).unwrap(), "content-type");
        assert_eq!(body, Value::Null);
    }
}
