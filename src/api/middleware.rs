use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::{Body, Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::{ServiceBuilder, ServiceExt};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info, warn};

use super::error::ApiError;
use super::rate_limit::API_KEY_HEADER;
use super::request_id::RequestId;
use super::{router, AppState, RequestBody};
use crate::config::CorsConfig;
use crate::datastore::TaskStorage;

const CORS_MAX_AGE: Duration = Duration::from_secs(86400);

pub fn cors_layer(cors: &CorsConfig) -> CorsLayer {
    let origins = if cors.allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            cors.allowed_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_LENGTH,
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            HeaderName::from_static("x-requested-with"),
            HeaderName::from_static(RequestId::HEADER_NAME),
            HeaderName::from_static(API_KEY_HEADER),
        ])
        .expose_headers([
            header::CONTENT_LENGTH,
            HeaderName::from_static("x-total-count"),
            HeaderName::from_static("x-offset"),
            HeaderName::from_static("x-limit"),
            HeaderName::from_static(RequestId::HEADER_NAME),
        ])
        .max_age(CORS_MAX_AGE)
}

/// Request id, rate limiting, the routed call under a timeout, and the
/// access log.
pub async fn handle<S: TaskStorage>(
    state: Arc<AppState<S>>,
    remote: SocketAddr,
    req: Request<RequestBody>,
) -> Response<Body> {
    let started = Instant::now();
    let request_id = RequestId::from_header_map_or_generate(req.headers());
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let client_ip = client_ip(req.headers(), remote);
    let api_key = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let ip_limit = state.rate_limiter.limit_for(&method, &path);
    let mut response = if state.config.rate_limit.enabled
        && !state
            .rate_limiter
            .allow(&client_ip.to_string(), api_key.as_deref(), ip_limit)
    {
        rate_limited(ip_limit, state.rate_limiter.window())
    } else {
        routed(state, req).await
    };

    if let Err(err) = request_id.insert_into_header_map(response.headers_mut()) {
        warn!(reason = %err, "unable to set request id header");
    }

    let status = response.status();
    let latency = started.elapsed();
    let request_id = request_id.as_hyphenated();
    if status.is_server_error() {
        error!(request_id = %request_id, %method, %path, status = status.as_u16(), ?latency, client_ip = %client_ip, "request failed");
    } else if status.is_client_error() {
        warn!(request_id = %request_id, %method, %path, status = status.as_u16(), ?latency, client_ip = %client_ip, "request rejected");
    } else {
        info!(request_id = %request_id, %method, %path, status = status.as_u16(), ?latency, client_ip = %client_ip, "request served");
    }
    response
}

async fn routed<S: TaskStorage>(
    state: Arc<AppState<S>>,
    req: Request<RequestBody>,
) -> Response<Body> {
    let timeout = state.config.listen.timeout;
    let service = ServiceBuilder::new()
        .layer(TimeoutLayer::new(timeout))
        .service_fn(move |req: Request<RequestBody>| {
            let state = state.clone();
            async move { Ok::<_, Infallible>(router::route(&state, req).await) }
        });

    match service.oneshot(req).await {
        // the router never answers 408 itself
        Ok(response) if response.status() == StatusCode::REQUEST_TIMEOUT => {
            ApiError::Timeout(timeout).into_response()
        }
        Ok(response) => response,
        Err(never) => match never {},
    }
}

fn rate_limited(limit: u32, window: Duration) -> Response<Body> {
    let mut response = ApiError::RateLimited.into_response();
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(0u32));
    headers.insert("x-ratelimit-reset", HeaderValue::from(window.as_secs()));
    headers.insert(header::RETRY_AFTER, HeaderValue::from(window.as_secs()));
    response
}

/// First hop of `X-Forwarded-For`, then `X-Real-IP`, then the peer address.
pub fn client_ip(headers: &HeaderMap, remote: SocketAddr) -> IpAddr {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    };
    forwarded.or_else(real_ip).unwrap_or_else(|| remote.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::app_service;
    use crate::config::{testdata, Config};
    use crate::datastore::ShardedMemoryStorage;
    use serde_json::Value;

    fn remote() -> SocketAddr {
        "192.0.2.10:40000".parse().unwrap()
    }

    fn state(config: Config) -> Arc<AppState<ShardedMemoryStorage>> {
        let storage = Arc::new(ShardedMemoryStorage::new(config.storage.max_tasks));
        Arc::new(AppState::new(config, storage))
    }

    fn request(method: Method, uri: &str) -> hyper::http::request::Builder {
        Request::builder().method(method).uri(uri)
    }

    async fn call(
        state: &Arc<AppState<ShardedMemoryStorage>>,
        peer: SocketAddr,
        req: Request<Body>,
    ) -> (StatusCode, HeaderMap, Value) {
        let response = app_service(state.clone(), peer).oneshot(req).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, headers, body)
    }

    #[test]
    fn test_client_ip() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, remote()), remote().ip());

        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.7"));
        assert_eq!(
            client_ip(&headers, remote()).to_string(),
            "198.51.100.7"
        );

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.1, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, remote()).to_string(), "203.0.113.1");
    }

    #[tokio::test]
    async fn test_preflight() {
        let state = state(testdata::test_config());
        let req = request(Method::OPTIONS, "/api/v1/tasks")
            .header(header::ORIGIN, "http://x.example")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();

        let (status, headers, _) = call(&state, remote(), req).await;

        assert!(status.is_success());
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(headers[header::ACCESS_CONTROL_ALLOW_METHODS]
            .to_str()
            .unwrap()
            .contains("DELETE"));
        assert_eq!(headers[header::ACCESS_CONTROL_MAX_AGE], "86400");
    }

    #[tokio::test]
    async fn test_cors_origin_list() {
        let mut config = testdata::test_config();
        config.cors.allowed_origins = vec!["http://a.example".to_string()];
        let state = state(config);

        let req = request(Method::GET, "/health")
            .header(header::ORIGIN, "http://a.example")
            .body(Body::empty())
            .unwrap();
        let (_, headers, _) = call(&state, remote(), req).await;
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "http://a.example");
        assert!(headers[header::ACCESS_CONTROL_EXPOSE_HEADERS]
            .to_str()
            .unwrap()
            .contains("x-total-count"));

        let req = request(Method::GET, "/health")
            .header(header::ORIGIN, "http://evil.example")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = call(&state, remote(), req).await;
        assert_eq!(status, StatusCode::OK);
        assert!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn test_security_headers() {
        let state = state(testdata::test_config());

        for uri in ["/health", "/api/v2/nothing"] {
            let req = request(Method::GET, uri).body(Body::empty()).unwrap();
            let (_, headers, _) = call(&state, remote(), req).await;

            assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff", "{}", uri);
            assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY", "{}", uri);
            assert_eq!(headers[header::X_XSS_PROTECTION], "1; mode=block", "{}", uri);
            assert!(headers.get(header::REFERRER_POLICY).is_some(), "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_declared_body_too_large() {
        let mut config = testdata::test_config();
        config.listen.max_body_bytes = 16;
        let state = state(config);

        let req = request(Method::POST, "/api/v1/tasks")
            .header(header::CONTENT_LENGTH, "17")
            .body(Body::from(vec![b'a'; 17]))
            .unwrap();
        let (status, headers, _) = call(&state, remote(), req).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY");
        assert_eq!(state.storage.count().await, 0);
    }

    #[tokio::test]
    async fn test_request_id_echo() {
        let state = state(testdata::test_config());
        let id = "8a6e0804-2bd0-4672-b79d-d97027f9071a";
        let req = request(Method::GET, "/health")
            .header(RequestId::HEADER_NAME, id)
            .body(Body::empty())
            .unwrap();

        let (_, headers, _) = call(&state, remote(), req).await;
        assert_eq!(headers[RequestId::HEADER_NAME], id);

        let req = request(Method::GET, "/health").body(Body::empty()).unwrap();
        let (_, headers, _) = call(&state, remote(), req).await;
        let generated = headers[RequestId::HEADER_NAME].to_str().unwrap();
        assert!(uuid::Uuid::parse_str(generated).is_ok());
    }

    #[tokio::test]
    async fn test_rate_limit_per_route() {
        // GIVEN a base limit of 2 per ip
        let mut config = testdata::test_config();
        config.rate_limit.enabled = true;
        config.rate_limit.per_ip = 2;
        let state = state(config);
        let create = || {
            request(Method::POST, "/api/v1/tasks")
                .body(Body::from(r#"{"name":"limited"}"#))
                .unwrap()
        };

        // WHEN writing twice
        let (status, _, _) = call(&state, remote(), create()).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, headers, body) = call(&state, remote(), create()).await;

        // THEN writes get half the base
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["code"], "RATE_LIMIT_EXCEEDED");
        assert_eq!(headers["x-ratelimit-limit"], "1");
        assert_eq!(headers["x-ratelimit-remaining"], "0");
        assert_eq!(headers[header::RETRY_AFTER], "60");

        // AND health checks get five times the base
        let peer: SocketAddr = "192.0.2.11:40000".parse().unwrap();
        for _ in 0..10 {
            let req = request(Method::GET, "/health").body(Body::empty()).unwrap();
            let (status, _, _) = call(&state, peer, req).await;
            assert_eq!(status, StatusCode::OK);
        }
        let req = request(Method::GET, "/health").body(Body::empty()).unwrap();
        let (status, _, _) = call(&state, peer, req).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_rate_limit_doubled_in_development() {
        let mut config = testdata::test_config();
        config.rate_limit.enabled = true;
        config.rate_limit.per_ip = 1;
        config.environment = crate::config::Environment::Development;
        let state = state(config);

        for _ in 0..2 {
            let req = request(Method::GET, "/api/v1/tasks").body(Body::empty()).unwrap();
            let (status, _, _) = call(&state, remote(), req).await;
            assert_eq!(status, StatusCode::OK);
        }
        let req = request(Method::GET, "/api/v1/tasks").body(Body::empty()).unwrap();
        let (status, _, _) = call(&state, remote(), req).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_timeout() {
        let mut config = testdata::test_config();
        config.listen.timeout = Duration::from_millis(10);
        let state = state(config);

        // a body that never completes keeps the create handler pending
        let (_sender, body) = Body::channel();
        let req = request(Method::POST, "/api/v1/tasks").body(body).unwrap();

        let (status, _, body) = call(&state, remote(), req).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "TIMEOUT");
    }
}
