//! End-to-end tests driving the full router against in-process upstreams.
//!
//! Each test stands up a throwaway axum server on a loopback port to play
//! the third-party origin, then fires requests at the exact router the
//! binary serves.

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tower::ServiceExt;

use hls_proxy::config::Config;
use hls_proxy::web::{AppState, create_router};

async fn spawn_upstream(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn proxy_router(config: Config) -> Router {
    create_router(AppState::from_config(config).unwrap())
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn get_with_headers(app: &Router, uri: &str, headers: &[(&str, &str)]) -> Response {
    let mut builder = Request::builder().uri(uri).header(header::HOST, "proxy.test");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    send(app, builder.body(Body::empty()).unwrap()).await
}

async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn manifest_uri(upstream: SocketAddr, path: &str) -> String {
    format!(
        "/m3u8-proxy?url={}",
        urlencoding::encode(&format!("http://{upstream}{path}"))
    )
}

async fn manifest_upstream(headers: HeaderMap) -> impl IntoResponse {
    let referer = headers
        .get(header::REFERER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-")
        .to_string();
    (
        [(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")],
        format!(
            "#EXTM3U\n#UPSTREAM-REFERER: {referer}\n#EXT-X-KEY:METHOD=AES-128,URI=\"k.key\"\nsub.m3u8\n#EXTINF:4.0,\nseg1.ts\n"
        ),
    )
}

#[tokio::test]
async fn manifest_is_rewritten_to_point_at_the_proxy() {
    let upstream = spawn_upstream(Router::new().route("/m/root.m3u8", get(manifest_upstream))).await;
    let app = proxy_router(Config::default());

    let response = get_with_headers(&app, &manifest_uri(upstream, "/m/root.m3u8"), &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/vnd.apple.mpegurl"
    );
    assert_eq!(response.headers().get("x-cache").unwrap(), "MISS");
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-cache"
    );

    let body = body_string(response).await;
    let sub = urlencoding::encode(&format!("http://{upstream}/m/sub.m3u8")).into_owned();
    let seg = urlencoding::encode(&format!("http://{upstream}/m/seg1.ts")).into_owned();
    let key = urlencoding::encode(&format!("http://{upstream}/m/k.key")).into_owned();

    assert!(body.contains(&format!("http://proxy.test/m3u8-proxy?url={sub}")));
    assert!(body.contains(&format!("http://proxy.test/ts-proxy?url={seg}")));
    assert!(body.contains(&format!("URI=\"http://proxy.test/ts-proxy?url={key}\"")));
}

#[tokio::test]
async fn second_manifest_request_is_served_from_cache() {
    let upstream = spawn_upstream(Router::new().route("/m/root.m3u8", get(manifest_upstream))).await;
    let app = proxy_router(Config::default());
    let uri = manifest_uri(upstream, "/m/root.m3u8");

    let first = get_with_headers(&app, &uri, &[]).await;
    assert_eq!(first.headers().get("x-cache").unwrap(), "MISS");
    let first_body = body_string(first).await;

    let second = get_with_headers(&app, &uri, &[]).await;
    assert_eq!(second.headers().get("x-cache").unwrap(), "HIT");
    assert_eq!(body_string(second).await, first_body);
}

#[tokio::test]
async fn caller_headers_reach_upstream_and_propagate_into_rewrites() {
    let upstream = spawn_upstream(Router::new().route("/m/root.m3u8", get(manifest_upstream))).await;
    let app = proxy_router(Config::default());

    let headers_json = r#"{"Referer":"https://player.example/"}"#;
    let uri = format!(
        "{}&headers={}",
        manifest_uri(upstream, "/m/root.m3u8"),
        urlencoding::encode(headers_json)
    );
    let response = get_with_headers(&app, &uri, &[]).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_string(response).await;
    assert!(body.contains("#UPSTREAM-REFERER: https://player.example/"));
    assert!(body.contains(&format!(
        "&headers={}",
        urlencoding::encode(headers_json)
    )));
}

async fn segment_upstream(headers: HeaderMap) -> Response {
    if headers.get(header::RANGE).is_some() {
        (
            StatusCode::PARTIAL_CONTENT,
            [
                ("content-type", "video/mp2t"),
                ("content-range", "bytes 0-1023/5000"),
                ("accept-ranges", "bytes"),
            ],
            vec![0u8; 1024],
        )
            .into_response()
    } else {
        (
            StatusCode::OK,
            [("content-type", "video/mp2t")],
            vec![0u8; 5000],
        )
            .into_response()
    }
}

#[tokio::test]
async fn range_requests_pass_through_with_partial_content() {
    let upstream = spawn_upstream(Router::new().route("/seg1.ts", get(segment_upstream))).await;
    let app = proxy_router(Config::default());

    let uri = format!(
        "/ts-proxy?url={}",
        urlencoding::encode(&format!("http://{upstream}/seg1.ts"))
    );
    let response = get_with_headers(&app, &uri, &[("range", "bytes=0-1023")]).await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        "bytes 0-1023/5000"
    );
    assert_eq!(response.headers().get(header::ACCEPT_RANGES).unwrap(), "bytes");
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "*"
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(bytes.len(), 1024);
}

#[tokio::test]
async fn non_range_segment_requests_stream_complete_bodies() {
    let upstream = spawn_upstream(Router::new().route("/seg1.ts", get(segment_upstream))).await;
    let app = proxy_router(Config::default());

    let uri = format!(
        "/ts-proxy?url={}",
        urlencoding::encode(&format!("http://{upstream}/seg1.ts"))
    );
    let response = get_with_headers(&app, &uri, &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "video/mp2t"
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(bytes.len(), 5000);
}

#[tokio::test]
async fn upstream_auth_failures_fold_into_403() {
    let upstream = spawn_upstream(Router::new().route(
        "/m/root.m3u8",
        get(|| async { (StatusCode::FORBIDDEN, "denied") }),
    ))
    .await;
    let app = proxy_router(Config::default());

    let response = get_with_headers(&app, &manifest_uri(upstream, "/m/root.m3u8"), &[]).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body = body_json(response).await;
    assert_eq!(body["code"], "UPSTREAM_403");
}

#[tokio::test]
async fn upstream_401_is_also_folded_into_403() {
    let upstream = spawn_upstream(Router::new().route(
        "/m/root.m3u8",
        get(|| async { (StatusCode::UNAUTHORIZED, "denied") }),
    ))
    .await;
    let app = proxy_router(Config::default());

    let response = get_with_headers(&app, &manifest_uri(upstream, "/m/root.m3u8"), &[]).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["code"], "UPSTREAM_403");
}

#[tokio::test]
async fn upstream_404_maps_to_not_found() {
    let upstream = spawn_upstream(Router::new()).await;
    let app = proxy_router(Config::default());

    let response = get_with_headers(&app, &manifest_uri(upstream, "/absent.m3u8"), &[]).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

#[tokio::test]
async fn unreachable_upstream_is_a_bad_gateway() {
    let app = proxy_router(Config::default());

    // Port 9 refuses connections immediately.
    let response = get_with_headers(
        &app,
        &format!(
            "/ts-proxy?url={}",
            urlencoding::encode("http://127.0.0.1:9/seg1.ts")
        ),
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(response).await["code"], "BAD_GATEWAY");
}

#[tokio::test]
async fn stalled_upstream_times_out_as_504() {
    let upstream = spawn_upstream(Router::new().route(
        "/slow.m3u8",
        get(|| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            "#EXTM3U\n"
        }),
    ))
    .await;

    let mut config = Config::default();
    config.upstream.request_timeout = Duration::from_millis(50);
    let app = proxy_router(config);

    let response = get_with_headers(&app, &manifest_uri(upstream, "/slow.m3u8"), &[]).await;
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body_json(response).await["code"], "TIMEOUT");
}

#[tokio::test]
async fn missing_url_parameter_is_a_400() {
    let app = proxy_router(Config::default());
    let response = get_with_headers(&app, "/m3u8-proxy", &[]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "URL_MALFORMED");
}

#[tokio::test]
async fn smuggled_second_url_is_rejected() {
    let app = proxy_router(Config::default());
    let uri = format!(
        "/m3u8-proxy?url={}",
        urlencoding::encode("https://a.example/x.m3u8https://b.example/y.m3u8")
    );
    let response = get_with_headers(&app, &uri, &[]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "URL_MALFORMED");
}

#[tokio::test]
async fn hosts_outside_the_allowlist_are_refused() {
    let mut config = Config::default();
    config.policy.allowed_hosts = vec!["allowed.example".to_string()];
    let app = proxy_router(config);

    let uri = format!(
        "/ts-proxy?url={}",
        urlencoding::encode("http://127.0.0.1:9/seg1.ts")
    );
    let response = get_with_headers(&app, &uri, &[]).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body = body_json(response).await;
    assert_eq!(body["code"], "HOST_NOT_ALLOWED");
    assert_eq!(body["host"], "127.0.0.1");
}

#[tokio::test]
async fn fourth_request_in_window_is_throttled() {
    let mut config = Config::default();
    config.throttle.max_requests = 3;
    config.throttle.window = Duration::from_secs(60);
    let app = proxy_router(config);

    for _ in 0..3 {
        let response = get_with_headers(&app, "/health", &[]).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = get_with_headers(&app, "/health", &[]).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let body = body_json(response).await;
    assert_eq!(body["code"], "RATE_LIMIT_EXCEEDED");
    assert_eq!(body["retryAfter"], 60);
}

#[tokio::test]
async fn forwarded_for_header_keys_the_throttler() {
    let mut config = Config::default();
    config.throttle.max_requests = 1;
    let app = proxy_router(config);

    let first = get_with_headers(&app, "/health", &[("x-forwarded-for", "203.0.113.9")]).await;
    assert_eq!(first.status(), StatusCode::OK);

    let other = get_with_headers(&app, "/health", &[("x-forwarded-for", "203.0.113.10")]).await;
    assert_eq!(other.status(), StatusCode::OK);

    let repeat = get_with_headers(&app, "/health", &[("x-forwarded-for", "203.0.113.9")]).await;
    assert_eq!(repeat.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn preflight_gets_204_with_the_full_header_set() {
    let app = proxy_router(Config::default());
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/ts-proxy")
        .header(header::HOST, "proxy.test")
        .body(Body::empty())
        .unwrap();

    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let headers = response.headers();
    assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
    assert_eq!(
        headers.get(header::ACCESS_CONTROL_ALLOW_METHODS).unwrap(),
        "GET, HEAD, OPTIONS"
    );
    assert_eq!(headers.get(header::ACCESS_CONTROL_MAX_AGE).unwrap(), "86400");
    assert_eq!(
        headers
            .get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
            .unwrap(),
        "false"
    );
}

#[tokio::test]
async fn error_responses_still_carry_cors() {
    let app = proxy_router(Config::default());
    let response = get_with_headers(&app, "/m3u8-proxy", &[]).await;
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "*"
    );
}

#[tokio::test]
async fn resolver_skips_blocked_alternative_and_returns_the_allowed_one() {
    let upstream = spawn_upstream(Router::new().route(
        "/p.m3u8",
        get(|| async {
            (
                [(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")],
                "#EXTM3U\n",
            )
        }),
    ))
    .await;

    let mut config = Config::default();
    config.policy.allowed_hosts = vec!["127.0.0.1".to_string()];
    let app = proxy_router(config);

    let target = format!("http://{upstream}/p.m3u8");
    let body = serde_json::json!({
        "url": format!("https://bad.example/x or {target}"),
    });
    let request = Request::builder()
        .method(Method::POST)
        .uri("/resolve")
        .header(header::HOST, "proxy.test")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["resolved"], true);
    assert_eq!(body["url"], target);
}

#[tokio::test]
async fn subtitles_default_to_vtt_with_a_public_cache_lifetime() {
    let upstream = spawn_upstream(Router::new().route(
        "/sub.vtt",
        get(|| async {
            Response::builder()
                .body(Body::from("WEBVTT\n"))
                .unwrap()
        }),
    ))
    .await;
    let app = proxy_router(Config::default());

    let uri = format!(
        "/sub-proxy?url={}",
        urlencoding::encode(&format!("http://{upstream}/sub.vtt"))
    );
    let response = get_with_headers(&app, &uri, &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "text/vtt");
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "public, max-age=3600"
    );
    assert_eq!(body_string(response).await, "WEBVTT\n");
}

#[tokio::test]
async fn status_endpoint_reports_the_derived_base_url() {
    let app = proxy_router(Config::default());

    // No forwarding hint: the scheme is the connection's own.
    let response = get_with_headers(&app, "/proxy/status", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["serverUrl"], "http://proxy.test");
    assert_eq!(body["protocol"], "http");
    assert_eq!(body["host"], "proxy.test");
    assert_eq!(body["reqProtocol"], "http");

    // A TLS-terminating balancer announces itself via X-Forwarded-Proto.
    let response =
        get_with_headers(&app, "/proxy/status", &[("x-forwarded-proto", "https")]).await;
    let body = body_json(response).await;
    assert_eq!(body["serverUrl"], "https://proxy.test");
    assert_eq!(body["protocol"], "https");
    assert_eq!(body["xForwardedProto"], "https");
    assert_eq!(body["reqProtocol"], "http");
}

#[tokio::test]
async fn metrics_reflect_proxied_requests() {
    let upstream = spawn_upstream(Router::new().route("/m/root.m3u8", get(manifest_upstream))).await;
    let app = proxy_router(Config::default());

    get_with_headers(&app, &manifest_uri(upstream, "/m/root.m3u8"), &[]).await;
    get_with_headers(&app, &manifest_uri(upstream, "/m/root.m3u8"), &[]).await;

    let response = get_with_headers(&app, "/proxy/metrics", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["global"]["requests"], 2);
    assert_eq!(body["global"]["manifest"]["requests"], 2);
    assert_eq!(body["hosts"]["127.0.0.1"]["requests"], 2);
    // First request missed, second hit.
    assert_eq!(body["playlistCache"]["hits"], 1);
    assert_eq!(body["playlistCache"]["misses"], 1);

    let reset = Request::builder()
        .method(Method::POST)
        .uri("/proxy/metrics/reset")
        .header(header::HOST, "proxy.test")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, reset).await.status(), StatusCode::OK);

    let response = get_with_headers(&app, "/proxy/metrics", &[]).await;
    let body = body_json(response).await;
    assert_eq!(body["global"]["requests"], 0);
}

#[tokio::test]
async fn cache_flush_forces_a_fresh_rewrite() {
    let upstream = spawn_upstream(Router::new().route("/m/root.m3u8", get(manifest_upstream))).await;
    let app = proxy_router(Config::default());
    let uri = manifest_uri(upstream, "/m/root.m3u8");

    get_with_headers(&app, &uri, &[]).await;
    let hit = get_with_headers(&app, &uri, &[]).await;
    assert_eq!(hit.headers().get("x-cache").unwrap(), "HIT");

    let flush = Request::builder()
        .method(Method::POST)
        .uri("/proxy/cache/flush")
        .header(header::HOST, "proxy.test")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, flush).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["flushed"], 1);

    let fresh = get_with_headers(&app, &uri, &[]).await;
    assert_eq!(fresh.headers().get("x-cache").unwrap(), "MISS");
}

#[tokio::test]
async fn proxy_hls_is_an_alias_taking_a_link_parameter() {
    let upstream = spawn_upstream(Router::new().route("/m/root.m3u8", get(manifest_upstream))).await;
    let app = proxy_router(Config::default());

    let uri = format!(
        "/proxy/hls?link={}",
        urlencoding::encode(&format!("http://{upstream}/m/root.m3u8"))
    );
    let response = get_with_headers(&app, &uri, &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.contains("http://proxy.test/ts-proxy?url="));
}

#[tokio::test]
async fn post_manifest_accepts_a_json_body() {
    let upstream = spawn_upstream(Router::new().route("/m/root.m3u8", get(manifest_upstream))).await;
    let app = proxy_router(Config::default());

    let body = serde_json::json!({
        "url": format!("http://{upstream}/m/root.m3u8"),
        "headers": {"Referer": "https://player.example/"},
    });
    let request = Request::builder()
        .method(Method::POST)
        .uri("/m3u8-proxy")
        .header(header::HOST, "proxy.test")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();

    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::OK);

    let text = body_string(response).await;
    assert!(text.contains("#UPSTREAM-REFERER: https://player.example/"));
    assert!(text.contains("&headers="));
}
