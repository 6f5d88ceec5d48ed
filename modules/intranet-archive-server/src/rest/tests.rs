use std::net::SocketAddr;

use axum::{
    body::{to_bytes, Body},
    extract::connect_info::MockConnectInfo,
    http::{header, Request, StatusCode},
    Router,
};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use chrono::Utc;
use tower::ServiceExt;

use intranet_archive_access::sign_payload;

use super::router;
use super::test_support::{state, SECRET};

fn app(max_requests: usize) -> Router {
    let (state, _store) = state(max_requests);
    router(state, &[]).layer(MockConnectInfo(SocketAddr::from(([10, 0, 0, 7], 40000))))
}

fn form(uri: &str, body: String) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header(header::HOST, "app.archive.dev.intranet.docker")
        .body(Body::from(body))
        .unwrap()
}

fn encode(value: &str) -> String {
    value
        .replace('%', "%25")
        .replace('+', "%2B")
        .replace('/', "%2F")
        .replace('=', "%3D")
}

fn grant_form(agency: &str) -> String {
    let expiry = Utc::now().timestamp() + 600;
    let payload = B64.encode(format!(
        r#"{{"agency":"{agency}","expiry":{expiry},"hostname":"dev.intranet.docker"}}"#
    ));
    let sig = sign_payload(&payload, SECRET);
    format!("sig={}&payload={}", encode(&sig), encode(&payload))
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_is_ok_and_uncached() {
    let response = app(20)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
}

#[tokio::test]
async fn access_sets_cookies_and_redirects() {
    let response = app(20)
        .oneshot(form("/access", grant_form("hq")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers()[header::LOCATION],
        "http://archive.dev.intranet.docker/dev-hq/index.html"
    );
    let cookies: Vec<_> = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert!(cookies[0].starts_with("CloudFront-Key-Pair-Id=KTEST"));
    assert!(cookies[..3].iter().all(|c| !c.contains("Max-Age=0")));
    assert!(cookies[3..].iter().all(|c| c.contains("Max-Age=0")));
}

#[tokio::test]
async fn access_without_signature_is_a_bad_request() {
    let response = app(20)
        .oneshot(form("/access", "payload=abc".to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["status"], 400);
}

#[tokio::test]
async fn access_with_wrong_signature_is_forbidden() {
    let body = grant_form("hq").replacen("sig=", "sig=AAAA", 1);
    let response = app(20).oneshot(form("/access", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["status"], 403);
}

#[tokio::test]
async fn access_for_disallowed_agency_is_rejected() {
    let response = app(20)
        .oneshot(form("/access", grant_form("laa")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn access_is_rate_limited_per_client() {
    let app = app(2);
    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(form("/access", grant_form("hq")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
    }
    let response = app
        .clone()
        .oneshot(form("/access", grant_form("hq")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // A different forwarded client has its own window.
    let mut request = form("/access", grant_form("hq"));
    request
        .headers_mut()
        .insert("x-real-ip", "203.0.113.9".parse().unwrap());
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn spider_rejects_unknown_environment_and_agency() {
    for body in ["env=preprod&agency=hq", "env=dev&agency=laa", "env=dev&agency=hq&depth=deep"] {
        let response = app(20)
            .oneshot(form("/spider", body.to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(json_body(response).await["status"], 400);
    }
}

#[tokio::test]
async fn spider_accepts_a_valid_job() {
    let response = app(20)
        .oneshot(form("/spider", "env=dev&agency=hq&depth=1".to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], 200);
}

#[tokio::test]
async fn metrics_are_exposed_as_text() {
    let (state, store) = state(20);
    store.insert("dev-hq/2024-01-17/dev.intranet.docker/index.html", "<html></html>");
    let response = router(state, &[])
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("# TYPE bucket_access gauge"));
    assert!(text.ends_with("EOF\n"));
}

#[tokio::test]
async fn status_reports_bucket_reachability() {
    let (state, store) = state(20);
    let app = router(state, &[]);
    let response = app
        .clone()
        .oneshot(Request::get("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(json_body(response).await["bucket"], true);

    // Served from cache for five minutes.
    store.set_unreachable(true);
    let response = app
        .oneshot(Request::get("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(json_body(response).await["bucket"], true);
}
