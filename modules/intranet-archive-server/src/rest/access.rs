use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Redirect, Response},
    Form,
};
use serde::Deserialize;
use url::Url;

use intranet_archive_access::AccessRequest;
use intranet_archive_common::ArchiveError;

use super::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct AccessForm {
    pub sig: Option<String>,
    pub payload: Option<String>,
}

/// POST /access: exchange a signed grant for CDN cookies and a redirect.
pub async fn access(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Form(form): Form<AccessForm>,
) -> Result<Response, ApiError> {
    let client_ip = client_ip(&headers, peer);

    if !state.rate_limiter.check(client_ip).await {
        return Err(ArchiveError::RateLimited.into());
    }

    let granted = state.gateway.grant(&AccessRequest {
        signature: form.sig,
        payload: form.payload,
        app_origin: app_origin(&headers)?,
        client_ip: Some(client_ip),
    })?;

    let mut response = Redirect::to(&granted.redirect).into_response();
    for cookie in &granted.set_cookies {
        let value = HeaderValue::from_str(cookie)
            .map_err(|e| ArchiveError::Validation(format!("Invalid cookie header: {e}")))?;
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    Ok(response)
}

/// The proxy's `x-real-ip` wins over the socket peer.
fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or_else(|| peer.ip())
}

fn app_origin(headers: &HeaderMap) -> Result<Url, ApiError> {
    let first = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    let scheme = first("x-forwarded-proto").unwrap_or("http");
    let host = first("x-forwarded-host")
        .or_else(|| first(header::HOST.as_str()))
        .ok_or_else(|| ArchiveError::Validation("Invalid host".into()))?;
    Url::parse(&format!("{scheme}://{host}"))
        .map_err(|_| ArchiveError::Validation("Invalid host".into()).into())
}
