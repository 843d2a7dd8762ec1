//! Reverse proxy to the live side.
//!
//! Each request reads the redirect table once and is forwarded to whatever
//! target it saw. Bodies are streamed in both directions as they arrive.

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::TryStreamExt;
use reqwest::{redirect::Policy, Client};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::redirect::RedirectTarget;
use crate::AppState;

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// HTTP client for talking to the sides. Redirects are passed back to the
/// caller untouched, and environment proxy settings are ignored.
pub fn proxy_client() -> Result<Client> {
    Client::builder()
        .redirect(Policy::none())
        .no_proxy()
        .build()
        .context("Failed to build proxy HTTP client")
}

pub async fn proxy_handler(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let Some(target) = state.redirect.current() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "No deployment is live yet\n").into_response();
    };

    match forward(&state.proxy_client, &target, request).await {
        Ok(response) => response,
        Err(e) => {
            warn!("Proxying to {} failed: {:#}", target, e);
            (StatusCode::BAD_GATEWAY, "Bad gateway\n").into_response()
        }
    }
}

async fn forward(client: &Client, target: &RedirectTarget, request: Request) -> Result<Response> {
    let (parts, body) = request.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = target.url_for(path_and_query);
    debug!("Forwarding {} {} to {}", parts.method, path_and_query, target);

    let client_ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let original_host = parts.headers.get(header::HOST).cloned();

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    if let Some(ip) = client_ip {
        append_forwarded_for(&mut headers, ip);
    }
    if let Some(host) = original_host {
        headers.insert(X_FORWARDED_HOST, host);
    }
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));

    let upstream = client
        .request(parts.method, &url)
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send()
        .await
        .with_context(|| format!("Request to {} failed", url))?;

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    strip_hop_by_hop(&mut response_headers);

    let stream = upstream.bytes_stream().map_err(move |e| {
        warn!("Upstream body from {} broke off: {}", url, e);
        e
    });

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}

/// Remove the standard hop-by-hop headers and any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Add `ip` to the end of the `X-Forwarded-For` chain.
pub fn append_forwarded_for(headers: &mut HeaderMap, ip: IpAddr) {
    let chain = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.trim().is_empty() => format!("{}, {}", existing, ip),
        _ => ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&chain) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_hop_by_hop_removes_standard_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::CONTENT_TYPE));
    }

    #[test]
    fn test_strip_hop_by_hop_removes_headers_named_in_connection() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONNECTION,
            HeaderValue::from_static("close, X-Session-Token"),
        );
        headers.insert("x-session-token", HeaderValue::from_static("abc"));
        headers.insert("x-request-id", HeaderValue::from_static("42"));

        strip_hop_by_hop(&mut headers);

        assert!(!headers.contains_key("x-session-token"));
        assert!(!headers.contains_key(header::CONNECTION));
        assert!(headers.contains_key("x-request-id"));
    }

    #[test]
    fn test_append_forwarded_for_starts_chain() {
        let mut headers = HeaderMap::new();

        append_forwarded_for(&mut headers, "10.0.0.7".parse().unwrap());

        assert_eq!(headers.get("x-forwarded-for").unwrap(), "10.0.0.7");
    }

    #[test]
    fn test_append_forwarded_for_extends_chain() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.1"));

        append_forwarded_for(&mut headers, "::1".parse().unwrap());

        assert_eq!(
            headers.get("x-forwarded-for").unwrap(),
            "203.0.113.1, ::1"
        );
    }
}
