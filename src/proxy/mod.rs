use crate::error::{LimiterError, Result};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Method, Request, Response},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Proxy handler state
#[derive(Clone)]
pub struct ProxyState {
    upstream: Arc<str>,
    client: reqwest::Client,
}

impl ProxyState {
    /// Create a new proxy state forwarding to `upstream`
    pub fn new(upstream: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LimiterError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            upstream: Arc::from(upstream.trim_end_matches('/')),
            client,
        })
    }

    /// Upstream URL for a request path and query
    fn upstream_url(&self, path: &str, query: Option<&str>) -> String {
        match query {
            Some(q) => format!("{}{}?{}", self.upstream, path, q),
            None => format!("{}{}", self.upstream, path),
        }
    }
}

/// Forward an admitted request to the upstream service unchanged
pub async fn proxy_handler(
    State(state): State<ProxyState>,
    req: Request<Body>,
) -> Result<Response<Body>> {
    let started = Instant::now();
    let method = req.method().clone();
    let url = state.upstream_url(req.uri().path(), req.uri().query());
    let headers = req.headers().clone();

    debug!(method = %method, url = %url, "Forwarding to upstream");

    let body_bytes = req
        .into_body()
        .collect()
        .await
        .map_err(|e| LimiterError::Proxy(format!("Failed to read request body: {}", e)))?
        .to_bytes();

    match send_request(&state.client, method.clone(), headers, body_bytes, &url).await {
        Ok(response) => {
            info!(
                method = %method,
                status = %response.status(),
                latency_ms = started.elapsed().as_secs_f64() * 1000.0,
                "Request completed"
            );
            Ok(response)
        }
        Err(e) => {
            warn!(
                method = %method,
                error = %e,
                latency_ms = started.elapsed().as_secs_f64() * 1000.0,
                "Request failed"
            );
            Err(e)
        }
    }
}

/// Send request to the upstream service
async fn send_request(
    client: &reqwest::Client,
    method: Method,
    headers: HeaderMap,
    body_bytes: Bytes,
    url: &str,
) -> Result<Response<Body>> {
    let mut upstream_req = client.request(method, url).body(body_bytes);

    // Forward headers (excluding hop-by-hop headers)
    for (name, value) in headers.iter() {
        if !is_hop_by_hop_header(name.as_str()) && name.as_str() != "host" {
            upstream_req = upstream_req.header(name, value);
        }
    }

    let upstream_response = upstream_req.send().await.map_err(|e| {
        if e.is_timeout() {
            LimiterError::Timeout(format!("Upstream request timed out: {}", e))
        } else if e.is_connect() {
            LimiterError::Backend(format!("Failed to connect to upstream: {}", e))
        } else {
            LimiterError::Proxy(format!("Upstream request failed: {}", e))
        }
    })?;

    let mut response_builder = Response::builder().status(upstream_response.status());

    for (name, value) in upstream_response.headers().iter() {
        if !is_hop_by_hop_header(name.as_str()) {
            response_builder = response_builder.header(name, value);
        }
    }

    let body_bytes = upstream_response
        .bytes()
        .await
        .map_err(|e| LimiterError::Backend(format!("Failed to read upstream response: {}", e)))?;

    response_builder
        .body(Body::from(body_bytes))
        .map_err(|e| LimiterError::Internal(format!("Failed to build response: {}", e)))
}

/// Check if a header is a hop-by-hop header that should not be forwarded
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}
