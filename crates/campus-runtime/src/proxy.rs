use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use campus_api::{GateError, RequestContext, headers as trusted};
use tracing::warn;

const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Origin that admitted requests are forwarded to.
pub struct Upstream {
    base_url: String,
    client: reqwest::Client,
}

impl Upstream {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GateError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(GateError::Validation(format!(
                "upstream must be an http(s) URL, got {base_url}"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GateError::Internal(format!("http client: {e}")))?;
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Fallback handler forwarding the (already admitted) request upstream.
pub async fn forward(State(upstream): State<Arc<Upstream>>, req: Request) -> Response {
    match forward_inner(&upstream, req).await {
        Ok(resp) => resp,
        Err(e) => {
            warn!(upstream = %upstream.base_url, error = %e, "upstream request failed");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

async fn forward_inner(upstream: &Upstream, req: Request) -> Result<Response, GateError> {
    let (parts, body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map_or("/", |pq| pq.as_str());
    let url = format!("{}{path_and_query}", upstream.base_url);

    let body = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| GateError::Validation(format!("request body: {e}")))?;

    let mut headers = parts.headers;
    drop_hop_by_hop(&mut headers);
    // The original host is kept for the upstream in `x-forwarded-host`.
    if let Some(host) = headers.remove(header::HOST) {
        headers.insert("x-forwarded-host", host);
    }

    let resp = upstream
        .client
        .request(parts.method, url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| GateError::Connection(e.to_string()))?;

    let status = resp.status();
    let mut resp_headers = resp.headers().clone();
    drop_hop_by_hop(&mut resp_headers);
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| GateError::Connection(e.to_string()))?;

    let mut out = Response::new(Body::from(bytes));
    *out.status_mut() = status;
    *out.headers_mut() = resp_headers;
    Ok(out)
}

fn drop_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named in `Connection` are hop-by-hop too, except the ones the
    // gate attached: a client must not be able to unset its own context.
    let named: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty() && !trusted::ALL.contains(&s.as_str()))
        .collect();
    for name in named.iter().map(String::as_str).chain(HOP_BY_HOP) {
        headers.remove(name);
    }
}

/// Stand-in downstream that reports what the gate attached.
pub async fn context_echo(req: Request) -> Response {
    match req.extensions().get::<RequestContext>() {
        Some(ctx) => Json(ctx.clone()).into_response(),
        None => Json(RequestContext::default()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn hop_by_hop_headers_are_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-private"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-private", HeaderValue::from_static("1"));
        headers.insert("x-tenant-id", HeaderValue::from_static("t-acme"));
        drop_hop_by_hop(&mut headers);

        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get("keep-alive").is_none());
        assert!(headers.get("x-private").is_none());
        assert_eq!(headers.get("x-tenant-id").unwrap(), "t-acme");
    }

    #[test]
    fn connection_cannot_name_gate_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONNECTION,
            HeaderValue::from_static("X-Tenant-Id, x-user-roles,x-private"),
        );
        headers.insert("x-tenant-id", HeaderValue::from_static("t-acme"));
        headers.insert("x-user-roles", HeaderValue::from_static("TEACHER"));
        headers.insert("x-private", HeaderValue::from_static("1"));
        drop_hop_by_hop(&mut headers);

        assert_eq!(headers.get("x-tenant-id").unwrap(), "t-acme");
        assert_eq!(headers.get("x-user-roles").unwrap(), "TEACHER");
        assert!(headers.get("x-private").is_none());
    }

    #[test]
    fn upstream_must_be_http() {
        assert!(Upstream::new("ftp://x", Duration::from_secs(1)).is_err());
        let u = Upstream::new("http://127.0.0.1:3000/", Duration::from_secs(1)).unwrap();
        assert_eq!(u.base_url(), "http://127.0.0.1:3000");
    }
}
