use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, COOKIE, HOST};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use campus_api::{RequestContext, headers};
use campus_core::{canonical_path, is_canonical_path};
use tracing::{debug, warn};

use crate::gate::{Gate, GateRequest};

/// axum middleware running every request through the [`Gate`].
///
/// Install with `axum::middleware::from_fn_with_state(gate, gate_middleware)`.
/// Allowed requests continue with the trusted `x-tenant-*` / `x-user-*`
/// headers and a [`RequestContext`] extension; everything else becomes a
/// `307` redirect.
///
/// A path that only becomes what the policy judges after decoding or
/// resolving dot segments (`/admin/x/..%2F..%2Flogin`) is redirected to its
/// canonical form first, so the path that gets admitted is byte for byte the
/// path that reaches the application.
pub async fn gate_middleware(State(gate): State<Arc<Gate>>, mut req: Request, next: Next) -> Response {
    // Clients never get to speak for the gate, not even on bypassed paths.
    strip_trusted_headers(req.headers_mut());

    let path = req.uri().path().to_string();
    if !is_canonical_path(&path) {
        let canonical = canonical_path(&path);
        debug!(path = %path, canonical = %canonical, "redirecting to canonical path");
        let location = match req.uri().query() {
            Some(query) => format!("{canonical}?{query}"),
            None => canonical,
        };
        return Redirect::temporary(&location).into_response();
    }
    if gate.is_bypassed(&path) {
        return next.run(req).await;
    }

    let host = request_host(&req);
    let cookie = joined_cookies(req.headers());
    let authorization = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let admission = gate
        .admit(&GateRequest {
            host: &host,
            path: &path,
            cookie: cookie.as_deref(),
            authorization: authorization.as_deref(),
        })
        .await;

    let Some(context) = admission.context else {
        let location = admission
            .location
            .unwrap_or_else(|| gate.config().pages.unauthorized.clone());
        return Redirect::temporary(&location).into_response();
    };

    if let Err(name) = attach_context(req.headers_mut(), &context) {
        warn!(header = name, "context value is not a valid header; refusing request");
        return Redirect::temporary(&gate.config().pages.unauthorized).into_response();
    }
    req.extensions_mut().insert(context);
    next.run(req).await
}

/// Remove every inbound copy of the headers the gate owns.
pub fn strip_trusted_headers(map: &mut HeaderMap) {
    for name in headers::ALL {
        map.remove(name);
    }
}

fn attach_context(map: &mut HeaderMap, context: &RequestContext) -> Result<(), &'static str> {
    for (name, value) in context.header_pairs() {
        let value = HeaderValue::from_str(&value).map_err(|_| name)?;
        map.insert(HeaderName::from_static(name), value);
    }
    Ok(())
}

fn request_host(req: &Request) -> String {
    req.headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().authority().map(|a| a.as_str().to_string()))
        .unwrap_or_default()
}

// HTTP/2 clients may split cookies across several headers.
fn joined_cookies(map: &HeaderMap) -> Option<String> {
    let parts: Vec<&str> = map
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("; "))
    }
}
