use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::{Instrument, debug, error, info_span, warn};
use uuid::Uuid;

use crate::application::error::ErrorReport;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_REQUEST_ID_LEN: usize = 128;
const LOG_TARGET: &str = "sluice::http::response";

/// Per-request context. Callers may pass their own `x-request-id` (a CMS job id,
/// say) so queued invalidation can be traced back to the change that caused it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub operation: &'static str,
}

impl RequestContext {
    fn from_request(request: &Request<Body>) -> Self {
        Self {
            request_id: caller_request_id(request.headers())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            operation: operation_for(request.uri().path()),
        }
    }
}

/// Attach a [`RequestContext`], run the request inside a span carrying it, and
/// echo the request id back.
pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let ctx = RequestContext::from_request(&request);
    request.extensions_mut().insert(ctx.clone());

    let span = info_span!(
        "http_request",
        request_id = %ctx.request_id,
        operation = ctx.operation,
    );
    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response.extensions_mut().insert(ctx);
    response
}

/// Log failed responses with the attached [`ErrorReport`]; dispatch calls are
/// also logged on success since they reach the cache servers.
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started_at = Instant::now();
    let ctx = request.extensions().get::<RequestContext>().cloned();
    let operation = ctx.as_ref().map_or("other", |ctx| ctx.operation);

    let mut response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = started_at.elapsed().as_millis();

    if !(status.is_client_error() || status.is_server_error()) {
        if matches!(operation, "purge" | "ban" | "changes") {
            debug!(
                target: LOG_TARGET,
                status = status.as_u16(),
                %method,
                path = %path,
                operation,
                elapsed_ms,
                "dispatch request served"
            );
        }
        return response;
    }

    let report = response.extensions_mut().remove::<ErrorReport>();
    let (source, messages) = report.map_or(("unknown", Vec::new()), |report| {
        (report.source, report.messages)
    });
    let detail = messages.first().map_or("no diagnostic available", String::as_str);

    if status.is_server_error() {
        error!(
            target: LOG_TARGET,
            status = status.as_u16(),
            %method,
            path = %path,
            operation,
            elapsed_ms,
            source,
            detail,
            chain = ?messages,
            "request failed"
        );
    } else if status != StatusCode::UNAUTHORIZED {
        warn!(
            target: LOG_TARGET,
            status = status.as_u16(),
            %method,
            path = %path,
            operation,
            elapsed_ms,
            source,
            detail,
            "client request error"
        );
    } else {
        // Missing tokens stay at debug.
        debug!(target: LOG_TARGET, %method, path = %path, "unauthenticated request");
    }

    response
}

fn caller_request_id(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(REQUEST_ID_HEADER)?.to_str().ok()?.trim();
    let valid = !value.is_empty()
        && value.len() <= MAX_REQUEST_ID_LEN
        && value
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || b"-_.:".contains(&byte));
    valid.then(|| value.to_string())
}

/// Coarse operation name of an API path, used as a log and span field.
fn operation_for(path: &str) -> &'static str {
    let Some(rest) = path.strip_prefix("/api/v1/") else {
        return if path == "/health" { "health" } else { "other" };
    };
    match rest.split('/').next().unwrap_or_default() {
        "purge" => "purge",
        "ban" => "ban",
        "bans" => "bans",
        "changes" => "changes",
        "bindings" | "sections" => "bindings",
        "uris" => "uris",
        "diagnostics" => "diagnostics",
        _ => "other",
    }
}
