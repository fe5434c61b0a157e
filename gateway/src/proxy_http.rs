//! HTTP reverse proxy (§4.6): resolve the endpoint's microservice and
//! forward the request byte-for-byte, surfacing upstream failures and the
//! binary `application/pdf` passthrough case, then append an audit row.

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use serde_json::Value;

use crate::auth::AuthenticatedUser;
use crate::db::NewHistoricalMovement;
use crate::error::GatewayError;
use crate::policy::strip_gateway_prefix;
use crate::AppState;

/// Matches the source's 600 s upstream timeout (§4.6 step 5).
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(600);
/// Request bodies are buffered whole before forwarding; generous enough for
/// the document payloads §1 calls out without accepting unbounded input.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

pub async fn forward(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
) -> Result<Response, GatewayError> {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let headers = request.headers().clone();
    let user_id = request
        .extensions()
        .get::<AuthenticatedUser>()
        .and_then(|user| user.claims.get("id"))
        .and_then(Value::as_i64)
        .map(|id| id as i32);
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let body_bytes = to_bytes(request.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|err| GatewayError::Internal(anyhow::anyhow!("failed to buffer request body: {err}")))?;

    let path = strip_gateway_prefix(uri.path()).to_string();
    let query = uri.query().map(str::to_string);

    let outcome = forward_to_upstream(&state, &method, &path, query.as_deref(), &headers, body_bytes).await;

    record_movement(&state, &path, &method, query.as_deref(), peer, user_agent.as_deref(), user_id, &outcome)
        .await;

    outcome
}

async fn forward_to_upstream(
    state: &AppState,
    method: &Method,
    path: &str,
    query: Option<&str>,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    if state.repo.get_endpoint_by_url(path).await?.is_none() {
        return Err(GatewayError::EndpointNotFound);
    }

    let base_url = state.repo.get_microservice_base_url(path).await?;
    let mut upstream_url = format!("{}{}", base_url.trim_end_matches('/'), path);
    if let Some(query) = query {
        upstream_url.push('?');
        upstream_url.push_str(query);
    }

    let upstream_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
        .map_err(|err| GatewayError::Internal(anyhow::anyhow!("invalid HTTP method: {err}")))?;

    let mut builder = state
        .http_client
        .request(upstream_method, &upstream_url)
        .timeout(UPSTREAM_TIMEOUT)
        .body(body);
    for (name, value) in headers.iter() {
        if name == axum::http::header::HOST {
            continue;
        }
        builder = builder.header(name, value);
    }

    let response = builder
        .send()
        .await
        .map_err(|_| GatewayError::UpstreamUnavailable)?;

    let status = response.status();
    let content_type = response
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/json")
        .to_string();
    let body_bytes = response.bytes().await.map_err(|_| GatewayError::UpstreamUnavailable)?;

    if status != StatusCode::OK {
        let detail = serde_json::from_slice::<Value>(&body_bytes)
            .ok()
            .and_then(|value| value.get("detail").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(GatewayError::UpstreamStatus {
            status: status.as_u16(),
            detail,
        });
    }

    if content_type == "application/pdf" {
        let mut response = Response::new(Body::from(body_bytes));
        *response.status_mut() = StatusCode::OK;
        response.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/pdf"),
        );
        response.headers_mut().insert(
            axum::http::header::CONTENT_DISPOSITION,
            HeaderValue::from_static("inline; filename=documento_oficial.pdf"),
        );
        return Ok(response);
    }

    let mut response = Response::new(Body::from(body_bytes));
    *response.status_mut() = StatusCode::OK;
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        response.headers_mut().insert(axum::http::header::CONTENT_TYPE, value);
    }
    Ok(response)
}

#[allow(clippy::too_many_arguments)]
async fn record_movement(
    state: &AppState,
    path: &str,
    method: &Method,
    query: Option<&str>,
    peer: SocketAddr,
    user_agent: Option<&str>,
    user_id: Option<i32>,
    outcome: &Result<Response, GatewayError>,
) {
    let system = state
        .repo
        .get_microservice_systems(path)
        .await
        .unwrap_or_default()
        .into_iter()
        .next();

    let details = match outcome {
        Ok(_) => "forwarded".to_string(),
        Err(err) => format!("error: {err}"),
    };

    let peer_ip = peer.ip().to_string();
    if let Err(err) = state
        .repo
        .insert_historical_movement(NewHistoricalMovement {
            url_request: path,
            type_request: method.as_str(),
            system: system.as_deref(),
            user_ip: &peer_ip,
            user_browser: user_agent,
            query,
            details: &details,
            user_id,
        })
        .await
    {
        tracing::warn!(error = %err, "failed to record historical movement");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_prefix_is_stripped_before_endpoint_lookup() {
        assert_eq!(strip_gateway_prefix("/gateway/orders/42"), "/orders/42");
    }
}
