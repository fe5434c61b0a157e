//! Authenticating API gateway.
//!
//! Fronts a collection of backend microservices: rate-limits inbound
//! traffic, verifies RSA-signed bearer credentials, authorizes each request
//! against a role/group/system policy model, and forwards admitted traffic
//! to the resolved upstream over HTTP or WebSocket.

pub mod auth;
pub mod db;
pub mod error;
pub mod flows;
pub mod hashing;
pub mod jwt;
pub mod policy;
pub mod proxy_http;
pub mod proxy_ws;
pub mod rate_limit;
pub mod router;
pub mod vault;

use std::sync::Arc;

use gateway_core::GatewayConfig;

use crate::db::Repository;
use crate::jwt::JwtManager;
use crate::policy::AuthorizationEngine;
use crate::rate_limit::RateLimiter;

/// Root collaborator set shared by every handler. The source wires its
/// equivalents (`HASHING`, `KEY_CODE`, `PERMISSION_HELPER`, ...) as
/// module-level singletons; here they are constructor-injected once at
/// startup and handed to axum as shared state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub repo: Arc<Repository>,
    pub jwt: Arc<JwtManager>,
    pub authz: Arc<AuthorizationEngine>,
    pub rate_limiter: Arc<RateLimiter>,
    pub http_client: reqwest::Client,
}
