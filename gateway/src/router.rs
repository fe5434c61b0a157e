//! Endpoint router (§6): wires the `/authentication/*`, `/gateway/*`, and
//! `/ws/*` surfaces, the rate limiter and bearer-auth middleware layers, and
//! the ambient health/metrics probes onto a single axum `Router`.

use axum::http::Method;
use axum::middleware;
use axum::routing::{any, get, on, post, MethodFilter};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::require_bearer;
use crate::flows::{login, register};
use crate::proxy_http;
use crate::proxy_ws;
use crate::rate_limit::admit;
use crate::AppState;

/// Build the gateway's public HTTP/WebSocket router. Matches the control
/// flow in §5: rate limiting is outermost (applies to every admitted
/// connection, authenticated or not), bearer auth runs next and is the
/// layer that decides per-path whether the request may proceed.
pub fn build(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let admission_pipeline = Router::new()
        .route("/authentication/login", post(login))
        .route("/authentication/register", post(register))
        .route("/gateway/*rest", on(proxy_method_filter(), proxy_http::forward))
        .route("/ws/*rest", any(proxy_ws::forward))
        .layer(middleware::from_fn_with_state(state.clone(), require_bearer))
        .layer(middleware::from_fn_with_state(state.clone(), admit))
        .with_state(state);

    // `/healthz` is an ambient liveness probe, not part of the admission
    // pipeline (§5 is peer → rate-limit → auth → authorize → resolve →
    // forward); it is merged in after that pipeline's middleware stack so it
    // never requires a bearer token.
    Router::new()
        .merge(admission_pipeline)
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

/// Methods the HTTP proxy accepts per §4.6.
pub const PROXY_METHODS: [Method; 4] = [Method::GET, Method::POST, Method::PUT, Method::DELETE];

/// Folds [`PROXY_METHODS`] into the `MethodFilter` the `/gateway/*rest` route
/// is actually registered with.
fn proxy_method_filter() -> MethodFilter {
    PROXY_METHODS[1..].iter().fold(
        MethodFilter::try_from(PROXY_METHODS[0].clone()).expect("PROXY_METHODS are valid HTTP methods"),
        |filter, method| filter | MethodFilter::try_from(method.clone()).expect("PROXY_METHODS are valid HTTP methods"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_accepts_exactly_the_spec_methods() {
        assert_eq!(PROXY_METHODS.len(), 4);
        assert!(PROXY_METHODS.contains(&Method::GET));
        assert!(PROXY_METHODS.contains(&Method::DELETE));
    }

    #[test]
    fn proxy_method_filter_matches_every_spec_method_and_nothing_else() {
        let filter = proxy_method_filter();
        for method in PROXY_METHODS {
            assert!(filter.matches(method));
        }
        assert!(!filter.matches(Method::PATCH));
        assert!(!filter.matches(Method::TRACE));
    }
}
