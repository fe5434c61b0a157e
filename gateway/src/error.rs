use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Every failure mode the admission pipeline can surface to a caller.
///
/// Each variant carries its own status code and message; callers never see a
/// raw `anyhow::Error` or a database driver error directly.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("El correo [{0}], no existe.")]
    UnknownUser(String),

    #[error("Contraseña incorrecta.")]
    WrongPassword,

    #[error("No tiene permisos para acceder al sistema, comuníquese con el área de soporte.")]
    SystemEntitlementMissing,

    #[error("El correo [{0}], ya existe.")]
    DuplicateUser(String),

    #[error("Not authenticated.")]
    NotAuthenticated,

    #[error("[1] Invalid or expired token.")]
    InvalidToken,

    #[error("[2] Access denied.")]
    AccessDenied,

    #[error("Endpoint not found.")]
    EndpointNotFound,

    #[error("The service is not available, please contact the support area.")]
    UpstreamUnavailable,

    #[error("No microservices available for this endpoint.")]
    NoMicroservice,

    #[error("Too many requests from {ip}. Please try again after {retry_after} seconds.")]
    RateLimited { ip: String, retry_after: u64 },

    #[error("{0}")]
    Validation(String),

    /// Upstream answered but not with 2xx; passed through verbatim per the
    /// HTTP proxy's step 6 (no retry, no status remapping).
    #[error("{detail}")]
    UpstreamStatus { status: u16, detail: String },

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    code: u16,
    message: String,
}

impl GatewayError {
    fn status(&self) -> StatusCode {
        match self {
            GatewayError::UnknownUser(_) | GatewayError::WrongPassword => StatusCode::NOT_FOUND,
            GatewayError::SystemEntitlementMissing
            | GatewayError::NotAuthenticated
            | GatewayError::InvalidToken
            | GatewayError::AccessDenied => StatusCode::FORBIDDEN,
            GatewayError::DuplicateUser(_) => StatusCode::BAD_REQUEST,
            GatewayError::EndpointNotFound => StatusCode::NOT_FOUND,
            GatewayError::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::NoMicroservice => StatusCode::BAD_GATEWAY,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::UpstreamStatus { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            GatewayError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();

        if let GatewayError::Internal(err) = &self {
            tracing::error!(error = %err, "internal gateway error");
        }
        if let GatewayError::Database(err) = &self {
            tracing::error!(error = %err, "database error");
        }

        let message = match &self {
            GatewayError::Internal(_) | GatewayError::Database(_) => {
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let mut response = (
            status,
            Json(ErrorBody {
                code: status.as_u16(),
                message,
            }),
        )
            .into_response();

        if let GatewayError::RateLimited { retry_after, .. } = &self {
            if let Ok(value) = axum::http::HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert("retry-after", value);
            }
        }

        response
    }
}
