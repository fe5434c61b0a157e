//! Login and register flows (§4.8/§4.9): the only two places the gateway
//! mutates anything besides the audit trail, and the only two routes that
//! may be reached without a bearer token.

use std::collections::HashSet;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::db::Repository;
use crate::error::GatewayError;
use crate::hashing;
use crate::jwt::{Claims, JwtManager};
use crate::AppState;

/// `{status, detail, result}` response envelope used by every non-proxy
/// endpoint; `result: None` is omitted from the serialized body rather than
/// emitted as `null`.
#[derive(Serialize)]
struct Envelope<T: Serialize> {
    status: u16,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    fn new(status: StatusCode, detail: impl Into<String>, result: Option<T>) -> (StatusCode, Self) {
        (
            status,
            Self {
                status: status.as_u16(),
                detail: detail.into(),
                result,
            },
        )
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub system_code: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResult {
    #[serde(rename = "type")]
    pub token_type: &'static str,
    pub token: String,
    pub refresh_token: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Response, GatewayError> {
    let user = state
        .repo
        .get_user_by_email(&request.email)
        .await?
        .ok_or_else(|| GatewayError::UnknownUser(request.email.clone()))?;

    if !hashing::verify_password(&user.password, &request.password)? {
        return Err(GatewayError::WrongPassword);
    }

    let user_systems = state.repo.get_user_systems(user.id).await?;
    if !user.is_superuser && !user_systems.contains(&request.system_code) {
        return Err(GatewayError::SystemEntitlementMissing);
    }

    let claims = build_login_claims(&state.repo, &user, &user_systems, &request.system_code).await?;

    let (token, refresh_token) = sign_pair(&state.jwt, claims).await?;

    let (status, body) = Envelope::new(
        StatusCode::OK,
        "Inicio de sesión exitoso.",
        Some(LoginResult {
            token_type: "Bearer",
            token,
            refresh_token,
        }),
    );
    Ok((status, body).into_response())
}

async fn build_login_claims(
    repo: &Repository,
    user: &crate::db::UserRow,
    user_systems: &HashSet<String>,
    system_code: &str,
) -> Result<Claims, GatewayError> {
    let roles = repo.get_user_roles(user.id).await?;
    let groups = repo.get_user_groups(user.id).await?;
    let manifest = repo.get_endpoints_by_system_code(system_code).await?;

    let endpoints: Vec<Value> = manifest
        .into_iter()
        .map(|entry| {
            json!({
                "name": entry.endpoint_name,
                "url": entry.endpoint_url,
                "system_code": entry.system_code,
                "roles": entry.roles,
                "groups": entry.groups,
            })
        })
        .collect();

    let mut claims: Claims = Map::new();
    claims.insert("id".into(), json!(user.id));
    claims.insert("email".into(), json!(user.email));
    claims.insert("is_active".into(), json!(user.is_active));
    claims.insert("is_superuser".into(), json!(user.is_superuser));
    claims.insert("roles".into(), json!(Vec::from_iter(roles)));
    claims.insert("groups".into(), json!(Vec::from_iter(groups)));
    claims.insert("systems".into(), json!(Vec::from_iter(user_systems.clone())));
    claims.insert("endpoints".into(), json!(endpoints));
    // `password` is never inserted into the claims map in the first place;
    // there is no stripping step to forget.
    Ok(claims)
}

async fn sign_pair(jwt: &JwtManager, claims: Claims) -> Result<(String, String), GatewayError> {
    let token = jwt.create_token(claims.clone()).await?;
    let refresh_token = jwt.refresh_token(claims).await?;
    Ok((token, refresh_token))
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub password_repeat: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResult {
    pub id: i32,
    pub email: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Response, GatewayError> {
    validate_register_request(&request)?;

    if state.repo.user_exists_by_email(&request.email).await? {
        return Err(GatewayError::DuplicateUser(request.email));
    }

    let password_hash = hashing::hash_password(&request.password)?;
    let user = state.repo.insert_user(&request.email, &password_hash).await?;

    let (status, body) = Envelope::new(
        StatusCode::CREATED,
        "Usuario registrado exitosamente.",
        Some(RegisterResult {
            id: user.id,
            email: user.email,
        }),
    );
    Ok((status, body).into_response())
}

/// Minimal shell validation (§1, §4.9): not an independent validation
/// framework, just the three checks the source's request schema enforces.
fn validate_register_request(request: &RegisterRequest) -> Result<(), GatewayError> {
    if !is_plausible_email(&request.email) {
        return Err(GatewayError::Validation("email is not a valid address".into()));
    }
    if !(8..=16).contains(&request.password.len()) {
        return Err(GatewayError::Validation(
            "password must be between 8 and 16 characters".into(),
        ));
    }
    if request.password != request.password_repeat {
        return Err(GatewayError::Validation("password_repeat must match password".into()));
    }
    Ok(())
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_request() -> RegisterRequest {
        RegisterRequest {
            email: "a@b.c".into(),
            password: "pw123456".into(),
            password_repeat: "pw123456".into(),
        }
    }

    #[test]
    fn accepts_a_well_formed_registration() {
        assert!(validate_register_request(&valid_request()).is_ok());
    }

    #[test]
    fn rejects_mismatched_password_repeat() {
        let mut request = valid_request();
        request.password_repeat = "different".into();
        assert!(matches!(
            validate_register_request(&request),
            Err(GatewayError::Validation(_))
        ));
    }

    #[test]
    fn rejects_short_passwords() {
        let mut request = valid_request();
        request.password = "short1".into();
        request.password_repeat = "short1".into();
        assert!(matches!(
            validate_register_request(&request),
            Err(GatewayError::Validation(_))
        ));
    }

    #[test]
    fn rejects_malformed_email() {
        let mut request = valid_request();
        request.email = "not-an-email".into();
        assert!(matches!(
            validate_register_request(&request),
            Err(GatewayError::Validation(_))
        ));
    }

    #[test]
    fn plausible_email_requires_a_dot_in_the_domain() {
        assert!(is_plausible_email("a@b.c"));
        assert!(!is_plausible_email("a@bc"));
        assert!(!is_plausible_email("ab.c"));
    }
}
