//! Persistence adapter.
//!
//! The source traverses a lazily-loaded SQLAlchemy object graph
//! (`user.roles`, `endpoint.groups`, ...); here the same relations are
//! expressed as explicit joins over the bridge tables (`users_roles`,
//! `users_groups`, `users_systems`, `groups_roles`, `endpoints_roles`,
//! `endpoints_groups`), returned as flat rows and folded into `HashSet`s by
//! the caller.

use std::collections::HashSet;

use chrono::NaiveDate;
use sqlx::{FromRow, PgPool};

use crate::error::GatewayError;

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: i32,
    pub email: String,
    pub password: String,
    pub is_active: bool,
    pub is_superuser: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct EndpointRow {
    pub id: i32,
    pub endpoint_url: String,
    pub endpoint_authenticated: bool,
}

#[derive(Debug, Clone)]
pub struct EndpointManifestEntry {
    pub endpoint_name: Option<String>,
    pub endpoint_url: String,
    pub system_code: String,
    pub roles: Vec<String>,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ProfileRow {
    pub first_name: String,
    pub last_name: String,
    pub document: String,
    pub birth_date: NaiveDate,
}

/// Everything `get_current_user` needs: the user row plus its eager-loaded
/// roles, groups, systems, and profile.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: UserRow,
    pub roles: HashSet<String>,
    pub groups: HashSet<String>,
    pub systems: HashSet<String>,
    pub profile: Option<ProfileRow>,
}

pub struct NewHistoricalMovement<'a> {
    pub url_request: &'a str,
    pub type_request: &'a str,
    pub system: Option<&'a str>,
    pub user_ip: &'a str,
    pub user_browser: Option<&'a str>,
    pub query: Option<&'a str>,
    pub details: &'a str,
    pub user_id: Option<i32>,
}

#[derive(Clone)]
pub struct Repository {
    pool: PgPool,
}

impl Repository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>, sqlx::Error> {
        sqlx::query_as::<_, UserRow>(
            "SELECT id, email, password, is_active, is_superuser FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn get_user_id_by_email(&self, email: &str) -> Result<Option<i32>, sqlx::Error> {
        sqlx::query_scalar("SELECT id FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
    }

    /// `Users.is_active ∧ Users.is_superuser` for the given id.
    pub async fn is_active_superuser(&self, user_id: i32) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = $1 AND is_active = true AND is_superuser = true)",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn get_endpoint_by_url(&self, path: &str) -> Result<Option<EndpointRow>, sqlx::Error> {
        sqlx::query_as::<_, EndpointRow>(
            "SELECT id, endpoint_url, endpoint_authenticated FROM endpoints WHERE endpoint_url = $1",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn get_user_roles(&self, user_id: i32) -> Result<HashSet<String>, sqlx::Error> {
        let roles: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT r.role_name FROM users_roles ur \
             JOIN roles r ON r.id = ur.role_id \
             WHERE ur.user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(roles.into_iter().collect())
    }

    /// Role names reached through the user's groups.
    pub async fn get_user_groups(&self, user_id: i32) -> Result<HashSet<String>, sqlx::Error> {
        let roles: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT r.role_name FROM users_groups ug \
             JOIN groups_roles gr ON gr.group_id = ug.group_id \
             JOIN roles r ON r.id = gr.role_id \
             WHERE ug.user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(roles.into_iter().collect())
    }

    pub async fn get_user_systems(&self, user_id: i32) -> Result<HashSet<String>, sqlx::Error> {
        let systems: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT s.system_code FROM users_systems us \
             JOIN systems s ON s.id = us.system_id \
             WHERE us.user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(systems.into_iter().collect())
    }

    pub async fn get_endpoint_roles(&self, path: &str) -> Result<HashSet<String>, sqlx::Error> {
        let roles: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT r.role_name FROM endpoints_roles er \
             JOIN endpoints e ON e.id = er.endpoint_id \
             JOIN roles r ON r.id = er.role_id \
             WHERE e.endpoint_url = $1",
        )
        .bind(path)
        .fetch_all(&self.pool)
        .await?;
        Ok(roles.into_iter().collect())
    }

    /// Role names reached through groups attached to the endpoint, i.e. the
    /// `endpoints_groups` bridge joined to each group's own roles.
    pub async fn get_endpoint_groups(&self, path: &str) -> Result<HashSet<String>, sqlx::Error> {
        let roles: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT r.role_name FROM endpoints_groups eg \
             JOIN endpoints e ON e.id = eg.endpoint_id \
             JOIN groups_roles gr ON gr.group_id = eg.group_id \
             JOIN roles r ON r.id = gr.role_id \
             WHERE e.endpoint_url = $1",
        )
        .bind(path)
        .fetch_all(&self.pool)
        .await?;
        Ok(roles.into_iter().collect())
    }

    pub async fn get_microservice_systems(&self, path: &str) -> Result<HashSet<String>, sqlx::Error> {
        let systems: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT s.system_code FROM endpoints e \
             JOIN micro_services ms ON ms.id = e.endpoint_microservice_id \
             JOIN systems s ON s.id = ms.microservice_system_id \
             WHERE e.endpoint_url = $1",
        )
        .bind(path)
        .fetch_all(&self.pool)
        .await?;
        Ok(systems.into_iter().collect())
    }

    /// Resolve the single microservice serving `path`. Mirrors the source's
    /// `scalar_one()`: zero matches is a 502, more than one is a
    /// configuration error rather than an arbitrary pick.
    pub async fn get_microservice_base_url(&self, path: &str) -> Result<String, GatewayError> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT ms.microservice_base_url FROM micro_services ms \
             JOIN endpoints e ON e.endpoint_microservice_id = ms.id \
             WHERE e.endpoint_url = $1",
        )
        .bind(path)
        .fetch_all(&self.pool)
        .await?;

        match rows.len() {
            0 => Err(GatewayError::NoMicroservice),
            1 => Ok(rows.into_iter().next().expect("length checked above")),
            _ => Err(GatewayError::Internal(anyhow::anyhow!(
                "path {path} resolves to more than one microservice; configuration error"
            ))),
        }
    }

    pub async fn user_exists_by_email(&self, email: &str) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
            .bind(email)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn insert_user(&self, email: &str, password_hash: &str) -> Result<UserRow, sqlx::Error> {
        sqlx::query_as::<_, UserRow>(
            "INSERT INTO users (email, password, is_active, is_superuser) \
             VALUES ($1, $2, false, false) \
             RETURNING id, email, password, is_active, is_superuser",
        )
        .bind(email)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await
    }

    /// Every endpoint belonging to a microservice owned by `system_code`,
    /// with its roles and groups, for embedding in a login token.
    pub async fn get_endpoints_by_system_code(
        &self,
        system_code: &str,
    ) -> Result<Vec<EndpointManifestEntry>, sqlx::Error> {
        let system_id: Option<i32> = sqlx::query_scalar("SELECT id FROM systems WHERE system_code = $1")
            .bind(system_code)
            .fetch_optional(&self.pool)
            .await?;

        let Some(system_id) = system_id else {
            return Ok(Vec::new());
        };

        let endpoints: Vec<(i32, Option<String>, String)> = sqlx::query_as(
            "SELECT e.id, e.endpoint_name, e.endpoint_url FROM endpoints e \
             JOIN micro_services ms ON ms.id = e.endpoint_microservice_id \
             WHERE ms.microservice_system_id = $1",
        )
        .bind(system_id)
        .fetch_all(&self.pool)
        .await?;

        let mut manifest = Vec::with_capacity(endpoints.len());
        for (endpoint_id, endpoint_name, endpoint_url) in endpoints {
            let roles: Vec<String> = sqlx::query_scalar(
                "SELECT r.role_name FROM endpoints_roles er \
                 JOIN roles r ON r.id = er.role_id \
                 WHERE er.endpoint_id = $1",
            )
            .bind(endpoint_id)
            .fetch_all(&self.pool)
            .await?;

            let groups: Vec<String> = sqlx::query_scalar(
                "SELECT g.group_name FROM endpoints_groups eg \
                 JOIN groups g ON g.id = eg.group_id \
                 WHERE eg.endpoint_id = $1",
            )
            .bind(endpoint_id)
            .fetch_all(&self.pool)
            .await?;

            manifest.push(EndpointManifestEntry {
                endpoint_name,
                endpoint_url,
                system_code: system_code.to_string(),
                roles,
                groups,
            });
        }

        Ok(manifest)
    }

    async fn get_profile(&self, user_id: i32) -> Result<Option<ProfileRow>, sqlx::Error> {
        sqlx::query_as::<_, ProfileRow>(
            "SELECT first_name, last_name, document, birth_date FROM profiles WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Resolves a full user record from a validated token's `email` claim.
    /// Named after the source's `PermissionHelper.get_current_user`; not
    /// wired to an HTTP handler in this build (see the authorization engine's
    /// supporting-queries note), kept because the allowlist references it.
    pub async fn get_current_user(&self, email: &str) -> Result<Option<CurrentUser>, sqlx::Error> {
        let Some(user) = self.get_user_by_email(email).await? else {
            return Ok(None);
        };

        let roles = self.get_user_roles(user.id).await?;
        let groups = self.get_user_groups(user.id).await?;
        let systems = self.get_user_systems(user.id).await?;
        let profile = self.get_profile(user.id).await?;

        Ok(Some(CurrentUser {
            user,
            roles,
            groups,
            systems,
            profile,
        }))
    }

    pub async fn insert_historical_movement(
        &self,
        row: NewHistoricalMovement<'_>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO historical_movements \
             (url_request, type_request, system, user_ip, user_browser, query, details, user_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(row.url_request)
        .bind(row.type_request)
        .bind(row.system)
        .bind(row.user_ip)
        .bind(row.user_browser)
        .bind(row.query)
        .bind(row.details)
        .bind(row.user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
