//! Authorization engine: decides whether a principal may invoke a path.

use std::collections::HashSet;
use std::sync::Arc;

use crate::db::Repository;
use crate::error::GatewayError;

/// Paths that bypass authorization entirely. Named after the source's
/// `PermissionHelper.user_access_control` allowlist; `/administration/*`
/// is not otherwise implemented by this build's HTTP surface (see the
/// authorization engine's supporting-queries note), but the string itself
/// is load-bearing here.
const ALLOWLIST: [&str; 3] = [
    "/administration/users/get_current_user",
    "/authentication/renew/token",
    "/authentication/keys/public_key",
];

pub struct AuthorizationEngine {
    repo: Arc<Repository>,
}

impl AuthorizationEngine {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    /// `user_access_control(user_id, path) -> bool`, plus the 404 the source
    /// raises from inside the same call when the endpoint doesn't exist.
    pub async fn user_access_control(&self, user_id: i32, path: &str) -> Result<bool, GatewayError> {
        if ALLOWLIST.contains(&path) {
            return Ok(true);
        }

        if self.repo.is_active_superuser(user_id).await? {
            return Ok(true);
        }

        let stripped = strip_gateway_prefix(path);
        if self.repo.get_endpoint_by_url(stripped).await?.is_none() {
            return Err(GatewayError::EndpointNotFound);
        }

        let user_systems = self.repo.get_user_systems(user_id).await?;
        if user_systems.is_empty() {
            return Ok(false);
        }

        let microservice_systems = self.repo.get_microservice_systems(stripped).await?;
        if user_systems.is_disjoint(&microservice_systems) {
            return Ok(false);
        }

        let endpoint_roles = self.repo.get_endpoint_roles(stripped).await?;
        let endpoint_groups = self.repo.get_endpoint_groups(stripped).await?;

        if endpoint_roles.is_empty() && endpoint_groups.is_empty() {
            return Ok(true);
        }

        let user_roles = self.repo.get_user_roles(user_id).await?;
        let user_groups = self.repo.get_user_groups(user_id).await?;

        let user_tags: HashSet<String> = user_roles.union(&user_groups).cloned().collect();
        let endpoint_tags: HashSet<String> = endpoint_roles.union(&endpoint_groups).cloned().collect();

        Ok(!user_tags.is_disjoint(&endpoint_tags))
    }
}

/// Strip a leading `/gateway` segment, matching the source's path rewrite
/// before looking an endpoint up by its stored (unprefixed) URL.
pub fn strip_gateway_prefix(path: &str) -> &str {
    path.strip_prefix("/gateway").unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_only_the_gateway_prefix() {
        assert_eq!(strip_gateway_prefix("/gateway/users/42"), "/users/42");
        assert_eq!(strip_gateway_prefix("/users/42"), "/users/42");
        assert_eq!(strip_gateway_prefix("/gateway"), "");
    }
}
