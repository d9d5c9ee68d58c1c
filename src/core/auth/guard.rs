//! Route guard for bearer-authenticated endpoints
//!
//! `require` runs as route middleware: it verifies the access token from the
//! `Authorization` header, checks the role list of its [`Guard`] and hands the
//! decoded claims to the handler through request extensions.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::contract::{BEARER_PREFIX, Role};
use crate::core::auth::jwt::{AccessClaims, JwtService, TokenType};
use crate::core::auth::service::AuthError;

/// Extract the bearer token from the `Authorization` header
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::Unauthenticated)?;

    match value.strip_prefix(BEARER_PREFIX) {
        Some(token) if !token.trim().is_empty() => Ok(token.trim()),
        _ => Err(AuthError::Unauthenticated),
    }
}

/// Check the role carried by verified claims against an allow list.
///
/// An empty list admits any authenticated caller.
pub fn authorize(claims: &AccessClaims, roles: &[Role]) -> Result<(), AuthError> {
    if roles.is_empty() || roles.contains(&claims.role) {
        Ok(())
    } else {
        tracing::info!("User {} with role {} denied", claims.sub, claims.role);
        Err(AuthError::Forbidden)
    }
}

/// Guard configuration shared by every request through one route layer
#[derive(Clone)]
pub struct Guard {
    jwt_service: JwtService,
    roles: Arc<[Role]>,
}

impl Guard {
    /// Any valid access token passes
    pub fn authenticated(jwt_service: JwtService) -> Self {
        Self::with_roles(jwt_service, [])
    }

    /// Only access tokens whose role is in `roles` pass
    pub fn with_roles(jwt_service: JwtService, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            jwt_service,
            roles: roles.into_iter().collect(),
        }
    }

    /// Authenticate then authorize the request headers
    pub fn check(&self, headers: &HeaderMap) -> Result<AccessClaims, AuthError> {
        let token = bearer_token(headers)?;
        let claims = self
            .jwt_service
            .validate_access_token(token)
            .map_err(|e| AuthError::rejected(TokenType::Access, e))?;

        authorize(&claims, &self.roles)?;
        Ok(claims)
    }
}

/// Route middleware enforcing a [`Guard`]
pub async fn require(
    State(guard): State<Guard>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let claims = guard.check(request.headers())?;
    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

/// Claims of the caller, available behind [`require`]
#[derive(Debug, Clone)]
pub struct AuthUser(pub AccessClaims);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AccessClaims>()
            .cloned()
            .map(AuthUser)
            .ok_or(AuthError::Unauthenticated)
    }
}
