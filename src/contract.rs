//! Wire contract shared by the authority and the session client
//!
//! Everything both sides must agree on lives here: request/response bodies,
//! the refresh cookie name, route paths and the bearer header format.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of the HTTP-only cookie carrying the refresh token
pub const REFRESH_COOKIE: &str = "refreshToken";

/// Scheme prefix of the `Authorization` header
pub const BEARER_PREFIX: &str = "Bearer ";

/// Route paths of the authentication API
pub mod paths {
    pub const REGISTER: &str = "/auth/register";
    pub const LOGIN: &str = "/auth/login";
    pub const VALIDATE_TOKEN: &str = "/auth/validate-token";
    pub const REFRESH_TOKEN: &str = "/auth/refresh-token";
    pub const LOGOUT: &str = "/auth/logout";
    pub const PROTECTED: &str = "/auth/protected";
    pub const ADMIN: &str = "/auth/admin";
}

/// Format an access token as an `Authorization` header value
pub fn bearer(token: &str) -> String {
    format!("{BEARER_PREFIX}{token}")
}

/// Role embedded in every access token
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(
    feature = "ssr",
    derive(sqlx::Type),
    sqlx(type_name = "user_role", rename_all = "lowercase")
)]
pub enum Role {
    #[default]
    #[display("user")]
    User,
    #[display("admin")]
    Admin,
}

/// Public view of a credential record (never carries the secret)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// POST /auth/register
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub message: String,
    pub token: String,
}

/// POST /auth/login
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Body of login and refresh responses. The refresh token never appears here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenResponse {
    #[serde(rename = "accessToken")]
    pub access_token: String,
}

/// POST /auth/validate-token
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidateTokenRequest {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateTokenResponse {
    pub valid: bool,
    pub user: UserProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error body returned by every failing endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

impl ApiError {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
        }
    }
}
