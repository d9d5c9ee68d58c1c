//! JWT issuance and verification for both token classes
//!
//! Access tokens (15 minutes) and refresh tokens (7 days) are HS256 JWTs signed
//! with two different secrets, so a leaked secret of one class cannot forge the
//! other. Verification is stateless: signature, issuer, class tag and expiry.

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::contract::Role;

/// Default access token expiration time (15 minutes)
const ACCESS_TOKEN_EXPIRATION_MINUTES: i64 = 15;

/// Default refresh token expiration time (7 days)
const REFRESH_TOKEN_EXPIRATION_DAYS: i64 = 7;

const DEFAULT_ISSUER: &str = "authgate";

/// JWT configuration
#[derive(Clone)]
pub struct JwtConfig {
    /// Secret for signing access tokens
    pub access_secret: String,
    /// Secret for signing refresh tokens, must differ from `access_secret`
    pub refresh_secret: String,
    /// Access token expiration in minutes
    pub access_token_expiration_minutes: i64,
    /// Refresh token expiration in days
    pub refresh_token_expiration_days: i64,
    /// Token issuer
    pub issuer: String,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("access_token_expiration_minutes", &self.access_token_expiration_minutes)
            .field("refresh_token_expiration_days", &self.refresh_token_expiration_days)
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl JwtConfig {
    /// Create a new JWT configuration with default lifetimes
    pub fn new(access_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            access_token_expiration_minutes: ACCESS_TOKEN_EXPIRATION_MINUTES,
            refresh_token_expiration_days: REFRESH_TOKEN_EXPIRATION_DAYS,
            issuer: DEFAULT_ISSUER.to_string(),
        }
    }

    /// Create config from environment variables
    pub fn from_env() -> Result<Self, JwtError> {
        let access_secret =
            std::env::var("JWT_SECRET").map_err(|_| JwtError::MissingSecret("JWT_SECRET"))?;
        let refresh_secret = std::env::var("JWT_REFRESH_SECRET")
            .map_err(|_| JwtError::MissingSecret("JWT_REFRESH_SECRET"))?;

        let access_exp = std::env::var("JWT_ACCESS_EXPIRATION_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(ACCESS_TOKEN_EXPIRATION_MINUTES);

        let refresh_exp = std::env::var("JWT_REFRESH_EXPIRATION_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(REFRESH_TOKEN_EXPIRATION_DAYS);

        let issuer = std::env::var("JWT_ISSUER").unwrap_or_else(|_| DEFAULT_ISSUER.to_string());

        let config = Self {
            access_secret,
            refresh_secret,
            access_token_expiration_minutes: access_exp,
            refresh_token_expiration_days: refresh_exp,
            issuer,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations where both token classes would share a secret
    pub fn validate(&self) -> Result<(), JwtError> {
        if self.access_secret.is_empty() {
            return Err(JwtError::MissingSecret("JWT_SECRET"));
        }
        if self.refresh_secret.is_empty() {
            return Err(JwtError::MissingSecret("JWT_REFRESH_SECRET"));
        }
        if self.access_secret == self.refresh_secret {
            return Err(JwtError::SharedSecret);
        }
        Ok(())
    }

    /// Set access token expiration
    pub fn access_token_expiration(mut self, minutes: i64) -> Self {
        self.access_token_expiration_minutes = minutes;
        self
    }

    /// Set refresh token expiration
    pub fn refresh_token_expiration(mut self, days: i64) -> Self {
        self.refresh_token_expiration_days = days;
        self
    }

    /// Set issuer
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }
}

/// JWT errors
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("{0} environment variable not set")]
    MissingSecret(&'static str),

    #[error("Access and refresh tokens must use different secrets")]
    SharedSecret,

    #[error("Token encoding failed: {0}")]
    EncodingError(String),

    #[error("Token decoding failed: {0}")]
    DecodingError(String),

    #[error("Token expired")]
    Expired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Invalid token type")]
    InvalidTokenType,
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => JwtError::Expired,
            ErrorKind::InvalidToken
            | ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidIssuer
            | ErrorKind::MissingRequiredClaim(_)
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => JwtError::InvalidToken,
            _ => JwtError::DecodingError(err.to_string()),
        }
    }
}

/// Token class tag carried inside every token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenType::Access => write!(f, "access"),
            TokenType::Refresh => write!(f, "refresh"),
        }
    }
}

/// Claims of an access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user ID)
    pub sub: String,
    /// Display name
    pub name: String,
    pub role: Role,
    pub token_type: TokenType,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub jti: String,
}

/// Claims of a refresh token, identity only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub token_type: TokenType,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub jti: String,
}

trait TypedClaims {
    fn token_type(&self) -> TokenType;
}

impl TypedClaims for AccessClaims {
    fn token_type(&self) -> TokenType {
        self.token_type
    }
}

impl TypedClaims for RefreshClaims {
    fn token_type(&self) -> TokenType {
        self.token_type
    }
}

impl AccessClaims {
    /// Get user ID as UUID
    pub fn user_id(&self) -> Result<Uuid, JwtError> {
        Uuid::parse_str(&self.sub).map_err(|_| JwtError::InvalidToken)
    }
}

impl RefreshClaims {
    pub fn user_id(&self) -> Result<Uuid, JwtError> {
        Uuid::parse_str(&self.sub).map_err(|_| JwtError::InvalidToken)
    }
}

/// A freshly signed token and its expiry (Unix timestamp)
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: i64,
}

struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// JWT service for token operations
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    access_keys: std::sync::Arc<KeyPair>,
    refresh_keys: std::sync::Arc<KeyPair>,
}

impl JwtService {
    /// Create a new JWT service
    pub fn new(config: JwtConfig) -> Result<Self, JwtError> {
        config.validate()?;

        let access_keys = std::sync::Arc::new(KeyPair::from_secret(&config.access_secret));
        let refresh_keys = std::sync::Arc::new(KeyPair::from_secret(&config.refresh_secret));

        Ok(Self {
            config,
            access_keys,
            refresh_keys,
        })
    }

    /// Create JWT service from environment variables
    pub fn from_env() -> Result<Self, JwtError> {
        Self::new(JwtConfig::from_env()?)
    }

    /// Generate an access token
    pub fn generate_access_token(
        &self,
        user_id: Uuid,
        name: &str,
        role: Role,
    ) -> Result<IssuedToken, JwtError> {
        let now = Utc::now();
        let exp = now + Duration::minutes(self.config.access_token_expiration_minutes);

        let claims = AccessClaims {
            sub: user_id.to_string(),
            name: name.to_string(),
            role,
            token_type: TokenType::Access,
            iat: now.timestamp(),
            exp: exp.timestamp(),
            iss: self.config.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        Ok(IssuedToken {
            token: sign(&claims, &self.access_keys)?,
            expires_at: exp.timestamp(),
        })
    }

    /// Generate a refresh token
    pub fn generate_refresh_token(&self, user_id: Uuid) -> Result<IssuedToken, JwtError> {
        let now = Utc::now();
        let exp = now + Duration::days(self.config.refresh_token_expiration_days);

        let claims = RefreshClaims {
            sub: user_id.to_string(),
            token_type: TokenType::Refresh,
            iat: now.timestamp(),
            exp: exp.timestamp(),
            iss: self.config.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        Ok(IssuedToken {
            token: sign(&claims, &self.refresh_keys)?,
            expires_at: exp.timestamp(),
        })
    }

    /// Validate an access token
    pub fn validate_access_token(&self, token: &str) -> Result<AccessClaims, JwtError> {
        self.verify(token, &self.access_keys, TokenType::Access)
    }

    /// Validate a refresh token
    pub fn validate_refresh_token(&self, token: &str) -> Result<RefreshClaims, JwtError> {
        self.verify(token, &self.refresh_keys, TokenType::Refresh)
    }

    fn verify<C>(&self, token: &str, keys: &KeyPair, expected: TokenType) -> Result<C, JwtError>
    where
        C: DeserializeOwned + TypedClaims,
    {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        // Strict expiration checking
        validation.leeway = 0;

        let claims = decode::<C>(token, &keys.decoding, &validation)?.claims;

        if claims.token_type() != expected {
            return Err(JwtError::InvalidTokenType);
        }

        Ok(claims)
    }

    /// Refresh token lifetime in seconds, used for the cookie `Max-Age`
    pub fn refresh_token_max_age_secs(&self) -> i64 {
        Duration::days(self.config.refresh_token_expiration_days).num_seconds()
    }
}

fn sign<C: Serialize>(claims: &C, keys: &KeyPair) -> Result<String, JwtError> {
    encode(&Header::default(), claims, &keys.encoding)
        .map_err(|e| JwtError::EncodingError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCESS_SECRET: &str = "test_access_secret_for_testing_only_32b";
    const REFRESH_SECRET: &str = "test_refresh_secret_for_testing_only_32";

    fn create_test_service() -> JwtService {
        JwtService::new(JwtConfig::new(ACCESS_SECRET, REFRESH_SECRET)).unwrap()
    }

    // ========================================================================
    // JwtConfig Tests
    // ========================================================================

    #[test]
    fn test_jwt_config_new() {
        let config = JwtConfig::new("a", "b");

        assert_eq!(config.access_secret, "a");
        assert_eq!(config.refresh_secret, "b");
        assert_eq!(config.access_token_expiration_minutes, 15);
        assert_eq!(config.refresh_token_expiration_days, 7);
        assert_eq!(config.issuer, "authgate");
    }

    #[test]
    fn test_jwt_config_builder() {
        let config = JwtConfig::new("a", "b")
            .access_token_expiration(30)
            .refresh_token_expiration(14)
            .issuer("my_app");

        assert_eq!(config.access_token_expiration_minutes, 30);
        assert_eq!(config.refresh_token_expiration_days, 14);
        assert_eq!(config.issuer, "my_app");
    }

    #[test]
    fn test_shared_secret_rejected() {
        let result = JwtService::new(JwtConfig::new("same", "same"));
        assert!(matches!(result, Err(JwtError::SharedSecret)));
    }

    #[test]
    fn test_empty_secret_rejected() {
        let result = JwtConfig::new("", "refresh").validate();
        assert!(matches!(result, Err(JwtError::MissingSecret("JWT_SECRET"))));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let debug = format!("{:?}", JwtConfig::new("super-access", "super-refresh"));
        assert!(!debug.contains("super-access"));
        assert!(!debug.contains("super-refresh"));
    }

    // ========================================================================
    // Issuance / Verification Tests
    // ========================================================================

    #[test]
    fn test_access_token_round_trip() {
        let service = create_test_service();
        let user_id = Uuid::new_v4();

        let issued = service
            .generate_access_token(user_id, "Ada", Role::Admin)
            .unwrap();
        assert!(issued.expires_at > Utc::now().timestamp());

        let claims = service.validate_access_token(&issued.token).unwrap();
        assert_eq!(claims.user_id().unwrap(), user_id);
        assert_eq!(claims.name, "Ada");
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.token_type, TokenType::Access);
        assert_eq!(claims.exp - claims.iat, 15 * 60);
    }

    #[test]
    fn test_refresh_token_round_trip() {
        let service = create_test_service();
        let user_id = Uuid::new_v4();

        let issued = service.generate_refresh_token(user_id).unwrap();
        let claims = service.validate_refresh_token(&issued.token).unwrap();

        assert_eq!(claims.user_id().unwrap(), user_id);
        assert_eq!(claims.exp - claims.iat, 7 * 24 * 60 * 60);
    }

    #[test]
    fn test_token_classes_do_not_cross_verify() {
        let service = create_test_service();
        let user_id = Uuid::new_v4();

        let access = service
            .generate_access_token(user_id, "Ada", Role::User)
            .unwrap();
        let refresh = service.generate_refresh_token(user_id).unwrap();

        assert!(matches!(
            service.validate_refresh_token(&access.token),
            Err(JwtError::InvalidToken)
        ));
        assert!(matches!(
            service.validate_access_token(&refresh.token),
            Err(JwtError::InvalidToken)
        ));
    }

    #[test]
    fn test_class_tag_checked_even_with_matching_key() {
        // Sign refresh-shaped claims with the access key
        let service = create_test_service();
        let claims = RefreshClaims {
            sub: Uuid::new_v4().to_string(),
            token_type: TokenType::Refresh,
            iat: Utc::now().timestamp(),
            exp: Utc::now().timestamp() + 60,
            iss: "authgate".to_string(),
            jti: Uuid::new_v4().to_string(),
        };
        let token = sign(&claims, &KeyPair::from_secret(REFRESH_SECRET)).unwrap();
        let forged = sign(&claims, &KeyPair::from_secret(ACCESS_SECRET)).unwrap();

        assert!(service.validate_refresh_token(&token).is_ok());
        assert!(service.validate_access_token(&forged).is_err());
    }

    #[test]
    fn test_validate_token_wrong_secret() {
        let service1 = JwtService::new(JwtConfig::new("secret_one", "refresh_one")).unwrap();
        let service2 = JwtService::new(JwtConfig::new("secret_two", "refresh_two")).unwrap();

        let issued = service1
            .generate_access_token(Uuid::new_v4(), "Ada", Role::User)
            .unwrap();

        let result = service2.validate_access_token(&issued.token);
        assert!(matches!(result, Err(JwtError::InvalidToken)));
    }

    #[test]
    fn test_validate_garbage_token() {
        let service = create_test_service();

        let result = service.validate_access_token("invalid.token.here");
        assert!(result.is_err());
        assert!(service.validate_access_token("").is_err());
    }

    #[test]
    fn test_wrong_issuer_rejected() {
        let issuer_a = JwtService::new(JwtConfig::new("a1", "b1").issuer("a")).unwrap();
        let issuer_b = JwtService::new(JwtConfig::new("a1", "b1").issuer("b")).unwrap();

        let issued = issuer_a
            .generate_access_token(Uuid::new_v4(), "Ada", Role::User)
            .unwrap();

        assert!(matches!(
            issuer_b.validate_access_token(&issued.token),
            Err(JwtError::InvalidToken)
        ));
    }

    #[test]
    fn test_expired_access_token() {
        let config = JwtConfig::new(ACCESS_SECRET, REFRESH_SECRET).access_token_expiration(-1);
        let service = JwtService::new(config).unwrap();

        let issued = service
            .generate_access_token(Uuid::new_v4(), "Ada", Role::User)
            .unwrap();

        let result = service.validate_access_token(&issued.token);
        assert!(
            matches!(result, Err(JwtError::Expired)),
            "Expected Expired error, got: {:?}",
            result
        );
    }

    #[test]
    fn test_expired_refresh_token() {
        let config = JwtConfig::new(ACCESS_SECRET, REFRESH_SECRET).refresh_token_expiration(-1);
        let service = JwtService::new(config).unwrap();

        let issued = service.generate_refresh_token(Uuid::new_v4()).unwrap();

        assert!(matches!(
            service.validate_refresh_token(&issued.token),
            Err(JwtError::Expired)
        ));
    }

    #[test]
    fn test_token_contains_unique_jti() {
        let service = create_test_service();
        let user_id = Uuid::new_v4();

        let first = service
            .generate_access_token(user_id, "Ada", Role::User)
            .unwrap();
        let second = service
            .generate_access_token(user_id, "Ada", Role::User)
            .unwrap();

        let claims1 = service.validate_access_token(&first.token).unwrap();
        let claims2 = service.validate_access_token(&second.token).unwrap();
        assert_ne!(claims1.jti, claims2.jti);
    }

    #[test]
    fn test_refresh_max_age() {
        assert_eq!(create_test_service().refresh_token_max_age_secs(), 604_800);
    }

    #[test]
    fn test_token_type_display() {
        assert_eq!(TokenType::Access.to_string(), "access");
        assert_eq!(TokenType::Refresh.to_string(), "refresh");
    }
}
