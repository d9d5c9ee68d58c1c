//! Authentication service
//!
//! Business logic of the authority: registration, rate-limited login, token
//! validation and access-token refresh. Coordinates the user store, the
//! password hasher, the login limiter and the JWT service.

use std::sync::Arc;
use std::time::Duration;

use crate::contract::{LoginRequest, RegisterRequest, RegisterResponse, Role, UserProfile};
use crate::core::auth::jwt::{AccessClaims, JwtError, JwtService, TokenType};
use crate::core::auth::password::{PasswordError, PasswordHasher};
use crate::core::auth::rate_limiter::{RateLimited, SlidingWindowLimiter};
use crate::core::db::models::CreateUser;
use crate::core::db::repositories::{UserRepositoryError, UserStore};

/// bcrypt only looks at the first 72 bytes
const MAX_PASSWORD_BYTES: usize = 72;
const MIN_PASSWORD_CHARS: usize = 8;
const MAX_NAME_CHARS: usize = 100;

/// Authentication service error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),

    #[error("User already exists. Please log in instead.")]
    Conflict,

    #[error("User not found")]
    NotFound,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("No token, authorization denied")]
    Unauthenticated,

    #[error("Invalid or expired {0} token")]
    InvalidToken(TokenType),

    #[error("Access denied")]
    Forbidden,

    #[error("Too many login attempts, please try again later.")]
    RateLimited { retry_after: Duration },

    #[error("Server error: {0}")]
    ServerError(String),
}

impl AuthError {
    fn validation(message: impl Into<String>) -> Self {
        AuthError::Validation(message.into())
    }

    /// Map a verification failure for a token of the given class
    pub fn rejected(class: TokenType, err: JwtError) -> Self {
        match err {
            JwtError::Expired
            | JwtError::InvalidToken
            | JwtError::InvalidTokenType
            | JwtError::DecodingError(_) => {
                tracing::debug!("{} token rejected: {}", class, err);
                AuthError::InvalidToken(class)
            }
            other => AuthError::ServerError(other.to_string()),
        }
    }
}

impl From<UserRepositoryError> for AuthError {
    fn from(err: UserRepositoryError) -> Self {
        match err {
            UserRepositoryError::EmailAlreadyExists => AuthError::Conflict,
            UserRepositoryError::DatabaseError(e) => AuthError::ServerError(e.to_string()),
        }
    }
}

impl From<PasswordError> for AuthError {
    fn from(err: PasswordError) -> Self {
        AuthError::ServerError(err.to_string())
    }
}

/// Issuance failures; verification goes through [`AuthError::rejected`]
impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        AuthError::ServerError(err.to_string())
    }
}

impl From<RateLimited> for AuthError {
    fn from(limited: RateLimited) -> Self {
        AuthError::RateLimited {
            retry_after: limited.retry_after,
        }
    }
}

/// Tokens minted by a successful login.
///
/// Deliberately not `Serialize`: the refresh token only ever leaves through
/// the cookie set by the HTTP layer.
#[derive(Debug, Clone)]
pub struct LoginTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime of the refresh token, for the cookie `Max-Age`
    pub refresh_max_age_secs: i64,
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    jwt_service: JwtService,
    hasher: PasswordHasher,
    login_limiter: SlidingWindowLimiter,
    admin_emails: Arc<[String]>,
}

impl AuthService {
    /// Create a new authentication service with default hashing cost and login limits
    pub fn new(users: Arc<dyn UserStore>, jwt_service: JwtService) -> Self {
        Self {
            users,
            jwt_service,
            hasher: PasswordHasher::default(),
            login_limiter: SlidingWindowLimiter::default(),
            admin_emails: Arc::from(Vec::new()),
        }
    }

    pub fn with_password_hasher(mut self, hasher: PasswordHasher) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_login_limiter(mut self, limiter: SlidingWindowLimiter) -> Self {
        self.login_limiter = limiter;
        self
    }

    /// Identities that are granted the admin role at registration
    pub fn with_admin_emails(mut self, emails: impl IntoIterator<Item = String>) -> Self {
        self.admin_emails = emails
            .into_iter()
            .map(|e| normalize_email(&e))
            .collect::<Vec<_>>()
            .into();
        self
    }

    pub fn jwt_service(&self) -> &JwtService {
        &self.jwt_service
    }

    pub fn login_limiter(&self) -> &SlidingWindowLimiter {
        &self.login_limiter
    }

    /// Validate email format
    fn validate_email(email: &str) -> Result<(), AuthError> {
        let invalid = || AuthError::validation("Invalid email format");

        let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return Err(invalid());
        }

        // Domain needs at least one dot and no empty labels
        if !domain.contains('.') || domain.split('.').any(str::is_empty) {
            return Err(invalid());
        }

        if email.chars().any(char::is_whitespace) {
            return Err(invalid());
        }

        Ok(())
    }

    fn validate_name(name: &str) -> Result<(), AuthError> {
        if name.is_empty() {
            return Err(AuthError::validation("Name is required"));
        }
        if name.chars().count() > MAX_NAME_CHARS {
            return Err(AuthError::validation(format!(
                "Name must be at most {MAX_NAME_CHARS} characters"
            )));
        }
        Ok(())
    }

    fn validate_password(password: &str) -> Result<(), AuthError> {
        if password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(AuthError::validation(format!(
                "Password too short (minimum {MIN_PASSWORD_CHARS} characters)"
            )));
        }
        if password.len() > MAX_PASSWORD_BYTES {
            return Err(AuthError::validation(format!(
                "Password too long (maximum {MAX_PASSWORD_BYTES} bytes)"
            )));
        }
        Ok(())
    }

    fn role_for(&self, email: &str) -> Role {
        if self.admin_emails.iter().any(|admin| admin == email) {
            Role::Admin
        } else {
            Role::User
        }
    }

    /// Register a new user and issue an access token for it
    pub async fn register(&self, request: RegisterRequest) -> Result<RegisterResponse, AuthError> {
        let name = request.name.trim().to_string();
        let email = normalize_email(&request.email);

        Self::validate_name(&name)?;
        Self::validate_email(&email)?;
        Self::validate_password(&request.password)?;

        // Cheap duplicate check before paying for bcrypt; the store still
        // enforces uniqueness for concurrent registrations
        if self.users.find_by_email(&email).await?.is_some() {
            return Err(AuthError::Conflict);
        }

        let password_hash = self.hasher.hash(&request.password).await?;
        let role = self.role_for(&email);

        let user = self
            .users
            .create(CreateUser {
                email,
                name,
                password_hash,
                role,
            })
            .await?;

        let access = self
            .jwt_service
            .generate_access_token(user.id, &user.name, user.role)?;

        tracing::info!("User registered: {} (role {})", user.id, user.role);

        Ok(RegisterResponse {
            message: "User registered successfully".to_string(),
            token: access.token,
        })
    }

    /// Record a login attempt from `source`, failing once the window is full.
    ///
    /// Every attempt counts, including ones that never reach a credential check.
    pub fn admit_login(&self, source: &str) -> Result<(), AuthError> {
        self.login_limiter.check_and_record(source).map_err(|limited| {
            tracing::warn!(
                "Login rate limit hit for {}, retry in {}s",
                source,
                limited.retry_after.as_secs()
            );
            AuthError::from(limited)
        })
    }

    /// Authenticate credentials for a source address.
    ///
    /// The attempt is counted against `source` before any lookup happens.
    pub async fn login(
        &self,
        source: &str,
        request: LoginRequest,
    ) -> Result<LoginTokens, AuthError> {
        self.admit_login(source)?;

        let email = normalize_email(&request.email);
        if email.is_empty() || request.password.is_empty() {
            return Err(AuthError::validation("Email and password are required"));
        }

        let user = self
            .users
            .find_by_email(&email)
            .await?
            .ok_or(AuthError::NotFound)?;

        if !self.hasher.verify(&request.password, &user.password_hash).await? {
            tracing::info!("Invalid credentials for user {}", user.id);
            return Err(AuthError::InvalidCredentials);
        }

        let access = self
            .jwt_service
            .generate_access_token(user.id, &user.name, user.role)?;
        let refresh = self.jwt_service.generate_refresh_token(user.id)?;

        tracing::info!("User logged in: {}", user.id);

        Ok(LoginTokens {
            access_token: access.token,
            refresh_token: refresh.token,
            refresh_max_age_secs: self.jwt_service.refresh_token_max_age_secs(),
        })
    }

    /// Verify an access token and load the user it refers to
    pub async fn validate_token(&self, token: &str) -> Result<UserProfile, AuthError> {
        if token.is_empty() {
            return Err(AuthError::validation("No token provided"));
        }

        let claims = self.authenticate(token)?;
        let user_id = claims
            .user_id()
            .map_err(|e| AuthError::rejected(TokenType::Access, e))?;

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::NotFound)?;

        Ok(user.into())
    }

    /// Verify an access token without touching the store
    pub fn authenticate(&self, token: &str) -> Result<AccessClaims, AuthError> {
        self.jwt_service
            .validate_access_token(token)
            .map_err(|e| AuthError::rejected(TokenType::Access, e))
    }

    /// Mint a new access token from the refresh token carried by the cookie.
    ///
    /// The refresh token itself is neither rotated nor reissued.
    pub async fn refresh(&self, refresh_token: Option<&str>) -> Result<String, AuthError> {
        let token = refresh_token
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::Unauthenticated)?;

        let claims = self
            .jwt_service
            .validate_refresh_token(token)
            .map_err(|e| AuthError::rejected(TokenType::Refresh, e))?;
        let user_id = claims
            .user_id()
            .map_err(|e| AuthError::rejected(TokenType::Refresh, e))?;

        // Name and role come from the record, the refresh token only carries the subject
        let Some(user) = self.users.find_by_id(user_id).await? else {
            tracing::info!("Refresh token subject {} no longer exists", user_id);
            return Err(AuthError::InvalidToken(TokenType::Refresh));
        };

        let access = self
            .jwt_service
            .generate_access_token(user.id, &user.name, user.role)?;

        tracing::debug!("Access token refreshed for user {}", user.id);

        Ok(access.token)
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
