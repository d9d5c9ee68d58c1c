//! Auth API endpoints
//!
//! Provides REST API endpoints for authentication:
//! - POST /auth/register - Register a new user
//! - POST /auth/login - Login, access token in the body, refresh token in a cookie
//! - POST /auth/validate-token - Check an access token and return its user
//! - POST /auth/refresh-token - New access token from the refresh cookie
//! - POST /auth/logout - Clear the refresh cookie
//! - GET /auth/protected - Any authenticated user
//! - GET /auth/admin - Admin role only

use axum::{
    Json, Router,
    extract::{ConnectInfo, FromRequestParts, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header, request::Parts},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::{
    CookieJar,
    cookie::{Cookie, SameSite},
};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::contract::{
    AccessTokenResponse, ApiError, LoginRequest, MessageResponse, REFRESH_COOKIE,
    RegisterRequest, RegisterResponse, Role, ValidateTokenRequest, ValidateTokenResponse, paths,
};
use crate::core::auth::guard::{AuthUser, Guard, require};
use crate::core::auth::jwt::TokenType;
use crate::core::auth::service::{AuthError, AuthService};

/// Auth API state containing the auth service
#[derive(Clone)]
pub struct AuthApiState {
    pub auth_service: AuthService,
    /// Mark the refresh cookie `Secure` (production)
    pub secure_cookie: bool,
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Validation(_)
            | AuthError::Conflict
            | AuthError::InvalidCredentials => StatusCode::BAD_REQUEST,
            AuthError::NotFound => StatusCode::NOT_FOUND,
            AuthError::Unauthenticated | AuthError::InvalidToken(TokenType::Access) => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::InvalidToken(TokenType::Refresh) | AuthError::Forbidden => {
                StatusCode::FORBIDDEN
            }
            AuthError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthError::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Validation(_) => "VALIDATION_ERROR",
            AuthError::Conflict => "USER_EXISTS",
            AuthError::NotFound => "USER_NOT_FOUND",
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::Unauthenticated => "UNAUTHENTICATED",
            AuthError::InvalidToken(TokenType::Access) => "INVALID_TOKEN",
            AuthError::InvalidToken(TokenType::Refresh) => "INVALID_REFRESH_TOKEN",
            AuthError::Forbidden => "FORBIDDEN",
            AuthError::RateLimited { .. } => "RATE_LIMITED",
            AuthError::ServerError(_) => "SERVER_ERROR",
        }
    }
}

/// Convert AuthError to API response
impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Internal details stay in the log
        let message = match &self {
            AuthError::ServerError(details) => {
                tracing::error!("Auth request failed: {}", details);
                "Server error".to_string()
            }
            other => other.to_string(),
        };

        let mut response = (status, Json(ApiError::new(message, self.code()))).into_response();

        if let AuthError::RateLimited { retry_after } = self {
            let secs = retry_after.as_secs_f64().ceil().max(1.0) as u64;
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

/// Source address used to key login rate limiting
#[derive(Debug, Clone)]
pub struct ClientAddr(pub String);

impl<S> FromRequestParts<S> for ClientAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        Ok(ClientAddr(addr))
    }
}

/// Create the auth API router
pub fn auth_api_router(state: AuthApiState) -> Router {
    let jwt_service = state.auth_service.jwt_service().clone();

    let protected = Router::new()
        .route(paths::PROTECTED, get(protected_handler))
        .route_layer(middleware::from_fn_with_state(
            Guard::authenticated(jwt_service.clone()),
            require,
        ));

    let admin = Router::new()
        .route(paths::ADMIN, get(admin_handler))
        .route_layer(middleware::from_fn_with_state(
            Guard::with_roles(jwt_service, [Role::Admin]),
            require,
        ));

    Router::new()
        .route(paths::REGISTER, post(register_handler))
        .route(paths::LOGIN, post(login_handler))
        .route(paths::VALIDATE_TOKEN, post(validate_token_handler))
        .route(paths::REFRESH_TOKEN, post(refresh_handler))
        .route(paths::LOGOUT, post(logout_handler))
        .with_state(Arc::new(state))
        .merge(protected)
        .merge(admin)
}

/// Unwrap a JSON body, reporting malformed input as a validation error
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AuthError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AuthError::Validation(rejection.body_text()))
}

/// Expired, empty refresh cookie; sent on every logout
fn cleared_refresh_cookie(secure: bool) -> Cookie<'static> {
    let mut cookie = Cookie::build((REFRESH_COOKIE, ""))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path("/")
        .build();
    cookie.make_removal();
    cookie
}

fn refresh_cookie(token: String, max_age_secs: i64, secure: bool) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE, token))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .max_age(cookie::time::Duration::seconds(max_age_secs))
        .path("/")
        .build()
}

/// POST /auth/register
/// Register a new user
async fn register_handler(
    State(state): State<Arc<AuthApiState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterResponse>), AuthError> {
    let request = json_body(payload)?;
    tracing::info!("Registration attempt for email: {}", request.email);

    let response = state.auth_service.register(request).await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /auth/login
/// Login; the refresh token only travels in the cookie
async fn login_handler(
    State(state): State<Arc<AuthApiState>>,
    ClientAddr(source): ClientAddr,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<AccessTokenResponse>), AuthError> {
    let request = match json_body(payload) {
        Ok(request) => request,
        Err(err) => {
            // Malformed bodies still count against the source
            state.auth_service.admit_login(&source)?;
            return Err(err);
        }
    };
    tracing::info!("Login attempt for email: {} from {}", request.email, source);

    let tokens = state.auth_service.login(&source, request).await?;

    let jar = jar.add(refresh_cookie(
        tokens.refresh_token,
        tokens.refresh_max_age_secs,
        state.secure_cookie,
    ));

    Ok((
        jar,
        Json(AccessTokenResponse {
            access_token: tokens.access_token,
        }),
    ))
}

/// POST /auth/validate-token
async fn validate_token_handler(
    State(state): State<Arc<AuthApiState>>,
    payload: Result<Json<ValidateTokenRequest>, JsonRejection>,
) -> Result<Json<ValidateTokenResponse>, AuthError> {
    let request = json_body(payload)?;

    let user = state.auth_service.validate_token(&request.token).await?;

    Ok(Json(ValidateTokenResponse { valid: true, user }))
}

/// POST /auth/refresh-token
/// New access token from the refresh cookie; the cookie is left as is
async fn refresh_handler(
    State(state): State<Arc<AuthApiState>>,
    jar: CookieJar,
) -> Result<Json<AccessTokenResponse>, AuthError> {
    tracing::debug!("Token refresh request");

    let refresh_token = jar.get(REFRESH_COOKIE).map(|c| c.value().to_string());
    let access_token = state.auth_service.refresh(refresh_token.as_deref()).await?;

    Ok(Json(AccessTokenResponse { access_token }))
}

/// POST /auth/logout
/// Always succeeds and always clears the cookie, with or without a session
async fn logout_handler(
    State(state): State<Arc<AuthApiState>>,
    jar: CookieJar,
) -> (CookieJar, Json<MessageResponse>) {
    tracing::info!("Logout request");

    let jar = jar.add(cleared_refresh_cookie(state.secure_cookie));

    (jar, Json(MessageResponse::new("Logged out successfully")))
}

/// GET /auth/protected
async fn protected_handler(AuthUser(claims): AuthUser) -> Json<MessageResponse> {
    Json(MessageResponse::new(format!("Welcome, {}", claims.name)))
}

/// GET /auth/admin
async fn admin_handler(AuthUser(claims): AuthUser) -> Json<MessageResponse> {
    tracing::debug!("Admin access by {}", claims.sub);
    Json(MessageResponse::new("Welcome, Admin"))
}
