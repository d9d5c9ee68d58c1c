//! Authentication module
//!
//! This module provides authentication functionality including:
//! - JWT access/refresh token generation and validation
//! - Password hashing off the async runtime
//! - Sliding-window rate limiting of login attempts
//! - Registration, login and refresh business logic
//! - Route guard and REST API endpoints

pub mod api;
pub mod guard;
pub mod jwt;
pub mod password;
pub mod rate_limiter;
pub mod service;

pub use api::{AuthApiState, ClientAddr, auth_api_router};
pub use guard::{AuthUser, Guard, authorize, bearer_token, require};
pub use jwt::{AccessClaims, JwtConfig, JwtError, JwtService, RefreshClaims, TokenType};
pub use password::{PasswordError, PasswordHasher};
pub use rate_limiter::{RateLimited, SlidingWindowLimiter};
pub use service::{AuthError, AuthService, LoginTokens};
