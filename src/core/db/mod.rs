//! Database module for authgate
//!
//! Credential persistence: PostgreSQL through SQLx, or an in-process store
//! when no database is configured.

pub mod models;
pub mod pool;
pub mod repositories;

pub use models::*;
pub use pool::{DbConfig, DbError, create_pool, create_pool_with_migrations};
pub use repositories::{InMemoryUserRepository, UserRepository, UserRepositoryError, UserStore};

pub use sqlx::PgPool;
