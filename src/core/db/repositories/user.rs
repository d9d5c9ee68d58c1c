//! User repository for credential records
//!
//! `UserStore` is the persistence seam the authentication service talks to.
//! `UserRepository` backs it with PostgreSQL; see `memory` for the in-process
//! implementation used without a database and in tests.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::core::db::models::{CreateUser, User};

/// Postgres SQLSTATE for unique constraint violations
const UNIQUE_VIOLATION: &str = "23505";

/// User repository error types
#[derive(Debug, thiserror::Error)]
pub enum UserRepositoryError {
    #[error("Email already exists")]
    EmailAlreadyExists,

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

/// Store of credential records keyed by identity
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Persist a new record; fails with `EmailAlreadyExists` on a duplicate identity
    async fn create(&self, user: CreateUser) -> Result<User, UserRepositoryError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, UserRepositoryError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserRepositoryError>;
}

/// PostgreSQL-backed user repository
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    /// Create a new user repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for UserRepository {
    async fn create(&self, user: CreateUser) -> Result<User, UserRepositoryError> {
        // The UNIQUE constraint on email settles concurrent registrations
        let result = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, name, password_hash, role)
            VALUES ($1, $2, $3, $4)
            RETURNING id, email, name, password_hash, role, created_at
            "#,
        )
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(user.role)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(user) => Ok(user),
            Err(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) =>
            {
                Err(UserRepositoryError::EmailAlreadyExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, UserRepositoryError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, name, password_hash, role, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserRepositoryError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, name, password_hash, role, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            UserRepositoryError::EmailAlreadyExists.to_string(),
            "Email already exists"
        );
        let err: UserRepositoryError = sqlx::Error::RowNotFound.into();
        assert!(err.to_string().starts_with("Database error"));
    }
}
