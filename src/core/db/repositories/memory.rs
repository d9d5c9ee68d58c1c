//! In-process user store
//!
//! Used when no `DATABASE_URL` is configured and throughout the tests.
//! Records live only as long as the process.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, mapref::entry::Entry};
use std::sync::Arc;
use uuid::Uuid;

use super::user::{UserRepositoryError, UserStore};
use crate::core::db::models::{CreateUser, User};

#[derive(Clone, Default)]
pub struct InMemoryUserRepository {
    users: Arc<DashMap<Uuid, User>>,
    /// email -> id
    emails: Arc<DashMap<String, Uuid>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Remove a record, returning whether it existed
    pub fn remove(&self, id: Uuid) -> bool {
        match self.users.remove(&id) {
            Some((_, user)) => {
                self.emails.remove(&user.email);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl UserStore for InMemoryUserRepository {
    async fn create(&self, user: CreateUser) -> Result<User, UserRepositoryError> {
        // The email entry stays locked until the record is in place
        match self.emails.entry(user.email.clone()) {
            Entry::Occupied(_) => Err(UserRepositoryError::EmailAlreadyExists),
            Entry::Vacant(slot) => {
                let record = User {
                    id: Uuid::new_v4(),
                    email: user.email,
                    name: user.name,
                    password_hash: user.password_hash,
                    role: user.role,
                    created_at: Utc::now(),
                };
                self.users.insert(record.id, record.clone());
                slot.insert(record.id);
                Ok(record)
            }
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, UserRepositoryError> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, UserRepositoryError> {
        let Some(id) = self.emails.get(email).map(|id| *id) else {
            return Ok(None);
        };
        self.find_by_id(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::Role;

    fn new_user(email: &str) -> CreateUser {
        CreateUser {
            email: email.to_string(),
            name: "Test".to_string(),
            password_hash: "hash".to_string(),
            role: Role::User,
        }
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let repo = InMemoryUserRepository::new();

        let user = repo.create(new_user("a@example.com")).await.unwrap();

        let by_id = repo.find_by_id(user.id).await.unwrap().unwrap();
        let by_email = repo.find_by_email("a@example.com").await.unwrap().unwrap();
        assert_eq!(by_id.id, user.id);
        assert_eq!(by_email.id, user.id);
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let repo = InMemoryUserRepository::new();

        repo.create(new_user("dup@example.com")).await.unwrap();
        let result = repo.create(new_user("dup@example.com")).await;

        assert!(matches!(result, Err(UserRepositoryError::EmailAlreadyExists)));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_registration() {
        let repo = InMemoryUserRepository::new();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let repo = repo.clone();
                tokio::spawn(async move { repo.create(new_user("race@example.com")).await })
            })
            .collect();

        let mut created = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_user() {
        let repo = InMemoryUserRepository::new();

        assert!(repo.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
        assert!(repo.find_by_email("nobody@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove() {
        let repo = InMemoryUserRepository::new();
        let user = repo.create(new_user("gone@example.com")).await.unwrap();

        assert!(repo.remove(user.id));
        assert!(!repo.remove(user.id));
        assert!(repo.is_empty());
        assert!(repo.find_by_email("gone@example.com").await.unwrap().is_none());
    }
}
