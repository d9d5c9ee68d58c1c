//! One-way credential hashing with bcrypt
//!
//! Hashing is CPU bound, so both operations run on tokio's blocking pool.

/// Cost factor used when none is configured
pub const DEFAULT_BCRYPT_COST: u32 = 10;

/// Bounds accepted by bcrypt
const MIN_COST: u32 = 4;
const MAX_COST: u32 = 31;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("Password hashing failed: {0}")]
    Hashing(#[from] bcrypt::BcryptError),

    #[error("Hashing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// bcrypt hasher with a fixed cost
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_BCRYPT_COST)
    }
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self {
            cost: cost.clamp(MIN_COST, MAX_COST),
        }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash a password (salt is generated by bcrypt)
    pub async fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let password = password.to_owned();
        let cost = self.cost;
        let hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost)).await??;
        Ok(hash)
    }

    /// Compare a plaintext password against a stored hash
    pub async fn verify(&self, password: &str, hash: &str) -> Result<bool, PasswordError> {
        let password = password.to_owned();
        let hash = hash.to_owned();
        let matches = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await??;
        Ok(matches)
    }
}
