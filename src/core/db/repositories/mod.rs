//! Database repositories for authgate
//!
//! Repositories encapsulate data access and give the authentication service
//! a storage-agnostic API through the `UserStore` trait.

pub mod memory;
pub mod user;

pub use memory::InMemoryUserRepository;
pub use user::{UserRepository, UserRepositoryError, UserStore};
