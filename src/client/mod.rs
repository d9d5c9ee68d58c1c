//! Session client for the authentication API

mod error;
pub mod session;
pub mod token_store;

pub use error::ClientError;
pub use session::{ApiCall, SessionClient};
pub use token_store::AccessTokenStore;
