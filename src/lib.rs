//! authgate - minimal authentication service
//!
//! Short-lived bearer access tokens, long-lived refresh tokens carried in an
//! HTTP-only cookie, and a session client that refreshes once on 401.
//!
//! The `ssr` feature builds the authority (`core`), the `client` feature the
//! session client. The wire `contract` is always available.

pub mod contract;

#[cfg(feature = "ssr")]
pub mod core;

#[cfg(feature = "client")]
pub mod client;
