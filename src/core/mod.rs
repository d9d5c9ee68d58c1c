//! Server side of the authority: configuration, authentication and storage

pub mod auth;
pub mod config;
pub mod db;
