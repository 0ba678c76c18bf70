//! HTTP handlers for identity-service.

pub mod admin;
pub mod auth;
pub mod context;

pub use context::ClientContext;
