//! Middleware for the API server
//!
//! - `auth`: resolves the request's principal on protected routes
//! - `security`: security response headers

pub mod auth;
pub mod security;
