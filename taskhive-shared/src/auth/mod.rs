//! Authentication and authorization
//!
//! # Modules
//!
//! - [`password`]: Argon2id password hashing and strength policy
//! - [`jwt`]: Access/refresh JWT issuing and validation
//! - [`tokens`]: One-time email tokens, stored as SHA-256 digests
//! - [`middleware`]: Resolving a request to a [`middleware::Principal`]
//! - [`authorization`]: The project authorization gate

pub mod authorization;
pub mod jwt;
pub mod middleware;
pub mod password;
pub mod tokens;
