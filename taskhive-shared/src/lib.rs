//! # TaskHive Shared Library
//!
//! Domain types, persistence and authorization logic used by the TaskHive
//! API server.
//!
//! ## Module Organization
//!
//! - `models`: Database models and data structures
//! - `auth`: Passwords, tokens, principals and the project authorization gate
//! - `cascade`: Multi-record deletions that must commit or roll back together
//! - `db`: Connection pool and migrations
//! - `mail`: Outgoing email (verification, password reset)
//! - `storage`: Attachment blob storage backends

pub mod auth;
pub mod cascade;
pub mod db;
pub mod mail;
pub mod models;
pub mod storage;

/// Current version of the TaskHive shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
