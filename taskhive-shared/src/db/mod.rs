//! Database layer
//!
//! - `pool`: PostgreSQL connection pool with health checks
//! - `migrations`: Embedded schema migrations (root `migrations/` directory)
//!
//! Models live in [`crate::models`].

pub mod migrations;
pub mod pool;
