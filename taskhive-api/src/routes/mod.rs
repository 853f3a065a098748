//! API route handlers
//!
//! Handlers are organized by resource:
//!
//! - `health`: Health check endpoint
//! - `users`: Registration, email verification, sessions and passwords
//! - `projects`: Projects and their memberships
//! - `tasks`: Tasks, assignment and attachments
//! - `subtasks`: Checklist items under a task
//! - `notes`: Project notes

pub mod health;
pub mod notes;
pub mod projects;
pub mod subtasks;
pub mod tasks;
pub mod users;
