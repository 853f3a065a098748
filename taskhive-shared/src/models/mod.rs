//! Database models for TaskHive
//!
//! Every project-scoped model query takes the owning `project_id` as part of
//! its `WHERE` clause, so a child id paired with the wrong project simply
//! matches nothing.
//!
//! # Models
//!
//! - `user`: User accounts, verification and reset tokens, session state
//! - `project`: Projects (root of the containment tree)
//! - `membership`: User-project edges with a role; the authorization source
//! - `task`: Tasks, their status and attachments
//! - `subtask`: Checklist items under a task
//! - `note`: Free-form project notes

pub mod membership;
pub mod note;
pub mod project;
pub mod subtask;
pub mod task;
pub mod user;

/// Returns the name of the constraint a database error violated, if any.
///
/// Used to translate unique-constraint violations into domain conflicts
/// without string-matching error messages.
pub fn violated_constraint(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint(),
        _ => None,
    }
}
