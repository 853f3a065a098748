//! Note model and database operations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

/// Project note
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Note {
    pub id: Uuid,
    pub project_id: Uuid,
    pub content: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A note with its author's username, as listed to members
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct NoteWithAuthor {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub note: Note,

    pub author_username: String,
}

impl Note {
    pub async fn create<'e, E>(
        executor: E,
        project_id: Uuid,
        content: &str,
        created_by: Uuid,
    ) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let note = sqlx::query_as::<_, Note>(
            r#"
            INSERT INTO notes (project_id, content, created_by)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(project_id)
        .bind(content)
        .bind(created_by)
        .fetch_one(executor)
        .await?;

        Ok(note)
    }

    pub async fn list_by_project<'e, E>(
        executor: E,
        project_id: Uuid,
    ) -> Result<Vec<NoteWithAuthor>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let notes = sqlx::query_as::<_, NoteWithAuthor>(
            r#"
            SELECT n.*, u.username AS author_username
            FROM notes n
            JOIN users u ON u.id = n.created_by
            WHERE n.project_id = $1
            ORDER BY n.created_at DESC
            "#,
        )
        .bind(project_id)
        .fetch_all(executor)
        .await?;

        Ok(notes)
    }

    pub async fn find_in_project<'e, E>(
        executor: E,
        project_id: Uuid,
        note_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let note = sqlx::query_as::<_, Note>("SELECT * FROM notes WHERE id = $1 AND project_id = $2")
            .bind(note_id)
            .bind(project_id)
            .fetch_optional(executor)
            .await?;

        Ok(note)
    }

    pub async fn update<'e, E>(
        executor: E,
        project_id: Uuid,
        note_id: Uuid,
        content: &str,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let note = sqlx::query_as::<_, Note>(
            r#"
            UPDATE notes
            SET content = $3, updated_at = NOW()
            WHERE id = $1 AND project_id = $2
            RETURNING *
            "#,
        )
        .bind(note_id)
        .bind(project_id)
        .bind(content)
        .fetch_optional(executor)
        .await?;

        Ok(note)
    }

    pub async fn delete<'e, E>(executor: E, project_id: Uuid, note_id: Uuid) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM notes WHERE id = $1 AND project_id = $2")
            .bind(note_id)
            .bind(project_id)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
