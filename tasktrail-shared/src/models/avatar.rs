/// Avatar metadata
///
/// The image bytes live on disk; this row records where. A user has at most
/// one avatar, so saving is an upsert keyed on `user_id`.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE avatars (
///     id BIGSERIAL PRIMARY KEY,
///     user_id BIGINT NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
///     file_path TEXT NOT NULL,
///     file_size BIGINT NOT NULL,
///     content_type TEXT NOT NULL,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Avatar {
    pub id: i64,
    pub user_id: i64,
    pub file_path: String,
    pub file_size: i64,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaveAvatar {
    pub user_id: i64,
    pub file_path: String,
    pub file_size: i64,
    pub content_type: String,
}

impl Avatar {
    /// Inserts or replaces the avatar row for `data.user_id`
    pub async fn save(pool: &PgPool, data: SaveAvatar) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Avatar>(
            r#"
            INSERT INTO avatars (user_id, file_path, file_size, content_type)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE
            SET file_path = EXCLUDED.file_path,
                file_size = EXCLUDED.file_size,
                content_type = EXCLUDED.content_type,
                updated_at = NOW()
            RETURNING id, user_id, file_path, file_size, content_type, created_at, updated_at
            "#,
        )
        .bind(data.user_id)
        .bind(data.file_path)
        .bind(data.file_size)
        .bind(data.content_type)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_user(pool: &PgPool, user_id: i64) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Avatar>(
            r#"
            SELECT id, user_id, file_path, file_size, content_type, created_at, updated_at
            FROM avatars
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn delete_by_user(pool: &PgPool, user_id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM avatars WHERE user_id = $1")
            .bind(user_id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
