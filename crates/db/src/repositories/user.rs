use chrono::{DateTime, Utc};
use sqlx::Row;

use outlay_core::domain::user::{User, UserId};

use super::{RepositoryError, UserRepository};
use crate::DbPool;

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> Result<User, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let handle: String =
        row.try_get("handle").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("timestamp `{created_at}`: {e}")))?;

    Ok(User { id: UserId(id), handle, created_at })
}

#[async_trait::async_trait]
impl UserRepository for SqlUserRepository {
    async fn get_or_create(&self, id: UserId, handle: &str) -> Result<User, RepositoryError> {
        // Handles drift over time; the upsert keeps the latest one.
        sqlx::query(
            "INSERT INTO users (id, handle, created_at) VALUES (?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET handle = excluded.handle",
        )
        .bind(id.0)
        .bind(handle)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| RepositoryError::Decode("user row missing after upsert".into()))
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query("SELECT id, handle, created_at FROM users WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }
}

#[cfg(test)]
mod tests {
    use outlay_core::domain::user::UserId;

    use super::SqlUserRepository;
    use crate::repositories::UserRepository;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn get_or_create_is_idempotent_and_refreshes_the_handle() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let repo = SqlUserRepository::new(pool);
        let first = repo.get_or_create(UserId(7), "alice").await.expect("create");
        assert_eq!(first.handle, "alice");

        let second = repo.get_or_create(UserId(7), "alice_renamed").await.expect("upsert");
        assert_eq!(second.id, UserId(7));
        assert_eq!(second.handle, "alice_renamed");
        assert_eq!(second.created_at, first.created_at);
    }

    #[tokio::test]
    async fn find_by_id_returns_none_for_unknown_user() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let repo = SqlUserRepository::new(pool);
        assert!(repo.find_by_id(UserId(404)).await.expect("find").is_none());
    }
}
