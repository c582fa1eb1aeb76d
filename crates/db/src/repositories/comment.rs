use chrono::{DateTime, Utc};
use sqlx::Row;

use outlay_core::domain::comment::{Comment, CommentId};
use outlay_core::domain::request::RequestId;
use outlay_core::domain::user::UserId;

use super::{CommentRepository, NewComment, RepositoryError};
use crate::DbPool;

pub struct SqlCommentRepository {
    pool: DbPool,
}

impl SqlCommentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_comment(row: &sqlx::sqlite::SqliteRow) -> Result<Comment, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let request_id: i64 =
        row.try_get("request_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let author: i64 = row.try_get("author").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let body: String = row.try_get("body").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("timestamp `{created_at}`: {e}")))?;

    Ok(Comment {
        id: CommentId(id),
        request_id: RequestId(request_id),
        author: UserId(author),
        body,
        created_at,
    })
}

#[async_trait::async_trait]
impl CommentRepository for SqlCommentRepository {
    async fn append(&self, new: NewComment) -> Result<Comment, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO comments (request_id, author, body, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(new.request_id.0)
        .bind(new.author.0)
        .bind(&new.body)
        .bind(new.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(Comment {
            id: CommentId(result.last_insert_rowid()),
            request_id: new.request_id,
            author: new.author,
            body: new.body,
            created_at: new.created_at,
        })
    }

    async fn list_for_request(&self, id: RequestId) -> Result<Vec<Comment>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, request_id, author, body, created_at FROM comments
             WHERE request_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_comment).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use outlay_core::catalog::{Currency, Project, Source};
    use outlay_core::domain::user::UserId;

    use super::SqlCommentRepository;
    use crate::repositories::{
        CommentRepository, NewComment, NewRequest, RequestRepository, SqlRequestRepository,
        SqlUserRepository, UserRepository,
    };
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn comments_come_back_oldest_first_per_request() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let users = SqlUserRepository::new(pool.clone());
        users.get_or_create(UserId(1), "alice").await.expect("user");

        let requests = SqlRequestRepository::new(pool.clone());
        let request = requests
            .create(NewRequest {
                requester: UserId(1),
                project: Project::MfRf,
                amount: Decimal::new(100, 0),
                currency: Currency::Rub,
                source: Source::RsRf,
                note: None,
                partner_account: None,
                document_ref: None,
                period: None,
                expense_date: chrono::NaiveDate::from_ymd_opt(2030, 1, 1).expect("date"),
                created_at: Utc::now(),
            })
            .await
            .expect("request");

        let comments = SqlCommentRepository::new(pool);
        for body in ["first", "second"] {
            comments
                .append(NewComment {
                    request_id: request.id,
                    author: UserId(1),
                    body: body.to_string(),
                    created_at: Utc::now(),
                })
                .await
                .expect("append");
        }

        let listed = comments.list_for_request(request.id).await.expect("list");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].body, "first");
        assert_eq!(listed[1].body, "second");
    }
}
