//! Deterministic demo data for local development and the `seed` command.

use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;

use outlay_core::catalog::{Currency, Project, Source};
use outlay_core::domain::request::{RequestStatus, StatusEntry};
use outlay_core::domain::user::UserId;
use outlay_core::validate::Period;

use crate::repositories::{
    CommentRepository, NewComment, NewRequest, RepositoryError, RequestRepository,
    SqlCommentRepository, SqlRequestRepository, SqlUserRepository, UserRepository,
};
use crate::DbPool;

#[derive(Clone, Copy, Debug, Default)]
pub struct SeedResult {
    pub users: u32,
    pub requests: u32,
    pub comments: u32,
}

/// Populate an empty database with a small, fixed scenario: three users,
/// four requests across the catalog, one of them already approved once
/// and one rejected. Running against a non-empty database is refused.
pub async fn seed_demo_data(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM requests")
        .fetch_one(pool)
        .await?;
    if existing > 0 {
        return Ok(SeedResult::default());
    }

    let users = SqlUserRepository::new(pool.clone());
    let requests = SqlRequestRepository::new(pool.clone());
    let comments = SqlCommentRepository::new(pool.clone());

    let alice = UserId(1001);
    let bob = UserId(1002);
    let carol = UserId(1003);
    users.get_or_create(alice, "alice").await?;
    users.get_or_create(bob, "bob").await?;
    users.get_or_create(carol, "carol").await?;
    let mut result = SeedResult { users: 3, ..SeedResult::default() };

    let base = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).single().unwrap_or_else(Utc::now);

    let office = requests
        .create(NewRequest {
            requester: alice,
            project: Project::MfRf,
            amount: Decimal::new(125_000_00, 2),
            currency: Currency::Rub,
            source: Source::RsRf,
            note: Some("office rent, january".to_string()),
            partner_account: None,
            document_ref: Some("INV-2026-014".to_string()),
            period: Some(Period::Monthly),
            expense_date: NaiveDate::from_ymd_opt(2026, 2, 1).unwrap_or_default(),
            created_at: base,
        })
        .await?;
    result.requests += 1;

    let ads = requests
        .create(NewRequest {
            requester: bob,
            project: Project::MfKz,
            amount: Decimal::new(480_000, 0),
            currency: Currency::Kzt,
            source: Source::CardTooKz,
            note: Some("ad campaign, february flight".to_string()),
            partner_account: Some("KZ86125KZT5004100100".to_string()),
            document_ref: None,
            period: None,
            expense_date: NaiveDate::from_ymd_opt(2026, 2, 10).unwrap_or_default(),
            created_at: base,
        })
        .await?;
    result.requests += 1;

    let hosting = requests
        .create(NewRequest {
            requester: bob,
            project: Project::MfWorld,
            amount: Decimal::new(1_200, 0),
            currency: Currency::Usdt,
            source: Source::Crypto,
            note: Some("hosting renewal".to_string()),
            partner_account: None,
            document_ref: None,
            period: Some(Period::Weekly),
            expense_date: NaiveDate::from_ymd_opt(2026, 2, 15).unwrap_or_default(),
            created_at: base,
        })
        .await?;
    result.requests += 1;

    let duplicate = requests
        .create(NewRequest {
            requester: carol,
            project: Project::MfAm,
            amount: Decimal::new(90_000, 0),
            currency: Currency::Amd,
            source: Source::RsOooAm,
            note: Some("duplicate of last week's transfer".to_string()),
            partner_account: None,
            document_ref: None,
            period: None,
            expense_date: NaiveDate::from_ymd_opt(2026, 2, 3).unwrap_or_default(),
            created_at: base,
        })
        .await?;
    result.requests += 1;

    // First approval on the ads request, so the demo shows a Waiting row.
    requests
        .transition(
            ads.id,
            RequestStatus::Pending,
            StatusEntry { status: RequestStatus::Waiting, at: base, actor: alice, reason: None },
        )
        .await?;

    // The duplicate gets rejected with a reason.
    requests
        .transition(
            duplicate.id,
            RequestStatus::Pending,
            StatusEntry {
                status: RequestStatus::Rejected,
                at: base,
                actor: alice,
                reason: Some("duplicate of request from last week".to_string()),
            },
        )
        .await?;

    comments
        .append(NewComment {
            request_id: office.id,
            author: alice,
            body: "landlord confirmed the new amount".to_string(),
            created_at: base,
        })
        .await?;
    result.comments += 1;

    comments
        .append(NewComment {
            request_id: hosting.id,
            author: carol,
            body: "wallet address unchanged from last cycle".to_string(),
            created_at: base,
        })
        .await?;
    result.comments += 1;

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::seed_demo_data;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn seeding_twice_only_populates_once() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let first = seed_demo_data(&pool).await.expect("seed");
        assert_eq!(first.users, 3);
        assert_eq!(first.requests, 4);
        assert_eq!(first.comments, 2);

        let second = seed_demo_data(&pool).await.expect("seed again");
        assert_eq!(second.requests, 0);
    }
}
