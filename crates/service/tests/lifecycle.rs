//! End-to-end lifecycle tests against the in-memory stores.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use outlay_core::audit::AuditOutcome;
use outlay_core::catalog::{Project, Source};
use outlay_core::config::LimitsConfig;
use outlay_core::domain::request::{RequestField, RequestId, RequestStatus};
use outlay_core::domain::user::UserId;
use outlay_core::permissions::{AccessPolicy, PermissionLevels};
use outlay_db::repositories::{
    InMemoryAuditLog, InMemoryCommentRepository, InMemoryRequestRepository, InMemoryUserRepository,
};
use outlay_service::{Draft, RequestService, ServiceError};

const FULL: UserId = UserId(1);
const RF_ADMIN: UserId = UserId(2);
const KZ_CRYPTO_ADMIN: UserId = UserId(3);
const ALICE: UserId = UserId(100);
const BOB: UserId = UserId(200);

struct Harness {
    service: RequestService,
    audit: Arc<InMemoryAuditLog>,
}

fn policy() -> AccessPolicy {
    let mut source_admins: HashMap<Source, HashSet<UserId>> = HashMap::new();
    source_admins.insert(Source::RsRf, HashSet::from([RF_ADMIN]));

    let mut crypto_admins: HashMap<Project, HashSet<UserId>> = HashMap::new();
    crypto_admins.insert(Project::MfKz, HashSet::from([KZ_CRYPTO_ADMIN]));

    AccessPolicy {
        full_access: HashSet::from([FULL]),
        admins: HashSet::from([RF_ADMIN, KZ_CRYPTO_ADMIN]),
        fincontrol: HashSet::new(),
        source_admins,
        crypto_admins,
        levels: PermissionLevels::default(),
    }
}

fn harness() -> Harness {
    let audit = Arc::new(InMemoryAuditLog::new());
    let service = RequestService::new(
        policy(),
        &LimitsConfig { max_amount: 1_000_000_000, page_size: 10 },
        Arc::new(InMemoryRequestRepository::new()),
        Arc::new(InMemoryUserRepository::new()),
        Arc::new(InMemoryCommentRepository::new()),
        audit.clone(),
    );
    Harness { service, audit }
}

fn draft(requester: UserId, source: &str) -> Draft {
    Draft {
        requester,
        requester_handle: format!("user-{}", requester),
        project: "mf_rf".to_string(),
        amount: "1500,50".to_string(),
        currency: "RUB".to_string(),
        source: source.to_string(),
        note: Some("office supplies".to_string()),
        partner_account: None,
        document_ref: None,
        period: None,
        expense_date: "2031-01-15".to_string(),
    }
}

#[tokio::test]
async fn create_produces_a_pending_request_with_normalized_amount() {
    let h = harness();
    let request = h.service.create(draft(ALICE, "rs_rf")).await.expect("create");

    assert_eq!(request.status, RequestStatus::Pending);
    assert!(request.history.is_empty());
    assert_eq!(request.amount.to_string(), "1500.50");
    assert_eq!(request.note.as_deref(), Some("office supplies"));
}

#[tokio::test]
async fn create_rejects_bad_amounts_dates_and_catalog_values() {
    let h = harness();

    let mut bad = draft(ALICE, "rs_rf");
    bad.amount = "0".to_string();
    assert!(matches!(h.service.create(bad).await, Err(ServiceError::Validation(_))));

    let mut bad = draft(ALICE, "rs_rf");
    bad.expense_date = "2020-01-01".to_string();
    assert!(matches!(h.service.create(bad).await, Err(ServiceError::Validation(_))));

    let mut bad = draft(ALICE, "rs_rf");
    bad.source = "petty_cash".to_string();
    assert!(matches!(h.service.create(bad).await, Err(ServiceError::Validation(_))));
}

#[tokio::test]
async fn two_approvals_walk_pending_waiting_paid() {
    let h = harness();
    let request = h.service.create(draft(ALICE, "rs_rf")).await.expect("create");

    let first = h.service.approve(RF_ADMIN, request.id).await.expect("first approval");
    assert_eq!(first.status, RequestStatus::Waiting);

    let second = h.service.approve(RF_ADMIN, request.id).await.expect("second approval");
    assert_eq!(second.status, RequestStatus::Paid);
    assert_eq!(second.history.len(), 2);
    assert!(second.history_consistent());

    // Paid is terminal.
    assert!(matches!(
        h.service.approve(RF_ADMIN, request.id).await,
        Err(ServiceError::InvalidTransition(_))
    ));
}

#[tokio::test]
async fn reject_requires_a_reason_and_only_works_on_pending() {
    let h = harness();
    let request = h.service.create(draft(ALICE, "rs_rf")).await.expect("create");

    assert!(matches!(
        h.service.reject(RF_ADMIN, request.id, "x").await,
        Err(ServiceError::Validation(_))
    ));

    let rejected = h
        .service
        .reject(RF_ADMIN, request.id, "duplicate invoice")
        .await
        .expect("reject");
    assert_eq!(rejected.status, RequestStatus::Rejected);
    assert_eq!(rejected.history[0].reason.as_deref(), Some("duplicate invoice"));

    // A waiting request cannot be rejected.
    let other = h.service.create(draft(ALICE, "rs_rf")).await.expect("create");
    h.service.approve(RF_ADMIN, other.id).await.expect("approve");
    assert!(matches!(
        h.service.reject(RF_ADMIN, other.id, "changed my mind").await,
        Err(ServiceError::InvalidTransition(_))
    ));
}

#[tokio::test]
async fn plain_users_cannot_approve_and_the_denial_is_audited() {
    let h = harness();
    let request = h.service.create(draft(ALICE, "rs_rf")).await.expect("create");

    let denied = h.service.approve(BOB, request.id).await;
    assert!(matches!(denied, Err(ServiceError::Forbidden { actor, .. }) if actor == BOB));

    let events = h.audit.events();
    let denial = events.iter().find(|e| e.outcome == AuditOutcome::Denied).expect("denial event");
    assert_eq!(denial.action, "request.approve");
    assert_eq!(denial.actor, BOB);
}

#[tokio::test]
async fn admins_are_scoped_to_their_sources() {
    let h = harness();
    let cash = {
        let mut d = draft(ALICE, "cash");
        d.currency = "USD".to_string();
        h.service.create(d).await.expect("create")
    };

    // RF_ADMIN administers rs_rf, not cash.
    assert!(matches!(
        h.service.approve(RF_ADMIN, cash.id).await,
        Err(ServiceError::Forbidden { .. })
    ));
    // A full-access admin is not scoped.
    let approved = h.service.approve(FULL, cash.id).await.expect("full access approves");
    assert_eq!(approved.status, RequestStatus::Waiting);
}

#[tokio::test]
async fn crypto_requests_are_scoped_by_project() {
    let h = harness();
    let kz = {
        let mut d = draft(ALICE, "crypto");
        d.project = "mf_kz".to_string();
        d.currency = "USDT".to_string();
        h.service.create(d).await.expect("create kz")
    };
    let rf = {
        let mut d = draft(ALICE, "crypto");
        d.currency = "USDT".to_string();
        h.service.create(d).await.expect("create rf")
    };

    h.service.approve(KZ_CRYPTO_ADMIN, kz.id).await.expect("project matches");
    assert!(matches!(
        h.service.approve(KZ_CRYPTO_ADMIN, rf.id).await,
        Err(ServiceError::Forbidden { .. })
    ));
}

#[tokio::test]
async fn edits_change_the_field_but_never_the_status() {
    let h = harness();
    let request = h.service.create(draft(ALICE, "rs_rf")).await.expect("create");

    let edited = h
        .service
        .edit_field(RF_ADMIN, request.id, RequestField::Amount, "2000")
        .await
        .expect("edit");
    assert_eq!(edited.amount.to_string(), "2000");
    assert_eq!(edited.status, RequestStatus::Pending);
    assert!(edited.history.is_empty());

    // Terminal requests are frozen.
    h.service.reject(RF_ADMIN, request.id, "not needed anymore").await.expect("reject");
    assert!(matches!(
        h.service.edit_field(RF_ADMIN, request.id, RequestField::Note, "still trying").await,
        Err(ServiceError::InvalidTransition(_))
    ));
}

#[tokio::test]
async fn comments_are_limited_to_people_who_can_see_the_request() {
    let h = harness();
    let request = h.service.create(draft(ALICE, "rs_rf")).await.expect("create");

    h.service.add_comment(ALICE, request.id, "submitted, invoice attached").await.expect("owner");
    h.service.add_comment(RF_ADMIN, request.id, "looks fine").await.expect("scoped admin");
    assert!(matches!(
        h.service.add_comment(BOB, request.id, "drive-by").await,
        Err(ServiceError::Forbidden { .. })
    ));

    let listed = h.service.comments(ALICE, request.id).await.expect("list");
    assert_eq!(listed.len(), 2);
}

#[tokio::test]
async fn listing_is_visibility_shaped() {
    let h = harness();
    h.service.create(draft(ALICE, "rs_rf")).await.expect("alice rf");
    let bob_cash = {
        let mut d = draft(BOB, "cash");
        d.currency = "USD".to_string();
        h.service.create(d).await.expect("bob cash")
    };
    h.service.create(draft(BOB, "rs_rf")).await.expect("bob rf");

    // A plain user sees only their own requests.
    let page = h.service.list_requests(ALICE, None, 0).await.expect("alice list");
    assert_eq!(page.total, 1);

    // A scoped admin sees their own plus everything from their sources.
    let page = h.service.list_requests(RF_ADMIN, None, 0).await.expect("admin list");
    assert_eq!(page.total, 2);
    assert!(page.items.iter().all(|r| r.source == Source::RsRf));

    // A full-access admin sees everything.
    let page = h.service.list_requests(FULL, None, 0).await.expect("full list");
    assert_eq!(page.total, 3);

    // The status filter narrows further.
    h.service.approve(FULL, bob_cash.id).await.expect("approve");
    let page = h
        .service
        .list_requests(FULL, Some(RequestStatus::Waiting), 0)
        .await
        .expect("waiting list");
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].id, bob_cash.id);
}

#[tokio::test]
async fn show_applies_the_same_visibility_rule() {
    let h = harness();
    let request = h.service.create(draft(ALICE, "rs_rf")).await.expect("create");

    assert!(h.service.show(ALICE, request.id).await.is_ok());
    assert!(h.service.show(RF_ADMIN, request.id).await.is_ok());
    assert!(matches!(
        h.service.show(BOB, request.id).await,
        Err(ServiceError::Forbidden { .. })
    ));
    assert!(matches!(
        h.service.show(ALICE, RequestId(999)).await,
        Err(ServiceError::NotFound(_))
    ));
}

#[tokio::test]
async fn the_audit_trail_records_the_whole_lifecycle() {
    let h = harness();
    let request = h.service.create(draft(ALICE, "rs_rf")).await.expect("create");
    h.service.approve(RF_ADMIN, request.id).await.expect("approve");
    h.service.approve(RF_ADMIN, request.id).await.expect("pay");

    let actions: Vec<String> = h.audit.events().into_iter().map(|e| e.action).collect();
    assert_eq!(actions, vec!["request.created", "request.approved", "request.approved"]);

    let events = h.audit.events();
    assert!(events.iter().all(|e| e.outcome == AuditOutcome::Success));
    assert!(events.iter().all(|e| e.request_id == Some(request.id)));
}
