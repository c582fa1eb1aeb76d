use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use outlay_core::config::{AppConfig, LoadOptions, LogFormat, LoggingConfig};
use outlay_core::domain::comment::Comment;
use outlay_core::domain::request::{Request, RequestField, RequestId, RequestStatus};
use outlay_core::domain::user::UserId;
use outlay_db::connect_with_settings;
use outlay_db::repositories::{
    RequestPage, SqlAuditLog, SqlCommentRepository, SqlRequestRepository, SqlUserRepository,
};
use outlay_service::{Draft, RequestService, ServiceError};

use crate::commands::CommandResult;
use crate::RequestCommand;

pub fn run(command: RequestCommand) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "request",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };
    init_tracing(&config.logging);

    let policy = match config.access_policy() {
        Ok(policy) => policy,
        Err(error) => {
            return CommandResult::failure(
                "request",
                "config_validation",
                format!("permission configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "request",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        {
            Ok(pool) => pool,
            Err(error) => {
                return CommandResult::failure(
                    "request",
                    "db_connectivity",
                    error.to_string(),
                    4,
                );
            }
        };

        let service = RequestService::new(
            policy,
            &config.limits,
            Arc::new(SqlRequestRepository::new(pool.clone())),
            Arc::new(SqlUserRepository::new(pool.clone())),
            Arc::new(SqlCommentRepository::new(pool.clone())),
            Arc::new(SqlAuditLog::new(pool.clone())),
        );

        let result = execute(&service, command).await;
        pool.close().await;
        result
    })
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    // A second init in the same process is fine to ignore.
    let _ = match logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

async fn execute(service: &RequestService, command: RequestCommand) -> CommandResult {
    match command {
        RequestCommand::Create {
            actor,
            handle,
            project,
            amount,
            currency,
            source,
            note,
            partner_account,
            document,
            period,
            date,
        } => {
            let draft = Draft {
                requester: UserId(actor),
                requester_handle: handle,
                project,
                amount,
                currency,
                source,
                note,
                partner_account,
                document_ref: document,
                period,
                expense_date: date,
            };
            match service.create(draft).await {
                Ok(request) => CommandResult::success(
                    "request.create",
                    format!("created request {}\n{}", request.id, render_request(&request)),
                ),
                Err(error) => failure("request.create", &error),
            }
        }
        RequestCommand::Approve { id, actor } => {
            match service.approve(UserId(actor), RequestId(id)).await {
                Ok(request) => CommandResult::success(
                    "request.approve",
                    format!("request {} is now {}", request.id, request.status),
                ),
                Err(error) => failure("request.approve", &error),
            }
        }
        RequestCommand::Reject { id, actor, reason } => {
            match service.reject(UserId(actor), RequestId(id), &reason).await {
                Ok(request) => CommandResult::success(
                    "request.reject",
                    format!("request {} rejected", request.id),
                ),
                Err(error) => failure("request.reject", &error),
            }
        }
        RequestCommand::Edit { id, actor, field, value } => {
            let field: RequestField = match field.parse() {
                Ok(field) => field,
                Err(error) => {
                    return CommandResult::failure("request.edit", "validation", error.to_string(), 9);
                }
            };
            match service.edit_field(UserId(actor), RequestId(id), field, &value).await {
                Ok(request) => CommandResult::success(
                    "request.edit",
                    format!("request {} updated\n{}", request.id, render_request(&request)),
                ),
                Err(error) => failure("request.edit", &error),
            }
        }
        RequestCommand::Comment { id, actor, body } => {
            match service.add_comment(UserId(actor), RequestId(id), &body).await {
                Ok(comment) => CommandResult::success(
                    "request.comment",
                    format!("comment {} added to request {}", comment.id.0, comment.request_id),
                ),
                Err(error) => failure("request.comment", &error),
            }
        }
        RequestCommand::Show { id, actor } => {
            let request = match service.show(UserId(actor), RequestId(id)).await {
                Ok(request) => request,
                Err(error) => return failure("request.show", &error),
            };
            let comments = match service.comments(UserId(actor), RequestId(id)).await {
                Ok(comments) => comments,
                Err(error) => return failure("request.show", &error),
            };
            CommandResult::success("request.show", render_request_full(&request, &comments))
        }
        RequestCommand::List { actor, status, page } => {
            let status = match status.as_deref().map(parse_status).transpose() {
                Ok(status) => status,
                Err(message) => {
                    return CommandResult::failure("request.list", "validation", message, 9);
                }
            };
            match service.list_requests(UserId(actor), status, page).await {
                Ok(listed) => CommandResult::success("request.list", render_page(&listed, page)),
                Err(error) => failure("request.list", &error),
            }
        }
    }
}

fn parse_status(raw: &str) -> Result<RequestStatus, String> {
    RequestStatus::parse(raw)
        .ok_or_else(|| format!("unknown status `{raw}` (expected pending|waiting|paid|rejected)"))
}

fn failure(command: &str, error: &ServiceError) -> CommandResult {
    let (error_class, exit_code) = match error {
        ServiceError::NotFound(_) => ("not_found", 6),
        ServiceError::Forbidden { .. } => ("forbidden", 7),
        ServiceError::InvalidTransition(_) => ("invalid_transition", 8),
        ServiceError::Validation(_) => ("validation", 9),
        ServiceError::Storage(_) => ("storage", 10),
    };
    CommandResult::failure(command, error_class, error.to_string(), exit_code)
}

fn render_request(request: &Request) -> String {
    let mut lines = vec![
        format!("request {} [{}]", request.id, request.status),
        format!("  requester: {}", request.requester),
        format!("  project: {}  source: {}", request.project, request.source),
        format!("  amount: {} {}", request.amount, request.currency),
        format!("  expense date: {}", request.expense_date),
    ];
    if let Some(period) = request.period {
        lines.push(format!("  period: {period}"));
    }
    if let Some(note) = &request.note {
        lines.push(format!("  note: {note}"));
    }
    if let Some(account) = &request.partner_account {
        lines.push(format!("  partner account: {account}"));
    }
    if let Some(document) = &request.document_ref {
        lines.push(format!("  document: {document}"));
    }
    for entry in &request.history {
        let reason = entry
            .reason
            .as_deref()
            .map(|reason| format!(" ({reason})"))
            .unwrap_or_default();
        lines.push(format!(
            "  -> {} at {} by {}{}",
            entry.status,
            entry.at.format("%Y-%m-%d %H:%M:%S"),
            entry.actor,
            reason
        ));
    }
    lines.join("\n")
}

fn render_request_full(request: &Request, comments: &[Comment]) -> String {
    let mut output = render_request(request);
    if !comments.is_empty() {
        output.push_str("\n  comments:");
        for comment in comments {
            output.push_str(&format!(
                "\n    [{}] {}: {}",
                comment.created_at.format("%Y-%m-%d %H:%M"),
                comment.author,
                comment.body
            ));
        }
    }
    output
}

fn render_page(page: &RequestPage, page_number: u32) -> String {
    if page.items.is_empty() {
        return format!("no visible requests (page {page_number}, {} total)", page.total);
    }
    let mut lines =
        vec![format!("page {page_number}: {} of {} visible requests", page.items.len(), page.total)];
    for request in &page.items {
        lines.push(format!(
            "- #{} [{}] {} {} from {} by {} ({})",
            request.id,
            request.status,
            request.amount,
            request.currency,
            request.source,
            request.requester,
            request.expense_date
        ));
    }
    lines.join("\n")
}
