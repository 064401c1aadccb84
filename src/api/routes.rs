//! API Routes
//!
//! HTTP endpoint definitions.

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{
    verify_transaction_hashes, AuditEventType, AuditLogEntry, AuditQuery, AuditRecord,
    IntegrityReport,
};
use crate::domain::{
    Amount, ClientContext, DomainError, RecipientId, Transaction, TransactionStatus,
    TransactionType, User,
};
use crate::error::{AppError, AppResult};
use crate::handlers::{DepositCommand, FailTransactionCommand, OpenAccountCommand, TransferCommand};
use crate::store::{LedgerStore, TransactionQuery};

use super::middleware::RequestUser;
use super::AppState;

const MAX_PAGE_SIZE: usize = 100;

// =========================================================================
// Request/Response types
// =========================================================================

/// Amount as sent by a client. Only decimal strings are accepted.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Text(String),
    Number(serde_json::Number),
}

impl AmountInput {
    fn into_raw(self) -> AppResult<String> {
        match self {
            AmountInput::Text(s) => Ok(s),
            AmountInput::Number(n) => Err(DomainError::invalid_transaction(format!(
                "amount must be a decimal string, got number {}",
                n
            ))
            .into()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub recipient_id: String,
    #[serde(default)]
    pub amount: Option<AmountInput>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub recipient_id: String,
    #[serde(default)]
    pub amount: Option<AmountInput>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub hold: bool,
}

#[derive(Debug, Deserialize)]
pub struct FailRequest {
    pub reason: String,
}

/// One party of a transaction
#[derive(Debug, Serialize)]
pub struct CounterpartyView {
    pub recipient_id: RecipientId,
    pub display_name: String,
}

impl From<&User> for CounterpartyView {
    fn from(user: &User) -> Self {
        Self {
            recipient_id: user.recipient_id.clone(),
            display_name: user.display_name.clone(),
        }
    }
}

/// Presentation projection of a transaction for one viewer.
///
/// A party sees `sent`/`received` and the other side as `counterparty`.
/// Anyone else (staff) gets `transfer`/`deposit` with both parties named.
#[derive(Debug, Serialize)]
pub struct TransactionView {
    pub reference_id: String,
    pub transaction_hash: String,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub amount: Amount,
    pub description: String,
    pub direction: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterparty: Option<CounterpartyView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<CounterpartyView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<CounterpartyView>,
    pub created_at: DateTime<Utc>,
}

impl TransactionView {
    fn base(transaction: &Transaction, direction: &'static str) -> Self {
        Self {
            reference_id: transaction.reference_id.clone(),
            transaction_hash: transaction.transaction_hash.clone(),
            transaction_type: transaction.transaction_type,
            status: transaction.status,
            amount: transaction.amount,
            description: transaction.description.clone(),
            direction,
            counterparty: None,
            sender: None,
            recipient: None,
            created_at: transaction.created_at,
        }
    }

    /// View of a party to the transaction
    fn for_party(transaction: &Transaction, viewer: Uuid, counterparty: Option<&User>) -> Self {
        let direction = match transaction.from_user {
            None => "deposit",
            Some(from) if from == viewer => "sent",
            Some(_) => "received",
        };
        Self {
            counterparty: counterparty.map(CounterpartyView::from),
            ..Self::base(transaction, direction)
        }
    }

    /// View of someone who is neither sender nor recipient
    fn neutral(transaction: &Transaction, sender: Option<&User>, recipient: Option<&User>) -> Self {
        let direction = match transaction.from_user {
            None => "deposit",
            Some(_) => "transfer",
        };
        Self {
            sender: sender.map(CounterpartyView::from),
            recipient: recipient.map(CounterpartyView::from),
            ..Self::base(transaction, direction)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Deserialize)]
pub struct AuditLogsQuery {
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub transaction_id: Option<Uuid>,
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page() -> usize {
    1
}

fn default_page_size() -> usize {
    20
}

#[derive(Debug, Serialize)]
pub struct AuditPage {
    pub page: usize,
    pub page_size: usize,
    pub has_more: bool,
    pub results: Vec<AuditLogEntry>,
}

#[derive(Debug, Deserialize)]
pub struct IntegrityQuery {
    #[serde(default = "default_integrity_limit")]
    pub limit: i64,
}

fn default_integrity_limit() -> i64 {
    1000
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router<S: LedgerStore>() -> Router<Arc<AppState<S>>> {
    Router::new()
        // Transfers and history
        .route("/transactions/transfer", post(transfer::<S>))
        .route("/transactions", get(list_transactions::<S>))
        .route("/transactions/:reference_id", get(get_transaction::<S>))
        .route("/accounts/me", get(get_me))
        // Session events reported by the upstream authenticator
        .route("/sessions", post(login::<S>).delete(logout::<S>))
        // Audit trail
        .route("/audit/logs", get(list_audit_logs::<S>))
        .route("/audit/logs/my_logs", get(my_audit_logs::<S>))
        .route("/audit/logs/:id", get(get_audit_log::<S>))
        // Staff
        .route("/admin/accounts", post(open_account::<S>))
        .route("/admin/deposits", post(deposit::<S>))
        .route("/admin/transactions/:reference_id/settle", post(settle_deposit::<S>))
        .route("/admin/transactions/:reference_id/fail", post(fail_transaction::<S>))
        .route("/admin/integrity", get(integrity::<S>))
}

fn require_user(request_user: Option<Extension<RequestUser>>) -> AppResult<User> {
    request_user
        .map(|Extension(RequestUser(user))| user)
        .ok_or_else(|| AppError::MissingHeader("X-Request-User-Id".to_string()))
}

fn require_staff(request_user: Option<Extension<RequestUser>>) -> AppResult<User> {
    let user = require_user(request_user)?;
    if !user.is_staff {
        return Err(AppError::Forbidden("staff only".to_string()));
    }
    Ok(user)
}

async fn load_user<S: LedgerStore>(
    store: &S,
    id: Uuid,
    cache: &mut HashMap<Uuid, User>,
) -> AppResult<()> {
    if !cache.contains_key(&id) {
        if let Some(user) = store.find_user(id).await? {
            cache.insert(id, user);
        }
    }
    Ok(())
}

async fn view_for<S: LedgerStore>(
    store: &S,
    transaction: &Transaction,
    viewer: Uuid,
    cache: &mut HashMap<Uuid, User>,
) -> AppResult<TransactionView> {
    if !transaction.involves(viewer) {
        if let Some(from) = transaction.from_user {
            load_user(store, from, cache).await?;
        }
        load_user(store, transaction.to_user, cache).await?;
        let sender = transaction.from_user.and_then(|id| cache.get(&id));
        return Ok(TransactionView::neutral(
            transaction,
            sender,
            cache.get(&transaction.to_user),
        ));
    }

    let other = if transaction.to_user == viewer {
        transaction.from_user
    } else {
        Some(transaction.to_user)
    };
    if let Some(id) = other {
        load_user(store, id, cache).await?;
    }
    let counterparty = other.and_then(|id| cache.get(&id));

    Ok(TransactionView::for_party(transaction, viewer, counterparty))
}

// =========================================================================
// POST /transactions/transfer
// =========================================================================

/// Transfer funds to another user by recipient id
async fn transfer<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Extension(context): Extension<ClientContext>,
    request_user: Option<Extension<RequestUser>>,
    Json(request): Json<TransferRequest>,
) -> AppResult<(StatusCode, Json<TransactionView>)> {
    let sender = require_user(request_user)?;

    let command = TransferCommand {
        sender_id: sender.id,
        recipient_id: request.recipient_id,
        amount: request.amount.map(AmountInput::into_raw).transpose()?,
        description: request.description,
    };

    let transaction = state.transfers.execute(command, Some(&context)).await?;

    let mut cache = HashMap::new();
    let view = view_for(&state.store, &transaction, sender.id, &mut cache).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

// =========================================================================
// GET /transactions
// =========================================================================

/// The caller's transactions, newest first
async fn list_transactions<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    request_user: Option<Extension<RequestUser>>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<TransactionView>>> {
    let user = require_user(request_user)?;
    let limit = query.limit.clamp(1, MAX_PAGE_SIZE as i64);

    let transactions = state
        .store
        .list_transactions(&TransactionQuery::for_user(user.id, limit))
        .await?;

    let mut cache = HashMap::new();
    let mut views = Vec::with_capacity(transactions.len());
    for transaction in &transactions {
        views.push(view_for(&state.store, transaction, user.id, &mut cache).await?);
    }
    Ok(Json(views))
}

// =========================================================================
// GET /transactions/:reference_id
// =========================================================================

async fn get_transaction<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    request_user: Option<Extension<RequestUser>>,
    Path(reference_id): Path<String>,
) -> AppResult<Json<TransactionView>> {
    let user = require_user(request_user)?;
    let not_found = || AppError::NotFound(format!("transaction {}", reference_id));

    let transaction = state.store.find_transaction(&reference_id).await?.ok_or_else(not_found)?;

    // Other people's transactions look the same as missing ones
    if !transaction.involves(user.id) && !user.is_staff {
        return Err(not_found());
    }

    let mut cache = HashMap::new();
    let view = view_for(&state.store, &transaction, user.id, &mut cache).await?;
    Ok(Json(view))
}

// =========================================================================
// GET /accounts/me
// =========================================================================

async fn get_me(request_user: Option<Extension<RequestUser>>) -> AppResult<Json<User>> {
    Ok(Json(require_user(request_user)?))
}

// =========================================================================
// POST|DELETE /sessions
// =========================================================================

async fn login<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Extension(context): Extension<ClientContext>,
    request_user: Option<Extension<RequestUser>>,
) -> AppResult<(StatusCode, Json<AuditLogEntry>)> {
    let user = require_user(request_user)?;
    let record = AuditRecord::new(
        AuditEventType::UserLogin,
        format!("{} logged in", user.display_name),
    )
    .user(user.id);
    let entry = state.audit.record(record, Some(&context)).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn logout<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Extension(context): Extension<ClientContext>,
    request_user: Option<Extension<RequestUser>>,
) -> AppResult<StatusCode> {
    let user = require_user(request_user)?;
    let record = AuditRecord::new(
        AuditEventType::UserLogout,
        format!("{} logged out", user.display_name),
    )
    .user(user.id);
    state.audit.record(record, Some(&context)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// =========================================================================
// GET /audit/logs
// =========================================================================

async fn page_of<S: LedgerStore>(
    state: &AppState<S>,
    query: AuditQuery,
    page: usize,
    page_size: usize,
) -> AppResult<AuditPage> {
    if page == 0 {
        return Err(AppError::InvalidRequest("page starts at 1".to_string()));
    }
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(AppError::InvalidRequest(format!(
            "page_size must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }
    let offset = (page - 1)
        .checked_mul(page_size)
        .ok_or_else(|| AppError::InvalidRequest("page is out of range".to_string()))?;

    // One extra row tells whether another page exists
    let mut results: Vec<AuditLogEntry> = state
        .audit
        .query(query)
        .skip(offset)
        .take(page_size + 1)
        .try_collect()
        .await?;

    let has_more = results.len() > page_size;
    results.truncate(page_size);

    Ok(AuditPage {
        page,
        page_size,
        has_more,
        results,
    })
}

/// Staff may filter freely; everyone else only ever sees their own entries
async fn list_audit_logs<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    request_user: Option<Extension<RequestUser>>,
    Query(params): Query<AuditLogsQuery>,
) -> AppResult<Json<AuditPage>> {
    let user = require_user(request_user)?;

    let mut query = AuditQuery::new();
    if let Some(raw) = params.event_type.as_deref() {
        query = query.event_type(raw.parse().map_err(AppError::InvalidRequest)?);
    }
    if let Some(transaction_id) = params.transaction_id {
        query = query.transaction(transaction_id);
    }
    query = if user.is_staff {
        match params.user_id {
            Some(user_id) => query.user(user_id),
            None => query,
        }
    } else {
        query.user(user.id)
    };

    Ok(Json(page_of(&state, query, params.page, params.page_size).await?))
}

async fn my_audit_logs<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    request_user: Option<Extension<RequestUser>>,
    Query(params): Query<AuditLogsQuery>,
) -> AppResult<Json<AuditPage>> {
    let user = require_user(request_user)?;
    let query = AuditQuery::new().user(user.id);
    Ok(Json(page_of(&state, query, params.page, params.page_size).await?))
}

async fn get_audit_log<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    request_user: Option<Extension<RequestUser>>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<AuditLogEntry>> {
    let user = require_user(request_user)?;
    let entry = state.audit.get(id).await?;

    if !user.is_staff && entry.user_id() != Some(user.id) {
        return Err(AppError::NotFound(format!("audit entry {}", id)));
    }
    Ok(Json(entry))
}

// =========================================================================
// Staff endpoints
// =========================================================================

async fn open_account<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Extension(context): Extension<ClientContext>,
    request_user: Option<Extension<RequestUser>>,
    Json(command): Json<OpenAccountCommand>,
) -> AppResult<(StatusCode, Json<User>)> {
    require_staff(request_user)?;
    let user = state.accounts.execute(command, Some(&context)).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn deposit<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Extension(context): Extension<ClientContext>,
    request_user: Option<Extension<RequestUser>>,
    Json(request): Json<DepositRequest>,
) -> AppResult<(StatusCode, Json<Transaction>)> {
    require_staff(request_user)?;

    let command = DepositCommand {
        recipient_id: request.recipient_id,
        amount: request.amount.map(AmountInput::into_raw).transpose()?,
        description: request.description,
        hold: request.hold,
    };
    let transaction = state.deposits.execute(command, Some(&context)).await?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

async fn settle_deposit<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Extension(context): Extension<ClientContext>,
    request_user: Option<Extension<RequestUser>>,
    Path(reference_id): Path<String>,
) -> AppResult<Json<Transaction>> {
    require_staff(request_user)?;
    Ok(Json(state.deposits.settle(&reference_id, Some(&context)).await?))
}

async fn fail_transaction<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Extension(context): Extension<ClientContext>,
    request_user: Option<Extension<RequestUser>>,
    Path(reference_id): Path<String>,
    Json(request): Json<FailRequest>,
) -> AppResult<Json<Transaction>> {
    require_staff(request_user)?;
    let command = FailTransactionCommand::new(reference_id, request.reason);
    Ok(Json(state.failures.execute(command, Some(&context)).await?))
}

async fn integrity<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    request_user: Option<Extension<RequestUser>>,
    Query(query): Query<IntegrityQuery>,
) -> AppResult<Json<IntegrityReport>> {
    require_staff(request_user)?;
    Ok(Json(verify_transaction_hashes(&state.store, query.limit.max(1)).await?))
}
