//! Common test utilities
#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, Response};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use std::sync::OnceLock;

use audit_flow::domain::{Balance, NewUser, User};
use audit_flow::store::{LedgerStore, LedgerTx, PgLedgerStore};

/// Insert a user with an exact balance
pub async fn seed_user<S: LedgerStore>(store: &S, name: &str, balance: Decimal) -> User {
    let email = format!("{}-{}@example.com", name.to_lowercase(), uuid::Uuid::new_v4());
    let mut tx = store.begin().await.expect("begin");
    let user = tx
        .insert_user(&NewUser::new(email, name, Balance::new(balance).expect("valid balance")))
        .await
        .expect("insert user");
    tx.commit().await.expect("commit");
    user
}

pub async fn seed_staff<S: LedgerStore>(store: &S, name: &str) -> User {
    let email = format!("{}-{}@example.com", name.to_lowercase(), uuid::Uuid::new_v4());
    let mut tx = store.begin().await.expect("begin");
    let user = tx
        .insert_user(&NewUser::new(email, name, Balance::zero()).staff(true))
        .await
        .expect("insert staff");
    tx.commit().await.expect("commit");
    user
}

pub async fn balance_of<S: LedgerStore>(store: &S, user: &User) -> Decimal {
    store
        .find_user(user.id)
        .await
        .expect("find user")
        .expect("user exists")
        .balance
        .value()
}

/// PostgreSQL store for tests, or `None` when `DATABASE_URL` is not set.
///
/// Tables are never truncated (audit rows cannot be deleted), so tests only
/// look at rows belonging to users they created.
pub async fn pg_store() -> Option<PgLedgerStore> {
    dotenvy::dotenv().ok();
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) if !url.trim().is_empty() => url,
        _ => {
            eprintln!("DATABASE_URL not set, skipping PostgreSQL test");
            return None;
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    // Tests in one binary run in parallel; only the first applies the DDL
    static SCHEMA_APPLIED: OnceLock<tokio::sync::Mutex<bool>> = OnceLock::new();
    let mut applied = SCHEMA_APPLIED
        .get_or_init(|| tokio::sync::Mutex::new(false))
        .lock()
        .await;
    if !*applied {
        audit_flow::db::apply_schema(&pool).await.expect("Failed to apply schema");
        *applied = true;
    }
    drop(applied);

    Some(PgLedgerStore::new(pool))
}

pub fn json_request(method: &str, uri: &str, user: Option<&User>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("user-agent", "integration-test")
        .header("x-forwarded-for", "203.0.113.77");
    if let Some(user) = user {
        builder = builder.header("X-Request-User-Id", user.id.to_string());
    }
    builder.body(Body::from(body.to_string())).expect("request")
}

pub fn get_request(uri: &str, user: Option<&User>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(user) = user {
        builder = builder.header("X-Request-User-Id", user.id.to_string());
    }
    builder.body(Body::empty()).expect("request")
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}
