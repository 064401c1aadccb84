//! Database module
//!
//! Connection checks and schema verification for the PostgreSQL backend.
//! The schema itself lives in `sql/schema.sql`.

use sqlx::PgPool;

/// DDL for the ledger tables and their immutability triggers
pub const SCHEMA_SQL: &str = include_str!("../sql/schema.sql");

const REQUIRED_TABLES: [&str; 3] = ["users", "transactions", "audit_logs"];

const REQUIRED_TRIGGERS: [(&str, &str); 2] = [
    ("audit_logs", "audit_logs_immutable"),
    ("transactions", "transactions_terminal_status"),
];

/// Verify database connectivity
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply `sql/schema.sql`. Every statement is idempotent.
pub async fn apply_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    use sqlx::Executor;

    // Unparameterised, so this goes over the simple query protocol and may
    // contain several statements.
    pool.execute(SCHEMA_SQL).await?;
    Ok(())
}

/// Check if required tables and guard triggers exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = current_schema() AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!("Required table '{}' does not exist", table);
            return Ok(false);
        }
    }

    for (table, trigger) in REQUIRED_TRIGGERS {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM pg_trigger t
                JOIN pg_class c ON c.oid = t.tgrelid
                WHERE c.relname = $1 AND t.tgname = $2 AND NOT t.tgisinternal
            )
            "#,
        )
        .bind(table)
        .bind(trigger)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!(
                "Required trigger '{}' on '{}' does not exist. Apply sql/schema.sql.",
                trigger,
                table
            );
            return Ok(false);
        }
    }

    tracing::info!("Ledger schema verified");
    Ok(true)
}
