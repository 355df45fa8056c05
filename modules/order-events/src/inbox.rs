use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};

/// Postgres error code for a unique constraint violation.
const UNIQUE_VIOLATION: &str = "23505";

/// Insert an event into the inbox, within the caller's transaction (§4.2).
///
/// Returns `Ok(Some(id))` on a fresh insert, `Ok(None)` if `dedupe_key`
/// already exists — the unique constraint on `event_inbox.dedupe_key` is the
/// sole deduplication mechanism, not an application-level existence check,
/// so a concurrent duplicate can never slip through a check-then-insert race.
pub async fn insert_event(
    tx: &mut Transaction<'_, Postgres>,
    dedupe_key: &str,
    source: &str,
    order_id: &str,
    event_type: &str,
    event_ts: DateTime<Utc>,
    payload: &serde_json::Value,
) -> sqlx::Result<Option<i64>> {
    let result = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO event_inbox (dedupe_key, source, order_id, event_type, event_ts, payload)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id
        "#,
    )
    .bind(dedupe_key)
    .bind(source)
    .bind(order_id)
    .bind(event_type)
    .bind(event_ts)
    .bind(payload)
    .fetch_one(&mut **tx)
    .await;

    match result {
        Ok(id) => Ok(Some(id)),
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            tracing::debug!(dedupe_key, "duplicate event ignored at inbox insert");
            Ok(None)
        }
        Err(other) => Err(other),
    }
}

/// Mark an inbox row as processed (or any other terminal status), within the
/// caller's transaction so it commits atomically with the business effect.
pub async fn mark_status(
    tx: &mut Transaction<'_, Postgres>,
    id: i64,
    status: &str,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE event_inbox
        SET status = $1, processed_at = now(), updated_at = now()
        WHERE id = $2
        "#,
    )
    .bind(status)
    .bind(id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
