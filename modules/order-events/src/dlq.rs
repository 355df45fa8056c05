use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

/// A row from `dead_letters` (§9, dead-letter resolution of the `FAILED`
/// open question).
#[derive(Debug, FromRow, serde::Serialize)]
pub struct DeadLetter {
    pub id: i64,
    pub queue: String,
    pub message: serde_json::Value,
    pub error: String,
    pub read_count: i32,
    pub died_at: DateTime<Utc>,
}

pub async fn list(pool: &PgPool, limit: i64) -> sqlx::Result<Vec<DeadLetter>> {
    sqlx::query_as::<_, DeadLetter>(
        "SELECT * FROM dead_letters ORDER BY died_at DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn find(pool: &PgPool, id: i64) -> sqlx::Result<Option<DeadLetter>> {
    sqlx::query_as::<_, DeadLetter>("SELECT * FROM dead_letters WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Requeue a dead-lettered message onto its original queue with a fresh
/// `read_count`, and remove the dead-letter row. Used by the
/// `dlq_replay_drill` operator tool — never called from the request path.
pub async fn replay(pool: &PgPool, id: i64) -> sqlx::Result<bool> {
    let Some(entry) = find(pool, id).await? else {
        return Ok(false);
    };

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO queue_messages (queue, message, visible_at, read_count)
        VALUES ($1, $2, now(), 0)
        "#,
    )
    .bind(&entry.queue)
    .bind(&entry.message)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM dead_letters WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(id, queue = %entry.queue, "dead letter replayed to queue");

    Ok(true)
}
