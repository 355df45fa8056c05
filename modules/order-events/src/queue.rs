use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::time::Duration;

/// A claimed row from `queue_messages` (§4.3).
#[derive(Debug, FromRow)]
pub struct ClaimedMessage {
    pub id: i64,
    pub message: serde_json::Value,
    pub read_count: i32,
}

/// Enqueue a message for immediate visibility, within a transaction so it
/// commits atomically with whatever business write produced it.
pub async fn enqueue_tx<T: Serialize>(
    tx: &mut Transaction<'_, Postgres>,
    queue: &str,
    message: &T,
) -> sqlx::Result<()> {
    enqueue_delayed_tx(tx, queue, message, ChronoDuration::zero()).await
}

/// Enqueue a message that only becomes visible after `delay` (§4.3, §4.6
/// rate-limit backoff and Retry-After handling).
pub async fn enqueue_delayed_tx<T: Serialize>(
    tx: &mut Transaction<'_, Postgres>,
    queue: &str,
    message: &T,
    delay: ChronoDuration,
) -> sqlx::Result<()> {
    let payload = serde_json::to_value(message).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    let visible_at = Utc::now() + delay;

    sqlx::query(
        r#"
        INSERT INTO queue_messages (queue, message, visible_at)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(queue)
    .bind(payload)
    .bind(visible_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Claim one visible message from `queue`, skipping rows already locked by
/// another worker (§4.3). Bumps `read_count` as part of the claim so a
/// crashed worker's in-flight message is still counted toward the
/// dead-letter threshold once it becomes visible again.
pub async fn claim(pool: &PgPool, queue: &str, visibility_timeout: Duration) -> sqlx::Result<Option<ClaimedMessage>> {
    let mut tx = pool.begin().await?;

    let row: Option<ClaimedMessage> = sqlx::query_as(
        r#"
        SELECT id, message, read_count
        FROM queue_messages
        WHERE queue = $1 AND visible_at <= now()
        ORDER BY id
        FOR UPDATE SKIP LOCKED
        LIMIT 1
        "#,
    )
    .bind(queue)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(row) = row else {
        tx.commit().await?;
        return Ok(None);
    };

    let new_visible_at: DateTime<Utc> = Utc::now() + ChronoDuration::from_std(visibility_timeout).unwrap_or(ChronoDuration::seconds(30));

    sqlx::query(
        r#"
        UPDATE queue_messages
        SET visible_at = $1, read_count = read_count + 1
        WHERE id = $2
        "#,
    )
    .bind(new_visible_at)
    .bind(row.id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Some(ClaimedMessage {
        id: row.id,
        message: row.message,
        read_count: row.read_count + 1,
    }))
}

/// Poll `claim` with a short backoff until a message appears or `max_wait`
/// elapses, so a consumer worker isn't pinned to a tight busy loop.
pub async fn read_with_poll(
    pool: &PgPool,
    queue: &str,
    visibility_timeout: Duration,
    max_wait: Duration,
) -> sqlx::Result<Option<ClaimedMessage>> {
    let deadline = tokio::time::Instant::now() + max_wait;
    let mut backoff = Duration::from_millis(50);

    loop {
        if let Some(msg) = claim(pool, queue, visibility_timeout).await? {
            return Ok(Some(msg));
        }

        if tokio::time::Instant::now() >= deadline {
            return Ok(None);
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(Duration::from_millis(500));
    }
}

/// Delete a message, within a transaction so removal commits atomically with
/// the business effect it triggered.
pub async fn delete_tx(tx: &mut Transaction<'_, Postgres>, id: i64) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM queue_messages WHERE id = $1")
        .bind(id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub async fn delete(pool: &PgPool, id: i64) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM queue_messages WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Move an exhausted message to `dead_letters` and remove it from the queue
/// (§9, dead-letter resolution of the `FAILED` open question).
pub async fn move_to_dead_letter(
    pool: &PgPool,
    queue: &str,
    msg: &ClaimedMessage,
    error: &str,
) -> sqlx::Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO dead_letters (queue, message, error, read_count)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(queue)
    .bind(&msg.message)
    .bind(error)
    .bind(msg.read_count)
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM queue_messages WHERE id = $1")
        .bind(msg.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::warn!(queue, msg.id, error, "message dead-lettered after exhausting read attempts");

    Ok(())
}
