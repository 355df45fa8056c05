use chrono::Duration as ChronoDuration;
use reqwest::Client;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::models::OutboundMessage;
use crate::queue::{self, ClaimedMessage};
use crate::Result;

const OUTBOUND_QUEUE: &str = "shopify_outbound";
const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_MAX_WAIT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Token bucket rate limiter for outbound requests (§4.6, §5): capacity 2,
/// refilling at 2 tokens/sec. Shared across every dispatcher worker via a
/// single mutex-guarded bucket, so the rate limit is global to the process
/// rather than per-worker.
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Try to take one token. Returns the wait time until a token will be
    /// available if none is free right now.
    fn try_take(&mut self) -> std::result::Result<(), Duration> {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - self.tokens;
            Err(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    bucket: Arc<Mutex<TokenBucket>>,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_per_sec: u32) -> Self {
        Self {
            bucket: Arc::new(Mutex::new(TokenBucket::new(
                capacity as f64,
                refill_per_sec as f64,
            ))),
        }
    }

    async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                match bucket.try_take() {
                    Ok(()) => return,
                    Err(wait) => wait,
                }
            };
            tokio::time::sleep(wait).await;
        }
    }
}

/// Drives one outbound-dispatcher worker (§4.6). Claims `shopify_outbound`
/// messages, rate-limits with [`RateLimiter`], and POSTs the change to the
/// configured upstream base URL.
///
/// On `shutdown`, stops claiming new messages but finishes a message already
/// in flight (§5).
pub async fn run(
    pool: PgPool,
    client: Client,
    upstream_base_url: String,
    limiter: RateLimiter,
    worker_id: usize,
    max_read_count: i32,
    shutdown: CancellationToken,
) {
    tracing::info!(worker_id, "outbound dispatcher worker starting");

    loop {
        let claimed = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                tracing::info!(worker_id, "outbound dispatcher worker shutting down");
                return;
            }
            result = queue::read_with_poll(&pool, OUTBOUND_QUEUE, VISIBILITY_TIMEOUT, POLL_MAX_WAIT) => result,
        };

        match claimed {
            Ok(Some(msg)) => {
                limiter.acquire().await;

                if let Err(err) =
                    dispatch_one(&pool, &client, &upstream_base_url, &msg, max_read_count).await
                {
                    tracing::error!(worker_id, queue_msg_id = msg.id, error = %err, "outbound dispatch failed");
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::error!(worker_id, error = %err, "outbound dispatcher poll failed, backing off");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn dispatch_one(
    pool: &PgPool,
    client: &Client,
    upstream_base_url: &str,
    msg: &ClaimedMessage,
    max_read_count: i32,
) -> Result<()> {
    let outbound: OutboundMessage = match serde_json::from_value(msg.message.clone()) {
        Ok(m) => m,
        Err(e) => {
            queue::move_to_dead_letter(pool, OUTBOUND_QUEUE, msg, &format!("malformed message: {e}"))
                .await?;
            return Ok(());
        }
    };

    let url = format!("{upstream_base_url}/admin/orders/{}", outbound.order_id);

    let response = client
        .post(&url)
        .timeout(REQUEST_TIMEOUT)
        .json(&outbound)
        .send()
        .await;

    match response {
        Ok(resp) if resp.status().is_success() => {
            queue::delete(pool, msg.id).await?;
        }
        Ok(resp) if resp.status().as_u16() == 429 => {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(1);

            if msg.read_count >= max_read_count {
                queue::move_to_dead_letter(pool, OUTBOUND_QUEUE, msg, "rate limited, retries exhausted")
                    .await?;
            } else {
                requeue_with_delay(pool, msg, &outbound, retry_after).await?;
            }
        }
        Ok(resp) => {
            let status = resp.status();
            tracing::warn!(order_id = %outbound.order_id, %status, "upstream rejected outbound update, dropping");
            queue::delete(pool, msg.id).await?;
        }
        Err(err) => {
            tracing::warn!(order_id = %outbound.order_id, error = %err, "outbound request failed");

            if msg.read_count >= max_read_count {
                queue::move_to_dead_letter(pool, OUTBOUND_QUEUE, msg, &err.to_string()).await?;
            }
            // Otherwise leave the message in place — its visibility timeout
            // already advanced at claim time, so it's retried naturally.
        }
    }

    Ok(())
}

async fn requeue_with_delay(
    pool: &PgPool,
    msg: &ClaimedMessage,
    outbound: &OutboundMessage,
    retry_after_secs: i64,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    queue::delete_tx(&mut tx, msg.id).await?;
    queue::enqueue_delayed_tx(
        &mut tx,
        OUTBOUND_QUEUE,
        outbound,
        ChronoDuration::seconds(retry_after_secs),
    )
    .await?;
    tx.commit().await?;
    Ok(())
}
