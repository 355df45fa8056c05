use sqlx::{Postgres, Transaction};

/// Take a transaction-scoped advisory lock keyed by `order_id` (§4.3, §5).
///
/// Every write to a given order's rows — whether applying an ingress event
/// or recording the result of an outbound dispatch — takes this lock first,
/// so two concurrent writers for the same order serialize instead of racing.
/// The lock releases automatically when the transaction commits or rolls
/// back; there is no unlock call.
pub async fn advisory_lock(tx: &mut Transaction<'_, Postgres>, order_id: &str) -> sqlx::Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(order_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}
