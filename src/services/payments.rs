use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::repository::table_service::{delete_row, get_row, update_row};
use crate::schemas::RecordFeePaymentInput;
use crate::services::fee_status::FeeStatus;
use crate::services::periods::parse_date;

pub const PAYMENT_METHODS: &[&str] = &["pix", "cash", "transfer", "credit_card", "debit_card"];

/// Record a payment against a fee: payment date/method/account plus
/// status `paid`, unconditionally. Whether the payment was late is not
/// decided here — the classifier derives `paid_late` on read by comparing
/// the stored payment date against the due date.
pub async fn record_fee_payment(
    pool: &PgPool,
    fee_id: &str,
    input: &RecordFeePaymentInput,
) -> AppResult<Value> {
    let method = input.payment_method.trim();
    if !PAYMENT_METHODS.contains(&method) {
        return Err(AppError::BadRequest(format!(
            "Unknown payment method '{method}'."
        )));
    }

    let payment_date = match input.payment_date.as_deref() {
        Some(raw) => parse_date(raw)?.format("%Y-%m-%d").to_string(),
        None => Utc::now().date_naive().format("%Y-%m-%d").to_string(),
    };

    let mut patch = Map::new();
    patch.insert(
        "status".to_string(),
        Value::String(FeeStatus::Paid.as_str().to_string()),
    );
    patch.insert("payment_date".to_string(), Value::String(payment_date));
    patch.insert(
        "payment_method".to_string(),
        Value::String(method.to_string()),
    );
    if let Some(bank_account_id) = input
        .bank_account_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        patch.insert(
            "bank_account_id".to_string(),
            Value::String(bank_account_id.to_string()),
        );
    }

    update_row(pool, "monthly_fees", fee_id, &patch, "id").await
}

/// Cancel a fee. The transition is unguarded: a paid fee can be cancelled
/// too, matching the historical billing behavior (see DESIGN.md).
pub async fn cancel_fee(pool: &PgPool, fee_id: &str) -> AppResult<Value> {
    let mut patch = Map::new();
    patch.insert(
        "status".to_string(),
        Value::String(FeeStatus::Cancelled.as_str().to_string()),
    );
    update_row(pool, "monthly_fees", fee_id, &patch, "id").await
}

/// Delete a fee. Blocked only when the fee is paid AND carries a linked
/// ledger transaction; a paid fee without a transaction link is deletable.
/// The asymmetry is intentional and kept.
pub async fn delete_fee(pool: &PgPool, fee_id: &str) -> AppResult<Value> {
    let fee = get_row(pool, "monthly_fees", fee_id, "id").await?;

    let status = fee
        .as_object()
        .and_then(|object| object.get("status"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let transaction_id = fee
        .as_object()
        .and_then(|object| object.get("transaction_id"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty());

    if deletion_blocked(status, transaction_id) {
        return Err(AppError::Conflict(
            "Cannot delete a paid fee with a linked transaction.".to_string(),
        ));
    }

    delete_row(pool, "monthly_fees", fee_id, "id").await
}

fn deletion_blocked(status: &str, transaction_id: Option<&str>) -> bool {
    status == FeeStatus::Paid.as_str() && transaction_id.is_some()
}

#[cfg(test)]
mod tests {
    use super::deletion_blocked;

    #[test]
    fn blocks_paid_fees_with_linked_transactions() {
        assert!(deletion_blocked("paid", Some("tx-1")));
    }

    #[test]
    fn paid_without_transaction_is_deletable() {
        assert!(!deletion_blocked("paid", None));
        assert!(!deletion_blocked("pending", Some("tx-1")));
        assert!(!deletion_blocked("late", None));
        assert!(!deletion_blocked("cancelled", Some("tx-1")));
    }
}
