use chrono::NaiveDate;
use serde_json::Value;

/// Fee lifecycle status. `PaidLate` is derived for display only; the
/// store's check constraint only accepts the other four values and the
/// persisted status of a late payment stays `paid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeStatus {
    Pending,
    Late,
    Paid,
    PaidLate,
    Cancelled,
}

impl FeeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Late => "late",
            Self::Paid => "paid",
            Self::PaidLate => "paid_late",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a persisted status value. `paid_late` is accepted defensively
    /// even though it should never appear in the store.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "pending" => Some(Self::Pending),
            "late" => Some(Self::Late),
            "paid" => Some(Self::Paid),
            "paid_late" => Some(Self::PaidLate),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_storable(self) -> bool {
        !matches!(self, Self::PaidLate)
    }
}

/// Derive the display status of a fee from its stored fields. Pure; must
/// be re-run on every read because `late`/`paid_late` are never written
/// transactionally with the read. The pending→late persistence happens in
/// the daily scheduler sweep, never here.
pub fn effective_status(
    stored: FeeStatus,
    due_date: Option<NaiveDate>,
    payment_date: Option<NaiveDate>,
    today: NaiveDate,
) -> FeeStatus {
    match stored {
        FeeStatus::Pending => match due_date {
            Some(due) if due < today => FeeStatus::Late,
            _ => FeeStatus::Pending,
        },
        FeeStatus::Paid => match (due_date, payment_date) {
            (Some(due), Some(paid)) if paid > due => FeeStatus::PaidLate,
            _ => FeeStatus::Paid,
        },
        other => other,
    }
}

/// Attach a `display_status` field to raw fee rows. The stored `status`
/// field is left untouched.
pub fn decorate_fee_rows(rows: &mut [Value], today: NaiveDate) {
    for row in rows.iter_mut() {
        let Some(object) = row.as_object_mut() else {
            continue;
        };
        let Some(stored) = object
            .get("status")
            .and_then(Value::as_str)
            .and_then(FeeStatus::parse)
        else {
            continue;
        };
        let due_date = field_date(object.get("due_date"));
        let payment_date = field_date(object.get("payment_date"));
        let display = effective_status(stored, due_date, payment_date, today);
        object.insert(
            "display_status".to_string(),
            Value::String(display.as_str().to_string()),
        );
    }
}

fn field_date(value: Option<&Value>) -> Option<NaiveDate> {
    value
        .and_then(Value::as_str)
        .and_then(|raw| NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::{decorate_fee_rows, effective_status, FeeStatus};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn pending_past_due_reports_late() {
        let today = date(2026, 3, 15);
        assert_eq!(
            effective_status(FeeStatus::Pending, Some(date(2026, 3, 14)), None, today),
            FeeStatus::Late
        );
        // Due today is not late yet (strictly-before comparison).
        assert_eq!(
            effective_status(FeeStatus::Pending, Some(date(2026, 3, 15)), None, today),
            FeeStatus::Pending
        );
        assert_eq!(
            effective_status(FeeStatus::Pending, None, None, today),
            FeeStatus::Pending
        );
    }

    #[test]
    fn paid_after_due_reports_paid_late() {
        let today = date(2026, 4, 1);
        assert_eq!(
            effective_status(
                FeeStatus::Paid,
                Some(date(2026, 3, 10)),
                Some(date(2026, 3, 12)),
                today
            ),
            FeeStatus::PaidLate
        );
        // Paid on the due date is on time.
        assert_eq!(
            effective_status(
                FeeStatus::Paid,
                Some(date(2026, 3, 10)),
                Some(date(2026, 3, 10)),
                today
            ),
            FeeStatus::Paid
        );
    }

    #[test]
    fn cancelled_and_late_pass_through() {
        let today = date(2026, 4, 1);
        assert_eq!(
            effective_status(FeeStatus::Cancelled, Some(date(2026, 1, 1)), None, today),
            FeeStatus::Cancelled
        );
        assert_eq!(
            effective_status(FeeStatus::Late, Some(date(2026, 1, 1)), None, today),
            FeeStatus::Late
        );
    }

    #[test]
    fn paid_late_is_display_only() {
        assert!(!FeeStatus::PaidLate.is_storable());
        assert!(FeeStatus::Paid.is_storable());
    }

    #[test]
    fn decorates_rows_without_touching_stored_status() {
        let mut rows = vec![json!({
            "id": "f1",
            "status": "paid",
            "due_date": "2026-03-10",
            "payment_date": "2026-03-20"
        })];
        decorate_fee_rows(&mut rows, date(2026, 4, 1));
        let row = rows[0].as_object().unwrap();
        assert_eq!(row.get("status").unwrap(), "paid");
        assert_eq!(row.get("display_status").unwrap(), "paid_late");
    }
}
