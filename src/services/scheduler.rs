use std::time::Duration;

use chrono::{Datelike, NaiveDate, Timelike, Utc};
use serde_json::{Map, Value};
use sqlx::PgPool;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::repository::table_service::{list_rows, update_row};
use crate::services::fee_status::FeeStatus;
use crate::state::AppState;

/// Result of one overdue reconciliation sweep.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OverdueSweepResult {
    pub marked_late: u32,
    pub errors: u32,
}

/// Background scheduler for periodic jobs. Currently a single daily job:
/// the overdue-fee sweep that persists pending→late once the due date has
/// passed, replacing the old patch-on-read behavior. Each run happens in
/// its own task so a failure never takes the loop down.
pub async fn run_background_scheduler(state: AppState) {
    let Some(pool) = state.db_pool.clone() else {
        warn!("Scheduler: no database pool configured, exiting");
        return;
    };

    info!("Background scheduler started");

    let tick = Duration::from_secs(state.config.scheduler_tick_seconds.max(15));
    let sweep_hour = state.config.overdue_sweep_hour_utc.min(23);
    let mut last_sweep_day: Option<u32> = None;

    loop {
        sleep(tick).await;

        let now_utc = Utc::now();
        let today = now_utc.date_naive();

        if last_sweep_day == Some(today.ordinal()) {
            continue;
        }
        if now_utc.hour() < sweep_hour {
            continue;
        }

        last_sweep_day = Some(today.ordinal());
        let pool = pool.clone();
        tokio::spawn(async move {
            let result = run_overdue_sweep(&pool, today).await;
            info!(
                marked_late = result.marked_late,
                errors = result.errors,
                "Scheduler: overdue fee sweep completed"
            );
        });
    }
}

const SWEEP_PAGE_SIZE: i64 = 2000;

/// Persist `late` for every pending fee whose due date is strictly before
/// `today`. Per-row failures are logged and counted; the sweep continues.
/// Fees are fetched a page at a time until none remain: marked rows drop
/// out of the pending filter, so each pass refetches from offset zero.
pub async fn run_overdue_sweep(pool: &PgPool, today: NaiveDate) -> OverdueSweepResult {
    let mut result = OverdueSweepResult {
        marked_late: 0,
        errors: 0,
    };

    let mut filters = Map::new();
    filters.insert(
        "status".to_string(),
        Value::String(FeeStatus::Pending.as_str().to_string()),
    );
    filters.insert(
        "due_date__lt".to_string(),
        Value::String(today.format("%Y-%m-%d").to_string()),
    );

    loop {
        let fees = match list_rows(
            pool,
            "monthly_fees",
            Some(&filters),
            SWEEP_PAGE_SIZE,
            0,
            "due_date",
            true,
        )
        .await
        {
            Ok(rows) => rows,
            Err(error) => {
                warn!("Overdue sweep could not list pending fees: {error}");
                result.errors += 1;
                return result;
            }
        };
        if fees.is_empty() {
            return result;
        }

        let mut marked_this_pass: u32 = 0;
        for fee in &fees {
            let fee_id = fee
                .as_object()
                .and_then(|object| object.get("id"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if fee_id.is_empty() {
                continue;
            }

            let mut patch = Map::new();
            patch.insert(
                "status".to_string(),
                Value::String(FeeStatus::Late.as_str().to_string()),
            );
            match update_row(pool, "monthly_fees", &fee_id, &patch, "id").await {
                Ok(_) => marked_this_pass += 1,
                Err(error) => {
                    warn!("Overdue sweep failed to mark fee {fee_id} late: {error}");
                    result.errors += 1;
                }
            }
        }

        result.marked_late += marked_this_pass;
        if !sweep_continues(fees.len(), marked_this_pass) {
            return result;
        }
    }
}

/// Another pass is worthwhile only after a full page where at least one
/// row actually moved; a full page of failed updates would otherwise be
/// refetched forever.
fn sweep_continues(fetched: usize, marked_this_pass: u32) -> bool {
    fetched >= SWEEP_PAGE_SIZE as usize && marked_this_pass > 0
}

#[cfg(test)]
mod tests {
    use super::sweep_continues;

    #[test]
    fn sweep_stops_on_short_pages_and_stalled_passes() {
        assert!(sweep_continues(2000, 5));
        // A short page means the pending set is exhausted.
        assert!(!sweep_continues(1999, 5));
        // A full page where every update failed must not loop forever.
        assert!(!sweep_continues(2000, 0));
    }
}
