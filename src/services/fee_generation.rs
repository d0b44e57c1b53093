use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde_json::{Map, Value};
use sqlx::PgPool;
use tracing::info;

use crate::error::AppError;
use crate::repository::table_service::{insert_rows, list_rows};
use crate::services::fee_status::FeeStatus;
use crate::services::periods::{due_date_string, format_month_reference};

/// Only active members in the paying category are billed.
pub const BILLABLE_MEMBER_STATUS: &str = "Ativo";
pub const BILLABLE_MEMBER_CATEGORY: &str = "Contribuinte";

#[derive(Debug, thiserror::Error)]
pub enum FeeGenerationError {
    #[error("No active monthly fee settings are configured for this club.")]
    NoSettingsConfigured,
    #[error("None of the requested members are eligible for billing.")]
    NoEligibleMembers,
    #[error(transparent)]
    Persistence(#[from] AppError),
}

impl From<FeeGenerationError> for AppError {
    fn from(error: FeeGenerationError) -> Self {
        match error {
            FeeGenerationError::NoSettingsConfigured | FeeGenerationError::NoEligibleMembers => {
                AppError::BadRequest(error.to_string())
            }
            FeeGenerationError::Persistence(inner) => inner,
        }
    }
}

/// Outcome of a generation run. `created == 0` with no error means every
/// eligible member already had a fee for the month; that is reported as
/// success with an informational message, never as a failure.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GenerationSummary {
    pub outcome: GenerationOutcome,
    pub created: u64,
    pub skipped_existing: u64,
    pub skipped_no_setting: u64,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationOutcome {
    Created,
    AlreadyExists,
}

/// Planned insert batch for one (club, reference month) run.
#[derive(Debug, Default)]
pub struct FeePlan {
    pub rows: Vec<Map<String, Value>>,
    pub skipped_existing: u64,
    pub skipped_no_setting: u64,
}

pub async fn generate_monthly_fees(
    pool: &PgPool,
    club_id: &str,
    reference_month: NaiveDate,
    member_ids: Option<&[String]>,
    chunk_size: usize,
) -> Result<GenerationSummary, FeeGenerationError> {
    // An explicitly empty subset must never widen into "the whole club";
    // reject it before any query runs.
    if member_ids.is_some_and(|subset| subset.is_empty()) {
        return Err(FeeGenerationError::NoEligibleMembers);
    }

    let settings = load_active_settings(pool, club_id).await?;
    if settings.is_empty() {
        return Err(FeeGenerationError::NoSettingsConfigured);
    }

    let members = load_eligible_members(pool, club_id, member_ids).await?;
    if member_ids.is_some() && members.is_empty() {
        return Err(FeeGenerationError::NoEligibleMembers);
    }

    let existing = load_existing_fee_member_ids(pool, club_id, reference_month).await?;
    let plan = plan_fee_rows(club_id, reference_month, &settings, &members, &existing);

    let mut created = 0_u64;
    for chunk in plan.rows.chunks(chunk_size.max(1)) {
        // Chunks are independent statements: a failure here leaves the
        // earlier chunks committed. The conflict clause makes a re-run
        // idempotent, so recovery is "trigger the generation again".
        created += insert_rows(
            pool,
            "monthly_fees",
            chunk,
            Some(&["member_id", "reference_month"]),
        )
        .await?;
    }

    let month_label = format_month_reference(reference_month);
    let summary = if created > 0 {
        GenerationSummary {
            outcome: GenerationOutcome::Created,
            created,
            skipped_existing: plan.skipped_existing,
            skipped_no_setting: plan.skipped_no_setting,
            message: format!("Generated {created} fee(s) for {month_label}."),
        }
    } else {
        GenerationSummary {
            outcome: GenerationOutcome::AlreadyExists,
            created: 0,
            skipped_existing: plan.skipped_existing,
            skipped_no_setting: plan.skipped_no_setting,
            message: format!("All eligible members already have a fee for {month_label}."),
        }
    };

    info!(
        club_id,
        month = %month_label,
        created = summary.created,
        skipped_existing = summary.skipped_existing,
        skipped_no_setting = summary.skipped_no_setting,
        "Monthly fee generation finished"
    );

    Ok(summary)
}

/// Pure planning step: one pending fee per eligible member, skipping
/// members whose category has no active setting and members that already
/// have a fee for the month. Both skips are silent by design.
pub fn plan_fee_rows(
    club_id: &str,
    reference_month: NaiveDate,
    settings_by_category: &HashMap<String, Value>,
    members: &[Value],
    existing_member_ids: &HashSet<String>,
) -> FeePlan {
    let mut plan = FeePlan::default();
    let reference_iso = reference_month.format("%Y-%m-%d").to_string();

    for member in members {
        let member_id = value_str(member, "id");
        if member_id.is_empty() {
            continue;
        }

        let category = value_str(member, "category");
        let Some(setting) = settings_by_category.get(&category) else {
            plan.skipped_no_setting += 1;
            continue;
        };

        if existing_member_ids.contains(&member_id) {
            plan.skipped_existing += 1;
            continue;
        }

        let amount = setting
            .as_object()
            .and_then(|object| object.get("amount"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let due_day = setting
            .as_object()
            .and_then(|object| object.get("due_day"))
            .and_then(Value::as_i64)
            .unwrap_or(1) as i32;

        let mut row = Map::new();
        row.insert("club_id".to_string(), Value::String(club_id.to_string()));
        row.insert("member_id".to_string(), Value::String(member_id));
        row.insert(
            "reference_month".to_string(),
            Value::String(reference_iso.clone()),
        );
        row.insert("amount".to_string(), json_number(amount));
        row.insert(
            "due_date".to_string(),
            Value::String(due_date_string(reference_month, due_day)),
        );
        row.insert(
            "status".to_string(),
            Value::String(FeeStatus::Pending.as_str().to_string()),
        );
        plan.rows.push(row);
    }

    plan
}

async fn load_active_settings(
    pool: &PgPool,
    club_id: &str,
) -> Result<HashMap<String, Value>, AppError> {
    let mut filters = Map::new();
    filters.insert("club_id".to_string(), Value::String(club_id.to_string()));
    filters.insert("active".to_string(), Value::Bool(true));

    let rows = list_rows(
        pool,
        "monthly_fee_settings",
        Some(&filters),
        200,
        0,
        "created_at",
        true,
    )
    .await?;

    // One active setting per category is assumed; the earliest-created
    // row wins when the assumption is violated.
    let mut by_category = HashMap::new();
    for setting in rows {
        let category = value_str(&setting, "category");
        if category.is_empty() {
            continue;
        }
        by_category.entry(category).or_insert(setting);
    }
    Ok(by_category)
}

async fn load_eligible_members(
    pool: &PgPool,
    club_id: &str,
    member_ids: Option<&[String]>,
) -> Result<Vec<Value>, AppError> {
    let mut filters = Map::new();
    filters.insert("club_id".to_string(), Value::String(club_id.to_string()));
    filters.insert(
        "status".to_string(),
        Value::String(BILLABLE_MEMBER_STATUS.to_string()),
    );
    filters.insert(
        "category".to_string(),
        Value::String(BILLABLE_MEMBER_CATEGORY.to_string()),
    );
    if let Some(subset) = member_ids {
        filters.insert(
            "id__in".to_string(),
            Value::Array(subset.iter().cloned().map(Value::String).collect()),
        );
    }

    list_rows(pool, "members", Some(&filters), 2000, 0, "name", true).await
}

async fn load_existing_fee_member_ids(
    pool: &PgPool,
    club_id: &str,
    reference_month: NaiveDate,
) -> Result<HashSet<String>, AppError> {
    let mut filters = Map::new();
    filters.insert("club_id".to_string(), Value::String(club_id.to_string()));
    filters.insert(
        "reference_month".to_string(),
        Value::String(reference_month.format("%Y-%m-%d").to_string()),
    );

    let rows = list_rows(
        pool,
        "monthly_fees",
        Some(&filters),
        2000,
        0,
        "created_at",
        true,
    )
    .await?;

    Ok(rows
        .iter()
        .map(|row| value_str(row, "member_id"))
        .filter(|member_id| !member_id.is_empty())
        .collect())
}

fn json_number(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn value_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|object| object.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use chrono::NaiveDate;
    use serde_json::{json, Value};

    use super::plan_fee_rows;

    fn month(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

    fn settings() -> HashMap<String, Value> {
        HashMap::from([(
            "Contribuinte".to_string(),
            json!({ "id": "s1", "category": "Contribuinte", "amount": 150.0, "due_day": 10 }),
        )])
    }

    #[test]
    fn plans_one_pending_row_per_member() {
        let members = vec![
            json!({ "id": "m1", "category": "Contribuinte" }),
            json!({ "id": "m2", "category": "Contribuinte" }),
        ];
        let plan = plan_fee_rows(
            "club-1",
            month(2026, 3),
            &settings(),
            &members,
            &HashSet::new(),
        );

        assert_eq!(plan.rows.len(), 2);
        assert_eq!(plan.skipped_existing, 0);
        assert_eq!(plan.skipped_no_setting, 0);

        let row = &plan.rows[0];
        assert_eq!(row.get("status").unwrap(), "pending");
        assert_eq!(row.get("reference_month").unwrap(), "2026-03-01");
        assert_eq!(row.get("due_date").unwrap(), "2026-03-10");
        assert_eq!(row.get("amount").unwrap(), &json!(150.0));
    }

    #[test]
    fn members_with_existing_fees_are_silently_skipped() {
        let members = vec![
            json!({ "id": "m1", "category": "Contribuinte" }),
            json!({ "id": "m2", "category": "Contribuinte" }),
        ];
        let existing = HashSet::from(["m1".to_string()]);
        let plan = plan_fee_rows("club-1", month(2026, 3), &settings(), &members, &existing);

        assert_eq!(plan.rows.len(), 1);
        assert_eq!(plan.skipped_existing, 1);
        assert_eq!(plan.rows[0].get("member_id").unwrap(), "m2");
    }

    #[test]
    fn second_run_plans_nothing() {
        let members = vec![json!({ "id": "m1", "category": "Contribuinte" })];
        let existing = HashSet::from(["m1".to_string()]);
        let plan = plan_fee_rows("club-1", month(2026, 3), &settings(), &members, &existing);
        assert!(plan.rows.is_empty());
        assert_eq!(plan.skipped_existing, 1);
    }

    #[test]
    fn categories_without_settings_are_skipped_not_errors() {
        let members = vec![
            json!({ "id": "m1", "category": "Contribuinte" }),
            json!({ "id": "m2", "category": "Honorário" }),
        ];
        let plan = plan_fee_rows(
            "club-1",
            month(2026, 3),
            &settings(),
            &members,
            &HashSet::new(),
        );
        assert_eq!(plan.rows.len(), 1);
        assert_eq!(plan.skipped_no_setting, 1);
    }

    #[tokio::test]
    async fn empty_member_subset_is_rejected_before_any_query() {
        // A lazy pool never connects; reaching the database would hang or
        // error instead of producing this variant.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        let error = super::generate_monthly_fees(&pool, "club-1", month(2026, 3), Some(&[]), 200)
            .await
            .unwrap_err();
        assert!(matches!(error, super::FeeGenerationError::NoEligibleMembers));
    }

    #[test]
    fn due_day_past_month_end_passes_through() {
        let settings = HashMap::from([(
            "Contribuinte".to_string(),
            json!({ "category": "Contribuinte", "amount": 80.0, "due_day": 31 }),
        )]);
        let members = vec![json!({ "id": "m1", "category": "Contribuinte" })];
        let plan = plan_fee_rows("club-1", month(2026, 6), &settings, &members, &HashSet::new());
        assert_eq!(plan.rows[0].get("due_date").unwrap(), "2026-06-31");
    }
}
