use serde::Deserialize;
use validator::Validate;

use crate::error::AppError;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

pub fn serialize_to_map<T>(value: &T) -> serde_json::Map<String, serde_json::Value>
where
    T: serde::Serialize,
{
    let json = serde_json::to_value(value)
        .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
    json.as_object().cloned().unwrap_or_default()
}

pub fn remove_nulls(
    mut map: serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    map.retain(|_, value| !value.is_null());
    map
}

pub fn clamp_limit_in_range(limit: i64, minimum: i64, maximum: i64) -> i64 {
    limit.clamp(minimum, maximum)
}

fn default_limit_100() -> i64 {
    100
}
fn default_limit_200() -> i64 {
    200
}
fn default_limit_400() -> i64 {
    400
}
fn default_ranking_limit() -> i64 {
    20
}
fn default_true() -> bool {
    true
}
fn default_member_status_ativo() -> String {
    "Ativo".to_string()
}

// ---------------------------------------------------------------------------
// Path params

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct FeePath {
    pub fee_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct FeeSettingPath {
    pub setting_id: String,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct MemberPath {
    pub member_id: String,
}

// ---------------------------------------------------------------------------
// Monthly fees

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct MonthlyFeesQuery {
    pub club_id: String,
    pub status: Option<String>,
    pub member_id: Option<String>,
    /// "YYYY-MM" or first-of-month "YYYY-MM-DD".
    pub reference_month: Option<String>,
    #[serde(default = "default_limit_400")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct GenerateFeesInput {
    pub club_id: String,
    /// "YYYY-MM" or first-of-month "YYYY-MM-DD".
    #[validate(length(min = 7, max = 10))]
    pub reference_month: String,
    /// Explicit member subset; omitted means every eligible member. An
    /// empty list is rejected rather than treated as "everyone".
    #[validate(length(min = 1))]
    pub member_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct RecordFeePaymentInput {
    /// Defaults to today when omitted.
    pub payment_date: Option<String>,
    pub payment_method: String,
    pub bank_account_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Fee settings

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct FeeSettingsQuery {
    pub club_id: String,
    pub active: Option<bool>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct CreateFeeSettingInput {
    pub club_id: String,
    #[validate(length(min = 1, max = 120))]
    pub category: String,
    #[validate(range(min = 0.0))]
    pub amount: f64,
    #[validate(range(min = 1, max = 31))]
    pub due_day: i32,
    #[serde(default = "default_true")]
    pub active: bool,
    pub chart_of_account_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct UpdateFeeSettingInput {
    pub category: Option<String>,
    pub amount: Option<f64>,
    pub due_day: Option<i32>,
    pub active: Option<bool>,
    pub chart_of_account_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Members / scoring

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct MembersQuery {
    pub club_id: String,
    #[serde(default = "default_member_status_ativo")]
    pub status: String,
    pub category: Option<String>,
    #[serde(default = "default_limit_200")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct MemberScoreQuery {
    pub club_id: String,
    /// Defaults to the current year.
    pub year: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct MemberRankingQuery {
    pub club_id: String,
    pub year: Option<i32>,
    #[serde(default = "default_ranking_limit")]
    pub limit: i64,
}

// ---------------------------------------------------------------------------
// Reports

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct FinancialStatementQuery {
    pub club_id: String,
    pub year: i32,
    /// 1-12; omitted means the whole year.
    pub month: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct FeeSummaryQuery {
    pub club_id: String,
    /// "YYYY-MM" or first-of-month "YYYY-MM-DD".
    pub reference_month: String,
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{
        remove_nulls, serialize_to_map, validate_input, GenerateFeesInput, RecordFeePaymentInput,
    };

    #[test]
    fn serializes_inputs_to_sparse_maps() {
        let input = RecordFeePaymentInput {
            payment_date: None,
            payment_method: "pix".to_string(),
            bank_account_id: None,
        };
        let map = remove_nulls(serialize_to_map(&input));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("payment_method"), Some(&json!("pix")));
        assert!(!map.contains_key("bank_account_id"));
        let _ = Value::Object(map);
    }

    #[test]
    fn rejects_empty_member_subsets() {
        let mut input = GenerateFeesInput {
            club_id: "c1".to_string(),
            reference_month: "2026-03".to_string(),
            member_ids: Some(Vec::new()),
        };
        assert!(validate_input(&input).is_err());

        input.member_ids = Some(vec!["m1".to_string()]);
        assert!(validate_input(&input).is_ok());

        input.member_ids = None;
        assert!(validate_input(&input).is_ok());
    }
}
