use std::collections::HashSet;

use chrono::{Datelike, NaiveDate, Utc};
use serde_json::{Map, Value};
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::repository::table_service::{get_row, list_rows};
use crate::services::periods::{elapsed_whole_months, elapsed_whole_years};

pub const COMPLETED_GAME_STATUS: &str = "completed";
pub const CONFIRMED_PARTICIPATION_STATUS: &str = "confirmed";

/// Ranking inputs and the combined score for one member. Display-only: it
/// feeds no billing or access-control decision.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct MemberScore {
    pub member_id: String,
    pub score: f64,
    pub participation_rate: f64,
    pub games_confirmed: u64,
    pub games_completed: u64,
    pub membership_months: i64,
    pub age_years: i32,
}

/// Confirmed participations over completed games, as a percentage rounded
/// to 1 decimal. Zero completed games yields 0, not NaN.
pub fn participation_rate(confirmed: u64, completed: u64) -> f64 {
    if completed == 0 {
        return 0.0;
    }
    round1(confirmed as f64 / completed as f64 * 100.0)
}

/// The canonical ranking formula. Each component is scaled to an integer
/// before the final division so repeated runs are bit-for-bit stable:
/// participation ×1000, tenure years ×100, age ×1, all over 1000.
pub fn ranking_score(participation_rate: f64, membership_years: f64, age_years: i32) -> f64 {
    let scaled = (participation_rate * 1000.0).round()
        + (membership_years * 100.0).round()
        + f64::from(age_years);
    round2(scaled / 1000.0)
}

pub fn score_from_parts(
    member_id: &str,
    confirmed: u64,
    completed: u64,
    registration_date: Option<NaiveDate>,
    birth_date: Option<NaiveDate>,
    today: NaiveDate,
) -> MemberScore {
    let rate = participation_rate(confirmed, completed);
    let membership_months = registration_date
        .map(|registered| elapsed_whole_months(registered, today))
        .unwrap_or(0);
    let membership_years = membership_months as f64 / 12.0;
    let age_years = birth_date
        .map(|born| elapsed_whole_years(born, today))
        .unwrap_or(0);

    MemberScore {
        member_id: member_id.to_string(),
        score: ranking_score(rate, membership_years, age_years),
        participation_rate: rate,
        games_confirmed: confirmed,
        games_completed: completed,
        membership_months,
        age_years,
    }
}

/// Compute one member's score over a calendar-year window of completed
/// games (defaults to the current year at the call sites).
pub async fn compute_member_score(
    pool: &PgPool,
    club_id: &str,
    member_id: &str,
    year: i32,
) -> AppResult<MemberScore> {
    let member = get_row(pool, "members", member_id, "id").await?;
    if value_str(&member, "club_id") != club_id {
        return Err(AppError::NotFound("members record not found.".to_string()));
    }

    let completed_game_ids = load_completed_game_ids(pool, club_id, year).await?;
    let confirmed = count_confirmed_participations(pool, member_id, &completed_game_ids).await?;

    let today = Utc::now().date_naive();
    Ok(score_from_parts(
        member_id,
        confirmed,
        completed_game_ids.len() as u64,
        field_date(&member, "registration_date"),
        field_date(&member, "birth_date"),
        today,
    ))
}

/// Score every active member of a club and return them ranked best-first.
pub async fn compute_club_ranking(
    pool: &PgPool,
    club_id: &str,
    year: i32,
    limit: usize,
) -> AppResult<Vec<MemberScore>> {
    let mut filters = Map::new();
    filters.insert("club_id".to_string(), Value::String(club_id.to_string()));
    filters.insert("status".to_string(), Value::String("Ativo".to_string()));
    let members = list_rows(pool, "members", Some(&filters), 2000, 0, "name", true).await?;

    let completed_game_ids = load_completed_game_ids(pool, club_id, year).await?;
    let today = Utc::now().date_naive();

    let mut scores = Vec::with_capacity(members.len());
    for member in &members {
        let member_id = value_str(member, "id");
        if member_id.is_empty() {
            continue;
        }
        let confirmed =
            count_confirmed_participations(pool, &member_id, &completed_game_ids).await?;
        scores.push(score_from_parts(
            &member_id,
            confirmed,
            completed_game_ids.len() as u64,
            field_date(member, "registration_date"),
            field_date(member, "birth_date"),
            today,
        ));
    }

    scores.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scores.truncate(limit);
    Ok(scores)
}

async fn load_completed_game_ids(
    pool: &PgPool,
    club_id: &str,
    year: i32,
) -> AppResult<HashSet<String>> {
    let mut filters = Map::new();
    filters.insert("club_id".to_string(), Value::String(club_id.to_string()));
    filters.insert(
        "status".to_string(),
        Value::String(COMPLETED_GAME_STATUS.to_string()),
    );
    filters.insert(
        "date__gte".to_string(),
        Value::String(format!("{year:04}-01-01")),
    );
    filters.insert(
        "date__lte".to_string(),
        Value::String(format!("{year:04}-12-31")),
    );

    let games = list_rows(pool, "games", Some(&filters), 2000, 0, "date", true).await?;
    Ok(games
        .iter()
        .map(|game| value_str(game, "id"))
        .filter(|id| !id.is_empty())
        .collect())
}

async fn count_confirmed_participations(
    pool: &PgPool,
    member_id: &str,
    completed_game_ids: &HashSet<String>,
) -> AppResult<u64> {
    if completed_game_ids.is_empty() {
        return Ok(0);
    }

    let mut filters = Map::new();
    filters.insert("member_id".to_string(), Value::String(member_id.to_string()));
    filters.insert(
        "status".to_string(),
        Value::String(CONFIRMED_PARTICIPATION_STATUS.to_string()),
    );
    filters.insert(
        "game_id__in".to_string(),
        Value::Array(
            completed_game_ids
                .iter()
                .cloned()
                .map(Value::String)
                .collect(),
        ),
    );

    let participations = list_rows(
        pool,
        "game_participants",
        Some(&filters),
        2000,
        0,
        "created_at",
        true,
    )
    .await?;

    // A member counts once per game even if duplicate rows slipped in.
    let distinct = participations
        .iter()
        .map(|row| value_str(row, "game_id"))
        .filter(|game_id| !game_id.is_empty())
        .collect::<HashSet<_>>();
    Ok(distinct.len() as u64)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn field_date(row: &Value, key: &str) -> Option<NaiveDate> {
    row.as_object()
        .and_then(|object| object.get(key))
        .and_then(Value::as_str)
        .and_then(|raw| NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok())
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

/// Default scoring window is the current calendar year.
pub fn default_score_year() -> i32 {
    Utc::now().date_naive().year()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::{participation_rate, ranking_score, score_from_parts, value_str};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn rate_rounds_to_one_decimal_and_handles_empty_seasons() {
        assert_eq!(participation_rate(0, 0), 0.0);
        assert_eq!(participation_rate(2, 3), 66.7);
        assert_eq!(participation_rate(10, 10), 100.0);
    }

    #[test]
    fn reference_score_value() {
        // rate 100.0, tenure 2.0 years, age 30:
        // (100000 + 200 + 30) / 1000 = 100.23
        assert_eq!(ranking_score(100.0, 2.0, 30), 100.23);
    }

    #[test]
    fn integer_scaling_keeps_scores_stable() {
        // (66700 + 150 + 25) / 1000 = 66.875, reported to 2 decimals.
        assert_eq!(ranking_score(66.7, 1.5, 25), 66.88);
        // Scaled sum is integral before the division, so equal inputs can
        // never drift apart across runs.
        assert_eq!(ranking_score(66.7, 1.5, 25), ranking_score(66.7, 1.5, 25));
        assert_eq!(ranking_score(0.0, 0.0, 0), 0.0);
    }

    #[test]
    fn assembles_score_from_member_fields() {
        let today = date(2026, 8, 31);
        let score = score_from_parts(
            "m1",
            10,
            10,
            Some(date(2024, 8, 31)), // exactly 24 months
            Some(date(1996, 8, 1)),  // age 30
            today,
        );
        assert_eq!(score.participation_rate, 100.0);
        assert_eq!(score.membership_months, 24);
        assert_eq!(score.age_years, 30);
        assert_eq!(score.score, 100.23);
    }

    #[test]
    fn reads_row_string_fields_trimmed() {
        let row = json!({ "id": " m1 ", "club_id": "c1", "name": "" });
        assert_eq!(value_str(&row, "id"), "m1");
        assert_eq!(value_str(&row, "club_id"), "c1");
        assert_eq!(value_str(&row, "name"), "");
        assert_eq!(value_str(&row, "missing"), "");
    }

    #[test]
    fn missing_dates_contribute_zero() {
        let score = score_from_parts("m1", 0, 0, None, None, date(2026, 1, 1));
        assert_eq!(score.score, 0.0);
        assert_eq!(score.membership_months, 0);
        assert_eq!(score.age_years, 0);
    }
}
