use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde_json::Value;

pub const COMPLETED_TRANSACTION_STATUS: &str = "completed";

/// Category totals plus summary ratios for one year (or one month of it).
/// Read-side only: transactions are never mutated here.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FinancialStatement {
    pub year: i32,
    pub month: Option<u32>,
    pub revenue_by_category: BTreeMap<String, f64>,
    pub expenses_by_category: BTreeMap<String, f64>,
    pub total_revenue: f64,
    pub total_expenses: f64,
    pub net_profit: f64,
    /// Percentage; exactly 0 when revenue is 0 — never NaN or infinite.
    pub profit_margin: f64,
}

/// Group completed transactions in the window into per-category revenue
/// and expense totals, then derive the summary line.
pub fn aggregate_statement(
    transactions: &[Value],
    year: i32,
    month: Option<u32>,
) -> FinancialStatement {
    let mut revenue_by_category: BTreeMap<String, f64> = BTreeMap::new();
    let mut expenses_by_category: BTreeMap<String, f64> = BTreeMap::new();

    for transaction in transactions {
        if value_str(transaction, "status") != COMPLETED_TRANSACTION_STATUS {
            continue;
        }
        let Some(date) = field_date(transaction, "date") else {
            continue;
        };
        if date.year() != year {
            continue;
        }
        if let Some(target_month) = month {
            if date.month() != target_month {
                continue;
            }
        }

        let category = {
            let raw = value_str(transaction, "category");
            if raw.is_empty() {
                "Sem categoria".to_string()
            } else {
                raw
            }
        };
        let amount = transaction
            .as_object()
            .and_then(|object| object.get("amount"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        match value_str(transaction, "type").as_str() {
            "income" => *revenue_by_category.entry(category).or_insert(0.0) += amount,
            "expense" => *expenses_by_category.entry(category).or_insert(0.0) += amount,
            _ => {}
        }
    }

    let total_revenue = round2(revenue_by_category.values().sum());
    let total_expenses = round2(expenses_by_category.values().sum());
    let net_profit = round2(total_revenue - total_expenses);
    let profit_margin = if total_revenue == 0.0 {
        0.0
    } else {
        round2(net_profit / total_revenue * 100.0)
    };

    FinancialStatement {
        year,
        month,
        revenue_by_category,
        expenses_by_category,
        total_revenue,
        total_expenses,
        net_profit,
        profit_margin,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
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

fn field_date(row: &Value, key: &str) -> Option<NaiveDate> {
    row.as_object()
        .and_then(|object| object.get(key))
        .and_then(Value::as_str)
        .and_then(|raw| NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::aggregate_statement;

    fn sample_transactions() -> Vec<serde_json::Value> {
        vec![
            json!({ "type": "income", "category": "Mensalidade", "amount": 100.0,
                    "date": "2026-03-05", "status": "completed" }),
            json!({ "type": "income", "category": "Mensalidade", "amount": 50.0,
                    "date": "2026-03-20", "status": "completed" }),
            json!({ "type": "expense", "category": "Campo", "amount": 30.0,
                    "date": "2026-03-12", "status": "completed" }),
        ]
    }

    #[test]
    fn groups_by_category_and_derives_summary() {
        let statement = aggregate_statement(&sample_transactions(), 2026, Some(3));
        assert_eq!(statement.revenue_by_category.get("Mensalidade"), Some(&150.0));
        assert_eq!(statement.expenses_by_category.get("Campo"), Some(&30.0));
        assert_eq!(statement.total_revenue, 150.0);
        assert_eq!(statement.total_expenses, 30.0);
        assert_eq!(statement.net_profit, 120.0);
        assert_eq!(statement.profit_margin, 80.0);
    }

    #[test]
    fn filters_out_other_windows_and_incomplete_transactions() {
        let mut transactions = sample_transactions();
        transactions.push(json!({ "type": "income", "category": "Mensalidade", "amount": 999.0,
                                  "date": "2026-04-01", "status": "completed" }));
        transactions.push(json!({ "type": "income", "category": "Mensalidade", "amount": 999.0,
                                  "date": "2026-03-09", "status": "pending" }));

        let statement = aggregate_statement(&transactions, 2026, Some(3));
        assert_eq!(statement.total_revenue, 150.0);

        // Whole-year window picks up the April row.
        let yearly = aggregate_statement(&transactions, 2026, None);
        assert_eq!(yearly.total_revenue, 1149.0);
    }

    #[test]
    fn aggregates_more_rows_than_one_fetch_page() {
        // More rows than a single repository page holds; every one of
        // them must land in the totals.
        let transactions: Vec<serde_json::Value> = (0..2500)
            .map(|_| {
                json!({ "type": "income", "category": "Mensalidade", "amount": 1.0,
                        "date": "2026-03-05", "status": "completed" })
            })
            .collect();

        let statement = aggregate_statement(&transactions, 2026, Some(3));
        assert_eq!(statement.total_revenue, 2500.0);
        assert_eq!(statement.revenue_by_category.get("Mensalidade"), Some(&2500.0));
    }

    #[test]
    fn zero_revenue_means_zero_margin() {
        let transactions = vec![json!({ "type": "expense", "category": "Campo", "amount": 30.0,
                                        "date": "2026-03-12", "status": "completed" })];
        let statement = aggregate_statement(&transactions, 2026, Some(3));
        assert_eq!(statement.total_revenue, 0.0);
        assert_eq!(statement.net_profit, -30.0);
        assert_eq!(statement.profit_margin, 0.0);
        assert!(statement.profit_margin.is_finite());
    }
}
