//! Dashboard Analytics
//!
//! Fixed reporting queries over the vendors / transactions / orders schema.
//!
//! The statements are constants, but they still pass through the validator before
//! execution, so nothing reaches a connection without a SAFE verdict.

use serde::{Deserialize, Serialize};

use crate::engine::{DatabaseEngine, DatabaseType};
use crate::error::{InsightError, Result};
use crate::executor::{QueryExecutor, TabularResult};
use crate::validator::{validate, CandidateStatement, Verdict};

const MONTHS: [&str; 12] =
    ["Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec"];

const PG_METRICS: &str = "SELECT
    (SELECT COALESCE(SUM(amount), 0) FROM transactions) AS total_revenue,
    (SELECT COUNT(*) FROM vendors) AS active_vendors,
    (SELECT COUNT(*) FROM orders) AS total_orders,
    (SELECT COALESCE(SUM(amount), 0) FROM transactions
      WHERE date >= CURRENT_DATE - INTERVAL '30 days') AS recent_revenue";

const SQLITE_METRICS: &str = "SELECT
    (SELECT COALESCE(SUM(amount), 0) FROM transactions) AS total_revenue,
    (SELECT COUNT(*) FROM vendors) AS active_vendors,
    (SELECT COUNT(*) FROM orders) AS total_orders,
    (SELECT COALESCE(SUM(amount), 0) FROM transactions
      WHERE date >= date('now', '-30 days')) AS recent_revenue";

const PG_REVENUE_TREND: &str = "SELECT TO_CHAR(DATE_TRUNC('month', date), 'MM') AS month,
    SUM(amount) AS revenue
    FROM transactions
    WHERE date >= CURRENT_DATE - INTERVAL '6 months'
    GROUP BY DATE_TRUNC('month', date)
    ORDER BY DATE_TRUNC('month', date)";

const SQLITE_REVENUE_TREND: &str = "SELECT strftime('%m', date) AS month, SUM(amount) AS revenue
    FROM transactions
    WHERE date >= date('now', '-6 months')
    GROUP BY strftime('%Y-%m', date)
    ORDER BY strftime('%Y-%m', date)";

const TOP_VENDORS: &str = "SELECT v.name AS vendor, SUM(t.amount) AS spend
    FROM transactions t
    JOIN vendors v ON t.vendor_id = v.id
    GROUP BY v.name
    ORDER BY SUM(t.amount) DESC
    LIMIT 5";

/// Headline dashboard numbers, pre-formatted for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    /// e.g. `$12,345.67`
    pub total_revenue: String,
    pub active_vendors: String,
    pub total_orders: String,
    /// Share of all revenue earned in the last 30 days, e.g. `8.1%`
    pub growth_rate: String,
}

/// Revenue of one calendar month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenuePoint {
    /// Abbreviated month name
    pub month: String,
    pub revenue: f64,
}

/// Total spend with one vendor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorSpend {
    pub vendor: String,
    pub spend: f64,
}

/// Compute headline metrics
pub async fn metrics<E: DatabaseEngine>(executor: &QueryExecutor<E>) -> Result<Metrics> {
    let sql = match executor.engine().database_type() {
        DatabaseType::Postgres => PG_METRICS,
        DatabaseType::SQLite => SQLITE_METRICS,
    };

    let result = run_fixed(executor, sql).await?;
    let row = result.rows.first().map(Vec::as_slice).unwrap_or_default();

    let total = number(row.first())?;
    let recent = number(row.get(3))?;
    let growth = if total > 0.0 { recent / total * 100.0 } else { 0.0 };

    Ok(Metrics {
        total_revenue: format_currency(total),
        active_vendors: count(row.get(1)),
        total_orders: count(row.get(2)),
        growth_rate: format!("{growth:.1}%"),
    })
}

/// Revenue per month over the last six months, oldest first
pub async fn revenue_trend<E: DatabaseEngine>(
    executor: &QueryExecutor<E>,
) -> Result<Vec<RevenuePoint>> {
    let sql = match executor.engine().database_type() {
        DatabaseType::Postgres => PG_REVENUE_TREND,
        DatabaseType::SQLite => SQLITE_REVENUE_TREND,
    };

    run_fixed(executor, sql)
        .await?
        .rows
        .into_iter()
        .map(|row| {
            Ok(RevenuePoint {
                month: month_name(row.first())?,
                revenue: number(row.get(1))?,
            })
        })
        .collect()
}

/// The five vendors with the highest total spend
pub async fn top_vendors<E: DatabaseEngine>(
    executor: &QueryExecutor<E>,
) -> Result<Vec<VendorSpend>> {
    run_fixed(executor, TOP_VENDORS)
        .await?
        .rows
        .into_iter()
        .map(|mut row| {
            let spend = number(row.get(1))?;
            let vendor = row.get_mut(0).and_then(Option::take).unwrap_or_default();
            Ok(VendorSpend { vendor, spend })
        })
        .collect()
}

async fn run_fixed<E: DatabaseEngine>(
    executor: &QueryExecutor<E>,
    sql: &str,
) -> Result<TabularResult> {
    match validate(CandidateStatement::new(sql)) {
        Verdict::Safe(statement) => executor.execute(&statement).await,
        Verdict::Unsafe { reason, .. } => {
            Err(InsightError::internal(format!("Analytics query was rejected: {reason}")))
        }
    }
}

fn number(cell: Option<&Option<String>>) -> Result<f64> {
    match cell.and_then(Option::as_deref) {
        None => Ok(0.0),
        Some(text) => text
            .trim()
            .parse()
            .map_err(|_| InsightError::internal(format!("Expected a number, got '{text}'"))),
    }
}

fn count(cell: Option<&Option<String>>) -> String {
    cell.and_then(Option::clone).unwrap_or_else(|| "0".to_string())
}

fn month_name(cell: Option<&Option<String>>) -> Result<String> {
    let text = cell.and_then(Option::as_deref).unwrap_or_default();
    text.trim()
        .parse::<usize>()
        .ok()
        .and_then(|m| m.checked_sub(1))
        .and_then(|idx| MONTHS.get(idx))
        .map(|name| (*name).to_string())
        .ok_or_else(|| InsightError::internal(format!("Unexpected month value '{text}'")))
}

/// Format as US dollars with thousands separators, e.g. `$12,345.67`
#[must_use]
pub fn format_currency(amount: f64) -> String {
    let fixed = format!("{amount:.2}");
    let (sign, unsigned) = fixed.strip_prefix('-').map_or(("", fixed.as_str()), |rest| ("-", rest));
    let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    format!("${sign}{grouped}.{fraction}")
}
