use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseType {
    Confirmed,
    Dead,
    Recovered,
}

impl CaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseType::Confirmed => "confirmed",
            CaseType::Dead => "dead",
            CaseType::Recovered => "recovered",
        }
    }

    pub fn parse(value: &str) -> AppResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "confirmed" => Ok(CaseType::Confirmed),
            "dead" | "deaths" => Ok(CaseType::Dead),
            "recovered" => Ok(CaseType::Recovered),
            other => Err(AppError::Parse(format!("unknown case type: {other}"))),
        }
    }
}

/// What to do when a case row with the same key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnConflictStrategy {
    Replace,
    Add,
}

impl OnConflictStrategy {
    pub fn parse(value: &str) -> AppResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(OnConflictStrategy::Replace),
            "add" => Ok(OnConflictStrategy::Add),
            other => Err(AppError::Parse(format!("unknown conflict strategy: {other}"))),
        }
    }

    fn update_clause(&self) -> &'static str {
        match self {
            OnConflictStrategy::Replace => "amount = excluded.amount",
            OnConflictStrategy::Add => "amount = cases.amount + excluded.amount",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewCase {
    pub case_type: CaseType,
    pub date: NaiveDate,
    pub amount: i64,
    pub country_id: i64,
    pub province_id: Option<i64>,
    pub county_id: Option<i64>,
}

pub fn upsert_case(
    connection: &Connection,
    case: &NewCase,
    strategy: OnConflictStrategy,
) -> AppResult<()> {
    let sql = format!(
        "INSERT INTO cases (type, date, amount, country_id, province_id, county_id)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(type, date, country_id, COALESCE(province_id, -1), COALESCE(county_id, -1))
        DO UPDATE SET {}, updated_at = DATETIME('now')",
        strategy.update_clause()
    );
    connection.execute(
        &sql,
        (
            case.case_type.as_str(),
            format_date(case.date),
            case.amount,
            case.country_id,
            case.province_id,
            case.county_id,
        ),
    )?;
    trace!(
        case_type = case.case_type.as_str(),
        date = %case.date,
        amount = case.amount,
        ?strategy,
        "case row written"
    );
    Ok(())
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
