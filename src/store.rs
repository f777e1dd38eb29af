use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use tracing::info;

use crate::cases::{self, CaseType, NewCase, OnConflictStrategy};
use crate::errors::AppResult;
use crate::place_info::Point;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceTable {
    Country,
    Province,
    County,
}

impl PlaceTable {
    fn table(&self) -> &'static str {
        match self {
            PlaceTable::Country => "countries",
            PlaceTable::Province => "provinces",
            PlaceTable::County => "counties",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewCountry {
    pub name: String,
    pub alpha2: Option<String>,
    pub alpha3: Option<String>,
    pub location: Point,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewProvince {
    pub name: String,
    pub code: Option<String>,
    pub country_id: i64,
    pub location: Point,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewCounty {
    pub name: String,
    pub code: String,
    pub province_id: i64,
    pub location: Point,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvinceRecord {
    pub id: i64,
    pub name: String,
    pub code: Option<String>,
    pub country_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountyRecord {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub province_id: i64,
}

/// Persistence seen by the resolver and the ingest loop.
pub trait PlaceStore: Send + Sync {
    fn place_exists(&self, name: &str, table: PlaceTable) -> AppResult<Option<i64>>;
    fn province_by_id(&self, id: i64) -> AppResult<Option<ProvinceRecord>>;
    fn county_by_id(&self, id: i64) -> AppResult<Option<CountyRecord>>;
    fn insert_country(&self, country: &NewCountry) -> AppResult<i64>;
    fn insert_province(&self, province: &NewProvince) -> AppResult<i64>;
    fn insert_county(&self, county: &NewCounty) -> AppResult<i64>;
    fn upsert_case(&self, case: &NewCase, strategy: OnConflictStrategy) -> AppResult<()>;
}

#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn from_connection(connection: Connection) -> Self {
        Self::new(Arc::new(Mutex::new(connection)))
    }

    pub fn count(&self, table: PlaceTable) -> AppResult<i64> {
        let conn = self.db.lock();
        let sql = format!("SELECT COUNT(*) FROM {}", table.table());
        Ok(conn.query_row(&sql, [], |row| row.get(0))?)
    }

    pub fn case_count(&self) -> AppResult<i64> {
        let conn = self.db.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM cases", [], |row| row.get(0))?)
    }

    pub fn case_amount(
        &self,
        case_type: CaseType,
        date: NaiveDate,
        country_id: i64,
        province_id: Option<i64>,
        county_id: Option<i64>,
    ) -> AppResult<Option<i64>> {
        let conn = self.db.lock();
        let amount = conn
            .query_row(
                "SELECT amount FROM cases
                WHERE type = ?1 AND date = ?2 AND country_id = ?3
                    AND COALESCE(province_id, -1) = COALESCE(?4, -1)
                    AND COALESCE(county_id, -1) = COALESCE(?5, -1)",
                (
                    case_type.as_str(),
                    cases::format_date(date),
                    country_id,
                    province_id,
                    county_id,
                ),
                |row| row.get(0),
            )
            .optional()?;
        Ok(amount)
    }
}

impl PlaceStore for SqliteStore {
    fn place_exists(&self, name: &str, table: PlaceTable) -> AppResult<Option<i64>> {
        let conn = self.db.lock();
        let sql = format!(
            "SELECT id FROM {} WHERE name = ?1 ORDER BY id LIMIT 1",
            table.table()
        );
        let id = conn.query_row(&sql, [name], |row| row.get(0)).optional()?;
        Ok(id)
    }

    fn province_by_id(&self, id: i64) -> AppResult<Option<ProvinceRecord>> {
        let conn = self.db.lock();
        let record = conn
            .query_row(
                "SELECT id, name, code, country_id FROM provinces WHERE id = ?1",
                [id],
                |row| {
                    Ok(ProvinceRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        code: row.get(2)?,
                        country_id: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn county_by_id(&self, id: i64) -> AppResult<Option<CountyRecord>> {
        let conn = self.db.lock();
        let record = conn
            .query_row(
                "SELECT id, name, code, province_id FROM counties WHERE id = ?1",
                [id],
                |row| {
                    Ok(CountyRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        code: row.get(2)?,
                        province_id: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn insert_country(&self, country: &NewCountry) -> AppResult<i64> {
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO countries (name, alpha2, alpha3, lat, lng) VALUES (?1, ?2, ?3, ?4, ?5)",
            (
                country.name.as_str(),
                country.alpha2.as_deref(),
                country.alpha3.as_deref(),
                country.location.lat,
                country.location.lng,
            ),
        )?;
        let id = conn.last_insert_rowid();
        info!(id, name = %country.name, "country created");
        Ok(id)
    }

    fn insert_province(&self, province: &NewProvince) -> AppResult<i64> {
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO provinces (name, code, country_id, lat, lng) VALUES (?1, ?2, ?3, ?4, ?5)",
            (
                province.name.as_str(),
                province.code.as_deref(),
                province.country_id,
                province.location.lat,
                province.location.lng,
            ),
        )?;
        let id = conn.last_insert_rowid();
        info!(id, name = %province.name, country_id = province.country_id, "province created");
        Ok(id)
    }

    fn insert_county(&self, county: &NewCounty) -> AppResult<i64> {
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO counties (name, code, province_id, lat, lng) VALUES (?1, ?2, ?3, ?4, ?5)",
            (
                county.name.as_str(),
                county.code.as_str(),
                county.province_id,
                county.location.lat,
                county.location.lng,
            ),
        )?;
        let id = conn.last_insert_rowid();
        info!(id, name = %county.name, province_id = county.province_id, "county created");
        Ok(id)
    }

    fn upsert_case(&self, case: &NewCase, strategy: OnConflictStrategy) -> AppResult<()> {
        let conn = self.db.lock();
        cases::upsert_case(&conn, case, strategy)
    }
}
