use std::io::Read;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cases::{CaseType, NewCase, OnConflictStrategy};
use crate::errors::{AppError, AppResult};
use crate::place_info::PlaceLevel;
use crate::places::PlaceResolver;
use crate::store::PlaceStore;

const PROVINCE_COLUMN: &str = "Province/State";
const COUNTRY_COLUMN: &str = "Country/Region";
const LAT_COLUMN: &str = "Lat";
const LNG_COLUMN: &str = "Long";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub amount: i64,
}

/// Counts for one place. `query` overrides the geocoder search string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRow {
    pub place: String,
    pub level: PlaceLevel,
    pub query: Option<String>,
    pub case_type: CaseType,
    pub counts: Vec<DailyCount>,
}

impl CaseRow {
    pub fn single(
        place: &str,
        level: PlaceLevel,
        date: NaiveDate,
        amount: i64,
        case_type: CaseType,
    ) -> Self {
        Self {
            place: place.to_string(),
            level,
            query: None,
            case_type,
            counts: vec![DailyCount { date, amount }],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub total_rows: usize,
    pub ingested_rows: usize,
    pub skipped_rows: usize,
    pub cases_written: usize,
}

struct Columns {
    province: usize,
    country: usize,
    lat: usize,
    lng: usize,
    dates: Vec<(usize, NaiveDate)>,
}

/// Reads a global time-series sheet: one row per place, one column per day.
/// Rows that cannot be used come back as row-level errors so the caller can
/// log and count them; a broken header fails the whole file.
pub fn read_time_series<R: Read>(
    reader: R,
    case_type: CaseType,
) -> AppResult<Vec<AppResult<CaseRow>>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let columns = parse_header(csv_reader.headers()?)?;

    let mut rows = Vec::new();
    for record in csv_reader.records() {
        let row = match record {
            Ok(record) => parse_record(&record, &columns, case_type),
            Err(err) => Err(AppError::MalformedRow(err.to_string())),
        };
        rows.push(row);
    }
    debug!(rows = rows.len(), days = columns.dates.len(), "time series parsed");
    Ok(rows)
}

fn parse_header(headers: &csv::StringRecord) -> AppResult<Columns> {
    let find = |name: &str| {
        headers
            .iter()
            .position(|header| header == name)
            .ok_or_else(|| AppError::Parse(format!("missing column {name:?}")))
    };
    let province = find(PROVINCE_COLUMN)?;
    let country = find(COUNTRY_COLUMN)?;
    let lat = find(LAT_COLUMN)?;
    let lng = find(LNG_COLUMN)?;

    let mut dates = Vec::new();
    for (index, header) in headers.iter().enumerate() {
        if [province, country, lat, lng].contains(&index) {
            continue;
        }
        dates.push((index, parse_header_date(header)?));
    }

    Ok(Columns {
        province,
        country,
        lat,
        lng,
        dates,
    })
}

/// Parses `m/d/yy` headers such as `1/22/20`.
pub fn parse_header_date(header: &str) -> AppResult<NaiveDate> {
    let padded = header
        .split('/')
        .map(|part| format!("{:0>2}", part.trim()))
        .collect::<Vec<_>>()
        .join("/");
    NaiveDate::parse_from_str(&padded, "%m/%d/%y")
        .map_err(|err| AppError::Parse(format!("invalid date column {header:?}: {err}")))
}

fn parse_record(
    record: &csv::StringRecord,
    columns: &Columns,
    case_type: CaseType,
) -> AppResult<CaseRow> {
    let field = |index: usize| record.get(index).map(str::trim).unwrap_or("");

    let country = field(columns.country);
    if country.is_empty() {
        return Err(AppError::MalformedRow("missing country".into()));
    }
    let lat = parse_coordinate(field(columns.lat));
    let lng = parse_coordinate(field(columns.lng));
    if lat.is_none() || lng.is_none() {
        return Err(AppError::MalformedRow(format!("missing location for {country}")));
    }

    let mut counts = Vec::with_capacity(columns.dates.len());
    for (index, date) in &columns.dates {
        let raw = field(*index);
        if raw.is_empty() {
            continue;
        }
        let amount = parse_amount(raw)
            .ok_or_else(|| AppError::MalformedRow(format!("invalid amount {raw:?} on {date}")))?;
        counts.push(DailyCount {
            date: *date,
            amount,
        });
    }

    let province = field(columns.province);
    let row = if province.is_empty() {
        CaseRow {
            place: country.to_string(),
            level: PlaceLevel::Country,
            query: None,
            case_type,
            counts,
        }
    } else {
        CaseRow {
            place: province.to_string(),
            level: PlaceLevel::State,
            query: Some(format!("{province}, {country}")),
            case_type,
            counts,
        }
    };
    Ok(row)
}

// Some sheets write counts as floats ("12.0").
fn parse_amount(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(|value| value as i64)
    })
}

// Zero stands in for "unknown" in the source sheets.
fn parse_coordinate(value: &str) -> Option<f64> {
    value
        .parse::<f64>()
        .ok()
        .filter(|coordinate| coordinate.is_finite() && *coordinate != 0.0)
}

pub struct CaseIngestor {
    resolver: PlaceResolver,
    store: Arc<dyn PlaceStore>,
}

impl CaseIngestor {
    pub fn new(resolver: PlaceResolver, store: Arc<dyn PlaceStore>) -> Self {
        Self { resolver, store }
    }

    /// Processes rows strictly in order; later rows see places created by
    /// earlier ones. Row-level failures are logged and skipped.
    pub async fn ingest(
        &self,
        rows: Vec<AppResult<CaseRow>>,
        strategy: OnConflictStrategy,
    ) -> AppResult<IngestStats> {
        let mut stats = IngestStats {
            total_rows: rows.len(),
            ..IngestStats::default()
        };

        for (position, row) in rows.into_iter().enumerate() {
            let index = position + 1;
            debug!(row = index, total = stats.total_rows, "processing row");
            let outcome = match row {
                Ok(row) => self.ingest_row(&row, strategy).await,
                Err(err) => Err(err),
            };

            match outcome {
                Ok(written) => {
                    stats.ingested_rows += 1;
                    stats.cases_written += written;
                }
                Err(err) if err.is_row_level() => {
                    warn!(row = index, error = %err, "skipping row");
                    stats.skipped_rows += 1;
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            total = stats.total_rows,
            ingested = stats.ingested_rows,
            skipped = stats.skipped_rows,
            cases = stats.cases_written,
            "ingest finished"
        );
        Ok(stats)
    }

    async fn ingest_row(&self, row: &CaseRow, strategy: OnConflictStrategy) -> AppResult<usize> {
        let place = self
            .resolver
            .resolve(&row.place, row.level, row.query.as_deref())
            .await?;

        for count in &row.counts {
            self.store.upsert_case(
                &NewCase {
                    case_type: row.case_type,
                    date: count.date,
                    amount: count.amount,
                    country_id: place.country_id,
                    province_id: place.province_id,
                    county_id: place.county_id,
                },
                strategy,
            )?;
        }
        Ok(row.counts.len())
    }
}
