use std::fs::File;
use std::sync::Arc;

use anyhow::{bail, Context};
use parking_lot::Mutex;
use tracing::info;

use covid_places::{
    bootstrap, init_tracing, read_time_series, AppConfig, CaseIngestor, CaseType,
    DatabaseContext, GeocodeService, OnConflictStrategy, PlaceResolver, PlaceStore, SqliteStore,
};

const USAGE: &str = "usage: covid-places <csv-path> <confirmed|dead|recovered> [replace|add]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (csv_path, case_type) = match args.as_slice() {
        [path, kind, ..] => (path.clone(), CaseType::parse(kind)?),
        _ => bail!(USAGE),
    };

    let config = AppConfig::from_env();
    let strategy = match args.get(2) {
        Some(value) => OnConflictStrategy::parse(value)?,
        None => config.case_conflict_strategy,
    };
    info!(config = ?config.public_profile(), ?strategy, %csv_path, "starting ingest");

    let DatabaseContext { connection, path } = bootstrap(&config.database_path)
        .with_context(|| format!("opening database at {}", config.database_path))?;
    info!(path = %path.display(), "database opened");

    let geocoder = GeocodeService::new(&config)?;
    info!(
        interval_ms = geocoder.rate_limit_interval().as_millis() as u64,
        "geocoder ready"
    );

    let store: Arc<dyn PlaceStore> = Arc::new(SqliteStore::new(Arc::new(Mutex::new(connection))));
    let ingestor = CaseIngestor::new(PlaceResolver::new(store.clone(), geocoder), store);

    let file = File::open(&csv_path).with_context(|| format!("reading {csv_path}"))?;
    let rows = read_time_series(file, case_type)?;
    let stats = ingestor.ingest(rows, strategy).await?;

    info!(
        total = stats.total_rows,
        ingested = stats.ingested_rows,
        skipped = stats.skipped_rows,
        cases = stats.cases_written,
        "done"
    );
    Ok(())
}
