mod cases;
mod config;
mod db;
mod errors;
mod geocoder;
mod ingestion;
mod location;
mod matching;
mod place_info;
mod places;
mod sanitize;
mod store;

use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use cases::{upsert_case, CaseType, NewCase, OnConflictStrategy};
pub use config::{AppConfig, PublicAppConfig, DEFAULT_GEOCODER_ENDPOINT};
pub use db::{bootstrap, open_in_memory, DatabaseContext};
pub use errors::{AppError, AppResult};
pub use geocoder::{GeocodeLookup, GeocodeService, HttpGeocoder};
pub use ingestion::{read_time_series, CaseIngestor, CaseRow, DailyCount, IngestStats};
pub use location::project;
pub use matching::{select_best, similarity_ratio};
pub use place_info::{Geometry, PlaceInfo, PlaceKind, PlaceLevel, Point, RawCandidate};
pub use places::{CreatedPlace, PlaceResolver};
pub use sanitize::sanitize_place;
pub use store::{
    CountyRecord, NewCountry, NewCounty, NewProvince, PlaceStore, PlaceTable, ProvinceRecord,
    SqliteStore,
};

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,covid_places=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}
