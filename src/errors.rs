use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("no place name provided")]
    PlaceNameNotProvided,
    #[error("geocoder responded with status {status}: {message}")]
    GeocodeUnavailable { status: u16, message: String },
    #[error("failed to fetch place info: {0}")]
    PlaceInfoFetch(String),
    #[error("no geocoder candidate matched {0:?}")]
    PlaceNotMatched(String),
    #[error("place info is incomplete: {0}")]
    PlaceInfoNotComplete(String),
    #[error("malformed row: {0}")]
    MalformedRow(String),
    #[error("failed to parse input: {0}")]
    Parse(String),
    #[error("{0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl AppError {
    /// Errors that only invalidate the row being processed. Everything else
    /// aborts the run.
    pub fn is_row_level(&self) -> bool {
        matches!(
            self,
            AppError::PlaceNameNotProvided
                | AppError::GeocodeUnavailable { .. }
                | AppError::PlaceInfoFetch(_)
                | AppError::PlaceNotMatched(_)
                | AppError::PlaceInfoNotComplete(_)
                | AppError::MalformedRow(_)
                | AppError::Http(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separates_row_errors_from_fatal_ones() {
        assert!(AppError::PlaceNameNotProvided.is_row_level());
        assert!(AppError::PlaceInfoNotComplete("state_code".into()).is_row_level());
        assert!(AppError::MalformedRow("lat".into()).is_row_level());
        assert!(!AppError::Config("missing key".into()).is_row_level());
        assert!(!AppError::Io(io::Error::new(io::ErrorKind::Other, "disk")).is_row_level());
    }
}
