use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, error};

use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::matching::select_best;
use crate::place_info::{PlaceInfo, RawCandidate};

#[async_trait]
pub trait GeocodeLookup: Send + Sync {
    async fn search(&self, query: &str) -> AppResult<Vec<RawCandidate>>;
}

pub struct HttpGeocoder {
    http: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
}

impl HttpGeocoder {
    pub fn new(endpoint: &str, api_key: SecretString, timeout_secs: u64) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            api_key,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<RawCandidate>,
    status: Option<ResponseStatus>,
}

#[derive(Debug, Deserialize)]
struct ResponseStatus {
    message: Option<String>,
}

#[async_trait]
impl GeocodeLookup for HttpGeocoder {
    async fn search(&self, query: &str) -> AppResult<Vec<RawCandidate>> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("q", query),
                ("key", self.api_key.expose_secret()),
                ("no_annotations", "1"),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status.is_client_error() || status.is_server_error() {
            let message = serde_json::from_str::<SearchResponse>(&body)
                .ok()
                .and_then(|parsed| parsed.status)
                .and_then(|status| status.message)
                .unwrap_or(body);
            error!(status = status.as_u16(), %message, query, "geocoder returned an error");
            return Err(AppError::GeocodeUnavailable {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: SearchResponse = serde_json::from_str(&body).map_err(|err| {
            AppError::PlaceInfoFetch(format!("{query}: unreadable geocoder response: {err}"))
        })?;
        Ok(parsed.results)
    }
}

struct RateLimiter {
    min_interval_ms: AtomicU64,
    last_tick: AsyncMutex<Option<Instant>>,
}

impl RateLimiter {
    fn new(qps: u32) -> Self {
        Self {
            min_interval_ms: AtomicU64::new(Self::interval_ms(qps)),
            last_tick: AsyncMutex::new(None),
        }
    }

    fn interval_ms(qps: u32) -> u64 {
        let safe_qps = qps.max(1);
        let interval_ms = (1000_f64 / safe_qps as f64).ceil() as u64;
        interval_ms.max(50)
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms.load(Ordering::SeqCst))
    }

    async fn wait(&self) {
        let interval = self.interval();
        let mut guard = self.last_tick.lock().await;
        if let Some(prev) = *guard {
            let elapsed = prev.elapsed();
            if elapsed < interval {
                sleep(interval - elapsed).await;
            }
        }
        *guard = Some(Instant::now());
    }
}

#[derive(Clone)]
pub struct GeocodeService {
    inner: Arc<dyn GeocodeLookup>,
    limiter: Arc<RateLimiter>,
}

impl GeocodeService {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let key = config.geocoder_api_key.clone().ok_or_else(|| {
            AppError::Config("CAGEDATA_API_KEY is required to query the geocoder".into())
        })?;
        let client =
            HttpGeocoder::new(&config.geocoder_endpoint, key, config.geocoder_timeout_secs)?;
        Ok(Self::from_lookup(Arc::new(client), config.geocoder_rate_limit_qps))
    }

    pub fn from_lookup(lookup: Arc<dyn GeocodeLookup>, qps: u32) -> Self {
        Self {
            inner: lookup,
            limiter: Arc::new(RateLimiter::new(qps)),
        }
    }

    pub fn rate_limit_interval(&self) -> Duration {
        self.limiter.interval()
    }

    pub async fn fetch_candidates(&self, query: &str) -> AppResult<Vec<RawCandidate>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::PlaceNameNotProvided);
        }
        self.limiter.wait().await;
        let candidates = self.inner.search(query).await?;
        debug!(query, candidates = candidates.len(), "geocoder lookup finished");
        Ok(candidates)
    }

    /// Fetches, selects and normalizes the best candidate for `query`.
    pub async fn place_info(&self, query: &str) -> AppResult<PlaceInfo> {
        let candidates = self.fetch_candidates(query).await.map_err(|err| match err {
            AppError::GeocodeUnavailable { status, message } => {
                AppError::PlaceInfoFetch(format!("{query}: provider status {status}: {message}"))
            }
            AppError::Http(err) => AppError::PlaceInfoFetch(format!("{query}: {err}")),
            other => other,
        })?;
        let best = select_best(query, &candidates)?;
        PlaceInfo::from_candidate(query.trim(), best)
    }
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::testing::{service, StaticGeocoder};
    use super::*;
    use crate::place_info::{candidate, PlaceKind, PlaceLevel};

    #[tokio::test]
    async fn empty_query_fails_before_lookup() {
        let geocoder = Arc::new(StaticGeocoder::new());
        let service = service(geocoder.clone());

        let err = service.fetch_candidates("   ").await.unwrap_err();
        assert!(matches!(err, AppError::PlaceNameNotProvided));
        assert!(geocoder.queries().is_empty());
    }

    #[tokio::test]
    async fn builds_place_info_from_best_candidate() {
        let geocoder = Arc::new(StaticGeocoder::new().answer(
            "Spain",
            vec![
                candidate(json!({"_type": "city", "city": "Spainville"}), 1.0, 1.0),
                candidate(
                    json!({"_type": "country", "country": "Spain", "ISO_3166-1_alpha-2": "ES"}),
                    40.0,
                    -4.0,
                ),
            ],
        ));
        let info = service(geocoder.clone()).place_info("Spain").await.unwrap();

        assert_eq!(info.kind, PlaceKind::Level(PlaceLevel::Country));
        assert_eq!(info.alpha2.as_deref(), Some("ES"));
        assert_eq!(geocoder.queries(), vec!["Spain".to_string()]);
    }

    #[tokio::test]
    async fn provider_errors_become_fetch_failures() {
        let geocoder = Arc::new(StaticGeocoder::new().fail(
            "Spain",
            AppError::GeocodeUnavailable {
                status: 402,
                message: "quota exceeded".into(),
            },
        ));
        let err = service(geocoder).place_info("Spain").await.unwrap_err();
        assert!(matches!(err, AppError::PlaceInfoFetch(message) if message.contains("quota")));
    }

    #[tokio::test]
    async fn no_results_is_not_a_provider_error() {
        let geocoder = Arc::new(StaticGeocoder::new());
        let err = service(geocoder).place_info("Atlantis").await.unwrap_err();
        assert!(matches!(err, AppError::PlaceNotMatched(_)));
    }

    #[test]
    fn rate_limit_interval_has_a_floor() {
        assert_eq!(RateLimiter::interval_ms(1), 1000);
        assert_eq!(RateLimiter::interval_ms(0), 1000);
        assert_eq!(RateLimiter::interval_ms(3), 334);
        assert_eq!(RateLimiter::interval_ms(100), 50);
    }
}
