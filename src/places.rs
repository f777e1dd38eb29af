use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::geocoder::GeocodeService;
use crate::location::project;
use crate::place_info::{PlaceInfo, PlaceLevel};
use crate::sanitize::sanitize_place;
use crate::store::{NewCountry, NewCounty, NewProvince, PlaceStore, PlaceTable};

/// Ids of a resolved place and all of its parents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CreatedPlace {
    pub country_id: i64,
    pub province_id: Option<i64>,
    pub county_id: Option<i64>,
}

impl CreatedPlace {
    fn country(country_id: i64) -> Self {
        Self {
            country_id,
            province_id: None,
            county_id: None,
        }
    }
}

/// Finds or creates countries, provinces and counties by canonical name.
/// Parents are materialized before children, so a county never exists
/// without its province and country.
#[derive(Clone)]
pub struct PlaceResolver {
    store: Arc<dyn PlaceStore>,
    geocoder: GeocodeService,
}

impl PlaceResolver {
    pub fn new(store: Arc<dyn PlaceStore>, geocoder: GeocodeService) -> Self {
        Self { store, geocoder }
    }

    pub async fn resolve(
        &self,
        name: &str,
        level: PlaceLevel,
        query: Option<&str>,
    ) -> AppResult<CreatedPlace> {
        match level {
            PlaceLevel::Country => self.create_country(name, None).await,
            PlaceLevel::State => self.create_province(name, None, query).await,
            PlaceLevel::City => self.create_county(name, None).await,
        }
    }

    pub async fn create_country(
        &self,
        name: &str,
        place_info: Option<PlaceInfo>,
    ) -> AppResult<CreatedPlace> {
        let sanitized = canonical_name(name)?;
        if let Some(id) = self.store.place_exists(&sanitized, PlaceTable::Country)? {
            return Ok(CreatedPlace::country(id));
        }

        let mut info = match place_info.filter(PlaceInfo::describes_country) {
            Some(info) => info,
            None => self.geocoder.place_info(name).await?,
        };
        if info.country.is_none() {
            info.country = Some(name.to_string());
        }

        let reported = info.country.as_deref();
        if let Some(id) =
            self.existing_by_reported_name(reported, &sanitized, PlaceTable::Country)?
        {
            return Ok(CreatedPlace::country(id));
        }

        let location = project(&self.geocoder, &info, PlaceLevel::Country).await?;
        let id = self.store.insert_country(&NewCountry {
            name: sanitized,
            alpha2: info.alpha2.clone(),
            alpha3: info.alpha3.clone(),
            location,
        })?;
        Ok(CreatedPlace::country(id))
    }

    /// `query` overrides the geocoder search string, e.g. `"Canarias, Spain"`
    /// for a province stored as `"Canarias"`.
    pub async fn create_province(
        &self,
        name: &str,
        place_info: Option<PlaceInfo>,
        query: Option<&str>,
    ) -> AppResult<CreatedPlace> {
        let sanitized = canonical_name(name)?;
        if let Some(id) = self.store.place_exists(&sanitized, PlaceTable::Province)? {
            return self.existing_province(id);
        }

        let info = match place_info {
            Some(info) => info,
            None => self.geocoder.place_info(query.unwrap_or(name)).await?,
        };
        let country = info
            .country
            .clone()
            .ok_or_else(|| AppError::PlaceInfoNotComplete(format!("{name}: missing country")))?;

        let reported = info.state.as_deref().or_else(|| info.own_name());
        if let Some(id) =
            self.existing_by_reported_name(reported, &sanitized, PlaceTable::Province)?
        {
            return self.existing_province(id);
        }

        let parent = self.create_country(&country, Some(info.clone())).await?;
        let location = project(&self.geocoder, &info, PlaceLevel::State).await?;
        let id = self.store.insert_province(&NewProvince {
            name: sanitized,
            code: info.state_code.clone(),
            country_id: parent.country_id,
            location,
        })?;
        Ok(CreatedPlace {
            province_id: Some(id),
            ..parent
        })
    }

    pub async fn create_county(
        &self,
        name: &str,
        place_info: Option<PlaceInfo>,
    ) -> AppResult<CreatedPlace> {
        let sanitized = canonical_name(name)?;
        if let Some(id) = self.store.place_exists(&sanitized, PlaceTable::County)? {
            return self.existing_county(id);
        }

        let info = match place_info {
            Some(info) => info,
            None => self.geocoder.place_info(name).await?,
        };
        let state_code = info
            .state_code
            .clone()
            .ok_or_else(|| AppError::PlaceInfoNotComplete(format!("{name}: missing state_code")))?;

        let reported = info.county.as_deref();
        if let Some(id) =
            self.existing_by_reported_name(reported, &sanitized, PlaceTable::County)?
        {
            return self.existing_county(id);
        }

        let province_name = info.state.clone().unwrap_or(state_code);
        let parent = self
            .create_province(&province_name, Some(info.clone()), None)
            .await?;
        let province_id = parent
            .province_id
            .ok_or_else(|| AppError::PlaceInfoNotComplete(format!("{name}: province unresolved")))?;

        let location = project(&self.geocoder, &info, PlaceLevel::City).await?;
        let id = self.store.insert_county(&NewCounty {
            name: sanitized,
            code: info.county_code.clone().unwrap_or_default(),
            province_id,
            location,
        })?;
        Ok(CreatedPlace {
            county_id: Some(id),
            ..parent
        })
    }

    // Second existence check under the name the geocoder reported, which may
    // be spelled differently from the caller's.
    fn existing_by_reported_name(
        &self,
        reported: Option<&str>,
        sanitized: &str,
        table: PlaceTable,
    ) -> AppResult<Option<i64>> {
        let Some(reported) = reported.map(sanitize_place).filter(|n| !n.trim().is_empty()) else {
            return Ok(None);
        };
        if reported == sanitized {
            return Ok(None);
        }
        let found = self.store.place_exists(&reported, table)?;
        if let Some(id) = found {
            debug!(
                id,
                %reported,
                requested = sanitized,
                ?table,
                "matched existing place by reported name"
            );
        }
        Ok(found)
    }

    fn existing_province(&self, id: i64) -> AppResult<CreatedPlace> {
        let province = self
            .store
            .province_by_id(id)?
            .ok_or(AppError::Database(rusqlite::Error::QueryReturnedNoRows))?;
        Ok(CreatedPlace {
            country_id: province.country_id,
            province_id: Some(province.id),
            county_id: None,
        })
    }

    fn existing_county(&self, id: i64) -> AppResult<CreatedPlace> {
        let county = self
            .store
            .county_by_id(id)?
            .ok_or(AppError::Database(rusqlite::Error::QueryReturnedNoRows))?;
        let province = self.existing_province(county.province_id)?;
        Ok(CreatedPlace {
            county_id: Some(county.id),
            ..province
        })
    }
}

fn canonical_name(name: &str) -> AppResult<String> {
    let sanitized = sanitize_place(name.trim());
    if sanitized.is_empty() {
        return Err(AppError::PlaceNameNotProvided);
    }
    Ok(sanitized)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::db::open_in_memory;
    use crate::geocoder::testing::{service, StaticGeocoder};
    use crate::place_info::candidate;
    use crate::store::SqliteStore;

    fn spain() -> crate::place_info::RawCandidate {
        candidate(
            json!({
                "ISO_3166-1_alpha-2": "ES",
                "ISO_3166-1_alpha-3": "ESP",
                "_type": "country",
                "_category": "place",
                "country": "Spain",
                "country_code": "es",
                "continent": "Europe",
            }),
            40.0,
            -4.0,
        )
    }

    fn canarias_state() -> crate::place_info::RawCandidate {
        candidate(json!({"_type": "state", "state": "Canarias"}), 28.5, -15.7)
    }

    fn seed_canarias(store: &SqliteStore) -> (i64, i64) {
        let country_id = store
            .insert_country(&NewCountry {
                name: "Spain".into(),
                alpha2: Some("ES".into()),
                alpha3: Some("ESP".into()),
                location: Default::default(),
            })
            .unwrap();
        let province_id = store
            .insert_province(&NewProvince {
                name: "Canarias".into(),
                code: Some("CN".into()),
                country_id,
                location: Default::default(),
            })
            .unwrap();
        (country_id, province_id)
    }

    fn resolver(geocoder: StaticGeocoder) -> (PlaceResolver, SqliteStore, Arc<StaticGeocoder>) {
        let store = SqliteStore::from_connection(open_in_memory().unwrap());
        let geocoder = Arc::new(geocoder);
        let resolver = PlaceResolver::new(Arc::new(store.clone()), service(geocoder.clone()));
        (resolver, store, geocoder)
    }

    #[tokio::test]
    async fn resolving_a_country_twice_inserts_once() {
        let (resolver, store, geocoder) =
            resolver(StaticGeocoder::new().answer("Spain", vec![spain()]));

        let first = resolver.create_country("Spain", None).await.unwrap();
        let second = resolver.create_country("spain", None).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.count(PlaceTable::Country).unwrap(), 1);
        assert_eq!(geocoder.queries(), vec!["Spain".to_string()]);
    }

    #[tokio::test]
    async fn reported_name_catches_foreign_spellings() {
        let (resolver, store, _) = resolver(
            StaticGeocoder::new()
                .answer("Spain", vec![spain()])
                .answer("España", vec![spain()]),
        );
        let spain_id = resolver.create_country("Spain", None).await.unwrap();
        let espana = resolver.create_country("España", None).await.unwrap();

        assert_eq!(spain_id, espana);
        assert_eq!(store.count(PlaceTable::Country).unwrap(), 1);
    }

    #[tokio::test]
    async fn county_without_state_code_writes_nothing() {
        let (resolver, store, _) = resolver(StaticGeocoder::new().answer(
            "Arona",
            vec![candidate(
                json!({
                    "_type": "city",
                    "city": "Arona",
                    "country": "Spain",
                    "country_code": "es",
                    "ISO_3166-1_alpha-2": "ES",
                }),
                28.1,
                -16.7,
            )],
        ));

        let err = resolver.create_county("Arona", None).await.unwrap_err();
        assert!(matches!(err, AppError::PlaceInfoNotComplete(_)));
        for table in [PlaceTable::Country, PlaceTable::Province, PlaceTable::County] {
            assert_eq!(store.count(table).unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn province_without_country_writes_nothing() {
        let (resolver, store, _) =
            resolver(StaticGeocoder::new().answer("Canarias", vec![canarias_state()]));

        let err = resolver
            .create_province("Canarias", None, None)
            .await
            .unwrap_err();
        assert!(
            matches!(err, AppError::PlaceInfoNotComplete(message) if message.contains("country"))
        );
        for table in [PlaceTable::Country, PlaceTable::Province, PlaceTable::County] {
            assert_eq!(store.count(table).unwrap(), 0);
        }
    }

    #[tokio::test]
    async fn province_is_found_under_its_reported_state() {
        let canary = candidate(
            json!({
                "_type": "city",
                "city": "Canary Islands",
                "state": "Canarias",
                "state_code": "CN",
                "country": "Spain",
                "country_code": "es",
            }),
            28.3,
            -16.6,
        );
        let (resolver, store, geocoder) =
            resolver(StaticGeocoder::new().answer("Canary Islands", vec![canary]));
        let (country_id, province_id) = seed_canarias(&store);

        let created = resolver
            .create_province("Canary Islands", None, None)
            .await
            .unwrap();
        assert_eq!(
            created,
            CreatedPlace {
                country_id,
                province_id: Some(province_id),
                county_id: None,
            }
        );
        assert_eq!(store.count(PlaceTable::Province).unwrap(), 1);
        assert_eq!(geocoder.queries(), vec!["Canary Islands".to_string()]);
    }

    #[tokio::test]
    async fn county_is_found_under_its_reported_name() {
        let tenerife = candidate(
            json!({
                "_type": "city",
                "city": "Tenerife",
                "county": "Santa Cruz de Tenerife",
                "state": "Canarias",
                "state_code": "CN",
                "country": "Spain",
                "country_code": "es",
            }),
            28.3,
            -16.5,
        );
        let (resolver, store, geocoder) =
            resolver(StaticGeocoder::new().answer("Tenerife", vec![tenerife]));
        let (country_id, province_id) = seed_canarias(&store);
        let county_id = store
            .insert_county(&NewCounty {
                name: sanitize_place("Santa Cruz de Tenerife"),
                code: "TF".into(),
                province_id,
                location: Default::default(),
            })
            .unwrap();

        let created = resolver.create_county("Tenerife", None).await.unwrap();
        assert_eq!(
            created,
            CreatedPlace {
                country_id,
                province_id: Some(province_id),
                county_id: Some(county_id),
            }
        );
        assert_eq!(store.count(PlaceTable::County).unwrap(), 1);
        assert_eq!(geocoder.queries(), vec!["Tenerife".to_string()]);
    }

    #[tokio::test]
    async fn province_lookup_of_city_type_projects_country_separately() {
        let canary = candidate(
            json!({
                "ISO_3166-1_alpha-2": "ES",
                "ISO_3166-1_alpha-3": "ESP",
                "_type": "city",
                "_category": "place",
                "city": "Canary Islands",
                "state": "Canarias",
                "state_code": "CN",
                "country": "Spain",
                "country_code": "es",
            }),
            28.3,
            -16.6,
        );
        let (resolver, store, geocoder) = resolver(
            StaticGeocoder::new()
                .answer("Canary Islands, Spain", vec![canary])
                .answer("es", vec![spain()])
                .answer("CN", vec![canarias_state()]),
        );

        let created = resolver
            .create_province("Canary Islands", None, Some("Canary Islands, Spain"))
            .await
            .unwrap();

        assert!(created.province_id.is_some());
        assert_eq!(
            geocoder.queries(),
            vec![
                "Canary Islands, Spain".to_string(),
                "es".to_string(),
                "CN".to_string(),
            ]
        );
        assert_eq!(store.count(PlaceTable::Country).unwrap(), 1);
        assert_eq!(store.count(PlaceTable::Province).unwrap(), 1);
        assert_eq!(
            store.place_exists("Canary Islands", PlaceTable::Province).unwrap(),
            created.province_id
        );
    }

    #[tokio::test]
    async fn existing_province_re_derives_its_country() {
        let (resolver, store, geocoder) = resolver(StaticGeocoder::new());
        let country_id = store
            .insert_country(&NewCountry {
                name: "Spain".into(),
                alpha2: Some("ES".into()),
                alpha3: Some("ESP".into()),
                location: Default::default(),
            })
            .unwrap();
        let province_id = store
            .insert_province(&NewProvince {
                name: "Aragon".into(),
                code: Some("AR".into()),
                country_id,
                location: Default::default(),
            })
            .unwrap();

        let created = resolver.create_province("Aragón", None, None).await.unwrap();
        assert_eq!(
            created,
            CreatedPlace {
                country_id,
                province_id: Some(province_id),
                county_id: None,
            }
        );
        assert!(geocoder.queries().is_empty());
    }

    #[tokio::test]
    async fn county_materializes_its_parents() {
        let arona = candidate(
            json!({
                "ISO_3166-1_alpha-2": "ES",
                "_type": "village",
                "city": "Arona",
                "county": "Santa Cruz de Tenerife",
                "state": "Canarias",
                "state_code": "CN",
                "country": "Spain",
                "country_code": "es",
            }),
            28.1,
            -16.7,
        );
        let (resolver, store, _) = resolver(
            StaticGeocoder::new()
                .answer("Arona", vec![arona])
                .answer("es", vec![spain()])
                .answer("CN", vec![canarias_state()]),
        );

        let created = resolver.create_county("Arona", None).await.unwrap();
        let county_id = created.county_id.unwrap();
        let county = store.county_by_id(county_id).unwrap().unwrap();
        assert_eq!(Some(county.province_id), created.province_id);
        assert_eq!(county.code, "");

        let again = resolver.resolve("arona", PlaceLevel::City, None).await.unwrap();
        assert_eq!(again, created);
        assert_eq!(store.count(PlaceTable::County).unwrap(), 1);
        assert_eq!(
            store.place_exists("Canarias", PlaceTable::Province).unwrap(),
            created.province_id
        );
    }

    #[tokio::test]
    async fn empty_names_are_rejected() {
        let (resolver, _, geocoder) = resolver(StaticGeocoder::new());
        let err = resolver.create_country("  ", None).await.unwrap_err();
        assert!(matches!(err, AppError::PlaceNameNotProvided));
        assert!(geocoder.queries().is_empty());
    }
}
