use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

impl Point {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat: Some(lat),
            lng: Some(lng),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.lat.is_some() && self.lng.is_some()
    }
}

/// One result as returned by the geocoding provider, before any renaming.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCandidate {
    #[serde(default)]
    pub components: Map<String, Value>,
    #[serde(default)]
    pub geometry: Option<Geometry>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Geometry {
    pub lat: f64,
    pub lng: f64,
}

/// The three levels of the persisted hierarchy, named the way the provider
/// names them: provinces are `state`, counties are `city`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceLevel {
    Country,
    State,
    City,
}

impl PlaceLevel {
    pub fn as_tag(&self) -> &'static str {
        match self {
            PlaceLevel::Country => "country",
            PlaceLevel::State => "state",
            PlaceLevel::City => "city",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "country" => Some(PlaceLevel::Country),
            "state" | "province" => Some(PlaceLevel::State),
            "city" | "county" => Some(PlaceLevel::City),
            _ => None,
        }
    }

    pub fn coarser(&self) -> Option<PlaceLevel> {
        match self {
            PlaceLevel::Country => None,
            PlaceLevel::State => Some(PlaceLevel::Country),
            PlaceLevel::City => Some(PlaceLevel::State),
        }
    }
}

/// Administrative type of a normalized result. Tags the alias table cannot
/// coarsen into a hierarchy level are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaceKind {
    Level(PlaceLevel),
    Other(String),
}

impl PlaceKind {
    pub fn from_tag(tag: &str) -> Self {
        match PlaceLevel::parse(canonical_type(tag)) {
            Some(level) => PlaceKind::Level(level),
            None => PlaceKind::Other(tag.to_string()),
        }
    }

    pub fn level(&self) -> Option<PlaceLevel> {
        match self {
            PlaceKind::Level(level) => Some(*level),
            PlaceKind::Other(_) => None,
        }
    }

    pub fn as_tag(&self) -> &str {
        match self {
            PlaceKind::Level(level) => level.as_tag(),
            PlaceKind::Other(tag) => tag,
        }
    }
}

const TERRITORY: &str = "territory";

// Provider subtypes folded into the three hierarchy levels.
const TYPE_ALIASES: &[(&str, &str)] = &[
    ("province", "state"),
    ("region", "state"),
    ("state_district", "state"),
    ("archipelago", "state"),
    ("island", "state"),
    ("county", "city"),
    ("municipality", "city"),
    ("town", "city"),
    ("village", "city"),
    ("hamlet", "city"),
    ("city_district", "city"),
    ("suburb", "city"),
    ("neighbourhood", "city"),
    ("local_administrative_area", "city"),
];

/// Maps a provider type tag through the alias table; unknown tags pass through.
pub fn canonical_type(tag: &str) -> &str {
    TYPE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == tag)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(tag)
}

/// Renames provider keys to the canonical schema without dropping anything.
/// `territory` results become `state` results.
pub fn canonical_components(components: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::with_capacity(components.len());
    for (key, value) in components {
        let renamed = match key.as_str() {
            "ISO_3166-1_alpha-2" => "alpha2",
            "ISO_3166-1_alpha-3" => "alpha3",
            "_type" => "type",
            "_category" => "category",
            other => other,
        };
        out.insert(renamed.to_string(), value.clone());
    }

    if out.get("type").and_then(Value::as_str) == Some(TERRITORY) {
        out.insert("type".into(), Value::String("state".into()));
        if let Some(territory) = out.remove(TERRITORY) {
            out.insert("state".into(), territory);
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceInfo {
    pub query: String,
    pub alpha2: Option<String>,
    pub alpha3: Option<String>,
    pub category: Option<String>,
    pub kind: PlaceKind,
    pub continent: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub location: Option<Point>,
    pub city: Option<String>,
    pub county: Option<String>,
    pub county_code: Option<String>,
    pub political_union: Option<String>,
    pub state: Option<String>,
    pub state_code: Option<String>,
}

type Getter = fn(&PlaceInfo) -> Option<&str>;
type Setter = fn(&mut PlaceInfo, String);

struct LevelFields {
    name: Getter,
    set_name: Setter,
    code: Getter,
}

fn level_fields(level: PlaceLevel) -> LevelFields {
    match level {
        PlaceLevel::Country => LevelFields {
            name: |info| info.country.as_deref(),
            set_name: |info, value| info.country = Some(value),
            code: |info| info.country_code.as_deref(),
        },
        PlaceLevel::State => LevelFields {
            name: |info| info.state.as_deref(),
            set_name: |info, value| info.state = Some(value),
            code: |info| info.state_code.as_deref(),
        },
        PlaceLevel::City => LevelFields {
            name: |info| info.city.as_deref(),
            set_name: |info, value| info.city = Some(value),
            code: |info| info.county_code.as_deref(),
        },
    }
}

impl PlaceInfo {
    /// Builds the normalized record for one candidate. `query` is the string
    /// the candidate was fetched with; it fills the self-named field when the
    /// provider left it out.
    pub fn from_candidate(query: &str, candidate: &RawCandidate) -> AppResult<Self> {
        let components = canonical_components(&candidate.components);
        let text = |key: &str| -> Option<String> {
            components
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let tag = text("type").ok_or_else(|| {
            AppError::MalformedRow(format!("candidate for {query:?} has no _type"))
        })?;

        let mut info = Self {
            query: query.to_string(),
            alpha2: text("alpha2"),
            alpha3: text("alpha3"),
            category: text("category"),
            kind: PlaceKind::from_tag(&tag),
            continent: text("continent"),
            country: text("country"),
            country_code: text("country_code"),
            location: candidate.geometry.map(|g| Point::new(g.lat, g.lng)),
            city: text("city"),
            county: text("county"),
            county_code: text("county_code"),
            political_union: text("political_union"),
            state: text("state"),
            state_code: text("state_code"),
        };

        if let Some(level) = info.kind.level() {
            if info.level_name(level).is_none() {
                // the provider may only expose the aliased key, e.g. `province`
                let fallback = text(&tag).unwrap_or_else(|| query.to_string());
                info.set_level_name(level, fallback);
            }
        }

        Ok(info)
    }

    pub fn level_name(&self, level: PlaceLevel) -> Option<&str> {
        (level_fields(level).name)(self)
    }

    pub fn level_code(&self, level: PlaceLevel) -> Option<&str> {
        (level_fields(level).code)(self)
    }

    pub fn set_level_name(&mut self, level: PlaceLevel, value: String) {
        (level_fields(level).set_name)(self, value)
    }

    /// Name carried by the field named after the result's own type.
    pub fn own_name(&self) -> Option<&str> {
        match &self.kind {
            PlaceKind::Level(level) => self.level_name(*level),
            PlaceKind::Other(_) => Some(self.query.as_str()),
        }
    }

    pub fn is_level(&self, level: PlaceLevel) -> bool {
        self.kind == PlaceKind::Level(level)
    }

    /// Whether the result's country code agrees with its ISO alpha-2 code.
    /// Dependent territories report a code of their own and fail this.
    pub fn describes_country(&self) -> bool {
        match (&self.country_code, &self.alpha2) {
            (Some(code), Some(alpha2)) => code.eq_ignore_ascii_case(alpha2),
            _ => false,
        }
    }
}

#[cfg(test)]
pub(crate) fn candidate(components: Value, lat: f64, lng: f64) -> RawCandidate {
    RawCandidate {
        components: components.as_object().cloned().unwrap_or_default(),
        geometry: Some(Geometry { lat, lng }),
    }
}
