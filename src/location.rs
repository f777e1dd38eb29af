use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::geocoder::GeocodeService;
use crate::matching::select_best;
use crate::place_info::{canonical_type, PlaceInfo, PlaceLevel, Point, RawCandidate};

/// Coordinates of `target` for the place described by `info`.
///
/// When `info` is itself of the target level its own point is returned (a
/// missing point is not an error). Otherwise a second lookup is issued,
/// anchored on the target level's identity.
pub async fn project(
    geocoder: &GeocodeService,
    info: &PlaceInfo,
    target: PlaceLevel,
) -> AppResult<Point> {
    if info.is_level(target) {
        return Ok(info.location.unwrap_or_default());
    }

    let query = secondary_query(info, target).ok_or_else(|| {
        AppError::PlaceInfoFetch(format!(
            "no identity to look up the {} of {:?}",
            target.as_tag(),
            info.query
        ))
    })?;
    debug!(
        query,
        target = target.as_tag(),
        kind = info.kind.as_tag(),
        "projecting location through a secondary lookup"
    );

    let candidates = geocoder.fetch_candidates(query).await.map_err(|err| match err {
        AppError::GeocodeUnavailable { .. } | AppError::Http(_) => {
            AppError::PlaceInfoFetch(format!("{query}: {err}"))
        }
        other => other,
    })?;
    let chosen = pick_for_level(query, &candidates, target)?;

    Ok(chosen
        .geometry
        .map(|g| Point::new(g.lat, g.lng))
        .unwrap_or_default())
}

/// First non-empty of: the target's code, the target's name, the coarser
/// level's code, the coarser level's name, the place's own name.
pub fn secondary_query(info: &PlaceInfo, target: PlaceLevel) -> Option<&str> {
    let mut chain: Vec<Option<&str>> = vec![info.level_code(target)];
    if target == PlaceLevel::City {
        chain.push(info.county.as_deref());
    }
    chain.push(info.level_name(target));
    if let Some(coarser) = target.coarser() {
        chain.push(info.level_code(coarser));
        chain.push(info.level_name(coarser));
    }
    chain.push(info.own_name());

    chain
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|value| !value.is_empty())
}

// Codes rarely resemble the names they stand for, so a candidate already at
// the target level wins over name similarity.
fn pick_for_level<'a>(
    query: &str,
    candidates: &'a [RawCandidate],
    target: PlaceLevel,
) -> AppResult<&'a RawCandidate> {
    if candidates.is_empty() {
        return Err(AppError::PlaceInfoFetch(format!(
            "secondary lookup for {query:?} returned nothing"
        )));
    }

    let at_level = candidates
        .iter()
        .find(|candidate| candidate_level(candidate) == Some(target));
    if let Some(candidate) = at_level {
        return Ok(candidate);
    }

    select_best(query, candidates).map_err(|_| {
        AppError::PlaceInfoFetch(format!(
            "secondary lookup for {query:?} matched no {}",
            target.as_tag()
        ))
    })
}

fn candidate_level(candidate: &RawCandidate) -> Option<PlaceLevel> {
    let tag = candidate.components.get("_type")?.as_str()?;
    if tag == "territory" {
        return Some(PlaceLevel::State);
    }
    PlaceLevel::parse(canonical_type(tag))
}
