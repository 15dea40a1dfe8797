//! Ordered-fallback place resolution.
//!
//! 1. Nearby search around the parsed coordinates with the name as keyword;
//!    the first result whose name contains the hint (case-insensitive) wins,
//!    otherwise the first result.
//! 2. Free-text search on the hint alone; first result wins.
//! 3. Otherwise [`ResolveError::NotFound`].

use crate::maps::{Coordinates, PlacesError, ResolvedPlace, SearchCandidate};
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;
use tracing::{info, warn};

pub trait PlaceSearch {
    fn nearby_search(
        &self,
        coordinates: Coordinates,
        keyword: &str,
    ) -> impl Future<Output = Result<Vec<SearchCandidate>, PlacesError>> + Send;

    fn text_search(
        &self,
        query: &str,
    ) -> impl Future<Output = Result<Vec<SearchCandidate>, PlacesError>> + Send;
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no place found for \"{name_hint}\"")]
    NotFound { name_hint: String },
    #[error(transparent)]
    Search(#[from] PlacesError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveStrategy {
    NearbyNameMatch,
    NearbyFirst,
    TextSearch,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub place: ResolvedPlace,
    pub strategy: ResolveStrategy,
}

/// Prefers a candidate whose name contains `hint`, else the top-ranked one.
pub fn pick_candidate<'a>(
    candidates: &'a [SearchCandidate],
    hint: &str,
) -> Option<(&'a SearchCandidate, bool)> {
    let needle = hint.trim().to_lowercase();
    if !needle.is_empty()
        && let Some(matched) = candidates
            .iter()
            .find(|candidate| candidate.name.to_lowercase().contains(&needle))
    {
        return Some((matched, true));
    }
    candidates.first().map(|candidate| (candidate, false))
}

pub async fn resolve<S>(
    search: &S,
    coordinates: Coordinates,
    name_hint: &str,
) -> Result<Resolution, ResolveError>
where
    S: PlaceSearch + Sync,
{
    // A failing nearby search is treated like an empty one; text search still runs.
    let nearby = match search.nearby_search(coordinates, name_hint).await {
        Ok(results) => results,
        Err(err) => {
            warn!(target = "onboard.maps", error = %err, "nearby_search_failed_falling_back");
            Vec::new()
        }
    };

    if let Some((candidate, matched)) = pick_candidate(&nearby, name_hint) {
        info!(
            target = "onboard.maps",
            place_id = %candidate.place_id,
            matched,
            candidates = nearby.len(),
            "resolved_via_nearby"
        );
        return Ok(Resolution {
            place: to_place(candidate),
            strategy: if matched {
                ResolveStrategy::NearbyNameMatch
            } else {
                ResolveStrategy::NearbyFirst
            },
        });
    }

    if name_hint.trim().is_empty() {
        return Err(ResolveError::NotFound {
            name_hint: name_hint.to_string(),
        });
    }

    let text = search.text_search(name_hint).await?;
    match text.first() {
        Some(candidate) => {
            info!(
                target = "onboard.maps",
                place_id = %candidate.place_id,
                "resolved_via_text_search"
            );
            Ok(Resolution {
                place: to_place(candidate),
                strategy: ResolveStrategy::TextSearch,
            })
        }
        None => Err(ResolveError::NotFound {
            name_hint: name_hint.to_string(),
        }),
    }
}

fn to_place(candidate: &SearchCandidate) -> ResolvedPlace {
    ResolvedPlace {
        place_id: candidate.place_id.clone(),
        name: candidate.name.clone(),
    }
}
