use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// Place chosen by the resolver. `name` is the upstream display name, which may
/// differ from the hint parsed out of the URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPlace {
    pub place_id: String,
    pub name: String,
}

/// Opaque photo token. Exchanged for bytes on demand; never cached locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoRef {
    pub reference: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub author_name: String,
    pub rating: u8,
    pub text: String,
    #[serde(default)]
    pub relative_time: String,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceDetails {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub photos: Vec<PhotoRef>,
    #[serde(default)]
    pub reviews: Vec<Review>,
    pub rating: Option<f64>,
    pub total_reviews: Option<u32>,
    pub phone: Option<String>,
    pub website: Option<String>,
}

impl PlaceDetails {
    pub fn photo_references(&self, limit: usize) -> Vec<String> {
        self.photos
            .iter()
            .take(limit)
            .map(|photo| photo.reference.clone())
            .collect()
    }
}

/// One candidate from a nearby or text search, in upstream ranking order.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchCandidate {
    pub place_id: String,
    pub name: String,
    pub location: Option<Coordinates>,
}
