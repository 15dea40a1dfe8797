use crate::config::{base_url, env_string};
use crate::http::build_client;
use crate::maps::resolver::PlaceSearch;
use crate::maps::{Coordinates, PhotoRef, PlaceDetails, Review, SearchCandidate};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub const SEARCH_RADIUS_METERS: u32 = 2_000;
pub const PREVIEW_PHOTO_WIDTH: u32 = 400;
pub const FULL_PHOTO_WIDTH: u32 = 1_600;

const DETAILS_FIELDS: &str = "name,photos,reviews,rating,user_ratings_total,formatted_phone_number,international_phone_number,website";

#[derive(Debug, Clone)]
pub struct MapsConfig {
    pub api_key: Option<String>,
    pub base_url: String,
}

impl MapsConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: env_string("GOOGLE_MAPS_API_KEY"),
            base_url: base_url("GOOGLE_MAPS_BASE_URL", "https://maps.googleapis.com"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PlacesError {
    #[error("GOOGLE_MAPS_API_KEY not configured")]
    MissingApiKey,
    #[error("places API returned {status}{}", detail_suffix(.message))]
    Status {
        status: String,
        message: Option<String>,
    },
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

fn detail_suffix(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|m| format!(": {m}"))
        .unwrap_or_default()
}

#[derive(Clone)]
pub struct PlacesClient {
    http: Client,
    config: MapsConfig,
}

impl PlacesClient {
    pub fn new(config: MapsConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn api_key(&self) -> Result<&str, PlacesError> {
        self.config
            .api_key
            .as_deref()
            .ok_or(PlacesError::MissingApiKey)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T, PlacesError> {
        let url = format!("{}/maps/api/place/{endpoint}/json", self.config.base_url);
        let response = self
            .http
            .get(url)
            .query(params)
            .query(&[("key", self.api_key()?)])
            .send()
            .await
            .map_err(|err| PlacesError::Http(err.to_string()))?;
        crate::metrics::upstream_call("places", response.status().as_u16());
        if !response.status().is_success() {
            return Err(PlacesError::Http(format!("HTTP {}", response.status())));
        }
        response
            .json::<T>()
            .await
            .map_err(|err| PlacesError::InvalidResponse(err.to_string()))
    }

    /// Single details request for the fixed field set. Any status other than
    /// `OK` is an error; there is no retry.
    pub async fn details(&self, place_id: &str) -> Result<PlaceDetails, PlacesError> {
        let envelope: DetailsEnvelope = self
            .get_json(
                "details",
                &[("place_id", place_id), ("fields", DETAILS_FIELDS)],
            )
            .await?;
        if envelope.status != "OK" {
            return Err(PlacesError::Status {
                status: envelope.status,
                message: envelope.error_message,
            });
        }
        let result = envelope
            .result
            .ok_or_else(|| PlacesError::InvalidResponse("details missing result".into()))?;
        debug!(
            target = "onboard.maps",
            place_id = %place_id,
            photos = result.photos.len(),
            reviews = result.reviews.len(),
            "place_details_fetched"
        );
        Ok(result.into_details())
    }

    /// Exchanges a photo reference for the upstream image response so the
    /// caller can stream it. The reference only works with our credential.
    pub async fn photo(
        &self,
        reference: &str,
        max_width: u32,
    ) -> Result<reqwest::Response, PlacesError> {
        let url = format!("{}/maps/api/place/photo", self.config.base_url);
        let width = max_width.to_string();
        let response = self
            .http
            .get(url)
            .query(&[
                ("maxwidth", width.as_str()),
                ("photoreference", reference),
                ("key", self.api_key()?),
            ])
            .send()
            .await
            .map_err(|err| PlacesError::Http(err.to_string()))?;
        crate::metrics::upstream_call("places_photo", response.status().as_u16());
        if !response.status().is_success() {
            return Err(PlacesError::Status {
                status: response.status().as_u16().to_string(),
                message: Some("Failed to fetch image".into()),
            });
        }
        Ok(response)
    }

    async fn search(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<SearchCandidate>, PlacesError> {
        let envelope: SearchEnvelope = self.get_json(endpoint, params).await?;
        match envelope.status.as_str() {
            "OK" | "ZERO_RESULTS" => Ok(envelope
                .results
                .into_iter()
                .filter(|result| !result.place_id.is_empty())
                .map(SearchResult::into_candidate)
                .collect()),
            _ => Err(PlacesError::Status {
                status: envelope.status,
                message: envelope.error_message,
            }),
        }
    }
}

impl PlaceSearch for PlacesClient {
    async fn nearby_search(
        &self,
        coordinates: Coordinates,
        keyword: &str,
    ) -> Result<Vec<SearchCandidate>, PlacesError> {
        let location = format!("{},{}", coordinates.lat, coordinates.lng);
        let radius = SEARCH_RADIUS_METERS.to_string();
        let mut params = vec![("location", location.as_str()), ("radius", radius.as_str())];
        if !keyword.trim().is_empty() {
            params.push(("keyword", keyword));
        }
        self.search("nearbysearch", &params).await
    }

    async fn text_search(&self, query: &str) -> Result<Vec<SearchCandidate>, PlacesError> {
        self.search("textsearch", &[("query", query)]).await
    }
}

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    #[serde(default)]
    results: Vec<SearchResult>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    place_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    geometry: Option<Geometry>,
}

impl SearchResult {
    fn into_candidate(self) -> SearchCandidate {
        SearchCandidate {
            place_id: self.place_id,
            name: self.name,
            location: self.geometry.map(|geometry| geometry.location),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: Coordinates,
}

#[derive(Debug, Deserialize)]
struct DetailsEnvelope {
    #[serde(default)]
    result: Option<DetailsResult>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetailsResult {
    #[serde(default)]
    name: String,
    #[serde(default)]
    photos: Vec<WirePhoto>,
    #[serde(default)]
    reviews: Vec<WireReview>,
    rating: Option<f64>,
    user_ratings_total: Option<u32>,
    formatted_phone_number: Option<String>,
    international_phone_number: Option<String>,
    website: Option<String>,
}

impl DetailsResult {
    fn into_details(self) -> PlaceDetails {
        let phone = self
            .international_phone_number
            .or(self.formatted_phone_number)
            .filter(|value| !value.trim().is_empty());
        PlaceDetails {
            name: self.name,
            photos: self
                .photos
                .into_iter()
                .filter(|photo| !photo.photo_reference.is_empty())
                .map(|photo| PhotoRef {
                    reference: photo.photo_reference,
                    width: photo.width,
                    height: photo.height,
                })
                .collect(),
            reviews: self.reviews.into_iter().map(WireReview::into_review).collect(),
            rating: self.rating,
            total_reviews: self.user_ratings_total,
            phone,
            website: self.website.filter(|value| !value.trim().is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WirePhoto {
    #[serde(default)]
    photo_reference: String,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
}

#[derive(Debug, Deserialize)]
struct WireReview {
    #[serde(default)]
    author_name: String,
    #[serde(default)]
    rating: f64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    relative_time_description: String,
}

impl WireReview {
    fn into_review(self) -> Review {
        Review {
            author_name: self.author_name,
            rating: self.rating.round().clamp(1.0, 5.0) as u8,
            text: self.text,
            relative_time: self.relative_time_description,
        }
    }
}
