use crate::config::{env_parse, env_string};
use crate::http::build_client;
use crate::maps::{Coordinates, PhotoRef, Review};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use thiserror::Error;
use tracing::{info, warn};

/// Platform limit on photos per imported listing.
pub const DEFAULT_MAX_PHOTOS: usize = 10;

#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub max_photos: usize,
}

impl PublishConfig {
    pub fn from_env() -> Self {
        Self {
            api_url: env_string("FURSAT_API_URL").map(|url| url.trim_end_matches('/').to_string()),
            api_key: env_string("FURSATPHOTO_API_KEY"),
            max_photos: env_parse::<usize>("FURSAT_MAX_PHOTOS")
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_MAX_PHOTOS),
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("{0} not configured")]
    NotConfigured(&'static str),
    #[error("listing service is unreachable ({0}); check FURSAT_API_URL")]
    Unreachable(String),
    #[error("listing service rejected the import (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishPhoto {
    pub photo_reference: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

impl From<&PhotoRef> for PublishPhoto {
    fn from(photo: &PhotoRef) -> Self {
        Self {
            photo_reference: photo.reference.clone(),
            width: photo.width,
            height: photo.height,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishReview {
    pub author_name: String,
    pub rating: u8,
    pub text: String,
}

impl From<&Review> for PublishReview {
    fn from(review: &Review) -> Self {
        Self {
            author_name: review.author_name.clone(),
            rating: review.rating,
            text: review.text.clone(),
        }
    }
}

/// Everything the listing service needs to draft a listing.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingDraft {
    pub place_name: String,
    pub rating: Option<f64>,
    pub total_reviews: Option<u32>,
    #[serde(default)]
    pub photos: Vec<PublishPhoto>,
    #[serde(default)]
    pub reviews: Vec<PublishReview>,
    pub coordinates: Coordinates,
    #[serde(default)]
    pub location: String,
    pub google_maps_url: Option<String>,
    #[serde(default)]
    pub generated_description: String,
    pub host_name: Option<String>,
    pub host_email: Option<String>,
    pub host_phone: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportRequest<'a> {
    #[serde(flatten)]
    draft: &'a ListingDraft,
    api_key: &'a str,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReceipt {
    pub listing_id: Option<String>,
    pub edit_url: Option<String>,
}

#[derive(Clone)]
pub struct FursatClient {
    http: Client,
    config: PublishConfig,
}

impl FursatClient {
    pub fn new(config: PublishConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.api_url.is_some() && self.config.api_key.is_some()
    }

    pub fn max_photos(&self) -> usize {
        self.config.max_photos
    }

    pub async fn publish(&self, draft: &ListingDraft) -> Result<PublishReceipt, PublishError> {
        let api_url = self
            .config
            .api_url
            .as_deref()
            .ok_or(PublishError::NotConfigured("FURSAT_API_URL"))?;
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(PublishError::NotConfigured("FURSATPHOTO_API_KEY"))?;

        let mut capped = draft.clone();
        capped.photos.truncate(self.config.max_photos);
        let url = format!("{api_url}/api/fursatphoto/import");
        let response = self
            .http
            .post(url)
            .json(&ImportRequest {
                draft: &capped,
                api_key,
            })
            .send()
            .await
            .map_err(|err| {
                warn!(target = "onboard.fursat", error = %err, "publish_unreachable");
                PublishError::Unreachable(err.to_string())
            })?;

        let status = response.status();
        crate::metrics::upstream_call("fursat", status.as_u16());
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(PublishError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let receipt: PublishReceipt = response
            .json()
            .await
            .map_err(|err| PublishError::InvalidResponse(err.to_string()))?;
        info!(
            target = "onboard.fursat",
            listing_id = receipt.listing_id.as_deref().unwrap_or(""),
            photos = capped.photos.len(),
            "listing_published"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn draft(photo_count: usize) -> ListingDraft {
        ListingDraft {
            place_name: "Hill Camp".into(),
            rating: Some(4.8),
            total_reviews: Some(18),
            photos: (0..photo_count)
                .map(|i| PublishPhoto {
                    photo_reference: format!("ref-{i}"),
                    width: 800,
                    height: 600,
                })
                .collect(),
            reviews: vec![],
            coordinates: Coordinates { lat: 27.1, lng: 88.4 },
            location: "Hill Camp".into(),
            google_maps_url: None,
            generated_description: "Nice place".into(),
            host_name: None,
            host_email: None,
            host_phone: None,
        }
    }

    fn client(url: String, api_key: Option<&str>) -> FursatClient {
        FursatClient::new(PublishConfig {
            api_url: Some(url),
            api_key: api_key.map(str::to_string),
            max_photos: DEFAULT_MAX_PHOTOS,
        })
    }

    #[tokio::test]
    async fn publish_caps_photos_and_sends_secret() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/fursatphoto/import"))
            .and(body_partial_json(json!({
                "placeName": "Hill Camp",
                "apiKey": "shh",
                "coordinates": {"lat": 27.1, "lng": 88.4},
                "generatedDescription": "Nice place"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "listingId": "lst_1",
                "editUrl": "/host/listings/lst_1/edit"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = client(server.uri(), Some("shh"))
            .publish(&draft(14))
            .await
            .expect("published");
        assert_eq!(receipt.listing_id.as_deref(), Some("lst_1"));
        assert_eq!(receipt.edit_url.as_deref(), Some("/host/listings/lst_1/edit"));

        let requests = server.received_requests().await.expect("recorded");
        let sent: Value = serde_json::from_slice(&requests[0].body).expect("json body");
        assert_eq!(sent["photos"].as_array().map(Vec::len), Some(10));
        assert_eq!(sent["photos"][0]["photo_reference"], "ref-0");
    }

    #[tokio::test]
    async fn rejection_carries_service_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "Invalid API key"})))
            .mount(&server)
            .await;
        let err = client(server.uri(), Some("wrong"))
            .publish(&draft(1))
            .await
            .expect_err("rejected");
        assert!(matches!(
            err,
            PublishError::Rejected { status: 401, ref message } if message == "Invalid API key"
        ));
    }

    #[tokio::test]
    async fn connection_failure_is_unreachable() {
        let err = client("http://127.0.0.1:9".into(), Some("shh"))
            .publish(&draft(1))
            .await
            .expect_err("unreachable");
        assert!(matches!(err, PublishError::Unreachable(_)));
        assert!(err.to_string().contains("FURSAT_API_URL"));
    }

    #[tokio::test]
    async fn missing_key_is_not_configured() {
        let publisher = client("http://127.0.0.1:9".into(), None);
        assert!(!publisher.is_configured());
        assert!(matches!(
            publisher.publish(&draft(1)).await,
            Err(PublishError::NotConfigured("FURSATPHOTO_API_KEY"))
        ));
    }

    #[tokio::test]
    async fn missing_url_is_not_configured_rather_than_unreachable() {
        let publisher = FursatClient::new(PublishConfig {
            api_url: None,
            api_key: Some("shh".into()),
            max_photos: DEFAULT_MAX_PHOTOS,
        });
        assert!(!publisher.is_configured());
        let err = publisher.publish(&draft(1)).await.expect_err("not configured");
        assert!(matches!(err, PublishError::NotConfigured("FURSAT_API_URL")));
    }

    #[tokio::test]
    async fn undecodable_success_body_keeps_the_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;
        let err = client(server.uri(), Some("shh"))
            .publish(&draft(1))
            .await
            .expect_err("invalid body");
        let PublishError::InvalidResponse(message) = err else {
            panic!("expected InvalidResponse, got {err:?}");
        };
        assert!(message.contains("decoding"), "{message}");
    }
}
