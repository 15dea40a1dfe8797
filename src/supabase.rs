use crate::config::{env_or, env_string};
use crate::http::build_client;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Secondary listings store: a PostgREST table of already-live listings.
#[derive(Debug, Clone)]
pub struct SupabaseClient {
    base_url: String,
    service_key: String,
    table: String,
    http: Client,
}

#[derive(Debug, Error)]
pub enum SupabaseError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
}

#[derive(Debug, Clone, Deserialize)]
struct ListingRecord {
    #[serde(default)]
    stay_name: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecondaryListing {
    pub name: String,
    pub title: String,
    pub location: String,
}

impl ListingRecord {
    fn into_listing(self) -> Option<SecondaryListing> {
        if self
            .status
            .as_deref()
            .is_some_and(|status| status.eq_ignore_ascii_case("deleted"))
        {
            return None;
        }
        let trimmed = |value: Option<String>| value.map(|v| v.trim().to_string()).unwrap_or_default();
        let title = trimmed(self.title);
        let name = Some(trimmed(self.stay_name))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| title.clone());
        if name.is_empty() {
            return None;
        }
        Some(SecondaryListing {
            name,
            title,
            location: trimmed(self.location),
        })
    }
}

impl SupabaseClient {
    pub fn from_env() -> Option<Self> {
        let base_url = env_string("SUPABASE_URL")?;
        let service_key = env_string("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|| env_string("SUPABASE_SERVICE_KEY"))
            .or_else(|| env_string("SUPABASE_KEY"))?;
        Some(Self::new(
            &base_url,
            service_key,
            env_or("SUPABASE_LISTINGS_TABLE", "listings"),
        ))
    }

    pub fn new(base_url: &str, service_key: String, table: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            table,
            http: build_client(),
        }
    }

    /// Listings that are not soft-deleted, named by `stay_name` or else `title`.
    pub async fn fetch_listings(&self) -> Result<Vec<SecondaryListing>, SupabaseError> {
        let url = format!(
            "{}/rest/v1/{}?select=stay_name,title,location,status",
            self.base_url, self.table
        );
        let response = self
            .http
            .get(url)
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .send()
            .await
            .map_err(|err| SupabaseError::Request(err.to_string()))?;

        crate::metrics::upstream_call("supabase", response.status().as_u16());
        if !response.status().is_success() {
            return Err(SupabaseError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let payload: Vec<ListingRecord> = response
            .json()
            .await
            .map_err(|err| SupabaseError::Deserialize(err.to_string()))?;
        Ok(payload
            .into_iter()
            .filter_map(ListingRecord::into_listing)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetch_skips_deleted_and_nameless_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/listings"))
            .and(query_param("select", "stay_name,title,location,status"))
            .and(header("apikey", "svc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"stay_name": " Hill Camp ", "title": "Eco cottage near the river", "location": "Kalimpong", "status": "live"},
                {"stay_name": null, "title": "Riverside", "location": null, "status": null},
                {"stay_name": "Old Villa", "title": "Old Villa", "status": "deleted"},
                {"stay_name": "", "title": "", "status": "draft"}
            ])))
            .mount(&server)
            .await;

        let client = SupabaseClient::new(&server.uri(), "svc".into(), "listings".into());
        let listings = client.fetch_listings().await.expect("listings");
        assert_eq!(
            listings,
            vec![
                SecondaryListing {
                    name: "Hill Camp".into(),
                    title: "Eco cottage near the river".into(),
                    location: "Kalimpong".into(),
                },
                SecondaryListing {
                    name: "Riverside".into(),
                    title: "Riverside".into(),
                    location: String::new(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn non_success_is_a_request_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let client = SupabaseClient::new(&server.uri(), "bad".into(), "listings".into());
        assert!(matches!(
            client.fetch_listings().await,
            Err(SupabaseError::Request(_))
        ));
    }
}
