use crate::config::{base_url, env_or, env_string};
use crate::http::build_client;
use crate::listing::columns::column_letter;
use crate::sheets::auth::{SheetsAuthError, SheetsCredentials, TokenSource};
use crate::sheets::sync::ListingsSheet;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::warn;
use urlencoding::encode;

pub const DEFAULT_RANGE: &str = "Listings";

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("{0} not configured")]
    NotConfigured(&'static str),
    #[error(transparent)]
    Auth(#[from] SheetsAuthError),
    #[error("request failed: {0}")]
    Request(String),
    #[error("sheets API returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("sheet has no header row")]
    MissingHeaderRow,
}

#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub spreadsheet_id: Option<String>,
    pub range: String,
    pub base_url: String,
    pub token_url: String,
    pub credentials: Option<SheetsCredentials>,
}

impl SheetsConfig {
    pub fn from_env() -> Self {
        let credentials = match (
            env_string("GOOGLE_SHEETS_ACCESS_TOKEN"),
            env_string("GOOGLE_CREDENTIALS_JSON"),
        ) {
            (Some(token), _) => Some(SheetsCredentials::Static(token)),
            (None, Some(encoded)) => match SheetsCredentials::from_base64_json(&encoded) {
                Ok(credentials) => Some(credentials),
                Err(err) => {
                    warn!(target = "onboard.sheets", error = %err, "ignoring GOOGLE_CREDENTIALS_JSON");
                    None
                }
            },
            (None, None) => None,
        };
        Self {
            spreadsheet_id: env_string("SPREADSHEET_ID"),
            range: env_or("SHEET_RANGE", DEFAULT_RANGE),
            base_url: base_url("GOOGLE_SHEETS_BASE_URL", "https://sheets.googleapis.com"),
            token_url: env_or("GOOGLE_OAUTH_TOKEN_URL", "https://oauth2.googleapis.com/token"),
            credentials,
        }
    }
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

/// Google Sheets v4 values API over a single named range.
#[derive(Clone)]
pub struct SheetsClient {
    http: Client,
    spreadsheet_id: Option<String>,
    range: String,
    base_url: String,
    tokens: Option<TokenSource>,
}

impl SheetsClient {
    pub fn new(config: SheetsConfig) -> Self {
        let tokens = config
            .credentials
            .map(|credentials| TokenSource::new(credentials, config.token_url));
        Self {
            http: build_client(),
            spreadsheet_id: config.spreadsheet_id,
            range: config.range,
            base_url: config.base_url,
            tokens,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.spreadsheet_id.is_some() && self.tokens.is_some()
    }

    fn values_url(&self, range: &str) -> Result<String, SheetError> {
        let id = self
            .spreadsheet_id
            .as_deref()
            .ok_or(SheetError::NotConfigured("SPREADSHEET_ID"))?;
        Ok(format!(
            "{}/v4/spreadsheets/{}/values/{}",
            self.base_url,
            encode(id),
            range
        ))
    }

    fn sheet_name(&self) -> String {
        encode(&self.range).into_owned()
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, SheetError> {
        let tokens = self
            .tokens
            .as_ref()
            .ok_or(SheetError::NotConfigured("GOOGLE_CREDENTIALS_JSON"))?;
        let token = tokens.access_token(&self.http).await?;
        Ok(request.bearer_auth(token))
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, SheetError> {
        let response = self
            .authorized(request)
            .await?
            .send()
            .await
            .map_err(|err| SheetError::Request(err.to_string()))?;
        let status = response.status();
        crate::metrics::upstream_call("sheets", status.as_u16());
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SheetError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        Ok(response)
    }
}

/// Google wraps failures as `{"error": {"message": ...}}`; fall back to the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(200).collect())
}

impl ListingsSheet for SheetsClient {
    async fn read_rows(&self) -> Result<Vec<Vec<String>>, SheetError> {
        let url = self.values_url(&self.sheet_name())?;
        let response = self.send(self.http.get(url)).await?;
        let payload: ValueRange = response
            .json()
            .await
            .map_err(|err| SheetError::InvalidResponse(err.to_string()))?;
        Ok(payload.values)
    }

    async fn append_row(&self, row: Vec<String>) -> Result<(), SheetError> {
        let url = self.values_url(&format!("{}:append", self.sheet_name()))?;
        let request = self
            .http
            .post(url)
            .query(&[
                ("valueInputOption", "USER_ENTERED"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&json!({ "values": [row] }));
        self.send(request).await?;
        Ok(())
    }

    async fn update_row(&self, row_number: usize, row: Vec<String>) -> Result<(), SheetError> {
        let last = column_letter(row.len().max(1));
        let target = format!("{}!A{row_number}:{last}{row_number}", self.sheet_name());
        let url = self.values_url(&target)?;
        let request = self
            .http
            .put(url)
            .query(&[("valueInputOption", "USER_ENTERED")])
            .json(&json!({ "values": [row] }));
        self.send(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> SheetsClient {
        SheetsClient::new(SheetsConfig {
            spreadsheet_id: Some("sheet-1".into()),
            range: DEFAULT_RANGE.into(),
            base_url: server.uri(),
            token_url: format!("{}/token", server.uri()),
            credentials: Some(SheetsCredentials::Static("tok".into())),
        })
    }

    #[tokio::test]
    async fn read_rows_returns_values_or_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/sheet-1/values/Listings"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "range": "Listings!A1:B2",
                "values": [["Property Name", "Beds"], ["Hill Camp", "3"]]
            })))
            .mount(&server)
            .await;
        let rows = client_for(&server).read_rows().await.expect("rows");
        assert_eq!(rows, vec![vec!["Property Name", "Beds"], vec!["Hill Camp", "3"]]);
    }

    #[tokio::test]
    async fn append_uses_user_entered_values() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v4/spreadsheets/sheet-1/values/Listings:append"))
            .and(query_param("valueInputOption", "USER_ENTERED"))
            .and(body_json(json!({"values": [["Hill Camp", "Yes"]]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        client_for(&server)
            .append_row(vec!["Hill Camp".into(), "Yes".into()])
            .await
            .expect("appended");
    }

    #[tokio::test]
    async fn update_targets_the_full_row_range() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v4/spreadsheets/sheet-1/values/Listings!A7:C7"))
            .and(query_param("valueInputOption", "USER_ENTERED"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        client_for(&server)
            .update_row(7, vec!["a".into(), "b".into(), "c".into()])
            .await
            .expect("updated");
    }

    #[tokio::test]
    async fn upstream_errors_carry_google_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"code": 403, "message": "The caller does not have permission"}
            })))
            .mount(&server)
            .await;
        let err = client_for(&server).read_rows().await.expect_err("forbidden");
        assert!(matches!(
            err,
            SheetError::Status { status: 403, ref message } if message == "The caller does not have permission"
        ));
    }

    #[tokio::test]
    async fn missing_configuration_is_reported_before_any_request() {
        let client = SheetsClient::new(SheetsConfig {
            spreadsheet_id: None,
            range: DEFAULT_RANGE.into(),
            base_url: "http://127.0.0.1:9".into(),
            token_url: "http://127.0.0.1:9/token".into(),
            credentials: None,
        });
        assert!(!client.is_configured());
        assert!(matches!(
            client.read_rows().await,
            Err(SheetError::NotConfigured("SPREADSHEET_ID"))
        ));
    }
}
