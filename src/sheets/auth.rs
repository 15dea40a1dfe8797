use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{sync::Mutex, time::Instant};
use tracing::debug;

pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for a service-account assertion; Google caps it at one hour.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Refresh a little before Google says the token expires.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum SheetsAuthError {
    #[error("GOOGLE_CREDENTIALS_JSON is not valid base64 JSON: {0}")]
    InvalidCredentials(String),
    #[error("unsupported credential type \"{0}\"; expected service_account or authorized_user")]
    UnsupportedCredentialType(String),
    #[error("could not sign service account assertion: {0}")]
    Signing(String),
    #[error("oauth request failed: {0}")]
    Request(String),
}

/// How the sheet client obtains a bearer token.
#[derive(Debug, Clone)]
pub enum SheetsCredentials {
    Static(String),
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
    ServiceAccount {
        client_email: String,
        private_key: String,
        token_uri: Option<String>,
    },
}

#[derive(Deserialize)]
struct CredentialFile {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    client_id: String,
    #[serde(default)]
    client_secret: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    client_email: String,
    #[serde(default)]
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
}

impl SheetsCredentials {
    /// Decodes the base64 credential blob stored in `GOOGLE_CREDENTIALS_JSON`.
    pub fn from_base64_json(encoded: &str) -> Result<Self, SheetsAuthError> {
        let raw = BASE64
            .decode(encoded.trim())
            .map_err(|err| SheetsAuthError::InvalidCredentials(err.to_string()))?;
        let file: CredentialFile = serde_json::from_slice(&raw)
            .map_err(|err| SheetsAuthError::InvalidCredentials(err.to_string()))?;
        match file.kind.as_str() {
            "service_account" => {
                if file.client_email.is_empty() || file.private_key.is_empty() {
                    return Err(SheetsAuthError::InvalidCredentials(
                        "client_email and private_key are required".into(),
                    ));
                }
                EncodingKey::from_rsa_pem(file.private_key.as_bytes())
                    .map_err(|err| SheetsAuthError::InvalidCredentials(err.to_string()))?;
                Ok(Self::ServiceAccount {
                    client_email: file.client_email,
                    private_key: file.private_key,
                    token_uri: file.token_uri.filter(|uri| !uri.trim().is_empty()),
                })
            }
            "authorized_user" => {
                if file.refresh_token.is_empty() || file.client_id.is_empty() {
                    return Err(SheetsAuthError::InvalidCredentials(
                        "client_id and refresh_token are required".into(),
                    ));
                }
                Ok(Self::AuthorizedUser {
                    client_id: file.client_id,
                    client_secret: file.client_secret,
                    refresh_token: file.refresh_token,
                })
            }
            other => Err(SheetsAuthError::UnsupportedCredentialType(other.to_string())),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

/// Signs the RS256 assertion exchanged at `audience` for an access token.
fn sign_assertion(client_email: &str, private_key: &str, audience: &str) -> Result<String, SheetsAuthError> {
    let iat = Utc::now().timestamp();
    let claims = AssertionClaims {
        iss: client_email.to_string(),
        scope: SHEETS_SCOPE.to_string(),
        aud: audience.to_string(),
        iat,
        exp: iat + ASSERTION_LIFETIME_SECS,
    };
    let key = EncodingKey::from_rsa_pem(private_key.as_bytes())
        .map_err(|err| SheetsAuthError::Signing(err.to_string()))?;
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
        .map_err(|err| SheetsAuthError::Signing(err.to_string()))
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Hands out access tokens, going back to the token endpoint only when the
/// cached one is about to expire.
#[derive(Clone)]
pub struct TokenSource {
    credentials: SheetsCredentials,
    token_url: String,
    cache: Arc<Mutex<Option<CachedToken>>>,
}

impl TokenSource {
    pub fn new(credentials: SheetsCredentials, token_url: String) -> Self {
        Self {
            credentials,
            token_url,
            cache: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn access_token(&self, http: &Client) -> Result<String, SheetsAuthError> {
        let mut guard = self.cache.lock().await;
        if let Some(cached) = guard.as_ref()
            && cached.expires_at > Instant::now()
        {
            return Ok(cached.value.clone());
        }

        let (url, params): (&str, Vec<(&str, String)>) = match &self.credentials {
            SheetsCredentials::Static(token) => return Ok(token.clone()),
            SheetsCredentials::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
            } => (
                self.token_url.as_str(),
                vec![
                    ("grant_type", "refresh_token".to_string()),
                    ("client_id", client_id.clone()),
                    ("client_secret", client_secret.clone()),
                    ("refresh_token", refresh_token.clone()),
                    ("scope", SHEETS_SCOPE.to_string()),
                ],
            ),
            SheetsCredentials::ServiceAccount {
                client_email,
                private_key,
                token_uri,
            } => {
                let url = token_uri.as_deref().unwrap_or(&self.token_url);
                let assertion = sign_assertion(client_email, private_key, url)?;
                (
                    url,
                    vec![
                        ("grant_type", JWT_BEARER_GRANT.to_string()),
                        ("assertion", assertion),
                    ],
                )
            }
        };

        let response = http
            .post(url)
            .form(&params)
            .send()
            .await
            .map_err(|err| SheetsAuthError::Request(err.to_string()))?;
        crate::metrics::upstream_call("google_oauth", response.status().as_u16());
        if !response.status().is_success() {
            return Err(SheetsAuthError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }
        let payload: TokenResponse = response
            .json()
            .await
            .map_err(|err| SheetsAuthError::Request(err.to_string()))?;

        let lifetime = Duration::from_secs(payload.expires_in.unwrap_or(3600));
        let expires_at = Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN);
        debug!(target = "onboard.sheets", lifetime_secs = lifetime.as_secs(), "access_token_refreshed");
        *guard = Some(CachedToken {
            value: payload.access_token.clone(),
            expires_at,
        });
        Ok(payload.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::build_client;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn encoded(value: serde_json::Value) -> String {
        BASE64.encode(value.to_string())
    }

    #[test]
    fn decodes_authorized_user_credentials() {
        let creds = SheetsCredentials::from_base64_json(&encoded(json!({
            "type": "authorized_user",
            "client_id": "cid",
            "client_secret": "secret",
            "refresh_token": "rt"
        })))
        .expect("credentials");
        assert!(matches!(
            creds,
            SheetsCredentials::AuthorizedUser { ref refresh_token, .. } if refresh_token == "rt"
        ));
    }

    const TEST_KEY: &str = include_str!("testdata/service_account_key.pem");
    const TEST_PUBLIC_KEY: &str = include_str!("testdata/service_account_key.pub.pem");

    #[test]
    fn decodes_service_account_credentials() {
        let creds = SheetsCredentials::from_base64_json(&encoded(json!({
            "type": "service_account",
            "project_id": "fursat",
            "client_email": "sheets@fursat.iam.gserviceaccount.com",
            "private_key": TEST_KEY,
            "token_uri": "https://oauth2.googleapis.com/token"
        })))
        .expect("credentials");
        assert!(matches!(
            creds,
            SheetsCredentials::ServiceAccount { ref client_email, ref token_uri, .. }
                if client_email == "sheets@fursat.iam.gserviceaccount.com"
                    && token_uri.as_deref() == Some("https://oauth2.googleapis.com/token")
        ));
    }

    #[test]
    fn rejects_other_credential_types_and_garbage() {
        let err = SheetsCredentials::from_base64_json(&encoded(json!({
            "type": "external_account",
            "audience": "x"
        })))
        .expect_err("unsupported");
        assert!(matches!(err, SheetsAuthError::UnsupportedCredentialType(ref t) if t == "external_account"));
        assert!(matches!(
            SheetsCredentials::from_base64_json("%%%"),
            Err(SheetsAuthError::InvalidCredentials(_))
        ));
        let bad_key = SheetsCredentials::from_base64_json(&encoded(json!({
            "type": "service_account",
            "client_email": "x@y",
            "private_key": "not a key"
        })));
        assert!(matches!(bad_key, Err(SheetsAuthError::InvalidCredentials(_))));
    }

    fn form_value(body: &[u8], key: &str) -> Option<String> {
        String::from_utf8_lossy(body).split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            if k != key {
                return None;
            }
            urlencoding::decode(&v.replace('+', " ")).ok().map(|v| v.into_owned())
        })
    }

    #[tokio::test]
    async fn service_account_signs_a_jwt_bearer_assertion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sa-token"))
            .and(body_string_contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer"))
            .and(body_string_contains("assertion="))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "ya29.sa",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token_uri = format!("{}/sa-token", server.uri());
        let source = TokenSource::new(
            SheetsCredentials::ServiceAccount {
                client_email: "sheets@fursat.iam.gserviceaccount.com".into(),
                private_key: TEST_KEY.into(),
                token_uri: Some(token_uri.clone()),
            },
            "http://127.0.0.1:9/unused".into(),
        );
        let http = build_client();
        assert_eq!(source.access_token(&http).await.expect("token"), "ya29.sa");
        assert_eq!(source.access_token(&http).await.expect("cached"), "ya29.sa");

        let requests = server.received_requests().await.expect("recording enabled");
        let assertion = form_value(&requests[0].body, "assertion").expect("assertion");
        let mut validation = jsonwebtoken::Validation::new(Algorithm::RS256);
        validation.set_audience(&[token_uri.as_str()]);
        let decoded = jsonwebtoken::decode::<AssertionClaims>(
            &assertion,
            &jsonwebtoken::DecodingKey::from_rsa_pem(TEST_PUBLIC_KEY.as_bytes()).expect("public key"),
            &validation,
        )
        .expect("valid assertion");
        assert_eq!(decoded.claims.iss, "sheets@fursat.iam.gserviceaccount.com");
        assert_eq!(decoded.claims.scope, SHEETS_SCOPE);
        assert_eq!(decoded.claims.exp - decoded.claims.iat, ASSERTION_LIFETIME_SECS);
    }

    #[tokio::test]
    async fn refresh_token_is_exchanged_once_and_cached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "ya29.token",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = TokenSource::new(
            SheetsCredentials::AuthorizedUser {
                client_id: "cid".into(),
                client_secret: "secret".into(),
                refresh_token: "rt".into(),
            },
            format!("{}/token", server.uri()),
        );
        let http = build_client();
        assert_eq!(source.access_token(&http).await.expect("token"), "ya29.token");
        assert_eq!(source.access_token(&http).await.expect("cached"), "ya29.token");
    }

    #[tokio::test]
    async fn static_token_needs_no_exchange() {
        let source = TokenSource::new(
            SheetsCredentials::Static("static".into()),
            "http://127.0.0.1:9/token".into(),
        );
        assert_eq!(source.access_token(&build_client()).await.expect("token"), "static");
    }
}
