use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, env, sync::Arc};
use tracing::{info, warn};

pub const KEY_HEADER: &str = "X-Onboard-Key";

#[derive(Clone)]
pub struct AuthState {
    records: Arc<HashMap<String, OperatorRecord>>,
}

#[derive(Clone, Debug)]
pub struct AuthContext {
    pub operator: String,
    pub api_key_id: String,
}

#[derive(Clone)]
struct OperatorRecord {
    operator: String,
    api_key_id: String,
}

impl AuthState {
    pub fn from_env() -> Self {
        let raw = env::var("ONBOARD_API_KEYS").unwrap_or_default();
        Self::from_spec(&raw)
    }

    /// Parses `operator:key,operator:key`. Falls back to a local demo key
    /// when nothing usable is configured.
    pub fn from_spec(raw: &str) -> Self {
        Self {
            records: Arc::new(load_keys(raw)),
        }
    }

    fn authenticate(&self, presented: &str) -> Option<AuthContext> {
        self.records.get(presented).map(|record| AuthContext {
            operator: record.operator.clone(),
            api_key_id: record.api_key_id.clone(),
        })
    }
}

pub async fn require_api_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        return Ok(unauthorized_response(
            "missing_api_key",
            "Provide X-Onboard-Key or Bearer token",
        ));
    };

    let Some(context) = state.authenticate(&presented) else {
        return Ok(unauthorized_response("invalid_api_key", "Key not recognized"));
    };

    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && raw.len() >= 7
        && raw[..6].eq_ignore_ascii_case("bearer")
    {
        return Some(raw[6..].trim().to_string());
    }
    headers
        .get(KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn unauthorized_response(code: &str, message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(ApiError::new(code, message))).into_response()
}

fn load_keys(raw: &str) -> HashMap<String, OperatorRecord> {
    let mut entries = HashMap::new();
    for (idx, token) in raw.split(',').enumerate() {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut parts = trimmed.splitn(2, ':');
        let operator = parts.next().map(str::trim).filter(|s| !s.is_empty());
        let key = parts.next().map(str::trim).filter(|s| !s.is_empty());
        match (operator, key) {
            (Some(operator), Some(secret)) => {
                let record = OperatorRecord {
                    operator: operator.to_string(),
                    api_key_id: format!("key-{:02}", idx + 1),
                };
                entries.insert(secret.to_string(), record);
            }
            _ => warn!(
                target = "onboard.api",
                "ignored malformed ONBOARD_API_KEYS entry (expected operator:key)"
            ),
        }
    }

    if entries.is_empty() {
        warn!(
            target = "onboard.api",
            "ONBOARD_API_KEYS produced no keys; falling back to demo credentials"
        );
        entries.insert(
            "demo-key".to_string(),
            OperatorRecord {
                operator: "demo".to_string(),
                api_key_id: "key-01".to_string(),
            },
        );
    } else {
        info!(
            target = "onboard.api",
            key_count = entries.len(),
            "loaded API keys from env"
        );
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn parses_operator_keys_and_skips_malformed_entries() {
        let state = AuthState::from_spec("ops:s3cret, broken ,field:other");
        let context = state.authenticate("s3cret").expect("known key");
        assert_eq!(context.operator, "ops");
        assert_eq!(context.api_key_id, "key-01");
        assert_eq!(state.authenticate("other").expect("second").api_key_id, "key-03");
        assert!(state.authenticate("demo-key").is_none());
    }

    #[test]
    fn empty_config_falls_back_to_demo_key() {
        let state = AuthState::from_spec("");
        assert_eq!(state.authenticate("demo-key").expect("demo").operator, "demo");
    }

    #[test]
    fn bearer_wins_over_custom_header() {
        let mut headers = http::HeaderMap::new();
        headers.insert(KEY_HEADER, HeaderValue::from_static("header-key"));
        assert_eq!(extract_api_key(&headers).as_deref(), Some("header-key"));
        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer bearer-key"),
        );
        assert_eq!(extract_api_key(&headers).as_deref(), Some("bearer-key"));
    }
}
