//! Map URL parsing: coordinates, place name, and short-link expansion.
//!
//! Full browser URLs look like
//! `https://www.google.com/maps/place/Some+Place/@25.24,91.67,17z/data=...`.
//! Share links (`maps.app.goo.gl/...`) carry neither piece and are expanded by
//! reading `Location` headers manually, at most [`MAX_REDIRECT_HOPS`] times.

use crate::http::build_manual_redirect_client;
use crate::maps::Coordinates;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Url, header::LOCATION};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

pub const MAX_REDIRECT_HOPS: usize = 2;

const SHORT_LINK_HOSTS: &[&str] = &["maps.app.goo.gl", "goo.gl", "g.co"];

const FULL_URL_HINT: &str =
    "open the link in a browser and paste the full URL from the address bar";

static COORDINATES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@([-0-9.]+),([-0-9.]+)").expect("valid coordinate pattern"));

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("URL has no @<lat>,<lng> coordinates; {FULL_URL_HINT}")]
    MissingCoordinates,
    #[error("URL coordinates `{0}` are not numeric")]
    InvalidCoordinates(String),
    #[error("URL has no /place/ segment; {FULL_URL_HINT}")]
    MissingPlaceName,
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("could not expand short link ({0}); {FULL_URL_HINT}")]
    ShortLink(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedPlaceUrl {
    pub coordinates: Coordinates,
    pub place_name: String,
    /// The URL the pieces were read from; differs from the input for short links.
    pub resolved_url: String,
}

/// First `@<lat>,<lng>` occurrence. Both numbers must parse or nothing is returned.
pub fn extract_coordinates(url: &str) -> Result<Coordinates, ParseError> {
    let captures = COORDINATES
        .captures(url)
        .ok_or(ParseError::MissingCoordinates)?;
    let raw = &captures[0];
    let lat = captures[1].parse::<f64>().ok().filter(|v| v.is_finite());
    let lng = captures[2].parse::<f64>().ok().filter(|v| v.is_finite());
    match (lat, lng) {
        (Some(lat), Some(lng)) => Ok(Coordinates { lat, lng }),
        _ => Err(ParseError::InvalidCoordinates(raw.to_string())),
    }
}

/// Path segment after `/place/`, percent-decoded with `+` read as a space.
pub fn extract_place_name(url: &str) -> Result<String, ParseError> {
    let parsed = Url::parse(url).map_err(|err| ParseError::InvalidUrl(err.to_string()))?;
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|segments| segments.collect())
        .unwrap_or_default();
    let raw = segments
        .iter()
        .position(|segment| *segment == "place")
        .and_then(|idx| segments.get(idx + 1))
        .filter(|segment| !segment.is_empty())
        .ok_or(ParseError::MissingPlaceName)?;
    let decoded =
        urlencoding::decode(raw).map_err(|err| ParseError::InvalidUrl(err.to_string()))?;
    let name = decoded.replace('+', " ").trim().to_string();
    if name.is_empty() {
        return Err(ParseError::MissingPlaceName);
    }
    Ok(name)
}

pub fn is_short_link(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_lowercase))
        .is_some_and(|host| SHORT_LINK_HOSTS.iter().any(|known| host == *known))
}

fn looks_like_place_url(url: &str) -> bool {
    url.contains("/place/") || url.contains('@')
}

/// Consent interstitials carry the real destination in `continue`.
fn unwrap_consent(location: &str) -> Option<String> {
    let parsed = Url::parse(location).ok()?;
    if !parsed.host_str()?.starts_with("consent.") {
        return None;
    }
    parsed
        .query_pairs()
        .find(|(key, _)| key == "continue")
        .map(|(_, value)| value.into_owned())
}

#[derive(Clone)]
pub struct UrlParser {
    http: Client,
}

impl Default for UrlParser {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlParser {
    pub fn new() -> Self {
        Self {
            http: build_manual_redirect_client(),
        }
    }

    pub async fn parse(&self, url: &str) -> Result<ParsedPlaceUrl, ParseError> {
        let url = url.trim();
        let resolved_url = if is_short_link(url) {
            self.expand_short_link(url).await?
        } else {
            url.to_string()
        };
        let coordinates = extract_coordinates(&resolved_url)?;
        let place_name = extract_place_name(&resolved_url)?;
        Ok(ParsedPlaceUrl {
            coordinates,
            place_name,
            resolved_url,
        })
    }

    /// Follows `Location` headers without letting the client auto-redirect.
    /// Stops as soon as a location looks like a full place URL.
    pub async fn expand_short_link(&self, url: &str) -> Result<String, ParseError> {
        let mut current = url.to_string();
        for hop in 1..=MAX_REDIRECT_HOPS {
            let Some(location) = self.next_location(&current).await? else {
                break;
            };
            let location = unwrap_consent(&location).unwrap_or(location);
            debug!(target = "onboard.maps", hop, location = %location, "short_link_hop");
            if looks_like_place_url(&location) {
                return Ok(location);
            }
            current = location;
        }
        warn!(target = "onboard.maps", url = %url, "short_link_unresolved");
        Err(ParseError::ShortLink(
            "redirects did not reach a place URL".into(),
        ))
    }

    async fn next_location(&self, url: &str) -> Result<Option<String>, ParseError> {
        let base = Url::parse(url).map_err(|err| ParseError::InvalidUrl(err.to_string()))?;
        let response = self
            .http
            .get(base.clone())
            .send()
            .await
            .map_err(|err| ParseError::ShortLink(err.to_string()))?;
        if !response.status().is_redirection() {
            return Ok(None);
        }
        let Some(raw) = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
        else {
            return Ok(None);
        };
        let absolute = base
            .join(raw)
            .map(String::from)
            .unwrap_or_else(|_| raw.to_string());
        Ok(Some(absolute))
    }
}
