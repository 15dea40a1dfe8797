use crate::fursat::PublishReceipt;
use crate::listing::{InferredFields, PropertyDetails, PropertyOverrides};
use crate::maps::resolver::ResolveStrategy;
use crate::maps::{Coordinates, PlaceDetails, ResolvedPlace};
use crate::sheets::{SyncMode, SyncOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt;

fn create_mode() -> SyncMode {
    SyncMode::Create
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardRequest {
    pub google_maps_url: String,
    #[serde(flatten)]
    pub overrides: PropertyOverrides,
    #[serde(default)]
    pub skip_description: bool,
    #[serde(default)]
    pub skip_sheet: bool,
    #[serde(default, alias = "skipFursat")]
    pub skip_publish: bool,
    /// Onboarding never overwrites an existing row unless asked to.
    #[serde(default = "create_mode")]
    pub sheet_mode: SyncMode,
}

impl OnboardRequest {
    pub fn for_url(url: &str) -> Self {
        Self {
            google_maps_url: url.to_string(),
            overrides: PropertyOverrides::default(),
            skip_description: false,
            skip_sheet: false,
            skip_publish: false,
            sheet_mode: SyncMode::Create,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ok,
    Failed,
    Skipped,
}

/// One line of the step log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepEntry {
    pub stage: String,
    pub status: StepStatus,
    pub message: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
}

impl StepEntry {
    pub fn new(stage: &str, status: StepStatus, message: impl Into<String>, elapsed_ms: u128) -> Self {
        Self {
            stage: stage.to_string(),
            status,
            message: message.into(),
            elapsed_ms,
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for StepEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.status {
            StepStatus::Ok => "ok",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        };
        write!(f, "[{}] {}: {}", status, self.stage, self.message)
    }
}

/// Flattened view of the resolved place for operators.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertySnapshot {
    pub name: String,
    pub place_id: String,
    pub coordinates: Coordinates,
    pub phone_number: String,
    pub website: Option<String>,
    pub rating: Option<f64>,
    pub total_reviews: Option<u32>,
    pub photo_count: usize,
    pub photo_references: Vec<String>,
}

/// Terminal artifact of one onboarding run. Stage results that failed or
/// were skipped are `null`; the step log says which.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingResult {
    pub run_id: String,
    pub resolved_place: ResolvedPlace,
    pub resolution: ResolveStrategy,
    pub property: PropertySnapshot,
    pub details: PlaceDetails,
    pub description: Option<String>,
    pub inferred_fields: Option<InferredFields>,
    pub property_details: PropertyDetails,
    pub sheet_outcome: Option<SyncOutcome>,
    pub publish_outcome: Option<PublishReceipt>,
    pub step_log: Vec<StepEntry>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepEntry>,
}

impl ApiError {
    pub fn new(error: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            detail: Some(detail.into()),
            steps: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn onboard_request_reads_overrides_and_flags() {
        let request: OnboardRequest = serde_json::from_value(json!({
            "googleMapsUrl": "https://www.google.com/maps/place/Foo/@1,2",
            "totalRooms": 4,
            "costPrice": 2000,
            "contactNumber": "+91 90000 00000",
            "skipFursat": true
        }))
        .expect("request");
        assert_eq!(request.overrides.total_rooms, Some(4));
        assert_eq!(request.overrides.cost_price, Some(2000.0));
        assert_eq!(request.overrides.contact_number.as_deref(), Some("+91 90000 00000"));
        assert!(request.skip_publish);
        assert!(!request.skip_sheet);
        assert_eq!(request.sheet_mode, SyncMode::Create);
    }

    #[test]
    fn step_entries_render_for_humans() {
        let entry = StepEntry::new("publish", StepStatus::Failed, "listing service is unreachable", 12);
        assert_eq!(entry.to_string(), "[failed] publish: listing service is unreachable");
    }
}
