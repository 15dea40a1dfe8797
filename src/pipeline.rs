//! Onboarding orchestration.
//!
//! `parse -> resolve -> details -> description -> sheet + publish`, strictly in
//! that order except for the last two, which run concurrently and are awaited
//! independently. The first three stages are fatal; the rest degrade to a
//! `null` result plus a step-log entry.
//!
//! The run deadline covers parse through description. Sheet and publish are
//! each bounded separately so a slow publish never discards a written row.

use crate::config::env_parse;
use crate::fursat::{FursatClient, ListingDraft, PublishConfig, PublishPhoto, PublishReceipt, PublishReview};
use crate::listing::description::{self, DescriptionRequest, GeneratedDescription};
use crate::listing::property::AssembleInput;
use crate::listing::PropertyDetails;
use crate::llm::{LlmClient, LlmConfig};
use crate::maps::{
    MapsConfig, ParseError, ParsedPlaceUrl, PlaceDetails, PlacesClient, PlacesError, ResolveError,
    UrlParser, resolve,
};
use crate::maps::resolver::Resolution;
use crate::models::{OnboardRequest, OnboardingResult, PropertySnapshot, StepEntry, StepStatus};
use crate::sheets::{self, SheetsClient, SheetsConfig, SyncAction, SyncOutcome};
use chrono::Utc;
use std::time::Instant;
use thiserror::Error;
use tokio::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub maps: MapsConfig,
    pub llm: LlmConfig,
    pub sheets: SheetsConfig,
    pub publish: PublishConfig,
    pub run_timeout: Duration,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self {
            maps: MapsConfig::from_env(),
            llm: LlmConfig::from_env(),
            sheets: SheetsConfig::from_env(),
            publish: PublishConfig::from_env(),
            run_timeout: Duration::from_secs(
                env_parse::<u64>("ONBOARD_RUN_TIMEOUT_SECS")
                    .filter(|v| *v > 0)
                    .unwrap_or(DEFAULT_RUN_TIMEOUT_SECS),
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum OnboardError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("No place found for \"{name_hint}\"")]
    NotFound { name_hint: String },
    #[error("place lookup failed: {0}")]
    Api(PlacesError),
    #[error("{0}")]
    Configuration(String),
    #[error("onboarding did not finish within {0:?}")]
    TimedOut(Duration),
}

impl OnboardError {
    pub fn code(&self) -> &'static str {
        match self {
            OnboardError::Parse(_) => "invalid_url",
            OnboardError::NotFound { .. } => "place_not_found",
            OnboardError::Api(_) => "upstream_error",
            OnboardError::Configuration(_) => "not_configured",
            OnboardError::TimedOut(_) => "timed_out",
        }
    }
}

impl From<ResolveError> for OnboardError {
    fn from(value: ResolveError) -> Self {
        match value {
            ResolveError::NotFound { name_hint } => OnboardError::NotFound { name_hint },
            ResolveError::Search(PlacesError::MissingApiKey) => {
                OnboardError::Configuration(PlacesError::MissingApiKey.to_string())
            }
            ResolveError::Search(err) => OnboardError::Api(err),
        }
    }
}

/// A fatal error together with everything the run logged before it.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct OnboardFailure {
    pub error: OnboardError,
    pub steps: Vec<StepEntry>,
}

struct Enriched {
    parsed: ParsedPlaceUrl,
    resolution: Resolution,
    details: PlaceDetails,
    generated: Option<GeneratedDescription>,
}

#[derive(Clone)]
pub struct Pipeline {
    pub parser: UrlParser,
    pub places: PlacesClient,
    pub llm: LlmClient,
    pub sheet: SheetsClient,
    pub publisher: FursatClient,
    run_timeout: Duration,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            parser: UrlParser::new(),
            places: PlacesClient::new(config.maps),
            llm: LlmClient::new(config.llm),
            sheet: SheetsClient::new(config.sheets),
            publisher: FursatClient::new(config.publish),
            run_timeout: config.run_timeout,
        }
    }

    pub fn from_env() -> Self {
        Self::new(PipelineConfig::from_env())
    }

    /// Runs the fatal stages under one deadline. On timeout the steps
    /// recorded so far are returned with the error. Sheet and publish each
    /// get their own deadline and degrade to a failed step.
    pub async fn run(&self, request: OnboardRequest) -> Result<OnboardingResult, OnboardFailure> {
        let run_id = Uuid::new_v4().to_string();
        let mut steps = Vec::new();
        let outcome =
            tokio::time::timeout(self.run_timeout, self.enrich(&request, &mut steps)).await;
        let enriched = match outcome {
            Ok(Ok(enriched)) => enriched,
            Ok(Err(error)) => {
                warn!(target = "onboard.pipeline", run_id = %run_id, error = %error, "onboarding_failed");
                return Err(OnboardFailure { error, steps });
            }
            Err(_) => {
                let error = OnboardError::TimedOut(self.run_timeout);
                steps.push(StepEntry::new(
                    "run",
                    StepStatus::Failed,
                    error.to_string(),
                    self.run_timeout.as_millis(),
                ));
                warn!(target = "onboard.pipeline", run_id = %run_id, "onboarding_timed_out");
                return Err(OnboardFailure { error, steps });
            }
        };
        Ok(self.deliver(run_id, &request, enriched, steps).await)
    }

    /// Parse through description. Every failure here ends the run.
    async fn enrich(
        &self,
        request: &OnboardRequest,
        steps: &mut Vec<StepEntry>,
    ) -> Result<Enriched, OnboardError> {
        if !self.places.is_configured() {
            let error = OnboardError::Configuration(PlacesError::MissingApiKey.to_string());
            push_step(steps, StepEntry::new("config", StepStatus::Failed, error.to_string(), 0));
            return Err(error);
        }

        let parsed = self.parse_stage(&request.google_maps_url, steps).await?;
        let resolution = self.resolve_stage(&parsed, steps).await?;
        let details = self.details_stage(&resolution, request, steps).await?;
        let generated = self.description_stage(request, &resolution, &details, steps).await;
        Ok(Enriched {
            parsed,
            resolution,
            details,
            generated,
        })
    }

    async fn deliver(
        &self,
        run_id: String,
        request: &OnboardRequest,
        enriched: Enriched,
        mut steps: Vec<StepEntry>,
    ) -> OnboardingResult {
        let Enriched {
            parsed,
            resolution,
            details,
            generated,
        } = enriched;

        let property_details = PropertyDetails::assemble(AssembleInput {
            place: &resolution.place,
            details: &details,
            maps_url: &request.google_maps_url,
            description: generated.as_ref().map(|g| g.description.as_str()),
            inferred: generated.as_ref().and_then(|g| g.inferred_fields.as_ref()),
            overrides: &request.overrides,
            enriched_on: Utc::now().date_naive(),
        });
        let draft = self.listing_draft(request, &parsed, &resolution, &details, generated.as_ref());

        // Settle both: neither outcome can cancel or mask the other.
        let ((sheet_step, sheet_outcome), (publish_step, publish_outcome)) = tokio::join!(
            self.bounded("sheet", self.sheet_stage(request, &property_details)),
            self.bounded("publish", self.publish_stage(request, &draft)),
        );
        push_step(&mut steps, sheet_step);
        push_step(&mut steps, publish_step);

        let property = PropertySnapshot {
            name: resolution.place.name.clone(),
            place_id: resolution.place.place_id.clone(),
            coordinates: parsed.coordinates,
            phone_number: property_details.contact_number.clone(),
            website: details.website.clone(),
            rating: details.rating,
            total_reviews: details.total_reviews,
            photo_count: details.photos.len(),
            photo_references: details.photo_references(self.publisher.max_photos()),
        };
        info!(
            target = "onboard.pipeline",
            run_id = %run_id,
            place_id = %resolution.place.place_id,
            sheet = sheet_outcome.is_some(),
            published = publish_outcome.is_some(),
            "onboarding_completed"
        );

        OnboardingResult {
            run_id,
            resolved_place: resolution.place,
            resolution: resolution.strategy,
            property,
            details,
            description: generated.as_ref().map(|g| g.description.clone()),
            inferred_fields: generated.and_then(|g| g.inferred_fields),
            property_details,
            sheet_outcome,
            publish_outcome,
            step_log: steps,
        }
    }

    /// Caps a side-effect stage at the run deadline.
    async fn bounded<T>(
        &self,
        stage: &'static str,
        work: impl Future<Output = (StepEntry, Option<T>)>,
    ) -> (StepEntry, Option<T>) {
        let started = Instant::now();
        match tokio::time::timeout(self.run_timeout, work).await {
            Ok(settled) => settled,
            Err(_) => {
                let message = format!("{stage} did not finish within {:?}", self.run_timeout);
                (step(stage, StepStatus::Failed, message, started), None)
            }
        }
    }

    async fn parse_stage(
        &self,
        url: &str,
        steps: &mut Vec<StepEntry>,
    ) -> Result<ParsedPlaceUrl, OnboardError> {
        let started = Instant::now();
        match self.parser.parse(url).await {
            Ok(parsed) => {
                let message = format!(
                    "Parsed URL: {} @ {},{}",
                    parsed.place_name, parsed.coordinates.lat, parsed.coordinates.lng
                );
                push_step(steps, step("parse", StepStatus::Ok, message, started));
                Ok(parsed)
            }
            Err(err) => {
                push_step(steps, step("parse", StepStatus::Failed, err.to_string(), started));
                Err(err.into())
            }
        }
    }

    async fn resolve_stage(
        &self,
        parsed: &ParsedPlaceUrl,
        steps: &mut Vec<StepEntry>,
    ) -> Result<Resolution, OnboardError> {
        let started = Instant::now();
        match resolve(&self.places, parsed.coordinates, &parsed.place_name).await {
            Ok(resolution) => {
                let message = format!(
                    "Found place {} ({}) via {}",
                    resolution.place.place_id,
                    resolution.place.name,
                    strategy_label(&resolution)
                );
                push_step(steps, step("resolve", StepStatus::Ok, message, started));
                Ok(resolution)
            }
            Err(err) => {
                let error = OnboardError::from(err);
                push_step(steps, step("resolve", StepStatus::Failed, error.to_string(), started));
                Err(error)
            }
        }
    }

    async fn details_stage(
        &self,
        resolution: &Resolution,
        request: &OnboardRequest,
        steps: &mut Vec<StepEntry>,
    ) -> Result<PlaceDetails, OnboardError> {
        let started = Instant::now();
        match self.places.details(&resolution.place.place_id).await {
            Ok(details) => {
                let phone = details
                    .phone
                    .as_deref()
                    .or(request.overrides.contact_number.as_deref())
                    .unwrap_or("none");
                let message = format!(
                    "Got {} photos, {} reviews, phone: {}",
                    details.photos.len(),
                    details.reviews.len(),
                    phone
                );
                push_step(steps, step("details", StepStatus::Ok, message, started));
                Ok(details)
            }
            Err(err) => {
                let message = format!("Place details failed: {err}");
                push_step(steps, step("details", StepStatus::Failed, message, started));
                Err(OnboardError::Api(err))
            }
        }
    }

    async fn description_stage(
        &self,
        request: &OnboardRequest,
        resolution: &Resolution,
        details: &PlaceDetails,
        steps: &mut Vec<StepEntry>,
    ) -> Option<GeneratedDescription> {
        let started = Instant::now();
        let skip_reason = if request.skip_description {
            Some("Skipped description (requested)")
        } else if details.reviews.is_empty() {
            Some("Skipped description (no reviews)")
        } else if !self.llm.is_configured() {
            Some("Skipped description (no GEMINI_API_KEY)")
        } else {
            None
        };
        if let Some(reason) = skip_reason {
            push_step(steps, step("description", StepStatus::Skipped, reason, started));
            return None;
        }

        let generated = description::generate(
            &self.llm,
            DescriptionRequest {
                reviews: &details.reviews,
                rating: details.rating,
                total_reviews: details.total_reviews,
                place_name: &resolution.place.name,
            },
        )
        .await;
        match generated {
            Ok(generated) => {
                let message = format!(
                    "Generated description ({} chars from {} reviews, inferred fields: {})",
                    generated.description.chars().count(),
                    generated.reviews_used,
                    if generated.inferred_fields.is_some() { "yes" } else { "no" }
                );
                push_step(steps, step("description", StepStatus::Ok, message, started));
                Some(generated)
            }
            Err(err) => {
                let message = format!("Description failed: {err}");
                push_step(steps, step("description", StepStatus::Failed, message, started));
                None
            }
        }
    }

    async fn sheet_stage(
        &self,
        request: &OnboardRequest,
        property: &PropertyDetails,
    ) -> (StepEntry, Option<SyncOutcome>) {
        let started = Instant::now();
        if request.skip_sheet {
            return (step("sheet", StepStatus::Skipped, "Skipped sheet sync (requested)", started), None);
        }
        match sheets::upsert(&self.sheet, property, request.sheet_mode).await {
            Ok(outcome) => {
                let verb = match outcome.action {
                    SyncAction::Created => "created",
                    SyncAction::Updated => "updated",
                    SyncAction::AlreadyExists => "already exists",
                };
                let message = format!("Sheet: {verb} at row {}", outcome.row_number);
                (step("sheet", StepStatus::Ok, message, started), Some(outcome))
            }
            Err(err) => {
                let message = format!("Sheet sync failed: {err}");
                (step("sheet", StepStatus::Failed, message, started), None)
            }
        }
    }

    async fn publish_stage(
        &self,
        request: &OnboardRequest,
        draft: &ListingDraft,
    ) -> (StepEntry, Option<PublishReceipt>) {
        let started = Instant::now();
        if request.skip_publish {
            return (step("publish", StepStatus::Skipped, "Skipped publish (requested)", started), None);
        }
        if !self.publisher.is_configured() {
            return (
                step("publish", StepStatus::Skipped, "Skipped publish (FURSAT_API_URL or FURSATPHOTO_API_KEY not set)", started),
                None,
            );
        }
        match self.publisher.publish(draft).await {
            Ok(receipt) => {
                let message = match receipt.listing_id.as_deref() {
                    Some(id) => format!("Published listing {id}"),
                    None => "Published listing".to_string(),
                };
                (step("publish", StepStatus::Ok, message, started), Some(receipt))
            }
            Err(err) => {
                let message = format!("Publish failed: {err}");
                (step("publish", StepStatus::Failed, message, started), None)
            }
        }
    }

    fn listing_draft(
        &self,
        request: &OnboardRequest,
        parsed: &ParsedPlaceUrl,
        resolution: &Resolution,
        details: &PlaceDetails,
        generated: Option<&GeneratedDescription>,
    ) -> ListingDraft {
        ListingDraft {
            place_name: resolution.place.name.clone(),
            rating: details.rating,
            total_reviews: details.total_reviews,
            photos: details.photos.iter().map(PublishPhoto::from).collect(),
            reviews: details.reviews.iter().map(PublishReview::from).collect(),
            coordinates: parsed.coordinates,
            location: parsed.place_name.clone(),
            google_maps_url: Some(request.google_maps_url.clone()),
            generated_description: generated.map(|g| g.description.clone()).unwrap_or_default(),
            host_name: None,
            host_email: None,
            host_phone: None,
        }
    }
}

fn strategy_label(resolution: &Resolution) -> &'static str {
    use crate::maps::resolver::ResolveStrategy;
    match resolution.strategy {
        ResolveStrategy::NearbyNameMatch => "nearby search (name match)",
        ResolveStrategy::NearbyFirst => "nearby search (top result)",
        ResolveStrategy::TextSearch => "text search",
    }
}

fn step(stage: &'static str, status: StepStatus, message: impl Into<String>, started: Instant) -> StepEntry {
    StepEntry::new(stage, status, message, started.elapsed().as_millis())
}

fn push_step(steps: &mut Vec<StepEntry>, entry: StepEntry) {
    let status = match entry.status {
        StepStatus::Ok => "ok",
        StepStatus::Failed => "failed",
        StepStatus::Skipped => "skipped",
    };
    crate::metrics::stage_elapsed(stage_name(&entry.stage), status, entry.elapsed_ms);
    match entry.status {
        StepStatus::Failed => {
            warn!(target = "onboard.pipeline", stage = %entry.stage, message = %entry.message, "stage_failed")
        }
        _ => info!(target = "onboard.pipeline", stage = %entry.stage, status, message = %entry.message, "stage_recorded"),
    }
    steps.push(entry);
}

fn stage_name(stage: &str) -> &'static str {
    match stage {
        "config" => "config",
        "parse" => "parse",
        "resolve" => "resolve",
        "details" => "details",
        "description" => "description",
        "sheet" => "sheet",
        "publish" => "publish",
        _ => "run",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::columns::SHEET_COLUMN_MAP;
    use crate::sheets::auth::SheetsCredentials;
    use serde_json::{Value, json};
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const URL: &str = "https://www.google.com/maps/place/Hill+Camp/@27.05,88.47,17z/data=!3m1";

    fn config(server: &MockServer, publish_url: String) -> PipelineConfig {
        PipelineConfig {
            maps: MapsConfig {
                api_key: Some("maps-key".into()),
                base_url: server.uri(),
            },
            llm: LlmConfig {
                base_url: server.uri(),
                api_key: Some("gem-key".into()),
                model: "gemini-2.0-flash-lite".into(),
            },
            sheets: SheetsConfig {
                spreadsheet_id: Some("sheet-1".into()),
                range: "Listings".into(),
                base_url: server.uri(),
                token_url: format!("{}/token", server.uri()),
                credentials: Some(SheetsCredentials::Static("tok".into())),
            },
            publish: PublishConfig {
                api_url: Some(publish_url),
                api_key: Some("shh".into()),
                max_photos: 10,
            },
            run_timeout: Duration::from_secs(30),
        }
    }

    async fn mount_places(server: &MockServer, review_count: usize) {
        Mock::given(method("GET"))
            .and(path("/maps/api/place/nearbysearch/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "OK",
                "results": [
                    {"place_id": "pid-pump", "name": "Fuel Station", "geometry": {"location": {"lat": 27.0, "lng": 88.4}}},
                    {"place_id": "pid-hill", "name": "Hill Camp Homestay", "geometry": {"location": {"lat": 27.05, "lng": 88.47}}}
                ]
            })))
            .mount(server)
            .await;
        let reviews: Vec<Value> = (0..review_count)
            .map(|i| json!({"author_name": format!("Guest {i}"), "rating": 5, "text": format!("Great tea and wifi, visit {i}")}))
            .collect();
        Mock::given(method("GET"))
            .and(path("/maps/api/place/details/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "OK",
                "result": {
                    "name": "Hill Camp Homestay",
                    "photos": [{"photo_reference": "ph-1", "width": 800, "height": 600}, {"photo_reference": "ph-2"}],
                    "reviews": reviews,
                    "rating": 4.8,
                    "user_ratings_total": 18,
                    "international_phone_number": "+91 98765 43210"
                }
            })))
            .mount(server)
            .await;
    }

    async fn mount_llm(server: &MockServer, text: &str) {
        Mock::given(method("POST"))
            .and(path_regex(r"^/v1beta/models/.+:generateContent$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": text}]}}]
            })))
            .mount(server)
            .await;
    }

    async fn mount_empty_sheet(server: &MockServer) {
        let headers: Vec<&str> = SHEET_COLUMN_MAP.iter().map(|(_, h)| *h).collect();
        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/sheet-1/values/Listings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"values": [headers]})))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v4/spreadsheets/sheet-1/values/Listings:append"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(server)
            .await;
    }

    fn stages(result: &[StepEntry]) -> Vec<(&str, StepStatus)> {
        result.iter().map(|s| (s.stage.as_str(), s.status)).collect()
    }

    #[tokio::test]
    async fn full_run_produces_description_inferred_fields_and_both_outcomes() {
        let server = MockServer::start().await;
        mount_places(&server, 3).await;
        mount_llm(
            &server,
            "Nice place---PROPERTY_DATA---{\"totalRooms\":null,\"beds\":null,\"bathrooms\":null,\"guests\":null,\
\"pricingType\":null,\"wifi\":true,\"hotWater\":null,\"petsAllowed\":null,\"stateCity\":null,\"otherAmenities\":null}",
        )
        .await;
        mount_empty_sheet(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/fursatphoto/import"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "listingId": "lst_9", "editUrl": "/host/listings/lst_9/edit"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut request = OnboardRequest::for_url(URL);
        request.overrides.cost_price = Some(2000.0);
        let result = Pipeline::new(config(&server, server.uri()))
            .run(request)
            .await
            .expect("run");

        assert_eq!(result.resolved_place.place_id, "pid-hill");
        assert_eq!(result.description.as_deref(), Some("Nice place"));
        let inferred = result.inferred_fields.expect("inferred fields");
        assert_eq!(inferred.wifi, Some(true));
        assert_eq!(inferred.beds, None);
        assert_eq!(inferred.hot_water, None);
        assert_eq!(inferred.state_city, None);
        assert!(result.property_details.wifi);
        assert!(!result.property_details.hot_water);
        assert_eq!(result.property_details.selling_price, 3000.0);
        assert_eq!(result.property_details.contact_number, "+91 98765 43210");
        assert_eq!(
            result.sheet_outcome,
            Some(SyncOutcome { action: SyncAction::Created, row_number: 2 })
        );
        assert_eq!(
            result.publish_outcome.and_then(|r| r.listing_id).as_deref(),
            Some("lst_9")
        );
        assert_eq!(result.property.photo_references, vec!["ph-1", "ph-2"]);
        assert!(Uuid::parse_str(&result.run_id).is_ok());
        assert_eq!(
            stages(&result.step_log),
            vec![
                ("parse", StepStatus::Ok),
                ("resolve", StepStatus::Ok),
                ("details", StepStatus::Ok),
                ("description", StepStatus::Ok),
                ("sheet", StepStatus::Ok),
                ("publish", StepStatus::Ok),
            ]
        );
    }

    #[tokio::test]
    async fn publish_network_failure_keeps_sheet_outcome() {
        let server = MockServer::start().await;
        mount_places(&server, 0).await;
        mount_empty_sheet(&server).await;

        let result = Pipeline::new(config(&server, "http://127.0.0.1:9".into()))
            .run(OnboardRequest::for_url(URL))
            .await
            .expect("run does not fail");

        assert_eq!(
            result.sheet_outcome.as_ref().map(|o| o.action),
            Some(SyncAction::Created)
        );
        assert!(result.publish_outcome.is_none());
        assert!(result.description.is_none());
        let publish = result.step_log.last().expect("publish step");
        assert_eq!(publish.stage, "publish");
        assert_eq!(publish.status, StepStatus::Failed);
        assert!(publish.message.contains("unreachable"), "{}", publish.message);
        let description = &result.step_log[3];
        assert_eq!(description.status, StepStatus::Skipped);
        assert!(description.message.contains("no reviews"));
    }

    #[tokio::test]
    async fn unparseable_url_fails_before_any_network_call() {
        let server = MockServer::start().await;
        let failure = Pipeline::new(config(&server, server.uri()))
            .run(OnboardRequest::for_url("https://www.google.com/maps/place/Hill+Camp/"))
            .await
            .expect_err("parse error");

        assert!(matches!(failure.error, OnboardError::Parse(ParseError::MissingCoordinates)));
        assert_eq!(stages(&failure.steps), vec![("parse", StepStatus::Failed)]);
        assert!(failure.steps[0].message.contains("full URL"));
        let received = server.received_requests().await.expect("recording enabled");
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn unresolvable_place_is_not_found_with_the_hint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/maps/api/place/(nearby|text)search/json$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ZERO_RESULTS", "results": []})))
            .expect(2)
            .mount(&server)
            .await;

        let failure = Pipeline::new(config(&server, server.uri()))
            .run(OnboardRequest::for_url(URL))
            .await
            .expect_err("not found");
        assert!(matches!(failure.error, OnboardError::NotFound { ref name_hint } if name_hint == "Hill Camp"));
        assert_eq!(
            stages(&failure.steps),
            vec![("parse", StepStatus::Ok), ("resolve", StepStatus::Failed)]
        );
    }

    #[tokio::test]
    async fn details_failure_is_fatal_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/maps/api/place/nearbysearch/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "OK", "results": [{"place_id": "pid-hill", "name": "Hill Camp"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/maps/api/place/details/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "REQUEST_DENIED"})))
            .mount(&server)
            .await;

        let failure = Pipeline::new(config(&server, server.uri()))
            .run(OnboardRequest::for_url(URL))
            .await
            .expect_err("details failed");
        assert!(matches!(failure.error, OnboardError::Api(PlacesError::Status { ref status, .. }) if status == "REQUEST_DENIED"));
        assert_eq!(failure.steps.len(), 3);
    }

    #[tokio::test]
    async fn skip_flags_and_missing_credentials_degrade_softly() {
        let server = MockServer::start().await;
        mount_places(&server, 2).await;
        let mut config = config(&server, server.uri());
        config.sheets.spreadsheet_id = None;
        config.publish.api_key = None;

        let mut request = OnboardRequest::for_url(URL);
        request.skip_description = true;
        let result = Pipeline::new(config).run(request).await.expect("run");

        assert!(result.sheet_outcome.is_none());
        assert!(result.publish_outcome.is_none());
        assert_eq!(
            stages(&result.step_log)[3..],
            [
                ("description", StepStatus::Skipped),
                ("sheet", StepStatus::Failed),
                ("publish", StepStatus::Skipped),
            ]
        );
        assert!(result.step_log[4].message.contains("SPREADSHEET_ID"));
    }

    #[tokio::test]
    async fn slow_upstream_hits_the_run_deadline() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/maps/api/place/nearbysearch/json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": "ZERO_RESULTS", "results": []}))
                    .set_delay(std::time::Duration::from_millis(500)),
            )
            .mount(&server)
            .await;
        let mut config = config(&server, server.uri());
        config.run_timeout = Duration::from_millis(50);

        let failure = Pipeline::new(config)
            .run(OnboardRequest::for_url(URL))
            .await
            .expect_err("timed out");
        assert!(matches!(failure.error, OnboardError::TimedOut(_)));
        assert_eq!(
            stages(&failure.steps),
            vec![("parse", StepStatus::Ok), ("run", StepStatus::Failed)]
        );
    }

    #[tokio::test]
    async fn missing_maps_key_is_a_configuration_error() {
        let server = MockServer::start().await;
        let mut config = config(&server, server.uri());
        config.maps.api_key = None;
        let failure = Pipeline::new(config)
            .run(OnboardRequest::for_url(URL))
            .await
            .expect_err("not configured");
        assert!(matches!(failure.error, OnboardError::Configuration(_)));
        assert_eq!(failure.error.code(), "not_configured");
        assert_eq!(stages(&failure.steps), vec![("config", StepStatus::Failed)]);
        let received = server.received_requests().await.expect("recording enabled");
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn slow_publish_after_sheet_write_keeps_the_run_and_the_row() {
        let server = MockServer::start().await;
        mount_places(&server, 0).await;
        mount_empty_sheet(&server).await;
        Mock::given(method("POST"))
            .and(path("/api/fursatphoto/import"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"listingId": "lst_late"}))
                    .set_delay(std::time::Duration::from_millis(1500)),
            )
            .mount(&server)
            .await;
        let mut config = config(&server, server.uri());
        config.run_timeout = Duration::from_millis(700);

        let result = Pipeline::new(config)
            .run(OnboardRequest::for_url(URL))
            .await
            .expect("run completes despite the slow publish");

        assert_eq!(
            result.sheet_outcome,
            Some(SyncOutcome { action: SyncAction::Created, row_number: 2 })
        );
        assert!(result.publish_outcome.is_none());
        assert_eq!(
            stages(&result.step_log)[4..],
            [("sheet", StepStatus::Ok), ("publish", StepStatus::Failed)]
        );
        let publish = result.step_log.last().expect("publish step");
        assert!(publish.message.contains("did not finish"), "{}", publish.message);
    }
}
