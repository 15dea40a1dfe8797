mod catalog;
mod config;
mod fursat;
mod http;
mod idempotency;
mod jobs;
mod listing;
mod llm;
mod maps;
mod messaging;
mod metrics;
mod models;
mod pipeline;
mod security;
mod sheets;
mod supabase;

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Extension, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use fursat::{ListingDraft, PublishError, PublishReceipt};
use idempotency::IdempotencyStore;
use listing::{DescriptionRequest, GeneratedDescription, GenerationError, PropertyDetails};
use llm::LlmError;
use maps::{Coordinates, ParsedPlaceUrl, PlaceDetails, PlacesError, Review};
use messaging::{
    GupshupClient, MessagingConfig, MessagingError, RecentMessage, RecentMessages, SendRequest,
    SendSummary, WebhookEvent,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, OnboardRequest, OnboardingResult};
use pipeline::{OnboardError, OnboardFailure, Pipeline};
use security::{AuthContext, AuthState, require_api_auth};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sheets::{SheetError, SyncMode, SyncOutcome};
use std::{net::SocketAddr, sync::Arc};
use supabase::SupabaseClient;
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "onboard.api", "server crashed: {err:?}");
        std::process::exit(1);
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
    let pipeline = Pipeline::from_env();
    let (queue, _worker) = jobs::JobQueue::spawn(pipeline.clone());
    let state = AppState {
        pipeline,
        queue,
        openapi: Arc::new(load_openapi()),
        idempotency: IdempotencyStore::from_env(),
        prometheus_handle,
        supabase: SupabaseClient::from_env(),
        messaging: GupshupClient::new(MessagingConfig::from_env()),
        inbox: Arc::new(Mutex::new(RecentMessages::new(
            config::env_parse::<usize>("WEBHOOK_BUFFER_CAPACITY")
                .unwrap_or(messaging::webhook::DEFAULT_BUFFER_CAPACITY),
        ))),
    };

    let app = app(state, AuthState::from_env());

    let port: u16 = config::env_parse("PORT").unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "onboard.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

fn load_openapi() -> serde_json::Value {
    serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
        .unwrap_or_else(|_| json!({"openapi": "3.0.3"}))
}

fn app(state: AppState, auth: AuthState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/onboard", post(onboard))
        .nest(
            "/places",
            Router::new()
                .route("/extract", post(extract_place))
                .route("/search", post(search_place))
                .route("/details", post(place_details)),
        )
        .route("/photos/{reference}", get(photo_proxy))
        .route("/descriptions", post(generate_description))
        .route("/sheet/sync", post(sync_sheet))
        .route("/properties", get(list_properties))
        .route("/publish", post(publish_listing))
        .nest(
            "/jobs",
            Router::new()
                .route("/onboard", post(enqueue_onboarding_job))
                .route("/{id}", get(get_job_status)),
        )
        .route("/messages/send", post(send_messages))
        .route("/webhooks/whatsapp", get(recent_messages))
        .route_layer(middleware::from_fn_with_state(auth, require_api_auth));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/webhooks/whatsapp", post(receive_webhook))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit_from_env()))
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    queue: jobs::JobQueue,
    openapi: Arc<serde_json::Value>,
    idempotency: IdempotencyStore,
    prometheus_handle: PrometheusHandle,
    supabase: Option<SupabaseClient>,
    messaging: GupshupClient,
    inbox: Arc<Mutex<RecentMessages>>,
}

/// Liveness check: `GET /health`, no auth.
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "onboard-api",
    }))
}

fn key_matches(headers: &HeaderMap, header_name: &str, env_key: &str) -> bool {
    match config::env_string(env_key) {
        Some(secret) => {
            headers
                .get(header_name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                == secret
        }
        None => true,
    }
}

async fn openapi_json(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    if !key_matches(&headers, "X-Docs-Key", "OPENAPI_KEY") {
        return Err(AppError::Unauthorized("docs"));
    }
    Ok(Json((*state.openapi).clone()))
}

fn body_limit_from_env() -> usize {
    config::env_parse::<usize>("REQUEST_MAX_BYTES")
        .filter(|v| *v > 0)
        .unwrap_or(256 * 1024)
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !key_matches(&headers, "X-Metrics-Key", "METRICS_KEY") {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

/// Runs the whole onboarding pipeline.
///
/// - Method: `POST`
/// - Path: `/onboard`
/// - Auth: `Authorization: Bearer <key>` or `X-Onboard-Key: <key>`
/// - Body: `OnboardRequest`
/// - Response: `OnboardingResult`, or `{error, detail, steps}` on a fatal stage
///
/// An `Idempotency-Key` header replays the first successful result.
async fn onboard(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    headers: HeaderMap,
    Json(payload): Json<OnboardRequest>,
) -> Result<Json<OnboardingResult>, AppError> {
    metrics::inc_requests("/onboard");
    info!(
        target = "onboard.api",
        operator = %context.operator,
        api_key = %context.api_key_id,
        "onboarding invoked",
    );

    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    if let Some(key) = &idempotency_key
        && let Some(existing) = state.idempotency.get(key).await
    {
        info!(target = "onboard.api", run_id = %existing.run_id, "idempotent replay");
        return Ok(Json(existing));
    }

    let result = state.pipeline.run(payload).await?;
    if let Some(key) = &idempotency_key {
        state.idempotency.put(key, &result).await;
    }
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct ExtractRequest {
    url: String,
}

async fn extract_place(
    State(state): State<AppState>,
    Json(req): Json<ExtractRequest>,
) -> Result<Json<ParsedPlaceUrl>, AppError> {
    metrics::inc_requests("/places/extract");
    let parsed = state
        .pipeline
        .parser
        .parse(&req.url)
        .await
        .map_err(|err| AppError::from(OnboardError::from(err)))?;
    Ok(Json(parsed))
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    lat: f64,
    lng: f64,
    #[serde(default)]
    keyword: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    place_id: String,
    place_name: String,
    strategy: maps::resolver::ResolveStrategy,
}

async fn search_place(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    metrics::inc_requests("/places/search");
    let coordinates = Coordinates {
        lat: req.lat,
        lng: req.lng,
    };
    let resolution = maps::resolve(&state.pipeline.places, coordinates, &req.keyword)
        .await
        .map_err(|err| AppError::from(OnboardError::from(err)))?;
    Ok(Json(SearchResponse {
        place_id: resolution.place.place_id,
        place_name: resolution.place.name,
        strategy: resolution.strategy,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetailsRequest {
    place_id: String,
}

async fn place_details(
    State(state): State<AppState>,
    Json(req): Json<DetailsRequest>,
) -> Result<Json<PlaceDetails>, AppError> {
    metrics::inc_requests("/places/details");
    if req.place_id.trim().is_empty() {
        return Err(AppError::BadRequest("placeId is required".into()));
    }
    Ok(Json(state.pipeline.places.details(&req.place_id).await?))
}

#[derive(Debug, Deserialize)]
struct PhotoQuery {
    #[serde(default)]
    preview: bool,
}

/// Streams photo bytes for a reference without exposing the Maps key.
async fn photo_proxy(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    Query(query): Query<PhotoQuery>,
) -> Result<Response, AppError> {
    metrics::inc_requests("/photos");
    let width = if query.preview {
        maps::places::PREVIEW_PHOTO_WIDTH
    } else {
        maps::places::FULL_PHOTO_WIDTH
    };
    let upstream = match state.pipeline.places.photo(&reference, width).await {
        Ok(response) => response,
        Err(PlacesError::MissingApiKey) => return Err(PlacesError::MissingApiKey.into()),
        Err(err) => {
            warn!(target = "onboard.maps", error = %err, "photo fetch failed");
            return Err(AppError::BadRequest("Failed to fetch image".into()));
        }
    };
    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("image/jpeg")
        .to_string();
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "public, max-age=86400".to_string()),
        ],
        Body::from_stream(upstream.bytes_stream()),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeRequest {
    #[serde(default)]
    reviews: Vec<Review>,
    rating: Option<f64>,
    total_reviews: Option<u32>,
    #[serde(default)]
    place_name: String,
}

async fn generate_description(
    State(state): State<AppState>,
    Json(req): Json<DescribeRequest>,
) -> Result<Json<GeneratedDescription>, AppError> {
    metrics::inc_requests("/descriptions");
    let generated = listing::description::generate(
        &state.pipeline.llm,
        DescriptionRequest {
            reviews: &req.reviews,
            rating: req.rating,
            total_reviews: req.total_reviews,
            place_name: &req.place_name,
        },
    )
    .await?;
    Ok(Json(generated))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetSyncRequest {
    property_details: PropertyDetails,
    #[serde(default)]
    mode: SyncMode,
}

async fn sync_sheet(
    State(state): State<AppState>,
    Json(req): Json<SheetSyncRequest>,
) -> Result<Json<SyncOutcome>, AppError> {
    metrics::inc_requests("/sheet/sync");
    if req.property_details.property_name.trim().is_empty() {
        return Err(AppError::BadRequest("propertyDetails.propertyName is required".into()));
    }
    let outcome = sheets::upsert(&state.pipeline.sheet, &req.property_details, req.mode).await?;
    Ok(Json(outcome))
}

async fn list_properties(State(state): State<AppState>) -> Json<catalog::PropertyCatalog> {
    metrics::inc_requests("/properties");
    Json(catalog::list_properties(&state.pipeline.sheet, state.supabase.as_ref()).await)
}

async fn publish_listing(
    State(state): State<AppState>,
    Json(draft): Json<ListingDraft>,
) -> Result<Json<PublishReceipt>, AppError> {
    metrics::inc_requests("/publish");
    Ok(Json(state.pipeline.publisher.publish(&draft).await?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EnqueueResponse {
    job_id: String,
}

async fn enqueue_onboarding_job(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(payload): Json<OnboardRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), AppError> {
    metrics::inc_requests("/jobs/onboard");
    let id = state
        .queue
        .enqueue_onboarding(payload, context)
        .await
        .map_err(|err| AppError::Unavailable(err.to_string()))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id: id.to_string(),
        }),
    ))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(AppError::BadRequest("invalid job id".into()));
    };
    state
        .queue
        .get(uuid)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("job {id} not found")))
}

async fn send_messages(
    State(state): State<AppState>,
    Json(req): Json<SendRequest>,
) -> Result<Json<SendSummary>, AppError> {
    metrics::inc_requests("/messages/send");
    Ok(Json(state.messaging.send_batch(req.into_messages()).await?))
}

/// Relay callback. Always answers 200 with an empty body so the relay never
/// retries; malformed payloads are logged and dropped.
async fn receive_webhook(State(state): State<AppState>, body: Bytes) -> StatusCode {
    metrics::inc_requests("/webhooks/whatsapp");
    let value: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(err) => {
            warn!(target = "onboard.messaging", error = %err, "webhook body is not JSON");
            return StatusCode::OK;
        }
    };
    match WebhookEvent::from_value(value) {
        WebhookEvent::InboundMessage(message) => {
            let recent = RecentMessage::from(&message);
            info!(
                target = "onboard.messaging",
                phone = %recent.phone,
                kind = %recent.kind,
                "inbound message"
            );
            state.inbox.lock().await.push(recent);
        }
        WebhookEvent::StatusUpdate(update) => {
            info!(
                target = "onboard.messaging",
                message_id = %update.payload.id,
                status = %update.payload.status,
                destination = %update.payload.destination,
                "delivery status"
            );
        }
        WebhookEvent::Unknown(raw) => {
            let kind = raw.get("type").and_then(|v| v.as_str()).unwrap_or("none");
            info!(target = "onboard.messaging", kind, "unhandled webhook type");
        }
    }
    StatusCode::OK
}

#[derive(Debug, Serialize)]
struct RecentMessagesResponse {
    count: usize,
    messages: Vec<RecentMessage>,
}

async fn recent_messages(State(state): State<AppState>) -> Json<RecentMessagesResponse> {
    let inbox = state.inbox.lock().await;
    Json(RecentMessagesResponse {
        count: inbox.len(),
        messages: inbox.recent(messaging::webhook::RECENT_LIMIT),
    })
}

#[derive(Debug)]
enum AppError {
    Onboard(OnboardFailure),
    Places(PlacesError),
    Description(GenerationError),
    Sheet(SheetError),
    Publish(PublishError),
    Messaging(MessagingError),
    BadRequest(String),
    NotFound(String),
    Unauthorized(&'static str),
    Unavailable(String),
}

impl From<OnboardFailure> for AppError {
    fn from(value: OnboardFailure) -> Self {
        Self::Onboard(value)
    }
}

impl From<OnboardError> for AppError {
    fn from(error: OnboardError) -> Self {
        Self::Onboard(OnboardFailure {
            error,
            steps: Vec::new(),
        })
    }
}

impl From<PlacesError> for AppError {
    fn from(value: PlacesError) -> Self {
        Self::Places(value)
    }
}

impl From<GenerationError> for AppError {
    fn from(value: GenerationError) -> Self {
        Self::Description(value)
    }
}

impl From<SheetError> for AppError {
    fn from(value: SheetError) -> Self {
        Self::Sheet(value)
    }
}

impl From<PublishError> for AppError {
    fn from(value: PublishError) -> Self {
        Self::Publish(value)
    }
}

impl From<MessagingError> for AppError {
    fn from(value: MessagingError) -> Self {
        Self::Messaging(value)
    }
}

fn onboard_status(error: &OnboardError) -> StatusCode {
    match error {
        OnboardError::Parse(_) => StatusCode::BAD_REQUEST,
        OnboardError::NotFound { .. } => StatusCode::NOT_FOUND,
        OnboardError::Api(_) => StatusCode::BAD_GATEWAY,
        OnboardError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        OnboardError::TimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, payload) = match self {
            AppError::Onboard(failure) => {
                let status = onboard_status(&failure.error);
                let payload = ApiError {
                    error: failure.error.code().to_string(),
                    detail: Some(failure.error.to_string()),
                    steps: failure.steps,
                };
                (status, payload)
            }
            AppError::Places(err) => {
                let status = match err {
                    PlacesError::MissingApiKey => StatusCode::INTERNAL_SERVER_ERROR,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (status, ApiError::new("places_error", err.to_string()))
            }
            AppError::Description(err) => {
                let status = match err {
                    GenerationError::NoReviews => StatusCode::BAD_REQUEST,
                    GenerationError::Llm(LlmError::MissingApiKey) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                    _ => StatusCode::BAD_GATEWAY,
                };
                (status, ApiError::new("description_error", err.to_string()))
            }
            AppError::Sheet(err) => {
                let status = match err {
                    SheetError::NotConfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
                    SheetError::MissingHeaderRow => StatusCode::UNPROCESSABLE_ENTITY,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (status, ApiError::new("sheet_error", err.to_string()))
            }
            AppError::Publish(err) => {
                let status = match err {
                    PublishError::NotConfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (status, ApiError::new("publish_error", err.to_string()))
            }
            AppError::Messaging(err) => {
                let status = match err {
                    MessagingError::NotConfigured => StatusCode::INTERNAL_SERVER_ERROR,
                    MessagingError::Empty | MessagingError::Invalid(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (status, ApiError::new("messaging_error", err.to_string()))
            }
            AppError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, ApiError::new("bad_request", detail))
            }
            AppError::NotFound(detail) => (StatusCode::NOT_FOUND, ApiError::new("not_found", detail)),
            AppError::Unauthorized(scope) => {
                (StatusCode::UNAUTHORIZED, ApiError::new("unauthorized", scope))
            }
            AppError::Unavailable(detail) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ApiError::new("unavailable", detail),
            ),
        };
        if status.is_server_error() {
            warn!(target = "onboard.api", status = status.as_u16(), error = %payload.error, "request failed");
        }
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
