use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::health::HealthState;
use crate::api::latency::{LatencyStats, LatencySummary};
use crate::config::BASELINE_WINDOW;
use crate::db::{CatalogStore, SettingsSource, SqliteStore};
use crate::detector::AnomalyDetector;
use crate::error::AppError;
use crate::notify::Notifier;
use crate::sampler::{RunController, RunState, RunStatus};
use crate::state::{CcuBoard, LiveReading};
use crate::types::{now_ms, AnomalySettings, AnomalyWithGame, DeliveryReport, Sample};

#[derive(Clone)]
pub struct ApiState {
    pub store: SqliteStore,
    pub controller: Arc<RunController>,
    pub notifier: Arc<Notifier>,
    pub detector: AnomalyDetector,
    pub board: Arc<CcuBoard>,
    pub latency: Arc<LatencyStats>,
    pub health: Arc<HealthState>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/games", get(get_games))
        .route("/games/:id/samples", get(get_game_samples))
        .route("/games/:id/baseline", get(get_game_baseline))
        .route("/anomalies", get(get_anomalies))
        .route("/anomalies/deliver", post(post_deliver))
        .route("/settings", get(get_settings).put(put_settings))
        .route("/sampling/status", get(get_sampling_status))
        .route("/sampling/start", post(post_sampling_start))
        .route("/sampling/stop", post(post_sampling_stop))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query / body structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct SamplesQuery {
    /// Epoch ms; defaults to 24h ago.
    pub since: Option<i64>,
}

#[derive(Deserialize)]
pub struct AnomaliesQuery {
    pub undelivered: Option<bool>,
    pub limit: Option<i64>,
}

#[derive(Deserialize, Default)]
pub struct StartRequest {
    /// Omit to sample until stopped.
    pub duration_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: i64,
    pub run_state: RunState,
    pub last_sample_at_ms: Option<i64>,
    pub last_delivery_at_ms: Option<i64>,
    pub samples_written: u64,
    pub messages_delivered: u64,
    pub undelivered_anomalies: i64,
    pub failing_games: usize,
}

#[derive(Serialize)]
pub struct GameResponse {
    pub id: i64,
    pub external_id: String,
    pub title: String,
    pub reference_url: String,
    pub live: Option<LiveReading>,
}

#[derive(Serialize)]
pub struct BaselineResponse {
    pub game_id: i64,
    pub window_secs: u64,
    pub mean: f64,
    pub stddev: f64,
    pub sample_count: usize,
}

#[derive(Serialize, Deserialize)]
pub struct StartResponse {
    pub run_id: u64,
}

#[derive(Serialize, Deserialize)]
pub struct StopResponse {
    pub stopped: bool,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Result<Json<HealthResponse>, AppError> {
    let undelivered_anomalies = state.store.count_undelivered().await?;
    // Fall back to the store so a restart still reports the last persisted sample.
    let last_sample_at_ms = match state.health.last_sample_at_ms() {
        Some(t) => Some(t),
        None => state.store.last_sample_at().await?,
    };

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: (now_ms() - state.health.started_at_ms) / 1000,
        run_state: state.controller.status().state,
        last_sample_at_ms,
        last_delivery_at_ms: state.health.last_delivery_at_ms(),
        samples_written: state.health.samples_written(),
        messages_delivered: state.health.messages_delivered(),
        undelivered_anomalies,
        failing_games: state.board.failing_count(),
    }))
}

async fn get_games(State(state): State<ApiState>) -> Result<Json<Vec<GameResponse>>, AppError> {
    let games = state.store.list_games().await?;
    let out = games
        .into_iter()
        .map(|g| GameResponse {
            live: state.board.get(g.id),
            id: g.id,
            external_id: g.external_id,
            title: g.title,
            reference_url: g.reference_url,
        })
        .collect();
    Ok(Json(out))
}

async fn get_game_samples(
    State(state): State<ApiState>,
    Path(game_id): Path<i64>,
    Query(params): Query<SamplesQuery>,
) -> Result<Json<Vec<Sample>>, AppError> {
    require_game(&state, game_id).await?;
    let since = params
        .since
        .unwrap_or_else(|| now_ms() - BASELINE_WINDOW.as_millis() as i64);
    Ok(Json(state.store.recent_samples(game_id, since).await?))
}

async fn get_game_baseline(
    State(state): State<ApiState>,
    Path(game_id): Path<i64>,
) -> Result<Json<BaselineResponse>, AppError> {
    require_game(&state, game_id).await?;
    let b = state.detector.baseline(game_id, now_ms()).await?;
    Ok(Json(BaselineResponse {
        game_id,
        window_secs: BASELINE_WINDOW.as_secs(),
        mean: b.mean,
        stddev: b.stddev,
        sample_count: b.sample_count,
    }))
}

async fn get_anomalies(
    State(state): State<ApiState>,
    Query(params): Query<AnomaliesQuery>,
) -> Result<Json<Vec<AnomalyWithGame>>, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 1000);
    let rows = state
        .store
        .list_anomalies(params.undelivered.unwrap_or(false), limit)
        .await?;
    Ok(Json(rows))
}

async fn post_deliver(State(state): State<ApiState>) -> Result<Json<DeliveryReport>, AppError> {
    Ok(Json(state.notifier.deliver_pending().await?))
}

async fn get_settings(State(state): State<ApiState>) -> Result<Json<AnomalySettings>, AppError> {
    Ok(Json(state.store.anomaly_settings().await?))
}

async fn put_settings(
    State(state): State<ApiState>,
    Json(settings): Json<AnomalySettings>,
) -> Result<Json<AnomalySettings>, AppError> {
    state.store.update_settings(&settings).await?;
    tracing::info!(
        n_sigma = settings.n_sigma,
        min_delta_threshold = settings.min_delta_threshold,
        custom_template = settings.custom_message_template.is_some(),
        "Anomaly settings updated"
    );
    Ok(Json(state.store.anomaly_settings().await?))
}

async fn get_sampling_status(State(state): State<ApiState>) -> Json<RunStatus> {
    Json(state.controller.status())
}

async fn post_sampling_start(
    State(state): State<ApiState>,
    body: Option<Json<StartRequest>>,
) -> Result<Json<StartResponse>, AppError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let run_id = state
        .controller
        .start(req.duration_secs.map(Duration::from_secs))?;
    Ok(Json(StartResponse { run_id }))
}

async fn post_sampling_stop(State(state): State<ApiState>) -> Json<StopResponse> {
    Json(StopResponse {
        stopped: state.controller.stop(),
    })
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySummary> {
    Json(state.latency.summary())
}

async fn require_game(state: &ApiState, game_id: i64) -> Result<(), AppError> {
    match state.store.get_game(game_id).await? {
        Some(_) => Ok(()),
        None => Err(AppError::NotFound(format!("game {game_id}"))),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::notify::MessageChannel;
    use crate::retry::RetryPolicy;
    use crate::sampler::scheduler::tests::ScriptedScraper;
    use crate::sampler::CircularSampler;

    struct AcceptAll;

    #[async_trait]
    impl MessageChannel for AcceptAll {
        async fn deliver(&self, _text: &str) -> bool {
            true
        }

        fn channel_name(&self) -> &str {
            "accept-all"
        }
    }

    async fn test_state() -> ApiState {
        let store = SqliteStore::in_memory().await;
        store.upsert_game("g1", "Alpha", "https://a").await.unwrap();
        let shared = Arc::new(store.clone());
        let detector = AnomalyDetector::new(shared.clone(), shared.clone(), shared.clone());
        let health = Arc::new(HealthState::new());
        let sampler = CircularSampler::new(
            shared.clone(),
            Arc::new(ScriptedScraper::constant(10)),
            detector.clone(),
            RetryPolicy::single_attempt(),
        );
        ApiState {
            controller: RunController::new(Arc::new(sampler)),
            notifier: Arc::new(Notifier::new(shared.clone(), shared, Arc::new(AcceptAll), health.clone())),
            detector,
            board: CcuBoard::new(),
            latency: Arc::new(LatencyStats::new()),
            health,
            store,
        }
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, Vec<u8>) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn settings_are_validated_before_write() {
        let app = router(test_state().await);

        let bad = serde_json::json!({"n_sigma": 0.0, "min_delta_threshold": 10, "custom_message_template": null});
        let (status, _) = send(&app, "PUT", "/settings", Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let good = serde_json::json!({"n_sigma": 2.5, "min_delta_threshold": 20, "custom_message_template": "{title}"});
        let (status, _) = send(&app, "PUT", "/settings", Some(good)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, "GET", "/settings", None).await;
        assert_eq!(status, StatusCode::OK);
        let settings: AnomalySettings = serde_json::from_slice(&body).unwrap();
        assert_eq!(settings.n_sigma, 2.5);
        assert_eq!(settings.custom_message_template.as_deref(), Some("{title}"));
    }

    #[tokio::test]
    async fn unknown_game_is_not_found() {
        let app = router(test_state().await);
        let (status, _) = send(&app, "GET", "/games/999/samples", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, "GET", "/games/1/baseline", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn second_start_conflicts() {
        let state = test_state().await;
        let controller = state.controller.clone();
        let app = router(state);

        let (status, body) = send(&app, "POST", "/sampling/start", None).await;
        assert_eq!(status, StatusCode::OK);
        let started: StartResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(started.run_id, 1);

        let (status, _) = send(&app, "POST", "/sampling/start", Some(serde_json::json!({"duration_secs": 5}))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, body) = send(&app, "POST", "/sampling/stop", None).await;
        let stopped: StopResponse = serde_json::from_slice(&body).unwrap();
        assert!(stopped.stopped);
        controller.join().await;
    }

    #[tokio::test]
    async fn health_reports_pending_count() {
        let app = router(test_state().await);
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        let health: HealthResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.run_state, RunState::Idle);
        assert_eq!(health.undelivered_anomalies, 0);
    }
}
