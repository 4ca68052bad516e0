//! REST surface over the coach and the roster snapshot.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::coach::Coach;
use crate::error::CoachError;
use crate::roster::RosterCache;

const LISTING_LIMIT: usize = 50;
const DEMO_SAMPLES: usize = 3;

#[derive(Clone)]
pub struct AppState {
    pub coach: Arc<Coach>,
    pub roster: Arc<RosterCache>,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub student_id: Option<String>,
}

impl IntoResponse for CoachError {
    fn into_response(self) -> Response {
        let status = match &self {
            CoachError::NotFound(_) => StatusCode::NOT_FOUND,
            CoachError::BadRequest(_) => StatusCode::BAD_REQUEST,
            CoachError::UpstreamUnavailable { .. } => {
                error!(error = %self, "request failed on upstream service");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/api/analyze", post(analyze))
        .route("/api/recommendations", get(recommendations))
        .route("/api/students", get(students))
        .route("/api/learning-styles", get(learning_styles))
        .route("/api/student/:id", get(student))
        .route("/api/compare", post(compare))
        .route("/api/demo", get(demo))
        .route("/api/roster/refresh", post(refresh_roster))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(state: AppState, bind: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "study coach API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
    }
    info!("shutting down");
}

async fn home() -> impl IntoResponse {
    Json(json!({
        "message": "Study Coach API",
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "/api/analyze": "POST - Analyze a specific student",
            "/api/recommendations": "GET - Recommendations for a random student",
            "/api/students": "GET - Students with at least three completed courses",
            "/api/learning-styles": "GET - All learning styles",
            "/api/student/:id": "GET - Profile of one student",
            "/api/compare": "POST - Average GPA per learning style",
            "/api/demo": "GET - A few sample analyses",
            "/api/roster/refresh": "POST - Reload the student roster",
        }
    }))
}

async fn analyze(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Response, CoachError> {
    let student_id = payload
        .ok()
        .and_then(|Json(request)| request.student_id)
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| CoachError::BadRequest("student_id is required".to_string()))?;

    let report = state.coach.analyze(&student_id).await?;
    Ok(Json(report).into_response())
}

async fn recommendations(State(state): State<AppState>) -> Result<Response, CoachError> {
    let roster = state.roster.snapshot().await;
    let picked = roster
        .pick_any()
        .ok_or_else(|| CoachError::NotFound("any eligible student".to_string()))?;
    let report = state.coach.analyze(&picked.id).await?;
    Ok(Json(report).into_response())
}

async fn students(State(state): State<AppState>) -> impl IntoResponse {
    let roster = state.roster.snapshot().await;
    Json(roster.listing(LISTING_LIMIT))
}

async fn learning_styles(State(state): State<AppState>) -> impl IntoResponse {
    let roster = state.roster.snapshot().await;
    Json(roster.learning_styles())
}

async fn student(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, CoachError> {
    let profile = state.coach.profile(&id).await?;
    Ok(Json(profile).into_response())
}

async fn compare(State(state): State<AppState>) -> Result<Response, CoachError> {
    let summaries = state.coach.compare_styles().await?;
    Ok(Json(summaries).into_response())
}

async fn demo(State(state): State<AppState>) -> impl IntoResponse {
    let roster = state.roster.snapshot().await;
    let mut samples = Vec::new();
    for entry in roster.pick_many(DEMO_SAMPLES) {
        match state.coach.analyze(&entry.id).await {
            Ok(report) => samples.push(report),
            Err(err) => warn!(student_id = %entry.id, error = %err, "skipping demo sample"),
        }
    }
    Json(json!({
        "total_samples": samples.len(),
        "sample_recommendations": samples,
    }))
}

async fn refresh_roster(State(state): State<AppState>) -> Result<Response, CoachError> {
    let roster = state.roster.refresh().await?;
    Ok(Json(json!({
        "students": roster.entries.len(),
        "refreshed_at": roster.refreshed_at,
        "success": true,
    }))
    .into_response())
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Endpoint not found" })),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::config::Settings;
    use crate::db::sample_dataset;
    use crate::error::StoreError;
    use crate::models::{PeerRow, RosterEntry, Student, StyleGrade};
    use crate::store::{GraphStore, InMemoryGraphStore};

    /// Database whose connection pool is exhausted for every query but the
    /// start-up roster load.
    #[derive(Default)]
    struct PoolExhausted {
        attempts: AtomicUsize,
    }

    impl PoolExhausted {
        fn fail<T>(&self) -> Result<T, StoreError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
    }

    #[async_trait]
    impl GraphStore for PoolExhausted {
        async fn student(&self, _student_id: &str) -> Result<Option<Student>, StoreError> {
            self.fail()
        }

        async fn peer_rows(
            &self,
            _student_id: &str,
            _threshold: f64,
            _same_degree_only: bool,
        ) -> Result<Vec<PeerRow>, StoreError> {
            self.fail()
        }

        async fn roster(&self) -> Result<Vec<RosterEntry>, StoreError> {
            Ok(Vec::new())
        }

        async fn style_grades(&self) -> Result<Vec<StyleGrade>, StoreError> {
            self.fail()
        }
    }

    async fn app() -> Router {
        let store: Arc<dyn GraphStore> =
            Arc::new(InMemoryGraphStore::from_dataset(&sample_dataset()));
        let roster = RosterCache::load(store.clone(), Duration::from_secs(5))
            .await
            .unwrap();
        router(AppState {
            coach: Arc::new(Coach::new(store, &Settings::default())),
            roster: Arc::new(roster),
        })
    }

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn analyze_returns_full_report() {
        let (status, body) = call(app().await, post_json("/api/analyze", r#"{"student_id":"VS10001"}"#)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["student"]["id"], "VS10001");
        assert_eq!(body["student"]["learningStyle"], "Visual");
        assert_eq!(body["student"]["grades"], json!(["B", "C+", "B-"]));
        assert_eq!(body["analysis"]["target_gpa"], json!(2.67));
        assert_eq!(body["recommendations"][0]["category"], "Academic Performance");
        assert_eq!(body["recommendations"][0]["priority"], "high");
        assert!(body["ai_insight"].is_null());
    }

    #[tokio::test]
    async fn unknown_student_is_404_without_recommendations() {
        let (status, body) = call(app().await, post_json("/api/analyze", r#"{"student_id":"NOPE"}"#)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "error": "Student not found" }));

        let (status, body) = call(app().await, get_request("/api/student/NOPE")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Student not found");
    }

    #[tokio::test]
    async fn missing_student_id_is_400() {
        for payload in [r#"{}"#, r#"{"student_id":"  "}"#, "not json"] {
            let (status, body) = call(app().await, post_json("/api/analyze", payload)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "payload {payload}");
            assert_eq!(body["error"], "student_id is required");
        }
    }

    #[tokio::test]
    async fn roster_endpoints_read_snapshot() {
        let (status, body) = call(app().await, get_request("/api/students")).await;
        assert_eq!(status, StatusCode::OK);
        let listed = body.as_array().unwrap();
        assert_eq!(listed.len(), 7);
        assert!(listed.iter().all(|entry| entry["courseCount"].as_i64().unwrap() >= 3));

        let (_, styles) = call(app().await, get_request("/api/learning-styles")).await;
        assert_eq!(
            styles,
            json!(["Visual", "Auditory", "Kinesthetic", "Reading-Writing"])
        );

        let (status, refreshed) = call(app().await, post_json("/api/roster/refresh", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(refreshed["students"], 9);
    }

    #[tokio::test]
    async fn profile_compare_and_demo() {
        let (status, profile) = call(app().await, get_request("/api/student/VS10002")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(profile["courseCount"], 3);
        assert_eq!(profile["gpa"], json!(3.67));

        let (status, styles) = call(app().await, post_json("/api/compare", "")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(styles
            .as_array()
            .unwrap()
            .iter()
            .all(|summary| summary["total_completions"].as_u64().unwrap() >= 3));

        let (status, demo) = call(app().await, get_request("/api/demo")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(demo["total_samples"], 3);

        let (status, random) = call(app().await, get_request("/api/recommendations")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(random["success"], true);
    }

    #[tokio::test]
    async fn unknown_route_is_json_404() {
        let (status, body) = call(app().await, get_request("/api/nothing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Endpoint not found");
    }

    #[tokio::test]
    async fn graph_store_outage_is_500_without_recommendations() {
        let store = Arc::new(PoolExhausted::default());
        let roster = RosterCache::load(store.clone(), Duration::from_secs(5))
            .await
            .unwrap();
        let app = router(AppState {
            coach: Arc::new(Coach::new(store.clone(), &Settings::default())),
            roster: Arc::new(roster),
        });

        let (status, body) = call(app.clone(), post_json("/api/analyze", r#"{"student_id":"VS10001"}"#)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"]
            .as_str()
            .is_some_and(|message| message.starts_with("graph store unavailable")));
        assert!(body.get("recommendations").is_none());
        assert!(body.get("success").is_none());
        assert_eq!(store.attempts.load(Ordering::SeqCst), 2);

        let (status, body) = call(app, post_json("/api/compare", "")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].is_string());
        assert_eq!(store.attempts.load(Ordering::SeqCst), 4);
    }
}
