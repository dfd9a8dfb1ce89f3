use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;

use gitdojo_check::Verdict;
use gitdojo_session::{ExecResponse, Executor, PracticeSummary, SessionError, SessionView};
use gitdojo_store::SessionKey;

// ── Config ──

pub struct ServeConfig {
    pub bind: String,
    pub port: u16,
}

// ── App State ──

struct AppState {
    executor: Arc<Executor>,
}

impl AppState {
    fn key(&self, practice_id: &str, learner_id: &str) -> Result<SessionKey, AppError> {
        if learner_id.trim().is_empty() {
            return Err(AppError::BadRequest("learner_id must not be empty".into()));
        }
        if self.executor.practice(practice_id).is_none() {
            return Err(AppError::Session(SessionError::UnknownPractice(
                practice_id.to_string(),
            )));
        }
        Ok(SessionKey::new(learner_id, practice_id))
    }
}

// ── Error Handling ──

enum AppError {
    BadRequest(String),
    Session(SessionError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let err = match self {
            AppError::BadRequest(msg) => {
                let body = serde_json::json!({ "error": msg });
                return (StatusCode::BAD_REQUEST, Json(body)).into_response();
            }
            AppError::Session(err) => err,
        };

        if let Some((stored, current)) = err.reset_required() {
            let body = serde_json::json!({
                "error": err.to_string(),
                "reset_required": true,
                "stored_version": stored,
                "current_version": current,
            });
            return (StatusCode::CONFLICT, Json(body)).into_response();
        }

        let status = match &err {
            SessionError::UnknownPractice(_) => StatusCode::NOT_FOUND,
            SessionError::Invariant(_) | SessionError::Poisoned { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        let body = serde_json::json!({ "error": err.to_string(), "code": err.code() });
        (status, Json(body)).into_response()
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}

// ── Entrypoint ──

pub async fn serve(executor: Arc<Executor>, config: ServeConfig) -> anyhow::Result<()> {
    let app = router(executor);
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "http server listening");
    eprintln!("gitdojo HTTP server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the router (for testing without binding to a port).
pub fn router(executor: Arc<Executor>) -> Router {
    let state = Arc::new(AppState { executor });
    Router::new()
        .route("/api/health", get(health))
        .route("/api/practices", get(get_practices))
        .route("/api/practices/{id}/execute", post(post_execute))
        .route("/api/practices/{id}/state", get(get_state))
        .route("/api/practices/{id}/validate", post(post_validate))
        .route("/api/practices/{id}/reset", post(post_reset))
        .route("/api/practices/{id}/events", get(get_events))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Health ──

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

// ── GET /api/practices ──

#[derive(Serialize)]
struct PracticesResponse {
    practices: Vec<PracticeSummary>,
}

async fn get_practices(State(state): State<Arc<AppState>>) -> Json<PracticesResponse> {
    Json(PracticesResponse {
        practices: state.executor.practices(),
    })
}

// ── POST /api/practices/{id}/execute ──

#[derive(Deserialize)]
struct ExecuteBody {
    learner_id: String,
    command: String,
}

async fn post_execute(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ExecuteBody>,
) -> Result<Json<ExecResponse>, AppError> {
    let key = state.key(&id, &body.learner_id)?;
    let resp = state.executor.execute(&key, &body.command).await?;
    Ok(Json(resp))
}

// ── GET /api/practices/{id}/state ──

#[derive(Deserialize)]
struct LearnerQuery {
    learner_id: String,
}

async fn get_state(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<LearnerQuery>,
) -> Result<Json<SessionView>, AppError> {
    let key = state.key(&id, &params.learner_id)?;
    Ok(Json(state.executor.state(&key).await?))
}

// ── POST /api/practices/{id}/validate ──

#[derive(Deserialize)]
struct LearnerBody {
    learner_id: String,
}

async fn post_validate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<LearnerBody>,
) -> Result<Json<Verdict>, AppError> {
    let key = state.key(&id, &body.learner_id)?;
    Ok(Json(state.executor.validate(&key).await?))
}

// ── POST /api/practices/{id}/reset ──

async fn post_reset(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<LearnerBody>,
) -> Result<Json<SessionView>, AppError> {
    let key = state.key(&id, &body.learner_id)?;
    Ok(Json(state.executor.reset(&key).await?))
}

// ── GET /api/practices/{id}/events ──

/// Server-sent stream of state events for one session.
async fn get_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<LearnerQuery>,
) -> Result<impl IntoResponse, AppError> {
    let key = state.key(&id, &params.learner_id)?;
    let mut rx = state.executor.subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) if event.learner_id == key.learner_id && event.practice_id == key.practice_id => {
                    match Event::default().id(event.id.clone()).json_data(&event) {
                        Ok(sse) => yield Ok::<_, Infallible>(sse),
                        Err(err) => tracing::warn!(%err, "dropping unencodable event"),
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(%key, skipped, "event subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use gitdojo_store::{MemorySnapshotStore, Snapshot, SnapshotStore};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const PRACTICE: &str = r#"
id: first-commit
title: Your first commit
version: 2
goal:
  commands:
    - git add README.md
    - git commit -m init
rules:
  - commit_count: 1
  - { type: clean_working_tree, message: "commit everything you staged" }
"#;

    fn executor(store: Arc<dyn SnapshotStore>) -> Arc<Executor> {
        let practice = gitdojo_check::parse_practice(PRACTICE)
            .unwrap()
            .compile()
            .unwrap();
        Arc::new(Executor::new(store, [practice]))
    }

    fn app() -> Router {
        router(executor(Arc::new(MemorySnapshotStore::new())))
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json(resp: Response) -> serde_json::Value {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    fn exec(command: &str) -> Request<Body> {
        post_json(
            "/api/practices/first-commit/execute",
            serde_json::json!({ "learner_id": "ada", "command": command }),
        )
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let resp = app().oneshot(get_req("/api/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json(resp).await["ok"], true);
    }

    #[tokio::test]
    async fn practices_are_listed() {
        let resp = app().oneshot(get_req("/api/practices")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json(resp).await;
        let list = body["practices"].as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["id"], "first-commit");
        assert_eq!(list[0]["version"], 2);
    }

    #[tokio::test]
    async fn execute_then_validate() {
        let app = app();

        let resp = app.clone().oneshot(exec("git add README.md")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json(resp).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["state"]["head"]["kind"], "attached");

        let resp = app.clone().oneshot(exec("git commit -m init")).await.unwrap();
        let body = json(resp).await;
        assert_eq!(body["ok"], true);
        assert!(body["output"][0].as_str().unwrap().starts_with("[main (root-commit) "));

        let resp = app
            .clone()
            .oneshot(post_json(
                "/api/practices/first-commit/validate",
                serde_json::json!({ "learner_id": "ada" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let verdict = json(resp).await;
        assert_eq!(verdict["is_correct"], true);
        assert_eq!(verdict["score"], 1.0);

        let resp = app
            .oneshot(get_req("/api/practices/first-commit/state?learner_id=ada"))
            .await
            .unwrap();
        let view = json(resp).await;
        assert_eq!(view["history"].as_array().unwrap().len(), 2);
        assert_eq!(view["status"]["branch"], "main");
    }

    #[tokio::test]
    async fn command_errors_are_ok_responses() {
        let resp = app().oneshot(exec("git commit")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json(resp).await;
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"]["kind"], "parse");
        assert!(!body["error"]["message"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_practice_is_404() {
        let resp = app()
            .oneshot(post_json(
                "/api/practices/nope/execute",
                serde_json::json!({ "learner_id": "ada", "command": "git status" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(json(resp).await["code"], "unknown_practice");
    }

    #[tokio::test]
    async fn empty_learner_is_400() {
        let resp = app()
            .oneshot(get_req("/api/practices/first-commit/state?learner_id="))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stale_snapshot_is_409_until_reset() {
        let store = Arc::new(MemorySnapshotStore::new());
        let key = SessionKey::new("ada", "first-commit");
        let mut old = Snapshot::empty("first-commit", 1);
        old.history.push("git status".into());
        store.save(&key, &old).unwrap();
        let app = router(executor(store));

        let resp = app.clone().oneshot(exec("git status")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body = json(resp).await;
        assert_eq!(body["reset_required"], true);
        assert_eq!(body["stored_version"], 1);
        assert_eq!(body["current_version"], 2);

        let resp = app
            .clone()
            .oneshot(post_json(
                "/api/practices/first-commit/reset",
                serde_json::json!({ "learner_id": "ada" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json(resp).await["version"], 2);

        let resp = app.oneshot(exec("git status")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn events_endpoint_streams() {
        let resp = app()
            .oneshot(get_req("/api/practices/first-commit/events?learner_id=ada"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers()["content-type"].to_str().unwrap();
        assert!(content_type.starts_with("text/event-stream"));

        let resp = app()
            .oneshot(get_req("/api/practices/nope/events?learner_id=ada"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
