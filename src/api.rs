use crate::batch::{JobError, ParseJob};
use crate::data_structures::{NewInfo, SharedStore};
use axum::{
    extract::{FromRef, Json, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tracing::{debug, error, info, instrument, warn};

#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub job: ParseJob,
}

impl FromRef<AppState> for SharedStore {
    fn from_ref(app_state: &AppState) -> SharedStore {
        app_state.store.clone()
    }
}

impl FromRef<AppState> for ParseJob {
    fn from_ref(app_state: &AppState) -> ParseJob {
        app_state.job.clone()
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/infos", get(list_infos_handler).post(create_info_handler))
        .route("/api/infos/parse", get(parse_infos_handler))
        .route("/api/infos/{id}", get(get_info_handler).delete(delete_info_handler))
        .route("/api/infos/{id}/tracerts", get(get_tracerts_handler))
        .route("/api/infos/{id}/judge", get(get_judge_handler))
        .route("/api/judges", get(list_judges_handler))
        .route("/api/judges/export", get(export_judges_handler))
        .with_state(state)
}

pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[instrument(skip(job))]
pub async fn parse_infos_handler(State(job): State<ParseJob>) -> Response {
    debug!("Received request to parse infos");

    match job.try_run().await {
        Ok(report) => {
            info!(total = report.total, judged = report.judged, "Parse request completed");
            (StatusCode::OK, Json(report)).into_response()
        }
        Err(JobError::Busy) => (StatusCode::CONFLICT, "Parse batch already running").into_response(),
        Err(e) => {
            error!(error = %e, "Parse batch did not complete");
            (StatusCode::INTERNAL_SERVER_ERROR, "Parse batch failed").into_response()
        }
    }
}

#[instrument(skip(store, job, payload), fields(title = %payload.title))]
pub async fn create_info_handler(
    State(store): State<SharedStore>,
    State(job): State<ParseJob>,
    Json(payload): Json<NewInfo>,
) -> Response {
    if payload.id.is_some() {
        warn!("Rejected new info that already has an id");
        return (StatusCode::BAD_REQUEST, "A new info cannot already have an id").into_response();
    }
    if payload.title.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "Title must not be blank").into_response();
    }

    let created = store.lock().await.insert_info(payload);
    job.persist().await;
    info!(info_id = created.id, "Created info");
    (StatusCode::CREATED, Json(created)).into_response()
}

#[instrument(skip(store))]
pub async fn list_infos_handler(State(store): State<SharedStore>) -> impl IntoResponse {
    let infos = store.lock().await.infos();
    debug!(count = infos.len(), "Returning infos");
    Json(infos)
}

#[instrument(skip(store))]
pub async fn get_info_handler(State(store): State<SharedStore>, Path(id): Path<u64>) -> Response {
    match store.lock().await.info(id) {
        Some(info) => Json(info.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[instrument(skip(store, job))]
pub async fn delete_info_handler(
    State(store): State<SharedStore>,
    State(job): State<ParseJob>,
    Path(id): Path<u64>,
) -> Response {
    let removed = store.lock().await.remove_info(id);
    match removed {
        Some(_) => {
            job.persist().await;
            info!(info_id = id, "Deleted info with its tracerts and judge");
            StatusCode::OK.into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[instrument(skip(store))]
pub async fn get_tracerts_handler(State(store): State<SharedStore>, Path(id): Path<u64>) -> Response {
    let guard = store.lock().await;
    if guard.info(id).is_none() {
        return StatusCode::NOT_FOUND.into_response();
    }
    Json(guard.tracerts_for(id).to_vec()).into_response()
}

#[instrument(skip(store))]
pub async fn get_judge_handler(State(store): State<SharedStore>, Path(id): Path<u64>) -> Response {
    match store.lock().await.judge_for(id) {
        Some(judge) => Json(judge.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct RankingParams {
    pub limit: Option<usize>,
}

#[instrument(skip(store))]
pub async fn list_judges_handler(
    State(store): State<SharedStore>,
    Query(params): Query<RankingParams>,
) -> impl IntoResponse {
    let mut ranking = store.lock().await.ranking();
    if let Some(limit) = params.limit {
        ranking.truncate(limit);
    }
    debug!(count = ranking.len(), "Returning judge ranking");
    Json(ranking)
}

#[instrument(skip(store))]
pub async fn export_judges_handler(State(store): State<SharedStore>) -> Response {
    let ranking = store.lock().await.ranking();

    let mut writer = csv::Writer::from_writer(Vec::new());
    for judge in &ranking {
        if let Err(e) = writer.serialize(judge) {
            error!(error = %e, "Failed to write judge as CSV");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to export judges").into_response();
        }
    }

    match writer.into_inner() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, "text/csv; charset=utf-8")], body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to flush CSV export");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to export judges").into_response()
        }
    }
}
