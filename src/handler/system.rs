use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};
use serde::Serialize;
use uuid::Uuid;

use super::{ApiError, ApiJsonResult, ApiResult};
use crate::{api::RelayState, manager::SessionInfo, transport::Transport};

pub fn system_router<T: Transport>() -> Router<RelayState<T>> {
    Router::new()
        .route("/", get(index))
        .route("/status", get(status::<T>))
        .route(
            "/sessions/{id}",
            get(get_session::<T>).delete(kick_session::<T>),
        )
}

#[derive(Serialize)]
struct RelayStatus {
    pipeline_started: bool,
    viewers: usize,
    sessions: Vec<SessionInfo>,
}

async fn index() -> &'static str {
    "system route!"
}

async fn status<T: Transport>(State(state): State<RelayState<T>>) -> Json<RelayStatus> {
    Json(RelayStatus {
        pipeline_started: state.pipeline_started(),
        viewers: state.sessions.viewers().await,
        sessions: state.sessions.list().await,
    })
}

async fn get_session<T: Transport>(
    State(state): State<RelayState<T>>,
    Path(id): Path<Uuid>,
) -> ApiJsonResult<SessionInfo> {
    state
        .sessions
        .get(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("session {}", id)))
}

/// Close one viewer's session.
async fn kick_session<T: Transport>(
    State(state): State<RelayState<T>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if state.sessions.kick(&id).await {
        log::info!("session {} kicked", id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("session {}", id)))
    }
}
