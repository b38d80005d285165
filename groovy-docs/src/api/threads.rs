use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use groovy_docs_core::events::Event;
use groovy_docs_core::model::{Comment, Mention, Thread};
use groovy_docs_core::storage::ThreadView;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ApiResult, AppState, Caller};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/nodes/{id}/threads", get(list_threads).post(create_thread))
        .route("/threads/{id}/comments", post(add_comment))
        .route("/threads/{id}/resolved", put(set_resolved))
        .route("/mentions", get(list_mentions))
        .route("/mentions/read", post(mark_all_read))
        .route("/mentions/{id}/read", post(mark_read))
}

#[derive(Deserialize)]
struct ThreadRequest {
    #[serde(default)]
    quote: Option<String>,
    body: String,
}

#[derive(Deserialize)]
struct CommentRequest {
    body: String,
}

#[derive(Deserialize)]
struct ResolveRequest {
    resolved: bool,
}

#[derive(Deserialize)]
struct MentionQuery {
    #[serde(default)]
    unread: bool,
}

#[derive(Serialize)]
struct MarkedRead {
    updated: usize,
}

async fn list_threads(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<ThreadView>>> {
    let store = state.store.read().await;
    Ok(Json(store.threads_for_node(&caller, id)?))
}

async fn create_thread(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(req): Json<ThreadRequest>,
) -> ApiResult<(StatusCode, Json<ThreadView>)> {
    let view = state
        .store
        .write()
        .await
        .create_thread(&caller, id, req.quote, &req.body)?;
    state.events.send(Event::Commented {
        id,
        thread: view.thread.id,
    });
    Ok((StatusCode::CREATED, Json(view)))
}

async fn add_comment(
    State(state): State<AppState>,
    caller: Caller,
    Path(thread_id): Path<Uuid>,
    Json(req): Json<CommentRequest>,
) -> ApiResult<(StatusCode, Json<Comment>)> {
    let (comment, node_id) = {
        let mut store = state.store.write().await;
        let comment = store.add_comment(&caller, thread_id, &req.body)?;
        let node_id = store.thread(thread_id).map(|t| t.node_id);
        (comment, node_id)
    };
    if let Some(id) = node_id {
        state.events.send(Event::Commented {
            id,
            thread: thread_id,
        });
    }
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn set_resolved(
    State(state): State<AppState>,
    caller: Caller,
    Path(thread_id): Path<Uuid>,
    Json(req): Json<ResolveRequest>,
) -> ApiResult<Json<Thread>> {
    let thread = state
        .store
        .write()
        .await
        .set_thread_resolved(&caller, thread_id, req.resolved)?;
    Ok(Json(thread))
}

async fn list_mentions(
    State(state): State<AppState>,
    caller: Caller,
    Query(q): Query<MentionQuery>,
) -> Json<Vec<Mention>> {
    let store = state.store.read().await;
    Json(
        store
            .mentions_for_user(&caller, q.unread)
            .into_iter()
            .cloned()
            .collect(),
    )
}

async fn mark_read(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.store.write().await.mark_mention_read(&caller, id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn mark_all_read(State(state): State<AppState>, caller: Caller) -> ApiResult<Json<MarkedRead>> {
    let updated = state.store.write().await.mark_all_mentions_read(&caller)?;
    Ok(Json(MarkedRead { updated }))
}
