//! Activity, exports, tags, the dashboard and the live event stream.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{self, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use groovy_docs_core::dashboard::{dashboard, Dashboard};
use groovy_docs_core::model::{Activity, ExportFormat, ExportRecord, Tag};
use groovy_docs_core::{AccessResolver, Action};
use serde::Deserialize;
use std::convert::Infallible;
use uuid::Uuid;

use super::{ApiResult, AppState, Caller};

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 200;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/nodes/{id}/activity", get(node_activity))
        .route("/activity", get(recent_activity))
        .route("/nodes/{id}/exports", post(record_export))
        .route("/exports", get(list_exports))
        .route("/tags", get(list_tags).post(create_tag))
        .route("/dashboard", get(get_dashboard))
        .route("/events", get(event_stream))
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

impl LimitQuery {
    fn get(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

#[derive(Deserialize)]
struct ExportRequest {
    format: ExportFormat,
}

#[derive(Deserialize)]
struct TagRequest {
    name: String,
    #[serde(default)]
    color: Option<String>,
}

async fn node_activity(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Query(q): Query<LimitQuery>,
) -> ApiResult<Json<Vec<Activity>>> {
    let store = state.store.read().await;
    let entries = store.activity_for_node(&caller, id, q.get())?;
    Ok(Json(entries.into_iter().cloned().collect()))
}

async fn recent_activity(
    State(state): State<AppState>,
    caller: Caller,
    Query(q): Query<LimitQuery>,
) -> Json<Vec<Activity>> {
    let store = state.store.read().await;
    let mut resolver = AccessResolver::new(&store, &caller);
    Json(
        store
            .recent_activity(&mut resolver, q.get())
            .into_iter()
            .cloned()
            .collect(),
    )
}

async fn record_export(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(req): Json<ExportRequest>,
) -> ApiResult<(StatusCode, Json<ExportRecord>)> {
    let record = state
        .store
        .write()
        .await
        .record_export(&caller, id, req.format)?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_exports(
    State(state): State<AppState>,
    caller: Caller,
    Query(q): Query<LimitQuery>,
) -> Json<Vec<ExportRecord>> {
    let store = state.store.read().await;
    Json(
        store
            .exports_for_user(&caller.user_id, q.get())
            .into_iter()
            .cloned()
            .collect(),
    )
}

async fn list_tags(State(state): State<AppState>, caller: Caller) -> Json<Vec<Tag>> {
    let store = state.store.read().await;
    Json(store.list_tags(&caller).into_iter().cloned().collect())
}

async fn create_tag(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<TagRequest>,
) -> ApiResult<(StatusCode, Json<Tag>)> {
    let tag = state
        .store
        .write()
        .await
        .create_tag(&caller, &req.name, req.color)?;
    Ok((StatusCode::CREATED, Json(tag)))
}

async fn get_dashboard(
    State(state): State<AppState>,
    caller: Caller,
    Query(q): Query<LimitQuery>,
) -> Json<Dashboard> {
    let store = state.store.read().await;
    Json(dashboard(&store, &caller, q.get()))
}

/// Server-sent events for nodes the caller can currently view.
async fn event_stream(
    State(state): State<AppState>,
    caller: Caller,
) -> Sse<impl Stream<Item = Result<sse::Event, Infallible>>> {
    let rx = state.events.subscribe();
    let store = state.store.clone();
    let ctx = caller.0;
    let stream = tokio_stream::wrappers::BroadcastStream::new(rx).filter_map(move |res| {
        let store = store.clone();
        let ctx = ctx.clone();
        async move {
            let evt = match res {
                Ok(evt) => evt,
                Err(e) => {
                    tracing::debug!(error = %e, "event subscriber lagged");
                    return None;
                }
            };
            let allowed = store
                .read()
                .await
                .can_perform(evt.node_id(), &ctx, Action::View);
            if !allowed {
                return None;
            }
            let data = serde_json::to_string(&evt).ok()?;
            Some(Ok(sse::Event::default().data(data)))
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
