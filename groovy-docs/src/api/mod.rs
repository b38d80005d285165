//! HTTP API over the document store.

mod auth_middleware;
mod error;
mod feed;
mod sharing;
mod threads;

pub use auth_middleware::Caller;
pub use error::{ApiError, ApiResult};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use groovy_docs_core::auth::TokenVerifier;
use groovy_docs_core::events::{Event, EventBus};
use groovy_docs_core::model::Node;
use groovy_docs_core::storage::{NewNode, NodeUpdate};
use groovy_docs_core::{Action, Role, Store};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RwLock<Store>>,
    pub events: EventBus,
    /// `None` when no token secret or key set is configured.
    pub verifier: Option<Arc<dyn TokenVerifier>>,
    /// Accept `X-User-Id` style headers when no bearer token is sent.
    pub dev_headers: bool,
}

impl AppState {
    pub fn new(store: Store, verifier: Option<Arc<dyn TokenVerifier>>, dev_headers: bool) -> Self {
        Self {
            store: Arc::new(RwLock::new(store)),
            events: EventBus::new(),
            verifier,
            dev_headers,
        }
    }
}

#[derive(Serialize)]
struct NodeView {
    #[serde(flatten)]
    node: Node,
    role: Role,
}

#[derive(Serialize)]
struct Permissions {
    role: Role,
    actions: BTreeMap<&'static str, bool>,
}

#[derive(Serialize)]
struct Affected {
    ids: Vec<Uuid>,
}

#[derive(Deserialize)]
struct MoveRequest {
    parent_id: Uuid,
}

#[derive(Deserialize)]
struct RestrictRequest {
    restricted: bool,
}

#[derive(Deserialize)]
struct TagsRequest {
    tag_ids: Vec<Uuid>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/root", get(get_root))
        .route("/orgs/{org}/root", post(org_root))
        .route("/nodes", post(create_node))
        .route(
            "/nodes/{id}",
            get(get_node).patch(update_node).delete(delete_node),
        )
        .route("/nodes/{id}/move", put(move_node))
        .route("/nodes/{id}/restore", post(restore_node))
        .route("/nodes/{id}/purge", delete(purge_node))
        .route("/nodes/{id}/children", get(list_children))
        .route("/nodes/{id}/restricted", put(set_restricted))
        .route("/nodes/{id}/tags", put(set_tags))
        .route("/nodes/{id}/permissions", get(permissions))
        .route("/trash", get(list_trash))
        .merge(sharing::routes())
        .merge(threads::routes())
        .merge(feed::routes())
        .with_state(state)
}

async fn get_root(State(state): State<AppState>, caller: Caller) -> ApiResult<Json<NodeView>> {
    let mut store = state.store.write().await;
    let id = store.ensure_root(&caller.user_id)?;
    let node = store.get_node(&caller, id)?.clone();
    Ok(Json(NodeView {
        node,
        role: Role::Admin,
    }))
}

async fn org_root(
    State(state): State<AppState>,
    caller: Caller,
    Path(org): Path<String>,
) -> ApiResult<Json<NodeView>> {
    let mut store = state.store.write().await;
    let id = store.ensure_org_root(&caller, &org)?;
    let node = store.get_node(&caller, id)?.clone();
    let role = store.authorize(id, &caller, Action::View)?;
    Ok(Json(NodeView { node, role }))
}

async fn create_node(
    State(state): State<AppState>,
    caller: Caller,
    Json(req): Json<NewNode>,
) -> ApiResult<(StatusCode, Json<Node>)> {
    let node = state.store.write().await.create_node(&caller, req)?;
    state.events.send(Event::Created { id: node.id });
    Ok((StatusCode::CREATED, Json(node)))
}

async fn get_node(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<NodeView>> {
    let store = state.store.read().await;
    let role = store.authorize(id, &caller, Action::View)?;
    let node = store.get_node(&caller, id)?.clone();
    Ok(Json(NodeView { node, role }))
}

async fn update_node(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(req): Json<NodeUpdate>,
) -> ApiResult<Json<Node>> {
    let node = state.store.write().await.update_node(&caller, id, req)?;
    state.events.send(Event::Updated { id });
    Ok(Json(node))
}

async fn delete_node(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Affected>> {
    let ids = state.store.write().await.soft_delete(&caller, id)?;
    state.events.send(Event::Deleted { id });
    Ok(Json(Affected { ids }))
}

async fn move_node(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(req): Json<MoveRequest>,
) -> ApiResult<StatusCode> {
    state
        .store
        .write()
        .await
        .move_node(&caller, id, req.parent_id)?;
    state.events.send(Event::Moved {
        id,
        new_parent: req.parent_id,
    });
    Ok(StatusCode::NO_CONTENT)
}

async fn restore_node(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Affected>> {
    let ids = state.store.write().await.restore(&caller, id)?;
    state.events.send(Event::Restored { id });
    Ok(Json(Affected { ids }))
}

async fn purge_node(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Affected>> {
    let ids = state.store.write().await.purge(&caller, id)?;
    Ok(Json(Affected { ids }))
}

async fn list_children(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Node>>> {
    let store = state.store.read().await;
    let children = store.children(&caller, id)?.into_iter().cloned().collect();
    Ok(Json(children))
}

async fn set_restricted(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(req): Json<RestrictRequest>,
) -> ApiResult<StatusCode> {
    state
        .store
        .write()
        .await
        .set_restricted(&caller, id, req.restricted)?;
    state.events.send(Event::Updated { id });
    Ok(StatusCode::NO_CONTENT)
}

async fn set_tags(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(req): Json<TagsRequest>,
) -> ApiResult<StatusCode> {
    state
        .store
        .write()
        .await
        .set_node_tags(&caller, id, req.tag_ids)?;
    state.events.send(Event::Updated { id });
    Ok(StatusCode::NO_CONTENT)
}

/// Role plus a yes/no per action, for clients deciding which controls to show.
/// Nodes the caller cannot see are reported missing like everywhere else.
async fn permissions(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Permissions>> {
    let store = state.store.read().await;
    let role = store
        .resolve_role(id, &caller)
        .ok_or(groovy_docs_core::HubError::NotFound("Item"))?;
    let actions = Action::ALL
        .into_iter()
        .map(|a| (a.as_str(), role.allows(a)))
        .collect();
    Ok(Json(Permissions { role, actions }))
}

async fn list_trash(State(state): State<AppState>, caller: Caller) -> Json<Vec<Node>> {
    let store = state.store.read().await;
    Json(store.trash(&caller).into_iter().cloned().collect())
}
