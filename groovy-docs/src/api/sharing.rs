//! Folder grants, share links and organization invites.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use groovy_docs_core::dashboard::NodeSummary;
use groovy_docs_core::events::Event;
use groovy_docs_core::links::Redeemable;
use groovy_docs_core::model::{FolderAccess, OrgInviteLink, OrgMembership, ShareLink};
use groovy_docs_core::storage::{InviteRedemption, ShareRedemption};
use groovy_docs_core::{AccessResolver, OrgRole, Role};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ApiResult, AppState, Caller};

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/folders/{id}/access",
            get(list_access).post(grant_access).delete(revoke_access),
        )
        .route("/shared", get(shared_with_me))
        .route("/folders/{id}/links", get(list_links).post(create_link))
        .route("/links/{token}", get(preview_link))
        .route("/links/{token}/redeem", post(redeem_link))
        .route("/links/id/{id}/disabled", put(set_link_disabled))
        .route("/links/id/{id}", axum::routing::delete(delete_link))
        .route("/orgs/{org}/invites", get(list_invites).post(create_invite))
        .route("/orgs/{org}/members", get(list_members))
        .route("/invites/{token}", get(preview_invite))
        .route("/invites/{token}/redeem", post(redeem_invite))
        .route("/invites/id/{id}", axum::routing::delete(delete_invite))
}

#[derive(Deserialize)]
struct GrantRequest {
    user_id: String,
    role: Role,
}

#[derive(Deserialize)]
struct RevokeRequest {
    user_id: String,
}

#[derive(Deserialize)]
struct LinkRequest<R> {
    role: R,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    max_uses: Option<u32>,
}

#[derive(Deserialize)]
struct DisableRequest {
    disabled: bool,
}

/// What a recipient sees before redeeming a share link.
#[derive(Serialize)]
struct LinkPreview {
    folder_id: Uuid,
    folder_title: String,
    role: Role,
    expires_at: Option<DateTime<Utc>>,
    remaining_uses: Option<u32>,
}

#[derive(Serialize)]
struct InvitePreview {
    org_id: String,
    role: OrgRole,
    expires_at: Option<DateTime<Utc>>,
    remaining_uses: Option<u32>,
}

async fn list_access(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<FolderAccess>>> {
    let store = state.store.read().await;
    Ok(Json(store.list_access(&caller, id)?.into_iter().cloned().collect()))
}

async fn grant_access(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(req): Json<GrantRequest>,
) -> ApiResult<Json<FolderAccess>> {
    let grant = state
        .store
        .write()
        .await
        .grant_access(&caller, id, &req.user_id, req.role)?;
    state.events.send(Event::Shared {
        id,
        user: grant.user_id.clone(),
    });
    Ok(Json(grant))
}

async fn revoke_access(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(req): Json<RevokeRequest>,
) -> ApiResult<StatusCode> {
    state
        .store
        .write()
        .await
        .revoke_access(&caller, id, &req.user_id)?;
    state.events.send(Event::Unshared {
        id,
        user: req.user_id,
    });
    Ok(StatusCode::NO_CONTENT)
}

async fn shared_with_me(State(state): State<AppState>, caller: Caller) -> Json<Vec<NodeSummary>> {
    let store = state.store.read().await;
    let mut resolver = AccessResolver::new(&store, &caller);
    let folders = store
        .shared_with(&caller.user_id)
        .into_iter()
        .filter_map(|n| resolver.resolve(n.id).map(|role| NodeSummary::from_node(n, role)))
        .collect();
    Json(folders)
}

async fn list_links(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<ShareLink>>> {
    let store = state.store.read().await;
    Ok(Json(
        store
            .share_links_for_folder(&caller, id)?
            .into_iter()
            .cloned()
            .collect(),
    ))
}

async fn create_link(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(req): Json<LinkRequest<Role>>,
) -> ApiResult<(StatusCode, Json<ShareLink>)> {
    let link = state.store.write().await.create_share_link(
        &caller,
        id,
        req.role,
        req.expires_at,
        req.max_uses,
    )?;
    Ok((StatusCode::CREATED, Json(link)))
}

async fn preview_link(
    State(state): State<AppState>,
    _caller: Caller,
    Path(token): Path<String>,
) -> ApiResult<Json<LinkPreview>> {
    let store = state.store.read().await;
    let link = store.share_link_by_token(&token, Utc::now())?;
    let folder = store
        .node(link.folder_id)
        .filter(|f| !f.is_deleted)
        .ok_or(groovy_docs_core::HubError::NotFound("Folder"))?;
    Ok(Json(LinkPreview {
        folder_id: folder.id,
        folder_title: folder.title.clone(),
        role: link.role,
        expires_at: link.expires_at,
        remaining_uses: link.remaining_uses(),
    }))
}

async fn redeem_link(
    State(state): State<AppState>,
    caller: Caller,
    Path(token): Path<String>,
) -> ApiResult<Json<ShareRedemption>> {
    let redemption = {
        let mut store = state.store.write().await;
        match store.redeem_share_link(&token, &caller.user_id, Utc::now()) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(user = %caller.user_id, error = %e, "share link redemption refused");
                return Err(e.into());
            }
        }
    };
    state.events.send(Event::LinkRedeemed {
        id: redemption.folder_id,
        user: caller.user_id.clone(),
    });
    Ok(Json(redemption))
}

async fn set_link_disabled(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    Json(req): Json<DisableRequest>,
) -> ApiResult<Json<ShareLink>> {
    let link = state
        .store
        .write()
        .await
        .set_share_link_disabled(&caller, id, req.disabled)?;
    Ok(Json(link))
}

async fn delete_link(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.store.write().await.delete_share_link(&caller, id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_invites(
    State(state): State<AppState>,
    caller: Caller,
    Path(org): Path<String>,
) -> ApiResult<Json<Vec<OrgInviteLink>>> {
    let store = state.store.read().await;
    Ok(Json(
        store
            .invite_links_for_org(&caller, &org)?
            .into_iter()
            .cloned()
            .collect(),
    ))
}

async fn create_invite(
    State(state): State<AppState>,
    caller: Caller,
    Path(org): Path<String>,
    Json(req): Json<LinkRequest<OrgRole>>,
) -> ApiResult<(StatusCode, Json<OrgInviteLink>)> {
    let link = state.store.write().await.create_invite_link(
        &caller,
        &org,
        req.role,
        req.expires_at,
        req.max_uses,
    )?;
    Ok((StatusCode::CREATED, Json(link)))
}

async fn list_members(
    State(state): State<AppState>,
    caller: Caller,
    Path(org): Path<String>,
) -> ApiResult<Json<Vec<OrgMembership>>> {
    let store = state.store.read().await;
    Ok(Json(store.org_members(&caller, &org)?.into_iter().cloned().collect()))
}

async fn preview_invite(
    State(state): State<AppState>,
    _caller: Caller,
    Path(token): Path<String>,
) -> ApiResult<Json<InvitePreview>> {
    let store = state.store.read().await;
    let link = store.invite_link_by_token(&token, Utc::now())?;
    Ok(Json(InvitePreview {
        org_id: link.org_id.clone(),
        role: link.role,
        expires_at: link.expires_at,
        remaining_uses: link.remaining_uses(),
    }))
}

async fn redeem_invite(
    State(state): State<AppState>,
    caller: Caller,
    Path(token): Path<String>,
) -> ApiResult<Json<InviteRedemption>> {
    let redemption = state
        .store
        .write()
        .await
        .redeem_invite_link(&token, &caller.user_id, Utc::now())
        .map_err(|e| {
            tracing::warn!(user = %caller.user_id, error = %e, "invite redemption refused");
            e
        })?;
    Ok(Json(redemption))
}

async fn delete_invite(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.store.write().await.delete_invite_link(&caller, id)?;
    Ok(StatusCode::NO_CONTENT)
}
