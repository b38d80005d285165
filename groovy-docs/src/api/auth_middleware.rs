//! Caller identity for every request.
//!
//! A valid bearer token wins. Without one, the `X-User-Id` / `X-Org-Id` /
//! `X-Org-Role` development headers are accepted when the server allows them.
//! A token that names an organization but carries no role falls back to the
//! membership recorded when the user redeemed an invite link.

use axum::extract::FromRequestParts;
use axum::http::{request::Parts, HeaderMap};
use groovy_docs_core::auth::Claims;
use groovy_docs_core::{AccessContext, OrgRole};
use std::ops::Deref;

use super::error::ApiError;
use super::AppState;

/// The authenticated caller.
#[derive(Clone, Debug)]
pub struct Caller(pub AccessContext);

impl Deref for Caller {
    type Target = AccessContext;

    fn deref(&self) -> &AccessContext {
        &self.0
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    header(headers, "Authorization").and_then(|v| v.strip_prefix("Bearer "))
}

async fn claims_from_request(parts: &Parts, state: &AppState) -> Result<Option<Claims>, ApiError> {
    let Some(token) = bearer(&parts.headers) else {
        return Ok(None);
    };
    let Some(verifier) = &state.verifier else {
        tracing::debug!("bearer token sent but no verifier is configured");
        return Err(ApiError::unauthorized());
    };
    match verifier.verify(token).await {
        Some(claims) => Ok(Some(claims)),
        None => Err(ApiError::unauthorized()),
    }
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let (user_id, org_id, org_role) = match claims_from_request(parts, state).await? {
            Some(claims) => {
                let role = claims.org_role();
                (claims.sub, claims.org_id, role)
            }
            None if state.dev_headers => {
                let user = header(&parts.headers, "X-User-Id").ok_or_else(ApiError::unauthorized)?;
                let role = header(&parts.headers, "X-Org-Role").and_then(|r| r.parse::<OrgRole>().ok());
                (
                    user.to_string(),
                    header(&parts.headers, "X-Org-Id").map(String::from),
                    role,
                )
            }
            None => return Err(ApiError::unauthorized()),
        };

        let org_role = match (&org_id, org_role) {
            (Some(org), None) => state.store.read().await.org_role(org, &user_id),
            (_, role) => role,
        };
        Ok(Caller(AccessContext {
            user_id,
            org_id,
            org_role,
        }))
    }
}
