use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::Store;
use crate::access::{AccessContext, Action, OrgRole, Role};
use crate::error::{HubError, Result};
use crate::links::{generate_token, validate_limits, Redeemable};
use crate::model::{ActivityKind, GrantSource, OrgInviteLink, OrgMembership, ShareLink};

/// Outcome of redeeming a share link.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ShareRedemption {
    pub folder_id: Uuid,
    /// Role the user ends up with on the folder.
    pub role: Role,
    pub use_count: u32,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct InviteRedemption {
    pub membership: OrgMembership,
    pub use_count: u32,
}

impl Store {
    fn unique_token(&self) -> String {
        loop {
            let token = generate_token();
            if !self.share_tokens.contains_key(&token) && !self.invite_tokens.contains_key(&token) {
                return token;
            }
        }
    }

    /// Issue a share link for a folder. The link cannot grant more than the
    /// issuer holds.
    pub fn create_share_link(
        &mut self,
        ctx: &AccessContext,
        folder_id: Uuid,
        role: Role,
        expires_at: Option<DateTime<Utc>>,
        max_uses: Option<u32>,
    ) -> Result<ShareLink> {
        let mine = self.authorize(folder_id, ctx, Action::Invite)?;
        let folder = self.node(folder_id).ok_or(HubError::NotFound("Folder"))?;
        if !folder.is_folder() || folder.is_deleted {
            return Err(HubError::invalid("Share links can only point at live folders"));
        }
        if role > mine {
            return Err(HubError::forbidden(format!("share with the {} role", role)));
        }
        let now = Utc::now();
        validate_limits(expires_at, max_uses, now)?;
        let link = ShareLink {
            id: Uuid::new_v4(),
            token: self.unique_token(),
            folder_id,
            role,
            created_by: ctx.user_id.clone(),
            created_at: now,
            expires_at,
            max_uses,
            use_count: 0,
            is_disabled: false,
        };
        self.share_tokens.insert(link.token.clone(), link.id);
        self.share_links.insert(link.id, link.clone());
        self.save_share_links()?;
        tracing::info!(folder = %folder_id, link = %link.id, %role, "share link created");
        Ok(link)
    }

    /// Look up a link that is usable at `now`.
    pub fn share_link_by_token(&self, token: &str, now: DateTime<Utc>) -> Result<&ShareLink> {
        let link = self
            .share_tokens
            .get(token)
            .and_then(|id| self.share_links.get(id))
            .ok_or(HubError::NotFound("Share link"))?;
        link.check_usable(now)?;
        Ok(link)
    }

    /// Check, count and grant under one `&mut self` borrow, so with the store
    /// behind a lock two redemptions can never both pass the use check.
    pub fn redeem_share_link(&mut self, token: &str, user_id: &str, now: DateTime<Utc>) -> Result<ShareRedemption> {
        let link = self.share_link_by_token(token, now)?;
        let (link_id, folder_id, link_role, issuer) =
            (link.id, link.folder_id, link.role, link.created_by.clone());
        let folder = self.node(folder_id).ok_or(HubError::NotFound("Folder"))?;
        if folder.is_deleted {
            return Err(HubError::NotFound("Folder"));
        }
        if folder.owner_id == user_id {
            return Ok(ShareRedemption {
                folder_id,
                role: Role::Admin,
                use_count: link.use_count,
            });
        }

        let previous = self.grant(folder_id, user_id).cloned();
        let grant = self.upsert_grant(folder_id, user_id, link_role, &issuer, GrantSource::ShareLink, true)?;
        let use_count = match self.count_share_link_use(link_id) {
            Ok(count) => count,
            Err(e) => {
                self.restore_grant(folder_id, user_id, previous);
                return Err(e);
            }
        };
        if let Err(e) =
            self.record_activity(folder_id, user_id, ActivityKind::JoinedViaLink, Some(link_role.to_string()))
        {
            tracing::warn!(folder = %folder_id, error = %e, "failed to record link redemption");
        }
        tracing::info!(folder = %folder_id, link = %link_id, user = user_id, use_count, "share link redeemed");
        Ok(ShareRedemption {
            folder_id,
            role: grant.role,
            use_count,
        })
    }

    /// Bump and persist the use count, undoing the bump if the write fails.
    fn count_share_link_use(&mut self, link_id: Uuid) -> Result<u32> {
        let link = self
            .share_links
            .get_mut(&link_id)
            .ok_or(HubError::NotFound("Share link"))?;
        link.bump_use_count();
        let use_count = link.use_count;
        if let Err(e) = self.save_share_links() {
            if let Some(link) = self.share_links.get_mut(&link_id) {
                link.use_count = use_count - 1;
            }
            return Err(e);
        }
        Ok(use_count)
    }

    pub fn share_links_for_folder(&self, ctx: &AccessContext, folder_id: Uuid) -> Result<Vec<&ShareLink>> {
        self.authorize(folder_id, ctx, Action::Manage)?;
        let mut out: Vec<&ShareLink> = self
            .share_links
            .values()
            .filter(|l| l.folder_id == folder_id)
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    fn share_link_folder(&self, id: Uuid) -> Result<Uuid> {
        self.share_links
            .get(&id)
            .map(|l| l.folder_id)
            .ok_or(HubError::NotFound("Share link"))
    }

    pub fn set_share_link_disabled(&mut self, ctx: &AccessContext, id: Uuid, disabled: bool) -> Result<ShareLink> {
        let folder_id = self.share_link_folder(id)?;
        self.authorize(folder_id, ctx, Action::Manage)?;
        let link = self
            .share_links
            .get_mut(&id)
            .ok_or(HubError::NotFound("Share link"))?;
        link.is_disabled = disabled;
        let link = link.clone();
        self.save_share_links()?;
        Ok(link)
    }

    /// Links are hard deleted; grants made through them stay.
    pub fn delete_share_link(&mut self, ctx: &AccessContext, id: Uuid) -> Result<()> {
        let folder_id = self.share_link_folder(id)?;
        self.authorize(folder_id, ctx, Action::Manage)?;
        if let Some(link) = self.share_links.remove(&id) {
            self.share_tokens.remove(&link.token);
        }
        self.save_share_links()
    }

    pub fn create_invite_link(
        &mut self,
        ctx: &AccessContext,
        org_id: &str,
        role: OrgRole,
        expires_at: Option<DateTime<Utc>>,
        max_uses: Option<u32>,
    ) -> Result<OrgInviteLink> {
        if !ctx.is_org_admin_of(Some(org_id)) {
            return Err(HubError::forbidden("invite people to this organization"));
        }
        let now = Utc::now();
        validate_limits(expires_at, max_uses, now)?;
        let link = OrgInviteLink {
            id: Uuid::new_v4(),
            token: self.unique_token(),
            org_id: org_id.to_string(),
            role,
            created_by: ctx.user_id.clone(),
            created_at: now,
            expires_at,
            max_uses,
            use_count: 0,
            is_disabled: false,
        };
        self.invite_tokens.insert(link.token.clone(), link.id);
        self.invite_links.insert(link.id, link.clone());
        self.save_invite_links()?;
        tracing::info!(org = org_id, link = %link.id, %role, "invite link created");
        Ok(link)
    }

    pub fn invite_link_by_token(&self, token: &str, now: DateTime<Utc>) -> Result<&OrgInviteLink> {
        let link = self
            .invite_tokens
            .get(token)
            .and_then(|id| self.invite_links.get(id))
            .ok_or(HubError::NotFound("Invite link"))?;
        link.check_usable(now)?;
        Ok(link)
    }

    pub fn redeem_invite_link(&mut self, token: &str, user_id: &str, now: DateTime<Utc>) -> Result<InviteRedemption> {
        let link = self.invite_link_by_token(token, now)?;
        let (link_id, org_id, role) = (link.id, link.org_id.clone(), link.role);
        let previous = self.memberships.get(&(org_id.clone(), user_id.to_string())).cloned();
        let membership = self.upsert_membership(&org_id, user_id, role)?;
        let use_count = match self.count_invite_link_use(link_id) {
            Ok(count) => count,
            Err(e) => {
                self.restore_membership(&org_id, user_id, previous);
                return Err(e);
            }
        };
        tracing::info!(org = %org_id, link = %link_id, user = user_id, use_count, "invite link redeemed");
        Ok(InviteRedemption {
            membership,
            use_count,
        })
    }

    fn count_invite_link_use(&mut self, link_id: Uuid) -> Result<u32> {
        let link = self
            .invite_links
            .get_mut(&link_id)
            .ok_or(HubError::NotFound("Invite link"))?;
        link.bump_use_count();
        let use_count = link.use_count;
        if let Err(e) = self.save_invite_links() {
            if let Some(link) = self.invite_links.get_mut(&link_id) {
                link.use_count = use_count - 1;
            }
            return Err(e);
        }
        Ok(use_count)
    }

    pub fn invite_links_for_org(&self, ctx: &AccessContext, org_id: &str) -> Result<Vec<&OrgInviteLink>> {
        if !ctx.is_org_admin_of(Some(org_id)) {
            return Err(HubError::forbidden("manage invites for this organization"));
        }
        let mut out: Vec<&OrgInviteLink> = self
            .invite_links
            .values()
            .filter(|l| l.org_id == org_id)
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    pub fn delete_invite_link(&mut self, ctx: &AccessContext, id: Uuid) -> Result<()> {
        let org_id = self
            .invite_links
            .get(&id)
            .map(|l| l.org_id.clone())
            .ok_or(HubError::NotFound("Invite link"))?;
        if !ctx.is_org_admin_of(Some(&org_id)) {
            return Err(HubError::forbidden("manage invites for this organization"));
        }
        if let Some(link) = self.invite_links.remove(&id) {
            self.invite_tokens.remove(&link.token);
        }
        self.save_invite_links()
    }
}
