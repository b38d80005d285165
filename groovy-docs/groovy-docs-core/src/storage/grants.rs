use chrono::Utc;
use uuid::Uuid;

use super::Store;
use crate::access::{AccessContext, Action, OrgRole, Role};
use crate::error::{HubError, Result};
use crate::model::{ActivityKind, FolderAccess, GrantSource, Node, OrgMembership};

impl Store {
    /// Insert or update a grant. An existing higher role is kept when
    /// `keep_higher` is set, so link redemption never downgrades anyone.
    /// A failed write leaves the in-memory grants untouched.
    pub(super) fn upsert_grant(
        &mut self,
        folder_id: Uuid,
        user_id: &str,
        role: Role,
        granted_by: &str,
        source: GrantSource,
        keep_higher: bool,
    ) -> Result<FolderAccess> {
        let key = (folder_id, user_id.to_string());
        let previous = self.grants.get(&key).cloned();
        let grant = match &previous {
            Some(existing) => FolderAccess {
                role: if keep_higher { existing.role.max(role) } else { role },
                ..existing.clone()
            },
            None => FolderAccess {
                folder_id,
                user_id: user_id.to_string(),
                role,
                granted_by: granted_by.to_string(),
                source,
                created_at: Utc::now(),
            },
        };
        self.grants.insert(key, grant.clone());
        if let Err(e) = self.save_grants() {
            self.restore_grant(folder_id, user_id, previous);
            return Err(e);
        }
        Ok(grant)
    }

    /// Put a grant back the way it was before a failed write.
    pub(super) fn restore_grant(&mut self, folder_id: Uuid, user_id: &str, previous: Option<FolderAccess>) {
        let key = (folder_id, user_id.to_string());
        match previous {
            Some(grant) => {
                self.grants.insert(key, grant);
            }
            None => {
                self.grants.remove(&key);
            }
        }
        if let Err(e) = self.save_grants() {
            tracing::warn!(folder = %folder_id, user = user_id, error = %e, "failed to rewrite grants after rollback");
        }
    }

    fn require_folder(&self, id: Uuid) -> Result<&Node> {
        let node = self.node(id).ok_or(HubError::NotFound("Folder"))?;
        if !node.is_folder() {
            return Err(HubError::invalid("Access can only be granted on folders"));
        }
        Ok(node)
    }

    /// Grant a user a role on a folder. Callers cannot hand out more than
    /// they hold themselves.
    pub fn grant_access(
        &mut self,
        ctx: &AccessContext,
        folder_id: Uuid,
        user_id: &str,
        role: Role,
    ) -> Result<FolderAccess> {
        let mine = self.authorize(folder_id, ctx, Action::Invite)?;
        let folder = self.require_folder(folder_id)?;
        if role > mine {
            return Err(HubError::forbidden(format!("grant the {} role", role)));
        }
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(HubError::invalid("User id cannot be empty"));
        }
        if folder.owner_id == user_id {
            return Err(HubError::invalid("The owner already has full access"));
        }
        // changing a grant above the caller's own role is a manage operation
        let outranks = self
            .grant(folder_id, user_id)
            .map_or(false, |existing| existing.role > mine);
        if outranks && !mine.allows(Action::Manage) {
            return Err(HubError::forbidden("change the access of this user"));
        }
        let grant = self.upsert_grant(
            folder_id,
            user_id,
            role,
            &ctx.user_id,
            GrantSource::Invite,
            false,
        )?;
        self.record_activity(
            folder_id,
            &ctx.user_id,
            ActivityKind::Shared,
            Some(format!("{}:{}", user_id, role)),
        )?;
        Ok(grant)
    }

    /// Remove a grant. Users may always remove their own.
    pub fn revoke_access(&mut self, ctx: &AccessContext, folder_id: Uuid, user_id: &str) -> Result<()> {
        if ctx.user_id != user_id {
            self.authorize(folder_id, ctx, Action::Manage)?;
        }
        let removed = self.grants.remove(&(folder_id, user_id.to_string()));
        if removed.is_none() {
            return Err(HubError::NotFound("Access grant"));
        }
        self.save_grants()?;
        self.record_activity(
            folder_id,
            &ctx.user_id,
            ActivityKind::Unshared,
            Some(user_id.to_string()),
        )?;
        Ok(())
    }

    pub fn list_access(&self, ctx: &AccessContext, folder_id: Uuid) -> Result<Vec<&FolderAccess>> {
        self.authorize(folder_id, ctx, Action::View)?;
        let mut out: Vec<&FolderAccess> = self
            .grants
            .values()
            .filter(|g| g.folder_id == folder_id)
            .collect();
        out.sort_by_key(|g| g.created_at);
        Ok(out)
    }

    /// Live folders explicitly granted to the user, outermost grants only.
    pub fn shared_with(&self, user_id: &str) -> Vec<&Node> {
        let granted: Vec<&Node> = self
            .grants
            .values()
            .filter(|g| g.user_id == user_id)
            .filter_map(|g| self.node(g.folder_id))
            .filter(|n| !n.is_deleted && n.owner_id != user_id)
            .collect();
        let mut out: Vec<&Node> = granted
            .iter()
            .copied()
            .filter(|n| {
                !granted
                    .iter()
                    .any(|other| other.id != n.id && self.is_ancestor(other.id, n.id))
            })
            .collect();
        out.sort_by(|a, b| a.title.to_lowercase().cmp(&b.title.to_lowercase()));
        out
    }

    /// Whether `ancestor` is a strict ancestor of `id`.
    pub fn is_ancestor(&self, ancestor: Uuid, id: Uuid) -> bool {
        let mut steps = 0usize;
        let mut current = self.node(id).and_then(|n| n.parent_id);
        while let Some(pid) = current {
            if pid == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.nodes.len() {
                tracing::warn!(node = %id, "parent chain contains a cycle");
                return false;
            }
            current = self.node(pid).and_then(|n| n.parent_id);
        }
        false
    }

    /// Record an organization membership, never demoting an admin. A failed
    /// write leaves the in-memory memberships untouched.
    pub(super) fn upsert_membership(&mut self, org_id: &str, user_id: &str, role: OrgRole) -> Result<OrgMembership> {
        let key = (org_id.to_string(), user_id.to_string());
        let previous = self.memberships.get(&key).cloned();
        let membership = match &previous {
            Some(existing) => OrgMembership {
                role: existing.role.max(role),
                ..existing.clone()
            },
            None => OrgMembership {
                org_id: org_id.to_string(),
                user_id: user_id.to_string(),
                role,
                joined_at: Utc::now(),
            },
        };
        self.memberships.insert(key, membership.clone());
        if let Err(e) = self.save_memberships() {
            self.restore_membership(org_id, user_id, previous);
            return Err(e);
        }
        Ok(membership)
    }

    pub(super) fn restore_membership(&mut self, org_id: &str, user_id: &str, previous: Option<OrgMembership>) {
        let key = (org_id.to_string(), user_id.to_string());
        match previous {
            Some(membership) => {
                self.memberships.insert(key, membership);
            }
            None => {
                self.memberships.remove(&key);
            }
        }
        if let Err(e) = self.save_memberships() {
            tracing::warn!(org = org_id, user = user_id, error = %e, "failed to rewrite memberships after rollback");
        }
    }

    pub fn org_members(&self, ctx: &AccessContext, org_id: &str) -> Result<Vec<&OrgMembership>> {
        if !ctx.is_org_member_of(Some(org_id)) {
            return Err(HubError::forbidden("view this organization"));
        }
        let mut out: Vec<&OrgMembership> = self
            .memberships
            .values()
            .filter(|m| m.org_id == org_id)
            .collect();
        out.sort_by_key(|m| m.joined_at);
        Ok(out)
    }
}
