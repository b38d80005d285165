//! Role resolution for nodes in the document tree.
//!
//! A caller's role on a node comes from, in order: org admin status for the
//! node's organization, ownership of the node or any ancestor, an explicit
//! [`FolderAccess`] grant on the node or its closest ancestor, and finally
//! the organization's default role when nothing on the chain up to the root
//! is restricted.
//!
//! [`FolderAccess`]: crate::model::FolderAccess

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{HubError, Result};
use crate::storage::Store;

/// Per-node role, ordered from least to most permissive.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Commenter,
    Editor,
    Admin,
}

/// Things a caller may try to do with a node.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    View,
    Comment,
    Edit,
    Invite,
    Manage,
    Delete,
}

/// Role within an organization, as reported by the auth provider or granted
/// through an invite link.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OrgRole {
    Member,
    Admin,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::View,
        Action::Comment,
        Action::Edit,
        Action::Invite,
        Action::Manage,
        Action::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Comment => "comment",
            Action::Edit => "edit",
            Action::Invite => "invite",
            Action::Manage => "manage",
            Action::Delete => "delete",
        }
    }
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Commenter => "commenter",
            Role::Editor => "editor",
            Role::Admin => "admin",
        }
    }

    /// Fixed action table.
    pub const fn allows(self, action: Action) -> bool {
        match action {
            Action::View => true,
            Action::Comment => matches!(self, Role::Commenter | Role::Editor | Role::Admin),
            Action::Edit | Action::Invite => matches!(self, Role::Editor | Role::Admin),
            Action::Manage | Action::Delete => matches!(self, Role::Admin),
        }
    }
}

impl OrgRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrgRole::Member => "member",
            OrgRole::Admin => "admin",
        }
    }
}

/// `None` means the caller has no access at all.
pub fn can_perform_action(role: Option<Role>, action: Action) -> bool {
    role.map_or(false, |r| r.allows(action))
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for OrgRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "viewer" | "read" => Ok(Role::Viewer),
            "commenter" => Ok(Role::Commenter),
            "editor" | "write" => Ok(Role::Editor),
            "admin" | "owner" => Ok(Role::Admin),
            _ => Err(HubError::invalid(format!("Invalid role: {}", s))),
        }
    }
}

impl FromStr for Action {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| HubError::invalid(format!("Invalid action: {}", s)))
    }
}

impl FromStr for OrgRole {
    type Err = HubError;

    /// Accepts both bare names and the `org:` prefixed form hosted auth
    /// providers put in session claims.
    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_lowercase();
        match lowered.strip_prefix("org:").unwrap_or(&lowered) {
            "admin" => Ok(OrgRole::Admin),
            "member" | "basic_member" => Ok(OrgRole::Member),
            _ => Err(HubError::invalid(format!("Invalid organization role: {}", s))),
        }
    }
}

/// Who is asking, and in which organization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessContext {
    pub user_id: String,
    pub org_id: Option<String>,
    pub org_role: Option<OrgRole>,
}

impl AccessContext {
    pub fn personal(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            org_id: None,
            org_role: None,
        }
    }

    pub fn in_org(user_id: impl Into<String>, org_id: impl Into<String>, role: OrgRole) -> Self {
        Self {
            user_id: user_id.into(),
            org_id: Some(org_id.into()),
            org_role: Some(role),
        }
    }

    fn belongs_to(&self, org: Option<&str>) -> bool {
        match (org, self.org_id.as_deref()) {
            (Some(node_org), Some(mine)) => node_org == mine && self.org_role.is_some(),
            _ => false,
        }
    }

    pub fn is_org_admin_of(&self, org: Option<&str>) -> bool {
        self.belongs_to(org) && self.org_role == Some(OrgRole::Admin)
    }

    pub fn is_org_member_of(&self, org: Option<&str>) -> bool {
        self.belongs_to(org)
    }
}

/// Result of walking from a node up to the root.
#[derive(Clone, Copy, Debug)]
struct Chain {
    owned: bool,
    explicit: Option<Role>,
    restricted: bool,
}

/// Resolves roles against a store, memoizing each ancestor chain so that
/// resolving many siblings walks the shared ancestors only once.
pub struct AccessResolver<'a> {
    store: &'a Store,
    ctx: &'a AccessContext,
    chains: HashMap<Uuid, Chain>,
}

impl<'a> AccessResolver<'a> {
    pub fn new(store: &'a Store, ctx: &'a AccessContext) -> Self {
        Self {
            store,
            ctx,
            chains: HashMap::new(),
        }
    }

    pub fn context(&self) -> &AccessContext {
        self.ctx
    }

    pub fn resolve(&mut self, id: Uuid) -> Option<Role> {
        let node = self.store.node(id)?;
        if self.ctx.is_org_admin_of(node.org_id.as_deref()) {
            return Some(Role::Admin);
        }
        if node.is_deleted && node.owner_id != self.ctx.user_id {
            return None;
        }
        let chain = self.chain(id)?;
        if chain.owned {
            return Some(Role::Admin);
        }
        if chain.explicit.is_some() {
            return chain.explicit;
        }
        if !chain.restricted && self.ctx.is_org_member_of(node.org_id.as_deref()) {
            return Some(self.store.member_role());
        }
        None
    }

    pub fn can(&mut self, id: Uuid, action: Action) -> bool {
        can_perform_action(self.resolve(id), action)
    }

    /// What the caller alone contributes at one node.
    fn local(&self, id: Uuid) -> Option<(Chain, Option<Uuid>)> {
        let node = self.store.node(id)?;
        let here = Chain {
            owned: node.owner_id == self.ctx.user_id,
            explicit: self.store.grant(id, &self.ctx.user_id).map(|g| g.role),
            restricted: node.is_restricted,
        };
        Some((here, node.parent_id))
    }

    fn chain(&mut self, id: Uuid) -> Option<Chain> {
        if let Some(hit) = self.chains.get(&id) {
            return Some(*hit);
        }
        // collect nodes up to the first memoized ancestor or the root
        let mut pending = Vec::new();
        let mut seen = HashSet::new();
        let mut above = None;
        let mut current = Some(id);
        while let Some(cid) = current {
            if let Some(hit) = self.chains.get(&cid) {
                above = Some(*hit);
                break;
            }
            if !seen.insert(cid) {
                tracing::warn!(node = %id, looped_at = %cid, "parent chain contains a cycle");
                return None;
            }
            let Some((here, parent)) = self.local(cid) else {
                break;
            };
            pending.push((cid, here));
            current = parent;
        }
        let mut acc = above.unwrap_or(Chain {
            owned: false,
            explicit: None,
            restricted: false,
        });
        // fold root-first so the closest grant overrides the ones above it
        for (cid, here) in pending.into_iter().rev() {
            acc = Chain {
                owned: acc.owned || here.owned,
                explicit: here.explicit.or(acc.explicit),
                restricted: acc.restricted || here.restricted,
            };
            self.chains.insert(cid, acc);
        }
        self.chains.get(&id).copied()
    }
}

impl Store {
    /// Effective role of the caller on the node, if any.
    pub fn resolve_role(&self, id: Uuid, ctx: &AccessContext) -> Option<Role> {
        AccessResolver::new(self, ctx).resolve(id)
    }

    pub fn can_perform(&self, id: Uuid, ctx: &AccessContext, action: Action) -> bool {
        can_perform_action(self.resolve_role(id, ctx), action)
    }

    /// Resolve and gate in one step. Missing nodes and nodes the caller
    /// cannot see at all both report `NotFound`.
    pub fn authorize(&self, id: Uuid, ctx: &AccessContext, action: Action) -> Result<Role> {
        match self.resolve_role(id, ctx) {
            None => Err(HubError::NotFound("Item")),
            Some(role) if role.allows(action) => Ok(role),
            Some(_) => Err(HubError::forbidden(format!("{} this item", action))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_table() {
        use Action::*;
        let expected: [(Role, [bool; 6]); 4] = [
            (Role::Viewer, [true, false, false, false, false, false]),
            (Role::Commenter, [true, true, false, false, false, false]),
            (Role::Editor, [true, true, true, true, false, false]),
            (Role::Admin, [true, true, true, true, true, true]),
        ];
        for (role, row) in expected {
            for (action, allowed) in [View, Comment, Edit, Invite, Manage, Delete]
                .into_iter()
                .zip(row)
            {
                assert_eq!(role.allows(action), allowed, "{} / {}", role, action);
            }
        }
        for action in Action::ALL {
            assert!(!can_perform_action(None, action));
        }
    }

    #[test]
    fn roles_are_ordered() {
        assert!(Role::Viewer < Role::Commenter);
        assert!(Role::Commenter < Role::Editor);
        assert!(Role::Editor < Role::Admin);
        assert_eq!(Role::Viewer.max(Role::Editor), Role::Editor);
    }

    #[test]
    fn parses_names() {
        assert_eq!("Editor".parse::<Role>().unwrap(), Role::Editor);
        assert_eq!("read".parse::<Role>().unwrap(), Role::Viewer);
        assert!("superuser".parse::<Role>().is_err());
        assert_eq!("org:admin".parse::<OrgRole>().unwrap(), OrgRole::Admin);
        assert_eq!("org:member".parse::<OrgRole>().unwrap(), OrgRole::Member);
        assert_eq!("manage".parse::<Action>().unwrap(), Action::Manage);
        assert!("share".parse::<Action>().is_err());
    }

    #[test]
    fn org_membership_needs_matching_org_and_role() {
        let ctx = AccessContext::in_org("u", "acme", OrgRole::Member);
        assert!(ctx.is_org_member_of(Some("acme")));
        assert!(!ctx.is_org_member_of(Some("other")));
        assert!(!ctx.is_org_member_of(None));
        assert!(!ctx.is_org_admin_of(Some("acme")));

        let no_role = AccessContext {
            user_id: "u".into(),
            org_id: Some("acme".into()),
            org_role: None,
        };
        assert!(!no_role.is_org_member_of(Some("acme")));
    }
}
