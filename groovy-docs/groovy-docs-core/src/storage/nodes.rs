use chrono::Utc;
use serde::Deserialize;
use std::collections::HashSet;
use uuid::Uuid;

use super::{Store, COMMENT_LOG};
use crate::access::{AccessContext, AccessResolver, Action};
use crate::error::{HubError, Result};
use crate::model::{ActivityKind, Node, NodeType, Tag};

const ROOT_TITLE: &str = "My Documents";
const ORG_ROOT_TITLE: &str = "Workspace";

/// Parameters for a new document or folder.
#[derive(Clone, Debug, Deserialize)]
pub struct NewNode {
    pub parent_id: Option<Uuid>,
    pub node_type: NodeType,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub icon: Option<String>,
}

/// Partial update; `None` fields are left as they are.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct NodeUpdate {
    pub title: Option<String>,
    pub icon: Option<String>,
    pub content: Option<String>,
}

fn clean_title(title: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(HubError::invalid("Title cannot be empty"));
    }
    Ok(title.to_string())
}

impl Store {
    fn insert_node(&mut self, node: Node) -> Result<Uuid> {
        let id = node.id;
        match (node.parent_id, &node.org_id) {
            (Some(pid), _) => self.children.entry(pid).or_default().push(id),
            (None, Some(org)) => {
                self.org_roots.insert(org.clone(), id);
            }
            (None, None) => {
                self.roots.insert(node.owner_id.clone(), id);
            }
        }
        self.nodes.insert(id, node);
        self.save_node(id)?;
        Ok(id)
    }

    fn root_node(owner: &str, org_id: Option<String>, title: &str) -> Node {
        let now = Utc::now();
        Node {
            id: Uuid::new_v4(),
            node_type: NodeType::Folder,
            parent_id: None,
            owner_id: owner.to_string(),
            org_id,
            title: title.to_string(),
            icon: None,
            content: String::new(),
            is_restricted: false,
            is_deleted: false,
            deleted_at: None,
            tag_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Ensure a personal root folder exists for the given user and return its ID.
    pub fn ensure_root(&mut self, user: &str) -> Result<Uuid> {
        if let Some(id) = self.roots.get(user) {
            return Ok(*id);
        }
        let id = self.insert_node(Self::root_node(user, None, ROOT_TITLE))?;
        tracing::info!(user, root = %id, "created personal root");
        Ok(id)
    }

    pub fn org_root(&self, org_id: &str) -> Option<Uuid> {
        self.org_roots.get(org_id).copied()
    }

    /// Ensure the shared root folder of the caller's organization exists.
    pub fn ensure_org_root(&mut self, ctx: &AccessContext, org_id: &str) -> Result<Uuid> {
        if !ctx.is_org_member_of(Some(org_id)) {
            return Err(HubError::forbidden("access this organization"));
        }
        if let Some(id) = self.org_roots.get(org_id) {
            return Ok(*id);
        }
        let root = Self::root_node(&ctx.user_id, Some(org_id.to_string()), ORG_ROOT_TITLE);
        let id = self.insert_node(root)?;
        tracing::info!(org = org_id, root = %id, "created organization root");
        Ok(id)
    }

    /// Create a document or folder. Without a parent it lands in the caller's
    /// personal root.
    pub fn create_node(&mut self, ctx: &AccessContext, req: NewNode) -> Result<Node> {
        let title = clean_title(&req.title)?;
        let parent_id = match req.parent_id {
            Some(pid) => pid,
            None => self.ensure_root(&ctx.user_id)?,
        };
        self.authorize(parent_id, ctx, Action::Edit)?;
        let parent = self.node(parent_id).ok_or(HubError::NotFound("Folder"))?;
        if !parent.is_folder() {
            return Err(HubError::invalid("Parent must be a folder"));
        }
        if parent.is_deleted {
            return Err(HubError::invalid("Cannot create items in a deleted folder"));
        }
        let now = Utc::now();
        let node = Node {
            id: Uuid::new_v4(),
            node_type: req.node_type,
            parent_id: Some(parent_id),
            owner_id: ctx.user_id.clone(),
            org_id: parent.org_id.clone(),
            title,
            icon: req.icon,
            content: match req.node_type {
                NodeType::Doc => req.content,
                NodeType::Folder => String::new(),
            },
            is_restricted: false,
            is_deleted: false,
            deleted_at: None,
            tag_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let id = self.insert_node(node)?;
        self.record_activity(id, &ctx.user_id, ActivityKind::Created, None)?;
        self.node(id).cloned().ok_or(HubError::NotFound("Item"))
    }

    pub fn get_node(&self, ctx: &AccessContext, id: Uuid) -> Result<&Node> {
        self.authorize(id, ctx, Action::View)?;
        self.node(id).ok_or(HubError::NotFound("Item"))
    }

    /// Live children of a folder the caller can see.
    pub fn children(&self, ctx: &AccessContext, folder_id: Uuid) -> Result<Vec<&Node>> {
        self.authorize(folder_id, ctx, Action::View)?;
        let mut resolver = AccessResolver::new(self, ctx);
        let mut out: Vec<&Node> = self
            .children
            .get(&folder_id)
            .into_iter()
            .flatten()
            .filter_map(|cid| self.nodes.get(cid))
            .filter(|n| !n.is_deleted)
            .filter(|n| resolver.can(n.id, Action::View))
            .collect();
        out.sort_by(|a, b| {
            b.is_folder()
                .cmp(&a.is_folder())
                .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
        });
        Ok(out)
    }

    /// The node and everything below it, stopping on revisited nodes.
    pub fn descendant_ids(&self, id: Uuid) -> Vec<Uuid> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            if !seen.insert(cur) {
                continue;
            }
            out.push(cur);
            if let Some(kids) = self.children.get(&cur) {
                stack.extend(kids.iter().rev().copied());
            }
        }
        out
    }

    pub fn update_node(&mut self, ctx: &AccessContext, id: Uuid, update: NodeUpdate) -> Result<Node> {
        self.authorize(id, ctx, Action::Edit)?;
        let title = update.title.as_deref().map(clean_title).transpose()?;
        let node = self.nodes.get_mut(&id).ok_or(HubError::NotFound("Item"))?;
        if node.is_deleted {
            return Err(HubError::invalid("Cannot edit a deleted item"));
        }
        if update.content.is_some() && node.is_folder() {
            return Err(HubError::invalid("Folders have no content"));
        }
        if let Some(title) = title {
            node.title = title;
        }
        if let Some(icon) = update.icon {
            node.icon = if icon.is_empty() { None } else { Some(icon) };
        }
        if let Some(content) = update.content {
            node.content = content;
        }
        node.updated_at = Utc::now();
        let updated = node.clone();
        self.save_node(id)?;
        self.record_activity(id, &ctx.user_id, ActivityKind::Updated, None)?;
        Ok(updated)
    }

    pub fn move_node(&mut self, ctx: &AccessContext, id: Uuid, new_parent: Uuid) -> Result<()> {
        self.authorize(id, ctx, Action::Edit)?;
        self.authorize(new_parent, ctx, Action::Edit)?;
        let node = self.node(id).ok_or(HubError::NotFound("Item"))?;
        let dest = self.node(new_parent).ok_or(HubError::NotFound("Folder"))?;
        // perform invariant checks before mutating anything
        if node.is_root() {
            return Err(HubError::invalid("Cannot move a root folder"));
        }
        if !dest.is_folder() || dest.is_deleted {
            return Err(HubError::invalid("Destination must be a live folder"));
        }
        if node.org_id != dest.org_id {
            return Err(HubError::invalid("Cannot move items between workspaces"));
        }
        if self.descendant_ids(id).contains(&new_parent) {
            return Err(HubError::invalid("Cannot move a folder into itself or its descendant"));
        }
        let old_parent = node.parent_id;
        if old_parent == Some(new_parent) {
            return Ok(());
        }

        if let Some(pid) = old_parent {
            if let Some(kids) = self.children.get_mut(&pid) {
                kids.retain(|c| *c != id);
            }
        }
        self.children.entry(new_parent).or_default().push(id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent_id = Some(new_parent);
            node.updated_at = Utc::now();
        }
        self.save_node(id)?;
        self.record_activity(
            id,
            &ctx.user_id,
            ActivityKind::Moved,
            Some(new_parent.to_string()),
        )?;
        Ok(())
    }

    pub fn set_restricted(&mut self, ctx: &AccessContext, id: Uuid, restricted: bool) -> Result<()> {
        self.authorize(id, ctx, Action::Manage)?;
        let node = self.nodes.get_mut(&id).ok_or(HubError::NotFound("Folder"))?;
        if !node.is_folder() {
            return Err(HubError::invalid("Only folders can be restricted"));
        }
        node.is_restricted = restricted;
        node.updated_at = Utc::now();
        self.save_node(id)
    }

    /// Move a node and its subtree to the trash.
    pub fn soft_delete(&mut self, ctx: &AccessContext, id: Uuid) -> Result<Vec<Uuid>> {
        self.authorize(id, ctx, Action::Delete)?;
        let node = self.node(id).ok_or(HubError::NotFound("Item"))?;
        if node.is_root() {
            return Err(HubError::invalid("Cannot delete a root folder"));
        }
        if node.is_deleted {
            return Ok(Vec::new());
        }
        let now = Utc::now();
        let ids = self.descendant_ids(id);
        for cid in &ids {
            if let Some(n) = self.nodes.get_mut(cid) {
                if !n.is_deleted {
                    n.is_deleted = true;
                    n.deleted_at = Some(now);
                }
            }
            self.save_node(*cid)?;
        }
        self.record_activity(id, &ctx.user_id, ActivityKind::Deleted, None)?;
        Ok(ids)
    }

    pub fn restore(&mut self, ctx: &AccessContext, id: Uuid) -> Result<Vec<Uuid>> {
        self.authorize(id, ctx, Action::Delete)?;
        let node = self.node(id).ok_or(HubError::NotFound("Item"))?;
        if !node.is_deleted {
            return Err(HubError::invalid("Item is not in the trash"));
        }
        let parent_deleted = node
            .parent_id
            .and_then(|pid| self.node(pid))
            .map_or(false, |p| p.is_deleted);
        if parent_deleted {
            return Err(HubError::invalid("Restore the parent folder first"));
        }
        let ids = self.descendant_ids(id);
        for cid in &ids {
            if let Some(n) = self.nodes.get_mut(cid) {
                n.is_deleted = false;
                n.deleted_at = None;
            }
            self.save_node(*cid)?;
        }
        self.record_activity(id, &ctx.user_id, ActivityKind::Restored, None)?;
        Ok(ids)
    }

    /// Permanently remove a trashed subtree and everything attached to it.
    pub fn purge(&mut self, ctx: &AccessContext, id: Uuid) -> Result<Vec<Uuid>> {
        self.authorize(id, ctx, Action::Delete)?;
        let node = self.node(id).ok_or(HubError::NotFound("Item"))?;
        if !node.is_deleted {
            return Err(HubError::invalid("Only items in the trash can be purged"));
        }
        if let Some(pid) = node.parent_id {
            if let Some(kids) = self.children.get_mut(&pid) {
                kids.retain(|c| *c != id);
            }
        }
        let ids = self.descendant_ids(id);
        let gone: HashSet<Uuid> = ids.iter().copied().collect();
        for cid in &ids {
            self.nodes.remove(cid);
            self.children.remove(cid);
            self.remove_node_file(*cid);
        }

        self.grants.retain(|(fid, _), _| !gone.contains(fid));
        self.share_links.retain(|_, l| !gone.contains(&l.folder_id));
        self.share_tokens = self
            .share_links
            .values()
            .map(|l| (l.token.clone(), l.id))
            .collect();
        let dead_threads: HashSet<Uuid> = self
            .threads
            .values()
            .filter(|t| gone.contains(&t.node_id))
            .map(|t| t.id)
            .collect();
        self.threads.retain(|tid, _| !dead_threads.contains(tid));
        self.comments.retain(|c| !dead_threads.contains(&c.thread_id));
        self.mentions.retain(|_, m| !gone.contains(&m.node_id));

        self.save_grants()?;
        self.save_share_links()?;
        self.save_threads()?;
        self.save_mentions()?;
        self.rewrite_log(COMMENT_LOG, &self.comments)?;
        tracing::info!(node = %id, removed = ids.len(), "purged from trash");
        Ok(ids)
    }

    /// Top-level trashed items owned by the caller.
    pub fn trash(&self, ctx: &AccessContext) -> Vec<&Node> {
        let mut out: Vec<&Node> = self
            .nodes
            .values()
            .filter(|n| n.is_deleted && n.owner_id == ctx.user_id)
            .filter(|n| {
                n.parent_id
                    .and_then(|pid| self.nodes.get(&pid))
                    .map_or(true, |p| !p.is_deleted)
            })
            .collect();
        out.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at));
        out
    }

    pub fn create_tag(&mut self, ctx: &AccessContext, name: &str, color: Option<String>) -> Result<Tag> {
        let name = name.trim();
        if name.is_empty() {
            return Err(HubError::invalid("Tag name cannot be empty"));
        }
        let duplicate = self
            .tags
            .values()
            .any(|t| Self::tag_visible(t, ctx) && t.name.eq_ignore_ascii_case(name));
        if duplicate {
            return Err(HubError::invalid(format!("Tag '{}' already exists", name)));
        }
        let tag = Tag {
            id: Uuid::new_v4(),
            name: name.to_string(),
            color,
            owner_id: ctx.user_id.clone(),
            org_id: ctx.org_id.clone(),
        };
        self.tags.insert(tag.id, tag.clone());
        self.save_tags()?;
        Ok(tag)
    }

    fn tag_visible(tag: &Tag, ctx: &AccessContext) -> bool {
        match (&tag.org_id, &ctx.org_id) {
            (Some(tag_org), Some(my_org)) => tag_org == my_org,
            (None, _) => tag.owner_id == ctx.user_id,
            _ => false,
        }
    }

    pub fn list_tags(&self, ctx: &AccessContext) -> Vec<&Tag> {
        let mut out: Vec<&Tag> = self
            .tags
            .values()
            .filter(|t| Self::tag_visible(t, ctx))
            .collect();
        out.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        out
    }

    pub fn set_node_tags(&mut self, ctx: &AccessContext, id: Uuid, tag_ids: Vec<Uuid>) -> Result<()> {
        self.authorize(id, ctx, Action::Edit)?;
        let unknown = |t: &&Uuid| self.tags.get(*t).map_or(true, |tag| !Self::tag_visible(tag, ctx));
        if let Some(missing) = tag_ids.iter().find(unknown) {
            return Err(HubError::invalid(format!("Unknown tag {}", missing)));
        }
        let mut unique = Vec::new();
        for tid in tag_ids {
            if !unique.contains(&tid) {
                unique.push(tid);
            }
        }
        let node = self.nodes.get_mut(&id).ok_or(HubError::NotFound("Item"))?;
        node.tag_ids = unique;
        node.updated_at = Utc::now();
        self.save_node(id)
    }
}
