//! Filesystem-backed store for nodes, grants, links and feeds.
//!
//! Everything is loaded into memory at startup. Nodes are written one file per
//! node, mutable collections are rewritten whole on change, and append-only
//! feeds are appended to as JSON lines.

mod feed;
mod grants;
mod links;
mod nodes;

#[cfg(test)]
mod tests;

pub use feed::ThreadView;
pub use links::{InviteRedemption, ShareRedemption};
pub use nodes::{NewNode, NodeUpdate};

use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::access::{OrgRole, Role};
use crate::error::Result;
use crate::model::{
    Activity, Comment, ExportRecord, FolderAccess, Mention, Node, OrgInviteLink, OrgMembership,
    ShareLink, Tag, Thread,
};

const NODES_DIR: &str = "nodes";
const FOLDER_ACCESS_FILE: &str = "folder_access.json";
const SHARE_LINKS_FILE: &str = "share_links.json";
const INVITE_LINKS_FILE: &str = "org_invites.json";
const MEMBERSHIPS_FILE: &str = "org_members.json";
const THREADS_FILE: &str = "threads.json";
const MENTIONS_FILE: &str = "mentions.json";
const TAGS_FILE: &str = "tags.json";
const ACTIVITY_LOG: &str = "activity.jsonl";
const EXPORT_LOG: &str = "exports.jsonl";
const COMMENT_LOG: &str = "comments.jsonl";

pub struct Store {
    dir: PathBuf,
    member_role: Role,

    nodes: HashMap<Uuid, Node>,
    children: HashMap<Uuid, Vec<Uuid>>,
    roots: HashMap<String, Uuid>,
    org_roots: HashMap<String, Uuid>,

    grants: HashMap<(Uuid, String), FolderAccess>,
    memberships: HashMap<(String, String), OrgMembership>,

    share_links: HashMap<Uuid, ShareLink>,
    share_tokens: HashMap<String, Uuid>,
    invite_links: HashMap<Uuid, OrgInviteLink>,
    invite_tokens: HashMap<String, Uuid>,

    activity: Vec<Activity>,
    exports: Vec<ExportRecord>,
    threads: HashMap<Uuid, Thread>,
    comments: Vec<Comment>,
    mentions: HashMap<Uuid, Mention>,
    tags: HashMap<Uuid, Tag>,
}

impl Store {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(dir.join(NODES_DIR))?;

        let mut nodes = HashMap::new();
        for entry in std::fs::read_dir(dir.join(NODES_DIR))? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let data = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<Node>(&data) {
                Ok(node) => {
                    nodes.insert(node.id, node);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable node file");
                }
            }
        }

        let grants = load_json::<FolderAccess>(&dir, FOLDER_ACCESS_FILE)?
            .into_iter()
            .map(|g| ((g.folder_id, g.user_id.clone()), g))
            .collect();
        let memberships = load_json::<OrgMembership>(&dir, MEMBERSHIPS_FILE)?
            .into_iter()
            .map(|m| ((m.org_id.clone(), m.user_id.clone()), m))
            .collect();
        let share_links: HashMap<Uuid, ShareLink> = load_json::<ShareLink>(&dir, SHARE_LINKS_FILE)?
            .into_iter()
            .map(|l| (l.id, l))
            .collect();
        let invite_links: HashMap<Uuid, OrgInviteLink> =
            load_json::<OrgInviteLink>(&dir, INVITE_LINKS_FILE)?
                .into_iter()
                .map(|l| (l.id, l))
                .collect();
        let threads = load_json::<Thread>(&dir, THREADS_FILE)?
            .into_iter()
            .map(|t| (t.id, t))
            .collect();
        let mentions = load_json::<Mention>(&dir, MENTIONS_FILE)?
            .into_iter()
            .map(|m| (m.id, m))
            .collect();
        let tags = load_json::<Tag>(&dir, TAGS_FILE)?
            .into_iter()
            .map(|t| (t.id, t))
            .collect();

        let share_tokens = share_links
            .values()
            .map(|l| (l.token.clone(), l.id))
            .collect();
        let invite_tokens = invite_links
            .values()
            .map(|l| (l.token.clone(), l.id))
            .collect();

        let mut store = Self {
            activity: load_log(&dir, ACTIVITY_LOG)?,
            exports: load_log(&dir, EXPORT_LOG)?,
            comments: load_log(&dir, COMMENT_LOG)?,
            dir,
            member_role: Role::Editor,
            nodes,
            children: HashMap::new(),
            roots: HashMap::new(),
            org_roots: HashMap::new(),
            grants,
            memberships,
            share_links,
            share_tokens,
            invite_links,
            invite_tokens,
            threads,
            mentions,
            tags,
        };
        store.rebuild_indexes();
        tracing::info!(
            dir = %store.dir.display(),
            nodes = store.nodes.len(),
            "store loaded"
        );
        Ok(store)
    }

    /// Directory where the store is persisted.
    pub fn data_dir(&self) -> &Path {
        &self.dir
    }

    /// Role org members get on unrestricted org content without a grant.
    pub fn member_role(&self) -> Role {
        self.member_role
    }

    pub fn set_member_role(&mut self, role: Role) {
        self.member_role = role;
    }

    pub fn node(&self, id: Uuid) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn grant(&self, folder_id: Uuid, user_id: &str) -> Option<&FolderAccess> {
        self.grants.get(&(folder_id, user_id.to_string()))
    }

    pub fn org_role(&self, org_id: &str, user_id: &str) -> Option<OrgRole> {
        self.memberships
            .get(&(org_id.to_string(), user_id.to_string()))
            .map(|m| m.role)
    }

    fn rebuild_indexes(&mut self) {
        self.children.clear();
        self.roots.clear();
        self.org_roots.clear();
        let mut by_age: Vec<&Node> = self.nodes.values().collect();
        by_age.sort_by_key(|n| n.created_at);
        for node in by_age {
            match (node.parent_id, &node.org_id) {
                (Some(pid), _) => self.children.entry(pid).or_default().push(node.id),
                (None, Some(org)) => {
                    self.org_roots.entry(org.clone()).or_insert(node.id);
                }
                (None, None) => {
                    self.roots.entry(node.owner_id.clone()).or_insert(node.id);
                }
            }
        }
    }

    fn node_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(NODES_DIR).join(format!("{}.json", id))
    }

    fn save_node(&self, id: Uuid) -> Result<()> {
        if let Some(node) = self.nodes.get(&id) {
            let data = serde_json::to_string_pretty(node)?;
            std::fs::write(self.node_path(id), data)?;
        }
        Ok(())
    }

    fn remove_node_file(&self, id: Uuid) {
        if let Err(e) = std::fs::remove_file(self.node_path(id)) {
            tracing::warn!(node = %id, error = %e, "failed to remove node file");
        }
    }

    fn save_json<'a, T, I>(&self, file: &str, items: I) -> Result<()>
    where
        T: Serialize + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        let items: Vec<&T> = items.into_iter().collect();
        let data = serde_json::to_string(&items)?;
        std::fs::write(self.dir.join(file), data)?;
        Ok(())
    }

    fn append_log<T: Serialize>(&self, file: &str, record: &T) -> Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(file))?;
        let line = serde_json::to_string(record)?;
        writeln!(f, "{}", line)?;
        Ok(())
    }

    fn rewrite_log<T: Serialize>(&self, file: &str, records: &[T]) -> Result<()> {
        let mut out = String::new();
        for record in records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        std::fs::write(self.dir.join(file), out)?;
        Ok(())
    }

    fn save_grants(&self) -> Result<()> {
        self.save_json(FOLDER_ACCESS_FILE, self.grants.values())
    }

    fn save_memberships(&self) -> Result<()> {
        self.save_json(MEMBERSHIPS_FILE, self.memberships.values())
    }

    fn save_share_links(&self) -> Result<()> {
        self.save_json(SHARE_LINKS_FILE, self.share_links.values())
    }

    fn save_invite_links(&self) -> Result<()> {
        self.save_json(INVITE_LINKS_FILE, self.invite_links.values())
    }

    fn save_threads(&self) -> Result<()> {
        self.save_json(THREADS_FILE, self.threads.values())
    }

    fn save_mentions(&self) -> Result<()> {
        self.save_json(MENTIONS_FILE, self.mentions.values())
    }

    fn save_tags(&self) -> Result<()> {
        self.save_json(TAGS_FILE, self.tags.values())
    }
}

fn load_json<T: DeserializeOwned>(dir: &Path, file: &str) -> Result<Vec<T>> {
    let path = dir.join(file);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

fn load_log<T: DeserializeOwned>(dir: &Path, file: &str) -> Result<Vec<T>> {
    let path = dir.join(file);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(std::fs::File::open(&path)?);
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => out.push(record),
            // a torn final line from a crash mid-append
            Err(e) => tracing::warn!(file, error = %e, "skipping malformed log line"),
        }
    }
    Ok(out)
}
