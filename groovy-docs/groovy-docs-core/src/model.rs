//! Records persisted by the [`Store`](crate::storage::Store).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access::{OrgRole, Role};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Doc,
    Folder,
}

/// A document or folder in the content tree.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: Uuid,
    pub node_type: NodeType,
    pub parent_id: Option<Uuid>,
    pub owner_id: String,
    /// `None` for personal nodes.
    pub org_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub is_restricted: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tag_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    pub fn is_folder(&self) -> bool {
        self.node_type == NodeType::Folder
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GrantSource {
    Invite,
    ShareLink,
}

/// Explicit role grant for one user on one folder.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FolderAccess {
    pub folder_id: Uuid,
    pub user_id: String,
    pub role: Role,
    pub granted_by: String,
    pub source: GrantSource,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ShareLink {
    pub id: Uuid,
    pub token: String,
    pub folder_id: Uuid,
    pub role: Role,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_uses: Option<u32>,
    pub use_count: u32,
    #[serde(default)]
    pub is_disabled: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OrgInviteLink {
    pub id: Uuid,
    pub token: String,
    pub org_id: String,
    pub role: OrgRole,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_uses: Option<u32>,
    pub use_count: u32,
    #[serde(default)]
    pub is_disabled: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OrgMembership {
    pub org_id: String,
    pub user_id: String,
    pub role: OrgRole,
    pub joined_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Created,
    Updated,
    Moved,
    Deleted,
    Restored,
    Shared,
    Unshared,
    JoinedViaLink,
    Commented,
    Resolved,
    Exported,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Activity {
    pub id: Uuid,
    pub node_id: Uuid,
    pub user_id: String,
    pub kind: ActivityKind,
    #[serde(default)]
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Pdf,
    Docx,
    Markdown,
    Html,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Pdf => "pdf",
            ExportFormat::Docx => "docx",
            ExportFormat::Markdown => "md",
            ExportFormat::Html => "html",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExportRecord {
    pub id: Uuid,
    pub node_id: Uuid,
    pub user_id: String,
    pub format: ExportFormat,
    pub file_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Mention {
    pub id: Uuid,
    pub node_id: Uuid,
    pub thread_id: Option<Uuid>,
    pub mentioned_user_id: String,
    pub author_id: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Thread {
    pub id: Uuid,
    pub node_id: Uuid,
    pub created_by: String,
    /// Text the thread is anchored to in the document.
    pub quote: Option<String>,
    pub is_resolved: bool,
    pub resolved_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub author_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
    pub color: Option<String>,
    pub owner_id: String,
    pub org_id: Option<String>,
}
