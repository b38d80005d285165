//! Per-user landing page data.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::access::{AccessContext, AccessResolver, Role};
use crate::model::{Activity, ExportRecord, Node, NodeType};
use crate::storage::Store;

#[derive(Clone, Debug, Serialize)]
pub struct NodeSummary {
    pub id: Uuid,
    pub title: String,
    pub node_type: NodeType,
    pub icon: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub role: Role,
}

impl NodeSummary {
    pub fn from_node(node: &Node, role: Role) -> Self {
        Self {
            id: node.id,
            title: node.title.clone(),
            node_type: node.node_type,
            icon: node.icon.clone(),
            updated_at: node.updated_at,
            role,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Dashboard {
    pub recent_documents: Vec<NodeSummary>,
    pub shared_folders: Vec<NodeSummary>,
    pub unread_mentions: usize,
    pub recent_activity: Vec<Activity>,
    pub recent_exports: Vec<ExportRecord>,
}

/// Everything is computed from one borrow of the store, so callers holding
/// a read lock see a consistent snapshot.
pub fn dashboard(store: &Store, ctx: &AccessContext, limit: usize) -> Dashboard {
    let mut resolver = AccessResolver::new(store, ctx);

    let mut docs: Vec<&Node> = store
        .nodes()
        .filter(|n| !n.is_deleted && n.node_type == NodeType::Doc)
        .collect();
    docs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    let mut recent_documents = Vec::new();
    for node in docs {
        if recent_documents.len() >= limit {
            break;
        }
        if let Some(role) = resolver.resolve(node.id) {
            recent_documents.push(NodeSummary::from_node(node, role));
        }
    }

    let shared_folders = store
        .shared_with(&ctx.user_id)
        .into_iter()
        .filter_map(|n| resolver.resolve(n.id).map(|role| NodeSummary::from_node(n, role)))
        .take(limit)
        .collect();

    let recent_activity = store
        .recent_activity(&mut resolver, limit)
        .into_iter()
        .cloned()
        .collect();

    Dashboard {
        recent_documents,
        shared_folders,
        unread_mentions: store.mentions_for_user(ctx, true).len(),
        recent_activity,
        recent_exports: store
            .exports_for_user(&ctx.user_id, limit)
            .into_iter()
            .cloned()
            .collect(),
    }
}
