use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use super::{Store, ACTIVITY_LOG, COMMENT_LOG, EXPORT_LOG};
use crate::access::{AccessContext, AccessResolver, Action};
use crate::error::{HubError, Result};
use crate::model::{
    Activity, ActivityKind, Comment, ExportFormat, ExportRecord, Mention, Thread,
};

/// A thread together with its comments, oldest first.
#[derive(Clone, Debug, Serialize)]
pub struct ThreadView {
    #[serde(flatten)]
    pub thread: Thread,
    pub comments: Vec<Comment>,
}

/// `@user` handles in a comment body, in order of first appearance.
pub fn extract_mentions(body: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for word in body.split_whitespace() {
        let Some(handle) = word.strip_prefix('@') else {
            continue;
        };
        let handle: String = handle
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
            .collect();
        let handle = handle.trim_end_matches(['.', ':']).to_string();
        if !handle.is_empty() && !out.contains(&handle) {
            out.push(handle);
        }
    }
    out
}

impl Store {
    pub fn record_activity(
        &mut self,
        node_id: Uuid,
        user_id: &str,
        kind: ActivityKind,
        detail: Option<String>,
    ) -> Result<Activity> {
        let entry = Activity {
            id: Uuid::new_v4(),
            node_id,
            user_id: user_id.to_string(),
            kind,
            detail,
            created_at: Utc::now(),
        };
        self.append_log(ACTIVITY_LOG, &entry)?;
        self.activity.push(entry.clone());
        Ok(entry)
    }

    /// Newest first.
    pub fn activity_for_node(&self, ctx: &AccessContext, node_id: Uuid, limit: usize) -> Result<Vec<&Activity>> {
        self.authorize(node_id, ctx, Action::View)?;
        Ok(self
            .activity
            .iter()
            .rev()
            .filter(|a| a.node_id == node_id)
            .take(limit)
            .collect())
    }

    /// Recent activity on anything the caller can currently view.
    pub fn recent_activity(&self, resolver: &mut AccessResolver<'_>, limit: usize) -> Vec<&Activity> {
        self.activity
            .iter()
            .rev()
            .filter(|a| resolver.can(a.node_id, Action::View))
            .take(limit)
            .collect()
    }

    pub fn record_export(&mut self, ctx: &AccessContext, node_id: Uuid, format: ExportFormat) -> Result<ExportRecord> {
        self.authorize(node_id, ctx, Action::View)?;
        let node = self.node(node_id).ok_or(HubError::NotFound("Item"))?;
        if node.is_folder() {
            return Err(HubError::invalid("Only documents can be exported"));
        }
        let stem: String = node
            .title
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let record = ExportRecord {
            id: Uuid::new_v4(),
            node_id,
            user_id: ctx.user_id.clone(),
            format,
            file_name: format!("{}.{}", stem, format.extension()),
            created_at: Utc::now(),
        };
        self.append_log(EXPORT_LOG, &record)?;
        self.exports.push(record.clone());
        self.record_activity(node_id, &ctx.user_id, ActivityKind::Exported, Some(format.extension().to_string()))?;
        Ok(record)
    }

    /// Newest first.
    pub fn exports_for_user(&self, user_id: &str, limit: usize) -> Vec<&ExportRecord> {
        self.exports
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .take(limit)
            .collect()
    }

    fn push_comment(&mut self, thread_id: Uuid, node_id: Uuid, author: &str, body: &str) -> Result<Comment> {
        let body = body.trim();
        if body.is_empty() {
            return Err(HubError::invalid("Comment cannot be empty"));
        }
        let comment = Comment {
            id: Uuid::new_v4(),
            thread_id,
            author_id: author.to_string(),
            body: body.to_string(),
            created_at: Utc::now(),
        };
        self.append_log(COMMENT_LOG, &comment)?;
        self.comments.push(comment.clone());

        let mut added = false;
        for user in extract_mentions(body) {
            if user == author {
                continue;
            }
            let mention = Mention {
                id: Uuid::new_v4(),
                node_id,
                thread_id: Some(thread_id),
                mentioned_user_id: user,
                author_id: author.to_string(),
                is_read: false,
                created_at: comment.created_at,
            };
            self.mentions.insert(mention.id, mention);
            added = true;
        }
        if added {
            self.save_mentions()?;
        }
        Ok(comment)
    }

    pub fn create_thread(
        &mut self,
        ctx: &AccessContext,
        node_id: Uuid,
        quote: Option<String>,
        body: &str,
    ) -> Result<ThreadView> {
        self.authorize(node_id, ctx, Action::Comment)?;
        if body.trim().is_empty() {
            return Err(HubError::invalid("Comment cannot be empty"));
        }
        let thread = Thread {
            id: Uuid::new_v4(),
            node_id,
            created_by: ctx.user_id.clone(),
            quote: quote.filter(|q| !q.trim().is_empty()),
            is_resolved: false,
            resolved_by: None,
            created_at: Utc::now(),
        };
        self.threads.insert(thread.id, thread.clone());
        self.save_threads()?;
        let comment = self.push_comment(thread.id, node_id, &ctx.user_id, body)?;
        self.record_activity(node_id, &ctx.user_id, ActivityKind::Commented, None)?;
        Ok(ThreadView {
            thread,
            comments: vec![comment],
        })
    }

    pub fn thread(&self, id: Uuid) -> Option<&Thread> {
        self.threads.get(&id)
    }

    pub fn add_comment(&mut self, ctx: &AccessContext, thread_id: Uuid, body: &str) -> Result<Comment> {
        let node_id = self
            .threads
            .get(&thread_id)
            .map(|t| t.node_id)
            .ok_or(HubError::NotFound("Thread"))?;
        self.authorize(node_id, ctx, Action::Comment)?;
        let comment = self.push_comment(thread_id, node_id, &ctx.user_id, body)?;
        self.record_activity(node_id, &ctx.user_id, ActivityKind::Commented, None)?;
        Ok(comment)
    }

    pub fn set_thread_resolved(&mut self, ctx: &AccessContext, thread_id: Uuid, resolved: bool) -> Result<Thread> {
        let node_id = self
            .threads
            .get(&thread_id)
            .map(|t| t.node_id)
            .ok_or(HubError::NotFound("Thread"))?;
        self.authorize(node_id, ctx, Action::Comment)?;
        let thread = self
            .threads
            .get_mut(&thread_id)
            .ok_or(HubError::NotFound("Thread"))?;
        thread.is_resolved = resolved;
        thread.resolved_by = resolved.then(|| ctx.user_id.clone());
        let thread = thread.clone();
        self.save_threads()?;
        if resolved {
            self.record_activity(node_id, &ctx.user_id, ActivityKind::Resolved, None)?;
        }
        Ok(thread)
    }

    /// Threads on a node, open ones first, each oldest first.
    pub fn threads_for_node(&self, ctx: &AccessContext, node_id: Uuid) -> Result<Vec<ThreadView>> {
        self.authorize(node_id, ctx, Action::View)?;
        let mut threads: Vec<&Thread> = self
            .threads
            .values()
            .filter(|t| t.node_id == node_id)
            .collect();
        threads.sort_by(|a, b| {
            a.is_resolved
                .cmp(&b.is_resolved)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(threads
            .into_iter()
            .map(|t| ThreadView {
                thread: t.clone(),
                comments: self
                    .comments
                    .iter()
                    .filter(|c| c.thread_id == t.id)
                    .cloned()
                    .collect(),
            })
            .collect())
    }

    /// Newest first. Mentions on nodes the caller cannot view are hidden.
    pub fn mentions_for_user(&self, ctx: &AccessContext, unread_only: bool) -> Vec<&Mention> {
        let mut resolver = AccessResolver::new(self, ctx);
        let mut out: Vec<&Mention> = self
            .mentions
            .values()
            .filter(|m| m.mentioned_user_id == ctx.user_id)
            .filter(|m| !unread_only || !m.is_read)
            .filter(|m| self.node(m.node_id).map_or(false, |n| !n.is_deleted))
            .filter(|m| resolver.can(m.node_id, Action::View))
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    pub fn mark_mention_read(&mut self, ctx: &AccessContext, id: Uuid) -> Result<()> {
        let mention = self
            .mentions
            .get_mut(&id)
            .filter(|m| m.mentioned_user_id == ctx.user_id)
            .ok_or(HubError::NotFound("Mention"))?;
        mention.is_read = true;
        self.save_mentions()
    }

    /// Returns how many mentions changed.
    pub fn mark_all_mentions_read(&mut self, ctx: &AccessContext) -> Result<usize> {
        let mut changed = 0;
        for m in self.mentions.values_mut() {
            if m.mentioned_user_id == ctx.user_id && !m.is_read {
                m.is_read = true;
                changed += 1;
            }
        }
        if changed > 0 {
            self.save_mentions()?;
        }
        Ok(changed)
    }
}
