use chrono::{Duration, Utc};
use tempfile::TempDir;
use uuid::Uuid;

use super::{NewNode, NodeUpdate, Store};
use crate::access::{AccessContext, Action, OrgRole, Role};
use crate::dashboard::dashboard;
use crate::error::HubError;
use crate::links::LinkRejection;
use crate::model::{ActivityKind, ExportFormat, NodeType};

fn store() -> (TempDir, Store) {
    let dir = TempDir::new().unwrap();
    let store = Store::new(dir.path()).unwrap();
    (dir, store)
}

fn folder(store: &mut Store, ctx: &AccessContext, parent: Option<Uuid>, title: &str) -> Uuid {
    store
        .create_node(
            ctx,
            NewNode {
                parent_id: parent,
                node_type: NodeType::Folder,
                title: title.into(),
                content: String::new(),
                icon: None,
            },
        )
        .unwrap()
        .id
}

fn doc(store: &mut Store, ctx: &AccessContext, parent: Uuid, title: &str) -> Uuid {
    store
        .create_node(
            ctx,
            NewNode {
                parent_id: Some(parent),
                node_type: NodeType::Doc,
                title: title.into(),
                content: "hello".into(),
                icon: None,
            },
        )
        .unwrap()
        .id
}

fn alice() -> AccessContext {
    AccessContext::personal("alice")
}

fn bob() -> AccessContext {
    AccessContext::personal("bob")
}

#[test]
fn reload_restores_nodes_grants_and_links() {
    let dir = TempDir::new().unwrap();
    let (folder_id, doc_id, token) = {
        let mut store = Store::new(dir.path()).unwrap();
        let f = folder(&mut store, &alice(), None, "Plans");
        let d = doc(&mut store, &alice(), f, "Roadmap");
        store.grant_access(&alice(), f, "bob", Role::Commenter).unwrap();
        let link = store
            .create_share_link(&alice(), f, Role::Viewer, None, Some(3))
            .unwrap();
        (f, d, link.token)
    };

    let store = Store::new(dir.path()).unwrap();
    assert_eq!(store.get_node(&alice(), doc_id).unwrap().content, "hello");
    assert_eq!(store.resolve_role(doc_id, &bob()), Some(Role::Commenter));
    let link = store.share_link_by_token(&token, Utc::now()).unwrap();
    assert_eq!(link.folder_id, folder_id);
    assert_eq!(link.max_uses, Some(3));
    assert_eq!(store.activity_for_node(&alice(), doc_id, 10).unwrap().len(), 1);
}

#[test]
fn empty_titles_and_folder_content_are_rejected() {
    let (_dir, mut store) = store();
    let f = folder(&mut store, &alice(), None, "Notes");
    let err = store
        .create_node(
            &alice(),
            NewNode {
                parent_id: Some(f),
                node_type: NodeType::Doc,
                title: "   ".into(),
                content: String::new(),
                icon: None,
            },
        )
        .unwrap_err();
    assert!(matches!(err, HubError::Invalid(_)));

    let update = NodeUpdate {
        content: Some("text".into()),
        ..Default::default()
    };
    assert!(store.update_node(&alice(), f, update).is_err());
    assert_eq!(store.node(f).unwrap().title, "Notes");
}

#[test]
fn closest_grant_wins_and_owner_stays_admin() {
    let (_dir, mut store) = store();
    let outer = folder(&mut store, &alice(), None, "Outer");
    let inner = folder(&mut store, &alice(), Some(outer), "Inner");
    let in_outer = doc(&mut store, &alice(), outer, "A");
    let in_inner = doc(&mut store, &alice(), inner, "B");

    store.grant_access(&alice(), outer, "bob", Role::Editor).unwrap();
    store.grant_access(&alice(), inner, "bob", Role::Viewer).unwrap();

    assert_eq!(store.resolve_role(in_outer, &bob()), Some(Role::Editor));
    assert_eq!(store.resolve_role(in_inner, &bob()), Some(Role::Viewer));
    assert_eq!(store.resolve_role(in_inner, &alice()), Some(Role::Admin));
    assert!(!store.can_perform(in_inner, &bob(), Action::Comment));

    // no grant anywhere on the chain
    let carol = AccessContext::personal("carol");
    assert_eq!(store.resolve_role(in_inner, &carol), None);
    assert!(matches!(
        store.get_node(&carol, in_inner),
        Err(HubError::NotFound(_))
    ));
}

#[test]
fn cannot_grant_above_own_role() {
    let (_dir, mut store) = store();
    let f = folder(&mut store, &alice(), None, "Team");
    store.grant_access(&alice(), f, "bob", Role::Editor).unwrap();
    let err = store.grant_access(&bob(), f, "carol", Role::Admin).unwrap_err();
    assert!(matches!(err, HubError::Forbidden(_)));
    store.grant_access(&bob(), f, "carol", Role::Commenter).unwrap();

    // bob cannot manage, but can drop his own grant
    assert!(store.revoke_access(&bob(), f, "carol").is_err());
    store.revoke_access(&bob(), f, "bob").unwrap();
    assert_eq!(store.resolve_role(f, &bob()), None);
}

#[test]
fn editors_cannot_rewrite_higher_grants() {
    let (_dir, mut store) = store();
    let f = folder(&mut store, &alice(), None, "Team");
    store.grant_access(&alice(), f, "carol", Role::Admin).unwrap();
    store.grant_access(&alice(), f, "bob", Role::Editor).unwrap();
    let carol = AccessContext::personal("carol");

    assert!(store.revoke_access(&bob(), f, "carol").is_err());
    let err = store.grant_access(&bob(), f, "carol", Role::Viewer).unwrap_err();
    assert!(matches!(err, HubError::Forbidden(_)));
    assert_eq!(store.resolve_role(f, &carol), Some(Role::Admin));

    // equal or lower grants stay within an editor's reach
    store.grant_access(&bob(), f, "dan", Role::Editor).unwrap();
    store.grant_access(&bob(), f, "dan", Role::Viewer).unwrap();
    assert_eq!(store.grant(f, "dan").unwrap().role, Role::Viewer);

    store.grant_access(&alice(), f, "carol", Role::Viewer).unwrap();
    assert_eq!(store.resolve_role(f, &carol), Some(Role::Viewer));
}

#[test]
fn org_members_get_default_role_unless_restricted() {
    let (_dir, mut store) = store();
    let ada = AccessContext::in_org("ada", "acme", OrgRole::Admin);
    let max = AccessContext::in_org("max", "acme", OrgRole::Member);
    let outsider = AccessContext::in_org("eve", "globex", OrgRole::Admin);

    let root = store.ensure_org_root(&ada, "acme").unwrap();
    let open = folder(&mut store, &ada, Some(root), "Open");
    let locked = folder(&mut store, &ada, Some(root), "Locked");
    let secret = doc(&mut store, &ada, locked, "Salaries");
    store.set_restricted(&ada, locked, true).unwrap();

    assert_eq!(store.resolve_role(open, &max), Some(Role::Editor));
    assert_eq!(store.resolve_role(secret, &max), None);
    assert_eq!(store.resolve_role(open, &outsider), None);
    assert_eq!(store.resolve_role(secret, &ada), Some(Role::Admin));

    let visible: Vec<Uuid> = store
        .children(&max, root)
        .unwrap()
        .iter()
        .map(|n| n.id)
        .collect();
    assert_eq!(visible, vec![open]);

    store.grant_access(&ada, locked, "max", Role::Viewer).unwrap();
    assert_eq!(store.resolve_role(secret, &max), Some(Role::Viewer));

    store.set_member_role(Role::Commenter);
    assert_eq!(store.resolve_role(open, &max), Some(Role::Commenter));
}

#[test]
fn share_link_with_one_use() {
    let (_dir, mut store) = store();
    let f = folder(&mut store, &alice(), None, "Launch");
    let link = store
        .create_share_link(&alice(), f, Role::Commenter, None, Some(1))
        .unwrap();

    let now = Utc::now();
    let first = store.redeem_share_link(&link.token, "bob", now).unwrap();
    assert_eq!(first.role, Role::Commenter);
    assert_eq!(first.use_count, 1);
    assert_eq!(store.resolve_role(f, &bob()), Some(Role::Commenter));

    let err = store.redeem_share_link(&link.token, "carol", now).unwrap_err();
    assert!(matches!(
        err,
        HubError::LinkRejected(LinkRejection::Exhausted)
    ));
    assert_eq!(err.to_string(), "This link has reached its maximum uses");
    assert_eq!(store.share_links_for_folder(&alice(), f).unwrap()[0].use_count, 1);

    let joined = store
        .activity_for_node(&alice(), f, 10)
        .unwrap()
        .iter()
        .any(|a| a.kind == ActivityKind::JoinedViaLink && a.user_id == "bob");
    assert!(joined);
}

#[test]
fn failed_grant_write_does_not_burn_the_link() {
    let (dir, mut store) = store();
    let f = folder(&mut store, &alice(), None, "Launch");
    let link = store
        .create_share_link(&alice(), f, Role::Viewer, None, Some(1))
        .unwrap();

    // a directory where the grants file belongs makes every write fail
    let grants_file = dir.path().join("folder_access.json");
    std::fs::create_dir(&grants_file).unwrap();
    let now = Utc::now();
    assert!(matches!(
        store.redeem_share_link(&link.token, "bob", now),
        Err(HubError::Io(_))
    ));
    assert_eq!(store.resolve_role(f, &bob()), None);
    assert_eq!(store.share_link_by_token(&link.token, now).unwrap().use_count, 0);

    std::fs::remove_dir(&grants_file).unwrap();
    let out = store.redeem_share_link(&link.token, "bob", now).unwrap();
    assert_eq!(out.use_count, 1);
    assert_eq!(store.resolve_role(f, &bob()), Some(Role::Viewer));
}

#[test]
fn failed_count_write_rolls_back_the_grant() {
    let (dir, mut store) = store();
    let f = folder(&mut store, &alice(), None, "Launch");
    let link = store
        .create_share_link(&alice(), f, Role::Editor, None, Some(2))
        .unwrap();
    let links_file = dir.path().join("share_links.json");
    std::fs::remove_file(&links_file).unwrap();
    std::fs::create_dir(&links_file).unwrap();

    let now = Utc::now();
    assert!(store.redeem_share_link(&link.token, "bob", now).is_err());
    assert_eq!(store.resolve_role(f, &bob()), None);
    assert_eq!(store.share_link_by_token(&link.token, now).unwrap().use_count, 0);

    std::fs::remove_dir(&links_file).unwrap();
    store.redeem_share_link(&link.token, "bob", now).unwrap();
    let reloaded = Store::new(dir.path()).unwrap();
    assert_eq!(reloaded.resolve_role(f, &bob()), Some(Role::Editor));
    assert_eq!(reloaded.share_link_by_token(&link.token, now).unwrap().use_count, 1);
}

#[test]
fn failed_membership_write_does_not_burn_the_invite() {
    let (dir, mut store) = store();
    let ada = AccessContext::in_org("ada", "acme", OrgRole::Admin);
    let invite = store
        .create_invite_link(&ada, "acme", OrgRole::Member, None, Some(1))
        .unwrap();
    let members_file = dir.path().join("org_members.json");
    std::fs::create_dir(&members_file).unwrap();

    let now = Utc::now();
    assert!(store.redeem_invite_link(&invite.token, "nina", now).is_err());
    assert_eq!(store.org_role("acme", "nina"), None);
    assert_eq!(store.invite_link_by_token(&invite.token, now).unwrap().use_count, 0);

    std::fs::remove_dir(&members_file).unwrap();
    store.redeem_invite_link(&invite.token, "nina", now).unwrap();
    assert_eq!(store.org_role("acme", "nina"), Some(OrgRole::Member));
}

#[test]
fn disabled_and_expired_links_are_rejected() {
    let (_dir, mut store) = store();
    let f = folder(&mut store, &alice(), None, "Drafts");
    let now = Utc::now();
    let link = store
        .create_share_link(&alice(), f, Role::Viewer, Some(now + Duration::hours(1)), None)
        .unwrap();

    let later = now + Duration::hours(2);
    assert!(matches!(
        store.redeem_share_link(&link.token, "bob", later),
        Err(HubError::LinkRejected(LinkRejection::Expired))
    ));

    store.set_share_link_disabled(&alice(), link.id, true).unwrap();
    assert!(matches!(
        store.redeem_share_link(&link.token, "bob", now),
        Err(HubError::LinkRejected(LinkRejection::Disabled))
    ));
    assert_eq!(store.resolve_role(f, &bob()), None);

    store.set_share_link_disabled(&alice(), link.id, false).unwrap();
    store.redeem_share_link(&link.token, "bob", now).unwrap();

    store.delete_share_link(&alice(), link.id).unwrap();
    assert!(matches!(
        store.share_link_by_token(&link.token, now),
        Err(HubError::NotFound(_))
    ));
    // grants made through a deleted link remain
    assert_eq!(store.resolve_role(f, &bob()), Some(Role::Viewer));
}

#[test]
fn redemption_never_downgrades() {
    let (_dir, mut store) = store();
    let f = folder(&mut store, &alice(), None, "Designs");
    store.grant_access(&alice(), f, "bob", Role::Editor).unwrap();
    let link = store
        .create_share_link(&alice(), f, Role::Viewer, None, None)
        .unwrap();
    let out = store.redeem_share_link(&link.token, "bob", Utc::now()).unwrap();
    assert_eq!(out.role, Role::Editor);
    assert_eq!(store.resolve_role(f, &bob()), Some(Role::Editor));
}

#[test]
fn owner_redeeming_own_link_changes_nothing() {
    let (_dir, mut store) = store();
    let f = folder(&mut store, &alice(), None, "Mine");
    let link = store
        .create_share_link(&alice(), f, Role::Viewer, None, Some(1))
        .unwrap();
    let out = store.redeem_share_link(&link.token, "alice", Utc::now()).unwrap();
    assert_eq!(out.role, Role::Admin);
    assert_eq!(out.use_count, 0);
    assert!(store.grant(f, "alice").is_none());
}

#[test]
fn link_role_is_capped_by_issuer() {
    let (_dir, mut store) = store();
    let f = folder(&mut store, &alice(), None, "Shared");
    store.grant_access(&alice(), f, "bob", Role::Editor).unwrap();
    assert!(matches!(
        store.create_share_link(&bob(), f, Role::Admin, None, None),
        Err(HubError::Forbidden(_))
    ));
    assert!(matches!(
        store.create_share_link(&alice(), f, Role::Viewer, None, Some(0)),
        Err(HubError::Invalid(_))
    ));
    let d = doc(&mut store, &alice(), f, "Not a folder");
    assert!(store.create_share_link(&alice(), d, Role::Viewer, None, None).is_err());
}

#[test]
fn invite_links_add_members_without_demoting() {
    let (_dir, mut store) = store();
    let ada = AccessContext::in_org("ada", "acme", OrgRole::Admin);
    let max = AccessContext::in_org("max", "acme", OrgRole::Member);

    assert!(matches!(
        store.create_invite_link(&max, "acme", OrgRole::Member, None, None),
        Err(HubError::Forbidden(_))
    ));
    let member_link = store
        .create_invite_link(&ada, "acme", OrgRole::Member, None, Some(5))
        .unwrap();
    let admin_link = store
        .create_invite_link(&ada, "acme", OrgRole::Admin, None, None)
        .unwrap();

    let now = Utc::now();
    store.redeem_invite_link(&admin_link.token, "carol", now).unwrap();
    let out = store.redeem_invite_link(&member_link.token, "carol", now).unwrap();
    assert_eq!(out.membership.role, OrgRole::Admin);
    assert_eq!(out.use_count, 1);
    assert_eq!(store.org_role("acme", "carol"), Some(OrgRole::Admin));

    store.redeem_invite_link(&member_link.token, "dan", now).unwrap();
    assert_eq!(store.org_role("acme", "dan"), Some(OrgRole::Member));
    assert_eq!(store.org_members(&ada, "acme").unwrap().len(), 2);
    assert_eq!(store.invite_links_for_org(&ada, "acme").unwrap().len(), 2);
}

#[test]
fn move_rejects_cycles_and_roots() {
    let (_dir, mut store) = store();
    let a = folder(&mut store, &alice(), None, "A");
    let b = folder(&mut store, &alice(), Some(a), "B");
    let c = folder(&mut store, &alice(), Some(b), "C");
    let d = doc(&mut store, &alice(), a, "Doc");

    assert!(store.move_node(&alice(), a, c).is_err());
    assert!(store.move_node(&alice(), a, a).is_err());
    assert!(store.move_node(&alice(), c, d).is_err());
    let root = store.ensure_root("alice").unwrap();
    assert!(store.move_node(&alice(), root, a).is_err());

    store.move_node(&alice(), d, c).unwrap();
    assert_eq!(store.node(d).unwrap().parent_id, Some(c));
    let kids: Vec<Uuid> = store.children(&alice(), c).unwrap().iter().map(|n| n.id).collect();
    assert_eq!(kids, vec![d]);
    assert!(store.children(&alice(), a).unwrap().iter().all(|n| n.id != d));
}

#[test]
fn cannot_move_between_workspaces() {
    let (_dir, mut store) = store();
    let ada = AccessContext::in_org("ada", "acme", OrgRole::Admin);
    let org_root = store.ensure_org_root(&ada, "acme").unwrap();
    let personal = folder(&mut store, &ada, None, "Private");
    let d = doc(&mut store, &ada, personal, "Diary");
    assert!(matches!(
        store.move_node(&ada, d, org_root),
        Err(HubError::Invalid(_))
    ));
}

#[test]
fn delete_restore_and_purge() {
    let (dir, mut store) = store();
    let f = folder(&mut store, &alice(), None, "Old");
    let d = doc(&mut store, &alice(), f, "Stale");
    store.grant_access(&alice(), f, "bob", Role::Editor).unwrap();
    store.create_thread(&alice(), d, None, "@bob look").unwrap();

    assert!(store.soft_delete(&bob(), f).is_err());
    let removed = store.soft_delete(&alice(), f).unwrap();
    assert_eq!(removed.len(), 2);
    assert!(store.node(d).unwrap().is_deleted);
    assert_eq!(store.resolve_role(d, &bob()), None);
    assert_eq!(store.resolve_role(d, &alice()), Some(Role::Admin));
    assert!(store.mentions_for_user(&bob(), false).is_empty());

    let trash: Vec<Uuid> = store.trash(&alice()).iter().map(|n| n.id).collect();
    assert_eq!(trash, vec![f]);
    assert!(matches!(
        store.restore(&alice(), d),
        Err(HubError::Invalid(_))
    ));

    store.restore(&alice(), f).unwrap();
    assert!(!store.node(d).unwrap().is_deleted);
    assert_eq!(store.resolve_role(d, &bob()), Some(Role::Editor));

    store.soft_delete(&alice(), f).unwrap();
    store.purge(&alice(), f).unwrap();
    assert!(store.node(f).is_none());
    assert!(store.node(d).is_none());
    assert!(store.grant(f, "bob").is_none());
    assert!(!dir.path().join("nodes").join(format!("{}.json", d)).exists());

    let reloaded = Store::new(dir.path()).unwrap();
    assert!(reloaded.node(d).is_none());
    assert!(reloaded.comments.is_empty());
}

#[test]
fn threads_comments_and_mentions() {
    let (_dir, mut store) = store();
    let f = folder(&mut store, &alice(), None, "Review");
    let d = doc(&mut store, &alice(), f, "Draft");
    store.grant_access(&alice(), f, "bob", Role::Commenter).unwrap();
    store.grant_access(&alice(), f, "carol", Role::Viewer).unwrap();
    let carol = AccessContext::personal("carol");

    let view = store
        .create_thread(&alice(), d, Some("intro".into()), "@bob @alice thoughts? @bob")
        .unwrap();
    assert_eq!(view.comments.len(), 1);

    let bob_mentions = store.mentions_for_user(&bob(), true);
    assert_eq!(bob_mentions.len(), 1);
    assert_eq!(bob_mentions[0].thread_id, Some(view.thread.id));
    assert!(store.mentions_for_user(&alice(), false).is_empty());

    store.add_comment(&bob(), view.thread.id, "looks good @carol").unwrap();
    assert!(matches!(
        store.add_comment(&carol, view.thread.id, "me too"),
        Err(HubError::Forbidden(_))
    ));
    assert!(store.add_comment(&bob(), view.thread.id, "  ").is_err());

    let mention_id = store.mentions_for_user(&carol, true)[0].id;
    assert!(store.mark_mention_read(&bob(), mention_id).is_err());
    store.mark_mention_read(&carol, mention_id).unwrap();
    assert!(store.mentions_for_user(&carol, true).is_empty());
    assert_eq!(store.mark_all_mentions_read(&bob()).unwrap(), 1);

    // mentioning someone without access does not reveal the document to them
    store.add_comment(&alice(), view.thread.id, "@dave fyi").unwrap();
    let dave = AccessContext::personal("dave");
    assert!(store.mentions_for_user(&dave, false).is_empty());
    store.grant_access(&alice(), f, "dave", Role::Viewer).unwrap();
    assert_eq!(store.mentions_for_user(&dave, false).len(), 1);

    let resolved = store.set_thread_resolved(&bob(), view.thread.id, true).unwrap();
    assert_eq!(resolved.resolved_by.as_deref(), Some("bob"));
    let second = store.create_thread(&alice(), d, None, "another").unwrap();

    let threads = store.threads_for_node(&carol, d).unwrap();
    assert_eq!(threads.len(), 2);
    assert_eq!(threads[0].thread.id, second.thread.id);
    assert_eq!(threads[1].comments.len(), 3);
}

#[test]
fn exports_are_recorded_per_user() {
    let (_dir, mut store) = store();
    let f = folder(&mut store, &alice(), None, "Reports");
    let d = doc(&mut store, &alice(), f, "Q3 report");
    let rec = store.record_export(&alice(), d, ExportFormat::Pdf).unwrap();
    assert_eq!(rec.file_name, "Q3_report.pdf");
    assert!(store.record_export(&alice(), f, ExportFormat::Pdf).is_err());
    assert!(store.record_export(&bob(), d, ExportFormat::Html).is_err());
    assert_eq!(store.exports_for_user("alice", 10).len(), 1);
    assert!(store.exports_for_user("bob", 10).is_empty());
}

#[test]
fn tags_must_exist_and_names_are_unique() {
    let (_dir, mut store) = store();
    let f = folder(&mut store, &alice(), None, "Tagged");
    let d = doc(&mut store, &alice(), f, "Doc");
    let urgent = store.create_tag(&alice(), "Urgent", Some("#f00".into())).unwrap();
    assert!(store.create_tag(&alice(), "urgent", None).is_err());
    assert!(store.list_tags(&bob()).is_empty());

    assert!(store.set_node_tags(&alice(), d, vec![Uuid::new_v4()]).is_err());
    // another user's tag is unknown here
    let theirs = store.create_tag(&bob(), "Urgent", None).unwrap();
    assert!(store.set_node_tags(&alice(), d, vec![theirs.id]).is_err());
    store.set_node_tags(&alice(), d, vec![urgent.id, urgent.id]).unwrap();
    assert_eq!(store.node(d).unwrap().tag_ids, vec![urgent.id]);
}

#[test]
fn corrupted_parent_cycle_resolves_to_nothing() {
    let (_dir, mut store) = store();
    let a = folder(&mut store, &alice(), None, "A");
    let b = folder(&mut store, &alice(), Some(a), "B");
    store.grant_access(&alice(), a, "bob", Role::Editor).unwrap();
    store.nodes.get_mut(&a).unwrap().parent_id = Some(b);

    assert_eq!(store.resolve_role(b, &bob()), None);
    assert!(!store.is_ancestor(Uuid::new_v4(), b));
    assert!(store.descendant_ids(a).len() <= 2);
}

#[test]
fn dashboard_collects_visible_items() {
    let (_dir, mut store) = store();
    let f = folder(&mut store, &alice(), None, "Project");
    let d = doc(&mut store, &alice(), f, "Plan");
    let root = store.ensure_root("alice").unwrap();
    let _private = doc(&mut store, &alice(), root, "Private");
    store.grant_access(&alice(), f, "bob", Role::Commenter).unwrap();
    store.create_thread(&alice(), d, None, "ping @bob").unwrap();
    store.record_export(&bob(), d, ExportFormat::Markdown).unwrap();

    let board = dashboard(&store, &bob(), 10);
    assert_eq!(board.recent_documents.len(), 1);
    assert_eq!(board.recent_documents[0].id, d);
    assert_eq!(board.recent_documents[0].role, Role::Commenter);
    assert_eq!(board.shared_folders.len(), 1);
    assert_eq!(board.shared_folders[0].id, f);
    assert_eq!(board.unread_mentions, 1);
    assert_eq!(board.recent_exports.len(), 1);
    assert!(board
        .recent_activity
        .iter()
        .all(|a| store.can_perform(a.node_id, &bob(), Action::View)));
    assert!(!board.recent_activity.is_empty());
}
