use chrono::Utc;
use groovy_docs_core::model::NodeType;
use groovy_docs_core::storage::NewNode;
use groovy_docs_core::{AccessContext, HubError, Role, Store};
use std::sync::Arc;
use tokio::sync::RwLock;

#[tokio::test]
async fn concurrent_redemptions_respect_max_uses() {
    let tempdir = tempfile::tempdir().unwrap();
    let store = Arc::new(RwLock::new(Store::new(tempdir.path()).unwrap()));
    let owner = AccessContext::personal("owner");
    let (folder_id, token) = {
        let mut s = store.write().await;
        let folder = s
            .create_node(
                &owner,
                NewNode {
                    parent_id: None,
                    node_type: NodeType::Folder,
                    title: "Hot".into(),
                    content: String::new(),
                    icon: None,
                },
            )
            .unwrap();
        let link = s
            .create_share_link(&owner, folder.id, Role::Viewer, None, Some(3))
            .unwrap();
        (folder.id, link.token)
    };

    let mut tasks = Vec::new();
    for i in 0..12 {
        let store = store.clone();
        let token = token.clone();
        tasks.push(tokio::spawn(async move {
            let mut s = store.write().await;
            s.redeem_share_link(&token, &format!("user{}", i), Utc::now())
        }));
    }

    let mut granted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => granted += 1,
            Err(HubError::LinkRejected(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(granted, 3);

    assert!(store.read().await.share_link_by_token(&token, Utc::now()).is_err());

    let reloaded = Store::new(tempdir.path()).unwrap();
    let links = reloaded.share_links_for_folder(&owner, folder_id).unwrap();
    assert_eq!(links[0].use_count, 3);
    assert_eq!(reloaded.list_access(&owner, folder_id).unwrap().len(), 3);
}
