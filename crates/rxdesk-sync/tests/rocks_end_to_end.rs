//! The synchronizer running against the local RocksDB backend.

use std::sync::Arc;
use std::time::Duration;

use rxdesk_core::{AgentId, ConversationId};
use rxdesk_store::{ConversationPatch, ConversationStatus, RocksStore};
use rxdesk_sync::testing::conversation;
use rxdesk_sync::{DashboardView, DragController, DropAction, EngineHandle, SyncConfig, SyncEngine};
use tempfile::TempDir;

fn id(s: &str) -> ConversationId {
    ConversationId::new(s).unwrap()
}

async fn until(
    engine: &EngineHandle,
    predicate: impl FnMut(&DashboardView) -> bool,
) -> Arc<DashboardView> {
    tokio::time::timeout(Duration::from_secs(5), engine.wait_until(predicate))
        .await
        .expect("view never matched")
        .unwrap()
}

fn open_store() -> (TempDir, Arc<RocksStore>) {
    let dir = TempDir::new().unwrap();
    let store = RocksStore::open(dir.path()).unwrap();
    store.put_conversation(&conversation("1", 10)).unwrap();
    store.put_conversation(&conversation("3", 30)).unwrap();
    (dir, Arc::new(store))
}

#[tokio::test]
async fn drag_persists_and_echoes() {
    let (_dir, store) = open_store();
    let feed = store.feed().clone();
    let engine = SyncEngine::mount(Arc::clone(&store), &feed, SyncConfig::default());
    let view = until(&engine, |v| !v.loading).await;
    let ids: Vec<_> = view.conversations.iter().map(|c| c.id.to_string()).collect();
    assert_eq!(ids, vec!["3", "1"]);

    let agent = AgentId::new("A").unwrap();
    let controller = DragController::new(Some(agent.clone()));
    controller
        .handle_drop(
            &engine,
            &DropAction::from_columns(id("1"), "ongoing", Some("waiting")).unwrap(),
        )
        .await
        .unwrap();

    let stored = store.get_conversation(&id("1")).unwrap().unwrap();
    assert_eq!(stored.status, ConversationStatus::Waiting);
    assert_eq!(stored.assigned_to, Some(agent.clone()));

    let view = engine.view();
    let record = view.get(&id("1")).unwrap();
    assert_eq!(record.status, ConversationStatus::Waiting);
    assert_eq!(record.assigned_to, Some(agent));
    assert_eq!(view.board().count(ConversationStatus::Waiting), 1);

    engine.unmount().await;
    assert_eq!(store.feed().subscriber_count(), 0);
}

#[tokio::test]
async fn backend_changes_reach_the_board() {
    let (_dir, store) = open_store();
    let feed = store.feed().clone();
    let engine = SyncEngine::mount(Arc::clone(&store), &feed, SyncConfig::default());
    until(&engine, |v| !v.loading).await;

    store.put_conversation(&conversation("2", 50)).unwrap();
    let view = until(&engine, |v| v.get(&id("2")).is_some()).await;
    assert_eq!(view.conversations[0].id, id("2"));
    assert!(view.conversations[0].is_new);

    store
        .update_conversation(
            &id("3"),
            &ConversationPatch::status(ConversationStatus::Completed),
        )
        .unwrap();
    until(&engine, |v| {
        v.get(&id("3"))
            .is_some_and(|c| c.status == ConversationStatus::Completed)
    })
    .await;

    store.delete_conversation(&id("2")).unwrap();
    let view = until(&engine, |v| v.get(&id("2")).is_none()).await;
    assert_eq!(view.conversations.len(), 2);

    engine.unmount().await;
}

#[tokio::test]
async fn reload_picks_up_rows_written_elsewhere() {
    let (dir, store) = open_store();
    let feed = store.feed().clone();
    let engine = SyncEngine::mount(Arc::clone(&store), &feed, SyncConfig::default());
    until(&engine, |v| !v.loading).await;
    engine.unmount().await;

    // Rows written while nothing is mounted are only seen on the next load.
    store.put_conversation(&conversation("4", 60)).unwrap();
    let engine = SyncEngine::mount(Arc::clone(&store), &feed, SyncConfig::default());
    let view = until(&engine, |v| !v.loading).await;
    assert_eq!(view.conversations.len(), 3);
    assert!(!view.get(&id("4")).unwrap().is_new);

    engine.reload().await.unwrap();
    assert_eq!(engine.view().conversations.len(), 3);
    engine.unmount().await;
    drop(dir);
}
