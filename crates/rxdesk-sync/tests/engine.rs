//! Engine behaviour against a scripted store and an in-process feed.

use std::sync::Arc;
use std::time::Duration;

use rxdesk_core::{AgentId, ConversationId};
use rxdesk_store::{
    ChangeFeed, Conversation, ConversationPatch, ConversationStatus, LocalFeed, RawChange,
};
use rxdesk_sync::testing::{conversation, ScriptedStore, WriteScript};
use rxdesk_sync::{
    DashboardView, DragController, DropAction, EngineHandle, SyncConfig, SyncEngine, SyncError,
    TransitionOutcome,
};
use serde_json::json;

use ConversationStatus::{Completed, Ongoing, Waiting};

fn id(s: &str) -> ConversationId {
    ConversationId::new(s).unwrap()
}

fn agent(s: &str) -> AgentId {
    AgentId::new(s).unwrap()
}

fn assigned(id: &str, status: ConversationStatus, agent_id: &str) -> Conversation {
    let mut record = conversation(id, 0);
    record.status = status;
    record.assigned_to = Some(agent(agent_id));
    record
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

async fn mount(store: &Arc<ScriptedStore>, feed: &LocalFeed) -> EngineHandle {
    let engine = SyncEngine::mount(Arc::clone(store), feed, SyncConfig::default());
    until(&engine, |v| !v.loading).await;
    engine
}

fn status_of(view: &DashboardView, s: &str) -> Option<ConversationStatus> {
    view.get(&id(s)).map(|c| c.status)
}

// =============================================================================
// Loading
// =============================================================================

#[tokio::test]
async fn initial_load_orders_by_recency() {
    let feed = LocalFeed::new();
    let store = Arc::new(ScriptedStore::new(vec![
        conversation("t2", 20),
        conversation("t3", 10),
        conversation("t1", 30),
    ]));
    let engine = mount(&store, &feed).await;

    let ids: Vec<_> = engine
        .view()
        .conversations
        .iter()
        .map(|c| c.id.to_string())
        .collect();
    assert_eq!(ids, vec!["t1", "t2", "t3"]);

    feed.publish(&RawChange::update(
        "t3",
        json!({"id": "t3", "last_message_time": "2024-05-01T13:00:00Z"}),
    ));
    let view = until(&engine, |v| v.conversations[0].id.as_str() == "t3").await;
    let ids: Vec<_> = view.conversations.iter().map(|c| c.id.to_string()).collect();
    assert_eq!(ids, vec!["t3", "t1", "t2"]);
}

#[tokio::test]
async fn fetch_failure_then_reload() {
    let feed = LocalFeed::new();
    let store = Arc::new(ScriptedStore::new(vec![conversation("1", 0)]));
    store.fail_fetch("connection refused");

    let engine = mount(&store, &feed).await;
    let view = engine.view();
    assert!(view.conversations.is_empty());
    assert!(view.fetch_error.as_deref().unwrap().contains("connection refused"));

    assert!(matches!(
        engine.reload().await,
        Err(SyncError::FetchFailure(_))
    ));

    store.heal_fetch();
    engine.reload().await.unwrap();
    let view = engine.view();
    assert!(view.fetch_error.is_none());
    assert_eq!(view.conversations.len(), 1);
    assert_eq!(store.fetch_count(), 3);
}

#[tokio::test]
async fn changes_during_fetch_are_replayed_after_seed() {
    let feed = LocalFeed::new();
    let store = Arc::new(ScriptedStore::new(vec![conversation("1", 0)]));
    let gate = store.hold_fetch();
    let engine = SyncEngine::mount(Arc::clone(&store), &feed, SyncConfig::default());

    feed.publish(&RawChange::update("1", json!({"last_message": "ping"})));
    feed.publish(&RawChange::insert(
        serde_json::to_value(conversation("2", 5)).unwrap(),
    ));
    // A malformed event marks the point where the two above were consumed.
    feed.publish(&RawChange::delete(""));
    let view = until(&engine, |v| v.dropped_events == 1).await;
    assert!(view.loading);
    assert!(view.conversations.is_empty());

    gate.send(()).unwrap();
    let view = until(&engine, |v| !v.loading).await;
    assert_eq!(view.get(&id("1")).unwrap().last_message, "ping");
    assert!(view.get(&id("2")).unwrap().is_new);
}

// =============================================================================
// Remote Events
// =============================================================================

#[tokio::test]
async fn insert_then_delete_leaves_board_empty() {
    let feed = LocalFeed::new();
    let store = Arc::new(ScriptedStore::new(Vec::new()));
    let engine = mount(&store, &feed).await;

    let row = serde_json::to_value(conversation("2", 0)).unwrap();
    feed.publish(&RawChange::insert(row.clone()));
    feed.publish(&RawChange::insert(row));
    let view = until(&engine, |v| v.get(&id("2")).is_some()).await;
    assert_eq!(view.conversations.len(), 1);
    assert_eq!(engine.board().new_arrivals(), &[id("2")]);

    feed.publish(&RawChange::delete("2"));
    let view = until(&engine, |v| v.get(&id("2")).is_none()).await;
    assert!(view.conversations.is_empty());
}

#[tokio::test]
async fn acknowledge_clears_new_arrival() {
    let feed = LocalFeed::new();
    let store = Arc::new(ScriptedStore::new(Vec::new()));
    let engine = mount(&store, &feed).await;

    feed.publish(&RawChange::insert(
        serde_json::to_value(conversation("2", 0)).unwrap(),
    ));
    until(&engine, |v| v.get(&id("2")).is_some()).await;

    assert!(engine.acknowledge(&id("2")).await.unwrap());
    assert!(!engine.acknowledge(&id("2")).await.unwrap());
    assert!(engine.board().new_arrivals().is_empty());
}

#[tokio::test]
async fn malformed_events_are_counted_and_skipped() {
    let feed = LocalFeed::new();
    let store = Arc::new(ScriptedStore::new(vec![conversation("1", 0)]));
    let engine = mount(&store, &feed).await;

    feed.publish(&RawChange::update("1", json!({"status": "archived"})));
    feed.publish(&RawChange {
        event_type: "TRUNCATE".to_string(),
        new: json!({}),
        old: json!({}),
    });
    feed.publish(&RawChange::update("1", json!({"status": "completed"})));

    let view = until(&engine, |v| status_of(v, "1") == Some(Completed)).await;
    assert_eq!(view.dropped_events, 2);
}

// =============================================================================
// Transitions
// =============================================================================

#[tokio::test]
async fn drag_to_waiting_claims_with_one_write() {
    let feed = LocalFeed::new();
    let store = Arc::new(ScriptedStore::new(vec![conversation("1", 0)]).with_echo(feed.clone()));
    let engine = mount(&store, &feed).await;

    let controller = DragController::new(Some(agent("A")));
    let drop = DropAction {
        conversation_id: id("1"),
        source: Ongoing,
        destination: Some(Waiting),
    };
    let outcome = controller.handle_drop(&engine, &drop).await.unwrap();
    assert_eq!(outcome, Some(TransitionOutcome::Applied));

    let view = engine.view();
    let record = view.get(&id("1")).unwrap();
    assert_eq!(record.status, Waiting);
    assert_eq!(record.assigned_to, Some(agent("A")));
    assert_eq!(
        store.writes(),
        vec![(
            id("1"),
            ConversationPatch::status(Waiting).with_assigned_to(Some(agent("A")))
        )]
    );
}

#[tokio::test]
async fn ignored_drops_issue_nothing() {
    let feed = LocalFeed::new();
    let store = Arc::new(ScriptedStore::new(vec![conversation("1", 0)]));
    let engine = mount(&store, &feed).await;
    let controller = DragController::new(Some(agent("A")));

    for destination in [None, Some(Ongoing)] {
        let drop = DropAction {
            conversation_id: id("1"),
            source: Ongoing,
            destination,
        };
        assert_eq!(controller.handle_drop(&engine, &drop).await.unwrap(), None);
    }
    assert!(store.writes().is_empty());
}

#[tokio::test]
async fn optimistic_change_is_visible_before_confirmation() {
    let feed = LocalFeed::new();
    let store = Arc::new(ScriptedStore::new(vec![conversation("1", 0)]));
    let engine = mount(&store, &feed).await;
    let gate = store.hold_write();

    let conv_id = id("1");
    let (outcome, ()) = tokio::join!(
        engine.transition(&conv_id, Completed, None),
        async {
            until(&engine, |v| status_of(v, "1") == Some(Completed)).await;
            gate.send(Ok(())).unwrap();
        }
    );
    assert_eq!(outcome.unwrap(), TransitionOutcome::Applied);
}

#[tokio::test]
async fn failed_write_reverts_status_and_assignee() {
    let feed = LocalFeed::new();
    let store = Arc::new(ScriptedStore::new(vec![assigned("1", Ongoing, "B")]));
    let engine = mount(&store, &feed).await;
    store.script(WriteScript::Fail("row is locked".to_string()));

    let err = engine
        .transition(&id("1"), Waiting, Some(agent("A")))
        .await
        .unwrap_err();
    match err {
        SyncError::WriteFailure { id: failed, reason } => {
            assert_eq!(failed, id("1"));
            assert!(reason.contains("row is locked"));
        }
        other => panic!("expected WriteFailure, got {other:?}"),
    }

    let view = engine.view();
    let record = view.get(&id("1")).unwrap();
    assert_eq!(record.status, Ongoing);
    assert_eq!(record.assigned_to, Some(agent("B")));
}

#[tokio::test]
async fn same_status_is_a_noop() {
    let feed = LocalFeed::new();
    let store = Arc::new(ScriptedStore::new(vec![conversation("1", 0)]));
    let engine = mount(&store, &feed).await;

    let outcome = engine.transition(&id("1"), Ongoing, None).await.unwrap();
    assert_eq!(outcome, TransitionOutcome::Unchanged);
    assert!(store.writes().is_empty());
}

#[tokio::test]
async fn claim_without_agent_is_rejected_before_writing() {
    let feed = LocalFeed::new();
    let store = Arc::new(ScriptedStore::new(vec![conversation("1", 0)]));
    let engine = mount(&store, &feed).await;

    let result = engine.transition(&id("1"), Waiting, None).await;
    assert!(matches!(result, Err(SyncError::InvariantViolation(_))));
    assert!(store.writes().is_empty());
    assert_eq!(status_of(&engine.view(), "1"), Some(Ongoing));
}

#[tokio::test]
async fn release_keeps_assignee() {
    let feed = LocalFeed::new();
    let store = Arc::new(ScriptedStore::new(vec![assigned("1", Waiting, "A")]));
    let engine = mount(&store, &feed).await;

    engine
        .transition(&id("1"), Ongoing, Some(agent("B")))
        .await
        .unwrap();

    let view = engine.view();
    let record = view.get(&id("1")).unwrap();
    assert_eq!(record.status, Ongoing);
    assert_eq!(record.assigned_to, Some(agent("A")));
    assert_eq!(
        store.writes(),
        vec![(id("1"), ConversationPatch::status(Ongoing))]
    );
}

#[tokio::test]
async fn unknown_conversation_is_not_found() {
    let feed = LocalFeed::new();
    let store = Arc::new(ScriptedStore::new(Vec::new()));
    let engine = mount(&store, &feed).await;

    let result = engine.transition(&id("404"), Completed, None).await;
    assert!(matches!(result, Err(SyncError::NotFound(_))));
}

#[tokio::test]
async fn assign_writes_only_the_assignee() {
    let feed = LocalFeed::new();
    let store = Arc::new(ScriptedStore::new(vec![conversation("1", 0)]));
    let engine = mount(&store, &feed).await;

    let first = engine.assign(&id("1"), Some(agent("C"))).await.unwrap();
    let second = engine.assign(&id("1"), Some(agent("C"))).await.unwrap();
    assert_eq!(first, TransitionOutcome::Applied);
    assert_eq!(second, TransitionOutcome::Unchanged);
    assert_eq!(
        store.writes(),
        vec![(id("1"), ConversationPatch::assigned_to(Some(agent("C"))))]
    );
}

// =============================================================================
// Conflicts
// =============================================================================

#[tokio::test]
async fn remote_completion_during_flight_then_echo_wins() {
    let feed = LocalFeed::new();
    let store = Arc::new(ScriptedStore::new(vec![conversation("1", 0)]));
    let engine = mount(&store, &feed).await;
    let gate = store.hold_write();

    let conv_id = id("1");
    let (outcome, ()) = tokio::join!(
        engine.transition(&conv_id, Waiting, Some(agent("A"))),
        async {
            until(&engine, |v| status_of(v, "1") == Some(Waiting)).await;
            feed.publish(&RawChange::update("1", json!({"id": "1", "status": "completed"})));
            until(&engine, |v| status_of(v, "1") == Some(Completed)).await;
            gate.send(Ok(())).unwrap();
        }
    );
    assert_eq!(outcome.unwrap(), TransitionOutcome::Applied);
    assert_eq!(status_of(&engine.view(), "1"), Some(Completed));

    // The backend confirms the local write last.
    feed.publish(&RawChange::update(
        "1",
        json!({"id": "1", "status": "waiting", "assigned_to": "A"}),
    ));
    let view = until(&engine, |v| status_of(v, "1") == Some(Waiting)).await;
    assert_eq!(view.get(&id("1")).unwrap().assigned_to, Some(agent("A")));
}

#[tokio::test]
async fn remote_completion_after_echo_wins() {
    let feed = LocalFeed::new();
    let store = Arc::new(ScriptedStore::new(vec![conversation("1", 0)]).with_echo(feed.clone()));
    let engine = mount(&store, &feed).await;

    engine
        .transition(&id("1"), Waiting, Some(agent("A")))
        .await
        .unwrap();
    feed.publish(&RawChange::update("1", json!({"id": "1", "status": "completed"})));

    let view = until(&engine, |v| status_of(v, "1") == Some(Completed)).await;
    assert_eq!(view.get(&id("1")).unwrap().assigned_to, Some(agent("A")));
}

#[tokio::test]
async fn failure_after_remote_update_keeps_remote_value() {
    let feed = LocalFeed::new();
    let store = Arc::new(ScriptedStore::new(vec![conversation("1", 0)]));
    let engine = mount(&store, &feed).await;
    let gate = store.hold_write();

    let conv_id = id("1");
    let (outcome, ()) = tokio::join!(
        engine.transition(&conv_id, Waiting, Some(agent("A"))),
        async {
            until(&engine, |v| status_of(v, "1") == Some(Waiting)).await;
            feed.publish(&RawChange::update("1", json!({"status": "completed"})));
            until(&engine, |v| status_of(v, "1") == Some(Completed)).await;
            gate.send(Err("conflict".to_string())).unwrap();
        }
    );
    assert!(matches!(outcome, Err(SyncError::WriteFailure { .. })));

    let view = engine.view();
    let record = view.get(&id("1")).unwrap();
    assert_eq!(record.status, Completed);
    assert_eq!(record.assigned_to, None);
}

#[tokio::test]
async fn delete_during_flight_discards_outcome() {
    let feed = LocalFeed::new();
    let store = Arc::new(ScriptedStore::new(vec![conversation("1", 0)]));
    let engine = mount(&store, &feed).await;
    let gate = store.hold_write();

    let conv_id = id("1");
    let (outcome, ()) = tokio::join!(
        engine.transition(&conv_id, Completed, None),
        async {
            until(&engine, |v| status_of(v, "1") == Some(Completed)).await;
            feed.publish(&RawChange::delete("1"));
            until(&engine, |v| v.get(&id("1")).is_none()).await;
            gate.send(Err("row not found".to_string())).unwrap();
        }
    );
    assert!(matches!(outcome, Err(SyncError::WriteFailure { .. })));
    assert!(engine.view().get(&id("1")).is_none());
}

#[tokio::test(start_paused = true)]
async fn hung_write_times_out_and_reverts() {
    let feed = LocalFeed::new();
    let store = Arc::new(ScriptedStore::new(vec![conversation("1", 0)]));
    let config = SyncConfig {
        write_timeout_seconds: 2,
        ..SyncConfig::default()
    };
    let engine = SyncEngine::mount(Arc::clone(&store), &feed, config);
    until(&engine, |v| !v.loading).await;
    store.script(WriteScript::Hang);

    let err = engine
        .transition(&id("1"), Completed, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::WriteFailure { ref reason, .. } if reason.contains("timed out")));
    assert_eq!(status_of(&engine.view(), "1"), Some(Ongoing));
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test]
async fn unmount_releases_feed_subscription() {
    let feed = LocalFeed::new();
    let store = Arc::new(ScriptedStore::new(vec![conversation("1", 0)]));
    let engine = mount(&store, &feed).await;
    assert_eq!(feed.subscriber_count(), 1);

    engine.unmount().await;
    assert_eq!(feed.subscriber_count(), 0);
    assert_eq!(feed.publish(&RawChange::delete("1")), 0);
}

#[tokio::test]
async fn dropping_handle_tears_down() {
    let feed = LocalFeed::new();
    let store = Arc::new(ScriptedStore::new(Vec::new()));
    let engine = mount(&store, &feed).await;
    let mut view = engine.subscribe();

    drop(engine);
    // The watch sender goes away with the engine task.
    tokio::time::timeout(Duration::from_secs(5), async {
        while view.changed().await.is_ok() {}
    })
    .await
    .unwrap();
    assert_eq!(feed.subscriber_count(), 0);
}

#[tokio::test]
async fn each_mount_holds_one_subscription() {
    let feed = LocalFeed::new();
    let store = Arc::new(ScriptedStore::new(Vec::new()));
    let first = mount(&store, &feed).await;
    let second = mount(&store, &feed).await;
    assert_eq!(feed.subscriber_count(), 2);

    first.unmount().await;
    assert_eq!(feed.subscriber_count(), 1);
    second.unmount().await;

    let extra = feed.subscribe();
    assert_eq!(feed.subscriber_count(), 1);
    drop(extra);
}
