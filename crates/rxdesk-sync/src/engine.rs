//! The synchronizer actor.
//!
//! [`SyncEngine::mount`] starts one task per dashboard view. The task owns
//! the [`Reconciler`] and is the only place it is touched. It consumes:
//!
//! - commands from the [`EngineHandle`] and outcomes of fetches and writes,
//!   all on one bounded queue
//! - notifications from its single feed subscription
//!
//! Fetches and writes run on spawned tasks and report back through the
//! queue, so processing never waits on the network. After every change the
//! task publishes an immutable [`DashboardView`] snapshot on a watch channel.

use std::collections::HashMap;
use std::sync::Arc;

use rxdesk_core::{AgentId, ConversationId, MutationId};
use rxdesk_store::{
    ChangeFeed, Conversation, ConversationPatch, ConversationStatus, FeedSubscription,
    PersistentStore, RawChange, StoreError,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::adapter::{CanonicalEvent, ChangeAdapter};
use crate::board::Board;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::reconcile::{PendingWrite, Reconciler, Settlement};
use crate::workflow;

/// Snapshot of everything the dashboard renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardView {
    /// Conversations, most recently active first.
    pub conversations: Vec<Conversation>,
    /// A bulk fetch is in progress.
    pub loading: bool,
    /// Why the last bulk fetch failed, until a reload succeeds.
    pub fetch_error: Option<String>,
    /// Change notifications dropped as malformed since mount.
    pub dropped_events: u64,
}

impl DashboardView {
    /// Group the conversations into board columns.
    #[must_use]
    pub fn board(&self) -> Board {
        Board::project(&self.conversations)
    }

    /// Get a conversation by id.
    #[must_use]
    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| &c.id == id)
    }
}

/// Result of a transition or assignment request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The change was applied and the backend accepted the write.
    Applied,
    /// Nothing to do; no write was issued.
    Unchanged,
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Transition {
        id: ConversationId,
        target: ConversationStatus,
        actor: Option<AgentId>,
        reply: Reply<TransitionOutcome>,
    },
    Assign {
        id: ConversationId,
        agent: Option<AgentId>,
        reply: Reply<TransitionOutcome>,
    },
    Acknowledge {
        id: ConversationId,
        reply: Reply<bool>,
    },
    Reload {
        reply: Reply<()>,
    },
}

enum Input {
    Command(Command),
    Fetched {
        generation: u64,
        result: std::result::Result<Vec<Conversation>, StoreError>,
    },
    Written {
        id: ConversationId,
        mutation_id: MutationId,
        outcome: std::result::Result<(), String>,
    },
}

/// Entry point for mounting a dashboard view.
pub struct SyncEngine;

impl SyncEngine {
    /// Subscribe to `feed`, start the initial fetch from `store` and spawn
    /// the engine task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn mount<P, F>(store: Arc<P>, feed: &F, config: SyncConfig) -> EngineHandle
    where
        P: PersistentStore + ?Sized + 'static,
        F: ChangeFeed + ?Sized,
    {
        let (inputs_tx, inputs_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (view_tx, view_rx) = watch::channel(Arc::new(DashboardView {
            loading: true,
            ..DashboardView::default()
        }));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let subscription = feed.subscribe();

        let engine = Engine {
            store,
            config,
            reconciler: Reconciler::new(),
            adapter: ChangeAdapter::new(),
            inputs: inputs_tx.clone(),
            view: view_tx,
            generation: 0,
            loading: false,
            fetch_error: None,
            buffered: Vec::new(),
            writes: HashMap::new(),
            reloads: Vec::new(),
        };
        let task = tokio::spawn(engine.run(inputs_rx, subscription, shutdown_rx));

        tracing::info!("Mounted dashboard view");

        EngineHandle {
            inputs: inputs_tx,
            view: view_rx,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }
}

/// Handle to a mounted dashboard view.
///
/// Dropping the handle tears the view down; [`EngineHandle::unmount`] does
/// the same and waits for the feed subscription to be released.
pub struct EngineHandle {
    inputs: mpsc::Sender<Input>,
    view: watch::Receiver<Arc<DashboardView>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl EngineHandle {
    // =========================================================================
    // Reads
    // =========================================================================

    /// The latest snapshot.
    #[must_use]
    pub fn view(&self) -> Arc<DashboardView> {
        Arc::clone(&*self.view.borrow())
    }

    /// The latest snapshot, grouped into columns.
    #[must_use]
    pub fn board(&self) -> Board {
        self.view.borrow().board()
    }

    /// A receiver of snapshots, for consumers that render on change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<DashboardView>> {
        self.view.clone()
    }

    /// Wait until a snapshot newer than the last one seen is published.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::EngineClosed` if the engine has stopped.
    pub async fn changed(&mut self) -> Result<Arc<DashboardView>> {
        self.view
            .changed()
            .await
            .map_err(|_| SyncError::EngineClosed)?;
        Ok(Arc::clone(&*self.view.borrow_and_update()))
    }

    /// Wait until a snapshot satisfies `predicate` (checking the current one
    /// first).
    ///
    /// # Errors
    ///
    /// Returns `SyncError::EngineClosed` if the engine stops first.
    pub async fn wait_until(
        &self,
        mut predicate: impl FnMut(&DashboardView) -> bool,
    ) -> Result<Arc<DashboardView>> {
        let mut view = self.view.clone();
        let snapshot = view
            .wait_for(|v| predicate(v))
            .await
            .map_err(|_| SyncError::EngineClosed)?;
        Ok(Arc::clone(&*snapshot))
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Move a conversation to `target` on behalf of `actor`.
    ///
    /// The change is visible in the view immediately; the returned future
    /// resolves once the backend has answered.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the conversation is not on the board
    /// - `InvariantViolation` if the move needs an actor and none was given
    /// - `WriteFailure` if the backend rejected the write (the change has
    ///   been reverted)
    /// - `EngineClosed` if the view was unmounted
    pub async fn transition(
        &self,
        id: &ConversationId,
        target: ConversationStatus,
        actor: Option<AgentId>,
    ) -> Result<TransitionOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Transition {
            id: id.clone(),
            target,
            actor,
            reply,
        })
        .await?;
        rx.await.map_err(|_| SyncError::EngineClosed)?
    }

    /// Set (or clear) the agent owning a conversation.
    ///
    /// # Errors
    ///
    /// Same as [`EngineHandle::transition`], minus the actor check.
    pub async fn assign(
        &self,
        id: &ConversationId,
        agent: Option<AgentId>,
    ) -> Result<TransitionOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Assign {
            id: id.clone(),
            agent,
            reply,
        })
        .await?;
        rx.await.map_err(|_| SyncError::EngineClosed)?
    }

    /// Mark a new arrival as seen. Returns true if it was flagged.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::EngineClosed` if the view was unmounted.
    pub async fn acknowledge(&self, id: &ConversationId) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Acknowledge {
            id: id.clone(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SyncError::EngineClosed)?
    }

    /// Fetch everything again and reseed the board.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::FetchFailure` if the fetch failed (the view then
    /// carries the error and an empty board).
    pub async fn reload(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Reload { reply }).await?;
        rx.await.map_err(|_| SyncError::EngineClosed)?
    }

    /// Tear the view down and wait for the engine task to finish.
    ///
    /// Once this returns the feed subscription has been released and no
    /// further notification is processed.
    pub async fn unmount(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Engine task failed");
            }
        }
        tracing::info!("Unmounted dashboard view");
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.inputs
            .send(Input::Command(command))
            .await
            .map_err(|_| SyncError::EngineClosed)
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

struct Engine<P: ?Sized> {
    store: Arc<P>,
    config: SyncConfig,
    reconciler: Reconciler,
    adapter: ChangeAdapter,
    inputs: mpsc::Sender<Input>,
    view: watch::Sender<Arc<DashboardView>>,
    generation: u64,
    loading: bool,
    fetch_error: Option<String>,
    buffered: Vec<CanonicalEvent>,
    writes: HashMap<MutationId, Reply<TransitionOutcome>>,
    reloads: Vec<Reply<()>>,
}

impl<P> Engine<P>
where
    P: PersistentStore + ?Sized + 'static,
{
    async fn run(
        mut self,
        mut inputs: mpsc::Receiver<Input>,
        mut subscription: FeedSubscription,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        self.start_fetch();
        self.publish();

        let mut feed_open = true;
        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => break,

                Some(input) = inputs.recv() => self.handle_input(input),

                change = subscription.recv(), if feed_open => match change {
                    Some(raw) => self.handle_change(&raw),
                    None => {
                        tracing::warn!("Change feed closed; live updates stopped");
                        feed_open = false;
                    }
                },
            }
        }

        subscription.unsubscribe();
        tracing::debug!(
            pending_writes = self.writes.len(),
            "Engine stopped"
        );
    }

    fn handle_input(&mut self, input: Input) {
        match input {
            Input::Command(command) => self.handle_command(command),
            Input::Fetched { generation, result } => self.handle_fetched(generation, result),
            Input::Written {
                id,
                mutation_id,
                outcome,
            } => self.handle_written(id, mutation_id, outcome),
        }
    }

    // =========================================================================
    // Remote Events
    // =========================================================================

    fn handle_change(&mut self, raw: &RawChange) {
        let Some(event) = self.adapter.normalize(raw) else {
            self.publish();
            return;
        };

        if self.loading {
            tracing::trace!(conversation_id = %event.id(), "Buffering change during fetch");
            self.buffered.push(event);
            return;
        }

        tracing::debug!(conversation_id = %event.id(), "Applying change");
        if self.reconciler.apply_remote(&event) {
            self.publish();
        }
    }

    fn start_fetch(&mut self) {
        self.generation += 1;
        self.loading = true;

        let generation = self.generation;
        let store = Arc::clone(&self.store);
        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            let result = store.fetch_all().await;
            let _ = inputs.send(Input::Fetched { generation, result }).await;
        });
    }

    fn handle_fetched(
        &mut self,
        generation: u64,
        result: std::result::Result<Vec<Conversation>, StoreError>,
    ) {
        if generation != self.generation {
            tracing::debug!(generation, "Ignoring superseded fetch");
            return;
        }

        let outcome = match result {
            Ok(records) => {
                tracing::info!(count = records.len(), "Loaded conversations");
                self.reconciler.seed(records);
                self.fetch_error = None;
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to load conversations");
                self.reconciler.seed(Vec::new());
                self.fetch_error = Some(e.to_string());
                Err(SyncError::FetchFailure(e.to_string()))
            }
        };

        self.loading = false;
        let buffered = std::mem::take(&mut self.buffered);
        if !buffered.is_empty() {
            tracing::debug!(count = buffered.len(), "Replaying buffered changes");
        }
        for event in &buffered {
            self.reconciler.apply_remote(event);
        }
        self.publish();

        for reply in self.reloads.drain(..) {
            let _ = reply.send(outcome.clone());
        }
    }

    // =========================================================================
    // Local Commands
    // =========================================================================

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Transition {
                id,
                target,
                actor,
                reply,
            } => {
                let plan = self
                    .reconciler
                    .get(&id)
                    .ok_or_else(|| SyncError::NotFound(id.clone()))
                    .and_then(|record| workflow::plan_transition(record, target, actor.as_ref()));
                self.submit(&id, plan, reply);
            }
            Command::Assign { id, agent, reply } => {
                let plan = self
                    .reconciler
                    .get(&id)
                    .ok_or_else(|| SyncError::NotFound(id.clone()))
                    .map(|record| {
                        (record.assigned_to != agent)
                            .then(|| ConversationPatch::assigned_to(agent))
                    });
                self.submit(&id, plan, reply);
            }
            Command::Acknowledge { id, reply } => {
                let changed = self.reconciler.acknowledge(&id);
                if changed {
                    self.publish();
                }
                let _ = reply.send(Ok(changed));
            }
            Command::Reload { reply } => {
                self.reloads.push(reply);
                self.start_fetch();
                self.publish();
            }
        }
    }

    /// Apply a planned patch optimistically and write it in the background.
    fn submit(
        &mut self,
        id: &ConversationId,
        plan: Result<Option<ConversationPatch>>,
        reply: Reply<TransitionOutcome>,
    ) {
        let patch = match plan {
            Ok(Some(patch)) => patch,
            Ok(None) => {
                let _ = reply.send(Ok(TransitionOutcome::Unchanged));
                return;
            }
            Err(e) => {
                tracing::debug!(conversation_id = %id, error = %e, "Rejected local mutation");
                let _ = reply.send(Err(e));
                return;
            }
        };

        let pending = match self.reconciler.begin(id, patch) {
            Ok(pending) => pending,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        self.writes.insert(pending.mutation_id, reply);
        self.publish();
        self.spawn_write(pending);
    }

    fn spawn_write(&self, pending: PendingWrite) {
        let store = Arc::clone(&self.store);
        let inputs = self.inputs.clone();
        let timeout = self.config.write_timeout();

        tokio::spawn(async move {
            let PendingWrite {
                mutation_id,
                id,
                patch,
            } = pending;
            let outcome = match tokio::time::timeout(timeout, store.write(&id, &patch)).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!("write timed out after {}s", timeout.as_secs())),
            };
            let _ = inputs
                .send(Input::Written {
                    id,
                    mutation_id,
                    outcome,
                })
                .await;
        });
    }

    fn handle_written(
        &mut self,
        id: ConversationId,
        mutation_id: MutationId,
        outcome: std::result::Result<(), String>,
    ) {
        let settlement = self.reconciler.settle(mutation_id, &outcome);
        match &settlement {
            Settlement::Confirmed => {
                tracing::debug!(conversation_id = %id, mutation_id = %mutation_id, "Write confirmed");
            }
            Settlement::Reverted { .. } => self.publish(),
            Settlement::Discarded => {
                tracing::debug!(conversation_id = %id, mutation_id = %mutation_id, "Write outcome discarded");
            }
        }

        if let Some(reply) = self.writes.remove(&mutation_id) {
            let result = match outcome {
                Ok(()) => Ok(TransitionOutcome::Applied),
                Err(reason) => {
                    tracing::warn!(conversation_id = %id, reason = %reason, "Write failed");
                    Err(SyncError::WriteFailure { id, reason })
                }
            };
            let _ = reply.send(result);
        }
    }

    fn publish(&self) {
        let view = DashboardView {
            conversations: self.reconciler.read(),
            loading: self.loading,
            fetch_error: self.fetch_error.clone(),
            dropped_events: self.adapter.dropped(),
        };
        self.view.send_if_modified(|current| {
            if **current == view {
                false
            } else {
                *current = Arc::new(view);
                true
            }
        });
    }
}
