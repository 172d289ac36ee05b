//! Change-feed driven step dispatcher.
//!
//! [`Dispatcher::start`] opens the change feed and spawns a dispatch
//! task. The feed reader only forwards lines into a channel, so a long
//! handler never stalls reading; the dispatch task still handles lines
//! strictly one at a time in feed order.
//!
//! Per line ([`Dispatcher::handle_change`]):
//!
//! 1. heartbeats and unparseable lines are dropped,
//! 2. the referenced document is fetched; anything but an `open` step
//!    that this watcher can perform is ignored,
//! 3. the step is claimed by writing `status = working` with its current
//!    `_rev` (a 409 means another watcher won),
//! 4. the handler runs in its own task with the step id as the active
//!    request; errors and panics are caught and logged,
//! 5. on success the step is marked `closed`.
//!
//! A step whose handler fails stays `working`.
//!
//! Once [`Dispatcher::stop`] has cancelled the dispatch task, a line that
//! has not reached its handler yet is dropped: the wait for the document
//! is abandoned, and a claim that lands after cancellation is handed back
//! by reopening the step.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chronicle_core::types::is_step_type;
use chronicle_core::{
    can_perform_step, AppIdentity, ChangeEvent, OperationKind, StepDocument, StepStatus,
};
use chronicle_couch::{ChangeFeed, DocumentStore, StoreError};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;
use crate::handler::{CapabilityTable, StepContext};
use crate::status::{ActiveRequest, StatusReporter};

/// How long [`Dispatcher::stop`] waits for an in-flight handler.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle of a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Watching,
    Dispatching,
}

/// Why a change did not lead to a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The line is not a change record (e.g. the `last_seq` trailer).
    NotAChange,
    /// The change is a deletion.
    Deleted,
    /// The document is not a step.
    NotAStep,
    /// The step is not `open`.
    NotOpen(StepStatus),
    /// The desired provenance does not match this watcher.
    CannotPerform,
}

/// What [`Dispatcher::handle_change`] did with one feed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Empty keep-alive line.
    Heartbeat,
    Ignored(IgnoreReason),
    /// The change looked relevant but could not be processed.
    Skipped(String),
    /// The dispatcher stopped before the step's handler started.
    Cancelled,
    /// A handler ran for the step.
    Dispatched {
        id: String,
        operation: OperationKind,
        succeeded: bool,
    },
}

/// State shared between the dispatcher handle and its dispatch task.
struct Shared {
    store: Arc<dyn DocumentStore>,
    capabilities: CapabilityTable,
    operations: HashSet<OperationKind>,
    identity: AppIdentity,
    active: ActiveRequest,
    state: RwLock<DispatcherState>,
}

/// Handles owned while the dispatcher is watching.
struct Running {
    feed: ChangeFeed,
    worker: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Watches one database for steps and runs their handlers.
pub struct Dispatcher {
    shared: Arc<Shared>,
    running: Option<Running>,
    shutdown_grace: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        capabilities: CapabilityTable,
        identity: AppIdentity,
    ) -> Self {
        Self::with_active_request(store, capabilities, identity, ActiveRequest::new())
    }

    /// Like [`new`](Self::new), publishing the running step's id through
    /// an existing `active` handle.
    pub fn with_active_request(
        store: Arc<dyn DocumentStore>,
        capabilities: CapabilityTable,
        identity: AppIdentity,
        active: ActiveRequest,
    ) -> Self {
        let operations = capabilities.operations();
        Self {
            shared: Arc::new(Shared {
                store,
                capabilities,
                operations,
                identity,
                active,
                state: RwLock::new(DispatcherState::Idle),
            }),
            running: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub async fn state(&self) -> DispatcherState {
        *self.shared.state.read().await
    }

    /// Id of the step whose handler is running, if any.
    pub async fn active_request(&self) -> Option<String> {
        self.shared.active.get().await
    }

    /// A reporter tagging documents with this dispatcher's active request.
    pub fn reporter(&self) -> StatusReporter {
        StatusReporter::new(Arc::clone(&self.shared.store), self.shared.active.clone())
    }

    /// Open the change feed and begin dispatching.
    ///
    /// Restarts cleanly if already watching. If the feed cannot be opened
    /// the error is logged and returned and the dispatcher stays idle.
    pub async fn start(&mut self) -> Result<(), DispatchError> {
        self.stop().await;

        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let feed = match ChangeFeed::start(self.shared.store.as_ref(), move |line| {
            // The receiver only goes away once dispatching has stopped.
            let _ = tx.send(line);
        })
        .await
        {
            Ok(feed) => feed,
            Err(e) => {
                tracing::error!(error = %e, "Could not open change feed; watcher stays idle");
                return Err(DispatchError::Feed(e));
            }
        };

        *self.shared.state.write().await = DispatcherState::Watching;

        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_dispatch_loop(
            Arc::clone(&self.shared),
            rx,
            cancel.clone(),
        ));

        tracing::info!(
            application = %self.shared.identity.application,
            version = %self.shared.identity.version,
            operations = ?self.shared.capabilities,
            "Step watcher started",
        );

        self.running = Some(Running {
            feed,
            worker,
            cancel,
        });
        Ok(())
    }

    /// Stop following the feed.
    ///
    /// No handler starts after this returns. A handler that is already
    /// running is not interrupted; it gets the shutdown grace period to
    /// finish before it is left to run detached. A dispatch task that is
    /// still short of its handler when the grace period ends is aborted.
    pub async fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };

        running.feed.stop().await;
        running.cancel.cancel();

        match tokio::time::timeout(self.shutdown_grace, &mut running.worker).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Dispatch task panicked"),
            Err(_) => {
                if *self.shared.state.read().await == DispatcherState::Dispatching {
                    tracing::warn!(
                        grace_secs = self.shutdown_grace.as_secs(),
                        "Step handler still running after grace period, detaching",
                    );
                } else {
                    tracing::warn!(
                        grace_secs = self.shutdown_grace.as_secs(),
                        "Dispatch task did not stop within grace period, aborting",
                    );
                    running.worker.abort();
                }
            }
        }

        *self.shared.state.write().await = DispatcherState::Idle;
        tracing::info!("Step watcher stopped");
    }

    /// Process one feed line. See the module docs for the steps.
    pub async fn handle_change(&self, line: &str) -> DispatchOutcome {
        self.shared
            .handle_change(line, &CancellationToken::new())
            .await
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}

/// Dispatch task: one line at a time until cancelled or the feed ends.
async fn run_dispatch_loop(
    shared: Arc<Shared>,
    mut lines: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = lines.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };
        shared.handle_change(&line, &cancel).await;
    }

    if !cancel.is_cancelled() {
        tracing::warn!("Change feed ended, watcher is idle");
        *shared.state.write().await = DispatcherState::Idle;
    }
}

impl Shared {
    async fn handle_change(&self, line: &str, cancel: &CancellationToken) -> DispatchOutcome {
        if line.trim().is_empty() {
            return DispatchOutcome::Heartbeat;
        }

        let change = match ChangeEvent::parse(line) {
            Ok(change) => change,
            Err(e) => {
                tracing::debug!(error = %e, line, "Ignoring non-change feed line");
                return DispatchOutcome::Ignored(IgnoreReason::NotAChange);
            }
        };
        if change.deleted {
            return DispatchOutcome::Ignored(IgnoreReason::Deleted);
        }

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return DispatchOutcome::Cancelled,
            fetched = self.store.get_document(&change.id) => fetched,
        };
        let doc = match fetched {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(id = %change.id, error = %e, "Could not fetch changed document");
                return DispatchOutcome::Skipped(e.to_string());
            }
        };

        if !doc.get("type").and_then(Value::as_str).is_some_and(is_step_type) {
            tracing::trace!(id = %change.id, "Not a step document");
            return DispatchOutcome::Ignored(IgnoreReason::NotAStep);
        }

        let step = match StepDocument::from_value(doc) {
            Ok(step) => step,
            Err(e) => {
                tracing::warn!(id = %change.id, error = %e, "Skipping malformed step");
                return DispatchOutcome::Skipped(e.to_string());
            }
        };

        if step.status != StepStatus::Open {
            return DispatchOutcome::Ignored(IgnoreReason::NotOpen(step.status));
        }

        if !can_perform_step(&step.desired_provenance, &self.identity, &self.operations) {
            tracing::debug!(
                id = %step.id,
                application = %step.desired_provenance.application,
                version = %step.desired_provenance.version,
                operation = %step.desired_provenance.operation,
                "Step does not match this watcher",
            );
            return DispatchOutcome::Ignored(IgnoreReason::CannotPerform);
        }

        // can_perform_step only matches operations present in the table.
        let Ok(operation) = step.operation() else {
            return DispatchOutcome::Ignored(IgnoreReason::CannotPerform);
        };
        let Some(handler) = self.capabilities.get(operation) else {
            return DispatchOutcome::Ignored(IgnoreReason::CannotPerform);
        };

        if cancel.is_cancelled() {
            return DispatchOutcome::Cancelled;
        }

        let mut step = step;
        step.status = StepStatus::Working;
        let body = match step.to_value() {
            Ok(body) => body,
            Err(e) => return DispatchOutcome::Skipped(e.to_string()),
        };
        match self.store.put_document(&step.id, &body).await {
            Ok(written) => step.rev = Some(written.rev),
            Err(StoreError::Conflict(_)) => {
                tracing::info!(id = %change.id, "Step already claimed elsewhere");
                return DispatchOutcome::Skipped("claimed by another watcher".into());
            }
            Err(e) => {
                tracing::warn!(id = %change.id, error = %e, "Could not claim step");
                return DispatchOutcome::Skipped(e.to_string());
            }
        }

        // Checked under the state lock so stop() sees either Dispatching
        // or a task that will not start the handler.
        let previous = {
            let mut state = self.state.write().await;
            if cancel.is_cancelled() {
                None
            } else {
                Some(std::mem::replace(&mut *state, DispatcherState::Dispatching))
            }
        };
        let Some(previous) = previous else {
            self.release(step).await;
            return DispatchOutcome::Cancelled;
        };

        let id = step.id.clone();
        tracing::info!(request_id = %id, operation = %operation, "Dispatching step");
        self.active.set(id.clone()).await;

        let ctx = StepContext::new(id.clone(), Arc::clone(&self.store));
        let task = tokio::spawn(async move { handler.execute(step, ctx).await });
        let succeeded = match task.await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!(request_id = %id, operation = %operation, error = %e, "Step handler failed");
                false
            }
            Err(e) => {
                tracing::error!(request_id = %id, operation = %operation, error = %e, "Step handler panicked");
                false
            }
        };

        self.active.clear_if(&id).await;
        {
            let mut state = self.state.write().await;
            if *state == DispatcherState::Dispatching {
                *state = previous;
            }
        }

        if succeeded {
            self.close(&id).await;
            tracing::info!(request_id = %id, operation = %operation, "Step completed");
        }

        DispatchOutcome::Dispatched {
            id,
            operation,
            succeeded,
        }
    }

    /// Reopen a step claimed after cancellation so another watcher can take it.
    async fn release(&self, mut step: StepDocument) {
        step.status = StepStatus::Open;
        let result = match step.to_value() {
            Ok(body) => self.store.put_document(&step.id, &body).await.map(|_| ()),
            Err(e) => {
                tracing::warn!(request_id = %step.id, error = %e, "Could not encode step to reopen it");
                return;
            }
        };
        match result {
            Ok(()) => tracing::info!(request_id = %step.id, "Reopened step claimed during shutdown"),
            Err(e) => tracing::warn!(request_id = %step.id, error = %e, "Could not reopen step"),
        }
    }

    /// Mark the step `closed`, keeping whatever the handler wrote to it.
    async fn close(&self, id: &str) {
        let mut doc = match self.store.get_document(id).await {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(request_id = %id, error = %e, "Could not re-read step to close it");
                return;
            }
        };
        if let Some(fields) = doc.as_object_mut() {
            fields.insert("status".into(), Value::String("closed".into()));
        }
        if let Err(e) = self.store.put_document(id, &doc).await {
            tracing::warn!(request_id = %id, error = %e, "Could not close step");
        }
    }
}
