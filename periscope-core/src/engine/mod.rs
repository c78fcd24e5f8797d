//! Synchronization engine
//!
//! One [`SyncEngine`] instance owns the full client-side state for the
//! backend it is pointed at: the authoritative log, the optimistic ledger,
//! and the session/notification roster. It is an explicit object, built
//! with a gateway dependency and torn down with [`stop`](SyncEngine::stop),
//! so multiple independent instances can coexist and tests can drive one
//! without a network.
//!
//! ## Data flow
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────────────────┐
//! │  Poll loop  │ ──► │   Gateway    │ ──► │  apply: LogStore merge  │
//! │ (this task) │     │  POST /poll  │     │  + Ledger retirement    │
//! └─────────────┘     └──────────────┘     │  + Tracker absorb       │
//!                                          └─────────────────────────┘
//! ```
//!
//! User input flows the other way: `send_message` records the message in
//! the ledger first (it is visible immediately), then delivers it, then
//! triggers a poll so the next reconciliation can retire it.
//!
//! ## Ordering discipline
//!
//! Reconciliation runs to completion under one lock once a response
//! arrives: no two reconciliations interleave, and a reader never sees a
//! torn merged view. At most one poll cycle is in flight at a time; an
//! overlapping cycle is skipped, never queued.

mod driver;
mod ledger;
mod log_store;
mod tracker;

pub use driver::BackoffPolicy;
pub use ledger::{OptimisticLedger, PendingMessage};
pub use log_store::{ApplyOutcome, LogStore};
pub use tracker::Tracker;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::Result;
use crate::gateway::{Gateway, OutgoingMessage, PollRequest};
use crate::types::{Activity, Connectivity, ContextSummary, LogEntry, Notification, TaskSummary};

use driver::CycleState;

/// What one invocation of `poll_now` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A response was fetched and reconciled
    Applied(ApplyOutcome),
    /// Another cycle was in flight (or the engine is stopped); nothing sent
    Skipped,
    /// The cycle failed; backoff state was updated
    Failed,
}

/// State owned exclusively by the engine, mutated only under its lock.
struct EngineState {
    context: Option<String>,
    log: LogStore,
    ledger: OptimisticLedger,
    tracker: Tracker,
    activity: Activity,
}

/// Read-only view handed to rendering code.
///
/// Entries are the merged view: authoritative order first, unretired
/// provisional entries appended after.
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub context: Option<String>,
    pub entries: Vec<LogEntry>,
    pub contexts: Vec<ContextSummary>,
    pub tasks: Vec<TaskSummary>,
    pub notifications: Vec<Notification>,
    pub unread_notifications: usize,
    pub activity: Activity,
    pub pending_count: usize,
    pub log_version: Option<u64>,
}

/// The synchronization engine: poll loop, reconciliation, optimistic
/// ledger, and roster tracking behind one object.
pub struct SyncEngine {
    gateway: Arc<dyn Gateway>,
    policy: BackoffPolicy,
    timezone: String,
    state: Mutex<EngineState>,
    cycle: CycleState,
    wake: Notify,
    connectivity_tx: watch::Sender<Connectivity>,
    connectivity_rx: watch::Receiver<Connectivity>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Create an engine bound to the given gateway. Nothing runs until
    /// [`start`](Self::start) is called.
    pub fn new(gateway: Arc<dyn Gateway>, config: &Config) -> Self {
        let policy = BackoffPolicy::from_config(&config.poll);
        let (connectivity_tx, connectivity_rx) = watch::channel(Connectivity::Degraded {
            consecutive_failures: 0,
        });
        Self {
            gateway,
            cycle: CycleState::new(&policy),
            policy,
            timezone: config.server.timezone.clone(),
            state: Mutex::new(EngineState {
                context: None,
                log: LogStore::new(),
                ledger: OptimisticLedger::new(),
                tracker: Tracker::new(),
                activity: Activity::default(),
            }),
            wake: Notify::new(),
            connectivity_tx,
            connectivity_rx,
            loop_task: Mutex::new(None),
        }
    }

    /// Begin the continuous poll loop. Idempotent: calling while the loop
    /// is already running is a no-op. Must run inside a tokio runtime.
    ///
    /// The loop task holds a reference to the engine, so the host must
    /// call [`stop`](Self::stop) to let the engine shut down.
    pub fn start(self: Arc<Self>) {
        let mut guard = lock_recovering(&self.loop_task);
        if let Some(handle) = guard.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }
        self.cycle.resume();
        let engine = Arc::clone(&self);
        *guard = Some(tokio::spawn(async move { engine.run_loop().await }));
    }

    /// Stop the loop. An in-flight cycle finishes, but no further cycle is
    /// scheduled. Safe to call repeatedly and from teardown paths.
    pub fn stop(&self) {
        self.cycle.stop();
        self.wake.notify_waiters();
    }

    async fn run_loop(self: Arc<Self>) {
        tracing::debug!("Poll loop started");
        loop {
            if self.cycle.is_stopped() {
                break;
            }
            self.poll_now().await;
            if self.cycle.is_stopped() {
                break;
            }
            let delay = self.cycle.current_interval();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.wake.notified() => {}
            }
        }
        tracing::debug!("Poll loop stopped");
    }

    /// Run one poll cycle immediately.
    ///
    /// Skips (never queues) when another cycle is already in flight or the
    /// engine is stopped. Failures never escape: they are folded into
    /// backoff state and the connectivity flag.
    pub async fn poll_now(&self) -> CycleOutcome {
        if self.cycle.is_stopped() {
            return CycleOutcome::Skipped;
        }
        if !self.cycle.begin_cycle() {
            return CycleOutcome::Skipped;
        }

        let outcome = self.poll_cycle().await;
        self.cycle.end_cycle();

        match outcome {
            Ok(applied) => {
                self.cycle.note_success(&self.policy);
                self.set_connectivity(Connectivity::Online);
                CycleOutcome::Applied(applied)
            }
            Err(e) => {
                let failures = self.cycle.note_failure(&self.policy);
                let connectivity = if e.is_auth() {
                    Connectivity::AuthRequired
                } else {
                    Connectivity::Degraded {
                        consecutive_failures: failures,
                    }
                };
                self.set_connectivity(connectivity);

                // One warning on the first failure, then every 10th cycle;
                // per-cycle noise would swamp the log during an outage.
                if failures == 1 || failures % 10 == 0 {
                    tracing::warn!(
                        consecutive_failures = failures,
                        retry_in_ms = self.cycle.current_interval().as_millis() as u64,
                        error = %e,
                        "Backend poll failed"
                    );
                }
                CycleOutcome::Failed
            }
        }
    }

    /// Fetch one response and reconcile it. The request is built and the
    /// response applied under the state lock; the network await happens
    /// between the two, with the lock released.
    async fn poll_cycle(&self) -> Result<ApplyOutcome> {
        let request = {
            let state = self.lock_state();
            PollRequest {
                log_from: state.log.version().unwrap_or(0),
                notifications_from: state.tracker.version().unwrap_or(0),
                context: state.context.clone(),
                timezone: self.timezone.clone(),
            }
        };

        let response = self.gateway.poll(&request).await?;
        let now = Utc::now();

        let mut state = self.lock_state();
        if response.deselect_chat {
            state.context = None;
        }

        let EngineState {
            log,
            ledger,
            tracker,
            activity,
            context,
        } = &mut *state;

        let outcome = log.apply(&response, now);
        ledger.retire_confirmed(log);
        tracker.absorb(&response);
        *activity = Activity {
            progress: response.log_progress,
            progress_active: response.log_progress_active,
            paused: response.paused,
        };

        // Server-driven context adoption (takes effect after a deselect
        // when the backend names a replacement in the same response).
        if let Some(named) = &response.context {
            if !named.is_empty() && context.as_deref() != Some(named.as_str()) {
                *context = Some(named.clone());
            }
        }

        Ok(outcome)
    }

    /// Submit a user message. The provisional entry is recorded before
    /// any network activity, so it is visible immediately; a send failure
    /// propagates to the caller but does not retract the entry, since the
    /// backend may have received the message despite the failed response.
    pub async fn send_message(&self, text: &str, attachments: Vec<PathBuf>) -> Result<()> {
        let text = text.trim();
        if text.is_empty() && attachments.is_empty() {
            return Ok(());
        }

        let pending = PendingMessage::new(text);
        let outgoing = {
            let mut state = self.lock_state();
            state.ledger.record(pending.clone());
            OutgoingMessage {
                message_id: pending.message_id,
                text: text.to_string(),
                context: state.context.clone(),
                attachments,
            }
        };

        let ack = self.gateway.send_message(&outgoing).await?;

        if let Some(new_context) = ack.context {
            if !new_context.is_empty() {
                let mut state = self.lock_state();
                if state.context.as_deref() != Some(new_context.as_str()) {
                    state.context = Some(new_context);
                }
            }
        }

        self.poll_now().await;
        Ok(())
    }

    /// Switch to a different context (or none). This is the one place the
    /// client resets its own cursors: the log, its guid/version, and the
    /// pending ledger all belong to the session they came from.
    pub async fn select_context(&self, context: Option<String>) {
        {
            let mut state = self.lock_state();
            if state.context == context {
                return;
            }
            state.context = context;
            state.log.reset();
            state.ledger.clear();
            state.activity = Activity::default();
        }
        self.poll_now().await;
    }

    /// Create a fresh context on the backend and switch to it.
    pub async fn new_session(&self) -> Result<String> {
        let current = self.lock_state().context.clone();
        let ack = self.gateway.new_session(current.as_deref()).await?;
        self.select_context(Some(ack.id.clone())).await;
        Ok(ack.id)
    }

    /// Clear the current context's history on the backend. The next poll
    /// observes the new log identity and rebuilds.
    pub async fn reset_session(&self) -> Result<()> {
        let Some(context) = self.lock_state().context.clone() else {
            return Ok(());
        };
        self.gateway.reset_session(&context).await?;
        self.poll_now().await;
        Ok(())
    }

    /// Remove a context. If it was the selected one, deselect first.
    pub async fn remove_session(&self, id: &str) -> Result<()> {
        self.gateway.remove_session(id).await?;
        let selected = self.lock_state().context.as_deref() == Some(id);
        if selected {
            self.select_context(None).await;
        } else {
            self.poll_now().await;
        }
        Ok(())
    }

    /// Pause or resume the current context.
    pub async fn set_paused(&self, paused: bool) -> Result<bool> {
        let Some(context) = self.lock_state().context.clone() else {
            return Ok(false);
        };
        let settled = self.gateway.set_paused(&context, paused).await?;
        self.lock_state().activity.paused = settled;
        Ok(settled)
    }

    /// Ask the backend to re-prompt the current context.
    pub async fn nudge(&self) -> Result<()> {
        let Some(context) = self.lock_state().context.clone() else {
            return Ok(());
        };
        self.gateway.nudge(&context).await
    }

    /// Cheap backend reachability probe.
    pub async fn health(&self) -> Result<bool> {
        self.gateway.health().await
    }

    /// Mark all notifications as read.
    pub fn mark_notifications_read(&self) {
        self.lock_state().tracker.mark_read();
    }

    /// Cloned, consistent view of all engine state for rendering.
    pub fn snapshot(&self) -> EngineSnapshot {
        let state = self.lock_state();
        EngineSnapshot {
            context: state.context.clone(),
            entries: state.ledger.merged_view(&state.log),
            contexts: state.tracker.contexts().to_vec(),
            tasks: state.tracker.tasks().to_vec(),
            notifications: state.tracker.notifications().to_vec(),
            unread_notifications: state.tracker.unread_count(),
            activity: state.activity,
            pending_count: state.ledger.len(),
            log_version: state.log.version(),
        }
    }

    /// Watch receiver for connectivity changes. Heartbeats do not produce
    /// notifications; the value only changes on actual transitions.
    pub fn connectivity(&self) -> watch::Receiver<Connectivity> {
        self.connectivity_rx.clone()
    }

    /// Current connectivity without subscribing.
    pub fn connectivity_now(&self) -> Connectivity {
        *self.connectivity_rx.borrow()
    }

    /// Length of the current failure streak.
    pub fn consecutive_failures(&self) -> u32 {
        self.cycle.consecutive_failures()
    }

    /// Delay before the next scheduled cycle.
    pub fn current_interval(&self) -> Duration {
        self.cycle.current_interval()
    }

    fn set_connectivity(&self, value: Connectivity) {
        self.connectivity_tx.send_if_modified(|current| {
            if *current != value {
                *current = value;
                true
            } else {
                false
            }
        });
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        lock_recovering(&self.state)
    }
}

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
