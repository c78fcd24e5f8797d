//! Integration tests for the synchronization engine
//!
//! These tests drive a `SyncEngine` end-to-end against in-process mock
//! gateways: scripted responses for reconciliation behavior, failing
//! responses for backoff behavior, and a parkable gateway for the
//! single-flight guarantee. No sockets are opened.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use periscope_core::gateway::wire::{LogItem, OutgoingMessage, PollRequest, PollResponse};
use periscope_core::gateway::{Gateway, SendResponse, SessionAck};
use periscope_core::{
    ApplyOutcome, Config, Connectivity, CycleOutcome, Error, Result, SyncEngine,
};

// ============================================
// Mock gateways
// ============================================

/// Replays a scripted sequence of poll replies, then heartbeats.
struct ScriptedGateway {
    replies: Mutex<Vec<Result<PollResponse>>>,
    requests: Mutex<Vec<PollRequest>>,
    sent: Mutex<Vec<OutgoingMessage>>,
    poll_calls: AtomicUsize,
    send_context: Option<String>,
}

impl ScriptedGateway {
    fn new() -> Self {
        Self {
            replies: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            poll_calls: AtomicUsize::new(0),
            send_context: None,
        }
    }

    fn with_send_context(context: &str) -> Self {
        Self {
            send_context: Some(context.to_string()),
            ..Self::new()
        }
    }

    fn push(&self, reply: Result<PollResponse>) {
        self.replies.lock().unwrap().push(reply);
    }

    fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    fn last_request(&self) -> PollRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }

    fn sent_message_ids(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.message_id.clone())
            .collect()
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn poll(&self, request: &PollRequest) -> Result<PollResponse> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            Ok(PollResponse::default())
        } else {
            replies.remove(0)
        }
    }

    async fn send_message(&self, outgoing: &OutgoingMessage) -> Result<SendResponse> {
        self.sent.lock().unwrap().push(outgoing.clone());
        Ok(SendResponse {
            message: "queued".to_string(),
            context: self.send_context.clone(),
        })
    }

    async fn new_session(&self, _current: Option<&str>) -> Result<SessionAck> {
        Ok(SessionAck {
            id: "fresh-ctx".to_string(),
            message: String::new(),
        })
    }

    async fn reset_session(&self, _context: &str) -> Result<()> {
        Ok(())
    }

    async fn remove_session(&self, _context: &str) -> Result<()> {
        Ok(())
    }

    async fn set_paused(&self, _context: &str, paused: bool) -> Result<bool> {
        Ok(paused)
    }

    async fn nudge(&self, _context: &str) -> Result<()> {
        Ok(())
    }

    async fn health(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Parks the first poll until released; used for the single-flight test.
struct ParkedGateway {
    entered: Notify,
    release: Notify,
    poll_calls: AtomicUsize,
}

impl ParkedGateway {
    fn new() -> Self {
        Self {
            entered: Notify::new(),
            release: Notify::new(),
            poll_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Gateway for ParkedGateway {
    async fn poll(&self, _request: &PollRequest) -> Result<PollResponse> {
        let call = self.poll_calls.fetch_add(1, Ordering::SeqCst);
        if call == 0 {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok(PollResponse::default())
    }

    async fn send_message(&self, _outgoing: &OutgoingMessage) -> Result<SendResponse> {
        Ok(SendResponse {
            message: String::new(),
            context: None,
        })
    }

    async fn new_session(&self, _current: Option<&str>) -> Result<SessionAck> {
        Ok(SessionAck {
            id: String::new(),
            message: String::new(),
        })
    }

    async fn reset_session(&self, _context: &str) -> Result<()> {
        Ok(())
    }

    async fn remove_session(&self, _context: &str) -> Result<()> {
        Ok(())
    }

    async fn set_paused(&self, _context: &str, paused: bool) -> Result<bool> {
        Ok(paused)
    }

    async fn nudge(&self, _context: &str) -> Result<()> {
        Ok(())
    }

    async fn health(&self) -> Result<bool> {
        Ok(true)
    }
}

// ============================================
// Helpers
// ============================================

fn engine_with(gateway: Arc<ScriptedGateway>) -> Arc<SyncEngine> {
    Arc::new(SyncEngine::new(gateway, &Config::default()))
}

fn log_item(no: Option<u64>, id: Option<&str>, kind: &str, content: &str) -> LogItem {
    LogItem {
        no,
        id: id.map(str::to_string),
        kind: kind.to_string(),
        heading: None,
        content: Some(content.to_string()),
        kvps: None,
    }
}

fn log_response(guid: &str, version: u64, logs: Vec<LogItem>) -> PollResponse {
    PollResponse {
        log_guid: guid.to_string(),
        log_version: Some(version),
        logs,
        ..Default::default()
    }
}

fn contents(engine: &SyncEngine) -> Vec<String> {
    engine
        .snapshot()
        .entries
        .iter()
        .filter_map(|e| e.content.clone())
        .collect()
}

// ============================================
// Reconciliation properties
// ============================================

#[tokio::test]
async fn test_idempotent_merge() {
    let gateway = Arc::new(ScriptedGateway::new());
    let engine = engine_with(Arc::clone(&gateway));

    let reply = log_response(
        "guid-a",
        3,
        vec![
            log_item(Some(0), None, "user", "hi"),
            log_item(Some(1), None, "response", "hello"),
        ],
    );
    gateway.push(Ok(reply.clone()));
    gateway.push(Ok(reply));

    engine.poll_now().await;
    let first = engine.snapshot().entries;

    engine.poll_now().await;
    let second = engine.snapshot().entries;

    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
}

#[tokio::test]
async fn test_no_lost_entries_under_reordering() {
    let gateway = Arc::new(ScriptedGateway::new());
    let engine = engine_with(Arc::clone(&gateway));

    gateway.push(Ok(log_response(
        "guid-a",
        1,
        vec![
            log_item(Some(0), None, "user", "e0"),
            log_item(Some(1), None, "agent", "e1"),
            log_item(Some(4), None, "response", "e4"),
        ],
    )));
    gateway.push(Ok(log_response(
        "guid-a",
        2,
        vec![
            log_item(Some(2), None, "tool", "e2"),
            log_item(Some(3), None, "tool", "e3"),
        ],
    )));

    engine.poll_now().await;
    engine.poll_now().await;

    assert_eq!(contents(&engine), vec!["e0", "e1", "e2", "e3", "e4"]);
}

#[tokio::test]
async fn test_session_replacement_clears_stale_state() {
    let gateway = Arc::new(ScriptedGateway::new());
    let engine = engine_with(Arc::clone(&gateway));

    let old: Vec<LogItem> = (0..10)
        .map(|i| log_item(Some(i), None, "agent", "old"))
        .collect();
    gateway.push(Ok(log_response("guid-a", 30, old)));
    gateway.push(Ok(log_response(
        "guid-b",
        2,
        vec![
            log_item(Some(0), None, "user", "fresh-0"),
            log_item(Some(1), None, "response", "fresh-1"),
        ],
    )));

    engine.poll_now().await;
    assert_eq!(engine.snapshot().entries.len(), 10);

    let outcome = engine.poll_now().await;
    assert_eq!(
        outcome,
        CycleOutcome::Applied(ApplyOutcome::Replaced { entries: 2 })
    );
    assert_eq!(contents(&engine), vec!["fresh-0", "fresh-1"]);
}

#[tokio::test]
async fn test_stale_version_rejected() {
    let gateway = Arc::new(ScriptedGateway::new());
    let engine = engine_with(Arc::clone(&gateway));

    gateway.push(Ok(log_response(
        "guid-a",
        5,
        vec![log_item(Some(0), None, "user", "kept")],
    )));
    gateway.push(Ok(log_response(
        "guid-a",
        4,
        vec![log_item(Some(0), None, "user", "stale")],
    )));

    engine.poll_now().await;
    let outcome = engine.poll_now().await;

    assert_eq!(outcome, CycleOutcome::Applied(ApplyOutcome::StaleLog));
    assert_eq!(contents(&engine), vec!["kept"]);
    assert_eq!(engine.snapshot().log_version, Some(5));
}

#[tokio::test]
async fn test_poll_request_carries_cursors() {
    let gateway = Arc::new(ScriptedGateway::new());
    let engine = engine_with(Arc::clone(&gateway));

    let mut reply = log_response("guid-a", 7, vec![log_item(Some(0), None, "user", "x")]);
    reply.notifications_version = Some(3);
    gateway.push(Ok(reply));

    engine.poll_now().await;
    engine.poll_now().await;

    let request = gateway.last_request();
    assert_eq!(request.log_from, 7);
    assert_eq!(request.notifications_from, 3);
    assert_eq!(request.timezone, "UTC");
}

#[tokio::test]
async fn test_context_adoption_and_deselect() {
    let gateway = Arc::new(ScriptedGateway::new());
    let engine = engine_with(Arc::clone(&gateway));

    let mut named = PollResponse::default();
    named.context = Some("ctx-9".to_string());
    gateway.push(Ok(named));

    engine.poll_now().await;
    assert_eq!(engine.snapshot().context.as_deref(), Some("ctx-9"));

    let mut deselect = PollResponse::default();
    deselect.deselect_chat = true;
    gateway.push(Ok(deselect));

    engine.poll_now().await;
    assert_eq!(engine.snapshot().context, None);
}

// ============================================
// Optimistic lifecycle
// ============================================

#[tokio::test]
async fn test_optimistic_lifecycle() {
    let gateway = Arc::new(ScriptedGateway::with_send_context("ctx-1"));
    let engine = engine_with(Arc::clone(&gateway));

    // First poll (triggered by send) is a heartbeat: no echo yet.
    engine.send_message("hello", Vec::new()).await.unwrap();

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.entries.len(), 1);
    assert!(snapshot.entries[0].provisional);
    assert_eq!(snapshot.entries[0].content.as_deref(), Some("hello"));
    assert_eq!(snapshot.context.as_deref(), Some("ctx-1"));

    // Backend echoes the client id in the authoritative log.
    let message_id = gateway.sent_message_ids().remove(0);
    gateway.push(Ok(log_response(
        "guid-a",
        1,
        vec![log_item(Some(0), Some(&message_id), "user", "hello")],
    )));
    engine.poll_now().await;

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.entries.len(), 1);
    assert!(!snapshot.entries[0].provisional);
    assert_eq!(snapshot.entries[0].content.as_deref(), Some("hello"));
    assert_eq!(snapshot.pending_count, 0);
}

#[tokio::test]
async fn test_send_failure_keeps_provisional_entry() {
    struct RefusingGateway(ScriptedGateway);

    #[async_trait]
    impl Gateway for RefusingGateway {
        async fn poll(&self, request: &PollRequest) -> Result<PollResponse> {
            self.0.poll(request).await
        }
        async fn send_message(&self, _outgoing: &OutgoingMessage) -> Result<SendResponse> {
            Err(Error::Transport("connection reset".to_string()))
        }
        async fn new_session(&self, current: Option<&str>) -> Result<SessionAck> {
            self.0.new_session(current).await
        }
        async fn reset_session(&self, context: &str) -> Result<()> {
            self.0.reset_session(context).await
        }
        async fn remove_session(&self, context: &str) -> Result<()> {
            self.0.remove_session(context).await
        }
        async fn set_paused(&self, context: &str, paused: bool) -> Result<bool> {
            self.0.set_paused(context, paused).await
        }
        async fn nudge(&self, context: &str) -> Result<()> {
            self.0.nudge(context).await
        }
        async fn health(&self) -> Result<bool> {
            self.0.health().await
        }
    }

    let gateway = Arc::new(RefusingGateway(ScriptedGateway::new()));
    let engine = Arc::new(SyncEngine::new(gateway, &Config::default()));

    let result = engine.send_message("hello", Vec::new()).await;
    assert!(result.is_err());

    // The provisional entry remains until reconciled or explicitly retracted.
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.pending_count, 1);
    assert!(snapshot.entries[0].provisional);
}

// ============================================
// Backoff and connectivity
// ============================================

#[tokio::test]
async fn test_backoff_monotonic_capped_and_reset() {
    let gateway = Arc::new(ScriptedGateway::new());
    let engine = engine_with(Arc::clone(&gateway));

    for _ in 0..3 {
        gateway.push(Err(Error::Transport("connection refused".to_string())));
    }

    let mut intervals = Vec::new();
    for _ in 0..3 {
        assert_eq!(engine.poll_now().await, CycleOutcome::Failed);
        intervals.push(engine.current_interval());
    }

    assert!(intervals[0] <= intervals[1] && intervals[1] <= intervals[2]);
    for interval in &intervals {
        assert!(*interval <= Duration::from_millis(30000));
    }
    assert_eq!(
        engine.connectivity_now(),
        Connectivity::Degraded {
            consecutive_failures: 3
        }
    );

    // Success snaps the interval back to the baseline.
    engine.poll_now().await;
    assert_eq!(engine.current_interval(), Duration::from_millis(500));
    assert_eq!(engine.consecutive_failures(), 0);
    assert_eq!(engine.connectivity_now(), Connectivity::Online);
}

#[tokio::test]
async fn test_auth_failure_surfaces_distinctly() {
    let gateway = Arc::new(ScriptedGateway::new());
    let engine = engine_with(Arc::clone(&gateway));

    gateway.push(Err(Error::Auth("invalid api key".to_string())));
    engine.poll_now().await;
    assert_eq!(engine.connectivity_now(), Connectivity::AuthRequired);

    // The loop keeps going; a later success recovers.
    engine.poll_now().await;
    assert_eq!(engine.connectivity_now(), Connectivity::Online);
}

// ============================================
// Single-flight and loop lifecycle
// ============================================

#[tokio::test]
async fn test_single_flight_skips_overlapping_cycle() {
    let gateway = Arc::new(ParkedGateway::new());
    let engine = Arc::new(SyncEngine::new(
        Arc::clone(&gateway) as Arc<dyn Gateway>,
        &Config::default(),
    ));

    let first = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.poll_now().await })
    };
    gateway.entered.notified().await;

    // A second cycle while the first is parked must not hit the network.
    assert_eq!(engine.poll_now().await, CycleOutcome::Skipped);
    assert_eq!(gateway.poll_calls.load(Ordering::SeqCst), 1);

    gateway.release.notify_one();
    let outcome = first.await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Applied(_)));

    // With the first cycle resolved, polling works again.
    engine.poll_now().await;
    assert_eq!(gateway.poll_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_start_is_idempotent_and_stop_halts() {
    let gateway = Arc::new(ScriptedGateway::new());
    let engine = engine_with(Arc::clone(&gateway));

    Arc::clone(&engine).start();
    Arc::clone(&engine).start();

    // Wait for at least one cycle from the loop.
    let deadline = std::time::Instant::now() + Duration::from_secs(3);
    while gateway.poll_calls() == 0 && std::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(gateway.poll_calls() >= 1);

    engine.stop();
    engine.stop();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let settled = gateway.poll_calls();
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(gateway.poll_calls(), settled);
}

#[tokio::test]
async fn test_new_session_switches_context() {
    let gateway = Arc::new(ScriptedGateway::new());
    let engine = engine_with(Arc::clone(&gateway));

    gateway.push(Ok(log_response(
        "guid-a",
        4,
        vec![log_item(Some(0), None, "user", "old")],
    )));
    engine.poll_now().await;

    let id = engine.new_session().await.unwrap();
    assert_eq!(id, "fresh-ctx");

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.context.as_deref(), Some("fresh-ctx"));
    // The switch discarded the previous session's log and cursor.
    assert!(snapshot.entries.is_empty());
    assert_eq!(snapshot.log_version, None);
}

#[tokio::test]
async fn test_select_context_resets_cursors() {
    let gateway = Arc::new(ScriptedGateway::new());
    let engine = engine_with(Arc::clone(&gateway));

    gateway.push(Ok(log_response(
        "guid-a",
        8,
        vec![log_item(Some(0), None, "user", "old")],
    )));
    engine.poll_now().await;
    assert_eq!(engine.snapshot().log_version, Some(8));

    engine.select_context(Some("ctx-2".to_string())).await;

    // The switch polled immediately with reset cursors.
    let request = gateway.last_request();
    assert_eq!(request.log_from, 0);
    assert_eq!(request.context.as_deref(), Some("ctx-2"));
    assert_eq!(engine.snapshot().entries.len(), 0);
}
