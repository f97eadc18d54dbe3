//! Per-chat stream sessions.
//!
//! A session is a rendezvous object: the orchestrator parks on its
//! validation latch while a human decides, and anyone may trip its stop
//! latch.  The latch is a one-shot slot (reading drains it) plus an explicit
//! reset so several tool calls in one turn can each block.
//!
//! Exactly one session exists per chat at a time.  A session whose client
//! disconnected survives as long as its pending validation is non-terminal —
//! that is what lets a user close the tab and still get an answer after
//! approving from the validations page.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use maestro_store::ValidationStore;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// What the human decided, delivered through the validation latch.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Approved {
        validation_id: String,
        /// The executed tool's result (or its error envelope).
        data: Value,
    },
    Rejected {
        validation_id: String,
    },
    Feedback {
        validation_id: String,
        feedback: String,
    },
    Cancelled {
        validation_id: String,
    },
}

pub struct StreamSession {
    pub chat_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,

    stop: AtomicBool,
    stop_notify: Notify,

    validation_slot: StdMutex<Option<ValidationOutcome>>,
    validation_notify: Notify,

    /// RAG sources gathered during the current turn, keyed by resource id.
    sources: StdMutex<HashMap<String, Value>>,

    is_active: AtomicBool,
    pending_validation_id: StdMutex<Option<String>>,
    disconnected_at: StdMutex<Option<DateTime<Utc>>>,
}

impl StreamSession {
    fn new(chat_id: &str, user_id: &str) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            user_id: user_id.to_string(),
            started_at: Utc::now(),
            stop: AtomicBool::new(false),
            stop_notify: Notify::new(),
            validation_slot: StdMutex::new(None),
            validation_notify: Notify::new(),
            sources: StdMutex::new(HashMap::new()),
            is_active: AtomicBool::new(true),
            pending_validation_id: StdMutex::new(None),
            disconnected_at: StdMutex::new(None),
        }
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.stop_notify.notify_one();
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Resolves once stop has been requested.
    pub async fn stopped(&self) {
        while !self.stop_requested() {
            self.stop_notify.notified().await;
        }
    }

    /// Park until a validation outcome arrives.  Returns `None` when stop
    /// wins the race instead.
    pub async fn wait_validation(&self) -> Option<ValidationOutcome> {
        loop {
            if let Some(outcome) = self
                .validation_slot
                .lock()
                .expect("validation slot poisoned")
                .take()
            {
                return Some(outcome);
            }
            if self.stop_requested() {
                return None;
            }
            tokio::select! {
                _ = self.validation_notify.notified() => {}
                _ = self.stop_notify.notified() => {}
            }
        }
    }

    fn inject(&self, outcome: ValidationOutcome) {
        *self
            .validation_slot
            .lock()
            .expect("validation slot poisoned") = Some(outcome);
        self.validation_notify.notify_one();
    }

    /// Clear the latch after consuming a result, so the next tool call in
    /// the same turn can block again.
    pub fn reset_validation(&self) {
        *self
            .validation_slot
            .lock()
            .expect("validation slot poisoned") = None;
        *self
            .pending_validation_id
            .lock()
            .expect("pending id poisoned") = None;
    }

    pub fn set_pending_validation(&self, validation_id: Option<String>) {
        *self
            .pending_validation_id
            .lock()
            .expect("pending id poisoned") = validation_id;
    }

    pub fn pending_validation_id(&self) -> Option<String> {
        self.pending_validation_id
            .lock()
            .expect("pending id poisoned")
            .clone()
    }

    pub fn mark_disconnected(&self) {
        self.is_active.store(false, Ordering::SeqCst);
        *self
            .disconnected_at
            .lock()
            .expect("disconnected_at poisoned") = Some(Utc::now());
    }

    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::SeqCst)
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected_at
            .lock()
            .expect("disconnected_at poisoned")
            .is_some()
    }

    /// Reset the per-turn source map.
    pub fn reset_sources(&self) {
        self.sources.lock().expect("sources poisoned").clear();
    }

    pub fn record_source(&self, resource_id: &str, source: Value) {
        self.sources
            .lock()
            .expect("sources poisoned")
            .insert(resource_id.to_string(), source);
    }

    pub fn sources(&self) -> HashMap<String, Value> {
        self.sources.lock().expect("sources poisoned").clone()
    }
}

/// Registry of live sessions, keyed by chat id.
pub struct SessionManager {
    sessions: StdMutex<HashMap<String, Arc<StreamSession>>>,
    max_age: Duration,
}

impl SessionManager {
    pub fn new(max_age: Duration) -> Self {
        Self {
            sessions: StdMutex::new(HashMap::new()),
            max_age,
        }
    }

    /// Open a session for a chat.  An existing session is replaced — the
    /// newcomer wins, the old turn's latches go dead.
    pub fn start_session(&self, chat_id: &str, user_id: &str) -> Arc<StreamSession> {
        let session = Arc::new(StreamSession::new(chat_id, user_id));
        let previous = self
            .sessions
            .lock()
            .expect("session map poisoned")
            .insert(chat_id.to_string(), session.clone());
        if previous.is_some() {
            warn!(chat_id, "session already existed, replacing");
        }
        info!(chat_id, user_id, "stream session started");
        session
    }

    pub fn get_session(&self, chat_id: &str) -> Option<Arc<StreamSession>> {
        self.sessions
            .lock()
            .expect("session map poisoned")
            .get(chat_id)
            .cloned()
    }

    /// Active, or disconnected but still holding a pending validation.
    pub fn is_stream_active(&self, chat_id: &str) -> bool {
        match self.get_session(chat_id) {
            Some(session) => session.is_active() || session.pending_validation_id().is_some(),
            None => false,
        }
    }

    /// Trip the stop latch.  Returns false when no session exists.
    pub fn stop_stream(&self, chat_id: &str) -> bool {
        match self.get_session(chat_id) {
            Some(session) => {
                session.request_stop();
                info!(chat_id, "stop requested");
                true
            }
            None => {
                warn!(chat_id, "cannot stop: no session");
                false
            }
        }
    }

    /// Store the outcome and trip the validation latch.  Returns false when
    /// no session exists.
    pub fn inject_validation_result(&self, chat_id: &str, outcome: ValidationOutcome) -> bool {
        match self.get_session(chat_id) {
            Some(session) => {
                session.inject(outcome);
                info!(chat_id, "validation result injected");
                true
            }
            None => {
                warn!(chat_id, "cannot inject validation result: no session");
                false
            }
        }
    }

    pub fn end_session(&self, chat_id: &str) {
        let removed = self
            .sessions
            .lock()
            .expect("session map poisoned")
            .remove(chat_id);
        match removed {
            Some(session) => {
                session.is_active.store(false, Ordering::SeqCst);
                let lived = Utc::now() - session.started_at;
                info!(chat_id, secs = lived.num_seconds(), "stream session ended");
            }
            None => debug!(chat_id, "no session to end"),
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.lock().expect("session map poisoned").len()
    }

    /// Periodic sweep:
    /// - sessions whose pending validation reached a terminal state end;
    /// - disconnected sessions without a pending validation end immediately;
    /// - sessions older than the ceiling (and not waiting on a validation)
    ///   are reaped.
    pub async fn cleanup(&self, validations: &dyn ValidationStore) -> usize {
        let candidates: Vec<Arc<StreamSession>> = self
            .sessions
            .lock()
            .expect("session map poisoned")
            .values()
            .cloned()
            .collect();

        let mut to_end = Vec::new();
        for session in candidates {
            if let Some(validation_id) = session.pending_validation_id() {
                match validations.get_validation(&validation_id).await {
                    Ok(Some(validation)) if validation.status.is_terminal() => {
                        info!(
                            chat_id = %session.chat_id,
                            validation_id,
                            "cleaning session: validation terminal"
                        );
                        to_end.push(session.chat_id.clone());
                    }
                    Ok(_) => {}
                    Err(e) => warn!(validation_id, error = %e, "validation lookup failed"),
                }
                continue;
            }
            if session.is_disconnected() {
                to_end.push(session.chat_id.clone());
                continue;
            }
            let age = (Utc::now() - session.started_at)
                .to_std()
                .unwrap_or_default();
            if age > self.max_age {
                warn!(chat_id = %session.chat_id, "reaping over-age session");
                to_end.push(session.chat_id.clone());
            }
        }

        let count = to_end.len();
        for chat_id in to_end {
            self.end_session(&chat_id);
        }
        count
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use maestro_domain::{Validation, ValidationStatus};
    use maestro_store::MemoryStore;
    use serde_json::json;

    fn manager() -> SessionManager {
        SessionManager::new(Duration::from_secs(3600))
    }

    #[test]
    fn one_session_per_chat_newcomer_replaces() {
        let m = manager();
        let first = m.start_session("cht_a1b2c3", "usr_test01");
        let second = m.start_session("cht_a1b2c3", "usr_test01");
        assert_eq!(m.active_count(), 1);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&m.get_session("cht_a1b2c3").unwrap(), &second));
    }

    #[tokio::test]
    async fn inject_unblocks_a_waiting_turn() {
        let m = manager();
        let session = m.start_session("cht_a1b2c3", "usr_test01");

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.wait_validation().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(m.inject_validation_result(
            "cht_a1b2c3",
            ValidationOutcome::Approved {
                validation_id: "val_abc123".into(),
                data: json!({ "echoed": "x" }),
            },
        ));
        let outcome = waiter.await.unwrap().unwrap();
        assert!(matches!(outcome, ValidationOutcome::Approved { .. }));
    }

    #[tokio::test]
    async fn inject_without_session_returns_false() {
        let m = manager();
        assert!(!m.inject_validation_result(
            "cht_none01",
            ValidationOutcome::Rejected {
                validation_id: "val_abc123".into()
            },
        ));
    }

    #[tokio::test]
    async fn reset_lets_a_second_wait_block_again() {
        let m = manager();
        let session = m.start_session("cht_a1b2c3", "usr_test01");
        session.inject(ValidationOutcome::Rejected {
            validation_id: "val_1aaaaa".into(),
        });
        assert!(session.wait_validation().await.is_some());
        session.reset_validation();

        // Slot is drained; a fresh wait must park until the next inject.
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.wait_validation().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        session.inject(ValidationOutcome::Cancelled {
            validation_id: "val_2aaaaa".into(),
        });
        assert!(waiter.await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stop_wins_over_validation_wait() {
        let m = manager();
        let session = m.start_session("cht_a1b2c3", "usr_test01");
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.wait_validation().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(m.stop_stream("cht_a1b2c3"));
        assert!(waiter.await.unwrap().is_none());
    }

    #[test]
    fn disconnected_with_pending_validation_counts_as_active() {
        let m = manager();
        let session = m.start_session("cht_a1b2c3", "usr_test01");
        session.set_pending_validation(Some("val_abc123".into()));
        session.mark_disconnected();
        assert!(m.is_stream_active("cht_a1b2c3"));

        session.set_pending_validation(None);
        assert!(!m.is_stream_active("cht_a1b2c3"));
        assert!(!m.is_stream_active("cht_other1"));
    }

    #[tokio::test]
    async fn cleanup_ends_session_with_terminal_validation() {
        let store = MemoryStore::new();
        use maestro_store::ValidationStore as _;
        store
            .create_validation(Validation {
                id: "val_abc123".into(),
                user_id: "usr_test01".into(),
                source: "tool_call".into(),
                title: "t".into(),
                agent_id: None,
                chat_id: Some("cht_a1b2c3".into()),
                payload: json!({}),
                status: ValidationStatus::Approved,
                feedback: None,
                created_at: Utc::now(),
                expires_at: Utc::now() + ChronoDuration::hours(2),
            })
            .await
            .unwrap();

        let m = manager();
        let session = m.start_session("cht_a1b2c3", "usr_test01");
        session.set_pending_validation(Some("val_abc123".into()));
        session.mark_disconnected();

        let ended = m.cleanup(&store).await;
        assert_eq!(ended, 1);
        assert!(m.get_session("cht_a1b2c3").is_none());
    }

    #[tokio::test]
    async fn cleanup_keeps_session_with_pending_validation() {
        let store = MemoryStore::new();
        use maestro_store::ValidationStore as _;
        store
            .create_validation(Validation {
                id: "val_abc123".into(),
                user_id: "usr_test01".into(),
                source: "tool_call".into(),
                title: "t".into(),
                agent_id: None,
                chat_id: Some("cht_a1b2c3".into()),
                payload: json!({}),
                status: ValidationStatus::Pending,
                feedback: None,
                created_at: Utc::now(),
                expires_at: Utc::now() + ChronoDuration::hours(2),
            })
            .await
            .unwrap();

        let m = manager();
        let session = m.start_session("cht_a1b2c3", "usr_test01");
        session.set_pending_validation(Some("val_abc123".into()));
        session.mark_disconnected();

        assert_eq!(m.cleanup(&store).await, 0);
        assert!(m.get_session("cht_a1b2c3").is_some());
    }

    #[tokio::test]
    async fn cleanup_ends_disconnected_session_without_validation() {
        let store = MemoryStore::new();
        let m = manager();
        let session = m.start_session("cht_a1b2c3", "usr_test01");
        session.mark_disconnected();
        assert_eq!(m.cleanup(&store).await, 1);
    }

    #[tokio::test]
    async fn cleanup_reaps_over_age_sessions() {
        let store = MemoryStore::new();
        let m = SessionManager::new(Duration::from_secs(0));
        m.start_session("cht_a1b2c3", "usr_test01");
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(m.cleanup(&store).await, 1);
    }

    #[test]
    fn sources_reset_per_turn() {
        let m = manager();
        let session = m.start_session("cht_a1b2c3", "usr_test01");
        session.record_source("res_abc123", json!({ "chunk": 1 }));
        assert_eq!(session.sources().len(), 1);
        session.reset_sources();
        assert!(session.sources().is_empty());
    }
}
