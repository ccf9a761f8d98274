use crate::consts::MAX_HISTORY_MESSAGES;
use crate::openai_types::OpenAIMessage;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Dialogue step for one call or chat thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// No active item.
    Idle,
    /// Several candidates matched a locality; waiting for street or budget.
    NeedDetail,
    /// An item is selected; offering to propose a visit day.
    OfferDay,
    /// Visit day read out; waiting for yes/no.
    AwaitBookConfirm,
    /// Booking confirmed; collecting name/phone/email.
    CollectContact,
}

#[derive(Debug, Clone, Default)]
pub struct ContactDraft {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl ContactDraft {
    /// A booking needs at least one way to reach the contact.
    pub fn reachable(&self) -> bool {
        self.phone.is_some() || self.email.is_some()
    }
}

/// Ephemeral per-conversation state, keyed by the Twilio call sid (voice) or
/// the sender address (WhatsApp).  Lives in process memory only; dropped by
/// the TTL sweep or on restart.
#[derive(Debug)]
pub struct CallSession {
    pub history: Vec<OpenAIMessage>,
    pub language: String,
    pub step: Step,
    pub current_item: Option<u64>,
    pub contact: ContactDraft,
    pub last_seen: Instant,
}

impl CallSession {
    fn new() -> Self {
        Self {
            history: vec![],
            language: "es".to_string(),
            step: Step::Idle,
            current_item: None,
            contact: ContactDraft::default(),
            last_seen: Instant::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn push_user(&mut self, utterance: &str) {
        self.push(OpenAIMessage::user(utterance));
    }

    pub fn push_assistant(&mut self, reply: &str) {
        self.push(OpenAIMessage {
            role: "assistant".to_string(),
            content: reply.to_string(),
        });
    }

    fn push(&mut self, message: OpenAIMessage) {
        self.history.push(message);
        if self.history.len() > MAX_HISTORY_MESSAGES {
            let excess = self.history.len() - MAX_HISTORY_MESSAGES;
            self.history.drain(..excess);
        }
    }

    /// Back to no-active-item after a completed or declined booking.  The
    /// session record itself stays until the TTL sweep.
    pub fn reset_item(&mut self) {
        self.current_item = None;
        self.step = Step::Idle;
        self.contact = ContactDraft::default();
    }
}

/// Keyed store of live sessions.  The outer lock only guards the map; each
/// session carries its own async mutex which the handler holds for the whole
/// turn, so two simultaneous webhooks for the same key serialize instead of
/// racing.
pub struct SessionStore {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<CallSession>>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Fetch or create the session for a key.
    pub fn entry(&self, key: &str) -> Arc<tokio::sync::Mutex<CallSession>> {
        let mut map = self.inner.lock().unwrap();
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(CallSession::new())))
            .clone()
    }

    /// Drop sessions idle past the TTL; sessions locked mid-turn are kept.
    pub fn sweep(&self) -> usize {
        let mut map = self.inner.lock().unwrap();
        let before = map.len();
        map.retain(|_, session| match session.try_lock() {
            Ok(guard) => guard.last_seen.elapsed() < self.ttl,
            Err(_) => true,
        });
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entry_creates_then_reuses() {
        let store = SessionStore::new(Duration::from_secs(60));
        {
            let handle = store.entry("CA1");
            let mut session = handle.lock().await;
            session.step = Step::OfferDay;
            session.current_item = Some(42);
        }
        assert_eq!(store.len(), 1);
        let handle = store.entry("CA1");
        let session = handle.lock().await;
        assert_eq!(session.step, Step::OfferDay);
        assert_eq!(session.current_item, Some(42));
    }

    #[tokio::test]
    async fn sweep_drops_idle_sessions_only() {
        let store = SessionStore::new(Duration::from_millis(50));
        store.entry("old");
        tokio::time::sleep(Duration::from_millis(80)).await;
        {
            let handle = store.entry("fresh");
            handle.lock().await.touch();
        }
        let dropped = store.sweep();
        assert_eq!(dropped, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn locked_sessions_survive_the_sweep() {
        let store = SessionStore::new(Duration::from_secs(0));
        let handle = store.entry("busy");
        let _guard = handle.lock().await;
        assert_eq!(store.sweep(), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn history_is_bounded() {
        let mut session = CallSession::new();
        for i in 0..(MAX_HISTORY_MESSAGES * 2) {
            session.push_user(&format!("mensaje {i}"));
        }
        assert_eq!(session.history.len(), MAX_HISTORY_MESSAGES);
        // oldest entries were dropped, not newest
        assert!(session.history.last().unwrap().content.ends_with(&format!(
            "{}",
            MAX_HISTORY_MESSAGES * 2 - 1
        )));
    }

    #[test]
    fn reset_clears_item_but_keeps_history() {
        let mut session = CallSession::new();
        session.push_user("hola");
        session.current_item = Some(7);
        session.step = Step::CollectContact;
        session.contact.phone = Some("+34600".to_string());
        session.reset_item();
        assert_eq!(session.step, Step::Idle);
        assert!(session.current_item.is_none());
        assert!(!session.contact.reachable());
        assert_eq!(session.history.len(), 1);
    }
}
