use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::ChatMessage;

/// Topics remembered per session for follow-up detection.
const MAX_ACTIVE_TOPICS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session has been created for the context
    Absent,
    Active,
    /// Idle past the timeout; replaced by a fresh session on the next message
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ConversationSession {
    pub context_id: String,
    pub session_id: Uuid,
    pub messages: VecDeque<SessionMessage>,
    pub last_activity: DateTime<Utc>,
    pub active_topics: Vec<String>,
    /// Incremented on every accepted user message
    turn: u64,
}

impl ConversationSession {
    fn new(context_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            context_id: context_id.to_string(),
            session_id: Uuid::new_v4(),
            messages: VecDeque::new(),
            last_activity: now,
            active_topics: Vec::new(),
            turn: 0,
        }
    }

    pub fn state(&self, now: DateTime<Utc>, timeout: Duration) -> SessionState {
        if now - self.last_activity > timeout {
            SessionState::Expired
        } else {
            SessionState::Active
        }
    }

    /// Append and evict the oldest entries beyond `max_history`.
    fn push(&mut self, role: &str, content: &str, now: DateTime<Utc>, max_history: usize) {
        self.messages.push_back(SessionMessage {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: now,
        });
        while self.messages.len() > max_history {
            self.messages.pop_front();
        }
        self.last_activity = now;
    }

    fn chat_history(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .map(|m| ChatMessage {
                role: m.role.clone(),
                content: m.content.clone(),
            })
            .collect()
    }
}

type Slot = Arc<Mutex<Option<ConversationSession>>>;

/// Process-memory session table, one slot per context.
///
/// Each slot has its own lock, so mutations on one context are serialized
/// while other contexts proceed independently. Sessions are lost on restart.
#[derive(Default)]
pub struct SessionStore {
    slots: RwLock<HashMap<String, Slot>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, context_id: &str) -> Slot {
        if let Some(slot) = self.slots.read().get(context_id) {
            return slot.clone();
        }
        self.slots
            .write()
            .entry(context_id.to_string())
            .or_default()
            .clone()
    }

    /// Run `f` inside the critical section of an existing context.
    fn with_session<T>(
        &self,
        context_id: &str,
        f: impl FnOnce(&mut Option<ConversationSession>) -> T,
    ) -> Option<T> {
        let slot = self.slots.read().get(context_id).cloned()?;
        let mut guard = slot.lock();
        let out = f(&mut *guard);
        Some(out)
    }

    /// Drop every expired session. Busy slots are left for the next sweep.
    fn sweep(&self, now: DateTime<Utc>, timeout: Duration) -> usize {
        let mut slots = self.slots.write();
        let before = slots.len();
        slots.retain(|_, slot| match slot.try_lock() {
            Some(session) => session
                .as_ref()
                .is_some_and(|s| s.state(now, timeout) == SessionState::Active),
            None => true,
        });
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Proof that a user message was accepted, used to attach the reply later.
#[derive(Debug, Clone)]
pub struct TurnTicket {
    pub context_id: String,
    pub session_id: Uuid,
    pub turn: u64,
    /// Session history including the accepted message, oldest first
    pub history: Vec<ChatMessage>,
    pub active_topics: Vec<String>,
}

impl TurnTicket {
    /// History before the accepted message.
    pub fn prior(&self) -> &[ChatMessage] {
        &self.history[..self.history.len().saturating_sub(1)]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSummary {
    pub context_id: String,
    pub state: SessionState,
    pub message_count: usize,
    pub active_topics: Vec<String>,
    pub idle_seconds: Option<i64>,
    pub has_context: bool,
}

/// Owns every session mutation: creation, expiry, history bounds and the
/// ordering of replies relative to newer messages.
pub struct ConversationManager {
    store: Arc<SessionStore>,
    max_history: usize,
    timeout: Duration,
}

impl ConversationManager {
    pub fn new(store: Arc<SessionStore>, max_history: usize, timeout_minutes: i64) -> Self {
        Self {
            store,
            max_history: max_history.max(1),
            timeout: Duration::minutes(timeout_minutes),
        }
    }

    pub fn begin_turn(&self, context_id: &str, text: &str) -> TurnTicket {
        self.begin_turn_at(context_id, text, Utc::now())
    }

    /// Accept a user message. An absent or expired session is replaced by a
    /// fresh one holding only this message.
    pub fn begin_turn_at(&self, context_id: &str, text: &str, now: DateTime<Utc>) -> TurnTicket {
        let slot = self.store.slot(context_id);
        let (ticket, created) = {
            let mut guard = slot.lock();
            let expired = guard
                .as_ref()
                .map(|s| s.state(now, self.timeout) == SessionState::Expired);
            if expired == Some(true) {
                tracing::info!("Conversation for context {context_id} expired, starting fresh");
            }
            let created = expired.unwrap_or(true);
            if created {
                *guard = Some(ConversationSession::new(context_id, now));
            }

            let session = guard.get_or_insert_with(|| ConversationSession::new(context_id, now));
            session.push("user", text, now, self.max_history);
            session.turn += 1;

            let ticket = TurnTicket {
                context_id: context_id.to_string(),
                session_id: session.session_id,
                turn: session.turn,
                history: session.chat_history(),
                active_topics: session.active_topics.clone(),
            };
            (ticket, created)
        };

        if created {
            let swept = self.store.sweep(now, self.timeout);
            if swept > 0 {
                tracing::debug!("Swept {swept} expired conversations");
            }
        }
        ticket
    }

    /// Whether `ticket` is still the newest accepted message of its session.
    pub fn is_current(&self, ticket: &TurnTicket) -> bool {
        self.store
            .with_session(&ticket.context_id, |session| {
                session
                    .as_ref()
                    .is_some_and(|s| s.session_id == ticket.session_id && s.turn == ticket.turn)
            })
            .unwrap_or(false)
    }

    pub fn complete_turn(&self, ticket: &TurnTicket, reply: &str) -> bool {
        self.complete_turn_at(ticket, reply, Utc::now())
    }

    /// Append the assistant reply for `ticket`. A reply to a message that has
    /// since been overtaken, or whose session was replaced, is discarded.
    pub fn complete_turn_at(&self, ticket: &TurnTicket, reply: &str, now: DateTime<Utc>) -> bool {
        let accepted = self
            .store
            .with_session(&ticket.context_id, |session| match session.as_mut() {
                Some(s) if s.session_id == ticket.session_id && s.turn == ticket.turn => {
                    s.push("assistant", reply, now, self.max_history);
                    true
                }
                _ => false,
            })
            .unwrap_or(false);

        if !accepted {
            tracing::debug!(
                "Discarding stale reply for context {} (turn {})",
                ticket.context_id,
                ticket.turn
            );
        }
        accepted
    }

    /// Remember the topics of a retrieval turn (last five, lower-case).
    pub fn set_active_topics(&self, ticket: &TurnTicket, topics: &[String]) {
        self.store.with_session(&ticket.context_id, |session| {
            let Some(s) = session.as_mut().filter(|s| s.session_id == ticket.session_id) else {
                return;
            };
            let mut merged: Vec<String> = Vec::new();
            for topic in s.active_topics.iter().chain(topics) {
                let topic = topic.trim().to_lowercase();
                if topic.is_empty() {
                    continue;
                }
                merged.retain(|t| *t != topic);
                merged.push(topic);
            }
            let skip = merged.len().saturating_sub(MAX_ACTIVE_TOPICS);
            s.active_topics = merged.split_off(skip);
        });
    }

    pub fn history(&self, context_id: &str) -> Vec<ChatMessage> {
        self.history_at(context_id, Utc::now())
    }

    /// Current history; empty for absent or expired sessions.
    pub fn history_at(&self, context_id: &str, now: DateTime<Utc>) -> Vec<ChatMessage> {
        self.store
            .with_session(context_id, |session| {
                session
                    .as_ref()
                    .filter(|s| s.state(now, self.timeout) == SessionState::Active)
                    .map(ConversationSession::chat_history)
            })
            .flatten()
            .unwrap_or_default()
    }

    pub fn summary(&self, context_id: &str) -> ContextSummary {
        self.summary_at(context_id, Utc::now())
    }

    pub fn summary_at(&self, context_id: &str, now: DateTime<Utc>) -> ContextSummary {
        let snapshot = self
            .store
            .with_session(context_id, |session| {
                session.as_ref().map(|s| {
                    (
                        s.state(now, self.timeout),
                        s.messages.len(),
                        s.active_topics.clone(),
                        (now - s.last_activity).num_seconds(),
                    )
                })
            })
            .flatten();

        match snapshot {
            Some((state, count, topics, idle)) => {
                let active = state == SessionState::Active;
                ContextSummary {
                    context_id: context_id.to_string(),
                    state,
                    message_count: if active { count } else { 0 },
                    active_topics: if active { topics } else { Vec::new() },
                    idle_seconds: Some(idle),
                    has_context: active && count > 0,
                }
            }
            None => ContextSummary {
                context_id: context_id.to_string(),
                state: SessionState::Absent,
                message_count: 0,
                active_topics: Vec::new(),
                idle_seconds: None,
                has_context: false,
            },
        }
    }
}
