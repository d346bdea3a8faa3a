//! A single live session: conversation history, playbook position,
//! pending vision attachments, and the turn generation counter.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use rtc_domain::message::Attachment;
use rtc_playbook::PlaybookState;

use crate::history::History;

/// Process-lifetime session state. Transport bindings live with the
/// gateway and are rebindable; everything conversational lives here so a
/// reconnect finds it intact.
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    last_activity: Mutex<DateTime<Utc>>,
    /// Monotonic turn counter; events from superseded generations are
    /// dropped by the multiplexer.
    generation: AtomicU64,
    history: Mutex<History>,
    playbook_state: Mutex<Option<PlaybookState>>,
    /// Vision attachments waiting for the next admitted turn.
    pending_attachments: Mutex<Vec<Attachment>>,
}

impl Session {
    pub fn new(id: String, history_limit: usize, now: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at: now,
            last_activity: Mutex::new(now),
            generation: AtomicU64::new(0),
            history: Mutex::new(History::new(history_limit)),
            playbook_state: Mutex::new(None),
            pending_attachments: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn touch(&self, now: DateTime<Utc>) {
        *self.last_activity.lock() = now;
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.lock()
    }

    pub fn idle_since(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.last_activity())
    }

    /// Allocate the generation for a newly admitted turn.
    pub fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Run `f` against the history under its lock. Mutations are confined
    /// to the owning session's executor, so no turn ever observes a
    /// half-applied group.
    pub fn with_history<R>(&self, f: impl FnOnce(&mut History) -> R) -> R {
        f(&mut self.history.lock())
    }

    pub fn playbook_state(&self) -> Option<PlaybookState> {
        self.playbook_state.lock().clone()
    }

    pub fn set_playbook_state(&self, state: Option<PlaybookState>) {
        *self.playbook_state.lock() = state;
    }

    /// Queue attachments for the next turn.
    pub fn queue_attachments(&self, attachments: Vec<Attachment>) {
        self.pending_attachments.lock().extend(attachments);
    }

    /// Consume the queue atomically as part of turn admission.
    pub fn drain_attachments(&self) -> Vec<Attachment> {
        std::mem::take(&mut self.pending_attachments.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtc_domain::message::Message;

    #[test]
    fn generations_are_monotonic() {
        let s = Session::new("s1".into(), 10, Utc::now());
        assert_eq!(s.current_generation(), 0);
        assert_eq!(s.next_generation(), 1);
        assert_eq!(s.next_generation(), 2);
        assert_eq!(s.current_generation(), 2);
    }

    #[test]
    fn attachment_queue_drains_atomically() {
        let s = Session::new("s1".into(), 10, Utc::now());
        s.queue_attachments(vec![Attachment {
            data: "aGk=".into(),
            media_type: "image/png".into(),
            alt: None,
        }]);
        s.queue_attachments(vec![Attachment {
            data: "eW8=".into(),
            media_type: "image/jpeg".into(),
            alt: Some("photo".into()),
        }]);
        assert_eq!(s.drain_attachments().len(), 2);
        assert!(s.drain_attachments().is_empty());
    }

    #[test]
    fn history_access_goes_through_the_lock() {
        let s = Session::new("s1".into(), 10, Utc::now());
        s.with_history(|h| h.push(Message::user("hi")));
        assert_eq!(s.with_history(|h| h.len()), 1);
    }
}
