//! **ConversationHistory** — bounded, append-only turn log.
//!
//! Owned exclusively by the coordinator; no other component mutates it. An
//! optional system preamble is pinned: it survives every eviction and always
//! stays first.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    User,
    Agent,
    System,
}

/// One contribution to the conversation.
#[derive(Debug, Clone, Serialize)]
pub struct TurnRecord {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl TurnRecord {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Size-bounded ordered log. Total length never exceeds `max_records`;
/// eviction drops the oldest non-preamble record.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    records: Vec<TurnRecord>,
    max_records: usize,
    has_preamble: bool,
}

impl ConversationHistory {
    /// History without a preamble. `max_records` is clamped to at least 1.
    pub fn new(max_records: usize) -> Self {
        Self {
            records: Vec::new(),
            max_records: max_records.max(1),
            has_preamble: false,
        }
    }

    /// History seeded with a pinned system preamble. `max_records` is
    /// clamped to at least 2 so the preamble never blocks all appends.
    pub fn with_preamble(preamble: impl Into<String>, max_records: usize) -> Self {
        let mut history = Self {
            records: Vec::new(),
            max_records: max_records.max(2),
            has_preamble: true,
        };
        history.records.push(TurnRecord::new(Role::System, preamble));
        history
    }

    /// Append a turn, evicting the oldest non-preamble record when full.
    pub fn push(&mut self, role: Role, text: impl Into<String>) {
        if self.records.len() >= self.max_records {
            let evict_at = usize::from(self.has_preamble);
            self.records.remove(evict_at);
        }
        self.records.push(TurnRecord::new(role, text));
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Full bounded log, oldest first (preamble included when present).
    pub fn records(&self) -> &[TurnRecord] {
        &self.records
    }

    /// The pinned preamble, when one was configured.
    pub fn preamble(&self) -> Option<&TurnRecord> {
        if self.has_preamble {
            self.records.first()
        } else {
            None
        }
    }

    /// The most recent turn, preamble excluded.
    pub fn last_turn(&self) -> Option<&TurnRecord> {
        let skip = usize::from(self.has_preamble);
        if self.records.len() > skip {
            self.records.last()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_appends_in_order() {
        let mut history = ConversationHistory::new(10);
        history.push(Role::User, "hello");
        history.push(Role::Agent, "Hi there!");

        let records = history.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].role, Role::User);
        assert_eq!(records[1].role, Role::Agent);
        assert_eq!(records[1].text, "Hi there!");
    }

    #[test]
    fn bound_holds_and_preamble_survives() {
        let max = 6;
        let mut history = ConversationHistory::with_preamble("You are a voice agent.", max);

        for i in 0..(max + 5) {
            history.push(Role::User, format!("turn {i}"));
        }

        assert_eq!(history.len(), max);
        let first = &history.records()[0];
        assert_eq!(first.role, Role::System);
        assert_eq!(first.text, "You are a voice agent.");
        // The newest record is always retained.
        assert_eq!(history.last_turn().unwrap().text, format!("turn {}", max + 4));
    }

    #[test]
    fn eviction_without_preamble_drops_the_oldest() {
        let mut history = ConversationHistory::new(3);
        for i in 0..5 {
            history.push(Role::User, format!("turn {i}"));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.records()[0].text, "turn 2");
    }

    #[test]
    fn tiny_preamble_history_still_accepts_turns() {
        let mut history = ConversationHistory::with_preamble("preamble", 1);
        history.push(Role::User, "a");
        history.push(Role::User, "b");
        assert_eq!(history.len(), 2);
        assert_eq!(history.records()[0].text, "preamble");
        assert_eq!(history.records()[1].text, "b");
    }

    #[test]
    fn last_turn_ignores_the_preamble() {
        let history = ConversationHistory::with_preamble("preamble", 5);
        assert!(history.last_turn().is_none());
        assert!(history.preamble().is_some());
    }
}
