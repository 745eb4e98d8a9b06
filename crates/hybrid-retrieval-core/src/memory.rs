//! Per-user conversation memory.
//!
//! Each user id owns a FIFO of at most [`MAX_CAPACITY`] turns. A single
//! mutex guards the map, so an append-and-trim for one user is atomic and
//! never observes another user's state.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use parking_lot::Mutex;

use crate::models::ConversationTurn;

/// Upper bound on stored turns per user.
pub const MAX_CAPACITY: usize = 5;
pub const DEFAULT_CAPACITY: usize = MAX_CAPACITY;
pub const DEFAULT_HISTORY_TURNS: usize = 3;
pub const DEFAULT_PREVIEW_CHARS: usize = 200;

pub struct ConversationMemory {
    capacity: usize,
    history_turns: usize,
    preview_chars: usize,
    sessions: Mutex<HashMap<String, VecDeque<ConversationTurn>>>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CAPACITY, DEFAULT_HISTORY_TURNS, DEFAULT_PREVIEW_CHARS)
    }

    /// `capacity` is clamped to `1..=MAX_CAPACITY`.
    pub fn with_limits(capacity: usize, history_turns: usize, preview_chars: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_CAPACITY);
        Self {
            capacity,
            history_turns: history_turns.min(capacity),
            preview_chars,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn append(&self, user_id: &str, query: &str, answer: &str) {
        let turn = ConversationTurn {
            timestamp: Utc::now(),
            query: query.to_string(),
            answer: answer.to_string(),
        };
        let mut sessions = self.sessions.lock();
        let turns = sessions.entry(user_id.to_string()).or_default();
        turns.push_back(turn);
        while turns.len() > self.capacity {
            turns.pop_front();
        }
    }

    /// The most recent turns, oldest first, answers cut to the preview length.
    pub fn history(&self, user_id: &str) -> Vec<ConversationTurn> {
        let sessions = self.sessions.lock();
        let Some(turns) = sessions.get(user_id) else {
            return Vec::new();
        };
        let skip = turns.len().saturating_sub(self.history_turns);
        turns
            .iter()
            .skip(skip)
            .map(|t| ConversationTurn {
                timestamp: t.timestamp,
                query: t.query.clone(),
                answer: preview(&t.answer, self.preview_chars),
            })
            .collect()
    }

    /// Number of stored turns for `user_id`.
    pub fn turn_count(&self, user_id: &str) -> usize {
        self.sessions.lock().get(user_id).map_or(0, |t| t.len())
    }

    /// History as `User:` / `Assistant:` lines, empty when there is none.
    pub fn render_history(&self, user_id: &str) -> String {
        self.history(user_id)
            .iter()
            .map(|t| format!("User: {}\nAssistant: {}", t.query, t.answer))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn clear(&self, user_id: &str) {
        self.sessions.lock().remove(user_id);
    }

    pub fn user_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new()
    }
}

/// First `max_chars` characters of `text`, with `...` appended when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_capacity_is_enforced() {
        let memory = ConversationMemory::new();
        for i in 0..12 {
            memory.append("u1", &format!("q{}", i), "a");
            assert!(memory.turn_count("u1") <= 5);
        }
        assert_eq!(memory.turn_count("u1"), 5);
    }

    #[test]
    fn test_capacity_never_exceeds_max() {
        let memory = ConversationMemory::with_limits(50, 3, 200);
        assert_eq!(memory.capacity(), MAX_CAPACITY);
        for i in 0..20 {
            memory.append("u", &format!("q{}", i), "a");
        }
        assert_eq!(memory.turn_count("u"), MAX_CAPACITY);
    }

    #[test]
    fn test_history_returns_last_three_in_order() {
        let memory = ConversationMemory::new();
        for i in 0..5 {
            memory.append("u1", &format!("q{}", i), "a");
        }
        let queries: Vec<_> = memory.history("u1").into_iter().map(|t| t.query).collect();
        assert_eq!(queries, vec!["q2", "q3", "q4"]);

        memory.append("u2", "only", "one");
        assert_eq!(memory.history("u2").len(), 1);
        assert!(memory.history("nobody").is_empty());
    }

    #[test]
    fn test_answers_are_previewed() {
        let memory = ConversationMemory::new();
        memory.append("u1", "q", &"x".repeat(450));
        let turn = &memory.history("u1")[0];
        assert_eq!(turn.answer.chars().count(), 203);
        assert!(turn.answer.ends_with("..."));
    }

    #[test]
    fn test_render_and_clear() {
        let memory = ConversationMemory::new();
        memory.append("u1", "What is INSAT-3D?", "A satellite.");
        assert_eq!(
            memory.render_history("u1"),
            "User: What is INSAT-3D?\nAssistant: A satellite."
        );
        assert_eq!(memory.user_count(), 1);
        memory.clear("u1");
        assert_eq!(memory.render_history("u1"), "");
        assert_eq!(memory.user_count(), 0);
    }

    #[test]
    fn test_concurrent_users_do_not_interfere() {
        let memory = Arc::new(ConversationMemory::new());
        let handles: Vec<_> = (0..8)
            .map(|u| {
                let memory = Arc::clone(&memory);
                std::thread::spawn(move || {
                    let user = format!("user-{}", u);
                    for i in 0..20 {
                        memory.append(&user, &format!("{}-{}", user, i), "ok");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(memory.user_count(), 8);
        for u in 0..8 {
            let user = format!("user-{}", u);
            assert_eq!(memory.turn_count(&user), 5);
            assert!(memory
                .history(&user)
                .iter()
                .all(|t| t.query.starts_with(&format!("{}-", user))));
        }
    }
}
