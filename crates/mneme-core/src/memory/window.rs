//! ============================================================================
//! Short-Term Window - Per-user rolling conversation buffers
//! ============================================================================
//! Keeps the last N user/bot exchanges of each live session in memory, in
//! chronological order. Sessions are created on first contact and tracked
//! in a bounded map; when the map is full the least recently active session
//! is evicted. Long-term memory is unaffected by eviction.
//! ============================================================================

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::types::ConversationTurn;

/// Default window size, in user/bot exchanges
pub const DEFAULT_WINDOW_EXCHANGES: usize = 7;

/// Default cap on concurrently tracked sessions
pub const DEFAULT_MAX_SESSIONS: usize = 256;

/// Rolling buffer of the most recent conversation turns
#[derive(Debug, Clone)]
pub struct ShortTermWindow {
    turns: VecDeque<ConversationTurn>,
    /// Two turns per exchange
    max_turns: usize,
}

impl ShortTermWindow {
    pub fn new(exchanges: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(exchanges * 2),
            max_turns: exchanges * 2,
        }
    }

    /// Append one turn, dropping the oldest when the window is full
    pub fn push(&mut self, turn: ConversationTurn) {
        if self.turns.len() >= self.max_turns {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// Append a completed user/bot exchange
    pub fn record_exchange(&mut self, user_text: &str, bot_text: &str) {
        self.push(ConversationTurn::user(user_text));
        self.push(ConversationTurn::bot(bot_text));
    }

    /// Turns in chronological order, oldest first
    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.turns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

struct SessionEntry {
    window: ShortTermWindow,
    /// Logical timestamp of the last interaction
    last_active: u64,
}

/// Bounded map of per-user short-term windows
pub struct SessionWindows {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    window_exchanges: usize,
    max_sessions: usize,
    /// Monotonic counter; avoids wall-clock ties when picking an eviction
    /// victim
    clock: AtomicU64,
}

impl SessionWindows {
    pub fn new(window_exchanges: usize, max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            window_exchanges,
            max_sessions: max_sessions.max(1),
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Record a completed exchange for `user`, creating the session if this
    /// is their first contact.
    pub fn record_exchange(&self, user: &str, user_text: &str, bot_text: &str) {
        let now = self.tick();
        let mut sessions = self.sessions.write();

        if !sessions.contains_key(user) && sessions.len() >= self.max_sessions {
            let victim = sessions
                .iter()
                .min_by_key(|(_, entry)| entry.last_active)
                .map(|(key, _)| key.clone());
            if let Some(victim) = victim {
                debug!("Evicting idle session for {}", victim);
                sessions.remove(&victim);
            }
        }

        let entry = sessions.entry(user.to_string()).or_insert_with(|| SessionEntry {
            window: ShortTermWindow::new(self.window_exchanges),
            last_active: now,
        });
        entry.window.record_exchange(user_text, bot_text);
        entry.last_active = now;
    }

    /// Chronological turns of `user`'s session; empty if none exists
    pub fn snapshot(&self, user: &str) -> Vec<ConversationTurn> {
        let sessions = self.sessions.read();
        sessions
            .get(user)
            .map(|entry| entry.window.snapshot())
            .unwrap_or_default()
    }

    /// Drop `user`'s window; returns whether a session existed
    pub fn reset(&self, user: &str) -> bool {
        let mut sessions = self.sessions.write();
        sessions.remove(user).is_some()
    }

    /// Number of turns currently buffered for `user`
    pub fn session_len(&self, user: &str) -> usize {
        let sessions = self.sessions.read();
        sessions.get(user).map(|entry| entry.window.len()).unwrap_or(0)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.read().len()
    }
}

impl Default for SessionWindows {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_EXCHANGES, DEFAULT_MAX_SESSIONS)
    }
}
