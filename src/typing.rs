//! Typing indicators.
//!
//! Ephemeral per-(chat, user) state kept in memory, apart from the durable
//! chat record. Each `start` arms a one-shot expiry timer; a refresh
//! replaces the timer rather than stacking another, and `stop` cancels it.
//! Readers also filter by age, so an entry whose timer hasn't fired yet is
//! never reported once it is older than the timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::models::TypingUser;

/// Default time after which an unrefreshed indicator expires.
pub const DEFAULT_TYPING_TIMEOUT: Duration = Duration::from_secs(5);

type TypingKey = (String, String);

#[derive(Debug)]
struct TypingEntry {
    started_at: DateTime<Utc>,
    refreshed_at: Instant,
    generation: u64,
    expiry: AbortHandle,
}

/// In-memory TTL store of who is typing where. Cheap to clone.
#[derive(Clone)]
pub struct TypingTracker {
    entries: Arc<DashMap<TypingKey, TypingEntry>>,
    generation: Arc<AtomicU64>,
    timeout: Duration,
}

impl TypingTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
            timeout,
        }
    }

    /// Mark `user_id` as typing in `chat_id`, (re)arming the expiry timer.
    ///
    /// `on_expire` runs once if the entry times out without being refreshed
    /// or stopped. Returns true if the user wasn't already typing.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<F>(&self, chat_id: &str, user_id: &str, on_expire: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let key = (chat_id.to_string(), user_id.to_string());
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;

        let entries = Arc::clone(&self.entries);
        let timeout = self.timeout;
        let timer_key = key.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let expired = entries
                .remove_if(&timer_key, |_, entry| entry.generation == generation)
                .is_some();
            if expired {
                tracing::debug!(
                    chat_id = timer_key.0.as_str(),
                    user_id = timer_key.1.as_str(),
                    "Typing indicator expired"
                );
                on_expire();
            }
        });

        let now = Instant::now();
        let previous = self.entries.insert(
            key,
            TypingEntry {
                started_at: Utc::now(),
                refreshed_at: now,
                generation,
                expiry: task.abort_handle(),
            },
        );

        match previous {
            Some(old) => {
                old.expiry.abort();
                false
            }
            None => true,
        }
    }

    /// Clear the indicator and cancel its timer. Returns whether the user
    /// was typing.
    pub fn stop(&self, chat_id: &str, user_id: &str) -> bool {
        let key = (chat_id.to_string(), user_id.to_string());
        match self.entries.remove(&key) {
            Some((_, entry)) => {
                entry.expiry.abort();
                true
            }
            None => false,
        }
    }

    /// Whether `user_id` has a live (unexpired) indicator in `chat_id`.
    #[cfg(test)]
    pub fn is_typing(&self, chat_id: &str, user_id: &str) -> bool {
        let key = (chat_id.to_string(), user_id.to_string());
        self.entries
            .get(&key)
            .map(|entry| entry.refreshed_at.elapsed() < self.timeout)
            .unwrap_or(false)
    }

    /// Live indicators for a chat, oldest first.
    pub fn active_in(&self, chat_id: &str) -> Vec<TypingUser> {
        let mut typing: Vec<TypingUser> = self
            .entries
            .iter()
            .filter(|entry| {
                entry.key().0 == chat_id && entry.value().refreshed_at.elapsed() < self.timeout
            })
            .map(|entry| TypingUser {
                user: entry.key().1.clone(),
                started_at: entry.value().started_at,
            })
            .collect();
        typing.sort_by_key(|t| t.started_at);
        typing
    }

    /// Clear every indicator in a chat (e.g. when it is deleted).
    pub fn clear_chat(&self, chat_id: &str) -> usize {
        let keys: Vec<TypingKey> = self
            .entries
            .iter()
            .filter(|entry| entry.key().0 == chat_id)
            .map(|entry| entry.key().clone())
            .collect();
        keys.into_iter()
            .filter(|(chat_id, user_id)| self.stop(chat_id, user_id))
            .count()
    }

    /// Drop entries whose timers never ran (e.g. aborted runtime). Returns
    /// how many were removed.
    pub fn sweep_stale(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            let live = entry.refreshed_at.elapsed() < self.timeout;
            if !live {
                entry.expiry.abort();
            }
            live
        });
        before - self.entries.len()
    }

    pub fn active_count(&self) -> usize {
        self.entries.len()
    }
}

impl Default for TypingTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TYPING_TIMEOUT)
    }
}
