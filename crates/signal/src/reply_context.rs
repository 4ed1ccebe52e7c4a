use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

/// What signal-cli needs to quote a message: its sent timestamp and author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyHandle {
    pub timestamp: i64,
    pub author: String,
}

/// Latest quotable message per conversation.
///
/// One entry per reply target; a newer message replaces the older entry.
/// Owned by a single channel and cleared when it stops.
#[derive(Debug, Default)]
pub struct ReplyContext {
    entries: Mutex<HashMap<String, ReplyHandle>>,
}

impl ReplyContext {
    pub fn new() -> Self {
        Self::default()
    }

    // Never held across an `.await`.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, ReplyHandle>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn remember(&self, target: impl Into<String>, handle: ReplyHandle) {
        self.lock().insert(target.into(), handle);
    }

    pub fn latest(&self, target: &str) -> Option<ReplyHandle> {
        self.lock().get(target).cloned()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
