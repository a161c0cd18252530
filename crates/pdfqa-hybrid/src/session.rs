//! Per-session record of uploaded filenames, used only to narrow retrieval.
//! Not an access-control boundary.
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use pdfqa_core::types::FileFilter;

#[derive(Debug, Clone)]
struct SessionFiles {
    files: BTreeSet<String>,
    last_seen: Instant,
}

/// Thread-safe session registry; idle sessions expire after `ttl`.
pub struct SessionRegistry {
    sessions: DashMap<String, SessionFiles>,
    ttl: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self { Self::new(Duration::from_secs(3600)) }
}

impl SessionRegistry {
    pub fn new(ttl: Duration) -> Self { Self { sessions: DashMap::new(), ttl } }

    /// Adds `filename` to the session's set. Repeated calls are no-ops.
    pub fn record(&self, session_id: &str, filename: &str) {
        let now = Instant::now();
        let mut entry = self.sessions.entry(session_id.to_string()).or_insert_with(|| SessionFiles { files: BTreeSet::new(), last_seen: now });
        if now.duration_since(entry.last_seen) > self.ttl { entry.files.clear(); }
        entry.files.insert(filename.to_string());
        entry.last_seen = now;
    }

    /// Current filenames of the session; empty for unknown or expired sessions.
    pub fn filenames_for(&self, session_id: &str) -> BTreeSet<String> {
        let now = Instant::now();
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            if now.duration_since(entry.last_seen) <= self.ttl {
                entry.last_seen = now;
                return entry.files.clone();
            }
        }
        self.sessions.remove_if(session_id, |_, s| now.duration_since(s.last_seen) > self.ttl);
        BTreeSet::new()
    }

    pub fn filter_for(&self, session_id: &str) -> FileFilter { FileFilter::only(self.filenames_for(session_id)) }

    pub fn clear(&self, session_id: &str) -> bool { self.sessions.remove(session_id).is_some() }

    /// Drops expired sessions and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, s| now.duration_since(s.last_seen) <= self.ttl);
        before.saturating_sub(self.sessions.len())
    }

    pub fn session_count(&self) -> usize { self.sessions.len() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_is_idempotent() {
        let registry = SessionRegistry::default();
        registry.record("s", "a.pdf");
        registry.record("s", "a.pdf");
        registry.record("s", "b.pdf");
        assert_eq!(registry.filenames_for("s").into_iter().collect::<Vec<_>>(), vec!["a.pdf", "b.pdf"]);
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn unknown_session_is_empty() {
        let registry = SessionRegistry::default();
        assert!(registry.filenames_for("nobody").is_empty());
        assert!(registry.filter_for("nobody").is_unrestricted());
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn idle_sessions_expire() {
        let registry = SessionRegistry::new(Duration::from_millis(20));
        registry.record("old", "a.pdf");
        std::thread::sleep(Duration::from_millis(40));
        registry.record("new", "b.pdf");
        assert_eq!(registry.purge_expired(), 1);
        assert!(registry.filenames_for("old").is_empty());
        assert_eq!(registry.filenames_for("new").len(), 1);
    }

    #[test]
    fn clear_forgets_the_session() {
        let registry = SessionRegistry::default();
        registry.record("s", "a.pdf");
        assert!(registry.clear("s"));
        assert!(!registry.clear("s"));
        assert!(registry.filenames_for("s").is_empty());
    }
}
