use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

pub const SESSION_TTL_SECONDS: i64 = 300;

/// Per-watch subscription and liveness record.
#[derive(Debug, Clone)]
pub struct WatchSession {
    pub watch_id: String,
    pub config_hash: String,
    pub entities: HashSet<String>,
    pub entities_synced: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub last_poll_interval: Option<Duration>,
}

impl WatchSession {
    fn new(watch_id: &str) -> Self {
        let now = Utc::now();
        WatchSession {
            watch_id: watch_id.into(),
            config_hash: String::new(),
            entities: HashSet::new(),
            entities_synced: false,
            first_seen: now,
            last_seen: now,
            last_poll_interval: None,
        }
    }
}

/// Session table keyed by watch id. Sessions are created on first
/// poll, mutated only by that watch's poll handler and dropped when
/// idle past the TTL or when a poll is cancelled mid-wait.
pub struct SessionTable {
    sessions: DashMap<String, WatchSession>,
    ttl: Duration,
}

impl SessionTable {
    pub fn new(ttl: Duration) -> Self {
        SessionTable {
            sessions: DashMap::new(),
            ttl,
        }
    }

    /// Refresh liveness and apply the entities/config-hash policy for
    /// an incoming poll. Returns a snapshot of the session as it
    /// stands for this poll's collection phase.
    pub fn begin_poll(
        &self,
        watch_id: &str,
        config_hash: &str,
        entities: Option<&[String]>,
    ) -> WatchSession {
        let is_new = !self.sessions.contains_key(watch_id);
        let mut entry = self
            .sessions
            .entry(watch_id.to_string())
            .or_insert_with(|| WatchSession::new(watch_id));
        let session = entry.value_mut();

        let now = Utc::now();
        if !is_new {
            session.last_poll_interval = Some(now - session.last_seen);
        }
        session.last_seen = now;

        match entities {
            Some(list) => {
                session.entities = list.iter().filter(|id| !id.is_empty()).cloned().collect();
                session.config_hash = config_hash.to_string();
                session.entities_synced = true;
            }
            None if session.config_hash != config_hash => {
                // Watch config changed; ask the client to resend its list.
                session.config_hash = config_hash.to_string();
                session.entities.clear();
                session.entities_synced = false;
            }
            None => {}
        }

        session.clone()
    }

    pub fn get(&self, watch_id: &str) -> Option<WatchSession> {
        self.sessions.get(watch_id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, watch_id: &str) {
        self.sessions.remove(watch_id);
    }

    /// Drop sessions idle past the TTL. Runs before every poll is
    /// dispatched.
    pub fn prune_expired(&self) -> usize {
        let cutoff = Utc::now() - self.ttl;
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.last_seen >= cutoff);
        before - self.sessions.len()
    }

    pub fn clear(&self) {
        self.sessions.clear();
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Session count excluding diagnostic probes (ids wrapped in
    /// double underscores).
    pub fn real_session_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| !is_probe(entry.key()))
            .count()
    }

    pub fn monitored_entities(&self) -> usize {
        self.sessions
            .iter()
            .map(|entry| entry.value().entities.len())
            .sum()
    }
}

fn is_probe(watch_id: &str) -> bool {
    watch_id.starts_with("__") && watch_id.ends_with("__")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> SessionTable {
        SessionTable::new(Duration::seconds(SESSION_TTL_SECONDS))
    }

    #[test]
    fn first_poll_creates_unsynced_session() {
        let table = table();
        let session = table.begin_poll("w1", "h1", None);
        assert!(!session.entities_synced);
        assert!(session.entities.is_empty());
        assert_eq!(session.config_hash, "h1");
    }

    #[test]
    fn entities_list_replaces_subscription_atomically() {
        let table = table();
        table.begin_poll("w1", "h1", Some(&["light.a".into(), "light.b".into()]));
        let session = table
            .begin_poll("w1", "h1", Some(&["light.c".into(), "".into()]));
        assert!(session.entities_synced);
        assert_eq!(session.entities.len(), 1);
        assert!(session.entities.contains("light.c"));
    }

    #[test]
    fn config_change_without_entities_clears_subscription() {
        let table = table();
        table.begin_poll("w1", "h1", Some(&["light.a".into()]));
        let session = table.begin_poll("w1", "h2", None);
        assert!(!session.entities_synced);
        assert!(session.entities.is_empty());
        assert_eq!(session.config_hash, "h2");

        // Same hash again keeps waiting for the list.
        let session = table.begin_poll("w1", "h2", None);
        assert!(!session.entities_synced);
    }

    #[test]
    fn session_identity_survives_config_change() {
        let table = table();
        let first = table.begin_poll("w1", "h1", Some(&["light.a".into()]));
        let second = table.begin_poll("w1", "h2", None);
        assert_eq!(first.first_seen, second.first_seen);
    }

    #[test]
    fn prune_drops_idle_sessions() {
        let table = SessionTable::new(Duration::seconds(0));
        table.begin_poll("w1", "h1", None);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(table.prune_expired(), 1);
        assert!(table.get("w1").is_none());
    }

    #[test]
    fn probe_ids_are_excluded_from_real_count() {
        let table = table();
        table.begin_poll("w1", "h1", None);
        table.begin_poll("__probe__", "h1", None);
        table.begin_poll("__half", "h1", None);
        assert_eq!(table.len(), 3);
        assert_eq!(table.real_session_count(), 2);
    }

    #[test]
    fn poll_interval_derives_from_prior_last_seen() {
        let table = table();
        let first = table.begin_poll("w1", "h1", None);
        assert!(first.last_poll_interval.is_none());
        std::thread::sleep(std::time::Duration::from_millis(10));
        let second = table.begin_poll("w1", "h1", None);
        assert!(second.last_poll_interval.unwrap() >= Duration::milliseconds(10));
    }
}
