use std::sync::Arc;
use std::time::Duration;

use itertools::Itertools;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::debug;

use crate::delta::event_log::{EventLog, MAX_EVENTS_PER_RESPONSE};
use crate::delta::filters::slim_payload;
use crate::delta::sessions::{SessionTable, WatchSession};
use crate::hub::StateStore;

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 45;
pub const MIN_TIMEOUT_SECONDS: u64 = 5;
pub const MAX_TIMEOUT_SECONDS: u64 = 55;

pub fn clamp_timeout(requested: Option<u64>) -> Duration {
    Duration::from_secs(
        requested
            .unwrap_or(DEFAULT_TIMEOUT_SECONDS)
            .clamp(MIN_TIMEOUT_SECONDS, MAX_TIMEOUT_SECONDS),
    )
}

#[derive(Debug, Clone)]
pub struct PollRequest {
    pub watch_id: String,
    pub config_hash: String,
    pub since: Option<String>,
    pub entities: Option<Vec<String>>,
    pub timeout: Duration,
    pub slim: bool,
    pub force_delta: bool,
}

#[derive(Debug)]
pub enum PollOutcome {
    /// 200 with matched events.
    Delivered { events: Vec<Value>, next_cursor: u64 },
    /// 200 with a synthetic row per currently-existing subscribed entity.
    Snapshot { events: Vec<Value>, next_cursor: u64 },
    /// 200 asking the client to resend its entity list.
    NeedEntities { next_cursor: u64 },
    /// 200 without waiting; the caller attaches a fresh summary.
    ForceDelta { next_cursor: u64 },
    /// 410; the cursor is unusable and the client must resync.
    StaleCursor { next_cursor: u64 },
    /// 204; the deadline passed with nothing to deliver.
    Timeout,
}

/// Joins the event log and the session table to serve long-poll reads
/// with generation-based wakeups.
pub struct DeltaEngine {
    log: Arc<EventLog>,
    sessions: Arc<SessionTable>,
    states: Arc<dyn StateStore>,
}

/// Removes the session when a poll future is dropped mid-wait, which
/// is how a client disconnect surfaces here.
struct WaitGuard {
    sessions: Arc<SessionTable>,
    watch_id: String,
    armed: bool,
}

impl WaitGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        if self.armed {
            self.sessions.remove(&self.watch_id);
            debug!("Poll for {} cancelled mid-wait, session dropped", self.watch_id);
        }
    }
}

impl DeltaEngine {
    pub fn new(
        log: Arc<EventLog>,
        sessions: Arc<SessionTable>,
        states: Arc<dyn StateStore>,
    ) -> Self {
        DeltaEngine {
            log,
            sessions,
            states,
        }
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub async fn handle_poll(&self, req: PollRequest) -> PollOutcome {
        self.sessions.prune_expired();
        let session =
            self.sessions
                .begin_poll(&req.watch_id, &req.config_hash, req.entities.as_deref());

        if !session.entities_synced {
            return PollOutcome::NeedEntities {
                next_cursor: self.log.cursor(),
            };
        }

        // No cursor means the client wants a full snapshot of its
        // subscription from the current state machine.
        let since = match &req.since {
            None => return self.snapshot(&session, req.slim),
            Some(s) if s.is_empty() => return self.snapshot(&session, req.slim),
            Some(s) => s,
        };

        let Ok(parsed) = since.parse::<i64>() else {
            return PollOutcome::StaleCursor {
                next_cursor: self.log.cursor(),
            };
        };
        let mut since_cursor = parsed.max(0) as u64;

        if self.log.is_stale(since_cursor) {
            return PollOutcome::StaleCursor {
                next_cursor: self.log.cursor(),
            };
        }

        let collected =
            self.log
                .collect_after(since_cursor, &session.entities, MAX_EVENTS_PER_RESPONSE);
        if !collected.events.is_empty() {
            return PollOutcome::Delivered {
                events: self.render(collected.events, req.slim),
                next_cursor: collected.last_matched,
            };
        }
        since_cursor = collected.last_scanned;

        if req.force_delta {
            return PollOutcome::ForceDelta {
                next_cursor: self.log.cursor(),
            };
        }

        self.wait_for_events(&session, since_cursor, req.timeout, req.slim)
            .await
    }

    /// Generation wait loop. Every ingest bumps the generation and
    /// signals all waiters; each waiter re-reads the counter and
    /// decides whether a re-scan is worth it. Spurious wakeups and
    /// lagged receivers just re-scan.
    async fn wait_for_events(
        &self,
        session: &WatchSession,
        mut since_cursor: u64,
        timeout: Duration,
        slim: bool,
    ) -> PollOutcome {
        let deadline = Instant::now() + timeout;
        let mut rx = self.log.subscribe();
        let mut observed_generation = self.log.generation();

        let mut guard = WaitGuard {
            sessions: self.sessions.clone(),
            watch_id: session.watch_id.clone(),
            armed: true,
        };

        let outcome = loop {
            // An ingest may have landed between the last collect and
            // subscribing; catch up before sleeping.
            if self.log.generation() != observed_generation {
                observed_generation = self.log.generation();
                let collected = self.log.collect_after(
                    since_cursor,
                    &session.entities,
                    MAX_EVENTS_PER_RESPONSE,
                );
                if !collected.events.is_empty() {
                    break PollOutcome::Delivered {
                        events: self.render(collected.events, slim),
                        next_cursor: collected.last_matched,
                    };
                }
                since_cursor = collected.last_scanned;
                continue;
            }

            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Err(_elapsed) => break PollOutcome::Timeout,
                Ok(Err(RecvError::Closed)) => break PollOutcome::Timeout,
                Ok(Err(RecvError::Lagged(_))) => continue,
                Ok(Ok(generation)) => {
                    observed_generation = observed_generation.max(generation);
                    let collected = self.log.collect_after(
                        since_cursor,
                        &session.entities,
                        MAX_EVENTS_PER_RESPONSE,
                    );
                    if !collected.events.is_empty() {
                        break PollOutcome::Delivered {
                            events: self.render(collected.events, slim),
                            next_cursor: collected.last_matched,
                        };
                    }
                    // Advance past events that matched nothing so a
                    // silent burst doesn't force a re-scan from an old
                    // cursor.
                    since_cursor = collected.last_scanned;
                }
            }
        };

        guard.disarm();
        outcome
    }

    fn snapshot(&self, session: &WatchSession, slim: bool) -> PollOutcome {
        // Entities missing from the store are skipped, not errored.
        let events: Vec<Value> = session
            .entities
            .iter()
            .sorted()
            .filter_map(|entity_id| self.states.get(entity_id))
            .map(|state| crate::delta::event_log::render_payload(&state))
            .collect();
        PollOutcome::Snapshot {
            events: self.render(events, slim),
            next_cursor: self.log.cursor(),
        }
    }

    fn render(&self, events: Vec<Value>, slim: bool) -> Vec<Value> {
        if slim {
            events.iter().map(slim_payload).collect()
        } else {
            events
        }
    }
}
