use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::hub::value::attributes_to_json;
use crate::hub::{State, StateChange};

pub const MAX_EVENTS_BUFFER: usize = 5000;
pub const MAX_EVENTS_PER_RESPONSE: usize = 250;

const GENERATION_CHANNEL_SIZE: usize = 64;

/// One rendered entity update. The payload is built at ingest time so
/// every subscriber shares a single serialization.
#[derive(Debug, Clone)]
pub struct DeltaEvent {
    pub cursor: u64,
    pub entity_id: String,
    pub payload: Value,
}

#[derive(Debug)]
struct LogInner {
    events: VecDeque<DeltaEvent>,
    ingest_times: VecDeque<Instant>,
    cursor: u64,
    generation: u64,
}

/// Result of scanning the ring past a cursor. `last_matched` is the
/// cursor of the last event that hit the subscription; `last_scanned`
/// is the cursor of the last event looked at, so waiters can advance
/// past bursts that matched nothing.
#[derive(Debug)]
pub struct Collected {
    pub events: Vec<Value>,
    pub last_matched: u64,
    pub last_scanned: u64,
}

/// Bounded ring of rendered state changes with a strictly increasing
/// cursor and a generation broadcast for long-poll wakeups.
pub struct EventLog {
    max_length: usize,
    inner: RwLock<LogInner>,
    generation_tx: broadcast::Sender<u64>,
}

impl EventLog {
    pub fn new(max_length: usize) -> Self {
        let (generation_tx, _rx) = broadcast::channel(GENERATION_CHANNEL_SIZE);
        EventLog {
            max_length,
            inner: RwLock::new(LogInner {
                events: VecDeque::with_capacity(max_length.min(MAX_EVENTS_BUFFER)),
                ingest_times: VecDeque::with_capacity(max_length.min(MAX_EVENTS_BUFFER)),
                cursor: 0,
                generation: 0,
            }),
            generation_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<u64> {
        self.generation_tx.subscribe()
    }

    /// Record one state change: assign the next cursor, render the
    /// payload, append to the ring (evicting the oldest on overflow)
    /// and tick the generation.
    pub fn ingest(&self, state: &State) -> u64 {
        let mut inner = self.inner.write().unwrap();
        inner.cursor += 1;
        let cursor = inner.cursor;
        inner.events.push_back(DeltaEvent {
            cursor,
            entity_id: state.entity_id.clone(),
            payload: render_payload(state),
        });
        inner.ingest_times.push_back(Instant::now());
        if inner.events.len() > self.max_length {
            inner.events.pop_front();
            inner.ingest_times.pop_front();
        }
        inner.generation += 1;
        let generation = inner.generation;
        drop(inner);
        let _ = self.generation_tx.send(generation);
        cursor
    }

    pub fn record(&self, change: &StateChange) {
        if let Some(state) = &change.new_state {
            self.ingest(state);
        }
    }

    pub fn cursor(&self) -> u64 {
        self.inner.read().unwrap().cursor
    }

    pub fn generation(&self) -> u64 {
        self.inner.read().unwrap().generation
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn oldest_cursor(&self) -> Option<u64> {
        self.inner
            .read()
            .unwrap()
            .events
            .front()
            .map(|event| event.cursor)
    }

    /// A cursor is stale when it is ahead of the log (the process
    /// restarted and the counter reset) or older than what the ring
    /// still retains (evicted on overflow).
    pub fn is_stale(&self, since_cursor: u64) -> bool {
        let inner = self.inner.read().unwrap();
        if since_cursor > inner.cursor {
            return true;
        }
        match inner.events.front() {
            Some(oldest) => since_cursor + 1 < oldest.cursor,
            None => false,
        }
    }

    /// Collect events with `cursor > since` whose entity is in the
    /// subscription, in cursor order, up to `limit`.
    pub fn collect_after(
        &self,
        since_cursor: u64,
        entities: &HashSet<String>,
        limit: usize,
    ) -> Collected {
        let inner = self.inner.read().unwrap();
        let mut events = Vec::new();
        let mut last_matched = since_cursor;
        let mut last_scanned = since_cursor;
        for event in &inner.events {
            if event.cursor <= since_cursor {
                continue;
            }
            last_scanned = event.cursor;
            if !entities.contains(&event.entity_id) {
                continue;
            }
            events.push(event.payload.clone());
            last_matched = event.cursor;
            if events.len() >= limit {
                break;
            }
        }
        Collected {
            events,
            last_matched,
            last_scanned,
        }
    }

    /// State-change ingests observed over the trailing 60 seconds.
    pub fn events_per_minute(&self) -> f64 {
        let inner = self.inner.read().unwrap();
        let cutoff = Instant::now() - Duration::from_secs(60);
        inner
            .ingest_times
            .iter()
            .rev()
            .take_while(|t| **t >= cutoff)
            .count() as f64
    }

    pub fn buffer_usage_percent(&self) -> f64 {
        (self.len() as f64 / self.max_length as f64 * 1000.0).round() / 10.0
    }
}

/// Render the payload shape watch clients expect for both delta
/// events and snapshot rows.
pub fn render_payload(state: &State) -> Value {
    json!({
        "entity_id": state.entity_id,
        "state": state.state,
        "new_state": {
            "entity_id": state.entity_id,
            "state": state.state,
            "attributes": attributes_to_json(&state.attributes),
            "last_updated": state.last_updated.to_rfc3339(),
        },
        "context_id": state.context_id,
        "last_updated": state.last_updated.to_rfc3339(),
    })
}

/// Drain the hub's state-change bus into the log. Single producer; the
/// cursor and ring append happen as one step under the write lock.
pub fn spawn_ingest(
    log: Arc<EventLog>,
    mut rx: broadcast::Receiver<StateChange>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(change) => log.record(&change),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("State change subscriber lagged, dropped {missed} events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("State change bus closed, stopping ingest");
                    break;
                }
            }
        }
    })
}
