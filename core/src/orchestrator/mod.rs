//! Generation Orchestrator
//!
//! Drives one reply per user message through the pipeline and keeps a
//! per-session status the host can poll or watch:
//!
//! ```text
//! Idle -> Running -> Idle            (reply persisted)
//!                 -> Failed -> Idle  (nothing persisted)
//! ```
//!
//! The blocking pipeline runs on Tokio's blocking pool and hands its result
//! back as a value. Only the continuation task on the async side touches
//! status and the message store. At most one generation runs per session.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::error::{CellioError, Result};
use crate::runtime::PipelineHandle;
use crate::session::{next_timestamp, Author, Message, MessageStore, SessionId, StoreError};

#[cfg(test)]
mod tests;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationStatus {
    #[default]
    Idle,
    Running,
    Failed,
}

/// Outcome of one generation cycle
#[derive(Debug, Clone)]
pub enum GenerationEvent {
    Completed {
        session_id: SessionId,
        message: Message,
    },
    Failed {
        session_id: SessionId,
        error: Arc<CellioError>,
    },
}

impl GenerationEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            GenerationEvent::Completed { session_id, .. }
            | GenerationEvent::Failed { session_id, .. } => *session_id,
        }
    }
}

#[derive(Clone)]
pub struct GenerationOrchestrator {
    pipeline: PipelineHandle,
    store: Arc<dyn MessageStore>,
    statuses: Arc<Mutex<HashMap<SessionId, watch::Sender<GenerationStatus>>>>,
    events: broadcast::Sender<GenerationEvent>,
}

impl GenerationOrchestrator {
    pub fn new(pipeline: PipelineHandle, store: Arc<dyn MessageStore>) -> Self {
        if let Err(e) = &pipeline {
            warn!(error = %e, "Orchestrator created with generation disabled");
        }
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            pipeline,
            store,
            statuses: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.pipeline.is_ok()
    }

    /// The artifact error that disabled generation, if any
    pub fn load_error(&self) -> Option<Arc<CellioError>> {
        self.pipeline.as_ref().err().cloned()
    }

    /// Start generating a reply to `trigger` in the background.
    ///
    /// Returns `false` without side effects when generation is disabled or a
    /// generation is already running for this session. Must be called from
    /// within a Tokio runtime.
    pub fn generate(&self, session_id: SessionId, trigger: &Message) -> bool {
        let pipeline = match &self.pipeline {
            Ok(pipeline) => Arc::clone(pipeline),
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Generation disabled");
                return false;
            }
        };

        if !self.try_begin(session_id) {
            debug!(session_id = %session_id, "Generation already running, ignoring request");
            return false;
        }

        let text = trigger.text.clone();
        let trigger_timestamp = trigger.timestamp;
        let this = self.clone();
        tokio::spawn(async move {
            let outcome = tokio::task::spawn_blocking(move || pipeline.run(&text))
                .await
                .unwrap_or_else(|e| Err(CellioError::inference(format!("worker failed: {}", e), 0)));
            this.finish(session_id, trigger_timestamp, outcome).await;
        });
        true
    }

    pub fn status(&self, session_id: SessionId) -> GenerationStatus {
        self.statuses
            .lock()
            .get(&session_id)
            .map(|tx| *tx.borrow())
            .unwrap_or_default()
    }

    /// Observe status changes for one session
    pub fn watch_status(&self, session_id: SessionId) -> watch::Receiver<GenerationStatus> {
        self.statuses
            .lock()
            .entry(session_id)
            .or_insert_with(|| watch::channel(GenerationStatus::Idle).0)
            .subscribe()
    }

    /// Completion and failure events for every session
    pub fn subscribe(&self) -> broadcast::Receiver<GenerationEvent> {
        self.events.subscribe()
    }

    /// Drop bookkeeping for a deleted session. A generation still in flight
    /// completes and its reply is discarded by the store.
    pub fn forget(&self, session_id: SessionId) {
        let mut statuses = self.statuses.lock();
        let running = statuses
            .get(&session_id)
            .is_some_and(|tx| *tx.borrow() == GenerationStatus::Running);
        if !running {
            statuses.remove(&session_id);
        }
    }

    /// Single-flight guard: atomically move Idle -> Running
    fn try_begin(&self, session_id: SessionId) -> bool {
        let mut statuses = self.statuses.lock();
        let status = statuses
            .entry(session_id)
            .or_insert_with(|| watch::channel(GenerationStatus::Idle).0);
        if *status.borrow() == GenerationStatus::Running {
            return false;
        }
        status.send_replace(GenerationStatus::Running);
        true
    }

    fn set_status(&self, session_id: SessionId, status: GenerationStatus) {
        self.statuses
            .lock()
            .entry(session_id)
            .or_insert_with(|| watch::channel(GenerationStatus::Idle).0)
            .send_replace(status);
    }

    async fn finish(
        &self,
        session_id: SessionId,
        trigger_timestamp: DateTime<Utc>,
        outcome: Result<String>,
    ) {
        let text = match outcome {
            Ok(text) => text,
            Err(e) => return self.fail(session_id, e),
        };

        let latest = self
            .store
            .latest_message(session_id)
            .await
            .map(|m| m.timestamp);
        let timestamp = reply_timestamp(trigger_timestamp, latest);

        match self
            .store
            .append(session_id, Author::Assistant, text.clone(), timestamp)
            .await
        {
            Ok(id) => {
                self.set_status(session_id, GenerationStatus::Idle);
                info!(session_id = %session_id, message_id = %id, chars = text.len(), "Reply stored");
                let message = Message {
                    id,
                    text,
                    author: Author::Assistant,
                    timestamp,
                };
                let _ = self.events.send(GenerationEvent::Completed {
                    session_id,
                    message,
                });
            }
            Err(e) => self.fail(session_id, e.into()),
        }
    }

    fn fail(&self, session_id: SessionId, error: CellioError) {
        match &error {
            CellioError::DecodeShape { dims } => {
                error!(session_id = %session_id, ?dims, "Decoder contract violated, generation aborted");
            }
            CellioError::Store(StoreError::SessionNotFound { .. }) => {
                info!(session_id = %session_id, "Session removed during generation, reply dropped");
            }
            CellioError::Store(e) => {
                error!(session_id = %session_id, error = %e, "Failed to store reply");
            }
            CellioError::Inference { .. } => {
                // Logged with input lengths in the pipeline
                debug!(session_id = %session_id, error = %error, "Generation aborted");
            }
            other => {
                warn!(session_id = %session_id, error = %other, "Generation failed");
            }
        }

        self.set_status(session_id, GenerationStatus::Failed);
        self.set_status(session_id, GenerationStatus::Idle);
        let _ = self.events.send(GenerationEvent::Failed {
            session_id,
            error: Arc::new(error),
        });
    }
}

/// A reply always sorts strictly after its trigger and never before the
/// session's latest message.
fn reply_timestamp(trigger: DateTime<Utc>, latest: Option<DateTime<Utc>>) -> DateTime<Utc> {
    next_timestamp(Some(latest.map_or(trigger, |latest| latest.max(trigger))))
}
