//! Activity bulletin sinks.
//!
//! The core publishes an [`ActivityEvent`] for every session, claim, intent
//! and manifest state change. Publishing is fire-and-forget; a sink must never
//! fail the operation that produced the event.

use std::sync::{Arc, Mutex};

use crate::models::{ActivityEvent, ActivityKind};

pub trait Bulletin: Send + Sync {
    fn publish(&self, event: ActivityEvent);
}

/// Emits every event as a structured `tracing` record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingBulletin;

impl Bulletin for TracingBulletin {
    fn publish(&self, event: ActivityEvent) {
        match event.kind {
            ActivityKind::ClaimConflict => tracing::info!(
                target: "rocket_warden::bulletin",
                kind = event.kind.as_str(),
                entity = %event.entity_id,
                project = %event.project,
                at = %event.at.to_rfc3339(),
                detail = %event.detail,
                "claim conflict"
            ),
            _ => tracing::debug!(
                target: "rocket_warden::bulletin",
                kind = event.kind.as_str(),
                entity = %event.entity_id,
                project = %event.project,
                at = %event.at.to_rfc3339(),
                detail = %event.detail,
                "activity"
            ),
        }
    }
}

/// Keeps every published event in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryBulletin {
    events: Arc<Mutex<Vec<ActivityEvent>>>,
}

impl MemoryBulletin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ActivityEvent> {
        self.events.lock().expect("bulletin lock poisoned").clone()
    }

    pub fn kinds(&self) -> Vec<ActivityKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }

    pub fn count(&self, kind: ActivityKind) -> usize {
        self.events().iter().filter(|e| e.kind == kind).count()
    }
}

impl Bulletin for MemoryBulletin {
    fn publish(&self, event: ActivityEvent) {
        self.events
            .lock()
            .expect("bulletin lock poisoned")
            .push(event);
    }
}
