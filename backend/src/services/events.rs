//! Farm event bus
//!
//! Committed transitions are announced on a broadcast channel; the SSE
//! endpoint relays them to subscribers of the same farm. Events are only
//! published after the store accepted the commit.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::store::Commit;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FarmEventKind {
    TrayCreated,
    TrayMoved,
    TraySplit,
    TrayReady,
    TrayHarvested,
    TrayDiscarded,
    TrayUpdated,
    SystemCreated,
    SystemUpdated,
    SystemDeleted,
    MovementsEvaluated,
}

#[derive(Debug, Clone, Serialize)]
pub struct FarmEvent {
    pub farm_id: Uuid,
    pub kind: FarmEventKind,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tray_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub system_ids: Vec<Uuid>,
    pub at: DateTime<Utc>,
}

impl FarmEvent {
    pub fn new(farm_id: Uuid, kind: FarmEventKind) -> Self {
        Self {
            farm_id,
            kind,
            tray_ids: Vec::new(),
            system_ids: Vec::new(),
            at: Utc::now(),
        }
    }

    /// Event naming everything a commit touched
    pub fn for_commit(farm_id: Uuid, kind: FarmEventKind, commit: &Commit) -> Self {
        Self {
            tray_ids: commit
                .updated_trays
                .iter()
                .chain(&commit.created_trays)
                .map(|t| t.id.clone())
                .collect(),
            system_ids: commit.systems.iter().map(|s| s.id).collect(),
            ..Self::new(farm_id, kind)
        }
    }

    pub fn with_system(mut self, system_id: Uuid) -> Self {
        self.system_ids.push(system_id);
        self
    }

    pub fn with_tray(mut self, tray_id: &str) -> Self {
        self.tray_ids.push(tray_id.to_string());
        self
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FarmEvent>,
}

impl EventBus {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: FarmEvent) {
        // No subscribers is fine; nobody is watching
        if self.tx.send(event).is_err() {
            tracing::trace!("No event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FarmEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let farm = Uuid::new_v4();
        bus.publish(FarmEvent::new(farm, FarmEventKind::TrayMoved).with_tray("K071725-MG-ARUG-1"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.farm_id, farm);
        assert_eq!(event.kind, FarmEventKind::TrayMoved);
        assert_eq!(event.tray_ids, vec!["K071725-MG-ARUG-1"]);
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new(1);
        bus.publish(FarmEvent::new(Uuid::nil(), FarmEventKind::SystemCreated));
    }
}
