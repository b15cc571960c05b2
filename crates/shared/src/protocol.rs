use serde::{Deserialize, Serialize};

use crate::domain::{CarId, CarRecord};

/// Push notifications from the discovery backend. Delivery is at-most-once
/// and unacknowledged; consumers must tolerate duplicates and reordering
/// across kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum DiscoveryEvent {
    CarDiscovered { car: CarRecord },
    CarUpdated { car: CarRecord },
    CarOffline { car: CarRecord },
    CarRemoved { car_id: CarId },
    Status { is_running: bool, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryEventKind {
    CarDiscovered,
    CarUpdated,
    CarOffline,
    CarRemoved,
    Status,
}

impl DiscoveryEventKind {
    pub const ALL: [DiscoveryEventKind; 5] = [
        DiscoveryEventKind::CarDiscovered,
        DiscoveryEventKind::CarUpdated,
        DiscoveryEventKind::CarOffline,
        DiscoveryEventKind::CarRemoved,
        DiscoveryEventKind::Status,
    ];
}

impl DiscoveryEvent {
    pub fn kind(&self) -> DiscoveryEventKind {
        match self {
            DiscoveryEvent::CarDiscovered { .. } => DiscoveryEventKind::CarDiscovered,
            DiscoveryEvent::CarUpdated { .. } => DiscoveryEventKind::CarUpdated,
            DiscoveryEvent::CarOffline { .. } => DiscoveryEventKind::CarOffline,
            DiscoveryEvent::CarRemoved { .. } => DiscoveryEventKind::CarRemoved,
            DiscoveryEvent::Status { .. } => DiscoveryEventKind::Status,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryStatus {
    pub is_running: bool,
    pub message: String,
}
