use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CarId(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Connecting,
    #[default]
    Disconnected,
}

/// One discoverable car as reported by the backend. Only `id` is a unique
/// key; `number` is the racing number shown to the operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarRecord {
    pub id: CarId,
    pub number: u32,
    pub driver: String,
    pub team: String,
    pub ip: String,
    pub port: u16,
    pub version: String,
    pub connection_status: ConnectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}
