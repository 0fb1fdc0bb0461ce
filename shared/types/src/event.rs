//! Lifecycle events published to the notifier sink

use chrono::{DateTime, Utc};
use ethers_core::types::Address;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    WatchStarted,
    TriggerHit,
    /// A swap attempt was signed and accepted by the node
    SwapSubmitted,
    /// A swap attempt failed and will be escalated or abandoned
    AttemptFailed,
    SwapConfirmed,
    SwapFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub pair: Address,
    pub target: String,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(kind: EventKind, pair: Address, target: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            pair,
            target: target.into(),
            details: details.into(),
            timestamp: Utc::now(),
        }
    }
}
