//! Typed view of one delivery of the session subtree.

use std::collections::BTreeMap;

use scorepad_rules::Player;
use scorepad_wire::{ControlRecord, SessionRecord, WireError};
use serde_json::Value;

use crate::identity::DeviceId;

/// The session as seen in one snapshot. Every reducer works from this.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub players: Vec<Player>,
    pub host_id: Option<DeviceId>,
    pub clients: BTreeMap<DeviceId, bool>,
    pub points_limit: Option<u32>,
}

impl SessionSnapshot {
    /// Decode a raw store value. `null` is the empty session.
    pub fn decode(value: &Value) -> Result<Self, WireError> {
        let record = SessionRecord::decode(value)?;
        Ok(Self::from(record))
    }

    /// Decode only `hostId` and `clients`, carrying over a roster and points
    /// limit from an earlier snapshot. Used when the roster part of a
    /// delivery is unreadable.
    pub fn decode_control(
        value: &Value,
        players: Vec<Player>,
        points_limit: Option<u32>,
    ) -> Result<Self, WireError> {
        let control = ControlRecord::decode(value)?;
        Ok(Self {
            players,
            host_id: control.host_id.map(DeviceId::new),
            clients: control
                .clients
                .into_iter()
                .map(|(id, presence)| (DeviceId::new(id), presence.online))
                .collect(),
            points_limit,
        })
    }

    pub fn is_online(&self, device: &str) -> bool {
        self.clients
            .iter()
            .any(|(id, &online)| online && id.as_str() == device)
    }

    pub fn online_clients(&self) -> impl Iterator<Item = &DeviceId> {
        self.clients
            .iter()
            .filter(|&(_, &online)| online)
            .map(|(id, _)| id)
    }

    /// The host named by this snapshot, if it is flagged online.
    pub fn online_host(&self) -> Option<&DeviceId> {
        self.host_id
            .as_ref()
            .filter(|host| self.is_online(host.as_str()))
    }
}

impl From<SessionRecord> for SessionSnapshot {
    fn from(record: SessionRecord) -> Self {
        let points_limit = record.points_limit();
        let players = record.roster();
        Self {
            players,
            host_id: record.host_id.map(DeviceId::new),
            clients: record
                .clients
                .into_iter()
                .map(|(id, presence)| (DeviceId::new(id), presence.online))
                .collect(),
            points_limit,
        }
    }
}
