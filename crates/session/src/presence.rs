//! Reflects this device's connectivity into the session's `clients` map.
//!
//! Nothing is written when a device leaves. The offline flag is a deferred
//! write the store performs itself once it notices the connection is gone,
//! so presence lags real disconnects by the store's own detection latency.

use log::{debug, warn};
use scorepad_wire::{SessionPaths, StorePath};
use serde_json::Value;

use crate::identity::DeviceId;
use crate::substrate::{Substrate, SubstrateError};

/// Tracks the connection flag and keeps `clients/{device}/online` in step.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    online_path: StorePath,
    connected: bool,
}

impl PresenceTracker {
    pub fn new(paths: &SessionPaths, device: &DeviceId) -> Self {
        Self {
            online_path: paths.client_online(device.as_str()),
            connected: false,
        }
    }

    /// Last connection state reported by the store.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Handle a value from the `.info/connected` feed.
    ///
    /// On every transition to connected, the deferred `online = false` is
    /// registered before `online = true` is written, so there is no window in
    /// which the device is marked online without a cleanup armed.
    pub fn on_connection_change<S: Substrate + ?Sized>(
        &mut self,
        substrate: &S,
        flag: &Value,
    ) -> Result<(), SubstrateError> {
        let connected = flag.as_bool().unwrap_or(false);
        self.connected = connected;
        if !connected {
            debug!("connection lost; presence left to deferred write");
            return Ok(());
        }

        substrate.write_on_disconnect(&self.online_path, Value::Bool(false))?;
        substrate.write(&self.online_path, Value::Bool(true))?;
        debug!("presence announced at {}", self.online_path);
        Ok(())
    }

    /// Same as [`Self::on_connection_change`], logging instead of returning
    /// failures. The next connection transition retries.
    pub fn observe<S: Substrate + ?Sized>(&mut self, substrate: &S, flag: &Value) {
        if let Err(err) = self.on_connection_change(substrate, flag) {
            warn!("failed to announce presence: {err}");
        }
    }
}
