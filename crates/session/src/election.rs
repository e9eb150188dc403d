//! Host election over the shared `hostId` value.
//!
//! Election piggybacks on the session subscription: every snapshot is
//! re-evaluated, not only those that change `hostId`. While the named host is
//! online nothing is written. Otherwise the device tries to claim the role
//! with a single compare-and-set transaction.
//!
//! There is no priority among candidates. Concurrent claims are ordered by
//! the store; a claim whose compare runs after another device has already
//! installed an online host keeps that host.

use std::collections::BTreeMap;

use log::{debug, info, warn};
use scorepad_wire::StorePath;
use serde_json::Value;

use crate::identity::DeviceId;
use crate::snapshot::SessionSnapshot;
use crate::substrate::{StoreValue, Substrate, TxOutcome};

/// Locally observed role of this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    NotHost,
    ElectionPending,
    Host,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotHost => "not-host",
            Self::ElectionPending => "election-pending",
            Self::Host => "host",
        }
    }
}

/// What a snapshot asks this device to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionStep {
    /// A host is named and online; adopt this role without writing.
    Settled(Role),
    /// No host, or the named host is offline; attempt a claim.
    Claim,
}

/// Pure election reducer.
pub fn evaluate(snapshot: &SessionSnapshot, me: &DeviceId) -> ElectionStep {
    match snapshot.online_host() {
        Some(host) if host == me => ElectionStep::Settled(Role::Host),
        Some(_) => ElectionStep::Settled(Role::NotHost),
        None => ElectionStep::Claim,
    }
}

/// Update function for the claim transaction.
///
/// Keeps the current value when it names a client that `clients` shows
/// online, otherwise installs `me`. `clients` is the presence map of the
/// snapshot that triggered the claim.
pub fn claim<'a>(
    clients: &'a BTreeMap<DeviceId, bool>,
    me: &'a DeviceId,
) -> impl FnMut(&StoreValue) -> Option<StoreValue> + 'a {
    move |current| {
        let current_online = current.as_str().is_some_and(|host| {
            clients
                .iter()
                .any(|(id, &online)| online && id.as_str() == host)
        });
        if current_online {
            Some(current.clone())
        } else {
            Some(Value::String(me.as_str().to_string()))
        }
    }
}

/// Role after a claim transaction resolved.
pub fn resolve(outcome: &TxOutcome, me: &DeviceId) -> Role {
    let is_me = outcome.value.as_str() == Some(me.as_str());
    match (outcome.committed, is_me) {
        (true, true) => Role::Host,
        (_, false) => Role::NotHost,
        (false, true) => Role::ElectionPending,
    }
}

/// Election state for one device in one session.
#[derive(Debug, Clone)]
pub struct HostElection {
    me: DeviceId,
    host_path: StorePath,
    role: Role,
}

impl HostElection {
    pub fn new(me: DeviceId, host_path: StorePath) -> Self {
        Self {
            me,
            host_path,
            role: Role::NotHost,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn device(&self) -> &DeviceId {
        &self.me
    }

    /// Fold one snapshot into the local role, claiming if required.
    ///
    /// A failed transaction restores the role held before the attempt; the
    /// next snapshot retries.
    pub fn on_snapshot<S: Substrate + ?Sized>(
        &mut self,
        substrate: &S,
        snapshot: &SessionSnapshot,
    ) -> Role {
        let previous = self.role;
        match evaluate(snapshot, &self.me) {
            ElectionStep::Settled(role) => self.role = role,
            ElectionStep::Claim => {
                self.role = Role::ElectionPending;
                debug!(
                    "{}: host {:?} absent or offline, claiming",
                    self.me, snapshot.host_id
                );
                let mut update = claim(&snapshot.clients, &self.me);
                match substrate.transact(&self.host_path, &mut update) {
                    Ok(outcome) => self.role = resolve(&outcome, &self.me),
                    Err(err) => {
                        warn!("{}: host claim failed: {err}", self.me);
                        self.role = previous;
                    }
                }
            }
        }

        if self.role != previous {
            info!(
                "{}: role {} -> {}",
                self.me,
                previous.as_str(),
                self.role.as_str()
            );
        }
        self.role
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use serde_json::json;

    fn snapshot(value: Value) -> SessionSnapshot {
        SessionSnapshot::decode(&value).unwrap()
    }

    fn me() -> DeviceId {
        DeviceId::new("me")
    }

    #[test]
    fn test_evaluate_online_host_is_settled() {
        let s = snapshot(json!({
            "hostId": "other",
            "clients": {"other": {"online": true}, "me": {"online": true}}
        }));
        assert_eq!(evaluate(&s, &me()), ElectionStep::Settled(Role::NotHost));

        let s = snapshot(json!({
            "hostId": "me",
            "clients": {"me": {"online": true}}
        }));
        assert_eq!(evaluate(&s, &me()), ElectionStep::Settled(Role::Host));
    }

    #[test]
    fn test_evaluate_missing_or_offline_host_claims() {
        assert_eq!(evaluate(&snapshot(json!(null)), &me()), ElectionStep::Claim);
        let s = snapshot(json!({
            "hostId": "other",
            "clients": {"other": {"online": false}}
        }));
        assert_eq!(evaluate(&s, &me()), ElectionStep::Claim);
    }

    #[test]
    fn test_claim_replaces_absent_or_offline() {
        let me = me();
        let clients = BTreeMap::from([(DeviceId::new("other"), false)]);
        let mut update = claim(&clients, &me);
        assert_eq!(update(&Value::Null), Some(json!("me")));
        assert_eq!(update(&json!("other")), Some(json!("me")));
        assert_eq!(update(&json!("stranger")), Some(json!("me")));
    }

    #[test]
    fn test_claim_keeps_online_host() {
        let me = me();
        let clients = BTreeMap::from([(DeviceId::new("other"), true)]);
        let mut update = claim(&clients, &me);
        assert_eq!(update(&json!("other")), Some(json!("other")));
    }

    #[test]
    fn test_resolve() {
        let me = me();
        let won = TxOutcome {
            committed: true,
            value: json!("me"),
        };
        let lost = TxOutcome {
            committed: true,
            value: json!("other"),
        };
        let aborted = TxOutcome {
            committed: false,
            value: json!("me"),
        };
        assert_eq!(resolve(&won, &me), Role::Host);
        assert_eq!(resolve(&lost, &me), Role::NotHost);
        assert_eq!(resolve(&aborted, &me), Role::ElectionPending);
    }

    #[test]
    fn test_on_snapshot_claims_empty_session() {
        let store = MemoryStore::new();
        let conn = store.connect().unwrap();
        let host_path = StorePath::parse("games/abcde/hostId");
        let mut election = HostElection::new(me(), host_path.clone());

        let role = election.on_snapshot(&conn, &snapshot(json!(null)));
        assert_eq!(role, Role::Host);
        assert_eq!(store.read(&host_path).unwrap(), json!("me"));
    }

    #[test]
    fn test_on_snapshot_stale_view_loses_to_live_host() {
        let store = MemoryStore::new();
        let conn = store.connect().unwrap();
        let host_path = StorePath::parse("games/abcde/hostId");
        conn.write(&host_path, json!("other")).unwrap();

        // Our snapshot predates the other claim but already shows it online.
        let stale = snapshot(json!({"clients": {"other": {"online": true}}}));
        let mut election = HostElection::new(me(), host_path.clone());
        assert_eq!(election.on_snapshot(&conn, &stale), Role::NotHost);
        assert_eq!(store.read(&host_path).unwrap(), json!("other"));
    }

    #[test]
    fn test_failed_claim_keeps_previous_role() {
        let store = MemoryStore::new();
        let conn = store.connect().unwrap();
        conn.disconnect().unwrap();
        let mut election = HostElection::new(me(), StorePath::parse("games/abcde/hostId"));

        assert_eq!(election.on_snapshot(&conn, &snapshot(json!(null))), Role::NotHost);
    }
}
