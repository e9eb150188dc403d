//! Scorepad Session Core
//!
//! Keeps every device of one game session looking at the same scoreboard.
//! It owns:
//! - Device identity (generated once, persisted)
//! - Presence in the session's `clients` map
//! - Host election by compare-and-set on `hostId`
//! - Single-writer replication of the roster and points limit
//! - Session creation and joining
//!
//! # Architecture
//!
//! The core is synchronous and performs no I/O of its own. Everything shared
//! goes through a [`Substrate`]; [`MemoryStore`] is an in-process one. Each
//! delivery of the session subtree becomes a [`SessionSnapshot`], and
//! [`SessionCore::pump`] folds snapshots through the election and rules
//! reducers, reporting what changed as [`SessionEvent`]s.

#![deny(unsafe_code)]

pub mod election;
pub mod error;
pub mod identity;
pub mod lifecycle;
pub mod memory;
pub mod presence;
pub mod replicator;
pub mod snapshot;
pub mod substrate;

use log::{debug, info, warn};
use scorepad_history::build_archive;
use scorepad_rules::{Outcome, Player, PlayerId, Score, Scoreboard};
use scorepad_wire::{GameArchive, SessionPaths, StorePath};

pub use election::{HostElection, Role};
pub use error::SessionError;
pub use identity::{
    DEVICE_ID_LEN, DeviceId, FileIdentityStore, IdentityProvider, IdentityStore,
    MemoryIdentityStore,
};
pub use lifecycle::{CodeError, SESSION_CODE_LEN, SessionCode, create_session, join_session};
pub use memory::{MemoryConnection, MemoryStore};
pub use presence::PresenceTracker;
pub use replicator::{MutationOutcome, Replicator};
pub use scorepad_rules::MAX_PLAYERS;
pub use scorepad_wire::GAMES_ROOT;
pub use snapshot::SessionSnapshot;
pub use substrate::{StoreValue, Subscription, Substrate, SubstrateError, TxOutcome};

// ============================================================================
// Configuration
// ============================================================================

/// Length of a generated player id.
pub const PLAYER_ID_LEN: usize = 13;

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Store root under which sessions live.
    pub games_root: String,
    /// Roster cap. Clamped to [`MAX_PLAYERS`].
    pub max_players: usize,
    /// Seed for player ids and session codes. `None` seeds from the system.
    pub seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            games_root: GAMES_ROOT.to_string(),
            max_players: MAX_PLAYERS,
            seed: None,
        }
    }
}

impl SessionConfig {
    fn rng(&self) -> fastrand::Rng {
        self.seed.map_or_else(fastrand::Rng::new, fastrand::Rng::with_seed)
    }
}

// ============================================================================
// Events
// ============================================================================

/// What changed while folding snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// This device's role changed.
    RoleChanged { from: Role, to: Role },
    /// The scoreboard differs from the previous snapshot.
    RosterUpdated,
    /// A roster written by this device came back in a snapshot.
    WriteConfirmed,
    /// The game went from in progress to won.
    GameWon {
        player_id: PlayerId,
        name: String,
        score: Score,
    },
    /// The roster part of a delivery could not be decoded. The last good
    /// roster is kept; host and presence are still folded when readable.
    SnapshotRejected(String),
}

// ============================================================================
// Session Core
// ============================================================================

/// One device bound to one session.
pub struct SessionCore<S: Substrate> {
    config: SessionConfig,
    substrate: S,
    device: DeviceId,
    code: SessionCode,
    paths: SessionPaths,
    connection_feed: Subscription,
    session_feed: Subscription,
    presence: PresenceTracker,
    election: HostElection,
    replicator: Replicator,
    scoreboard: Scoreboard,
    rng: fastrand::Rng,
}

impl<S: Substrate> SessionCore<S> {
    /// Bind `device` to the session named by `code`.
    ///
    /// Nothing is folded until the first [`Self::pump`].
    pub fn open(
        substrate: S,
        device: DeviceId,
        code: SessionCode,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let rng = config.rng();
        Self::bind(substrate, device, code, config, rng)
    }

    /// Create a fresh session hosted by `device` and open it.
    ///
    /// The generator that drew the session code goes on to draw player ids.
    pub fn create(
        substrate: S,
        device: DeviceId,
        points_limit: Option<u32>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let rng = config.rng();
        let code = create_session(&substrate, &config.games_root, &device, points_limit, &rng)?;
        Self::bind(substrate, device, code, config, rng)
    }

    fn bind(
        substrate: S,
        device: DeviceId,
        code: SessionCode,
        config: SessionConfig,
        rng: fastrand::Rng,
    ) -> Result<Self, SessionError> {
        let paths = SessionPaths::new(&config.games_root, code.as_str());
        let connection_feed = substrate.subscribe(&StorePath::connected())?;
        let session_feed = substrate.subscribe(paths.session())?;
        info!("{device}: opened session {code}");

        Ok(Self {
            presence: PresenceTracker::new(&paths, &device),
            election: HostElection::new(device.clone(), paths.host_id()),
            replicator: Replicator::new(paths.clone(), config.max_players),
            scoreboard: Scoreboard::empty(),
            config,
            substrate,
            device,
            code,
            paths,
            connection_feed,
            session_feed,
            rng,
        })
    }

    pub fn role(&self) -> Role {
        self.election.role()
    }

    pub fn is_host(&self) -> bool {
        self.role() == Role::Host
    }

    pub fn scoreboard(&self) -> &Scoreboard {
        &self.scoreboard
    }

    pub fn players(&self) -> &[Player] {
        self.replicator.players()
    }

    pub fn points_limit(&self) -> Option<u32> {
        self.replicator.points_limit()
    }

    pub fn code(&self) -> &SessionCode {
        &self.code
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn substrate(&self) -> &S {
        &self.substrate
    }

    /// Whether the last connection flag reported connected.
    pub fn is_connected(&self) -> bool {
        self.presence.is_connected()
    }

    /// Drain both feeds until neither has anything queued.
    ///
    /// Connection changes are handled first so presence is announced before
    /// the election looks at a snapshot. Only the newest queued session value
    /// is folded; earlier ones are already superseded.
    pub fn pump(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        loop {
            let mut progressed = false;

            while let Some(flag) = self.connection_feed.try_next() {
                self.presence.observe(&self.substrate, &flag);
                progressed = true;
            }

            let mut latest = None;
            while let Some(value) = self.session_feed.try_next() {
                latest = Some(value);
            }
            if let Some(value) = latest {
                self.fold(&value, &mut events);
                progressed = true;
            }

            if !progressed {
                return events;
            }
        }
    }

    fn fold(&mut self, value: &StoreValue, events: &mut Vec<SessionEvent>) {
        let snapshot = match SessionSnapshot::decode(value) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!("{}: rejected snapshot of {}: {err}", self.device, self.code);
                events.push(SessionEvent::SnapshotRejected(err.to_string()));
                self.fold_control(value, events);
                return;
            }
        };
        debug!(
            "{}: snapshot of {} ({} players, host {:?})",
            self.device,
            self.code,
            snapshot.players.len(),
            snapshot.host_id
        );

        self.elect(&snapshot, events);

        let confirmed = self.replicator.observe(&snapshot);
        let scoreboard = Scoreboard::derive(&snapshot.players, snapshot.points_limit);
        if scoreboard != self.scoreboard {
            let was_won = self.scoreboard.outcome.is_won();
            self.scoreboard = scoreboard;
            events.push(SessionEvent::RosterUpdated);

            if let Outcome::Won {
                player_id,
                name,
                score,
            } = &self.scoreboard.outcome
            {
                if !was_won {
                    info!("{}: {name} won session {}", self.device, self.code);
                    events.push(SessionEvent::GameWon {
                        player_id: player_id.clone(),
                        name: name.clone(),
                        score: *score,
                    });
                }
            }
        }
        if confirmed {
            events.push(SessionEvent::WriteConfirmed);
        }
    }

    /// Keep the election running on a delivery whose roster is unreadable.
    /// The last good roster stays in place until a valid one arrives.
    fn fold_control(&mut self, value: &StoreValue, events: &mut Vec<SessionEvent>) {
        let players = self.replicator.players().to_vec();
        let points_limit = self.replicator.points_limit();
        match SessionSnapshot::decode_control(value, players, points_limit) {
            Ok(snapshot) => self.elect(&snapshot, events),
            Err(err) => warn!("{}: host and presence unreadable: {err}", self.device),
        }
    }

    fn elect(&mut self, snapshot: &SessionSnapshot, events: &mut Vec<SessionEvent>) {
        let from = self.election.role();
        let to = self.election.on_snapshot(&self.substrate, snapshot);
        if from != to {
            events.push(SessionEvent::RoleChanged { from, to });
        }
    }

    // ------------------------------------------------------------------------
    // Mutations (host only)
    // ------------------------------------------------------------------------

    /// Add a player with a fresh id.
    pub fn add_player(&mut self, name: &str) -> Result<MutationOutcome, SessionError> {
        let id = identity::random_token(&self.rng, PLAYER_ID_LEN);
        let role = self.role();
        self.replicator.add_player(&self.substrate, role, id, name)
    }

    pub fn remove_player(&mut self, id: &str) -> Result<MutationOutcome, SessionError> {
        let role = self.role();
        self.replicator.remove_player(&self.substrate, role, id)
    }

    pub fn add_score(&mut self, id: &str, input: &str) -> Result<MutationOutcome, SessionError> {
        let role = self.role();
        self.replicator.add_score(&self.substrate, role, id, input)
    }

    pub fn edit_player(
        &mut self,
        id: &str,
        name: &str,
        score_input: &str,
    ) -> Result<MutationOutcome, SessionError> {
        let role = self.role();
        self.replicator
            .edit_player(&self.substrate, role, id, name, score_input)
    }

    pub fn set_points_limit(
        &mut self,
        points_limit: Option<u32>,
    ) -> Result<MutationOutcome, SessionError> {
        let role = self.role();
        self.replicator
            .set_points_limit(&self.substrate, role, points_limit)
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Leave the current session and bind to `code`.
    ///
    /// Both subscriptions are replaced, so nothing from the old session is
    /// delivered afterwards. The deferred offline flag armed in the old
    /// session stays registered with the store.
    pub fn switch_session(&mut self, code: SessionCode) -> Result<(), SessionError> {
        if code == self.code {
            return Ok(());
        }
        let paths = SessionPaths::new(&self.config.games_root, code.as_str());
        let connection_feed = self.substrate.subscribe(&StorePath::connected())?;
        let session_feed = self.substrate.subscribe(paths.session())?;
        info!("{}: switching {} -> {code}", self.device, self.code);

        self.connection_feed = connection_feed;
        self.session_feed = session_feed;
        self.presence = PresenceTracker::new(&paths, &self.device);
        self.election = HostElection::new(self.device.clone(), paths.host_id());
        self.replicator = Replicator::new(paths.clone(), self.config.max_players);
        self.scoreboard = Scoreboard::empty();
        self.paths = paths;
        self.code = code;
        Ok(())
    }

    /// Freeze the current roster into a checksummed archive.
    pub fn archive(&self) -> GameArchive {
        build_archive(self.code.as_str(), self.players(), self.points_limit())
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }
}

// ============================================================================
// Tests
// ============================================================================
