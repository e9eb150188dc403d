//! Single-writer replication of the roster and points limit.
//!
//! Only the host writes. Every device, the host included, takes its roster
//! from the latest snapshot; the host never mutates its own copy in place.
//! Each mutation derives the next list from the last snapshot and overwrites
//! `players` as a whole, so readers never see a half-applied change.

use log::{debug, warn};
use scorepad_rules::{self as rules, Player, PlayerId, roster_digest};
use scorepad_wire::{SessionPaths, players_value, points_limit_value};

use crate::election::Role;
use crate::error::SessionError;
use crate::snapshot::SessionSnapshot;
use crate::substrate::Substrate;

/// Whether a mutation reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The full value was written.
    Written,
    /// The request changed nothing (full roster, malformed number, unknown
    /// player, ...) and no write was made.
    Ignored,
}

fn ensure_host(role: Role) -> Result<(), SessionError> {
    match role {
        Role::Host => Ok(()),
        other => Err(SessionError::NotHost(other)),
    }
}

/// Last replicated state plus the host-side write path.
#[derive(Debug, Clone)]
pub struct Replicator {
    paths: SessionPaths,
    max_players: usize,
    players: Vec<Player>,
    points_limit: Option<u32>,
    /// Digest of the last roster written by this device and not yet echoed.
    pending: Option<u64>,
}

impl Replicator {
    pub fn new(paths: SessionPaths, max_players: usize) -> Self {
        Self {
            paths,
            max_players: max_players.min(rules::MAX_PLAYERS),
            players: Vec::new(),
            points_limit: None,
            pending: None,
        }
    }

    /// Replace local state with a snapshot. Returns true when the snapshot
    /// carries the roster this device last wrote.
    pub fn observe(&mut self, snapshot: &SessionSnapshot) -> bool {
        self.players = snapshot.players.clone();
        self.points_limit = snapshot.points_limit;

        match self.pending {
            Some(expected) if roster_digest(&self.players) == expected => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn points_limit(&self) -> Option<u32> {
        self.points_limit
    }

    /// A write from this device has not been seen in a snapshot yet.
    pub fn has_pending_write(&self) -> bool {
        self.pending.is_some()
    }

    /// Append a player. A full roster or blank name is ignored.
    pub fn add_player<S: Substrate + ?Sized>(
        &mut self,
        substrate: &S,
        role: Role,
        id: PlayerId,
        name: &str,
    ) -> Result<MutationOutcome, SessionError> {
        ensure_host(role)?;
        if self.players.len() >= self.max_players {
            debug!("roster full ({} players), ignoring add", self.players.len());
            return Ok(MutationOutcome::Ignored);
        }
        match rules::add_player(&self.players, id, name) {
            Some(next) => self.publish(substrate, next),
            None => Ok(MutationOutcome::Ignored),
        }
    }

    pub fn remove_player<S: Substrate + ?Sized>(
        &mut self,
        substrate: &S,
        role: Role,
        id: &str,
    ) -> Result<MutationOutcome, SessionError> {
        ensure_host(role)?;
        let next = rules::remove_player(&self.players, id);
        if next.len() == self.players.len() {
            return Ok(MutationOutcome::Ignored);
        }
        self.publish(substrate, next)
    }

    /// Record a round typed as text. Non-numeric input is ignored.
    pub fn add_score<S: Substrate + ?Sized>(
        &mut self,
        substrate: &S,
        role: Role,
        id: &str,
        input: &str,
    ) -> Result<MutationOutcome, SessionError> {
        ensure_host(role)?;
        let Some(score) = rules::parse_score(input) else {
            debug!("ignoring non-numeric score {input:?}");
            return Ok(MutationOutcome::Ignored);
        };
        match rules::append_score(&self.players, id, score) {
            Some(next) => self.publish(substrate, next),
            None => Ok(MutationOutcome::Ignored),
        }
    }

    /// Rename a player and/or replace their last round.
    ///
    /// Blank or non-numeric `score_input` leaves the scores alone; the name
    /// may still change.
    pub fn edit_player<S: Substrate + ?Sized>(
        &mut self,
        substrate: &S,
        role: Role,
        id: &str,
        name: &str,
        score_input: &str,
    ) -> Result<MutationOutcome, SessionError> {
        ensure_host(role)?;
        let last_score = rules::parse_score(score_input);
        match rules::edit_player(&self.players, id, name, last_score) {
            Some(next) => self.publish(substrate, next),
            None => Ok(MutationOutcome::Ignored),
        }
    }

    /// Set or clear the points limit. Zero clears it.
    pub fn set_points_limit<S: Substrate + ?Sized>(
        &mut self,
        substrate: &S,
        role: Role,
        points_limit: Option<u32>,
    ) -> Result<MutationOutcome, SessionError> {
        ensure_host(role)?;
        let points_limit = points_limit.filter(|&n| n > 0);
        if points_limit == self.points_limit {
            return Ok(MutationOutcome::Ignored);
        }
        substrate.write(&self.paths.points_limit(), points_limit_value(points_limit))?;
        Ok(MutationOutcome::Written)
    }

    fn publish<S: Substrate + ?Sized>(
        &mut self,
        substrate: &S,
        next: Vec<Player>,
    ) -> Result<MutationOutcome, SessionError> {
        let value = players_value(&next)?;
        if let Err(err) = substrate.write(&self.paths.players(), value) {
            warn!("roster write failed: {err}");
            return Err(err.into());
        }
        self.pending = Some(roster_digest(&next));
        Ok(MutationOutcome::Written)
    }
}

// ============================================================================
// Tests
// ============================================================================
