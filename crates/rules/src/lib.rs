//! Scorepad Rules Engine
//!
//! Pure functions over replicated session state. Every device re-runs these on
//! each incoming snapshot, so they must agree bit-for-bit across devices.
//!
//! # Constraints
//!
//! This crate MUST NOT:
//! - Perform I/O operations (file, network, etc.)
//! - Read wall-clock time
//! - Use randomness
//!
//! Writes to shared state are owned by the session crate; the roster reducers
//! here only compute the next list, they never publish it.

#![deny(unsafe_code)]

// ============================================================================
// Type Aliases
// ============================================================================

/// Opaque identifier of a scoring entity. Distinct from a device identity:
/// one device may enter scores for many players.
pub type PlayerId = String;

/// Points recorded for a single round. Rounds may be negative.
pub type Score = i64;

// ============================================================================
// Core Types
// ============================================================================

/// A named scoring entity and its per-round scores, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub scores: Vec<Score>,
}

impl Player {
    /// Create a player with no rounds recorded.
    pub fn new(id: impl Into<PlayerId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            scores: Vec::new(),
        }
    }

    /// Total of all recorded rounds.
    pub fn total(&self) -> Score {
        score(self)
    }

    /// Number of rounds recorded for this player.
    pub fn rounds(&self) -> usize {
        self.scores.len()
    }
}

/// Display colour bound to a roster slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Colour {
    pub name: &'static str,
    pub hex: &'static str,
}

/// Roster slot colours, in assignment order.
///
/// The player cap is the length of this table.
pub const PALETTE: [Colour; 12] = [
    Colour { name: "pink", hex: "#ec4899" },
    Colour { name: "purple", hex: "#a78bfa" },
    Colour { name: "blue", hex: "#3b82f6" },
    Colour { name: "indigo", hex: "#6366f1" },
    Colour { name: "sky", hex: "#0ea5e9" },
    Colour { name: "cyan", hex: "#06b6d4" },
    Colour { name: "teal", hex: "#14b8a6" },
    Colour { name: "rose", hex: "#f43f5e" },
    Colour { name: "fuchsia", hex: "#d946ef" },
    Colour { name: "violet", hex: "#8b5cf6" },
    Colour { name: "orange", hex: "#f97316" },
    Colour { name: "lime", hex: "#84cc16" },
];

/// Maximum number of players in a session.
pub const MAX_PLAYERS: usize = PALETTE.len();

/// Colour for the player at roster position `slot`.
pub fn colour_for_slot(slot: usize) -> Colour {
    PALETTE[slot % PALETTE.len()]
}

// ============================================================================
// Derived Facts
// ============================================================================

/// Sum of a player's rounds. An empty score list totals zero.
pub fn score(player: &Player) -> Score {
    player.scores.iter().sum()
}

/// Player with the highest total.
///
/// Ties resolve to the first player in roster order: a later player only
/// replaces the current best when strictly greater.
pub fn leader(players: &[Player]) -> Option<&Player> {
    let mut best: Option<&Player> = None;
    for player in players {
        match best {
            Some(current) if score(player) <= score(current) => {}
            _ => best = Some(player),
        }
    }
    best
}

/// Whether `player_id` is the current leader.
pub fn is_leader(player_id: &str, players: &[Player]) -> bool {
    leader(players).is_some_and(|p| p.id == player_id)
}

/// Fewest rounds recorded by any player; zero for an empty roster.
pub fn min_rounds(players: &[Player]) -> usize {
    players.iter().map(Player::rounds).min().unwrap_or(0)
}

/// Most rounds recorded by any player; zero for an empty roster.
pub fn max_rounds(players: &[Player]) -> usize {
    players.iter().map(Player::rounds).max().unwrap_or(0)
}

/// True when every player has recorded exactly `min_rounds` rounds, i.e. no
/// device is still catching up on the latest round.
pub fn rounds_settled(players: &[Player]) -> bool {
    let min = min_rounds(players);
    players.iter().all(|p| p.rounds() == min)
}

/// State of the win condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    InProgress,
    Won {
        player_id: PlayerId,
        name: String,
        score: Score,
    },
}

impl Outcome {
    pub fn is_won(&self) -> bool {
        matches!(self, Self::Won { .. })
    }
}

/// Evaluate the win condition.
///
/// Any player at or above the limit flips the game to won, but the reported
/// winner is always the overall leader. Nothing is evaluated while round
/// counts differ between players.
pub fn outcome(players: &[Player], points_limit: Option<u32>) -> Outcome {
    let Some(limit) = points_limit else {
        return Outcome::InProgress;
    };
    if players.is_empty() || !rounds_settled(players) {
        return Outcome::InProgress;
    }

    let limit = Score::from(limit);
    if !players.iter().any(|p| score(p) >= limit) {
        return Outcome::InProgress;
    }

    match leader(players) {
        Some(winner) => Outcome::Won {
            player_id: winner.id.clone(),
            name: winner.name.clone(),
            score: score(winner),
        },
        None => Outcome::InProgress,
    }
}

/// Running totals after each round: `[10, 20, -5]` becomes `[10, 30, 25]`.
pub fn cumulative_scores(scores: &[Score]) -> Vec<Score> {
    scores
        .iter()
        .scan(0, |total, &s| {
            *total += s;
            Some(*total)
        })
        .collect()
}

// ============================================================================
// Scoreboard
// ============================================================================

/// One row of the scoreboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Standing {
    pub player_id: PlayerId,
    pub name: String,
    pub total: Score,
    pub rounds: usize,
    pub colour: Colour,
    pub is_leader: bool,
}

/// Everything a device renders, derived from one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scoreboard {
    pub standings: Vec<Standing>,
    pub leader_id: Option<PlayerId>,
    pub min_rounds: usize,
    pub points_limit: Option<u32>,
    pub outcome: Outcome,
}

impl Scoreboard {
    /// Fold a roster into display state. Standings keep roster order.
    pub fn derive(players: &[Player], points_limit: Option<u32>) -> Self {
        let leader_id = leader(players).map(|p| p.id.clone());
        let standings = players
            .iter()
            .enumerate()
            .map(|(slot, p)| Standing {
                player_id: p.id.clone(),
                name: p.name.clone(),
                total: score(p),
                rounds: p.rounds(),
                colour: colour_for_slot(slot),
                is_leader: leader_id.as_deref() == Some(p.id.as_str()),
            })
            .collect();

        Self {
            standings,
            leader_id,
            min_rounds: min_rounds(players),
            points_limit,
            outcome: outcome(players, points_limit),
        }
    }

    /// Empty board for a session with no players.
    pub fn empty() -> Self {
        Self::derive(&[], None)
    }
}

// ============================================================================
// Input Parsing
// ============================================================================

/// Parse a round score typed by a user. Non-numeric input yields `None`.
pub fn parse_score(input: &str) -> Option<Score> {
    input.trim().parse::<Score>().ok()
}

/// Parse a points limit. Blank, zero, negative or malformed means unlimited.
pub fn parse_points_limit(input: &str) -> Option<u32> {
    input.trim().parse::<u32>().ok().filter(|&n| n > 0)
}

// ============================================================================
// Roster Reducers
// ============================================================================
//
// Each reducer returns the complete next roster, or `None` when the request
// changes nothing. Callers publish the returned list as a whole-list write.

/// Append a player. `None` when the roster is full or the name is blank.
pub fn add_player(players: &[Player], id: PlayerId, name: &str) -> Option<Vec<Player>> {
    let name = name.trim();
    if players.len() >= MAX_PLAYERS || name.is_empty() {
        return None;
    }
    let mut next = players.to_vec();
    next.push(Player::new(id, name));
    Some(next)
}

/// Remove every player with `id`.
pub fn remove_player(players: &[Player], id: &str) -> Vec<Player> {
    players.iter().filter(|p| p.id != id).cloned().collect()
}

/// Record a new round for one player. `None` for unknown players.
pub fn append_score(players: &[Player], id: &str, score: Score) -> Option<Vec<Player>> {
    let index = players.iter().position(|p| p.id == id)?;
    let mut next = players.to_vec();
    next[index].scores.push(score);
    Some(next)
}

/// Rename a player and/or overwrite their most recent round.
///
/// A blank name keeps the old one. `last_score` of `None` keeps the scores,
/// as does a player with no rounds yet. `None` when nothing would change.
pub fn edit_player(
    players: &[Player],
    id: &str,
    name: &str,
    last_score: Option<Score>,
) -> Option<Vec<Player>> {
    let index = players.iter().position(|p| p.id == id)?;
    let mut next = players.to_vec();
    let player = &mut next[index];

    let name = name.trim();
    if !name.is_empty() {
        player.name = name.to_string();
    }
    if let (Some(value), Some(last)) = (last_score, player.scores.last_mut()) {
        *last = value;
    }

    if next[index] == players[index] {
        None
    } else {
        Some(next)
    }
}

// ============================================================================
// Roster Digest
// ============================================================================

/// FNV-1a 64-bit offset basis.
const FNV1A_OFFSET_BASIS: u64 = 0xcbf29ce484222325;

/// FNV-1a 64-bit prime.
const FNV1A_PRIME: u64 = 0x100000001b3;

#[derive(Debug, Clone)]
struct Fnv1a64 {
    state: u64,
}

impl Fnv1a64 {
    fn new() -> Self {
        Self {
            state: FNV1A_OFFSET_BASIS,
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= u64::from(byte);
            self.state = self.state.wrapping_mul(FNV1A_PRIME);
        }
    }

    /// Length-prefixed so that ("ab", "c") and ("a", "bc") differ.
    fn update_str(&mut self, value: &str) {
        self.update(&(value.len() as u64).to_le_bytes());
        self.update(value.as_bytes());
    }

    fn finish(self) -> u64 {
        self.state
    }
}

/// Order-sensitive digest of a roster.
///
/// Two rosters hash equal only if they have the same players, in the same
/// order, with the same names and scores.
pub fn roster_digest(players: &[Player]) -> u64 {
    let mut hasher = Fnv1a64::new();
    hasher.update(&(players.len() as u64).to_le_bytes());
    for player in players {
        hasher.update_str(&player.id);
        hasher.update_str(&player.name);
        hasher.update(&(player.scores.len() as u64).to_le_bytes());
        for score in &player.scores {
            hasher.update(&score.to_le_bytes());
        }
    }
    hasher.finish()
}

// ============================================================================
// Tests
// ============================================================================
