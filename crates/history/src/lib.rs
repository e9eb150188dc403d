//! Scorepad History
//!
//! Views of a session over time:
//! - `ScoreChart`: cumulative score per player per round, for the chart dialog
//! - `build_archive` / `verify_archive`: a frozen, checksummed record of a game
//! - `write_archive` / `read_archive`: archive file I/O

#![deny(unsafe_code)]

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use prost::Message;
use scorepad_rules::{self as rules, Colour, Player, PlayerId, Score, colour_for_slot};
use scorepad_wire::{ARCHIVE_FORMAT_VERSION, ArchivedPlayer, GameArchive};
use sha2::{Digest, Sha256};

// ============================================================================
// Score Chart
// ============================================================================

/// Headroom above the highest cumulative score on the y axis.
pub const CHART_HEADROOM: Score = 5;

/// One line on the chart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartSeries {
    pub player_id: PlayerId,
    pub label: String,
    pub colour: Colour,
    /// Running total after each of the player's rounds.
    pub points: Vec<Score>,
}

/// Cumulative scores over rounds for every player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreChart {
    /// `Round 1` .. `Round n` for the longest score list.
    pub labels: Vec<String>,
    pub series: Vec<ChartSeries>,
    /// Upper bound for the y axis; the axis starts at zero.
    pub y_max: Score,
}

impl ScoreChart {
    pub fn from_players(players: &[Player]) -> Self {
        let labels = (1..=rules::max_rounds(players))
            .map(|round| format!("Round {round}"))
            .collect();

        let series: Vec<ChartSeries> = players
            .iter()
            .enumerate()
            .map(|(slot, p)| ChartSeries {
                player_id: p.id.clone(),
                label: p.name.clone(),
                colour: colour_for_slot(slot),
                points: rules::cumulative_scores(&p.scores),
            })
            .collect();

        let highest = series
            .iter()
            .flat_map(|s| s.points.iter().copied())
            .fold(0, Score::max);

        Self {
            labels,
            series,
            y_max: highest + CHART_HEADROOM,
        }
    }
}

// ============================================================================
// Archive
// ============================================================================

/// SHA-256 over the archive encoded with an empty checksum field.
pub fn archive_checksum(archive: &GameArchive) -> String {
    let mut unsigned = archive.clone();
    unsigned.checksum.clear();
    format!("{:x}", Sha256::digest(unsigned.encode_to_vec()))
}

/// Freeze the current roster into an archive.
pub fn build_archive(
    session_code: &str,
    players: &[Player],
    points_limit: Option<u32>,
) -> GameArchive {
    let winner_id = match rules::outcome(players, points_limit) {
        rules::Outcome::Won { player_id, .. } => Some(player_id),
        rules::Outcome::InProgress => None,
    };

    let mut archive = GameArchive {
        format_version: ARCHIVE_FORMAT_VERSION,
        session_code: session_code.to_string(),
        points_limit,
        players: players.iter().map(ArchivedPlayer::from).collect(),
        rounds: u32::try_from(rules::min_rounds(players)).unwrap_or(u32::MAX),
        winner_id,
        checksum: String::new(),
    };
    archive.checksum = archive_checksum(&archive);
    archive
}

/// Archive verification error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("unsupported archive format version {0}")]
    UnsupportedVersion(u32),

    #[error("archive checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("round count mismatch: recorded {recorded}, recomputed {actual}")]
    RoundsMismatch { recorded: u32, actual: u32 },

    #[error("winner mismatch: recorded {recorded:?}, recomputed {actual:?}")]
    WinnerMismatch {
        recorded: Option<String>,
        actual: Option<String>,
    },
}

/// Check an archive is intact and its recorded outcome follows from its
/// scores under the current rules.
pub fn verify_archive(archive: &GameArchive) -> Result<(), VerifyError> {
    if archive.format_version != ARCHIVE_FORMAT_VERSION {
        return Err(VerifyError::UnsupportedVersion(archive.format_version));
    }

    let actual = archive_checksum(archive);
    if actual != archive.checksum {
        return Err(VerifyError::ChecksumMismatch {
            expected: archive.checksum.clone(),
            actual,
        });
    }

    let players: Vec<Player> = archive.players.iter().cloned().map(Player::from).collect();

    let rounds = u32::try_from(rules::min_rounds(&players)).unwrap_or(u32::MAX);
    if rounds != archive.rounds {
        return Err(VerifyError::RoundsMismatch {
            recorded: archive.rounds,
            actual: rounds,
        });
    }

    let winner = match rules::outcome(&players, archive.points_limit) {
        rules::Outcome::Won { player_id, .. } => Some(player_id),
        rules::Outcome::InProgress => None,
    };
    if winner != archive.winner_id {
        return Err(VerifyError::WinnerMismatch {
            recorded: archive.winner_id.clone(),
            actual: winner,
        });
    }

    Ok(())
}

// ============================================================================
// Archive I/O
// ============================================================================

/// Save a finished game.
///
/// A saved game is never replaced: if `path` already holds a file it is
/// left untouched and the error kind is `AlreadyExists`.
pub fn write_archive(archive: &GameArchive, path: &Path) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(&archive.encode_to_vec())?;
    file.sync_all()
}

/// Load a saved game.
///
/// Bytes that are not an archive at all are `InvalidData`. Whether a
/// decoded archive is intact is a separate question for [`verify_archive`].
pub fn read_archive(path: &Path) -> io::Result<GameArchive> {
    let bytes = fs::read(path)?;
    GameArchive::decode(bytes.as_slice())
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

// ============================================================================
// Tests
// ============================================================================
