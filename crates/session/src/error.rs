//! Session-level errors.

use scorepad_wire::WireError;

use crate::election::Role;
use crate::lifecycle::CodeError;
use crate::substrate::SubstrateError;

/// Errors surfaced by session operations.
///
/// None of these are fatal. Substrate failures are transient and the caller
/// may drop them; the next snapshot brings the view back in line.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A mutation was attempted by a device that does not hold the host role.
    #[error("only the host may modify the session (local role: {})", .0.as_str())]
    NotHost(Role),

    #[error("store unavailable: {0}")]
    Substrate(#[from] SubstrateError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Code(#[from] CodeError),
}
