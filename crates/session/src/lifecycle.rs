//! Creating and joining sessions.
//!
//! A session has no explicit existence check. Joining any well-formed code
//! yields a session view, empty if nobody has written to it yet; it only
//! materialises in the store when it is created or a host claims it.

use std::fmt;

use log::info;
use scorepad_wire::{SessionPaths, points_limit_value};
use serde_json::Value;

use crate::error::SessionError;
use crate::identity::DeviceId;
use crate::substrate::Substrate;

/// Length of a session code.
pub const SESSION_CODE_LEN: usize = 5;

/// A join code that cannot name a session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodeError {
    #[error("session code must be {len} letters, got {0}", len = SESSION_CODE_LEN)]
    WrongLength(usize),
    #[error("session code may only contain letters a-z, got {0:?}")]
    InvalidCharacter(char),
}

/// Short human-enterable session code: five lowercase ASCII letters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionCode(String);

impl SessionCode {
    /// Normalise user input. Surrounding whitespace is trimmed and letters
    /// are lowercased, so `"ABCXY"` names the same session as `"abcxy"`.
    pub fn parse(input: &str) -> Result<Self, CodeError> {
        let code = input.trim().to_ascii_lowercase();
        if let Some(bad) = code.chars().find(|c| !c.is_ascii_lowercase()) {
            return Err(CodeError::InvalidCharacter(bad));
        }
        if code.len() != SESSION_CODE_LEN {
            return Err(CodeError::WrongLength(code.chars().count()));
        }
        Ok(Self(code))
    }

    /// Random code. Collisions with a live session are not checked.
    pub fn generate(rng: &fastrand::Rng) -> Self {
        Self(
            (0..SESSION_CODE_LEN)
                .map(|_| char::from(b'a' + rng.u8(..26)))
                .collect(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Start a new session under a fresh code with `creator` as host.
///
/// Writes `hostId` and, when given, `pointsLimit`. The creator still has to
/// open the session to announce presence; until then other devices see the
/// host as offline and may take over.
pub fn create_session<S: Substrate + ?Sized>(
    substrate: &S,
    root: &str,
    creator: &DeviceId,
    points_limit: Option<u32>,
    rng: &fastrand::Rng,
) -> Result<SessionCode, SessionError> {
    let code = SessionCode::generate(rng);
    let paths = SessionPaths::new(root, code.as_str());

    substrate.write(&paths.host_id(), Value::String(creator.as_str().to_string()))?;
    let points_limit = points_limit.filter(|&n| n > 0);
    if points_limit.is_some() {
        substrate.write(&paths.points_limit(), points_limit_value(points_limit))?;
    }

    info!("created session {code} hosted by {creator}");
    Ok(code)
}

/// Resolve a typed code to a session. Touches no state.
pub fn join_session(input: &str) -> Result<SessionCode, CodeError> {
    let code = SessionCode::parse(input)?;
    info!("joining session {code}");
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use scorepad_wire::GAMES_ROOT;
    use serde_json::json;

    #[test]
    fn test_join_normalizes_case() {
        assert_eq!(join_session("ABCXY").unwrap().as_str(), "abcxy");
        assert_eq!(join_session("  aBcXy ").unwrap().as_str(), "abcxy");
    }

    #[test]
    fn test_join_rejects_malformed() {
        assert_eq!(join_session("abc"), Err(CodeError::WrongLength(3)));
        assert_eq!(join_session("abcdef"), Err(CodeError::WrongLength(6)));
        assert_eq!(join_session("ab1de"), Err(CodeError::InvalidCharacter('1')));
    }

    #[test]
    fn test_code_error_messages() {
        assert_eq!(
            CodeError::WrongLength(3).to_string(),
            "session code must be 5 letters, got 3"
        );
        assert_eq!(
            CodeError::InvalidCharacter('1').to_string(),
            "session code may only contain letters a-z, got '1'"
        );
    }

    #[test]
    fn test_generated_codes_parse() {
        let rng = fastrand::Rng::with_seed(3);
        for _ in 0..50 {
            let code = SessionCode::generate(&rng);
            assert_eq!(SessionCode::parse(code.as_str()), Ok(code));
        }
    }

    #[test]
    fn test_create_session_writes_host_and_limit() {
        let store = MemoryStore::new();
        let conn = store.connect().unwrap();
        let creator = DeviceId::new("creator");
        let rng = fastrand::Rng::with_seed(9);

        let code = create_session(&conn, GAMES_ROOT, &creator, Some(100), &rng).unwrap();
        let paths = SessionPaths::new(GAMES_ROOT, code.as_str());
        assert_eq!(
            store.read(paths.session()).unwrap(),
            json!({"hostId": "creator", "pointsLimit": 100})
        );
    }

    #[test]
    fn test_create_session_without_limit() {
        let store = MemoryStore::new();
        let conn = store.connect().unwrap();
        let rng = fastrand::Rng::with_seed(9);
        let code = create_session(&conn, GAMES_ROOT, &DeviceId::new("c"), None, &rng).unwrap();
        let paths = SessionPaths::new(GAMES_ROOT, code.as_str());
        assert_eq!(store.read(&paths.points_limit()).unwrap(), json!(null));
    }
}
