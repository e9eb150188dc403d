//! Per-device identity.
//!
//! A device identity is generated once, persisted, and reused for the
//! lifetime of the local storage. It only needs to be unlikely to collide
//! among devices in the same session; it is not a security token.

use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use log::{debug, warn};

/// Length of a generated device identity.
pub const DEVICE_ID_LEN: usize = 13;

const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Uniformly random string over `[A-Za-z0-9]`.
pub fn random_token(rng: &fastrand::Rng, len: usize) -> String {
    (0..len)
        .map(|_| char::from(ALPHANUMERIC[rng.usize(..ALPHANUMERIC.len())]))
        .collect()
}

// ============================================================================
// Device Identity
// ============================================================================

/// Stable identifier of one device. Used as the key under `clients` and as
/// the value of `hostId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wrap an identifier read from shared state. Any string is accepted:
    /// other devices' identities are opaque.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh identity.
    pub fn generate(rng: &fastrand::Rng) -> Self {
        Self(random_token(rng, DEVICE_ID_LEN))
    }

    /// Whether `value` has the shape of a locally generated identity.
    pub fn is_well_formed(value: &str) -> bool {
        value.len() == DEVICE_ID_LEN && value.bytes().all(|b| b.is_ascii_alphanumeric())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for DeviceId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

// ============================================================================
// Persistence
// ============================================================================

/// Failure to load or persist an identity.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identity file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("identity store lock poisoned")]
    Poisoned,
}

/// Local, device-private storage for the identity.
pub trait IdentityStore {
    fn load(&self) -> Result<Option<String>, IdentityError>;
    fn save(&self, id: &str) -> Result<(), IdentityError>;
}

/// Identity kept in a single file.
#[derive(Debug, Clone)]
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl IdentityStore for FileIdentityStore {
    fn load(&self) -> Result<Option<String>, IdentityError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents.trim().to_string())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(IdentityError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn save(&self, id: &str) -> Result<(), IdentityError> {
        let io_err = |source| IdentityError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(&self.path, id).map_err(io_err)
    }
}

/// Identity kept in memory; lost with the process.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    slot: Mutex<Option<String>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `id`.
    pub fn with_identity(id: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(Some(id.into())),
        }
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load(&self) -> Result<Option<String>, IdentityError> {
        let slot = self.slot.lock().map_err(|_| IdentityError::Poisoned)?;
        Ok(slot.clone())
    }

    fn save(&self, id: &str) -> Result<(), IdentityError> {
        let mut slot = self.slot.lock().map_err(|_| IdentityError::Poisoned)?;
        *slot = Some(id.to_string());
        Ok(())
    }
}

// ============================================================================
// Provider
// ============================================================================

/// Lazily loads or creates the device identity and caches it.
///
/// Inject one provider per device into whatever opens sessions; nothing
/// reads the identity from ambient state.
pub struct IdentityProvider<S: IdentityStore> {
    store: S,
    seed: Option<u64>,
    cached: OnceLock<DeviceId>,
}

impl<S: IdentityStore> IdentityProvider<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            seed: None,
            cached: OnceLock::new(),
        }
    }

    /// Deterministic generation, for tests.
    pub fn with_seed(store: S, seed: u64) -> Self {
        Self {
            store,
            seed: Some(seed),
            cached: OnceLock::new(),
        }
    }

    /// The device identity, generating and persisting it on first use.
    ///
    /// Never fails: storage problems are logged and the identity is still
    /// returned for the rest of this process.
    pub fn get_or_create(&self) -> DeviceId {
        self.cached.get_or_init(|| self.load_or_generate()).clone()
    }

    fn load_or_generate(&self) -> DeviceId {
        match self.store.load() {
            Ok(Some(existing)) if DeviceId::is_well_formed(&existing) => {
                debug!("loaded device identity {existing}");
                return DeviceId(existing);
            }
            Ok(Some(existing)) => warn!("discarding malformed device identity {existing:?}"),
            Ok(None) => {}
            Err(err) => warn!("failed to load device identity: {err}"),
        }

        let rng = match self.seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };
        let id = DeviceId::generate(&rng);
        if let Err(err) = self.store.save(id.as_str()) {
            warn!("failed to persist device identity: {err}");
        }
        debug!("generated device identity {id}");
        id
    }
}

// ============================================================================
// Tests
// ============================================================================
