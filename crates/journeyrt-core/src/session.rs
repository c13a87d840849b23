//! Session state and PII-free resume snapshots.
//!
//! The session outlives individual journeys for the process. It owns the
//! correlation identifier stamped onto every telemetry event and the
//! idempotency key carried across snapshots. Snapshots record just enough
//! to resume a journey at step granularity: journey id, step pointer,
//! idempotency key, timestamp. Nothing user-identifying is persisted.
//!
//! Snapshot access is not yet gated on the resume token: `load_snapshot`
//! binds whatever token the caller supplies and reveals the stored slot.
//! A keyed lookup or authenticated binding is a known gap.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Service component of the fixed snapshot slot identifier.
pub const SNAPSHOT_SERVICE: &str = "journeyrt.session";

/// Account component of the fixed snapshot slot identifier.
pub const SNAPSHOT_ACCOUNT: &str = "resume-snapshot";

/// Errors from session and snapshot operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Snapshot serialization failed.
    #[error("snapshot encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The store refused the write.
    #[error("snapshot store rejected the write")]
    StoreRejected,

    /// Store I/O failure.
    #[error("snapshot store error: {0}")]
    Io(#[from] std::io::Error),

    /// Store directory or file permissions are too broad.
    #[error("insecure permissions on snapshot path: {path}")]
    InsecurePermissions {
        /// The offending path.
        path: String,
    },
}

/// Persisted resume record. PII-free by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Journey the snapshot belongs to.
    pub journey_id: String,
    /// Most recently entered step.
    pub step_pointer: String,
    /// Idempotency key preserved across resume.
    pub idempotency_key: String,
    /// Write timestamp.
    pub ts: DateTime<Utc>,
}

/// Secure key-value slot abstraction.
///
/// Exactly one snapshot slot exists per process identity, addressed by a
/// fixed `(service, account)` pair. Implementations must be safe for
/// concurrent readers with exclusive writers.
pub trait SnapshotStore: Send + Sync {
    /// Writes a value, returning whether the write was accepted.
    fn set(&self, data: &[u8], service: &str, account: &str) -> bool;
    /// Reads a value if present.
    fn get(&self, service: &str, account: &str) -> Option<Vec<u8>>;
    /// Deletes a value, returning whether something was removed.
    fn delete(&self, service: &str, account: &str) -> bool;
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    slots: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for InMemoryStore {
    fn set(&self, data: &[u8], service: &str, account: &str) -> bool {
        match self.slots.write() {
            Ok(mut slots) => {
                slots.insert((service.to_string(), account.to_string()), data.to_vec());
                true
            },
            Err(_) => false,
        }
    }

    fn get(&self, service: &str, account: &str) -> Option<Vec<u8>> {
        self.slots
            .read()
            .ok()?
            .get(&(service.to_string(), account.to_string()))
            .cloned()
    }

    fn delete(&self, service: &str, account: &str) -> bool {
        match self.slots.write() {
            Ok(mut slots) => slots
                .remove(&(service.to_string(), account.to_string()))
                .is_some(),
            Err(_) => false,
        }
    }
}

/// File-backed store with owner-only permissions.
///
/// The platform-protected analogue for hosts without a native secure
/// store: one file per slot under a 0700 directory, written 0600.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Creates the store rooted at a directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or has
    /// permissions broader than owner-only.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SessionError> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            fs::create_dir_all(&root)?;
            set_mode(&root, 0o700)?;
        }
        check_mode(&root)?;
        Ok(Self { root })
    }

    fn slot_path(&self, service: &str, account: &str) -> PathBuf {
        self.root.join(format!("{service}.{account}.json"))
    }
}

impl SnapshotStore for FileStore {
    fn set(&self, data: &[u8], service: &str, account: &str) -> bool {
        let path = self.slot_path(service, account);
        let result = (|| -> Result<(), SessionError> {
            let mut file = open_owner_only(&path)?;
            file.write_all(data)?;
            file.sync_all()?;
            Ok(())
        })();
        if let Err(err) = result {
            warn!(%err, "snapshot write failed");
            return false;
        }
        true
    }

    fn get(&self, service: &str, account: &str) -> Option<Vec<u8>> {
        let path = self.slot_path(service, account);
        if !path.exists() {
            return None;
        }
        check_mode(&path).ok()?;
        fs::read(&path).ok()
    }

    fn delete(&self, service: &str, account: &str) -> bool {
        let path = self.slot_path(service, account);
        path.exists() && fs::remove_file(&path).is_ok()
    }
}

#[cfg(unix)]
fn open_owner_only(path: &Path) -> Result<std::fs::File, SessionError> {
    use std::os::unix::fs::OpenOptionsExt;
    Ok(OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?)
}

#[cfg(not(unix))]
fn open_owner_only(path: &Path) -> Result<std::fs::File, SessionError> {
    Ok(OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), SessionError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), SessionError> {
    Ok(())
}

#[cfg(unix)]
fn check_mode(path: &Path) -> Result<(), SessionError> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(path)?.permissions().mode();
    if mode & 0o077 != 0 {
        return Err(SessionError::InsecurePermissions {
            path: path.display().to_string(),
        });
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_mode(_path: &Path) -> Result<(), SessionError> {
    Ok(())
}

/// Mutable per-process session state.
#[derive(Debug, Clone)]
pub struct Session {
    /// Correlation identifier stamped onto every event.
    pub correlation_id: String,
    /// Caller-supplied opaque authorization token.
    pub context_token: String,
    /// Caller-supplied resume token, bound on snapshot load.
    pub resume_token: Option<String>,
    /// Most recently entered step.
    pub step_pointer: Option<String>,
    /// Idempotency key, fresh per session, preserved across snapshots.
    pub idempotency_key: String,
}

impl Session {
    fn fresh() -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            context_token: String::new(),
            resume_token: None,
            step_pointer: None,
            idempotency_key: Uuid::new_v4().simple().to_string(),
        }
    }
}

/// Owns the session and mediates snapshot reads and writes.
///
/// Reads are concurrent, writes exclusive; all store access is
/// synchronous.
pub struct SessionManager {
    store: std::sync::Arc<dyn SnapshotStore>,
    session: RwLock<Session>,
}

impl SessionManager {
    /// Creates a manager with a fresh session.
    #[must_use]
    pub fn new(store: std::sync::Arc<dyn SnapshotStore>) -> Self {
        Self {
            store,
            session: RwLock::new(Session::fresh()),
        }
    }

    /// Starts a new session: fresh correlation and idempotency
    /// identifiers, caller token bound.
    pub fn start_session(&self, context_token: &str, resume_token: Option<&str>) {
        if let Ok(mut session) = self.session.write() {
            *session = Session::fresh();
            session.context_token = context_token.to_string();
            session.resume_token = resume_token.map(ToString::to_string);
        }
    }

    /// Returns a copy of the current session state.
    #[must_use]
    pub fn session(&self) -> Session {
        self.session
            .read()
            .map_or_else(|_| Session::fresh(), |session| session.clone())
    }

    /// Correlation identifier of the current session.
    #[must_use]
    pub fn correlation_id(&self) -> String {
        self.session().correlation_id
    }

    /// Idempotency key of the current session.
    #[must_use]
    pub fn idempotency_key(&self) -> String {
        self.session().idempotency_key
    }

    /// Writes a snapshot for the given journey and step.
    ///
    /// The previous slot value is unconditionally deleted first.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::StoreRejected`] when the store refuses the
    /// write and encoding errors otherwise.
    pub fn save_snapshot(&self, journey_id: &str, step_id: &str) -> Result<(), SessionError> {
        let idempotency_key = {
            let Ok(mut session) = self.session.write() else {
                return Err(SessionError::StoreRejected);
            };
            session.step_pointer = Some(step_id.to_string());
            session.idempotency_key.clone()
        };

        let snapshot = Snapshot {
            journey_id: journey_id.to_string(),
            step_pointer: step_id.to_string(),
            idempotency_key,
            ts: Utc::now(),
        };
        let encoded = serde_json::to_vec(&snapshot)?;

        self.store.delete(SNAPSHOT_SERVICE, SNAPSHOT_ACCOUNT);
        if !self.store.set(&encoded, SNAPSHOT_SERVICE, SNAPSHOT_ACCOUNT) {
            return Err(SessionError::StoreRejected);
        }
        debug!(journey_id, step_id, "snapshot saved");
        Ok(())
    }

    /// Loads the stored snapshot, binding the resume token to the session
    /// and restoring the step pointer and idempotency key.
    #[must_use]
    pub fn load_snapshot(&self, resume_token: &str) -> Option<Snapshot> {
        let bytes = self.store.get(SNAPSHOT_SERVICE, SNAPSHOT_ACCOUNT)?;
        let snapshot: Snapshot = match serde_json::from_slice(&bytes) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(%err, "stored snapshot is unreadable");
                return None;
            },
        };

        if let Ok(mut session) = self.session.write() {
            session.resume_token = Some(resume_token.to_string());
            session.step_pointer = Some(snapshot.step_pointer.clone());
            session.idempotency_key = snapshot.idempotency_key.clone();
        }
        Some(snapshot)
    }
}
