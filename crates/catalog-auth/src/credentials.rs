//! Credential storage
//!
//! The persisted credential lives in session-scoped key/value storage as
//! three independent string keys (access token, refresh token, expiry in
//! epoch milliseconds) plus a single-use key for the pending PKCE verifier.
//!
//! Storage is fallible (disabled, full, unwritable). `CredentialStore` is the
//! boundary: backend faults are logged and degrade to "no credential", they
//! never propagate to callers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use common::Secret;
use tracing::{debug, info, warn};

use crate::config::{EXPIRY_SAFETY_MARGIN_SECS, StorageKeys};
use crate::error::StorageError;
use crate::token::TokenResponse;

/// Current time as a unix timestamp in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// The active OAuth credential.
///
/// `expires_at` is a unix timestamp in milliseconds, already shortened by
/// the safety margin so the client gives up on a token before the provider
/// does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: Secret<String>,
    pub refresh_token: Secret<String>,
    pub expires_at: u64,
    pub token_type: String,
}

impl Credential {
    /// Build a credential from a token-endpoint response received at `issued_at`.
    ///
    /// When the response omits a refresh token, `previous_refresh` is kept.
    /// Returns None when neither supplies one.
    pub fn from_response(
        response: TokenResponse,
        previous_refresh: Option<&Secret<String>>,
        issued_at: u64,
    ) -> Option<Self> {
        let refresh_token = match response.refresh_token {
            Some(rt) if !rt.is_empty() => Secret::new(rt),
            _ => previous_refresh.filter(|rt| !rt.is_empty())?.clone(),
        };
        Some(Self {
            access_token: Secret::new(response.access_token),
            refresh_token,
            expires_at: expiry_from(issued_at, response.expires_in),
            token_type: response.token_type,
        })
    }

    /// Whether the access token is still usable at `now` (epoch millis).
    pub fn is_valid_at(&self, now: u64) -> bool {
        now < self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        !self.is_valid_at(now_millis())
    }
}

/// `issued_at + (expires_in - margin) * 1000`, saturating for tiny lifetimes.
pub fn expiry_from(issued_at: u64, expires_in: u64) -> u64 {
    issued_at + expires_in.saturating_sub(EXPIRY_SAFETY_MARGIN_SECS) * 1000
}

/// Session-scoped key/value persistence.
///
/// Implementations serialize their own access; every call may fail.
pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-process storage, lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::new("read", key, e))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::new("write", key, e))?;
        entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::new("remove", key, e))?;
        entries.remove(key);
        Ok(())
    }
}

/// JSON-file storage surviving process restarts.
///
/// The file is a flat JSON object of string keys to string values. Every
/// mutation rewrites it atomically; if the write fails, neither the file nor
/// the in-memory view changes.
pub struct FileStorage {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStorage {
    /// Open the storage file, starting empty if it doesn't exist yet.
    pub fn open(path: PathBuf) -> Result<Self, StorageError> {
        let entries = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| StorageError::new("read", &path.display().to_string(), e))?;
            let entries: HashMap<String, String> = serde_json::from_str(&contents)
                .map_err(|e| StorageError::new("parse", &path.display().to_string(), e))?;
            info!(path = %path.display(), keys = entries.len(), "loaded session storage");
            entries
        } else {
            info!(path = %path.display(), "session storage file not found, starting empty");
            HashMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mutate(
        &self,
        operation: &'static str,
        key: &str,
        apply: impl FnOnce(&mut HashMap<String, String>),
    ) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::new(operation, key, e))?;
        let mut next = entries.clone();
        apply(&mut next);
        write_atomic(&self.path, &next).map_err(|reason| StorageError::new(operation, key, reason))?;
        *entries = next;
        Ok(())
    }
}

impl SessionStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::new("read", key, e))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.mutate("write", key, |entries| {
            entries.insert(key.to_owned(), value.to_owned());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.mutate("remove", key, |entries| {
            entries.remove(key);
        })
    }
}

/// Write the storage map to a file atomically.
///
/// Temp file in the same directory, 0600 permissions on unix (the file holds
/// OAuth tokens), then rename over the target.
fn write_atomic(path: &Path, data: &HashMap<String, String>) -> Result<(), String> {
    let json =
        serde_json::to_string_pretty(data).map_err(|e| format!("serializing storage: {e}"))?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let tmp_path = dir.join(format!(".session.tmp.{}", std::process::id()));

    std::fs::write(&tmp_path, json.as_bytes())
        .map_err(|e| format!("writing temp storage file: {e}"))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&tmp_path, perms)
            .map_err(|e| format!("setting storage file permissions: {e}"))?;
    }

    std::fs::rename(&tmp_path, path).map_err(|e| format!("renaming temp storage file: {e}"))?;

    debug!(path = %path.display(), "persisted session storage");
    Ok(())
}

/// Credential persistence over a [`SessionStorage`] backend.
pub struct CredentialStore {
    storage: Box<dyn SessionStorage>,
    keys: StorageKeys,
}

impl CredentialStore {
    pub fn new(storage: impl SessionStorage + 'static) -> Self {
        Self::with_keys(storage, StorageKeys::default())
    }

    pub fn with_keys(storage: impl SessionStorage + 'static, keys: StorageKeys) -> Self {
        Self {
            storage: Box::new(storage),
            keys,
        }
    }

    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    /// Read the persisted credential.
    ///
    /// Any missing, unreadable or unparsable field yields None and clears
    /// whatever partial state is left.
    pub fn load(&self) -> Option<Credential> {
        let fields = (
            self.read(&self.keys.access_token),
            self.read(&self.keys.refresh_token),
            self.read(&self.keys.expires_at),
        );

        let credential = match &fields {
            (Ok(Some(access)), Ok(Some(refresh)), Ok(Some(expires)))
                if !access.is_empty() && !refresh.is_empty() =>
            {
                match expires.trim().parse::<u64>() {
                    Ok(expires_at) => Some(Credential {
                        access_token: Secret::new(access.clone()),
                        refresh_token: Secret::new(refresh.clone()),
                        expires_at,
                        token_type: "Bearer".to_string(),
                    }),
                    Err(e) => {
                        warn!(error = %e, "stored token expiry is not a timestamp");
                        None
                    }
                }
            }
            _ => None,
        };

        if credential.is_none() {
            let untouched = matches!(fields, (Ok(None), Ok(None), Ok(None)));
            if !untouched {
                warn!("discarding partial stored credential");
                self.clear();
            }
        }
        credential
    }

    /// Persist a credential.
    ///
    /// The expiry key is removed first and written last, so a failure part
    /// way through leaves a state `load` reports as None. On failure every
    /// field is cleared best-effort. Returns whether the write succeeded.
    pub fn save(&self, credential: &Credential) -> bool {
        let expires = credential.expires_at.to_string();
        let result = self
            .storage
            .remove(&self.keys.expires_at)
            .and_then(|()| {
                self.storage
                    .set(&self.keys.access_token, credential.access_token.as_str())
            })
            .and_then(|()| {
                self.storage
                    .set(&self.keys.refresh_token, credential.refresh_token.as_str())
            })
            .and_then(|()| self.storage.set(&self.keys.expires_at, &expires));

        match result {
            Ok(()) => {
                debug!(expires_at = credential.expires_at, "credential persisted");
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to persist credential, clearing stored fields");
                self.clear();
                false
            }
        }
    }

    /// Remove all three credential fields.
    pub fn clear(&self) {
        for key in [
            &self.keys.expires_at,
            &self.keys.access_token,
            &self.keys.refresh_token,
        ] {
            if let Err(e) = self.storage.remove(key) {
                warn!(error = %e, "failed to clear stored credential field");
            }
        }
    }

    /// Store the verifier for a new authorization attempt, replacing any
    /// unconsumed one.
    pub fn put_verifier(&self, verifier: &Secret<String>) -> bool {
        match self
            .storage
            .set(&self.keys.code_verifier, verifier.as_str())
        {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "failed to store PKCE verifier");
                false
            }
        }
    }

    /// Read and delete the pending verifier. The read value is returned even
    /// if the delete fails; the failure is logged.
    pub fn take_verifier(&self) -> Option<Secret<String>> {
        let verifier = self
            .read(&self.keys.code_verifier)
            .ok()
            .flatten()
            .filter(|v| !v.is_empty())
            .map(Secret::new);
        if let Err(e) = self.storage.remove(&self.keys.code_verifier) {
            warn!(error = %e, "failed to delete consumed PKCE verifier");
        }
        verifier
    }

    pub fn has_pending_verifier(&self) -> bool {
        matches!(self.read(&self.keys.code_verifier), Ok(Some(v)) if !v.is_empty())
    }

    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.storage.get(key).inspect_err(|e| {
            warn!(error = %e, "storage read failed, treating as cache miss");
        })
    }
}
