//! Credential persistence.
//!
//! [`CredentialStore`] is the single holder of the session's access
//! credential, refresh credential, and last-known profile. Reads are served
//! from an in-memory snapshot; writes go through to a [`CredentialBackend`]
//! and then swap the snapshot under one write lock, so a renewal replaces the
//! credential atomically from the point of view of every reader.
//!
//! Mutation is `pub(crate)`: only the session lifecycle and the renewal
//! coordinator write credentials. The request client only reads them.

pub mod backend;
pub mod keyring;

use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Deserializer, Serialize};

pub use backend::{CredentialBackend, FileBackend, MemoryBackend};
pub use keyring::KeyringBackend;

use crate::error::{Error, Result};

/// Backend key for the access credential.
pub const ACCESS_CREDENTIAL_KEY: &str = "access_credential";
/// Backend key for the refresh credential.
pub const REFRESH_CREDENTIAL_KEY: &str = "refresh_credential";
/// Backend key for the JSON-encoded profile.
pub const PROFILE_KEY: &str = "profile";

/// Opaque bearer token. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for building an `Authorization` header.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// `Bearer <token>` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(<redacted, {} bytes>)", self.0.len())
    }
}

impl From<&str> for Credential {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// User profile as returned by the backend.
///
/// Unknown fields are kept in `extra` so nothing is lost across a
/// persist/load cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Server-assigned user id (numbers are normalized to strings).
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Account class used by the account policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Remaining backend fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Profile {
    /// Profile with only an id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            email: None,
            role: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Builder-style role setter.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Best human-readable label: name, then email, then id.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.id)
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

#[derive(Debug, Clone, Default)]
struct Snapshot {
    access: Option<Credential>,
    refresh: Option<Credential>,
    profile: Option<Profile>,
}

/// Holder of the current session credentials.
#[derive(Debug)]
pub struct CredentialStore {
    backend: Box<dyn CredentialBackend>,
    snapshot: RwLock<Snapshot>,
}

impl CredentialStore {
    /// Load whatever the backend currently holds.
    ///
    /// A corrupted profile is dropped with a warning; the credential itself
    /// is kept so bootstrap can re-fetch the profile.
    pub fn load(backend: impl CredentialBackend + 'static) -> Result<Self> {
        let access = backend.get(ACCESS_CREDENTIAL_KEY)?.map(Credential::new);
        let refresh = backend.get(REFRESH_CREDENTIAL_KEY)?.map(Credential::new);
        let profile = match backend.get(PROFILE_KEY)? {
            Some(json) => match serde_json::from_str(&json) {
                Ok(profile) => Some(profile),
                Err(e) => {
                    log::warn!("[Credentials] Stored profile unreadable, ignoring: {}", e);
                    None
                }
            },
            None => None,
        };

        log::debug!(
            "[Credentials] Loaded store (credential: {}, refresh: {}, profile: {})",
            access.is_some(),
            refresh.is_some(),
            profile.is_some()
        );

        Ok(Self {
            backend: Box::new(backend),
            snapshot: RwLock::new(Snapshot {
                access,
                refresh,
                profile,
            }),
        })
    }

    /// Empty store backed by memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            backend: Box::new(MemoryBackend::new()),
            snapshot: RwLock::new(Snapshot::default()),
        }
    }

    /// Current access credential.
    pub fn access_credential(&self) -> Option<Credential> {
        self.read().access.clone()
    }

    /// Current refresh credential.
    pub fn refresh_credential(&self) -> Option<Credential> {
        self.read().refresh.clone()
    }

    /// Last-known profile.
    pub fn profile(&self) -> Option<Profile> {
        self.read().profile.clone()
    }

    /// Returns `true` if an access credential is held.
    pub fn has_credential(&self) -> bool {
        self.read().access.is_some()
    }

    /// Persist a freshly established session.
    pub(crate) fn store_session(
        &self,
        access: Credential,
        refresh: Option<Credential>,
        profile: Option<Profile>,
    ) -> Result<()> {
        let mut snapshot = self.write();
        self.backend.set(ACCESS_CREDENTIAL_KEY, access.expose())?;
        match &refresh {
            Some(refresh) => self.backend.set(REFRESH_CREDENTIAL_KEY, refresh.expose())?,
            None => self.backend.remove(REFRESH_CREDENTIAL_KEY)?,
        }
        match &profile {
            Some(profile) => self.backend.set(PROFILE_KEY, &encode_profile(profile)?)?,
            None => self.backend.remove(PROFILE_KEY)?,
        }
        *snapshot = Snapshot {
            access: Some(access),
            refresh,
            profile,
        };
        Ok(())
    }

    /// Replace the access credential after a renewal. A rotated refresh
    /// credential replaces the stored one; `None` keeps it.
    ///
    /// Nothing is written unless the store still holds `used_refresh`, the
    /// refresh credential the renewal was issued with. Returns `false` when
    /// the session was cleared or replaced while the renewal was in flight.
    pub(crate) fn replace_credential(
        &self,
        used_refresh: &Credential,
        access: Credential,
        rotated_refresh: Option<Credential>,
    ) -> Result<bool> {
        let mut snapshot = self.write();
        if snapshot.refresh.as_ref() != Some(used_refresh) {
            return Ok(false);
        }
        self.backend.set(ACCESS_CREDENTIAL_KEY, access.expose())?;
        if let Some(refresh) = &rotated_refresh {
            self.backend.set(REFRESH_CREDENTIAL_KEY, refresh.expose())?;
        }
        snapshot.access = Some(access);
        if rotated_refresh.is_some() {
            snapshot.refresh = rotated_refresh;
        }
        Ok(true)
    }

    /// Record a re-fetched profile.
    pub(crate) fn store_profile(&self, profile: Profile) -> Result<()> {
        let mut snapshot = self.write();
        self.backend.set(PROFILE_KEY, &encode_profile(&profile)?)?;
        snapshot.profile = Some(profile);
        Ok(())
    }

    /// Drop everything.
    ///
    /// The in-memory snapshot is cleared even if the backend fails, so the
    /// process never keeps using a credential it was told to forget.
    pub(crate) fn clear(&self) -> Result<()> {
        let mut snapshot = self.write();
        *snapshot = Snapshot::default();
        let mut first_error = None;
        for key in [ACCESS_CREDENTIAL_KEY, REFRESH_CREDENTIAL_KEY, PROFILE_KEY] {
            if let Err(e) = self.backend.remove(key) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Snapshot> {
        self.snapshot.read().expect("CredentialStore lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Snapshot> {
        self.snapshot.write().expect("CredentialStore lock poisoned")
    }
}

fn encode_profile(profile: &Profile) -> Result<String> {
    serde_json::to_string(profile).map_err(|e| Error::Storage(format!("serialize profile: {e}")))
}
