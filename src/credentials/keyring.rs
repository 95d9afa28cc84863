//! OS keyring backend.
//!
//! All values live in a single keyring entry `courier/session` holding a JSON
//! map, so a rebuilt binary triggers at most one macOS keychain prompt.
//!
//! # Graceful Degradation
//!
//! The keychain may refuse access when the binary signature changes. Loads
//! are retried and failures are categorized:
//! - Keyring locked (user can unlock)
//! - Entry missing (normal first-run)
//! - Access denied (signature mismatch, may need re-auth)
//!
//! Unreadable or corrupted entries degrade to an empty map, which the session
//! layer treats as "signed out".

use std::collections::HashMap;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use keyring::Entry;

use super::backend::CredentialBackend;
use crate::error::{Error, Result};

/// Keyring service name.
const KEYRING_SERVICE: &str = "courier";
/// Consolidated keyring entry name.
const KEYRING_ENTRY: &str = "session";

/// Number of retry attempts for keyring access.
const KEYRING_RETRY_ATTEMPTS: u32 = 2;
/// Delay between retry attempts in milliseconds.
const KEYRING_RETRY_DELAY_MS: u64 = 500;

/// Categorized keyring access errors for better user feedback.
#[derive(Debug)]
pub enum KeyringAccessError {
    /// Keyring is locked and requires user interaction to unlock.
    Locked(String),
    /// Entry does not exist (normal for first run).
    NotFound,
    /// Access denied, likely due to binary signature change.
    AccessDenied(String),
    /// Data exists but is corrupted or unparseable.
    Corrupted(String),
    /// Other/unknown error.
    Other(String),
}

impl std::fmt::Display for KeyringAccessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Locked(msg) => write!(f, "Keyring locked: {msg}"),
            Self::NotFound => write!(f, "Keyring entry not found"),
            Self::AccessDenied(msg) => write!(f, "Keyring access denied: {msg}"),
            Self::Corrupted(msg) => write!(f, "Keyring data corrupted: {msg}"),
            Self::Other(msg) => write!(f, "Keyring error: {msg}"),
        }
    }
}

impl std::error::Error for KeyringAccessError {}

/// Categorize a keyring error message.
fn categorize_keyring_error(msg: String) -> KeyringAccessError {
    let msg_lower = msg.to_lowercase();

    if msg_lower.contains("no password")
        || msg_lower.contains("not found")
        || msg_lower.contains("nopassword")
        || msg_lower.contains("noentry")
    {
        return KeyringAccessError::NotFound;
    }

    if msg_lower.contains("user interaction") || msg_lower.contains("user canceled") {
        return KeyringAccessError::Locked(msg);
    }

    if msg_lower.contains("denied")
        || msg_lower.contains("codesign")
        || msg_lower.contains("authorization")
        || msg_lower.contains("not allowed")
    {
        return KeyringAccessError::AccessDenied(msg);
    }

    KeyringAccessError::Other(msg)
}

/// Backend storing every credential value in one OS keyring entry.
///
/// The decoded map is cached after the first load so repeated reads do not
/// hit the keychain again.
#[derive(Debug)]
pub struct KeyringBackend {
    service: String,
    entry_name: String,
    cache: Mutex<Option<HashMap<String, String>>>,
}

impl Default for KeyringBackend {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE, KEYRING_ENTRY)
    }
}

impl KeyringBackend {
    /// Backend for a specific keyring service/entry pair.
    #[must_use]
    pub fn new(service: impl Into<String>, entry_name: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            entry_name: entry_name.into(),
            cache: Mutex::new(None),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, &self.entry_name)
            .map_err(|e| Error::Storage(format!("Failed to create keyring entry: {e:?}")))
    }

    /// Load from keyring with retry logic for transient failures.
    ///
    /// Always succeeds by returning an empty map on failure.
    fn load_with_retry(&self) -> HashMap<String, String> {
        let mut last_error: Option<KeyringAccessError> = None;

        for attempt in 0..KEYRING_RETRY_ATTEMPTS {
            if attempt > 0 {
                log::debug!(
                    "Retrying keyring access (attempt {}/{})",
                    attempt + 1,
                    KEYRING_RETRY_ATTEMPTS
                );
                thread::sleep(Duration::from_millis(KEYRING_RETRY_DELAY_MS));
            }

            match self.try_load() {
                Ok(map) => return map,
                Err(KeyringAccessError::NotFound) => {
                    log::debug!("No session entry in keyring, starting empty");
                    return HashMap::new();
                }
                Err(err @ KeyringAccessError::Corrupted(_)) => {
                    log::warn!("Keyring data corrupted, starting empty: {}", err);
                    return HashMap::new();
                }
                Err(err) => {
                    log::debug!("Keyring access attempt {} failed: {}", attempt + 1, err);
                    last_error = Some(err);
                }
            }
        }

        if let Some(err) = &last_error {
            log::warn!(
                "Keyring access failed after {} attempts: {}. Sign in again if needed.",
                KEYRING_RETRY_ATTEMPTS,
                err
            );
            if matches!(err, KeyringAccessError::AccessDenied(_)) {
                log::info!(
                    "Hint: Binary signature may have changed. \
                     Unlock your keychain or sign in again."
                );
            }
        }

        HashMap::new()
    }

    fn try_load(&self) -> std::result::Result<HashMap<String, String>, KeyringAccessError> {
        let entry = Entry::new(&self.service, &self.entry_name)
            .map_err(|e| KeyringAccessError::Other(format!("Failed to create entry: {e:?}")))?;

        match entry.get_password() {
            Ok(json) => serde_json::from_str(&json)
                .map_err(|e| KeyringAccessError::Corrupted(format!("JSON parse error: {e}"))),
            Err(e) => Err(categorize_keyring_error(format!("{e:?}"))),
        }
    }

    fn persist(&self, map: &HashMap<String, String>) -> Result<()> {
        let entry = self.entry()?;
        if map.is_empty() {
            // Missing entry is the same as an empty one.
            let _ = entry.delete_credential();
            log::info!("Deleted session entry from OS keyring");
            return Ok(());
        }
        let json = serde_json::to_string(map)
            .map_err(|e| Error::Storage(format!("serialize credentials: {e}")))?;
        entry
            .set_password(&json)
            .map_err(|e| Error::Storage(format!("Failed to store credentials in keyring: {e:?}")))?;
        log::debug!("Saved session entry to OS keyring");
        Ok(())
    }

    fn with_map<T>(&self, f: impl FnOnce(&mut HashMap<String, String>) -> T) -> T {
        let mut cache = self.cache.lock().expect("KeyringBackend mutex poisoned");
        let map = cache.get_or_insert_with(|| self.load_with_retry());
        f(map)
    }
}

impl CredentialBackend for KeyringBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.with_map(|map| map.get(key).cloned()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.with_map(|map| {
            map.insert(key.to_string(), value.to_string());
            self.persist(map)
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.with_map(|map| {
            if map.remove(key).is_some() {
                self.persist(map)
            } else {
                Ok(())
            }
        })
    }
}
