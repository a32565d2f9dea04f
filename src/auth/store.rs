//! Persistent storage for the bearer credential.
//!
//! The store owns exactly one value under a fixed key: the opaque bearer
//! credential, persisted as a JSON string in the platform config directory.
//! No validation is performed - `set` accepts any string. Writes bump a
//! watch channel so sibling session controllers in the same process can
//! converge on credential changes, the way browsing contexts converge on a
//! storage event.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Application name used for the default store directory.
const APP_NAME: &str = "ledgerdesk";

/// Credential file name inside the store directory.
const CREDENTIAL_FILE: &str = "credential.json";

#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    changes: watch::Sender<u64>,
}

impl CredentialStore {
    /// Create a store rooted at `dir`. The directory is created lazily on
    /// the first write.
    pub fn new(dir: PathBuf) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            path: dir.join(CREDENTIAL_FILE),
            changes,
        }
    }

    /// Create a store at the default platform location.
    pub fn at_default_location() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(Self::new(config_dir.join(APP_NAME)))
    }

    /// Read the stored credential, if any. A missing or unreadable file
    /// reads as empty.
    pub fn get(&self) -> Option<String> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(error = %e, "Failed to read credential file");
                return None;
            }
        };
        match serde_json::from_str::<String>(&contents) {
            Ok(credential) => Some(credential),
            Err(e) => {
                warn!(error = %e, "Credential file is not valid JSON");
                None
            }
        }
    }

    /// Persist a credential. Accepts any string; no validation. Watchers
    /// are only notified when the value actually changes, so re-writing
    /// the same credential cannot re-trigger verification cycles. Returns
    /// the store revision after the write.
    pub fn set(&self, credential: &str) -> Result<u64> {
        if self.get().as_deref() == Some(credential) {
            return Ok(self.revision());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create store directory")?;
        }
        let contents = serde_json::to_string(credential)?;
        std::fs::write(&self.path, contents).context("Failed to write credential file")?;
        debug!("Credential stored");
        Ok(self.notify())
    }

    /// Remove the stored credential. Removing an already-empty store is
    /// not an error and does not notify. Returns the store revision after
    /// the removal.
    pub fn clear(&self) -> Result<u64> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Credential cleared");
                Ok(self.notify())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(self.revision()),
            Err(e) => Err(e).context("Failed to remove credential file"),
        }
    }

    pub fn has(&self) -> bool {
        self.get().is_some()
    }

    /// The current store revision: zero at creation, incremented by one
    /// for every effective `set` or `clear`.
    pub fn revision(&self) -> u64 {
        *self.changes.borrow()
    }

    /// Subscribe to change notifications. The receiver resolves whenever a
    /// `set` or `clear` lands, carrying a monotonically increasing
    /// revision.
    pub fn watch_changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn notify(&self) -> u64 {
        let mut bumped = 0;
        self.changes.send_modify(|revision| {
            *revision += 1;
            bumped = *revision;
        });
        bumped
    }
}
