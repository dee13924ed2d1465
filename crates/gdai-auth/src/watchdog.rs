//! Client Recovery Watchdog
//!
//! Observes session records on the client side. When a session turns up with
//! [`TokenError::RefreshFailed`] the watchdog saves a [`WorkflowCheckpoint`]
//! of the current location and forces a fresh sign-in that returns there.
//! After sign-in, [`SessionWatchdog::restore`] hands the checkpoint back once.
//!
//! The decision is the pure [`recovery_action`]; storage and navigation sit
//! behind the [`CheckpointStorage`] and [`ClientNavigator`] traits.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::providers::entra;
use crate::types::{Session, TokenError};

/// Storage slot holding the checkpoint
pub const CHECKPOINT_KEY: &str = "gdai:workflow-checkpoint";

/// Checkpoint storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Storage cannot be used at all
    #[error("Checkpoint storage unavailable: {0}")]
    Unavailable(String),

    /// Checkpoint could not be encoded
    #[error("Checkpoint serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Snapshot of client progress taken before a forced sign-in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowCheckpoint {
    /// Location the user was on
    pub url: String,
    /// Capture time in epoch milliseconds
    #[serde(rename = "timestamp")]
    pub captured_at: i64,
}

impl WorkflowCheckpoint {
    /// Checkpoint of `url` captured at `now`
    pub fn capture(url: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            url: url.into(),
            captured_at: now.timestamp_millis(),
        }
    }
}

/// String-keyed ephemeral client storage
pub trait CheckpointStorage: Send + Sync {
    /// Read a slot
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a slot
    fn set(&self, key: &str, value: String) -> Result<(), StorageError>;

    /// Clear a slot
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-process [`CheckpointStorage`]
#[derive(Debug, Default)]
pub struct MemoryCheckpointStorage {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryCheckpointStorage {
    /// Create empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Whether no slot is occupied
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

impl CheckpointStorage for MemoryCheckpointStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.slots.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.slots.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.slots.lock().remove(key);
        Ok(())
    }
}

/// Client navigation hooks
pub trait ClientNavigator: Send + Sync {
    /// Location currently displayed
    fn current_location(&self) -> String;

    /// Start a sign-in with `provider_id` that returns to `callback_url`
    fn sign_in(&self, provider_id: &str, callback_url: &str);
}

/// What the watchdog must do for an observed session state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Session is healthy or absent
    None,
    /// Save the checkpoint, then sign in again
    Reauthenticate {
        /// Checkpoint to save
        checkpoint: WorkflowCheckpoint,
        /// Provider to sign in with
        provider_id: &'static str,
        /// Location to return to
        callback_url: String,
    },
}

/// Decide the recovery action for a session error observed at `location`
pub fn recovery_action(
    error: Option<TokenError>,
    location: &str,
    now: DateTime<Utc>,
) -> RecoveryAction {
    match error {
        Some(TokenError::RefreshFailed) => RecoveryAction::Reauthenticate {
            checkpoint: WorkflowCheckpoint::capture(location, now),
            provider_id: entra::PROVIDER_ID,
            callback_url: location.to_string(),
        },
        None => RecoveryAction::None,
    }
}

/// Session-state observer driving forced re-authentication
pub struct SessionWatchdog {
    storage: Arc<dyn CheckpointStorage>,
    navigator: Arc<dyn ClientNavigator>,
    triggered: AtomicBool,
}

impl std::fmt::Debug for SessionWatchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionWatchdog")
            .field("triggered", &self.triggered.load(Ordering::Relaxed))
            .finish()
    }
}

impl SessionWatchdog {
    /// Create a watchdog over client storage and navigation
    pub fn new(storage: Arc<dyn CheckpointStorage>, navigator: Arc<dyn ClientNavigator>) -> Self {
        Self {
            storage,
            navigator,
            triggered: AtomicBool::new(false),
        }
    }

    /// Observer callback for every session-state transition.
    ///
    /// Acts once per entry into the failed state and re-arms when the error
    /// clears. Returns whether a sign-in redirect was started.
    pub fn on_session_change(&self, session: Option<&Session>) -> bool {
        let error = session.and_then(|s| s.error);
        let location = self.navigator.current_location();

        match recovery_action(error, &location, Utc::now()) {
            RecoveryAction::None => {
                self.triggered.store(false, Ordering::Release);
                false
            }
            RecoveryAction::Reauthenticate {
                checkpoint,
                provider_id,
                callback_url,
            } => {
                if self.triggered.swap(true, Ordering::AcqRel) {
                    debug!("Refresh failure already handled");
                    return false;
                }
                if let Err(e) = self.save(&checkpoint) {
                    warn!(error = %e, "Could not save workflow checkpoint");
                }
                info!(provider = provider_id, "Session refresh failed; signing in again");
                self.navigator.sign_in(provider_id, &callback_url);
                true
            }
        }
    }

    fn save(&self, checkpoint: &WorkflowCheckpoint) -> Result<(), StorageError> {
        let raw = serde_json::to_string(checkpoint)?;
        self.storage.set(CHECKPOINT_KEY, raw)
    }

    /// Take the saved checkpoint, at most once. Absence is normal.
    pub fn restore(&self) -> Option<WorkflowCheckpoint> {
        let raw = match self.storage.get(CHECKPOINT_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                debug!(error = %e, "Checkpoint storage unreadable");
                return None;
            }
        };

        if let Err(e) = self.storage.remove(CHECKPOINT_KEY) {
            debug!(error = %e, "Checkpoint could not be cleared");
            return None;
        }

        match serde_json::from_str(&raw) {
            Ok(checkpoint) => Some(checkpoint),
            Err(e) => {
                debug!(error = %e, "Discarding unreadable checkpoint");
                None
            }
        }
    }
}
