//! The persisted session and the holder that guards it.
//!
//! A [`SessionHolder`] is created once per client and shared by every
//! outbound request. It reads tokens from a [`SessionStorage`] on every call,
//! so a refresh performed by one request is visible to the next one.

use crate::error::StorageError;
use crate::storage::{
    MemoryStorage, SessionStorage, KEY_ACCESS_TOKEN, KEY_REFRESH_TOKEN, KEY_USER, SESSION_KEYS,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub user: Value,
}

pub struct SessionHolder {
    storage: Arc<dyn SessionStorage>,
    needs_onboarding: AtomicBool,
    refresh_gate: Mutex<()>,
}

impl Default for SessionHolder {
    fn default() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }
}

impl SessionHolder {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            storage,
            needs_onboarding: AtomicBool::new(false),
            refresh_gate: Mutex::new(()),
        }
    }

    pub fn access_token(&self) -> Result<Option<String>, StorageError> {
        self.storage.get(KEY_ACCESS_TOKEN)
    }

    pub fn refresh_token(&self) -> Result<Option<String>, StorageError> {
        self.storage.get(KEY_REFRESH_TOKEN)
    }

    /// The cached user record, if one is stored and parses as JSON.
    pub fn user(&self) -> Result<Option<Value>, StorageError> {
        let Some(raw) = self.storage.get(KEY_USER)? else {
            return Ok(None);
        };
        Ok(serde_json::from_str(&raw).ok())
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.user(), Ok(Some(_)))
    }

    pub fn persist(&self, session: &Session) -> Result<(), StorageError> {
        self.storage.set(KEY_ACCESS_TOKEN, &session.access_token)?;
        self.storage.set(KEY_REFRESH_TOKEN, &session.refresh_token)?;
        self.storage
            .set(KEY_USER, &serde_json::to_string(&session.user)?)?;
        debug!("session persisted");
        Ok(())
    }

    pub fn set_access_token(&self, token: &str) -> Result<(), StorageError> {
        self.storage.set(KEY_ACCESS_TOKEN, token)
    }

    pub fn set_user(&self, user: &Value) -> Result<(), StorageError> {
        self.storage.set(KEY_USER, &serde_json::to_string(user)?)
    }

    /// Removes all three session keys. Every key is attempted even if one fails.
    pub fn clear(&self) -> Result<(), StorageError> {
        let mut first_err = None;
        for key in SESSION_KEYS {
            if let Err(e) = self.storage.remove(key) {
                warn!(key, error = %e, "failed to remove session key");
                first_err.get_or_insert(e);
            }
        }
        self.needs_onboarding.store(false, Ordering::SeqCst);
        first_err.map_or(Ok(()), Err)
    }

    /// Startup check: returns the stored user when both an access token and a
    /// user record are present. A corrupt user record ends the session.
    pub fn restore(&self) -> Result<Option<Value>, StorageError> {
        let token = self.access_token()?;
        let raw_user = self.storage.get(KEY_USER)?;
        let (Some(_), Some(raw_user)) = (token, raw_user) else {
            return Ok(None);
        };

        match serde_json::from_str::<Value>(&raw_user) {
            Ok(user) => Ok(Some(user)),
            Err(e) => {
                warn!(error = %e, "stored user record is corrupt; clearing session");
                self.clear()?;
                Ok(None)
            }
        }
    }

    pub fn needs_onboarding(&self) -> bool {
        self.needs_onboarding.load(Ordering::SeqCst)
    }

    pub fn set_needs_onboarding(&self, value: bool) {
        self.needs_onboarding.store(value, Ordering::SeqCst);
    }

    pub fn complete_onboarding(&self) {
        self.set_needs_onboarding(false);
    }

    /// Serializes token refreshes so concurrent 401s share one refresh call.
    pub(crate) async fn lock_refresh(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.refresh_gate.lock().await
    }
}
