use crate::error::StorageError;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

pub const KEY_ACCESS_TOKEN: &str = "access_token";
pub const KEY_REFRESH_TOKEN: &str = "refresh_token";
pub const KEY_USER: &str = "user";

pub const SESSION_KEYS: [&str; 3] = [KEY_ACCESS_TOKEN, KEY_REFRESH_TOKEN, KEY_USER];

const KEYRING_SERVICE: &str = "app.kinkeep.client";

/// Client-local key-value storage for the persisted session.
///
/// Reads and writes are synchronous and individually atomic; callers never
/// hold a value across an await point.
pub trait SessionStorage: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
  fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
  fn remove(&self, key: &str) -> Result<(), StorageError>;
}

fn non_blank(value: Option<String>) -> Option<String> {
  value.filter(|v| !v.trim().is_empty())
}

fn poisoned<T>(_: T) -> StorageError {
  StorageError::Unavailable("storage lock poisoned".to_string())
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
  values: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl SessionStorage for MemoryStorage {
  fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
    let guard = self.values.lock().map_err(poisoned)?;
    Ok(non_blank(guard.get(key).cloned()))
  }

  fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
    let mut guard = self.values.lock().map_err(poisoned)?;
    guard.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<(), StorageError> {
    let mut guard = self.values.lock().map_err(poisoned)?;
    guard.remove(key);
    Ok(())
  }
}

/// Session values kept as a flat JSON object in a file (0600 on unix).
#[derive(Debug)]
pub struct FileStorage {
  path: PathBuf,
  lock: Mutex<()>,
}

impl FileStorage {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      lock: Mutex::new(()),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn load(&self) -> Result<Map<String, Value>, StorageError> {
    if !self.path.exists() {
      return Ok(Map::new());
    }
    let data = fs::read_to_string(&self.path)?;
    if data.trim().is_empty() {
      return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(&data)? {
      Value::Object(map) => Ok(map),
      _ => Ok(Map::new()),
    }
  }

  fn save(&self, map: &Map<String, Value>) -> Result<(), StorageError> {
    if let Some(parent) = self.path.parent() {
      if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)?;
      }
    }
    let contents = serde_json::to_string_pretty(map)?;

    #[cfg(unix)]
    {
      use std::io::Write;
      use std::os::unix::fs::OpenOptionsExt;
      let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&self.path)?;
      file.write_all(contents.as_bytes())?;
    }

    #[cfg(not(unix))]
    {
      fs::write(&self.path, contents)?;
    }

    Ok(())
  }
}

impl SessionStorage for FileStorage {
  fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
    let _guard = self.lock.lock().map_err(poisoned)?;
    let map = self.load()?;
    Ok(non_blank(
      map.get(key).and_then(|v| v.as_str()).map(|s| s.to_string()),
    ))
  }

  fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
    let _guard = self.lock.lock().map_err(poisoned)?;
    let mut map = self.load()?;
    map.insert(key.to_string(), Value::String(value.to_string()));
    self.save(&map)
  }

  fn remove(&self, key: &str) -> Result<(), StorageError> {
    let _guard = self.lock.lock().map_err(poisoned)?;
    let mut map = match self.load() {
      Ok(map) => map,
      // an unparseable file holds no usable session
      Err(StorageError::Json(e)) => {
        warn!(path = %self.path.display(), error = %e, "session file is corrupt; resetting");
        return self.save(&Map::new());
      }
      Err(e) => return Err(e),
    };
    if map.remove(key).is_none() {
      return Ok(());
    }
    self.save(&map)
  }
}

/// Stores each session key as its own OS keychain / secret-service entry.
#[derive(Debug, Clone)]
pub struct KeyringStorage {
  service: String,
}

impl Default for KeyringStorage {
  fn default() -> Self {
    Self::new(KEYRING_SERVICE)
  }
}

impl KeyringStorage {
  pub fn new(service: impl Into<String>) -> Self {
    Self {
      service: service.into(),
    }
  }

  fn entry(&self, key: &str) -> Result<keyring::Entry, StorageError> {
    keyring::Entry::new(&self.service, key).map_err(keyring_error)
  }

  pub fn is_available(&self) -> bool {
    let Ok(entry) = self.entry(KEY_ACCESS_TOKEN) else {
      return false;
    };

    match entry.get_password() {
      Ok(_) => true,
      Err(keyring::Error::NoEntry) => true,
      Err(keyring::Error::BadEncoding(_)) => true,
      Err(keyring::Error::Ambiguous(_)) => true,
      Err(_) => false,
    }
  }
}

fn keyring_error(err: keyring::Error) -> StorageError {
  StorageError::Unavailable(err.to_string())
}

impl SessionStorage for KeyringStorage {
  fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
    match self.entry(key)?.get_password() {
      Ok(value) => Ok(non_blank(Some(value))),
      Err(keyring::Error::NoEntry) => Ok(None),
      Err(keyring::Error::NoStorageAccess(e)) => Err(StorageError::Unavailable(e.to_string())),
      Err(keyring::Error::PlatformFailure(e)) => Err(StorageError::Unavailable(e.to_string())),
      Err(_) => Ok(None),
    }
  }

  fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
    self.entry(key)?.set_password(value).map_err(keyring_error)
  }

  fn remove(&self, key: &str) -> Result<(), StorageError> {
    match self.entry(key)?.delete_credential() {
      Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
      Err(e) => Err(keyring_error(e)),
    }
  }
}
