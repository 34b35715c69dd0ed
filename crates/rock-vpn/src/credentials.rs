//! Credential Storage
//!
//! IPSec credentials are kept in a secure key/value store (the platform
//! keychain on device). Each value lives under its own account key, so a
//! store only needs get/set/remove; [`CredentialStore`] builds the typed
//! save/load/clear operations on top.
//!
//! Every connect overwrites all values. Saves and loads go through the
//! batch calls so a reader never sees half of one credential set and half
//! of another.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, info};

pub const KEY_USERNAME: &str = "com.rockvpn.username";
pub const KEY_PASSWORD: &str = "com.rockvpn.password";
pub const KEY_SHARED_SECRET: &str = "com.rockvpn.sharedsecret";
pub const KEY_SERVER_ADDRESS: &str = "com.rockvpn.serveraddress";
pub const KEY_COUNTRY_CODE: &str = "com.rockvpn.countrycode";
pub const KEY_COUNTRY_NAME: &str = "com.rockvpn.countryname";

const ALL_KEYS: [&str; 6] = [
    KEY_SERVER_ADDRESS,
    KEY_USERNAME,
    KEY_PASSWORD,
    KEY_SHARED_SECRET,
    KEY_COUNTRY_CODE,
    KEY_COUNTRY_NAME,
];

/// Credential storage errors
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Missing VPN credentials: {0}")]
    MissingCredentials(&'static str),

    #[error("Credential store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Credential store is corrupt: {0}")]
    Corrupt(String),
}

/// IPSec login material plus the country it belongs to
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpnCredentials {
    pub server_address: String,
    pub username: String,
    pub password: String,
    pub shared_secret: String,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub country_name: Option<String>,
}

impl VpnCredentials {
    pub fn new(
        server_address: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        shared_secret: impl Into<String>,
    ) -> Self {
        Self {
            server_address: server_address.into(),
            username: username.into(),
            password: password.into(),
            shared_secret: shared_secret.into(),
            country_code: None,
            country_name: None,
        }
    }

    /// Attach country metadata
    pub fn with_country(mut self, code: Option<String>, name: Option<String>) -> Self {
        self.country_code = code;
        self.country_name = name;
        self
    }
}

// Secrets never reach logs.
impl fmt::Debug for VpnCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VpnCredentials")
            .field("server_address", &self.server_address)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("shared_secret", &"<redacted>")
            .field("country_code", &self.country_code)
            .field("country_name", &self.country_name)
            .finish()
    }
}

/// Secure key/value store holding one credential per account key
pub trait CredentialStore: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> Result<Option<String>, CredentialError>;

    /// Replace a value
    fn set(&self, key: &str, value: &str) -> Result<(), CredentialError>;

    /// Delete a value (missing keys are fine)
    fn remove(&self, key: &str) -> Result<(), CredentialError>;

    /// Read several values at once.
    ///
    /// Stores shared between threads override this to take one snapshot.
    fn get_all(&self, keys: &[&str]) -> Result<Vec<Option<String>>, CredentialError> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    /// Apply several writes at once; `None` removes the key.
    ///
    /// Stores shared between threads override this to commit in one step.
    fn set_all(&self, entries: &[(&str, Option<&str>)]) -> Result<(), CredentialError> {
        for (key, value) in entries {
            match value {
                Some(value) => self.set(key, value)?,
                None => self.remove(key)?,
            }
        }
        Ok(())
    }

    /// Overwrite all credentials
    fn save(&self, credentials: &VpnCredentials) -> Result<(), CredentialError> {
        self.set_all(&[
            (KEY_SERVER_ADDRESS, Some(credentials.server_address.as_str())),
            (KEY_USERNAME, Some(credentials.username.as_str())),
            (KEY_PASSWORD, Some(credentials.password.as_str())),
            (KEY_SHARED_SECRET, Some(credentials.shared_secret.as_str())),
            (KEY_COUNTRY_CODE, credentials.country_code.as_deref()),
            (KEY_COUNTRY_NAME, credentials.country_name.as_deref()),
        ])?;

        debug!("Saved VPN credentials for {}", credentials.server_address);
        Ok(())
    }

    /// Read credentials back for a reconnect
    fn load(&self) -> Result<VpnCredentials, CredentialError> {
        let [server_address, username, password, shared_secret, country_code, country_name]: [Option<String>; 6] =
            self.get_all(&ALL_KEYS)?
                .try_into()
                .map_err(|_| CredentialError::Corrupt("short read from store".to_string()))?;
        let require = |value: Option<String>, key: &'static str| {
            value.ok_or(CredentialError::MissingCredentials(key))
        };

        Ok(VpnCredentials {
            server_address: require(server_address, KEY_SERVER_ADDRESS)?,
            username: require(username, KEY_USERNAME)?,
            password: require(password, KEY_PASSWORD)?,
            shared_secret: require(shared_secret, KEY_SHARED_SECRET)?,
            country_code,
            country_name,
        })
    }

    /// Forget everything
    fn clear(&self) -> Result<(), CredentialError> {
        let entries: Vec<(&str, Option<&str>)> = ALL_KEYS.iter().map(|key| (*key, None)).collect();
        self.set_all(&entries)
    }
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, CredentialError> {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        Ok(items.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CredentialError> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CredentialError> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.remove(key);
        Ok(())
    }

    fn get_all(&self, keys: &[&str]) -> Result<Vec<Option<String>>, CredentialError> {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        Ok(keys.iter().map(|key| items.get(*key).cloned()).collect())
    }

    fn set_all(&self, entries: &[(&str, Option<&str>)]) -> Result<(), CredentialError> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        apply(&mut items, entries);
        Ok(())
    }
}

fn apply(items: &mut BTreeMap<String, String>, entries: &[(&str, Option<&str>)]) {
    for (key, value) in entries {
        match value {
            Some(value) => {
                items.insert(key.to_string(), value.to_string());
            }
            None => {
                items.remove(*key);
            }
        }
    }
}

/// JSON file store, readable by the owner only
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// Open (or lazily create) a store at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        info!("Credential store: {}", path.display());
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Location on disk
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, CredentialError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| CredentialError::Corrupt(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&self, items: &BTreeMap<String, String>) -> Result<(), CredentialError> {
        let parent = match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                parent
            }
            None => Path::new("."),
        };

        let json = serde_json::to_string_pretty(items)
            .map_err(|e| CredentialError::Corrupt(e.to_string()))?;

        // Created 0600 before any secret is written.
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    fn update(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), CredentialError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut items = self.read_all()?;
        f(&mut items);
        self.write_all(&items)
    }
}

impl CredentialStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, CredentialError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CredentialError> {
        self.update(|items| {
            items.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), CredentialError> {
        self.update(|items| {
            items.remove(key);
        })
    }

    fn get_all(&self, keys: &[&str]) -> Result<Vec<Option<String>>, CredentialError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let items = self.read_all()?;
        Ok(keys.iter().map(|key| items.get(*key).cloned()).collect())
    }

    fn set_all(&self, entries: &[(&str, Option<&str>)]) -> Result<(), CredentialError> {
        self.update(|items| apply(items, entries))
    }
}
