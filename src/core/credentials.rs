//! API key rotation.
//!
//! `CredentialStore` is the plain ordered key list with an active pointer.
//! `CredentialManager` shares one store between the failover wrapper and the
//! settings screens, and writes it back to storage after every mutation.

use crate::core::io::Storage;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

pub type Credential = String;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialStore {
    keys: Vec<Credential>,
    active_index: usize,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a store from persisted state. An out-of-range index resets to 0.
    pub fn from_state(state: CredentialState) -> Self {
        let active_index = if state.active_index < state.keys.len() {
            state.active_index
        } else {
            0
        };
        Self {
            keys: state.keys,
            active_index,
        }
    }

    pub fn state(&self) -> CredentialState {
        CredentialState {
            keys: self.keys.clone(),
            active_index: self.active_index,
        }
    }

    pub fn list(&self) -> Vec<Credential> {
        self.keys.clone()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn active(&self) -> Option<&Credential> {
        self.keys.get(self.active_index)
    }

    pub fn active_index(&self) -> Option<usize> {
        if self.keys.is_empty() {
            None
        } else {
            Some(self.active_index)
        }
    }

    pub fn add(&mut self, key: &str) -> bool {
        if self.keys.iter().any(|k| k == key) {
            return false;
        }
        self.keys.push(key.to_string());
        if self.keys.len() == 1 {
            self.active_index = 0;
        }
        true
    }

    pub fn remove(&mut self, key: &str) -> bool {
        let Some(position) = self.keys.iter().position(|k| k == key) else {
            return false;
        };
        self.keys.remove(position);

        if self.active_index >= position {
            self.active_index = self.active_index.saturating_sub(1);
        }
        if self.active_index >= self.keys.len() {
            self.active_index = 0;
        }
        true
    }

    pub fn set_active(&mut self, key: &str) -> bool {
        match self.keys.iter().position(|k| k == key) {
            Some(position) => {
                self.active_index = position;
                true
            }
            None => false,
        }
    }

    pub fn advance(&mut self) {
        if !self.keys.is_empty() {
            self.active_index = (self.active_index + 1) % self.keys.len();
        }
    }
}

/// On-disk form of the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialState {
    #[serde(default)]
    pub keys: Vec<Credential>,
    #[serde(default)]
    pub active_index: usize,
}

/// Shared, persisted handle to the key store.
#[derive(Clone)]
pub struct CredentialManager {
    store: Arc<Mutex<CredentialStore>>,
    storage: Option<Arc<dyn Storage>>,
    path: String,
}

impl CredentialManager {
    /// Store that lives only in memory. Used by tests and one-shot runs.
    pub fn in_memory(store: CredentialStore) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            storage: None,
            path: String::new(),
        }
    }

    pub async fn load(data_folder: &str, storage: Arc<dyn Storage>) -> Result<Self> {
        let path = Path::new(data_folder).join("credentials.json");
        let path = path.to_string_lossy().to_string();

        let (store, needs_save) = if storage.exists(&path).await? {
            let bytes = storage.read(&path).await?;
            match serde_json::from_slice::<CredentialState>(&bytes) {
                Ok(state) => {
                    let out_of_range = state.active_index >= state.keys.len() && state.active_index != 0;
                    (CredentialStore::from_state(state), out_of_range)
                }
                Err(e) => {
                    log::error!("Failed to parse stored API keys, starting empty: {}", e);
                    (CredentialStore::new(), false)
                }
            }
        } else {
            (CredentialStore::new(), false)
        };

        let manager = Self {
            store: Arc::new(Mutex::new(store)),
            storage: Some(storage),
            path,
        };
        if needs_save {
            manager.save().await?;
        }
        Ok(manager)
    }

    fn lock(&self) -> MutexGuard<'_, CredentialStore> {
        // Mutations are single-step, a poisoned store is still consistent.
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn list(&self) -> Vec<Credential> {
        self.lock().list()
    }

    pub fn active(&self) -> Option<Credential> {
        self.lock().active().cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub async fn add(&self, key: &str) -> Result<bool> {
        let inserted = self.lock().add(key);
        if inserted {
            self.save().await?;
        }
        Ok(inserted)
    }

    /// Adds every key in `keys`, returning how many were new.
    pub async fn add_many(&self, keys: &[String]) -> Result<usize> {
        let added = {
            let mut store = self.lock();
            keys.iter().filter(|k| store.add(k)).count()
        };
        if added > 0 {
            self.save().await?;
        }
        Ok(added)
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        let removed = self.lock().remove(key);
        if removed {
            self.save().await?;
        }
        Ok(())
    }

    pub async fn set_active(&self, key: &str) -> Result<bool> {
        let found = self.lock().set_active(key);
        if found {
            self.save().await?;
        }
        Ok(found)
    }

    pub async fn advance(&self) -> Result<()> {
        self.lock().advance();
        self.save().await
    }

    async fn save(&self) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let state = self.lock().state();
        let content = serde_json::to_string_pretty(&state)?;
        storage
            .write(&self.path, content.as_bytes())
            .await
            .context("Failed to save API keys")
    }
}

/// Splits pasted text into individual keys (whitespace or comma separated).
pub fn parse_key_list(input: &str) -> Vec<String> {
    input
        .split(|c: char| c.is_whitespace() || c == ',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}
