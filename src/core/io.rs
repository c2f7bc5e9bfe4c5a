use async_trait::async_trait;
use anyhow::Result;

#[cfg(target_arch = "wasm32")]
pub trait StorageBounds {}
#[cfg(target_arch = "wasm32")]
impl<T> StorageBounds for T {}

#[cfg(not(target_arch = "wasm32"))]
pub trait StorageBounds: Send + Sync {}
#[cfg(not(target_arch = "wasm32"))]
impl<T: Send + Sync> StorageBounds for T {}

/// Path-keyed blob storage. The filesystem on native targets, IndexedDB in
/// the browser.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
pub trait Storage: StorageBounds {
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;
    async fn delete(&self, path: &str) -> Result<()>;
    async fn exists(&self, path: &str) -> Result<bool>;
    /// Every stored path directly under `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

// --- Native Implementation ---

#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug, Default)]
pub struct NativeStorage;

#[cfg(not(target_arch = "wasm32"))]
impl NativeStorage {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[async_trait]
impl Storage for NativeStorage {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(path).await?)
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        if tokio::fs::try_exists(path).await? {
            if std::path::Path::new(path).is_dir() {
                tokio::fs::remove_dir_all(path).await?;
            } else {
                tokio::fs::remove_file(path).await?;
            }
        }
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let path = std::path::Path::new(prefix);
        let mut entries = Vec::new();

        if path.is_dir() {
            let mut dir = tokio::fs::read_dir(path).await?;
            while let Some(entry) = dir.next_entry().await? {
                entries.push(entry.path().to_string_lossy().to_string());
            }
        } else if path.exists() {
            entries.push(prefix.to_string());
        }

        entries.sort();
        Ok(entries)
    }
}

// --- Web Implementation ---

#[cfg(target_arch = "wasm32")]
use idb::{Factory, ObjectStoreParams, TransactionMode};
#[cfg(target_arch = "wasm32")]
use wasm_bindgen::JsValue;
#[cfg(target_arch = "wasm32")]
use anyhow::anyhow;

#[cfg(target_arch = "wasm32")]
const DB_NAME: &str = "storystudio_db";
#[cfg(target_arch = "wasm32")]
const STORE_NAME: &str = "records";

#[cfg(target_arch = "wasm32")]
pub struct WebStorage {
    db: idb::Database,
}

#[cfg(target_arch = "wasm32")]
impl WebStorage {
    pub async fn new() -> Result<Self> {
        let factory = Factory::new().map_err(|e| anyhow!("Failed to create factory: {:?}", e))?;
        let mut open_request = factory.open(DB_NAME, Some(1)).map_err(|e| anyhow!("Failed to open DB: {:?}", e))?;

        open_request.on_upgrade_needed(|event| {
            if let Ok(db) = event.database() {
                if !db.store_names().iter().any(|n| n.as_str() == STORE_NAME) {
                    if let Err(e) = db.create_object_store(STORE_NAME, ObjectStoreParams::new()) {
                        log::error!("Failed to create object store: {:?}", e);
                    }
                }
            }
        });

        let db = open_request.await.map_err(|e| anyhow!("Failed to await DB open: {:?}", e))?;
        Ok(Self { db })
    }
}

#[cfg(target_arch = "wasm32")]
#[async_trait(?Send)]
impl Storage for WebStorage {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let transaction = self.db.transaction(&[STORE_NAME], TransactionMode::ReadOnly)
            .map_err(|e| anyhow!("Tx error: {:?}", e))?;
        let store = transaction.object_store(STORE_NAME).map_err(|e| anyhow!("Store error: {:?}", e))?;

        let value = store.get(JsValue::from_str(path))
            .map_err(|e| anyhow!("Get error: {:?}", e))?
            .await
            .map_err(|e| anyhow!("Get await error: {:?}", e))?;

        match value {
            Some(v) => {
                let array = js_sys::Uint8Array::new(&v);
                Ok(array.to_vec())
            },
            None => Err(anyhow!("Record not found: {}", path)),
        }
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let transaction = self.db.transaction(&[STORE_NAME], TransactionMode::ReadWrite)
            .map_err(|e| anyhow!("Tx error: {:?}", e))?;
        let store = transaction.object_store(STORE_NAME).map_err(|e| anyhow!("Store error: {:?}", e))?;

        let array = js_sys::Uint8Array::from(content);

        store.put(&array, Some(&JsValue::from_str(path)))
            .map_err(|e| anyhow!("Put error: {:?}", e))?
            .await
            .map_err(|e| anyhow!("Put await error: {:?}", e))?;

        transaction.commit()
            .map_err(|e| anyhow!("Commit error: {:?}", e))?
            .await
            .map_err(|e| anyhow!("Commit await error: {:?}", e))?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let transaction = self.db.transaction(&[STORE_NAME], TransactionMode::ReadWrite)
            .map_err(|e| anyhow!("Tx error: {:?}", e))?;
        let store = transaction.object_store(STORE_NAME).map_err(|e| anyhow!("Store error: {:?}", e))?;

        store.delete(JsValue::from_str(path))
            .map_err(|e| anyhow!("Delete error: {:?}", e))?
            .await
            .map_err(|e| anyhow!("Delete await error: {:?}", e))?;

        transaction.commit()
            .map_err(|e| anyhow!("Commit error: {:?}", e))?
            .await
            .map_err(|e| anyhow!("Commit await error: {:?}", e))?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let transaction = self.db.transaction(&[STORE_NAME], TransactionMode::ReadOnly)
            .map_err(|e| anyhow!("Tx error: {:?}", e))?;
        let store = transaction.object_store(STORE_NAME).map_err(|e| anyhow!("Store error: {:?}", e))?;

        let key = store.get_key(JsValue::from_str(path))
            .map_err(|e| anyhow!("GetKey error: {:?}", e))?
            .await
            .map_err(|e| anyhow!("GetKey await error: {:?}", e))?;

        Ok(key.is_some())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let transaction = self.db.transaction(&[STORE_NAME], TransactionMode::ReadOnly)
            .map_err(|e| anyhow!("Tx error: {:?}", e))?;
        let store = transaction.object_store(STORE_NAME).map_err(|e| anyhow!("Store error: {:?}", e))?;

        let keys = store.get_all_keys(None, None)
            .map_err(|e| anyhow!("GetAllKeys error: {:?}", e))?
            .await
            .map_err(|e| anyhow!("GetAllKeys await error: {:?}", e))?;

        let dir_prefix = format!("{}/", prefix.trim_end_matches('/'));
        let mut results: Vec<String> = keys
            .into_iter()
            .filter_map(|key| key.as_string())
            .filter(|k| k.starts_with(&dir_prefix) && !k[dir_prefix.len()..].contains('/'))
            .collect();
        results.sort();
        Ok(results)
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_native_roundtrip_and_list() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path().join("records");
        let storage = NativeStorage::new();

        let a = root.join("a.json").to_string_lossy().to_string();
        let b = root.join("b.json").to_string_lossy().to_string();
        storage.write(&b, b"{}").await?;
        storage.write(&a, b"[]").await?;

        assert!(storage.exists(&a).await?);
        assert_eq!(storage.read(&a).await?, b"[]");
        assert_eq!(storage.list(root.to_str().unwrap()).await?, vec![a.clone(), b.clone()]);

        storage.delete(&a).await?;
        assert!(!storage.exists(&a).await?);
        assert!(storage.list(temp_dir.path().join("missing").to_str().unwrap()).await?.is_empty());
        Ok(())
    }
}
