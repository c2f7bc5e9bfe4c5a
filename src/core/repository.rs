use crate::core::error::StudioError;
use crate::core::io::Storage;
use crate::core::messages::Messages;
use crate::core::state::{Backup, Character, Story};
use crate::utils::data_uri::InlineImage;
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

const CHARACTERS: &str = "characters";
const STORIES: &str = "stories";

/// Keyed store for the character and story collections. One JSON document
/// per record, keyed by `id`.
#[derive(Clone)]
pub struct Repository {
    root: String,
    storage: Arc<dyn Storage>,
}

impl Repository {
    pub fn new(data_folder: &str, storage: Arc<dyn Storage>) -> Self {
        Self {
            root: data_folder.trim_end_matches('/').to_string(),
            storage,
        }
    }

    fn collection_dir(&self, collection: &str) -> String {
        format!("{}/{}", self.root, collection)
    }

    fn record_path(&self, collection: &str, id: &str) -> Result<String> {
        if !is_valid_record_id(id) {
            bail!("Invalid record id {:?}", id);
        }
        Ok(format!("{}/{}.json", self.collection_dir(collection), id))
    }

    /// Checks that the backing storage is reachable.
    pub async fn init(&self) -> Result<()> {
        for collection in [CHARACTERS, STORIES] {
            self.storage
                .list(&self.collection_dir(collection))
                .await
                .with_context(|| format!("Failed to open {} collection", collection))?;
        }
        Ok(())
    }

    async fn get_all<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        let mut records = Vec::new();
        for path in self.storage.list(&self.collection_dir(collection)).await? {
            if !path.ends_with(".json") {
                continue;
            }
            let bytes = self.storage.read(&path).await?;
            let record = serde_json::from_slice(&bytes)
                .with_context(|| format!("Failed to parse record {}", path))?;
            records.push(record);
        }
        Ok(records)
    }

    async fn put<T: Serialize>(&self, collection: &str, id: &str, record: &T) -> Result<()> {
        let path = self.record_path(collection, id)?;
        let content = serde_json::to_string_pretty(record)?;
        self.storage.write(&path, content.as_bytes()).await
    }

    async fn insert<T: Serialize>(&self, collection: &str, id: &str, record: &T) -> Result<()> {
        if self.storage.exists(&self.record_path(collection, id)?).await? {
            bail!("A record with id {} already exists in {}", id, collection);
        }
        self.put(collection, id, record).await
    }

    async fn clear(&self, collection: &str) -> Result<()> {
        for path in self.storage.list(&self.collection_dir(collection)).await? {
            self.storage.delete(&path).await?;
        }
        Ok(())
    }

    pub async fn characters(&self) -> Result<Vec<Character>> {
        self.get_all(CHARACTERS).await
    }

    pub async fn add_character(&self, character: &Character) -> Result<()> {
        self.insert(CHARACTERS, &character.id, character).await
    }

    pub async fn update_character(&self, character: &Character) -> Result<()> {
        self.put(CHARACTERS, &character.id, character).await
    }

    pub async fn delete_character(&self, id: &str) -> Result<()> {
        self.storage.delete(&self.record_path(CHARACTERS, id)?).await
    }

    pub async fn stories(&self) -> Result<Vec<Story>> {
        self.get_all(STORIES).await
    }

    pub async fn add_story(&self, story: &Story) -> Result<()> {
        self.insert(STORIES, &story.id, story).await
    }

    pub async fn delete_story(&self, id: &str) -> Result<()> {
        self.storage.delete(&self.record_path(STORIES, id)?).await
    }

    pub async fn export_all(&self) -> Result<Backup> {
        Ok(Backup {
            characters: self.characters().await?,
            stories: self.stories().await?,
        })
    }

    /// Replaces both collections with the backup contents. Records without
    /// a name or with an id that is not a plain file name are skipped.
    /// Returns the number of records written.
    ///
    /// On a failed write the previous records are put back.
    pub async fn import_all(&self, backup: &Backup) -> Result<usize> {
        let mut staged = Vec::new();
        for character in &backup.characters {
            if !is_importable(&character.id, &character.name) {
                log::warn!("Skipping character with invalid id or missing name: {:?}", character.id);
                continue;
            }
            let path = self.record_path(CHARACTERS, &character.id)?;
            staged.push((path, serde_json::to_vec_pretty(character)?));
        }
        for story in &backup.stories {
            if !is_importable(&story.id, &story.name) {
                log::warn!("Skipping story with invalid id or missing name: {:?}", story.id);
                continue;
            }
            let path = self.record_path(STORIES, &story.id)?;
            staged.push((path, serde_json::to_vec_pretty(story)?));
        }

        let previous = self.snapshot().await.context("Failed to read existing records")?;
        if let Err(e) = self.replace_records(&staged).await {
            log::error!("Import failed, restoring {} previous records: {:?}", previous.len(), e);
            self.replace_records(&previous)
                .await
                .context("Failed to restore records after a failed import")?;
            return Err(e.context("Import failed"));
        }

        log::info!("Imported {} records", staged.len());
        Ok(staged.len())
    }

    async fn snapshot(&self) -> Result<Vec<(String, Vec<u8>)>> {
        let mut records = Vec::new();
        for collection in [CHARACTERS, STORIES] {
            for path in self.storage.list(&self.collection_dir(collection)).await? {
                if !path.ends_with(".json") {
                    continue;
                }
                let bytes = self.storage.read(&path).await?;
                records.push((path, bytes));
            }
        }
        Ok(records)
    }

    async fn replace_records(&self, records: &[(String, Vec<u8>)]) -> Result<()> {
        self.clear(CHARACTERS).await?;
        self.clear(STORIES).await?;
        for (path, bytes) in records {
            self.storage.write(path, bytes).await?;
        }
        Ok(())
    }
}

/// Ids double as file names, so an id must be a single plain path component.
fn is_valid_record_id(id: &str) -> bool {
    !id.is_empty()
        && !id.contains(['/', '\\'])
        && !id.contains("..")
        && !id.chars().any(char::is_control)
}

fn is_importable(id: &str, name: &str) -> bool {
    is_valid_record_id(id) && !name.is_empty()
}

/// Parses a backup file. Both `characters` and `stories` must be arrays.
pub fn parse_backup(json: &str) -> Result<Backup, StudioError> {
    let invalid = |reason: String| StudioError::InvalidBackup { reason };
    let value: Value = serde_json::from_str(json).map_err(|e| invalid(e.to_string()))?;
    let has_arrays = value.get(CHARACTERS).is_some_and(Value::is_array)
        && value.get(STORIES).is_some_and(Value::is_array);
    if !has_arrays {
        return Err(invalid("characters and stories must both be arrays".to_string()));
    }
    serde_json::from_value(value).map_err(|e| invalid(e.to_string()))
}

pub fn backup_file_name(now: DateTime<Utc>) -> String {
    format!("story-studio-backup-{}.json", now.format("%Y-%m-%d"))
}

/// Writes a story's voiceover script and scene images into `dir`.
pub async fn export_story_assets(
    story: &Story,
    dir: &str,
    storage: &dyn Storage,
    messages: &Messages,
) -> Result<Vec<String>> {
    let mut written = Vec::new();

    let script = story
        .scenes
        .iter()
        .enumerate()
        .map(|(i, scene)| format!("{}\n{}", messages.scene_heading(i + 1), scene.voiceover_prompt))
        .collect::<Vec<_>>()
        .join("\n\n");
    let script_path = Path::new(dir).join("voiceover_script.txt");
    let script_path = script_path.to_string_lossy().to_string();
    storage.write(&script_path, script.as_bytes()).await?;
    written.push(script_path);

    for (i, scene) in story.scenes.iter().enumerate() {
        let image = InlineImage::parse(&scene.image_url)
            .ok_or_else(|| anyhow!("Scene {} has no embedded image", i + 1))?;
        let bytes = image
            .decode()
            .ok_or_else(|| anyhow!("Scene {} image is not valid base64", i + 1))?;
        let path = Path::new(dir).join(format!("scene_{}.{}", i + 1, image.extension()));
        let path = path.to_string_lossy().to_string();
        storage.write(&path, &bytes).await?;
        written.push(path);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;
    use crate::core::messages::Language;
    use crate::core::state::{AspectRatio, Scene};
    use chrono::TimeZone;

    fn character(id: &str, name: &str) -> Character {
        Character {
            id: id.to_string(),
            name: name.to_string(),
            description: format!("{} description", name),
            image_url: "data:image/jpeg;base64,AAAA".to_string(),
        }
    }

    fn story(id: &str, name: &str) -> Story {
        Story {
            id: id.to_string(),
            name: name.to_string(),
            original_prompt: "A tale".to_string(),
            characters: vec![character("c1", "Alice")],
            aspect_ratio: AspectRatio::Landscape,
            scenes: vec![
                Scene {
                    id: "s-0".to_string(),
                    image_prompt: "Alice at dawn".to_string(),
                    animation_prompt: "slow pan".to_string(),
                    voiceover_prompt: "In the morning".to_string(),
                    image_url: "data:image/png;base64,aGVsbG8=".to_string(),
                },
                Scene {
                    id: "s-1".to_string(),
                    image_prompt: "Alice at dusk".to_string(),
                    animation_prompt: "zoom in".to_string(),
                    voiceover_prompt: "At night".to_string(),
                    image_url: "data:image/jpeg;base64,d29ybGQ=".to_string(),
                },
            ],
            video_duration: 10,
            scene_duration: 5,
        }
    }

    fn repo(root: &Path) -> Repository {
        Repository::new(root.to_str().unwrap(), Arc::new(NativeStorage::new()))
    }

    #[tokio::test]
    async fn test_character_crud() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let repo = repo(temp_dir.path());
        repo.init().await?;

        repo.add_character(&character("c1", "Alice")).await?;
        repo.add_character(&character("c2", "Bob")).await?;
        assert!(repo.add_character(&character("c1", "Again")).await.is_err());

        let mut edited = character("c1", "Alicia");
        edited.description = "changed".to_string();
        repo.update_character(&edited).await?;

        let all = repo.characters().await?;
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|c| c.name == "Alicia" && c.description == "changed"));

        repo.delete_character("c2").await?;
        assert_eq!(repo.characters().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_export_import_roundtrip() -> Result<()> {
        let source_dir = tempfile::tempdir()?;
        let source = repo(source_dir.path());
        source.add_character(&character("c1", "Alice")).await?;
        source.add_story(&story("st1", "Morning")).await?;

        let json = serde_json::to_string_pretty(&source.export_all().await?)?;

        let target_dir = tempfile::tempdir()?;
        let target = repo(target_dir.path());
        target.add_character(&character("old", "Stale")).await?;

        let written = target.import_all(&parse_backup(&json)?).await?;
        assert_eq!(written, 2);

        let characters = target.characters().await?;
        assert_eq!(characters.len(), 1);
        assert_eq!(characters[0].id, "c1");
        let stories = target.stories().await?;
        assert_eq!(stories.len(), 1);
        assert_eq!(stories[0].name, "Morning");
        assert_eq!(stories[0].scenes, story("st1", "Morning").scenes);
        Ok(())
    }

    #[tokio::test]
    async fn test_import_skips_records_without_id_or_name() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let repo = repo(temp_dir.path());
        let backup = Backup {
            characters: vec![character("", "NoId"), character("c2", ""), character("c3", "Ok")],
            stories: vec![story("", "NoId")],
        };
        assert_eq!(repo.import_all(&backup).await?, 1);
        assert_eq!(repo.characters().await?[0].id, "c3");
        assert!(repo.stories().await?.is_empty());
        Ok(())
    }

    #[test]
    fn test_parse_backup_requires_both_arrays() {
        for bad in [r#"{"characters": []}"#, r#"{"characters": {}, "stories": []}"#, "not json"] {
            let err = parse_backup(bad).unwrap_err();
            assert!(matches!(err, StudioError::InvalidBackup { .. }));
        }
        let backup = parse_backup(r#"{"characters": [], "stories": []}"#).unwrap();
        assert_eq!(backup, Backup::default());
    }

    #[test]
    fn test_invalid_backup_has_its_own_message() {
        let messages = Messages::new(Language::English);
        let err = parse_backup("{").unwrap_err();
        assert_eq!(err.user_message(&messages), messages.invalid_backup());
        assert_ne!(err.user_message(&messages), messages.unknown_error());
    }

    #[test]
    fn test_record_id_validation() {
        assert!(is_valid_record_id("1700000000000abcd"));
        assert!(is_valid_record_id("st-1"));
        for bad in ["", "a/b", "a\\b", "..", "../../escaped", "x..y", "bad\0id", "line\nbreak"] {
            assert!(!is_valid_record_id(bad), "{:?} should be rejected", bad);
        }
    }

    #[tokio::test]
    async fn test_writes_reject_unsafe_ids() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let data = temp_dir.path().join("data");
        let repo = repo(&data);

        assert!(repo.add_character(&character("../escaped", "Eve")).await.is_err());
        assert!(repo.update_character(&character("a/b", "Eve")).await.is_err());
        assert!(repo.add_story(&story("..\\up", "Eve")).await.is_err());
        assert!(repo.delete_story("../stories").await.is_err());
        assert!(!temp_dir.path().join("escaped.json").exists());
        assert!(repo.characters().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_import_skips_unsafe_ids() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let data = temp_dir.path().join("data");
        let repo = repo(&data);
        let backup = Backup {
            characters: vec![
                character("a/b", "Nested"),
                character("../../escaped", "Escaped"),
                character("bad\0id", "Control"),
                character("ok", "Ok"),
            ],
            stories: vec![story("../st", "Up"), story("st1", "Morning")],
        };

        assert_eq!(repo.import_all(&backup).await?, 2);

        let ids: Vec<String> = repo.characters().await?.into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["ok".to_string()]);
        assert_eq!(repo.stories().await?.len(), 1);
        assert!(!temp_dir.path().join("escaped.json").exists());
        assert!(!data.join("escaped.json").exists());
        assert!(!data.join("characters").join("a").exists());

        let exported = repo.export_all().await?;
        assert_eq!(exported.characters.len() + exported.stories.len(), 2);
        Ok(())
    }

    /// Filesystem storage that fails every write whose path contains `fail_on`.
    struct FailingStorage {
        inner: NativeStorage,
        fail_on: String,
    }

    #[async_trait::async_trait]
    impl Storage for FailingStorage {
        async fn read(&self, path: &str) -> Result<Vec<u8>> {
            self.inner.read(path).await
        }

        async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
            if path.contains(&self.fail_on) {
                bail!("disk full");
            }
            self.inner.write(path, content).await
        }

        async fn delete(&self, path: &str) -> Result<()> {
            self.inner.delete(path).await
        }

        async fn exists(&self, path: &str) -> Result<bool> {
            self.inner.exists(path).await
        }

        async fn list(&self, prefix: &str) -> Result<Vec<String>> {
            self.inner.list(prefix).await
        }
    }

    #[tokio::test]
    async fn test_failed_import_keeps_existing_records() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path().to_str().unwrap();
        let repo = Repository::new(
            root,
            Arc::new(FailingStorage {
                inner: NativeStorage::new(),
                fail_on: "broken".to_string(),
            }),
        );
        repo.add_character(&character("keep", "Keeper")).await?;
        repo.add_story(&story("st1", "Morning")).await?;

        let backup = Backup {
            characters: vec![character("fresh", "Fresh"), character("broken", "Broken")],
            stories: vec![],
        };
        assert!(repo.import_all(&backup).await.is_err());

        let characters = repo.characters().await?;
        assert_eq!(characters.len(), 1);
        assert_eq!(characters[0].id, "keep");
        assert_eq!(characters[0].name, "Keeper");
        let stories = repo.stories().await?;
        assert_eq!(stories.len(), 1);
        assert_eq!(stories[0].id, "st1");
        Ok(())
    }

    #[test]
    fn test_backup_file_name() {
        let now = Utc.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap();
        assert_eq!(backup_file_name(now), "story-studio-backup-2026-03-07.json");
    }

    #[tokio::test]
    async fn test_export_story_assets() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let dir = temp_dir.path().join("Morning");
        let storage = NativeStorage::new();
        let messages = Messages::new(Language::English);

        let files = export_story_assets(&story("st1", "Morning"), dir.to_str().unwrap(), &storage, &messages).await?;
        assert_eq!(files.len(), 3);

        let script = std::fs::read_to_string(dir.join("voiceover_script.txt"))?;
        assert_eq!(script, "Scene 1:\nIn the morning\n\nScene 2:\nAt night");
        assert_eq!(std::fs::read(dir.join("scene_1.png"))?, b"hello");
        assert_eq!(std::fs::read(dir.join("scene_2.jpg"))?, b"world");
        Ok(())
    }
}
