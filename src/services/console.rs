use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::autocompletion::{Autocomplete, Replacement};
use inquire::{Confirm, CustomType, CustomUserError, InquireError, MultiSelect, Select, Text};
use log::info;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::core::config::Config;
use crate::core::credentials::{mask_key, parse_key_list};
use crate::core::error::StudioError;
use crate::core::ids;
use crate::core::io::Storage;
use crate::core::messages::Messages;
use crate::core::repository::{backup_file_name, export_story_assets, parse_backup, Repository};
use crate::core::state::{AspectRatio, Character, Story};
use crate::services::mention::{apply_mention, find_mention, suggest};
use crate::services::pipeline::{ProgressSink, ProgressState, ScenePipeline, StepStatus, StoryRequest};
use crate::services::studio::StudioService;

#[derive(Debug, Clone, Copy)]
enum MenuItem {
    ApiKeys,
    NewCharacter,
    EditCharacter,
    DeleteCharacter,
    NewStory,
    ShowStory,
    ExportAssets,
    DeleteStory,
    ExportBackup,
    ImportBackup,
    Quit,
}

impl MenuItem {
    const ALL: [MenuItem; 11] = [
        MenuItem::ApiKeys,
        MenuItem::NewCharacter,
        MenuItem::EditCharacter,
        MenuItem::DeleteCharacter,
        MenuItem::NewStory,
        MenuItem::ShowStory,
        MenuItem::ExportAssets,
        MenuItem::DeleteStory,
        MenuItem::ExportBackup,
        MenuItem::ImportBackup,
        MenuItem::Quit,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditAction {
    Rename,
    Describe,
    RegeneratePortrait,
    EditPortrait,
    Save,
}

impl EditAction {
    const ALL: [EditAction; 5] = [
        EditAction::Rename,
        EditAction::Describe,
        EditAction::RegeneratePortrait,
        EditAction::EditPortrait,
        EditAction::Save,
    ];
}

impl fmt::Display for EditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EditAction::Rename => "Rename",
            EditAction::Describe => "Edit description",
            EditAction::RegeneratePortrait => "Regenerate portrait from description",
            EditAction::EditPortrait => "Edit portrait with an instruction",
            EditAction::Save => "Save and return",
        };
        f.write_str(label)
    }
}

/// Renames `character` unless `name` is blank.
fn rename(character: &mut Character, name: &str) -> bool {
    let name = name.trim();
    if name.is_empty() {
        return false;
    }
    character.name = name.to_string();
    true
}

impl fmt::Display for MenuItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MenuItem::ApiKeys => "Manage API keys",
            MenuItem::NewCharacter => "Create character",
            MenuItem::EditCharacter => "Edit character",
            MenuItem::DeleteCharacter => "Delete character",
            MenuItem::NewStory => "Create story",
            MenuItem::ShowStory => "Show story",
            MenuItem::ExportAssets => "Export story assets",
            MenuItem::DeleteStory => "Delete story",
            MenuItem::ExportBackup => "Export backup",
            MenuItem::ImportBackup => "Import backup",
            MenuItem::Quit => "Quit",
        };
        f.write_str(label)
    }
}

/// Wraps a record so `Select` can show it by name.
struct Choice<T> {
    label: String,
    value: T,
}

impl<T> fmt::Display for Choice<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

fn character_choices(characters: Vec<Character>) -> Vec<Choice<Character>> {
    characters
        .into_iter()
        .map(|c| Choice {
            label: c.name.clone(),
            value: c,
        })
        .collect()
}

fn story_choices(stories: Vec<Story>) -> Vec<Choice<Story>> {
    stories
        .into_iter()
        .map(|s| Choice {
            label: format!("{} ({} scenes, {})", s.name, s.scenes.len(), s.aspect_ratio),
            value: s,
        })
        .collect()
}

/// Completes `@name` tokens in the story prompt from the chosen characters.
#[derive(Clone)]
struct MentionCompleter {
    characters: Vec<Character>,
}

impl Autocomplete for MentionCompleter {
    fn get_suggestions(&mut self, input: &str) -> Result<Vec<String>, CustomUserError> {
        let Some(mention) = find_mention(input, input.len()) else {
            return Ok(Vec::new());
        };
        Ok(suggest(&mention, &self.characters)
            .into_iter()
            .map(|c| c.name.clone())
            .collect())
    }

    fn get_completion(
        &mut self,
        input: &str,
        highlighted_suggestion: Option<String>,
    ) -> Result<Replacement, CustomUserError> {
        let Some(mention) = find_mention(input, input.len()) else {
            return Ok(None);
        };
        let name = match highlighted_suggestion {
            Some(name) => name,
            None => match suggest(&mention, &self.characters).first() {
                Some(c) => c.name.clone(),
                None => return Ok(None),
            },
        };
        let (text, _) = apply_mention(input, &mention, input.len(), &name);
        Ok(Some(text))
    }
}

/// Feeds pipeline progress into a terminal progress bar.
struct ProgressBarSink {
    bar: ProgressBar,
}

impl ProgressBarSink {
    fn new(title: &str) -> Result<Self> {
        let bar = ProgressBar::new(1);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );
        bar.println(title);
        Ok(Self { bar })
    }
}

impl ProgressSink for ProgressBarSink {
    fn update(&mut self, progress: &ProgressState) {
        self.bar.set_length(progress.steps.len() as u64);
        self.bar.set_position(progress.completed_steps() as u64);
        if let Some(step) = progress.steps.get(progress.current_step) {
            self.bar.set_message(step.clone());
        }

        if let Some(message) = &progress.error_message {
            self.bar.abandon_with_message(message.clone());
        } else if progress.statuses.iter().all(|s| *s == StepStatus::Completed) {
            self.bar.finish_with_message(progress.title.clone());
        }
    }
}

/// Interactive terminal front end.
pub struct Console {
    config: Config,
    messages: Messages,
    storage: Arc<dyn Storage>,
    repository: Repository,
    studio: StudioService,
    pipeline: ScenePipeline,
}

impl Console {
    pub fn new(config: Config, storage: Arc<dyn Storage>, studio: StudioService) -> Self {
        let messages = config.messages();
        let repository = Repository::new(&config.data_folder, storage.clone());
        let pipeline = ScenePipeline::new(studio.clone(), messages, config.pipeline.max_scenes);
        Self {
            config,
            messages,
            storage,
            repository,
            studio,
            pipeline,
        }
    }

    pub async fn run(&self) -> Result<()> {
        self.repository.init().await?;

        loop {
            let item = match Select::new("Story Studio", MenuItem::ALL.to_vec()).prompt() {
                Ok(item) => item,
                Err(InquireError::OperationCanceled) | Err(InquireError::OperationInterrupted) => break,
                Err(e) => return Err(e.into()),
            };

            let result = match item {
                MenuItem::ApiKeys => self.manage_keys().await,
                MenuItem::NewCharacter => self.new_character().await,
                MenuItem::EditCharacter => self.edit_character().await,
                MenuItem::DeleteCharacter => self.delete_character().await,
                MenuItem::NewStory => self.new_story().await,
                MenuItem::ShowStory => self.show_story().await,
                MenuItem::ExportAssets => self.export_assets().await,
                MenuItem::DeleteStory => self.delete_story().await,
                MenuItem::ExportBackup => self.export_backup().await,
                MenuItem::ImportBackup => self.import_backup().await,
                MenuItem::Quit => break,
            };

            if let Err(e) = result {
                match e.downcast_ref::<InquireError>() {
                    Some(InquireError::OperationInterrupted) => break,
                    Some(InquireError::OperationCanceled) => continue,
                    _ => eprintln!("{}", e),
                }
            }
        }
        Ok(())
    }

    fn studio_error(&self, e: StudioError) -> anyhow::Error {
        log::debug!("Studio error: {:?}", e);
        anyhow!(e.user_message(&self.messages))
    }

    async fn manage_keys(&self) -> Result<()> {
        let credentials = self.studio.caller().credentials();
        let active = credentials.active();
        if credentials.is_empty() {
            println!("No API keys stored.");
        }
        for key in credentials.list() {
            let marker = if Some(&key) == active.as_ref() { "*" } else { " " };
            println!("{} {}", marker, mask_key(&key));
        }

        let action = Select::new("API keys", vec!["Add keys", "Remove key", "Set active key", "Back"]).prompt()?;
        match action {
            "Add keys" => {
                let input = Text::new("Paste one or more keys (space or comma separated):").prompt()?;
                let added = credentials.add_many(&parse_key_list(&input)).await?;
                println!("Added {} new key(s).", added);
            }
            "Remove key" | "Set active key" => {
                let choices: Vec<Choice<String>> = credentials
                    .list()
                    .into_iter()
                    .map(|k| Choice {
                        label: mask_key(&k),
                        value: k,
                    })
                    .collect();
                if choices.is_empty() {
                    return Ok(());
                }
                let choice = Select::new("Key:", choices).prompt()?;
                if action == "Remove key" {
                    credentials.remove(&choice.value).await?;
                } else {
                    credentials.set_active(&choice.value).await?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn new_character(&self) -> Result<()> {
        let name = Text::new("Character name:").prompt()?;
        if name.trim().is_empty() {
            return Err(anyhow!("Character name is required"));
        }

        let use_ideas = Confirm::new("Suggest descriptions?").with_default(false).prompt()?;
        let mut description = if use_ideas {
            let ideas = self.studio.character_ideas().await.map_err(|e| self.studio_error(e))?;
            Select::new("Pick a description:", ideas).prompt()?
        } else {
            Text::new("Description:").prompt()?
        };

        if Confirm::new("Refine the description?").with_default(false).prompt()? {
            description = self
                .studio
                .refine_text(&description, "a character description for an image generator")
                .await
                .map_err(|e| self.studio_error(e))?;
            println!("{}", description);
        }

        println!("Generating portrait...");
        let image_url = self
            .studio
            .generate_character_image(&description)
            .await
            .map_err(|e| self.studio_error(e))?;

        let character = Character {
            id: ids::new_id(),
            name: name.trim().to_string(),
            description,
            image_url,
        };
        self.repository.add_character(&character).await?;
        info!("Saved character {}", character.name);
        println!("Character '{}' saved.", character.name);
        Ok(())
    }

    /// Edits a copy of the chosen character; nothing is stored until
    /// "Save and return" is picked.
    async fn edit_character(&self) -> Result<()> {
        let choices = character_choices(self.repository.characters().await?);
        if choices.is_empty() {
            println!("No characters yet.");
            return Ok(());
        }
        let mut character = Select::new("Character:", choices).prompt()?.value;

        loop {
            let action = Select::new(&format!("Editing '{}':", character.name), EditAction::ALL.to_vec())
                .prompt()?;
            match action {
                EditAction::Rename => {
                    let name = Text::new("Name:").with_initial_value(&character.name).prompt()?;
                    if !rename(&mut character, &name) {
                        println!("Name unchanged.");
                    }
                }
                EditAction::Describe => {
                    let mut description = Text::new("Description:")
                        .with_initial_value(&character.description)
                        .prompt()?;
                    if Confirm::new("Refine the description?").with_default(false).prompt()? {
                        description = self
                            .studio
                            .refine_text(&description, "a character description for an image generator")
                            .await
                            .map_err(|e| self.studio_error(e))?;
                        println!("{}", description);
                    }
                    character.description = description;
                }
                EditAction::RegeneratePortrait => {
                    println!("Generating portrait...");
                    character.image_url = self
                        .studio
                        .generate_character_image(&character.description)
                        .await
                        .map_err(|e| self.studio_error(e))?;
                }
                EditAction::EditPortrait => {
                    let instruction = Text::new("What should change in the image?").prompt()?;
                    println!("Editing portrait...");
                    character.image_url = self
                        .studio
                        .edit_character_image(&character.image_url, &instruction)
                        .await
                        .map_err(|e| self.studio_error(e))?;
                }
                EditAction::Save => break,
            }
        }

        self.repository.update_character(&character).await?;
        info!("Updated character {}", character.id);
        println!("Character '{}' updated.", character.name);
        Ok(())
    }

    async fn delete_character(&self) -> Result<()> {
        let choices = character_choices(self.repository.characters().await?);
        if choices.is_empty() {
            return Ok(());
        }
        let character = Select::new("Delete character:", choices).prompt()?.value;
        if Confirm::new(&format!("Delete '{}'?", character.name)).with_default(false).prompt()? {
            self.repository.delete_character(&character.id).await?;
        }
        Ok(())
    }

    async fn new_story(&self) -> Result<()> {
        let all = character_choices(self.repository.characters().await?);
        if all.is_empty() {
            println!("Create a character first.");
            return Ok(());
        }

        let name = Text::new("Story name:").prompt()?;
        let characters: Vec<Character> = MultiSelect::new("Characters:", all)
            .prompt()?
            .into_iter()
            .map(|c| c.value)
            .collect();

        let mut prompt = if Confirm::new("Suggest story ideas?").with_default(false).prompt()? {
            let ideas = self.studio.story_ideas().await.map_err(|e| self.studio_error(e))?;
            Select::new("Pick an idea:", ideas).prompt()?
        } else {
            Text::new("Story (use @ to mention a character):")
                .with_autocomplete(MentionCompleter {
                    characters: characters.clone(),
                })
                .prompt()?
        };

        if Confirm::new("Refine the story?").with_default(false).prompt()? {
            prompt = self
                .studio
                .refine_story_prompt(&prompt)
                .await
                .map_err(|e| self.studio_error(e))?;
            println!("{}", prompt);
        }

        let defaults = &self.config.pipeline;
        let aspect_ratio = Select::new("Aspect ratio:", AspectRatio::ALL.to_vec())
            .with_starting_cursor(
                AspectRatio::ALL
                    .iter()
                    .position(|a| *a == defaults.default_aspect_ratio)
                    .unwrap_or(0),
            )
            .prompt()?;
        let video_duration = CustomType::<u32>::new("Video length (seconds):")
            .with_default(defaults.default_video_duration)
            .prompt()?;
        let scene_duration = CustomType::<u32>::new("Scene length (seconds):")
            .with_default(defaults.default_scene_duration)
            .prompt()?;

        let request = StoryRequest {
            name,
            prompt,
            characters,
            aspect_ratio,
            video_duration,
            scene_duration,
        };

        let mut sink = ProgressBarSink::new(&self.messages.progress_title(&request.name))?;
        let story = match self.pipeline.run(&request, &mut sink).await {
            Ok(story) => story,
            Err(failure) => return Err(self.studio_error(failure.error)),
        };

        self.repository.add_story(&story).await?;
        println!("Story '{}' saved with {} scenes.", story.name, story.scenes.len());
        Ok(())
    }

    async fn pick_story(&self, message: &str) -> Result<Option<Story>> {
        let choices = story_choices(self.repository.stories().await?);
        if choices.is_empty() {
            println!("No stories yet.");
            return Ok(None);
        }
        Ok(Some(Select::new(message, choices).prompt()?.value))
    }

    async fn show_story(&self) -> Result<()> {
        let Some(story) = self.pick_story("Story:").await? else {
            return Ok(());
        };
        println!("{}\n{}\n", story.name, story.original_prompt);
        for (i, scene) in story.scenes.iter().enumerate() {
            println!("{}", self.messages.scene_heading(i + 1));
            println!("  image:     {}", scene.image_prompt);
            println!("  animation: {}", scene.animation_prompt);
            println!("  voiceover: {}", scene.voiceover_prompt);
        }
        Ok(())
    }

    async fn export_assets(&self) -> Result<()> {
        let Some(story) = self.pick_story("Export story:").await? else {
            return Ok(());
        };
        let dir = Path::new(&self.config.output_folder).join(sanitize_file_name(&story.name));
        let dir = dir.to_string_lossy().to_string();
        let files = export_story_assets(&story, &dir, self.storage.as_ref(), &self.messages).await?;
        println!("Wrote {} files to {}", files.len(), dir);
        Ok(())
    }

    async fn delete_story(&self) -> Result<()> {
        let Some(story) = self.pick_story("Delete story:").await? else {
            return Ok(());
        };
        if Confirm::new(&format!("Delete '{}'?", story.name)).with_default(false).prompt()? {
            self.repository.delete_story(&story.id).await?;
        }
        Ok(())
    }

    async fn export_backup(&self) -> Result<()> {
        let backup = self.repository.export_all().await?;
        let path = Path::new(&self.config.output_folder).join(backup_file_name(ids::now()));
        let path = path.to_string_lossy().to_string();
        let content = serde_json::to_string_pretty(&backup)?;
        self.storage.write(&path, content.as_bytes()).await?;
        println!(
            "Exported {} characters and {} stories to {}",
            backup.characters.len(),
            backup.stories.len(),
            path
        );
        Ok(())
    }

    async fn import_backup(&self) -> Result<()> {
        let path = Text::new("Backup file:").prompt()?;
        let bytes = self
            .storage
            .read(path.trim())
            .await
            .with_context(|| format!("Failed to read {}", path.trim()))?;
        let backup = parse_backup(&String::from_utf8_lossy(&bytes)).map_err(|e| self.studio_error(e))?;

        let question = format!(
            "Replace all data with {} characters and {} stories?",
            backup.characters.len(),
            backup.stories.len()
        );
        if Confirm::new(&question).with_default(false).prompt()? {
            let written = self.repository.import_all(&backup).await?;
            println!("Imported {} records.", written);
        }
        Ok(())
    }
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "story".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn character(name: &str) -> Character {
        Character {
            id: name.to_lowercase(),
            name: name.to_string(),
            description: String::new(),
            image_url: String::new(),
        }
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("The Key/Part 1"), "The_Key_Part_1");
        assert_eq!(sanitize_file_name("قصة"), "قصة");
        assert_eq!(sanitize_file_name("  "), "story");
    }

    #[test]
    fn test_rename_ignores_blank_names() {
        let mut alice = character("Alice");
        assert!(!rename(&mut alice, "   "));
        assert_eq!(alice.name, "Alice");
        assert!(rename(&mut alice, "  Alicia "));
        assert_eq!(alice.name, "Alicia");
        assert_eq!(alice.id, "alice");
    }

    #[test]
    fn test_edit_actions_end_with_save() {
        assert_eq!(EditAction::ALL.last(), Some(&EditAction::Save));
        assert_eq!(EditAction::Describe.to_string(), "Edit description");
    }

    #[test]
    fn test_mention_completer() {
        let mut completer = MentionCompleter {
            characters: vec![character("Alice"), character("Bob")],
        };
        assert_eq!(completer.get_suggestions("Hello @al").unwrap(), vec!["Alice"]);
        assert!(completer.get_suggestions("Hello al").unwrap().is_empty());
        assert_eq!(
            completer.get_completion("Hello @b", None).unwrap(),
            Some("Hello Bob ".to_string())
        );
        assert_eq!(completer.get_completion("Hello @zed", None).unwrap(), None);
    }
}
