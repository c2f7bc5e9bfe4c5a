use log::{debug, error};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::core::error::{StudioError, ValidationError};
use crate::core::messages::Language;
use crate::core::state::{AspectRatio, Character, SceneDirective};
use crate::services::failover::ResilientCaller;
use crate::services::gemini::{EditOutcome, GenerativeClient};
use crate::utils::data_uri::InlineImage;

const STORY_CONTEXT: &str = "a story for an animated video";

/// Every generative operation of the studio. Each one goes through the
/// failover wrapper, so callers never pick an API key themselves.
#[derive(Clone)]
pub struct StudioService {
    caller: ResilientCaller,
    client: Arc<dyn GenerativeClient>,
    language: Language,
}

impl StudioService {
    pub fn new(caller: ResilientCaller, client: Arc<dyn GenerativeClient>, language: Language) -> Self {
        Self {
            caller,
            client,
            language,
        }
    }

    pub fn caller(&self) -> &ResilientCaller {
        &self.caller
    }

    pub async fn generate_character_image(&self, description: &str) -> Result<String, StudioError> {
        if description.trim().is_empty() {
            return Err(ValidationError::MissingDescription.into());
        }
        let prompt = character_portrait_prompt(description);
        self.generate_image(&prompt, AspectRatio::Square).await
    }

    /// Applies `instruction` to an existing portrait given as a data URI.
    pub async fn edit_character_image(&self, image_uri: &str, instruction: &str) -> Result<String, StudioError> {
        let image = InlineImage::parse(image_uri).ok_or(StudioError::InvalidImage)?;
        let client = self.client.as_ref();
        let image = &image;

        let outcome = self
            .caller
            .call(move |key| async move { client.edit_image(&key, image, instruction).await })
            .await?;

        match outcome {
            EditOutcome::Image(uri) => Ok(uri),
            EditOutcome::Text(text) => Err(StudioError::Refused(text)),
        }
    }

    pub async fn refine_text(&self, text: &str, context: &str) -> Result<String, StudioError> {
        let prompt = format!(
            "Rewrite and enhance the following text to be more descriptive, clear, and effective. The context is: {}. Text: \"{}\".",
            context, text
        );
        let refined = self.generate_text(&prompt, None).await?;
        Ok(refined.trim().to_string())
    }

    pub async fn refine_story_prompt(&self, prompt: &str) -> Result<String, StudioError> {
        self.refine_text(prompt, STORY_CONTEXT).await
    }

    /// Three English character descriptions for a 3D animated movie.
    pub async fn character_ideas(&self) -> Result<Vec<String>, StudioError> {
        let prompt = "Generate 3 distinct and creative character descriptions in English for a 3D animated movie.\n\
            Each description should be detailed, focusing on appearance, clothing, and one key personality trait.\n\
            The output must be a valid JSON array of strings.\n\
            Example: [\"A cheerful young sorceress with sparkling purple eyes, wearing a flowing gown made of moonlight and carrying a staff topped with a glowing crystal.\", \"A grumpy but lovable robot sidekick made of scrap metal, with one big, expressive headlight for an eye and mismatched limbs.\"]";
        let raw = self.generate_text(prompt, Some(&string_list_schema())).await?;
        parse_string_list(&raw).map_err(|e| {
            error!("Failed to parse character ideas: {}. Raw response: {}", e, raw);
            StudioError::malformed("character ideas")
        })
    }

    /// Three short story ideas written in the narration language.
    pub async fn story_ideas(&self) -> Result<Vec<String>, StudioError> {
        let prompt = format!(
            "Generate 3 short story ideas in {}, suitable for an animated short film for kids.\n\
            Each idea should be a single paragraph outlining the main character, the setting, and the central conflict.\n\
            The output must be a valid JSON array of strings.",
            self.language.english_name()
        );
        let raw = self.generate_text(&prompt, Some(&string_list_schema())).await?;
        parse_string_list(&raw).map_err(|e| {
            error!("Failed to parse story ideas: {}. Raw response: {}", e, raw);
            StudioError::malformed("story ideas")
        })
    }

    /// Asks the model to cut a story into scene directives. The result may
    /// hold a different number of scenes than `num_scenes` when the prompt
    /// already lays out its own scenes.
    pub async fn split_story(
        &self,
        story_prompt: &str,
        num_scenes: usize,
        characters: &[Character],
        scene_duration: u32,
    ) -> Result<Vec<SceneDirective>, StudioError> {
        let prompt = split_prompt(story_prompt, num_scenes, characters, scene_duration, self.language);
        let raw = self.generate_text(&prompt, Some(&scene_schema())).await?;
        parse_scene_directives(&raw).map_err(|e| {
            error!("Failed to parse scenes: {}. Raw response: {}", e, raw);
            StudioError::malformed("scene list")
        })
    }

    pub async fn generate_scene_image(&self, prompt: &str, aspect_ratio: AspectRatio) -> Result<String, StudioError> {
        self.generate_image(prompt, aspect_ratio).await
    }

    async fn generate_image(&self, prompt: &str, aspect_ratio: AspectRatio) -> Result<String, StudioError> {
        let client = self.client.as_ref();
        self.caller
            .call(move |key| async move { client.generate_image(&key, prompt, aspect_ratio).await })
            .await
    }

    async fn generate_text(&self, prompt: &str, schema: Option<&Value>) -> Result<String, StudioError> {
        debug!("Text request: {} chars, structured: {}", prompt.len(), schema.is_some());
        let client = self.client.as_ref();
        self.caller
            .call(move |key| async move { client.generate_text(&key, prompt, schema).await })
            .await
    }
}

pub fn character_portrait_prompt(description: &str) -> String {
    format!(
        "A full-body 3D Pixar-style character portrait of {}, clean solid light gray background, character reference sheet style.",
        description.trim()
    )
}

pub fn split_prompt(
    story_prompt: &str,
    num_scenes: usize,
    characters: &[Character],
    scene_duration: u32,
    language: Language,
) -> String {
    let character_descriptions = characters
        .iter()
        .map(|c| format!("- {}: {}", c.name, c.description))
        .collect::<Vec<_>>()
        .join("\n");
    let character_names = characters
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let narration = language.english_name();

    format!(
        r#"You are a storyboard assistant. Your task is to process a story and a list of characters to generate a sequence of scenes.

**Analysis Step:** First, analyze the 'Original Story' provided below.
- IF the story is already structured with clear scene breaks and contains specific prompts for image generation (e.g., "Scene 1: [image prompt]", "المشهد الأول: [وصف الصورة]"), you MUST use this existing structure and the provided prompts. Extract the image prompt for each scene. Then, based on that image prompt and the story context, generate the corresponding "animationPrompt" and "voiceoverPrompt". The number of scenes should match what's provided in the story; ignore the requested number of scenes.
- ELSE (if the story is a continuous narrative paragraph), you must break it down into {num_scenes} distinct scenes.

**Characters involved:**
{character_descriptions}

**Original Story:**
"""
{story_prompt}
"""

Based on your analysis, generate a JSON array of scene objects. The final number of scenes should be {num_scenes} if you are creating them, or match the count from the pre-structured story. For each scene, provide the following three properties:
1. "imagePrompt": A detailed, professional English prompt for an AI image generator. If the original story provided one, use it as a base and enhance it. To ensure visual consistency, when a character (e.g., "{character_names}") appears in a scene, you MUST integrate key descriptive elements from their profile in the "Characters involved" section into the prompt. Describe the setting, character actions, emotions, and composition in a cinematic style.
2. "animationPrompt": A detailed English prompt for an animator. Describe the camera movement (e.g., "slow pan right", "zoom in on character's face"), character animations, and any environmental effects (e.g., "wind blowing leaves") for a {scene_duration} second clip.
3. "voiceoverPrompt": A short, narrative script in {narration} for this scene, ready for a voice actor. This is the only part that should be in {narration}.

The output must be a valid JSON array matching the specified schema."#
    )
}

fn string_list_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": { "type": "STRING" }
    })
}

fn scene_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "imagePrompt": { "type": "STRING" },
                "animationPrompt": { "type": "STRING" },
                "voiceoverPrompt": { "type": "STRING" }
            },
            "required": ["imagePrompt", "animationPrompt", "voiceoverPrompt"]
        }
    })
}

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json").trim_end_matches("```").trim().to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```").trim_end_matches("```").trim().to_string()
    } else {
        s.to_string()
    }
}

fn parse_string_list(raw: &str) -> Result<Vec<String>, String> {
    let value: Value = serde_json::from_str(&strip_code_blocks(raw)).map_err(|e| e.to_string())?;
    let items = value.as_array().ok_or("not a JSON array")?;
    items
        .iter()
        .map(|item| item.as_str().map(str::to_string).ok_or_else(|| "element is not a string".to_string()))
        .collect()
}

/// Accepts only a non-empty array whose elements all carry the three
/// directive fields as non-empty strings.
pub fn parse_scene_directives(raw: &str) -> Result<Vec<SceneDirective>, String> {
    let value: Value = serde_json::from_str(&strip_code_blocks(raw)).map_err(|e| e.to_string())?;
    let items = value.as_array().ok_or("not a JSON array")?;
    if items.is_empty() {
        return Err("empty scene list".to_string());
    }

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let field = |name: &str| {
                item.get(name)
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .ok_or_else(|| format!("scene {} is missing {}", i + 1, name))
            };
            Ok(SceneDirective {
                image_prompt: field("imagePrompt")?,
                animation_prompt: field("animationPrompt")?,
                voiceover_prompt: field("voiceoverPrompt")?,
            })
        })
        .collect()
}
