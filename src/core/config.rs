use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::messages::{Language, Messages};
use crate::core::state::AspectRatio;

pub const CONFIG_FILE: &str = "config.yml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_data")]
    pub data_folder: String,

    #[serde(default = "default_output")]
    pub output_folder: String,

    /// Narration language of voiceovers and user-facing messages.
    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default)]
    pub gemini: GeminiConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default = "default_edit_model")]
    pub edit_model: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Upper bound on scenes per story, checked before and after the split.
    #[serde(default = "default_max_scenes")]
    pub max_scenes: usize,
    #[serde(default = "default_video_duration")]
    pub default_video_duration: u32,
    #[serde(default = "default_scene_duration")]
    pub default_scene_duration: u32,
    #[serde(default)]
    pub default_aspect_ratio: AspectRatio,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_folder: default_data(),
            output_folder: default_output(),
            language: default_language(),
            gemini: GeminiConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: default_gemini_base_url(),
            text_model: default_text_model(),
            image_model: default_image_model(),
            edit_model: default_edit_model(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_scenes: default_max_scenes(),
            default_video_duration: default_video_duration(),
            default_scene_duration: default_scene_duration(),
            default_aspect_ratio: AspectRatio::default(),
        }
    }
}

fn default_data() -> String {
    "data".to_string()
}
fn default_output() -> String {
    "output".to_string()
}
fn default_language() -> String {
    "ar".to_string()
}
fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/".to_string()
}
fn default_text_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_image_model() -> String {
    "imagen-4.0-generate-001".to_string()
}
fn default_edit_model() -> String {
    "gemini-2.5-flash-image-preview".to_string()
}
fn default_max_scenes() -> usize {
    50
}
fn default_video_duration() -> u32 {
    60
}
fn default_scene_duration() -> u32 {
    5
}

impl Config {
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path).context("Failed to read config.yml")?;
        let config: Config =
            serde_yaml_ng::from_str(&content).context("Failed to parse config.yml")?;
        Ok(config)
    }

    /// Loads `path`, writing a default config there first if it is missing.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load_from(path);
        }
        log::info!("{} not found, writing defaults", path.display());
        let config = Config::default();
        config.save_to(path)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content).context("Failed to write config.yml")?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.data_folder)?;
        fs::create_dir_all(&self.output_folder)?;
        Ok(())
    }

    pub fn narration_language(&self) -> Language {
        Language::from_code(&self.language)
    }

    pub fn messages(&self) -> Messages {
        Messages::new(self.narration_language())
    }
}
