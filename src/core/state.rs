use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    pub id: String,
    pub name: String,
    pub description: String,
    pub image_url: String, // data URI
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub id: String,
    pub image_prompt: String,
    pub animation_prompt: String,
    pub voiceover_prompt: String, // narration language
    pub image_url: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    pub name: String,
    pub original_prompt: String,
    pub characters: Vec<Character>,
    pub aspect_ratio: AspectRatio,
    pub scenes: Vec<Scene>,
    pub video_duration: u32, // seconds
    pub scene_duration: u32, // seconds
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 3] = [AspectRatio::Square, AspectRatio::Landscape, AspectRatio::Portrait];

    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AspectRatio::ALL
            .into_iter()
            .find(|ar| ar.as_str() == s.trim())
            .ok_or_else(|| anyhow::anyhow!("Unsupported aspect ratio: {}", s))
    }
}

/// One scene as described by the splitting call, before its image exists.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SceneDirective {
    pub image_prompt: String,
    pub animation_prompt: String,
    pub voiceover_prompt: String,
}

impl SceneDirective {
    pub fn into_scene(self, id: String, image_url: String) -> Scene {
        Scene {
            id,
            image_prompt: self.image_prompt,
            animation_prompt: self.animation_prompt,
            voiceover_prompt: self.voiceover_prompt,
            image_url,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Backup {
    pub characters: Vec<Character>,
    pub stories: Vec<Story>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_story_serializes_camel_case() {
        let story = Story {
            id: "1".to_string(),
            name: "Tale".to_string(),
            original_prompt: "Once".to_string(),
            characters: vec![],
            aspect_ratio: AspectRatio::Portrait,
            scenes: vec![],
            video_duration: 60,
            scene_duration: 5,
        };
        let json = serde_json::to_value(&story).unwrap();
        assert_eq!(json["originalPrompt"], "Once");
        assert_eq!(json["aspectRatio"], "9:16");
        assert_eq!(json["videoDuration"], 60);
    }

    #[test]
    fn test_aspect_ratio_parse() {
        assert_eq!("16:9".parse::<AspectRatio>().unwrap(), AspectRatio::Landscape);
        assert_eq!(" 1:1 ".parse::<AspectRatio>().unwrap(), AspectRatio::Square);
        assert!("4:3".parse::<AspectRatio>().is_err());
    }
}
