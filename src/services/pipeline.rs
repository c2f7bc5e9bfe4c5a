use log::{error, info};
use thiserror::Error;

use crate::core::error::{StudioError, ValidationError};
use crate::core::ids;
use crate::core::messages::Messages;
use crate::core::state::{AspectRatio, Character, Story};
use crate::services::studio::StudioService;

/// Everything the user supplies to create a story.
#[derive(Debug, Clone)]
pub struct StoryRequest {
    pub name: String,
    pub prompt: String,
    pub characters: Vec<Character>,
    pub aspect_ratio: AspectRatio,
    pub video_duration: u32,
    pub scene_duration: u32,
}

/// `ceil(video_duration / scene_duration)`, or `None` for a zero scene length.
pub fn scene_count(video_duration: u32, scene_duration: u32) -> Option<usize> {
    if scene_duration == 0 {
        return None;
    }
    Some(video_duration.div_ceil(scene_duration) as usize)
}

impl StoryRequest {
    /// Checks the request before any remote call and returns the scene
    /// count to ask for.
    pub fn validate(&self, has_credential: bool, max_scenes: usize) -> Result<usize, ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingName);
        }
        if self.prompt.trim().is_empty() {
            return Err(ValidationError::MissingPrompt);
        }
        if self.characters.is_empty() {
            return Err(ValidationError::NoCharacters);
        }
        if !has_credential {
            return Err(ValidationError::NoCredential);
        }
        let requested = scene_count(self.video_duration, self.scene_duration)
            .ok_or(ValidationError::InvalidSceneDuration)?;
        if requested > max_scenes {
            return Err(ValidationError::TooManyScenes {
                requested,
                max: max_scenes,
            });
        }
        Ok(requested)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Progress of one generation run. Step 0 is the split, steps `1..=N` are
/// the scene images.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressState {
    pub title: String,
    pub steps: Vec<String>,
    pub statuses: Vec<StepStatus>,
    pub current_step: usize,
    pub error_message: Option<String>,
}

impl ProgressState {
    fn new(title: String, steps: Vec<String>) -> Self {
        let statuses = vec![StepStatus::Pending; steps.len()];
        Self {
            title,
            steps,
            statuses,
            current_step: 0,
            error_message: None,
        }
    }

    fn scene_steps(messages: &Messages, num_scenes: usize) -> Vec<String> {
        std::iter::once(messages.split_step(num_scenes))
            .chain((1..=num_scenes).map(|i| messages.image_step(i)))
            .collect()
    }

    fn set(&mut self, index: usize, status: StepStatus) {
        if let Some(slot) = self.statuses.get_mut(index) {
            *slot = status;
        }
    }

    /// Replaces the scene steps after the split returned `num_scenes`
    /// directives, keeping step 0 as it is.
    fn resize_scenes(&mut self, messages: &Messages, num_scenes: usize) {
        let split_status = self.statuses.first().copied().unwrap_or(StepStatus::Pending);
        self.steps = Self::scene_steps(messages, num_scenes);
        self.statuses = vec![StepStatus::Pending; self.steps.len()];
        self.statuses[0] = split_status;
    }

    pub fn status(&self, index: usize) -> Option<StepStatus> {
        self.statuses.get(index).copied()
    }

    pub fn completed_steps(&self) -> usize {
        self.statuses.iter().filter(|s| **s == StepStatus::Completed).count()
    }

    pub fn is_failed(&self) -> bool {
        self.error_message.is_some()
    }
}

/// Receives the progress state after every change.
pub trait ProgressSink {
    fn update(&mut self, progress: &ProgressState);
}

impl<F: FnMut(&ProgressState)> ProgressSink for F {
    fn update(&mut self, progress: &ProgressState) {
        self(progress)
    }
}

/// A run that stopped before producing a story. `progress` is absent when
/// the request was rejected before the run started.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct PipelineFailure {
    pub error: StudioError,
    pub progress: Option<ProgressState>,
}

/// Turns one story prompt into a fully illustrated `Story`.
pub struct ScenePipeline {
    studio: StudioService,
    messages: Messages,
    max_scenes: usize,
}

impl ScenePipeline {
    pub fn new(studio: StudioService, messages: Messages, max_scenes: usize) -> Self {
        Self {
            studio,
            messages,
            max_scenes,
        }
    }

    /// Runs the split and then every scene image, one at a time. The first
    /// failing step stops the run. Nothing is persisted here.
    pub async fn run(&self, request: &StoryRequest, sink: &mut dyn ProgressSink) -> Result<Story, PipelineFailure> {
        let has_credential = self.studio.caller().credentials().active().is_some();
        let requested = request
            .validate(has_credential, self.max_scenes)
            .map_err(|e| PipelineFailure {
                error: e.into(),
                progress: None,
            })?;

        info!("Creating story '{}' with {} scenes", request.name, requested);
        let mut progress = ProgressState::new(
            self.messages.progress_title(&request.name),
            ProgressState::scene_steps(&self.messages, requested),
        );
        progress.set(0, StepStatus::InProgress);
        sink.update(&progress);

        let directives = match self
            .studio
            .split_story(&request.prompt, requested, &request.characters, request.scene_duration)
            .await
        {
            Ok(directives) => directives,
            Err(e) => return Err(self.fail(progress, e, sink)),
        };

        let produced = directives.len();
        if produced > self.max_scenes {
            let e = ValidationError::TooManyScenes {
                requested: produced,
                max: self.max_scenes,
            };
            return Err(self.fail(progress, e.into(), sink));
        }
        if produced != requested {
            info!("Story split into {} scenes instead of {}", produced, requested);
        }

        progress.set(0, StepStatus::Completed);
        progress.resize_scenes(&self.messages, produced);
        progress.current_step = 1;
        sink.update(&progress);

        let batch = ids::now().timestamp_millis();
        let mut scenes = Vec::with_capacity(produced);
        for (i, directive) in directives.into_iter().enumerate() {
            let step = i + 1;
            progress.current_step = step;
            progress.set(step, StepStatus::InProgress);
            sink.update(&progress);

            let image_url = match self
                .studio
                .generate_scene_image(&directive.image_prompt, request.aspect_ratio)
                .await
            {
                Ok(url) => url,
                Err(e) => return Err(self.fail(progress, e, sink)),
            };

            scenes.push(directive.into_scene(ids::scene_id(batch, i), image_url));
            progress.set(step, StepStatus::Completed);
            sink.update(&progress);
            info!("Scene {}/{} done", step, produced);
        }

        Ok(Story {
            id: ids::new_id(),
            name: request.name.trim().to_string(),
            original_prompt: request.prompt.clone(),
            characters: request.characters.clone(),
            aspect_ratio: request.aspect_ratio,
            scenes,
            video_duration: request.video_duration,
            scene_duration: request.scene_duration,
        })
    }

    fn fail(&self, mut progress: ProgressState, error: StudioError, sink: &mut dyn ProgressSink) -> PipelineFailure {
        error!("Story generation failed at step {}: {}", progress.current_step, error);
        let step = progress.current_step;
        progress.set(step, StepStatus::Failed);
        progress.error_message = Some(error.user_message(&self.messages));
        sink.update(&progress);
        PipelineFailure {
            error,
            progress: Some(progress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::credentials::{CredentialManager, CredentialStore};
    use crate::core::error::RemoteError;
    use crate::core::messages::Language;
    use crate::services::failover::ResilientCaller;
    use crate::services::gemini::{EditOutcome, GenerativeClient};
    use crate::utils::data_uri::InlineImage;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    struct MockClient {
        directives: usize,
        fail_image_at: Option<usize>,
        text_calls: Arc<Mutex<usize>>,
        image_prompts: Arc<Mutex<Vec<String>>>,
    }

    impl MockClient {
        fn new(directives: usize) -> Self {
            Self {
                directives,
                fail_image_at: None,
                text_calls: Arc::new(Mutex::new(0)),
                image_prompts: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl GenerativeClient for MockClient {
        async fn generate_image(&self, _key: &str, prompt: &str, aspect: AspectRatio) -> Result<String, RemoteError> {
            let mut prompts = self.image_prompts.lock().unwrap();
            prompts.push(prompt.to_string());
            if Some(prompts.len()) == self.fail_image_at {
                return Err(RemoteError::other("image backend down"));
            }
            Ok(format!("data:image/jpeg;base64,{}", aspect.as_str().replace(':', "x")))
        }

        async fn edit_image(&self, _key: &str, _image: &InlineImage, _instruction: &str) -> Result<EditOutcome, RemoteError> {
            unreachable!("pipeline never edits images")
        }

        async fn generate_text(&self, _key: &str, _prompt: &str, _schema: Option<&Value>) -> Result<String, RemoteError> {
            *self.text_calls.lock().unwrap() += 1;
            let scenes: Vec<Value> = (1..=self.directives)
                .map(|i| {
                    serde_json::json!({
                        "imagePrompt": format!("image {}", i),
                        "animationPrompt": format!("animation {}", i),
                        "voiceoverPrompt": format!("voiceover {}", i),
                    })
                })
                .collect();
            Ok(Value::Array(scenes).to_string())
        }
    }

    fn pipeline_with(client: MockClient, keys: &[&str], max_scenes: usize) -> ScenePipeline {
        let mut store = CredentialStore::new();
        for key in keys {
            store.add(key);
        }
        let caller = ResilientCaller::new(CredentialManager::in_memory(store));
        let studio = StudioService::new(caller, Arc::new(client), Language::English);
        ScenePipeline::new(studio, Messages::new(Language::English), max_scenes)
    }

    fn request(video_duration: u32, scene_duration: u32) -> StoryRequest {
        StoryRequest {
            name: "The Key".to_string(),
            prompt: "Alice finds a key.".to_string(),
            characters: vec![Character {
                id: "c1".to_string(),
                name: "Alice".to_string(),
                description: "a girl with a red scarf".to_string(),
                image_url: "data:image/jpeg;base64,AAAA".to_string(),
            }],
            aspect_ratio: AspectRatio::Portrait,
            video_duration,
            scene_duration,
        }
    }

    #[test]
    fn test_scene_count_rounds_up() {
        assert_eq!(scene_count(60, 5), Some(12));
        assert_eq!(scene_count(65, 10), Some(7));
        assert_eq!(scene_count(180, 2), Some(90));
        assert_eq!(scene_count(10, 0), None);
    }

    #[test]
    fn test_validate_rules() {
        assert_eq!(request(60, 5).validate(true, 50), Ok(12));
        assert_eq!(
            request(180, 2).validate(true, 50),
            Err(ValidationError::TooManyScenes { requested: 90, max: 50 })
        );
        assert_eq!(request(60, 0).validate(true, 50), Err(ValidationError::InvalidSceneDuration));
        assert_eq!(request(60, 5).validate(false, 50), Err(ValidationError::NoCredential));

        let mut no_name = request(60, 5);
        no_name.name = "  ".to_string();
        assert_eq!(no_name.validate(true, 50), Err(ValidationError::MissingName));

        let mut no_prompt = request(60, 5);
        no_prompt.prompt.clear();
        assert_eq!(no_prompt.validate(true, 50), Err(ValidationError::MissingPrompt));

        let mut no_characters = request(60, 5);
        no_characters.characters.clear();
        assert_eq!(no_characters.validate(true, 50), Err(ValidationError::NoCharacters));
    }

    #[tokio::test]
    async fn test_rejected_request_makes_no_calls() {
        let client = MockClient::new(3);
        let text_calls = client.text_calls.clone();
        let pipeline = pipeline_with(client, &["key"], 50);

        let mut updates = 0;
        let mut sink = |_: &ProgressState| updates += 1;
        let failure = pipeline.run(&request(180, 2), &mut sink).await.unwrap_err();

        assert!(matches!(
            failure.error,
            StudioError::Validation(ValidationError::TooManyScenes { requested: 90, max: 50 })
        ));
        assert!(failure.progress.is_none());
        assert_eq!(*text_calls.lock().unwrap(), 0);
        assert_eq!(updates, 0);
    }

    #[tokio::test]
    async fn test_missing_credential_is_validation_error() {
        let pipeline = pipeline_with(MockClient::new(3), &[], 50);
        let mut sink = |_: &ProgressState| {};
        let failure = pipeline.run(&request(15, 5), &mut sink).await.unwrap_err();
        assert!(matches!(failure.error, StudioError::Validation(ValidationError::NoCredential)));
    }

    #[tokio::test]
    async fn test_successful_run_builds_story() {
        let client = MockClient::new(3);
        let image_prompts = client.image_prompts.clone();
        let pipeline = pipeline_with(client, &["key"], 50);

        let mut snapshots: Vec<ProgressState> = Vec::new();
        let mut sink = |p: &ProgressState| snapshots.push(p.clone());
        let req = request(15, 5);
        let story = pipeline.run(&req, &mut sink).await.unwrap();

        assert_eq!(story.name, "The Key");
        assert_eq!(story.characters, req.characters);
        assert_eq!(story.aspect_ratio, AspectRatio::Portrait);
        assert_eq!(story.scenes.len(), 3);
        for (i, scene) in story.scenes.iter().enumerate() {
            assert_eq!(scene.image_prompt, format!("image {}", i + 1));
            assert_eq!(scene.voiceover_prompt, format!("voiceover {}", i + 1));
            assert_eq!(scene.image_url, "data:image/jpeg;base64,9x16");
        }
        assert_eq!(*image_prompts.lock().unwrap(), vec!["image 1", "image 2", "image 3"]);

        let first = &snapshots[0];
        assert_eq!(first.steps.len(), 4);
        assert_eq!(first.status(0), Some(StepStatus::InProgress));
        assert_eq!(first.title, "Creating story \"The Key\"");

        let last = snapshots.last().unwrap();
        assert_eq!(last.completed_steps(), 4);
        assert!(!last.is_failed());

        // Steps only ever move forward.
        let mut previous = 0;
        for snapshot in &snapshots {
            assert!(snapshot.current_step >= previous);
            previous = snapshot.current_step;
        }
    }

    #[tokio::test]
    async fn test_different_scene_count_rebuilds_steps() {
        let pipeline = pipeline_with(MockClient::new(3), &["key"], 50);

        let mut snapshots: Vec<ProgressState> = Vec::new();
        let mut sink = |p: &ProgressState| snapshots.push(p.clone());
        let story = pipeline.run(&request(60, 5), &mut sink).await.unwrap();

        assert_eq!(snapshots[0].steps.len(), 13);
        assert_eq!(snapshots[1].steps.len(), 4);
        assert_eq!(snapshots[1].status(0), Some(StepStatus::Completed));
        assert_eq!(snapshots[1].current_step, 1);
        assert_eq!(snapshots[1].steps[0], "Analyzing the story into 3 scenes");
        assert_eq!(story.scenes.len(), 3);
    }

    #[tokio::test]
    async fn test_failure_at_scene_stops_run() {
        let mut client = MockClient::new(4);
        client.fail_image_at = Some(2);
        let image_prompts = client.image_prompts.clone();
        let pipeline = pipeline_with(client, &["key"], 50);

        let mut sink = |_: &ProgressState| {};
        let failure = pipeline.run(&request(20, 5), &mut sink).await.unwrap_err();
        let progress = failure.progress.expect("progress is kept on failure");

        assert!(matches!(failure.error, StudioError::Remote(_)));
        assert_eq!(progress.current_step, 2);
        assert_eq!(progress.status(0), Some(StepStatus::Completed));
        assert_eq!(progress.status(1), Some(StepStatus::Completed));
        assert_eq!(progress.status(2), Some(StepStatus::Failed));
        assert_eq!(progress.status(3), Some(StepStatus::Pending));
        assert_eq!(progress.status(4), Some(StepStatus::Pending));
        assert_eq!(progress.error_message.as_deref(), Some("image backend down"));
        assert_eq!(image_prompts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_split_over_cap_fails_step_zero() {
        let client = MockClient::new(6);
        let image_prompts = client.image_prompts.clone();
        let pipeline = pipeline_with(client, &["key"], 5);

        let mut sink = |_: &ProgressState| {};
        let failure = pipeline.run(&request(10, 5), &mut sink).await.unwrap_err();
        let progress = failure.progress.unwrap();

        assert!(matches!(
            failure.error,
            StudioError::Validation(ValidationError::TooManyScenes { requested: 6, max: 5 })
        ));
        assert_eq!(progress.status(0), Some(StepStatus::Failed));
        assert!(image_prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_split_fails_step_zero() {
        let client = MockClient::new(0);
        let image_prompts = client.image_prompts.clone();
        let pipeline = pipeline_with(client, &["key"], 50);

        let mut sink = |_: &ProgressState| {};
        let failure = pipeline.run(&request(10, 5), &mut sink).await.unwrap_err();

        assert!(matches!(failure.error, StudioError::MalformedResponse { .. }));
        let progress = failure.progress.unwrap();
        assert_eq!(progress.status(0), Some(StepStatus::Failed));
        assert_eq!(progress.steps.len(), 3);
        assert!(image_prompts.lock().unwrap().is_empty());
    }
}
