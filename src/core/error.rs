use crate::core::messages::Messages;
use thiserror::Error;

/// How the remote service rejected a call.
///
/// The first three kinds mean "this key cannot serve the request right now",
/// which is what the failover wrapper rotates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    Unauthorized,
    Forbidden,
    RateLimited,
    Other,
}

impl RemoteErrorKind {
    pub fn is_switchable(self) -> bool {
        matches!(
            self,
            RemoteErrorKind::Unauthorized | RemoteErrorKind::Forbidden | RemoteErrorKind::RateLimited
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Other, message)
    }

    /// Maps an HTTP status and response body onto an error kind.
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 => RemoteErrorKind::Unauthorized,
            400 if body.contains("API_KEY_INVALID") || body.contains("API key not valid") => {
                RemoteErrorKind::Unauthorized
            }
            403 => RemoteErrorKind::Forbidden,
            429 => RemoteErrorKind::RateLimited,
            _ if body.contains("RESOURCE_EXHAUSTED") => RemoteErrorKind::RateLimited,
            _ => RemoteErrorKind::Other,
        };
        Self::new(kind, format!("Gemini API error ({}): {}", status, body))
    }

    pub fn is_switchable(&self) -> bool {
        self.kind.is_switchable()
    }
}

/// Input problems caught before any remote call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("story name is empty")]
    MissingName,
    #[error("story prompt is empty")]
    MissingPrompt,
    #[error("no characters selected")]
    NoCharacters,
    #[error("no active API key")]
    NoCredential,
    #[error("scene duration must be positive")]
    InvalidSceneDuration,
    #[error("{requested} scenes exceeds the limit of {max}")]
    TooManyScenes { requested: usize, max: usize },
    #[error("character description is empty")]
    MissingDescription,
}

#[derive(Debug, Error)]
pub enum StudioError {
    #[error("no active API key configured")]
    NoCredential,

    #[error("all API keys failed or are out of quota")]
    AllCredentialsExhausted,

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("unexpected response format: {context}")]
    MalformedResponse { context: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("invalid base64 image data")]
    InvalidImage,

    #[error("image editing failed: {0}")]
    Refused(String),

    #[error("invalid backup file: {reason}")]
    InvalidBackup { reason: String },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl StudioError {
    pub fn malformed(context: impl Into<String>) -> Self {
        StudioError::MalformedResponse {
            context: context.into(),
        }
    }

    /// Text shown to the user, in the narration language.
    pub fn user_message(&self, messages: &Messages) -> String {
        match self {
            StudioError::NoCredential => messages.no_credential(),
            StudioError::AllCredentialsExhausted => messages.credentials_exhausted(),
            StudioError::Remote(e) => e.message.clone(),
            StudioError::MalformedResponse { .. } => messages.unexpected_format(),
            StudioError::Validation(v) => messages.validation(v),
            StudioError::InvalidImage => messages.invalid_image(),
            StudioError::Refused(text) => messages.edit_refused(text),
            StudioError::InvalidBackup { .. } => messages.invalid_backup(),
            StudioError::Storage(_) => messages.unknown_error(),
        }
    }
}
