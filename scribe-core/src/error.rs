use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors produced by scribe-core.
#[derive(Debug, Error)]
pub enum ScribeError {
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid chunk configuration: {0}")]
    InvalidChunkConfig(String),

    #[error("engine failed to load model '{model_id}': {reason}")]
    EngineLoad { model_id: String, reason: String },

    #[error("engine is not ready: no model instance is loaded")]
    EngineNotReady,

    #[error("inference error: {0}")]
    Inference(String),

    #[error("a transcription job is already in progress")]
    JobInProgress,

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("WAV decode error: {0}")]
    Wav(#[from] hound::Error),

    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ScribeError {
    /// Coarse classification used in caller-facing failure reports.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedFormat(_) | Self::Wav(_) => ErrorKind::UnsupportedFormat,
            Self::InvalidChunkConfig(_) => ErrorKind::InvalidChunkConfig,
            Self::EngineLoad { .. } => ErrorKind::EngineLoad,
            Self::EngineNotReady => ErrorKind::EngineNotReady,
            Self::Inference(_) => ErrorKind::Inference,
            Self::JobInProgress => ErrorKind::JobInProgress,
            Self::AudioDevice(_) | Self::AudioStream(_) | Self::NoDefaultInputDevice => {
                ErrorKind::AudioDevice
            }
            Self::Config(_) | Self::Io(_) | Self::Other(_) => ErrorKind::Internal,
        }
    }
}

/// Serializable error classification, mirrored by hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    UnsupportedFormat,
    InvalidChunkConfig,
    EngineLoad,
    EngineNotReady,
    Inference,
    JobInProgress,
    AudioDevice,
    Internal,
}

pub type Result<T> = std::result::Result<T, ScribeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_map_to_their_kinds() {
        let load = ScribeError::EngineLoad {
            model_id: "huge".into(),
            reason: "unknown model".into(),
        };
        assert_eq!(load.kind(), ErrorKind::EngineLoad);
        assert!(load.to_string().contains("huge"));
        assert_eq!(
            ScribeError::EngineNotReady.kind(),
            ErrorKind::EngineNotReady
        );
        assert_eq!(
            ScribeError::Inference("oom".into()).kind(),
            ErrorKind::Inference
        );
        assert_eq!(ScribeError::JobInProgress.kind(), ErrorKind::JobInProgress);
    }

    #[test]
    fn error_kind_serializes_camel_case() {
        let json = serde_json::to_value(ErrorKind::InvalidChunkConfig).expect("serialize kind");
        assert_eq!(json, "invalidChunkConfig");
    }
}
