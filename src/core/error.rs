use crate::services::tts::SynthesisError;
use std::path::PathBuf;
use thiserror::Error;

pub type DubResult<T> = std::result::Result<T, DubError>;

#[derive(Debug, Error)]
pub enum DubError {
    /// Missing or unreadable config, or a required field absent. Fatal at startup.
    #[error("config error: {0}")]
    Config(String),

    #[error("failed to parse script '{path}': {reason}")]
    ScriptParse { path: String, reason: String },

    #[error("no voice model configured for character '{character}'")]
    VoiceNotConfigured { character: String },

    #[error("invalid value {value} for parameter '{field}': expected {expected}")]
    ParameterValidation {
        field: String,
        value: String,
        expected: &'static str,
    },

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error("file system error at {}: {source}", path.display())]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no dialogue at scene {scene_index}, line {dialogue_index}")]
    UnknownLine {
        scene_index: usize,
        dialogue_index: usize,
    },

    #[error("failed to serialize generation metadata: {0}")]
    Metadata(#[from] serde_yaml_ng::Error),
}

impl DubError {
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DubError::FileSystem {
            path: path.into(),
            source,
        }
    }

    /// Short category label used in summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            DubError::Config(_) => "config",
            DubError::ScriptParse { .. } => "script",
            DubError::VoiceNotConfigured { .. } => "voice",
            DubError::ParameterValidation { .. } => "parameter",
            DubError::Synthesis(e) if e.is_timeout() => "timeout",
            DubError::Synthesis(_) => "synthesis",
            DubError::FileSystem { .. } => "filesystem",
            DubError::UnknownLine { .. } => "line",
            DubError::Metadata(_) => "metadata",
        }
    }
}
