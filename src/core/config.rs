use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::{DubError, DubResult};
use crate::core::params::{configured_media_type, ParameterLayer};
use crate::core::paths::LineNumbering;
use crate::services::tts::ApiConfig;

pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub api: ApiConfig,

    /// Voice table adopted by scripts that declare no `character_models`.
    #[serde(default)]
    pub characters: BTreeMap<String, String>,

    #[serde(default)]
    pub inference_defaults: ParameterLayer,

    #[serde(default = "default_output")]
    pub output_dir: String,

    #[serde(default)]
    pub line_numbering: LineNumbering,
}

fn default_output() -> String {
    "output".to_string()
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> DubResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DubError::Config(format!(
                "{} not found. Please create one.",
                path.display()
            )));
        }

        let content = fs::read_to_string(path)
            .map_err(|e| DubError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> DubResult<Self> {
        let config: Config = serde_yaml_ng::from_str(content)
            .map_err(|e| DubError::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> DubResult<()> {
        let base_url = self.api.base_url.trim();
        if base_url.is_empty() {
            return Err(DubError::Config("api.base_url is missing".to_string()));
        }
        url::Url::parse(base_url).map_err(|e| {
            DubError::Config(format!("api.base_url '{}' is not a valid URL: {}", base_url, e))
        })?;
        Ok(())
    }

    /// Output root; relative paths are anchored at `program_dir`.
    pub fn output_root(&self, program_dir: &Path) -> PathBuf {
        let dir = Path::new(&self.output_dir);
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            program_dir.join(dir)
        }
    }

    /// Audio file extension, taken from the configured `media_type` so that
    /// identity does not change with per-line overrides.
    pub fn audio_extension(&self) -> String {
        configured_media_type(&self.inference_defaults)
    }
}

/// Directory holding the running executable, falling back to the working directory.
pub fn program_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::tts::BackendKind;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_yaml("api:\n  base_url: http://127.0.0.1:8000\n").unwrap();
        assert_eq!(config.output_dir, "output");
        assert_eq!(config.api.protocol, BackendKind::TwoStep);
        assert_eq!(config.api.timeout_secs, 300);
        assert_eq!(config.line_numbering, LineNumbering::Legacy);
        assert!(config.characters.is_empty());
        assert_eq!(config.audio_extension(), "wav");
    }

    #[test]
    fn test_missing_base_url_is_fatal() {
        let err = Config::from_yaml("output_dir: out\n").unwrap_err();
        assert!(matches!(err, DubError::Config(_)));

        let err = Config::from_yaml("api:\n  base_url: \"\"\n").unwrap_err();
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, DubError::Config(_)));
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
api:
  base_url: http://10.0.0.2:9880/
  protocol: one_step
  timeout_secs: 60
characters:
  Alice: alice_v4
inference_defaults:
  speed_facter: 1.1
  media_type: mp3
output_dir: /tmp/dub
line_numbering: wide
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.api.protocol, BackendKind::OneStep);
        assert_eq!(config.characters["Alice"], "alice_v4");
        assert_eq!(config.audio_extension(), "mp3");
        assert_eq!(config.line_numbering, LineNumbering::Wide);
        assert_eq!(
            config.output_root(Path::new("/opt/app")),
            PathBuf::from("/tmp/dub")
        );
    }

    #[test]
    fn test_relative_output_dir_is_anchored_at_program_dir() {
        let config = Config::from_yaml("api:\n  base_url: http://localhost:8000\n").unwrap();
        assert_eq!(
            config.output_root(Path::new("/opt/app")),
            PathBuf::from("/opt/app/output")
        );
    }
}
