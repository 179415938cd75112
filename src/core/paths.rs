//! Output identity: where a dialogue line's audio and sidecar live.
//!
//! Layout is `root/<script>/<scene>/<number>_<character>_<text>.<ext>` with
//! every component sanitized on its own. The audio file's existence is the
//! only record of whether a line has been generated.

use crate::core::script::ResolvedDialogue;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MAX_COMPONENT_CHARS: usize = 50;
pub const METADATA_EXTENSION: &str = "yaml";

const FORBIDDEN_CHARS: &[char] = &['\\', '/', '*', '?', ':', '"', '<', '>', '|'];

/// Strip `\ / * ? : " < > |`, turn spaces into underscores, cap at 50 chars.
pub fn sanitize_filename(text: &str) -> String {
    text.chars()
        .filter(|c| !FORBIDDEN_CHARS.contains(c))
        .map(|c| if c == ' ' { '_' } else { c })
        .take(MAX_COMPONENT_CHARS)
        .collect()
}

fn dir_component(text: &str) -> String {
    let sanitized = sanitize_filename(text);
    if sanitized.is_empty() {
        "_".to_string()
    } else {
        sanitized
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineNumbering {
    /// `scene * 1000 + line`, four digits. Collides once a scene reaches 1000 lines.
    #[default]
    Legacy,
    /// `scene-line`, each part padded on its own.
    Wide,
}

impl LineNumbering {
    pub fn line_number(self, scene_index: usize, dialogue_index: usize) -> String {
        match self {
            LineNumbering::Legacy => format!("{:04}", scene_index * 1000 + dialogue_index),
            LineNumbering::Wide => format!("{:03}-{:04}", scene_index, dialogue_index),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub audio: PathBuf,
    pub metadata: PathBuf,
}

impl ArtifactPaths {
    /// A line counts as generated iff its audio is a regular file.
    pub fn is_generated(&self) -> bool {
        self.audio.is_file()
    }
}

#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
    audio_extension: String,
    numbering: LineNumbering,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>, audio_extension: &str, numbering: LineNumbering) -> Self {
        Self {
            root: root.into(),
            audio_extension: audio_extension.trim_start_matches('.').to_string(),
            numbering,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn numbering(&self) -> LineNumbering {
        self.numbering
    }

    pub fn scene_dir(&self, script_name: &str, scene_name: &str) -> PathBuf {
        self.root
            .join(dir_component(script_name))
            .join(dir_component(scene_name))
    }

    pub fn file_stem(&self, line: &ResolvedDialogue) -> String {
        format!(
            "{}_{}_{}",
            self.numbering
                .line_number(line.scene_index, line.dialogue_index),
            sanitize_filename(&line.character),
            sanitize_filename(&line.text)
        )
    }

    /// Paths derive from the script's own text, never from session edits.
    pub fn artifact(&self, script_name: &str, line: &ResolvedDialogue) -> ArtifactPaths {
        let dir = self.scene_dir(script_name, &line.scene_name);
        let stem = self.file_stem(line);
        ArtifactPaths {
            audio: dir.join(format!("{}.{}", stem, self.audio_extension)),
            metadata: dir.join(format!("{}.{}", stem, METADATA_EXTENSION)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(scene_index: usize, dialogue_index: usize, character: &str, text: &str) -> ResolvedDialogue {
        ResolvedDialogue {
            scene_index,
            dialogue_index,
            scene_name: "Scene 1".to_string(),
            character: character.to_string(),
            text: text.to_string(),
            emotion: "default".to_string(),
        }
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename(r#"a\b/c*d?e:f"g<h>i|j"#), "abcdefghij");
        assert_eq!(sanitize_filename("hello big world"), "hello_big_world");
        assert_eq!(sanitize_filename(""), "");
        let long = "字".repeat(80);
        assert_eq!(sanitize_filename(&long).chars().count(), MAX_COMPONENT_CHARS);
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let samples = [
            "What? No: \"never\" <ever> | again / \\ *",
            "  leading and trailing  ",
            "白浅：你来了？我等你很久了，真的很久很久了，久到忘了时间。还有更多的文字在这里继续写下去",
            "a_b_c",
        ];
        for sample in samples {
            let once = sanitize_filename(sample);
            assert_eq!(sanitize_filename(&once), once);
            assert!(!once.contains(FORBIDDEN_CHARS));
            assert!(!once.contains(' '));
            assert!(once.chars().count() <= MAX_COMPONENT_CHARS);
        }
    }

    #[test]
    fn test_legacy_numbering() {
        assert_eq!(LineNumbering::Legacy.line_number(0, 5), "0005");
        assert_eq!(LineNumbering::Legacy.line_number(1, 5), "1005");
        // Documented limit: a 1000-line scene runs into the next one.
        assert_eq!(
            LineNumbering::Legacy.line_number(0, 1005),
            LineNumbering::Legacy.line_number(1, 5)
        );
    }

    #[test]
    fn test_wide_numbering_does_not_collide() {
        assert_eq!(LineNumbering::Wide.line_number(1, 5), "001-0005");
        assert_ne!(
            LineNumbering::Wide.line_number(0, 1005),
            LineNumbering::Wide.line_number(1, 5)
        );
    }

    #[test]
    fn test_artifact_paths() {
        let layout = OutputLayout::new("/out", "wav", LineNumbering::Legacy);
        let paths = layout.artifact("My Script?", &line(0, 5, "Old Man", "Who goes there?"));
        assert_eq!(
            paths.audio,
            PathBuf::from("/out/My_Script/Scene_1/0005_Old_Man_Who_goes_there.wav")
        );
        assert_eq!(
            paths.metadata,
            PathBuf::from("/out/My_Script/Scene_1/0005_Old_Man_Who_goes_there.yaml")
        );

        let paths = layout.artifact("My Script?", &line(1, 5, "A", "x"));
        assert!(paths
            .audio
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("1005_"));
    }

    #[test]
    fn test_paths_are_deterministic() {
        let layout = OutputLayout::new("out", ".mp3", LineNumbering::Wide);
        let l = line(2, 3, "A", "same text");
        assert_eq!(layout.artifact("S", &l), layout.artifact("S", &l));
        assert_eq!(layout.artifact("S", &l).audio.extension().unwrap(), "mp3");
    }

    #[test]
    fn test_empty_components_keep_two_levels() {
        let layout = OutputLayout::new("/out", "wav", LineNumbering::Legacy);
        let mut l = line(0, 0, "A", "x");
        l.scene_name = "???".to_string();
        assert_eq!(layout.scene_dir("::", &l.scene_name), PathBuf::from("/out/_/_"));
    }

    #[test]
    fn test_is_generated_requires_regular_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let layout = OutputLayout::new(dir.path(), "wav", LineNumbering::Legacy);
        let paths = layout.artifact("S", &line(0, 0, "A", "x"));
        assert!(!paths.is_generated());

        std::fs::create_dir_all(&paths.audio)?;
        assert!(!paths.is_generated());
        std::fs::remove_dir(&paths.audio)?;

        std::fs::write(&paths.audio, b"RIFF")?;
        assert!(paths.is_generated());
        Ok(())
    }
}
