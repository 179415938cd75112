use crate::core::error::{DubError, DubResult};
use crate::core::params::ParameterLayer;
use log::warn;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

pub const DEFAULT_EMOTION: &str = "default";

/// Scenes with this many lines collide under legacy numbering.
pub const LEGACY_SCENE_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub name: String,
    pub scenes: Vec<Scene>,
    pub character_voice_map: BTreeMap<String, String>,
    pub inference_defaults: ParameterLayer,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Scene {
    #[serde(rename = "scene_name", default = "default_scene_name")]
    pub name: String,
    #[serde(default)]
    pub dialogues: Vec<DialogueLine>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DialogueLine {
    pub character: String,
    pub text: String,
    #[serde(default = "default_emotion")]
    pub emotion: String,
}

/// A dialogue line addressed by its position in the script.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDialogue {
    pub scene_index: usize,
    pub dialogue_index: usize,
    pub scene_name: String,
    pub character: String,
    pub text: String,
    pub emotion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LineId {
    pub scene_index: usize,
    pub dialogue_index: usize,
}

impl std::fmt::Display for LineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.scene_index, self.dialogue_index)
    }
}

impl ResolvedDialogue {
    pub fn id(&self) -> LineId {
        LineId {
            scene_index: self.scene_index,
            dialogue_index: self.dialogue_index,
        }
    }

    /// Short text for progress lines and listings.
    pub fn preview(&self, max_chars: usize) -> String {
        let mut preview: String = self.text.chars().take(max_chars).collect();
        if self.text.chars().count() > max_chars {
            preview.push('…');
        }
        preview
    }
}

#[derive(Deserialize)]
struct ScriptDocument {
    #[serde(default = "default_script_name")]
    script_name: String,
    #[serde(default)]
    character_models: Option<BTreeMap<String, String>>,
    #[serde(default)]
    inference_defaults: ParameterLayer,
    scenes: Vec<Scene>,
}

fn default_script_name() -> String {
    "untitled".to_string()
}
fn default_scene_name() -> String {
    "untitled scene".to_string()
}
fn default_emotion() -> String {
    DEFAULT_EMOTION.to_string()
}

impl Script {
    pub fn from_yaml(content: &str, origin: &str) -> DubResult<Self> {
        let parse_error = |reason: String| DubError::ScriptParse {
            path: origin.to_string(),
            reason,
        };

        let raw: serde_yaml_ng::Value =
            serde_yaml_ng::from_str(content).map_err(|e| parse_error(e.to_string()))?;
        match raw.get("scenes") {
            None => return Err(parse_error("missing 'scenes' list".to_string())),
            Some(scenes) if !scenes.is_sequence() => {
                return Err(parse_error("'scenes' must be a list".to_string()))
            }
            Some(_) => {}
        }

        let doc: ScriptDocument =
            serde_yaml_ng::from_value(raw).map_err(|e| parse_error(e.to_string()))?;

        let script = Script {
            name: doc.script_name,
            scenes: doc.scenes,
            character_voice_map: doc.character_models.unwrap_or_default(),
            inference_defaults: doc.inference_defaults,
        };
        script.warn_on_numbering_overflow();
        Ok(script)
    }

    /// Read a script file. A script that declares no `character_models`
    /// takes `fallback_map` as its own table.
    pub fn load_with_voice_table(
        path: impl AsRef<Path>,
        fallback_map: &BTreeMap<String, String>,
    ) -> DubResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| DubError::ScriptParse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let declares_map = serde_yaml_ng::from_str::<serde_yaml_ng::Value>(&content)
            .ok()
            .map_or(false, |raw| {
                raw.get("character_models").map_or(false, |v| !v.is_null())
            });
        let mut script = Self::from_yaml(&content, &path.display().to_string())?;
        if !declares_map {
            script.character_voice_map = fallback_map.clone();
        }
        Ok(script)
    }

    pub fn line(&self, scene_index: usize, dialogue_index: usize) -> DubResult<ResolvedDialogue> {
        let scene = self.scenes.get(scene_index);
        let dialogue = scene.and_then(|s| s.dialogues.get(dialogue_index));
        match (scene, dialogue) {
            (Some(scene), Some(dialogue)) => Ok(ResolvedDialogue {
                scene_index,
                dialogue_index,
                scene_name: scene.name.clone(),
                character: dialogue.character.clone(),
                text: dialogue.text.clone(),
                emotion: dialogue.emotion.clone(),
            }),
            _ => Err(DubError::UnknownLine {
                scene_index,
                dialogue_index,
            }),
        }
    }

    /// Every line in script order.
    pub fn lines(&self) -> impl Iterator<Item = ResolvedDialogue> + '_ {
        self.scenes
            .iter()
            .enumerate()
            .flat_map(|(scene_index, scene)| {
                scene
                    .dialogues
                    .iter()
                    .enumerate()
                    .map(move |(dialogue_index, dialogue)| ResolvedDialogue {
                        scene_index,
                        dialogue_index,
                        scene_name: scene.name.clone(),
                        character: dialogue.character.clone(),
                        text: dialogue.text.clone(),
                        emotion: dialogue.emotion.clone(),
                    })
            })
    }

    pub fn line_count(&self) -> usize {
        self.scenes.iter().map(|s| s.dialogues.len()).sum()
    }

    /// Scenes too long for legacy `scene * 1000 + line` numbering.
    pub fn oversized_scenes(&self) -> Vec<(usize, &str)> {
        self.scenes
            .iter()
            .enumerate()
            .filter(|(_, scene)| scene.dialogues.len() >= LEGACY_SCENE_CAPACITY)
            .map(|(i, scene)| (i, scene.name.as_str()))
            .collect()
    }

    fn warn_on_numbering_overflow(&self) {
        for (index, name) in self.oversized_scenes() {
            warn!(
                "Scene {} '{}' has {} or more lines; legacy line numbers will collide with the next scene",
                index, name, LEGACY_SCENE_CAPACITY
            );
        }
    }
}
