use crate::core::params::ParameterLayer;
use crate::core::script::{LineId, ResolvedDialogue, Script};
use crate::core::error::DubResult;
use std::collections::HashMap;

/// Operator edits for one line. Never written back to the script file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineEdit {
    pub text: Option<String>,
    pub emotion: Option<String>,
    pub params: ParameterLayer,
}

impl LineEdit {
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.emotion.is_none() && self.params.is_empty()
    }
}

/// A loaded script plus the edits made to it during this session.
#[derive(Debug, Clone)]
pub struct Session {
    script: Script,
    edits: HashMap<LineId, LineEdit>,
}

impl Session {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            edits: HashMap::new(),
        }
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    pub fn edit(&self, id: LineId) -> Option<&LineEdit> {
        self.edits.get(&id)
    }

    pub fn edit_mut(&mut self, id: LineId) -> &mut LineEdit {
        self.edits.entry(id).or_default()
    }

    pub fn set_text(&mut self, id: LineId, text: impl Into<String>) {
        self.edit_mut(id).text = Some(text.into());
    }

    pub fn set_emotion(&mut self, id: LineId, emotion: impl Into<String>) {
        self.edit_mut(id).emotion = Some(emotion.into());
    }

    pub fn set_param(&mut self, id: LineId, key: impl Into<String>, value: serde_json::Value) {
        self.edit_mut(id).params.insert(key.into(), value);
    }

    pub fn clear(&mut self, id: LineId) {
        self.edits.remove(&id);
    }

    pub fn edited_lines(&self) -> usize {
        self.edits.values().filter(|e| !e.is_empty()).count()
    }

    /// The line as written in the script; this is what identity derives from.
    pub fn original(&self, id: LineId) -> DubResult<ResolvedDialogue> {
        self.script.line(id.scene_index, id.dialogue_index)
    }

    /// The line with session text/emotion edits applied.
    pub fn effective(&self, id: LineId) -> DubResult<ResolvedDialogue> {
        let mut line = self.original(id)?;
        if let Some(edit) = self.edits.get(&id) {
            if let Some(text) = &edit.text {
                line.text = text.clone();
            }
            if let Some(emotion) = &edit.emotion {
                line.emotion = emotion.clone();
            }
        }
        Ok(line)
    }

    /// Per-line parameter overrides, or an empty layer.
    pub fn overrides(&self, id: LineId) -> ParameterLayer {
        self.edits
            .get(&id)
            .map(|e| e.params.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> Session {
        let script = Script::from_yaml(
            "scenes:\n  - scene_name: s\n    dialogues:\n      - { character: A, text: hi, emotion: calm }\n",
            "t.yaml",
        )
        .unwrap();
        Session::new(script)
    }

    #[test]
    fn test_edits_shadow_script_values() {
        let mut session = session();
        let id = LineId { scene_index: 0, dialogue_index: 0 };
        session.set_text(id, "hello there");
        session.set_param(id, "speed_facter", json!(0.8));

        let line = session.effective(id).unwrap();
        assert_eq!(line.text, "hello there");
        assert_eq!(line.emotion, "calm");
        assert_eq!(session.original(id).unwrap().text, "hi");
        assert_eq!(session.overrides(id)["speed_facter"], json!(0.8));
        assert_eq!(session.edited_lines(), 1);

        session.clear(id);
        assert_eq!(session.effective(id).unwrap().text, "hi");
        assert!(session.overrides(id).is_empty());
    }
}
