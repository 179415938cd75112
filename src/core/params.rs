//! Generation parameters and the layered resolver that builds them.
//!
//! Layers are untyped key/value maps merged shallowly, lowest precedence
//! first. Known keys are then coerced to their declared type and the result
//! is read into [`GenerationParameters`]; unknown keys ride along in
//! [`GenerationParameters::extra`] and reach the wire untouched.

use crate::core::error::{DubError, DubResult};
use crate::core::script::{ResolvedDialogue, Script};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

pub type ParameterLayer = BTreeMap<String, Value>;

pub const DEFAULT_MEDIA_TYPE: &str = "wav";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GenerationParameters {
    #[serde(default)]
    pub text: String,
    #[serde(default = "default_lang")]
    pub text_lang: String,
    #[serde(default)]
    pub model_name: String,
    #[serde(default = "default_emotion")]
    pub emotion: String,
    #[serde(default = "default_lang")]
    pub prompt_text_lang: String,
    #[serde(default = "default_top_k")]
    pub top_k: i64,
    #[serde(default = "default_one")]
    pub top_p: f64,
    #[serde(default = "default_one")]
    pub temperature: f64,
    #[serde(default = "default_text_split_method")]
    pub text_split_method: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    #[serde(default = "default_batch_threshold")]
    pub batch_threshold: f64,
    #[serde(default = "default_true")]
    pub split_bucket: bool,
    /// The inference API spells this key `speed_facter`.
    #[serde(rename = "speed_facter", default = "default_one")]
    pub speed_factor: f64,
    #[serde(default = "default_fragment_interval")]
    pub fragment_interval: f64,
    #[serde(default = "default_media_type")]
    pub media_type: String,
    #[serde(default = "default_true")]
    pub parallel_infer: bool,
    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f64,
    /// -1 lets the server pick a random seed.
    #[serde(default = "default_seed")]
    pub seed: i64,
    #[serde(default = "default_sample_steps")]
    pub sample_steps: i64,
    #[serde(default)]
    pub if_sr: bool,
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_lang() -> String {
    "中文".to_string()
}
fn default_emotion() -> String {
    crate::core::script::DEFAULT_EMOTION.to_string()
}
fn default_top_k() -> i64 {
    10
}
fn default_one() -> f64 {
    1.0
}
fn default_text_split_method() -> String {
    "按标点符号切".to_string()
}
fn default_batch_size() -> i64 {
    10
}
fn default_batch_threshold() -> f64 {
    0.75
}
fn default_true() -> bool {
    true
}
fn default_fragment_interval() -> f64 {
    0.3
}
fn default_media_type() -> String {
    DEFAULT_MEDIA_TYPE.to_string()
}
fn default_repetition_penalty() -> f64 {
    1.35
}
fn default_seed() -> i64 {
    -1
}
fn default_sample_steps() -> i64 {
    16
}
fn default_version() -> String {
    "v4".to_string()
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            text: String::new(),
            text_lang: default_lang(),
            model_name: String::new(),
            emotion: default_emotion(),
            prompt_text_lang: default_lang(),
            top_k: default_top_k(),
            top_p: default_one(),
            temperature: default_one(),
            text_split_method: default_text_split_method(),
            batch_size: default_batch_size(),
            batch_threshold: default_batch_threshold(),
            split_bucket: true,
            speed_factor: default_one(),
            fragment_interval: default_fragment_interval(),
            media_type: default_media_type(),
            parallel_infer: true,
            repetition_penalty: default_repetition_penalty(),
            seed: default_seed(),
            sample_steps: default_sample_steps(),
            if_sr: false,
            version: default_version(),
            extra: BTreeMap::new(),
        }
    }
}

impl GenerationParameters {
    /// Request body for the synthesis API.
    pub fn to_payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn to_yaml(&self) -> DubResult<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    pub fn from_yaml(content: &str) -> DubResult<Self> {
        Ok(serde_yaml_ng::from_str(content)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Int,
    Float,
    Bool,
    Str,
}

impl FieldKind {
    fn expected(self) -> &'static str {
        match self {
            FieldKind::Int => "an integer",
            FieldKind::Float => "a number",
            FieldKind::Bool => "a boolean",
            FieldKind::Str => "a string",
        }
    }
}

const KNOWN_FIELDS: &[(&str, FieldKind)] = &[
    ("text", FieldKind::Str),
    ("text_lang", FieldKind::Str),
    ("model_name", FieldKind::Str),
    ("emotion", FieldKind::Str),
    ("prompt_text_lang", FieldKind::Str),
    ("top_k", FieldKind::Int),
    ("top_p", FieldKind::Float),
    ("temperature", FieldKind::Float),
    ("text_split_method", FieldKind::Str),
    ("batch_size", FieldKind::Int),
    ("batch_threshold", FieldKind::Float),
    ("split_bucket", FieldKind::Bool),
    ("speed_facter", FieldKind::Float),
    ("fragment_interval", FieldKind::Float),
    ("media_type", FieldKind::Str),
    ("parallel_infer", FieldKind::Bool),
    ("repetition_penalty", FieldKind::Float),
    ("seed", FieldKind::Int),
    ("sample_steps", FieldKind::Int),
    ("if_sr", FieldKind::Bool),
    ("version", FieldKind::Str),
];

fn field_kind(key: &str) -> Option<FieldKind> {
    KNOWN_FIELDS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, kind)| *kind)
}

fn coerce(field: &str, kind: FieldKind, value: Value) -> DubResult<Value> {
    let invalid = |value: &Value| DubError::ParameterValidation {
        field: field.to_string(),
        value: value.to_string(),
        expected: kind.expected(),
    };

    let coerced = match (kind, &value) {
        (FieldKind::Int, Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                Some(Value::from(i))
            } else {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| Value::from(f as i64))
            }
        }
        (FieldKind::Int, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
        (FieldKind::Float, Value::Number(n)) => n.as_f64().and_then(Number::from_f64).map(Value::Number),
        (FieldKind::Float, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        (FieldKind::Bool, Value::Bool(b)) => Some(Value::Bool(*b)),
        (FieldKind::Bool, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(Value::Bool(true)),
            "false" | "no" | "off" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
        (FieldKind::Bool, Value::Number(n)) => match n.as_i64() {
            Some(0) => Some(Value::Bool(false)),
            Some(1) => Some(Value::Bool(true)),
            _ => None,
        },
        (FieldKind::Str, Value::String(_)) => Some(value.clone()),
        (FieldKind::Str, Value::Number(n)) => Some(Value::String(n.to_string())),
        (FieldKind::Str, Value::Bool(b)) => Some(Value::String(b.to_string())),
        _ => None,
    };

    coerced.ok_or_else(|| invalid(&value))
}

/// Shallow key-wise overwrite, in order. `null` removes a key.
pub fn merge_layers(layers: &[&ParameterLayer]) -> ParameterLayer {
    let mut merged = ParameterLayer::new();
    for layer in layers {
        for (key, value) in layer.iter() {
            if value.is_null() {
                merged.remove(key);
            } else {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    merged
}

/// Merge `defaults < script_overrides < call_overrides` and type the result.
pub fn resolve(
    defaults: &ParameterLayer,
    script_overrides: &ParameterLayer,
    call_overrides: &ParameterLayer,
) -> DubResult<GenerationParameters> {
    let merged = merge_layers(&[defaults, script_overrides, call_overrides]);

    let mut object = Map::new();
    for (key, value) in merged {
        let value = match field_kind(&key) {
            Some(kind) => coerce(&key, kind, value)?,
            None => value,
        };
        object.insert(key, value);
    }

    serde_json::from_value(Value::Object(object)).map_err(|e| DubError::ParameterValidation {
        field: "<parameters>".to_string(),
        value: e.to_string(),
        expected: "a parameter mapping",
    })
}

/// Voice model for `character`, looked up in the script's own table only.
pub fn resolve_voice<'a>(script: &'a Script, character: &str) -> DubResult<&'a str> {
    script
        .character_voice_map
        .get(character)
        .map(String::as_str)
        .filter(|voice| !voice.trim().is_empty())
        .ok_or_else(|| DubError::VoiceNotConfigured {
            character: character.to_string(),
        })
}

/// Parameters for one dialogue line.
///
/// `text` and `emotion` come from the line (already carrying any session
/// edits) and land in the call layer together with `call_overrides`, so an
/// explicit override still beats them. The voice lookup is skipped when the
/// caller supplies `model_name` itself. A `media_type` other than the
/// configured one is rejected.
pub fn resolve_for_line(
    defaults: &ParameterLayer,
    script: &Script,
    line: &ResolvedDialogue,
    call_overrides: &ParameterLayer,
) -> DubResult<GenerationParameters> {
    let mut script_layer = script.inference_defaults.clone();
    let explicit_model = call_overrides
        .get("model_name")
        .map_or(false, |v| !v.is_null());
    if !explicit_model {
        let voice = resolve_voice(script, &line.character)?;
        script_layer.insert("model_name".to_string(), Value::from(voice));
    }

    let mut call_layer = ParameterLayer::new();
    call_layer.insert("text".to_string(), Value::from(line.text.clone()));
    call_layer.insert("emotion".to_string(), Value::from(line.emotion.clone()));
    call_layer.extend(call_overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

    let params = resolve(defaults, &script_layer, &call_layer)?;
    let pinned = configured_media_type(defaults);
    if params.media_type.trim() != pinned {
        return Err(DubError::ParameterValidation {
            field: "media_type".to_string(),
            value: params.media_type,
            expected: "the media_type set in the configuration",
        });
    }
    Ok(params)
}

/// The media type named by the configuration defaults. It fixes the audio
/// file extension, so no script or call layer may change it.
pub fn configured_media_type(defaults: &ParameterLayer) -> String {
    match defaults.get("media_type") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        _ => DEFAULT_MEDIA_TYPE.to_string(),
    }
}

/// Parse a `key=value` override; the value is read as a YAML scalar.
pub fn parse_override(raw: &str) -> DubResult<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| DubError::ParameterValidation {
            field: raw.to_string(),
            value: "<none>".to_string(),
            expected: "key=value",
        })?;
    let key = key.trim();
    if key.is_empty() {
        return Err(DubError::ParameterValidation {
            field: raw.to_string(),
            value: value.to_string(),
            expected: "a non-empty key",
        });
    }
    let value = serde_yaml_ng::from_str::<Value>(value.trim())
        .unwrap_or_else(|_| Value::String(value.trim().to_string()));
    Ok((key.to_string(), value))
}
