#![forbid(unsafe_code)]

//! Works out which tool generated an image.
//!
//! The checks run in a fixed order and the first hit wins:
//!
//! 1. ComfyUI graph data in the PNG text chunks (`workflow` / `prompt`).
//! 2. NovelAI markers in the stealth payload.
//! 3. NovelAI markers in the standard metadata.
//!
//! The order matters because one file can satisfy more than one check, for
//! example a ComfyUI image that also carries a `Software` tag.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{format::try_json_loads_maybe_nested, nai::select_generation_params, TextChunkMap};

/// The tools we know how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
  Comfy,
  Nai,
  Unknown,
}

/// What [`detect_model`] decided, and the check that decided it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DetectionResult {
  pub kind: ModelKind,
  pub reason: String,
}
impl DetectionResult {
  #[inline]
  fn new(kind: ModelKind, reason: impl Into<String>) -> Self {
    Self { kind, reason: reason.into() }
  }
}

/// Looks up `key` in a JSON object, ignoring ASCII case. An exact match is
/// preferred over a case-insensitive one.
#[must_use]
pub fn get_ci<'m>(map: &'m Map<String, Value>, key: &str) -> Option<&'m Value> {
  map.get(key).or_else(|| map.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)).map(|(_, v)| v))
}

/// Does this look like a ComfyUI workflow (the UI's graph save format)?
#[must_use]
pub fn is_comfy_workflow(value: &Value) -> bool {
  let Some(obj) = value.as_object() else {
    return false;
  };
  let is_array = |k: &str| obj.get(k).is_some_and(Value::is_array);
  is_array("nodes") && (is_array("links") || is_array("edges"))
}

/// Is this a ComfyUI node object, with both `class_type` and `inputs`?
#[inline]
#[must_use]
pub fn is_comfy_node(value: &Value) -> bool {
  value.as_object().is_some_and(|n| n.contains_key("class_type") && n.contains_key("inputs"))
}

/// Does this look like a ComfyUI prompt (the API's id-keyed node map)?
#[must_use]
pub fn is_comfy_prompt(value: &Value) -> bool {
  value.as_object().is_some_and(|obj| obj.values().any(is_comfy_node))
}

/// Checks the text chunks for ComfyUI data, giving the reason on a match.
#[must_use]
pub fn detect_comfy(text: &TextChunkMap) -> Option<String> {
  if let Some(key) = text.find_key_containing_ci("workflow") {
    let values = text.get(key).unwrap_or_default();
    if values.iter().filter_map(|v| try_json_loads_maybe_nested(v)).any(|v| is_comfy_workflow(&v)) {
      return Some(format!("workflow:{key}"));
    }
  }
  if let Some(key) = text.find_key_ci("prompt") {
    let values = text.get(key).unwrap_or_default();
    if values.iter().filter_map(|v| try_json_loads_maybe_nested(v)).any(|v| is_comfy_prompt(&v)) {
      return Some("prompt".into());
    }
  }
  None
}

/// Is a NovelAI v4 (or later) parameter object?
#[must_use]
pub(crate) fn is_nai_v4(obj: &Map<String, Value>) -> bool {
  let v4_prompt = obj.get("v4_prompt").is_some_and(is_truthy);
  let version = obj.get("version").and_then(Value::as_f64).is_some_and(|v| v >= 4.0);
  v4_prompt || version
}

/// JavaScript-style truthiness, which is what NovelAI's own tooling uses.
#[inline]
#[must_use]
fn is_truthy(value: &Value) -> bool {
  match value {
    Value::Null => false,
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
    Value::String(s) => !s.is_empty(),
    Value::Array(_) | Value::Object(_) => true,
  }
}

/// The keys that mark an object as generation settings.
pub const NAI_SAMPLING_KEYS: [&str; 5] = ["steps", "sampler", "noise_schedule", "width", "height"];

/// A prompt (plain or v4 caption object) alongside at least one sampling key.
#[must_use]
pub fn has_nai_params(obj: &Map<String, Value>) -> bool {
  let has_prompt = obj.get("prompt").is_some_and(Value::is_string) || is_nai_v4(obj);
  has_prompt && NAI_SAMPLING_KEYS.iter().any(|k| obj.contains_key(*k))
}

/// Is there a `Software` or `Source` field mentioning NovelAI?
#[must_use]
pub fn has_nai_tag(obj: &Map<String, Value>) -> bool {
  ["Software", "Source"].iter().any(|field| {
    get_ci(obj, field).and_then(Value::as_str).is_some_and(|s| s.to_ascii_lowercase().contains("novelai"))
  })
}

/// Checks one metadata object against the NovelAI rules.
///
/// Gives `"novelai-tag"` or `"novelai-params"` on a match.
#[must_use]
pub fn detect_nai(obj: &Map<String, Value>) -> Option<&'static str> {
  if has_nai_tag(obj) {
    return Some("novelai-tag");
  }
  if has_nai_params(obj) {
    return Some("novelai-params");
  }
  match select_generation_params(obj) {
    Some(Value::Object(inner)) if has_nai_params(&inner) => Some("novelai-params"),
    _ => None,
  }
}

/// Classifies an image from its three metadata sources.
///
/// Never fails: with nothing recognisable the result is
/// [`ModelKind::Unknown`] with reason `"no-signature"`.
#[must_use]
pub fn detect_model(
  standard: Option<&Map<String, Value>>, stealth: Option<&Value>, text: &TextChunkMap,
) -> DetectionResult {
  if let Some(reason) = detect_comfy(text) {
    return DetectionResult::new(ModelKind::Comfy, reason);
  }
  if let Some(reason) = stealth.and_then(Value::as_object).and_then(detect_nai) {
    return DetectionResult::new(ModelKind::Nai, format!("stealth:{reason}"));
  }
  if let Some(reason) = standard.and_then(detect_nai) {
    return DetectionResult::new(ModelKind::Nai, format!("standard:{reason}"));
  }
  DetectionResult::new(ModelKind::Unknown, "no-signature")
}
