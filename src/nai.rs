#![forbid(unsafe_code)]

//! NovelAI parameter normalization.
//!
//! NovelAI writes its generation settings as one flat JSON object. Before
//! v4 the prompt is a plain `prompt` string and the negative prompt is `uc`.
//! From v4 on both prompts are caption objects:
//!
//! ```json
//! { "v4_prompt": { "caption": {
//!     "base_caption": "...",
//!     "char_captions": [ { "char_caption": "...", "centers": [{ "x": 0.5, "y": 0.5 }] } ]
//! } } }
//! ```
//!
//! [`normalize_nai`] maps either layout onto a [`NaiRecord`]. Keys it doesn't
//! know are kept verbatim in [`NaiRecord::extras`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
  detect::{has_nai_params, is_nai_v4},
  format::parse_json_lenient,
};

/// Raw keys that become named fields of a [`NaiRecord`]. Everything else goes
/// to `extras`.
pub const KNOWN_FIELDS: [&str; 18] = [
  "prompt",
  "uc",
  "v4_prompt",
  "v4_negative_prompt",
  "steps",
  "sampler",
  "noise_schedule",
  "scale",
  "version",
  "char_prompts",
  "char_negative_prompts",
  "cfg_rescale",
  "seed",
  "width",
  "height",
  "n_samples",
  "request_type",
  "director_reference_strengths",
];

/// A position hint for a character prompt, in `0.0..=1.0` image space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Center {
  pub x: f64,
  pub y: f64,
}

/// One v4 character caption.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CharCaption {
  /// Position in the raw `char_captions` array, counting dropped entries.
  #[serde(rename = "idx")]
  pub index: usize,
  pub caption: String,
  pub centers: Vec<Center>,
}

/// NovelAI settings in a fixed shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NaiRecord {
  pub vendor: &'static str,
  pub version: Option<i64>,
  pub prompt: String,
  pub negative_prompt: String,
  pub char_prompts: Vec<CharCaption>,
  pub char_negative_prompts: Vec<CharCaption>,
  pub sampler: String,
  pub noise_schedule: String,
  pub steps: Option<u32>,
  pub cfg_scale: Option<f64>,
  pub cfg_rescale: Option<f64>,
  pub seed: Option<u64>,
  pub width: Option<u32>,
  pub height: Option<u32>,
  pub n_samples: Option<u32>,
  pub request_type: Option<String>,
  pub director_reference_strengths: Option<Value>,
  /// Every raw key not in [`KNOWN_FIELDS`], plus known keys whose value
  /// didn't fit the typed field (a negative `seed`, a list for `width`).
  pub extras: Map<String, Value>,
  /// The object this record was made from.
  pub raw: Value,
}
impl NaiRecord {
  /// Character prompts paired with their negatives by position.
  ///
  /// Either side may be missing when one list is longer than the other.
  #[must_use]
  pub fn char_pairs(&self) -> Vec<(Option<&CharCaption>, Option<&CharCaption>)> {
    let n = self.char_prompts.len().max(self.char_negative_prompts.len());
    (0..n).map(|i| (self.char_prompts.get(i), self.char_negative_prompts.get(i))).collect()
  }
}

#[inline]
fn str_field<'v>(obj: &'v Map<String, Value>, key: &str) -> Option<&'v str> {
  obj.get(key).and_then(Value::as_str)
}

/// Numbers sometimes arrive as strings; accept both.
fn f64_field(obj: &Map<String, Value>, key: &str) -> Option<f64> {
  match obj.get(key)? {
    Value::Number(n) => n.as_f64(),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

fn i64_field(obj: &Map<String, Value>, key: &str) -> Option<i64> {
  match obj.get(key)? {
    Value::Number(n) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

fn u64_field(obj: &Map<String, Value>, key: &str) -> Option<u64> {
  match obj.get(key)? {
    Value::Number(n) => n.as_u64().or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

fn u32_field(obj: &Map<String, Value>, key: &str) -> Option<u32> {
  u64_field(obj, key).and_then(|v| u32::try_from(v).ok())
}

/// `obj[key].caption`, when both levels are objects.
fn caption_of<'v>(obj: &'v Map<String, Value>, key: &str) -> Option<&'v Map<String, Value>> {
  obj.get(key)?.as_object()?.get("caption")?.as_object()
}

#[inline]
fn base_caption(caption: Option<&Map<String, Value>>) -> &str {
  caption.and_then(|c| str_field(c, "base_caption")).unwrap_or_default()
}

/// Non-empty character captions, keeping each one's original position.
fn collect_char_captions(caption: Option<&Map<String, Value>>) -> Vec<CharCaption> {
  let Some(entries) = caption.and_then(|c| c.get("char_captions")).and_then(Value::as_array) else {
    return Vec::new();
  };
  entries
    .iter()
    .enumerate()
    .filter_map(|(index, entry)| {
      let entry = entry.as_object()?;
      let caption = str_field(entry, "char_caption").filter(|s| !s.is_empty())?.to_owned();
      let centers = entry
        .get("centers")
        .and_then(Value::as_array)
        .map(|cs| cs.iter().filter_map(|c| Center::deserialize(c).ok()).collect())
        .unwrap_or_default();
      Some(CharCaption { index, caption, centers })
    })
    .collect()
}

/// Normalizes a raw NovelAI settings object.
///
/// Gives `None` unless `raw` is an object with a prompt (or v4 prompt) and at
/// least one of `steps`, `sampler`, `noise_schedule`, `width`, `height`.
#[must_use]
pub fn normalize_nai(raw: &Value) -> Option<NaiRecord> {
  let obj = raw.as_object()?;
  if !has_nai_params(obj) {
    return None;
  }

  let (prompt, negative_prompt, char_prompts, char_negative_prompts) = if is_nai_v4(obj) {
    let positive = caption_of(obj, "v4_prompt");
    let negative = caption_of(obj, "v4_negative_prompt");
    (
      base_caption(positive).to_owned(),
      base_caption(negative).to_owned(),
      collect_char_captions(positive),
      collect_char_captions(negative),
    )
  } else {
    (
      str_field(obj, "prompt").unwrap_or_default().to_owned(),
      str_field(obj, "uc").unwrap_or_default().to_owned(),
      Vec::new(),
      Vec::new(),
    )
  };

  let extras: Map<String, Value> =
    obj.iter().filter(|(k, _)| !KNOWN_FIELDS.contains(&k.as_str())).map(|(k, v)| (k.clone(), v.clone())).collect();

  let mut record = NaiRecord {
    vendor: "novelai",
    version: i64_field(obj, "version"),
    prompt,
    negative_prompt,
    char_prompts,
    char_negative_prompts,
    sampler: str_field(obj, "sampler").or_else(|| str_field(obj, "noise_schedule")).unwrap_or_default().to_owned(),
    noise_schedule: str_field(obj, "noise_schedule").unwrap_or_default().to_owned(),
    steps: u32_field(obj, "steps"),
    cfg_scale: f64_field(obj, "scale"),
    cfg_rescale: f64_field(obj, "cfg_rescale"),
    seed: u64_field(obj, "seed"),
    width: u32_field(obj, "width"),
    height: u32_field(obj, "height"),
    n_samples: u32_field(obj, "n_samples"),
    request_type: str_field(obj, "request_type").map(str::to_owned),
    director_reference_strengths: obj.get("director_reference_strengths").filter(|v| !v.is_null()).cloned(),
    extras,
    raw: raw.clone(),
  };

  let typed = [
    ("version", record.version.is_some()),
    ("uc", is_nai_v4(obj) || str_field(obj, "uc").is_some()),
    ("sampler", str_field(obj, "sampler").is_some()),
    ("noise_schedule", str_field(obj, "noise_schedule").is_some()),
    ("steps", record.steps.is_some()),
    ("scale", record.cfg_scale.is_some()),
    ("cfg_rescale", record.cfg_rescale.is_some()),
    ("seed", record.seed.is_some()),
    ("width", record.width.is_some()),
    ("height", record.height.is_some()),
    ("n_samples", record.n_samples.is_some()),
    ("request_type", record.request_type.is_some()),
  ];
  for (key, read) in typed {
    if let Some(value) = obj.get(key).filter(|v| !read && !v.is_null()) {
      tracing::debug!(key, "NovelAI field has an unexpected type, kept in extras");
      record.extras.insert(key.to_owned(), value.clone());
    }
  }
  Some(record)
}

/// Finds settings stored as a JSON string inside a metadata object.
///
/// NovelAI puts its full parameter object in the `Comment` field of both its
/// text chunks and its stealth payload, while the outer object only has
/// `Title`, `Description`, `Software`, and so on. This gives the first string
/// value that parses as a JSON object.
#[must_use]
pub fn select_generation_params(obj: &Map<String, Value>) -> Option<Value> {
  obj
    .values()
    .filter_map(Value::as_str)
    .filter(|s| s.contains('{') && s.contains('}'))
    .filter_map(parse_json_lenient)
    .find(Value::is_object)
}

/// Which schema [`normalize_metadata`] recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
  NovelAI,
  Unknown,
}

/// A raw metadata object along with its normalized form, if any.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedMetadata {
  pub vendor: Vendor,
  pub normalized: Option<NaiRecord>,
  pub raw: Value,
}

/// Normalizes whatever metadata object was found.
///
/// An object that carries its settings inside a JSON string (see
/// [`select_generation_params`]) is normalized from those inner settings.
#[must_use]
pub fn normalize_metadata(raw: &Value) -> NormalizedMetadata {
  let inner = raw.as_object().and_then(select_generation_params);
  let normalized = inner.as_ref().and_then(normalize_nai).or_else(|| normalize_nai(raw));
  let vendor = if normalized.is_some() { Vendor::NovelAI } else { Vendor::Unknown };
  NormalizedMetadata { vendor, normalized, raw: raw.clone() }
}
