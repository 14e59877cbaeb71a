#![forbid(unsafe_code)]

//! Reading everything out of one file, and making sense of it.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
  comfy::{extract_comfy_payload, normalize_graph, Graph},
  detect::{detect_model, DetectionResult, ModelKind},
  nai::{normalize_metadata, NaiRecord},
  png::{pixels::decode_rgba, text::png_get_text},
  stealth::{read_stealth, StealthPayload},
  Bitmap, MetaError, TextChunkMap,
};

/// Resource limits and switches for [`read_png_meta`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaOptions {
  /// Upper bound on any single decompressed text chunk or stealth payload.
  pub max_inflate_bytes: usize,
  /// Images with more pixels than this aren't decoded for stealth data.
  pub max_pixels: u64,
  /// Skip pixel decoding entirely when `false`.
  pub scan_stealth: bool,
}
impl Default for MetaOptions {
  fn default() -> Self {
    Self { max_inflate_bytes: 64 * 1024 * 1024, max_pixels: 100_000_000, scan_stealth: true }
  }
}
impl MetaOptions {
  /// Loads options from a JSON file. Missing fields keep their defaults.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, MetaError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
  }
}

/// All the metadata found in one PNG.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PngMeta {
  pub text: TextChunkMap,
  /// Flat "standard" fields such as `Software` or `Comment`.
  pub standard: Option<Map<String, Value>>,
  pub stealth: Option<StealthPayload>,
}

/// Reads the text chunks and, if enabled, the stealth channel.
///
/// `standard` is metadata the caller already has (from an EXIF reader, say).
/// Without it, the text chunks stand in, one field per keyword.
///
/// This never fails. A file that isn't a PNG just yields empty metadata.
#[must_use]
pub fn read_png_meta(bytes: &[u8], standard: Option<Map<String, Value>>, options: &MetaOptions) -> PngMeta {
  let bitmap = if options.scan_stealth {
    match decode_rgba(bytes, options.max_pixels) {
      Ok(bitmap) => Some(bitmap),
      Err(e) => {
        tracing::warn!(error = %e, "pixels unavailable, skipping the stealth scan");
        None
      }
    }
  } else {
    None
  };
  read_png_meta_with_pixels(bytes, bitmap.as_ref(), standard, options)
}

/// Like [`read_png_meta`], with pixels the caller decoded some other way.
#[must_use]
pub fn read_png_meta_with_pixels(
  bytes: &[u8], bitmap: Option<&Bitmap>, standard: Option<Map<String, Value>>, options: &MetaOptions,
) -> PngMeta {
  let text = png_get_text(bytes, options.max_inflate_bytes);
  tracing::debug!(keywords = text.len(), "read text chunks");
  let standard = standard.or_else(|| Some(text.to_standard_meta()).filter(|m| !m.is_empty()));
  let stealth = bitmap.and_then(|b| read_stealth(b, options.max_inflate_bytes));
  if let Some(s) = &stealth {
    tracing::debug!(mode = ?s.mode, compressed = s.compressed, chars = s.text.len(), "read stealth payload");
  }
  PngMeta { text, standard, stealth }
}

/// What the metadata says about the image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
  pub detection: DetectionResult,
  /// Set for NovelAI images whose settings could be normalized.
  pub nai: Option<NaiRecord>,
  /// Set for ComfyUI images.
  pub graph: Option<Graph>,
  /// The text keywords the ComfyUI data came from.
  pub comfy_sources: Vec<String>,
  /// The raw JSON the result was built from, when there was one.
  pub raw: Option<Value>,
}

/// Runs detection, then the normalizer for whichever tool was detected.
///
/// NovelAI settings are read from the same source that triggered
/// detection. For ComfyUI the workflow is preferred over the prompt.
#[must_use]
pub fn analyze(meta: &PngMeta, schema: Option<&Value>) -> Analysis {
  let stealth_json = meta.stealth.as_ref().and_then(|s| s.json.as_ref());
  let detection = detect_model(meta.standard.as_ref(), stealth_json, &meta.text);
  tracing::info!(kind = ?detection.kind, reason = %detection.reason, "detected");

  let mut analysis = Analysis { detection, nai: None, graph: None, comfy_sources: Vec::new(), raw: None };
  match analysis.detection.kind {
    ModelKind::Comfy => {
      let payload = extract_comfy_payload(&meta.text);
      analysis.graph = payload.preferred().map(|raw| normalize_graph(raw, schema));
      analysis.raw = payload.preferred().cloned();
      analysis.comfy_sources = payload.source_keys;
    }
    ModelKind::Nai => {
      let raw = if analysis.detection.reason.starts_with("stealth:") {
        stealth_json.cloned()
      } else {
        meta.standard.clone().map(Value::Object)
      };
      if let Some(raw) = raw {
        let normalized = normalize_metadata(&raw);
        if normalized.normalized.is_none() {
          tracing::debug!("NovelAI tag found but no settings could be normalized");
        }
        analysis.nai = normalized.normalized;
        analysis.raw = Some(raw);
      }
    }
    ModelKind::Unknown => {
      analysis.raw = stealth_json.cloned().or_else(|| meta.standard.clone().map(Value::Object));
    }
  }
  analysis
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_options_fill_missing_fields() {
    let opts: MetaOptions = serde_json::from_str(r#"{"scan_stealth": false}"#).unwrap();
    assert!(!opts.scan_stealth);
    assert_eq!(opts.max_pixels, MetaOptions::default().max_pixels);
    assert_eq!(opts.max_inflate_bytes, 64 * 1024 * 1024);
  }

  #[test]
  fn test_not_a_png_is_empty() {
    let meta = read_png_meta(b"GIF89a....", None, &MetaOptions::default());
    assert_eq!(meta, PngMeta::default());
    let found = analyze(&meta, None);
    assert_eq!(found.detection.kind, ModelKind::Unknown);
    assert_eq!(found.raw, None);
  }

  #[test]
  fn test_analyze_nai_from_standard() {
    let standard = json!({
      "Software": "NovelAI",
      "Comment": "{\"prompt\": \"cat\", \"uc\": \"dog\", \"steps\": 28, \"sampler\": \"k_euler\"}"
    });
    let meta = PngMeta { standard: standard.as_object().cloned(), ..PngMeta::default() };
    let found = analyze(&meta, None);
    assert_eq!(found.detection.reason, "standard:novelai-tag");
    assert_eq!(found.nai.map(|r| r.negative_prompt), Some("dog".to_owned()));
    assert_eq!(found.raw, Some(standard));
  }

  #[test]
  fn test_analyze_comfy_graph() {
    let text: TextChunkMap =
      [("prompt".to_owned(), r#"{"1": {"class_type": "A", "inputs": {}}}"#.to_owned())].into_iter().collect();
    let meta = PngMeta { text, ..PngMeta::default() };
    let found = analyze(&meta, None);
    assert_eq!(found.detection.kind, ModelKind::Comfy);
    assert_eq!(found.comfy_sources, ["prompt"]);
    assert_eq!(found.graph.map(|g| g.nodes.len()), Some(1));
  }
}
