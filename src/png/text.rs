//! Textual data chunks: `tEXt`, `zTXt`, and `iTXt`.
//!
//! * Spec: [tEXt](https://www.w3.org/TR/png/#11tEXt)
//! * Spec: [zTXt](https://www.w3.org/TR/png/#11zTXt)
//! * Spec: [iTXt](https://www.w3.org/TR/png/#11iTXt)
//!
//! Generation tools store their settings as text chunks (ComfyUI uses
//! `prompt` and `workflow`, NovelAI uses `Software`, `Comment`, and friends).
//! Any chunk that can't be decoded is skipped, the rest are gathered into a
//! [`TextChunkMap`].

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

use super::{PngRawChunk, PngRawChunkIter, PngRawChunkType};
use crate::inflate::inflate;

/// The only compression method PNG defines (zlib deflate).
const COMPRESSION_DEFLATE: u8 = 0;

/// Keyword to value-list map of a PNG's text chunks.
///
/// * Keywords are case-sensitive, exactly as stored.
/// * A keyword used by more than one chunk keeps every value, in file order.
/// * Keywords iterate in the order they first appeared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextChunkMap {
  entries: Vec<(String, Vec<String>)>,
}
impl TextChunkMap {
  #[inline]
  #[must_use]
  pub const fn new() -> Self {
    Self { entries: Vec::new() }
  }

  /// Appends a value to the keyword's list. Empty keywords are ignored.
  pub fn push(&mut self, key: String, value: String) {
    if key.is_empty() {
      return;
    }
    match self.entries.iter_mut().find(|(k, _)| *k == key) {
      Some((_, values)) => values.push(value),
      None => self.entries.push((key, vec![value])),
    }
  }

  #[inline]
  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// The number of distinct keywords.
  #[inline]
  #[must_use]
  pub fn len(&self) -> usize {
    self.entries.len()
  }

  /// All values stored under exactly this keyword.
  #[must_use]
  pub fn get(&self, key: &str) -> Option<&[String]> {
    self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_slice())
  }

  /// The first value stored under exactly this keyword.
  #[must_use]
  pub fn first(&self, key: &str) -> Option<&str> {
    self.get(key)?.first().map(String::as_str)
  }

  /// The first keyword equal to `needle`, ignoring ASCII case.
  #[must_use]
  pub fn find_key_ci(&self, needle: &str) -> Option<&str> {
    self.keys().find(|k| k.eq_ignore_ascii_case(needle))
  }

  /// The first keyword containing `needle`, ignoring ASCII case.
  #[must_use]
  pub fn find_key_containing_ci(&self, needle: &str) -> Option<&str> {
    let needle = needle.to_ascii_lowercase();
    self.keys().find(|k| k.to_ascii_lowercase().contains(&needle))
  }

  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.entries.iter().map(|(k, _)| k.as_str())
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
    self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
  }

  /// Flattens the map to one string per keyword (the first value).
  ///
  /// This is the shape a typical EXIF reader reports for PNG text, so it
  /// stands in for standard metadata when nothing better is available.
  #[must_use]
  pub fn to_standard_meta(&self) -> Map<String, Value> {
    self
      .entries
      .iter()
      .filter_map(|(k, v)| Some((k.clone(), Value::String(v.first()?.clone()))))
      .collect()
  }
}
impl Serialize for TextChunkMap {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.entries.len()))?;
    for (k, v) in &self.entries {
      map.serialize_entry(k, v)?;
    }
    map.end()
  }
}
impl FromIterator<(String, String)> for TextChunkMap {
  fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
    let mut out = Self::new();
    iter.into_iter().for_each(|(k, v)| out.push(k, v));
    out
  }
}

/// Decodes Latin-1 bytes. Every byte maps to the code point of equal value.
#[inline]
#[must_use]
pub fn latin1_to_string(bytes: &[u8]) -> String {
  bytes.iter().copied().map(char::from).collect()
}

/// Splits `keyword \0 rest`, requiring a non-empty keyword.
#[inline]
fn split_keyword(data: &[u8]) -> Option<(&[u8], &[u8])> {
  let sep = data.iter().position(|&b| b == 0)?;
  if sep == 0 {
    return None;
  }
  Some((&data[..sep], &data[sep + 1..]))
}

/// Skips past the next null byte. Running off the end gives an empty slice.
#[inline]
fn skip_past_null(data: &[u8]) -> &[u8] {
  match data.iter().position(|&b| b == 0) {
    Some(i) => &data[i + 1..],
    None => &[],
  }
}

/// Decodes one text chunk into a `(keyword, value)` pair.
///
/// Returns `None` for non-text chunks and for any text chunk that can't be
/// decoded (no keyword, unknown compression, corrupt compressed data).
#[must_use]
pub fn decode_text_chunk(raw: &PngRawChunk<'_>, max_inflate_bytes: usize) -> Option<(String, String)> {
  let data = raw.data();
  match raw.type_() {
    PngRawChunkType::tEXt => {
      let (key, text) = split_keyword(data)?;
      Some((latin1_to_string(key), latin1_to_string(text)))
    }
    PngRawChunkType::zTXt => {
      let (key, rest) = split_keyword(data)?;
      let (method, compressed) = rest.split_first()?;
      if *method != COMPRESSION_DEFLATE {
        tracing::debug!(method, "zTXt chunk with unsupported compression method");
        return None;
      }
      let text = inflate(compressed, max_inflate_bytes)
        .map_err(|e| tracing::debug!(error = %e, "zTXt chunk could not be inflated"))
        .ok()?;
      Some((latin1_to_string(key), latin1_to_string(&text)))
    }
    PngRawChunkType::iTXt => {
      let (key, rest) = split_keyword(data)?;
      let (flag, method, rest) = match rest {
        [flag, method, rest @ ..] => (*flag, *method, rest),
        _ => return None,
      };
      // language tag, then translated keyword
      let text = skip_past_null(skip_past_null(rest));
      // anything but a deflated chunk is read as plain UTF-8
      let value = if flag == 1 && method == COMPRESSION_DEFLATE {
        let inflated = inflate(text, max_inflate_bytes)
          .map_err(|e| tracing::debug!(error = %e, "iTXt chunk could not be inflated"))
          .ok()?;
        String::from_utf8_lossy(&inflated).into_owned()
      } else {
        String::from_utf8_lossy(text).into_owned()
      };
      Some((latin1_to_string(key), value))
    }
    _ => None,
  }
}

/// Gathers every decodable text chunk in the PNG bytes.
#[must_use]
pub fn png_get_text(bytes: &[u8], max_inflate_bytes: usize) -> TextChunkMap {
  PngRawChunkIter::new(bytes).filter_map(|raw| decode_text_chunk(&raw, max_inflate_bytes)).collect()
}
