#![forbid(unsafe_code)]

//! JSON helpers: lenient parsing, pretty printing, and the key explorer.
//!
//! Generation metadata is JSON, but it's often JSON stored inside a JSON
//! string, or JSON with its quotes escaped once too often. These helpers
//! try the usual repairs and give up quietly when none of them work.

use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use crate::MetaError;

/// How many layers of "JSON inside a JSON string" are unwrapped.
pub const MAX_JSON_UNWRAP: usize = 2;

/// Does this text look like it could be a JSON object or array?
#[inline]
#[must_use]
fn looks_like_json(s: &str) -> bool {
  s.starts_with('{') || s.starts_with('[')
}

/// Parses `value` as JSON, unwrapping JSON that was itself stored as a JSON
/// string, at most [`MAX_JSON_UNWRAP`] parses deep.
///
/// Gives `None` unless the text starts like an object, an array, or a quoted
/// string, or if the first parse fails. When a later parse fails, the last
/// successfully parsed value is returned.
#[must_use]
pub fn try_json_loads_maybe_nested(value: &str) -> Option<Value> {
  let s = value.trim();
  if !(looks_like_json(s) || s.starts_with('"')) {
    return None;
  }
  let mut parsed: Value = serde_json::from_str(s).ok()?;
  for _ in 1..MAX_JSON_UNWRAP {
    let inner = match &parsed {
      Value::String(inner) if looks_like_json(inner.trim()) => inner.trim(),
      _ => break,
    };
    match serde_json::from_str(inner) {
      Ok(next) => parsed = next,
      Err(_) => break,
    }
  }
  Some(parsed)
}

/// Parses JSON, retrying once with `\"` turned into `"` for text that was
/// escaped one time too many.
#[must_use]
pub fn parse_json_lenient(text: &str) -> Option<Value> {
  serde_json::from_str(text).ok().or_else(|| serde_json::from_str(&text.replace("\\\"", "\"")).ok())
}

/// Renders a value as JSON with 2-space indentation.
#[must_use]
pub fn pretty_json<T: Serialize + ?Sized>(value: &T) -> String {
  serde_json::to_string_pretty(value).unwrap_or_default()
}

/// Pretty prints text that holds a JSON object or array, and returns any
/// other text unchanged.
#[must_use]
pub fn pretty_json_str(text: &str) -> String {
  let trimmed = text.trim();
  if looks_like_json(trimmed) {
    if let Ok(parsed) = serde_json::from_str::<Value>(trimmed) {
      return pretty_json(&parsed);
    }
  }
  text.to_owned()
}

/// Writes the value to `path` as pretty JSON, UTF-8 encoded.
pub fn save_json<T: Serialize + ?Sized>(path: impl AsRef<Path>, value: &T) -> Result<(), MetaError> {
  let mut text = serde_json::to_string_pretty(value)?;
  text.push('\n');
  std::fs::write(path, text)?;
  Ok(())
}

/// Limits for [`build_key_tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyTreeOptions {
  pub max_nodes: usize,
  pub max_depth: usize,
}
impl Default for KeyTreeOptions {
  #[inline]
  fn default() -> Self {
    Self { max_nodes: 2000, max_depth: 10 }
  }
}

/// One entry in the key explorer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyNode {
  pub key: String,
  /// Dotted path from the root, with `[i]` for array elements and `(json)`
  /// for a string that was parsed as JSON.
  pub path: String,
  /// `null`, `object`, `array(n)`, `string`, `number`, or `boolean`.
  #[serde(rename = "type")]
  pub type_: String,
  /// Short preview of the value.
  pub sample: String,
  pub children: Vec<KeyNode>,
}
impl KeyNode {
  /// Depth-first walk over this node and all of its descendants.
  pub fn walk(&self) -> Box<dyn Iterator<Item = &KeyNode> + '_> {
    Box::new(core::iter::once(self).chain(self.children.iter().flat_map(KeyNode::walk)))
  }
}

const SAMPLE_CHARS: usize = 120;

fn describe_type(value: &Value) -> String {
  match value {
    Value::Null => "null".into(),
    Value::Bool(_) => "boolean".into(),
    Value::Number(_) => "number".into(),
    Value::String(_) => "string".into(),
    Value::Array(a) => format!("array({})", a.len()),
    Value::Object(_) => "object".into(),
  }
}

fn format_sample(value: &Value) -> String {
  let s = match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  };
  if s.chars().count() > SAMPLE_CHARS {
    let mut cut: String = s.chars().take(SAMPLE_CHARS - 3).collect();
    cut.push_str("...");
    cut
  } else {
    s
  }
}

fn join_path(parent: &str, key: &str) -> String {
  if parent.is_empty() || parent == "(root)" {
    key.to_owned()
  } else {
    format!("{parent}.{key}")
  }
}

/// Builds a browsable tree of every key path in `value`.
///
/// String values that hold a JSON object or array get a `(json)` child with
/// the parsed contents. The walk stops adding nodes once `max_nodes` exist,
/// and doesn't descend past `max_depth`.
#[must_use]
pub fn build_key_tree(value: &Value, options: KeyTreeOptions) -> Option<KeyNode> {
  fn make_node(
    key: String, path: String, value: &Value, depth: usize, options: KeyTreeOptions, count: &mut usize,
  ) -> Option<KeyNode> {
    if *count >= options.max_nodes {
      return None;
    }
    *count += 1;
    let mut node = KeyNode {
      key,
      path,
      type_: describe_type(value),
      sample: format_sample(value),
      children: Vec::new(),
    };
    if depth >= options.max_depth {
      return Some(node);
    }
    match value {
      Value::Array(items) => {
        for (i, v) in items.iter().enumerate() {
          let child_path = format!("{}[{i}]", node.path);
          if let Some(child) = make_node(format!("[{i}]"), child_path, v, depth + 1, options, count) {
            node.children.push(child);
          }
        }
      }
      Value::Object(map) => {
        for (k, v) in map {
          let child_path = join_path(&node.path, k);
          if let Some(child) = make_node(k.clone(), child_path, v, depth + 1, options, count) {
            node.children.push(child);
          }
        }
      }
      Value::String(s) => {
        let parsed = Some(s.trim())
          .filter(|t| looks_like_json(t))
          .and_then(|t| serde_json::from_str::<Value>(t).ok())
          .filter(|v| v.is_object() || v.is_array());
        if let Some(parsed) = parsed {
          let child_path = if node.path == "(root)" { "(json)".to_owned() } else { format!("{}(json)", node.path) };
          if let Some(child) = make_node("(json)".into(), child_path, &parsed, depth + 1, options, count) {
            node.children.push(child);
          }
        }
      }
      _ => (),
    }
    Some(node)
  }

  let mut count = 0;
  make_node("(root)".into(), "(root)".into(), value, 0, options, &mut count)
}
