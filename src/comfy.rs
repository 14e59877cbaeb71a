#![forbid(unsafe_code)]

//! ComfyUI graph normalization.
//!
//! ComfyUI images can carry the same graph in two shapes:
//!
//! * `prompt`: the API form, a map from node id to `{class_type, inputs}`.
//!   A link is an input whose value is `[source_id, source_slot]`.
//! * `workflow`: the UI save form, with a `nodes` array and a `links` array.
//!
//! Other tools write a looser `{nodes, edges}` shape. [`normalize_graph`]
//! turns all three into a [`Graph`].

use std::{collections::BTreeMap, path::Path};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
  detect::{is_comfy_node, is_comfy_prompt, is_comfy_workflow},
  format::try_json_loads_maybe_nested,
  MetaError, TextChunkMap,
};

/// What kind of node this is, as each encoding names it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct NodeType {
  /// The `class_type` from the prompt form.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub prompt: Option<String>,
  /// The `type` from the workflow form.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub workflow: Option<String>,
}
impl NodeType {
  /// The best available name, or `"unknown"`.
  #[inline]
  #[must_use]
  pub fn name(&self) -> &str {
    self.prompt.as_deref().or(self.workflow.as_deref()).unwrap_or("unknown")
  }

  /// A `type` field may be an object of names or a bare string. Without one,
  /// the node's `class_type` or `ui_type` is used.
  fn from_node(node: &Map<String, Value>) -> Self {
    let as_string = |k: &str| node.get(k).and_then(Value::as_str).map(str::to_owned);
    match node.get("type") {
      Some(Value::Object(t)) => Self {
        prompt: t.get("prompt").and_then(Value::as_str).map(str::to_owned),
        workflow: t.get("workflow").and_then(Value::as_str).map(str::to_owned),
      },
      Some(Value::String(s)) => Self { prompt: None, workflow: Some(s.clone()) },
      _ => Self { prompt: None, workflow: as_string("class_type").or_else(|| as_string("ui_type")) },
    }
  }
}

/// Editor layout of a workflow node. Every field is kept as found.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeUi {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub pos: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub size: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub widgets_values: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub inputs: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub outputs: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub properties: Option<Value>,
}

const UI_FIELDS: [&str; 6] = ["pos", "size", "widgets_values", "inputs", "outputs", "properties"];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphNode {
  pub id: String,
  #[serde(rename = "type")]
  pub type_: NodeType,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub ui: Option<NodeUi>,
  /// The node's other raw fields, minus `id` and `type`.
  #[serde(skip_serializing_if = "Map::is_empty")]
  pub fields: Map<String, Value>,
  /// Set on containers made up from compound ids.
  #[serde(rename = "virtual", skip_serializing_if = "core::ops::Not::not")]
  pub is_virtual: bool,
  /// Ids of the nodes nested directly inside this one.
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub children: Vec<String>,
}
impl GraphNode {
  fn from_raw(id: String, raw: &Map<String, Value>) -> Self {
    let fields = raw.iter().filter(|(k, _)| *k != "id" && *k != "type").map(|(k, v)| (k.clone(), v.clone())).collect();
    Self { id, type_: NodeType::from_node(raw), fields, ..Self::default() }
  }
}

/// Which encoding an edge came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeVia {
  Prompt,
  Workflow,
  Edges,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Edge {
  pub src_id: String,
  pub src_slot: Option<i64>,
  pub dst_id: String,
  pub dst_slot: Option<i64>,
  /// The named input on the destination, in the prompt form.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub dst_input: Option<String>,
  pub via: EdgeVia,
}

/// A node graph in one shape regardless of how it was stored.
///
/// Every edge's `dst_id` is a key of `nodes`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Graph {
  pub nodes: BTreeMap<String, GraphNode>,
  pub edges: Vec<Edge>,
}
impl Graph {
  /// Edges that end at `id`.
  pub fn incoming<'g>(&'g self, id: &'g str) -> impl Iterator<Item = &'g Edge> + 'g {
    self.edges.iter().filter(move |e| e.dst_id == id)
  }

  /// Edges that start at `id`.
  pub fn outgoing<'g>(&'g self, id: &'g str) -> impl Iterator<Item = &'g Edge> + 'g {
    self.edges.iter().filter(move |e| e.src_id == id)
  }

  /// Drops every edge whose destination isn't a node.
  fn drop_dangling_edges(&mut self) {
    let before = self.edges.len();
    let nodes = &self.nodes;
    self.edges.retain(|e| nodes.contains_key(&e.dst_id));
    let dropped = before - self.edges.len();
    if dropped > 0 {
      tracing::debug!(dropped, "edges pointing at unknown nodes were dropped");
    }
  }
}

/// Ids show up as strings or numbers. Anything else isn't an id.
#[must_use]
fn id_string(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

#[inline]
fn slot(value: Option<&Value>) -> Option<i64> {
  value.and_then(Value::as_i64)
}

/// A prompt dict: an object without `nodes` where some value is a node.
#[must_use]
fn is_prompt_dict(raw: &Map<String, Value>) -> bool {
  !raw.contains_key("nodes") && raw.values().any(is_comfy_node)
}

/// Does `raw` have every top-level field the official workflow schema
/// requires, plus a `nodes` array?
///
/// Always `false` without a schema.
#[must_use]
pub fn matches_official_schema(raw: &Value, schema: Option<&Value>) -> bool {
  let (Some(raw), Some(schema)) = (raw.as_object(), schema) else {
    return false;
  };
  let required = schema.pointer("/definitions/ComfyWorkflow1_0/required").and_then(Value::as_array);
  let has_required =
    required.map_or(true, |req| req.iter().filter_map(Value::as_str).all(|k| raw.contains_key(k)));
  has_required && raw.get("nodes").is_some_and(Value::is_array)
}

/// Reads a workflow JSON schema document from disk.
pub fn load_workflow_schema(path: impl AsRef<Path>) -> Result<Value, MetaError> {
  let text = std::fs::read_to_string(path)?;
  Ok(serde_json::from_str(&text)?)
}

/// Converts any of the known graph encodings into a [`Graph`].
///
/// Anything that isn't an object gives an empty graph.
#[must_use]
pub fn normalize_graph(raw: &Value, schema: Option<&Value>) -> Graph {
  let Some(obj) = raw.as_object() else {
    return Graph::default();
  };
  let mut graph = if is_prompt_dict(obj) {
    graph_from_prompt(obj)
  } else if matches_official_schema(raw, schema) || obj.get("nodes").is_some_and(Value::is_array) {
    graph_from_workflow(obj)
  } else {
    graph_from_generic(obj)
  };
  graph.drop_dangling_edges();
  graph
}

fn graph_from_prompt(obj: &Map<String, Value>) -> Graph {
  let mut graph = Graph::default();
  for (id, node) in obj {
    let Some(node) = node.as_object() else {
      continue;
    };
    let mut gn = GraphNode::from_raw(id.clone(), node);
    if !node.contains_key("type") {
      gn.type_ = NodeType { prompt: node.get("class_type").and_then(Value::as_str).map(str::to_owned), workflow: None };
    }
    if let Some(inputs) = node.get("inputs").and_then(Value::as_object) {
      for (input, value) in inputs {
        let Some([src, src_slot, ..]) = value.as_array().map(Vec::as_slice) else {
          continue;
        };
        let Some(src_id) = id_string(src) else {
          continue;
        };
        graph.edges.push(Edge {
          src_id,
          src_slot: slot(Some(src_slot)),
          dst_id: id.clone(),
          dst_slot: None,
          dst_input: Some(input.clone()),
          via: EdgeVia::Prompt,
        });
      }
    }
    graph.nodes.insert(id.clone(), gn);
  }
  add_virtual_containers(&mut graph.nodes);
  graph
}

/// For every compound id `a:b`, makes sure a node `a` exists and lists `a:b`
/// as a child. Deeper ids add one container per level.
fn add_virtual_containers(nodes: &mut BTreeMap<String, GraphNode>) {
  let compound: Vec<String> = nodes.keys().filter(|id| id.contains(':')).cloned().collect();
  for id in compound {
    let mut child = id;
    while let Some((parent, _)) = child.rsplit_once(':') {
      let parent = parent.to_owned();
      let container = nodes.entry(parent.clone()).or_insert_with(|| GraphNode {
        id: parent.clone(),
        is_virtual: true,
        ..GraphNode::default()
      });
      if !container.children.contains(&child) {
        container.children.push(child);
      }
      child = parent;
    }
  }
}

fn graph_from_workflow(obj: &Map<String, Value>) -> Graph {
  let mut graph = Graph::default();
  for node in obj.get("nodes").and_then(Value::as_array).into_iter().flatten() {
    let Some(node) = node.as_object() else {
      continue;
    };
    let Some(id) = node.get("id").and_then(id_string) else {
      continue;
    };
    let ui = NodeUi {
      pos: node.get("pos").cloned(),
      size: node.get("size").cloned(),
      widgets_values: node.get("widgets_values").cloned(),
      inputs: node.get("inputs").cloned(),
      outputs: node.get("outputs").cloned(),
      properties: node.get("properties").cloned(),
    };
    let mut gn = GraphNode::from_raw(id.clone(), node);
    gn.fields.retain(|k, _| !UI_FIELDS.contains(&k.as_str()));
    gn.ui = Some(ui);
    graph.nodes.insert(id, gn);
  }
  for link in obj.get("links").and_then(Value::as_array).into_iter().flatten() {
    match workflow_link(link) {
      Some(edge) => graph.edges.push(edge),
      None => tracing::debug!(%link, "skipping unreadable workflow link"),
    }
  }
  graph
}

/// Links are either objects or `[id, origin_id, origin_slot, target_id,
/// target_slot, type]` arrays.
fn workflow_link(link: &Value) -> Option<Edge> {
  let (src, src_slot, dst, dst_slot) = match link {
    Value::Object(l) => (l.get("origin_id")?, l.get("origin_slot"), l.get("target_id")?, l.get("target_slot")),
    Value::Array(l) if l.len() >= 5 => (&l[1], l.get(2), &l[3], l.get(4)),
    _ => return None,
  };
  Some(Edge {
    src_id: id_string(src)?,
    src_slot: slot(src_slot),
    dst_id: id_string(dst)?,
    dst_slot: slot(dst_slot),
    dst_input: None,
    via: EdgeVia::Workflow,
  })
}

fn graph_from_generic(obj: &Map<String, Value>) -> Graph {
  let mut graph = Graph::default();
  let nodes: Box<dyn Iterator<Item = &Value> + '_> = match obj.get("nodes") {
    Some(Value::Object(m)) => Box::new(m.values()),
    Some(Value::Array(a)) => Box::new(a.iter()),
    _ => Box::new(core::iter::empty()),
  };
  for node in nodes {
    let Some(node) = node.as_object() else {
      continue;
    };
    let Some(id) = node.get("id").and_then(id_string) else {
      continue;
    };
    graph.nodes.insert(id.clone(), GraphNode::from_raw(id, node));
  }
  for edge in obj.get("edges").and_then(Value::as_array).into_iter().flatten() {
    let Some(e) = edge.as_object() else {
      continue;
    };
    let (Some(src_id), Some(dst_id)) =
      (e.get("src_id").and_then(id_string), e.get("dst_id").and_then(id_string))
    else {
      continue;
    };
    graph.edges.push(Edge {
      src_id,
      src_slot: slot(e.get("src_slot")),
      dst_id,
      dst_slot: slot(e.get("dst_slot")),
      dst_input: e.get("dst_input").and_then(Value::as_str).map(str::to_owned),
      via: EdgeVia::Edges,
    });
  }
  graph
}

/// The raw ComfyUI JSON found in an image's text chunks.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComfyPayload {
  pub prompt: Option<Value>,
  pub workflow: Option<Value>,
  /// The text keywords the values came from, workflow first.
  pub source_keys: Vec<String>,
}
impl ComfyPayload {
  /// The workflow when there is one, since it has the links and layout.
  #[inline]
  #[must_use]
  pub fn preferred(&self) -> Option<&Value> {
    self.workflow.as_ref().or(self.prompt.as_ref())
  }
}

/// Pulls the `workflow` and `prompt` JSON out of the text chunks.
///
/// The workflow comes from the first keyword containing "workflow", the
/// prompt from the keyword equal to "prompt", both ignoring case. Only a
/// value that passes the same shape check as detection is used.
#[must_use]
pub fn extract_comfy_payload(text: &TextChunkMap) -> ComfyPayload {
  let find = |key: Option<&str>, accept: fn(&Value) -> bool| -> Option<(String, Value)> {
    let key = key?;
    let value = text.get(key)?.iter().filter_map(|v| try_json_loads_maybe_nested(v)).find(|v| accept(v))?;
    Some((key.to_owned(), value))
  };
  let mut payload = ComfyPayload::default();
  if let Some((key, value)) = find(text.find_key_containing_ci("workflow"), is_comfy_workflow) {
    payload.source_keys.push(key);
    payload.workflow = Some(value);
  }
  if let Some((key, value)) = find(text.find_key_ci("prompt"), is_comfy_prompt) {
    payload.source_keys.push(key);
    payload.prompt = Some(value);
  }
  payload
}
