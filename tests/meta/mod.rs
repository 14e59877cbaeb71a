use pnginfo::{analyze, read_png_meta, MetaOptions, ModelKind};

use super::png_chunk;

#[test]
fn test_random_bytes_never_panic_the_pipeline() {
  for _ in 0..10 {
    let meta = read_png_meta(&super::rand_bytes(2048), None, &MetaOptions::default());
    let found = analyze(&meta, None);
    assert_eq!(found.detection.kind, ModelKind::Unknown);
  }
}

#[cfg(feature = "miniz_oxide")]
mod files {
  use pnginfo::{comfy::EdgeVia, stealth::SIG_ALPHA_COMP, stealth::StealthMode};
  use serde_json::json;

  use super::*;
  use crate::{bytes_to_bits, embed_alpha, gzip, plain_bitmap, rgba_png, stealth_stream};

  fn text_chunk(key: &str, value: &str) -> Vec<u8> {
    png_chunk(b"tEXt", format!("{key}\0{value}").as_bytes())
  }

  #[test]
  fn test_comfy_file_prefers_workflow() {
    let prompt = json!({
      "3": {"class_type": "KSampler", "inputs": {"model": ["4", 0]}},
      "4": {"class_type": "CheckpointLoaderSimple", "inputs": {}}
    });
    let workflow = json!({
      "nodes": [{"id": 3, "type": "KSampler"}, {"id": 4, "type": "CheckpointLoaderSimple"}],
      "links": [[1, 4, 0, 3, 0, "MODEL"]]
    });
    let extra = [text_chunk("prompt", &prompt.to_string()), text_chunk("workflow", &workflow.to_string())];
    let png = rgba_png(&plain_bitmap(4, 4), &extra);

    let meta = read_png_meta(&png, None, &MetaOptions::default());
    assert_eq!(meta.stealth, None);
    let found = analyze(&meta, None);
    assert_eq!(found.detection.kind, ModelKind::Comfy);
    assert_eq!(found.detection.reason, "workflow:workflow");
    assert_eq!(found.comfy_sources, ["workflow", "prompt"]);
    let graph = found.graph.unwrap();
    assert_eq!(graph.nodes["3"].type_.name(), "KSampler");
    assert_eq!(graph.edges.len(), 1);
    assert_eq!(graph.edges[0].via, EdgeVia::Workflow);
    assert_eq!(found.raw, Some(workflow));
  }

  #[test]
  fn test_comfy_graph_comes_from_prompt_when_workflow_is_malformed() {
    let prompt = json!({
      "3": {"class_type": "KSampler", "inputs": {"model": ["4", 0]}},
      "4": {"class_type": "CheckpointLoaderSimple", "inputs": {}}
    });
    let extra = [text_chunk("workflow", r#"{"extra": 1}"#), text_chunk("prompt", &prompt.to_string())];
    let png = rgba_png(&plain_bitmap(4, 4), &extra);

    let found = analyze(&read_png_meta(&png, None, &MetaOptions::default()), None);
    assert_eq!(found.detection.kind, ModelKind::Comfy);
    assert_eq!(found.detection.reason, "prompt");
    assert_eq!(found.comfy_sources, ["prompt"]);
    let graph = found.graph.unwrap();
    assert_eq!(graph.nodes.len(), 2);
    assert_eq!(graph.edges.len(), 1);
    assert_eq!(graph.edges[0].via, EdgeVia::Prompt);
    assert_eq!(found.raw, Some(prompt));
  }

  #[test]
  fn test_nai_stealth_beats_standard() {
    let params = json!({
      "prompt": "1girl", "uc": "lowres", "steps": 28, "sampler": "k_euler_ancestral",
      "scale": 5.5, "seed": 42, "width": 832, "height": 1216
    });
    let stealth = json!({"Software": "NovelAI", "Comment": params.to_string()});
    let mut bitmap = plain_bitmap(48, 48);
    let payload = bytes_to_bits(&gzip(stealth.to_string().as_bytes()));
    embed_alpha(&mut bitmap, &stealth_stream(SIG_ALPHA_COMP, &payload));
    let png = rgba_png(&bitmap, &[text_chunk("Software", "NovelAI"), text_chunk("Comment", "{}")]);

    let meta = read_png_meta(&png, None, &MetaOptions::default());
    let payload = meta.stealth.as_ref().unwrap();
    assert_eq!((payload.mode, payload.compressed), (StealthMode::Alpha, true));
    assert_eq!(payload.json.as_ref(), Some(&stealth));

    let found = analyze(&meta, None);
    assert_eq!(found.detection.reason, "stealth:novelai-tag");
    let record = found.nai.unwrap();
    assert_eq!(record.prompt, "1girl");
    assert_eq!(record.cfg_scale, Some(5.5));
    assert_eq!(record.raw, params);

    // with the pixel scan off only the text chunks remain
    let text_only = read_png_meta(&png, None, &MetaOptions { scan_stealth: false, ..MetaOptions::default() });
    assert_eq!(text_only.stealth, None);
    let found = analyze(&text_only, None);
    assert_eq!(found.detection.reason, "standard:novelai-tag");
    assert_eq!(found.nai, None);
  }

  #[test]
  fn test_supplied_standard_metadata_wins_over_text() {
    let png = rgba_png(&plain_bitmap(2, 2), &[text_chunk("Software", "GIMP")]);
    let standard = json!({"Source": "NovelAI Diffusion V4", "Comment": "{\"prompt\": \"x\", \"steps\": 1}"});
    let meta = read_png_meta(&png, standard.as_object().cloned(), &MetaOptions::default());
    let found = analyze(&meta, None);
    assert_eq!(found.detection.kind, ModelKind::Nai);
    assert_eq!(found.detection.reason, "standard:novelai-tag");
    assert_eq!(found.nai.map(|r| r.steps), Some(Some(1)));
  }

  #[test]
  fn test_oversized_images_skip_the_pixel_scan() {
    let png = rgba_png(&plain_bitmap(8, 8), &[text_chunk("Title", "x")]);
    let meta = read_png_meta(&png, None, &MetaOptions { max_pixels: 10, ..MetaOptions::default() });
    assert_eq!(meta.stealth, None);
    assert_eq!(meta.text.first("Title"), Some("x"));
    assert_eq!(analyze(&meta, None).detection.reason, "no-signature");
  }
}
