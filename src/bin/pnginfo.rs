#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Map, Value};

use pnginfo::{
  analyze,
  comfy::{load_workflow_schema, Graph},
  format::{build_key_tree, pretty_json, pretty_json_str, save_json, KeyTreeOptions},
  nai::NaiRecord,
  png::{is_png_header_correct, parse_chunks},
  read_png_meta, MetaOptions, PngMeta,
};

#[derive(Parser)]
#[command(name = "pnginfo", about = "Reads AI generation metadata out of PNG files")]
struct Args {
  /// More log output. Repeat for even more.
  #[arg(short, long, action = clap::ArgAction::Count, global = true)]
  verbose: u8,
  /// JSON file with reader limits.
  #[arg(long, global = true)]
  config: Option<PathBuf>,
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Detects the generating tool and shows its settings.
  Inspect {
    png: PathBuf,
    /// JSON object of standard metadata (as an EXIF reader reports it).
    #[arg(long)]
    exif: Option<PathBuf>,
    /// ComfyUI workflow JSON schema.
    #[arg(long)]
    schema: Option<PathBuf>,
    /// Print the whole analysis as JSON.
    #[arg(long)]
    json: bool,
  },
  /// Lists every chunk with its length and declared CRC.
  Chunks { png: PathBuf },
  /// Prints the text chunks.
  Text { png: PathBuf },
  /// Prints the stealth payload.
  Stealth { png: PathBuf },
  /// Lists every key path in one metadata source.
  Keys {
    png: PathBuf,
    #[arg(long, value_enum, default_value_t = Source::Standard)]
    source: Source,
  },
  /// Writes metadata to a JSON file.
  Export {
    png: PathBuf,
    #[arg(short, long)]
    out: PathBuf,
    #[arg(long, value_enum, default_value_t = What::Normalized)]
    what: What,
  },
}

#[derive(Clone, Copy, ValueEnum)]
enum Source {
  Standard,
  Stealth,
  Text,
}

#[derive(Clone, Copy, ValueEnum)]
enum What {
  Normalized,
  Raw,
  Graph,
  Text,
}

fn main() -> Result<()> {
  let args = Args::parse();
  init_logging(args.verbose);
  let options = match &args.config {
    Some(path) => MetaOptions::load(path).with_context(|| format!("reading config {}", path.display()))?,
    None => MetaOptions::default(),
  };
  match args.command {
    Command::Inspect { png, exif, schema, json } => {
      run_inspect(&png, exif.as_deref(), schema.as_deref(), json, &options)
    }
    Command::Chunks { png } => run_chunks(&png),
    Command::Text { png } => {
      let meta = load_meta(&png, None, &options)?;
      println!("{}", pretty_json(&meta.text));
      Ok(())
    }
    Command::Stealth { png } => run_stealth(&png, &options),
    Command::Keys { png, source } => run_keys(&png, source, &options),
    Command::Export { png, out, what } => run_export(&png, &out, what, &options),
  }
}

fn init_logging(verbose: u8) {
  let level = match verbose {
    0 => tracing::Level::WARN,
    1 => tracing::Level::INFO,
    2 => tracing::Level::DEBUG,
    _ => tracing::Level::TRACE,
  };
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
    .with_writer(std::io::stderr)
    .init();
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
  std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn load_meta(png: &Path, exif: Option<&Path>, options: &MetaOptions) -> Result<PngMeta> {
  let standard = match exif {
    Some(path) => {
      let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
      match serde_json::from_str::<Value>(&text)? {
        Value::Object(map) => Some(map),
        _ => bail!("{} is not a JSON object", path.display()),
      }
    }
    None => None,
  };
  let bytes = read_bytes(png)?;
  Ok(read_png_meta(&bytes, standard, options))
}

fn run_inspect(
  png: &Path,
  exif: Option<&Path>,
  schema: Option<&Path>,
  json: bool,
  options: &MetaOptions,
) -> Result<()> {
  let meta = load_meta(png, exif, options)?;
  let schema = schema
    .map(|path| load_workflow_schema(path).with_context(|| format!("reading schema {}", path.display())))
    .transpose()?;
  let analysis = analyze(&meta, schema.as_ref());
  if json {
    println!("{}", pretty_json(&analysis));
    return Ok(());
  }

  println!("{}: {:?} ({})", png.display(), analysis.detection.kind, analysis.detection.reason);
  if let Some(stealth) = &meta.stealth {
    let state = if stealth.compressed { "compressed" } else { "plain" };
    println!("stealth: {:?}, {state}, {} bytes", stealth.mode, stealth.text.len());
  }
  if let Some(record) = &analysis.nai {
    print_nai(record);
  }
  if let Some(graph) = &analysis.graph {
    println!("sources: {}", analysis.comfy_sources.join(", "));
    print_graph(graph);
  }
  if !meta.text.is_empty() {
    println!("text keys: {}", meta.text.keys().collect::<Vec<_>>().join(", "));
  }
  Ok(())
}

fn print_nai(record: &NaiRecord) {
  println!("prompt: {}", record.prompt);
  println!("negative: {}", record.negative_prompt);
  for (i, (pos, neg)) in record.char_pairs().into_iter().enumerate() {
    let caption = |c: Option<&pnginfo::nai::CharCaption>| c.map(|c| c.caption.clone()).unwrap_or_default();
    println!("character {}: {} | negative: {}", i + 1, caption(pos), caption(neg));
  }
  let opt = |v: Option<String>| v.unwrap_or_else(|| "-".into());
  println!(
    "sampler: {}, schedule: {}, steps: {}, cfg: {}, rescale: {}, seed: {}",
    record.sampler,
    record.noise_schedule,
    opt(record.steps.map(|v| v.to_string())),
    opt(record.cfg_scale.map(|v| v.to_string())),
    opt(record.cfg_rescale.map(|v| v.to_string())),
    opt(record.seed.map(|v| v.to_string())),
  );
  println!(
    "size: {}x{}",
    opt(record.width.map(|v| v.to_string())),
    opt(record.height.map(|v| v.to_string())),
  );
  if !record.extras.is_empty() {
    println!("extras: {}", record.extras.keys().cloned().collect::<Vec<_>>().join(", "));
  }
}

fn print_graph(graph: &Graph) {
  println!("{} nodes, {} edges", graph.nodes.len(), graph.edges.len());
  for (id, node) in &graph.nodes {
    let marker = if node.is_virtual { " (group)" } else { "" };
    let (inputs, outputs) = (graph.incoming(id).count(), graph.outgoing(id).count());
    println!("  {id:>6}  {}{marker}  in:{inputs} out:{outputs}", node.type_.name());
  }
}

fn run_chunks(png: &Path) -> Result<()> {
  let bytes = read_bytes(png)?;
  if !is_png_header_correct(&bytes) {
    bail!("{} is not a PNG", png.display());
  }
  for chunk in parse_chunks(&bytes) {
    let crc = chunk.declared_crc().map(|c| format!("{c:08X}")).unwrap_or_else(|| "missing".into());
    let kind = if chunk.type_().is_ancillary() { "ancillary" } else { "critical" };
    println!("{:?}  {kind:<9}  {:>10}  {crc}", chunk.type_(), chunk.data().len());
  }
  Ok(())
}

fn run_stealth(png: &Path, options: &MetaOptions) -> Result<()> {
  let options = MetaOptions { scan_stealth: true, ..*options };
  let meta = load_meta(png, None, &options)?;
  let stealth = meta.stealth.ok_or_else(|| anyhow!("no stealth payload in {}", png.display()))?;
  println!("{}", pretty_json_str(&stealth.text));
  Ok(())
}

fn run_keys(png: &Path, source: Source, options: &MetaOptions) -> Result<()> {
  let meta = load_meta(png, None, options)?;
  let value = match source {
    Source::Standard => meta.standard.map(Value::Object),
    Source::Stealth => meta.stealth.and_then(|s| s.json),
    Source::Text => Some(serde_json::to_value(&meta.text)?),
  };
  let tree = value
    .as_ref()
    .and_then(|v| build_key_tree(v, KeyTreeOptions::default()))
    .ok_or_else(|| anyhow!("nothing to explore"))?;
  for node in tree.walk() {
    println!("{:<48}  {:<10}  {}", node.path, node.type_, node.sample.replace('\n', " "));
  }
  Ok(())
}

fn run_export(png: &Path, out: &Path, what: What, options: &MetaOptions) -> Result<()> {
  let meta = load_meta(png, None, options)?;
  let analysis = analyze(&meta, None);
  let value: Value = match what {
    What::Normalized => match (&analysis.nai, &analysis.graph) {
      (Some(record), _) => serde_json::to_value(record)?,
      (None, Some(graph)) => serde_json::to_value(graph)?,
      (None, None) => bail!("no normalized metadata ({})", analysis.detection.reason),
    },
    What::Raw => analysis.raw.ok_or_else(|| anyhow!("no raw metadata"))?,
    What::Graph => serde_json::to_value(analysis.graph.ok_or_else(|| anyhow!("no ComfyUI graph"))?)?,
    What::Text => Value::Object(
      meta.text.iter().map(|(k, v)| (k.to_owned(), Value::from(v.to_vec()))).collect::<Map<String, Value>>(),
    ),
  };
  save_json(out, &value).with_context(|| format!("writing {}", out.display()))?;
  tracing::info!(path = %out.display(), "exported");
  Ok(())
}
