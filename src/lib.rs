#![cfg_attr(docs_rs, feature(doc_cfg))]
#![forbid(unsafe_code)]

//! A crate for reading AI image generation metadata out of PNG files.
//!
//! Generation tools leave their settings behind in two places:
//!
//! * PNG text chunks (`tEXt`, `zTXt`, `iTXt`), see [`png::text`].
//! * The "stealth" channel in the low bits of the pixels, see [`stealth`].
//!
//! [`meta::read_png_meta`] gathers both, [`detect::detect_model`] decides
//! which tool made the image, and then [`nai::normalize_nai`] or
//! [`comfy::normalize_graph`] turns that tool's raw JSON into a fixed shape.
//!
//! Missing or broken metadata is never an error. It shows up as `None`, an
//! empty map, or a detection of [`ModelKind::Unknown`].

#[cfg(target_pointer_width = "16")]
compile_error!("this crate assumes 32-bit or bigger pointers!");

pub use pixel_formats::r8g8b8a8_Srgb;

mod error;
pub use error::*;

mod image;
pub use image::*;

pub mod inflate;

pub mod png;
pub use png::text::TextChunkMap;

pub mod stealth;

pub mod format;

pub mod detect;
pub use detect::{detect_model, DetectionResult, ModelKind};

pub mod nai;

pub mod comfy;

pub mod meta;
pub use meta::{analyze, read_png_meta, Analysis, MetaOptions, PngMeta};
