//! Error types.
//!
//! Nothing in the metadata pipeline itself fails: missing or broken metadata
//! is the common case and is reported as `None` or an empty map. These types
//! only show up at the collaborator edges, where a caller might actually want
//! to know *why* something didn't work.

/// Failure to inflate a compressed text chunk or stealth payload.
///
/// This is kept separate from "inflated to zero bytes", which is a success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InflateError {
  /// The crate was built without the `miniz_oxide` feature.
  #[error("no inflate implementation is available")]
  Unavailable,

  /// The deflate stream is malformed or truncated.
  #[error("the compressed stream is corrupt")]
  Corrupt,

  /// The output would exceed the configured limit.
  #[error("the decompressed data exceeds {0} bytes")]
  TooLarge(usize),

  /// The data starts with the gzip magic but the header is broken.
  #[error("the gzip header is malformed")]
  BadGzipHeader,
}

/// Failure to turn PNG bytes into an RGBA8 bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PixelError {
  /// No valid `IHDR` was found.
  #[error("no image header was found")]
  NoHeader,

  /// The declared width and/or height of this image is 0.
  #[error("the image width or height is zero")]
  WidthOrHeightZero,

  /// The image has more pixels than the configured limit.
  #[error("the image has {0} pixels, over the configured limit")]
  TooLarge(u64),

  /// Adam7 interlaced images aren't decoded.
  #[error("interlaced images are not supported")]
  Interlaced,

  /// The image data stream couldn't be decompressed.
  #[error("the image data could not be inflated: {0}")]
  Inflate(#[from] InflateError),

  /// A scanline used a filter type outside of 0 through 4.
  #[error("scanline {0} has an unknown filter type")]
  BadFilter(u32),
}

/// Failure in one of the file helpers (loading options, schemas, or saving
/// exported JSON).
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
  /// Reading or writing a file failed.
  #[error(transparent)]
  Io(#[from] std::io::Error),

  /// The file wasn't the JSON we expected.
  #[error(transparent)]
  Json(#[from] serde_json::Error),
}
