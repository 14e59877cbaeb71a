#![forbid(unsafe_code)]

//! Decompression of text chunks and stealth payloads.
//!
//! PNG `zTXt` and `iTXt` chunks hold zlib streams, while compressed stealth
//! payloads are usually gzip streams. [`inflate`] sniffs which wrapper is
//! present (gzip, zlib, or none at all) and decompresses accordingly.
//!
//! The actual decompressor is `miniz_oxide`, behind the crate feature of the
//! same name. Without that feature every call returns
//! [`InflateError::Unavailable`] and callers skip whatever they were trying to
//! decode.

use crate::InflateError;

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
const GZIP_DEFLATE: u8 = 8;

const FHCRC: u8 = 1 << 1;
const FEXTRA: u8 = 1 << 2;
const FNAME: u8 = 1 << 3;
const FCOMMENT: u8 = 1 << 4;

/// The wrapper format around a deflate stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamWrapper {
  /// RFC 1952
  Gzip,
  /// RFC 1950
  Zlib,
  /// A bare RFC 1951 deflate stream.
  Raw,
}

/// Guesses the wrapper format from the first bytes of the stream.
#[inline]
#[must_use]
pub fn sniff_wrapper(bytes: &[u8]) -> StreamWrapper {
  match bytes {
    [0x1F, 0x8B, ..] => StreamWrapper::Gzip,
    [cmf, flg, ..] if cmf & 0x0F == 8 && (u16::from(*cmf) << 8 | u16::from(*flg)) % 31 == 0 => {
      StreamWrapper::Zlib
    }
    _ => StreamWrapper::Raw,
  }
}

/// Decompresses `bytes`, producing at most `limit` bytes of output.
///
/// An empty result is `Ok(vec![])`; every failure is an `Err`.
pub fn inflate(bytes: &[u8], limit: usize) -> Result<Vec<u8>, InflateError> {
  match sniff_wrapper(bytes) {
    StreamWrapper::Gzip => {
      let body = gzip_body(bytes)?;
      inflate_raw(body, limit)
    }
    StreamWrapper::Zlib => inflate_zlib(bytes, limit),
    StreamWrapper::Raw => inflate_raw(bytes, limit),
  }
}

/// Skips over a gzip member header, giving the deflate data that follows.
///
/// The trailing CRC32 and size fields are left in place; the deflate decoder
/// stops at the end of the final block and never looks at them.
fn gzip_body(bytes: &[u8]) -> Result<&[u8], InflateError> {
  let (head, mut rest) = match bytes {
    [m0, m1, cm, flg, _, _, _, _, _xfl, _os, rest @ ..] => {
      if [*m0, *m1] != GZIP_MAGIC || *cm != GZIP_DEFLATE {
        return Err(InflateError::BadGzipHeader);
      }
      (*flg, rest)
    }
    _ => return Err(InflateError::BadGzipHeader),
  };
  if head & FEXTRA != 0 {
    let xlen = match rest {
      [lo, hi, tail @ ..] => {
        rest = tail;
        usize::from(u16::from_le_bytes([*lo, *hi]))
      }
      _ => return Err(InflateError::BadGzipHeader),
    };
    rest = rest.get(xlen..).ok_or(InflateError::BadGzipHeader)?;
  }
  for flag in [FNAME, FCOMMENT] {
    if head & flag != 0 {
      let nul = rest.iter().position(|&b| b == 0).ok_or(InflateError::BadGzipHeader)?;
      rest = &rest[nul + 1..];
    }
  }
  if head & FHCRC != 0 {
    rest = rest.get(2..).ok_or(InflateError::BadGzipHeader)?;
  }
  Ok(rest)
}

#[cfg(feature = "miniz_oxide")]
fn inflate_zlib(bytes: &[u8], limit: usize) -> Result<Vec<u8>, InflateError> {
  miniz_oxide::inflate::decompress_to_vec_zlib_with_limit(bytes, limit)
    .map_err(|e| status_to_error(e.status, limit))
}

#[cfg(feature = "miniz_oxide")]
fn inflate_raw(bytes: &[u8], limit: usize) -> Result<Vec<u8>, InflateError> {
  miniz_oxide::inflate::decompress_to_vec_with_limit(bytes, limit)
    .map_err(|e| status_to_error(e.status, limit))
}

#[cfg(feature = "miniz_oxide")]
fn status_to_error(status: miniz_oxide::inflate::TINFLStatus, limit: usize) -> InflateError {
  match status {
    miniz_oxide::inflate::TINFLStatus::HasMoreOutput => InflateError::TooLarge(limit),
    _ => InflateError::Corrupt,
  }
}

#[cfg(not(feature = "miniz_oxide"))]
fn inflate_zlib(_bytes: &[u8], _limit: usize) -> Result<Vec<u8>, InflateError> {
  tracing::warn!("zlib data found but the crate was built without an inflate implementation");
  Err(InflateError::Unavailable)
}

#[cfg(not(feature = "miniz_oxide"))]
fn inflate_raw(_bytes: &[u8], _limit: usize) -> Result<Vec<u8>, InflateError> {
  tracing::warn!("deflate data found but the crate was built without an inflate implementation");
  Err(InflateError::Unavailable)
}
