#![forbid(unsafe_code)]

//! The "stealth" channel: metadata hidden in the least significant bits of
//! the pixels.
//!
//! The data survives tools that strip text chunks, which is why NovelAI
//! writes a copy of its parameters there. There are two layouts:
//!
//! * **Alpha**: one bit per pixel, the low bit of the alpha channel.
//! * **RGB**: three bits per pixel, the low bits of red, green, then blue.
//!
//! Pixels are visited column by column (all of `x = 0` top to bottom, then
//! `x = 1`, ...). Using any other order silently produces garbage.
//!
//! Within a plane the bits form a single stream:
//!
//! ```text
//! | signature: 15 bytes | length: u32 BE, in bits | payload: `length` bits |
//! ```
//!
//! The signature says which plane is in use and whether the payload is
//! compressed. For the RGB plane bits arrive three at a time, so the stream
//! fields don't line up with pixel boundaries: whatever spills past the
//! length field is the start of the payload, and the payload is trimmed to
//! exactly `length` bits at the end.

use pixel_formats::r8g8b8a8_Srgb;
use serde::Serialize;

use crate::{inflate::inflate, Bitmap};

pub const SIG_ALPHA: &str = "stealth_pnginfo";
pub const SIG_ALPHA_COMP: &str = "stealth_pngcomp";
pub const SIG_RGB: &str = "stealth_rgbinfo";
pub const SIG_RGB_COMP: &str = "stealth_rgbcomp";

/// Every signature is this many bits long.
const SIG_BITS: usize = SIG_ALPHA.len() * 8;
const LENGTH_BITS: usize = 32;

/// Which pixel bits carry the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StealthMode {
  Alpha,
  Rgb,
}
impl StealthMode {
  /// The signature for this mode, compressed or not.
  #[inline]
  #[must_use]
  pub const fn signature(self, compressed: bool) -> &'static str {
    match (self, compressed) {
      (Self::Alpha, false) => SIG_ALPHA,
      (Self::Alpha, true) => SIG_ALPHA_COMP,
      (Self::Rgb, false) => SIG_RGB,
      (Self::Rgb, true) => SIG_RGB_COMP,
    }
  }

  /// If `decoded` is one of this mode's signatures, is it the compressed one?
  #[inline]
  #[must_use]
  fn match_signature(self, decoded: &str) -> Option<bool> {
    [false, true].into_iter().find(|&c| self.signature(c) == decoded)
  }
}

/// The raw payload bits recovered from an image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StealthBits {
  pub mode: StealthMode,
  pub compressed: bool,
  /// Payload bits in stream order.
  pub bits: Vec<bool>,
}

/// Where the extractor is in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
  /// Both planes are collecting bits until one of them shows a signature.
  ConfirmingSignature,
  ReadingLength { mode: StealthMode, compressed: bool },
  ReadingPayload { mode: StealthMode, compressed: bool, len: usize },
  /// `None` means there was no stealth data.
  Done(Option<StealthBits>),
}

/// The stealth state machine. Feed it pixels in column-major order.
#[derive(Debug, Clone)]
pub struct StealthExtractor {
  phase: Phase,
  alpha: Vec<bool>,
  rgb: Vec<bool>,
}
impl Default for StealthExtractor {
  #[inline]
  fn default() -> Self {
    Self::new()
  }
}
impl StealthExtractor {
  #[inline]
  #[must_use]
  pub const fn new() -> Self {
    Self { phase: Phase::ConfirmingSignature, alpha: Vec::new(), rgb: Vec::new() }
  }

  /// If the extractor has stopped accepting pixels.
  #[inline]
  #[must_use]
  pub const fn is_done(&self) -> bool {
    matches!(self.phase, Phase::Done(_))
  }

  /// Advances the machine by one pixel.
  ///
  /// Returns `true` once the machine is done and further pixels are ignored.
  pub fn push_pixel(&mut self, px: r8g8b8a8_Srgb) -> bool {
    let alpha_bit = px.a & 1 == 1;
    let rgb_bits = [px.r & 1 == 1, px.g & 1 == 1, px.b & 1 == 1];
    self.phase = match core::mem::replace(&mut self.phase, Phase::Done(None)) {
      Phase::ConfirmingSignature => {
        self.alpha.push(alpha_bit);
        self.rgb.extend_from_slice(&rgb_bits);
        self.confirm_signature()
      }
      Phase::ReadingLength { mode, compressed } => {
        let buf = self.plane_mut(mode);
        match mode {
          StealthMode::Alpha => buf.push(alpha_bit),
          StealthMode::Rgb => buf.extend_from_slice(&rgb_bits),
        }
        if buf.len() >= LENGTH_BITS {
          // bits past the length field already belong to the payload
          let payload_start = buf.split_off(LENGTH_BITS);
          let len = bits_to_u32(buf.as_slice()) as usize;
          *buf = payload_start;
          Self::check_payload(mode, compressed, len, buf)
        } else {
          Phase::ReadingLength { mode, compressed }
        }
      }
      Phase::ReadingPayload { mode, compressed, len } => {
        let buf = self.plane_mut(mode);
        match mode {
          StealthMode::Alpha => buf.push(alpha_bit),
          StealthMode::Rgb => buf.extend_from_slice(&rgb_bits),
        }
        Self::check_payload(mode, compressed, len, buf)
      }
      done @ Phase::Done(_) => done,
    };
    self.is_done()
  }

  /// Ends the scan, giving the payload if one was completely read.
  #[must_use]
  pub fn finish(self) -> Option<StealthBits> {
    match self.phase {
      Phase::Done(found) => found,
      Phase::ReadingLength { .. } | Phase::ReadingPayload { .. } => {
        tracing::debug!("stealth signature found but the image ended before the payload did");
        None
      }
      Phase::ConfirmingSignature => None,
    }
  }

  #[inline]
  fn plane_mut(&mut self, mode: StealthMode) -> &mut Vec<bool> {
    match mode {
      StealthMode::Alpha => &mut self.alpha,
      StealthMode::Rgb => &mut self.rgb,
    }
  }

  fn confirm_signature(&mut self) -> Phase {
    if self.alpha.len() == SIG_BITS {
      match StealthMode::Alpha.match_signature(&bits_to_signature(&self.alpha)) {
        Some(compressed) => {
          self.alpha.clear();
          self.rgb.clear();
          return Phase::ReadingLength { mode: StealthMode::Alpha, compressed };
        }
        // the RGB plane got its full signature long before this, and failed
        None => return Phase::Done(None),
      }
    }
    if self.rgb.len() == SIG_BITS {
      if let Some(compressed) = StealthMode::Rgb.match_signature(&bits_to_signature(&self.rgb)) {
        self.alpha.clear();
        self.rgb.clear();
        return Phase::ReadingLength { mode: StealthMode::Rgb, compressed };
      }
    }
    if self.alpha.len() > SIG_BITS && self.rgb.len() > SIG_BITS {
      return Phase::Done(None);
    }
    Phase::ConfirmingSignature
  }

  fn check_payload(mode: StealthMode, compressed: bool, len: usize, buf: &mut Vec<bool>) -> Phase {
    if len == 0 {
      return Phase::Done(None);
    }
    if buf.len() >= len {
      buf.truncate(len);
      Phase::Done(Some(StealthBits { mode, compressed, bits: core::mem::take(buf) }))
    } else {
      Phase::ReadingPayload { mode, compressed, len }
    }
  }
}

/// Reads bits MSB-first into a `u32`. Only the last 32 bits count.
#[inline]
#[must_use]
fn bits_to_u32(bits: &[bool]) -> u32 {
  bits.iter().fold(0_u32, |acc, &b| (acc << 1) | u32::from(b))
}

/// Packs bits MSB-first into bytes. Trailing bits that don't make a full
/// byte are dropped.
#[must_use]
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
  bits.chunks_exact(8).map(|byte| byte.iter().fold(0_u8, |acc, &b| (acc << 1) | u8::from(b))).collect()
}

/// The signature bits as text: lossy UTF-8 with NUL characters removed.
fn bits_to_signature(bits: &[bool]) -> String {
  String::from_utf8_lossy(&pack_bits(bits)).replace('\0', "")
}

/// Scans the bitmap for a stealth payload.
///
/// Returns `None` when there's no signature, or when the image runs out of
/// pixels before the declared payload length is reached.
#[must_use]
pub fn extract_stealth_bits(bitmap: &Bitmap) -> Option<StealthBits> {
  let mut machine = StealthExtractor::new();
  for px in bitmap.iter_column_major() {
    if machine.push_pixel(px) {
      break;
    }
  }
  machine.finish()
}

/// Turns payload bits into text.
///
/// Compressed payloads are inflated first. Any failure (no inflate support,
/// a corrupt stream, invalid UTF-8) gives `None`.
#[must_use]
pub fn decode_stealth_payload(bits: &StealthBits, max_inflate_bytes: usize) -> Option<String> {
  let bytes = pack_bits(&bits.bits);
  let bytes = if bits.compressed {
    match inflate(&bytes, max_inflate_bytes) {
      Ok(inflated) => inflated,
      Err(e) => {
        tracing::warn!(error = %e, "compressed stealth payload could not be inflated");
        return None;
      }
    }
  } else {
    bytes
  };
  String::from_utf8(bytes).map_err(|_| tracing::debug!("stealth payload is not UTF-8")).ok()
}

/// A decoded stealth payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StealthPayload {
  pub mode: StealthMode,
  pub compressed: bool,
  pub text: String,
  /// The text parsed as JSON, when it is JSON.
  pub json: Option<serde_json::Value>,
}

/// Extracts, decodes, and JSON-parses the stealth payload in one go.
#[must_use]
pub fn read_stealth(bitmap: &Bitmap, max_inflate_bytes: usize) -> Option<StealthPayload> {
  let Some(bits) = extract_stealth_bits(bitmap) else {
    tracing::debug!("no stealth signature");
    return None;
  };
  let text = decode_stealth_payload(&bits, max_inflate_bytes)?;
  let json = crate::format::parse_json_lenient(&text);
  Some(StealthPayload { mode: bits.mode, compressed: bits.compressed, text, json })
}
