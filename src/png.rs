#![forbid(unsafe_code)]

//! Module for walking PNG data.
//!
//! * [Portable Network Graphics Specification (Third Edition)][png-spec]
//!
//! [png-spec]: https://www.w3.org/TR/png/
//!
//! A PNG is an 8 byte signature followed by a series of "chunks". Each chunk
//! is a big-endian length, a four character type tag, that many bytes of
//! data, and a CRC32 of the type and data.
//!
//! This module only ever *reads* PNG data, and it reads it for metadata, so
//! the parsing is very forgiving:
//!
//! * When the first 8 bytes of the data aren't the PNG signature, you get no
//!   chunks at all. That's "not a PNG" rather than an error.
//! * A chunk that declares more data than the buffer holds ends the
//!   iteration. Everything before it is still usable.
//! * CRC values are carried along but never checked. We care about
//!   recovering text, not about proving the file is intact.
//! * Chunk ordering rules and duplicate chunk rules are ignored.
//!
//! Text chunk decoding lives in [`text`], and turning the image data into
//! pixels lives in [`pixels`].

use core::fmt::{Debug, Write};

use pixel_formats::r8g8b8a8_Srgb;

pub mod pixels;
pub mod text;

pub use pixels::*;
pub use text::*;


/// The 8 bytes that every PNG starts with.
pub const PNG_SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

/// A chunk's four character type tag.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PngRawChunkType(pub [u8; 4]);
#[allow(nonstandard_style)]
impl PngRawChunkType {
  pub const IHDR: Self = Self(*b"IHDR");
  pub const PLTE: Self = Self(*b"PLTE");
  pub const IDAT: Self = Self(*b"IDAT");
  pub const IEND: Self = Self(*b"IEND");
  pub const tRNS: Self = Self(*b"tRNS");
  pub const tEXt: Self = Self(*b"tEXt");
  pub const zTXt: Self = Self(*b"zTXt");
  pub const iTXt: Self = Self(*b"iTXt");

  /// The tag as text, or `"????"` if the bytes aren't UTF-8.
  #[inline]
  #[must_use]
  pub fn as_str(&self) -> &str {
    core::str::from_utf8(&self.0).unwrap_or("????")
  }

  /// Ancillary chunks have a lowercase first letter.
  #[inline]
  #[must_use]
  pub const fn is_ancillary(&self) -> bool {
    self.0[0] & 0x20 != 0
  }
}
impl Debug for PngRawChunkType {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.write_char(self.0[0] as char)?;
    f.write_char(self.0[1] as char)?;
    f.write_char(self.0[2] as char)?;
    f.write_char(self.0[3] as char)?;
    Ok(())
  }
}

/// An unparsed chunk from a PNG.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PngRawChunk<'b> {
  type_: PngRawChunkType,
  data: &'b [u8],
  declared_crc: Option<u32>,
}
impl<'b> PngRawChunk<'b> {
  #[inline]
  #[must_use]
  pub const fn type_(&self) -> PngRawChunkType {
    self.type_
  }
  #[inline]
  #[must_use]
  pub const fn data(&self) -> &'b [u8] {
    self.data
  }
  /// The CRC written in the file, `None` when the buffer ends right after the
  /// chunk's data.
  #[inline]
  #[must_use]
  pub const fn declared_crc(&self) -> Option<u32> {
    self.declared_crc
  }
}
impl Debug for PngRawChunk<'_> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("PngRawChunk")
      .field("type_", &self.type_)
      .field("data", &(&self.data[..self.data.len().min(12)], self.data.len()))
      .field("declared_crc", &self.declared_crc)
      .finish()
  }
}

/// An iterator that produces successive raw chunks from PNG bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PngRawChunkIter<'b>(&'b [u8]);
impl<'b> PngRawChunkIter<'b> {
  /// Pass the full PNG bytes.
  ///
  /// If they don't start with the PNG signature the iterator is empty.
  #[inline]
  pub const fn new(bytes: &'b [u8]) -> Self {
    match bytes {
      [137, 80, 78, 71, 13, 10, 26, 10, rest @ ..] => Self(rest),
      _ => Self(&[]),
    }
  }
}
impl<'b> Iterator for PngRawChunkIter<'b> {
  type Item = PngRawChunk<'b>;
  fn next(&mut self) -> Option<Self::Item> {
    let (len_bytes, type_bytes, rest) = match self.0 {
      [l0, l1, l2, l3, t0, t1, t2, t3, rest @ ..] => ([*l0, *l1, *l2, *l3], [*t0, *t1, *t2, *t3], rest),
      _ => {
        self.0 = &[];
        return None;
      }
    };
    let chunk_len = u32::from_be_bytes(len_bytes) as usize;
    if rest.len() < chunk_len {
      self.0 = &[];
      return None;
    }
    let (data, rest) = rest.split_at(chunk_len);
    let declared_crc = match rest {
      [c0, c1, c2, c3, tail @ ..] => {
        self.0 = tail;
        Some(u32::from_be_bytes([*c0, *c1, *c2, *c3]))
      }
      _ => {
        self.0 = &[];
        None
      }
    };
    Some(PngRawChunk { type_: PngRawChunkType(type_bytes), data, declared_crc })
  }
}

/// Checks if the PNG's initial 8 bytes are correct.
#[inline]
#[must_use]
pub const fn is_png_header_correct(bytes: &[u8]) -> bool {
  matches!(bytes, [137, 80, 78, 71, 13, 10, 26, 10, ..])
}

/// Collects every chunk of the PNG into a `Vec`.
///
/// Non-PNG input gives an empty `Vec`.
#[must_use]
pub fn parse_chunks(bytes: &[u8]) -> Vec<PngRawChunk<'_>> {
  PngRawChunkIter::new(bytes).collect()
}

/// The types of color that PNG supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum PngColorType {
  /// Greyscale
  Y = 0,
  /// Red, Green, Blue
  RGB = 2,
  /// Index into a palette.
  Index = 3,
  /// Greyscale + Alpha
  YA = 4,
  /// Red, Green, Blue, Alpha
  RGBA = 6,
}
impl PngColorType {
  /// The number of channels in this type of color.
  #[inline]
  #[must_use]
  pub const fn channel_count(self) -> usize {
    match self {
      Self::Y => 1,
      Self::RGB => 3,
      Self::Index => 1,
      Self::YA => 2,
      Self::RGBA => 4,
    }
  }
}
impl TryFrom<u8> for PngColorType {
  type Error = ();
  #[inline]
  fn try_from(value: u8) -> Result<Self, Self::Error> {
    Ok(match value {
      0 => PngColorType::Y,
      2 => PngColorType::RGB,
      3 => PngColorType::Index,
      4 => PngColorType::YA,
      6 => PngColorType::RGBA,
      _ => return Err(()),
    })
  }
}

/// Image Header
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IHDR {
  /// width in pixels
  pub width: u32,
  /// height in pixels
  pub height: u32,
  /// bits per channel
  pub bit_depth: u8,
  /// pixel color type
  pub color_type: PngColorType,
  /// if the image data is stored interlaced.
  pub is_interlaced: bool,
}
impl IHDR {
  /// Bits used by one pixel of the stored data.
  #[inline]
  #[must_use]
  pub const fn bits_per_pixel(&self) -> usize {
    (self.bit_depth as usize) * self.color_type.channel_count()
  }

  /// Bytes in one filtered scanline, including the leading filter byte.
  #[inline]
  #[must_use]
  pub const fn bytes_per_filterline(&self) -> usize {
    1 + ((self.bits_per_pixel() * (self.width as usize)) + 7) / 8
  }

  /// Size of the buffer that the decompressed (still filtered) image data
  /// needs, for a non-interlaced image.
  #[inline]
  #[must_use]
  pub fn get_zlib_decompression_requirement(&self) -> usize {
    self.bytes_per_filterline().saturating_mul(self.height as usize)
  }
}
impl TryFrom<&[u8]> for IHDR {
  type Error = ();
  fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
    match value {
      [w0, w1, w2, w3, h0, h1, h2, h3, bit_depth, color_type, _compression, _filter, interlace_method] => {
        Ok(Self {
          width: u32::from_be_bytes([*w0, *w1, *w2, *w3]),
          height: u32::from_be_bytes([*h0, *h1, *h2, *h3]),
          bit_depth: match *color_type {
            0 if [1, 2, 4, 8, 16].contains(bit_depth) => *bit_depth,
            3 if [1, 2, 4, 8].contains(bit_depth) => *bit_depth,
            2 | 4 | 6 if [8, 16].contains(bit_depth) => *bit_depth,
            _ => return Err(()),
          },
          color_type: PngColorType::try_from(*color_type)?,
          is_interlaced: match interlace_method {
            0 => false,
            1 => true,
            _ => return Err(()),
          },
        })
      }
      _ => Err(()),
    }
  }
}

/// Transparency data
///
/// What the bytes mean depends on the image's color type, so this just
/// offers each interpretation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(nonstandard_style)]
pub struct tRNS<'b>(&'b [u8]);
impl Debug for tRNS<'_> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_tuple("tRNS").field(&self.0.len()).finish()
  }
}
impl<'b> tRNS<'b> {
  /// The transparent grey sample, for greyscale images.
  #[inline]
  #[must_use]
  pub const fn try_to_grayscale(&self) -> Option<u16> {
    match self.0 {
      [y0, y1] => Some(u16::from_be_bytes([*y0, *y1])),
      _ => None,
    }
  }
  /// The transparent color, for RGB images.
  #[inline]
  #[must_use]
  pub const fn try_to_rgb(&self) -> Option<[u16; 3]> {
    match self.0 {
      [r0, r1, g0, g1, b0, b1] => Some([
        u16::from_be_bytes([*r0, *r1]),
        u16::from_be_bytes([*g0, *g1]),
        u16::from_be_bytes([*b0, *b1]),
      ]),
      _ => None,
    }
  }
  /// Alpha values per palette entry, for indexed images.
  #[inline]
  #[must_use]
  pub const fn to_alphas(&self) -> &'b [u8] {
    self.0
  }
}

/// Gets the [IHDR] out of the PNG bytes.
#[must_use]
pub fn png_get_header(bytes: &[u8]) -> Option<IHDR> {
  PngRawChunkIter::new(bytes)
    .filter(|raw| raw.type_ == PngRawChunkType::IHDR)
    .find_map(|raw| IHDR::try_from(raw.data).ok())
}

/// Gets the transparency chunk for the PNG bytes, if any.
#[must_use]
pub fn png_get_transparency(bytes: &[u8]) -> Option<tRNS<'_>> {
  PngRawChunkIter::new(bytes).find(|raw| raw.type_ == PngRawChunkType::tRNS).map(|raw| tRNS(raw.data))
}

/// Gets the palette out of the PNG bytes, as opaque RGBA colors.
///
/// A palette that isn't a whole number of `[r, g, b]` entries is ignored.
#[must_use]
pub fn png_get_palette(bytes: &[u8]) -> Option<Vec<r8g8b8a8_Srgb>> {
  let raw = PngRawChunkIter::new(bytes).find(|raw| raw.type_ == PngRawChunkType::PLTE)?;
  let entries: &[[u8; 3]] = bytemuck::try_cast_slice(raw.data).ok()?;
  Some(entries.iter().map(|&[r, g, b]| r8g8b8a8_Srgb { r, g, b, a: 0xFF }).collect())
}

/// Gets an iterator over all the `IDAT` slices in the PNG bytes.
pub fn png_get_idat(bytes: &[u8]) -> impl Iterator<Item = &[u8]> {
  PngRawChunkIter::new(bytes).filter(|raw| raw.type_ == PngRawChunkType::IDAT).map(|raw| raw.data)
}
