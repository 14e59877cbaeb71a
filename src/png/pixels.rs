//! Turns PNG image data into an RGBA8 [`Bitmap`].
//!
//! The stealth channel lives in the low bits of the pixels, so those have to
//! come out exactly as stored: no gamma, no color management, no
//! premultiplication. The steps are the usual ones:
//!
//! 1) Read the [`IHDR`] to learn the dimensions and pixel format.
//! 2) Decompress all `IDAT` chunks as one zlib stream into a buffer sized by
//!    [`IHDR::get_zlib_decompression_requirement`].
//! 3) Unfilter each scanline in place.
//! 4) Convert every pixel to RGBA8. 16-bit channels keep their high byte,
//!    sub-byte greyscale is bit replicated, and `tRNS` transparency applies.
//!
//! Interlaced images are rejected with [`PixelError::Interlaced`]. None of the
//! tools that write stealth data produce them.

use bitfrob::u8_replicate_bits;
use pixel_formats::r8g8b8a8_Srgb;

use super::{png_get_header, png_get_idat, png_get_palette, png_get_transparency, PngColorType, IHDR};
use crate::{Bitmap, PixelError};

/// Reverses the filtering of every scanline, in place.
///
/// `data` holds `height` filterlines, each a filter-type byte followed by the
/// line's bytes. The filter bytes are left in place.
pub fn unfilter_in_place(ihdr: &IHDR, data: &mut [u8]) -> Result<(), PixelError> {
  const fn paeth_predict(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
      a
    } else if pb <= pc {
      b
    } else {
      c
    }
  }

  let line_len = ihdr.bytes_per_filterline();
  // filters look back one whole pixel, or one byte for sub-byte formats
  let bpp = (ihdr.bits_per_pixel() / 8).max(1);
  let mut prev: Option<usize> = None;
  for (y, start) in (0..ihdr.height).zip((0_usize..).step_by(line_len)) {
    let Some(end) = start.checked_add(line_len).filter(|&end| end <= data.len()) else {
      break;
    };
    let (before, after) = data.split_at_mut(start);
    let up: &[u8] = match prev {
      Some(p) => &before[p + 1..p + line_len],
      None => &[],
    };
    let (filter, line) = match after[..end - start].split_first_mut() {
      Some(split) => split,
      None => break,
    };
    let up_at = |i: usize| up.get(i).copied().unwrap_or(0);
    match *filter {
      0 => (),
      1 => {
        for i in bpp..line.len() {
          line[i] = line[i].wrapping_add(line[i - bpp]);
        }
      }
      2 => {
        for (i, b) in line.iter_mut().enumerate() {
          *b = b.wrapping_add(up_at(i));
        }
      }
      3 => {
        for i in 0..line.len() {
          let left = if i >= bpp { line[i - bpp] } else { 0 };
          let avg = ((u16::from(left) + u16::from(up_at(i))) / 2) as u8;
          line[i] = line[i].wrapping_add(avg);
        }
      }
      4 => {
        for i in 0..line.len() {
          let (left, up_left) = if i >= bpp { (line[i - bpp], up_at(i - bpp)) } else { (0, 0) };
          line[i] = line[i].wrapping_add(paeth_predict(left, up_at(i), up_left));
        }
      }
      _ => return Err(PixelError::BadFilter(y)),
    }
    prev = Some(start);
  }
  Ok(())
}

/// Reads the `x`th sample of a sub-byte scanline (bit depth 1, 2, or 4).
#[inline]
#[must_use]
fn packed_sample(line: &[u8], x: usize, bit_depth: u8) -> u8 {
  let bit = x * bit_depth as usize;
  let byte = line.get(bit / 8).copied().unwrap_or(0);
  let shift = 8 - bit_depth as usize - (bit % 8);
  (byte >> shift) & ((1_u16 << bit_depth) - 1) as u8
}

/// Decodes PNG bytes into an RGBA8 bitmap.
///
/// ## Failure
/// * [`PixelError::NoHeader`] if there's no usable `IHDR`.
/// * [`PixelError::WidthOrHeightZero`] for empty images.
/// * [`PixelError::TooLarge`] when `width * height` exceeds `max_pixels`.
/// * [`PixelError::Interlaced`] for Adam7 images.
/// * [`PixelError::Inflate`] if no inflate implementation is compiled in.
///
/// Truncated or slightly corrupt image data is *not* an error: whatever
/// decompressed is used, and the rest of the image stays zeroed.
pub fn decode_rgba(bytes: &[u8], max_pixels: u64) -> Result<Bitmap, PixelError> {
  let ihdr = png_get_header(bytes).ok_or(PixelError::NoHeader)?;
  if ihdr.width == 0 || ihdr.height == 0 {
    return Err(PixelError::WidthOrHeightZero);
  }
  let pixel_count = u64::from(ihdr.width) * u64::from(ihdr.height);
  if pixel_count > max_pixels {
    return Err(PixelError::TooLarge(pixel_count));
  }
  if ihdr.is_interlaced {
    return Err(PixelError::Interlaced);
  }

  let mut zlib_buffer = vec![0_u8; ihdr.get_zlib_decompression_requirement()];
  inflate_idat(bytes, &mut zlib_buffer)?;
  unfilter_in_place(&ihdr, &mut zlib_buffer)?;

  let palette = if ihdr.color_type == PngColorType::Index {
    png_get_palette(bytes).unwrap_or_default()
  } else {
    Vec::new()
  };
  let trns = png_get_transparency(bytes);
  let trns_y = trns.and_then(|t| t.try_to_grayscale());
  let trns_rgb = trns.and_then(|t| t.try_to_rgb());
  let trns_alphas: &[u8] = trns.map(|t| t.to_alphas()).unwrap_or(&[]);

  let bit_depth = ihdr.bit_depth;
  let bytes_per_channel = if bit_depth == 16 { 2 } else { 1 };
  let bytes_per_pixel = ihdr.color_type.channel_count() * bytes_per_channel;
  // full-precision sample, for comparing against tRNS
  let full = |data: &[u8], channel: usize| -> u16 {
    let i = channel * bytes_per_channel;
    if bit_depth == 16 {
      u16::from_be_bytes([data[i], data[i + 1]])
    } else {
      u16::from(data[i])
    }
  };

  let mut pixels = Vec::with_capacity(pixel_count as usize);
  for line in zlib_buffer.chunks_exact(ihdr.bytes_per_filterline()) {
    let line = &line[1..];
    for x in 0..ihdr.width as usize {
      let px = if bit_depth < 8 {
        let sample = packed_sample(line, x, bit_depth);
        match ihdr.color_type {
          PngColorType::Index => {
            let mut p = palette.get(sample as usize).copied().unwrap_or_default();
            p.a = trns_alphas.get(sample as usize).copied().unwrap_or(0xFF);
            p
          }
          _ => {
            let y = u8_replicate_bits(u32::from(bit_depth), sample);
            let a = if trns_y == Some(u16::from(sample)) { 0 } else { 0xFF };
            r8g8b8a8_Srgb { r: y, g: y, b: y, a }
          }
        }
      } else {
        let data = &line[x * bytes_per_pixel..(x + 1) * bytes_per_pixel];
        let hi = |channel: usize| data[channel * bytes_per_channel];
        match ihdr.color_type {
          PngColorType::RGBA => r8g8b8a8_Srgb { r: hi(0), g: hi(1), b: hi(2), a: hi(3) },
          PngColorType::RGB => {
            let key = [full(data, 0), full(data, 1), full(data, 2)];
            let a = if trns_rgb == Some(key) { 0 } else { 0xFF };
            r8g8b8a8_Srgb { r: hi(0), g: hi(1), b: hi(2), a }
          }
          PngColorType::YA => r8g8b8a8_Srgb { r: hi(0), g: hi(0), b: hi(0), a: hi(1) },
          PngColorType::Y => {
            let a = if trns_y == Some(full(data, 0)) { 0 } else { 0xFF };
            r8g8b8a8_Srgb { r: hi(0), g: hi(0), b: hi(0), a }
          }
          PngColorType::Index => {
            let i = data[0] as usize;
            let mut p = palette.get(i).copied().unwrap_or_default();
            p.a = trns_alphas.get(i).copied().unwrap_or(0xFF);
            p
          }
        }
      };
      pixels.push(px);
    }
  }
  Ok(Bitmap { width: ihdr.width, height: ihdr.height, pixels })
}

#[cfg(feature = "miniz_oxide")]
fn inflate_idat(bytes: &[u8], out: &mut [u8]) -> Result<(), PixelError> {
  match miniz_oxide::inflate::decompress_slice_iter_to_slice(out, png_get_idat(bytes), true, true) {
    Ok(count) if count < out.len() => {
      tracing::debug!(count, expected = out.len(), "image data ended early, decoding what's there");
    }
    Ok(_) => (),
    Err(status) => {
      // partial results still carry most of the pixels
      tracing::debug!(?status, "image data did not inflate cleanly");
    }
  }
  Ok(())
}

#[cfg(not(feature = "miniz_oxide"))]
fn inflate_idat(_bytes: &[u8], _out: &mut [u8]) -> Result<(), PixelError> {
  tracing::warn!("image data can't be decoded without an inflate implementation");
  Err(PixelError::Inflate(crate::InflateError::Unavailable))
}
