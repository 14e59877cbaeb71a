#![forbid(unsafe_code)]

//! Provides the heap-allocated RGBA image that the stealth reader scans.

use pixel_formats::r8g8b8a8_Srgb;

/// Converts an `(x,y)` position within a given `width` 2D space into a linear
/// index.
#[inline]
#[must_use]
pub const fn xy_width_to_index(x: u32, y: u32, width: u32) -> usize {
  (y as usize) * (width as usize) + (x as usize)
}

/// A direct-color image, row-major, origin at the top left.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct Bitmap<P = r8g8b8a8_Srgb> {
  pub width: u32,
  pub height: u32,
  pub pixels: Vec<P>,
}
impl<P> Bitmap<P> {
  /// Gets the pixel at the position, or `None` if the position is out of
  /// bounds.
  #[inline]
  #[must_use]
  pub fn get(&self, x: u32, y: u32) -> Option<&P> {
    if x < self.width && y < self.height {
      self.pixels.get(xy_width_to_index(x, y, self.width))
    } else {
      None
    }
  }

  /// Gets the pixel at the position, or `None` if the position is out of
  /// bounds.
  #[inline]
  #[must_use]
  pub fn get_mut(&mut self, x: u32, y: u32) -> Option<&mut P> {
    if x < self.width && y < self.height {
      self.pixels.get_mut(xy_width_to_index(x, y, self.width))
    } else {
      None
    }
  }
}
impl Bitmap<r8g8b8a8_Srgb> {
  /// Wraps a tightly packed RGBA8 byte buffer, such as a canvas readback.
  ///
  /// Gives `None` if the buffer isn't exactly `width * height * 4` bytes.
  #[must_use]
  pub fn from_rgba_bytes(width: u32, height: u32, bytes: &[u8]) -> Option<Self> {
    let quads: &[[u8; 4]] = bytemuck::try_cast_slice(bytes).ok()?;
    if quads.len() != (width as usize).checked_mul(height as usize)? {
      return None;
    }
    let pixels = quads.iter().map(|&[r, g, b, a]| r8g8b8a8_Srgb { r, g, b, a }).collect();
    Some(Self { width, height, pixels })
  }

  /// Iterates the pixels column by column: all of `x = 0` from top to
  /// bottom, then all of `x = 1`, and so on.
  pub fn iter_column_major(&self) -> impl Iterator<Item = r8g8b8a8_Srgb> + '_ {
    (0..self.width)
      .flat_map(move |x| (0..self.height).map(move |y| (x, y)))
      .filter_map(move |(x, y)| self.get(x, y).copied())
  }
}
