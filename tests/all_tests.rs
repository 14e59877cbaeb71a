#![allow(bad_style)]
#![allow(dead_code)]

use pnginfo::{r8g8b8a8_Srgb, Bitmap};

mod meta;
mod png;
mod stealth;

fn rand_bytes(count: usize) -> Vec<u8> {
  let mut buffer = vec![0; count];
  getrandom::getrandom(&mut buffer).unwrap();
  buffer
}

const PNG_SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

/// One chunk, with a zero CRC (nothing checks it).
fn png_chunk(type_: &[u8; 4], data: &[u8]) -> Vec<u8> {
  let mut out = Vec::with_capacity(12 + data.len());
  out.extend_from_slice(&(data.len() as u32).to_be_bytes());
  out.extend_from_slice(type_);
  out.extend_from_slice(data);
  out.extend_from_slice(&[0; 4]);
  out
}

fn ihdr(width: u32, height: u32, bit_depth: u8, color_type: u8, interlaced: bool) -> Vec<u8> {
  let mut data = Vec::with_capacity(13);
  data.extend_from_slice(&width.to_be_bytes());
  data.extend_from_slice(&height.to_be_bytes());
  data.extend_from_slice(&[bit_depth, color_type, 0, 0, u8::from(interlaced)]);
  data
}

/// A PNG from a header, already filtered scanlines, and any extra chunks
/// (which go before the image data).
#[cfg(feature = "miniz_oxide")]
fn build_png(ihdr_data: &[u8], filtered: &[u8], extra: &[Vec<u8>]) -> Vec<u8> {
  let mut out = PNG_SIGNATURE.to_vec();
  out.extend_from_slice(&png_chunk(b"IHDR", ihdr_data));
  for chunk in extra {
    out.extend_from_slice(chunk);
  }
  let z = miniz_oxide::deflate::compress_to_vec_zlib(filtered, 6);
  // split the stream to make sure multiple IDAT chunks are joined
  let (a, b) = z.split_at(z.len() / 2);
  out.extend_from_slice(&png_chunk(b"IDAT", a));
  out.extend_from_slice(&png_chunk(b"IDAT", b));
  out.extend_from_slice(&png_chunk(b"IEND", &[]));
  out
}

/// An RGBA8 PNG of the bitmap, every line using filter 0.
#[cfg(feature = "miniz_oxide")]
fn rgba_png(bitmap: &Bitmap, extra: &[Vec<u8>]) -> Vec<u8> {
  let mut filtered = Vec::new();
  for line in bitmap.pixels.chunks(bitmap.width as usize) {
    filtered.push(0);
    for p in line {
      filtered.extend_from_slice(&[p.r, p.g, p.b, p.a]);
    }
  }
  build_png(&ihdr(bitmap.width, bitmap.height, 8, 6, false), &filtered, extra)
}

/// A gzip member around the data, the way stealth writers compress.
#[cfg(feature = "miniz_oxide")]
fn gzip(data: &[u8]) -> Vec<u8> {
  let mut out = vec![0x1F, 0x8B, 8, 0, 0, 0, 0, 0, 0, 255];
  out.extend_from_slice(&miniz_oxide::deflate::compress_to_vec(data, 6));
  // CRC32 and size aren't checked by the reader
  out.extend_from_slice(&[0; 4]);
  out.extend_from_slice(&(data.len() as u32).to_le_bytes());
  out
}

fn bytes_to_bits(bytes: &[u8]) -> Vec<bool> {
  bytes.iter().flat_map(|&b| (0..8).rev().map(move |i| (b >> i) & 1 == 1)).collect()
}

/// Signature, then the payload length in bits, then the payload.
fn stealth_stream(signature: &str, payload: &[bool]) -> Vec<bool> {
  let mut bits = bytes_to_bits(signature.as_bytes());
  bits.extend(bytes_to_bits(&(payload.len() as u32).to_be_bytes()));
  bits.extend_from_slice(payload);
  bits
}

/// A flat bitmap whose low bits are all zero except for alpha.
fn plain_bitmap(width: u32, height: u32) -> Bitmap {
  let px = r8g8b8a8_Srgb { r: 200, g: 100, b: 50, a: 255 };
  Bitmap { width, height, pixels: vec![px; (width * height) as usize] }
}

fn column_major_mut(bitmap: &mut Bitmap, i: usize) -> Option<&mut r8g8b8a8_Srgb> {
  let h = bitmap.height as usize;
  bitmap.get_mut((i / h) as u32, (i % h) as u32)
}

fn embed_alpha(bitmap: &mut Bitmap, bits: &[bool]) {
  for (i, &bit) in bits.iter().enumerate() {
    let px = column_major_mut(bitmap, i).unwrap();
    px.a = (px.a & !1) | u8::from(bit);
  }
}

fn embed_rgb(bitmap: &mut Bitmap, bits: &[bool]) {
  for (i, triple) in bits.chunks(3).enumerate() {
    let px = column_major_mut(bitmap, i).unwrap();
    let bit = |n: usize| u8::from(triple.get(n).copied().unwrap_or(false));
    px.r = (px.r & !1) | bit(0);
    px.g = (px.g & !1) | bit(1);
    px.b = (px.b & !1) | bit(2);
  }
}
