use pnginfo::{
  png::{decode_rgba, png_get_header, png_get_text, PngRawChunkIter},
  Bitmap, PixelError,
};

use super::{ihdr, png_chunk, PNG_SIGNATURE};

fn rgba_tuples(bitmap: &Bitmap) -> Vec<(u8, u8, u8, u8)> {
  bitmap.pixels.iter().map(|p| (p.r, p.g, p.b, p.a)).collect()
}

#[test]
fn test_PngRawChunkIter_no_panics() {
  // even totally random data should never panic the iterator!
  for _ in 0..10 {
    let v = super::rand_bytes(1024);
    for _ in PngRawChunkIter::new(&v) {
      //
    }
    let mut with_sig = PNG_SIGNATURE.to_vec();
    with_sig.extend_from_slice(&v);
    for _ in PngRawChunkIter::new(&with_sig) {
      //
    }
    let _ = png_get_text(&with_sig, 1 << 16);
    let _ = decode_rgba(&with_sig, 1 << 16);
  }
}

#[test]
fn test_decode_rgba_no_panics_on_random_image_data() {
  for color_type in [0, 2, 3, 4, 6] {
    let mut png = PNG_SIGNATURE.to_vec();
    png.extend_from_slice(&png_chunk(b"IHDR", &ihdr(7, 5, 8, color_type, false)));
    png.extend_from_slice(&png_chunk(b"IDAT", &super::rand_bytes(64)));
    let _ = decode_rgba(&png, 1 << 16);
  }
}

#[test]
fn test_decode_rgba_rejections() {
  let header_only = |data: Vec<u8>| {
    let mut png = PNG_SIGNATURE.to_vec();
    png.extend_from_slice(&png_chunk(b"IHDR", &data));
    png
  };
  assert_eq!(decode_rgba(b"not a png", 100), Err(PixelError::NoHeader));
  assert_eq!(decode_rgba(&header_only(ihdr(0, 5, 8, 6, false)), 100), Err(PixelError::WidthOrHeightZero));
  assert_eq!(decode_rgba(&header_only(ihdr(20, 20, 8, 6, false)), 100), Err(PixelError::TooLarge(400)));
  assert_eq!(decode_rgba(&header_only(ihdr(2, 2, 8, 6, true)), 100), Err(PixelError::Interlaced));
  assert!(png_get_header(&header_only(ihdr(2, 2, 8, 6, true))).unwrap().is_interlaced);
}

#[cfg(feature = "miniz_oxide")]
mod decoding {
  use super::*;
  use crate::build_png;

  fn filter_sub(line: &[u8], bpp: usize) -> Vec<u8> {
    let mut out = vec![1];
    out.extend(line.iter().enumerate().map(|(i, &b)| b.wrapping_sub(if i >= bpp { line[i - bpp] } else { 0 })));
    out
  }

  fn filter_up(line: &[u8], prev: &[u8]) -> Vec<u8> {
    let mut out = vec![2];
    out.extend(line.iter().zip(prev).map(|(&b, &p)| b.wrapping_sub(p)));
    out
  }

  #[test]
  fn test_rgba8_with_filters() {
    let line0 = [10, 20, 30, 255, 40, 50, 60, 254];
    let line1 = [11, 21, 31, 253, 5, 6, 7, 252];
    let mut filtered = filter_sub(&line0, 4);
    filtered.extend(filter_up(&line1, &line0));
    let png = build_png(&ihdr(2, 2, 8, 6, false), &filtered, &[]);
    let bitmap = decode_rgba(&png, 100).unwrap();
    assert_eq!((bitmap.width, bitmap.height), (2, 2));
    assert_eq!(
      rgba_tuples(&bitmap),
      [(10, 20, 30, 255), (40, 50, 60, 254), (11, 21, 31, 253), (5, 6, 7, 252)]
    );
  }

  #[test]
  fn test_rgb8_with_transparent_color() {
    let filtered = [0, 1, 2, 3, 4, 5, 6];
    let trns = png_chunk(b"tRNS", &[0, 4, 0, 5, 0, 6]);
    let png = build_png(&ihdr(2, 1, 8, 2, false), &filtered, &[trns]);
    assert_eq!(rgba_tuples(&decode_rgba(&png, 100).unwrap()), [(1, 2, 3, 255), (4, 5, 6, 0)]);
  }

  #[test]
  fn test_grey_1bit_is_replicated() {
    let filtered = [0, 0b1010_0000];
    let png = build_png(&ihdr(8, 1, 1, 0, false), &filtered, &[]);
    let greys: Vec<u8> = decode_rgba(&png, 100).unwrap().pixels.iter().map(|p| p.r).collect();
    assert_eq!(greys, [255, 0, 255, 0, 0, 0, 0, 0]);
  }

  #[test]
  fn test_grey_alpha_8bit() {
    let filtered = [0, 77, 1, 88, 2];
    let png = build_png(&ihdr(2, 1, 8, 4, false), &filtered, &[]);
    assert_eq!(rgba_tuples(&decode_rgba(&png, 100).unwrap()), [(77, 77, 77, 1), (88, 88, 88, 2)]);
  }

  #[test]
  fn test_palette_2bit_with_alphas() {
    let plte = png_chunk(b"PLTE", &[1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 4]);
    let trns = png_chunk(b"tRNS", &[0, 128]);
    let filtered = [0, 0b00_01_10_11];
    let png = build_png(&ihdr(4, 1, 2, 3, false), &filtered, &[plte, trns]);
    assert_eq!(
      rgba_tuples(&decode_rgba(&png, 100).unwrap()),
      [(1, 1, 1, 0), (2, 2, 2, 128), (3, 3, 3, 255), (4, 4, 4, 255)]
    );
  }

  #[test]
  fn test_rgba16_keeps_high_byte() {
    let filtered = [0, 0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0];
    let png = build_png(&ihdr(1, 1, 16, 6, false), &filtered, &[]);
    assert_eq!(rgba_tuples(&decode_rgba(&png, 100).unwrap()), [(0x12, 0x56, 0x9A, 0xDE)]);
  }

  #[test]
  fn test_truncated_image_data_is_zero_filled() {
    let png = build_png(&ihdr(2, 2, 8, 0, false), &[0, 9, 9], &[]);
    let greys: Vec<u8> = decode_rgba(&png, 100).unwrap().pixels.iter().map(|p| p.r).collect();
    assert_eq!(greys, [9, 9, 0, 0]);
  }

  #[test]
  fn test_compressed_text_chunks() {
    let z = miniz_oxide::deflate::compress_to_vec_zlib(b"{\"steps\": 28}", 6);
    let mut ztxt = b"parameters\0\0".to_vec();
    ztxt.extend_from_slice(&z);
    let mut itxt = b"workflow\0\x01\0\0\0".to_vec();
    itxt.extend_from_slice(&z);
    let png = build_png(&ihdr(1, 1, 8, 0, false), &[0, 0], &[png_chunk(b"zTXt", &ztxt), png_chunk(b"iTXt", &itxt)]);
    let text = png_get_text(&png, 1024);
    assert_eq!(text.first("parameters"), Some("{\"steps\": 28}"));
    assert_eq!(text.first("workflow"), Some("{\"steps\": 28}"));
    // over the inflate limit means skipped, not truncated
    assert!(png_get_text(&png, 4).is_empty());
  }
}
