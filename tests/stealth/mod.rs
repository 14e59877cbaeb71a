use pnginfo::stealth::{
  decode_stealth_payload, extract_stealth_bits, pack_bits, StealthBits, StealthExtractor, StealthMode, SIG_ALPHA,
  SIG_RGB,
};

use super::{bytes_to_bits, embed_alpha, embed_rgb, plain_bitmap, stealth_stream};

#[test]
fn test_no_signature_is_none() {
  assert_eq!(extract_stealth_bits(&plain_bitmap(32, 32)), None);
  assert_eq!(extract_stealth_bits(&plain_bitmap(0, 0)), None);
  let mut noisy = plain_bitmap(32, 32);
  embed_rgb(&mut noisy, &bytes_to_bits(&super::rand_bytes(300)));
  assert_eq!(extract_stealth_bits(&noisy), None);
}

#[test]
fn test_alpha_plane_payload() {
  let payload = bytes_to_bits(b"hello alpha");
  let mut bitmap = plain_bitmap(20, 20);
  embed_alpha(&mut bitmap, &stealth_stream(SIG_ALPHA, &payload));
  let found = extract_stealth_bits(&bitmap).unwrap();
  assert_eq!(found, StealthBits { mode: StealthMode::Alpha, compressed: false, bits: payload });
  assert_eq!(decode_stealth_payload(&found, 1024).as_deref(), Some("hello alpha"));
}

#[test]
fn test_rgb_plane_every_alignment() {
  // the 152 header bits leave 2 bits of overflow; vary the payload so
  // every remainder mod 3 is covered, including partial bytes
  for bit_count in [24, 16, 8, 7, 10, 11, 1] {
    let payload: Vec<bool> = (0..bit_count).map(|i| i % 3 == 0 || i % 5 == 0).collect();
    let mut bitmap = plain_bitmap(10, 10);
    embed_rgb(&mut bitmap, &stealth_stream(SIG_RGB, &payload));
    let found = extract_stealth_bits(&bitmap).unwrap_or_else(|| panic!("nothing found for {bit_count} bits"));
    assert_eq!(found.mode, StealthMode::Rgb);
    assert!(!found.compressed);
    assert_eq!(found.bits, payload, "bit_count {bit_count}");
  }
}

#[test]
fn test_rgb_text_payload() {
  let mut bitmap = plain_bitmap(16, 16);
  embed_rgb(&mut bitmap, &stealth_stream(SIG_RGB, &bytes_to_bits(b"{\"a\": 1}")));
  let found = extract_stealth_bits(&bitmap).unwrap();
  assert_eq!(pack_bits(&found.bits), b"{\"a\": 1}");
}

#[test]
fn test_truncated_payload_is_none() {
  // declares 1000 bits but the image only has room for a few hundred
  let mut stream = bytes_to_bits(SIG_ALPHA.as_bytes());
  stream.extend(bytes_to_bits(&1000_u32.to_be_bytes()));
  stream.extend(std::iter::repeat(true).take(100));
  let mut bitmap = plain_bitmap(16, 16);
  embed_alpha(&mut bitmap, &stream);
  assert_eq!(extract_stealth_bits(&bitmap), None);
}

#[test]
fn test_zero_length_is_none() {
  let mut bitmap = plain_bitmap(16, 16);
  embed_alpha(&mut bitmap, &stealth_stream(SIG_ALPHA, &[]));
  assert_eq!(extract_stealth_bits(&bitmap), None);
}

#[test]
fn test_extractor_stops_once_done() {
  let payload = bytes_to_bits(b"ok");
  let mut bitmap = plain_bitmap(16, 16);
  embed_alpha(&mut bitmap, &stealth_stream(SIG_ALPHA, &payload));
  let mut machine = StealthExtractor::new();
  let used = bitmap.iter_column_major().take_while(|&px| !machine.push_pixel(px)).count();
  // the pixel that finishes the payload isn't counted by take_while
  assert_eq!(used + 1, 120 + 32 + payload.len());
  assert!(machine.is_done());
  assert_eq!(machine.finish().map(|b| b.bits), Some(payload));
}

#[test]
fn test_invalid_utf8_payload_is_none() {
  let bits = StealthBits { mode: StealthMode::Alpha, compressed: false, bits: bytes_to_bits(&[0xFF, 0xFE]) };
  assert_eq!(decode_stealth_payload(&bits, 1024), None);
}

#[cfg(feature = "miniz_oxide")]
#[test]
fn test_compressed_payloads() {
  use pnginfo::stealth::{SIG_ALPHA_COMP, SIG_RGB_COMP};

  let text = r#"{"Software": "NovelAI", "Comment": "{\"prompt\": \"cat\", \"steps\": 28}"}"#;
  let payload = bytes_to_bits(&super::gzip(text.as_bytes()));

  let mut alpha = plain_bitmap(40, 40);
  embed_alpha(&mut alpha, &stealth_stream(SIG_ALPHA_COMP, &payload));
  let found = extract_stealth_bits(&alpha).unwrap();
  assert_eq!((found.mode, found.compressed), (StealthMode::Alpha, true));
  assert_eq!(decode_stealth_payload(&found, 1 << 20).as_deref(), Some(text));
  // limit too small to hold the text
  assert_eq!(decode_stealth_payload(&found, 8), None);

  let mut rgb = plain_bitmap(20, 20);
  embed_rgb(&mut rgb, &stealth_stream(SIG_RGB_COMP, &payload));
  let found = extract_stealth_bits(&rgb).unwrap();
  assert_eq!((found.mode, found.compressed), (StealthMode::Rgb, true));
  assert_eq!(decode_stealth_payload(&found, 1 << 20).as_deref(), Some(text));
}
