//! Text codec for relay frames.
//!
//! Frames are JSON text, so binary cryptographic material (keys, IVs,
//! ciphertext, signatures) travels as standard base64. Message bodies are
//! zlib-compressed before encryption.

use std::io::{Read, Write};

use base64::Engine;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;

/// Encode binary data for embedding in a text frame.
pub fn encode_binary(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode a field produced by [`encode_binary`].
pub fn decode_binary(text: &str) -> Result<Vec<u8>, CodecError> {
    Ok(base64::engine::general_purpose::STANDARD.decode(text)?)
}

/// Losslessly compress a message body.
pub fn compress(text: &str) -> Result<Vec<u8>, CodecError> {
    let failed = |e: std::io::Error| CodecError::Serialize(format!("compression failed: {e}"));
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).map_err(failed)?;
    encoder.finish().map_err(failed)
}

/// Reverse [`compress`]. Corrupt streams and non-UTF-8 output are rejected.
pub fn decompress(bytes: &[u8]) -> Result<String, CodecError> {
    let mut decoder = ZlibDecoder::new(bytes);
    let mut text = String::new();
    decoder
        .read_to_string(&mut text)
        .map_err(|e| CodecError::Decode(format!("decompression failed: {e}")))?;
    Ok(text)
}

/// Serialize a frame to its wire text.
pub fn serialize_envelope<T: Serialize>(frame: &T) -> Result<String, CodecError> {
    serde_json::to_string(frame).map_err(|e| CodecError::Serialize(e.to_string()))
}

/// Parse wire text into a frame. Unknown discriminators and missing fields are
/// reported as [`CodecError::Parse`].
pub fn parse_envelope<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    serde_json::from_str(text).map_err(|e| CodecError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ws::{ClientAction, ClientFrame, ServerFrame};

    #[test]
    fn binary_roundtrip() {
        let bytes = vec![0u8, 1, 2, 254, 255];
        let text = encode_binary(&bytes);
        assert_eq!(decode_binary(&text).unwrap(), bytes);
    }

    #[test]
    fn encode_binary_uses_padded_standard_alphabet() {
        assert_eq!(encode_binary(b"\xfb\xff"), "+/8=");
    }

    #[test]
    fn decode_binary_rejects_invalid_text() {
        assert!(matches!(decode_binary("not base64!"), Err(CodecError::Decode(_))));
    }

    #[test]
    fn compress_roundtrip_preserves_unicode() {
        let text = "hello — привет — 你好 — 👋";
        let packed = compress(text).unwrap();
        assert_eq!(decompress(&packed).unwrap(), text);
    }

    #[test]
    fn compress_emits_complete_zlib_stream() {
        let packed = compress("some message body").unwrap();
        // zlib header (deflate, 32K window), body, 4-byte adler32
        assert_eq!(packed[0], 0x78);
        assert!(packed.len() > 6);
        assert_eq!(decompress(&packed).unwrap(), "some message body");
    }

    #[test]
    fn compress_empty_string() {
        let packed = compress("").unwrap();
        assert!(!packed.is_empty());
        assert_eq!(decompress(&packed).unwrap(), "");
    }

    #[test]
    fn compress_shrinks_repetitive_text() {
        let text = "a".repeat(10_000);
        assert!(compress(&text).unwrap().len() < 200);
    }

    #[test]
    fn decompress_rejects_garbage() {
        let result = decompress(b"definitely not a zlib stream");
        assert!(matches!(result, Err(CodecError::Decode(_))));
    }

    #[test]
    fn decompress_rejects_corrupted_header() {
        let mut packed = compress("some message body").unwrap();
        packed[0] ^= 0xff;
        assert!(decompress(&packed).is_err());
    }

    #[test]
    fn parse_is_field_order_independent() {
        let a: ServerFrame =
            parse_envelope(r#"{"resp":"pubKey","uid":"7f1c2b4e-58a5-4a55-9d86-c2b8a6f6d7e1","pub":"AAAA"}"#)
                .unwrap();
        let b: ServerFrame =
            parse_envelope(r#"{"pub":"AAAA","uid":"7f1c2b4e-58a5-4a55-9d86-c2b8a6f6d7e1","resp":"pubKey"}"#)
                .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn parse_malformed_text_is_parse_error() {
        let result = parse_envelope::<ServerFrame>("{not json");
        assert!(matches!(result, Err(CodecError::Parse(_))));
    }

    #[test]
    fn parse_missing_field_is_parse_error() {
        let result = parse_envelope::<ServerFrame>(r#"{"resp":"pubKey","pub":"AAAA"}"#);
        assert!(matches!(result, Err(CodecError::Parse(_))));
    }

    #[test]
    fn serialize_ping() {
        let text = serialize_envelope(&ClientFrame::Action(ClientAction::Ping)).unwrap();
        assert_eq!(text, r#"{"act":"ping"}"#);
    }
}
