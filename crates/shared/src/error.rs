/// Errors raised while encoding or decoding wire data.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Binary or compressed payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Frame text is not a well-formed envelope.
    #[error("parse error: {0}")]
    Parse(String),

    /// Value could not be serialized into a frame.
    #[error("serialize error: {0}")]
    Serialize(String),
}

impl From<base64::DecodeError> for CodecError {
    fn from(err: base64::DecodeError) -> Self {
        CodecError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_contains_message() {
        let err = CodecError::Decode("bad zlib header".into());
        assert_eq!(err.to_string(), "decode error: bad zlib header");
    }

    #[test]
    fn parse_contains_message() {
        let err = CodecError::Parse("missing field `uid`".into());
        assert_eq!(err.to_string(), "parse error: missing field `uid`");
    }

    #[test]
    fn from_base64_error_is_decode() {
        use base64::Engine;
        let b64_err = base64::engine::general_purpose::STANDARD
            .decode("***")
            .unwrap_err();
        let err: CodecError = b64_err.into();
        assert!(matches!(err, CodecError::Decode(_)));
    }
}
