//! Single-frame JSON codec.

use crate::{DecodeError, Message};

/// Decode one complete frame.
pub fn decode(bytes: &[u8]) -> Result<Message, DecodeError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    Message::from_value(value)
}

/// Encode a message as UTF-8 JSON.
pub fn encode(message: &Message) -> Vec<u8> {
    message.to_string().into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_identity_frame() {
        let message = decode(br#"{"camera_id":"Face","member_id":"alice"}"#).unwrap();
        assert_eq!(message.member_id(), Some("alice"));
        assert_eq!(message.get_str("camera_id"), Some("Face"));
    }

    #[test]
    fn test_decode_tolerates_surrounding_whitespace() {
        let message = decode(b"  {\"cmd\":\"ack\"}\n").unwrap();
        assert_eq!(message.get_str("cmd"), Some("ack"));
    }

    #[test]
    fn test_decode_malformed_json() {
        let result = decode(br#"{"camera_id":"#);
        assert!(matches!(result, Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let result = decode(b"{\"member_id\":\"\xff\xfe\"}");
        assert!(matches!(result, Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_decode_non_object() {
        let result = decode(b"[1,2,3]");
        assert!(matches!(result, Err(DecodeError::NotAnObject("array"))));
    }

    #[test]
    fn test_encode_produces_decodable_bytes() {
        let message = Message::identity("Face", "alice");
        let bytes = encode(&message);
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            r#"{"camera_id":"Face","member_id":"alice"}"#
        );
        assert_eq!(decode(&bytes).unwrap(), message);
    }

    #[test]
    fn test_encode_non_ascii_is_utf8() {
        let message = Message::new().with("member_id", "김민수");
        let bytes = encode(&message);
        assert!(std::str::from_utf8(&bytes).is_ok());
        assert_eq!(decode(&bytes).unwrap().member_id(), Some("김민수"));
    }
}
