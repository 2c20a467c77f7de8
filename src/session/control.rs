//! Control-plane text messages from the speech service

use serde::Deserialize;

/// What a text message means to the satellite
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// The current reply has been fully sent
    ReplyEnd,
    /// The server finished its own session setup
    Ready,
    /// Anything else; logged and ignored
    Other(Option<String>),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Classify a text payload by its `type` field
///
/// Payloads that are not JSON fall back to a substring match on `tts_end`.
#[must_use]
pub fn classify(payload: &str) -> ControlMessage {
    match serde_json::from_str::<Envelope>(payload) {
        Ok(Envelope { kind: Some(kind) }) => match kind.as_str() {
            "tts_end" => ControlMessage::ReplyEnd,
            "ready" => ControlMessage::Ready,
            _ => ControlMessage::Other(Some(kind)),
        },
        Ok(Envelope { kind: None }) => ControlMessage::Other(None),
        Err(_) if payload.contains("tts_end") => ControlMessage::ReplyEnd,
        Err(_) => ControlMessage::Other(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_end() {
        assert_eq!(classify(r#"{"type":"tts_end"}"#), ControlMessage::ReplyEnd);
        assert_eq!(classify(r#"{ "type" : "tts_end", "id": 3 }"#), ControlMessage::ReplyEnd);
    }

    #[test]
    fn test_ready_and_other() {
        assert_eq!(
            classify(r#"{"type":"ready","message":"server ready"}"#),
            ControlMessage::Ready
        );
        assert_eq!(
            classify(r#"{"type":"asr_result","text":"hi"}"#),
            ControlMessage::Other(Some("asr_result".to_string()))
        );
        assert_eq!(classify(r#"{"text":"tts_end"}"#), ControlMessage::Other(None));
    }

    #[test]
    fn test_non_json_falls_back_to_substring() {
        assert_eq!(classify("type=tts_end"), ControlMessage::ReplyEnd);
        assert_eq!(classify("hello"), ControlMessage::Other(None));
    }
}
