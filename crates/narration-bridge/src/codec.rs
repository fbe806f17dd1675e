//! Message codec for inbound narration frames.
//!
//! Every text frame is a JSON envelope `{"type": ..., "payload": {...}}`. One frame
//! maps to exactly one [`Frame`]; anything malformed is an [`FrameError`] which the
//! receive loop logs and drops.

use narration_types::FollowUpPrompt;
use serde_json::Value;
use thiserror::Error;

/// Episode header announced before (or while) its audio streams.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EpisodeHeader {
    pub title: String,
    pub level: Option<u32>,
    pub picture_url: Option<String>,
    pub persona_name: Option<String>,
}

/// Metadata sent once the episode has been fully generated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EpisodeCompletion {
    pub podcast_id: i64,
    pub follow_ups: Vec<FollowUpPrompt>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Base64 PCM16 chunk, or `None` for the end-of-audio marker.
    Audio(Option<String>),
    Header(EpisodeHeader),
    Completion(EpisodeCompletion),
    Transcript(String),
    /// Well-formed envelope with a type this engine does not handle.
    Unrecognized(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(String),
    #[error("frame has no type")]
    MissingType,
    #[error("{kind} frame is missing {field}")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
    #[error("audio envelope is invalid: {0}")]
    AudioEnvelope(String),
}

/// Parse one inbound text frame.
pub fn parse_frame(text: &str) -> Result<Frame, FrameError> {
    let root: Value = serde_json::from_str(text).map_err(|e| FrameError::Json(e.to_string()))?;
    let kind = root
        .get("type")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingType)?;
    let payload = root.get("payload").unwrap_or(&Value::Null);

    match kind {
        "AUDIO" => parse_audio(payload),
        "INFO" => parse_info(payload),
        "TRANSCRIPT" => payload
            .get("textChunk")
            .and_then(Value::as_str)
            .map(|s| Frame::Transcript(s.to_string()))
            .ok_or(FrameError::MissingField {
                kind: "TRANSCRIPT",
                field: "textChunk",
            }),
        other => Ok(Frame::Unrecognized(other.to_string())),
    }
}

fn parse_audio(payload: &Value) -> Result<Frame, FrameError> {
    if let Some(data) = payload.get("audioChunk").and_then(|c| c.get("data")) {
        let bytes = byte_array(data)?;
        let inner: Value = serde_json::from_slice(&bytes)
            .map_err(|e| FrameError::AudioEnvelope(e.to_string()))?;
        return audio_value(&inner);
    }
    audio_value(payload)
}

/// `{"audio": "<base64>"}` or `{"audio": null}`.
fn audio_value(doc: &Value) -> Result<Frame, FrameError> {
    match doc.get("audio") {
        Some(Value::Null) => Ok(Frame::Audio(None)),
        Some(Value::String(s)) => Ok(Frame::Audio(Some(s.clone()))),
        Some(_) => Err(FrameError::AudioEnvelope("audio is neither string nor null".into())),
        None => Err(FrameError::MissingField {
            kind: "AUDIO",
            field: "audio",
        }),
    }
}

fn byte_array(data: &Value) -> Result<Vec<u8>, FrameError> {
    let items = data
        .as_array()
        .ok_or_else(|| FrameError::AudioEnvelope("data is not an array".into()))?;
    items
        .iter()
        .map(|v| {
            v.as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(|| FrameError::AudioEnvelope(format!("not a byte: {v}")))
        })
        .collect()
}

fn parse_info(payload: &Value) -> Result<Frame, FrameError> {
    // Completion and header share the INFO tag; completion is the one with an id.
    if payload.get("podcastId").is_some() || payload.get("followUps").is_some() {
        let podcast_id = payload
            .get("podcastId")
            .and_then(Value::as_i64)
            .ok_or(FrameError::MissingField {
                kind: "INFO",
                field: "podcastId",
            })?;
        let follow_ups = payload
            .get("followUps")
            .and_then(Value::as_array)
            .ok_or(FrameError::MissingField {
                kind: "INFO",
                field: "followUps",
            })?
            .iter()
            .filter_map(follow_up)
            .collect();
        return Ok(Frame::Completion(EpisodeCompletion {
            podcast_id,
            follow_ups,
        }));
    }

    let title = payload
        .get("title")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingField {
            kind: "INFO",
            field: "title",
        })?;
    let persona = payload.get("persona");
    Ok(Frame::Header(EpisodeHeader {
        title: title.to_string(),
        level: payload
            .get("level")
            .and_then(Value::as_u64)
            .and_then(|l| u32::try_from(l).ok()),
        picture_url: persona
            .and_then(|p| p.get("pictureUrl"))
            .and_then(Value::as_str)
            .map(str::to_string),
        persona_name: persona
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string),
    }))
}

/// Entries without an id or content are skipped.
fn follow_up(v: &Value) -> Option<FollowUpPrompt> {
    Some(FollowUpPrompt {
        id: v.get("id")?.as_i64()?,
        content: v.get("content")?.as_str()?.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope_bytes(inner: &str) -> String {
        let bytes: Vec<String> = inner.bytes().map(|b| b.to_string()).collect();
        format!(
            r#"{{"type":"AUDIO","payload":{{"audioChunk":{{"data":[{}]}}}}}}"#,
            bytes.join(",")
        )
    }

    #[test]
    fn audio_chunk_byte_envelope() {
        let frame = parse_frame(&envelope_bytes(r#"{"audio":"AAAA"}"#)).unwrap();
        assert_eq!(frame, Frame::Audio(Some("AAAA".to_string())));

        let end = parse_frame(&envelope_bytes(r#"{"audio":null}"#)).unwrap();
        assert_eq!(end, Frame::Audio(None));
    }

    #[test]
    fn flat_audio_payload() {
        assert_eq!(
            parse_frame(r#"{"type":"AUDIO","payload":{"audio":null}}"#).unwrap(),
            Frame::Audio(None)
        );
        assert_eq!(
            parse_frame(r#"{"type":"AUDIO","payload":{"audio":"AQI="}}"#).unwrap(),
            Frame::Audio(Some("AQI=".to_string()))
        );
    }

    #[test]
    fn info_header_and_completion_are_disambiguated() {
        let header = parse_frame(
            r#"{"type":"INFO","payload":{"title":"Old Port","level":2,"persona":{"pictureUrl":"https://cdn/p.png","name":"Ada"}}}"#,
        )
        .unwrap();
        assert_eq!(
            header,
            Frame::Header(EpisodeHeader {
                title: "Old Port".to_string(),
                level: Some(2),
                picture_url: Some("https://cdn/p.png".to_string()),
                persona_name: Some("Ada".to_string()),
            })
        );

        let done = parse_frame(
            r#"{"type":"INFO","payload":{"podcastId":41,"followUps":[{"id":1,"content":"Why?"},{"id":2,"content":"How?"}]}}"#,
        )
        .unwrap();
        let Frame::Completion(c) = done else {
            panic!("expected completion");
        };
        assert_eq!(c.podcast_id, 41);
        assert_eq!(c.follow_ups.len(), 2);
        assert_eq!(c.follow_ups[1].content, "How?");
    }

    #[test]
    fn transcript_delta() {
        assert_eq!(
            parse_frame(r#"{"type":"TRANSCRIPT","payload":{"textChunk":"Once "}}"#).unwrap(),
            Frame::Transcript("Once ".to_string())
        );
    }

    #[test]
    fn malformed_frames_are_errors_not_panics() {
        assert!(matches!(parse_frame("{not json"), Err(FrameError::Json(_))));
        assert_eq!(parse_frame(r#"{"payload":{}}"#), Err(FrameError::MissingType));
        assert!(matches!(
            parse_frame(r#"{"type":"INFO","payload":{"level":1}}"#),
            Err(FrameError::MissingField { field: "title", .. })
        ));
        assert!(matches!(
            parse_frame(r#"{"type":"AUDIO","payload":{"audioChunk":{"data":[300]}}}"#),
            Err(FrameError::AudioEnvelope(_))
        ));
        assert!(matches!(
            parse_frame(r#"{"type":"AUDIO","payload":{}}"#),
            Err(FrameError::MissingField { field: "audio", .. })
        ));
    }

    #[test]
    fn unknown_type_is_unrecognized() {
        assert_eq!(
            parse_frame(r#"{"type":"PING","payload":{}}"#).unwrap(),
            Frame::Unrecognized("PING".to_string())
        );
    }
}
