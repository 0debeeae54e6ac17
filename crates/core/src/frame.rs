//! Twilio Media Streams frames.
//!
//! See <https://www.twilio.com/docs/voice/media-streams/websocket-messages>.

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    MalformedFrame(#[source] serde_json::Error),
    #[error("could not encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

/// An inbound frame, discriminated by its `event` field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum Frame {
    Connected {
        #[serde(default)]
        protocol: String,
        #[serde(default)]
        version: String,
    },
    Start {
        #[serde(rename = "sequenceNumber", default, deserialize_with = "sequence_number")]
        sequence_number: Option<u64>,
        start: StartPayload,
    },
    Media {
        #[serde(rename = "sequenceNumber", default, deserialize_with = "sequence_number")]
        sequence_number: Option<u64>,
        media: MediaPayload,
    },
    Mark {
        mark: MarkPayload,
    },
    Stop,
    Dtmf {
        dtmf: DtmfPayload,
    },
    Clear,
}

impl Frame {
    pub fn event(&self) -> &'static str {
        match self {
            Frame::Connected { .. } => "connected",
            Frame::Start { .. } => "start",
            Frame::Media { .. } => "media",
            Frame::Mark { .. } => "mark",
            Frame::Stop => "stop",
            Frame::Dtmf { .. } => "dtmf",
            Frame::Clear => "clear",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPayload {
    pub account_sid: String,
    pub stream_sid: String,
    pub call_sid: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Track {
    #[default]
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MediaPayload {
    pub payload: String,
    #[serde(default)]
    pub track: Track,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DtmfPayload {
    pub digit: String,
    #[serde(default)]
    pub track: Option<String>,
}

/// Twilio sends the sequence number as a string; numbers are accepted too.
fn sequence_number<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(u64),
        Text(String),
    }

    match Option::<Repr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Repr::Number(n)) => Ok(Some(n)),
        Some(Repr::Text(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// A frame sent back to Twilio.
///
/// Backend transmissions arrive already encoded and are parsed with [`decode_outbound`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundFrame {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        #[serde(
            rename = "sequenceNumber",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        sequence_number: Option<u64>,
        media: OutboundMedia,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkPayload,
    },
    /// Drops audio Twilio has buffered but not yet played.
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMedia {
    pub payload: String,
}

impl OutboundFrame {
    pub fn media(stream_sid: impl Into<String>, payload: impl Into<String>) -> Self {
        OutboundFrame::Media {
            stream_sid: stream_sid.into(),
            sequence_number: None,
            media: OutboundMedia {
                payload: payload.into(),
            },
        }
    }

    pub fn mark(stream_sid: impl Into<String>, name: impl Into<String>) -> Self {
        OutboundFrame::Mark {
            stream_sid: stream_sid.into(),
            mark: MarkPayload { name: name.into() },
        }
    }
}

pub fn decode(raw: &[u8]) -> Result<Frame, FrameError> {
    serde_json::from_slice(raw).map_err(FrameError::MalformedFrame)
}

pub fn encode(frame: &OutboundFrame) -> Result<String, FrameError> {
    serde_json::to_string(frame).map_err(FrameError::Encode)
}

pub fn decode_outbound(raw: &str) -> Result<OutboundFrame, FrameError> {
    serde_json::from_str(raw).map_err(FrameError::MalformedFrame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn test_decode_start() {
        let raw = br#"{"event":"start","sequenceNumber":"1","streamSid":"ST1","start":{"accountSid":"AC1","streamSid":"ST1","callSid":"CA1","tracks":["inbound"],"mediaFormat":{"encoding":"audio/x-mulaw","sampleRate":8000,"channels":1}}}"#;

        let frame = decode(raw).unwrap();

        assert_eq!(
            frame,
            Frame::Start {
                sequence_number: Some(1),
                start: StartPayload {
                    account_sid: "AC1".into(),
                    stream_sid: "ST1".into(),
                    call_sid: "CA1".into(),
                },
            }
        );
    }

    #[test]
    fn test_decode_control_frames() {
        let connected = decode(br#"{"event":"connected","protocol":"Call","version":"1.0.0"}"#).unwrap();
        assert_eq!(connected.event(), "connected");

        let stop = decode(br#"{"event":"stop","sequenceNumber":"5","streamSid":"ST1","stop":{"accountSid":"AC1","callSid":"CA1"}}"#).unwrap();
        assert_eq!(stop, Frame::Stop);

        let mark = decode(br#"{"event":"mark","streamSid":"ST1","mark":{"name":"ai-delta-it1"}}"#).unwrap();
        assert_eq!(
            mark,
            Frame::Mark {
                mark: MarkPayload {
                    name: "ai-delta-it1".into()
                }
            }
        );

        let dtmf = decode(br#"{"event":"dtmf","streamSid":"ST1","dtmf":{"track":"inbound_track","digit":"7"}}"#).unwrap();
        let Frame::Dtmf { dtmf } = dtmf else {
            panic!("expected dtmf frame");
        };
        assert_eq!(dtmf.digit, "7");
    }

    #[test]
    fn test_media_track_defaults_to_inbound() {
        let frame = decode(br#"{"event":"media","media":{"payload":"AAAA"}}"#).unwrap();

        let Frame::Media { media, sequence_number } = frame else {
            panic!("expected media frame");
        };
        assert_eq!(media.track, Track::Inbound);
        assert_eq!(sequence_number, None);
    }

    #[test]
    fn test_malformed_frames_are_rejected() {
        for raw in [
            &br#"{"sequenceNumber":"1"}"#[..],
            br#"{"event":"ringing"}"#,
            br#"{"event":"start","start":{"accountSid":"AC1"}}"#,
            br#"{"event":"media","media":{"payload":"AAAA","track":"sideways"}}"#,
            br#"{"event":"media","sequenceNumber":"one","media":{"payload":"AAAA"}}"#,
            b"not json",
        ] {
            assert!(matches!(decode(raw), Err(FrameError::MalformedFrame(_))));
        }
    }

    #[test]
    fn test_encode_omits_unset_sequence_number() {
        let encoded = encode(&OutboundFrame::media("ST1", "QUJD")).unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();

        assert_eq!(
            value,
            json!({"event": "media", "streamSid": "ST1", "media": {"payload": "QUJD"}})
        );

        let encoded = encode(&OutboundFrame::mark("ST1", "ai-delta-it1")).unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();

        assert_eq!(
            value,
            json!({"event": "mark", "streamSid": "ST1", "mark": {"name": "ai-delta-it1"}})
        );
    }

    #[test]
    fn test_media_survives_a_round_trip() {
        let outbound = OutboundFrame::Media {
            stream_sid: "ST1".into(),
            sequence_number: Some(42),
            media: OutboundMedia {
                payload: "//79/A==".into(),
            },
        };

        let decoded = decode(encode(&outbound).unwrap().as_bytes()).unwrap();

        assert_eq!(
            decoded,
            Frame::Media {
                sequence_number: Some(42),
                media: MediaPayload {
                    payload: "//79/A==".into(),
                    track: Track::Inbound,
                },
            }
        );
    }

    #[test]
    fn test_decode_backend_transmissions() {
        let media = decode_outbound(
            r#"{"event":"media","streamSid":"ST1","media":{"payload":"QUJD"}}"#,
        )
        .unwrap();
        assert_eq!(media, OutboundFrame::media("ST1", "QUJD"));

        let mark = decode_outbound(
            r#"{"event":"mark","streamSid":"ST1","mark":{"name":"greeting"}}"#,
        )
        .unwrap();
        assert_eq!(mark, OutboundFrame::mark("ST1", "greeting"));

        let clear = decode_outbound(r#"{"event":"clear","streamSid":"ST1"}"#).unwrap();
        assert_eq!(
            clear,
            OutboundFrame::Clear {
                stream_sid: "ST1".into()
            }
        );

        assert!(matches!(
            decode_outbound(r#"{"event":"stop","streamSid":"ST1"}"#),
            Err(FrameError::MalformedFrame(_))
        ));
    }
}
