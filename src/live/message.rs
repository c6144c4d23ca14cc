use crate::error::FeedError;
use crate::feed::model::FeedSnapshot;
use serde::Deserialize;

/// Extract one event-stream frame from the buffer.
///
/// Frames are terminated by a blank line:
///
/// ```text
/// data: {"type": "live_update", "data": {...}}
///
/// ```
///
/// Returns `Some((data, remaining_buffer))` when a complete frame is
/// present, `None` while the buffer is still partial. Comment lines
/// (starting with `:`) are keepalives; a frame made only of them comes
/// back with empty `data`. Multiple `data:` lines in one frame are
/// joined with a newline.
pub fn parse_push_frame(buffer: &str) -> Option<(String, String)> {
    let end_pos = buffer.find("\n\n")?;

    let frame_text = &buffer[..end_pos];
    let remaining = buffer[end_pos + 2..].to_string();

    let mut data = String::new();
    for line in frame_text.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(value.trim());
        }
        // Comments and unknown fields are ignored.
    }

    Some((data, remaining))
}

/// A message from the push channel, discriminated by its `type` field.
///
/// Validation happens here, at deserialization. A frame that does not
/// decode is dropped with a warning; it never tears down the
/// connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum PushMessage {
    /// Server accepted the subscription. Resets the reconnect counter.
    #[serde(rename = "connection_established")]
    ConnectionEstablished {
        #[serde(default)]
        client_id: Option<String>,
    },
    /// Full snapshot sent right after the connection is established.
    #[serde(rename = "initial_data")]
    InitialData { data: FeedSnapshot },
    /// Incremental refresh of one or more kinds.
    #[serde(rename = "live_update")]
    LiveUpdate { data: FeedSnapshot },
    /// Server-side failure report. Informational only.
    #[serde(rename = "error")]
    Error { message: String },
}

impl PushMessage {
    pub fn decode(data: &str) -> Result<Self, FeedError> {
        Ok(serde_json::from_str(data)?)
    }

    /// Wire name of the message type, used as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            PushMessage::ConnectionEstablished { .. } => "connection_established",
            PushMessage::InitialData { .. } => "initial_data",
            PushMessage::LiveUpdate { .. } => "live_update",
            PushMessage::Error { .. } => "error",
        }
    }
}
