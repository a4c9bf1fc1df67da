use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::message::{Citation, JsonMap, Usage, lenient, null_as_default};

/// Typed event carried by one SSE frame, discriminated by its `type` field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "stream.start")]
    Start(StartEvent),
    #[serde(rename = "stream.text")]
    Text(TextEvent),
    #[serde(rename = "stream.thinking")]
    Thinking(ThinkingEvent),
    #[serde(rename = "stream.tool_call")]
    ToolCall(ToolCallEvent),
    #[serde(rename = "stream.tool_result")]
    ToolResult(ToolResultEvent),
    #[serde(rename = "stream.progress")]
    Progress(ProgressEvent),
    #[serde(rename = "stream.error")]
    Error(ErrorEvent),
    #[serde(rename = "stream.done")]
    Done(DoneEvent),
    /// Any event type this client does not know.
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartEvent {
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextEvent {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_final: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ThinkingEvent {
    pub thinking: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallEvent {
    pub tool_name: String,
    pub tool_call_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub args: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultEvent {
    #[serde(default)]
    pub tool_name: String,
    pub tool_call_id: String,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoneEvent {
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

impl StreamEvent {
    /// Wire name of the event type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start(_) => "stream.start",
            Self::Text(_) => "stream.text",
            Self::Thinking(_) => "stream.thinking",
            Self::ToolCall(_) => "stream.tool_call",
            Self::ToolResult(_) => "stream.tool_result",
            Self::Progress(_) => "stream.progress",
            Self::Error(_) => "stream.error",
            Self::Done(_) => "stream.done",
            Self::Unknown => "unknown",
        }
    }

    /// Server emission time, when the frame carried one.
    pub fn timestamp(&self) -> Option<f64> {
        match self {
            Self::Start(e) => e.timestamp,
            Self::Text(e) => e.timestamp,
            Self::Thinking(e) => e.timestamp,
            Self::ToolCall(e) => e.timestamp,
            Self::ToolResult(e) => e.timestamp,
            Self::Progress(e) => e.timestamp,
            Self::Error(e) => e.timestamp,
            Self::Done(e) => e.timestamp,
            Self::Unknown => None,
        }
    }

    /// Whether the event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error(_) | Self::Done(_))
    }

    /// Encodes the event as one SSE line, the way the server writes it.
    pub fn to_sse_line(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n", serde_json::to_string(self)?))
    }
}

/// Parses one frame payload.
///
/// Malformed JSON and unknown event types are dropped; neither stops the
/// stream.
pub fn parse_frame(payload: &str) -> Option<StreamEvent> {
    match serde_json::from_str::<StreamEvent>(payload) {
        Ok(StreamEvent::Unknown) => {
            trace!(payload, "ignoring unknown stream event type");
            None
        }
        Ok(event) => Some(event),
        Err(err) => {
            debug!(error = %err, "dropping malformed stream frame");
            None
        }
    }
}
