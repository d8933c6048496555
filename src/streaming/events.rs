//! Recognized upstream stream events.
//!
//! The upstream emits many event types; only two carry billing data. Every
//! payload is parsed once into [`StreamEvent`] and callers switch on it.

use serde::Deserialize;

/// A parsed event-stream payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Opens the stream: the model actually serving the request, when the
    /// upstream names it, and the prompt size.
    StreamStart {
        model: Option<String>,
        input_tokens: i64,
    },
    /// Carries an output-token count. The last one seen is authoritative.
    StreamDelta { output_tokens: i64 },
    /// Anything else (content blocks, pings, stop markers, errors).
    Other,
}

impl StreamEvent {
    /// Parse one record's JSON payload. `None` if it is not valid JSON or
    /// a known event type is missing required fields.
    pub fn parse(data: &str) -> Option<Self> {
        let wire: WireEvent = serde_json::from_str(data).ok()?;
        Some(match wire {
            WireEvent::MessageStart { message } => StreamEvent::StreamStart {
                model: message.model,
                input_tokens: message.usage.map(|u| u.input_tokens).unwrap_or(0),
            },
            WireEvent::MessageDelta {
                usage: Some(usage),
            } => StreamEvent::StreamDelta {
                output_tokens: usage.output_tokens,
            },
            WireEvent::MessageDelta { usage: None } | WireEvent::Other => StreamEvent::Other,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    MessageStart {
        message: WireMessage,
    },
    MessageDelta {
        #[serde(default)]
        usage: Option<WireDeltaUsage>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<WireStartUsage>,
}

#[derive(Debug, Deserialize)]
struct WireStartUsage {
    #[serde(default)]
    input_tokens: i64,
}

#[derive(Debug, Deserialize)]
struct WireDeltaUsage {
    #[serde(default)]
    output_tokens: i64,
}
