//! Wire shapes for [`StreamEvent`].
//!
//! Two shapes share the channel: the legacy flat object, and the envelope
//! `{type, seq, flow, thread_id, run_id, payload}`. A frame is an envelope
//! when it carries both `seq` and `flow`; both shapes normalize to [`Frame`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::event::{Flow, StreamEvent};

/// Wire shape produced by an emitter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    #[default]
    Envelope,
    Legacy,
}

impl std::fmt::Display for WireFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Envelope => write!(f, "envelope"),
            Self::Legacy => write!(f, "legacy"),
        }
    }
}

impl std::str::FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "envelope" => Ok(Self::Envelope),
            "legacy" => Ok(Self::Legacy),
            other => Err(format!("unknown wire format: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub seq: u64,
    pub flow: Flow,
    pub thread_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

/// A decoded frame: the flat event plus whatever routing metadata the wire carried.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub seq: Option<u64>,
    pub flow: Option<Flow>,
    pub event: StreamEvent,
}

impl From<StreamEvent> for Frame {
    fn from(event: StreamEvent) -> Self {
        Self {
            seq: None,
            flow: None,
            event,
        }
    }
}

impl Envelope {
    /// Wrap a flat event, moving `type`, `thread_id` and `run_id` out of the payload.
    pub fn wrap(seq: u64, event: &StreamEvent) -> Result<Self, serde_json::Error> {
        let mut payload = match serde_json::to_value(event)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        payload.remove("type");
        payload.remove("thread_id");
        let run_id = payload
            .remove("run_id")
            .and_then(|v| v.as_str().map(String::from));

        Ok(Self {
            event_type: event.type_name().to_string(),
            seq,
            flow: event.kind.flow(),
            thread_id: event.thread_id.clone(),
            run_id,
            payload: Value::Object(payload),
        })
    }

    /// Merge the payload with the envelope's own identity fields into a flat event.
    pub fn into_frame(self) -> Result<Frame, serde_json::Error> {
        let mut flat = match self.payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        flat.insert("type".into(), Value::String(self.event_type));
        flat.insert("thread_id".into(), Value::String(self.thread_id));
        if let Some(run_id) = self.run_id {
            flat.insert("run_id".into(), Value::String(run_id));
        }
        let event: StreamEvent = serde_json::from_value(Value::Object(flat))?;
        Ok(Frame {
            seq: Some(self.seq),
            flow: Some(self.flow),
            event,
        })
    }
}

/// Serialize one event in the requested shape.
pub fn encode(format: WireFormat, seq: u64, event: &StreamEvent) -> Result<String, serde_json::Error> {
    match format {
        WireFormat::Envelope => serde_json::to_string(&Envelope::wrap(seq, event)?),
        WireFormat::Legacy => serde_json::to_string(event),
    }
}

/// Decode the JSON body of one frame, detecting its shape.
///
/// Returns `None` for invalid JSON and for objects without a recognized `type`.
pub fn decode(data: &str) -> Option<Frame> {
    let value: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "skipping frame with invalid JSON");
            return None;
        }
    };

    let is_envelope = value
        .as_object()
        .is_some_and(|obj| obj.contains_key("seq") && obj.contains_key("flow"));

    let result = if is_envelope {
        serde_json::from_value::<Envelope>(value).and_then(Envelope::into_frame)
    } else {
        serde_json::from_value::<StreamEvent>(value).map(Frame::from)
    };

    match result {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::debug!(error = %e, "skipping unrecognized frame");
            None
        }
    }
}
