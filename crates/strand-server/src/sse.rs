use std::convert::Infallible;

use axum::response::Sse;
use axum::response::sse::Event;
use futures::{Stream, StreamExt};

use strand_core::envelope::{WireFormat, encode};

use crate::queue::{QueueReceiver, QueuedEvent};

/// Encode a queued event as one SSE `data:` frame.
pub fn sse_event(format: WireFormat, item: &QueuedEvent) -> Result<Event, Infallible> {
    let json = encode(format, item.seq, &item.event).unwrap_or_else(|e| {
        tracing::warn!(seq = item.seq, error = %e, "failed to encode event");
        "{}".into()
    });
    Ok(Event::default().data(json))
}

/// Stream a thread's live queue as an SSE body.
///
/// Liveness comes from `keepalive` events emitted by the thread itself, so no
/// transport-level keep-alive comments are added.
pub fn sse_response(
    rx: QueueReceiver,
    format: WireFormat,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static> {
    Sse::new(rx.into_stream().map(move |item| sse_event(format, &item)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_core::event::{EventKind, StreamEvent};

    #[test]
    fn sse_event_encodes_each_format() {
        let item = QueuedEvent {
            seq: 3,
            event: StreamEvent::new("t-1", EventKind::GraphStart),
        };
        assert!(sse_event(WireFormat::Envelope, &item).is_ok());
        assert!(sse_event(WireFormat::Legacy, &item).is_ok());
    }
}
