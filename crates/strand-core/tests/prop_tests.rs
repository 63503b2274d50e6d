//! Property-based tests for previews and frame decoding.
//!
//! Covers:
//! 1. Previews stay within budget and never split a char
//! 2. Decoding arbitrary text never panics
//! 3. Both wire shapes normalize to the same event

use proptest::prelude::*;

use strand_core::envelope::{WireFormat, decode, encode};
use strand_core::event::{EventKind, StatePayload, StreamEvent};
use strand_core::preview::{TRUNCATION_MARKER, preview};

// ---------------------------------------------------------------------------
// 1. Preview bounds
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn preview_never_exceeds_budget(text in "\\PC{0,80}", max in 0..40usize) {
        let out = preview(&text, max);
        let chars = text.chars().count();
        if chars <= max {
            prop_assert_eq!(&out, &text);
        } else {
            prop_assert_eq!(out.chars().count(), max + 1);
            prop_assert!(out.ends_with(TRUNCATION_MARKER));
            prop_assert!(text.starts_with(out.trim_end_matches(TRUNCATION_MARKER)));
        }
    }
}

// ---------------------------------------------------------------------------
// 2. Decoding is total
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn decode_never_panics(data in "\\PC{0,120}") {
        let _ = decode(&data);
    }

    #[test]
    fn objects_without_known_type_are_skipped(
        ty in "[a-z_]{1,12}",
        thread in "[a-z0-9-]{0,8}",
    ) {
        let known = [
            "graph_start", "content_chunk", "node_start", "node_end", "llm_start", "llm_end",
            "tool_start", "tool_end", "state_update", "state_snapshot", "graph_end",
            "keepalive", "error",
        ];
        prop_assume!(!known.contains(&ty.as_str()));
        let data = serde_json::json!({"type": ty, "thread_id": thread}).to_string();
        prop_assert!(decode(&data).is_none());
    }
}

// ---------------------------------------------------------------------------
// 3. Shape normalization
// ---------------------------------------------------------------------------

fn arb_kind() -> impl Strategy<Value = EventKind> {
    let name = "[a-z]{1,8}";
    prop_oneof![
        Just(EventKind::GraphStart),
        Just(EventKind::Keepalive),
        "\\PC{0,20}".prop_map(|content| EventKind::ContentChunk { content }),
        (name, proptest::option::of("\\PC{0,10}")).prop_map(|(node, input_preview)| {
            EventKind::NodeStart { node, input_preview }
        }),
        (
            prop::collection::vec(name, 0..3),
            prop::collection::vec(name, 0..3),
            0..100u64,
        )
            .prop_map(|(next, visited_nodes, message_count)| {
                EventKind::StateUpdate(StatePayload {
                    next,
                    visited_nodes,
                    message_count,
                    report_state: None,
                })
            }),
        "\\PC{0,20}".prop_map(|response| EventKind::GraphEnd { response }),
        (name, name).prop_map(|(error, error_type)| EventKind::Error { error, error_type }),
    ]
}

proptest! {
    #[test]
    fn envelope_and_legacy_carry_the_same_event(
        kind in arb_kind(),
        thread in "[a-z0-9-]{1,12}",
        seq in 1..10_000u64,
    ) {
        let event = StreamEvent::new(thread, kind);
        let env = decode(&encode(WireFormat::Envelope, seq, &event).unwrap()).unwrap();
        let legacy = decode(&encode(WireFormat::Legacy, seq, &event).unwrap()).unwrap();

        prop_assert_eq!(&env.event, &event);
        prop_assert_eq!(&legacy.event, &event);
        prop_assert_eq!(env.seq, Some(seq));
        prop_assert_eq!(legacy.seq, None);
    }
}
