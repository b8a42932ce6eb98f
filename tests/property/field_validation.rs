// Test-specific lint overrides: property tests use unwrap/expect freely.
#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Property-based tests for the task field primitives and the codec.
//!
//! Uses proptest to verify:
//! 1. `Color::parse` accepts exactly `#` plus six hex digits and normalises
//!    to lower case.
//! 2. Status and priority names outside the known sets are rejected.
//! 3. `TaskId` text form parses back to the same id.
//! 4. Random bytes never cause a panic in `decode`.
//! 5. `decode_bounded` rejects every frame over the limit before decoding.
//! 6. Arbitrary raw mutation input survives the wire unchanged, so the
//!    server validates exactly what the client sent.

use boardsync_proto::codec::{self, CodecError};
use boardsync_proto::mutation::{MutationRequest, TaskFields};
use boardsync_proto::task::{Color, Priority, TaskId, TaskStatus};
use boardsync_proto::wire::{ClientMessage, ServerMessage};
use proptest::prelude::*;
use uuid::Uuid;

fn arb_fields() -> impl Strategy<Value = TaskFields> {
    (
        prop::option::of(".{0,64}"),
        prop::option::of(prop::option::of(".{0,64}")),
        prop::option::of(prop::option::of("[a-z0-9]{1,8}")),
        prop::option::of(any::<i64>()),
        prop::option::of("[a-z_]{0,12}"),
        prop::option::of("[a-z_]{0,12}"),
        prop::option::of(prop::option::of("#?[0-9a-zA-Z]{0,8}")),
        prop::option::of(prop::option::of("[0-9-]{0,12}")),
    )
        .prop_map(
            |(title, description, assignee_id, weight, priority, status, color, due_date)| {
                TaskFields {
                    title,
                    description,
                    assignee_id,
                    weight,
                    priority,
                    status,
                    color,
                    due_date,
                }
            },
        )
}

proptest! {
    #[test]
    fn six_hex_digits_parse_to_lower_case(hex in "[0-9a-fA-F]{6}") {
        let color = Color::parse(&format!("#{hex}")).unwrap();
        prop_assert_eq!(color.as_str(), format!("#{}", hex.to_ascii_lowercase()));
    }

    #[test]
    fn anything_else_is_not_a_color(raw in ".{0,10}") {
        let well_formed = raw.len() == 7
            && raw.starts_with('#')
            && raw.chars().skip(1).all(|c| c.is_ascii_hexdigit());
        prop_assert_eq!(Color::parse(&raw).is_ok(), well_formed);
    }

    #[test]
    fn unknown_status_and_priority_names_are_rejected(raw in "[a-z_ ]{0,16}") {
        let known_status = TaskStatus::ALL.iter().any(|s| s.as_str() == raw);
        let known_priority = Priority::ALL.iter().any(|p| p.as_str() == raw);
        prop_assert_eq!(raw.parse::<TaskStatus>().is_ok(), known_status);
        prop_assert_eq!(raw.parse::<Priority>().is_ok(), known_priority);
    }

    #[test]
    fn task_id_text_form_parses_back(n in any::<u128>()) {
        let id = TaskId::from_uuid(Uuid::from_u128(n));
        let parsed: TaskId = id.to_string().parse().unwrap();
        prop_assert_eq!(parsed, id);
    }

    #[test]
    fn random_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode::<ClientMessage>(&bytes);
        let _ = codec::decode::<ServerMessage>(&bytes);
    }

    #[test]
    fn oversized_frames_are_rejected(len in 1usize..2048, max in 0usize..1024) {
        let bytes = vec![0u8; len];
        let result = codec::decode_bounded::<ClientMessage>(&bytes, max);
        if len > max {
            let is_too_large = matches!(
                result,
                Err(CodecError::FrameTooLarge { size, max: m }) if size == len && m == max
            );
            prop_assert!(is_too_large);
        } else {
            let is_too_large = matches!(result, Err(CodecError::FrameTooLarge { .. }));
            prop_assert!(!is_too_large);
        }
    }

    #[test]
    fn raw_mutation_input_survives_the_wire(request_id in any::<u64>(), fields in arb_fields()) {
        let msg = ClientMessage::Mutate {
            request_id,
            request: MutationRequest::create("proj-1", fields),
        };
        let decoded: ClientMessage = codec::decode(&codec::encode(&msg).unwrap()).unwrap();
        prop_assert_eq!(decoded, msg);
    }
}
