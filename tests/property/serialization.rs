//! Property-based tests of the wire format.
//!
//! Uses proptest to verify:
//! 1. Any server frame survives encode → decode.
//! 2. Any client frame survives encode → decode.
//! 3. Random text never causes a panic in either decoder.
//! 4. Frames with unknown extra fields still decode.
//! 5. Status changes only ever move forward.
//! 6. Content validation rejects blank and oversized text only.

use chrono::{DateTime, Utc};
use proptest::prelude::*;
use tandem_proto::codec;
use tandem_proto::envelope::{InboundEvent, OutboundEvent};
use tandem_proto::message::*;
use tandem_proto::presence::{DeletedNotice, PresenceNotice, ReadReceipt};
use tandem_proto::typing::TypingNotice;

// --- Strategies for protocol types ---

fn arb_id() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-]{1,36}"
}

fn arb_message_id() -> impl Strategy<Value = MessageId> {
    arb_id().prop_map(MessageId::new)
}

fn arb_user_id() -> impl Strategy<Value = UserId> {
    arb_id().prop_map(UserId::new)
}

fn arb_conversation_id() -> impl Strategy<Value = ConversationId> {
    arb_id().prop_map(ConversationId::new)
}

fn arb_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    // 1970 .. 2100, millisecond precision.
    (0i64..4_102_444_800_000)
        .prop_map(|ms| DateTime::from_timestamp_millis(ms).unwrap_or_default())
}

fn arb_status() -> impl Strategy<Value = MessageStatus> {
    prop_oneof![
        Just(MessageStatus::Sent),
        Just(MessageStatus::Delivered),
        Just(MessageStatus::Read),
    ]
}

fn arb_message() -> impl Strategy<Value = Message> {
    (
        arb_message_id(),
        arb_conversation_id(),
        arb_user_id(),
        "\\PC{0,256}",
        arb_status(),
        arb_timestamp(),
    )
        .prop_map(
            |(id, conversation_id, sender_id, content, status, created_at)| Message {
                id,
                conversation_id,
                sender_id,
                content,
                message_type: MessageType::Text,
                status,
                created_at,
            },
        )
}

fn arb_typing_notice() -> impl Strategy<Value = TypingNotice> {
    (arb_conversation_id(), arb_user_id(), any::<bool>()).prop_map(
        |(conversation_id, user_id, is_typing)| TypingNotice {
            conversation_id,
            user_id,
            is_typing,
        },
    )
}

fn arb_inbound() -> impl Strategy<Value = InboundEvent> {
    prop_oneof![
        arb_message().prop_map(InboundEvent::NewMessage),
        (
            arb_conversation_id(),
            arb_user_id(),
            proptest::option::of(arb_message_id())
        )
            .prop_map(|(conversation_id, user_id, message_id)| {
                InboundEvent::MessageRead(ReadReceipt {
                    conversation_id,
                    user_id,
                    message_id,
                })
            }),
        arb_typing_notice().prop_map(InboundEvent::Typing),
        arb_typing_notice().prop_map(InboundEvent::StopTyping),
        arb_user_id().prop_map(|user_id| InboundEvent::UserOnline(PresenceNotice { user_id })),
        arb_user_id().prop_map(|user_id| InboundEvent::UserOffline(PresenceNotice { user_id })),
        (arb_conversation_id(), arb_message_id()).prop_map(|(conversation_id, message_id)| {
            InboundEvent::MessageDeleted(DeletedNotice {
                conversation_id,
                message_id,
            })
        }),
    ]
}

fn arb_outbound() -> impl Strategy<Value = OutboundEvent> {
    (arb_conversation_id(), any::<bool>()).prop_map(|(conversation_id, typing)| {
        if typing {
            OutboundEvent::typing(conversation_id)
        } else {
            OutboundEvent::stop_typing(conversation_id)
        }
    })
}

// --- Properties ---

proptest! {
    #[test]
    fn inbound_frames_survive_the_wire(frame in arb_inbound()) {
        let text = codec::encode_inbound(&frame).unwrap();
        let decoded = codec::decode_inbound(&text).unwrap();
        prop_assert_eq!(decoded, frame);
    }

    #[test]
    fn outbound_frames_survive_the_wire(frame in arb_outbound()) {
        let text = codec::encode_outbound(&frame).unwrap();
        let decoded = codec::decode_outbound(&text).unwrap();
        prop_assert_eq!(decoded, frame);
    }

    #[test]
    fn random_text_never_panics(text in "\\PC{0,512}") {
        let _ = codec::decode_inbound(&text);
        let _ = codec::decode_outbound(&text);
    }

    #[test]
    fn random_json_objects_never_panic(
        kind in "[a-z_]{0,16}",
        data in prop::collection::hash_map("[a-z_]{1,12}", "[a-zA-Z0-9 ]{0,12}", 0..6),
    ) {
        let text = serde_json::json!({ "type": kind, "data": data }).to_string();
        let _ = codec::decode_inbound(&text);
        let _ = codec::decode_outbound(&text);
    }

    #[test]
    fn unknown_fields_are_ignored(frame in arb_inbound(), extra in "[a-z]{1,8}") {
        let mut value = serde_json::to_value(&frame).unwrap();
        value["data"][format!("x_{extra}")] = serde_json::json!(42);
        value[format!("x_{extra}")] = serde_json::json!("ignored");
        let decoded = codec::decode_inbound(&value.to_string()).unwrap();
        prop_assert_eq!(decoded, frame);
    }

    #[test]
    fn status_never_moves_back(start in arb_status(), steps in prop::collection::vec(arb_status(), 0..8)) {
        let mut status = start;
        for step in steps {
            let before = status;
            let changed = status.advance(step);
            prop_assert!(status >= before);
            prop_assert_eq!(changed, step > before);
        }
    }

    #[test]
    fn blank_content_is_rejected(content in "[ \t\n\r]{0,32}") {
        prop_assert_eq!(validate_content(&content), Err(ValidationError::Empty));
    }

    #[test]
    fn visible_content_within_limit_is_accepted(content in "[ ]{0,8}[a-zA-Z¿?¡!]{1,64}[ ]{0,8}") {
        prop_assert!(validate_content(&content).is_ok());
    }

    #[test]
    fn oversized_content_is_rejected(extra in 1usize..1024) {
        let content = "a".repeat(MAX_MESSAGE_SIZE + extra);
        let rejected = matches!(
            validate_content(&content),
            Err(ValidationError::TooLarge { size, max }) if size == content.len() && max == MAX_MESSAGE_SIZE
        );
        prop_assert!(rejected);
    }
}
