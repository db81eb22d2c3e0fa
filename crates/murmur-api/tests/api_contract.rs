use murmur_api::{
    validate_media_blob, validate_message, validate_outgoing, Message, MessageId, MessageKind,
    PushFrame, RoomId, RowEvent, UserId, ValidationError, ValidationLimits,
};
use serde_json::json;

fn limits() -> ValidationLimits {
    ValidationLimits {
        max_text_bytes: 16,
        max_media_bytes: 8,
    }
}

fn row() -> Message {
    Message {
        id: MessageId::new("m-1"),
        sender_id: UserId::new("alice"),
        receiver_id: UserId::new("bob"),
        content: "hi".to_string(),
        created_at: 42,
        kind: MessageKind::Text,
        media_ref: None,
        read: false,
    }
}

#[test]
fn room_id_is_order_independent() {
    let a = UserId::new("zed");
    let b = UserId::new("amy");
    assert_eq!(RoomId::for_pair(&a, &b), RoomId::for_pair(&b, &a));
    assert_eq!(RoomId::for_pair(&a, &b).value, "amy_zed");
}

#[test]
fn provisional_ids_carry_prefix() {
    let id = MessageId::provisional();
    assert!(id.is_provisional());
    assert!(!MessageId::random().is_provisional());
}

#[test]
fn message_row_uses_store_column_names() {
    let mut message = row();
    message.kind = MessageKind::Image;
    message.media_ref = Some("https://media/1.jpg".to_string());
    let value = serde_json::to_value(&message).expect("serialize");
    assert_eq!(value["type"], "image");
    assert_eq!(value["file_url"], "https://media/1.jpg");
    assert_eq!(value["sender_id"], "alice");
}

#[test]
fn message_row_defaults_missing_kind_and_read() {
    let value = json!({
        "id": "m-2",
        "sender_id": "bob",
        "receiver_id": "alice",
        "content": "yo",
        "created_at": 7
    });
    let message: Message = serde_json::from_value(value).expect("decode");
    assert_eq!(message.kind, MessageKind::Text);
    assert!(!message.read);
    assert!(message.media_ref.is_none());
}

#[test]
fn push_frame_tagging_is_stable() {
    let frame = PushFrame::inserted(row());
    let value = serde_json::to_value(&frame).expect("serialize");
    assert_eq!(value["type"], "row_change");
    assert_eq!(value["event"], "INSERT");
    assert_eq!(value["record"]["id"], "m-1");

    let typing = serde_json::to_value(PushFrame::typing(UserId::new("bob"))).expect("typing");
    assert_eq!(
        typing,
        json!({"type": "broadcast", "event": "typing", "payload": {"user_id": "bob"}})
    );

    let decoded: PushFrame = serde_json::from_value(json!({
        "type": "row_change",
        "event": "UPDATE",
        "record": serde_json::to_value(row()).expect("row")
    }))
    .expect("decode");
    assert!(matches!(
        decoded,
        PushFrame::RowChange {
            event: RowEvent::Update,
            ..
        }
    ));
}

#[test]
fn incoming_rows_are_shape_checked() {
    assert!(validate_message(&row()).is_ok());

    let mut self_addressed = row();
    self_addressed.receiver_id = UserId::new("alice");
    assert_eq!(
        validate_message(&self_addressed),
        Err(ValidationError::SelfAddressed)
    );

    let mut media_without_ref = row();
    media_without_ref.kind = MessageKind::Audio;
    assert_eq!(
        validate_message(&media_without_ref),
        Err(ValidationError::MissingContent)
    );

    let mut provisional = row();
    provisional.id = MessageId::provisional();
    assert_eq!(
        validate_message(&provisional),
        Err(ValidationError::ProvisionalId)
    );
}

#[test]
fn outgoing_content_rules() {
    assert!(validate_outgoing("hello", MessageKind::Text, None, &limits()).is_ok());
    assert_eq!(
        validate_outgoing("   ", MessageKind::Text, None, &limits()),
        Err(ValidationError::MissingContent)
    );
    assert_eq!(
        validate_outgoing("this text is far too long", MessageKind::Text, None, &limits()),
        Err(ValidationError::TooLong("content"))
    );
    assert_eq!(
        validate_outgoing("hi", MessageKind::Text, Some("ref"), &limits()),
        Err(ValidationError::UnexpectedMedia)
    );
    assert!(validate_outgoing("Image", MessageKind::Image, Some("ref"), &limits()).is_ok());
}

#[test]
fn media_blob_limits() {
    assert!(validate_media_blob(MessageKind::Audio, 8, &limits()).is_ok());
    assert_eq!(
        validate_media_blob(MessageKind::Image, 9, &limits()),
        Err(ValidationError::TooLong("blob"))
    );
    assert_eq!(
        validate_media_blob(MessageKind::Text, 1, &limits()),
        Err(ValidationError::UnexpectedMedia)
    );
}
