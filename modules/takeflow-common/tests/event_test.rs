//! Event record ergonomics. No runtime needed.

use serde_json::json;
use takeflow_common::Event;

#[test]
fn event_minimal_construction() {
    let event = Event::new("TEST_ACTION");
    assert_eq!(event.event_type, "TEST_ACTION");
    assert!(event.payload.is_null());
    assert!(event.field("id").is_none());
}

#[test]
fn event_payload_fields_are_readable() {
    let event = Event::new("USER_LOADED").with_payload(json!({"id": 10, "name": "ada"}));
    assert_eq!(event.field("id"), Some(&json!(10)));
    assert_eq!(event.field("name"), Some(&json!("ada")));
}

#[test]
fn event_serializes_with_type_discriminant() {
    let event = Event::new("USER_LOADED").with_payload(json!({"id": 10}));
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value, json!({"type": "USER_LOADED", "payload": {"id": 10}}));

    let back: Event = serde_json::from_value(value).unwrap();
    assert_eq!(back, event);
}

#[test]
fn event_without_payload_omits_it() {
    let json = serde_json::to_string(&Event::new("PING")).unwrap();
    assert_eq!(json, r#"{"type":"PING"}"#);

    let back: Event = serde_json::from_str(r#"{"type":"PING"}"#).unwrap();
    assert!(back.payload.is_null());
}
