//! Integration tests for the kvm-mesh-core wire protocol.
//!
//! These exercise the public API the relay and the agents actually use:
//! building messages from topology output, framing them, and reading them
//! back on the other side.

use kvm_mesh_core::protocol::messages::{
    ChangeFocusMessage, ConnectMessage, DiscoveryKind, FocusReceivedMessage, MessageType,
    TransitionZoneAssignedMessage, API_VERSION,
};
use kvm_mesh_core::{
    compute_zones, decode_datagram, decode_frame, encode_datagram, encode_frame, DiscoveryMessage,
    DisplayBounds, InputEvent, Peer, RelayMessage, Vector2,
};
use uuid::Uuid;

#[test]
fn test_connect_frame_carries_all_displays() {
    // Arrange
    let msg = RelayMessage::Connect(ConnectMessage {
        hostname: "workstation".to_string(),
        peer_id: Uuid::new_v4(),
        displays: vec![
            DisplayBounds::new(0, 0, 2560, 1440),
            DisplayBounds::new(-1920, 200, 1920, 1080),
        ],
    });

    // Act
    let bytes = encode_frame(&msg).expect("encode must succeed");
    let decoded = decode_frame(&bytes).expect("decode must succeed");

    // Assert
    assert_eq!(bytes[0], MessageType::Connect as u8);
    assert_eq!(decoded, msg);
}

#[test]
fn test_zone_assignment_from_topology_survives_framing() {
    let a = Peer::new(Uuid::new_v4(), "a", vec![DisplayBounds::new(0, 0, 1920, 1080)]);
    let b = Peer::new(Uuid::new_v4(), "b", vec![DisplayBounds::new(1920, 0, 1920, 1080)]);
    let zones = compute_zones(&[a.clone(), b]);
    let msg = RelayMessage::TransitionZoneAssigned(TransitionZoneAssignedMessage {
        zones: zones[&a.id].clone(),
    });

    let decoded = decode_frame(&encode_frame(&msg).unwrap()).unwrap();

    assert_eq!(decoded, msg);
}

#[test]
fn test_focus_messages_decode_to_matching_variants() {
    let target = Uuid::new_v4();
    let change = RelayMessage::ChangeFocus(ChangeFocusMessage {
        target,
        cursor_pos: Vector2::new(1920, 500),
    });
    let received = RelayMessage::FocusReceived(FocusReceivedMessage {
        source_pos: Vector2::new(1920, 500),
    });

    match decode_frame(&encode_frame(&change).unwrap()).unwrap() {
        RelayMessage::ChangeFocus(m) => assert_eq!(m.target, target),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(decode_frame(&encode_frame(&received).unwrap()).unwrap(), received);
}

#[test]
fn test_input_event_is_forwarded_verbatim() {
    let mut event = InputEvent::new(1, 30, 1);
    event.time.sec = 1_700_000_000;
    event.time.usec = 123_456;

    let decoded = decode_frame(&encode_frame(&RelayMessage::InputEvent(event)).unwrap()).unwrap();

    assert_eq!(decoded, RelayMessage::InputEvent(event));
}

#[test]
fn test_release_focus_ignores_trailing_payload() {
    let decoded = decode_frame(&[3, b';', 0x80]).unwrap();

    assert_eq!(decoded, RelayMessage::ReleaseFocus);
}

#[test]
fn test_discovery_datagram_keeps_kind_as_u8() {
    let msg = DiscoveryMessage::announce("office", 1_700_000_000_000, 4283);

    let bytes = encode_datagram(&msg).unwrap();
    let decoded = decode_datagram(&bytes).unwrap();

    assert_eq!(decoded.kind, DiscoveryKind::ServerAnnounce);
    assert_eq!(decoded.api_version, API_VERSION);
    assert_eq!(decoded.server_port, 4283);
    assert_eq!(decoded, msg);
}

#[test]
fn test_garbage_datagram_is_rejected() {
    assert!(decode_datagram(b"hello there").is_err());
}
