// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use wp2p_wire::{Event, MessageKind, Priority};

#[test]
fn device_found_event_parses_field_by_field() {
    let line = "<3>P2P-DEVICE-FOUND 96:e9:79:05:bc:c7 p2p_dev_addr=96:e9:79:05:bc:c7 \
                name='DIRECT-x' config_methods=0x80 [ foo | bar ]";
    let event = Event::parse(line).unwrap();
    assert_eq!(event.priority, Priority::Warning);
    assert_eq!(event.kind, MessageKind::P2pDeviceFound);
    assert_eq!(event.args, vec!["96:e9:79:05:bc:c7".to_string()]);
    assert_eq!(event.named("p2p_dev_addr"), Some("96:e9:79:05:bc:c7"));
    assert_eq!(event.named("name"), Some("'DIRECT-x'"));
    assert_eq!(event.named("config_methods"), Some("0x80"));
    assert_eq!(event.flags, vec!["foo".to_string(), "bar".to_string()]);
}

#[test]
fn parse_serialise_parse_is_stable() {
    let line = "<3>P2P-DEVICE-FOUND 96:e9:79:05:bc:c7 p2p_dev_addr=96:e9:79:05:bc:c7 \
                name='DIRECT-x' config_methods=0x80 [ foo | bar ]";
    let event = Event::parse(line).unwrap();
    let reparsed = Event::parse(&event.to_line()).unwrap();
    assert_eq!(reparsed.priority, event.priority);
    assert_eq!(reparsed.kind, event.kind);
    assert_eq!(reparsed.args, event.args);
    assert_eq!(reparsed.named, event.named);
    assert_eq!(reparsed.flags, event.flags);
}
