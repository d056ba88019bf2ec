//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod dbdesc;
mod hello;

use mimic_ospf::packet::Packet;

//
// Helper functions.
//

fn test_encode_packet(bytes_expected: &[u8], packet: &Packet) {
    let bytes_actual = packet.encode();
    assert_eq!(bytes_expected, bytes_actual.as_ref());
}

fn test_decode_packet(bytes: &[u8], packet_expected: &Packet) {
    let packet_actual = Packet::decode(bytes).unwrap();
    assert_eq!(*packet_expected, packet_actual);
}
