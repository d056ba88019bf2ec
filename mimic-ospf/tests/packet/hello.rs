//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::LazyLock as Lazy;

use const_addrs::ip4;
use mimic_ospf::packet::{HelloPkt, Packet, PacketHdr, PacketType};

use super::{test_decode_packet, test_encode_packet};

static HELLO1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x01, 0x00, 0x30, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00, 0x00,
            0x00, 0xf6, 0x94, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0xff, 0xff, 0xff, 0x00, 0x00, 0x0a, 0x02, 0x01, 0x00,
            0x00, 0x00, 0x28, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x02, 0x02, 0x02, 0x02,
        ],
        Packet::Hello(HelloPkt {
            hdr: PacketHdr {
                pkt_type: PacketType::Hello,
                router_id: ip4!("1.1.1.1"),
                area_id: ip4!("0.0.0.0"),
            },
            network_mask: ip4!("255.255.255.0"),
            hello_interval: 10,
            options: 0x02,
            priority: 1,
            dead_interval: 40,
            dr: None,
            bdr: None,
            neighbors: vec![ip4!("2.2.2.2")],
        }),
    )
});

#[test]
fn test_encode_hello1() {
    let (ref bytes, ref packet) = *HELLO1;
    test_encode_packet(bytes, packet);
}

#[test]
fn test_decode_hello1() {
    let (ref bytes, ref packet) = *HELLO1;
    test_decode_packet(bytes, packet);
}

#[test]
fn test_decode_hello_bad_checksum() {
    let (ref bytes, _) = *HELLO1;
    let mut corrupted = bytes.clone();
    corrupted[12] ^= 0xff;
    assert!(Packet::decode(&corrupted).is_err());
}
