//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::LazyLock as Lazy;

use const_addrs::ip4;
use mimic_ospf::packet::{
    DbDescFlags, DbDescPkt, Packet, PacketHdr, PacketType,
};

use super::{test_decode_packet, test_encode_packet};

// Initial negotiation DD: I|M|MS set, no LSA headers.
static DBDESC1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x02, 0x00, 0x20, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00, 0x00,
            0x00, 0xe3, 0xf7, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x05, 0xdc, 0x02, 0x07, 0x00, 0x00, 0x10, 0x01,
        ],
        Packet::DbDesc(DbDescPkt {
            hdr: PacketHdr {
                pkt_type: PacketType::DbDesc,
                router_id: ip4!("1.1.1.1"),
                area_id: ip4!("0.0.0.0"),
            },
            mtu: 1500,
            options: 0x02,
            dd_flags: DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS,
            dd_seq_no: 0x1001,
            lsa_hdrs: vec![],
        }),
    )
});

#[test]
fn test_encode_dbdesc1() {
    let (ref bytes, ref packet) = *DBDESC1;
    test_encode_packet(bytes, packet);
}

#[test]
fn test_decode_dbdesc1() {
    let (ref bytes, ref packet) = *DBDESC1;
    test_decode_packet(bytes, packet);
}
