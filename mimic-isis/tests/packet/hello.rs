//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::sync::LazyLock as Lazy;

use mimic_isis::packet::SystemId;
use mimic_isis::packet::pdu::{
    AdjStateTlv, AdjThreeWayState, Hello, HelloTlvs, NLPID_IPV4, Pdu,
};

use super::{test_decode_pdu, test_encode_pdu};

static HELLO1: Lazy<(Vec<u8>, Pdu)> = Lazy::new(|| {
    (
        vec![
            0x83, 0x14, 0x01, 0x00, 0x11, 0x01, 0x00, 0x00, 0x03, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x01, 0x00, 0x1e, 0x00, 0x2a, 0x01, 0x01, 0x04,
            0x03, 0x49, 0x00, 0x01, 0x81, 0x01, 0xcc, 0x84, 0x04, 0x0a, 0x00,
            0x00, 0x01, 0xf0, 0x05, 0x02, 0x00, 0x00, 0x00, 0x01,
        ],
        Pdu::Hello(Hello {
            circuit_type: 3,
            source: SystemId::new([0, 0, 0, 0, 0, 1]),
            holdtime: 30,
            local_circuit_id: 1,
            tlvs: HelloTlvs {
                area_addrs: vec!["49.0001".parse().unwrap()],
                protocols_supported: vec![NLPID_IPV4],
                ipv4_addrs: vec![Ipv4Addr::new(10, 0, 0, 1)],
                adj_state: Some(AdjStateTlv {
                    state: AdjThreeWayState::Down,
                    ext_circuit_id: 1,
                    neighbor: None,
                }),
            },
        }),
    )
});

#[test]
fn test_encode_hello1() {
    let (ref bytes, ref pdu) = *HELLO1;
    test_encode_pdu(bytes, pdu);
}

#[test]
fn test_decode_hello1() {
    let (ref bytes, ref pdu) = *HELLO1;
    test_decode_pdu(bytes, pdu);
}

#[test]
fn test_decode_hello_truncated() {
    let (ref bytes, _) = *HELLO1;
    assert!(Pdu::decode(&bytes[..12]).is_err());
}
