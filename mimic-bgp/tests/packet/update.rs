//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::LazyLock as Lazy;

use const_addrs::{ip4, net4};
use maplit::btreeset;
use mimic_bgp::packet::attribute::{AsPath, Attrs};
use mimic_bgp::packet::consts::Origin;
use mimic_bgp::packet::message::{
    DecodeCxt, EncodeCxt, Message, ReachNlri, UnreachNlri, UpdateMsg,
};

use super::{
    test_decode_msg, test_decode_msg_cxt, test_encode_msg,
    test_encode_msg_cxt,
};

// Withdraw-only UPDATE.
static UPDATE1: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x1b, 0x02, 0x00, 0x04, 0x18,
            0x0a, 0x00, 0x01, 0x00, 0x00,
        ],
        Message::Update(UpdateMsg {
            reach: None,
            unreach: Some(UnreachNlri {
                prefixes: vec![net4!("10.0.1.0/24")],
            }),
            attrs: None,
        }),
    )
});

// Reachable UPDATE with 2-octet AS encoding.
static UPDATE2: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x36, 0x02, 0x00, 0x00, 0x00,
            0x1b,
            // ORIGIN: IGP.
            0x40, 0x01, 0x01, 0x00,
            // AS_PATH: sequence [65001, 65002].
            0x40, 0x02, 0x06, 0x02, 0x02, 0xfd, 0xe9, 0xfd, 0xea,
            // NEXT_HOP: 10.0.0.1.
            0x40, 0x03, 0x04, 0x0a, 0x00, 0x00, 0x01,
            // COMMUNITIES: 65001:100.
            0xc0, 0x08, 0x04, 0xfd, 0xe9, 0x00, 0x64,
            // NLRI: 192.168.100.0/24.
            0x18, 0xc0, 0xa8, 0x64,
        ],
        Message::Update(UpdateMsg {
            reach: Some(ReachNlri {
                prefixes: vec![net4!("192.168.100.0/24")],
                nexthop: ip4!("10.0.0.1"),
            }),
            unreach: None,
            attrs: Some(Attrs {
                origin: Origin::Igp,
                as_path: AsPath::from_sequence([65001, 65002]),
                nexthop: Some(ip4!("10.0.0.1")),
                med: None,
                local_pref: None,
                communities: Some(btreeset![0xfde90064]),
            }),
        }),
    )
});

// Reachable UPDATE with negotiated 4-octet AS encoding.
static UPDATE3: Lazy<(Vec<u8>, Message)> = Lazy::new(|| {
    (
        vec![
            0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff, 0xff, 0x00, 0x33, 0x02, 0x00, 0x00, 0x00,
            0x18,
            // ORIGIN: IGP.
            0x40, 0x01, 0x01, 0x00,
            // AS_PATH: sequence [65001, 65002], 4-octet members.
            0x40, 0x02, 0x0a, 0x02, 0x02, 0x00, 0x00, 0xfd, 0xe9, 0x00, 0x00,
            0xfd, 0xea,
            // NEXT_HOP: 10.0.0.1.
            0x40, 0x03, 0x04, 0x0a, 0x00, 0x00, 0x01,
            // NLRI: 10.0.2.0/24.
            0x18, 0x0a, 0x00, 0x02,
        ],
        Message::Update(UpdateMsg {
            reach: Some(ReachNlri {
                prefixes: vec![net4!("10.0.2.0/24")],
                nexthop: ip4!("10.0.0.1"),
            }),
            unreach: None,
            attrs: Some(Attrs {
                origin: Origin::Igp,
                as_path: AsPath::from_sequence([65001, 65002]),
                nexthop: Some(ip4!("10.0.0.1")),
                med: None,
                local_pref: None,
                communities: None,
            }),
        }),
    )
});

#[test]
fn test_encode_update1() {
    let (ref bytes, ref msg) = *UPDATE1;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_update1() {
    let (ref bytes, ref msg) = *UPDATE1;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_update2() {
    let (ref bytes, ref msg) = *UPDATE2;
    test_encode_msg(bytes, msg);
}

#[test]
fn test_decode_update2() {
    let (ref bytes, ref msg) = *UPDATE2;
    test_decode_msg(bytes, msg);
}

#[test]
fn test_encode_update3() {
    let (ref bytes, ref msg) = *UPDATE3;
    test_encode_msg_cxt(bytes, msg, &EncodeCxt {
        four_octet_as: true,
    });
}

#[test]
fn test_decode_update3() {
    let (ref bytes, ref msg) = *UPDATE3;
    test_decode_msg_cxt(bytes, msg, &DecodeCxt {
        four_octet_as: true,
    });
}
