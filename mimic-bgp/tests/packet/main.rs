//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod keepalive;
mod notification;
mod open;
mod update;

use mimic_bgp::packet::message::{DecodeCxt, EncodeCxt, Message};

//
// Helper functions.
//

fn test_encode_msg_cxt(
    bytes_expected: &[u8],
    msg: &Message,
    cxt: &EncodeCxt,
) {
    let bytes_actual = msg.encode(cxt);
    assert_eq!(bytes_expected, bytes_actual.as_ref());
}

fn test_decode_msg_cxt(bytes: &[u8], msg_expected: &Message, cxt: &DecodeCxt) {
    let msg_actual = Message::decode(bytes, cxt).unwrap();
    assert_eq!(*msg_expected, msg_actual);
}

fn test_encode_msg(bytes_expected: &[u8], msg: &Message) {
    test_encode_msg_cxt(bytes_expected, msg, &EncodeCxt::default());
}

fn test_decode_msg(bytes: &[u8], msg_expected: &Message) {
    test_decode_msg_cxt(bytes, msg_expected, &DecodeCxt::default());
}
