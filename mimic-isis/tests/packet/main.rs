//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod hello;

use mimic_isis::packet::pdu::Pdu;

//
// Helper functions.
//

fn test_encode_pdu(bytes_expected: &[u8], pdu: &Pdu) {
    let bytes_actual = pdu.encode();
    assert_eq!(bytes_expected, bytes_actual.as_ref());
}

fn test_decode_pdu(bytes: &[u8], pdu_expected: &Pdu) {
    let pdu_actual = Pdu::decode(bytes).unwrap();
    assert_eq!(*pdu_expected, pdu_actual);
}
