//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use bytes::Bytes;

use crate::protocol::RouteSource;

/// Messages from a protocol instance to the virtual session fabric.
///
/// Sessions are in-process: the daemon owns the fabric that pairs local
/// instances with peer stubs or test harnesses. PDUs travel fully encoded,
/// so everything on this channel is wire-format conformant.
#[derive(Clone, Debug)]
pub enum WireMsg {
    /// Request transport establishment toward `peer`.
    Connect { protocol: RouteSource, peer: String },
    /// Tear down the transport toward `peer`.
    Disconnect { protocol: RouteSource, peer: String },
    /// Send an encoded PDU to `peer`.
    Data {
        protocol: RouteSource,
        peer: String,
        data: Bytes,
    },
}
