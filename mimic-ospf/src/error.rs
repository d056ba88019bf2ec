//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::packet::error::DecodeError;

// OSPF errors.
#[derive(Debug)]
#[derive(Deserialize, Serialize)]
pub enum Error {
    PacketDecodeError(String, DecodeError),
    InterfaceUnknown(String),
    NbrUnknown(Ipv4Addr),
    AreaMismatch(Ipv4Addr, Ipv4Addr),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::PacketDecodeError(ifname, error) => {
                warn!(%ifname, %error, "{}", self);
            }
            Error::InterfaceUnknown(ifname) => {
                warn!(%ifname, "{}", self);
            }
            Error::NbrUnknown(router_id) => {
                warn!(%router_id, "{}", self);
            }
            Error::AreaMismatch(received, expected) => {
                warn!(%received, %expected, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::PacketDecodeError(..) => {
                write!(f, "failed to decode packet")
            }
            Error::InterfaceUnknown(..) => {
                write!(f, "unknown interface")
            }
            Error::NbrUnknown(..) => {
                write!(f, "unknown neighbor")
            }
            Error::AreaMismatch(..) => {
                write!(f, "area mismatch")
            }
        }
    }
}

impl std::error::Error for Error {}
