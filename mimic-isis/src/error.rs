//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::packet::error::DecodeError;

// IS-IS errors.
#[derive(Debug)]
#[derive(Deserialize, Serialize)]
pub enum Error {
    PduDecodeError(String, DecodeError),
    InterfaceUnknown(String),
    AreaMismatch(String),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::PduDecodeError(ifname, error) => {
                warn!(%ifname, %error, "{}", self);
            }
            Error::InterfaceUnknown(ifname) => {
                warn!(%ifname, "{}", self);
            }
            Error::AreaMismatch(ifname) => {
                warn!(%ifname, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::PduDecodeError(..) => {
                write!(f, "failed to decode PDU")
            }
            Error::InterfaceUnknown(..) => {
                write!(f, "unknown interface")
            }
            Error::AreaMismatch(..) => {
                write!(f, "area mismatch")
            }
        }
    }
}

impl std::error::Error for Error {}
