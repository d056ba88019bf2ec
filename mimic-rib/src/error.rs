//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::warn;

// RIB errors.
#[derive(Debug, Eq, PartialEq)]
pub enum Error {
    InvalidPrefix(String, u8),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::InvalidPrefix(addr, len) => {
                warn!(%addr, %len, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidPrefix(..) => {
                write!(f, "invalid route prefix")
            }
        }
    }
}

impl std::error::Error for Error {}
