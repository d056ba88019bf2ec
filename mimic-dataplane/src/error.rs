//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::warn;

// Data-plane configuration errors.
#[derive(Debug, Eq, PartialEq)]
pub enum Error {
    InvalidShaper(&'static str, String),
    InvalidImpairment(&'static str, String),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::InvalidShaper(field, reason)
            | Error::InvalidImpairment(field, reason) => {
                warn!(%field, %reason, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidShaper(..) => {
                write!(f, "invalid shaping configuration")
            }
            Error::InvalidImpairment(..) => {
                write!(f, "invalid impairment configuration")
            }
        }
    }
}

impl std::error::Error for Error {}
