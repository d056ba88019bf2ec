//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use bytes::TryGetError;
use serde::{Deserialize, Serialize};

pub type DecodeResult<T> = Result<T, DecodeError>;

// IS-IS PDU decoding errors.
//
// Malformed PDUs are silently discarded per ISO 10589; these errors only
// feed the per-instance error counters.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum DecodeError {
    ReadOutOfBounds,
    InvalidIrdpDiscriminator(u8),
    InvalidVersion(u8),
    InvalidIdLength(u8),
    UnknownPduType(u8),
    InvalidPduLength(u16),
    InvalidTlvLength(u8),
    InvalidLspChecksum,
}

// ===== impl DecodeError =====

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::ReadOutOfBounds => {
                write!(f, "attempt to read out of bounds")
            }
            DecodeError::InvalidIrdpDiscriminator(value) => {
                write!(f, "invalid IRDP discriminator: {value}")
            }
            DecodeError::InvalidVersion(version) => {
                write!(f, "invalid version: {version}")
            }
            DecodeError::InvalidIdLength(len) => {
                write!(f, "invalid ID length: {len}")
            }
            DecodeError::UnknownPduType(pdu_type) => {
                write!(f, "unknown PDU type: {pdu_type}")
            }
            DecodeError::InvalidPduLength(len) => {
                write!(f, "invalid PDU length: {len}")
            }
            DecodeError::InvalidTlvLength(len) => {
                write!(f, "invalid TLV length: {len}")
            }
            DecodeError::InvalidLspChecksum => {
                write!(f, "invalid LSP checksum")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<TryGetError> for DecodeError {
    fn from(_error: TryGetError) -> DecodeError {
        DecodeError::ReadOutOfBounds
    }
}
