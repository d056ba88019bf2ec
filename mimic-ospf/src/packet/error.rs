//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use bytes::TryGetError;
use serde::{Deserialize, Serialize};

pub type DecodeResult<T> = Result<T, DecodeError>;

// OSPF message decoding errors.
//
// Malformed packets are silently discarded per RFC 2328; these errors only
// feed the per-instance error counters.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum DecodeError {
    ReadOutOfBounds,
    InvalidVersion(u8),
    UnknownPacketType(u8),
    InvalidChecksum,
    InvalidLength(u16),
    UnknownLsaType(u8),
    InvalidLsaChecksum,
    InvalidLsaLength(u16),
}

// ===== impl DecodeError =====

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::ReadOutOfBounds => {
                write!(f, "attempt to read out of bounds")
            }
            DecodeError::InvalidVersion(version) => {
                write!(f, "invalid version: {version}")
            }
            DecodeError::UnknownPacketType(pkt_type) => {
                write!(f, "unknown packet type: {pkt_type}")
            }
            DecodeError::InvalidChecksum => {
                write!(f, "invalid checksum")
            }
            DecodeError::InvalidLength(len) => {
                write!(f, "invalid length: {len}")
            }
            DecodeError::UnknownLsaType(lsa_type) => {
                write!(f, "unknown LSA type: {lsa_type}")
            }
            DecodeError::InvalidLsaChecksum => {
                write!(f, "invalid LSA checksum")
            }
            DecodeError::InvalidLsaLength(len) => {
                write!(f, "invalid LSA length: {len}")
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
