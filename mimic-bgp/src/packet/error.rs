//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use bytes::TryGetError;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::packet::consts::{
    ErrorCode, MessageHeaderErrorSubcode, OpenMessageErrorSubcode,
    UpdateMessageErrorSubcode,
};
use crate::packet::message::NotificationMsg;

pub type DecodeResult<T> = Result<T, DecodeError>;

// BGP message decoding errors.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum DecodeError {
    ReadOutOfBounds,
    MessageHeader(MessageHeaderError),
    OpenMessage(OpenMessageError),
    UpdateMessage(UpdateMessageError),
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum MessageHeaderError {
    ReadOutOfBounds,
    ConnectionNotSynchronized,
    BadMessageLength(u16),
    BadMessageType(u8),
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum OpenMessageError {
    ReadOutOfBounds,
    UnsupportedVersion(u8),
    BadPeerAs,
    BadBgpIdentifier,
    UnsupportedOptParam,
    UnacceptableHoldTime,
    MalformedOptParam,
}

// UPDATE message errors.
//
// NOTE: many of the errors originally specified by RFC 4271 were made
// obsolete by RFC 7606.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum UpdateMessageError {
    ReadOutOfBounds,
    MalformedAttributeList,
    UnrecognizedWellKnownAttribute,
    OptionalAttributeError,
    InvalidNetworkField,
}

// Attribute errors, per the RFC 7606 revised error handling.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum AttrError {
    Discard,
    Withdraw,
    Reset,
}

// ===== impl DecodeError =====

impl DecodeError {
    // Maps the error to the NOTIFICATION sent before closing the session.
    pub(crate) fn to_notification(&self) -> NotificationMsg {
        let (error_code, error_subcode) = match self {
            DecodeError::ReadOutOfBounds => (
                ErrorCode::MessageHeaderError as u8,
                MessageHeaderErrorSubcode::Unspecific as u8,
            ),
            DecodeError::MessageHeader(error) => (
                ErrorCode::MessageHeaderError as u8,
                error.subcode().to_u8().unwrap(),
            ),
            DecodeError::OpenMessage(error) => (
                ErrorCode::OpenMessageError as u8,
                error.subcode().to_u8().unwrap(),
            ),
            DecodeError::UpdateMessage(error) => (
                ErrorCode::UpdateMessageError as u8,
                error.subcode().to_u8().unwrap(),
            ),
        };
        NotificationMsg {
            error_code,
            error_subcode,
            data: Default::default(),
        }
    }
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::ReadOutOfBounds => {
                write!(f, "attempt to read out of bounds")
            }
            DecodeError::MessageHeader(error) => error.fmt(f),
            DecodeError::OpenMessage(error) => error.fmt(f),
            DecodeError::UpdateMessage(error) => error.fmt(f),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<TryGetError> for DecodeError {
    fn from(_error: TryGetError) -> DecodeError {
        DecodeError::ReadOutOfBounds
    }
}

impl From<MessageHeaderError> for DecodeError {
    fn from(error: MessageHeaderError) -> DecodeError {
        DecodeError::MessageHeader(error)
    }
}

impl From<OpenMessageError> for DecodeError {
    fn from(error: OpenMessageError) -> DecodeError {
        DecodeError::OpenMessage(error)
    }
}

impl From<UpdateMessageError> for DecodeError {
    fn from(error: UpdateMessageError) -> DecodeError {
        DecodeError::UpdateMessage(error)
    }
}

// ===== impl MessageHeaderError =====

impl MessageHeaderError {
    fn subcode(&self) -> MessageHeaderErrorSubcode {
        match self {
            MessageHeaderError::ReadOutOfBounds => {
                MessageHeaderErrorSubcode::Unspecific
            }
            MessageHeaderError::ConnectionNotSynchronized => {
                MessageHeaderErrorSubcode::ConnectionNotSynchronized
            }
            MessageHeaderError::BadMessageLength(..) => {
                MessageHeaderErrorSubcode::BadMessageLength
            }
            MessageHeaderError::BadMessageType(..) => {
                MessageHeaderErrorSubcode::BadMessageType
            }
        }
    }
}

impl std::fmt::Display for MessageHeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageHeaderError::ReadOutOfBounds => {
                write!(f, "attempt to read out of bounds")
            }
            MessageHeaderError::ConnectionNotSynchronized => {
                write!(f, "connection not synchronized")
            }
            MessageHeaderError::BadMessageLength(len) => {
                write!(f, "invalid message length: {len}")
            }
            MessageHeaderError::BadMessageType(msg_type) => {
                write!(f, "invalid message type: {msg_type}")
            }
        }
    }
}

impl From<TryGetError> for MessageHeaderError {
    fn from(_error: TryGetError) -> MessageHeaderError {
        MessageHeaderError::ReadOutOfBounds
    }
}

// ===== impl OpenMessageError =====

impl OpenMessageError {
    fn subcode(&self) -> OpenMessageErrorSubcode {
        match self {
            OpenMessageError::ReadOutOfBounds => {
                OpenMessageErrorSubcode::Unspecific
            }
            OpenMessageError::UnsupportedVersion(..) => {
                OpenMessageErrorSubcode::UnsupportedVersionNumber
            }
            OpenMessageError::BadPeerAs => OpenMessageErrorSubcode::BadPeerAs,
            OpenMessageError::BadBgpIdentifier => {
                OpenMessageErrorSubcode::BadBgpIdentifier
            }
            OpenMessageError::UnsupportedOptParam => {
                OpenMessageErrorSubcode::UnsupportedOptParam
            }
            OpenMessageError::UnacceptableHoldTime => {
                OpenMessageErrorSubcode::UnacceptableHoldTime
            }
            OpenMessageError::MalformedOptParam => {
                OpenMessageErrorSubcode::Unspecific
            }
        }
    }
}

impl std::fmt::Display for OpenMessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OPEN message error: ")?;

        match self {
            OpenMessageError::ReadOutOfBounds => {
                write!(f, "attempt to read out of bounds")
            }
            OpenMessageError::UnsupportedVersion(version) => {
                write!(f, "unsupported version: {version}")
            }
            OpenMessageError::BadPeerAs => {
                write!(f, "bad peer AS")
            }
            OpenMessageError::BadBgpIdentifier => {
                write!(f, "bad BGP identifier")
            }
            OpenMessageError::UnsupportedOptParam => {
                write!(f, "unsupported optional parameter")
            }
            OpenMessageError::UnacceptableHoldTime => {
                write!(f, "unacceptable hold time")
            }
            OpenMessageError::MalformedOptParam => {
                write!(f, "malformed optional parameter")
            }
        }
    }
}

impl From<TryGetError> for OpenMessageError {
    fn from(_error: TryGetError) -> OpenMessageError {
        OpenMessageError::ReadOutOfBounds
    }
}

// ===== impl UpdateMessageError =====

impl UpdateMessageError {
    fn subcode(&self) -> UpdateMessageErrorSubcode {
        match self {
            UpdateMessageError::ReadOutOfBounds => {
                UpdateMessageErrorSubcode::Unspecific
            }
            UpdateMessageError::MalformedAttributeList => {
                UpdateMessageErrorSubcode::MalformedAttributeList
            }
            UpdateMessageError::UnrecognizedWellKnownAttribute => {
                UpdateMessageErrorSubcode::UnrecognizedWellKnownAttribute
            }
            UpdateMessageError::OptionalAttributeError => {
                UpdateMessageErrorSubcode::OptionalAttributeError
            }
            UpdateMessageError::InvalidNetworkField => {
                UpdateMessageErrorSubcode::InvalidNetworkField
            }
        }
    }
}

impl std::fmt::Display for UpdateMessageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UPDATE message error: ")?;

        match self {
            UpdateMessageError::ReadOutOfBounds => {
                write!(f, "attempt to read out of bounds")
            }
            UpdateMessageError::MalformedAttributeList => {
                write!(f, "malformed attribute list")
            }
            UpdateMessageError::UnrecognizedWellKnownAttribute => {
                write!(f, "unrecognized well-known attribute")
            }
            UpdateMessageError::OptionalAttributeError => {
                write!(f, "optional attribute error")
            }
            UpdateMessageError::InvalidNetworkField => {
                write!(f, "invalid network field")
            }
        }
    }
}

impl From<TryGetError> for UpdateMessageError {
    fn from(_error: TryGetError) -> UpdateMessageError {
        UpdateMessageError::ReadOutOfBounds
    }
}
