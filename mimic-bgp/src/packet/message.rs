//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use enum_as_inner::EnumAsInner;
use ipnetwork::Ipv4Network;
use mimic_utils::bytes::{BytesMutExt, TLS_BUF};
use num_traits::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::packet::attribute::Attrs;
use crate::packet::consts::{
    Afi, BGP_VERSION, CapabilityCode, ErrorCode, MessageType, OpenParamType,
    Safi,
};
use crate::packet::error::{
    DecodeError, DecodeResult, MessageHeaderError, OpenMessageError,
    UpdateMessageError,
};

//
// BGP message.
//
// Encoding format (message header):
//
// 0                   1                   2                   3
// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                                                               |
// +                                                               +
// |                                                               |
// +                                                               +
// |                           Marker                              |
// +                                                               +
// |                                                               |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |          Length               |      Type     |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(EnumAsInner)]
#[derive(Deserialize, Serialize)]
pub enum Message {
    Open(OpenMsg),
    Update(UpdateMsg),
    Notification(NotificationMsg),
    Keepalive(KeepaliveMsg),
}

//
// OPEN Message.
//
// Encoding format (message body):
//
// 0                   1                   2                   3
// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+
// |    Version    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |     My Autonomous System      |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |           Hold Time           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         BGP Identifier                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// | Opt Parm Len  |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                                                               |
// |             Optional Parameters (variable)                    |
// |                                                               |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct OpenMsg {
    pub version: u8,
    pub my_as: u16,
    pub holdtime: u16,
    pub identifier: Ipv4Addr,
    pub capabilities: BTreeSet<Capability>,
}

//
// Capabilities Optional Parameter.
//
// Encoding format:
//
// +------------------------------+
// | Capability Code (1 octet)    |
// +------------------------------+
// | Capability Length (1 octet)  |
// +------------------------------+
// | Capability Value (variable)  |
// ~                              ~
// +------------------------------+
//
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(EnumAsInner)]
#[derive(Deserialize, Serialize)]
pub enum Capability {
    MultiProtocol { afi: Afi, safi: Safi },
    FourOctetAsNumber { asn: u32 },
}

//
// UPDATE Message.
//
// Encoding format (message body):
//
// +-----------------------------------------------------+
// |   Withdrawn Routes Length (2 octets)                |
// +-----------------------------------------------------+
// |   Withdrawn Routes (variable)                       |
// +-----------------------------------------------------+
// |   Total Path Attribute Length (2 octets)            |
// +-----------------------------------------------------+
// |   Path Attributes (variable)                        |
// +-----------------------------------------------------+
// |   Network Layer Reachability Information (variable) |
// +-----------------------------------------------------+
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct UpdateMsg {
    pub reach: Option<ReachNlri>,
    pub unreach: Option<UnreachNlri>,
    pub attrs: Option<Attrs>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct ReachNlri {
    pub prefixes: Vec<Ipv4Network>,
    pub nexthop: Ipv4Addr,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct UnreachNlri {
    pub prefixes: Vec<Ipv4Network>,
}

//
// NOTIFICATION Message.
//
// Encoding format (message body):
//
// 0                   1                   2                   3
// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// | Error code    | Error subcode |   Data (variable)             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct NotificationMsg {
    pub error_code: u8,
    pub error_subcode: u8,
    pub data: Vec<u8>,
}

//
// KEEPALIVE Message.
//
// A KEEPALIVE message consists of only the message header and has a length
// of 19 octets.
//
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct KeepaliveMsg {}

// BGP message encoding context.
#[derive(Debug, Default)]
pub struct EncodeCxt {
    pub four_octet_as: bool,
}

// BGP message decoding context.
#[derive(Debug, Default)]
pub struct DecodeCxt {
    pub four_octet_as: bool,
}

// ===== impl Message =====

impl Message {
    pub const MIN_LEN: u16 = 19;
    pub const MAX_LEN: u16 = 4096;
    const MSG_LEN_POS: std::ops::Range<usize> = 16..18;

    // Encodes BGP message into a bytes buffer.
    pub fn encode(&self, cxt: &EncodeCxt) -> Bytes {
        TLS_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();

            // Marker field.
            buf.put_u128(u128::MAX);
            // The length field will be initialized later.
            buf.put_u16(0);

            // Message type and body.
            match self {
                Message::Open(msg) => msg.encode(&mut buf),
                Message::Update(msg) => msg.encode(&mut buf, cxt),
                Message::Notification(msg) => msg.encode(&mut buf),
                Message::Keepalive(msg) => msg.encode(&mut buf),
            }

            // Rewrite message length.
            let msg_len = buf.len() as u16;
            buf[Self::MSG_LEN_POS].copy_from_slice(&msg_len.to_be_bytes());

            buf.clone().freeze()
        })
    }

    // Decodes a buffer containing exactly one BGP message.
    pub fn decode(data: &[u8], cxt: &DecodeCxt) -> DecodeResult<Self> {
        let mut buf = Bytes::copy_from_slice(data);

        // Parse and validate marker.
        let marker = buf.try_get_u128()?;
        if marker != u128::MAX {
            return Err(MessageHeaderError::ConnectionNotSynchronized.into());
        }

        // Parse and validate message length.
        let msg_len = buf.try_get_u16()?;
        if msg_len < Self::MIN_LEN
            || msg_len > Self::MAX_LEN
            || msg_len as usize != data.len()
        {
            return Err(MessageHeaderError::BadMessageLength(msg_len).into());
        }

        // Parse message type.
        let msg_type = buf.try_get_u8()?;
        let Some(msg_type) = MessageType::from_u8(msg_type) else {
            return Err(MessageHeaderError::BadMessageType(msg_type).into());
        };

        // Parse message body.
        match msg_type {
            MessageType::Open => {
                let msg = OpenMsg::decode(&mut buf)?;
                Ok(Message::Open(msg))
            }
            MessageType::Update => {
                let msg = UpdateMsg::decode(&mut buf, cxt)?;
                Ok(Message::Update(msg))
            }
            MessageType::Notification => {
                let msg = NotificationMsg::decode(&mut buf)?;
                Ok(Message::Notification(msg))
            }
            MessageType::Keepalive => {
                let msg = KeepaliveMsg::decode(&mut buf)?;
                Ok(Message::Keepalive(msg))
            }
        }
    }
}

// ===== impl OpenMsg =====

impl OpenMsg {
    pub const MIN_LEN: u16 = 10;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(MessageType::Open as u8);
        buf.put_u8(self.version);
        buf.put_u16(self.my_as);
        buf.put_u16(self.holdtime);
        buf.put_ipv4(&self.identifier);

        // Optional parameters.
        let opt_params_len_pos = buf.len();
        buf.put_u8(0);
        if !self.capabilities.is_empty() {
            for capability in &self.capabilities {
                // One capabilities parameter per capability, as most
                // implementations send them.
                buf.put_u8(OpenParamType::Capabilities as u8);
                let param_len_pos = buf.len();
                buf.put_u8(0);
                capability.encode(buf);
                let param_len = (buf.len() - param_len_pos - 1) as u8;
                buf[param_len_pos] = param_len;
            }
            let opt_params_len = (buf.len() - opt_params_len_pos - 1) as u8;
            buf[opt_params_len_pos] = opt_params_len;
        }
    }

    fn decode(buf: &mut Bytes) -> DecodeResult<OpenMsg> {
        let version = buf.try_get_u8()?;
        if version != BGP_VERSION {
            return Err(OpenMessageError::UnsupportedVersion(version).into());
        }

        let my_as = buf.try_get_u16()?;
        let holdtime = buf.try_get_u16()?;
        let identifier = Ipv4Addr::from(buf.try_get_u32()?);

        // Parse optional parameters.
        let mut capabilities = BTreeSet::new();
        let opt_params_len = buf.try_get_u8()? as usize;
        if opt_params_len > buf.remaining() {
            return Err(OpenMessageError::MalformedOptParam.into());
        }
        let mut params_buf = buf.split_to(opt_params_len);
        while params_buf.remaining() > 0 {
            if params_buf.remaining() < 2 {
                return Err(OpenMessageError::MalformedOptParam.into());
            }
            let param_type = params_buf.get_u8();
            let param_len = params_buf.get_u8() as usize;
            if param_len > params_buf.remaining() {
                return Err(OpenMessageError::MalformedOptParam.into());
            }
            let mut param_buf = params_buf.split_to(param_len);

            match OpenParamType::from_u8(param_type) {
                Some(OpenParamType::Capabilities) => {
                    while param_buf.remaining() > 0 {
                        if let Some(capability) =
                            Capability::decode(&mut param_buf)?
                        {
                            capabilities.insert(capability);
                        }
                    }
                }
                None => {
                    return Err(OpenMessageError::UnsupportedOptParam.into());
                }
            }
        }

        Ok(OpenMsg {
            version,
            my_as,
            holdtime,
            identifier,
            capabilities,
        })
    }

    /// The peer's AS number, taking the 4-octet AS capability into account.
    pub fn real_as(&self) -> u32 {
        self.capabilities
            .iter()
            .find_map(|capability| match capability {
                Capability::FourOctetAsNumber { asn } => Some(*asn),
                _ => None,
            })
            .unwrap_or(self.my_as as u32)
    }
}

// ===== impl Capability =====

impl Capability {
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Capability::MultiProtocol { afi, safi } => {
                buf.put_u8(CapabilityCode::MultiProtocol as u8);
                buf.put_u8(4);
                buf.put_u16(afi.to_u16().unwrap());
                buf.put_u8(0);
                buf.put_u8(safi.to_u8().unwrap());
            }
            Capability::FourOctetAsNumber { asn } => {
                buf.put_u8(CapabilityCode::FourOctetAsNumber as u8);
                buf.put_u8(4);
                buf.put_u32(*asn);
            }
        }
    }

    fn decode(buf: &mut Bytes) -> DecodeResult<Option<Capability>> {
        if buf.remaining() < 2 {
            return Err(OpenMessageError::MalformedOptParam.into());
        }
        let code = buf.get_u8();
        let len = buf.get_u8() as usize;
        if len > buf.remaining() {
            return Err(OpenMessageError::MalformedOptParam.into());
        }
        let mut value = buf.split_to(len);

        let capability = match CapabilityCode::from_u8(code) {
            Some(CapabilityCode::MultiProtocol) => {
                if value.remaining() != 4 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }
                let afi = value.get_u16();
                let _reserved = value.get_u8();
                let safi = value.get_u8();
                let (Some(afi), Some(safi)) =
                    (Afi::from_u16(afi), Safi::from_u8(safi))
                else {
                    // Unsupported address families are ignored, not
                    // rejected.
                    return Ok(None);
                };
                Some(Capability::MultiProtocol { afi, safi })
            }
            Some(CapabilityCode::FourOctetAsNumber) => {
                if value.remaining() != 4 {
                    return Err(OpenMessageError::MalformedOptParam.into());
                }
                Some(Capability::FourOctetAsNumber {
                    asn: value.get_u32(),
                })
            }
            // Unknown capabilities are ignored per RFC 5492.
            None => None,
        };

        Ok(capability)
    }
}

// ===== impl UpdateMsg =====

impl UpdateMsg {
    pub const MIN_LEN: u16 = 4;

    fn encode(&self, buf: &mut BytesMut, cxt: &EncodeCxt) {
        buf.put_u8(MessageType::Update as u8);

        // Withdrawn routes.
        let withdrawn_len_pos = buf.len();
        buf.put_u16(0);
        if let Some(unreach) = &self.unreach {
            for prefix in &unreach.prefixes {
                encode_ipv4_prefix(buf, prefix);
            }
            let withdrawn_len = (buf.len() - withdrawn_len_pos - 2) as u16;
            buf[withdrawn_len_pos..withdrawn_len_pos + 2]
                .copy_from_slice(&withdrawn_len.to_be_bytes());
        }

        // Path attributes.
        let attrs_len_pos = buf.len();
        buf.put_u16(0);
        if let Some(attrs) = &self.attrs {
            let nexthop = self.reach.as_ref().map(|reach| reach.nexthop);
            attrs.encode(buf, nexthop, cxt);
            let attrs_len = (buf.len() - attrs_len_pos - 2) as u16;
            buf[attrs_len_pos..attrs_len_pos + 2]
                .copy_from_slice(&attrs_len.to_be_bytes());
        }

        // NLRI.
        if let Some(reach) = &self.reach {
            for prefix in &reach.prefixes {
                encode_ipv4_prefix(buf, prefix);
            }
        }
    }

    fn decode(buf: &mut Bytes, cxt: &DecodeCxt) -> DecodeResult<UpdateMsg> {
        // Withdrawn routes.
        let withdrawn_len = buf.try_get_u16()? as usize;
        if withdrawn_len > buf.remaining() {
            return Err(UpdateMessageError::MalformedAttributeList.into());
        }
        let mut withdrawn_buf = buf.split_to(withdrawn_len);
        let mut withdrawn = Vec::new();
        while withdrawn_buf.remaining() > 0 {
            withdrawn.push(decode_ipv4_prefix(&mut withdrawn_buf)?);
        }

        // Path attributes.
        let attrs_len = buf.try_get_u16()? as usize;
        if attrs_len > buf.remaining() {
            return Err(UpdateMessageError::MalformedAttributeList.into());
        }
        let mut attrs_buf = buf.split_to(attrs_len);
        let attrs = if attrs_len > 0 {
            Some(Attrs::decode(&mut attrs_buf, cxt)?)
        } else {
            None
        };

        // NLRI.
        let mut prefixes = Vec::new();
        while buf.remaining() > 0 {
            prefixes.push(decode_ipv4_prefix(buf)?);
        }

        // A non-empty NLRI requires the mandatory attributes, including the
        // next-hop.
        let reach = if !prefixes.is_empty() {
            let nexthop = attrs
                .as_ref()
                .and_then(|attrs| attrs.nexthop)
                .ok_or(UpdateMessageError::MalformedAttributeList)?;
            Some(ReachNlri { prefixes, nexthop })
        } else {
            None
        };
        let unreach = if !withdrawn.is_empty() {
            Some(UnreachNlri {
                prefixes: withdrawn,
            })
        } else {
            None
        };

        Ok(UpdateMsg {
            reach,
            unreach,
            attrs,
        })
    }
}

// ===== impl NotificationMsg =====

impl NotificationMsg {
    pub const MIN_LEN: u16 = 2;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(MessageType::Notification as u8);
        buf.put_u8(self.error_code);
        buf.put_u8(self.error_subcode);
        buf.put_slice(&self.data);
    }

    fn decode(buf: &mut Bytes) -> DecodeResult<NotificationMsg> {
        let error_code = buf.try_get_u8()?;
        let error_subcode = buf.try_get_u8()?;
        let data = buf.split_to(buf.remaining()).to_vec();

        Ok(NotificationMsg {
            error_code,
            error_subcode,
            data,
        })
    }
}

impl NotificationMsg {
    pub fn new(
        error_code: ErrorCode,
        error_subcode: impl ToPrimitive,
    ) -> NotificationMsg {
        NotificationMsg {
            error_code: error_code as u8,
            error_subcode: error_subcode.to_u8().unwrap_or(0),
            data: Default::default(),
        }
    }
}

// ===== impl KeepaliveMsg =====

impl KeepaliveMsg {
    pub const LEN: u16 = 19;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(MessageType::Keepalive as u8);
    }

    fn decode(buf: &mut Bytes) -> DecodeResult<KeepaliveMsg> {
        if buf.remaining() != 0 {
            return Err(MessageHeaderError::BadMessageLength(
                Message::MIN_LEN + buf.remaining() as u16,
            )
            .into());
        }
        Ok(KeepaliveMsg {})
    }
}

// ===== global functions =====

/// Encodes an IPv4 prefix in the compact NLRI form.
pub fn encode_ipv4_prefix(buf: &mut BytesMut, prefix: &Ipv4Network) {
    let plen = prefix.prefix();
    buf.put_u8(plen);
    let octets = prefix.ip().octets();
    buf.put_slice(&octets[..plen.div_ceil(8) as usize]);
}

/// Decodes an IPv4 prefix from the compact NLRI form.
pub fn decode_ipv4_prefix(
    buf: &mut Bytes,
) -> Result<Ipv4Network, UpdateMessageError> {
    let plen = buf.try_get_u8()?;
    if plen > 32 {
        return Err(UpdateMessageError::InvalidNetworkField);
    }
    let plen_bytes = plen.div_ceil(8) as usize;
    if buf.remaining() < plen_bytes {
        return Err(UpdateMessageError::InvalidNetworkField);
    }
    let mut octets = [0u8; 4];
    buf.copy_to_slice(&mut octets[..plen_bytes]);
    Ipv4Network::new(Ipv4Addr::from(octets), plen)
        .map(|prefix| {
            // Zero out host bits.
            Ipv4Network::new(prefix.network(), plen).unwrap()
        })
        .map_err(|_| UpdateMessageError::InvalidNetworkField)
}
