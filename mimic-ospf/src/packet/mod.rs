//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod error;
pub mod lsa;

use std::net::Ipv4Addr;

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use internet_checksum::Checksum;
use mimic_utils::bytes::{BytesMutExt, TLS_BUF};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::packet::error::{DecodeError, DecodeResult};
use crate::packet::lsa::{Lsa, LsaHdr, LsaKey, LsaType};

pub const OSPF_VERSION: u8 = 2;
pub const PKT_HDR_LEN: u16 = 24;

// OSPF packet types.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum PacketType {
    Hello = 1,
    DbDesc = 2,
    LsRequest = 3,
    LsUpdate = 4,
    LsAck = 5,
}

bitflags! {
    // Database Description flags.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct DbDescFlags: u8 {
        const MS = 0x01;
        const M = 0x02;
        const I = 0x04;
    }
}

//
// OSPF packet header.
//
// Encoding format:
//
// 0                   1                   2                   3
// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |   Version #   |     Type      |         Packet length         |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          Router ID                            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                           Area ID                             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |           Checksum            |             AuType            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                       Authentication                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                       Authentication                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PacketHdr {
    pub pkt_type: PacketType,
    pub router_id: Ipv4Addr,
    pub area_id: Ipv4Addr,
}

// OSPF packet.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Packet {
    Hello(HelloPkt),
    DbDesc(DbDescPkt),
    LsRequest(LsRequestPkt),
    LsUpdate(LsUpdatePkt),
    LsAck(LsAckPkt),
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct HelloPkt {
    pub hdr: PacketHdr,
    pub network_mask: Ipv4Addr,
    pub hello_interval: u16,
    pub options: u8,
    pub priority: u8,
    pub dead_interval: u32,
    pub dr: Option<Ipv4Addr>,
    pub bdr: Option<Ipv4Addr>,
    pub neighbors: Vec<Ipv4Addr>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct DbDescPkt {
    pub hdr: PacketHdr,
    pub mtu: u16,
    pub options: u8,
    pub dd_flags: DbDescFlags,
    pub dd_seq_no: u32,
    pub lsa_hdrs: Vec<LsaHdr>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsRequestPkt {
    pub hdr: PacketHdr,
    pub entries: Vec<LsaKey>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsUpdatePkt {
    pub hdr: PacketHdr,
    pub lsas: Vec<Lsa>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsAckPkt {
    pub hdr: PacketHdr,
    pub lsa_hdrs: Vec<LsaHdr>,
}

// ===== impl PacketHdr =====

impl PacketHdr {
    const CKSUM_RANGE: std::ops::Range<usize> = 12..14;
    const AUTH_RANGE: std::ops::Range<usize> = 16..24;
    const LEN_POS: std::ops::Range<usize> = 2..4;

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(OSPF_VERSION);
        buf.put_u8(self.pkt_type as u8);
        // The length and checksum fields are rewritten later.
        buf.put_u16(0);
        buf.put_ipv4(&self.router_id);
        buf.put_ipv4(&self.area_id);
        buf.put_u16(0);
        // Null authentication.
        buf.put_u16(0);
        buf.put_u64(0);
    }

    fn decode(buf: &mut Bytes) -> DecodeResult<(PacketHdr, u16)> {
        let version = buf.try_get_u8()?;
        if version != OSPF_VERSION {
            return Err(DecodeError::InvalidVersion(version));
        }
        let pkt_type = buf.try_get_u8()?;
        let pkt_type = PacketType::from_u8(pkt_type)
            .ok_or(DecodeError::UnknownPacketType(pkt_type))?;
        let length = buf.try_get_u16()?;
        let router_id = Ipv4Addr::from(buf.try_get_u32()?);
        let area_id = Ipv4Addr::from(buf.try_get_u32()?);
        let _cksum = buf.try_get_u16()?;
        let _autype = buf.try_get_u16()?;
        let _auth = buf.try_get_u64()?;

        Ok((
            PacketHdr {
                pkt_type,
                router_id,
                area_id,
            },
            length,
        ))
    }
}

// ===== impl Packet =====

impl Packet {
    pub fn hdr(&self) -> &PacketHdr {
        match self {
            Packet::Hello(pkt) => &pkt.hdr,
            Packet::DbDesc(pkt) => &pkt.hdr,
            Packet::LsRequest(pkt) => &pkt.hdr,
            Packet::LsUpdate(pkt) => &pkt.hdr,
            Packet::LsAck(pkt) => &pkt.hdr,
        }
    }

    // Encodes the packet, computing the length and checksum fields.
    pub fn encode(&self) -> Bytes {
        TLS_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();

            self.hdr().encode(&mut buf);
            match self {
                Packet::Hello(pkt) => {
                    buf.put_ipv4(&pkt.network_mask);
                    buf.put_u16(pkt.hello_interval);
                    buf.put_u8(pkt.options);
                    buf.put_u8(pkt.priority);
                    buf.put_u32(pkt.dead_interval);
                    buf.put_ipv4(
                        &pkt.dr.unwrap_or(Ipv4Addr::UNSPECIFIED),
                    );
                    buf.put_ipv4(
                        &pkt.bdr.unwrap_or(Ipv4Addr::UNSPECIFIED),
                    );
                    for nbr in &pkt.neighbors {
                        buf.put_ipv4(nbr);
                    }
                }
                Packet::DbDesc(pkt) => {
                    buf.put_u16(pkt.mtu);
                    buf.put_u8(pkt.options);
                    buf.put_u8(pkt.dd_flags.bits());
                    buf.put_u32(pkt.dd_seq_no);
                    for lsa_hdr in &pkt.lsa_hdrs {
                        lsa_hdr.encode(&mut buf);
                    }
                }
                Packet::LsRequest(pkt) => {
                    for entry in &pkt.entries {
                        buf.put_u32(entry.lsa_type as u32);
                        buf.put_ipv4(&entry.lsa_id);
                        buf.put_ipv4(&entry.adv_rtr);
                    }
                }
                Packet::LsUpdate(pkt) => {
                    buf.put_u32(pkt.lsas.len() as u32);
                    for lsa in &pkt.lsas {
                        lsa.encode(&mut buf);
                    }
                }
                Packet::LsAck(pkt) => {
                    for lsa_hdr in &pkt.lsa_hdrs {
                        lsa_hdr.encode(&mut buf);
                    }
                }
            }

            // Rewrite the length, then compute the checksum.
            let pkt_len = buf.len() as u16;
            buf[PacketHdr::LEN_POS]
                .copy_from_slice(&pkt_len.to_be_bytes());
            let mut cksum = Checksum::new();
            cksum.add_bytes(&buf);
            buf[PacketHdr::CKSUM_RANGE]
                .copy_from_slice(&cksum.checksum());

            buf.clone().freeze()
        })
    }

    // Decodes a buffer containing exactly one OSPF packet.
    pub fn decode(data: &[u8]) -> DecodeResult<Packet> {
        let mut buf = Bytes::copy_from_slice(data);

        // Verify the checksum, skipping the authentication field.
        if data.len() < PKT_HDR_LEN as usize {
            return Err(DecodeError::InvalidLength(data.len() as u16));
        }
        let mut cksum = Checksum::new();
        cksum.add_bytes(&data[0..PacketHdr::AUTH_RANGE.start]);
        cksum.add_bytes(&data[PacketHdr::AUTH_RANGE.end..]);
        if cksum.checksum() != [0; 2] {
            return Err(DecodeError::InvalidChecksum);
        }

        let (hdr, length) = PacketHdr::decode(&mut buf)?;
        if length as usize != data.len() {
            return Err(DecodeError::InvalidLength(length));
        }

        match hdr.pkt_type {
            PacketType::Hello => {
                let network_mask = Ipv4Addr::from(buf.try_get_u32()?);
                let hello_interval = buf.try_get_u16()?;
                let options = buf.try_get_u8()?;
                let priority = buf.try_get_u8()?;
                let dead_interval = buf.try_get_u32()?;
                let dr = Ipv4Addr::from(buf.try_get_u32()?);
                let bdr = Ipv4Addr::from(buf.try_get_u32()?);
                let mut neighbors = Vec::new();
                while buf.remaining() >= 4 {
                    neighbors.push(Ipv4Addr::from(buf.get_u32()));
                }
                Ok(Packet::Hello(HelloPkt {
                    hdr,
                    network_mask,
                    hello_interval,
                    options,
                    priority,
                    dead_interval,
                    dr: (!dr.is_unspecified()).then_some(dr),
                    bdr: (!bdr.is_unspecified()).then_some(bdr),
                    neighbors,
                }))
            }
            PacketType::DbDesc => {
                let mtu = buf.try_get_u16()?;
                let options = buf.try_get_u8()?;
                let dd_flags =
                    DbDescFlags::from_bits_truncate(buf.try_get_u8()?);
                let dd_seq_no = buf.try_get_u32()?;
                let mut lsa_hdrs = Vec::new();
                while buf.remaining() >= lsa::LSA_HDR_LEN as usize {
                    lsa_hdrs.push(LsaHdr::decode(&mut buf)?);
                }
                Ok(Packet::DbDesc(DbDescPkt {
                    hdr,
                    mtu,
                    options,
                    dd_flags,
                    dd_seq_no,
                    lsa_hdrs,
                }))
            }
            PacketType::LsRequest => {
                let mut entries = Vec::new();
                while buf.remaining() >= 12 {
                    let lsa_type = buf.get_u32() as u8;
                    let lsa_type = LsaType::from_u8(lsa_type)
                        .ok_or(DecodeError::UnknownLsaType(lsa_type))?;
                    let lsa_id = Ipv4Addr::from(buf.get_u32());
                    let adv_rtr = Ipv4Addr::from(buf.get_u32());
                    entries.push(LsaKey::new(lsa_type, adv_rtr, lsa_id));
                }
                Ok(Packet::LsRequest(LsRequestPkt { hdr, entries }))
            }
            PacketType::LsUpdate => {
                let num_lsas = buf.try_get_u32()?;
                let mut lsas = Vec::with_capacity(num_lsas as usize);
                for _ in 0..num_lsas {
                    let lsa = Lsa::decode(&mut buf)?;
                    if !lsa.is_checksum_valid() {
                        return Err(DecodeError::InvalidLsaChecksum);
                    }
                    lsas.push(lsa);
                }
                Ok(Packet::LsUpdate(LsUpdatePkt { hdr, lsas }))
            }
            PacketType::LsAck => {
                let mut lsa_hdrs = Vec::new();
                while buf.remaining() >= lsa::LSA_HDR_LEN as usize {
                    lsa_hdrs.push(LsaHdr::decode(&mut buf)?);
                }
                Ok(Packet::LsAck(LsAckPkt { hdr, lsa_hdrs }))
            }
        }
    }
}
