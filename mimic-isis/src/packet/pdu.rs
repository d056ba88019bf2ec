//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ipnetwork::Ipv4Network;
use mimic_utils::bytes::{BytesMutExt, TLS_BUF};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::packet::error::{DecodeError, DecodeResult};
use crate::packet::{AreaAddr, LanId, LevelNumber, LspId, SystemId};

// IRDP discriminator for IS-IS.
pub const IDRP_DISCRIMINATOR: u8 = 0x83;
pub const VERSION: u8 = 1;
// NLPID for IPv4.
pub const NLPID_IPV4: u8 = 0xcc;

// Maximum LSP lifetime and refresh interval, in seconds.
pub const LSP_MAX_LIFETIME: u16 = 1200;
pub const LSP_REFRESH_INTERVAL: u16 = 900;

// PDU types. The simulator models every link as point-to-point, so the
// LAN hello variants are never originated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum PduType {
    HelloP2P = 17,
    LspL1 = 18,
    LspL2 = 20,
    CsnpL1 = 24,
    CsnpL2 = 25,
    PsnpL1 = 26,
    PsnpL2 = 27,
}

// TLV types.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum TlvType {
    AreaAddresses = 1,
    IsReach = 2,
    LspEntries = 9,
    ProtocolsSupported = 129,
    Ipv4InternalReach = 128,
    Ipv4Addresses = 132,
    P2pAdjState = 240,
}

// Three-way adjacency states carried in the P2P adjacency TLV (RFC 5303).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum AdjThreeWayState {
    Up = 0,
    Initializing = 1,
    Down = 2,
}

// IS-IS PDU.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Pdu {
    Hello(Hello),
    Lsp(Lsp),
    Snp(Snp),
}

// Point-to-point hello.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Hello {
    pub circuit_type: u8,
    pub source: SystemId,
    pub holdtime: u16,
    pub local_circuit_id: u8,
    pub tlvs: HelloTlvs,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct HelloTlvs {
    pub area_addrs: Vec<AreaAddr>,
    pub protocols_supported: Vec<u8>,
    pub ipv4_addrs: Vec<Ipv4Addr>,
    pub adj_state: Option<AdjStateTlv>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct AdjStateTlv {
    pub state: AdjThreeWayState,
    pub ext_circuit_id: u32,
    pub neighbor: Option<(SystemId, u32)>,
}

// Link State PDU.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Lsp {
    pub level: LevelNumber,
    pub rem_lifetime: u16,
    pub lsp_id: LspId,
    pub seq_no: u32,
    pub cksum: u16,
    pub flags: u8,
    pub tlvs: LspTlvs,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LspTlvs {
    pub area_addrs: Vec<AreaAddr>,
    pub protocols_supported: Vec<u8>,
    pub ipv4_addrs: Vec<Ipv4Addr>,
    pub is_reach: Vec<IsReach>,
    pub ip_internal_reach: Vec<IpReach>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct IsReach {
    pub neighbor: LanId,
    pub metric: u8,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct IpReach {
    pub prefix: Ipv4Network,
    pub metric: u8,
}

// Sequence numbers PDU (complete or partial).
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Snp {
    pub level: LevelNumber,
    pub source: LanId,
    // CSNPs describe an LSP-ID range; PSNPs carry none.
    pub summary: Option<(LspId, LspId)>,
    pub entries: Vec<LspEntry>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LspEntry {
    pub rem_lifetime: u16,
    pub lsp_id: LspId,
    pub seq_no: u32,
    pub cksum: u16,
}

// ===== impl Pdu =====

impl Pdu {
    const HELLO_P2P_HDR_LEN: u8 = 20;
    const LSP_HDR_LEN: u8 = 27;
    const CSNP_HDR_LEN: u8 = 33;
    const PSNP_HDR_LEN: u8 = 17;

    const LSP_PDU_LEN_POS: std::ops::Range<usize> = 8..10;
    const LSP_CKSUM_POS: std::ops::Range<usize> = 24..26;
    const HELLO_PDU_LEN_POS: std::ops::Range<usize> = 17..19;

    pub fn pdu_type(&self) -> PduType {
        match self {
            Pdu::Hello(_) => PduType::HelloP2P,
            Pdu::Lsp(lsp) => match lsp.level {
                LevelNumber::L1 => PduType::LspL1,
                LevelNumber::L2 => PduType::LspL2,
            },
            Pdu::Snp(snp) => match (snp.summary.is_some(), snp.level) {
                (true, LevelNumber::L1) => PduType::CsnpL1,
                (true, LevelNumber::L2) => PduType::CsnpL2,
                (false, LevelNumber::L1) => PduType::PsnpL1,
                (false, LevelNumber::L2) => PduType::PsnpL2,
            },
        }
    }

    // Encodes the PDU, computing the length and (for LSPs) checksum
    // fields.
    pub fn encode(&self) -> Bytes {
        TLS_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();

            // Common header.
            let hdr_len = match self {
                Pdu::Hello(_) => Self::HELLO_P2P_HDR_LEN,
                Pdu::Lsp(_) => Self::LSP_HDR_LEN,
                Pdu::Snp(snp) if snp.summary.is_some() => {
                    Self::CSNP_HDR_LEN
                }
                Pdu::Snp(_) => Self::PSNP_HDR_LEN,
            };
            buf.put_u8(IDRP_DISCRIMINATOR);
            buf.put_u8(hdr_len);
            buf.put_u8(VERSION);
            // ID length (0 means the standard 6 octets).
            buf.put_u8(0);
            buf.put_u8(self.pdu_type() as u8);
            buf.put_u8(VERSION);
            buf.put_u8(0);
            // Maximum area addresses (0 means 3).
            buf.put_u8(0);

            let pdu_len_pos;
            match self {
                Pdu::Hello(hello) => {
                    buf.put_u8(hello.circuit_type);
                    buf.put_slice(hello.source.as_bytes());
                    buf.put_u16(hello.holdtime);
                    pdu_len_pos = Self::HELLO_PDU_LEN_POS;
                    buf.put_u16(0);
                    buf.put_u8(hello.local_circuit_id);
                    hello.tlvs.encode(&mut buf);
                }
                Pdu::Lsp(lsp) => {
                    pdu_len_pos = Self::LSP_PDU_LEN_POS;
                    buf.put_u16(0);
                    buf.put_u16(lsp.rem_lifetime);
                    encode_lsp_id(&mut buf, &lsp.lsp_id);
                    buf.put_u32(lsp.seq_no);
                    // The checksum is computed below.
                    buf.put_u16(0);
                    buf.put_u8(lsp.flags);
                    lsp.tlvs.encode(&mut buf);
                }
                Pdu::Snp(snp) => {
                    pdu_len_pos = Self::LSP_PDU_LEN_POS;
                    buf.put_u16(0);
                    encode_lan_id(&mut buf, &snp.source);
                    if let Some((start, end)) = &snp.summary {
                        encode_lsp_id(&mut buf, start);
                        encode_lsp_id(&mut buf, end);
                    }
                    // LSP entries TLV.
                    for chunk in snp.entries.chunks(15) {
                        buf.put_u8(TlvType::LspEntries as u8);
                        buf.put_u8(chunk.len() as u8 * 16);
                        for entry in chunk {
                            buf.put_u16(entry.rem_lifetime);
                            encode_lsp_id(&mut buf, &entry.lsp_id);
                            buf.put_u32(entry.seq_no);
                            buf.put_u16(entry.cksum);
                        }
                    }
                }
            }

            // Rewrite the PDU length.
            let pdu_len = buf.len() as u16;
            buf[pdu_len_pos].copy_from_slice(&pdu_len.to_be_bytes());

            // Compute the LSP checksum.
            if let Pdu::Lsp(_) = self {
                let cksum = lsp_checksum(&buf[12..]);
                buf[Self::LSP_CKSUM_POS].copy_from_slice(&cksum);
            }

            buf.clone().freeze()
        })
    }

    // Decodes a buffer containing exactly one IS-IS PDU.
    pub fn decode(data: &[u8]) -> DecodeResult<Pdu> {
        let mut buf = Bytes::copy_from_slice(data);

        // Common header.
        let discriminator = buf.try_get_u8()?;
        if discriminator != IDRP_DISCRIMINATOR {
            return Err(DecodeError::InvalidIrdpDiscriminator(
                discriminator,
            ));
        }
        let _hdr_len = buf.try_get_u8()?;
        let version_proto = buf.try_get_u8()?;
        if version_proto != VERSION {
            return Err(DecodeError::InvalidVersion(version_proto));
        }
        let id_len = buf.try_get_u8()?;
        if id_len != 0 && id_len != SystemId::LENGTH as u8 {
            return Err(DecodeError::InvalidIdLength(id_len));
        }
        let pdu_type = buf.try_get_u8()?;
        let pdu_type = PduType::from_u8(pdu_type)
            .ok_or(DecodeError::UnknownPduType(pdu_type))?;
        let version = buf.try_get_u8()?;
        if version != VERSION {
            return Err(DecodeError::InvalidVersion(version));
        }
        let _reserved = buf.try_get_u8()?;
        let _max_area_addrs = buf.try_get_u8()?;

        match pdu_type {
            PduType::HelloP2P => {
                let circuit_type = buf.try_get_u8()?;
                let source = decode_system_id(&mut buf)?;
                let holdtime = buf.try_get_u16()?;
                let pdu_len = buf.try_get_u16()?;
                if pdu_len as usize != data.len() {
                    return Err(DecodeError::InvalidPduLength(pdu_len));
                }
                let local_circuit_id = buf.try_get_u8()?;
                let tlvs = HelloTlvs::decode(&mut buf)?;
                Ok(Pdu::Hello(Hello {
                    circuit_type,
                    source,
                    holdtime,
                    local_circuit_id,
                    tlvs,
                }))
            }
            PduType::LspL1 | PduType::LspL2 => {
                let level = match pdu_type {
                    PduType::LspL1 => LevelNumber::L1,
                    _ => LevelNumber::L2,
                };
                let pdu_len = buf.try_get_u16()?;
                if pdu_len as usize != data.len() {
                    return Err(DecodeError::InvalidPduLength(pdu_len));
                }
                let rem_lifetime = buf.try_get_u16()?;
                let lsp_id = decode_lsp_id(&mut buf)?;
                let seq_no = buf.try_get_u32()?;
                let cksum = buf.try_get_u16()?;
                let flags = buf.try_get_u8()?;

                // ISO 10589 section 7.3.14.2: an LSP with a zero checksum
                // and non-zero lifetime is treated as corrupted.
                if cksum != 0
                    && fletcher::calc_fletcher16(&data[12..]) != 0
                {
                    return Err(DecodeError::InvalidLspChecksum);
                }
                if cksum == 0 && rem_lifetime != 0 {
                    return Err(DecodeError::InvalidLspChecksum);
                }

                let tlvs = LspTlvs::decode(&mut buf)?;
                Ok(Pdu::Lsp(Lsp {
                    level,
                    rem_lifetime,
                    lsp_id,
                    seq_no,
                    cksum,
                    flags,
                    tlvs,
                }))
            }
            PduType::CsnpL1
            | PduType::CsnpL2
            | PduType::PsnpL1
            | PduType::PsnpL2 => {
                let level = match pdu_type {
                    PduType::CsnpL1 | PduType::PsnpL1 => LevelNumber::L1,
                    _ => LevelNumber::L2,
                };
                let is_csnp = matches!(
                    pdu_type,
                    PduType::CsnpL1 | PduType::CsnpL2
                );
                let pdu_len = buf.try_get_u16()?;
                if pdu_len as usize != data.len() {
                    return Err(DecodeError::InvalidPduLength(pdu_len));
                }
                let source = decode_lan_id(&mut buf)?;
                let summary = if is_csnp {
                    let start = decode_lsp_id(&mut buf)?;
                    let end = decode_lsp_id(&mut buf)?;
                    Some((start, end))
                } else {
                    None
                };

                let mut entries = vec![];
                while buf.remaining() >= 2 {
                    let tlv_type = buf.get_u8();
                    let tlv_len = buf.get_u8() as usize;
                    if tlv_len > buf.remaining() {
                        return Err(DecodeError::InvalidTlvLength(
                            tlv_len as u8,
                        ));
                    }
                    let mut value = buf.split_to(tlv_len);
                    if TlvType::from_u8(tlv_type)
                        != Some(TlvType::LspEntries)
                    {
                        continue;
                    }
                    while value.remaining() >= 16 {
                        let rem_lifetime = value.get_u16();
                        let lsp_id = decode_lsp_id(&mut value)?;
                        let seq_no = value.get_u32();
                        let cksum = value.get_u16();
                        entries.push(LspEntry {
                            rem_lifetime,
                            lsp_id,
                            seq_no,
                            cksum,
                        });
                    }
                }
                Ok(Pdu::Snp(Snp {
                    level,
                    source,
                    summary,
                    entries,
                }))
            }
        }
    }
}

// ===== impl HelloTlvs =====

impl HelloTlvs {
    fn encode(&self, buf: &mut BytesMut) {
        encode_area_addrs(buf, &self.area_addrs);
        encode_protocols_supported(buf, &self.protocols_supported);
        encode_ipv4_addrs(buf, &self.ipv4_addrs);

        if let Some(adj_state) = &self.adj_state {
            buf.put_u8(TlvType::P2pAdjState as u8);
            let len = if adj_state.neighbor.is_some() { 15 } else { 5 };
            buf.put_u8(len);
            buf.put_u8(adj_state.state as u8);
            buf.put_u32(adj_state.ext_circuit_id);
            if let Some((neighbor, circuit_id)) = &adj_state.neighbor {
                buf.put_slice(neighbor.as_bytes());
                buf.put_u32(*circuit_id);
            }
        }
    }

    fn decode(buf: &mut Bytes) -> DecodeResult<HelloTlvs> {
        let mut tlvs = HelloTlvs::default();

        while buf.remaining() >= 2 {
            let tlv_type = buf.get_u8();
            let tlv_len = buf.get_u8() as usize;
            if tlv_len > buf.remaining() {
                return Err(DecodeError::InvalidTlvLength(tlv_len as u8));
            }
            let mut value = buf.split_to(tlv_len);

            match TlvType::from_u8(tlv_type) {
                Some(TlvType::AreaAddresses) => {
                    decode_area_addrs(&mut value, &mut tlvs.area_addrs)?;
                }
                Some(TlvType::ProtocolsSupported) => {
                    while value.remaining() > 0 {
                        tlvs.protocols_supported.push(value.get_u8());
                    }
                }
                Some(TlvType::Ipv4Addresses) => {
                    while value.remaining() >= 4 {
                        tlvs.ipv4_addrs
                            .push(Ipv4Addr::from(value.get_u32()));
                    }
                }
                Some(TlvType::P2pAdjState) => {
                    let state = value.try_get_u8()?;
                    let state = AdjThreeWayState::from_u8(state)
                        .ok_or(DecodeError::InvalidTlvLength(state))?;
                    let ext_circuit_id = value.try_get_u32()?;
                    let neighbor = if value.remaining() >= 10 {
                        let neighbor = decode_system_id(&mut value)?;
                        let circuit_id = value.get_u32();
                        Some((neighbor, circuit_id))
                    } else {
                        None
                    };
                    tlvs.adj_state = Some(AdjStateTlv {
                        state,
                        ext_circuit_id,
                        neighbor,
                    });
                }
                // Unknown TLVs are ignored.
                _ => (),
            }
        }

        Ok(tlvs)
    }
}

// ===== impl LspTlvs =====

impl LspTlvs {
    fn encode(&self, buf: &mut BytesMut) {
        encode_area_addrs(buf, &self.area_addrs);
        encode_protocols_supported(buf, &self.protocols_supported);
        encode_ipv4_addrs(buf, &self.ipv4_addrs);

        // IS reachability (TLV 2): virtual flag plus 11-octet entries.
        if !self.is_reach.is_empty() {
            buf.put_u8(TlvType::IsReach as u8);
            buf.put_u8(1 + self.is_reach.len() as u8 * 11);
            buf.put_u8(0);
            for reach in &self.is_reach {
                buf.put_u8(reach.metric);
                // Delay, expense and error metrics are unsupported.
                buf.put_u8(0x80);
                buf.put_u8(0x80);
                buf.put_u8(0x80);
                encode_lan_id(buf, &reach.neighbor);
            }
        }

        // IP internal reachability (TLV 128): 12-octet entries.
        if !self.ip_internal_reach.is_empty() {
            buf.put_u8(TlvType::Ipv4InternalReach as u8);
            buf.put_u8(self.ip_internal_reach.len() as u8 * 12);
            for reach in &self.ip_internal_reach {
                buf.put_u8(reach.metric);
                buf.put_u8(0x80);
                buf.put_u8(0x80);
                buf.put_u8(0x80);
                buf.put_ipv4(&reach.prefix.ip());
                buf.put_ipv4(&reach.prefix.mask());
            }
        }
    }

    fn decode(buf: &mut Bytes) -> DecodeResult<LspTlvs> {
        let mut tlvs = LspTlvs::default();

        while buf.remaining() >= 2 {
            let tlv_type = buf.get_u8();
            let tlv_len = buf.get_u8() as usize;
            if tlv_len > buf.remaining() {
                return Err(DecodeError::InvalidTlvLength(tlv_len as u8));
            }
            let mut value = buf.split_to(tlv_len);

            match TlvType::from_u8(tlv_type) {
                Some(TlvType::AreaAddresses) => {
                    decode_area_addrs(&mut value, &mut tlvs.area_addrs)?;
                }
                Some(TlvType::ProtocolsSupported) => {
                    while value.remaining() > 0 {
                        tlvs.protocols_supported.push(value.get_u8());
                    }
                }
                Some(TlvType::Ipv4Addresses) => {
                    while value.remaining() >= 4 {
                        tlvs.ipv4_addrs
                            .push(Ipv4Addr::from(value.get_u32()));
                    }
                }
                Some(TlvType::IsReach) => {
                    let _virtual_flag = value.try_get_u8()?;
                    while value.remaining() >= 11 {
                        let metric = value.get_u8();
                        let _delay = value.get_u8();
                        let _expense = value.get_u8();
                        let _error = value.get_u8();
                        let neighbor = decode_lan_id(&mut value)?;
                        tlvs.is_reach.push(IsReach { neighbor, metric });
                    }
                }
                Some(TlvType::Ipv4InternalReach) => {
                    while value.remaining() >= 12 {
                        let metric = value.get_u8();
                        let _delay = value.get_u8();
                        let _expense = value.get_u8();
                        let _error = value.get_u8();
                        let addr = Ipv4Addr::from(value.get_u32());
                        let mask = Ipv4Addr::from(value.get_u32());
                        let Ok(prefix) =
                            Ipv4Network::with_netmask(addr, mask)
                        else {
                            continue;
                        };
                        tlvs.ip_internal_reach.push(IpReach {
                            prefix,
                            metric,
                        });
                    }
                }
                // Unknown TLVs are ignored.
                _ => (),
            }
        }

        Ok(tlvs)
    }
}

// ===== impl Lsp =====

impl Lsp {
    /// Builds an LSP, computing the checksum from the encoded form.
    pub fn new(
        level: LevelNumber,
        rem_lifetime: u16,
        lsp_id: LspId,
        seq_no: u32,
        flags: u8,
        tlvs: LspTlvs,
    ) -> Lsp {
        let mut lsp = Lsp {
            level,
            rem_lifetime,
            lsp_id,
            seq_no,
            cksum: 0,
            flags,
            tlvs,
        };
        let encoded = Pdu::Lsp(lsp.clone()).encode();
        lsp.cksum = u16::from_be_bytes([
            encoded[Pdu::LSP_CKSUM_POS.start],
            encoded[Pdu::LSP_CKSUM_POS.start + 1],
        ]);
        lsp
    }
}

// ===== helper functions =====

fn encode_system_id(buf: &mut BytesMut, system_id: &SystemId) {
    buf.put_slice(system_id.as_bytes());
}

fn decode_system_id(buf: &mut Bytes) -> DecodeResult<SystemId> {
    let mut bytes = [0; SystemId::LENGTH];
    buf.try_copy_to_slice(&mut bytes)?;
    Ok(SystemId::new(bytes))
}

fn encode_lan_id(buf: &mut BytesMut, lan_id: &LanId) {
    encode_system_id(buf, &lan_id.system_id);
    buf.put_u8(lan_id.pseudonode);
}

fn decode_lan_id(buf: &mut Bytes) -> DecodeResult<LanId> {
    let system_id = decode_system_id(buf)?;
    let pseudonode = buf.try_get_u8()?;
    Ok(LanId {
        system_id,
        pseudonode,
    })
}

fn encode_lsp_id(buf: &mut BytesMut, lsp_id: &LspId) {
    encode_system_id(buf, &lsp_id.system_id);
    buf.put_u8(lsp_id.pseudonode);
    buf.put_u8(lsp_id.fragment);
}

fn decode_lsp_id(buf: &mut Bytes) -> DecodeResult<LspId> {
    let system_id = decode_system_id(buf)?;
    let pseudonode = buf.try_get_u8()?;
    let fragment = buf.try_get_u8()?;
    Ok(LspId {
        system_id,
        pseudonode,
        fragment,
    })
}

fn encode_area_addrs(buf: &mut BytesMut, area_addrs: &[AreaAddr]) {
    if area_addrs.is_empty() {
        return;
    }
    buf.put_u8(TlvType::AreaAddresses as u8);
    let len = area_addrs
        .iter()
        .map(|area| 1 + area.0.len())
        .sum::<usize>();
    buf.put_u8(len as u8);
    for area in area_addrs {
        buf.put_u8(area.0.len() as u8);
        buf.put_slice(&area.0);
    }
}

fn decode_area_addrs(
    buf: &mut Bytes,
    area_addrs: &mut Vec<AreaAddr>,
) -> DecodeResult<()> {
    while buf.remaining() > 0 {
        let addr_len = buf.try_get_u8()? as usize;
        if addr_len == 0 || addr_len > buf.remaining() {
            return Err(DecodeError::InvalidTlvLength(addr_len as u8));
        }
        let mut addr = vec![0; addr_len];
        buf.copy_to_slice(&mut addr);
        area_addrs.push(AreaAddr(addr));
    }
    Ok(())
}

fn encode_protocols_supported(buf: &mut BytesMut, nlpids: &[u8]) {
    if nlpids.is_empty() {
        return;
    }
    buf.put_u8(TlvType::ProtocolsSupported as u8);
    buf.put_u8(nlpids.len() as u8);
    buf.put_slice(nlpids);
}

fn encode_ipv4_addrs(buf: &mut BytesMut, addrs: &[Ipv4Addr]) {
    if addrs.is_empty() {
        return;
    }
    buf.put_u8(TlvType::Ipv4Addresses as u8);
    buf.put_u8(addrs.len() as u8 * 4);
    for addr in addrs {
        buf.put_ipv4(addr);
    }
}

// Fletcher checksum with the checkoff scaling factor, positioning the
// check bytes at the LSP checksum offset.
fn lsp_checksum(data: &[u8]) -> [u8; 2] {
    let checksum = fletcher::calc_fletcher16(data);
    let mut checkbyte0 = (checksum & 0x00FF) as i32;
    let mut checkbyte1 = ((checksum >> 8) & 0x00FF) as i32;

    // Adjust checksum value using scaling factor.
    let sop = data.len() as u16 - 13;
    let mut x = (sop as i32 * checkbyte0 - checkbyte1) % 255;
    if x <= 0 {
        x += 255;
    }
    checkbyte1 = 510 - checkbyte0 - x;
    if checkbyte1 > 255 {
        checkbyte1 -= 255;
    }
    checkbyte0 = x;
    [checkbyte0 as u8, checkbyte1 as u8]
}

#[cfg(test)]
mod tests {
    use const_addrs::net4;

    use super::*;

    fn system_id(last: u8) -> SystemId {
        SystemId::new([0, 0, 0, 0, 0, last])
    }

    #[test]
    fn hello_roundtrip() {
        let pdu = Pdu::Hello(Hello {
            circuit_type: 3,
            source: system_id(1),
            holdtime: 30,
            local_circuit_id: 1,
            tlvs: HelloTlvs {
                area_addrs: vec!["49.0001".parse().unwrap()],
                protocols_supported: vec![NLPID_IPV4],
                ipv4_addrs: vec![Ipv4Addr::new(10, 0, 0, 1)],
                adj_state: Some(AdjStateTlv {
                    state: AdjThreeWayState::Initializing,
                    ext_circuit_id: 1,
                    neighbor: Some((system_id(2), 1)),
                }),
            },
        });
        let encoded = pdu.encode();
        assert_eq!(Pdu::decode(&encoded).unwrap(), pdu);
    }

    #[test]
    fn lsp_roundtrip_with_checksum() {
        let lsp = Lsp::new(
            LevelNumber::L2,
            LSP_MAX_LIFETIME,
            LspId::from(system_id(1)),
            1,
            0x03,
            LspTlvs {
                area_addrs: vec!["49.0001".parse().unwrap()],
                protocols_supported: vec![NLPID_IPV4],
                ipv4_addrs: vec![Ipv4Addr::new(10, 0, 0, 1)],
                is_reach: vec![IsReach {
                    neighbor: LanId::from(system_id(2)),
                    metric: 10,
                }],
                ip_internal_reach: vec![IpReach {
                    prefix: net4!("10.0.0.0/24"),
                    metric: 10,
                }],
            },
        );
        assert_ne!(lsp.cksum, 0);

        let encoded = Pdu::Lsp(lsp.clone()).encode();
        let decoded = Pdu::decode(&encoded).unwrap();
        assert_eq!(decoded, Pdu::Lsp(lsp));
    }

    #[test]
    fn corrupted_lsp_is_rejected() {
        let lsp = Lsp::new(
            LevelNumber::L1,
            LSP_MAX_LIFETIME,
            LspId::from(system_id(1)),
            1,
            0x01,
            LspTlvs::default(),
        );
        let encoded = Pdu::Lsp(lsp).encode();
        let mut corrupted = encoded.to_vec();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xff;
        assert_eq!(
            Pdu::decode(&corrupted),
            Err(DecodeError::InvalidLspChecksum)
        );
    }

    #[test]
    fn csnp_roundtrip() {
        let pdu = Pdu::Snp(Snp {
            level: LevelNumber::L1,
            source: LanId::from(system_id(1)),
            summary: Some((
                LspId::default(),
                LspId {
                    system_id: SystemId::new([0xff; 6]),
                    pseudonode: 0xff,
                    fragment: 0xff,
                },
            )),
            entries: vec![LspEntry {
                rem_lifetime: 1200,
                lsp_id: LspId::from(system_id(2)),
                seq_no: 42,
                cksum: 0x1234,
            }],
        });
        let encoded = pdu.encode();
        assert_eq!(Pdu::decode(&encoded).unwrap(), pdu);
    }

    #[test]
    fn psnp_roundtrip() {
        let pdu = Pdu::Snp(Snp {
            level: LevelNumber::L2,
            source: LanId::from(system_id(3)),
            summary: None,
            entries: vec![LspEntry {
                rem_lifetime: 0,
                lsp_id: LspId::from(system_id(4)),
                seq_no: 7,
                cksum: 0xabcd,
            }],
        });
        let encoded = pdu.encode();
        assert_eq!(Pdu::decode(&encoded).unwrap(), pdu);
    }
}
