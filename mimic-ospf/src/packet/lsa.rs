//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use derive_new::new;
use mimic_utils::bytes::BytesMutExt;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::packet::error::{DecodeError, DecodeResult};

// LSA constants, per RFC 2328 Appendix B.
pub const LSA_MAX_AGE: u16 = 3600;
pub const LSA_REFRESH_INTERVAL: u16 = 1800;
pub const LSA_INIT_SEQ_NO: u32 = 0x80000001;
pub const LSA_HDR_LEN: u16 = 20;

// LS Types.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum LsaType {
    Router = 1,
    Network = 2,
}

// Router LSA link types.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum LsaRouterLinkType {
    PointToPoint = 1,
    TransitNetwork = 2,
    StubNetwork = 3,
}

//
// LSA header.
//
// Encoding format:
//
// 0                   1                   2                   3
// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |            LS age             |    Options    |    LS type    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                        Link State ID                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     Advertising Router                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                     LS sequence number                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |         LS checksum           |             length            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Copy, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaHdr {
    pub age: u16,
    pub options: u8,
    pub lsa_type: LsaType,
    pub lsa_id: Ipv4Addr,
    pub adv_rtr: Ipv4Addr,
    pub seq_no: u32,
    pub cksum: u16,
    pub length: u16,
}

// Database key of an LSA.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaKey {
    pub lsa_type: LsaType,
    pub adv_rtr: Ipv4Addr,
    pub lsa_id: Ipv4Addr,
}

// Complete LSA.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Lsa {
    pub hdr: LsaHdr,
    pub body: LsaBody,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaBody {
    Router(LsaRouter),
    Network(LsaNetwork),
}

//
// Router-LSA.
//
// Encoding format (body):
//
// 0                   1                   2                   3
// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |    0    |V|E|B|        0      |            # links            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          Link ID                              |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                         Link Data                             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |     Type      |     # TOS     |            metric             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaRouter {
    pub flags: u8,
    pub links: Vec<LsaRouterLink>,
}

#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaRouterLink {
    pub link_type: LsaRouterLinkType,
    pub link_id: Ipv4Addr,
    pub link_data: Ipv4Addr,
    pub metric: u16,
}

//
// Network-LSA.
//
// The Link State ID is the interface address of the designated router;
// attached routers are listed by router-id.
//
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaNetwork {
    pub mask: Ipv4Addr,
    pub attached_rtrs: Vec<Ipv4Addr>,
}

// ===== impl LsaHdr =====

impl LsaHdr {
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.age);
        buf.put_u8(self.options);
        buf.put_u8(self.lsa_type as u8);
        buf.put_ipv4(&self.lsa_id);
        buf.put_ipv4(&self.adv_rtr);
        buf.put_u32(self.seq_no);
        buf.put_u16(self.cksum);
        buf.put_u16(self.length);
    }

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<LsaHdr> {
        let age = buf.try_get_u16()?;
        let options = buf.try_get_u8()?;
        let lsa_type = buf.try_get_u8()?;
        let lsa_type = LsaType::from_u8(lsa_type)
            .ok_or(DecodeError::UnknownLsaType(lsa_type))?;
        let lsa_id = Ipv4Addr::from(buf.try_get_u32()?);
        let adv_rtr = Ipv4Addr::from(buf.try_get_u32()?);
        let seq_no = buf.try_get_u32()?;
        let cksum = buf.try_get_u16()?;
        let length = buf.try_get_u16()?;

        Ok(LsaHdr {
            age,
            options,
            lsa_type,
            lsa_id,
            adv_rtr,
            seq_no,
            cksum,
            length,
        })
    }

    pub fn key(&self) -> LsaKey {
        LsaKey::new(self.lsa_type, self.adv_rtr, self.lsa_id)
    }
}

// ===== impl Lsa =====

impl Lsa {
    /// Builds an LSA, computing the length and checksum fields.
    pub fn new(
        age: u16,
        lsa_id: Ipv4Addr,
        adv_rtr: Ipv4Addr,
        seq_no: u32,
        body: LsaBody,
    ) -> Lsa {
        let mut lsa = Lsa {
            hdr: LsaHdr {
                age,
                options: 0x02,
                lsa_type: body.lsa_type(),
                lsa_id,
                adv_rtr,
                seq_no,
                cksum: 0,
                length: 0,
            },
            body,
        };

        // Compute the length and checksum from the encoded form.
        let mut buf = BytesMut::with_capacity(128);
        lsa.encode(&mut buf);
        lsa.hdr.length = buf.len() as u16;
        buf[18..20].copy_from_slice(&lsa.hdr.length.to_be_bytes());
        let cksum = checksum(&buf[2..]);
        lsa.hdr.cksum = u16::from_be_bytes(cksum);
        lsa
    }

    pub fn key(&self) -> LsaKey {
        self.hdr.key()
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        self.hdr.encode(buf);
        match &self.body {
            LsaBody::Router(router) => {
                buf.put_u8(router.flags);
                buf.put_u8(0);
                buf.put_u16(router.links.len() as u16);
                for link in &router.links {
                    buf.put_ipv4(&link.link_id);
                    buf.put_ipv4(&link.link_data);
                    buf.put_u8(link.link_type as u8);
                    buf.put_u8(0);
                    buf.put_u16(link.metric);
                }
            }
            LsaBody::Network(network) => {
                buf.put_ipv4(&network.mask);
                for attached in &network.attached_rtrs {
                    buf.put_ipv4(attached);
                }
            }
        }
    }

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<Lsa> {
        let hdr = LsaHdr::decode(buf)?;
        if hdr.length < LSA_HDR_LEN {
            return Err(DecodeError::InvalidLsaLength(hdr.length));
        }
        let body_len = (hdr.length - LSA_HDR_LEN) as usize;
        if body_len > buf.remaining() {
            return Err(DecodeError::InvalidLsaLength(hdr.length));
        }
        let mut body_buf = buf.split_to(body_len);

        let body = match hdr.lsa_type {
            LsaType::Router => {
                let flags = body_buf.try_get_u8()?;
                let _reserved = body_buf.try_get_u8()?;
                let num_links = body_buf.try_get_u16()?;
                let mut links = Vec::with_capacity(num_links as usize);
                for _ in 0..num_links {
                    let link_id = Ipv4Addr::from(body_buf.try_get_u32()?);
                    let link_data = Ipv4Addr::from(body_buf.try_get_u32()?);
                    let link_type = body_buf.try_get_u8()?;
                    let link_type = LsaRouterLinkType::from_u8(link_type)
                        .ok_or(DecodeError::UnknownLsaType(link_type))?;
                    let _num_tos = body_buf.try_get_u8()?;
                    let metric = body_buf.try_get_u16()?;
                    links.push(LsaRouterLink {
                        link_type,
                        link_id,
                        link_data,
                        metric,
                    });
                }
                LsaBody::Router(LsaRouter { flags, links })
            }
            LsaType::Network => {
                let mask = Ipv4Addr::from(body_buf.try_get_u32()?);
                let mut attached_rtrs = Vec::new();
                while body_buf.remaining() >= 4 {
                    attached_rtrs.push(Ipv4Addr::from(body_buf.get_u32()));
                }
                LsaBody::Network(LsaNetwork {
                    mask,
                    attached_rtrs,
                })
            }
        };

        Ok(Lsa { hdr, body })
    }

    // Checks the fletcher checksum, skipping the age field.
    pub(crate) fn is_checksum_valid(&self) -> bool {
        let mut buf = BytesMut::with_capacity(self.hdr.length as usize);
        self.encode(&mut buf);
        fletcher::calc_fletcher16(&buf[2..]) == 0
    }

    /// Returns true if this LSA is newer than `other`, per the RFC 2328
    /// section 13.1 comparison.
    pub fn compare_newer(&self, other: &Lsa) -> bool {
        if self.hdr.seq_no != other.hdr.seq_no {
            return self.hdr.seq_no > other.hdr.seq_no;
        }
        // MaxAge wins, then materially younger age.
        if (self.hdr.age == LSA_MAX_AGE) != (other.hdr.age == LSA_MAX_AGE) {
            return self.hdr.age == LSA_MAX_AGE;
        }
        other.hdr.age.saturating_sub(self.hdr.age) > 900
    }
}

// ===== impl LsaBody =====

impl LsaBody {
    pub fn lsa_type(&self) -> LsaType {
        match self {
            LsaBody::Router(_) => LsaType::Router,
            LsaBody::Network(_) => LsaType::Network,
        }
    }
}

// ===== helper functions =====

// Fletcher checksum with the RFC 905 Annex B scaling factor, positioning
// the check bytes at the LSA checksum offset.
fn checksum(data: &[u8]) -> [u8; 2] {
    let checksum = fletcher::calc_fletcher16(data);
    let mut checkbyte0 = (checksum & 0x00FF) as i32;
    let mut checkbyte1 = ((checksum >> 8) & 0x00FF) as i32;

    let sop = data.len() as u16 - 15;
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
    use super::*;

    #[test]
    fn router_lsa_roundtrip_and_checksum() {
        let lsa = Lsa::new(
            1,
            Ipv4Addr::new(1, 1, 1, 1),
            Ipv4Addr::new(1, 1, 1, 1),
            LSA_INIT_SEQ_NO,
            LsaBody::Router(LsaRouter {
                flags: 0,
                links: vec![LsaRouterLink::new(
                    LsaRouterLinkType::StubNetwork,
                    Ipv4Addr::new(10, 0, 0, 0),
                    Ipv4Addr::new(255, 255, 255, 0),
                    10,
                )],
            }),
        );
        assert!(lsa.is_checksum_valid());
        assert_eq!(lsa.hdr.length, LSA_HDR_LEN + 4 + 12);

        let mut buf = BytesMut::new();
        lsa.encode(&mut buf);
        let decoded = Lsa::decode(&mut buf.freeze()).unwrap();
        assert_eq!(lsa, decoded);
    }

    #[test]
    fn newer_comparison() {
        let body = LsaBody::Network(LsaNetwork {
            mask: Ipv4Addr::new(255, 255, 255, 0),
            attached_rtrs: vec![Ipv4Addr::new(1, 1, 1, 1)],
        });
        let id = Ipv4Addr::new(10, 0, 0, 1);
        let old = Lsa::new(100, id, id, LSA_INIT_SEQ_NO, body.clone());
        let new = Lsa::new(100, id, id, LSA_INIT_SEQ_NO + 1, body.clone());
        assert!(new.compare_newer(&old));
        assert!(!old.compare_newer(&new));

        // Same sequence number: MaxAge wins.
        let aged = Lsa::new(LSA_MAX_AGE, id, id, LSA_INIT_SEQ_NO, body);
        assert!(aged.compare_newer(&old));
    }
}
