//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::qos::QosClass;

// Minimum IPv4 header length (no options).
pub const IPV4_HDR_MIN_LEN: usize = 20;

// IANA protocol numbers the parser knows L4 ports for.
pub const IP_PROTO_ICMP: u8 = 1;
pub const IP_PROTO_TCP: u8 = 6;
pub const IP_PROTO_UDP: u8 = 17;

//
// An owned packet buffer plus its parsed header view.
//
// Packets are immutable after construction; every mutation (TTL decrement,
// bit corruption) produces a new packet sharing the ingress metadata.
// Duplication clones the buffer.
//
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    data: Bytes,
    pub ingress_ifname: String,
    pub ingress_time: Instant,
    pub header: Ipv4Header,
}

// Parsed IPv4/L4 header view.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Ipv4Header {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: u8,
    pub ttl: u8,
    pub dscp: u8,
    pub total_len: u16,
    pub hdr_len: usize,
    // (source port, destination port) for TCP and UDP.
    pub ports: Option<(u16, u16)>,
}

// Packet parse errors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum PacketError {
    TooShort,
    BadVersion(u8),
    BadHeaderLength(u8),
    BadTotalLength(u16),
    BadChecksum,
}

// ===== impl Packet =====

impl Packet {
    /// Parses and validates an IPv4 packet received on `ingress_ifname`.
    pub fn parse(
        data: Bytes,
        ingress_ifname: &str,
        ingress_time: Instant,
    ) -> Result<Packet, PacketError> {
        if data.len() < IPV4_HDR_MIN_LEN {
            return Err(PacketError::TooShort);
        }

        let version = data[0] >> 4;
        if version != 4 {
            return Err(PacketError::BadVersion(version));
        }
        let ihl = data[0] & 0x0f;
        let hdr_len = ihl as usize * 4;
        if ihl < 5 || hdr_len > data.len() {
            return Err(PacketError::BadHeaderLength(ihl));
        }

        let total_len = u16::from_be_bytes([data[2], data[3]]);
        if (total_len as usize) < hdr_len || total_len as usize > data.len() {
            return Err(PacketError::BadTotalLength(total_len));
        }

        // RFC 1071 checksum over the header must be zero.
        let cksum = internet_checksum::checksum(&data[..hdr_len]);
        if cksum != [0, 0] {
            return Err(PacketError::BadChecksum);
        }

        let dscp = data[1] >> 2;
        let ttl = data[8];
        let protocol = data[9];
        let src = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
        let dst = Ipv4Addr::new(data[16], data[17], data[18], data[19]);

        // L4 port view for TCP and UDP.
        let mut ports = None;
        if matches!(protocol, IP_PROTO_TCP | IP_PROTO_UDP)
            && data.len() >= hdr_len + 4
        {
            let sport = u16::from_be_bytes([data[hdr_len], data[hdr_len + 1]]);
            let dport =
                u16::from_be_bytes([data[hdr_len + 2], data[hdr_len + 3]]);
            ports = Some((sport, dport));
        }

        Ok(Packet {
            data,
            ingress_ifname: ingress_ifname.to_owned(),
            ingress_time,
            header: Ipv4Header {
                src,
                dst,
                protocol,
                ttl,
                dscp,
                total_len,
                hdr_len,
                ports,
            },
        })
    }

    /// Builds a well-formed IPv4 packet. Intended for locally originated
    /// packets and tests.
    pub fn build_ipv4(
        src: Ipv4Addr,
        dst: Ipv4Addr,
        protocol: u8,
        ttl: u8,
        dscp: u8,
        payload: &[u8],
        ingress_ifname: &str,
        ingress_time: Instant,
    ) -> Packet {
        let total_len = (IPV4_HDR_MIN_LEN + payload.len()) as u16;
        let mut buf = BytesMut::with_capacity(total_len as usize);
        buf.put_u8(0x45);
        buf.put_u8(dscp << 2);
        buf.put_u16(total_len);
        // Identification, flags, fragment offset.
        buf.put_u32(0);
        buf.put_u8(ttl);
        buf.put_u8(protocol);
        // Checksum placeholder.
        buf.put_u16(0);
        buf.put_slice(&src.octets());
        buf.put_slice(&dst.octets());
        let cksum = internet_checksum::checksum(&buf[..IPV4_HDR_MIN_LEN]);
        buf[10..12].copy_from_slice(&cksum);
        buf.put_slice(payload);

        // The header was just built, so parsing cannot fail.
        Packet::parse(buf.freeze(), ingress_ifname, ingress_time).unwrap()
    }

    /// Raw packet bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// On-wire packet length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Scheduling class selected by the DSCP field.
    pub fn qos_class(&self) -> QosClass {
        QosClass::from_dscp(self.header.dscp)
    }

    /// Returns a copy of the packet with the TTL decremented and the header
    /// checksum recomputed, or `None` if the TTL has expired.
    pub fn decrement_ttl(&self) -> Option<Packet> {
        if self.header.ttl <= 1 {
            return None;
        }

        let mut buf = BytesMut::from(&self.data[..]);
        buf[8] = self.header.ttl - 1;
        buf[10..12].copy_from_slice(&[0, 0]);
        let cksum = internet_checksum::checksum(&buf[..self.header.hdr_len]);
        buf[10..12].copy_from_slice(&cksum);

        let mut header = self.header;
        header.ttl -= 1;
        Some(Packet {
            data: buf.freeze(),
            ingress_ifname: self.ingress_ifname.clone(),
            ingress_time: self.ingress_time,
            header,
        })
    }

    /// Number of payload bits available for corruption.
    pub fn payload_bits(&self) -> usize {
        (self.data.len() - self.header.hdr_len) * 8
    }

    /// Returns a copy of the packet with one payload bit flipped.
    ///
    /// `bit` is an offset into the payload, past the IPv4 header. The header
    /// view is left untouched; corrupted packets are forwarded as-is.
    pub fn flip_payload_bit(&self, bit: usize) -> Packet {
        let mut buf = BytesMut::from(&self.data[..]);
        let byte = self.header.hdr_len + bit / 8;
        buf[byte] ^= 1 << (bit % 8);
        Packet {
            data: buf.freeze(),
            ingress_ifname: self.ingress_ifname.clone(),
            ingress_time: self.ingress_time,
            header: self.header,
        }
    }

    /// Synthesizes an ICMP Time Exceeded message toward the source of the
    /// expired packet, per RFC 792 (original header plus eight payload
    /// bytes quoted).
    pub fn icmp_time_exceeded(
        &self,
        router_addr: Ipv4Addr,
        now: Instant,
    ) -> Packet {
        let quoted_len =
            (self.header.hdr_len + 8).min(self.data.len());

        let mut icmp = BytesMut::with_capacity(8 + quoted_len);
        // Type 11 (time exceeded), code 0 (TTL exceeded in transit).
        icmp.put_u8(11);
        icmp.put_u8(0);
        // Checksum placeholder, unused field.
        icmp.put_u16(0);
        icmp.put_u32(0);
        icmp.put_slice(&self.data[..quoted_len]);
        let cksum = internet_checksum::checksum(&icmp);
        icmp[2..4].copy_from_slice(&cksum);

        Packet::build_ipv4(
            router_addr,
            self.header.src,
            IP_PROTO_ICMP,
            64,
            QosClass::NetworkControl.index() as u8 * 8,
            &icmp,
            &self.ingress_ifname,
            now,
        )
    }
}

// ===== impl PacketError =====

impl std::fmt::Display for PacketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketError::TooShort => {
                write!(f, "packet too short")
            }
            PacketError::BadVersion(version) => {
                write!(f, "unsupported IP version: {version}")
            }
            PacketError::BadHeaderLength(ihl) => {
                write!(f, "invalid header length: {ihl}")
            }
            PacketError::BadTotalLength(len) => {
                write!(f, "invalid total length: {len}")
            }
            PacketError::BadChecksum => {
                write!(f, "invalid header checksum")
            }
        }
    }
}

impl std::error::Error for PacketError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Packet {
        Packet::build_ipv4(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 1, 1),
            IP_PROTO_UDP,
            64,
            46,
            &[0x12, 0x34, 0x56, 0x78, 0xab, 0xcd, 0xef, 0x01],
            "eth0",
            Instant::now(),
        )
    }

    #[test]
    fn parse_roundtrip() {
        let packet = sample();
        assert_eq!(packet.header.src, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(packet.header.dst, Ipv4Addr::new(10, 0, 1, 1));
        assert_eq!(packet.header.protocol, IP_PROTO_UDP);
        assert_eq!(packet.header.ttl, 64);
        assert_eq!(packet.header.dscp, 46);
        assert_eq!(packet.header.ports, Some((0x1234, 0x5678)));
        assert_eq!(packet.len(), 28);
    }

    #[test]
    fn parse_rejects_bad_checksum() {
        let packet = sample();
        let mut raw = BytesMut::from(&packet.data()[..]);
        raw[10] ^= 0xff;
        assert_eq!(
            Packet::parse(raw.freeze(), "eth0", Instant::now()),
            Err(PacketError::BadChecksum)
        );
    }

    #[test]
    fn parse_rejects_truncated() {
        let packet = sample();
        let raw = packet.data().slice(..10);
        assert_eq!(
            Packet::parse(raw, "eth0", Instant::now()),
            Err(PacketError::TooShort)
        );
    }

    #[test]
    fn ttl_decrement_rewrites_checksum() {
        let packet = sample();
        let fwd = packet.decrement_ttl().unwrap();
        assert_eq!(fwd.header.ttl, 63);
        // The rewritten packet must still parse cleanly.
        let reparsed =
            Packet::parse(fwd.data().clone(), "eth0", Instant::now()).unwrap();
        assert_eq!(reparsed.header.ttl, 63);
    }

    #[test]
    fn ttl_expiry() {
        let packet = Packet::build_ipv4(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 1, 1),
            IP_PROTO_UDP,
            1,
            0,
            &[],
            "eth0",
            Instant::now(),
        );
        assert!(packet.decrement_ttl().is_none());
    }

    #[test]
    fn bit_flip_changes_exactly_one_bit() {
        let packet = sample();
        let corrupted = packet.flip_payload_bit(13);
        let diff: u32 = packet
            .data()
            .iter()
            .zip(corrupted.data().iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum();
        assert_eq!(diff, 1);
    }

    #[test]
    fn icmp_time_exceeded_addresses() {
        let packet = sample();
        let router = Ipv4Addr::new(192, 168, 1, 1);
        let icmp = packet.icmp_time_exceeded(router, Instant::now());
        assert_eq!(icmp.header.src, router);
        assert_eq!(icmp.header.dst, packet.header.src);
        assert_eq!(icmp.header.protocol, IP_PROTO_ICMP);
    }
}
