//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeSet, VecDeque};
use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use mimic_utils::bytes::BytesMutExt;
use num_traits::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::packet::consts::{
    AS_TRANS, AsPathSegmentType, AttrFlags, AttrType, Origin,
};
use crate::packet::error::UpdateMessageError;
use crate::packet::message::{DecodeCxt, EncodeCxt};

pub const ATTR_MIN_LEN: u16 = 3;

//
// UPDATE message path attributes.
//
// Encoding format (attribute header):
//
// 0                   1
// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |  Attr. Flags  |Attr. Type Code|
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Attrs {
    pub origin: Origin,
    pub as_path: AsPath,
    pub nexthop: Option<Ipv4Addr>,
    pub med: Option<u32>,
    pub local_pref: Option<u32>,
    pub communities: Option<BTreeSet<u32>>,
}

#[derive(Clone, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct AsPath {
    pub segments: VecDeque<AsPathSegment>,
}

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct AsPathSegment {
    pub seg_type: AsPathSegmentType,
    pub members: VecDeque<u32>,
}

// ===== impl Attrs =====

impl Attrs {
    pub(crate) fn encode(
        &self,
        buf: &mut BytesMut,
        nexthop: Option<Ipv4Addr>,
        cxt: &EncodeCxt,
    ) {
        // RFC 4271 - Section 5:
        // "The sender of an UPDATE message SHOULD order path attributes
        // within the UPDATE message in ascending order of attribute type".

        // ORIGIN attribute.
        attr_encode_hdr(buf, AttrFlags::TRANSITIVE, AttrType::Origin, 1);
        buf.put_u8(self.origin.to_u8().unwrap());

        // AS_PATH attribute.
        self.as_path.encode(buf, cxt.four_octet_as);

        // NEXT_HOP attribute.
        if let Some(nexthop) = nexthop.or(self.nexthop) {
            attr_encode_hdr(buf, AttrFlags::TRANSITIVE, AttrType::Nexthop, 4);
            buf.put_ipv4(&nexthop);
        }

        // MULTI_EXIT_DISC attribute.
        if let Some(med) = self.med {
            attr_encode_hdr(buf, AttrFlags::OPTIONAL, AttrType::Med, 4);
            buf.put_u32(med);
        }

        // LOCAL_PREF attribute.
        if let Some(local_pref) = self.local_pref {
            attr_encode_hdr(buf, AttrFlags::TRANSITIVE, AttrType::LocalPref, 4);
            buf.put_u32(local_pref);
        }

        // COMMUNITIES attribute.
        if let Some(communities) = &self.communities {
            attr_encode_hdr(
                buf,
                AttrFlags::OPTIONAL | AttrFlags::TRANSITIVE,
                AttrType::Communities,
                communities.len() as u16 * 4,
            );
            for community in communities {
                buf.put_u32(*community);
            }
        }
    }

    pub(crate) fn decode(
        buf: &mut Bytes,
        cxt: &DecodeCxt,
    ) -> Result<Attrs, UpdateMessageError> {
        let mut origin = None;
        let mut as_path = None;
        let mut nexthop = None;
        let mut med = None;
        let mut local_pref = None;
        let mut communities = None;

        while buf.remaining() > 0 {
            if buf.remaining() < ATTR_MIN_LEN as usize {
                return Err(UpdateMessageError::MalformedAttributeList);
            }

            // Parse attribute flags and type.
            let attr_flags = AttrFlags::from_bits_truncate(buf.get_u8());
            let attr_type_raw = buf.get_u8();
            let attr_type = AttrType::from_u8(attr_type_raw);

            // Parse attribute length.
            let attr_len = if attr_flags.contains(AttrFlags::EXTENDED) {
                buf.try_get_u16()? as usize
            } else {
                buf.try_get_u8()? as usize
            };
            if attr_len > buf.remaining() {
                return Err(UpdateMessageError::MalformedAttributeList);
            }
            let mut value = buf.split_to(attr_len);

            match attr_type {
                Some(AttrType::Origin) => {
                    if value.remaining() != 1 {
                        return Err(
                            UpdateMessageError::MalformedAttributeList,
                        );
                    }
                    origin = Some(
                        Origin::from_u8(value.get_u8()).ok_or(
                            UpdateMessageError::MalformedAttributeList,
                        )?,
                    );
                }
                Some(AttrType::AsPath) => {
                    as_path =
                        Some(AsPath::decode(&mut value, cxt.four_octet_as)?);
                }
                Some(AttrType::Nexthop) => {
                    if value.remaining() != 4 {
                        return Err(
                            UpdateMessageError::MalformedAttributeList,
                        );
                    }
                    nexthop = Some(Ipv4Addr::from(value.get_u32()));
                }
                Some(AttrType::Med) => {
                    if value.remaining() != 4 {
                        return Err(
                            UpdateMessageError::OptionalAttributeError,
                        );
                    }
                    med = Some(value.get_u32());
                }
                Some(AttrType::LocalPref) => {
                    if value.remaining() != 4 {
                        return Err(
                            UpdateMessageError::MalformedAttributeList,
                        );
                    }
                    local_pref = Some(value.get_u32());
                }
                Some(AttrType::Communities) => {
                    if value.remaining() % 4 != 0 {
                        return Err(
                            UpdateMessageError::OptionalAttributeError,
                        );
                    }
                    let mut list = BTreeSet::new();
                    while value.remaining() > 0 {
                        list.insert(value.get_u32());
                    }
                    communities = Some(list);
                }
                Some(AttrType::AtomicAggregate)
                | Some(AttrType::Aggregator) => {
                    // Accepted and discarded.
                }
                None => {
                    // Unrecognized optional attributes are discarded per
                    // the RFC 7606 revised error handling; unrecognized
                    // well-known attributes reset the session.
                    if !attr_flags.contains(AttrFlags::OPTIONAL) {
                        return Err(
                            UpdateMessageError::UnrecognizedWellKnownAttribute,
                        );
                    }
                }
            }
        }

        // Mandatory attributes.
        let (Some(origin), Some(as_path)) = (origin, as_path) else {
            return Err(UpdateMessageError::MalformedAttributeList);
        };

        Ok(Attrs {
            origin,
            as_path,
            nexthop,
            med,
            local_pref,
            communities,
        })
    }
}

// ===== impl AsPath =====

impl AsPath {
    /// An empty AS path, used for locally originated routes.
    pub fn empty() -> AsPath {
        AsPath::default()
    }

    /// Builds a single-sequence path from the given AS list.
    pub fn from_sequence(members: impl IntoIterator<Item = u32>) -> AsPath {
        AsPath {
            segments: [AsPathSegment {
                seg_type: AsPathSegmentType::Sequence,
                members: members.into_iter().collect(),
            }]
            .into(),
        }
    }

    /// Path length used by the decision process: each sequence member
    /// counts one, an entire set counts one.
    pub fn path_length(&self) -> usize {
        self.segments
            .iter()
            .map(|segment| match segment.seg_type {
                AsPathSegmentType::Sequence => segment.members.len(),
                AsPathSegmentType::Set => 1,
            })
            .sum()
    }

    /// The neighboring AS the path was received from.
    pub fn first_as(&self) -> Option<u32> {
        self.segments
            .front()
            .filter(|segment| {
                segment.seg_type == AsPathSegmentType::Sequence
            })
            .and_then(|segment| segment.members.front().copied())
    }

    /// Returns true if `asn` appears anywhere in the path.
    pub fn contains(&self, asn: u32) -> bool {
        self.segments
            .iter()
            .any(|segment| segment.members.contains(&asn))
    }

    /// Returns a copy of the path with `asn` prepended.
    pub fn prepend(&self, asn: u32) -> AsPath {
        let mut path = self.clone();
        match path.segments.front_mut() {
            Some(segment)
                if segment.seg_type == AsPathSegmentType::Sequence
                    && segment.members.len() < 255 =>
            {
                segment.members.push_front(asn);
            }
            _ => {
                path.segments.push_front(AsPathSegment {
                    seg_type: AsPathSegmentType::Sequence,
                    members: [asn].into(),
                });
            }
        }
        path
    }

    fn encode(&self, buf: &mut BytesMut, four_octet_as: bool) {
        let len = self
            .segments
            .iter()
            .map(|segment| {
                2 + segment.members.len() * if four_octet_as { 4 } else { 2 }
            })
            .sum::<usize>() as u16;
        attr_encode_hdr(buf, AttrFlags::TRANSITIVE, AttrType::AsPath, len);

        for segment in &self.segments {
            buf.put_u8(segment.seg_type.to_u8().unwrap());
            buf.put_u8(segment.members.len() as u8);
            for member in &segment.members {
                if four_octet_as {
                    buf.put_u32(*member);
                } else if *member > u16::MAX as u32 {
                    buf.put_u16(AS_TRANS);
                } else {
                    buf.put_u16(*member as u16);
                }
            }
        }
    }

    fn decode(
        buf: &mut Bytes,
        four_octet_as: bool,
    ) -> Result<AsPath, UpdateMessageError> {
        let mut segments = VecDeque::new();

        while buf.remaining() > 0 {
            if buf.remaining() < 2 {
                return Err(UpdateMessageError::MalformedAttributeList);
            }
            let seg_type = AsPathSegmentType::from_u8(buf.get_u8())
                .ok_or(UpdateMessageError::MalformedAttributeList)?;
            let count = buf.get_u8() as usize;

            let member_size = if four_octet_as { 4 } else { 2 };
            if buf.remaining() < count * member_size {
                return Err(UpdateMessageError::MalformedAttributeList);
            }
            let members = (0..count)
                .map(|_| {
                    if four_octet_as {
                        buf.get_u32()
                    } else {
                        buf.get_u16() as u32
                    }
                })
                .collect();
            segments.push_back(AsPathSegment { seg_type, members });
        }

        Ok(AsPath { segments })
    }
}

// ===== helper functions =====

// Encodes an attribute header, using the extended-length form when the
// value doesn't fit in one octet.
fn attr_encode_hdr(
    buf: &mut BytesMut,
    mut flags: AttrFlags,
    attr_type: AttrType,
    len: u16,
) {
    if len > u8::MAX as u16 {
        flags.insert(AttrFlags::EXTENDED);
        buf.put_u8(flags.bits());
        buf.put_u8(attr_type.to_u8().unwrap());
        buf.put_u16(len);
    } else {
        buf.put_u8(flags.bits());
        buf.put_u8(attr_type.to_u8().unwrap());
        buf.put_u8(len as u8);
    }
}
