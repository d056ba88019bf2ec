//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;

// Extension methods for Ipv4Addr.
pub trait Ipv4AddrExt {
    /// Length of an IPv4 address in bits.
    const LENGTH: usize = 32;

    /// Returns the /32 prefix containing this address.
    fn to_host_prefix(&self) -> Ipv4Network;

    /// Returns true if this is an address usable as a route next-hop.
    fn is_usable(&self) -> bool;
}

// Extension methods for Ipv4Network.
pub trait Ipv4NetworkExt {
    /// Returns a new network with the host bits zeroed out.
    fn apply_mask(&self) -> Ipv4Network;

    /// Returns true if the network is a host prefix (/32).
    fn is_host_prefix(&self) -> bool;
}

// ===== impl Ipv4Addr =====

impl Ipv4AddrExt for Ipv4Addr {
    fn to_host_prefix(&self) -> Ipv4Network {
        Ipv4Network::new(*self, Self::LENGTH as u8).unwrap()
    }

    fn is_usable(&self) -> bool {
        !self.is_unspecified()
            && !self.is_loopback()
            && !self.is_broadcast()
            && !self.is_multicast()
    }
}

// ===== impl Ipv4Network =====

impl Ipv4NetworkExt for Ipv4Network {
    fn apply_mask(&self) -> Ipv4Network {
        Ipv4Network::new(self.network(), self.prefix()).unwrap()
    }

    fn is_host_prefix(&self) -> bool {
        self.prefix() == <Ipv4Addr as Ipv4AddrExt>::LENGTH as u8
    }
}
