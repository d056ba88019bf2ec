//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::time::Duration;

use derive_new::new;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::protocol::RouteSource;

/// Candidate route handed from a protocol instance to the RIB task.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct RouteMsg {
    pub prefix: Ipv4Network,
    pub nexthop: Ipv4Addr,
    pub ifname: String,
    pub source: RouteSource,
    pub distance: u32,
    pub metric: u32,
    pub attrs: RouteAttrs,
    /// Candidates not refreshed within this window are aged out. `None`
    /// disables aging (connected and static routes).
    pub stale_timeout: Option<Duration>,
}

/// Protocol-specific route attributes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum RouteAttrs {
    #[default]
    None,
    Bgp {
        origin: u8,
        as_path: Vec<u32>,
        communities: BTreeSet<u32>,
        local_pref: Option<u32>,
        med: Option<u32>,
    },
    Ospf {
        area: Ipv4Addr,
    },
    Isis {
        level: u8,
    },
}

/// Route table updates produced by protocol instances and the
/// configuration layer.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum RouteUpdateMsg {
    Install(RouteMsg),
    Withdraw {
        prefix: Ipv4Network,
        source: RouteSource,
    },
    /// Withdraw every candidate learned from `source` (protocol shutdown).
    WithdrawAll {
        source: RouteSource,
    },
}
