//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::str::FromStr;

use serde::{Deserialize, Serialize};

// The route sources mimic supports.
//
// The enum order doubles as the decision-process tie-break rank: when two
// candidates have equal administrative distance and metric, the source that
// sorts first wins.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteSource {
    Connected,
    Static,
    Ospfv2,
    Isis,
    Bgp,
}

// ===== impl RouteSource =====

impl RouteSource {
    /// Default administrative distance for routes from this source.
    ///
    /// BGP sessions override this per peer type (20 eBGP / 200 iBGP).
    pub const fn default_distance(&self) -> u32 {
        match self {
            RouteSource::Connected => 0,
            RouteSource::Static => 1,
            RouteSource::Ospfv2 => 110,
            RouteSource::Isis => 115,
            RouteSource::Bgp => 20,
        }
    }

    /// Fixed total order used as the decision-process tie-break.
    pub const fn decision_rank(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for RouteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteSource::Connected => write!(f, "connected"),
            RouteSource::Static => write!(f, "static"),
            RouteSource::Ospfv2 => write!(f, "ospfv2"),
            RouteSource::Isis => write!(f, "isis"),
            RouteSource::Bgp => write!(f, "bgp"),
        }
    }
}

impl FromStr for RouteSource {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_ref() {
            "connected" => Ok(RouteSource::Connected),
            "static" => Ok(RouteSource::Static),
            "ospfv2" => Ok(RouteSource::Ospfv2),
            "isis" => Ok(RouteSource::Isis),
            "bgp" => Ok(RouteSource::Bgp),
            _ => Err(()),
        }
    }
}
