//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use mimic_utils::bus::RouteSummary;
use mimic_utils::protocol::RouteSource;
use mimic_utils::route::{RouteAttrs, RouteMsg};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// One active route in the persisted snapshot format.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct SnapshotRoute {
    pub dest: Ipv4Addr,
    pub len: u8,
    pub next_hop: Ipv4Addr,
    pub protocol: RouteSource,
    pub metric: u32,
    pub admin_distance: u32,
}

// ===== global functions =====

/// Serializes the active-route set to the snapshot JSON format.
pub fn dump(routes: &[RouteSummary]) -> String {
    let routes = routes
        .iter()
        .map(|summary| SnapshotRoute {
            dest: summary.prefix.ip(),
            len: summary.prefix.prefix(),
            next_hop: summary.nexthop,
            protocol: summary.source,
            metric: summary.metric,
            admin_distance: summary.distance,
        })
        .collect::<Vec<_>>();
    serde_json::to_string_pretty(&routes).unwrap()
}

/// Parses a snapshot back into install requests.
///
/// Restored routes re-enter the RIB as static routes, with semantics
/// identical to a fresh install. The egress interface is not part of the
/// snapshot format and is resolved by the caller.
pub fn load(data: &str) -> Result<Vec<RouteMsg>, Error> {
    let routes: Vec<SnapshotRoute> = serde_json::from_str(data)
        .map_err(|error| Error::InvalidPrefix(error.to_string(), 0))?;

    routes
        .into_iter()
        .map(|route| {
            let prefix =
                Ipv4Network::new(route.dest, route.len).map_err(|_| {
                    Error::InvalidPrefix(route.dest.to_string(), route.len)
                })?;
            Ok(RouteMsg::new(
                prefix,
                route.next_hop,
                String::new(),
                RouteSource::Static,
                route.admin_distance,
                route.metric,
                RouteAttrs::None,
                None,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use const_addrs::{ip4, net4};

    use super::*;

    #[test]
    fn snapshot_roundtrip() {
        let routes = vec![
            RouteSummary {
                prefix: net4!("10.0.0.0/24"),
                nexthop: ip4!("192.168.1.1"),
                ifname: "eth1".to_owned(),
                source: RouteSource::Bgp,
                distance: 20,
                metric: 100,
            },
            RouteSummary {
                prefix: net4!("10.1.0.0/16"),
                nexthop: ip4!("192.168.1.2"),
                ifname: "eth2".to_owned(),
                source: RouteSource::Ospfv2,
                distance: 110,
                metric: 30,
            },
        ];

        let restored = load(&dump(&routes)).unwrap();
        assert_eq!(restored.len(), 2);
        // The restored routes keep prefix, next-hop, metric and distance,
        // but re-enter as static routes.
        for (orig, restored) in routes.iter().zip(&restored) {
            assert_eq!(restored.prefix, orig.prefix);
            assert_eq!(restored.nexthop, orig.nexthop);
            assert_eq!(restored.metric, orig.metric);
            assert_eq!(restored.distance, orig.distance);
            assert_eq!(restored.source, RouteSource::Static);
        }
    }

    #[test]
    fn load_rejects_invalid_prefix_length() {
        let data = r#"[{
            "dest": "10.0.0.0",
            "len": 33,
            "next_hop": "192.168.1.1",
            "protocol": "static",
            "metric": 0,
            "admin_distance": 1
        }]"#;
        assert!(matches!(load(data), Err(Error::InvalidPrefix(_, 33))));
    }
}
