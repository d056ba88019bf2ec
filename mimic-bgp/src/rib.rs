//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use mimic_utils::protocol::RouteSource;
use mimic_utils::route::{RouteAttrs, RouteMsg, RouteUpdateMsg};
use tokio::sync::mpsc::UnboundedSender;

use crate::debug::Debug;
use crate::neighbor::PeerType;
use crate::packet::attribute::Attrs;

// Administrative distances handed to the main RIB.
pub const DISTANCE_EBGP: u32 = 20;
pub const DISTANCE_IBGP: u32 = 200;

// Default LOCAL_PREF used by the decision process when the attribute is
// absent.
pub const DEFAULT_LOCAL_PREF: u32 = 100;

//
// BGP local RIB: per-neighbor adj-RIB-in plus the per-prefix best path
// currently exposed to the main RIB.
//
#[derive(Debug, Default)]
pub struct LocalRib {
    pub adj_in: BTreeMap<Ipv4Addr, BTreeMap<Ipv4Network, AdjRoute>>,
    best: BTreeMap<Ipv4Network, Ipv4Addr>,
}

// Route received from one neighbor.
#[derive(Clone, Debug)]
pub struct AdjRoute {
    pub attrs: Attrs,
    pub peer_type: PeerType,
    pub peer_id: Ipv4Addr,
    pub ifname: String,
    pub weight: u32,
}

// ===== impl LocalRib =====

impl LocalRib {
    // Stores a route received from `nbr_addr` and reruns the decision for
    // its prefix.
    pub(crate) fn route_add(
        &mut self,
        rib_tx: &UnboundedSender<RouteUpdateMsg>,
        nbr_addr: Ipv4Addr,
        prefix: Ipv4Network,
        route: AdjRoute,
    ) {
        self.adj_in.entry(nbr_addr).or_default().insert(prefix, route);
        self.update_prefix(rib_tx, prefix);
    }

    // Removes a route withdrawn by `nbr_addr` and reruns the decision for
    // its prefix.
    pub(crate) fn route_del(
        &mut self,
        rib_tx: &UnboundedSender<RouteUpdateMsg>,
        nbr_addr: Ipv4Addr,
        prefix: Ipv4Network,
    ) {
        if let Some(adj_in) = self.adj_in.get_mut(&nbr_addr) {
            adj_in.remove(&prefix);
        }
        self.update_prefix(rib_tx, prefix);
    }

    // Removes everything learned from `nbr_addr` (session loss).
    pub(crate) fn clear_nbr(
        &mut self,
        rib_tx: &UnboundedSender<RouteUpdateMsg>,
        nbr_addr: Ipv4Addr,
    ) {
        let Some(adj_in) = self.adj_in.remove(&nbr_addr) else {
            return;
        };
        for prefix in adj_in.into_keys() {
            self.update_prefix(rib_tx, prefix);
        }
    }

    /// Number of prefixes currently exposed to the main RIB.
    pub fn best_count(&self) -> usize {
        self.best.len()
    }

    // Elects the best path for the prefix among all adj-RIB-ins and syncs
    // the result to the main RIB.
    fn update_prefix(
        &mut self,
        rib_tx: &UnboundedSender<RouteUpdateMsg>,
        prefix: Ipv4Network,
    ) {
        let best = self
            .adj_in
            .iter()
            .filter_map(|(nbr_addr, adj_in)| {
                adj_in.get(&prefix).map(|route| (*nbr_addr, route))
            })
            .min_by(|(_, a), (_, b)| best_path_cmp(a, b));

        match best {
            Some((nbr_addr, route)) => {
                Debug::BestPathFound(prefix, &nbr_addr).log();
                self.best.insert(prefix, nbr_addr);

                let distance = match route.peer_type {
                    PeerType::External => DISTANCE_EBGP,
                    PeerType::Internal => DISTANCE_IBGP,
                };
                let msg = RouteMsg::new(
                    prefix,
                    route.attrs.nexthop.unwrap_or(nbr_addr),
                    route.ifname.clone(),
                    RouteSource::Bgp,
                    distance,
                    route.attrs.med.unwrap_or(0),
                    RouteAttrs::Bgp {
                        origin: route.attrs.origin as u8,
                        as_path: route
                            .attrs
                            .as_path
                            .segments
                            .iter()
                            .flat_map(|segment| segment.members.clone())
                            .collect(),
                        communities: route
                            .attrs
                            .communities
                            .clone()
                            .unwrap_or_default(),
                        local_pref: route.attrs.local_pref,
                        med: route.attrs.med,
                    },
                    None,
                );
                let _ = rib_tx.send(RouteUpdateMsg::Install(msg));
            }
            None => {
                Debug::BestPathNotFound(prefix).log();
                if self.best.remove(&prefix).is_some() {
                    let _ = rib_tx.send(RouteUpdateMsg::Withdraw {
                        prefix,
                        source: RouteSource::Bgp,
                    });
                }
            }
        }
    }
}

// ===== global functions =====

// Best-path comparison; `Less` means `a` is preferred.
//
// Tie-break order: weight, LOCAL_PREF, origin, AS-path length, MED, eBGP
// over iBGP, peer router-id.
pub(crate) fn best_path_cmp(a: &AdjRoute, b: &AdjRoute) -> Ordering {
    // Higher weight wins.
    let cmp = b.weight.cmp(&a.weight);
    if cmp != Ordering::Equal {
        return cmp;
    }

    // Higher LOCAL_PREF wins.
    let a_pref = a.attrs.local_pref.unwrap_or(DEFAULT_LOCAL_PREF);
    let b_pref = b.attrs.local_pref.unwrap_or(DEFAULT_LOCAL_PREF);
    let cmp = b_pref.cmp(&a_pref);
    if cmp != Ordering::Equal {
        return cmp;
    }

    // Lower origin wins (IGP < EGP < Incomplete).
    let cmp = a.attrs.origin.cmp(&b.attrs.origin);
    if cmp != Ordering::Equal {
        return cmp;
    }

    // Shorter AS path wins.
    let cmp = a
        .attrs
        .as_path
        .path_length()
        .cmp(&b.attrs.as_path.path_length());
    if cmp != Ordering::Equal {
        return cmp;
    }

    // Lower MED wins.
    let cmp = a
        .attrs
        .med
        .unwrap_or(0)
        .cmp(&b.attrs.med.unwrap_or(0));
    if cmp != Ordering::Equal {
        return cmp;
    }

    // eBGP wins over iBGP.
    let rank = |peer_type| match peer_type {
        PeerType::External => 0,
        PeerType::Internal => 1,
    };
    let cmp = rank(a.peer_type).cmp(&rank(b.peer_type));
    if cmp != Ordering::Equal {
        return cmp;
    }

    // Lower peer router-id wins.
    a.peer_id.cmp(&b.peer_id)
}

#[cfg(test)]
mod tests {
    use const_addrs::ip4;

    use super::*;
    use crate::packet::attribute::AsPath;
    use crate::packet::consts::Origin;

    fn route(
        as_path: &[u32],
        local_pref: Option<u32>,
        med: Option<u32>,
        peer_type: PeerType,
        peer_id: Ipv4Addr,
    ) -> AdjRoute {
        AdjRoute {
            attrs: Attrs {
                origin: Origin::Igp,
                as_path: AsPath::from_sequence(as_path.iter().copied()),
                nexthop: Some(ip4!("10.0.0.1")),
                med,
                local_pref,
                communities: None,
            },
            peer_type,
            peer_id,
            ifname: "eth0".to_owned(),
            weight: 0,
        }
    }

    #[test]
    fn local_pref_beats_path_length() {
        let a = route(
            &[65001, 65002, 65003],
            Some(200),
            None,
            PeerType::External,
            ip4!("1.1.1.1"),
        );
        let b =
            route(&[65001], Some(100), None, PeerType::External, ip4!("2.2.2.2"));
        assert_eq!(best_path_cmp(&a, &b), Ordering::Less);
    }

    #[test]
    fn path_length_beats_med() {
        let a = route(
            &[65001],
            None,
            Some(500),
            PeerType::External,
            ip4!("1.1.1.1"),
        );
        let b = route(
            &[65001, 65002],
            None,
            Some(0),
            PeerType::External,
            ip4!("2.2.2.2"),
        );
        assert_eq!(best_path_cmp(&a, &b), Ordering::Less);
    }

    #[test]
    fn ebgp_beats_ibgp() {
        let a =
            route(&[65001], None, None, PeerType::External, ip4!("2.2.2.2"));
        let b =
            route(&[65001], None, None, PeerType::Internal, ip4!("1.1.1.1"));
        assert_eq!(best_path_cmp(&a, &b), Ordering::Less);
    }

    #[test]
    fn router_id_is_final_tie_break() {
        let a =
            route(&[65001], None, None, PeerType::External, ip4!("1.1.1.1"));
        let b =
            route(&[65001], None, None, PeerType::External, ip4!("2.2.2.2"));
        assert_eq!(best_path_cmp(&a, &b), Ordering::Less);
        assert_eq!(best_path_cmp(&b, &a), Ordering::Greater);
    }
}
