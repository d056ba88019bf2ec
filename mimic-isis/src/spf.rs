//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use tokio::time::Instant;

use crate::lsdb::Lsdb;
use crate::packet::{LevelNumber, LspId, SystemId};

// Computed route toward a prefix.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SpfRoute {
    pub prefix: Ipv4Network,
    pub metric: u32,
    pub level: LevelNumber,
    pub nexthop: Ipv4Addr,
    pub ifname: String,
}

// First hop used to reach a direct neighbor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NexthopInfo {
    pub ifname: String,
    pub addr: Ipv4Addr,
}

#[derive(Debug, Eq, PartialEq)]
struct Candidate {
    dist: u32,
    vertex: SystemId,
    first_hop: Option<SystemId>,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .dist
            .cmp(&self.dist)
            .then_with(|| self.vertex.cmp(&other.vertex))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// ===== global functions =====

/// Runs the per-level SPF and merges the results, preferring L1 routes
/// over L2 for the same prefix.
pub fn compute_all(
    lsdb: &Lsdb,
    levels: &[LevelNumber],
    system_id: SystemId,
    neighbors: &HashMap<SystemId, NexthopInfo>,
    now: Instant,
) -> BTreeMap<Ipv4Network, SpfRoute> {
    let mut routes: BTreeMap<Ipv4Network, SpfRoute> = BTreeMap::new();
    for level in levels {
        for (prefix, route) in
            compute(lsdb, *level, system_id, neighbors, now)
        {
            routes
                .entry(prefix)
                .and_modify(|existing| {
                    // L1 is preferred over L2; then the lower metric.
                    if (route.level, route.metric)
                        < (existing.level, existing.metric)
                    {
                        *existing = route.clone();
                    }
                })
                .or_insert(route);
        }
    }
    routes
}

/// Dijkstra over one level's LSP database.
pub fn compute(
    lsdb: &Lsdb,
    level: LevelNumber,
    system_id: SystemId,
    neighbors: &HashMap<SystemId, NexthopInfo>,
    now: Instant,
) -> BTreeMap<Ipv4Network, SpfRoute> {
    let mut dist: HashMap<SystemId, (u32, Option<SystemId>)> =
        HashMap::new();
    let mut queue = BinaryHeap::new();
    queue.push(Candidate {
        dist: 0,
        vertex: system_id,
        first_hop: None,
    });

    while let Some(candidate) = queue.pop() {
        if dist.contains_key(&candidate.vertex) {
            continue;
        }
        dist.insert(
            candidate.vertex,
            (candidate.dist, candidate.first_hop),
        );

        for (next, cost) in
            vertex_edges(lsdb, level, candidate.vertex, now)
        {
            if dist.contains_key(&next) {
                continue;
            }
            let first_hop = candidate.first_hop.or(Some(next));
            queue.push(Candidate {
                dist: candidate.dist + cost,
                vertex: next,
                first_hop,
            });
        }
    }

    // Extract one route per advertised prefix.
    let mut routes: BTreeMap<Ipv4Network, SpfRoute> = BTreeMap::new();
    for (lsp_id, entry) in lsdb.iter(level) {
        if entry.rem_lifetime(now) == 0 || lsp_id.system_id == system_id {
            continue;
        }
        let Some((node_dist, first_hop)) = dist.get(&lsp_id.system_id)
        else {
            continue;
        };
        let Some(first_hop) = first_hop else {
            continue;
        };
        let Some(nexthop) = neighbors.get(first_hop) else {
            continue;
        };

        for reach in &entry.lsp.tlvs.ip_internal_reach {
            let prefix = Ipv4Network::new(
                reach.prefix.network(),
                reach.prefix.prefix(),
            )
            .unwrap();
            let metric = node_dist + reach.metric as u32;
            let route = SpfRoute {
                prefix,
                metric,
                level,
                nexthop: nexthop.addr,
                ifname: nexthop.ifname.clone(),
            };
            routes
                .entry(prefix)
                .and_modify(|existing| {
                    if metric < existing.metric {
                        *existing = route.clone();
                    }
                })
                .or_insert(route);
        }
    }

    routes
}

// Outgoing edges of a node, with a two-way connectivity check.
fn vertex_edges(
    lsdb: &Lsdb,
    level: LevelNumber,
    vertex: SystemId,
    now: Instant,
) -> Vec<(SystemId, u32)> {
    let lsp_id = LspId::from(vertex);
    let Some(entry) = lsdb.get(level, &lsp_id) else {
        return vec![];
    };
    if entry.rem_lifetime(now) == 0 {
        return vec![];
    }

    entry
        .lsp
        .tlvs
        .is_reach
        .iter()
        .filter(|reach| {
            links_back(lsdb, level, reach.neighbor.system_id, vertex, now)
        })
        .map(|reach| (reach.neighbor.system_id, reach.metric as u32))
        .collect()
}

fn links_back(
    lsdb: &Lsdb,
    level: LevelNumber,
    from: SystemId,
    to: SystemId,
    now: Instant,
) -> bool {
    let lsp_id = LspId::from(from);
    let Some(entry) = lsdb.get(level, &lsp_id) else {
        return false;
    };
    entry.rem_lifetime(now) != 0
        && entry
            .lsp
            .tlvs
            .is_reach
            .iter()
            .any(|reach| reach.neighbor.system_id == to)
}

#[cfg(test)]
mod tests {
    use const_addrs::{ip4, net4};
    use maplit::hashmap;

    use super::*;
    use crate::packet::LanId;
    use crate::packet::pdu::{
        IpReach, IsReach, LSP_MAX_LIFETIME, Lsp, LspTlvs,
    };

    fn system_id(last: u8) -> SystemId {
        SystemId::new([0, 0, 0, 0, 0, last])
    }

    fn node_lsp(
        level: LevelNumber,
        id: u8,
        is_reach: Vec<(u8, u8)>,
        ip_reach: Vec<(Ipv4Network, u8)>,
    ) -> Lsp {
        Lsp::new(
            level,
            LSP_MAX_LIFETIME,
            LspId::from(system_id(id)),
            1,
            0x03,
            LspTlvs {
                area_addrs: vec![],
                protocols_supported: vec![],
                ipv4_addrs: vec![],
                is_reach: is_reach
                    .into_iter()
                    .map(|(nbr, metric)| IsReach {
                        neighbor: LanId::from(system_id(nbr)),
                        metric,
                    })
                    .collect(),
                ip_internal_reach: ip_reach
                    .into_iter()
                    .map(|(prefix, metric)| IpReach { prefix, metric })
                    .collect(),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn chain_topology_per_level() {
        // S1 --10-- S2 --10-- S3; S3 advertises 10.3.0.0/24.
        let now = Instant::now();
        let mut lsdb = Lsdb::default();
        let level = LevelNumber::L1;
        lsdb.install(node_lsp(level, 1, vec![(2, 10)], vec![]), now);
        lsdb.install(
            node_lsp(level, 2, vec![(1, 10), (3, 10)], vec![]),
            now,
        );
        lsdb.install(
            node_lsp(
                level,
                3,
                vec![(2, 10)],
                vec![(net4!("10.3.0.0/24"), 1)],
            ),
            now,
        );

        let neighbors = hashmap! {
            system_id(2) => NexthopInfo {
                ifname: "eth0".to_owned(),
                addr: ip4!("10.1.0.2"),
            },
        };
        let routes =
            compute(&lsdb, level, system_id(1), &neighbors, now);

        let route = &routes[&net4!("10.3.0.0/24")];
        assert_eq!(route.metric, 21);
        assert_eq!(route.nexthop, ip4!("10.1.0.2"));
    }

    #[tokio::test(start_paused = true)]
    async fn l1_routes_preferred_over_l2() {
        let now = Instant::now();
        let mut lsdb = Lsdb::default();
        let prefix = net4!("10.9.0.0/16");

        for level in [LevelNumber::L1, LevelNumber::L2] {
            lsdb.install(
                node_lsp(level, 1, vec![(2, 10)], vec![]),
                now,
            );
            lsdb.install(
                node_lsp(level, 2, vec![(1, 10)], vec![(prefix, 5)]),
                now,
            );
        }

        let neighbors = hashmap! {
            system_id(2) => NexthopInfo {
                ifname: "eth0".to_owned(),
                addr: ip4!("10.1.0.2"),
            },
        };
        let routes = compute_all(
            &lsdb,
            &[LevelNumber::L1, LevelNumber::L2],
            system_id(1),
            &neighbors,
            now,
        );
        assert_eq!(routes[&prefix].level, LevelNumber::L1);
    }
}
