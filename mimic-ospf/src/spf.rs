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
use crate::packet::lsa::{
    LSA_MAX_AGE, LsaBody, LsaKey, LsaRouterLinkType, LsaType,
};

// Shortest-path-first vertex.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
enum Vertex {
    // Keyed by router-id.
    Router(Ipv4Addr),
    // Transit network, keyed by the DR's interface address.
    Network(Ipv4Addr),
}

// Computed route toward a prefix.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SpfRoute {
    pub prefix: Ipv4Network,
    pub metric: u32,
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
    vertex: Vertex,
    // First router after the calculating router on the path, if any.
    first_hop: Option<Ipv4Addr>,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; reverse for shortest distance first.
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

/// Runs Dijkstra over the link-state database and returns one route per
/// reachable prefix.
///
/// `neighbors` resolves a first-hop router-id to the egress interface and
/// the neighbor's address; destinations whose first hop cannot be resolved
/// (or that are directly connected) produce no route.
pub fn compute(
    lsdb: &Lsdb,
    router_id: Ipv4Addr,
    neighbors: &HashMap<Ipv4Addr, NexthopInfo>,
    now: Instant,
) -> BTreeMap<Ipv4Network, SpfRoute> {
    let mut dist: HashMap<Vertex, (u32, Option<Ipv4Addr>)> = HashMap::new();
    let mut queue = BinaryHeap::new();
    queue.push(Candidate {
        dist: 0,
        vertex: Vertex::Router(router_id),
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

        for (next, cost) in vertex_edges(lsdb, &candidate.vertex, now) {
            if dist.contains_key(&next) {
                continue;
            }
            // The first hop is inherited along the path; crossing the
            // first non-local router fixes it.
            let first_hop = candidate.first_hop.or(match next {
                Vertex::Router(id) if id != router_id => Some(id),
                _ => None,
            });
            queue.push(Candidate {
                dist: candidate.dist + cost,
                vertex: next,
                first_hop,
            });
        }
    }

    // Extract routes: transit network prefixes plus router stub links.
    let mut routes: BTreeMap<Ipv4Network, SpfRoute> = BTreeMap::new();
    for (key, entry) in lsdb.iter() {
        if entry.age(now) >= LSA_MAX_AGE {
            continue;
        }
        match &entry.lsa.body {
            LsaBody::Network(network) => {
                let Some((net_dist, first_hop)) =
                    dist.get(&Vertex::Network(key.lsa_id))
                else {
                    continue;
                };
                let Ok(prefix) = Ipv4Network::with_netmask(
                    key.lsa_id,
                    network.mask,
                ) else {
                    continue;
                };
                let prefix =
                    Ipv4Network::new(prefix.network(), prefix.prefix())
                        .unwrap();
                add_route(
                    &mut routes,
                    neighbors,
                    prefix,
                    *net_dist,
                    *first_hop,
                );
            }
            LsaBody::Router(router) => {
                let Some((rtr_dist, first_hop)) =
                    dist.get(&Vertex::Router(key.adv_rtr))
                else {
                    continue;
                };
                for link in router
                    .links
                    .iter()
                    .filter(|link| {
                        link.link_type == LsaRouterLinkType::StubNetwork
                    })
                {
                    let Ok(prefix) = Ipv4Network::with_netmask(
                        link.link_id,
                        link.link_data,
                    ) else {
                        continue;
                    };
                    let prefix =
                        Ipv4Network::new(prefix.network(), prefix.prefix())
                            .unwrap();
                    add_route(
                        &mut routes,
                        neighbors,
                        prefix,
                        rtr_dist + link.metric as u32,
                        *first_hop,
                    );
                }
            }
        }
    }

    routes
}

// Outgoing edges of a vertex, with two-way connectivity checks.
fn vertex_edges(
    lsdb: &Lsdb,
    vertex: &Vertex,
    now: Instant,
) -> Vec<(Vertex, u32)> {
    let mut edges = vec![];

    match vertex {
        Vertex::Router(router_id) => {
            let key =
                LsaKey::new(LsaType::Router, *router_id, *router_id);
            let Some(entry) = lsdb.get(&key) else {
                return edges;
            };
            if entry.age(now) >= LSA_MAX_AGE {
                return edges;
            }
            let LsaBody::Router(router) = &entry.lsa.body else {
                return edges;
            };
            for link in &router.links {
                match link.link_type {
                    LsaRouterLinkType::PointToPoint => {
                        // Two-way check: the remote router must link back.
                        if router_links_back(
                            lsdb,
                            link.link_id,
                            *router_id,
                            now,
                        ) {
                            edges.push((
                                Vertex::Router(link.link_id),
                                link.metric as u32,
                            ));
                        }
                    }
                    LsaRouterLinkType::TransitNetwork => {
                        edges.push((
                            Vertex::Network(link.link_id),
                            link.metric as u32,
                        ));
                    }
                    LsaRouterLinkType::StubNetwork => (),
                }
            }
        }
        Vertex::Network(dr_addr) => {
            // The network LSA is keyed by the DR's interface address; find
            // it regardless of the advertising router.
            let Some((_, entry)) = lsdb.iter().find(|(key, _)| {
                key.lsa_type == LsaType::Network && key.lsa_id == *dr_addr
            }) else {
                return edges;
            };
            if entry.age(now) >= LSA_MAX_AGE {
                return edges;
            }
            let LsaBody::Network(network) = &entry.lsa.body else {
                return edges;
            };
            for attached in &network.attached_rtrs {
                edges.push((Vertex::Router(*attached), 0));
            }
        }
    }

    edges
}

fn router_links_back(
    lsdb: &Lsdb,
    router_id: Ipv4Addr,
    target: Ipv4Addr,
    now: Instant,
) -> bool {
    let key = LsaKey::new(LsaType::Router, router_id, router_id);
    let Some(entry) = lsdb.get(&key) else {
        return false;
    };
    if entry.age(now) >= LSA_MAX_AGE {
        return false;
    }
    let LsaBody::Router(router) = &entry.lsa.body else {
        return false;
    };
    router.links.iter().any(|link| {
        link.link_type == LsaRouterLinkType::PointToPoint
            && link.link_id == target
    })
}

fn add_route(
    routes: &mut BTreeMap<Ipv4Network, SpfRoute>,
    neighbors: &HashMap<Ipv4Addr, NexthopInfo>,
    prefix: Ipv4Network,
    metric: u32,
    first_hop: Option<Ipv4Addr>,
) {
    // Directly connected destinations are covered by connected routes.
    let Some(first_hop) = first_hop else {
        return;
    };
    let Some(nexthop) = neighbors.get(&first_hop) else {
        return;
    };

    let route = SpfRoute {
        prefix,
        metric,
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

#[cfg(test)]
mod tests {
    use const_addrs::{ip4, net4};
    use maplit::hashmap;

    use super::*;
    use crate::packet::lsa::{
        LSA_INIT_SEQ_NO, Lsa, LsaRouter, LsaRouterLink,
    };

    fn router_lsa(
        router_id: Ipv4Addr,
        links: Vec<LsaRouterLink>,
    ) -> Lsa {
        Lsa::new(
            1,
            router_id,
            router_id,
            LSA_INIT_SEQ_NO,
            LsaBody::Router(LsaRouter { flags: 0, links }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn point_to_point_topology() {
        // R1 (1.1.1.1) --10-- R2 (2.2.2.2) --10-- R3 (3.3.3.3)
        // R3 advertises the stub 10.3.0.0/24.
        let now = Instant::now();
        let mut lsdb = Lsdb::default();
        lsdb.install(
            router_lsa(
                ip4!("1.1.1.1"),
                vec![LsaRouterLink::new(
                    LsaRouterLinkType::PointToPoint,
                    ip4!("2.2.2.2"),
                    ip4!("10.1.0.1"),
                    10,
                )],
            ),
            now,
        );
        lsdb.install(
            router_lsa(
                ip4!("2.2.2.2"),
                vec![
                    LsaRouterLink::new(
                        LsaRouterLinkType::PointToPoint,
                        ip4!("1.1.1.1"),
                        ip4!("10.1.0.2"),
                        10,
                    ),
                    LsaRouterLink::new(
                        LsaRouterLinkType::PointToPoint,
                        ip4!("3.3.3.3"),
                        ip4!("10.2.0.1"),
                        10,
                    ),
                ],
            ),
            now,
        );
        lsdb.install(
            router_lsa(
                ip4!("3.3.3.3"),
                vec![
                    LsaRouterLink::new(
                        LsaRouterLinkType::PointToPoint,
                        ip4!("2.2.2.2"),
                        ip4!("10.2.0.2"),
                        10,
                    ),
                    LsaRouterLink::new(
                        LsaRouterLinkType::StubNetwork,
                        ip4!("10.3.0.0"),
                        ip4!("255.255.255.0"),
                        1,
                    ),
                ],
            ),
            now,
        );

        let neighbors = hashmap! {
            ip4!("2.2.2.2") => NexthopInfo {
                ifname: "eth0".to_owned(),
                addr: ip4!("10.1.0.2"),
            },
        };
        let routes = compute(&lsdb, ip4!("1.1.1.1"), &neighbors, now);

        // The remote stub is reachable through R2 with the summed cost.
        let route = &routes[&net4!("10.3.0.0/24")];
        assert_eq!(route.metric, 21);
        assert_eq!(route.nexthop, ip4!("10.1.0.2"));
        assert_eq!(route.ifname, "eth0");
    }

    #[tokio::test(start_paused = true)]
    async fn one_way_links_are_ignored() {
        // R2 claims a link to R1, but R1 does not link back.
        let now = Instant::now();
        let mut lsdb = Lsdb::default();
        lsdb.install(router_lsa(ip4!("1.1.1.1"), vec![]), now);
        lsdb.install(
            router_lsa(
                ip4!("2.2.2.2"),
                vec![
                    LsaRouterLink::new(
                        LsaRouterLinkType::PointToPoint,
                        ip4!("1.1.1.1"),
                        ip4!("10.1.0.2"),
                        10,
                    ),
                    LsaRouterLink::new(
                        LsaRouterLinkType::StubNetwork,
                        ip4!("10.2.0.0"),
                        ip4!("255.255.255.0"),
                        1,
                    ),
                ],
            ),
            now,
        );

        let neighbors = hashmap! {
            ip4!("2.2.2.2") => NexthopInfo {
                ifname: "eth0".to_owned(),
                addr: ip4!("10.1.0.2"),
            },
        };
        let routes = compute(&lsdb, ip4!("1.1.1.1"), &neighbors, now);
        assert!(routes.is_empty());
    }
}
