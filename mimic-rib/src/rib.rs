//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use bitflags::bitflags;
use ipnetwork::Ipv4Network;
use mimic_utils::bus::{EventBus, EventKind, RouteEvent, RouteSummary};
use mimic_utils::ip::Ipv4AddrExt;
use mimic_utils::protocol::RouteSource;
use mimic_utils::route::{RouteAttrs, RouteMsg};
use prefix_trie::PrefixMap;
use tokio::time::Instant;
use tracing::debug;

//
// Routing information base.
//
// Keeps every candidate route handed in by the protocol instances, keyed by
// prefix and source protocol, and designates at most one active route per
// prefix. All mutation happens inside the RIB task; readers observe a
// copy-on-write snapshot of the active set.
//
#[derive(Debug)]
pub struct Rib {
    prefixes: PrefixMap<Ipv4Network, PrefixEntry>,
    update_queue: BTreeSet<Ipv4Network>,
    // Operational status learned from interface events. Interfaces the
    // interface table never reported are considered up.
    oper_status: HashMap<String, bool>,
    active: Arc<ArcSwap<RibSnapshot>>,
    event_bus: EventBus,
}

#[derive(Debug, Default)]
struct PrefixEntry {
    candidates: BTreeMap<RouteSource, Route>,
}

// Candidate route owned by the RIB.
#[derive(Clone, Debug)]
pub struct Route {
    pub nexthop: Ipv4Addr,
    pub ifname: String,
    pub source: RouteSource,
    pub distance: u32,
    pub metric: u32,
    pub attrs: RouteAttrs,
    pub last_update: Instant,
    pub stale_timeout: Option<Duration>,
    pub flags: RouteFlags,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct RouteFlags: u8 {
        const ACTIVE = 0x01;
        const REMOVED = 0x02;
    }
}

// Read-optimized view of the active routes.
#[derive(Debug, Default)]
pub struct RibSnapshot {
    trie: PrefixMap<Ipv4Network, RouteSummary>,
}

/// Non-blocking reader handle over the RIB's active set.
#[derive(Clone, Debug)]
pub struct RibReader {
    active: Arc<ArcSwap<RibSnapshot>>,
}

// ===== impl Rib =====

impl Rib {
    pub fn new(event_bus: EventBus) -> Rib {
        Rib {
            prefixes: Default::default(),
            update_queue: Default::default(),
            oper_status: Default::default(),
            active: Arc::new(ArcSwap::from_pointee(RibSnapshot::default())),
            event_bus,
        }
    }

    /// Returns a reader handle sharing this RIB's active-set snapshot.
    pub fn reader(&self) -> RibReader {
        RibReader {
            active: self.active.clone(),
        }
    }

    // Inserts or replaces the candidate contributed by `msg.source`.
    //
    // Visible route state never mutates in place: a reinstall replaces the
    // whole candidate and refreshes its timestamp.
    pub fn install(&mut self, msg: RouteMsg, now: Instant) {
        let entry = self.prefixes.entry(msg.prefix).or_default();
        entry.candidates.insert(
            msg.source,
            Route {
                nexthop: msg.nexthop,
                ifname: msg.ifname,
                source: msg.source,
                distance: msg.distance,
                metric: msg.metric,
                attrs: msg.attrs,
                last_update: now,
                stale_timeout: msg.stale_timeout,
                flags: RouteFlags::empty(),
            },
        );
        self.update_queue.insert(msg.prefix);
    }

    // Removes the candidate contributed by `source`.
    pub fn withdraw(&mut self, prefix: Ipv4Network, source: RouteSource) {
        if let Some(entry) = self.prefixes.get_mut(&prefix)
            && let Some(route) = entry.candidates.get_mut(&source)
        {
            route.flags.insert(RouteFlags::REMOVED);
            self.update_queue.insert(prefix);
        }
    }

    // Removes every candidate contributed by `source` (protocol shutdown).
    pub fn withdraw_all(&mut self, source: RouteSource) {
        let prefixes = self
            .prefixes
            .iter()
            .filter(|(_, entry)| entry.candidates.contains_key(&source))
            .map(|(prefix, _)| *prefix)
            .collect::<Vec<_>>();
        for prefix in prefixes {
            self.withdraw(prefix, source);
        }
    }

    // Updates the operational status of an interface, scheduling a new
    // decision for every prefix with a candidate over it.
    pub fn interface_update(&mut self, ifname: &str, oper_up: bool) {
        if self.oper_status.get(ifname) == Some(&oper_up) {
            return;
        }
        self.oper_status.insert(ifname.to_owned(), oper_up);

        let prefixes = self
            .prefixes
            .iter()
            .filter(|(_, entry)| {
                entry
                    .candidates
                    .values()
                    .any(|route| route.ifname == ifname)
            })
            .map(|(prefix, _)| *prefix)
            .collect::<Vec<_>>();
        self.update_queue.extend(prefixes);
    }

    // Ages out candidates whose stale timeout has elapsed. Removal may
    // promote another candidate.
    pub fn age(&mut self, now: Instant) {
        let mut stale = Vec::new();
        for (prefix, entry) in self.prefixes.iter() {
            for route in entry.candidates.values() {
                if let Some(timeout) = route.stale_timeout
                    && route.last_update + timeout < now
                {
                    stale.push((*prefix, route.source));
                }
            }
        }
        for (prefix, source) in stale {
            debug!(%prefix, %source, "aging out stale route");
            self.withdraw(prefix, source);
        }
    }

    // Processes prefixes present in the update queue, re-running the
    // decision process and emitting one route-change event per active-route
    // transition, in queue order.
    pub fn process_update_queue(&mut self) {
        while let Some(prefix) = self.update_queue.pop_first() {
            let Some(entry) = self.prefixes.get_mut(&prefix) else {
                continue;
            };

            let old_active = entry
                .candidates
                .values()
                .find(|route| route.flags.contains(RouteFlags::ACTIVE))
                .map(|route| summarize(prefix, route));

            // Drop candidates marked for removal.
            entry
                .candidates
                .retain(|_, route| !route.flags.contains(RouteFlags::REMOVED));

            // Decision process: among candidates whose egress interface is
            // operational, the minimum of (administrative distance, metric,
            // source rank, next-hop address) wins.
            let best = entry
                .candidates
                .iter()
                .filter(|(_, route)| {
                    self.oper_status
                        .get(&route.ifname)
                        .copied()
                        .unwrap_or(true)
                })
                .min_by_key(|(source, route)| {
                    (
                        route.distance,
                        route.metric,
                        source.decision_rank(),
                        route.nexthop,
                    )
                })
                .map(|(source, _)| *source);

            let mut new_active = None;
            for (source, route) in entry.candidates.iter_mut() {
                if Some(*source) == best {
                    route.flags.insert(RouteFlags::ACTIVE);
                    new_active = Some(summarize(prefix, route));
                } else {
                    route.flags.remove(RouteFlags::ACTIVE);
                }
            }

            if entry.candidates.is_empty() {
                self.prefixes.remove(&prefix);
            }

            // Emit exactly one event per transition of the active route.
            match (old_active, new_active) {
                (None, Some(new)) => {
                    self.event_bus.publish(EventKind::RouteChanged(
                        RouteEvent::Activated(new),
                    ));
                }
                (Some(old), Some(new)) if old != new => {
                    self.event_bus.publish(EventKind::RouteChanged(
                        RouteEvent::Replaced { old, new },
                    ));
                }
                (Some(old), None) => {
                    self.event_bus.publish(EventKind::RouteChanged(
                        RouteEvent::Withdrawn {
                            prefix,
                            source: old.source,
                        },
                    ));
                }
                _ => (),
            }
        }

        // Refresh the readers' snapshot.
        self.active.store(Arc::new(self.build_snapshot()));
    }

    /// Consistent copy of all active routes, in prefix order.
    pub fn active_routes(&self) -> Vec<RouteSummary> {
        self.prefixes
            .iter()
            .flat_map(|(prefix, entry)| {
                entry
                    .candidates
                    .values()
                    .find(|route| route.flags.contains(RouteFlags::ACTIVE))
                    .map(|route| summarize(*prefix, route))
            })
            .collect()
    }

    /// All candidates, active or not, for operational display.
    pub fn all_routes(&self) -> Vec<(RouteSummary, bool)> {
        self.prefixes
            .iter()
            .flat_map(|(prefix, entry)| {
                entry.candidates.values().map(|route| {
                    (
                        summarize(*prefix, route),
                        route.flags.contains(RouteFlags::ACTIVE),
                    )
                })
            })
            .collect()
    }

    fn build_snapshot(&self) -> RibSnapshot {
        let mut trie = PrefixMap::new();
        for summary in self.active_routes() {
            trie.insert(summary.prefix, summary);
        }
        RibSnapshot { trie }
    }
}

// ===== impl RibReader =====

impl RibReader {
    /// Longest-prefix-match lookup over the active routes.
    pub fn lookup(&self, addr: Ipv4Addr) -> Option<RouteSummary> {
        let snapshot = self.active.load();
        snapshot
            .trie
            .get_lpm(&addr.to_host_prefix())
            .map(|(_, summary)| summary.clone())
    }
}

// ===== helper functions =====

fn summarize(prefix: Ipv4Network, route: &Route) -> RouteSummary {
    RouteSummary {
        prefix,
        nexthop: route.nexthop,
        ifname: route.ifname.clone(),
        source: route.source,
        distance: route.distance,
        metric: route.metric,
    }
}

#[cfg(test)]
mod tests {
    use const_addrs::{ip4, net4};
    use mimic_utils::bus::EventReceiver;
    use mimic_utils::route::RouteAttrs;

    use super::*;

    fn route(
        prefix: Ipv4Network,
        nexthop: Ipv4Addr,
        ifname: &str,
        source: RouteSource,
        distance: u32,
        metric: u32,
    ) -> RouteMsg {
        RouteMsg::new(
            prefix,
            nexthop,
            ifname.to_owned(),
            source,
            distance,
            metric,
            RouteAttrs::None,
            None,
        )
    }

    fn setup() -> (Rib, EventReceiver) {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        (Rib::new(bus), rx)
    }

    fn route_events(rx: &mut EventReceiver) -> Vec<RouteEvent> {
        let mut events = vec![];
        while let Ok(event) = rx.try_recv() {
            if let EventKind::RouteChanged(event) = event.kind {
                events.push(event);
            }
        }
        events
    }

    #[tokio::test]
    async fn static_route_lookup() {
        let (mut rib, _rx) = setup();
        let now = Instant::now();

        rib.install(
            route(
                net4!("10.0.0.0/24"),
                ip4!("192.168.1.1"),
                "eth1",
                RouteSource::Static,
                1,
                0,
            ),
            now,
        );
        rib.process_update_queue();

        let reader = rib.reader();
        let found = reader.lookup(ip4!("10.0.0.42")).unwrap();
        assert_eq!(found.prefix, net4!("10.0.0.0/24"));
        assert_eq!(found.nexthop, ip4!("192.168.1.1"));
        assert_eq!(found.ifname, "eth1");
        assert!(reader.lookup(ip4!("10.0.1.42")).is_none());
    }

    #[tokio::test]
    async fn admin_distance_preference() {
        let (mut rib, mut rx) = setup();
        let now = Instant::now();
        let prefix = net4!("10.0.0.0/24");

        rib.install(
            route(prefix, ip4!("10.1.0.1"), "eth0", RouteSource::Static, 1, 0),
            now,
        );
        rib.process_update_queue();
        rib.install(
            route(prefix, ip4!("10.2.0.1"), "eth1", RouteSource::Bgp, 20, 0),
            now,
        );
        rib.process_update_queue();

        // The static route must stay active.
        let active = rib.active_routes();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].source, RouteSource::Static);

        // Withdrawing the static promotes the BGP candidate.
        rib.withdraw(prefix, RouteSource::Static);
        rib.process_update_queue();
        assert_eq!(rib.active_routes()[0].source, RouteSource::Bgp);

        // Withdrawing the BGP candidate leaves no route.
        rib.withdraw(prefix, RouteSource::Bgp);
        rib.process_update_queue();
        assert!(rib.active_routes().is_empty());
        assert!(rib.reader().lookup(ip4!("10.0.0.1")).is_none());

        let events = route_events(&mut rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[0],
            RouteEvent::Activated(summary)
                if summary.source == RouteSource::Static
        ));
        assert!(matches!(
            &events[1],
            RouteEvent::Replaced { new, .. }
                if new.source == RouteSource::Bgp
        ));
        assert!(matches!(
            &events[2],
            RouteEvent::Withdrawn { source: RouteSource::Bgp, .. }
        ));
    }

    #[tokio::test]
    async fn decision_tie_breaks_on_source_rank_and_nexthop() {
        let (mut rib, _rx) = setup();
        let now = Instant::now();
        let prefix = net4!("10.0.0.0/16");

        rib.install(
            route(prefix, ip4!("10.2.0.1"), "eth0", RouteSource::Isis, 50, 10),
            now,
        );
        rib.install(
            route(
                prefix,
                ip4!("10.1.0.1"),
                "eth1",
                RouteSource::Ospfv2,
                50,
                10,
            ),
            now,
        );
        rib.process_update_queue();

        // Equal distance and metric: OSPF outranks IS-IS.
        assert_eq!(rib.active_routes()[0].source, RouteSource::Ospfv2);
    }

    #[tokio::test]
    async fn oper_down_interface_excluded_from_decision() {
        let (mut rib, _rx) = setup();
        let now = Instant::now();
        let prefix = net4!("10.0.0.0/24");

        rib.install(
            route(prefix, ip4!("10.1.0.1"), "eth0", RouteSource::Static, 1, 0),
            now,
        );
        rib.install(
            route(prefix, ip4!("10.2.0.1"), "eth1", RouteSource::Bgp, 20, 0),
            now,
        );
        rib.process_update_queue();
        assert_eq!(rib.active_routes()[0].source, RouteSource::Static);

        // eth0 going down shifts the decision to the BGP candidate.
        rib.interface_update("eth0", false);
        rib.process_update_queue();
        assert_eq!(rib.active_routes()[0].source, RouteSource::Bgp);

        // And back.
        rib.interface_update("eth0", true);
        rib.process_update_queue();
        assert_eq!(rib.active_routes()[0].source, RouteSource::Static);
    }

    #[tokio::test(start_paused = true)]
    async fn aging_removes_stale_candidates() {
        let (mut rib, _rx) = setup();
        let now = Instant::now();
        let prefix = net4!("10.0.0.0/24");

        let mut msg =
            route(prefix, ip4!("10.1.0.1"), "eth0", RouteSource::Bgp, 20, 0);
        msg.stale_timeout = Some(Duration::from_secs(30));
        rib.install(msg, now);
        rib.install(
            route(prefix, ip4!("10.2.0.1"), "eth1", RouteSource::Static, 1, 0),
            now,
        );
        rib.process_update_queue();

        // Before the timeout nothing ages.
        rib.age(now + Duration::from_secs(29));
        rib.process_update_queue();
        assert_eq!(rib.all_routes().len(), 2);

        // The BGP candidate ages out; the static one never does.
        rib.age(now + Duration::from_secs(31));
        rib.process_update_queue();
        let routes = rib.all_routes();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].0.source, RouteSource::Static);
    }

    #[tokio::test]
    async fn refresh_does_not_emit_events() {
        let (mut rib, mut rx) = setup();
        let now = Instant::now();
        let prefix = net4!("10.0.0.0/24");

        let msg =
            route(prefix, ip4!("10.1.0.1"), "eth0", RouteSource::Bgp, 20, 0);
        rib.install(msg.clone(), now);
        rib.process_update_queue();
        rib.install(msg, now + Duration::from_secs(1));
        rib.process_update_queue();

        // One activation, no replace for the identical reinstall.
        assert_eq!(route_events(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn prefix_length_boundaries() {
        let (mut rib, _rx) = setup();
        let now = Instant::now();

        rib.install(
            route(
                net4!("0.0.0.0/0"),
                ip4!("10.0.0.254"),
                "eth0",
                RouteSource::Static,
                1,
                0,
            ),
            now,
        );
        rib.install(
            route(
                net4!("10.0.0.1/32"),
                ip4!("10.0.0.253"),
                "eth1",
                RouteSource::Static,
                1,
                0,
            ),
            now,
        );
        rib.process_update_queue();

        let reader = rib.reader();
        // The default route matches everything...
        assert_eq!(
            reader.lookup(ip4!("203.0.113.7")).unwrap().prefix,
            net4!("0.0.0.0/0")
        );
        // ...but the host prefix wins for the exact address.
        assert_eq!(
            reader.lookup(ip4!("10.0.0.1")).unwrap().prefix,
            net4!("10.0.0.1/32")
        );
        assert_eq!(
            reader.lookup(ip4!("10.0.0.2")).unwrap().prefix,
            net4!("0.0.0.0/0")
        );
    }

    #[tokio::test]
    async fn longest_prefix_wins() {
        let (mut rib, _rx) = setup();
        let now = Instant::now();

        rib.install(
            route(
                net4!("10.0.0.0/8"),
                ip4!("10.255.0.1"),
                "eth0",
                RouteSource::Static,
                1,
                0,
            ),
            now,
        );
        rib.install(
            route(
                net4!("10.1.0.0/16"),
                ip4!("10.255.0.2"),
                "eth1",
                RouteSource::Static,
                1,
                0,
            ),
            now,
        );
        rib.process_update_queue();

        let reader = rib.reader();
        assert_eq!(
            reader.lookup(ip4!("10.1.2.3")).unwrap().prefix,
            net4!("10.1.0.0/16")
        );
        assert_eq!(
            reader.lookup(ip4!("10.2.2.3")).unwrap().prefix,
            net4!("10.0.0.0/8")
        );
    }
}
