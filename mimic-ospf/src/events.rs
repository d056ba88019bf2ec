//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use mimic_utils::bus::EventKind;
use mimic_utils::protocol::RouteSource;
use mimic_utils::route::{RouteAttrs, RouteMsg, RouteUpdateMsg};
use mimic_utils::transport::WireMsg;
use tokio::time::Instant;
use tracing::debug;

use crate::error::Error;
use crate::instance::InstanceUpView;
use crate::interface::{Interface, InterfaceType, Interfaces, ism};
use crate::lsdb::Lsdb;
use crate::neighbor::{Neighbor, nsm};
use crate::packet::lsa::{
    LSA_MAX_AGE, Lsa, LsaBody, LsaHdr, LsaKey, LsaRouter, LsaRouterLink,
    LsaRouterLinkType, LsaType,
};
use crate::packet::{
    DbDescFlags, DbDescPkt, HelloPkt, LsAckPkt, LsRequestPkt, LsUpdatePkt,
    Packet, PacketHdr, PacketType,
};
use crate::spf::{self, NexthopInfo};
use crate::tasks;
use crate::tasks::messages::input::NetRxMsg;

// Hello options: E-bit (external routing capability).
const OPTIONS: u8 = 0x02;

// ===== packet reception =====

pub(crate) fn process_net_rx(
    instance: &mut InstanceUpView<'_>,
    interfaces: &mut Interfaces,
    msg: NetRxMsg,
) {
    let Some(iface) = interfaces.get_mut(&msg.ifname) else {
        Error::InterfaceUnknown(msg.ifname.clone()).log();
        return;
    };

    // Malformed packets are silently discarded.
    let packet = match Packet::decode(&msg.data) {
        Ok(packet) => packet,
        Err(error) => {
            Error::PacketDecodeError(msg.ifname.clone(), error).log();
            instance.state.error_count += 1;
            return;
        }
    };

    // Locally originated packets echoed back by the fabric are ignored.
    let hdr = *packet.hdr();
    if hdr.router_id == instance.router_id() {
        return;
    }

    // Area check.
    if hdr.area_id != instance.config.area_id {
        Error::AreaMismatch(hdr.area_id, instance.config.area_id).log();
        instance.state.error_count += 1;
        return;
    }

    match packet {
        Packet::Hello(pkt) => {
            process_hello(instance, iface, msg.src, pkt);
        }
        Packet::DbDesc(pkt) => {
            process_dbdesc(instance, iface, hdr.router_id, pkt);
        }
        Packet::LsRequest(pkt) => {
            process_lsrequest(instance, iface, hdr.router_id, pkt);
        }
        Packet::LsUpdate(pkt) => {
            process_lsupdate(instance, interfaces, &msg.ifname, hdr.router_id, pkt);
        }
        Packet::LsAck(_) => {
            // Retransmission lists are not modeled; acknowledgments
            // require no further processing.
        }
    }
}

// ===== Hello protocol =====

fn process_hello(
    instance: &mut InstanceUpView<'_>,
    iface: &mut Interface,
    src: Ipv4Addr,
    pkt: HelloPkt,
) {
    // Interval parameters must match on both ends.
    if pkt.hello_interval != iface.config.hello_interval
        || pkt.dead_interval != iface.config.dead_interval
    {
        instance.state.error_count += 1;
        return;
    }

    let router_id = pkt.hdr.router_id;
    let nbr = iface
        .neighbors
        .entry(router_id)
        .or_insert_with(|| Neighbor::new(router_id, src));
    nbr.src = src;
    nbr.priority = pkt.priority;
    nbr.dr = pkt.dr;
    nbr.bdr = pkt.bdr;

    // Restart the inactivity timer.
    nbr.tasks.inactivity = Some(tasks::nbr_inactivity_timer(
        &iface.config.name,
        router_id,
        Duration::from_secs(iface.config.dead_interval as u64),
        &instance.tx.timer,
    ));

    let two_way = pkt.neighbors.contains(&instance.router_id());
    if nbr.state == nsm::State::Down {
        nbr_state_change(
            instance,
            &iface.config.name,
            nbr,
            nsm::State::Init,
            nsm::Event::HelloRcvd,
        );
    }
    if two_way && nbr.state == nsm::State::Init {
        nbr_state_change(
            instance,
            &iface.config.name,
            nbr,
            nsm::State::TwoWay,
            nsm::Event::TwoWayRcvd,
        );
        iface.dr_election(instance.router_id());
        adjacency_check(instance, iface, router_id);
    } else if !two_way && nbr.state >= nsm::State::TwoWay {
        // The neighbor no longer lists us: fall back to one-way.
        let nbr = iface.neighbors.get_mut(&router_id).unwrap();
        nbr.exchange_reset();
        nbr_state_change(
            instance,
            &iface.config.name,
            nbr,
            nsm::State::Init,
            nsm::Event::OneWayRcvd,
        );
        iface.dr_election(instance.router_id());
        originate_lsas_deferred(instance);
    }
}

// Brings the neighbor to ExStart when an adjacency should form.
pub(crate) fn adjacency_check(
    instance: &mut InstanceUpView<'_>,
    iface: &mut Interface,
    router_id: Ipv4Addr,
) {
    let Some(nbr) = iface.neighbors.get(&router_id) else {
        return;
    };
    if nbr.state != nsm::State::TwoWay || !iface.should_be_adjacent(nbr) {
        return;
    }
    let nbr = iface.neighbors.get_mut(&router_id).unwrap();

    instance.state.dd_seq_counter += 1;
    nbr.dd_seq_no = instance.state.dd_seq_counter;
    nbr.dd_flags = DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS;
    nbr_state_change(
        instance,
        &iface.config.name,
        nbr,
        nsm::State::ExStart,
        nsm::Event::TwoWayRcvd,
    );

    let pkt = DbDescPkt {
        hdr: packet_hdr(instance, PacketType::DbDesc),
        mtu: 1500,
        options: OPTIONS,
        dd_flags: DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS,
        dd_seq_no: instance.state.dd_seq_counter,
        lsa_hdrs: vec![],
    };
    send_packet(instance, &iface.config.name, &Packet::DbDesc(pkt));
}

// ===== database exchange =====

fn process_dbdesc(
    instance: &mut InstanceUpView<'_>,
    iface: &mut Interface,
    router_id: Ipv4Addr,
    pkt: DbDescPkt,
) {
    let now = Instant::now();
    let our_id = instance.router_id();
    let ifname = iface.config.name.clone();
    let Some(nbr) = iface.neighbors.get_mut(&router_id) else {
        Error::NbrUnknown(router_id).log();
        return;
    };

    match nbr.state {
        nsm::State::ExStart => {
            if pkt
                .dd_flags
                .contains(DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS)
                && pkt.lsa_hdrs.is_empty()
                && router_id > our_id
            {
                // The neighbor is the master; adopt its sequence number
                // and send our full summary in the implied acknowledgment.
                nbr.master = true;
                nbr.dd_seq_no = pkt.dd_seq_no;
                nbr_state_change(
                    instance,
                    &ifname,
                    nbr,
                    nsm::State::Exchange,
                    nsm::Event::NegotiationDone,
                );
                let summary = instance.state.lsdb.lsa_hdrs(now);
                let reply = DbDescPkt {
                    hdr: packet_hdr(instance, PacketType::DbDesc),
                    mtu: 1500,
                    options: OPTIONS,
                    dd_flags: DbDescFlags::empty(),
                    dd_seq_no: pkt.dd_seq_no,
                    lsa_hdrs: summary,
                };
                send_packet(instance, &ifname, &Packet::DbDesc(reply));
            } else if !pkt.dd_flags.contains(DbDescFlags::MS)
                && pkt.dd_seq_no == nbr.dd_seq_no
                && router_id < our_id
            {
                // We are the master and the slave acknowledged with its
                // summary.
                nbr.master = false;
                request_list_update(&instance.state.lsdb, nbr, &pkt.lsa_hdrs, now);
                nbr_state_change(
                    instance,
                    &ifname,
                    nbr,
                    nsm::State::Exchange,
                    nsm::Event::NegotiationDone,
                );
                let summary = instance.state.lsdb.lsa_hdrs(now);
                nbr.dd_seq_no += 1;
                let reply = DbDescPkt {
                    hdr: packet_hdr(instance, PacketType::DbDesc),
                    mtu: 1500,
                    options: OPTIONS,
                    dd_flags: DbDescFlags::MS,
                    dd_seq_no: nbr.dd_seq_no,
                    lsa_hdrs: summary,
                };
                send_packet(instance, &ifname, &Packet::DbDesc(reply));
                exchange_done(instance, &ifname, nbr);
            }
        }
        nsm::State::Exchange => {
            if pkt.dd_flags.contains(DbDescFlags::I) {
                // Restarted negotiation.
                seq_number_mismatch(instance, &ifname, nbr);
                return;
            }
            if nbr.master {
                // Master's summary: record it and echo the sequence
                // number.
                if pkt.dd_seq_no != nbr.dd_seq_no
                    && pkt.dd_seq_no != nbr.dd_seq_no + 1
                {
                    seq_number_mismatch(instance, &ifname, nbr);
                    return;
                }
                nbr.dd_seq_no = pkt.dd_seq_no;
                request_list_update(&instance.state.lsdb, nbr, &pkt.lsa_hdrs, now);
                let reply = DbDescPkt {
                    hdr: packet_hdr(instance, PacketType::DbDesc),
                    mtu: 1500,
                    options: OPTIONS,
                    dd_flags: DbDescFlags::empty(),
                    dd_seq_no: pkt.dd_seq_no,
                    lsa_hdrs: vec![],
                };
                send_packet(instance, &ifname, &Packet::DbDesc(reply));
                if !pkt.dd_flags.contains(DbDescFlags::M) {
                    exchange_done(instance, &ifname, nbr);
                }
            } else if pkt.dd_seq_no == nbr.dd_seq_no
                && !pkt.dd_flags.contains(DbDescFlags::M)
            {
                // Slave echo of our final summary.
                request_list_update(&instance.state.lsdb, nbr, &pkt.lsa_hdrs, now);
                exchange_done(instance, &ifname, nbr);
            }
        }
        nsm::State::Loading | nsm::State::Full
            if pkt.dd_flags.contains(DbDescFlags::I) =>
        {
            seq_number_mismatch(instance, &ifname, nbr);
        }
        _ => (),
    }
}

// Adds LSAs we are missing (or hold older copies of) to the request list.
fn request_list_update(
    lsdb: &Lsdb,
    nbr: &mut Neighbor,
    lsa_hdrs: &[LsaHdr],
    now: Instant,
) {
    for hdr in lsa_hdrs {
        let key = hdr.key();
        let missing_or_older = match lsdb.get(&key) {
            Some(entry) => {
                hdr.seq_no > entry.lsa.hdr.seq_no
                    || (hdr.seq_no == entry.lsa.hdr.seq_no
                        && hdr.age == LSA_MAX_AGE
                        && entry.age(now) < LSA_MAX_AGE)
            }
            None => true,
        };
        if missing_or_older {
            nbr.ls_request_list.insert(key);
        }
    }
}

fn exchange_done(
    instance: &mut InstanceUpView<'_>,
    ifname: &str,
    nbr: &mut Neighbor,
) {
    if nbr.ls_request_list.is_empty() {
        nbr_full(instance, ifname, nbr, nsm::Event::ExchangeDone);
        return;
    }

    nbr_state_change(
        instance,
        ifname,
        nbr,
        nsm::State::Loading,
        nsm::Event::ExchangeDone,
    );
    let pkt = LsRequestPkt {
        hdr: packet_hdr(instance, PacketType::LsRequest),
        entries: nbr.ls_request_list.iter().copied().collect(),
    };
    send_packet(instance, ifname, &Packet::LsRequest(pkt));
}

fn seq_number_mismatch(
    instance: &mut InstanceUpView<'_>,
    ifname: &str,
    nbr: &mut Neighbor,
) {
    debug!(router_id = %nbr.router_id, "sequence number mismatch");
    nbr.exchange_reset();
    nbr_state_change(
        instance,
        ifname,
        nbr,
        nsm::State::TwoWay,
        nsm::Event::SeqNumberMismatch,
    );
}

// ===== flooding =====

fn process_lsrequest(
    instance: &mut InstanceUpView<'_>,
    iface: &mut Interface,
    router_id: Ipv4Addr,
    pkt: LsRequestPkt,
) {
    let now = Instant::now();
    if !iface.neighbors.contains_key(&router_id) {
        Error::NbrUnknown(router_id).log();
        return;
    }

    let lsas = pkt
        .entries
        .iter()
        .filter_map(|key| instance.state.lsdb.get(key))
        .map(|entry| {
            let mut lsa = entry.lsa.clone();
            lsa.hdr.age = entry.age(now);
            lsa
        })
        .collect::<Vec<_>>();
    if lsas.is_empty() {
        return;
    }

    let reply = LsUpdatePkt {
        hdr: packet_hdr(instance, PacketType::LsUpdate),
        lsas,
    };
    send_packet(instance, &iface.config.name, &Packet::LsUpdate(reply));
}

fn process_lsupdate(
    instance: &mut InstanceUpView<'_>,
    interfaces: &mut Interfaces,
    ifname: &str,
    router_id: Ipv4Addr,
    pkt: LsUpdatePkt,
) {
    let now = Instant::now();
    let mut acked = vec![];
    let mut flooded = vec![];
    let mut changed = false;

    {
        let Some(iface) = interfaces.get_mut(ifname) else {
            return;
        };
        let Some(nbr) = iface.neighbors.get_mut(&router_id) else {
            Error::NbrUnknown(router_id).log();
            return;
        };

        for lsa in pkt.lsas {
            acked.push(lsa.hdr);
            nbr.ls_request_list.remove(&lsa.key());

            if instance.state.lsdb.install(lsa.clone(), now) {
                changed = true;
                flooded.push(lsa);
            }
        }

        // Loading completes once every requested LSA was received.
        if nbr.state == nsm::State::Loading
            && nbr.ls_request_list.is_empty()
        {
            nbr_full(instance, ifname, nbr, nsm::Event::LoadingDone);
        }

        // Acknowledge everything received.
        let ack = LsAckPkt {
            hdr: packet_hdr(instance, PacketType::LsAck),
            lsa_hdrs: acked,
        };
        send_packet(instance, ifname, &Packet::LsAck(ack));
    }

    // Flood newly installed LSAs to the other adjacencies.
    for lsa in flooded {
        flood(instance, interfaces, &lsa, Some(ifname));
    }

    if changed {
        schedule_spf(instance);
    }
}

// Floods an LSA out of every interface with at least one adjacency,
// except `skip_ifname`.
pub(crate) fn flood(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    lsa: &Lsa,
    skip_ifname: Option<&str>,
) {
    for iface in interfaces.values() {
        if Some(iface.config.name.as_str()) == skip_ifname {
            continue;
        }
        if !iface.neighbors.values().any(|nbr| nbr.is_adjacent()) {
            continue;
        }
        let pkt = LsUpdatePkt {
            hdr: packet_hdr(instance, PacketType::LsUpdate),
            lsas: vec![lsa.clone()],
        };
        send_packet(instance, &iface.config.name, &Packet::LsUpdate(pkt));
    }
}

// ===== timer events =====

pub(crate) fn process_hello_interval(
    instance: &mut InstanceUpView<'_>,
    interfaces: &mut Interfaces,
    ifname: &str,
) {
    let Some(iface) = interfaces.get(ifname) else {
        return;
    };

    let pkt = HelloPkt {
        hdr: packet_hdr(instance, PacketType::Hello),
        network_mask: iface.config.addr.mask(),
        hello_interval: iface.config.hello_interval,
        options: OPTIONS,
        priority: iface.config.priority,
        dead_interval: iface.config.dead_interval,
        dr: iface.dr,
        bdr: iface.bdr,
        neighbors: iface.neighbors.keys().copied().collect(),
    };
    send_packet(instance, ifname, &Packet::Hello(pkt));
}

pub(crate) fn process_wait_timer(
    instance: &mut InstanceUpView<'_>,
    interfaces: &mut Interfaces,
    ifname: &str,
) {
    let Some(iface) = interfaces.get_mut(ifname) else {
        return;
    };
    if iface.state != ism::State::Waiting {
        return;
    }

    iface.dr_election(instance.router_id());
    let router_ids = iface.neighbors.keys().copied().collect::<Vec<_>>();
    for router_id in router_ids {
        adjacency_check(instance, iface, router_id);
    }
    originate_lsas_deferred(instance);
}

pub(crate) fn process_nbr_inactivity(
    instance: &mut InstanceUpView<'_>,
    interfaces: &mut Interfaces,
    ifname: &str,
    router_id: Ipv4Addr,
) {
    let Some(iface) = interfaces.get_mut(ifname) else {
        return;
    };
    let Some(mut nbr) = iface.neighbors.remove(&router_id) else {
        return;
    };

    // The neighbor is declared dead.
    nbr_state_change(
        instance,
        ifname,
        &mut nbr,
        nsm::State::Down,
        nsm::Event::InactivityTimer,
    );
    iface.dr_election(instance.router_id());
    originate_lsas_deferred(instance);
    schedule_spf(instance);
}

pub(crate) fn process_age_tick(
    instance: &mut InstanceUpView<'_>,
    interfaces: &mut Interfaces,
) {
    let now = Instant::now();
    let result = instance
        .state
        .lsdb
        .age_out(instance.router_id(), now);

    if !result.expired.is_empty() {
        schedule_spf(instance);
    }
    if !result.refresh.is_empty() {
        originate_lsas(instance, interfaces);
    }
}

// ===== LSA origination =====

// Re-originates this router's LSAs from the current interface and
// adjacency state, then floods the new versions.
pub(crate) fn originate_lsas(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
) {
    let now = Instant::now();
    let router_id = instance.router_id();
    let mut originated = vec![];

    // Router-LSA.
    let mut links = vec![];
    for iface in interfaces.values() {
        let full_nbrs = iface
            .neighbors
            .values()
            .filter(|nbr| nbr.state == nsm::State::Full)
            .collect::<Vec<_>>();

        match iface.config.interface_type {
            InterfaceType::PointToPoint => {
                for nbr in &full_nbrs {
                    links.push(LsaRouterLink::new(
                        LsaRouterLinkType::PointToPoint,
                        nbr.router_id,
                        iface.addr(),
                        iface.config.cost,
                    ));
                }
                links.push(stub_link(iface));
            }
            InterfaceType::Broadcast => {
                if let Some(dr) = iface.dr
                    && (!full_nbrs.is_empty() || iface.is_dr())
                {
                    links.push(LsaRouterLink::new(
                        LsaRouterLinkType::TransitNetwork,
                        dr,
                        iface.addr(),
                        iface.config.cost,
                    ));
                } else {
                    links.push(stub_link(iface));
                }
            }
        }
    }
    let key = LsaKey::new(LsaType::Router, router_id, router_id);
    let lsa = Lsa::new(
        0,
        router_id,
        router_id,
        instance.state.lsdb.next_seq_no(&key),
        LsaBody::Router(LsaRouter { flags: 0, links }),
    );
    originated.push(lsa);

    // Network-LSAs for segments where this router is the DR.
    for iface in interfaces
        .values()
        .filter(|iface| iface.is_dr())
    {
        let full_nbrs = iface
            .neighbors
            .values()
            .filter(|nbr| nbr.state == nsm::State::Full)
            .map(|nbr| nbr.router_id)
            .collect::<Vec<_>>();
        if full_nbrs.is_empty() {
            continue;
        }
        let mut attached_rtrs = vec![router_id];
        attached_rtrs.extend(full_nbrs);

        let key = LsaKey::new(LsaType::Network, router_id, iface.addr());
        let lsa = Lsa::new(
            0,
            iface.addr(),
            router_id,
            instance.state.lsdb.next_seq_no(&key),
            LsaBody::Network(crate::packet::lsa::LsaNetwork {
                mask: iface.config.addr.mask(),
                attached_rtrs,
            }),
        );
        originated.push(lsa);
    }

    for lsa in originated {
        instance.state.lsdb.install(lsa.clone(), now);
        flood(instance, interfaces, &lsa, None);
    }
    schedule_spf(instance);
}

fn stub_link(iface: &Interface) -> LsaRouterLink {
    LsaRouterLink::new(
        LsaRouterLinkType::StubNetwork,
        iface.config.addr.network(),
        iface.config.addr.mask(),
        iface.config.cost,
    )
}

// Marks the LSAs for re-origination on the next event-loop pass; used
// where the interface table is already mutably borrowed.
fn originate_lsas_deferred(instance: &mut InstanceUpView<'_>) {
    instance.state.reoriginate = true;
}

// ===== SPF =====

pub(crate) fn schedule_spf(instance: &mut InstanceUpView<'_>) {
    if instance.state.spf_delay_timer.is_some() {
        return;
    }
    let delay = Duration::from_secs(instance.config.spf_hold as u64);
    instance.state.spf_delay_timer =
        Some(tasks::spf_delay_timer(delay, &instance.tx.timer));
}

pub(crate) fn process_spf_delay(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
) {
    instance.state.spf_delay_timer = None;
    let now = Instant::now();

    // First hops resolve through fully adjacent neighbors.
    let mut neighbors = HashMap::new();
    for iface in interfaces.values() {
        for nbr in iface
            .neighbors
            .values()
            .filter(|nbr| nbr.state == nsm::State::Full)
        {
            neighbors.insert(
                nbr.router_id,
                NexthopInfo {
                    ifname: iface.config.name.clone(),
                    addr: nbr.src,
                },
            );
        }
    }

    let routes =
        spf::compute(&instance.state.lsdb, instance.router_id(), &neighbors, now);

    // Withdraw routes that disappeared.
    let old = std::mem::take(&mut instance.state.installed);
    for prefix in old.keys() {
        if !routes.contains_key(prefix) {
            let _ = instance.shared.rib_tx.send(RouteUpdateMsg::Withdraw {
                prefix: *prefix,
                source: RouteSource::Ospfv2,
            });
        }
    }

    // Install new and changed routes.
    for (prefix, route) in &routes {
        if old.get(prefix) != Some(route) {
            let msg = RouteMsg::new(
                *prefix,
                route.nexthop,
                route.ifname.clone(),
                RouteSource::Ospfv2,
                RouteSource::Ospfv2.default_distance(),
                route.metric,
                RouteAttrs::Ospf {
                    area: instance.config.area_id,
                },
                None,
            );
            let _ = instance.shared.rib_tx.send(RouteUpdateMsg::Install(msg));
        }
    }
    instance.state.installed = routes;
}

// ===== helper functions =====

fn packet_hdr(
    instance: &InstanceUpView<'_>,
    pkt_type: PacketType,
) -> PacketHdr {
    PacketHdr {
        pkt_type,
        router_id: instance.router_id(),
        area_id: instance.config.area_id,
    }
}

pub(crate) fn send_packet(
    instance: &mut InstanceUpView<'_>,
    ifname: &str,
    packet: &Packet,
) {
    let data = packet.encode();
    instance.state.msgs_sent += 1;
    let _ = instance.shared.wire_tx.send(WireMsg::Data {
        protocol: RouteSource::Ospfv2,
        peer: ifname.to_owned(),
        data,
    });
}

// Transitions a neighbor to Full, re-originating and publishing.
fn nbr_full(
    instance: &mut InstanceUpView<'_>,
    ifname: &str,
    nbr: &mut Neighbor,
    event: nsm::Event,
) {
    nbr_state_change(instance, ifname, nbr, nsm::State::Full, event);
    originate_lsas_deferred(instance);
    schedule_spf(instance);
}

fn nbr_state_change(
    instance: &mut InstanceUpView<'_>,
    ifname: &str,
    nbr: &mut Neighbor,
    new_state: nsm::State,
    event: nsm::Event,
) {
    if nbr.state == new_state {
        return;
    }
    debug!(
        %ifname, router_id = %nbr.router_id, old_state = %nbr.state,
        %new_state, ?event, "neighbor state change"
    );

    let old_state = nbr.state;
    nbr.state = new_state;

    instance.shared.event_bus.publish(EventKind::NeighborChanged {
        source: RouteSource::Ospfv2,
        peer: nbr.router_id.to_string(),
        old_state: old_state.to_string(),
        new_state: new_state.to_string(),
    });
}
