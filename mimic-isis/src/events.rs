//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::HashMap;
use std::time::Duration;

use mimic_utils::bus::EventKind;
use mimic_utils::protocol::RouteSource;
use mimic_utils::route::{RouteAttrs, RouteMsg, RouteUpdateMsg};
use mimic_utils::transport::WireMsg;
use tokio::time::Instant;
use tracing::debug;

use crate::adjacency::{Adjacency, AdjacencyEvent, AdjacencyState};
use crate::error::Error;
use crate::instance::{InstanceUpView, Interface, Interfaces};
use crate::packet::pdu::{
    AdjStateTlv, AdjThreeWayState, Hello, HelloTlvs, IpReach, IsReach,
    LSP_MAX_LIFETIME, Lsp, LspTlvs, NLPID_IPV4, Pdu, Snp,
};
use crate::packet::{LanId, LevelNumber, LevelType, LspId};
use crate::spf::{self, NexthopInfo};
use crate::tasks;
use crate::tasks::messages::input::NetRxMsg;

// ===== PDU reception =====

pub(crate) fn process_net_rx(
    instance: &mut InstanceUpView<'_>,
    interfaces: &mut Interfaces,
    msg: NetRxMsg,
) {
    if !interfaces.contains_key(&msg.ifname) {
        Error::InterfaceUnknown(msg.ifname.clone()).log();
        return;
    }

    // Malformed PDUs are silently discarded.
    let pdu = match Pdu::decode(&msg.data) {
        Ok(pdu) => pdu,
        Err(error) => {
            Error::PduDecodeError(msg.ifname.clone(), error).log();
            instance.state.error_count += 1;
            return;
        }
    };

    match pdu {
        Pdu::Hello(hello) => {
            let iface = interfaces.get_mut(&msg.ifname).unwrap();
            process_hello(instance, iface, hello);
        }
        Pdu::Lsp(lsp) => {
            process_lsp(instance, interfaces, &msg.ifname, lsp);
        }
        Pdu::Snp(snp) => {
            let iface = interfaces.get_mut(&msg.ifname).unwrap();
            process_snp(instance, iface, snp);
        }
    }
}

// ===== hello processing =====

fn process_hello(
    instance: &mut InstanceUpView<'_>,
    iface: &mut Interface,
    hello: Hello,
) {
    // Our own hellos echoed back by the fabric are ignored.
    if hello.source == instance.config.system_id {
        return;
    }

    // Level negotiation: the circuit type must overlap our configuration.
    let peer_levels = match hello.circuit_type {
        1 => LevelType::L1,
        2 => LevelType::L2,
        3 => LevelType::All,
        _ => return,
    };
    let usage = level_intersect(peer_levels, instance.config.level_type);
    let Some(mut usage) = usage else {
        return;
    };

    // An L1 adjacency requires a common area address.
    if usage.intersects(LevelNumber::L1)
        && !hello
            .tlvs
            .area_addrs
            .contains(&instance.config.area_addr)
    {
        match usage {
            LevelType::L1 => {
                Error::AreaMismatch(iface.config.name.clone()).log();
                instance.state.error_count += 1;
                return;
            }
            _ => usage = LevelType::L2,
        }
    }

    // Get or create the adjacency for this circuit.
    if iface
        .adjacency
        .as_ref()
        .is_some_and(|adj| adj.system_id != hello.source)
    {
        iface.adjacency = None;
    }
    let adj = iface
        .adjacency
        .get_or_insert_with(|| Adjacency::new(hello.source, usage));
    adj.level_usage = usage;
    adj.ipv4_addr = hello.tlvs.ipv4_addrs.first().copied();

    // Three-way handshake: the adjacency comes up once the neighbor
    // reports us back.
    let seen = hello
        .tlvs
        .adj_state
        .as_ref()
        .and_then(|tlv| tlv.neighbor)
        .is_some_and(|(neighbor, _)| {
            neighbor == instance.config.system_id
        });
    let (new_state, event) = if seen {
        (AdjacencyState::Up, AdjacencyEvent::HelloTwoWayRcvd)
    } else {
        (AdjacencyState::Initializing, AdjacencyEvent::HelloOneWayRcvd)
    };

    // Restart the holdtime timer.
    adj.holdtimer = Some(tasks::adjacency_holdtimer(
        &iface.config.name,
        Duration::from_secs(hello.holdtime as u64),
        &instance.tx.timer,
    ));

    if adj.state != new_state {
        adjacency_state_change(instance, &iface.config.name, adj, new_state, event);

        if new_state == AdjacencyState::Up {
            // Synchronize the databases: describe ours with a CSNP per
            // level in use.
            let now = Instant::now();
            for level in adj.level_usage.levels() {
                let entries =
                    instance.state.lsdb.lsp_entries(*level, now);
                let csnp = Pdu::Snp(Snp {
                    level: *level,
                    source: LanId::from(instance.config.system_id),
                    summary: Some((LspId::default(), LspId {
                        system_id: crate::packet::SystemId::new([0xff; 6]),
                        pseudonode: 0xff,
                        fragment: 0xff,
                    })),
                    entries,
                });
                send_pdu(instance, &iface.config.name, &csnp);
            }
            instance.state.reoriginate = true;
        } else {
            instance.state.reoriginate = true;
            instance.state.spf_pending = true;
        }
    }
}

// ===== LSP flooding =====

fn process_lsp(
    instance: &mut InstanceUpView<'_>,
    interfaces: &mut Interfaces,
    ifname: &str,
    lsp: Lsp,
) {
    let now = Instant::now();

    // Only levels we participate in.
    if !instance.config.level_type.intersects(lsp.level) {
        return;
    }

    // If we hold a newer copy, send it back toward the neighbor.
    if let Some(entry) = instance.state.lsdb.get(lsp.level, &lsp.lsp_id)
        && entry.lsp.seq_no > lsp.seq_no
    {
        let newer = Pdu::Lsp(entry.lsp.clone());
        send_pdu(instance, ifname, &newer);
        return;
    }

    if instance.state.lsdb.install(lsp.clone(), now) {
        // Acknowledge reception on the incoming circuit.
        let psnp = Pdu::Snp(Snp {
            level: lsp.level,
            source: LanId::from(instance.config.system_id),
            summary: None,
            entries: vec![crate::packet::pdu::LspEntry {
                rem_lifetime: lsp.rem_lifetime,
                lsp_id: lsp.lsp_id,
                seq_no: lsp.seq_no,
                cksum: lsp.cksum,
            }],
        });
        send_pdu(instance, ifname, &psnp);

        // Flood onward.
        flood_lsp(instance, interfaces, &lsp, Some(ifname));
        instance.state.spf_pending = true;
    }
}

pub(crate) fn flood_lsp(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
    lsp: &Lsp,
    skip_ifname: Option<&str>,
) {
    for iface in interfaces.values() {
        if Some(iface.config.name.as_str()) == skip_ifname {
            continue;
        }
        let Some(adj) = &iface.adjacency else {
            continue;
        };
        if adj.state != AdjacencyState::Up
            || !adj.level_usage.intersects(lsp.level)
        {
            continue;
        }
        send_pdu(instance, &iface.config.name, &Pdu::Lsp(lsp.clone()));
    }
}

// ===== sequence numbers PDUs =====

fn process_snp(
    instance: &mut InstanceUpView<'_>,
    iface: &mut Interface,
    snp: Snp,
) {
    if !instance.config.level_type.intersects(snp.level) {
        return;
    }
    let is_csnp = snp.summary.is_some();

    let mut requests = vec![];
    for entry in &snp.entries {
        match instance.state.lsdb.get(snp.level, &entry.lsp_id) {
            Some(stored) if stored.lsp.seq_no > entry.seq_no => {
                // We hold a newer copy: send it.
                let lsp = Pdu::Lsp(stored.lsp.clone());
                send_pdu(instance, &iface.config.name, &lsp);
            }
            Some(stored) if stored.lsp.seq_no < entry.seq_no => {
                requests.push(*entry);
            }
            // Explicit requests carry a zero sequence number and are
            // answered by the newer-copy arm above.
            Some(_) => (),
            None if is_csnp => requests.push(*entry),
            None => (),
        }
    }

    if is_csnp {
        // LSPs the neighbor's summary doesn't mention are sent in full.
        let known = snp
            .entries
            .iter()
            .map(|entry| entry.lsp_id)
            .collect::<Vec<_>>();
        let missing = instance
            .state
            .lsdb
            .iter(snp.level)
            .filter(|(lsp_id, _)| !known.contains(lsp_id))
            .map(|(_, entry)| entry.lsp.clone())
            .collect::<Vec<_>>();
        for lsp in missing {
            send_pdu(instance, &iface.config.name, &Pdu::Lsp(lsp));
        }

        // And the ones we are missing are requested with a PSNP.
        if !requests.is_empty() {
            let mut requests = requests;
            for request in requests.iter_mut() {
                request.seq_no = 0;
                request.cksum = 0;
            }
            let psnp = Pdu::Snp(Snp {
                level: snp.level,
                source: LanId::from(instance.config.system_id),
                summary: None,
                entries: requests,
            });
            send_pdu(instance, &iface.config.name, &psnp);
        }
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

    let circuit_type = match instance.config.level_type {
        LevelType::L1 => 1,
        LevelType::L2 => 2,
        LevelType::All => 3,
    };
    let adj_state = match &iface.adjacency {
        Some(adj) => AdjStateTlv {
            state: match adj.state {
                AdjacencyState::Up => AdjThreeWayState::Up,
                AdjacencyState::Initializing => {
                    AdjThreeWayState::Initializing
                }
                AdjacencyState::Down => AdjThreeWayState::Down,
            },
            ext_circuit_id: iface.circuit_id as u32,
            neighbor: Some((adj.system_id, iface.circuit_id as u32)),
        },
        None => AdjStateTlv {
            state: AdjThreeWayState::Down,
            ext_circuit_id: iface.circuit_id as u32,
            neighbor: None,
        },
    };

    let hello = Pdu::Hello(Hello {
        circuit_type,
        source: instance.config.system_id,
        holdtime: instance.config.hello_interval
            * instance.config.hold_multiplier,
        local_circuit_id: iface.circuit_id,
        tlvs: HelloTlvs {
            area_addrs: vec![instance.config.area_addr.clone()],
            protocols_supported: vec![NLPID_IPV4],
            ipv4_addrs: vec![iface.config.addr.ip()],
            adj_state: Some(adj_state),
        },
    });
    send_pdu(instance, ifname, &hello);
}

pub(crate) fn process_adj_holdtimer(
    instance: &mut InstanceUpView<'_>,
    interfaces: &mut Interfaces,
    ifname: &str,
) {
    let Some(iface) = interfaces.get_mut(ifname) else {
        return;
    };
    let Some(mut adj) = iface.adjacency.take() else {
        return;
    };

    adjacency_state_change(
        instance,
        ifname,
        &mut adj,
        AdjacencyState::Down,
        AdjacencyEvent::HoldtimeExpired,
    );
    instance.state.reoriginate = true;
    instance.state.spf_pending = true;
}

pub(crate) fn process_age_tick(
    instance: &mut InstanceUpView<'_>,
    _interfaces: &mut Interfaces,
) {
    let now = Instant::now();
    let mut refresh = vec![];
    let expired = instance.state.lsdb.age_out(
        instance.config.system_id,
        now,
        &mut refresh,
    );
    if expired {
        instance.state.spf_pending = true;
    }
    if !refresh.is_empty() {
        instance.state.reoriginate = true;
    }
}

// ===== LSP origination =====

// Re-originates this system's LSPs from the current adjacency and
// interface state, then floods the new versions.
pub(crate) fn originate_lsps(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
) {
    let now = Instant::now();
    let lsp_id = LspId::from(instance.config.system_id);

    for level in instance.config.level_type.levels() {
        let is_reach = interfaces
            .values()
            .filter_map(|iface| {
                iface.adjacency.as_ref().map(|adj| (iface, adj))
            })
            .filter(|(_, adj)| adj.state == AdjacencyState::Up)
            .filter(|(_, adj)| adj.level_usage.intersects(*level))
            .map(|(iface, adj)| IsReach {
                neighbor: LanId::from(adj.system_id),
                metric: iface.config.metric,
            })
            .collect::<Vec<_>>();
        let ip_internal_reach = interfaces
            .values()
            .map(|iface| IpReach {
                prefix: iface.config.addr,
                metric: iface.config.metric,
            })
            .collect::<Vec<_>>();
        let ipv4_addrs = interfaces
            .values()
            .map(|iface| iface.config.addr.ip())
            .collect::<Vec<_>>();

        let flags = match level {
            LevelNumber::L1 => 0x01,
            LevelNumber::L2 => 0x03,
        };
        let lsp = Lsp::new(
            *level,
            LSP_MAX_LIFETIME,
            lsp_id,
            instance.state.lsdb.next_seq_no(*level, &lsp_id),
            flags,
            LspTlvs {
                area_addrs: vec![instance.config.area_addr.clone()],
                protocols_supported: vec![NLPID_IPV4],
                ipv4_addrs,
                is_reach,
                ip_internal_reach,
            },
        );
        instance.state.lsdb.install(lsp.clone(), now);
        flood_lsp(instance, interfaces, &lsp, None);
    }
    instance.state.spf_pending = true;
}

// ===== SPF =====

pub(crate) fn run_spf(
    instance: &mut InstanceUpView<'_>,
    interfaces: &Interfaces,
) {
    let now = Instant::now();

    let mut neighbors = HashMap::new();
    for iface in interfaces.values() {
        if let Some(adj) = &iface.adjacency
            && adj.state == AdjacencyState::Up
            && let Some(addr) = adj.ipv4_addr
        {
            neighbors.insert(
                adj.system_id,
                NexthopInfo {
                    ifname: iface.config.name.clone(),
                    addr,
                },
            );
        }
    }

    let routes = spf::compute_all(
        &instance.state.lsdb,
        instance.config.level_type.levels(),
        instance.config.system_id,
        &neighbors,
        now,
    );

    // Withdraw routes that disappeared.
    let old = std::mem::take(&mut instance.state.installed);
    for prefix in old.keys() {
        if !routes.contains_key(prefix) {
            let _ = instance.shared.rib_tx.send(RouteUpdateMsg::Withdraw {
                prefix: *prefix,
                source: RouteSource::Isis,
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
                RouteSource::Isis,
                RouteSource::Isis.default_distance(),
                route.metric,
                RouteAttrs::Isis {
                    level: route.level as u8,
                },
                None,
            );
            let _ = instance.shared.rib_tx.send(RouteUpdateMsg::Install(msg));
        }
    }
    instance.state.installed = routes;
}

// ===== helper functions =====

pub(crate) fn send_pdu(
    instance: &mut InstanceUpView<'_>,
    ifname: &str,
    pdu: &Pdu,
) {
    let data = pdu.encode();
    instance.state.msgs_sent += 1;
    let _ = instance.shared.wire_tx.send(WireMsg::Data {
        protocol: RouteSource::Isis,
        peer: ifname.to_owned(),
        data,
    });
}

fn adjacency_state_change(
    instance: &mut InstanceUpView<'_>,
    ifname: &str,
    adj: &mut Adjacency,
    new_state: AdjacencyState,
    event: AdjacencyEvent,
) {
    debug!(
        %ifname, system_id = %adj.system_id, old_state = %adj.state,
        %new_state, ?event, "adjacency state change"
    );

    let old_state = adj.state;
    adj.state = new_state;

    instance.shared.event_bus.publish(EventKind::NeighborChanged {
        source: RouteSource::Isis,
        peer: adj.system_id.to_string(),
        old_state: old_state.to_string(),
        new_state: new_state.to_string(),
    });
}

fn level_intersect(a: LevelType, b: LevelType) -> Option<LevelType> {
    let levels = a
        .levels()
        .iter()
        .filter(|level| b.intersects(**level))
        .copied()
        .collect::<Vec<_>>();
    match levels.as_slice() {
        [LevelNumber::L1] => Some(LevelType::L1),
        [LevelNumber::L2] => Some(LevelType::L2),
        [LevelNumber::L1, LevelNumber::L2] => Some(LevelType::All),
        _ => None,
    }
}
