//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bitflags::bitflags;
use generational_arena::{Arena, Index};
use ipnetwork::Ipv4Network;
use mimic_utils::bus::{EventBus, EventKind};
use mimic_utils::ip::Ipv4NetworkExt;
use mimic_utils::packet::Packet;
use mimic_utils::protocol::RouteSource;
use mimic_utils::route::{RouteAttrs, RouteMsg, RouteUpdateMsg};
use mimic_rib::RibHandle;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

#[derive(Debug, Default)]
pub struct Interfaces {
    // Interface arena.
    arena: Arena<Interface>,
    // Interface binary tree keyed by name (1:1).
    name_tree: BTreeMap<String, Index>,
    // Interface hash table keyed by ifindex (1:1).
    ifindex_tree: HashMap<u32, Index>,
    // Next ifindex to allocate.
    next_ifindex: u32,
}

#[derive(Debug)]
pub struct Interface {
    pub name: String,
    pub ifindex: u32,
    pub config: InterfaceCfg,
    pub flags: InterfaceFlags,
    pub counters: Arc<InterfaceCounters>,
    // Attachment point for the egress shaper+impairment chain.
    pub egress_tx: Option<UnboundedSender<Packet>>,
}

// Interface configuration.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct InterfaceCfg {
    pub addr: Ipv4Network,
    pub mtu: u32,
    pub bandwidth_bps: u64,
    pub enabled: bool,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct InterfaceFlags: u8 {
        const OPERATIVE = 0x01;
    }
}

// Per-interface traffic counters. Shared with the data-plane tasks, which
// update them through atomics; the observability task samples them.
#[derive(Debug, Default)]
pub struct InterfaceCounters {
    pub rx_packets: AtomicU64,
    pub rx_bytes: AtomicU64,
    pub tx_packets: AtomicU64,
    pub tx_bytes: AtomicU64,
    pub rx_dropped: AtomicU64,
    pub tx_dropped: AtomicU64,
}

// Operational view of an interface, published to readers.
#[derive(Clone, Debug)]
pub struct InterfaceView {
    pub name: String,
    pub ifindex: u32,
    pub addr: Ipv4Network,
    pub mtu: u32,
    pub bandwidth_bps: u64,
    pub admin_up: bool,
    pub oper_up: bool,
    pub counters: Arc<InterfaceCounters>,
    pub egress_tx: Option<UnboundedSender<Packet>>,
}

// ===== impl Interfaces =====

impl Interfaces {
    // Adds an interface, or replaces the configuration of an existing one.
    pub(crate) fn add(
        &mut self,
        ifname: String,
        config: InterfaceCfg,
        rib: &RibHandle,
        event_bus: &EventBus,
    ) {
        if let Some(iface) = self.get_mut_by_name(&ifname) {
            iface.config = config;
            return;
        }

        self.next_ifindex += 1;
        let iface = Interface {
            name: ifname.clone(),
            ifindex: self.next_ifindex,
            config,
            // Interfaces come up administratively configured and with the
            // link operational; impairment scenarios flip them later.
            flags: InterfaceFlags::OPERATIVE,
            counters: Default::default(),
            egress_tx: None,
        };
        debug!(%ifname, ifindex = %iface.ifindex, "interface added");

        let iface_idx = self.arena.insert(iface);
        self.name_tree.insert(ifname.clone(), iface_idx);
        self.ifindex_tree.insert(self.next_ifindex, iface_idx);

        self.notify(&ifname, rib, event_bus);
    }

    // Removes an interface, withdrawing its connected route.
    pub(crate) fn remove(
        &mut self,
        ifname: &str,
        rib: &RibHandle,
        event_bus: &EventBus,
    ) {
        let Some(iface_idx) = self.name_tree.remove(ifname) else {
            return;
        };
        let iface = self.arena.remove(iface_idx).unwrap();
        self.ifindex_tree.remove(&iface.ifindex);

        rib.update(RouteUpdateMsg::Withdraw {
            prefix: iface.config.addr.apply_mask(),
            source: RouteSource::Connected,
        });
        rib.interface_update(ifname, false);
        event_bus.publish(EventKind::InterfaceChanged {
            ifname: ifname.to_owned(),
            admin_up: false,
            oper_up: false,
        });
    }

    // Changes the administrative status of an interface.
    pub(crate) fn admin_set(
        &mut self,
        ifname: &str,
        up: bool,
        rib: &RibHandle,
        event_bus: &EventBus,
    ) {
        let Some(iface) = self.get_mut_by_name(ifname) else {
            return;
        };
        if iface.config.enabled == up {
            return;
        }
        iface.config.enabled = up;
        self.notify(ifname, rib, event_bus);
    }

    // Processes a link event, flipping the operational status.
    pub(crate) fn link_set(
        &mut self,
        ifname: &str,
        up: bool,
        rib: &RibHandle,
        event_bus: &EventBus,
    ) {
        let Some(iface) = self.get_mut_by_name(ifname) else {
            return;
        };
        if iface.flags.contains(InterfaceFlags::OPERATIVE) == up {
            return;
        }
        iface.flags.set(InterfaceFlags::OPERATIVE, up);
        self.notify(ifname, rib, event_bus);
    }

    // Publishes the new interface state and keeps the RIB's connected route
    // and operational view in sync.
    fn notify(&self, ifname: &str, rib: &RibHandle, event_bus: &EventBus) {
        let Some(iface) = self.get_by_name(ifname) else {
            return;
        };
        let admin_up = iface.config.enabled;
        let oper_up = iface.is_up();

        rib.interface_update(ifname, oper_up);
        if oper_up {
            rib.update(RouteUpdateMsg::Install(RouteMsg::new(
                iface.config.addr.apply_mask(),
                iface.config.addr.ip(),
                ifname.to_owned(),
                RouteSource::Connected,
                RouteSource::Connected.default_distance(),
                0,
                RouteAttrs::None,
                None,
            )));
        } else {
            rib.update(RouteUpdateMsg::Withdraw {
                prefix: iface.config.addr.apply_mask(),
                source: RouteSource::Connected,
            });
        }

        event_bus.publish(EventKind::InterfaceChanged {
            ifname: ifname.to_owned(),
            admin_up,
            oper_up,
        });
    }

    pub(crate) fn attach_egress(
        &mut self,
        ifname: &str,
        tx: UnboundedSender<Packet>,
    ) {
        if let Some(iface) = self.get_mut_by_name(ifname) {
            iface.egress_tx = Some(tx);
        }
    }

    pub(crate) fn clear_counters(&mut self) {
        for (_, iface) in self.arena.iter() {
            let counters = &iface.counters;
            counters.rx_packets.store(0, Ordering::Relaxed);
            counters.rx_bytes.store(0, Ordering::Relaxed);
            counters.tx_packets.store(0, Ordering::Relaxed);
            counters.tx_bytes.store(0, Ordering::Relaxed);
            counters.rx_dropped.store(0, Ordering::Relaxed);
            counters.tx_dropped.store(0, Ordering::Relaxed);
        }
    }

    pub fn get_by_name(&self, ifname: &str) -> Option<&Interface> {
        self.name_tree
            .get(ifname)
            .map(|iface_idx| &self.arena[*iface_idx])
    }

    pub fn get_mut_by_name(&mut self, ifname: &str) -> Option<&mut Interface> {
        self.name_tree
            .get(ifname)
            .map(|iface_idx| &mut self.arena[*iface_idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.arena.iter().map(|(_, iface)| iface)
    }

    // Builds the read-optimized view published to the data-plane tasks.
    pub(crate) fn build_view(&self) -> InterfaceTableView {
        let mut by_name = HashMap::new();
        let mut local_addrs = HashMap::new();
        for iface in self.iter() {
            local_addrs.insert(iface.config.addr.ip(), iface.name.clone());
            by_name.insert(
                iface.name.clone(),
                InterfaceView {
                    name: iface.name.clone(),
                    ifindex: iface.ifindex,
                    addr: iface.config.addr,
                    mtu: iface.config.mtu,
                    bandwidth_bps: iface.config.bandwidth_bps,
                    admin_up: iface.config.enabled,
                    oper_up: iface.is_up(),
                    counters: iface.counters.clone(),
                    egress_tx: iface.egress_tx.clone(),
                },
            );
        }
        InterfaceTableView {
            by_name,
            local_addrs,
        }
    }
}

// ===== impl Interface =====

impl Interface {
    /// An interface forwards only when administratively enabled and the
    /// link is operational.
    pub fn is_up(&self) -> bool {
        self.config.enabled && self.flags.contains(InterfaceFlags::OPERATIVE)
    }
}

// Read-optimized copy of the interface table.
#[derive(Debug, Default)]
pub struct InterfaceTableView {
    pub by_name: HashMap<String, InterfaceView>,
    pub local_addrs: HashMap<Ipv4Addr, String>,
}
