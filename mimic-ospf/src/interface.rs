//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use mimic_utils::task::{IntervalTask, TimeoutTask};
use serde::{Deserialize, Serialize};

use crate::neighbor::{Neighbor, nsm};

// OSPF interface type.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterfaceType {
    #[default]
    Broadcast,
    PointToPoint,
}

// OSPF interface configuration.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InterfaceCfg {
    pub name: String,
    pub addr: Ipv4Network,
    #[serde(default = "default_cost")]
    pub cost: u16,
    #[serde(default = "default_hello_interval")]
    pub hello_interval: u16,
    #[serde(default = "default_dead_interval")]
    pub dead_interval: u32,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub interface_type: InterfaceType,
}

fn default_cost() -> u16 {
    10
}

fn default_hello_interval() -> u16 {
    10
}

fn default_dead_interval() -> u32 {
    40
}

fn default_priority() -> u8 {
    1
}

// OSPF interface.
#[derive(Debug)]
pub struct Interface {
    pub config: InterfaceCfg,
    pub state: ism::State,
    // Elected DR and BDR, by interface address.
    pub dr: Option<Ipv4Addr>,
    pub bdr: Option<Ipv4Addr>,
    // Neighbors reachable over this interface, keyed by router-id.
    pub neighbors: BTreeMap<Ipv4Addr, Neighbor>,
    pub tasks: InterfaceTasks,
}

#[derive(Debug, Default)]
pub struct InterfaceTasks {
    pub hello_interval: Option<IntervalTask>,
    pub wait_timer: Option<TimeoutTask>,
}

// Type aliases.
pub type Interfaces = std::collections::BTreeMap<String, Interface>;

// Interface state machine states.
pub mod ism {
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub enum State {
        Down,
        Waiting,
        PointToPoint,
        DrOther,
        Backup,
        Dr,
    }
}

// ===== impl Interface =====

impl Interface {
    pub(crate) fn new(config: InterfaceCfg) -> Interface {
        Interface {
            config,
            state: ism::State::Down,
            dr: None,
            bdr: None,
            neighbors: Default::default(),
            tasks: Default::default(),
        }
    }

    /// Interface address.
    pub fn addr(&self) -> Ipv4Addr {
        self.config.addr.ip()
    }

    /// Returns true if this router is the designated router.
    pub fn is_dr(&self) -> bool {
        self.state == ism::State::Dr
    }

    // Runs the DR/BDR election, per the simplified ordering (priority
    // first, router-id as the tie-break). Returns true if the election
    // result changed.
    pub(crate) fn dr_election(&mut self, router_id: Ipv4Addr) -> bool {
        if self.config.interface_type == InterfaceType::PointToPoint {
            return false;
        }

        // Candidates: this router plus every bidirectional neighbor with a
        // non-zero priority.
        let mut candidates = vec![];
        if self.config.priority > 0 {
            candidates.push((self.config.priority, router_id, self.addr()));
        }
        for nbr in self
            .neighbors
            .values()
            .filter(|nbr| nbr.state >= nsm::State::TwoWay)
            .filter(|nbr| nbr.priority > 0)
        {
            candidates.push((nbr.priority, nbr.router_id, nbr.src));
        }
        candidates.sort_by(|a, b| b.cmp(a));

        let dr = candidates.first().map(|(_, _, addr)| *addr);
        let bdr = candidates.get(1).map(|(_, _, addr)| *addr);
        let changed = dr != self.dr || bdr != self.bdr;
        self.dr = dr;
        self.bdr = bdr;

        self.state = if self.dr == Some(self.addr()) {
            ism::State::Dr
        } else if self.bdr == Some(self.addr()) {
            ism::State::Backup
        } else {
            ism::State::DrOther
        };

        changed
    }

    // Decides whether an adjacency should form with the given neighbor.
    //
    // On point-to-point interfaces adjacencies always form; on broadcast
    // interfaces only with (or as) the DR and BDR.
    pub(crate) fn should_be_adjacent(&self, nbr: &Neighbor) -> bool {
        match self.config.interface_type {
            InterfaceType::PointToPoint => true,
            InterfaceType::Broadcast => {
                matches!(self.state, ism::State::Dr | ism::State::Backup)
                    || self.dr == Some(nbr.src)
                    || self.bdr == Some(nbr.src)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use const_addrs::{ip4, net4};

    use super::*;

    fn iface() -> Interface {
        Interface::new(InterfaceCfg {
            name: "eth0".to_owned(),
            addr: net4!("10.0.0.1/24"),
            cost: 10,
            hello_interval: 10,
            dead_interval: 40,
            priority: 1,
            interface_type: InterfaceType::Broadcast,
        })
    }

    fn nbr(
        router_id: Ipv4Addr,
        src: Ipv4Addr,
        priority: u8,
        state: nsm::State,
    ) -> Neighbor {
        let mut nbr = Neighbor::new(router_id, src);
        nbr.priority = priority;
        nbr.state = state;
        nbr
    }

    #[test]
    fn dr_election_by_priority_then_router_id() {
        let mut iface = iface();
        iface.neighbors.insert(
            ip4!("3.3.3.3"),
            nbr(ip4!("3.3.3.3"), ip4!("10.0.0.3"), 1, nsm::State::TwoWay),
        );
        iface.neighbors.insert(
            ip4!("2.2.2.2"),
            nbr(ip4!("2.2.2.2"), ip4!("10.0.0.2"), 10, nsm::State::TwoWay),
        );

        assert!(iface.dr_election(ip4!("1.1.1.1")));
        // Highest priority wins regardless of router-id.
        assert_eq!(iface.dr, Some(ip4!("10.0.0.2")));
        // Tie on priority 1: higher router-id wins the backup role.
        assert_eq!(iface.bdr, Some(ip4!("10.0.0.3")));
        assert_eq!(iface.state, ism::State::DrOther);
    }

    #[test]
    fn dr_election_ignores_non_bidirectional_neighbors() {
        let mut iface = iface();
        iface.neighbors.insert(
            ip4!("9.9.9.9"),
            nbr(ip4!("9.9.9.9"), ip4!("10.0.0.9"), 100, nsm::State::Init),
        );

        iface.dr_election(ip4!("1.1.1.1"));
        assert_eq!(iface.dr, Some(ip4!("10.0.0.1")));
        assert_eq!(iface.state, ism::State::Dr);
    }

    #[test]
    fn priority_zero_is_ineligible() {
        let mut iface = iface();
        iface.config.priority = 0;
        iface.neighbors.insert(
            ip4!("2.2.2.2"),
            nbr(ip4!("2.2.2.2"), ip4!("10.0.0.2"), 1, nsm::State::TwoWay),
        );

        iface.dr_election(ip4!("1.1.1.1"));
        assert_eq!(iface.dr, Some(ip4!("10.0.0.2")));
        assert_eq!(iface.state, ism::State::DrOther);
    }
}
