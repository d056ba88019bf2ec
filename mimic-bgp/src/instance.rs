//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::atomic::Ordering;

use ipnetwork::Ipv4Network;
use mimic_protocol::{
    ControlMsg, InstanceChannelsTx, InstanceShared, NeighborInfo,
    ProtocolInstance, ProtocolSummary,
};
use mimic_utils::protocol::RouteSource;
use mimic_utils::route::RouteUpdateMsg;
use serde::{Deserialize, Serialize};

use crate::debug::Debug;
use crate::neighbor::{Neighbor, NeighborCfg, Neighbors, PeerType, fsm};
use crate::packet::consts::{CeaseSubcode, ErrorCode};
use crate::packet::message::NotificationMsg;
use crate::rib::LocalRib;
use crate::tasks::messages::ProtocolInputMsg;
use crate::tasks::{
    ProtocolInputChannelsRx, ProtocolInputChannelsTx, protocol_input_channels,
};
use crate::events;

// BGP instance configuration.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceCfg {
    pub asn: u32,
    #[serde(default)]
    pub identifier: Option<Ipv4Addr>,
    #[serde(default = "default_hold_time")]
    pub hold_time: u16,
    #[serde(default)]
    pub networks: Vec<Ipv4Network>,
    #[serde(default)]
    pub neighbors: Vec<NeighborCfg>,
}

fn default_hold_time() -> u16 {
    180
}

// BGP protocol instance.
#[derive(Debug)]
pub struct Instance {
    pub name: String,
    pub config: InstanceCfg,
    pub state: InstanceState,
    pub neighbors: Neighbors,
    pub tx: InstanceChannelsTx<Instance>,
    pub shared: InstanceShared,
}

#[derive(Debug, Default)]
pub struct InstanceState {
    pub rib: LocalRib,
    pub error_count: u64,
}

// Borrowed view of the instance without the neighbor table, allowing
// neighbor methods to mutate both.
pub struct InstanceUpView<'a> {
    pub name: &'a str,
    pub config: &'a InstanceCfg,
    pub state: &'a mut InstanceState,
    pub tx: &'a ProtocolInputChannelsTx,
    pub shared: &'a InstanceShared,
}

// ===== impl Instance =====

impl Instance {
    fn split(&mut self) -> (InstanceUpView<'_>, &mut Neighbors) {
        (
            InstanceUpView {
                name: &self.name,
                config: &self.config,
                state: &mut self.state,
                tx: &self.tx.protocol_input,
                shared: &self.shared,
            },
            &mut self.neighbors,
        )
    }
}

impl ProtocolInstance for Instance {
    const PROTOCOL: RouteSource = RouteSource::Bgp;

    type ProtocolConfig = InstanceCfg;
    type ProtocolInputMsg = ProtocolInputMsg;
    type ProtocolInputChannelsTx = ProtocolInputChannelsTx;
    type ProtocolInputChannelsRx = ProtocolInputChannelsRx;

    fn new(
        name: String,
        config: InstanceCfg,
        shared: InstanceShared,
        tx: InstanceChannelsTx<Instance>,
    ) -> Instance {
        Debug::InstanceStart.log();

        // A neighbor in our own AS is an internal peer.
        let neighbors = config
            .neighbors
            .iter()
            .map(|nbr_cfg| {
                let peer_type = if nbr_cfg.remote_asn == config.asn {
                    PeerType::Internal
                } else {
                    PeerType::External
                };
                (
                    nbr_cfg.remote_addr,
                    Neighbor::new(nbr_cfg.clone(), peer_type),
                )
            })
            .collect();

        Instance {
            name,
            config,
            state: InstanceState::default(),
            neighbors,
            tx,
            shared,
        }
    }

    fn init(&mut self) {
        let (mut instance, neighbors) = self.split();
        for nbr in neighbors.values_mut() {
            nbr.fsm_event(&mut instance, fsm::Event::Start);
        }
    }

    fn shutdown(mut self) {
        Debug::InstanceStop.log();

        let (mut instance, neighbors) = self.split();
        for nbr in neighbors.values_mut() {
            let notif = NotificationMsg::new(
                ErrorCode::Cease,
                CeaseSubcode::PeerDeConfigured,
            );
            nbr.fsm_event(&mut instance, fsm::Event::Stop(Some(notif)));
        }

        // Remove every candidate this instance contributed.
        let _ = self.shared.rib_tx.send(RouteUpdateMsg::WithdrawAll {
            source: RouteSource::Bgp,
        });
    }

    fn process_control_msg(&mut self, msg: ControlMsg) {
        match msg {
            ControlMsg::ShowNeighbors(tx) => {
                let neighbors = self
                    .neighbors
                    .values()
                    .map(|nbr| NeighborInfo {
                        protocol: RouteSource::Bgp,
                        peer: nbr.remote_addr.to_string(),
                        state: nbr.state.to_string(),
                        msgs_sent: nbr
                            .statistics
                            .msgs_sent
                            .load(Ordering::Relaxed),
                        msgs_rcvd: nbr.statistics.msgs_rcvd,
                        last_error: nbr.last_error.clone(),
                    })
                    .collect();
                let _ = tx.send(neighbors);
            }
            ControlMsg::ShowSummary(tx) => {
                let mut error_counters = BTreeMap::new();
                error_counters
                    .insert("decode-errors".to_owned(), self.state.error_count);
                error_counters.insert(
                    "erroneous-updates".to_owned(),
                    self.neighbors
                        .values()
                        .map(|nbr| nbr.statistics.erroneous_updates as u64)
                        .sum(),
                );
                let _ = tx.send(ProtocolSummary {
                    protocol: RouteSource::Bgp,
                    router_id: self
                        .config
                        .identifier
                        .unwrap_or(self.shared.router_id),
                    neighbor_count: self.neighbors.len(),
                    route_count: self.state.rib.best_count(),
                    error_counters,
                });
            }
            ControlMsg::ClearCounters => {
                self.state.error_count = 0;
                for nbr in self.neighbors.values_mut() {
                    nbr.statistics.msgs_rcvd = 0;
                    nbr.statistics.msgs_sent.store(0, Ordering::Relaxed);
                    nbr.statistics.erroneous_updates = 0;
                }
            }
            ControlMsg::Shutdown => unreachable!(),
        }
    }

    fn process_protocol_msg(&mut self, msg: ProtocolInputMsg) {
        let (mut instance, neighbors) = self.split();
        match msg {
            ProtocolInputMsg::Session(msg) => {
                events::process_session_msg(&mut instance, neighbors, msg);
            }
            ProtocolInputMsg::NbrRx(msg) => {
                events::process_nbr_msg(&mut instance, neighbors, msg);
            }
            ProtocolInputMsg::NbrTimer(msg) => {
                events::process_nbr_timer(&mut instance, neighbors, msg);
            }
        }
    }

    fn protocol_input_channels()
    -> (ProtocolInputChannelsTx, ProtocolInputChannelsRx) {
        protocol_input_channels()
    }
}

// ===== impl InstanceUpView =====

impl InstanceUpView<'_> {
    pub(crate) fn router_id(&self) -> Ipv4Addr {
        self.config.identifier.unwrap_or(self.shared.router_id)
    }
}
