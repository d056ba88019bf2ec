//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use mimic_protocol::{
    ControlMsg, InstanceChannelsTx, InstanceShared, NeighborInfo,
    ProtocolInstance, ProtocolSummary,
};
use mimic_utils::bus::EventKind;
use mimic_utils::protocol::RouteSource;
use mimic_utils::route::RouteUpdateMsg;
use mimic_utils::task::{IntervalTask, TimeoutTask};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::interface::{
    Interface, InterfaceCfg, InterfaceType, Interfaces, ism,
};
use crate::lsdb::Lsdb;
use crate::spf::SpfRoute;
use crate::tasks::messages::ProtocolInputMsg;
use crate::tasks::{
    ProtocolInputChannelsRx, ProtocolInputChannelsTx, protocol_input_channels,
};
use crate::{events, tasks};

// OSPF instance configuration.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceCfg {
    #[serde(default)]
    pub router_id: Option<Ipv4Addr>,
    #[serde(default = "default_area_id")]
    pub area_id: Ipv4Addr,
    #[serde(default = "default_spf_hold")]
    pub spf_hold: u16,
    #[serde(default)]
    pub interfaces: Vec<InterfaceCfg>,
}

fn default_area_id() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

fn default_spf_hold() -> u16 {
    5
}

// OSPF protocol instance.
#[derive(Debug)]
pub struct Instance {
    pub name: String,
    pub config: InstanceCfg,
    pub state: InstanceState,
    pub interfaces: Interfaces,
    pub tx: InstanceChannelsTx<Instance>,
    pub shared: InstanceShared,
}

#[derive(Debug, Default)]
pub struct InstanceState {
    pub lsdb: Lsdb,
    pub installed: BTreeMap<ipnetwork::Ipv4Network, SpfRoute>,
    pub spf_delay_timer: Option<TimeoutTask>,
    pub age_task: Option<IntervalTask>,
    pub dd_seq_counter: u32,
    pub msgs_sent: u64,
    pub msgs_rcvd: u64,
    pub error_count: u64,
    // Set when the router's LSAs must be re-originated at the end of the
    // current event.
    pub reoriginate: bool,
}

// Borrowed view of the instance without the interface table.
pub struct InstanceUpView<'a> {
    pub name: &'a str,
    pub config: &'a InstanceCfg,
    pub state: &'a mut InstanceState,
    pub tx: &'a ProtocolInputChannelsTx,
    pub shared: &'a InstanceShared,
}

// ===== impl Instance =====

impl Instance {
    fn split(&mut self) -> (InstanceUpView<'_>, &mut Interfaces) {
        (
            InstanceUpView {
                name: &self.name,
                config: &self.config,
                state: &mut self.state,
                tx: &self.tx.protocol_input,
                shared: &self.shared,
            },
            &mut self.interfaces,
        )
    }
}

impl ProtocolInstance for Instance {
    const PROTOCOL: RouteSource = RouteSource::Ospfv2;

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
        debug!(%name, "starting instance");

        let interfaces = config
            .interfaces
            .iter()
            .map(|iface_cfg| {
                (iface_cfg.name.clone(), Interface::new(iface_cfg.clone()))
            })
            .collect();

        Instance {
            name,
            config,
            state: InstanceState {
                dd_seq_counter: 0x1000,
                ..Default::default()
            },
            interfaces,
            tx,
            shared,
        }
    }

    fn init(&mut self) {
        let (mut instance, interfaces) = self.split();

        // Bring the interfaces up: hello transmission plus the wait timer
        // preceding the first DR election.
        for iface in interfaces.values_mut() {
            iface.tasks.hello_interval = Some(tasks::iface_hello_interval(
                &iface.config.name,
                Duration::from_secs(iface.config.hello_interval as u64),
                &instance.tx.timer,
            ));
            match iface.config.interface_type {
                InterfaceType::PointToPoint => {
                    iface.state = ism::State::PointToPoint;
                }
                InterfaceType::Broadcast => {
                    iface.state = ism::State::Waiting;
                    iface.tasks.wait_timer = Some(tasks::iface_wait_timer(
                        &iface.config.name,
                        Duration::from_secs(
                            iface.config.dead_interval as u64,
                        ),
                        &instance.tx.timer,
                    ));
                }
            }
        }

        // LSDB aging and the initial self-originated LSAs.
        instance.state.age_task =
            Some(tasks::age_interval(&instance.tx.timer));
        events::originate_lsas(&mut instance, interfaces);
    }

    fn shutdown(mut self) {
        debug!(name = %self.name, "stopping instance");

        // Publish the teardown of every known neighbor.
        let (instance, interfaces) = self.split();
        for iface in interfaces.values() {
            for nbr in iface.neighbors.values() {
                instance.shared.event_bus.publish(
                    EventKind::NeighborChanged {
                        source: RouteSource::Ospfv2,
                        peer: nbr.router_id.to_string(),
                        old_state: nbr.state.to_string(),
                        new_state: "down".to_owned(),
                    },
                );
            }
        }

        let _ = self.shared.rib_tx.send(RouteUpdateMsg::WithdrawAll {
            source: RouteSource::Ospfv2,
        });
    }

    fn process_control_msg(&mut self, msg: ControlMsg) {
        match msg {
            ControlMsg::ShowNeighbors(tx) => {
                let neighbors = self
                    .interfaces
                    .values()
                    .flat_map(|iface| iface.neighbors.values())
                    .map(|nbr| NeighborInfo {
                        protocol: RouteSource::Ospfv2,
                        peer: nbr.router_id.to_string(),
                        state: nbr.state.to_string(),
                        msgs_sent: self.state.msgs_sent,
                        msgs_rcvd: self.state.msgs_rcvd,
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
                    "lsdb-size".to_owned(),
                    self.state.lsdb.len() as u64,
                );
                let _ = tx.send(ProtocolSummary {
                    protocol: RouteSource::Ospfv2,
                    router_id: self
                        .config
                        .router_id
                        .unwrap_or(self.shared.router_id),
                    neighbor_count: self
                        .interfaces
                        .values()
                        .map(|iface| iface.neighbors.len())
                        .sum(),
                    route_count: self.state.installed.len(),
                    error_counters,
                });
            }
            ControlMsg::ClearCounters => {
                self.state.msgs_sent = 0;
                self.state.msgs_rcvd = 0;
                self.state.error_count = 0;
            }
            ControlMsg::Shutdown => unreachable!(),
        }
    }

    fn process_protocol_msg(&mut self, msg: ProtocolInputMsg) {
        let (mut instance, interfaces) = self.split();
        match msg {
            ProtocolInputMsg::NetRx(msg) => {
                instance.state.msgs_rcvd += 1;
                events::process_net_rx(&mut instance, interfaces, msg);
            }
            ProtocolInputMsg::HelloInterval { ifname } => {
                events::process_hello_interval(
                    &mut instance,
                    interfaces,
                    &ifname,
                );
            }
            ProtocolInputMsg::WaitTimer { ifname } => {
                events::process_wait_timer(&mut instance, interfaces, &ifname);
            }
            ProtocolInputMsg::NbrInactivity { ifname, router_id } => {
                events::process_nbr_inactivity(
                    &mut instance,
                    interfaces,
                    &ifname,
                    router_id,
                );
            }
            ProtocolInputMsg::SpfDelay => {
                events::process_spf_delay(&mut instance, interfaces);
            }
            ProtocolInputMsg::AgeTick => {
                events::process_age_tick(&mut instance, interfaces);
            }
        }

        // Deferred LSA re-origination requested while the interface table
        // was borrowed.
        if instance.state.reoriginate {
            instance.state.reoriginate = false;
            events::originate_lsas(&mut instance, interfaces);
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
        self.config.router_id.unwrap_or(self.shared.router_id)
    }
}
