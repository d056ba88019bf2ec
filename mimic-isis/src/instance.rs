//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use ipnetwork::Ipv4Network;
use mimic_protocol::{
    ControlMsg, InstanceChannelsTx, InstanceShared, NeighborInfo,
    ProtocolInstance, ProtocolSummary,
};
use mimic_utils::bus::EventKind;
use mimic_utils::protocol::RouteSource;
use mimic_utils::route::RouteUpdateMsg;
use mimic_utils::task::IntervalTask;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adjacency::Adjacency;
use crate::lsdb::Lsdb;
use crate::packet::{AreaAddr, LevelType, SystemId};
use crate::spf::SpfRoute;
use crate::tasks::messages::ProtocolInputMsg;
use crate::tasks::{
    ProtocolInputChannelsRx, ProtocolInputChannelsTx, protocol_input_channels,
};
use crate::{events, tasks};

// IS-IS instance configuration.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceCfg {
    pub system_id: SystemId,
    pub area_addr: AreaAddr,
    #[serde(default)]
    pub level_type: LevelType,
    #[serde(default = "default_hello_interval")]
    pub hello_interval: u16,
    #[serde(default = "default_hold_multiplier")]
    pub hold_multiplier: u16,
    #[serde(default)]
    pub interfaces: Vec<InterfaceCfg>,
}

// IS-IS interface configuration. Every circuit is point-to-point.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct InterfaceCfg {
    pub name: String,
    pub addr: Ipv4Network,
    #[serde(default = "default_metric")]
    pub metric: u8,
}

fn default_hello_interval() -> u16 {
    10
}

fn default_hold_multiplier() -> u16 {
    3
}

fn default_metric() -> u8 {
    10
}

// IS-IS circuit.
#[derive(Debug)]
pub struct Interface {
    pub config: InterfaceCfg,
    pub circuit_id: u8,
    pub adjacency: Option<Adjacency>,
    pub hello_task: Option<IntervalTask>,
}

// Type aliases.
pub type Interfaces = BTreeMap<String, Interface>;

// IS-IS protocol instance.
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
    pub installed: BTreeMap<Ipv4Network, SpfRoute>,
    pub age_task: Option<IntervalTask>,
    pub msgs_sent: u64,
    pub msgs_rcvd: u64,
    pub error_count: u64,
    // Deferred work flags, applied at the end of the current event.
    pub reoriginate: bool,
    pub spf_pending: bool,
}

// Borrowed view of the instance without the circuit table.
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
    const PROTOCOL: RouteSource = RouteSource::Isis;

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
            .enumerate()
            .map(|(idx, iface_cfg)| {
                (
                    iface_cfg.name.clone(),
                    Interface {
                        config: iface_cfg.clone(),
                        circuit_id: idx as u8 + 1,
                        adjacency: None,
                        hello_task: None,
                    },
                )
            })
            .collect();

        Instance {
            name,
            config,
            state: InstanceState::default(),
            interfaces,
            tx,
            shared,
        }
    }

    fn init(&mut self) {
        let interval =
            std::time::Duration::from_secs(self.config.hello_interval as u64);
        let (mut instance, interfaces) = self.split();

        for iface in interfaces.values_mut() {
            iface.hello_task = Some(tasks::iface_hello_interval(
                &iface.config.name,
                interval,
                &instance.tx.timer,
            ));
        }

        instance.state.age_task =
            Some(tasks::age_interval(&instance.tx.timer));
        events::originate_lsps(&mut instance, interfaces);
        instance.state.spf_pending = false;
    }

    fn shutdown(mut self) {
        debug!(name = %self.name, "stopping instance");

        let (instance, interfaces) = self.split();
        for iface in interfaces.values() {
            if let Some(adj) = &iface.adjacency {
                instance.shared.event_bus.publish(
                    EventKind::NeighborChanged {
                        source: RouteSource::Isis,
                        peer: adj.system_id.to_string(),
                        old_state: adj.state.to_string(),
                        new_state: "down".to_owned(),
                    },
                );
            }
        }

        let _ = self.shared.rib_tx.send(RouteUpdateMsg::WithdrawAll {
            source: RouteSource::Isis,
        });
    }

    fn process_control_msg(&mut self, msg: ControlMsg) {
        match msg {
            ControlMsg::ShowNeighbors(tx) => {
                let neighbors = self
                    .interfaces
                    .values()
                    .filter_map(|iface| iface.adjacency.as_ref())
                    .map(|adj| NeighborInfo {
                        protocol: RouteSource::Isis,
                        peer: adj.system_id.to_string(),
                        state: adj.state.to_string(),
                        msgs_sent: self.state.msgs_sent,
                        msgs_rcvd: self.state.msgs_rcvd,
                        last_error: adj.last_error.clone(),
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
                    protocol: RouteSource::Isis,
                    router_id: self.shared.router_id,
                    neighbor_count: self
                        .interfaces
                        .values()
                        .filter(|iface| iface.adjacency.is_some())
                        .count(),
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
            ProtocolInputMsg::AdjHoldtimer { ifname } => {
                events::process_adj_holdtimer(
                    &mut instance,
                    interfaces,
                    &ifname,
                );
            }
            ProtocolInputMsg::AgeTick => {
                events::process_age_tick(&mut instance, interfaces);
            }
        }

        // Deferred work accumulated while the circuit table was borrowed.
        if instance.state.reoriginate {
            instance.state.reoriginate = false;
            events::originate_lsps(&mut instance, interfaces);
        }
        if instance.state.spf_pending {
            instance.state.spf_pending = false;
            events::run_spf(&mut instance, interfaces);
        }
    }

    fn protocol_input_channels()
    -> (ProtocolInputChannelsTx, ProtocolInputChannelsRx) {
        protocol_input_channels()
    }
}
