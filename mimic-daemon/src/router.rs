//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::sync::atomic::Ordering;
use std::time::Duration;

use bytes::Bytes;
use mimic_dataplane::egress::{
    EgressCtlMsg, EgressHandle, EgressTimerMsg, spawn_egress_chain,
};
use mimic_dataplane::forwarding::{ForwardingHandle, spawn_forwarding_task};
use mimic_dataplane::impairment::ImpairmentCfg;
use mimic_dataplane::shaper::ShaperCfg;
use mimic_interface::{InterfaceHandle, spawn_interface_task};
use mimic_interface::interface::InterfaceCfg;
use mimic_protocol::{
    ControlMsg, InstanceShared, NeighborInfo, ProtocolSummary,
    spawn_protocol_task,
};
use mimic_rib::{RibHandle, spawn_rib_task};
use mimic_utils::bus::{EventBus, EventKind, RouteSummary};
use mimic_utils::packet::Packet;
use mimic_utils::protocol::RouteSource;
use mimic_utils::qos::QosClass;
use mimic_utils::task::{IntervalTask, Task};
use mimic_utils::timer::{TimerOwner, TimerWheel};
use mimic_utils::transport::WireMsg;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::{Sender, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::{Config, ConfigError};

// How often the observability task samples the counters.
const STAT_SAMPLE_INTERVAL: Duration = Duration::from_secs(10);

// RIB aging granularity.
const RIB_AGE_INTERVAL: Duration = Duration::from_secs(1);

/// The router control facade.
///
/// Owns every long-lived task of the node: the RIB, the interface table,
/// one task per protocol instance, one egress chain and one forwarding
/// task per interface, and the observability task. External collaborators
/// (CLI, session fabric, packet sources) drive it exclusively through
/// methods on this type.
pub struct Router {
    config: Config,
    event_bus: EventBus,
    rib: RibHandle,
    interfaces: InterfaceHandle,
    wheel: TimerWheel<EgressTimerMsg>,
    wire_tx: UnboundedSender<WireMsg>,
    wire_rx: Option<UnboundedReceiver<WireMsg>>,
    packet_out_tx: UnboundedSender<Packet>,
    packet_out_rx: Option<UnboundedReceiver<Packet>>,
    protocols: Vec<(RouteSource, Sender<ControlMsg>)>,
    bgp_input: Option<mimic_bgp::tasks::ProtocolInputChannelsTx>,
    ospf_input: Option<mimic_ospf::tasks::ProtocolInputChannelsTx>,
    isis_input: Option<mimic_isis::tasks::ProtocolInputChannelsTx>,
    egress: HashMap<String, EgressHandle>,
    forwarding: HashMap<String, ForwardingHandle>,
    start_time: Instant,
    running: bool,
    observability: Option<(Task<()>, IntervalTask)>,
}

/// `status` output.
#[derive(Clone, Debug, Serialize)]
pub struct RouterStatus {
    pub running: bool,
    pub uptime_secs: u64,
    pub protocols: Vec<RouteSource>,
    pub interface_count: usize,
}

/// One row of `show statistics`.
#[derive(Clone, Debug, Serialize)]
pub struct InterfaceStatistics {
    pub ifname: String,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub rx_dropped: u64,
    pub tx_dropped: u64,
    pub shaper_processed: u64,
    pub shaper_dropped: u64,
    pub shaper_delayed: u64,
    pub per_class_processed: BTreeMap<String, u64>,
}

// ===== impl Router =====

impl Router {
    /// Validates the configuration and prepares the base components. The
    /// protocol and data-plane tasks start with [`Router::start`].
    pub fn new(config: Config) -> Result<Router, ConfigError> {
        config.validate()?;

        let event_bus = EventBus::new();
        let rib = spawn_rib_task(event_bus.clone(), RIB_AGE_INTERVAL);
        let interfaces = spawn_interface_task(rib.clone(), event_bus.clone());
        let (wire_tx, wire_rx) = mpsc::unbounded_channel();
        let (packet_out_tx, packet_out_rx) = mpsc::unbounded_channel();

        Ok(Router {
            config,
            event_bus,
            rib,
            interfaces,
            wheel: TimerWheel::spawn(),
            wire_tx,
            wire_rx: Some(wire_rx),
            packet_out_tx,
            packet_out_rx: Some(packet_out_rx),
            protocols: Vec::new(),
            bgp_input: None,
            ospf_input: None,
            isis_input: None,
            egress: HashMap::new(),
            forwarding: HashMap::new(),
            start_time: Instant::now(),
            running: false,
            observability: None,
        })
    }

    /// Brings the node up: interfaces, egress chains, forwarding and the
    /// configured protocol instances.
    pub async fn start(&mut self) -> Result<(), ConfigError> {
        if self.running {
            return Ok(());
        }
        info!("starting router");
        self.start_time = Instant::now();

        // Interface table.
        for iface in &self.config.interfaces {
            self.interfaces.add(&iface.name, InterfaceCfg {
                addr: iface.address,
                mtu: iface.mtu,
                bandwidth_bps: iface.bandwidth_bps,
                enabled: iface.enabled,
            });
        }

        // Per-interface egress chains and forwarding tasks.
        let views = self.interfaces.show_interfaces().await;
        for (idx, iface) in self.config.interfaces.iter().enumerate() {
            let counters = views
                .iter()
                .find(|view| view.name == iface.name)
                .map(|view| view.counters.clone())
                .unwrap_or_default();
            let chain = spawn_egress_chain(
                &iface.name,
                iface.shaping.clone().unwrap_or_default(),
                iface.impairments.clone().unwrap_or_default(),
                self.wheel.clone(),
                TimerOwner(idx as u32),
                self.packet_out_tx.clone(),
                counters,
                self.event_bus.clone(),
            )
            .map_err(|error| {
                ConfigError::new(&iface.name, &error.to_string())
            })?;
            self.interfaces.attach_egress(&iface.name, chain.in_tx.clone());
            self.egress.insert(iface.name.clone(), chain);

            let forwarding = spawn_forwarding_task(
                &iface.name,
                self.rib.reader(),
                self.interfaces.reader(),
                self.event_bus.clone(),
            );
            self.forwarding.insert(iface.name.clone(), forwarding);
        }

        // Protocol instances.
        let shared = InstanceShared::new(
            self.config.router_id,
            self.rib.route_tx.clone(),
            self.wire_tx.clone(),
            self.event_bus.clone(),
        );
        if let Some(bgp) = &self.config.protocols.bgp {
            let (ctl, input) = spawn_protocol_task::<mimic_bgp::instance::Instance>(
                "main".to_owned(),
                bgp.clone(),
                shared.clone(),
            );
            self.protocols.push((RouteSource::Bgp, ctl));
            self.bgp_input = Some(input);
        }
        if let Some(ospf) = &self.config.protocols.ospf {
            let (ctl, input) =
                spawn_protocol_task::<mimic_ospf::instance::Instance>(
                    "main".to_owned(),
                    ospf.clone(),
                    shared.clone(),
                );
            self.protocols.push((RouteSource::Ospfv2, ctl));
            self.ospf_input = Some(input);
        }
        if let Some(isis) = &self.config.protocols.isis {
            let (ctl, input) =
                spawn_protocol_task::<mimic_isis::instance::Instance>(
                    "main".to_owned(),
                    isis.to_instance_cfg()?,
                    shared.clone(),
                );
            self.protocols.push((RouteSource::Isis, ctl));
            self.isis_input = Some(input);
        }

        self.spawn_observability();
        self.running = true;
        Ok(())
    }

    /// Takes the node down, withdrawing every protocol contribution.
    pub async fn stop(&mut self) {
        if !self.running {
            return;
        }
        info!("stopping router");

        for (_, ctl) in self.protocols.drain(..) {
            let _ = ctl.send(ControlMsg::Shutdown).await;
        }
        self.bgp_input = None;
        self.ospf_input = None;
        self.isis_input = None;

        for (_, chain) in self.egress.drain() {
            let _ = chain.ctl_tx.send(EgressCtlMsg::Shutdown);
        }
        self.forwarding.clear();

        for iface in &self.config.interfaces {
            self.interfaces.remove(&iface.name);
        }

        self.observability = None;
        self.running = false;
    }

    pub async fn restart(&mut self) -> Result<(), ConfigError> {
        self.stop().await;
        self.start().await
    }

    // ===== operational state =====

    pub fn status(&self) -> RouterStatus {
        RouterStatus {
            running: self.running,
            uptime_secs: self.start_time.elapsed().as_secs(),
            protocols: self
                .protocols
                .iter()
                .map(|(protocol, _)| *protocol)
                .collect(),
            interface_count: self.config.interfaces.len(),
        }
    }

    pub async fn show_interfaces(
        &self,
    ) -> Vec<mimic_interface::interface::InterfaceView> {
        self.interfaces.show_interfaces().await
    }

    pub async fn show_routes(&self) -> Vec<(RouteSummary, bool)> {
        self.rib.show_routes().await
    }

    pub async fn show_neighbors(&self) -> Vec<NeighborInfo> {
        let mut neighbors = vec![];
        for (_, ctl) in &self.protocols {
            let (tx, rx) = tokio::sync::oneshot::channel();
            if ctl.send(ControlMsg::ShowNeighbors(tx)).await.is_ok()
                && let Ok(mut batch) = rx.await
            {
                neighbors.append(&mut batch);
            }
        }
        neighbors
    }

    pub async fn show_protocols(&self) -> Vec<ProtocolSummary> {
        let mut summaries = vec![];
        for (_, ctl) in &self.protocols {
            let (tx, rx) = tokio::sync::oneshot::channel();
            if ctl.send(ControlMsg::ShowSummary(tx)).await.is_ok()
                && let Ok(summary) = rx.await
            {
                summaries.push(summary);
            }
        }
        summaries
    }

    pub async fn show_statistics(&self) -> Vec<InterfaceStatistics> {
        let views = self.interfaces.show_interfaces().await;
        views
            .into_iter()
            .map(|view| {
                let chain = self.egress.get(&view.name);
                let load =
                    |counter: &std::sync::atomic::AtomicU64| {
                        counter.load(Ordering::Relaxed)
                    };
                let mut per_class_processed = BTreeMap::new();
                if let Some(chain) = chain {
                    for class in QosClass::ALL {
                        per_class_processed.insert(
                            class.to_string(),
                            load(&chain.stats.per_class_processed
                                [class.index()]),
                        );
                    }
                }
                InterfaceStatistics {
                    ifname: view.name,
                    rx_packets: load(&view.counters.rx_packets),
                    rx_bytes: load(&view.counters.rx_bytes),
                    tx_packets: load(&view.counters.tx_packets),
                    tx_bytes: load(&view.counters.tx_bytes),
                    rx_dropped: load(&view.counters.rx_dropped),
                    tx_dropped: load(&view.counters.tx_dropped),
                    shaper_processed: chain
                        .map(|chain| load(&chain.stats.packets_processed))
                        .unwrap_or(0),
                    shaper_dropped: chain
                        .map(|chain| load(&chain.stats.packets_dropped))
                        .unwrap_or(0),
                    shaper_delayed: chain
                        .map(|chain| load(&chain.stats.packets_delayed))
                        .unwrap_or(0),
                    per_class_processed,
                }
            })
            .collect()
    }

    // ===== runtime reconfiguration =====

    pub fn configure_shaping(
        &self,
        ifname: &str,
        cfg: ShaperCfg,
    ) -> Result<(), ConfigError> {
        cfg.validate()
            .map_err(|error| ConfigError::new(ifname, &error.to_string()))?;
        let chain = self.egress.get(ifname).ok_or_else(|| {
            ConfigError::new(ifname, "unknown interface")
        })?;
        let _ = chain.ctl_tx.send(EgressCtlMsg::Reconfigure {
            shaper: Some(cfg),
            impairment: None,
        });
        Ok(())
    }

    pub fn configure_impairments(
        &self,
        ifname: &str,
        cfg: ImpairmentCfg,
    ) -> Result<(), ConfigError> {
        cfg.validate()
            .map_err(|error| ConfigError::new(ifname, &error.to_string()))?;
        let chain = self.egress.get(ifname).ok_or_else(|| {
            ConfigError::new(ifname, "unknown interface")
        })?;
        let _ = chain.ctl_tx.send(EgressCtlMsg::Reconfigure {
            shaper: None,
            impairment: Some(cfg),
        });
        Ok(())
    }

    pub fn interface_admin_set(&self, ifname: &str, up: bool) {
        self.interfaces.admin_set(ifname, up);
        if !up && let Some(chain) = self.egress.get(ifname) {
            let _ = chain.ctl_tx.send(EgressCtlMsg::LinkDown);
        }
    }

    pub fn link_set(&self, ifname: &str, up: bool) {
        self.interfaces.link_set(ifname, up);
        if !up && let Some(chain) = self.egress.get(ifname) {
            let _ = chain.ctl_tx.send(EgressCtlMsg::LinkDown);
        }
    }

    pub async fn clear_counters(&self) {
        self.interfaces.clear_counters();
        for (_, ctl) in &self.protocols {
            let _ = ctl.send(ControlMsg::ClearCounters).await;
        }
        for chain in self.egress.values() {
            chain.stats.packets_processed.store(0, Ordering::Relaxed);
            chain.stats.packets_dropped.store(0, Ordering::Relaxed);
            chain.stats.packets_delayed.store(0, Ordering::Relaxed);
            chain.stats.bytes_processed.store(0, Ordering::Relaxed);
            chain.stats.bytes_dropped.store(0, Ordering::Relaxed);
        }
    }

    // ===== RIB snapshot =====

    pub async fn snapshot_dump(&self) -> String {
        self.rib.snapshot_dump().await
    }

    pub async fn snapshot_restore(
        &self,
        data: String,
    ) -> Result<usize, ConfigError> {
        self.rib.snapshot_restore(data).await.map_err(|error| {
            ConfigError::new("snapshot", &error.to_string())
        })
    }

    // ===== external collaborator surface =====

    /// Outbound protocol PDUs (the session fabric's read side). Can be
    /// taken once.
    pub fn take_wire_rx(&mut self) -> Option<UnboundedReceiver<WireMsg>> {
        self.wire_rx.take()
    }

    /// Packets leaving the node after shaping and impairments. Can be
    /// taken once.
    pub fn take_packet_rx(&mut self) -> Option<UnboundedReceiver<Packet>> {
        self.packet_out_rx.take()
    }

    /// Injects a data-plane packet arriving on `ifname`.
    pub fn inject_ingress(&self, ifname: &str, data: Bytes) {
        if let Some(forwarding) = self.forwarding.get(ifname) {
            let _ = forwarding.in_tx.send(data);
        }
    }

    /// Reports BGP transport establishment or loss for a neighbor.
    pub fn bgp_session(&self, nbr_addr: Ipv4Addr, up: bool) {
        if let Some(input) = &self.bgp_input {
            let _ = input.session.send(
                mimic_bgp::tasks::messages::input::SessionMsg {
                    nbr_addr,
                    up,
                },
            );
        }
    }

    /// Delivers an encoded BGP message from a neighbor.
    pub fn bgp_rx(&self, nbr_addr: Ipv4Addr, data: Bytes) {
        if let Some(input) = &self.bgp_input {
            let _ = input.nbr_rx.send(
                mimic_bgp::tasks::messages::input::NbrRxMsg {
                    nbr_addr,
                    data,
                },
            );
        }
    }

    /// Delivers an encoded OSPF packet received on `ifname`.
    pub fn ospf_rx(&self, ifname: &str, src: Ipv4Addr, data: Bytes) {
        if let Some(input) = &self.ospf_input {
            let _ = input.net_rx.send(
                mimic_ospf::tasks::messages::input::NetRxMsg {
                    ifname: ifname.to_owned(),
                    src,
                    data,
                },
            );
        }
    }

    /// Delivers an encoded IS-IS PDU received on `ifname`.
    pub fn isis_rx(&self, ifname: &str, data: Bytes) {
        if let Some(input) = &self.isis_input {
            let _ = input.net_rx.send(
                mimic_isis::tasks::messages::input::NetRxMsg {
                    ifname: ifname.to_owned(),
                    data,
                },
            );
        }
    }

    // ===== internal =====

    // The observability task: logs bus events and periodically publishes
    // counter samples.
    fn spawn_observability(&mut self) {
        let mut events = self.event_bus.subscribe();
        let log_task = Task::spawn(async move {
            while let Some(event) = events.recv().await {
                debug!(seq = %event.seq, kind = ?event.kind, "event");
            }
        });

        let interfaces = self.interfaces.clone();
        let event_bus = self.event_bus.clone();
        let sample_task =
            IntervalTask::new(STAT_SAMPLE_INTERVAL, false, move || {
                let interfaces = interfaces.clone();
                let event_bus = event_bus.clone();
                async move {
                    for view in interfaces.show_interfaces().await {
                        let mut counters = BTreeMap::new();
                        counters.insert(
                            "rx-packets".to_owned(),
                            view.counters.rx_packets.load(Ordering::Relaxed),
                        );
                        counters.insert(
                            "tx-packets".to_owned(),
                            view.counters.tx_packets.load(Ordering::Relaxed),
                        );
                        counters.insert(
                            "rx-dropped".to_owned(),
                            view.counters.rx_dropped.load(Ordering::Relaxed),
                        );
                        counters.insert(
                            "tx-dropped".to_owned(),
                            view.counters.tx_dropped.load(Ordering::Relaxed),
                        );
                        event_bus.publish(EventKind::StatSample {
                            component: view.name,
                            counters,
                        });
                    }
                }
            });

        self.observability = Some((log_task, sample_task));
    }
}
