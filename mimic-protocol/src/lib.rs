//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use derive_new::new;
use mimic_utils::bus::EventBus;
use mimic_utils::protocol::RouteSource;
use mimic_utils::route::RouteUpdateMsg;
use mimic_utils::task::Task;
use mimic_utils::transport::WireMsg;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{Receiver, Sender, UnboundedSender};
use tokio::sync::oneshot;
use tracing::debug_span;

/// A trait for protocol instances.
pub trait ProtocolInstance
where
    Self: Send + Sized + 'static,
{
    /// Protocol type.
    const PROTOCOL: RouteSource;

    type ProtocolConfig: Send + std::fmt::Debug + 'static;
    type ProtocolInputMsg: Send + std::fmt::Debug;
    type ProtocolInputChannelsTx: Clone + Send;
    type ProtocolInputChannelsRx: MessageReceiver<Self::ProtocolInputMsg>;

    /// Create protocol instance.
    fn new(
        name: String,
        config: Self::ProtocolConfig,
        shared: InstanceShared,
        channels_tx: InstanceChannelsTx<Self>,
    ) -> Self;

    /// Optional protocol instance initialization routine.
    fn init(&mut self) {}

    /// Optional protocol instance shutdown routine.
    fn shutdown(self) {}

    /// Process control message from the daemon facade.
    fn process_control_msg(&mut self, msg: ControlMsg);

    /// Process protocol message.
    fn process_protocol_msg(&mut self, msg: Self::ProtocolInputMsg);

    /// Create channels for all protocol input events.
    fn protocol_input_channels()
    -> (Self::ProtocolInputChannelsTx, Self::ProtocolInputChannelsRx);
}

/// Shared context handed to every protocol instance at construction.
///
/// Components never hold references back to their parent; everything they
/// need to collaborate travels in here.
#[derive(Clone, Debug, new)]
pub struct InstanceShared {
    /// Router ID configured at the daemon level.
    pub router_id: std::net::Ipv4Addr,
    /// Channel into the RIB task.
    pub rib_tx: UnboundedSender<RouteUpdateMsg>,
    /// Channel into the virtual session fabric.
    pub wire_tx: UnboundedSender<WireMsg>,
    /// Observability bus.
    pub event_bus: EventBus,
}

/// Control messages from the daemon facade.
#[derive(Debug)]
pub enum ControlMsg {
    /// Reply with per-neighbor operational state.
    ShowNeighbors(oneshot::Sender<Vec<NeighborInfo>>),
    /// Reply with an instance-level summary.
    ShowSummary(oneshot::Sender<ProtocolSummary>),
    /// Reset message and error counters.
    ClearCounters,
    /// Unconfigure the instance; the event loop exits after this.
    Shutdown,
}

/// Per-neighbor operational state, as shown by `show neighbors`.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct NeighborInfo {
    pub protocol: RouteSource,
    pub peer: String,
    pub state: String,
    pub msgs_sent: u64,
    pub msgs_rcvd: u64,
    pub last_error: Option<String>,
}

/// Instance-level operational summary, as shown by `show protocols`.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct ProtocolSummary {
    pub protocol: RouteSource,
    pub router_id: std::net::Ipv4Addr,
    pub neighbor_count: usize,
    pub route_count: usize,
    pub error_counters: BTreeMap<String, u64>,
}

/// Instance input message.
#[derive(Debug)]
pub enum InstanceMsg<P: ProtocolInstance> {
    Control(Option<ControlMsg>),
    Protocol(P::ProtocolInputMsg),
}

/// Instance output channels.
#[derive(Debug, new)]
pub struct InstanceChannelsTx<P: ProtocolInstance> {
    pub protocol_input: P::ProtocolInputChannelsTx,
}

/// Instance input channels.
#[derive(Debug, new)]
pub struct InstanceChannelsRx<P: ProtocolInstance> {
    pub control: Receiver<ControlMsg>,
    pub protocol_input: P::ProtocolInputChannelsRx,
}

pub trait MessageReceiver<T: Send>
where
    Self: Send,
{
    fn recv(&mut self) -> impl Future<Output = Option<T>> + Send;
}

// ===== helper functions =====

// Protocol instance input-event aggregator.
fn event_aggregator<P>(
    mut instance_channels_rx: InstanceChannelsRx<P>,
    agg_tx: Sender<InstanceMsg<P>>,
) -> Task<()>
where
    P: ProtocolInstance,
{
    Task::spawn(async move {
        loop {
            let msg = tokio::select! {
                msg = instance_channels_rx.control.recv() => {
                    InstanceMsg::Control(msg)
                }
                Some(msg) = instance_channels_rx.protocol_input.recv() => {
                    InstanceMsg::Protocol(msg)
                }
            };

            let _ = agg_tx.send(msg).await;
        }
    })
}

async fn event_loop<P>(
    instance: &mut P,
    instance_channels_rx: InstanceChannelsRx<P>,
) where
    P: ProtocolInstance,
{
    let (agg_tx, mut agg_rx) = mpsc::channel(4);

    // Spawn event aggregator task.
    let _event_aggregator = event_aggregator(instance_channels_rx, agg_tx);

    // Main event loop.
    loop {
        let msg = agg_rx.recv().await.unwrap();
        match msg {
            InstanceMsg::Control(Some(ControlMsg::Shutdown))
            | InstanceMsg::Control(None) => {
                // Instance was unconfigured.
                return;
            }
            InstanceMsg::Control(Some(msg)) => {
                instance.process_control_msg(msg);
            }
            InstanceMsg::Protocol(msg) => {
                instance.process_protocol_msg(msg);
            }
        }
    }
}

async fn run<P>(
    name: String,
    config: P::ProtocolConfig,
    control_rx: Receiver<ControlMsg>,
    proto_input_tx: P::ProtocolInputChannelsTx,
    proto_input_rx: P::ProtocolInputChannelsRx,
    shared: InstanceShared,
) where
    P: ProtocolInstance,
{
    let instance_channels_tx = InstanceChannelsTx::new(proto_input_tx);
    let instance_channels_rx =
        InstanceChannelsRx::new(control_rx, proto_input_rx);

    // Create protocol instance.
    let mut instance = P::new(name, config, shared, instance_channels_tx);
    instance.init();

    // Run event loop.
    event_loop(&mut instance, instance_channels_rx).await;

    // Ensure instance is shut down before exiting.
    instance.shutdown();
}

// ===== global functions =====

/// Spawns a protocol instance in its own task. Returns the control channel
/// used by the daemon facade to drive it, plus the protocol input channels
/// the session fabric feeds with peer events.
pub fn spawn_protocol_task<P>(
    name: String,
    config: P::ProtocolConfig,
    shared: InstanceShared,
) -> (Sender<ControlMsg>, P::ProtocolInputChannelsTx)
where
    P: ProtocolInstance,
{
    let (control_tx, control_rx) = mpsc::channel(4);
    let (proto_input_tx, proto_input_rx) = P::protocol_input_channels();
    let fabric_tx = proto_input_tx.clone();

    let fut = async move {
        let span = debug_span!("instance", protocol = %P::PROTOCOL, %name);
        let _span_guard = span.enter();
        run::<P>(
            name,
            config,
            control_rx,
            proto_input_tx,
            proto_input_rx,
            shared,
        )
        .await;
    };

    // Protocol instances may take longer per event than is appropriate for
    // cooperative async tasks, so they run on blocking threads with the OS
    // providing preemptive scheduling.
    tokio::task::spawn_blocking(|| {
        tokio::runtime::Handle::current().block_on(fut)
    });

    (control_tx, fabric_tx)
}
