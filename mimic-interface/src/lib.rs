//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod interface;

use std::sync::Arc;

use arc_swap::ArcSwap;
use mimic_rib::RibHandle;
use mimic_utils::bus::EventBus;
use mimic_utils::packet::Packet;
use mimic_utils::task::Task;
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::debug;

use crate::interface::{
    InterfaceCfg, InterfaceTableView, InterfaceView, Interfaces,
};

/// Messages consumed by the interface-table task.
#[derive(Debug)]
pub enum InterfaceMsg {
    Add {
        ifname: String,
        config: InterfaceCfg,
    },
    Remove {
        ifname: String,
    },
    AdminSet {
        ifname: String,
        up: bool,
    },
    LinkSet {
        ifname: String,
        up: bool,
    },
    AttachEgress {
        ifname: String,
        tx: UnboundedSender<Packet>,
    },
    ShowInterfaces(oneshot::Sender<Vec<InterfaceView>>),
    ClearCounters,
    Shutdown,
}

/// Handle to the interface-table task.
#[derive(Clone, Debug)]
pub struct InterfaceHandle {
    tx: UnboundedSender<InterfaceMsg>,
    view: Arc<ArcSwap<InterfaceTableView>>,
}

/// Non-blocking reader over the interface table, used by the forwarding
/// plane on the hot path.
#[derive(Clone, Debug)]
pub struct InterfacesReader {
    view: Arc<ArcSwap<InterfaceTableView>>,
}

// ===== impl InterfaceHandle =====

impl InterfaceHandle {
    pub fn reader(&self) -> InterfacesReader {
        InterfacesReader {
            view: self.view.clone(),
        }
    }

    pub fn add(&self, ifname: &str, config: InterfaceCfg) {
        let _ = self.tx.send(InterfaceMsg::Add {
            ifname: ifname.to_owned(),
            config,
        });
    }

    pub fn remove(&self, ifname: &str) {
        let _ = self.tx.send(InterfaceMsg::Remove {
            ifname: ifname.to_owned(),
        });
    }

    pub fn admin_set(&self, ifname: &str, up: bool) {
        let _ = self.tx.send(InterfaceMsg::AdminSet {
            ifname: ifname.to_owned(),
            up,
        });
    }

    pub fn link_set(&self, ifname: &str, up: bool) {
        let _ = self.tx.send(InterfaceMsg::LinkSet {
            ifname: ifname.to_owned(),
            up,
        });
    }

    pub fn attach_egress(&self, ifname: &str, tx: UnboundedSender<Packet>) {
        let _ = self.tx.send(InterfaceMsg::AttachEgress {
            ifname: ifname.to_owned(),
            tx,
        });
    }

    pub async fn show_interfaces(&self) -> Vec<InterfaceView> {
        let (tx, rx) = oneshot::channel();
        let _ = self.tx.send(InterfaceMsg::ShowInterfaces(tx));
        rx.await.unwrap_or_default()
    }

    pub fn clear_counters(&self) {
        let _ = self.tx.send(InterfaceMsg::ClearCounters);
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(InterfaceMsg::Shutdown);
    }
}

// ===== impl InterfacesReader =====

impl InterfacesReader {
    pub fn get(&self, ifname: &str) -> Option<InterfaceView> {
        self.view.load().by_name.get(ifname).cloned()
    }

    /// Returns the interface owning `addr`, if it is a local address.
    pub fn local_interface(
        &self,
        addr: std::net::Ipv4Addr,
    ) -> Option<String> {
        self.view.load().local_addrs.get(&addr).cloned()
    }
}

// ===== global functions =====

/// Spawns the interface-table task.
pub fn spawn_interface_task(
    rib: RibHandle,
    event_bus: EventBus,
) -> InterfaceHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let view = Arc::new(ArcSwap::from_pointee(InterfaceTableView::default()));

    let mut task =
        Task::spawn(run(Interfaces::default(), rx, rib, event_bus, view.clone()));
    task.detach();

    InterfaceHandle { tx, view }
}

// Interface-table task event loop.
async fn run(
    mut interfaces: Interfaces,
    mut rx: UnboundedReceiver<InterfaceMsg>,
    rib: RibHandle,
    event_bus: EventBus,
    view: Arc<ArcSwap<InterfaceTableView>>,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            InterfaceMsg::Add { ifname, config } => {
                interfaces.add(ifname, config, &rib, &event_bus);
            }
            InterfaceMsg::Remove { ifname } => {
                interfaces.remove(&ifname, &rib, &event_bus);
            }
            InterfaceMsg::AdminSet { ifname, up } => {
                interfaces.admin_set(&ifname, up, &rib, &event_bus);
            }
            InterfaceMsg::LinkSet { ifname, up } => {
                interfaces.link_set(&ifname, up, &rib, &event_bus);
            }
            InterfaceMsg::AttachEgress { ifname, tx } => {
                interfaces.attach_egress(&ifname, tx);
            }
            InterfaceMsg::ShowInterfaces(tx) => {
                let _ = tx
                    .send(interfaces.iter().map(view_of).collect::<Vec<_>>());
                continue;
            }
            InterfaceMsg::ClearCounters => {
                interfaces.clear_counters();
                continue;
            }
            InterfaceMsg::Shutdown => break,
        }

        // Refresh the readers' view after every mutation.
        view.store(Arc::new(interfaces.build_view()));
    }
    debug!("interface task terminated");
}

fn view_of(iface: &interface::Interface) -> InterfaceView {
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
    }
}
