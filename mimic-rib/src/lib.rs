//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod error;
pub mod rib;
pub mod snapshot;

use std::time::Duration;

use mimic_utils::bus::{EventBus, RouteSummary};
use mimic_utils::route::RouteUpdateMsg;
use mimic_utils::task::{IntervalTask, Task};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::error::Error;
use crate::rib::{Rib, RibReader};

/// Control messages consumed by the RIB task.
#[derive(Debug)]
pub enum RibCtlMsg {
    InterfaceUpd {
        ifname: String,
        oper_up: bool,
    },
    AgeTick,
    ShowRoutes(oneshot::Sender<Vec<(RouteSummary, bool)>>),
    SnapshotDump(oneshot::Sender<String>),
    SnapshotRestore(String, oneshot::Sender<Result<usize, Error>>),
    Shutdown,
}

/// Handle to the RIB task.
///
/// Writes are serialized through the task's channels; lookups go through
/// the lock-free [`RibReader`] and never block writers.
#[derive(Clone, Debug)]
pub struct RibHandle {
    pub route_tx: UnboundedSender<RouteUpdateMsg>,
    ctl_tx: UnboundedSender<RibCtlMsg>,
    reader: RibReader,
}

// ===== impl RibHandle =====

impl RibHandle {
    pub fn reader(&self) -> RibReader {
        self.reader.clone()
    }

    pub fn update(&self, msg: RouteUpdateMsg) {
        let _ = self.route_tx.send(msg);
    }

    pub fn interface_update(&self, ifname: &str, oper_up: bool) {
        let _ = self.ctl_tx.send(RibCtlMsg::InterfaceUpd {
            ifname: ifname.to_owned(),
            oper_up,
        });
    }

    pub async fn show_routes(&self) -> Vec<(RouteSummary, bool)> {
        let (tx, rx) = oneshot::channel();
        let _ = self.ctl_tx.send(RibCtlMsg::ShowRoutes(tx));
        rx.await.unwrap_or_default()
    }

    pub async fn snapshot_dump(&self) -> String {
        let (tx, rx) = oneshot::channel();
        let _ = self.ctl_tx.send(RibCtlMsg::SnapshotDump(tx));
        rx.await.unwrap_or_default()
    }

    pub async fn snapshot_restore(
        &self,
        data: String,
    ) -> Result<usize, Error> {
        let (tx, rx) = oneshot::channel();
        let _ = self.ctl_tx.send(RibCtlMsg::SnapshotRestore(data, tx));
        rx.await.unwrap_or(Ok(0))
    }

    pub fn shutdown(&self) {
        let _ = self.ctl_tx.send(RibCtlMsg::Shutdown);
    }
}

// ===== global functions =====

/// Spawns the RIB task.
///
/// The task is the single writer of the table; protocol instances feed it
/// through `route_tx` and the decision process runs inline, so route-change
/// events are published in application order.
pub fn spawn_rib_task(
    event_bus: EventBus,
    age_interval: Duration,
) -> RibHandle {
    let (route_tx, route_rx) = mpsc::unbounded_channel();
    let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();

    let rib = Rib::new(event_bus);
    let reader = rib.reader();

    // Periodic aging tick.
    let age_tx = ctl_tx.clone();
    let age_task = IntervalTask::new(age_interval, false, move || {
        let age_tx = age_tx.clone();
        async move {
            let _ = age_tx.send(RibCtlMsg::AgeTick);
        }
    });

    // Unlike the other components, the RIB has no meaningful degraded
    // mode: losing it silently would leave every reader with a stale
    // snapshot forever, so a panic here takes the process down.
    let task = Task::spawn(run(rib, route_rx, ctl_rx, age_task));
    let mut watcher = Task::spawn(async move {
        if let Err(join_error) = task.await
            && join_error.is_panic()
        {
            error!("RIB task panicked, aborting");
            std::process::abort();
        }
    });
    watcher.detach();

    RibHandle {
        route_tx,
        ctl_tx,
        reader,
    }
}

// RIB task event loop.
async fn run(
    mut rib: Rib,
    mut route_rx: UnboundedReceiver<RouteUpdateMsg>,
    mut ctl_rx: UnboundedReceiver<RibCtlMsg>,
    _age_task: IntervalTask,
) {
    loop {
        tokio::select! {
            msg = route_rx.recv() => {
                let Some(msg) = msg else { break };
                process_route_msg(&mut rib, msg);
                rib.process_update_queue();
            }
            msg = ctl_rx.recv() => {
                let Some(msg) = msg else { break };
                match msg {
                    RibCtlMsg::InterfaceUpd { ifname, oper_up } => {
                        rib.interface_update(&ifname, oper_up);
                        rib.process_update_queue();
                    }
                    RibCtlMsg::AgeTick => {
                        rib.age(Instant::now());
                        rib.process_update_queue();
                    }
                    RibCtlMsg::ShowRoutes(tx) => {
                        let _ = tx.send(rib.all_routes());
                    }
                    RibCtlMsg::SnapshotDump(tx) => {
                        let _ = tx.send(snapshot::dump(&rib.active_routes()));
                    }
                    RibCtlMsg::SnapshotRestore(data, tx) => {
                        let result = restore(&mut rib, &data);
                        rib.process_update_queue();
                        let _ = tx.send(result);
                    }
                    RibCtlMsg::Shutdown => break,
                }
            }
        }
    }
    debug!("RIB task terminated");
}

fn process_route_msg(rib: &mut Rib, msg: RouteUpdateMsg) {
    match msg {
        RouteUpdateMsg::Install(msg) => {
            rib.install(msg, Instant::now());
        }
        RouteUpdateMsg::Withdraw { prefix, source } => {
            rib.withdraw(prefix, source);
        }
        RouteUpdateMsg::WithdrawAll { source } => {
            rib.withdraw_all(source);
        }
    }
}

// Reinstalls a dumped snapshot, resolving each route's egress interface
// through the covering active route when one exists.
fn restore(rib: &mut Rib, data: &str) -> Result<usize, Error> {
    let routes = snapshot::load(data).inspect_err(|error| error.log())?;
    let count = routes.len();
    let reader = rib.reader();
    for mut msg in routes {
        if let Some(covering) = reader.lookup(msg.nexthop) {
            msg.ifname = covering.ifname;
        }
        rib.install(msg, Instant::now());
    }
    Ok(count)
}
