//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::sync::atomic::Ordering;

use mimic_interface::interface::InterfaceCounters;
use mimic_utils::bus::{DropReason, EventBus, EventKind};
use mimic_utils::packet::Packet;
use mimic_utils::task::Task;
use mimic_utils::timer::{TimerOwner, TimerToken, TimerWheel};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tracing::debug;

use crate::error::Error;
use crate::impairment::{Impairment, ImpairmentAction, ImpairmentCfg};
use crate::shaper::{Dequeue, Shaper, ShaperCfg, ShaperStats};

// Timer-wheel messages for an egress chain.
#[derive(Debug)]
pub enum EgressTimerMsg {
    /// A delayed packet reached its release time.
    Release(Packet),
    /// The shaper may have accumulated enough tokens.
    Refill,
}

// Control messages for an egress chain.
#[derive(Debug)]
pub enum EgressCtlMsg {
    Reconfigure {
        shaper: Option<ShaperCfg>,
        impairment: Option<ImpairmentCfg>,
    },
    /// The interface went down: pending releases are canceled and queued
    /// packets dropped.
    LinkDown,
    Shutdown,
}

/// Handle to a per-interface egress chain task (shaper plus impairment
/// pipeline).
#[derive(Clone, Debug)]
pub struct EgressHandle {
    pub ifname: String,
    pub in_tx: UnboundedSender<Packet>,
    pub ctl_tx: UnboundedSender<EgressCtlMsg>,
    pub stats: Arc<ShaperStats>,
}

struct EgressChain {
    ifname: String,
    shaper: Shaper,
    impairment: Impairment,
    wheel: TimerWheel<EgressTimerMsg>,
    owner: TimerOwner,
    timer_tx: UnboundedSender<EgressTimerMsg>,
    out_tx: UnboundedSender<Packet>,
    counters: Arc<InterfaceCounters>,
    event_bus: EventBus,
    rng: StdRng,
    refill_timer: Option<TimerToken>,
    // Packets scheduled in the wheel and not yet released.
    in_flight: u64,
}

// ===== global functions =====

/// Validates the configuration and spawns the egress chain task.
pub fn spawn_egress_chain(
    ifname: &str,
    shaper_cfg: ShaperCfg,
    impairment_cfg: ImpairmentCfg,
    wheel: TimerWheel<EgressTimerMsg>,
    owner: TimerOwner,
    out_tx: UnboundedSender<Packet>,
    counters: Arc<InterfaceCounters>,
    event_bus: EventBus,
) -> Result<EgressHandle, Error> {
    shaper_cfg.validate().inspect_err(|error| error.log())?;
    impairment_cfg.validate().inspect_err(|error| error.log())?;

    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();
    let (timer_tx, timer_rx) = mpsc::unbounded_channel();

    let shaper = Shaper::new(shaper_cfg, Instant::now());
    let stats = shaper.stats.clone();
    let chain = EgressChain {
        ifname: ifname.to_owned(),
        shaper,
        impairment: Impairment::new(impairment_cfg),
        wheel,
        owner,
        timer_tx,
        out_tx,
        counters,
        event_bus,
        rng: StdRng::from_os_rng(),
        refill_timer: None,
        in_flight: 0,
    };

    let mut task = Task::spawn(run(chain, in_rx, ctl_rx, timer_rx));
    task.detach();

    Ok(EgressHandle {
        ifname: ifname.to_owned(),
        in_tx,
        ctl_tx,
        stats,
    })
}

// Egress chain event loop.
async fn run(
    mut chain: EgressChain,
    mut in_rx: UnboundedReceiver<Packet>,
    mut ctl_rx: UnboundedReceiver<EgressCtlMsg>,
    mut timer_rx: UnboundedReceiver<EgressTimerMsg>,
) {
    loop {
        tokio::select! {
            packet = in_rx.recv() => {
                let Some(packet) = packet else { break };
                chain.ingress(packet);
                chain.drain();
            }
            Some(msg) = timer_rx.recv() => {
                match msg {
                    EgressTimerMsg::Release(packet) => {
                        chain.in_flight -= 1;
                        chain.transmit(packet);
                    }
                    EgressTimerMsg::Refill => {
                        chain.refill_timer = None;
                    }
                }
                chain.drain();
            }
            msg = ctl_rx.recv() => {
                let Some(msg) = msg else { break };
                match msg {
                    EgressCtlMsg::Reconfigure { shaper, impairment } => {
                        chain.reconfigure(shaper, impairment);
                    }
                    EgressCtlMsg::LinkDown => {
                        chain.link_down();
                    }
                    EgressCtlMsg::Shutdown => break,
                }
            }
        }
    }
    debug!(ifname = %chain.ifname, "egress chain terminated");
}

// ===== impl EgressChain =====

impl EgressChain {
    fn ingress(&mut self, packet: Packet) {
        if let Err(reason) = self.shaper.enqueue(packet, &mut self.rng) {
            self.drop_packet(reason);
        }
    }

    // Pulls packets out of the shaper while tokens allow, feeding each
    // through the impairment pipeline.
    fn drain(&mut self) {
        loop {
            let now = Instant::now();
            match self.shaper.dequeue(now) {
                Dequeue::Packet(packet) => {
                    let actions =
                        self.impairment.apply(packet, now, &mut self.rng);
                    self.process_actions(actions);
                }
                Dequeue::Wait(wait) => {
                    // One refill wake-up at a time.
                    if self.refill_timer.is_none() {
                        let token = self.wheel.schedule_in(
                            wait,
                            self.owner,
                            self.timer_tx.clone(),
                            EgressTimerMsg::Refill,
                        );
                        self.refill_timer = Some(token);
                    }
                    break;
                }
                Dequeue::Empty => break,
            }
        }
    }

    fn process_actions(&mut self, actions: Vec<ImpairmentAction>) {
        for action in actions {
            match action {
                ImpairmentAction::Emit(packet) => {
                    self.transmit(packet);
                }
                ImpairmentAction::EmitAt(packet, release_at) => {
                    self.shaper
                        .stats
                        .packets_delayed
                        .fetch_add(1, Ordering::Relaxed);
                    self.in_flight += 1;
                    self.wheel.schedule_at(
                        release_at,
                        self.owner,
                        self.timer_tx.clone(),
                        EgressTimerMsg::Release(packet),
                    );
                }
                ImpairmentAction::Drop(reason) => {
                    self.drop_packet(reason);
                }
            }
        }
    }

    fn transmit(&mut self, packet: Packet) {
        self.counters.tx_packets.fetch_add(1, Ordering::Relaxed);
        self.counters
            .tx_bytes
            .fetch_add(packet.len() as u64, Ordering::Relaxed);
        let _ = self.out_tx.send(packet);
    }

    fn drop_packet(&mut self, reason: DropReason) {
        self.counters.tx_dropped.fetch_add(1, Ordering::Relaxed);
        self.event_bus.publish(EventKind::PacketDropped {
            ifname: self.ifname.clone(),
            reason,
        });
    }

    fn reconfigure(
        &mut self,
        shaper: Option<ShaperCfg>,
        impairment: Option<ImpairmentCfg>,
    ) {
        // Reconfiguration cancels everything pending, like admin-down.
        self.link_down();
        if let Some(cfg) = shaper {
            let stats = self.shaper.stats.clone();
            self.shaper = Shaper::new(cfg, Instant::now());
            self.shaper.stats = stats;
        }
        if let Some(cfg) = impairment {
            self.impairment = Impairment::new(cfg);
        }
    }

    // Cancels all pending timers and drops everything in flight.
    fn link_down(&mut self) {
        self.wheel.cancel_owner(self.owner);
        self.refill_timer = None;

        for _ in 0..self.in_flight {
            self.drop_packet(DropReason::InterfaceDown);
        }
        self.in_flight = 0;

        for _ in self.shaper.flush() {
            self.drop_packet(DropReason::InterfaceDown);
        }
        if self.impairment.flush_held().is_some() {
            self.drop_packet(DropReason::InterfaceDown);
        }
    }
}
