//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

use crate::protocol::RouteSource;

// Useful type definition(s).
pub type EventReceiver = UnboundedReceiver<Event>;

/// Typed event published on the bus.
///
/// Sequence numbers are globally monotone; subscribers observe events in
/// publication order and receive each event at most once per subscription.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct Event {
    pub seq: u64,
    #[serde(skip, default = "uptime_zero")]
    pub uptime: Duration,
    pub kind: EventKind,
}

fn uptime_zero() -> Duration {
    Duration::ZERO
}

/// Event payloads.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum EventKind {
    RouteChanged(RouteEvent),
    NeighborChanged {
        source: RouteSource,
        peer: String,
        old_state: String,
        new_state: String,
    },
    InterfaceChanged {
        ifname: String,
        admin_up: bool,
        oper_up: bool,
    },
    PacketDropped {
        ifname: String,
        reason: DropReason,
    },
    LocalDelivery {
        ifname: String,
        dst: Ipv4Addr,
    },
    StatSample {
        component: String,
        counters: BTreeMap<String, u64>,
    },
}

/// Active-route transitions, emitted by the RIB in application order.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub enum RouteEvent {
    Activated(RouteSummary),
    Replaced {
        old: RouteSummary,
        new: RouteSummary,
    },
    Withdrawn {
        prefix: Ipv4Network,
        source: RouteSource,
    },
}

/// Flattened view of an active route, as carried in events and snapshots.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RouteSummary {
    pub prefix: Ipv4Network,
    pub nexthop: Ipv4Addr,
    pub ifname: String,
    pub source: RouteSource,
    pub distance: u32,
    pub metric: u32,
}

/// Reasons a packet can be dropped anywhere in the pipeline.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DropReason {
    QueueFull,
    EarlyDetection,
    NoRoute,
    TtlExceeded,
    DelayOverflow,
    InterfaceDown,
    MalformedPacket,
    ImpairmentLoss,
}

/// Handle to the event bus.
///
/// Publishing stamps a global sequence number and fans the event out to all
/// live subscriptions. Subscriptions whose receiver was dropped are pruned
/// on the next publish.
#[derive(Clone, Debug, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Debug)]
struct BusInner {
    seq: AtomicU64,
    start: Instant,
    subscribers: Mutex<Vec<UnboundedSender<Event>>>,
}

// ===== impl EventBus =====

impl EventBus {
    pub fn new() -> EventBus {
        EventBus::default()
    }

    /// Creates a new subscription receiving every event published from now
    /// on.
    pub fn subscribe(&self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Publishes an event to all subscribers.
    pub fn publish(&self, kind: EventKind) {
        let event = Event {
            seq: self.inner.seq.fetch_add(1, Ordering::Relaxed),
            uptime: self.inner.start.elapsed(),
            kind,
        };
        self.inner
            .subscribers
            .lock()
            .unwrap()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Monotonic time elapsed since the bus was created.
    pub fn uptime(&self) -> Duration {
        self.inner.start.elapsed()
    }
}

impl Default for BusInner {
    fn default() -> Self {
        BusInner {
            seq: AtomicU64::new(0),
            start: Instant::now(),
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::QueueFull => write!(f, "queue-full"),
            DropReason::EarlyDetection => write!(f, "early-detection"),
            DropReason::NoRoute => write!(f, "no-route"),
            DropReason::TtlExceeded => write!(f, "ttl-exceeded"),
            DropReason::DelayOverflow => write!(f, "delay-overflow"),
            DropReason::InterfaceDown => write!(f, "interface-down"),
            DropReason::MalformedPacket => write!(f, "malformed-packet"),
            DropReason::ImpairmentLoss => write!(f, "impairment-loss"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequence_numbers_are_monotone() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        for n in 0..10 {
            bus.publish(EventKind::LocalDelivery {
                ifname: format!("eth{n}"),
                dst: Ipv4Addr::LOCALHOST,
            });
        }

        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            if let Some(last) = last {
                assert!(event.seq > last);
            }
            last = Some(event.seq);
        }
        assert_eq!(last, Some(9));
    }

    #[tokio::test]
    async fn each_subscription_sees_each_event_once() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(EventKind::InterfaceChanged {
            ifname: "eth0".to_owned(),
            admin_up: true,
            oper_up: true,
        });

        assert_eq!(rx1.try_recv().unwrap().seq, 0);
        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv().unwrap().seq, 0);
        assert!(rx2.try_recv().is_err());
    }
}
