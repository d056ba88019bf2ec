//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use mimic_interface::InterfacesReader;
use mimic_rib::rib::RibReader;
use mimic_utils::bus::{DropReason, EventBus, EventKind};
use mimic_utils::packet::Packet;
use mimic_utils::task::Task;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tracing::debug;

/// Handle to a per-interface forwarding task.
#[derive(Clone, Debug)]
pub struct ForwardingHandle {
    pub ifname: String,
    pub in_tx: UnboundedSender<Bytes>,
}

// ===== global functions =====

/// Spawns the ingress forwarding task for one interface.
///
/// Every packet goes through parse, local-delivery check, longest-prefix
/// lookup, TTL handling and egress enqueue. Packets of one flow keep
/// their order: the task processes ingress serially and hands everything
/// to the same egress chain queue.
pub fn spawn_forwarding_task(
    ifname: &str,
    rib: RibReader,
    interfaces: InterfacesReader,
    event_bus: EventBus,
) -> ForwardingHandle {
    let (in_tx, in_rx) = mpsc::unbounded_channel();

    // The task parses packets straight off the wire, so it runs
    // supervised: a panic on malformed input restarts the loop instead of
    // taking the interface down. The receiver is shared so restarts keep
    // the queue.
    let ifname_task = ifname.to_owned();
    let in_rx = Arc::new(Mutex::new(in_rx));
    let mut task = Task::spawn_supervised(move || {
        run(
            ifname_task.clone(),
            rib.clone(),
            interfaces.clone(),
            event_bus.clone(),
            in_rx.clone(),
        )
    });
    task.detach();

    ForwardingHandle {
        ifname: ifname.to_owned(),
        in_tx,
    }
}

// Forwarding task event loop.
async fn run(
    ifname: String,
    rib: RibReader,
    interfaces: InterfacesReader,
    event_bus: EventBus,
    in_rx: Arc<Mutex<UnboundedReceiver<Bytes>>>,
) {
    let mut in_rx = in_rx.lock().await;
    while let Some(data) = in_rx.recv().await {
        process_packet(&ifname, &rib, &interfaces, &event_bus, data);
    }
    debug!(%ifname, "forwarding task terminated");
}

fn process_packet(
    ifname: &str,
    rib: &RibReader,
    interfaces: &InterfacesReader,
    event_bus: &EventBus,
    data: Bytes,
) {
    let now = Instant::now();

    let Some(ingress) = interfaces.get(ifname) else {
        return;
    };
    ingress.counters.rx_packets.fetch_add(1, Ordering::Relaxed);
    ingress
        .counters
        .rx_bytes
        .fetch_add(data.len() as u64, Ordering::Relaxed);

    // Packets arriving on a down interface are discarded.
    if !ingress.oper_up {
        drop_packet(ifname, &ingress, event_bus, DropReason::InterfaceDown);
        return;
    }

    // Parse and validate; malformed packets are silently dropped and
    // counted.
    let packet = match Packet::parse(data, ifname, now) {
        Ok(packet) => packet,
        Err(_) => {
            drop_packet(
                ifname,
                &ingress,
                event_bus,
                DropReason::MalformedPacket,
            );
            return;
        }
    };

    // Local delivery.
    let dst = packet.header.dst;
    if let Some(local_ifname) = interfaces.local_interface(dst) {
        event_bus.publish(EventKind::LocalDelivery {
            ifname: local_ifname,
            dst,
        });
        return;
    }

    // Longest-prefix-match lookup.
    let Some(route) = rib.lookup(dst) else {
        drop_packet(ifname, &ingress, event_bus, DropReason::NoRoute);
        return;
    };

    // TTL handling, with ICMP Time Exceeded synthesized toward the
    // source.
    let Some(forwarded) = packet.decrement_ttl() else {
        drop_packet(ifname, &ingress, event_bus, DropReason::TtlExceeded);
        if let Some(icmp_route) = rib.lookup(packet.header.src)
            && let Some(egress) = interfaces.get(&icmp_route.ifname)
            && egress.oper_up
            && let Some(egress_tx) = &egress.egress_tx
        {
            let icmp = packet.icmp_time_exceeded(egress.addr.ip(), now);
            let _ = egress_tx.send(icmp);
        }
        return;
    };

    // Enqueue on the egress interface shaper.
    let Some(egress) = interfaces.get(&route.ifname) else {
        drop_packet(ifname, &ingress, event_bus, DropReason::NoRoute);
        return;
    };
    if !egress.oper_up {
        drop_packet(ifname, &ingress, event_bus, DropReason::InterfaceDown);
        return;
    }
    let Some(egress_tx) = &egress.egress_tx else {
        drop_packet(ifname, &ingress, event_bus, DropReason::InterfaceDown);
        return;
    };
    let _ = egress_tx.send(forwarded);
}

fn drop_packet(
    ifname: &str,
    ingress: &mimic_interface::interface::InterfaceView,
    event_bus: &EventBus,
    reason: DropReason,
) {
    ingress.counters.rx_dropped.fetch_add(1, Ordering::Relaxed);
    event_bus.publish(EventKind::PacketDropped {
        ifname: ifname.to_owned(),
        reason,
    });
}
