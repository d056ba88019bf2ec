//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::time::Duration;

use const_addrs::{ip4, net4};
use mimic_dataplane::egress::{EgressTimerMsg, spawn_egress_chain};
use mimic_dataplane::forwarding::spawn_forwarding_task;
use mimic_dataplane::impairment::ImpairmentCfg;
use mimic_dataplane::shaper::ShaperCfg;
use mimic_interface::interface::InterfaceCfg;
use mimic_interface::spawn_interface_task;
use mimic_rib::spawn_rib_task;
use mimic_utils::bus::EventBus;
use mimic_utils::packet::{IP_PROTO_UDP, Packet};
use mimic_utils::protocol::RouteSource;
use mimic_utils::route::{RouteAttrs, RouteMsg, RouteUpdateMsg};
use mimic_utils::timer::{TimerOwner, TimerWheel};
use tokio::sync::mpsc;
use tokio::time::Instant;

fn test_packet(seq: u8, ttl: u8) -> Packet {
    Packet::build_ipv4(
        ip4!("10.0.0.100"),
        ip4!("10.1.0.50"),
        IP_PROTO_UDP,
        ttl,
        0,
        &[seq; 64],
        "eth0",
        Instant::now(),
    )
}

// A wide-open shaper that never gates anything in these tests.
fn open_shaper() -> ShaperCfg {
    ShaperCfg {
        rate_bps: 1_000_000_000,
        burst_bytes: 100_000_000,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn netem_delay_invariant() {
    let wheel = TimerWheel::spawn();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let chain = spawn_egress_chain(
        "eth1",
        open_shaper(),
        ImpairmentCfg {
            delay_ms: 100,
            ..Default::default()
        },
        wheel,
        TimerOwner(1),
        out_tx,
        Arc::new(Default::default()),
        EventBus::new(),
    )
    .unwrap();

    // 100 packets at 10 ms intervals; watch for releases every
    // millisecond.
    let mut sent = vec![];
    let mut received = vec![];
    for tick in 0..2_000u64 {
        if tick % 10 == 0 && sent.len() < 100 {
            let seq = sent.len() as u8;
            sent.push(Instant::now());
            let _ = chain.in_tx.send(test_packet(seq, 64));
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
        while let Ok(packet) = out_rx.try_recv() {
            received.push((packet.data()[27], Instant::now()));
        }
    }

    assert_eq!(received.len(), 100);
    for (idx, (seq, rx_time)) in received.iter().enumerate() {
        // Order is preserved.
        assert_eq!(*seq as usize, idx);
        // Each egress timestamp is ingress + 100 ms, within tolerance.
        let delay = *rx_time - sent[idx];
        assert!(
            delay >= Duration::from_millis(100)
                && delay <= Duration::from_millis(105),
            "packet {idx} delayed {delay:?}"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn pass_through_preserves_bytes_and_order() {
    let wheel = TimerWheel::spawn();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let chain = spawn_egress_chain(
        "eth1",
        open_shaper(),
        ImpairmentCfg::default(),
        wheel,
        TimerOwner(1),
        out_tx,
        Arc::new(Default::default()),
        EventBus::new(),
    )
    .unwrap();

    let mut inputs = vec![];
    for seq in 0..50 {
        let packet = test_packet(seq, 64);
        inputs.push(packet.data().clone());
        let _ = chain.in_tx.send(packet);
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    for input in &inputs {
        let output = out_rx.try_recv().expect("missing packet");
        assert_eq!(output.data(), input);
    }
    assert!(out_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn link_down_cancels_pending_releases() {
    let bus = EventBus::new();
    let mut events = bus.subscribe();
    let wheel = TimerWheel::spawn();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let chain = spawn_egress_chain(
        "eth1",
        open_shaper(),
        ImpairmentCfg {
            delay_ms: 500,
            ..Default::default()
        },
        wheel,
        TimerOwner(1),
        out_tx,
        Arc::new(Default::default()),
        bus,
    )
    .unwrap();

    for seq in 0..5 {
        let _ = chain.in_tx.send(test_packet(seq, 64));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Admin-down before the 500 ms releases fire.
    let _ = chain
        .ctl_tx
        .send(mimic_dataplane::egress::EgressCtlMsg::LinkDown);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(out_rx.try_recv().is_err());
    let mut down_drops = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(
            event.kind,
            mimic_utils::bus::EventKind::PacketDropped {
                reason: mimic_utils::bus::DropReason::InterfaceDown,
                ..
            }
        ) {
            down_drops += 1;
        }
    }
    assert_eq!(down_drops, 5);
}

#[tokio::test(start_paused = true)]
async fn forwarding_path_end_to_end() {
    let bus = EventBus::new();
    let rib = spawn_rib_task(bus.clone(), Duration::from_secs(60));
    let interfaces = spawn_interface_task(rib.clone(), bus.clone());

    for (name, addr) in
        [("eth0", net4!("10.0.0.1/24")), ("eth1", net4!("10.2.0.1/24"))]
    {
        interfaces.add(name, InterfaceCfg {
            addr,
            mtu: 1500,
            bandwidth_bps: 1_000_000_000,
            enabled: true,
        });
    }

    // Static route toward the destination subnet over eth1.
    rib.update(RouteUpdateMsg::Install(RouteMsg::new(
        net4!("10.1.0.0/16"),
        ip4!("10.2.0.2"),
        "eth1".to_owned(),
        RouteSource::Static,
        1,
        0,
        RouteAttrs::None,
        None,
    )));
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Pass-through egress chain on eth1.
    let wheel = TimerWheel::<EgressTimerMsg>::spawn();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let eth1 = interfaces.show_interfaces().await;
    let counters = eth1
        .iter()
        .find(|iface| iface.name == "eth1")
        .unwrap()
        .counters
        .clone();
    let chain = spawn_egress_chain(
        "eth1",
        open_shaper(),
        ImpairmentCfg::default(),
        wheel,
        TimerOwner(2),
        out_tx,
        counters,
        bus.clone(),
    )
    .unwrap();
    interfaces.attach_egress("eth1", chain.in_tx.clone());
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Ingress on eth0.
    let forwarding = spawn_forwarding_task(
        "eth0",
        rib.reader(),
        interfaces.reader(),
        bus.clone(),
    );
    let _ = forwarding.in_tx.send(test_packet(1, 64).data().clone());
    tokio::time::sleep(Duration::from_millis(10)).await;

    // The packet egresses with the TTL decremented.
    let forwarded = out_rx.try_recv().expect("packet not forwarded");
    assert_eq!(forwarded.header.ttl, 63);
    assert_eq!(forwarded.header.dst, ip4!("10.1.0.50"));

    // No route: dropped with an event.
    let mut events = bus.subscribe();
    let unroutable = Packet::build_ipv4(
        ip4!("10.0.0.100"),
        ip4!("203.0.113.9"),
        IP_PROTO_UDP,
        64,
        0,
        &[0; 8],
        "eth0",
        Instant::now(),
    );
    let _ = forwarding.in_tx.send(unroutable.data().clone());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(out_rx.try_recv().is_err());

    let mut no_route = false;
    while let Ok(event) = events.try_recv() {
        if matches!(
            event.kind,
            mimic_utils::bus::EventKind::PacketDropped {
                reason: mimic_utils::bus::DropReason::NoRoute,
                ..
            }
        ) {
            no_route = true;
        }
    }
    assert!(no_route);

    // TTL expiry: an ICMP Time Exceeded goes back toward the source's
    // subnet... which is eth0 here, with no chain attached, so only the
    // drop event is observable.
    let mut events = bus.subscribe();
    let _ = forwarding.in_tx.send(test_packet(2, 1).data().clone());
    tokio::time::sleep(Duration::from_millis(10)).await;
    let mut ttl_exceeded = false;
    while let Ok(event) = events.try_recv() {
        if matches!(
            event.kind,
            mimic_utils::bus::EventKind::PacketDropped {
                reason: mimic_utils::bus::DropReason::TtlExceeded,
                ..
            }
        ) {
            ttl_exceeded = true;
        }
    }
    assert!(ttl_exceeded);
}
