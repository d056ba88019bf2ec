//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use const_addrs::{ip4, net4};
use mimic_bgp::instance::{Instance, InstanceCfg};
use mimic_bgp::neighbor::{NeighborCfg, fsm};
use mimic_bgp::packet::attribute::{AsPath, Attrs};
use mimic_bgp::packet::consts::{Afi, BGP_VERSION, Origin, Safi};
use mimic_bgp::packet::message::{
    Capability, EncodeCxt, Message, OpenMsg, ReachNlri, UpdateMsg,
};
use mimic_bgp::tasks::messages::input::{
    NbrRxMsg, NbrTimerMsg, SessionMsg,
};
use mimic_bgp::tasks::messages::ProtocolInputMsg;
use mimic_protocol::{
    InstanceChannelsTx, InstanceShared, ProtocolInstance,
};
use mimic_utils::bus::EventBus;
use mimic_utils::route::RouteUpdateMsg;
use mimic_utils::transport::WireMsg;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;

struct Harness {
    instance: Instance,
    rib_rx: UnboundedReceiver<RouteUpdateMsg>,
    wire_rx: UnboundedReceiver<WireMsg>,
}

fn setup() -> Harness {
    let (rib_tx, rib_rx) = mpsc::unbounded_channel();
    let (wire_tx, wire_rx) = mpsc::unbounded_channel();
    let shared =
        InstanceShared::new(ip4!("1.1.1.1"), rib_tx, wire_tx, EventBus::new());

    let config = InstanceCfg {
        asn: 65001,
        identifier: None,
        hold_time: 180,
        networks: vec![],
        neighbors: vec![NeighborCfg {
            remote_addr: ip4!("10.0.0.2"),
            remote_asn: 65002,
            ifname: "eth0".to_owned(),
            local_addr: ip4!("10.0.0.1"),
            passive: false,
            hold_time: None,
            weight: 0,
            policy_in: None,
        }],
    };

    let (input_tx, _input_rx) = Instance::protocol_input_channels();
    let channels_tx = InstanceChannelsTx::new(input_tx);
    let mut instance =
        <Instance as ProtocolInstance>::new(
            "main".to_owned(),
            config,
            shared,
            channels_tx,
        );
    instance.init();

    Harness {
        instance,
        rib_rx,
        wire_rx,
    }
}

fn nbr_state(harness: &Harness) -> fsm::State {
    harness.instance.neighbors[&ip4!("10.0.0.2")].state
}

fn peer_open() -> Message {
    Message::Open(OpenMsg {
        version: BGP_VERSION,
        my_as: 65002,
        holdtime: 180,
        identifier: ip4!("2.2.2.2"),
        capabilities: [
            Capability::MultiProtocol {
                afi: Afi::Ipv4,
                safi: Safi::Unicast,
            },
            Capability::FourOctetAsNumber { asn: 65002 },
        ]
        .into(),
    })
}

fn deliver(harness: &mut Harness, msg: Message) {
    let data = msg.encode(&EncodeCxt {
        four_octet_as: true,
    });
    harness.instance.process_protocol_msg(ProtocolInputMsg::NbrRx(
        NbrRxMsg {
            nbr_addr: ip4!("10.0.0.2"),
            data,
        },
    ));
}

fn drain_wire(harness: &mut Harness) -> Vec<WireMsg> {
    let mut msgs = vec![];
    while let Ok(msg) = harness.wire_rx.try_recv() {
        msgs.push(msg);
    }
    msgs
}

#[tokio::test]
async fn session_establishment_trace() {
    let mut harness = setup();

    // init() triggers the automatic start.
    assert_eq!(nbr_state(&harness), fsm::State::Connect);
    assert!(
        drain_wire(&mut harness)
            .iter()
            .any(|msg| matches!(msg, WireMsg::Connect { .. }))
    );

    // Transport comes up: an OPEN goes out.
    harness.instance.process_protocol_msg(ProtocolInputMsg::Session(
        SessionMsg {
            nbr_addr: ip4!("10.0.0.2"),
            up: true,
        },
    ));
    assert_eq!(nbr_state(&harness), fsm::State::OpenSent);
    assert!(
        drain_wire(&mut harness)
            .iter()
            .any(|msg| matches!(msg, WireMsg::Data { .. }))
    );

    // Peer OPEN: capabilities intersected, KEEPALIVE goes out.
    deliver(&mut harness, peer_open());
    assert_eq!(nbr_state(&harness), fsm::State::OpenConfirm);
    let nbr = &harness.instance.neighbors[&ip4!("10.0.0.2")];
    assert!(nbr.four_octet_as_nego);
    assert_eq!(nbr.holdtime_nego, Some(180));

    // First KEEPALIVE within hold time: session established.
    deliver(&mut harness, Message::Keepalive(Default::default()));
    assert_eq!(nbr_state(&harness), fsm::State::Established);
}

#[tokio::test]
async fn update_installs_and_hold_expiry_withdraws() {
    let mut harness = setup();

    // Establish the session.
    harness.instance.process_protocol_msg(ProtocolInputMsg::Session(
        SessionMsg {
            nbr_addr: ip4!("10.0.0.2"),
            up: true,
        },
    ));
    deliver(&mut harness, peer_open());
    deliver(&mut harness, Message::Keepalive(Default::default()));
    assert_eq!(nbr_state(&harness), fsm::State::Established);

    // Receive an UPDATE: the route lands in the main RIB channel.
    deliver(
        &mut harness,
        Message::Update(UpdateMsg {
            reach: Some(ReachNlri {
                prefixes: vec![net4!("10.99.0.0/16")],
                nexthop: ip4!("10.0.0.2"),
            }),
            unreach: None,
            attrs: Some(Attrs {
                origin: Origin::Igp,
                as_path: AsPath::from_sequence([65002]),
                nexthop: Some(ip4!("10.0.0.2")),
                med: Some(5),
                local_pref: None,
                communities: None,
            }),
        }),
    );
    let installed = harness.rib_rx.try_recv().unwrap();
    let RouteUpdateMsg::Install(route) = installed else {
        panic!("expected install, got {installed:?}");
    };
    assert_eq!(route.prefix, net4!("10.99.0.0/16"));
    assert_eq!(route.distance, 20);
    assert_eq!(route.metric, 5);

    // Hold-timer expiry: NOTIFICATION sent, session reset, routes
    // withdrawn.
    drain_wire(&mut harness);
    harness.instance.process_protocol_msg(ProtocolInputMsg::NbrTimer(
        NbrTimerMsg {
            nbr_addr: ip4!("10.0.0.2"),
            timer: fsm::Timer::Hold,
        },
    ));
    assert_eq!(nbr_state(&harness), fsm::State::Idle);

    let wire = drain_wire(&mut harness);
    assert!(wire.iter().any(|msg| matches!(
        msg,
        WireMsg::Data { data, .. } if data.get(18) == Some(&3)
    )));
    assert!(matches!(
        harness.rib_rx.try_recv().unwrap(),
        RouteUpdateMsg::Withdraw { .. }
    ));
}

#[tokio::test]
async fn replaying_updates_is_idempotent() {
    let mut harness = setup();

    harness.instance.process_protocol_msg(ProtocolInputMsg::Session(
        SessionMsg {
            nbr_addr: ip4!("10.0.0.2"),
            up: true,
        },
    ));
    deliver(&mut harness, peer_open());
    deliver(&mut harness, Message::Keepalive(Default::default()));

    let update = Message::Update(UpdateMsg {
        reach: Some(ReachNlri {
            prefixes: vec![net4!("10.99.0.0/16")],
            nexthop: ip4!("10.0.0.2"),
        }),
        unreach: None,
        attrs: Some(Attrs {
            origin: Origin::Igp,
            as_path: AsPath::from_sequence([65002]),
            nexthop: Some(ip4!("10.0.0.2")),
            med: None,
            local_pref: None,
            communities: None,
        }),
    });
    deliver(&mut harness, update.clone());
    deliver(&mut harness, update);

    // Both deliveries produce the same install; the adj-RIB-in holds one
    // route.
    let nbr_routes = &harness.instance.state.rib.adj_in[&ip4!("10.0.0.2")];
    assert_eq!(nbr_routes.len(), 1);
}
