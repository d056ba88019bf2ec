//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use const_addrs::{ip4, net4};
use mimic_isis::adjacency::AdjacencyState;
use mimic_isis::instance::{Instance, InstanceCfg, InterfaceCfg};
use mimic_isis::packet::pdu::{
    AdjStateTlv, AdjThreeWayState, Hello, HelloTlvs, NLPID_IPV4, Pdu,
};
use mimic_isis::packet::{LevelType, SystemId};
use mimic_isis::tasks::messages::ProtocolInputMsg;
use mimic_isis::tasks::messages::input::NetRxMsg;
use mimic_protocol::{InstanceChannelsTx, InstanceShared, ProtocolInstance};
use mimic_utils::bus::EventBus;
use mimic_utils::route::RouteUpdateMsg;
use mimic_utils::transport::WireMsg;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;

struct Harness {
    instance: Instance,
    rib_rx: UnboundedReceiver<RouteUpdateMsg>,
    _wire_rx: UnboundedReceiver<WireMsg>,
}

fn system_id(last: u8) -> SystemId {
    SystemId::new([0, 0, 0, 0, 0, last])
}

fn setup() -> Harness {
    let (rib_tx, rib_rx) = mpsc::unbounded_channel();
    let (wire_tx, wire_rx) = mpsc::unbounded_channel();
    let shared =
        InstanceShared::new(ip4!("1.1.1.1"), rib_tx, wire_tx, EventBus::new());

    let config = InstanceCfg {
        system_id: system_id(1),
        area_addr: "49.0001".parse().unwrap(),
        level_type: LevelType::All,
        hello_interval: 10,
        hold_multiplier: 3,
        interfaces: vec![InterfaceCfg {
            name: "eth0".to_owned(),
            addr: net4!("10.1.0.1/24"),
            metric: 10,
        }],
    };

    let (input_tx, _input_rx) = Instance::protocol_input_channels();
    let channels_tx = InstanceChannelsTx::new(input_tx);
    let mut instance = <Instance as ProtocolInstance>::new(
        "main".to_owned(),
        config,
        shared,
        channels_tx,
    );
    instance.init();

    Harness {
        instance,
        rib_rx,
        _wire_rx: wire_rx,
    }
}

fn peer_hello(reports_us: bool) -> Pdu {
    Pdu::Hello(Hello {
        circuit_type: 3,
        source: system_id(2),
        holdtime: 30,
        local_circuit_id: 1,
        tlvs: HelloTlvs {
            area_addrs: vec!["49.0001".parse().unwrap()],
            protocols_supported: vec![NLPID_IPV4],
            ipv4_addrs: vec![ip4!("10.1.0.2")],
            adj_state: Some(AdjStateTlv {
                state: if reports_us {
                    AdjThreeWayState::Initializing
                } else {
                    AdjThreeWayState::Down
                },
                ext_circuit_id: 1,
                neighbor: reports_us.then(|| (system_id(1), 1)),
            }),
        },
    })
}

fn deliver(harness: &mut Harness, pdu: Pdu) {
    harness
        .instance
        .process_protocol_msg(ProtocolInputMsg::NetRx(NetRxMsg {
            ifname: "eth0".to_owned(),
            data: pdu.encode(),
        }));
}

fn adj_state(harness: &Harness) -> Option<AdjacencyState> {
    harness.instance.interfaces["eth0"]
        .adjacency
        .as_ref()
        .map(|adj| adj.state)
}

#[tokio::test]
async fn three_way_handshake() {
    let mut harness = setup();
    assert_eq!(adj_state(&harness), None);

    // A hello that does not report us yet: one-way.
    deliver(&mut harness, peer_hello(false));
    assert_eq!(adj_state(&harness), Some(AdjacencyState::Initializing));

    // A hello reporting us back: the adjacency comes up.
    deliver(&mut harness, peer_hello(true));
    assert_eq!(adj_state(&harness), Some(AdjacencyState::Up));

    // Our own LSP must now advertise reachability to the neighbor.
    let lsdb = &harness.instance.state.lsdb;
    let own = lsdb
        .get(
            mimic_isis::packet::LevelNumber::L1,
            &mimic_isis::packet::LspId::from(system_id(1)),
        )
        .unwrap();
    assert!(
        own.lsp
            .tlvs
            .is_reach
            .iter()
            .any(|reach| reach.neighbor.system_id == system_id(2))
    );
}

#[tokio::test]
async fn area_mismatch_blocks_l1_only_adjacency() {
    let mut harness = setup();

    let mut hello = peer_hello(true);
    if let Pdu::Hello(hello) = &mut hello {
        // L1-only circuit with a foreign area.
        hello.circuit_type = 1;
        hello.tlvs.area_addrs = vec!["49.0099".parse().unwrap()];
    }
    deliver(&mut harness, hello);
    assert_eq!(adj_state(&harness), None);
}

#[tokio::test]
async fn remote_prefixes_reach_the_rib() {
    use mimic_isis::packet::pdu::{
        IpReach, IsReach, LSP_MAX_LIFETIME, Lsp, LspTlvs,
    };
    use mimic_isis::packet::{LanId, LevelNumber, LspId};

    let mut harness = setup();
    deliver(&mut harness, peer_hello(true));

    // The neighbor's LSP advertises a remote prefix and links back to us.
    let lsp = Lsp::new(
        LevelNumber::L1,
        LSP_MAX_LIFETIME,
        LspId::from(system_id(2)),
        1,
        0x01,
        LspTlvs {
            area_addrs: vec!["49.0001".parse().unwrap()],
            protocols_supported: vec![NLPID_IPV4],
            ipv4_addrs: vec![ip4!("10.1.0.2")],
            is_reach: vec![IsReach {
                neighbor: LanId::from(system_id(1)),
                metric: 10,
            }],
            ip_internal_reach: vec![IpReach {
                prefix: net4!("10.99.0.0/24"),
                metric: 5,
            }],
        },
    );
    deliver(&mut harness, Pdu::Lsp(lsp));

    // Drain the RIB channel; the remote prefix must be installed with the
    // IS-IS administrative distance.
    let mut installed = vec![];
    while let Ok(msg) = harness.rib_rx.try_recv() {
        if let RouteUpdateMsg::Install(route) = msg {
            installed.push(route);
        }
    }
    let route = installed
        .iter()
        .find(|route| route.prefix == net4!("10.99.0.0/24"))
        .unwrap();
    assert_eq!(route.distance, 115);
    assert_eq!(route.metric, 15);
    assert_eq!(route.nexthop, ip4!("10.1.0.2"));
    assert_eq!(route.ifname, "eth0");
}
