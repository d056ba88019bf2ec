//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use mimic_protocol::MessageReceiver;
use mimic_utils::protocol::RouteSource;
use mimic_utils::task::{IntervalTask, TimeoutTask};
use mimic_utils::transport::WireMsg;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;

use crate::neighbor::{Neighbor, fsm};
use crate::packet::message::{EncodeCxt, KeepaliveMsg, Message};

//
// BGP tasks diagram:
//
//                       +--------------+
//                       |    daemon    |
//                       +--------------+
//                             | ^
//                     control V | wire (session fabric)
//                       +--------------+
//      session (Nx) ->  |              |
//       nbr_rx (Nx) ->  |   instance   | -> (Nx) nbr keepalive
//    nbr_timer (Nx) ->  |              | -> (1x) rib updates
//                       +--------------+
//

// BGP inter-task message types.
pub mod messages {
    use bytes::Bytes;
    use serde::{Deserialize, Serialize};

    use super::*;

    // Type aliases.
    pub type ProtocolInputMsg = input::ProtocolMsg;

    // Input messages (transport fabric / child task -> main task).
    pub mod input {
        use std::net::Ipv4Addr;

        use super::*;

        #[derive(Debug)]
        pub enum ProtocolMsg {
            Session(SessionMsg),
            NbrRx(NbrRxMsg),
            NbrTimer(NbrTimerMsg),
        }

        // Transport established or lost toward a neighbor.
        #[derive(Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct SessionMsg {
            pub nbr_addr: Ipv4Addr,
            pub up: bool,
        }

        // Encoded PDU received from a neighbor.
        #[derive(Debug)]
        pub struct NbrRxMsg {
            pub nbr_addr: Ipv4Addr,
            pub data: Bytes,
        }

        #[derive(Debug)]
        #[derive(Deserialize, Serialize)]
        pub struct NbrTimerMsg {
            pub nbr_addr: Ipv4Addr,
            pub timer: fsm::Timer,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProtocolInputChannelsTx {
    pub session: UnboundedSender<messages::input::SessionMsg>,
    pub nbr_rx: UnboundedSender<messages::input::NbrRxMsg>,
    pub nbr_timer: UnboundedSender<messages::input::NbrTimerMsg>,
}

#[derive(Debug)]
pub struct ProtocolInputChannelsRx {
    pub session: mpsc::UnboundedReceiver<messages::input::SessionMsg>,
    pub nbr_rx: mpsc::UnboundedReceiver<messages::input::NbrRxMsg>,
    pub nbr_timer: mpsc::UnboundedReceiver<messages::input::NbrTimerMsg>,
}

impl MessageReceiver<messages::ProtocolInputMsg> for ProtocolInputChannelsRx {
    async fn recv(&mut self) -> Option<messages::ProtocolInputMsg> {
        tokio::select! {
            Some(msg) = self.session.recv() => {
                Some(messages::input::ProtocolMsg::Session(msg))
            }
            Some(msg) = self.nbr_rx.recv() => {
                Some(messages::input::ProtocolMsg::NbrRx(msg))
            }
            Some(msg) = self.nbr_timer.recv() => {
                Some(messages::input::ProtocolMsg::NbrTimer(msg))
            }
        }
    }
}

pub(crate) fn protocol_input_channels()
-> (ProtocolInputChannelsTx, ProtocolInputChannelsRx) {
    let (session_tx, session_rx) = mpsc::unbounded_channel();
    let (nbr_rx_tx, nbr_rx_rx) = mpsc::unbounded_channel();
    let (nbr_timer_tx, nbr_timer_rx) = mpsc::unbounded_channel();

    (
        ProtocolInputChannelsTx {
            session: session_tx,
            nbr_rx: nbr_rx_tx,
            nbr_timer: nbr_timer_tx,
        },
        ProtocolInputChannelsRx {
            session: session_rx,
            nbr_rx: nbr_rx_rx,
            nbr_timer: nbr_timer_rx,
        },
    )
}

// ===== neighbor timers =====

// Neighbor timer expiration, delivered back to the instance.
pub(crate) fn nbr_timer(
    nbr: &Neighbor,
    timer: fsm::Timer,
    timeout: Duration,
    nbr_timer_tx: &UnboundedSender<messages::input::NbrTimerMsg>,
) -> TimeoutTask {
    let nbr_addr = nbr.remote_addr;
    let nbr_timer_tx = nbr_timer_tx.clone();
    TimeoutTask::new(timeout, move || async move {
        let msg = messages::input::NbrTimerMsg { nbr_addr, timer };
        let _ = nbr_timer_tx.send(msg);
    })
}

// Periodic KEEPALIVE transmission while the session is established.
pub(crate) fn nbr_kalive_interval(
    nbr: &Neighbor,
    interval: Duration,
    wire_tx: &UnboundedSender<WireMsg>,
) -> IntervalTask {
    let peer = nbr.remote_addr.to_string();
    let wire_tx = wire_tx.clone();
    let msgs_sent = nbr.statistics.msgs_sent.clone();
    IntervalTask::new(interval, false, move || {
        let peer = peer.clone();
        let wire_tx = wire_tx.clone();
        let msgs_sent: Arc<AtomicU64> = msgs_sent.clone();
        async move {
            let msg = Message::Keepalive(KeepaliveMsg {});
            let data = msg.encode(&EncodeCxt::default());
            msgs_sent.fetch_add(1, Ordering::Relaxed);
            let _ = wire_tx.send(WireMsg::Data {
                protocol: RouteSource::Bgp,
                peer,
                data,
            });
        }
    })
}
