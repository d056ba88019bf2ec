//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use mimic_protocol::MessageReceiver;
use mimic_utils::task::{IntervalTask, TimeoutTask};
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;

// IS-IS inter-task message types.
pub mod messages {
    use bytes::Bytes;

    use super::*;

    pub type ProtocolInputMsg = input::ProtocolMsg;

    // Input messages (transport fabric / timer tasks -> main task).
    pub mod input {
        use super::*;

        #[derive(Debug)]
        pub enum ProtocolMsg {
            NetRx(NetRxMsg),
            HelloInterval { ifname: String },
            AdjHoldtimer { ifname: String },
            AgeTick,
        }

        // Encoded PDU received on an interface.
        #[derive(Debug)]
        pub struct NetRxMsg {
            pub ifname: String,
            pub data: Bytes,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProtocolInputChannelsTx {
    pub net_rx: UnboundedSender<messages::input::NetRxMsg>,
    pub timer: UnboundedSender<messages::input::ProtocolMsg>,
}

#[derive(Debug)]
pub struct ProtocolInputChannelsRx {
    pub net_rx: mpsc::UnboundedReceiver<messages::input::NetRxMsg>,
    pub timer: mpsc::UnboundedReceiver<messages::input::ProtocolMsg>,
}

impl MessageReceiver<messages::ProtocolInputMsg> for ProtocolInputChannelsRx {
    async fn recv(&mut self) -> Option<messages::ProtocolInputMsg> {
        tokio::select! {
            Some(msg) = self.net_rx.recv() => {
                Some(messages::input::ProtocolMsg::NetRx(msg))
            }
            Some(msg) = self.timer.recv() => {
                Some(msg)
            }
        }
    }
}

pub(crate) fn protocol_input_channels()
-> (ProtocolInputChannelsTx, ProtocolInputChannelsRx) {
    let (net_rx_tx, net_rx_rx) = mpsc::unbounded_channel();
    let (timer_tx, timer_rx) = mpsc::unbounded_channel();

    (
        ProtocolInputChannelsTx {
            net_rx: net_rx_tx,
            timer: timer_tx,
        },
        ProtocolInputChannelsRx {
            net_rx: net_rx_rx,
            timer: timer_rx,
        },
    )
}

// ===== timer tasks =====

// Periodic hello transmission trigger for an interface.
pub(crate) fn iface_hello_interval(
    ifname: &str,
    interval: Duration,
    timer_tx: &UnboundedSender<messages::input::ProtocolMsg>,
) -> IntervalTask {
    let ifname = ifname.to_owned();
    let timer_tx = timer_tx.clone();
    IntervalTask::new(interval, true, move || {
        let ifname = ifname.clone();
        let timer_tx = timer_tx.clone();
        async move {
            let _ = timer_tx.send(
                messages::input::ProtocolMsg::HelloInterval { ifname },
            );
        }
    })
}

// Adjacency holdtime timer.
pub(crate) fn adjacency_holdtimer(
    ifname: &str,
    holdtime: Duration,
    timer_tx: &UnboundedSender<messages::input::ProtocolMsg>,
) -> TimeoutTask {
    let ifname = ifname.to_owned();
    let timer_tx = timer_tx.clone();
    TimeoutTask::new(holdtime, move || async move {
        let _ = timer_tx
            .send(messages::input::ProtocolMsg::AdjHoldtimer { ifname });
    })
}

// LSP database aging tick.
pub(crate) fn age_interval(
    timer_tx: &UnboundedSender<messages::input::ProtocolMsg>,
) -> IntervalTask {
    let timer_tx = timer_tx.clone();
    IntervalTask::new(Duration::from_secs(10), false, move || {
        let timer_tx = timer_tx.clone();
        async move {
            let _ = timer_tx.send(messages::input::ProtocolMsg::AgeTick);
        }
    })
}
