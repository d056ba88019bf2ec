//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::time::Duration;

use mimic_protocol::MessageReceiver;
use mimic_utils::task::{IntervalTask, TimeoutTask};
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;

// OSPF inter-task message types.
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
            WaitTimer { ifname: String },
            NbrInactivity { ifname: String, router_id: Ipv4Addr },
            SpfDelay,
            AgeTick,
        }

        // Encoded PDU received on an interface.
        #[derive(Debug)]
        pub struct NetRxMsg {
            pub ifname: String,
            pub src: Ipv4Addr,
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

// Periodic Hello transmission trigger for an interface.
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
            let _ = timer_tx.send(messages::input::ProtocolMsg::HelloInterval {
                ifname,
            });
        }
    })
}

// Wait timer preceding the first DR election on a broadcast interface.
pub(crate) fn iface_wait_timer(
    ifname: &str,
    timeout: Duration,
    timer_tx: &UnboundedSender<messages::input::ProtocolMsg>,
) -> TimeoutTask {
    let ifname = ifname.to_owned();
    let timer_tx = timer_tx.clone();
    TimeoutTask::new(timeout, move || async move {
        let _ = timer_tx
            .send(messages::input::ProtocolMsg::WaitTimer { ifname });
    })
}

// Neighbor inactivity (dead interval) timer.
pub(crate) fn nbr_inactivity_timer(
    ifname: &str,
    router_id: Ipv4Addr,
    timeout: Duration,
    timer_tx: &UnboundedSender<messages::input::ProtocolMsg>,
) -> TimeoutTask {
    let ifname = ifname.to_owned();
    let timer_tx = timer_tx.clone();
    TimeoutTask::new(timeout, move || async move {
        let _ = timer_tx.send(messages::input::ProtocolMsg::NbrInactivity {
            ifname,
            router_id,
        });
    })
}

// SPF debounce timer.
pub(crate) fn spf_delay_timer(
    delay: Duration,
    timer_tx: &UnboundedSender<messages::input::ProtocolMsg>,
) -> TimeoutTask {
    let timer_tx = timer_tx.clone();
    TimeoutTask::new(delay, move || async move {
        let _ = timer_tx.send(messages::input::ProtocolMsg::SpfDelay);
    })
}

// LSDB aging tick.
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
