//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use mimic_utils::bus::EventKind;
use mimic_utils::protocol::RouteSource;
use mimic_utils::task::{IntervalTask, TimeoutTask};
use mimic_utils::transport::WireMsg;
use serde::{Deserialize, Serialize};

use crate::debug::Debug;
use crate::instance::InstanceUpView;
use crate::packet::consts::{
    AS_TRANS, Afi, BGP_VERSION, CeaseSubcode, ErrorCode, FsmErrorSubcode, Safi,
};
use crate::packet::message::{
    Capability, EncodeCxt, KeepaliveMsg, Message, NotificationMsg, OpenMsg,
};
use crate::policy::PolicyCfg;
use crate::tasks;

// Large hold-time used during session initialization.
const LARGE_HOLDTIME: u16 = 240;

// Reconnection back-off bounds.
const BACKOFF_MIN: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(60);

// BGP neighbor.
#[derive(Debug)]
pub struct Neighbor {
    pub remote_addr: Ipv4Addr,
    pub config: NeighborCfg,
    pub state: fsm::State,
    pub peer_type: PeerType,
    pub identifier: Option<Ipv4Addr>,
    pub holdtime_nego: Option<u16>,
    pub four_octet_as_nego: bool,
    pub capabilities_rcvd: BTreeSet<Capability>,
    pub notification_sent: Option<NotificationMsg>,
    pub notification_rcvd: Option<NotificationMsg>,
    pub last_error: Option<String>,
    pub statistics: NeighborStatistics,
    pub tasks: NeighborTasks,
    pub backoff: Duration,
}

// Neighbor configuration.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct NeighborCfg {
    pub remote_addr: Ipv4Addr,
    pub remote_asn: u32,
    pub ifname: String,
    pub local_addr: Ipv4Addr,
    #[serde(default)]
    pub passive: bool,
    #[serde(default)]
    pub hold_time: Option<u16>,
    #[serde(default)]
    pub weight: u32,
    #[serde(default)]
    pub policy_in: Option<PolicyCfg>,
}

// BGP peer type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PeerType {
    Internal,
    External,
}

// Neighbor statistics.
#[derive(Debug, Default)]
pub struct NeighborStatistics {
    pub established_transitions: u32,
    pub msgs_rcvd: u64,
    pub msgs_sent: Arc<AtomicU64>,
    pub erroneous_updates: u32,
}

// Neighbor tasks.
#[derive(Debug, Default)]
pub struct NeighborTasks {
    pub autostart: Option<TimeoutTask>,
    pub connect_retry: Option<TimeoutTask>,
    pub keepalive: Option<IntervalTask>,
    pub holdtime: Option<TimeoutTask>,
}

// Type aliases.
pub type Neighbors = BTreeMap<Ipv4Addr, Neighbor>;

// Finite State Machine.
pub mod fsm {
    use serde::{Deserialize, Serialize};

    use crate::packet::error::DecodeError;
    use crate::packet::message::{
        NotificationMsg, OpenMsg, UpdateMsg,
    };

    // FSM states.
    #[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
    pub enum State {
        Idle,
        Connect,
        Active,
        OpenSent,
        OpenConfirm,
        Established,
    }

    // FSM events.
    //
    // The original RFC FSM events are listed above each event for clarity.
    #[derive(Debug)]
    pub enum Event {
        // ManualStart
        Start,
        // ManualStop
        Stop(Option<NotificationMsg>),
        // Tcp_CR_Acked
        // TcpConnectionConfirmed
        Connected,
        // TcpConnectionFails
        ConnFail,
        // BGPHeaderErr
        // BGPOpenMsgErr
        // UpdateMsgErr
        RcvdError(DecodeError),
        // BGPOpen
        RcvdOpen(OpenMsg),
        // NotifMsg
        RcvdNotif(NotificationMsg),
        // KeepAliveMsg
        RcvdKalive,
        // UpdateMsg
        RcvdUpdate(UpdateMsg),
        // ConnectRetryTimer_Expires
        // HoldTimer_Expires
        // AutomaticStart
        Timer(Timer),
    }

    // BGP timers.
    //
    // Note: KEEPALIVE messages are sent independently, separate from the
    // FSM.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum Timer {
        ConnectRetry,
        Hold,
        AutoStart,
    }

    impl std::fmt::Display for State {
        fn fmt(
            &self,
            f: &mut std::fmt::Formatter<'_>,
        ) -> std::fmt::Result {
            match self {
                State::Idle => write!(f, "idle"),
                State::Connect => write!(f, "connect"),
                State::Active => write!(f, "active"),
                State::OpenSent => write!(f, "open-sent"),
                State::OpenConfirm => write!(f, "open-confirm"),
                State::Established => write!(f, "established"),
            }
        }
    }
}

// ===== impl Neighbor =====

impl Neighbor {
    // Creates a new neighbor in the Idle state.
    pub(crate) fn new(config: NeighborCfg, peer_type: PeerType) -> Neighbor {
        Neighbor {
            remote_addr: config.remote_addr,
            config,
            state: fsm::State::Idle,
            peer_type,
            identifier: None,
            holdtime_nego: None,
            four_octet_as_nego: false,
            capabilities_rcvd: Default::default(),
            notification_sent: None,
            notification_rcvd: None,
            last_error: None,
            statistics: Default::default(),
            tasks: Default::default(),
            backoff: BACKOFF_MIN,
        }
    }

    // Injects an event into the neighbor's FSM.
    pub(crate) fn fsm_event(
        &mut self,
        instance: &mut InstanceUpView<'_>,
        event: fsm::Event,
    ) {
        Debug::NbrFsmEvent(&self.remote_addr, &event).log();

        let next_state = match self.state {
            // Idle state
            fsm::State::Idle => match event {
                fsm::Event::Start
                | fsm::Event::Timer(fsm::Timer::AutoStart) => {
                    self.connect_retry_start(instance);
                    if self.config.passive {
                        Some(fsm::State::Active)
                    } else {
                        self.connect_request(instance);
                        Some(fsm::State::Connect)
                    }
                }
                _ => None,
            },
            // Connect state
            fsm::State::Connect => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(notif) => {
                    self.session_close(instance, notif, false);
                    Some(fsm::State::Idle)
                }
                fsm::Event::Connected => {
                    self.connect_retry_stop();
                    self.open_send(instance);
                    self.holdtimer_start(
                        instance,
                        Duration::from_secs(LARGE_HOLDTIME as u64),
                    );
                    Some(fsm::State::OpenSent)
                }
                fsm::Event::ConnFail => {
                    self.backoff_bump();
                    Some(fsm::State::Active)
                }
                fsm::Event::Timer(fsm::Timer::ConnectRetry) => {
                    self.backoff_bump();
                    self.connect_retry_start(instance);
                    self.connect_request(instance);
                    None
                }
                _ => None,
            },
            // Active state
            fsm::State::Active => match event {
                fsm::Event::Start => None,
                fsm::Event::Stop(notif) => {
                    self.session_close(instance, notif, false);
                    Some(fsm::State::Idle)
                }
                fsm::Event::Connected => {
                    self.connect_retry_stop();
                    self.open_send(instance);
                    self.holdtimer_start(
                        instance,
                        Duration::from_secs(LARGE_HOLDTIME as u64),
                    );
                    Some(fsm::State::OpenSent)
                }
                fsm::Event::Timer(fsm::Timer::ConnectRetry) => {
                    self.connect_retry_start(instance);
                    if !self.config.passive {
                        self.connect_request(instance);
                        Some(fsm::State::Connect)
                    } else {
                        None
                    }
                }
                _ => None,
            },
            // OpenSent state
            fsm::State::OpenSent => match event {
                fsm::Event::Stop(notif) => {
                    self.session_close(instance, notif, false);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdOpen(msg) => match self.open_process(
                    instance, msg,
                ) {
                    Ok(()) => {
                        self.keepalive_send(instance);
                        Some(fsm::State::OpenConfirm)
                    }
                    Err(notif) => {
                        self.session_close(instance, Some(notif), true);
                        Some(fsm::State::Idle)
                    }
                },
                fsm::Event::RcvdError(error) => {
                    let notif = error.to_notification();
                    self.session_close(instance, Some(notif), true);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdNotif(msg) => {
                    self.notification_rcvd = Some(msg);
                    self.session_close(instance, None, true);
                    Some(fsm::State::Idle)
                }
                fsm::Event::ConnFail => {
                    self.session_close(instance, None, true);
                    Some(fsm::State::Idle)
                }
                fsm::Event::Timer(fsm::Timer::Hold) => {
                    let notif = NotificationMsg::new(
                        ErrorCode::HoldTimerExpired,
                        0u8,
                    );
                    self.session_close(instance, Some(notif), true);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdKalive | fsm::Event::RcvdUpdate(_) => {
                    let notif = NotificationMsg::new(
                        ErrorCode::FiniteStateMachineError,
                        FsmErrorSubcode::UnexpectedMessageInOpenSent,
                    );
                    self.session_close(instance, Some(notif), true);
                    Some(fsm::State::Idle)
                }
                _ => None,
            },
            // OpenConfirm state
            fsm::State::OpenConfirm => match event {
                fsm::Event::Stop(notif) => {
                    self.session_close(instance, notif, false);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdKalive => {
                    self.holdtimer_reset();
                    Some(fsm::State::Established)
                }
                fsm::Event::RcvdError(error) => {
                    let notif = error.to_notification();
                    self.session_close(instance, Some(notif), true);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdNotif(msg) => {
                    self.notification_rcvd = Some(msg);
                    self.session_close(instance, None, true);
                    Some(fsm::State::Idle)
                }
                fsm::Event::ConnFail => {
                    self.session_close(instance, None, true);
                    Some(fsm::State::Idle)
                }
                fsm::Event::Timer(fsm::Timer::Hold) => {
                    let notif = NotificationMsg::new(
                        ErrorCode::HoldTimerExpired,
                        0u8,
                    );
                    self.session_close(instance, Some(notif), true);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdOpen(_) | fsm::Event::RcvdUpdate(_) => {
                    let notif = NotificationMsg::new(
                        ErrorCode::FiniteStateMachineError,
                        FsmErrorSubcode::UnexpectedMessageInOpenConfirm,
                    );
                    self.session_close(instance, Some(notif), true);
                    Some(fsm::State::Idle)
                }
                _ => None,
            },
            // Established state
            fsm::State::Established => match event {
                fsm::Event::Stop(notif) => {
                    let notif = notif.or_else(|| {
                        Some(NotificationMsg::new(
                            ErrorCode::Cease,
                            CeaseSubcode::AdministrativeShutdown,
                        ))
                    });
                    self.session_close(instance, notif, false);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdKalive => {
                    self.holdtimer_reset();
                    None
                }
                fsm::Event::RcvdUpdate(msg) => {
                    self.holdtimer_reset();
                    crate::events::process_nbr_update(instance, self, msg);
                    None
                }
                fsm::Event::RcvdError(error) => {
                    let notif = error.to_notification();
                    self.session_close(instance, Some(notif), true);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdNotif(msg) => {
                    self.notification_rcvd = Some(msg);
                    self.session_close(instance, None, true);
                    Some(fsm::State::Idle)
                }
                fsm::Event::ConnFail => {
                    self.session_close(instance, None, true);
                    Some(fsm::State::Idle)
                }
                fsm::Event::Timer(fsm::Timer::Hold) => {
                    let notif = NotificationMsg::new(
                        ErrorCode::HoldTimerExpired,
                        0u8,
                    );
                    self.session_close(instance, Some(notif), true);
                    Some(fsm::State::Idle)
                }
                fsm::Event::RcvdOpen(_) => {
                    let notif = NotificationMsg::new(
                        ErrorCode::FiniteStateMachineError,
                        FsmErrorSubcode::UnexpectedMessageInEstablished,
                    );
                    self.session_close(instance, Some(notif), true);
                    Some(fsm::State::Idle)
                }
                _ => None,
            },
        };

        if let Some(next_state) = next_state
            && next_state != self.state
        {
            self.state_change(instance, next_state);
        }
    }

    // Effectively transitions the FSM to the new state, performing the
    // entry actions.
    fn state_change(
        &mut self,
        instance: &mut InstanceUpView<'_>,
        new_state: fsm::State,
    ) {
        Debug::NbrFsmTransition(&self.remote_addr, &self.state, &new_state)
            .log();

        let old_state = self.state;
        self.state = new_state;

        if new_state == fsm::State::Established {
            self.statistics.established_transitions += 1;
            self.backoff = BACKOFF_MIN;
            self.kalive_interval_start(instance);
            self.initial_update_send(instance);
        }

        instance.shared.event_bus.publish(EventKind::NeighborChanged {
            source: RouteSource::Bgp,
            peer: self.remote_addr.to_string(),
            old_state: old_state.to_string(),
            new_state: new_state.to_string(),
        });
    }

    // Requests transport establishment from the session fabric.
    fn connect_request(&mut self, instance: &mut InstanceUpView<'_>) {
        let _ = instance.shared.wire_tx.send(WireMsg::Connect {
            protocol: RouteSource::Bgp,
            peer: self.remote_addr.to_string(),
        });
    }

    fn connect_retry_start(&mut self, instance: &mut InstanceUpView<'_>) {
        let task = tasks::nbr_timer(
            self,
            fsm::Timer::ConnectRetry,
            self.backoff,
            &instance.tx.nbr_timer,
        );
        self.tasks.connect_retry = Some(task);
    }

    fn connect_retry_stop(&mut self) {
        self.tasks.connect_retry = None;
    }

    // Exponential reconnection back-off, doubling up to one minute.
    fn backoff_bump(&mut self) {
        self.backoff = (self.backoff * 2).min(BACKOFF_MAX);
    }

    // Local hold-time offered in the OPEN message.
    fn holdtime_cfg(&self, instance: &InstanceUpView<'_>) -> u16 {
        self.config.hold_time.unwrap_or(instance.config.hold_time)
    }

    // Sends an OPEN message advertising our capabilities.
    fn open_send(&mut self, instance: &mut InstanceUpView<'_>) {
        let asn = instance.config.asn;
        let my_as = u16::try_from(asn).unwrap_or(AS_TRANS);
        let msg = Message::Open(OpenMsg {
            version: BGP_VERSION,
            my_as,
            holdtime: self.holdtime_cfg(instance),
            identifier: instance.router_id(),
            capabilities: [
                Capability::MultiProtocol {
                    afi: Afi::Ipv4,
                    safi: Safi::Unicast,
                },
                Capability::FourOctetAsNumber { asn },
            ]
            .into(),
        });
        self.message_send(instance, msg);
    }

    // Processes a received OPEN message, negotiating the session
    // parameters. On failure, returns the NOTIFICATION to send before
    // closing the session.
    fn open_process(
        &mut self,
        instance: &mut InstanceUpView<'_>,
        msg: OpenMsg,
    ) -> Result<(), NotificationMsg> {
        use crate::packet::consts::OpenMessageErrorSubcode;

        // Validate the peer AS.
        let peer_as = msg.real_as();
        if peer_as != self.config.remote_asn {
            crate::error::Error::NbrBadAs(
                self.remote_addr,
                peer_as,
                self.config.remote_asn,
            )
            .log();
            return Err(NotificationMsg::new(
                ErrorCode::OpenMessageError,
                OpenMessageErrorSubcode::BadPeerAs,
            ));
        }

        // RFC 4271: a hold time of zero disables keepalives, otherwise it
        // must be at least three seconds.
        if msg.holdtime != 0 && msg.holdtime < 3 {
            return Err(NotificationMsg::new(
                ErrorCode::OpenMessageError,
                OpenMessageErrorSubcode::UnacceptableHoldTime,
            ));
        }

        // Validate the BGP identifier.
        if msg.identifier.is_unspecified()
            || msg.identifier == instance.router_id()
        {
            crate::error::Error::NbrBadIdentifier(
                self.remote_addr,
                msg.identifier,
            )
            .log();
            return Err(NotificationMsg::new(
                ErrorCode::OpenMessageError,
                OpenMessageErrorSubcode::BadBgpIdentifier,
            ));
        }

        // Negotiate session parameters.
        self.identifier = Some(msg.identifier);
        self.holdtime_nego =
            Some(std::cmp::min(self.holdtime_cfg(instance), msg.holdtime));
        self.four_octet_as_nego = msg
            .capabilities
            .iter()
            .any(|capability| capability.is_four_octet_as_number());
        self.capabilities_rcvd = msg.capabilities;

        // Re-arm the hold timer with the negotiated value.
        match self.holdtime_nego {
            Some(0) => self.tasks.holdtime = None,
            Some(holdtime) => self.holdtimer_start(
                instance,
                Duration::from_secs(holdtime as u64),
            ),
            None => (),
        }

        Ok(())
    }

    fn keepalive_send(&mut self, instance: &mut InstanceUpView<'_>) {
        self.message_send(instance, Message::Keepalive(KeepaliveMsg {}));
    }

    // Advertises the locally originated networks after session
    // establishment.
    fn initial_update_send(&mut self, instance: &mut InstanceUpView<'_>) {
        use crate::packet::attribute::{AsPath, Attrs};
        use crate::packet::consts::Origin;
        use crate::packet::message::{ReachNlri, UpdateMsg};

        if instance.config.networks.is_empty() {
            return;
        }

        let as_path = match self.peer_type {
            PeerType::External => {
                AsPath::from_sequence([instance.config.asn])
            }
            PeerType::Internal => AsPath::empty(),
        };
        let local_pref = match self.peer_type {
            PeerType::External => None,
            PeerType::Internal => Some(crate::rib::DEFAULT_LOCAL_PREF),
        };
        let msg = Message::Update(UpdateMsg {
            reach: Some(ReachNlri {
                prefixes: instance.config.networks.clone(),
                nexthop: self.config.local_addr,
            }),
            unreach: None,
            attrs: Some(Attrs {
                origin: Origin::Igp,
                as_path,
                nexthop: Some(self.config.local_addr),
                med: None,
                local_pref,
                communities: None,
            }),
        });
        self.message_send(instance, msg);
    }

    // Encodes and sends a message toward the neighbor.
    pub(crate) fn message_send(
        &mut self,
        instance: &mut InstanceUpView<'_>,
        msg: Message,
    ) {
        Debug::NbrMsgTx(&self.remote_addr, &msg).log();

        if let Message::Notification(msg) = &msg {
            self.notification_sent = Some(msg.clone());
        }

        let cxt = EncodeCxt {
            four_octet_as: self.four_octet_as_nego,
        };
        let data = msg.encode(&cxt);
        self.statistics.msgs_sent.fetch_add(1, Ordering::Relaxed);
        let _ = instance.shared.wire_tx.send(WireMsg::Data {
            protocol: RouteSource::Bgp,
            peer: self.remote_addr.to_string(),
            data,
        });
    }

    fn holdtimer_start(
        &mut self,
        instance: &mut InstanceUpView<'_>,
        timeout: Duration,
    ) {
        let task = tasks::nbr_timer(
            self,
            fsm::Timer::Hold,
            timeout,
            &instance.tx.nbr_timer,
        );
        self.tasks.holdtime = Some(task);
    }

    pub(crate) fn holdtimer_reset(&mut self) {
        if let Some(holdtimer) = self.tasks.holdtime.as_mut() {
            holdtimer.reset(None);
        }
    }

    // Starts periodic KEEPALIVE transmission. The interval is one third of
    // the negotiated hold time, per RFC 4271's suggestion.
    fn kalive_interval_start(&mut self, instance: &mut InstanceUpView<'_>) {
        let holdtime = self.holdtime_nego.unwrap_or(0);
        if holdtime == 0 {
            return;
        }
        let interval = Duration::from_secs((holdtime / 3).max(1) as u64);
        let task = tasks::nbr_kalive_interval(
            self,
            interval,
            &instance.shared.wire_tx,
        );
        self.tasks.keepalive = Some(task);
    }

    // Closes the session, optionally sending a NOTIFICATION first.
    //
    // All routes learned from the neighbor are withdrawn. When `restart`
    // is set, an automatic restart is scheduled with exponential back-off.
    pub(crate) fn session_close(
        &mut self,
        instance: &mut InstanceUpView<'_>,
        notification: Option<NotificationMsg>,
        restart: bool,
    ) {
        if let Some(notification) = notification {
            self.last_error = Some(format!(
                "notification sent: code {} subcode {}",
                notification.error_code, notification.error_subcode
            ));
            self.message_send(
                instance,
                Message::Notification(notification),
            );
        } else if let Some(notification) = &self.notification_rcvd {
            self.last_error = Some(format!(
                "notification received: code {} subcode {}",
                notification.error_code, notification.error_subcode
            ));
        }

        // Withdraw everything learned from this neighbor.
        instance
            .state
            .rib
            .clear_nbr(&instance.shared.rib_tx, self.remote_addr);

        // Stop the session-scoped tasks and reset negotiated state.
        self.tasks.connect_retry = None;
        self.tasks.keepalive = None;
        self.tasks.holdtime = None;
        self.identifier = None;
        self.holdtime_nego = None;
        self.four_octet_as_nego = false;
        self.capabilities_rcvd.clear();

        let _ = instance.shared.wire_tx.send(WireMsg::Disconnect {
            protocol: RouteSource::Bgp,
            peer: self.remote_addr.to_string(),
        });

        if restart {
            self.backoff_bump();
            let task = tasks::nbr_timer(
                self,
                fsm::Timer::AutoStart,
                self.backoff,
                &instance.tx.nbr_timer,
            );
            self.tasks.autostart = Some(task);
        }
    }
}
