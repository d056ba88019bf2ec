//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use tracing::{debug, debug_span};

use crate::neighbor::fsm;
use crate::packet::message::Message;

// BGP debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    InstanceStart,
    InstanceStop,
    NbrFsmEvent(&'a Ipv4Addr, &'a fsm::Event),
    NbrFsmTransition(&'a Ipv4Addr, &'a fsm::State, &'a fsm::State),
    NbrMsgRx(&'a Ipv4Addr, &'a Message),
    NbrMsgTx(&'a Ipv4Addr, &'a Message),
    BestPathFound(Ipv4Network, &'a Ipv4Addr),
    BestPathNotFound(Ipv4Network),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::InstanceStart | Debug::InstanceStop => {
                debug!("{}", self);
            }
            Debug::NbrFsmEvent(nbr_addr, event) => {
                debug_span!("neighbor", addr = %nbr_addr).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?event, "{}", self);
                    })
                });
            }
            Debug::NbrFsmTransition(nbr_addr, old_state, new_state) => {
                debug_span!("neighbor", addr = %nbr_addr).in_scope(|| {
                    debug_span!("fsm").in_scope(|| {
                        debug!(?old_state, ?new_state, "{}", self);
                    })
                });
            }
            Debug::NbrMsgRx(nbr_addr, msg) => {
                debug_span!("neighbor", addr = %nbr_addr).in_scope(|| {
                    debug_span!("input").in_scope(|| {
                        debug!(?msg, "{}", self);
                    })
                });
            }
            Debug::NbrMsgTx(nbr_addr, msg) => {
                debug_span!("neighbor", addr = %nbr_addr).in_scope(|| {
                    debug_span!("output").in_scope(|| {
                        debug!(?msg, "{}", self);
                    })
                });
            }
            Debug::BestPathFound(prefix, nbr_addr) => {
                debug!(%prefix, %nbr_addr, "{}", self);
            }
            Debug::BestPathNotFound(prefix) => {
                debug!(%prefix, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::InstanceStart => {
                write!(f, "starting instance")
            }
            Debug::InstanceStop => {
                write!(f, "stopping instance")
            }
            Debug::NbrFsmEvent(..) => {
                write!(f, "neighbor FSM event")
            }
            Debug::NbrFsmTransition(..) => {
                write!(f, "neighbor FSM state transition")
            }
            Debug::NbrMsgRx(..) => {
                write!(f, "message received")
            }
            Debug::NbrMsgTx(..) => {
                write!(f, "message sent")
            }
            Debug::BestPathFound(..) => {
                write!(f, "best path found")
            }
            Debug::BestPathNotFound(..) => {
                write!(f, "best path not found")
            }
        }
    }
}
