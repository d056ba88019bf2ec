//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use mimic_utils::task::TimeoutTask;

use crate::packet::DbDescFlags;
use crate::packet::lsa::LsaKey;

// OSPF neighbor.
#[derive(Debug)]
pub struct Neighbor {
    pub router_id: Ipv4Addr,
    pub src: Ipv4Addr,
    pub state: nsm::State,
    pub priority: u8,
    // DR and BDR as claimed by the neighbor's last Hello.
    pub dr: Option<Ipv4Addr>,
    pub bdr: Option<Ipv4Addr>,
    // Database exchange state.
    pub dd_flags: DbDescFlags,
    pub dd_seq_no: u32,
    pub master: bool,
    pub ls_request_list: BTreeSet<LsaKey>,
    pub last_error: Option<String>,
    pub tasks: NeighborTasks,
}

#[derive(Debug, Default)]
pub struct NeighborTasks {
    pub inactivity: Option<TimeoutTask>,
}

// Neighbor state machine.
pub mod nsm {
    // NSM states.
    //
    // The Attempt state is NBMA-only and not modeled.
    #[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
    pub enum State {
        Down,
        Init,
        TwoWay,
        ExStart,
        Exchange,
        Loading,
        Full,
    }

    // NSM events.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub enum Event {
        HelloRcvd,
        TwoWayRcvd,
        OneWayRcvd,
        NegotiationDone,
        ExchangeDone,
        LoadingDone,
        SeqNumberMismatch,
        InactivityTimer,
        Kill,
    }

    impl std::fmt::Display for State {
        fn fmt(
            &self,
            f: &mut std::fmt::Formatter<'_>,
        ) -> std::fmt::Result {
            match self {
                State::Down => write!(f, "down"),
                State::Init => write!(f, "init"),
                State::TwoWay => write!(f, "2-way"),
                State::ExStart => write!(f, "ex-start"),
                State::Exchange => write!(f, "exchange"),
                State::Loading => write!(f, "loading"),
                State::Full => write!(f, "full"),
            }
        }
    }
}

// ===== impl Neighbor =====

impl Neighbor {
    pub(crate) fn new(router_id: Ipv4Addr, src: Ipv4Addr) -> Neighbor {
        Neighbor {
            router_id,
            src,
            state: nsm::State::Down,
            priority: 0,
            dr: None,
            bdr: None,
            dd_flags: DbDescFlags::empty(),
            dd_seq_no: 0,
            master: false,
            ls_request_list: Default::default(),
            last_error: None,
            tasks: Default::default(),
        }
    }

    /// Returns true if the adjacency reached the database-exchange phase,
    /// meaning new LSAs must be flooded toward this neighbor.
    pub(crate) fn is_adjacent(&self) -> bool {
        self.state >= nsm::State::Exchange
    }

    // Resets all database-exchange state (adjacency teardown or sequence
    // number mismatch).
    pub(crate) fn exchange_reset(&mut self) {
        self.dd_flags = DbDescFlags::empty();
        self.dd_seq_no = 0;
        self.master = false;
        self.ls_request_list.clear();
    }
}
