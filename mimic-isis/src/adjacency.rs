//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use mimic_utils::task::TimeoutTask;

use crate::packet::{LevelType, SystemId};

// IS-IS adjacency over a point-to-point circuit.
#[derive(Debug)]
pub struct Adjacency {
    pub system_id: SystemId,
    pub state: AdjacencyState,
    pub level_usage: LevelType,
    // Neighbor interface address learned from the hello.
    pub ipv4_addr: Option<Ipv4Addr>,
    pub holdtimer: Option<TimeoutTask>,
    pub last_error: Option<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AdjacencyState {
    Down,
    Initializing,
    Up,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AdjacencyEvent {
    HelloOneWayRcvd,
    HelloTwoWayRcvd,
    HoldtimeExpired,
    Kill,
}

// ===== impl Adjacency =====

impl Adjacency {
    pub(crate) fn new(
        system_id: SystemId,
        level_usage: LevelType,
    ) -> Adjacency {
        Adjacency {
            system_id,
            state: AdjacencyState::Down,
            level_usage,
            ipv4_addr: None,
            holdtimer: None,
            last_error: None,
        }
    }
}

impl std::fmt::Display for AdjacencyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdjacencyState::Down => write!(f, "down"),
            AdjacencyState::Initializing => write!(f, "initializing"),
            AdjacencyState::Up => write!(f, "up"),
        }
    }
}
