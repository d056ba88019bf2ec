//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use crate::debug::Debug;
use crate::error::Error;
use crate::instance::InstanceUpView;
use crate::neighbor::{Neighbor, Neighbors, fsm};
use crate::packet::message::{DecodeCxt, Message, UpdateMsg};
use crate::rib::AdjRoute;
use crate::tasks::messages::input::{NbrRxMsg, NbrTimerMsg, SessionMsg};

// ===== transport session events =====

pub(crate) fn process_session_msg(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    msg: SessionMsg,
) {
    let Some(nbr) = neighbors.get_mut(&msg.nbr_addr) else {
        return;
    };

    let event = if msg.up {
        fsm::Event::Connected
    } else {
        fsm::Event::ConnFail
    };
    nbr.fsm_event(instance, event);
}

// ===== neighbor message reception =====

pub(crate) fn process_nbr_msg(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    msg: NbrRxMsg,
) {
    let Some(nbr) = neighbors.get_mut(&msg.nbr_addr) else {
        return;
    };
    nbr.statistics.msgs_rcvd += 1;

    let cxt = DecodeCxt {
        four_octet_as: nbr.four_octet_as_nego,
    };
    let event = match Message::decode(&msg.data, &cxt) {
        Ok(msg) => {
            Debug::NbrMsgRx(&nbr.remote_addr, &msg).log();
            match msg {
                Message::Open(msg) => fsm::Event::RcvdOpen(msg),
                Message::Update(msg) => fsm::Event::RcvdUpdate(msg),
                Message::Notification(msg) => fsm::Event::RcvdNotif(msg),
                Message::Keepalive(_) => fsm::Event::RcvdKalive,
            }
        }
        Err(error) => {
            Error::NbrRxError(nbr.remote_addr, error.clone()).log();
            instance.state.error_count += 1;
            nbr.last_error = Some(error.to_string());
            fsm::Event::RcvdError(error)
        }
    };
    nbr.fsm_event(instance, event);
}

// ===== neighbor timer expirations =====

pub(crate) fn process_nbr_timer(
    instance: &mut InstanceUpView<'_>,
    neighbors: &mut Neighbors,
    msg: NbrTimerMsg,
) {
    let Some(nbr) = neighbors.get_mut(&msg.nbr_addr) else {
        return;
    };
    nbr.fsm_event(instance, fsm::Event::Timer(msg.timer));
}

// ===== UPDATE processing =====

// Applies a received UPDATE to the neighbor's adj-RIB-in and reruns the
// decision process for the affected prefixes.
pub(crate) fn process_nbr_update(
    instance: &mut InstanceUpView<'_>,
    nbr: &mut Neighbor,
    msg: UpdateMsg,
) {
    // Withdrawn prefixes.
    if let Some(unreach) = msg.unreach {
        for prefix in unreach.prefixes {
            instance.state.rib.route_del(
                &instance.shared.rib_tx,
                nbr.remote_addr,
                prefix,
            );
        }
    }

    // Reachable prefixes.
    let Some(reach) = msg.reach else {
        return;
    };
    // The decoder guarantees the mandatory attributes are present whenever
    // the NLRI is non-empty.
    let Some(attrs) = msg.attrs else {
        return;
    };

    // AS-path loop detection.
    if attrs.as_path.contains(instance.config.asn) {
        nbr.statistics.erroneous_updates += 1;
        return;
    }

    for prefix in reach.prefixes {
        // Inbound accept/reject filter.
        if let Some(policy) = &nbr.config.policy_in
            && !policy.accepts(&prefix, &attrs)
        {
            continue;
        }

        let route = AdjRoute {
            attrs: attrs.clone(),
            peer_type: nbr.peer_type,
            peer_id: nbr.identifier.unwrap_or(nbr.remote_addr),
            ifname: nbr.config.ifname.clone(),
            weight: nbr.config.weight,
        };
        instance.state.rib.route_add(
            &instance.shared.rib_tx,
            nbr.remote_addr,
            prefix,
            route,
        );
    }
}
