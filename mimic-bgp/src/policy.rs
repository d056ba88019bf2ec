//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::packet::attribute::Attrs;

// Inbound route filter.
//
// Matching is accept/reject only: a route is rejected when its prefix,
// any of its communities, or any AS in its path appears in the
// corresponding reject list.
#[derive(Clone, Debug, Default)]
#[derive(Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyCfg {
    pub reject_prefixes: Vec<Ipv4Network>,
    pub reject_communities: Vec<u32>,
    pub reject_as: Vec<u32>,
}

// ===== impl PolicyCfg =====

impl PolicyCfg {
    pub(crate) fn accepts(&self, prefix: &Ipv4Network, attrs: &Attrs) -> bool {
        if self.reject_prefixes.contains(prefix) {
            return false;
        }
        if let Some(communities) = &attrs.communities
            && self
                .reject_communities
                .iter()
                .any(|community| communities.contains(community))
        {
            return false;
        }
        if self.reject_as.iter().any(|asn| attrs.as_path.contains(*asn)) {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use const_addrs::net4;

    use super::*;
    use crate::packet::attribute::AsPath;
    use crate::packet::consts::Origin;

    fn attrs(as_path: &[u32], communities: &[u32]) -> Attrs {
        Attrs {
            origin: Origin::Igp,
            as_path: AsPath::from_sequence(as_path.iter().copied()),
            nexthop: None,
            med: None,
            local_pref: None,
            communities: (!communities.is_empty())
                .then(|| communities.iter().copied().collect::<BTreeSet<_>>()),
        }
    }

    #[test]
    fn rejects_by_prefix_community_and_as() {
        let policy = PolicyCfg {
            reject_prefixes: vec![net4!("10.66.0.0/16")],
            reject_communities: vec![0xffff0001],
            reject_as: vec![64512],
        };

        let ok = attrs(&[65001, 65002], &[100]);
        assert!(policy.accepts(&net4!("10.0.0.0/24"), &ok));

        assert!(!policy.accepts(&net4!("10.66.0.0/16"), &ok));
        assert!(!policy.accepts(
            &net4!("10.0.0.0/24"),
            &attrs(&[65001], &[0xffff0001])
        ));
        assert!(!policy.accepts(
            &net4!("10.0.0.0/24"),
            &attrs(&[65001, 64512], &[])
        ));
    }
}
