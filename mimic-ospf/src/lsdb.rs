//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use tokio::time::Instant;

use crate::packet::lsa::{
    LSA_MAX_AGE, LSA_REFRESH_INTERVAL, Lsa, LsaHdr, LsaKey,
};

// Link-state database.
#[derive(Debug, Default)]
pub struct Lsdb {
    entries: BTreeMap<LsaKey, LsaEntry>,
}

// Stored LSA. The age field of the stored header is the age at reception;
// the effective age also counts the time since.
#[derive(Debug)]
pub struct LsaEntry {
    pub lsa: Lsa,
    pub rcvd_time: Instant,
}

// ===== impl LsaEntry =====

impl LsaEntry {
    /// Effective age of the stored LSA.
    pub fn age(&self, now: Instant) -> u16 {
        let elapsed = (now - self.rcvd_time).as_secs().min(u16::MAX as u64);
        self.lsa.hdr.age.saturating_add(elapsed as u16).min(LSA_MAX_AGE)
    }
}

// ===== impl Lsdb =====

impl Lsdb {
    /// Installs the LSA if it is newer than the stored copy. Returns true
    /// when the database changed.
    pub fn install(&mut self, lsa: Lsa, now: Instant) -> bool {
        let key = lsa.key();
        if let Some(entry) = self.entries.get(&key)
            && !lsa.compare_newer(&entry.lsa)
        {
            return false;
        }
        self.entries.insert(
            key,
            LsaEntry {
                lsa,
                rcvd_time: now,
            },
        );
        true
    }

    pub fn get(&self, key: &LsaKey) -> Option<&LsaEntry> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LsaKey, &LsaEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Database summary with effective ages, as sent in Database
    /// Description packets.
    pub fn lsa_hdrs(&self, now: Instant) -> Vec<LsaHdr> {
        self.entries
            .values()
            .map(|entry| {
                let mut hdr = entry.lsa.hdr;
                hdr.age = entry.age(now);
                hdr
            })
            .collect()
    }

    /// The next sequence number for a self-originated LSA.
    pub fn next_seq_no(&self, key: &LsaKey) -> u32 {
        self.entries
            .get(key)
            .map(|entry| entry.lsa.hdr.seq_no + 1)
            .unwrap_or(crate::packet::lsa::LSA_INIT_SEQ_NO)
    }

    /// Removes LSAs that reached MaxAge and reports which self-originated
    /// ones must be refreshed.
    pub fn age_out(
        &mut self,
        router_id: Ipv4Addr,
        now: Instant,
    ) -> AgeOutResult {
        let mut result = AgeOutResult::default();

        self.entries.retain(|key, entry| {
            let age = entry.age(now);
            if key.adv_rtr == router_id {
                if age >= LSA_REFRESH_INTERVAL {
                    result.refresh.push(*key);
                }
                return true;
            }
            if age >= LSA_MAX_AGE {
                result.expired.push(*key);
                return false;
            }
            true
        });

        result
    }
}

#[derive(Debug, Default)]
pub struct AgeOutResult {
    pub expired: Vec<LsaKey>,
    pub refresh: Vec<LsaKey>,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::packet::lsa::{
        LSA_INIT_SEQ_NO, LsaBody, LsaNetwork,
    };

    fn lsa(seq_no: u32, age: u16) -> Lsa {
        Lsa::new(
            age,
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(2, 2, 2, 2),
            seq_no,
            LsaBody::Network(LsaNetwork {
                mask: Ipv4Addr::new(255, 255, 255, 0),
                attached_rtrs: vec![Ipv4Addr::new(1, 1, 1, 1)],
            }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn install_keeps_newest() {
        let mut lsdb = Lsdb::default();
        let now = Instant::now();

        assert!(lsdb.install(lsa(LSA_INIT_SEQ_NO, 1), now));
        assert!(!lsdb.install(lsa(LSA_INIT_SEQ_NO, 1), now));
        assert!(lsdb.install(lsa(LSA_INIT_SEQ_NO + 1, 1), now));
        assert_eq!(lsdb.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn aging_expires_foreign_lsas() {
        let mut lsdb = Lsdb::default();
        let now = Instant::now();
        let router_id = Ipv4Addr::new(1, 1, 1, 1);

        lsdb.install(lsa(LSA_INIT_SEQ_NO, 3000), now);
        let result =
            lsdb.age_out(router_id, now + Duration::from_secs(700));
        assert_eq!(result.expired.len(), 1);
        assert!(lsdb.is_empty());
    }
}
