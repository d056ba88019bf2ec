//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;

use tokio::time::Instant;

use crate::packet::pdu::{Lsp, LspEntry};
use crate::packet::{LevelNumber, LspId, SystemId};

// Per-level link-state PDU databases.
#[derive(Debug, Default)]
pub struct Lsdb {
    l1: BTreeMap<LspId, LsdbEntry>,
    l2: BTreeMap<LspId, LsdbEntry>,
}

// Stored LSP. The remaining lifetime counts down from the moment of
// reception.
#[derive(Debug)]
pub struct LsdbEntry {
    pub lsp: Lsp,
    pub rcvd_time: Instant,
}

// ===== impl LsdbEntry =====

impl LsdbEntry {
    /// Effective remaining lifetime of the stored LSP.
    pub fn rem_lifetime(&self, now: Instant) -> u16 {
        let elapsed = (now - self.rcvd_time).as_secs().min(u16::MAX as u64);
        self.lsp.rem_lifetime.saturating_sub(elapsed as u16)
    }
}

// ===== impl Lsdb =====

impl Lsdb {
    fn level(&self, level: LevelNumber) -> &BTreeMap<LspId, LsdbEntry> {
        match level {
            LevelNumber::L1 => &self.l1,
            LevelNumber::L2 => &self.l2,
        }
    }

    fn level_mut(
        &mut self,
        level: LevelNumber,
    ) -> &mut BTreeMap<LspId, LsdbEntry> {
        match level {
            LevelNumber::L1 => &mut self.l1,
            LevelNumber::L2 => &mut self.l2,
        }
    }

    /// Installs the LSP if it is newer than the stored copy. Returns true
    /// when the database changed.
    pub fn install(&mut self, lsp: Lsp, now: Instant) -> bool {
        let db = self.level_mut(lsp.level);
        if let Some(entry) = db.get(&lsp.lsp_id) {
            let stored_newer = entry.lsp.seq_no >= lsp.seq_no
                && !(lsp.rem_lifetime == 0
                    && entry.rem_lifetime(now) != 0
                    && entry.lsp.seq_no == lsp.seq_no);
            if stored_newer {
                return false;
            }
        }
        db.insert(
            lsp.lsp_id,
            LsdbEntry {
                lsp,
                rcvd_time: now,
            },
        );
        true
    }

    pub fn get(
        &self,
        level: LevelNumber,
        lsp_id: &LspId,
    ) -> Option<&LsdbEntry> {
        self.level(level).get(lsp_id)
    }

    pub fn iter(
        &self,
        level: LevelNumber,
    ) -> impl Iterator<Item = (&LspId, &LsdbEntry)> {
        self.level(level).iter()
    }

    pub fn len(&self) -> usize {
        self.l1.len() + self.l2.len()
    }

    pub fn is_empty(&self) -> bool {
        self.l1.is_empty() && self.l2.is_empty()
    }

    /// Database summary for a CSNP.
    pub fn lsp_entries(
        &self,
        level: LevelNumber,
        now: Instant,
    ) -> Vec<LspEntry> {
        self.level(level)
            .values()
            .map(|entry| LspEntry {
                rem_lifetime: entry.rem_lifetime(now),
                lsp_id: entry.lsp.lsp_id,
                seq_no: entry.lsp.seq_no,
                cksum: entry.lsp.cksum,
            })
            .collect()
    }

    /// The next sequence number for a self-originated LSP.
    pub fn next_seq_no(&self, level: LevelNumber, lsp_id: &LspId) -> u32 {
        self.level(level)
            .get(lsp_id)
            .map(|entry| entry.lsp.seq_no + 1)
            .unwrap_or(1)
    }

    /// Removes expired LSPs and reports which self-originated ones must be
    /// refreshed. Returns true when any foreign LSP expired.
    pub fn age_out(
        &mut self,
        system_id: SystemId,
        now: Instant,
        refresh: &mut Vec<LevelNumber>,
    ) -> bool {
        let mut expired = false;
        for level in [LevelNumber::L1, LevelNumber::L2] {
            let db = self.level_mut(level);
            let mut needs_refresh = false;
            db.retain(|lsp_id, entry| {
                let rem = entry.rem_lifetime(now);
                if lsp_id.system_id == system_id {
                    if rem < crate::packet::pdu::LSP_MAX_LIFETIME
                        - crate::packet::pdu::LSP_REFRESH_INTERVAL
                    {
                        needs_refresh = true;
                    }
                    return true;
                }
                if rem == 0 {
                    expired = true;
                    return false;
                }
                true
            });
            if needs_refresh {
                refresh.push(level);
            }
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::packet::pdu::{LSP_MAX_LIFETIME, LspTlvs};

    fn lsp(seq_no: u32, rem_lifetime: u16) -> Lsp {
        Lsp::new(
            LevelNumber::L1,
            rem_lifetime,
            LspId::from(SystemId::new([0, 0, 0, 0, 0, 2])),
            seq_no,
            0x01,
            LspTlvs::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn install_keeps_newest() {
        let mut lsdb = Lsdb::default();
        let now = Instant::now();

        assert!(lsdb.install(lsp(1, LSP_MAX_LIFETIME), now));
        assert!(!lsdb.install(lsp(1, LSP_MAX_LIFETIME), now));
        assert!(lsdb.install(lsp(2, LSP_MAX_LIFETIME), now));
        assert_eq!(lsdb.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_foreign_lsps_are_purged() {
        let mut lsdb = Lsdb::default();
        let now = Instant::now();
        let me = SystemId::new([0, 0, 0, 0, 0, 1]);

        lsdb.install(lsp(1, 100), now);
        let mut refresh = vec![];
        let expired = lsdb.age_out(
            me,
            now + Duration::from_secs(101),
            &mut refresh,
        );
        assert!(expired);
        assert!(lsdb.is_empty());
    }
}
