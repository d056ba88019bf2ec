//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod error;
pub mod pdu;

use std::str::FromStr;

use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

// IS-IS system ID.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct SystemId([u8; 6]);

// IS-IS LAN ID: system ID plus pseudonode number.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct LanId {
    pub system_id: SystemId,
    pub pseudonode: u8,
}

// IS-IS LSP ID: LAN ID plus fragment number.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct LspId {
    pub system_id: SystemId,
    pub pseudonode: u8,
    pub fragment: u8,
}

// Area address (variable length, up to 13 octets).
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct AreaAddr(pub Vec<u8>);

// IS-IS levels.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum LevelNumber {
    L1 = 1,
    L2 = 2,
}

// Level capability.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LevelType {
    L1,
    L2,
    #[default]
    All,
}

// ===== impl SystemId =====

impl SystemId {
    pub const LENGTH: usize = 6;

    pub fn new(bytes: [u8; 6]) -> SystemId {
        SystemId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl FromStr for SystemId {
    type Err = ();

    // Parses the dotted form, e.g. "0000.0000.0001".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let groups = s.split('.').collect::<Vec<_>>();
        if groups.len() != 3 {
            return Err(());
        }
        let mut bytes = [0; 6];
        for (idx, group) in groups.iter().enumerate() {
            if group.len() != 4 {
                return Err(());
            }
            let value = u16::from_str_radix(group, 16).map_err(|_| ())?;
            bytes[idx * 2..idx * 2 + 2]
                .copy_from_slice(&value.to_be_bytes());
        }
        Ok(SystemId(bytes))
    }
}

impl std::fmt::Display for SystemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02x}{:02x}.{:02x}{:02x}.{:02x}{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

// ===== impl LanId =====

impl LanId {
    pub const LENGTH: usize = 7;
}

impl From<SystemId> for LanId {
    fn from(system_id: SystemId) -> LanId {
        LanId {
            system_id,
            pseudonode: 0,
        }
    }
}

impl std::fmt::Display for LanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02x}", self.system_id, self.pseudonode)
    }
}

// ===== impl LspId =====

impl LspId {
    pub const LENGTH: usize = 8;
}

impl From<SystemId> for LspId {
    fn from(system_id: SystemId) -> LspId {
        LspId {
            system_id,
            pseudonode: 0,
            fragment: 0,
        }
    }
}

impl std::fmt::Display for LspId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{:02x}-{:02x}",
            self.system_id, self.pseudonode, self.fragment
        )
    }
}

// ===== impl AreaAddr =====

impl FromStr for AreaAddr {
    type Err = ();

    // Parses the dotted form, e.g. "49.0001".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = vec![];
        for group in s.split('.') {
            if group.is_empty() || group.len() % 2 != 0 {
                return Err(());
            }
            for chunk in 0..group.len() / 2 {
                let byte = &group[chunk * 2..chunk * 2 + 2];
                bytes.push(u8::from_str_radix(byte, 16).map_err(|_| ())?);
            }
        }
        if bytes.is_empty() || bytes.len() > 13 {
            return Err(());
        }
        Ok(AreaAddr(bytes))
    }
}

// ===== impl LevelType =====

impl LevelType {
    pub fn levels(&self) -> &'static [LevelNumber] {
        match self {
            LevelType::L1 => &[LevelNumber::L1],
            LevelType::L2 => &[LevelNumber::L2],
            LevelType::All => &[LevelNumber::L1, LevelNumber::L2],
        }
    }

    pub fn intersects(&self, level: LevelNumber) -> bool {
        self.levels().contains(&level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_id_parse_and_display() {
        let id: SystemId = "1921.6800.1001".parse().unwrap();
        assert_eq!(
            id.as_bytes(),
            &[0x19, 0x21, 0x68, 0x00, 0x10, 0x01]
        );
        assert_eq!(id.to_string(), "1921.6800.1001");
        assert!("1921.6800".parse::<SystemId>().is_err());
        assert!("xxxx.yyyy.zzzz".parse::<SystemId>().is_err());
    }

    #[test]
    fn area_addr_parse() {
        let area: AreaAddr = "49.0001".parse().unwrap();
        assert_eq!(area.0, vec![0x49, 0x00, 0x01]);
        assert!("".parse::<AreaAddr>().is_err());
    }
}
