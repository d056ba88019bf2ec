//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

// Egress scheduling classes, lowest priority first.
//
// The enum discriminant is the class index used by the weighted-fair and
// strict-priority schedulers; ties are broken in favor of the higher index.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum QosClass {
    BestEffort,
    Background,
    Bulk,
    Video,
    Voice,
    NetworkControl,
    InternetworkControl,
    Critical,
}

// ===== impl QosClass =====

impl QosClass {
    /// Number of scheduling classes.
    pub const COUNT: usize = 8;

    /// All classes, lowest priority first.
    pub const ALL: [QosClass; Self::COUNT] = [
        QosClass::BestEffort,
        QosClass::Background,
        QosClass::Bulk,
        QosClass::Video,
        QosClass::Voice,
        QosClass::NetworkControl,
        QosClass::InternetworkControl,
        QosClass::Critical,
    ];

    /// Maps a 6-bit DSCP value to a scheduling class.
    ///
    /// The three precedence bits index the classes directly, so CS0..CS7
    /// select BestEffort..Critical.
    pub fn from_dscp(dscp: u8) -> QosClass {
        QosClass::from_u8((dscp >> 3) & 0x07).unwrap()
    }

    /// Class index (0 = lowest priority).
    pub const fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for QosClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QosClass::BestEffort => write!(f, "best-effort"),
            QosClass::Background => write!(f, "background"),
            QosClass::Bulk => write!(f, "bulk"),
            QosClass::Video => write!(f, "video"),
            QosClass::Voice => write!(f, "voice"),
            QosClass::NetworkControl => write!(f, "network-control"),
            QosClass::InternetworkControl => write!(f, "internetwork-control"),
            QosClass::Critical => write!(f, "critical"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dscp_precedence_mapping() {
        assert_eq!(QosClass::from_dscp(0), QosClass::BestEffort);
        // CS1.
        assert_eq!(QosClass::from_dscp(8), QosClass::Background);
        // AF11.
        assert_eq!(QosClass::from_dscp(10), QosClass::Background);
        // CS4.
        assert_eq!(QosClass::from_dscp(32), QosClass::Voice);
        // CS6.
        assert_eq!(QosClass::from_dscp(48), QosClass::InternetworkControl);
        // CS7.
        assert_eq!(QosClass::from_dscp(56), QosClass::Critical);
    }

    #[test]
    fn class_ordering() {
        assert!(QosClass::Critical > QosClass::Voice);
        assert!(QosClass::Voice > QosClass::BestEffort);
        assert_eq!(QosClass::ALL.len(), QosClass::COUNT);
    }
}
