//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod debug;
pub mod error;
pub mod events;
pub mod instance;
pub mod neighbor;
pub mod packet;
pub mod policy;
pub mod rib;
pub mod tasks;
