//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod error;
pub mod events;
pub mod instance;
pub mod interface;
pub mod lsdb;
pub mod neighbor;
pub mod packet;
pub mod spf;
pub mod tasks;
