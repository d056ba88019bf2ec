//
// Copyright (c) The Mimic Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod adjacency;
pub mod error;
pub mod events;
pub mod instance;
pub mod lsdb;
pub mod packet;
pub mod spf;
pub mod tasks;
