// Copyright 2024 The Ember Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Header synchronization against untrusted peers: the cheap batch
//! pre-filter in front of the chain's acceptance pipeline, and the
//! per-peer misbehavior accounting that backs it.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;

use ember_chain as chain;
use ember_core as core;
use ember_util as util;

pub mod headers;
pub mod peers;

pub use crate::headers::{HeaderSync, SyncState};
pub use crate::peers::{PeerManager, Permissions, DISCOURAGEMENT_THRESHOLD};
