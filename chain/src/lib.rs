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

//! The ember chain: an in-memory tree of every known block header, the
//! height-indexed active chain, candidate tip selection and the header
//! acceptance pipeline, behind a single thread-safe facade.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![warn(missing_docs)]

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;

use ember_core as core;
use ember_util as util;

pub mod active;
pub mod chain;
pub mod error;
pub mod index;
pub mod orphans;
pub mod pipe;
pub mod selector;
pub mod store;
pub mod types;

pub use crate::chain::Chain;
pub use crate::error::{Error, ErrorKind};
pub use crate::index::{BlockIndex, EntryId, Status, VALID_HEADER, VALID_TREE, VALID_UNKNOWN};
pub use crate::types::{ChainAdapter, NoopAdapter, PeerId, SystemTimeSource, TimeSource, LOCAL_PEER};
