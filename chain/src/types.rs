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

//! Base types for the chain facade: the observer interface, queued
//! notifications and the injected time source.

use crate::core::core::BlockHeader;
use crate::index::EntryId;
use chrono::Utc;

/// Identifier of the peer a header came from, assigned by the transport
/// layer.
pub type PeerId = i64;

/// Peer id used for locally produced headers (miner, RPC).
pub const LOCAL_PEER: PeerId = -1;

/// Bridge between the chain and the outside world. Handlers run after
/// the chain lock has been released, in the order the events were
/// produced: all disconnects of a reorg precede all connects, followed
/// by exactly one chain-tip event.
pub trait ChainAdapter: Send + Sync {
	/// A block was connected to the active chain. The chain tip already
	/// reflects the connected block when the event was produced.
	fn block_connected(&self, header: &BlockHeader, id: EntryId) {
		let _ = (header, id);
	}

	/// A block is leaving the active chain. The event was produced while
	/// the block was still the tip.
	fn block_disconnected(&self, header: &BlockHeader, id: EntryId) {
		let _ = (header, id);
	}

	/// The active chain settled on a new tip.
	fn chain_tip(&self, id: EntryId, height: i32) {
		let _ = (id, height);
	}

	/// A reorganization at least as deep as the local policy limit was
	/// refused. Typically a reason to alert the operator or shut down.
	fn suspicious_reorg(&self, depth: i32, max_allowed: i32) {
		let _ = (depth, max_allowed);
	}
}

/// Implementation of the ChainAdapter for the chain that doesn't do
/// anything.
pub struct NoopAdapter {}

impl ChainAdapter for NoopAdapter {}

/// A notification queued while the chain lock is held, dispatched FIFO
/// once it has been released.
pub(crate) enum Notification {
	Connected(BlockHeader, EntryId),
	Disconnected(BlockHeader, EntryId),
	ChainTip(EntryId, i32),
	SuspiciousReorg { depth: i32, max_allowed: i32 },
}

/// Clock the chain consumes. Adjusted time is network time as seen by
/// the transport collaborator (system time plus a capped median of peer
/// offsets); the chain itself never derives it.
pub trait TimeSource: Send + Sync {
	/// Raw system clock, seconds since the epoch.
	fn now(&self) -> i64;

	/// Network-adjusted clock. Defaults to the raw clock for time
	/// sources that track no peer offsets.
	fn adjusted_time(&self) -> i64 {
		self.now()
	}
}

/// System clock with no network adjustment.
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
	fn now(&self) -> i64 {
		Utc::now().timestamp()
	}
}
