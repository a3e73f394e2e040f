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

//! Pool of orphan headers: headers whose parent is not yet known. When
//! the parent arrives the orphans are resolved through the acceptance
//! pipeline again. Bounded globally and per peer, with time-based
//! eviction, so hostile peers cannot grow it without limit.

use crate::core::core::{BlockHeader, Hash, Hashed};
use crate::types::PeerId;
use std::collections::HashMap;

/// Total orphans kept across all peers.
pub const MAX_ORPHAN_HEADERS: usize = 1000;
/// Orphans any single peer may have in the pool.
pub const MAX_ORPHAN_HEADERS_PER_PEER: usize = 50;
/// Seconds after which an orphan becomes evictable.
pub const ORPHAN_EXPIRE_SECS: i64 = 600;

struct Orphan {
	header: BlockHeader,
	received: i64,
	peer: PeerId,
}

/// The orphan pool, indexed by header hash with a per-peer counter for
/// quota enforcement.
pub struct OrphanPool {
	orphans: HashMap<Hash, Orphan>,
	peer_counts: HashMap<PeerId, usize>,
}

impl OrphanPool {
	/// An empty pool.
	pub fn new() -> OrphanPool {
		OrphanPool {
			orphans: HashMap::new(),
			peer_counts: HashMap::new(),
		}
	}

	/// Number of orphans currently cached.
	pub fn len(&self) -> usize {
		self.orphans.len()
	}

	/// Whether the pool is empty.
	pub fn is_empty(&self) -> bool {
		self.orphans.is_empty()
	}

	/// Whether the pool holds this header already.
	pub fn contains(&self, hash: &Hash) -> bool {
		self.orphans.contains_key(hash)
	}

	/// Orphans currently attributed to the given peer.
	pub fn peer_count(&self, peer: PeerId) -> usize {
		self.peer_counts.get(&peer).copied().unwrap_or(0)
	}

	/// Tries to cache a header whose parent is missing. Idempotent on
	/// resubmission. Refuses when the peer is over quota, or when the
	/// pool is full and eviction frees nothing.
	pub fn try_add(&mut self, header: BlockHeader, peer: PeerId, now: i64) -> bool {
		let hash = header.hash();
		if self.orphans.contains_key(&hash) {
			return true;
		}
		if self.peer_count(peer) >= MAX_ORPHAN_HEADERS_PER_PEER {
			warn!(
				"orphans: peer {} over quota ({}), rejecting {}",
				peer,
				MAX_ORPHAN_HEADERS_PER_PEER,
				hash
			);
			return false;
		}
		if self.orphans.len() >= MAX_ORPHAN_HEADERS {
			debug!("orphans: pool full, evicting before insert");
			if self.evict(now) == 0 {
				return false;
			}
		}
		self.orphans.insert(
			hash,
			Orphan {
				header,
				received: now,
				peer,
			},
		);
		*self.peer_counts.entry(peer).or_insert(0) += 1;
		true
	}

	/// Evicts every orphan older than [`ORPHAN_EXPIRE_SECS`]. If nothing
	/// expired and the pool sits at capacity, the single oldest orphan is
	/// evicted instead. Returns the number removed.
	pub fn evict(&mut self, now: i64) -> usize {
		let expired: Vec<Hash> = self
			.orphans
			.iter()
			.filter(|(_, o)| now - o.received > ORPHAN_EXPIRE_SECS)
			.map(|(hash, _)| *hash)
			.collect();
		let mut evicted = 0;
		for hash in expired {
			self.remove(&hash);
			evicted += 1;
		}

		if evicted == 0 && self.orphans.len() >= MAX_ORPHAN_HEADERS {
			let oldest = self
				.orphans
				.iter()
				.min_by_key(|(_, o)| o.received)
				.map(|(hash, _)| *hash);
			if let Some(hash) = oldest {
				self.remove(&hash);
				evicted += 1;
			}
		}

		if evicted > 0 {
			debug!(
				"orphans: evicted {}, pool size now {}",
				evicted,
				self.orphans.len()
			);
		}
		evicted
	}

	/// Removes and returns all orphans waiting on the given parent. The
	/// headers are moved out of the pool before the caller re-enters the
	/// acceptance pipeline with them, so no entry is ever read after its
	/// slot was erased.
	pub fn take_children(&mut self, parent: &Hash) -> Vec<(Hash, BlockHeader, PeerId)> {
		let hashes: Vec<Hash> = self
			.orphans
			.iter()
			.filter(|(_, o)| o.header.prev_hash == *parent)
			.map(|(hash, _)| *hash)
			.collect();
		hashes
			.into_iter()
			.filter_map(|hash| {
				self.remove(&hash)
					.map(|orphan| (hash, orphan.header, orphan.peer))
			})
			.collect()
	}

	fn remove(&mut self, hash: &Hash) -> Option<Orphan> {
		let orphan = self.orphans.remove(hash)?;
		if let Some(count) = self.peer_counts.get_mut(&orphan.peer) {
			*count -= 1;
			if *count == 0 {
				self.peer_counts.remove(&orphan.peer);
			}
		}
		Some(orphan)
	}
}
