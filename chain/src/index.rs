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

//! The block index: an append-only arena of metadata for every header
//! ever accepted, including failed headers and off-chain forks.
//!
//! Entries are addressed by [`EntryId`] handles into the arena; slots are
//! never reused, so a handle obtained once stays valid for the life of
//! the index. Parent and skip links are handles into the same arena,
//! which rules out the dangling-pointer hazards of a node-based map.

use crate::core::consensus;
use crate::core::core::{Address, BlockHeader, Hash, Hashed, ZERO_HASH};
use crate::error::{Error, ErrorKind};
use num_bigint::BigUint;
use std::collections::HashMap;
use std::fmt;

/// Unused/unknown validity.
pub const VALID_UNKNOWN: u32 = 0;
/// Parsed, valid PoW, valid difficulty and timestamp.
pub const VALID_HEADER: u32 = 1;
/// All parents found and at least tree-valid themselves. The highest
/// validity level for a headers-only chain.
pub const VALID_TREE: u32 = 2;

// Validity levels live in the low status byte and are compared as
// ordinals; failure flags are bits above it. Both kinds must go through
// the Status accessors so the split stays uniform.
const LEVEL_MASK: u32 = 0xff;

bitflags! {
	/// Failure flags of a block status word.
	pub struct FailFlags: u32 {
		/// The header itself failed validation.
		const FAILED_VALID = 1 << 8;
		/// Descends from a header that failed validation.
		const FAILED_CHILD = 1 << 9;
	}
}

/// Validation status of one index entry: an ordinal validity level plus
/// independent failure flags. Any failure flag set means the entry is not
/// valid at any level.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Status(u32);

impl Status {
	/// Fresh status: unknown validity, no failure.
	pub fn unknown() -> Status {
		Status(VALID_UNKNOWN)
	}

	/// Rebuild a status from its raw persisted word.
	pub fn from_raw(raw: u32) -> Status {
		Status(raw)
	}

	/// The raw word, for persistence.
	pub fn raw(&self) -> u32 {
		self.0
	}

	/// The ordinal validity level.
	pub fn level(&self) -> u32 {
		self.0 & LEVEL_MASK
	}

	/// Whether any failure flag is set.
	pub fn failed(&self) -> bool {
		self.0 & FailFlags::all().bits() != 0
	}

	/// The failure flags currently set.
	pub fn fail_flags(&self) -> FailFlags {
		FailFlags::from_bits_truncate(self.0)
	}

	/// Whether the entry reached `up_to` validity and carries no failure
	/// flag.
	pub fn is_valid(&self, up_to: u32) -> bool {
		debug_assert!(up_to <= VALID_TREE);
		!self.failed() && self.level() >= up_to
	}

	/// Raise the validity level, returns true if it changed. A failed
	/// status never changes level.
	pub fn raise(&mut self, up_to: u32) -> bool {
		debug_assert!(up_to <= VALID_TREE);
		if self.failed() {
			return false;
		}
		if self.level() < up_to {
			self.0 = (self.0 & !LEVEL_MASK) | up_to;
			true
		} else {
			false
		}
	}

	/// Set a failure flag.
	pub fn set_failed(&mut self, flag: FailFlags) {
		self.0 |= flag.bits();
	}
}

impl fmt::Debug for Status {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Status({:#x})", self.0)
	}
}

/// Stable handle to an entry in the block index. Cheap to copy, valid for
/// the life of the index.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u32);

impl EntryId {
	fn idx(self) -> usize {
		self.0 as usize
	}
}

impl fmt::Debug for EntryId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "EntryId({})", self.0)
	}
}

/// Metadata for a single block header. Owned by the index arena and only
/// ever handed out by reference; height, work and hash are set once at
/// insertion and never mutated afterwards (the candidate set orders by
/// them).
pub struct BlockEntry {
	pub(crate) hash: Hash,
	pub(crate) prev: Option<EntryId>,
	pub(crate) skip: Option<EntryId>,
	pub(crate) height: i32,
	pub(crate) work: BigUint,
	pub(crate) status: Status,
	pub(crate) child_count: u32,

	// header fields stored inline for self-describing reconstruction
	pub(crate) version: i32,
	pub(crate) miner_address: Address,
	pub(crate) time: u32,
	pub(crate) bits: u32,
	pub(crate) nonce: u32,
	pub(crate) randomx_hash: Hash,

	// when we first learned about this block, for orphan/relay decisions
	pub(crate) time_received: i64,
	// monotonic maximum of time over the chain prefix, for time-based
	// binary search on the active chain
	pub(crate) time_max: i64,
}

impl BlockEntry {
	/// Hash of the header this entry describes.
	pub fn hash(&self) -> &Hash {
		&self.hash
	}
	/// Handle of the parent entry, None only for genesis.
	pub fn prev(&self) -> Option<EntryId> {
		self.prev
	}
	/// Height in the tree, genesis is 0.
	pub fn height(&self) -> i32 {
		self.height
	}
	/// Cumulative work up to and including this block.
	pub fn work(&self) -> &BigUint {
		&self.work
	}
	/// Validation status.
	pub fn status(&self) -> Status {
		self.status
	}
	/// Header timestamp.
	pub fn time(&self) -> u32 {
		self.time
	}
	/// Compact difficulty target of the header.
	pub fn bits(&self) -> u32 {
		self.bits
	}
	/// When this header was first received.
	pub fn time_received(&self) -> i64 {
		self.time_received
	}
	/// Monotonic maximum timestamp along the chain prefix.
	pub fn time_max(&self) -> i64 {
		self.time_max
	}
	/// Whether any other entry names this one as parent.
	pub fn has_children(&self) -> bool {
		self.child_count > 0
	}
}

impl fmt::Debug for BlockEntry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"BlockEntry(hash={:?}, height={}, work={:#x}, status={:?}, time={})",
			self.hash, self.height, self.work, self.status, self.time
		)
	}
}

/// The block index. Owns every entry for the life of the chain; entries
/// are appended, never removed or moved.
pub struct BlockIndex {
	entries: Vec<BlockEntry>,
	by_hash: HashMap<Hash, EntryId>,
}

impl BlockIndex {
	/// A new, empty index. `initialize` must install genesis before
	/// anything can be added.
	pub fn new() -> BlockIndex {
		BlockIndex {
			entries: vec![],
			by_hash: HashMap::new(),
		}
	}

	/// Installs the genesis header as the first entry. Fails if the index
	/// already holds anything.
	pub fn initialize(&mut self, genesis: &BlockHeader) -> Result<EntryId, Error> {
		if !self.entries.is_empty() {
			return Err(ErrorKind::Other("index already initialized".to_owned()).into());
		}
		let hash = genesis.hash();
		let entry = BlockEntry {
			hash,
			prev: None,
			skip: None,
			height: 0,
			work: consensus::block_proof(genesis.bits),
			status: Status::unknown(),
			child_count: 0,
			version: genesis.version,
			miner_address: genesis.miner_address,
			time: genesis.time,
			bits: genesis.bits,
			nonce: genesis.nonce,
			randomx_hash: genesis.randomx_hash,
			time_received: 0,
			time_max: i64::from(genesis.time),
		};
		let id = EntryId(0);
		self.entries.push(entry);
		self.by_hash.insert(hash, id);
		Ok(id)
	}

	/// Adds a header to the index. Idempotent: a duplicate returns the
	/// existing handle. The parent must already be present.
	pub fn add(&mut self, header: &BlockHeader, time_received: i64) -> Result<EntryId, Error> {
		let hash = header.hash();
		if let Some(id) = self.by_hash.get(&hash) {
			return Ok(*id);
		}
		let prev_id = self
			.lookup(&header.prev_hash)
			.ok_or_else(|| ErrorKind::Other("parent not in index".to_owned()))?;

		let (height, work, time_max) = {
			let prev = self.entry(prev_id);
			(
				prev.height + 1,
				&prev.work + consensus::block_proof(header.bits),
				prev.time_max.max(i64::from(header.time)),
			)
		};
		let skip = self.ancestor(prev_id, get_skip_height(height));

		let id = EntryId(self.entries.len() as u32);
		self.entries.push(BlockEntry {
			hash,
			prev: Some(prev_id),
			skip,
			height,
			work,
			status: Status::unknown(),
			child_count: 0,
			version: header.version,
			miner_address: header.miner_address,
			time: header.time,
			bits: header.bits,
			nonce: header.nonce,
			randomx_hash: header.randomx_hash,
			time_received,
			time_max,
		});
		self.by_hash.insert(hash, id);
		self.entries[prev_id.idx()].child_count += 1;
		Ok(id)
	}

	/// Look an entry up by header hash.
	pub fn lookup(&self, hash: &Hash) -> Option<EntryId> {
		self.by_hash.get(hash).copied()
	}

	/// The entry behind a handle.
	pub fn entry(&self, id: EntryId) -> &BlockEntry {
		&self.entries[id.idx()]
	}

	pub(crate) fn entry_mut(&mut self, id: EntryId) -> &mut BlockEntry {
		&mut self.entries[id.idx()]
	}

	/// Number of entries in the index.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Whether the index is still uninitialized.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// All entry handles, in insertion order (parents before children).
	pub fn ids(&self) -> impl Iterator<Item = EntryId> {
		(0..self.entries.len() as u32).map(EntryId)
	}

	/// Reconstructs the full header of an entry. Self-contained: the
	/// result stays meaningful independently of the index.
	pub fn header(&self, id: EntryId) -> BlockHeader {
		let entry = self.entry(id);
		BlockHeader {
			version: entry.version,
			prev_hash: match entry.prev {
				Some(prev) => self.entry(prev).hash,
				None => ZERO_HASH,
			},
			miner_address: entry.miner_address,
			time: entry.time,
			bits: entry.bits,
			nonce: entry.nonce,
			randomx_hash: entry.randomx_hash,
		}
	}

	/// The ancestor of `id` at `height`, or None if `height` is out of
	/// range. O(log n) through the skip links.
	pub fn ancestor(&self, id: EntryId, height: i32) -> Option<EntryId> {
		let mut walk = id;
		if height > self.entry(walk).height || height < 0 {
			return None;
		}
		while self.entry(walk).height > height {
			let entry = self.entry(walk);
			walk = match entry.skip {
				Some(skip) if self.entry(skip).height >= height => skip,
				_ => entry.prev?,
			};
		}
		Some(walk)
	}

	/// Median timestamp over the last [`consensus::MEDIAN_TIME_SPAN`]
	/// blocks ending at `id`. The lower bound for a child's timestamp.
	pub fn median_time_past(&self, id: EntryId) -> i64 {
		let mut times = Vec::with_capacity(consensus::MEDIAN_TIME_SPAN);
		let mut walk = Some(id);
		for _ in 0..consensus::MEDIAN_TIME_SPAN {
			match walk {
				Some(w) => {
					let entry = self.entry(w);
					times.push(i64::from(entry.time));
					walk = entry.prev;
				}
				None => break,
			}
		}
		times.sort_unstable();
		times[times.len() / 2]
	}

	/// Deepest entry on both ancestor paths, or None when either side is
	/// None or the trees are disjoint. All valid chains share genesis, so
	/// a None result for two in-tree entries means corrupted or hostile
	/// data and callers must handle it.
	pub fn last_common_ancestor(
		&self,
		a: Option<EntryId>,
		b: Option<EntryId>,
	) -> Option<EntryId> {
		let mut a = a?;
		let mut b = b?;
		if self.entry(a).height > self.entry(b).height {
			a = self.ancestor(a, self.entry(b).height)?;
		} else if self.entry(b).height > self.entry(a).height {
			b = self.ancestor(b, self.entry(a).height)?;
		}
		while a != b {
			a = self.entry(a).prev?;
			b = self.entry(b).prev?;
		}
		Some(a)
	}
}

// Turn the lowest '1' bit in the binary representation of a number into
// a '0'.
fn invert_lowest_one(n: i32) -> i32 {
	n & (n - 1)
}

/// Deterministic height the skip link of a block at `height` points to.
/// Repeated skipping from any starting height reaches 0 in O(log n)
/// hops.
pub(crate) fn get_skip_height(height: i32) -> i32 {
	if height < 2 {
		return 0;
	}
	// Determine which height to jump back to. Any number strictly lower
	// than height is acceptable, but the following expression seems to
	// perform well in simulations (max 110 steps to go back up to
	// 2**18 blocks).
	if height & 1 == 1 {
		invert_lowest_one(invert_lowest_one(height - 1)) + 1
	} else {
		invert_lowest_one(height)
	}
}
