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

//! The active chain: a dense, height-indexed view over the block index
//! describing the currently selected best chain, from genesis to tip.

use crate::core::core::Hash;
use crate::index::{BlockIndex, EntryId};

/// Height-indexed sequence of entries on the currently active chain.
/// `at_height(h)` is O(1); membership checks compare the entry stored at
/// the candidate's own height.
pub struct ActiveChain {
	chain: Vec<Option<EntryId>>,
}

impl ActiveChain {
	/// An empty chain, no tip selected yet.
	pub fn new() -> ActiveChain {
		ActiveChain { chain: vec![] }
	}

	/// Entry at the genesis position, if any.
	pub fn genesis(&self) -> Option<EntryId> {
		self.chain.first().copied().flatten()
	}

	/// The tip of the chain, if any.
	pub fn tip(&self) -> Option<EntryId> {
		self.chain.last().copied().flatten()
	}

	/// Height of the tip, -1 when the chain is empty.
	pub fn height(&self) -> i32 {
		self.chain.len() as i32 - 1
	}

	/// Entry at the given height, or None when out of range.
	pub fn at_height(&self, height: i32) -> Option<EntryId> {
		if height < 0 || height as usize >= self.chain.len() {
			return None;
		}
		self.chain[height as usize]
	}

	/// Whether the given entry lies on the active chain. O(1): the slot
	/// at the entry's own height either is the entry or isn't.
	pub fn contains(&self, index: &BlockIndex, id: EntryId) -> bool {
		self.at_height(index.entry(id).height()) == Some(id)
	}

	/// The successor of an entry on this chain, or None if the entry is
	/// the tip or not on the chain at all.
	pub fn next(&self, index: &BlockIndex, id: EntryId) -> Option<EntryId> {
		if self.contains(index, id) {
			self.at_height(index.entry(id).height() + 1)
		} else {
			None
		}
	}

	/// Makes `tip` the new tip, rewriting the height vector by walking
	/// parent links backwards. Stops as soon as a slot already holds the
	/// right entry, so switching to a sibling branch only rewrites the
	/// part past the fork.
	pub fn set_tip(&mut self, index: &BlockIndex, tip: EntryId) {
		let new_len = (index.entry(tip).height() + 1) as usize;
		self.chain.resize(new_len, None);
		let mut walk = Some(tip);
		while let Some(id) = walk {
			let height = index.entry(id).height() as usize;
			if self.chain[height] == Some(id) {
				break;
			}
			self.chain[height] = Some(id);
			walk = index.entry(id).prev();
		}
	}

	/// Drops the whole chain.
	pub fn clear(&mut self) {
		self.chain.clear();
	}

	/// Finds the deepest entry shared by this chain and the ancestry of
	/// `id`. None when the two are genesis-disjoint, which callers must
	/// handle.
	pub fn find_fork(&self, index: &BlockIndex, id: Option<EntryId>) -> Option<EntryId> {
		let mut walk = id?;
		if index.entry(walk).height() > self.height() {
			walk = index.ancestor(walk, self.height())?;
		}
		loop {
			if self.contains(index, walk) {
				return Some(walk);
			}
			walk = index.entry(walk).prev()?;
		}
	}

	/// First entry on the chain with a chain-prefix max timestamp of at
	/// least `time` and a height of at least `height`. Binary search over
	/// the monotonic time-max field.
	pub fn find_earliest_at_least(
		&self,
		index: &BlockIndex,
		time: i64,
		height: i32,
	) -> Option<EntryId> {
		let at = self.chain.partition_point(|slot| match slot {
			Some(id) => {
				let entry = index.entry(*id);
				entry.time_max() < time || entry.height() < height
			}
			None => true,
		});
		if at >= self.chain.len() {
			None
		} else {
			self.chain[at]
		}
	}
}

/// Block locator for the given entry: the first 10 hashes step back one
/// block at a time, after which the step doubles, and the list always
/// terminates with the genesis hash. Used to let peers find the latest
/// common block efficiently.
pub fn locator_entries(index: &BlockIndex, from: Option<EntryId>) -> Vec<Hash> {
	let mut step = 1;
	let mut have = Vec::with_capacity(32);

	let mut walk = match from {
		Some(id) => id,
		None => return have,
	};
	loop {
		have.push(*index.entry(walk).hash());
		let height = index.entry(walk).height();
		if height == 0 {
			break;
		}
		// exponentially larger steps back, capped at the genesis block
		let next_height = (height - step).max(0);
		walk = match index.ancestor(walk, next_height) {
			Some(id) => id,
			None => break,
		};
		if have.len() > 10 {
			step *= 2;
		}
	}
	have
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::core::core::{BlockHeader, Hashed};

	fn build(len: usize) -> (BlockIndex, ActiveChain, Vec<EntryId>) {
		let genesis = BlockHeader {
			bits: 0x207f_ffff,
			time: 1000,
			..Default::default()
		};
		let mut index = BlockIndex::new();
		let mut ids = vec![index.initialize(&genesis).unwrap()];
		let mut prev = genesis.hash();
		for i in 1..len {
			let header = BlockHeader {
				prev_hash: prev,
				time: 1000 + i as u32 * 120,
				bits: 0x207f_ffff,
				nonce: i as u32,
				..Default::default()
			};
			prev = header.hash();
			ids.push(index.add(&header, 0).unwrap());
		}
		let mut chain = ActiveChain::new();
		chain.set_tip(&index, *ids.last().unwrap());
		(index, chain, ids)
	}

	#[test]
	fn dense_height_view() {
		let (index, chain, ids) = build(8);
		assert_eq!(chain.height(), 7);
		assert_eq!(chain.genesis(), Some(ids[0]));
		assert_eq!(chain.tip(), Some(ids[7]));
		for (h, id) in ids.iter().enumerate() {
			assert_eq!(chain.at_height(h as i32), Some(*id));
			assert!(chain.contains(&index, *id));
		}
		assert_eq!(chain.at_height(8), None);
		assert_eq!(chain.at_height(-1), None);
		assert_eq!(chain.next(&index, ids[3]), Some(ids[4]));
		assert_eq!(chain.next(&index, ids[7]), None);
	}

	#[test]
	fn set_tip_reuses_shared_prefix_on_fork() {
		let (mut index, mut chain, ids) = build(6);
		// sibling branch forking off height 3, two blocks long
		let mut prev = *index.entry(ids[3]).hash();
		let mut fork_ids = vec![];
		for i in 0..2 {
			let header = BlockHeader {
				prev_hash: prev,
				time: 9000 + i * 120,
				bits: 0x207f_ffff,
				nonce: 0xf00 + i,
				..Default::default()
			};
			prev = header.hash();
			fork_ids.push(index.add(&header, 0).unwrap());
		}
		chain.set_tip(&index, fork_ids[1]);
		assert_eq!(chain.height(), 5);
		assert_eq!(chain.at_height(3), Some(ids[3]));
		assert_eq!(chain.at_height(4), Some(fork_ids[0]));
		assert_eq!(chain.at_height(5), Some(fork_ids[1]));
		assert!(!chain.contains(&index, ids[4]));
		// shrinking back works too
		chain.set_tip(&index, ids[2]);
		assert_eq!(chain.height(), 2);
		assert_eq!(chain.tip(), Some(ids[2]));
	}

	#[test]
	fn find_fork_on_side_branch() {
		let (mut index, chain, ids) = build(6);
		let header = BlockHeader {
			prev_hash: *index.entry(ids[2]).hash(),
			time: 9999,
			bits: 0x207f_ffff,
			nonce: 0xabc,
			..Default::default()
		};
		let side = index.add(&header, 0).unwrap();
		assert_eq!(chain.find_fork(&index, Some(side)), Some(ids[2]));
		assert_eq!(chain.find_fork(&index, Some(ids[5])), Some(ids[5]));
		assert_eq!(chain.find_fork(&index, None), None);
	}

	#[test]
	fn locator_spacing() {
		let (index, chain, ids) = build(101);
		let locator = locator_entries(&index, chain.tip());
		// first 10 steps of one, then doubling, genesis last
		let heights: Vec<i32> = locator
			.iter()
			.map(|h| index.entry(index.lookup(h).unwrap()).height())
			.collect();
		assert_eq!(
			heights,
			vec![100, 99, 98, 97, 96, 95, 94, 93, 92, 91, 90, 89, 87, 83, 75, 59, 27, 0]
		);
		assert_eq!(*locator.last().unwrap(), *index.entry(ids[0]).hash());
		assert!(locator_entries(&index, None).is_empty());
	}

	#[test]
	fn earliest_at_least_binary_search() {
		let (index, chain, ids) = build(50);
		// times are 1000 + h*120
		let found = chain.find_earliest_at_least(&index, 1000 + 10 * 120, 0);
		assert_eq!(found, Some(ids[10]));
		// height constraint dominates when later
		let found = chain.find_earliest_at_least(&index, 1000, 20);
		assert_eq!(found, Some(ids[20]));
		// past the tip: nothing
		assert_eq!(chain.find_earliest_at_least(&index, i64::MAX, 0), None);
	}
}
