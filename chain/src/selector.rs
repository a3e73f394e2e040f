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

//! Chain selection: the ordered set of candidate tips and the best
//! header seen so far. Answers "which known chain carries the most
//! work".

use crate::active::ActiveChain;
use crate::index::{BlockIndex, EntryId, VALID_TREE};
use crate::core::core::Hash;
use num_bigint::BigUint;
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Ordering key of a candidate tip: most work first, then greater
/// height, then lexicographically smaller hash as a deterministic tie
/// break. All key fields are written once at index insertion and never
/// mutated, so a key inside the set can never go stale; changing them
/// would require erasing and reinserting.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CandidateKey {
	work: BigUint,
	height: i32,
	hash: Hash,
	id: EntryId,
}

impl Ord for CandidateKey {
	fn cmp(&self, other: &CandidateKey) -> Ordering {
		// descending work, descending height, ascending hash
		other
			.work
			.cmp(&self.work)
			.then_with(|| other.height.cmp(&self.height))
			.then_with(|| self.hash.cmp(&other.hash))
	}
}

impl PartialOrd for CandidateKey {
	fn partial_cmp(&self, other: &CandidateKey) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

/// Maintains the competing chain tips and the best header ever seen.
///
/// Invariant: every member of the candidate set is a leaf of the index
/// (no known descendant) validated to at least tree level. When a new
/// entry extends a candidate, the parent leaves the set.
pub struct ChainSelector {
	candidates: BTreeSet<CandidateKey>,
	best_header: Option<EntryId>,
}

impl ChainSelector {
	/// A new selector with no candidates.
	pub fn new() -> ChainSelector {
		ChainSelector {
			candidates: BTreeSet::new(),
			best_header: None,
		}
	}

	fn key_of(index: &BlockIndex, id: EntryId) -> CandidateKey {
		let entry = index.entry(id);
		CandidateKey {
			work: entry.work().clone(),
			height: entry.height(),
			hash: *entry.hash(),
			id,
		}
	}

	/// Offers an entry to the candidate set. Accepted only if tree-valid
	/// and a leaf; its parent is evicted since it stopped being a tip.
	pub fn try_add(&mut self, index: &BlockIndex, id: EntryId) {
		let entry = index.entry(id);
		if !entry.status().is_valid(VALID_TREE) || entry.has_children() {
			return;
		}
		if let Some(prev) = entry.prev() {
			self.candidates.remove(&Self::key_of(index, prev));
		}
		self.candidates.insert(Self::key_of(index, id));
	}

	/// Inserts without leaf or validity checks. Used when rebuilding the
	/// set from a loaded index, where those properties were verified by
	/// the caller.
	pub fn add_unchecked(&mut self, index: &BlockIndex, id: EntryId) {
		self.candidates.insert(Self::key_of(index, id));
	}

	/// The candidate with the most work, skipping entries whose failure
	/// flags were raised after insertion (a race with invalidation).
	pub fn find_most_work(&self, index: &BlockIndex) -> Option<EntryId> {
		self.candidates
			.iter()
			.find(|key| !index.entry(key.id).status().failed())
			.map(|key| key.id)
	}

	/// Drops candidates that can no longer become the best tip: anything
	/// with less work than the active tip, the tip itself and its
	/// ancestors, and anything that stopped being a leaf.
	pub fn prune(&mut self, index: &BlockIndex, chain: &ActiveChain) {
		let tip = match chain.tip() {
			Some(tip) => tip,
			None => return,
		};
		let tip_work = index.entry(tip).work().clone();
		let stale: Vec<CandidateKey> = self
			.candidates
			.iter()
			.filter(|key| {
				key.work < tip_work
					|| chain.contains(index, key.id)
					|| index.entry(key.id).has_children()
			})
			.cloned()
			.collect();
		for key in stale {
			self.candidates.remove(&key);
		}
	}

	/// Empties the candidate set.
	pub fn clear(&mut self) {
		self.candidates.clear();
	}

	/// Number of candidates currently tracked.
	pub fn len(&self) -> usize {
		self.candidates.len()
	}

	/// Whether no candidate is tracked.
	pub fn is_empty(&self) -> bool {
		self.candidates.is_empty()
	}

	/// The header with the most cumulative work ever seen, on the active
	/// chain or not.
	pub fn best_header(&self) -> Option<EntryId> {
		self.best_header
	}

	/// Records the entry as best header if it beats the current one.
	pub fn update_best_header(&mut self, index: &BlockIndex, id: EntryId) {
		let better = match self.best_header {
			Some(best) => index.entry(id).work() > index.entry(best).work(),
			None => true,
		};
		if better {
			self.best_header = Some(id);
		}
	}

	/// Overwrites the best header (used on load).
	pub fn set_best_header(&mut self, id: Option<EntryId>) {
		self.best_header = id;
	}
}
