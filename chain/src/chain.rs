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

//! Facade and handler for the rest of the blockchain implementation and
//! mostly the header acceptance pipeline.
//!
//! All mutable chain state lives behind one mutex. Public entry points
//! lock it, run, queue any notifications, and dispatch them in FIFO
//! order only after the lock has been released, so subscriber handlers
//! can call back into the chain freely.

use crate::active::{locator_entries, ActiveChain};
use crate::core::core::{BlockHeader, Hash, Hashed};
use crate::core::pow::{self, RandomXEngine, VerifyMode};
use crate::core::ChainParams;
use crate::error::{Error, ErrorKind};
use crate::index::{BlockIndex, EntryId, FailFlags, VALID_TREE};
use crate::orphans::OrphanPool;
use crate::pipe;
use crate::selector::ChainSelector;
use crate::store;
use crate::types::{ChainAdapter, Notification, PeerId, TimeSource};
use crate::util::Mutex;
use num_bigint::BigUint;
use std::collections::HashSet;
use std::mem;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Seconds behind the wall clock after which the tip counts as stale and
/// the node as still syncing.
const IBD_TIP_AGE: i64 = 60 * 60;

/// Default for the deepest reorg the node will follow without refusing.
pub const DEFAULT_SUSPICIOUS_REORG_DEPTH: i32 = 100;

struct ChainInner {
	index: BlockIndex,
	active: ActiveChain,
	selector: ChainSelector,
	orphans: OrphanPool,
	failed: HashSet<EntryId>,
	notifications: Vec<Notification>,
}

impl ChainInner {
	fn take_notifications(&mut self) -> Vec<Notification> {
		mem::take(&mut self.notifications)
	}
}

/// Facade to the header tree, chain selection and the acceptance
/// pipeline. The single way into the consensus core.
pub struct Chain {
	inner: Mutex<ChainInner>,
	params: ChainParams,
	pow: Arc<dyn RandomXEngine>,
	adapter: Arc<dyn ChainAdapter>,
	time: Arc<dyn TimeSource>,
	suspicious_reorg_depth: i32,
	// latches to true once, read lock-free afterwards
	ibd_done: AtomicBool,
}

impl Chain {
	/// Builds an uninitialized chain; `initialize` or `load` must install
	/// a genesis before headers can be accepted. A `suspicious_reorg_depth`
	/// of zero disables the deep-reorg refusal.
	pub fn new(
		params: ChainParams,
		pow: Arc<dyn RandomXEngine>,
		adapter: Arc<dyn ChainAdapter>,
		time: Arc<dyn TimeSource>,
		suspicious_reorg_depth: i32,
	) -> Chain {
		Chain {
			inner: Mutex::new(ChainInner {
				index: BlockIndex::new(),
				active: ActiveChain::new(),
				selector: ChainSelector::new(),
				orphans: OrphanPool::new(),
				failed: HashSet::new(),
				notifications: vec![],
			}),
			params,
			pow,
			adapter,
			time,
			suspicious_reorg_depth,
			ibd_done: AtomicBool::new(false),
		}
	}

	/// Installs the genesis header, activates it and seeds the candidate
	/// set. Fails if the header isn't this network's genesis or the chain
	/// already holds one.
	pub fn initialize(&self, genesis: &BlockHeader) -> Result<(), Error> {
		let mut guard = self.inner.lock();
		let inner = &mut *guard;
		if genesis.hash() != self.params.consensus.genesis_hash {
			return Err(ErrorKind::BadGenesis.into());
		}
		let id = inner.index.initialize(genesis)?;
		let _ = inner.index.entry_mut(id).status.raise(VALID_TREE);
		inner.active.set_tip(&inner.index, id);
		inner.selector.add_unchecked(&inner.index, id);
		inner.selector.set_best_header(Some(id));
		debug!("chain: initialized with genesis {}", genesis.hash());
		Ok(())
	}

	/// Single entry point for introducing a header, from peers and miner
	/// alike. On success the returned handle is tree-valid and any
	/// orphans waiting on this header have been resolved. Activation is
	/// NOT triggered; callers follow up with `activate_best_chain`.
	///
	/// `min_pow_checked` records that the caller enforced the anti-DoS
	/// work floor over the batch this header arrived in; the commitment
	/// check here runs regardless, callers cannot bypass it.
	pub fn accept_block_header(
		&self,
		header: &BlockHeader,
		peer: PeerId,
		min_pow_checked: bool,
	) -> Result<EntryId, Error> {
		if !min_pow_checked {
			debug!(
				"chain: header {} accepted without a prior batch work check",
				header.hash()
			);
		}
		let mut inner = self.inner.lock();
		self.accept_with_cascade(&mut inner, header, peer)
	}

	/// Accepts a header, offers it to the candidate set and activates the
	/// best chain, as one atomic step.
	pub fn process_new_header(&self, header: &BlockHeader) -> Result<(), Error> {
		let (res, notes) = {
			let mut guard = self.inner.lock();
			let inner = &mut *guard;
			let res = self.process_locked(inner, header);
			(res, inner.take_notifications())
		};
		self.dispatch(notes);
		res
	}

	fn process_locked(&self, inner: &mut ChainInner, header: &BlockHeader) -> Result<(), Error> {
		let id = self.accept_with_cascade(inner, header, crate::types::LOCAL_PEER)?;
		inner.selector.try_add(&inner.index, id);
		self.activate_locked(inner, None)
	}

	/// Offers an already-accepted header to the candidate set. Used by
	/// batch processing where activation is deferred to the end of the
	/// batch.
	pub fn try_add_candidate(&self, id: EntryId) {
		let mut guard = self.inner.lock();
		let inner = &mut *guard;
		inner.selector.try_add(&inner.index, id);
	}

	/// Selects the best candidate (or takes the hint) and reorganizes the
	/// active chain onto it. Succeeds without switching when the current
	/// tip is already best or the reorg is refused by the suspicious-depth
	/// policy.
	pub fn activate_best_chain(&self, hint: Option<EntryId>) -> Result<(), Error> {
		let (res, notes) = {
			let mut guard = self.inner.lock();
			let inner = &mut *guard;
			let res = self.activate_locked(inner, hint);
			(res, inner.take_notifications())
		};
		self.dispatch(notes);
		res
	}

	/// Marks a block invalid by hand, sweeps its descendants, rebuilds the
	/// candidate set and reactivates the best remaining chain. The
	/// implementation behind the `invalidateblock` RPC.
	pub fn invalidate_block(&self, hash: &Hash) -> Result<(), Error> {
		let (res, notes) = {
			let mut guard = self.inner.lock();
			let inner = &mut *guard;
			let res = self.invalidate_locked(inner, hash);
			(res, inner.take_notifications())
		};
		self.dispatch(notes);
		res
	}

	/// Commitment-only PoW over a whole batch, the cheap pre-filter for
	/// header sync.
	pub fn check_batch_pow(&self, headers: &[BlockHeader]) -> bool {
		for header in headers {
			if pow::check_proof_of_work(
				self.pow.as_ref(),
				header,
				header.bits,
				VerifyMode::CommitmentOnly,
			)
			.is_err()
			{
				debug!("chain: header {} failed batch PoW check", header.hash());
				return false;
			}
		}
		true
	}

	/// Drops expired orphans; returns how many were removed. Called
	/// periodically by the owner.
	pub fn evict_orphans(&self) -> usize {
		let mut inner = self.inner.lock();
		let now = self.time.now();
		inner.orphans.evict(now)
	}

	/// Number of orphan headers currently cached.
	pub fn orphan_count(&self) -> usize {
		self.inner.lock().orphans.len()
	}

	/// The tip of the active chain.
	pub fn get_tip(&self) -> Option<EntryId> {
		self.inner.lock().active.tip()
	}

	/// Header of the active tip.
	pub fn tip_header(&self) -> Option<BlockHeader> {
		let inner = self.inner.lock();
		inner.active.tip().map(|id| inner.index.header(id))
	}

	/// Height of the active chain, -1 before initialization.
	pub fn chain_height(&self) -> i32 {
		self.inner.lock().active.height()
	}

	/// Entry handle for a header hash.
	pub fn lookup(&self, hash: &Hash) -> Option<EntryId> {
		self.inner.lock().index.lookup(hash)
	}

	/// Reconstructed header behind a handle.
	pub fn header_of(&self, id: EntryId) -> BlockHeader {
		self.inner.lock().index.header(id)
	}

	/// Hash of the entry behind a handle.
	pub fn hash_of(&self, id: EntryId) -> Hash {
		*self.inner.lock().index.entry(id).hash()
	}

	/// Height of the entry behind a handle.
	pub fn height_of(&self, id: EntryId) -> i32 {
		self.inner.lock().index.entry(id).height()
	}

	/// Cumulative work of the entry behind a handle.
	pub fn work_of(&self, id: EntryId) -> BigUint {
		self.inner.lock().index.entry(id).work().clone()
	}

	/// Parent handle of an entry, None for genesis.
	pub fn prev_of(&self, id: EntryId) -> Option<EntryId> {
		self.inner.lock().index.entry(id).prev()
	}

	/// Whether the entry carries any failure flag.
	pub fn is_failed(&self, id: EntryId) -> bool {
		self.inner.lock().index.entry(id).status().failed()
	}

	/// Block locator from the given entry (active tip when None):
	/// exponentially spaced hashes for peer synchronization.
	pub fn locator(&self, from: Option<EntryId>) -> Vec<Hash> {
		let inner = self.inner.lock();
		let from = from.or_else(|| inner.active.tip());
		locator_entries(&inner.index, from)
	}

	/// Whether an entry sits on the active chain.
	pub fn is_on_active_chain(&self, id: EntryId) -> bool {
		let inner = self.inner.lock();
		inner.active.contains(&inner.index, id)
	}

	/// Active-chain entry at the given height.
	pub fn block_at_height(&self, height: i32) -> Option<EntryId> {
		self.inner.lock().active.at_height(height)
	}

	/// The header with the most work ever seen, active or not. Drives
	/// sync progress even during reorgs.
	pub fn best_header(&self) -> Option<EntryId> {
		self.inner.lock().selector.best_header()
	}

	/// Number of candidate tips currently tracked (monitoring).
	pub fn candidate_count(&self) -> usize {
		self.inner.lock().selector.len()
	}

	/// Total number of headers in the index, failed ones included.
	pub fn block_count(&self) -> usize {
		self.inner.lock().index.len()
	}

	/// Whether the node still considers itself in initial block download.
	/// Once the tip is recent and carries the minimum chain work this
	/// latches to false for good and stops taking the chain lock.
	pub fn is_initial_block_download(&self) -> bool {
		if self.ibd_done.load(Ordering::Relaxed) {
			return false;
		}
		let (tip_time, tip_work) = {
			let inner = self.inner.lock();
			match inner.active.tip() {
				Some(tip) => {
					let entry = inner.index.entry(tip);
					(i64::from(entry.time()), entry.work().clone())
				}
				None => return true,
			}
		};
		if tip_time < self.time.now() - IBD_TIP_AGE {
			return true;
		}
		if tip_work < self.params.consensus.minimum_chain_work {
			return true;
		}
		info!("chain: initial block download complete");
		self.ibd_done.store(true, Ordering::Relaxed);
		false
	}

	/// Saves the whole index plus tip and best-header markers to one
	/// file, crash-safely.
	pub fn save(&self, path: &Path) -> Result<(), Error> {
		let inner = self.inner.lock();
		let tip = inner
			.active
			.tip()
			.ok_or_else(|| ErrorKind::Other("cannot save an uninitialized chain".to_owned()))?;
		store::save_index(
			&inner.index,
			&self.params.consensus.genesis_hash,
			tip,
			inner.selector.best_header(),
			path,
		)
	}

	/// Replaces the in-memory state with the contents of a headers file.
	/// The file's genesis must match this network; candidates are rebuilt
	/// from the valid leaves of the loaded tree.
	pub fn load(&self, path: &Path) -> Result<(), Error> {
		let loaded = store::load_index(path, &self.params.consensus.genesis_hash)?;
		let mut guard = self.inner.lock();
		let inner = &mut *guard;

		inner.index = loaded.index;
		inner.active.clear();
		inner.active.set_tip(&inner.index, loaded.tip);
		inner.selector.clear();
		inner.selector.set_best_header(loaded.best);
		inner.failed.clear();

		// rebuild the failed-block set (failure roots only, descendants
		// are marked failed-child on their own) and the candidate set
		for id in inner.index.ids() {
			let flags = inner.index.entry(id).status().fail_flags();
			if flags.contains(FailFlags::FAILED_VALID) {
				inner.failed.insert(id);
			}
		}
		Self::rebuild_candidates(inner);
		info!(
			"chain: loaded {} headers, {} candidates, tip at height {}",
			inner.index.len(),
			inner.selector.len(),
			inner.active.height()
		);
		Ok(())
	}

	// ---- internals, all assuming the inner lock is held ----

	/// Refills the candidate set with the tips of the valid tree: every
	/// tree-valid entry without a valid child. An entry whose children
	/// all failed is a tip again and must compete, otherwise nothing
	/// could be activated after an invalidation.
	fn rebuild_candidates(inner: &mut ChainInner) {
		inner.selector.clear();
		let mut has_valid_child: HashSet<EntryId> = HashSet::new();
		for id in inner.index.ids() {
			let entry = inner.index.entry(id);
			if !entry.status().failed() {
				if let Some(prev) = entry.prev() {
					has_valid_child.insert(prev);
				}
			}
		}
		for id in inner.index.ids() {
			let entry = inner.index.entry(id);
			if entry.status().is_valid(VALID_TREE) && !has_valid_child.contains(&id) {
				inner.selector.add_unchecked(&inner.index, id);
			}
		}
	}

	/// Accepts a header, then resolves every orphan that became
	/// connectable, level by level. The pool hands out owned copies, so
	/// the cascade never reads a pool slot after erasing it; iteration
	/// over pre-collected levels keeps the stack flat.
	fn accept_with_cascade(
		&self,
		inner: &mut ChainInner,
		header: &BlockHeader,
		peer: PeerId,
	) -> Result<EntryId, Error> {
		let id = self.accept_one(inner, header, peer)?;
		let mut parents = vec![*inner.index.entry(id).hash()];
		while let Some(parent_hash) = parents.pop() {
			let children = inner.orphans.take_children(&parent_hash);
			if children.is_empty() {
				continue;
			}
			info!(
				"chain: resolving {} orphans waiting on {}",
				children.len(),
				parent_hash
			);
			for (hash, orphan_header, orphan_peer) in children {
				match self.accept_one(inner, &orphan_header, orphan_peer) {
					Ok(orphan_id) => {
						inner.selector.try_add(&inner.index, orphan_id);
						parents.push(hash);
					}
					Err(e) => {
						debug!("chain: orphan {} failed acceptance: {}", hash, e);
					}
				}
			}
		}
		Ok(id)
	}

	fn accept_one(
		&self,
		inner: &mut ChainInner,
		header: &BlockHeader,
		peer: PeerId,
	) -> Result<EntryId, Error> {
		let ChainInner {
			ref mut index,
			ref mut selector,
			ref mut orphans,
			ref mut failed,
			..
		} = *inner;
		let mut ctx = pipe::BlockContext {
			index,
			selector,
			failed,
			orphans,
			params: &self.params,
			pow: self.pow.as_ref(),
			time: self.time.as_ref(),
		};
		pipe::accept_block_header(&mut ctx, header, peer)
	}

	fn activate_locked(&self, inner: &mut ChainInner, hint: Option<EntryId>) -> Result<(), Error> {
		let candidate = match hint.or_else(|| inner.selector.find_most_work(&inner.index)) {
			Some(id) => id,
			// no candidates: no competing forks, the current tip stands
			None => return Ok(()),
		};
		let old_tip = match inner.active.tip() {
			Some(tip) => tip,
			None => {
				return Err(
					ErrorKind::Other("activation without an initialized chain".to_owned()).into(),
				)
			}
		};
		if old_tip == candidate {
			return Ok(());
		}

		// a candidate with no more work than the tip never triggers a
		// switch, unless the tip itself was invalidated out from under us
		let tip_failed = inner.index.entry(old_tip).status().failed();
		if !tip_failed
			&& inner.index.entry(candidate).work() <= inner.index.entry(old_tip).work()
		{
			debug!(
				"chain: candidate {} has insufficient work, keeping tip",
				inner.index.entry(candidate).hash()
			);
			return Ok(());
		}

		let fork = match inner
			.index
			.last_common_ancestor(Some(old_tip), Some(candidate))
		{
			Some(fork) => fork,
			None => {
				error!("chain: no common ancestor between tip and candidate, refusing to switch");
				return Err(ErrorKind::Other("no common ancestor for reorg".to_owned()).into());
			}
		};

		let reorg_depth = inner.index.entry(old_tip).height() - inner.index.entry(fork).height();
		if self.suspicious_reorg_depth > 0 && reorg_depth >= self.suspicious_reorg_depth {
			error!(
				"chain: refusing suspicious reorg of {} blocks (policy allows {}), \
				 tip {} fork {} candidate {}",
				reorg_depth,
				self.suspicious_reorg_depth - 1,
				inner.index.entry(old_tip).hash(),
				inner.index.entry(fork).hash(),
				inner.index.entry(candidate).hash()
			);
			inner.notifications.push(Notification::SuspiciousReorg {
				depth: reorg_depth,
				max_allowed: self.suspicious_reorg_depth - 1,
			});
			return Ok(());
		}

		// disconnect down to the fork, remembering the sequence for
		// rollback
		let mut disconnected = vec![];
		while inner.active.tip() != Some(fork) {
			let tip = match inner.active.tip() {
				Some(tip) => tip,
				None => return Err(ErrorKind::Other("reorg ran past genesis".to_owned()).into()),
			};
			disconnected.push(tip);
			self.disconnect_tip(inner)?;
		}

		// connect the candidate branch, fork upwards
		let mut connect = vec![];
		let mut walk = Some(candidate);
		while let Some(id) = walk {
			if id == fork {
				break;
			}
			connect.push(id);
			walk = inner.index.entry(id).prev();
		}
		for id in connect.iter().rev() {
			if let Err(e) = self.connect_tip(inner, *id) {
				error!(
					"chain: failed to connect {} during reorg: {}",
					inner.index.entry(*id).hash(),
					e
				);
				return self.rollback(inner, fork, &disconnected, e);
			}
		}

		if !disconnected.is_empty() {
			warn!(
				"chain: reorganize, disconnected {} and connected {} blocks, new tip {} at {}",
				disconnected.len(),
				connect.len(),
				inner.index.entry(candidate).hash(),
				inner.index.entry(candidate).height()
			);
		} else {
			info!(
				"chain: new best chain at height {}, tip {}",
				inner.index.entry(candidate).height(),
				inner.index.entry(candidate).hash()
			);
		}

		inner.selector.prune(&inner.index, &inner.active);
		inner.notifications.push(Notification::ChainTip(
			candidate,
			inner.index.entry(candidate).height(),
		));
		Ok(())
	}

	/// Undo a half-done reorg: disconnect whatever got connected, then
	/// reconnect the saved old branch. A failure here leaves the state
	/// inconsistent and is unrecoverable for the caller.
	fn rollback(
		&self,
		inner: &mut ChainInner,
		fork: EntryId,
		disconnected: &[EntryId],
		cause: Error,
	) -> Result<(), Error> {
		warn!("chain: rolling back to the previous tip");
		while inner.active.tip() != Some(fork) {
			if let Err(e) = self.disconnect_tip(inner) {
				error!("chain: rollback failed, state may be inconsistent: {}", e);
				return Err(ErrorKind::Other("reorg rollback failed".to_owned()).into());
			}
		}
		for id in disconnected.iter().rev() {
			if let Err(e) = self.connect_tip(inner, *id) {
				error!(
					"chain: failed to restore old chain, state may be inconsistent: {}",
					e
				);
				return Err(ErrorKind::Other("reorg rollback failed".to_owned()).into());
			}
		}
		info!(
			"chain: rollback complete, tip restored at height {}",
			inner.active.height()
		);
		Err(cause)
	}

	// On connect the chain state updates first, then the notification is
	// queued; subscribers observing block-connected see the new tip. On
	// disconnect the notification is queued first; subscribers observing
	// block-disconnected still see the departing block as tip.
	fn connect_tip(&self, inner: &mut ChainInner, id: EntryId) -> Result<(), Error> {
		inner.active.set_tip(&inner.index, id);
		debug!(
			"chain: connect tip {} at {}",
			inner.index.entry(id).hash(),
			inner.index.entry(id).height()
		);
		let header = inner.index.header(id);
		inner.notifications.push(Notification::Connected(header, id));
		Ok(())
	}

	fn disconnect_tip(&self, inner: &mut ChainInner) -> Result<(), Error> {
		let tip = inner
			.active
			.tip()
			.ok_or_else(|| ErrorKind::Other("no tip to disconnect".to_owned()))?;
		let prev = inner
			.index
			.entry(tip)
			.prev()
			.ok_or_else(|| ErrorKind::Other("cannot disconnect genesis".to_owned()))?;
		debug!(
			"chain: disconnect tip {} at {}",
			inner.index.entry(tip).hash(),
			inner.index.entry(tip).height()
		);
		let header = inner.index.header(tip);
		inner
			.notifications
			.push(Notification::Disconnected(header, tip));
		inner.active.set_tip(&inner.index, prev);
		Ok(())
	}

	fn invalidate_locked(&self, inner: &mut ChainInner, hash: &Hash) -> Result<(), Error> {
		let target = inner
			.index
			.lookup(hash)
			.ok_or_else(|| ErrorKind::Other(format!("block {} not found", hash)))?;
		if inner.index.entry(target).prev().is_none() {
			return Err(ErrorKind::Other("refusing to invalidate genesis".to_owned()).into());
		}
		let target_height = inner.index.entry(target).height();
		info!("chain: invalidating block {} at height {}", hash, target_height);

		inner
			.index
			.entry_mut(target)
			.status
			.set_failed(FailFlags::FAILED_VALID);
		inner.failed.insert(target);

		// sweep the whole tree: everything whose ancestor at the target
		// height is the target descends from it
		let ids: Vec<EntryId> = inner.index.ids().collect();
		for id in ids {
			if id == target {
				continue;
			}
			if inner.index.ancestor(id, target_height) == Some(target) {
				inner
					.index
					.entry_mut(id)
					.status
					.set_failed(FailFlags::FAILED_CHILD);
			}
		}

		// the candidate set may now hold failed entries: rebuild it from
		// the tips of the still-valid tree
		Self::rebuild_candidates(inner);

		// if the active tip descends from the invalidated block, move to
		// the best remaining chain
		let must_reactivate = match inner.active.tip() {
			Some(tip) => inner.index.ancestor(tip, target_height) == Some(target),
			None => false,
		};
		if must_reactivate {
			warn!("chain: active tip descends from invalidated block, reactivating");
			self.activate_locked(inner, None)?;
		}
		Ok(())
	}

	fn dispatch(&self, notes: Vec<Notification>) {
		for note in notes {
			match note {
				Notification::Connected(header, id) => self.adapter.block_connected(&header, id),
				Notification::Disconnected(header, id) => {
					self.adapter.block_disconnected(&header, id)
				}
				Notification::ChainTip(id, height) => self.adapter.chain_tip(id, height),
				Notification::SuspiciousReorg { depth, max_allowed } => {
					self.adapter.suspicious_reorg(depth, max_allowed)
				}
			}
		}
	}
}
