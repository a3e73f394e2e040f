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

//! Batched header processing for peer synchronization.
//!
//! Every batch passes a stack of cheap filters before any header
//! touches the block index: size cap, connectivity to the known chain,
//! continuity, commitment-only PoW and (after initial sync) the
//! anti-DoS cumulative work floor. Violations feed the peer
//! accountant; reasons returned by the acceptance pipeline map onto
//! the same penalty table.

use crate::chain::{Chain, ErrorKind, PeerId, TimeSource};
use crate::core::consensus;
use crate::core::core::{BlockHeader, Hash, Hashed};
use crate::core::ChainParams;
use crate::peers::{penalty, PeerManager};
use crate::util::Mutex;
use num_bigint::BigUint;
use num_traits::Zero;
use std::sync::Arc;

/// Where the node stands in header synchronization.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SyncState {
	/// No headers received yet.
	Idle,
	/// Receiving headers, tip still stale.
	Syncing,
	/// Tip is recent.
	Synced,
}

struct SyncStatus {
	state: SyncState,
	last_batch_size: usize,
}

/// Drives header download from peers into the chain, one batch at a
/// time.
pub struct HeaderSync {
	chain: Arc<Chain>,
	peers: Arc<PeerManager>,
	params: ChainParams,
	time: Arc<dyn TimeSource>,
	status: Mutex<SyncStatus>,
}

impl HeaderSync {
	/// New header sync over the given chain and peer accountant.
	pub fn new(
		chain: Arc<Chain>,
		peers: Arc<PeerManager>,
		params: ChainParams,
		time: Arc<dyn TimeSource>,
	) -> HeaderSync {
		HeaderSync {
			chain,
			peers,
			params,
			time,
			status: Mutex::new(SyncStatus {
				state: SyncState::Idle,
				last_batch_size: 0,
			}),
		}
	}

	/// Processes one headers message from a peer. Returns false when the
	/// batch was rejected; the peer accountant has been fed either way.
	pub fn process_headers(&self, headers: &[BlockHeader], peer: PeerId) -> bool {
		if headers.is_empty() {
			self.status.lock().last_batch_size = 0;
			self.update_state();
			return true;
		}

		if headers.len() > consensus::MAX_HEADERS_RESULTS {
			error!(
				"sync: oversized headers message from peer {} ({} > {})",
				peer,
				headers.len(),
				consensus::MAX_HEADERS_RESULTS
			);
			self.peers
				.misbehaving(peer, penalty::OVERSIZED_MESSAGE, "oversized headers message");
			return false;
		}

		// the batch must build on something we know, otherwise it counts
		// towards the peer's non-connecting streak
		if self.chain.lookup(&headers[0].prev_hash).is_none() {
			warn!(
				"sync: headers from peer {} do not connect (first prev {})",
				peer, headers[0].prev_hash
			);
			if self.peers.increment_unconnecting_headers(peer) {
				self.peers.misbehaving(
					peer,
					penalty::TOO_MANY_UNCONNECTING,
					"too many unconnecting headers messages",
				);
			}
			return false;
		}
		self.peers.reset_unconnecting_headers(peer);

		if !headers_continuous(headers) {
			error!("sync: non-continuous headers from peer {}", peer);
			self.peers.misbehaving(
				peer,
				penalty::NON_CONTINUOUS_HEADERS,
				"non-continuous headers sequence",
			);
			return false;
		}

		// cheap commitment PoW over the whole batch before anything is
		// added to the index
		if !self.chain.check_batch_pow(headers) {
			error!("sync: headers failed PoW commitment check from peer {}", peer);
			self.peers
				.misbehaving(peer, penalty::INVALID_POW, "header with invalid proof of work");
			return false;
		}

		// after initial sync a batch must carry enough cumulative work to
		// be worth validating at all
		if !self.chain.is_initial_block_download() {
			let threshold = self.anti_dos_work_threshold();
			let work = headers_work(headers);
			if work < threshold {
				warn!(
					"sync: rejecting low-work headers from peer {} (work {:#x} < floor {:#x})",
					peer, work, threshold
				);
				self.peers
					.misbehaving(peer, penalty::LOW_WORK_HEADERS, "low-work header spam");
				return false;
			}
		}

		self.status.lock().last_batch_size = headers.len();

		// accept every header without activating, so the reorg depth is
		// later measured against the pre-batch tip rather than
		// incrementally per header
		for header in headers {
			match self.chain.accept_block_header(header, peer, true) {
				Ok(id) => self.chain.try_add_candidate(id),
				Err(e) => match e.kind() {
					// cached for later, not this batch's fault
					ErrorKind::Orphan => {
						debug!(
							"sync: header {} from peer {} cached as orphan",
							header.hash(),
							peer
						);
					}
					ErrorKind::OrphanLimit => {
						warn!("sync: peer {} exceeded the orphan quota", peer);
						self.peers.misbehaving(
							peer,
							penalty::TOO_MANY_ORPHANS,
							"exceeded orphan header limit",
						);
						return false;
					}
					kind if kind.is_bad_header() => {
						error!("sync: peer {} sent an invalid header: {}", peer, kind);
						self.peers
							.misbehaving(peer, penalty::INVALID_HEADER, "invalid header");
						return false;
					}
					kind => {
						// internal failure: don't punish the peer for our
						// own trouble
						error!("sync: failed to accept header from peer {}: {}", peer, kind);
						return false;
					}
				},
			}
		}

		// one activation for the whole batch
		if self.chain.activate_best_chain(None).is_err() {
			return false;
		}

		if self.chain.is_initial_block_download() {
			info!(
				"sync: synchronizing headers, height {} (~{:.2}%)",
				self.best_height(),
				self.progress() * 100.0
			);
		} else if let Some(tip) = self.chain.get_tip() {
			info!(
				"sync: new header tip at height {}: {}",
				self.best_height(),
				self.chain.hash_of(tip)
			);
		}

		self.update_state();
		true
	}

	/// The dynamic anti-DoS work floor: a batch must reach at least the
	/// tip's work minus a buffer of recent blocks, and never less than
	/// the configured minimum chain work.
	pub fn anti_dos_work_threshold(&self) -> BigUint {
		let minimum = self.params.consensus.minimum_chain_work.clone();
		let tip = match self.chain.get_tip() {
			Some(tip) => tip,
			None => return minimum,
		};
		let tip_work = self.chain.work_of(tip);
		let buffer = consensus::block_proof(self.chain.header_of(tip).bits)
			* BigUint::from(consensus::ANTI_DOS_WORK_BUFFER_BLOCKS);
		let floor = if buffer > tip_work {
			BigUint::zero()
		} else {
			tip_work - buffer
		};
		minimum.max(floor)
	}

	/// Locator for requesting more headers from peers.
	pub fn locator(&self) -> Vec<Hash> {
		self.chain.locator(None)
	}

	/// Locator starting from the tip's parent, so the peer answers with
	/// at least our own tip and progress is observable.
	pub fn locator_from_prev(&self) -> Vec<Hash> {
		match self.chain.get_tip().and_then(|tip| self.chain.prev_of(tip)) {
			Some(prev) => self.chain.locator(Some(prev)),
			None => self.chain.locator(None),
		}
	}

	/// Whether the tip is younger than `max_age_secs`.
	pub fn is_synced(&self, max_age_secs: i64) -> bool {
		match self.chain.tip_header() {
			Some(header) => self.time.now() - i64::from(header.time) < max_age_secs,
			None => false,
		}
	}

	/// Rough sync progress in [0, 1], time-based, for display only.
	pub fn progress(&self) -> f64 {
		let tip_time = match self.chain.tip_header() {
			Some(header) => i64::from(header.time),
			None => return 0.0,
		};
		let now = self.time.now();
		if now <= tip_time {
			return 1.0;
		}
		let genesis_time = i64::from(self.params.genesis.time);
		let total = now - genesis_time;
		if total <= 0 {
			return 1.0;
		}
		let synced = (tip_time - genesis_time) as f64 / total as f64;
		synced.max(0.0).min(1.0)
	}

	/// Height of the active tip, -1 before initialization.
	pub fn best_height(&self) -> i32 {
		self.chain.chain_height()
	}

	/// Hash of the active tip.
	pub fn best_hash(&self) -> Option<Hash> {
		self.chain.get_tip().map(|tip| self.chain.hash_of(tip))
	}

	/// Whether the last batch was full and the tip still stale, i.e.
	/// the peer likely has more headers for us.
	pub fn should_request_more(&self) -> bool {
		let full = self.status.lock().last_batch_size == consensus::MAX_HEADERS_RESULTS;
		full && !self.is_synced(self.params.consensus.pow_target_spacing * 30)
	}

	/// Current sync state.
	pub fn state(&self) -> SyncState {
		self.status.lock().state
	}

	fn update_state(&self) {
		let synced = self.is_synced(self.params.consensus.pow_target_spacing * 30);
		let mut status = self.status.lock();
		status.state = if synced {
			SyncState::Synced
		} else if status.last_batch_size > 0 {
			SyncState::Syncing
		} else {
			SyncState::Idle
		};
	}
}

/// Whether the batch forms one continuous chain segment:
/// `headers[i].prev` names `headers[i-1]`.
pub fn headers_continuous(headers: &[BlockHeader]) -> bool {
	for pair in headers.windows(2) {
		if pair[1].prev_hash != pair[0].hash() {
			return false;
		}
	}
	true
}

/// Total proof-of-work the batch claims. Headers with undecodable bits
/// contribute nothing.
pub fn headers_work(headers: &[BlockHeader]) -> BigUint {
	headers
		.iter()
		.fold(BigUint::zero(), |acc, h| acc + consensus::block_proof(h.bits))
}

#[cfg(test)]
mod test {
	use super::*;

	fn chained(n: usize) -> Vec<BlockHeader> {
		let mut headers: Vec<BlockHeader> = vec![];
		for i in 0..n {
			let prev_hash = headers
				.last()
				.map(|h: &BlockHeader| h.hash())
				.unwrap_or(Hash([0x11; 32]));
			headers.push(BlockHeader {
				prev_hash,
				time: 1000 + i as u32,
				bits: 0x207f_ffff,
				nonce: i as u32,
				..Default::default()
			});
		}
		headers
	}

	#[test]
	fn continuity() {
		let headers = chained(5);
		assert!(headers_continuous(&headers));
		assert!(headers_continuous(&headers[..1]));
		assert!(headers_continuous(&[]));

		let mut broken = chained(5);
		broken[3].prev_hash = Hash([0xff; 32]);
		assert!(!headers_continuous(&broken));
	}

	#[test]
	fn batch_work_sums_proofs() {
		let headers = chained(3);
		let expected = consensus::block_proof(0x207f_ffff) * BigUint::from(3u32);
		assert_eq!(headers_work(&headers), expected);
		// undecodable bits contribute nothing
		let mut headers = chained(3);
		headers[1].bits = 0;
		let expected = consensus::block_proof(0x207f_ffff) * BigUint::from(2u32);
		assert_eq!(headers_work(&headers), expected);
	}
}
