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

//! Implementation of the header acceptance (or refusal) pipeline.
//!
//! Checks run cheapest first to keep the DoS surface small: duplicate
//! lookup, the commitment-only PoW check, parent resolution, then the
//! contextual rules and finally the expensive full RandomX
//! verification. A header is inserted into the index *before* the
//! expensive checks so their outcome is cached in the entry status and
//! never recomputed for repeat submissions.

use crate::core::consensus;
use crate::core::core::{BlockHeader, Hashed};
use crate::core::pow::{self, RandomXEngine, VerifyMode};
use crate::core::ChainParams;
use crate::error::{Error, ErrorKind};
use crate::index::{BlockIndex, EntryId, FailFlags, VALID_TREE};
use crate::orphans::OrphanPool;
use crate::selector::ChainSelector;
use crate::types::{PeerId, TimeSource};
use std::collections::HashSet;

/// Contextual information required to process a new header and either
/// reject or accept it. Borrowed from the facade's locked state.
pub(crate) struct BlockContext<'a> {
	pub index: &'a mut BlockIndex,
	pub selector: &'a mut ChainSelector,
	pub failed: &'a mut HashSet<EntryId>,
	pub orphans: &'a mut OrphanPool,
	pub params: &'a ChainParams,
	pub pow: &'a dyn RandomXEngine,
	pub time: &'a dyn TimeSource,
}

/// Runs the full acceptance pipeline on a single header. On success the
/// header sits in the index at tree validity and the best-header marker
/// is up to date. Orphan resolution is driven by the facade.
pub(crate) fn accept_block_header(
	ctx: &mut BlockContext<'_>,
	header: &BlockHeader,
	peer: PeerId,
) -> Result<EntryId, Error> {
	let hash = header.hash();

	// 1. duplicate: cheap O(1) answer for anything we already know,
	// including headers cached as invalid
	if let Some(id) = ctx.index.lookup(&hash) {
		if ctx.index.entry(id).status().failed() {
			debug!("pipe: header {} is a cached invalid", hash);
			return Err(ErrorKind::Duplicate.into());
		}
		return Ok(id);
	}

	// 2. commitment-only PoW, unconditionally: spam gets rejected here
	// without ever touching the index
	if let Err(e) = pow::check_proof_of_work(ctx.pow, header, header.bits, VerifyMode::CommitmentOnly)
	{
		debug!("pipe: header {} failed PoW commitment check: {}", hash, e);
		return Err(map_pow_err(e));
	}

	// 3. a parentless header claims to be genesis
	if header.prev_hash.is_zero() {
		if hash != ctx.params.consensus.genesis_hash {
			error!(
				"pipe: rejected fake genesis {} (expected {})",
				hash, ctx.params.consensus.genesis_hash
			);
			return Err(ErrorKind::BadGenesis.into());
		}
		// the real genesis, but it must be installed via initialize
		return Err(ErrorKind::GenesisViaAccept.into());
	}

	// 4. parent lookup; unknown parents orphan the header
	let prev_id = match ctx.index.lookup(&header.prev_hash) {
		Some(id) => id,
		None => {
			let cached = ctx
				.orphans
				.try_add(header.clone(), peer, ctx.time.now());
			return if cached {
				debug!(
					"pipe: cached orphan {} (parent {}, peer {})",
					hash, header.prev_hash, peer
				);
				Err(ErrorKind::Orphan.into())
			} else {
				Err(ErrorKind::OrphanLimit.into())
			};
		}
	};

	// 5. parent marked invalid
	if ctx.index.entry(prev_id).status().failed() {
		debug!("pipe: header {} has invalid previous {}", hash, header.prev_hash);
		return Err(ErrorKind::BadPrevBlk.into());
	}

	// 6. parent not yet tree-valid: sweep the failed set for an invalid
	// ancestor and mark the whole path below it
	if !ctx.index.entry(prev_id).status().is_valid(VALID_TREE) {
		let failed_ids: Vec<EntryId> = ctx.failed.iter().copied().collect();
		for failed_id in failed_ids {
			let failed_height = ctx.index.entry(failed_id).height();
			if ctx.index.ancestor(prev_id, failed_height) == Some(failed_id) {
				let failed_hash = *ctx.index.entry(failed_id).hash();
				let mut walk = prev_id;
				while walk != failed_id {
					ctx.index
						.entry_mut(walk)
						.status
						.set_failed(FailFlags::FAILED_CHILD);
					match ctx.index.entry(walk).prev() {
						Some(prev) => walk = prev,
						None => break,
					}
				}
				debug!("pipe: header {} descends from invalid {}", hash, failed_hash);
				return Err(ErrorKind::BadPrevBlk.into());
			}
		}
	}

	// 7. insert before the expensive validation, so a failure below is
	// cached in the entry status and repeat submissions cost nothing
	let id = ctx.index.add(header, ctx.time.now())?;

	// 8. contextual rules: difficulty schedule, timestamps, version
	if let Err(e) = contextual_check(ctx, header, prev_id) {
		error!("pipe: contextual check failed for {}: {}", hash, e);
		ctx.index
			.entry_mut(id)
			.status
			.set_failed(FailFlags::FAILED_VALID);
		ctx.failed.insert(id);
		return Err(e);
	}

	// 9. full PoW: recompute the RandomX hash and verify the commitment
	if let Err(e) = pow::check_proof_of_work(ctx.pow, header, header.bits, VerifyMode::Full) {
		error!("pipe: full PoW check failed for {}: {}", hash, e);
		ctx.index
			.entry_mut(id)
			.status
			.set_failed(FailFlags::FAILED_VALID);
		ctx.failed.insert(id);
		return Err(map_pow_err(e));
	}

	// 10. tree-valid, and possibly the most worked header we know
	let _ = ctx.index.entry_mut(id).status.raise(VALID_TREE);
	ctx.selector.update_best_header(ctx.index, id);

	info!(
		"pipe: accepted header {} at height {}",
		hash,
		ctx.index.entry(id).height()
	);
	Ok(id)
}

/// Contextual header validation against its parent: the difficulty must
/// match the ASERT schedule, the timestamp must move past the median of
/// the last 11 blocks without running more than two hours ahead of
/// adjusted time, and the version must be current.
fn contextual_check(
	ctx: &BlockContext<'_>,
	header: &BlockHeader,
	prev_id: EntryId,
) -> Result<(), Error> {
	let expected_bits = next_work_required(ctx.index, Some(prev_id), ctx.params);
	if header.bits != expected_bits {
		return Err(ErrorKind::BadDiffBits(expected_bits, header.bits).into());
	}

	let median_time_past = ctx.index.median_time_past(prev_id);
	if i64::from(header.time) <= median_time_past {
		return Err(ErrorKind::TimeTooOld(i64::from(header.time), median_time_past).into());
	}

	let adjusted_time = ctx.time.adjusted_time();
	if i64::from(header.time) > adjusted_time + consensus::MAX_FUTURE_BLOCK_TIME {
		return Err(ErrorKind::TimeTooNew(i64::from(header.time)).into());
	}

	if header.version < 1 {
		return Err(ErrorKind::BadVersion(header.version).into());
	}

	// network expiration forces operators onto current software
	let expiration = ctx.params.consensus.network_expiration_interval;
	if expiration > 0 {
		let height = ctx.index.entry(prev_id).height() + 1;
		if height > expiration {
			return Err(ErrorKind::NetworkExpired(expiration).into());
		}
		if height > expiration - ctx.params.consensus.network_expiration_grace {
			warn!(
				"network expires at height {} (current {}), update soon",
				expiration, height
			);
		}
	}

	Ok(())
}

/// The compact difficulty the next block after `prev` must carry, per
/// ASERT. The pow limit applies before the anchor height and on chains
/// with retargeting disabled.
pub fn next_work_required(
	index: &BlockIndex,
	prev: Option<EntryId>,
	params: &ChainParams,
) -> u32 {
	let consensus_params = &params.consensus;
	let prev_id = match prev {
		Some(id) => id,
		None => return consensus_params.pow_limit_bits,
	};
	if params.no_retargeting() {
		return consensus_params.pow_limit_bits;
	}
	let prev_entry = index.entry(prev_id);
	if prev_entry.height() < consensus_params.asert_anchor_height {
		return consensus_params.pow_limit_bits;
	}

	// the anchor and its parent supply the schedule's reference target
	// and baseline timestamp; an anchor accepted into the index always
	// carried decodable bits through validation
	let anchor_id = match index.ancestor(prev_id, consensus_params.asert_anchor_height) {
		Some(id) => id,
		None => return consensus_params.pow_limit_bits,
	};
	let anchor = index.entry(anchor_id);
	let anchor_parent = match anchor.prev() {
		Some(id) => index.entry(id),
		None => return consensus_params.pow_limit_bits,
	};
	let ref_target = match consensus::decode_compact(anchor.bits()) {
		Some(target) => target,
		None => return consensus_params.pow_limit_bits,
	};

	let time_diff = i64::from(prev_entry.time()) - i64::from(anchor_parent.time());
	let height_diff = i64::from(prev_entry.height() - consensus_params.asert_anchor_height);

	let next_target = consensus::calculate_asert(
		&ref_target,
		consensus_params.pow_target_spacing,
		time_diff,
		height_diff,
		&consensus_params.pow_limit,
		consensus_params.asert_half_life,
	);
	consensus::encode_compact(&next_target)
}

// Full and commitment failures both reject as invalid PoW; an engine
// failure is an internal error the peer is not punished for.
fn map_pow_err(e: pow::Error) -> Error {
	match e {
		pow::Error::Engine(msg) => ErrorKind::Other(msg).into(),
		_ => ErrorKind::HighHash.into(),
	}
}
