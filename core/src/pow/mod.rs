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

//! The proof of work needs to strike a balance between fast header
//! verification to avoid DoS attacks and difficulty for block verifiers
//! to build new blocks. This module hosts the consensus-side checks over
//! the RandomX engine interface: the cheap commitment check used during
//! header sync, the full hash recomputation used before a header is
//! marked tree-valid, and the mining mode that fills the hash in.

pub mod error;
pub mod vm_pool;

pub use self::error::Error;
pub use self::vm_pool::{epoch_for_time, EpochVm, VmFactory, VmPool, DEFAULT_VM_CACHE_SIZE};

use crate::consensus;
use crate::core::{BlockHeader, Hash};

/// How much of the proof of work to verify.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VerifyMode {
	/// Verify both the recomputed RandomX hash and the commitment.
	Full,
	/// Only verify the commitment (roughly 50x faster, for header sync).
	CommitmentOnly,
	/// Compute the hash and check the commitment (for miners).
	Mining,
}

/// The RandomX engine the consensus layer delegates to. The engine owns
/// the VM lifecycle (see [`VmPool`]); the consensus layer owns the target
/// comparisons and mode logic.
pub trait RandomXEngine: Send + Sync {
	/// RandomX commitment over the header, computed against `rx_hash`
	/// when provided and the header's stored randomx hash otherwise.
	fn commitment(&self, header: &BlockHeader, rx_hash: Option<&Hash>) -> Hash;

	/// The RandomX hash of the header with the randomx field zeroed,
	/// under the VM for the header's epoch.
	fn randomx_hash(&self, header: &BlockHeader) -> Result<Hash, Error>;
}

/// Checks the proof of work of the given header against its own compact
/// target, in the requested mode.
///
/// Commitment verification runs first as it is by far the cheaper check.
/// In `Mining` mode the recomputed RandomX hash is returned so the miner
/// can fill the header in; in the other modes the return value carries
/// no hash.
pub fn check_proof_of_work(
	engine: &dyn RandomXEngine,
	header: &BlockHeader,
	bits: u32,
	mode: VerifyMode,
) -> Result<Option<Hash>, Error> {
	let target = consensus::decode_compact(bits).ok_or(Error::InvalidTarget)?;

	if mode != VerifyMode::Mining {
		if header.randomx_hash.is_zero() {
			return Err(Error::MissingRandomXHash);
		}
		let commitment = engine.commitment(header, None);
		if commitment.to_biguint() > target {
			return Err(Error::HighHash);
		}
	}

	if mode == VerifyMode::CommitmentOnly {
		return Ok(None);
	}

	let rx_hash = engine.randomx_hash(header)?;
	match mode {
		VerifyMode::Full => {
			// byte-for-byte comparison against the hash the header claims
			if rx_hash != header.randomx_hash {
				return Err(Error::HashMismatch);
			}
			Ok(None)
		}
		VerifyMode::Mining => {
			let commitment = engine.commitment(header, Some(&rx_hash));
			if commitment.to_biguint() > target {
				return Err(Error::HighHash);
			}
			Ok(Some(rx_hash))
		}
		VerifyMode::CommitmentOnly => unreachable!(),
	}
}
