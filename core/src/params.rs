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

//! Chain parameters per network. Unlike a global "select once" singleton,
//! parameters are plain values constructed at start-up and passed by
//! reference to whoever needs them.

use crate::consensus;
use crate::core::{BlockHeader, Hash, Hashed};
use crate::genesis;
use num_bigint::BigUint;
use num_traits::Zero;

/// Compact pow limit for main and test networks. CPU-bound RandomX
/// hashing starts out markedly easier than sha256d chains.
pub const MAINNET_POW_LIMIT_BITS: u32 = 0x1f00_ffff;
/// Compact pow limit for regtest: practically no difficulty, so tests
/// and local networks can mine headers instantly.
pub const REGTEST_POW_LIMIT_BITS: u32 = 0x207f_ffff;

/// Types of chain a server can run on, dictates the genesis header and
/// the consensus parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainTypes {
	/// Main production network.
	Mainnet,
	/// Public test network.
	Testnet,
	/// For local regression testing: trivial difficulty, no IBD work
	/// floor.
	Regtest,
}

impl ChainTypes {
	/// Short name for the chain, used in file paths and logs.
	pub fn shortname(&self) -> String {
		match *self {
			ChainTypes::Mainnet => "main".to_owned(),
			ChainTypes::Testnet => "test".to_owned(),
			ChainTypes::Regtest => "regtest".to_owned(),
		}
	}
}

/// Consensus-critical parameters. Immutable after construction.
#[derive(Debug, Clone)]
pub struct ConsensusParams {
	/// Easiest permitted difficulty target.
	pub pow_limit: BigUint,
	/// Compact encoding of `pow_limit`.
	pub pow_limit_bits: u32,
	/// Target seconds between blocks.
	pub pow_target_spacing: i64,
	/// Seconds a single RandomX key (and VM) stays valid.
	pub randomx_epoch_duration: i64,
	/// Seconds for difficulty to double or halve under ASERT.
	pub asert_half_life: i64,
	/// Height of the ASERT anchor block. Blocks at or below mine at the
	/// pow limit, which lets genesis and the anchor be produced at any
	/// time.
	pub asert_anchor_height: i32,
	/// Hash of the genesis header.
	pub genesis_hash: Hash,
	/// Cumulative work the chain must reach before the node considers
	/// itself synced. Zero disables the check (regtest).
	pub minimum_chain_work: BigUint,
	/// Height at which this software version stops accepting blocks,
	/// forcing operators to update. Zero disables the check.
	pub network_expiration_interval: i32,
	/// Heights before expiration at which warnings start.
	pub network_expiration_grace: i32,
}

/// Parameters for one network, the genesis header included.
#[derive(Debug, Clone)]
pub struct ChainParams {
	/// Which network these parameters describe.
	pub chain_type: ChainTypes,
	/// The consensus rules of the network.
	pub consensus: ConsensusParams,
	/// The network's genesis header.
	pub genesis: BlockHeader,
}

impl ChainParams {
	/// Main network parameters.
	pub fn mainnet() -> ChainParams {
		let genesis = genesis::genesis_main();
		ChainParams {
			chain_type: ChainTypes::Mainnet,
			consensus: ConsensusParams {
				pow_limit: consensus::decode_compact(MAINNET_POW_LIMIT_BITS)
					.expect("valid pow limit"),
				pow_limit_bits: MAINNET_POW_LIMIT_BITS,
				pow_target_spacing: 2 * 60,
				randomx_epoch_duration: 7 * 24 * 60 * 60,
				asert_half_life: 2 * 24 * 60 * 60,
				asert_anchor_height: 1,
				genesis_hash: genesis.hash(),
				// roughly a year of blocks at the pow limit; raised with
				// releases as the network accumulates work
				minimum_chain_work: consensus::block_proof(MAINNET_POW_LIMIT_BITS)
					* BigUint::from(262_800u32),
				network_expiration_interval: 0,
				network_expiration_grace: 1440,
			},
			genesis,
		}
	}

	/// Test network parameters.
	pub fn testnet() -> ChainParams {
		let genesis = genesis::genesis_test();
		ChainParams {
			chain_type: ChainTypes::Testnet,
			consensus: ConsensusParams {
				pow_limit: consensus::decode_compact(MAINNET_POW_LIMIT_BITS)
					.expect("valid pow limit"),
				pow_limit_bits: MAINNET_POW_LIMIT_BITS,
				pow_target_spacing: 2 * 60,
				randomx_epoch_duration: 7 * 24 * 60 * 60,
				asert_half_life: 2 * 24 * 60 * 60,
				asert_anchor_height: 1,
				genesis_hash: genesis.hash(),
				minimum_chain_work: BigUint::zero(),
				network_expiration_interval: 0,
				network_expiration_grace: 1440,
			},
			genesis,
		}
	}

	/// Regression test parameters: trivial difficulty, no retargeting,
	/// no minimum-work gate.
	pub fn regtest() -> ChainParams {
		let genesis = genesis::genesis_regtest();
		ChainParams {
			chain_type: ChainTypes::Regtest,
			consensus: ConsensusParams {
				pow_limit: consensus::decode_compact(REGTEST_POW_LIMIT_BITS)
					.expect("valid pow limit"),
				pow_limit_bits: REGTEST_POW_LIMIT_BITS,
				pow_target_spacing: 2 * 60,
				randomx_epoch_duration: 7 * 24 * 60 * 60,
				asert_half_life: 2 * 24 * 60 * 60,
				asert_anchor_height: 1,
				genesis_hash: genesis.hash(),
				minimum_chain_work: BigUint::zero(),
				network_expiration_interval: 0,
				network_expiration_grace: 1440,
			},
			genesis,
		}
	}

	/// Whether difficulty retargeting is disabled (regtest).
	pub fn no_retargeting(&self) -> bool {
		self.chain_type == ChainTypes::Regtest
	}
}
