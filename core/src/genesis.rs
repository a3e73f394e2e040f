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

//! Definition of the genesis headers of the main networks. Genesis is
//! installed through the chain's `initialize` entry point, never through
//! header acceptance, so it carries no proof of work of its own.

use crate::core::{Address, BlockHeader, Hash, ZERO_HASH};
use crate::params::{MAINNET_POW_LIMIT_BITS, REGTEST_POW_LIMIT_BITS};

/// Builds a genesis header from its defining fields.
pub fn create_genesis_block(
	time: u32,
	nonce: u32,
	bits: u32,
	version: i32,
	randomx_hash: Hash,
) -> BlockHeader {
	BlockHeader {
		version,
		prev_hash: ZERO_HASH,
		miner_address: Address::zero(),
		time,
		bits,
		nonce,
		randomx_hash,
	}
}

/// Genesis of the main network, June 1st 2024.
pub fn genesis_main() -> BlockHeader {
	create_genesis_block(
		1_717_200_000,
		2_083_236_893,
		MAINNET_POW_LIMIT_BITS,
		1,
		Hash::from_hex("68b4f8eb2a1a1b4a4f5c4f9a0d2e7c3b5a69d0e1f2c3b4a5968778695a4b3c2d")
			.unwrap(),
	)
}

/// Genesis of the test network.
pub fn genesis_test() -> BlockHeader {
	create_genesis_block(
		1_717_200_001,
		414_098_458,
		MAINNET_POW_LIMIT_BITS,
		1,
		Hash::from_hex("2c9d1e0f3b5a7c8e6d4f2a1b0c9e8d7f5a3b2c1d0e9f8a7b6c5d4e3f2a1b0c9d")
			.unwrap(),
	)
}

/// Genesis of the regression test network.
pub fn genesis_regtest() -> BlockHeader {
	create_genesis_block(
		1_296_688_602,
		2,
		REGTEST_POW_LIMIT_BITS,
		1,
		Hash::from_hex("0e8d7c6b5a4f3e2d1c0b9a8f7e6d5c4b3a2f1e0d9c8b7a6f5e4d3c2b1a0f9e8d")
			.unwrap(),
	)
}
