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

//! Shared fixtures for the sync integration tests: a deterministic
//! stand-in for the RandomX engine, a settable clock and a fully wired
//! header-sync node.

// not every test binary exercises every fixture
#![allow(dead_code)]

use ember_chain::{Chain, EntryId, NoopAdapter, TimeSource};
use ember_core::core::hash::hash_bytes;
use ember_core::core::{BlockHeader, Hash, Hashed};
use ember_core::pow::{Error as PowError, RandomXEngine};
use ember_core::ChainParams;
use ember_sync::{HeaderSync, PeerManager};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Deterministic engine: the "RandomX hash" is the double-SHA of the
/// pow bytes, the commitment chains pow bytes and hash together with
/// its top three bytes cleared so it always meets any sane target while
/// still failing the deliberately tiny ones used to provoke rejections.
pub struct TestEngine;

impl RandomXEngine for TestEngine {
	fn commitment(&self, header: &BlockHeader, rx_hash: Option<&Hash>) -> Hash {
		let rx = rx_hash.copied().unwrap_or(header.randomx_hash);
		let mut data = header.pow_bytes();
		data.extend_from_slice(rx.as_bytes());
		let mut commitment = hash_bytes(&data);
		commitment.0[29] = 0;
		commitment.0[30] = 0;
		commitment.0[31] = 0;
		commitment
	}

	fn randomx_hash(&self, header: &BlockHeader) -> Result<Hash, PowError> {
		Ok(hash_bytes(&header.pow_bytes()))
	}
}

/// A clock the test moves by hand.
pub struct TestClock(AtomicI64);

impl TestClock {
	pub fn new(start: i64) -> Arc<TestClock> {
		Arc::new(TestClock(AtomicI64::new(start)))
	}

	pub fn set(&self, now: i64) {
		self.0.store(now, Ordering::SeqCst);
	}
}

impl TimeSource for TestClock {
	fn now(&self) -> i64 {
		self.0.load(Ordering::SeqCst)
	}
}

pub struct TestNode {
	pub chain: Arc<Chain>,
	pub peers: Arc<PeerManager>,
	pub sync: HeaderSync,
	pub clock: Arc<TestClock>,
	pub params: ChainParams,
}

/// A regtest node with genesis installed and header sync wired up, the
/// clock parked a little past the genesis timestamp.
pub fn setup() -> TestNode {
	let params = ChainParams::regtest();
	let clock = TestClock::new(i64::from(params.genesis.time) + 600);
	let chain = Arc::new(Chain::new(
		params.clone(),
		Arc::new(TestEngine),
		Arc::new(NoopAdapter {}),
		clock.clone(),
		0,
	));
	chain.initialize(&params.genesis).expect("genesis installs");
	let peers = Arc::new(PeerManager::new());
	let sync = HeaderSync::new(chain.clone(), peers.clone(), params.clone(), clock.clone());
	TestNode {
		chain,
		peers,
		sync,
		clock,
		params,
	}
}

/// A header building on `prev_hash`, pow witness filled in by the test
/// engine.
pub fn header_on(prev_hash: Hash, time: u32, nonce: u32) -> BlockHeader {
	let mut header = BlockHeader {
		prev_hash,
		time,
		bits: ember_core::params::REGTEST_POW_LIMIT_BITS,
		nonce,
		..Default::default()
	};
	header.randomx_hash = TestEngine
		.randomx_hash(&header)
		.expect("test engine never fails");
	header
}

/// A continuous batch of `n` headers on top of the given entry,
/// timestamps one second apart.
pub fn batch_on(chain: &Chain, parent: EntryId, n: usize, nonce_base: u32) -> Vec<BlockHeader> {
	let parent_header = chain.header_of(parent);
	let mut prev_hash = chain.hash_of(parent);
	let mut headers = vec![];
	for i in 0..n {
		let header = header_on(
			prev_hash,
			parent_header.time + 1 + i as u32,
			nonce_base + i as u32,
		);
		prev_hash = header.hash();
		headers.push(header);
	}
	headers
}

/// Grows the active chain by `n` blocks through the batch interface.
pub fn grow_chain(node: &TestNode, n: usize, nonce_base: u32) -> EntryId {
	let tip = node.chain.get_tip().expect("initialized");
	let headers = batch_on(&node.chain, tip, n, nonce_base);
	assert!(node.sync.process_headers(&headers, 1));
	node.chain.get_tip().expect("still initialized")
}
