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

//! Shared fixtures for the chain integration tests: a deterministic
//! stand-in for the RandomX engine, a settable clock and a recording
//! chain adapter.

// not every test binary exercises every fixture
#![allow(dead_code)]

use ember_chain::{Chain, ChainAdapter, EntryId, TimeSource};
use ember_core::core::hash::hash_bytes;
use ember_core::core::{BlockHeader, Hash, Hashed};
use ember_core::pow::{Error as PowError, RandomXEngine};
use ember_core::ChainParams;
use ember_util::Mutex;
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

/// Everything observable through the adapter, in dispatch order.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
	Connected(Hash),
	Disconnected(Hash),
	Tip(i32),
	Reorg { depth: i32, max_allowed: i32 },
}

pub struct RecordingAdapter {
	pub events: Mutex<Vec<Event>>,
}

impl RecordingAdapter {
	pub fn new() -> Arc<RecordingAdapter> {
		Arc::new(RecordingAdapter {
			events: Mutex::new(vec![]),
		})
	}

	pub fn drain(&self) -> Vec<Event> {
		self.events.lock().drain(..).collect()
	}
}

impl ChainAdapter for RecordingAdapter {
	fn block_connected(&self, header: &BlockHeader, _id: EntryId) {
		self.events.lock().push(Event::Connected(header.hash()));
	}

	fn block_disconnected(&self, header: &BlockHeader, _id: EntryId) {
		self.events.lock().push(Event::Disconnected(header.hash()));
	}

	fn chain_tip(&self, _id: EntryId, height: i32) {
		self.events.lock().push(Event::Tip(height));
	}

	fn suspicious_reorg(&self, depth: i32, max_allowed: i32) {
		self.events.lock().push(Event::Reorg { depth, max_allowed });
	}
}

pub struct TestNode {
	pub chain: Arc<Chain>,
	pub adapter: Arc<RecordingAdapter>,
	pub clock: Arc<TestClock>,
	pub params: ChainParams,
}

/// A regtest chain with genesis installed, the clock parked a little
/// past the genesis timestamp.
pub fn setup(suspicious_reorg_depth: i32) -> TestNode {
	let node = setup_uninitialized(suspicious_reorg_depth);
	node.chain
		.initialize(&node.params.genesis)
		.expect("genesis installs");
	node
}

/// Same as `setup` but without the genesis installed.
pub fn setup_uninitialized(suspicious_reorg_depth: i32) -> TestNode {
	let params = ChainParams::regtest();
	let adapter = RecordingAdapter::new();
	let clock = TestClock::new(i64::from(params.genesis.time) + 600);
	let chain = Arc::new(Chain::new(
		params.clone(),
		Arc::new(TestEngine),
		adapter.clone(),
		clock.clone(),
		suspicious_reorg_depth,
	));
	TestNode {
		chain,
		adapter,
		clock,
		params,
	}
}

/// Recomputes the pow witness after a header field was edited.
pub fn seal(header: &mut BlockHeader) {
	header.randomx_hash = TestEngine
		.randomx_hash(header)
		.expect("test engine never fails");
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

/// Extends the entry behind `parent` with one freshly "mined" header.
/// Timestamps advance one second per block so long test chains stay
/// inside the two-hour future bound without touching the clock.
pub fn next_header(chain: &Chain, parent: EntryId, nonce: u32) -> BlockHeader {
	let parent_header = chain.header_of(parent);
	header_on(chain.hash_of(parent), parent_header.time + 1, nonce)
}

/// Mines a linear chain of `n` headers on top of `parent` through
/// `process_new_header`, returning the new tip handle.
pub fn mine_on(chain: &Chain, parent: EntryId, n: usize, nonce_base: u32) -> EntryId {
	let mut tip = parent;
	for i in 0..n {
		let header = next_header(chain, tip, nonce_base + i as u32);
		chain
			.process_new_header(&header)
			.expect("mined header accepted");
		tip = chain.lookup(&header.hash()).expect("header in index");
	}
	tip
}
