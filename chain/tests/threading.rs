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

//! Concurrent submissions from several "peer" threads. The chain
//! serializes everything behind its lock, so whatever the interleaving,
//! the final state must be the one best chain and every invariant must
//! hold.

mod common;

use common::{header_on, setup};
use ember_core::core::{BlockHeader, Hashed};
use std::sync::Arc;
use std::thread;

#[test]
fn concurrent_submission_converges() {
	let node = setup(0);
	let genesis_hash = node.params.genesis.hash();
	let time = node.params.genesis.time;

	// four competing branches of different lengths, prepared up front
	let mut branches: Vec<Vec<BlockHeader>> = vec![];
	for b in 0..4u32 {
		let mut branch = vec![];
		let mut prev_hash = genesis_hash;
		for i in 0..(4 + b) {
			let header = header_on(prev_hash, time + 1 + i, b * 1000 + i);
			prev_hash = header.hash();
			branch.push(header);
		}
		branches.push(branch);
	}
	let longest = branches[3].clone();

	// submit every branch from its own thread, headers in order
	let chain = node.chain.clone();
	let handles: Vec<_> = branches
		.into_iter()
		.map(|branch| {
			let chain = Arc::clone(&chain);
			thread::spawn(move || {
				for header in branch {
					// orphaning is impossible here (parents go first),
					// everything else must be accepted
					chain.process_new_header(&header).unwrap();
				}
			})
		})
		.collect();
	for handle in handles {
		handle.join().unwrap();
	}

	// the longest branch wins regardless of interleaving
	let expected_tip = node.chain.lookup(&longest.last().unwrap().hash()).unwrap();
	assert_eq!(node.chain.get_tip(), Some(expected_tip));
	assert_eq!(node.chain.chain_height(), 7);
	// 1 genesis + 4+5+6+7 branch headers
	assert_eq!(node.chain.block_count(), 23);

	// active chain is a contiguous parent path
	for h in 1..=node.chain.chain_height() {
		let id = node.chain.block_at_height(h).unwrap();
		let prev = node.chain.prev_of(id).unwrap();
		assert_eq!(node.chain.block_at_height(h - 1), Some(prev));
	}
}

#[test]
fn concurrent_readers_during_writes() {
	let node = setup(0);
	let genesis_hash = node.params.genesis.hash();
	let time = node.params.genesis.time;

	let mut headers = vec![];
	let mut prev_hash = genesis_hash;
	for i in 0..50u32 {
		let header = header_on(prev_hash, time + 1 + i, i);
		prev_hash = header.hash();
		headers.push(header);
	}

	let writer_chain = node.chain.clone();
	let writer = thread::spawn(move || {
		for header in headers {
			writer_chain.process_new_header(&header).unwrap();
		}
	});

	// readers hammer the query surface while the writer runs; handles
	// stay valid because the index never drops entries
	let readers: Vec<_> = (0..3)
		.map(|_| {
			let chain = node.chain.clone();
			thread::spawn(move || {
				for _ in 0..200 {
					if let Some(tip) = chain.get_tip() {
						let height = chain.height_of(tip);
						assert!(height >= 0);
						assert!(chain.is_on_active_chain(tip));
						let locator = chain.locator(None);
						assert!(!locator.is_empty());
					}
				}
			})
		})
		.collect();

	writer.join().unwrap();
	for reader in readers {
		reader.join().unwrap();
	}
	assert_eq!(node.chain.chain_height(), 50);
}
