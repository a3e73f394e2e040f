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

mod common;

use common::{header_on, mine_on, next_header, seal, setup, setup_uninitialized, Event};
use ember_chain::{ErrorKind, TimeSource};
use ember_core::core::{Hash, Hashed};

#[test]
fn linear_extension() {
	let node = setup(0);
	let genesis = node.chain.get_tip().unwrap();

	let h1 = next_header(&node.chain, genesis, 1);
	node.chain.process_new_header(&h1).unwrap();
	let id1 = node.chain.lookup(&h1.hash()).unwrap();
	assert_eq!(node.chain.get_tip(), Some(id1));
	assert_eq!(node.chain.chain_height(), 1);
	assert_eq!(node.chain.orphan_count(), 0);
	// the fresh tip was pruned out of the candidate set
	assert_eq!(node.chain.candidate_count(), 0);
	assert_eq!(
		node.adapter.drain(),
		vec![Event::Connected(h1.hash()), Event::Tip(1)]
	);

	let id2 = mine_on(&node.chain, id1, 1, 2);
	assert_eq!(node.chain.get_tip(), Some(id2));
	assert_eq!(node.chain.chain_height(), 2);
	assert!(node.chain.is_on_active_chain(id1));
	assert_eq!(node.chain.block_at_height(2), Some(id2));
	assert_eq!(node.chain.best_header(), Some(id2));
}

#[test]
fn duplicate_acceptance_is_idempotent() {
	let node = setup(0);
	let genesis = node.chain.get_tip().unwrap();
	let h1 = next_header(&node.chain, genesis, 1);
	node.chain.process_new_header(&h1).unwrap();
	let id1 = node.chain.lookup(&h1.hash()).unwrap();
	let count = node.chain.block_count();

	// resubmitting a valid known header returns the same handle and
	// changes nothing
	let again = node.chain.accept_block_header(&h1, 3, true).unwrap();
	assert_eq!(again, id1);
	assert_eq!(node.chain.block_count(), count);
	assert_eq!(node.chain.get_tip(), Some(id1));
}

#[test]
fn genesis_claims_rejected() {
	let node = setup(0);

	// a parentless header that is not our genesis
	let fake = header_on(Hash([0; 32]), node.params.genesis.time + 1, 99);
	let err = node.chain.accept_block_header(&fake, 1, true).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::BadGenesis);

	// the installed genesis is a known header: acceptance hands back its
	// handle without touching anything
	let id = node
		.chain
		.accept_block_header(&node.params.genesis, 1, true)
		.unwrap();
	assert_eq!(Some(id), node.chain.lookup(&node.params.genesis.hash()));

	// before initialize, even the real genesis is refused through the
	// acceptance path
	let bare = setup_uninitialized(0);
	let err = bare
		.chain
		.accept_block_header(&bare.params.genesis, 1, true)
		.unwrap_err();
	assert_eq!(err.kind(), ErrorKind::GenesisViaAccept);
}

#[test]
fn contextual_rules_reject_and_cache() {
	let node = setup(0);
	let genesis = node.chain.get_tip().unwrap();
	let genesis_time = node.params.genesis.time;

	// wrong difficulty: regtest expects the pow limit
	let mut bad_bits = next_header(&node.chain, genesis, 1);
	bad_bits.bits = 0x1f00_ffff;
	seal(&mut bad_bits);
	let err = node.chain.accept_block_header(&bad_bits, 1, true).unwrap_err();
	assert!(matches!(err.kind(), ErrorKind::BadDiffBits(_, _)));

	// timestamp at the median of the previous blocks
	let old = header_on(node.params.genesis.hash(), genesis_time, 2);
	let err = node.chain.accept_block_header(&old, 1, true).unwrap_err();
	assert!(matches!(err.kind(), ErrorKind::TimeTooOld(_, _)));

	// timestamp more than two hours past adjusted time
	let future = header_on(
		node.params.genesis.hash(),
		(node.clock.now() + 2 * 60 * 60 + 1) as u32,
		3,
	);
	let err = node.chain.accept_block_header(&future, 1, true).unwrap_err();
	assert!(matches!(err.kind(), ErrorKind::TimeTooNew(_)));

	// version zero predates the chain
	let mut v0 = next_header(&node.chain, genesis, 4);
	v0.version = 0;
	seal(&mut v0);
	let err = node.chain.accept_block_header(&v0, 1, true).unwrap_err();
	assert!(matches!(err.kind(), ErrorKind::BadVersion(0)));

	// all four got cached as failed: resubmission is a cheap duplicate
	for header in &[bad_bits, old, future, v0] {
		let id = node.chain.lookup(&header.hash()).unwrap();
		assert!(node.chain.is_failed(id));
		let err = node.chain.accept_block_header(header, 1, true).unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Duplicate);
	}

	// none of it moved the tip
	assert_eq!(node.chain.get_tip(), node.chain.lookup(&node.params.genesis.hash()));
}

#[test]
fn child_of_failed_parent_rejected() {
	let node = setup(0);
	let genesis_time = node.params.genesis.time;

	// a header failing the contextual rules lands in the index as failed
	let bad = header_on(node.params.genesis.hash(), genesis_time, 1);
	assert!(node.chain.accept_block_header(&bad, 1, true).is_err());

	// its child is turned away for the parent alone
	let child = header_on(bad.hash(), genesis_time + 10, 2);
	let err = node.chain.accept_block_header(&child, 1, true).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::BadPrevBlk);
}

#[test]
fn work_and_height_invariants_hold() {
	let node = setup(0);
	let genesis = node.chain.get_tip().unwrap();
	let tip = mine_on(&node.chain, genesis, 5, 10);

	let mut walk = Some(tip);
	while let Some(id) = walk {
		let prev = node.chain.prev_of(id);
		if let Some(prev) = prev {
			assert_eq!(node.chain.height_of(id), node.chain.height_of(prev) + 1);
			let proof = ember_core::consensus::block_proof(node.chain.header_of(id).bits);
			assert_eq!(node.chain.work_of(id), node.chain.work_of(prev) + proof);
		} else {
			assert_eq!(node.chain.height_of(id), 0);
		}
		walk = prev;
	}

	// best header never trails the tip
	let best = node.chain.best_header().unwrap();
	assert!(node.chain.work_of(best) >= node.chain.work_of(tip));
}

#[test]
fn locator_terminates_at_genesis() {
	let node = setup(0);
	let genesis = node.chain.get_tip().unwrap();
	mine_on(&node.chain, genesis, 15, 100);

	let locator = node.chain.locator(None);
	assert_eq!(locator[0], node.chain.hash_of(node.chain.get_tip().unwrap()));
	assert_eq!(*locator.last().unwrap(), node.params.genesis.hash());
	// strictly descending heights
	let heights: Vec<i32> = locator
		.iter()
		.map(|h| node.chain.height_of(node.chain.lookup(h).unwrap()))
		.collect();
	for pair in heights.windows(2) {
		assert!(pair[0] > pair[1]);
	}
}

#[test]
fn network_expiration_halts_acceptance() {
	// a network configured to expire two blocks past genesis
	let mut params = ember_core::ChainParams::regtest();
	params.consensus.network_expiration_interval = 2;
	params.consensus.network_expiration_grace = 1;

	let adapter = common::RecordingAdapter::new();
	let clock = common::TestClock::new(i64::from(params.genesis.time) + 600);
	let chain = ember_chain::Chain::new(
		params.clone(),
		std::sync::Arc::new(common::TestEngine),
		adapter,
		clock,
		0,
	);
	chain.initialize(&params.genesis).unwrap();

	// heights 1 and 2 still fit
	let genesis = chain.get_tip().unwrap();
	let h1 = next_header(&chain, genesis, 1);
	chain.process_new_header(&h1).unwrap();
	let h2 = next_header(&chain, chain.get_tip().unwrap(), 2);
	chain.process_new_header(&h2).unwrap();

	// height 3 is past the expiration and this version refuses it
	let h3 = next_header(&chain, chain.get_tip().unwrap(), 3);
	let err = chain.process_new_header(&h3).unwrap_err();
	assert_eq!(err.kind(), ErrorKind::NetworkExpired(2));
	assert_eq!(chain.chain_height(), 2);
}

#[test]
fn ibd_latch_is_monotonic() {
	let node = setup(0);
	let genesis = node.chain.get_tip().unwrap();

	// tip far older than an hour: still syncing
	node.clock
		.set(i64::from(node.params.genesis.time) + 10 * 60 * 60);
	assert!(node.chain.is_initial_block_download());

	// a recent tip latches the check to false
	let tip = mine_on(&node.chain, genesis, 1, 1);
	let tip_time = i64::from(node.chain.header_of(tip).time);
	node.clock.set(tip_time + 30);
	assert!(!node.chain.is_initial_block_download());

	// the latch never clears, even if the tip goes stale again
	node.clock.set(tip_time + 100 * 60 * 60);
	assert!(!node.chain.is_initial_block_download());
}
