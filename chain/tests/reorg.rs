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

use common::{next_header, setup, Event};
use ember_core::core::Hashed;

#[test]
fn simple_reorg_to_heavier_fork() {
	let node = setup(0);
	let genesis = node.chain.get_tip().unwrap();
	let genesis_hash = node.params.genesis.hash();

	// A1 extends genesis and becomes the tip
	let a1 = next_header(&node.chain, genesis, 1);
	node.chain.process_new_header(&a1).unwrap();
	let a1_id = node.chain.lookup(&a1.hash()).unwrap();
	assert_eq!(node.chain.get_tip(), Some(a1_id));
	node.adapter.drain();

	// B1 forks off genesis with the same work: no switch
	let b1 = common::header_on(genesis_hash, a1.time, 2);
	node.chain.process_new_header(&b1).unwrap();
	assert_eq!(node.chain.get_tip(), Some(a1_id));
	assert!(node.adapter.drain().is_empty());

	// B2 tips the scale: one disconnect, two connects, one tip event
	let b1_id = node.chain.lookup(&b1.hash()).unwrap();
	let b2 = next_header(&node.chain, b1_id, 3);
	node.chain.process_new_header(&b2).unwrap();
	let b2_id = node.chain.lookup(&b2.hash()).unwrap();
	assert_eq!(node.chain.get_tip(), Some(b2_id));
	assert_eq!(node.chain.chain_height(), 2);
	assert_eq!(
		node.adapter.drain(),
		vec![
			Event::Disconnected(a1.hash()),
			Event::Connected(b1.hash()),
			Event::Connected(b2.hash()),
			Event::Tip(2),
		]
	);

	// the losing tip is off the active chain but kept in the index
	assert!(!node.chain.is_on_active_chain(a1_id));
	assert!(!node.chain.is_failed(a1_id));
	// and the candidate set is empty after pruning
	assert_eq!(node.chain.candidate_count(), 0);
}

#[test]
fn reorg_of_depth_zero_is_a_noop() {
	let node = setup(0);
	let genesis = node.chain.get_tip().unwrap();
	let tip = common::mine_on(&node.chain, genesis, 2, 1);
	node.adapter.drain();

	// activation with the tip already best emits nothing
	node.chain.activate_best_chain(None).unwrap();
	node.chain.activate_best_chain(Some(tip)).unwrap();
	assert!(node.adapter.drain().is_empty());
	assert_eq!(node.chain.get_tip(), Some(tip));
}

#[test]
fn deep_reorg_refused_at_policy_depth() {
	// allow reorgs up to depth 2, refuse at 3
	let node = setup(3);
	let genesis = node.chain.get_tip().unwrap();
	let genesis_hash = node.params.genesis.hash();

	// active chain A1..A3
	let a3 = common::mine_on(&node.chain, genesis, 3, 1);
	node.adapter.drain();

	// competing fork B1..B5 from genesis, one header at a time
	let mut prev_hash = genesis_hash;
	let mut time = node.params.genesis.time;
	for nonce in 0..5u32 {
		time += 1;
		let header = common::header_on(prev_hash, time, 0xb000 + nonce);
		prev_hash = header.hash();
		node.chain.process_new_header(&header).unwrap();
	}

	// the fork overtook on work at B4, but switching needs a depth-3
	// reorg which policy refuses; the tip never moves
	assert_eq!(node.chain.get_tip(), Some(a3));
	let events = node.adapter.drain();
	assert!(events.contains(&Event::Reorg {
		depth: 3,
		max_allowed: 2
	}));
	assert!(events
		.iter()
		.all(|e| !matches!(e, Event::Disconnected(_) | Event::Connected(_))));
}

#[test]
fn reorg_below_policy_depth_is_allowed() {
	let node = setup(3);
	let genesis = node.chain.get_tip().unwrap();
	let genesis_hash = node.params.genesis.hash();

	// active chain A1..A2
	let a2 = common::mine_on(&node.chain, genesis, 2, 1);

	// fork B1..B3 from genesis: depth-2 reorg, just inside policy
	let mut prev_hash = genesis_hash;
	let mut time = node.params.genesis.time;
	let mut last = None;
	for nonce in 0..3u32 {
		time += 1;
		let header = common::header_on(prev_hash, time, 0xc000 + nonce);
		prev_hash = header.hash();
		node.chain.process_new_header(&header).unwrap();
		last = node.chain.lookup(&header.hash());
	}

	assert_ne!(node.chain.get_tip(), Some(a2));
	assert_eq!(node.chain.get_tip(), last);
	assert_eq!(node.chain.chain_height(), 3);
}
