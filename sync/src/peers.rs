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

//! Peer misbehavior accounting. Each peer accumulates a score for
//! protocol violations; once the score crosses the discouragement
//! threshold the peer is flagged for disconnection by the transport
//! layer. Peers with the no-ban permission keep their score on record
//! but are never flagged.

use crate::chain::PeerId;
use crate::util::RwLock;
use std::collections::HashMap;

/// Misbehavior score at which a peer is marked for disconnection.
pub const DISCOURAGEMENT_THRESHOLD: i32 = 100;

/// Consecutive non-connecting headers messages tolerated before the
/// throttle penalty applies.
pub const MAX_UNCONNECTING_HEADERS: i32 = 10;

/// The penalty table. Instant-disconnect offenses score the full
/// threshold; throttled nuisances score less and only disconnect on
/// repetition.
pub mod penalty {
	/// A header whose proof of work does not validate.
	pub const INVALID_POW: i32 = 100;
	/// A header invalid for any other consensus reason.
	pub const INVALID_HEADER: i32 = 100;
	/// More than the maximum number of headers in one message.
	pub const OVERSIZED_MESSAGE: i32 = 20;
	/// A headers batch that does not form a chain.
	pub const NON_CONTINUOUS_HEADERS: i32 = 20;
	/// Too many headers messages in a row that connect to nothing.
	pub const TOO_MANY_UNCONNECTING: i32 = 20;
	/// Exceeded the per-peer orphan quota.
	pub const TOO_MANY_ORPHANS: i32 = 50;
	/// A batch below the anti-DoS work floor, after initial sync.
	pub const LOW_WORK_HEADERS: i32 = 10;
}

bitflags! {
	/// Permission flags granted to a peer connection.
	pub struct Permissions: u32 {
		/// Never disconnected for misbehavior, score is tracked anyway.
		const NOBAN = 1 << 0;
		/// Manually added connection (addnode).
		const MANUAL = 1 << 1;
	}
}

struct Peer {
	addr: String,
	permissions: Permissions,
	score: i32,
	should_discourage: bool,
	unconnecting_headers: i32,
}

impl Peer {
	fn new(addr: String, permissions: Permissions) -> Peer {
		Peer {
			addr,
			permissions,
			score: 0,
			should_discourage: false,
			unconnecting_headers: 0,
		}
	}
}

/// Tracks score and state for every connected peer. No networking here;
/// the transport layer registers peers, feeds violations in and polls
/// the discouragement flag for teardown.
pub struct PeerManager {
	peers: RwLock<HashMap<PeerId, Peer>>,
}

impl PeerManager {
	/// An accountant with no peers.
	pub fn new() -> PeerManager {
		PeerManager {
			peers: RwLock::new(HashMap::new()),
		}
	}

	/// Registers a peer with its permissions. Re-registering resets the
	/// peer's state.
	pub fn add_peer(&self, id: PeerId, addr: &str, permissions: Permissions) {
		let mut peers = self.peers.write();
		peers.insert(id, Peer::new(addr.to_owned(), permissions));
	}

	/// Forgets a disconnected peer.
	pub fn remove_peer(&self, id: PeerId) {
		let mut peers = self.peers.write();
		peers.remove(&id);
	}

	/// Number of tracked peers.
	pub fn peer_count(&self) -> usize {
		self.peers.read().len()
	}

	/// Records a misbehavior worth `howmuch` points against the peer and
	/// returns whether the peer should now be disconnected. No-ban peers
	/// accumulate score but never trip the flag.
	pub fn misbehaving(&self, id: PeerId, howmuch: i32, message: &str) -> bool {
		let mut peers = self.peers.write();
		let peer = peers
			.entry(id)
			.or_insert_with(|| Peer::new("unknown".to_owned(), Permissions::empty()));
		peer.score += howmuch;
		if peer.permissions.contains(Permissions::NOBAN) {
			info!(
				"peer {} ({}) misbehaving (+{} => {}): {} (noban, not discouraged)",
				id, peer.addr, howmuch, peer.score, message
			);
			return false;
		}
		if peer.score >= DISCOURAGEMENT_THRESHOLD {
			peer.should_discourage = true;
		}
		warn!(
			"peer {} ({}) misbehaving (+{} => {}): {}{}",
			id,
			peer.addr,
			howmuch,
			peer.score,
			message,
			if peer.should_discourage {
				", discouraged"
			} else {
				""
			}
		);
		peer.should_discourage
	}

	/// Whether the peer crossed the discouragement threshold.
	pub fn should_disconnect(&self, id: PeerId) -> bool {
		self.peers
			.read()
			.get(&id)
			.map(|p| p.should_discourage)
			.unwrap_or(false)
	}

	/// The peer's accumulated misbehavior score.
	pub fn misbehavior_score(&self, id: PeerId) -> i32 {
		self.peers.read().get(&id).map(|p| p.score).unwrap_or(0)
	}

	/// Counts one more headers message that failed to connect to the
	/// known chain. Returns true when the throttle tripped; the counter
	/// resets so the penalty applies once per streak.
	pub fn increment_unconnecting_headers(&self, id: PeerId) -> bool {
		let mut peers = self.peers.write();
		let peer = peers
			.entry(id)
			.or_insert_with(|| Peer::new("unknown".to_owned(), Permissions::empty()));
		peer.unconnecting_headers += 1;
		if peer.unconnecting_headers > MAX_UNCONNECTING_HEADERS {
			peer.unconnecting_headers = 0;
			true
		} else {
			false
		}
	}

	/// Clears the non-connecting streak after a batch that connected.
	pub fn reset_unconnecting_headers(&self, id: PeerId) {
		let mut peers = self.peers.write();
		if let Some(peer) = peers.get_mut(&id) {
			peer.unconnecting_headers = 0;
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn score_accumulates_to_discouragement() {
		let peers = PeerManager::new();
		peers.add_peer(1, "10.0.0.1:9333", Permissions::empty());
		assert!(!peers.misbehaving(1, 20, "oversized message"));
		assert!(!peers.misbehaving(1, 50, "orphan quota"));
		assert_eq!(peers.misbehavior_score(1), 70);
		assert!(!peers.should_disconnect(1));
		// 30 more points reach the threshold
		assert!(peers.misbehaving(1, penalty::NON_CONTINUOUS_HEADERS, "non-continuous"));
		assert!(peers.misbehaving(1, 10, "already past it"));
		assert!(peers.should_disconnect(1));
	}

	#[test]
	fn instant_disconnect_penalties() {
		let peers = PeerManager::new();
		peers.add_peer(2, "10.0.0.2:9333", Permissions::empty());
		assert!(peers.misbehaving(2, penalty::INVALID_POW, "invalid pow"));
		assert!(peers.should_disconnect(2));
	}

	#[test]
	fn noban_peers_keep_score_but_stay() {
		let peers = PeerManager::new();
		peers.add_peer(3, "10.0.0.3:9333", Permissions::NOBAN);
		assert!(!peers.misbehaving(3, 100, "invalid header"));
		assert!(!peers.misbehaving(3, 100, "and another"));
		assert_eq!(peers.misbehavior_score(3), 200);
		assert!(!peers.should_disconnect(3));
	}

	#[test]
	fn unconnecting_headers_throttle() {
		let peers = PeerManager::new();
		peers.add_peer(4, "10.0.0.4:9333", Permissions::empty());
		for _ in 0..MAX_UNCONNECTING_HEADERS {
			assert!(!peers.increment_unconnecting_headers(4));
		}
		// the 11th in a row trips the throttle and resets the streak
		assert!(peers.increment_unconnecting_headers(4));
		assert!(!peers.increment_unconnecting_headers(4));

		// a connecting batch clears the streak
		for _ in 0..MAX_UNCONNECTING_HEADERS {
			peers.increment_unconnecting_headers(5);
		}
		peers.reset_unconnecting_headers(5);
		assert!(!peers.increment_unconnecting_headers(5));
	}

	#[test]
	fn unknown_peers_tracked_on_first_violation() {
		let peers = PeerManager::new();
		assert!(!peers.misbehaving(9, 10, "low work"));
		assert_eq!(peers.misbehavior_score(9), 10);
		peers.remove_peer(9);
		assert_eq!(peers.misbehavior_score(9), 0);
	}
}
