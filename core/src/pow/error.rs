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

//! Proof-of-work verification errors.

use failure::Fail;

/// Errors from proof-of-work verification.
#[derive(Clone, Debug, Eq, PartialEq, Fail)]
pub enum Error {
	/// The compact difficulty target is negative, zero or overflows.
	#[fail(display = "Invalid difficulty target")]
	InvalidTarget,
	/// The RandomX commitment does not meet the difficulty target.
	#[fail(display = "Commitment above target")]
	HighHash,
	/// The header carries no RandomX hash where one is required.
	#[fail(display = "Missing RandomX hash")]
	MissingRandomXHash,
	/// The header's RandomX hash does not match the recomputed one.
	#[fail(display = "RandomX hash mismatch")]
	HashMismatch,
	/// Failure inside the RandomX engine (VM creation, hashing).
	#[fail(display = "PoW engine error: {}", _0)]
	Engine(String),
}
