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

//! All the rules required for a blockchain to stay in consensus: compact
//! difficulty targets, accumulated work and the ASERT retargeting
//! algorithm. These rules are "in stone" — breaking them is a hard fork.

use num_bigint::BigUint;
use num_traits::{One, Zero};

/// Number of previous headers a timestamp median is computed over.
pub const MEDIAN_TIME_SPAN: usize = 11;

/// How far in the future (seconds past adjusted time) a header timestamp
/// may lie before it is rejected.
pub const MAX_FUTURE_BLOCK_TIME: i64 = 2 * 60 * 60;

/// Maximum number of headers a single headers message may carry.
pub const MAX_HEADERS_RESULTS: usize = 2000;

/// Anti-DoS work floor buffer. A headers batch must carry at least the
/// work of the active tip minus this many tip-difficulty blocks.
pub const ANTI_DOS_WORK_BUFFER_BLOCKS: u64 = 144;

lazy_static! {
	static ref MAX_TARGET: BigUint = (BigUint::one() << 256u32) - BigUint::one();
}

/// Decodes a compact difficulty target (Bitcoin nBits encoding) into its
/// 256-bit value. Returns None for negative, zero or overflowing targets,
/// which carry no work and never validate.
pub fn decode_compact(bits: u32) -> Option<BigUint> {
	let size = (bits >> 24) as usize;
	let mantissa = bits & 0x007f_ffff;
	let negative = (bits & 0x0080_0000) != 0 && mantissa != 0;
	let overflow = mantissa != 0
		&& (size > 34 || (mantissa > 0xff && size > 33) || (mantissa > 0xffff && size > 32));
	if negative || overflow {
		return None;
	}
	let target = if size <= 3 {
		BigUint::from(mantissa >> (8 * (3 - size)))
	} else {
		BigUint::from(mantissa) << (8 * (size - 3))
	};
	if target.is_zero() {
		None
	} else {
		Some(target)
	}
}

/// Encodes a 256-bit target back into compact form. Inverse of
/// `decode_compact` for canonical encodings.
pub fn encode_compact(target: &BigUint) -> u32 {
	if target.is_zero() {
		return 0;
	}
	let mut size = (target.bits() as usize + 7) / 8;
	let mut compact: u32 = if size <= 3 {
		let low = target.to_u32_digits().first().copied().unwrap_or(0);
		low << (8 * (3 - size))
	} else {
		let shifted = target >> (8 * (size - 3));
		shifted.to_u32_digits().first().copied().unwrap_or(0)
	};
	// the mantissa sign bit must stay clear, bump the exponent instead
	if compact & 0x0080_0000 != 0 {
		compact >>= 8;
		size += 1;
	}
	compact | ((size as u32) << 24)
}

/// Work proven by a single header at the given compact target:
/// 2^256 / (target + 1), computed as ~target / (target + 1) + 1 since
/// 2^256 itself does not fit in 256 bits. Invalid targets prove zero
/// work.
pub fn block_proof(bits: u32) -> BigUint {
	match decode_compact(bits) {
		Some(target) => {
			let neg = &*MAX_TARGET - &target;
			neg / (target + BigUint::one()) + BigUint::one()
		}
		None => BigUint::zero(),
	}
}

/// Calculate the next difficulty target using the ASERT algorithm
/// (aserti3-2d): difficulty doubles or halves for every `half_life`
/// seconds the chain runs behind or ahead of schedule, measured against
/// an anchor block.
///
/// `ref_target` is the anchor block's target, `time_diff` the seconds
/// between the anchor's parent and the candidate's parent, `height_diff`
/// the blocks between anchor and candidate's parent. The result is
/// clamped to [1, pow_limit].
///
/// Fixed point with 16 fractional bits; 2^x on [0,1) is approximated by
/// the cubic 1 + 0.695502049·x + 0.2262698·x² + 0.0782318·x³ (error
/// below 0.013%).
pub fn calculate_asert(
	ref_target: &BigUint,
	pow_target_spacing: i64,
	time_diff: i64,
	height_diff: i64,
	pow_limit: &BigUint,
	half_life: i64,
) -> BigUint {
	assert!(!ref_target.is_zero() && ref_target <= pow_limit);
	assert!(height_diff >= 0);
	assert!(half_life > 0);

	// exponent = (time_diff - ideal_time) / half_life, where
	// ideal_time = spacing * (height_diff + 1), in 65536ths
	let exponent: i128 = ((time_diff as i128
		- pow_target_spacing as i128 * (height_diff as i128 + 1))
		* 65536)
		/ half_life as i128;

	// decompose into integer and fractional parts, arithmetic shift keeps
	// the division floored for negative exponents
	let mut shifts = (exponent >> 16) as i64;
	let frac = (exponent & 0xffff) as u128;
	debug_assert_eq!(exponent, shifts as i128 * 65536 + frac as i128);

	let factor: u64 = 65536
		+ ((195_766_423_245_049u128 * frac
			+ 971_821_376u128 * frac * frac
			+ 5127u128 * frac * frac * frac
			+ (1u128 << 47))
			>> 48) as u64;

	let mut next_target = ref_target * factor;

	// apply the integer part: multiply by 2^(shifts - 16)
	shifts -= 16;
	if shifts <= 0 {
		next_target >>= (-shifts) as usize;
	} else {
		next_target <<= shifts as usize;
	}

	if next_target.is_zero() {
		BigUint::one()
	} else if next_target > *pow_limit {
		pow_limit.clone()
	} else {
		next_target
	}
}
