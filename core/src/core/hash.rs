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

//! Hash Function
//!
//! Primary hash function used in the protocol: double SHA-256 over the
//! serialized bytes. Hashes are stored little-endian and displayed as
//! big-endian hex, so the displayed form reads as one large number.

use crate::ser::{self, Readable, Reader, Writeable, Writer};
use num_bigint::BigUint;
use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

use ember_util as util;

/// A hash to uniquely (or close enough) identify one of the main blockchain
/// constructs. Used pervasively for block headers and their ancestry.
#[derive(Copy, Clone, PartialEq, PartialOrd, Eq, Ord, Hash, Default)]
pub struct Hash(pub [u8; 32]);

/// The "zero" hash, also the null marker for a missing previous block.
pub const ZERO_HASH: Hash = Hash([0; 32]);

impl Hash {
	/// Whether this is the all-zero (null) hash.
	pub fn is_zero(&self) -> bool {
		self.0.iter().all(|b| *b == 0)
	}

	/// The hash as a byte slice, little-endian storage order.
	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	/// Builds a Hash from a 32-byte slice. Errors on any other length.
	pub fn from_bytes(bytes: &[u8]) -> Result<Hash, ser::Error> {
		if bytes.len() != 32 {
			return Err(ser::Error::CorruptedData);
		}
		let mut h = [0; 32];
		h.copy_from_slice(bytes);
		Ok(Hash(h))
	}

	/// The hash as a 256-bit unsigned integer.
	pub fn to_biguint(&self) -> BigUint {
		BigUint::from_bytes_le(&self.0)
	}

	/// Converts a display-order (big-endian) hex string back into a Hash.
	pub fn from_hex(hex: &str) -> Result<Hash, ser::Error> {
		let mut bytes =
			util::from_hex(hex.to_string()).map_err(|_| ser::Error::CorruptedData)?;
		bytes.reverse();
		Hash::from_bytes(&bytes)
	}

	/// Display-order (big-endian) hex string.
	pub fn to_hex(&self) -> String {
		let mut bytes = self.0.to_vec();
		bytes.reverse();
		util::to_hex(bytes)
	}
}

impl fmt::Display for Hash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_hex())
	}
}

impl fmt::Debug for Hash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		// abbreviated form, enough to tell hashes apart in logs
		f.write_str(&self.to_hex()[..16])
	}
}

impl Writeable for Hash {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_fixed_bytes(&self.0)
	}
}

impl Readable for Hash {
	fn read<R: Reader>(reader: &mut R) -> Result<Hash, ser::Error> {
		let bytes = reader.read_fixed_bytes(32)?;
		Hash::from_bytes(&bytes)
	}
}

impl Serialize for Hash {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.to_hex())
	}
}

impl<'de> Deserialize<'de> for Hash {
	fn deserialize<D>(deserializer: D) -> Result<Hash, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Hash::from_hex(&s).map_err(|_| de::Error::custom("invalid hash hex"))
	}
}

/// Double SHA-256 of the provided bytes, digest reversed into the
/// little-endian storage convention.
pub fn hash_bytes(data: &[u8]) -> Hash {
	let first = Sha256::digest(data);
	let second = Sha256::digest(&first);
	let mut out = [0; 32];
	for (i, b) in second.iter().rev().enumerate() {
		out[i] = *b;
	}
	Hash(out)
}

/// A trait for types that get their hash (double SHA-256) from their byte
/// serialization.
pub trait Hashed {
	/// Obtain the hash of the underlying bytes.
	fn hash(&self) -> Hash {
		hash_bytes(&self.bytes())
	}

	/// The bytes the hash is computed over.
	fn bytes(&self) -> Vec<u8>;
}

impl Hashed for [u8] {
	fn bytes(&self) -> Vec<u8> {
		self.to_owned()
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn display_reverses_storage_order() {
		let mut bytes = [0u8; 32];
		bytes[0] = 0xef;
		bytes[31] = 0xab;
		let h = Hash(bytes);
		let hex = h.to_hex();
		assert!(hex.starts_with("ab"));
		assert!(hex.ends_with("ef"));
		assert_eq!(Hash::from_hex(&hex).unwrap(), h);
	}

	#[test]
	fn double_sha256_known_vector() {
		// double SHA-256 of the empty string, displayed big-endian
		let h = hash_bytes(&[]);
		assert_eq!(
			h.to_hex(),
			"56944c5d3f98413ef45cf54545538103cc9f298e0575820ad3591376e2e0f65d"
		);
	}

	#[test]
	fn biguint_conversion_is_little_endian() {
		let mut bytes = [0u8; 32];
		bytes[0] = 2;
		assert_eq!(Hash(bytes).to_biguint(), BigUint::from(2u32));
	}
}
