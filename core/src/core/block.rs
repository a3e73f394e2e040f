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

//! Block header definition and its consensus-critical wire format.
//!
//! The chain is headers-only; a header is a block. The wire format is
//! exactly 100 bytes, all integers little-endian, and must round-trip
//! byte-exact across implementations. Field order and sizes must never
//! change without a hard fork.

use crate::core::hash::{Hash, Hashed, ZERO_HASH};
use crate::ser::{self, Readable, Reader, Writeable, Writer};
use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use ember_util as util;

/// Serialized size of a block header in bytes.
pub const HEADER_SIZE: usize = 100;

// Wire offsets, fixed forever.
const OFF_VERSION: usize = 0;
const OFF_PREV: usize = 4;
const OFF_MINER: usize = 36;
const OFF_TIME: usize = 56;
const OFF_BITS: usize = 60;
const OFF_NONCE: usize = 64;
const OFF_RANDOMX: usize = 68;

/// The 20-byte address of the miner credited by a header.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
	/// All-zero address.
	pub fn zero() -> Address {
		Address([0; 20])
	}

	/// The address as a byte slice.
	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	/// Builds an Address from a 20-byte slice.
	pub fn from_bytes(bytes: &[u8]) -> Result<Address, ser::Error> {
		if bytes.len() != 20 {
			return Err(ser::Error::CorruptedData);
		}
		let mut a = [0; 20];
		a.copy_from_slice(bytes);
		Ok(Address(a))
	}
}

impl fmt::Display for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&util::to_hex(self.0.to_vec()))
	}
}

impl fmt::Debug for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(self, f)
	}
}

impl Serialize for Address {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&util::to_hex(self.0.to_vec()))
	}
}

impl<'de> Deserialize<'de> for Address {
	fn deserialize<D>(deserializer: D) -> Result<Address, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		let bytes = util::from_hex(s).map_err(de::Error::custom)?;
		Address::from_bytes(&bytes).map_err(|_| de::Error::custom("invalid address hex"))
	}
}

/// Block header, the only consensus entity of the chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
	/// Version of the block
	pub version: i32,
	/// Hash of the block previous to this in the chain, zero for genesis.
	pub prev_hash: Hash,
	/// Address credited with this block.
	pub miner_address: Address,
	/// Timestamp at which the block was built (seconds since epoch).
	pub time: u32,
	/// Difficulty target for the block in compact form.
	pub bits: u32,
	/// Nonce increment used to mine this block.
	pub nonce: u32,
	/// RandomX hash of the header, the proof-of-work witness.
	pub randomx_hash: Hash,
}

impl Default for BlockHeader {
	fn default() -> BlockHeader {
		BlockHeader {
			version: 1,
			prev_hash: ZERO_HASH,
			miner_address: Address::zero(),
			time: 0,
			bits: 0,
			nonce: 0,
			randomx_hash: ZERO_HASH,
		}
	}
}

impl Writeable for BlockHeader {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		writer.write_i32(self.version)?;
		self.prev_hash.write(writer)?;
		writer.write_fixed_bytes(self.miner_address.as_bytes())?;
		writer.write_u32(self.time)?;
		writer.write_u32(self.bits)?;
		writer.write_u32(self.nonce)?;
		self.randomx_hash.write(writer)
	}
}

impl Readable for BlockHeader {
	fn read<R: Reader>(reader: &mut R) -> Result<BlockHeader, ser::Error> {
		let version = reader.read_i32()?;
		let prev_hash = Hash::read(reader)?;
		let miner_address = Address::from_bytes(&reader.read_fixed_bytes(20)?)?;
		let time = reader.read_u32()?;
		let bits = reader.read_u32()?;
		let nonce = reader.read_u32()?;
		let randomx_hash = Hash::read(reader)?;
		Ok(BlockHeader {
			version,
			prev_hash,
			miner_address,
			time,
			bits,
			nonce,
			randomx_hash,
		})
	}
}

impl Hashed for BlockHeader {
	fn bytes(&self) -> Vec<u8> {
		let bytes = ser::ser_vec(self).expect("serialization to vec never fails");
		debug_assert_eq!(bytes.len(), HEADER_SIZE);
		bytes
	}
}

impl BlockHeader {
	/// Serialized header with the randomx field zeroed out, the exact input
	/// over which the RandomX hash is computed.
	pub fn pow_bytes(&self) -> Vec<u8> {
		let mut tmp = self.clone();
		tmp.randomx_hash = ZERO_HASH;
		tmp.bytes()
	}

	/// Deserialize a header from an exactly HEADER_SIZE byte slice. Any
	/// other length is rejected outright, preventing silent truncation or
	/// padding that could split consensus.
	pub fn from_wire(data: &[u8]) -> Result<BlockHeader, ser::Error> {
		if data.len() != HEADER_SIZE {
			return Err(ser::Error::CorruptedData);
		}
		ser::deserialize(&mut &data[..])
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn sample_header() -> BlockHeader {
		BlockHeader {
			version: 7,
			prev_hash: Hash([3; 32]),
			miner_address: Address([9; 20]),
			time: 1_700_000_000,
			bits: 0x1d00_ffff,
			nonce: 0xdead_beef,
			randomx_hash: Hash([5; 32]),
		}
	}

	#[test]
	fn wire_layout_is_100_bytes_little_endian() {
		let header = sample_header();
		let bytes = header.bytes();
		assert_eq!(bytes.len(), HEADER_SIZE);
		assert_eq!(&bytes[OFF_VERSION..OFF_VERSION + 4], &[7, 0, 0, 0]);
		assert_eq!(&bytes[OFF_PREV..OFF_PREV + 32], &[3; 32][..]);
		assert_eq!(&bytes[OFF_MINER..OFF_MINER + 20], &[9; 20][..]);
		assert_eq!(
			&bytes[OFF_TIME..OFF_TIME + 4],
			&1_700_000_000u32.to_le_bytes()
		);
		assert_eq!(&bytes[OFF_BITS..OFF_BITS + 4], &[0xff, 0xff, 0x00, 0x1d]);
		assert_eq!(&bytes[OFF_NONCE..OFF_NONCE + 4], &[0xef, 0xbe, 0xad, 0xde]);
		assert_eq!(&bytes[OFF_RANDOMX..OFF_RANDOMX + 32], &[5; 32][..]);
	}

	#[test]
	fn round_trip_is_exact() {
		let header = sample_header();
		let bytes = header.bytes();
		let decoded = BlockHeader::from_wire(&bytes).unwrap();
		assert_eq!(decoded, header);
		assert_eq!(decoded.bytes(), bytes);
	}

	#[test]
	fn wrong_length_rejected() {
		let bytes = sample_header().bytes();
		assert!(BlockHeader::from_wire(&bytes[..99]).is_err());
		let mut long = bytes.clone();
		long.push(0);
		assert!(BlockHeader::from_wire(&long).is_err());
	}

	#[test]
	fn pow_bytes_zeroes_randomx_field_only() {
		let header = sample_header();
		let pow = header.pow_bytes();
		assert_eq!(pow.len(), HEADER_SIZE);
		assert_eq!(&pow[OFF_RANDOMX..], &[0; 32][..]);
		assert_eq!(&pow[..OFF_RANDOMX], &header.bytes()[..OFF_RANDOMX]);
	}

	#[test]
	fn hash_changes_with_nonce() {
		let a = sample_header();
		let mut b = a.clone();
		b.nonce += 1;
		assert_ne!(a.hash(), b.hash());
	}
}
