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

//! Serialization and deserialization layer specialized for binary encoding.
//! Ensures consistency and safety. Basically a minimal subset of
//! rustc_serialize customized for our need.
//!
//! All integers are little-endian on the wire; the consensus header
//! format is little-endian and the index file reuses this layer.
//!
//! To use it simply implement `Writeable` or `Readable` and then use the
//! `serialize` or `deserialize` functions on them as appropriate.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{self, Read, Write};

/// Possible errors deriving from serializing or deserializing.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
	/// Wraps an io error produced when reading or writing
	IOErr(String, io::ErrorKind),
	/// Expected a given value that wasn't found
	UnexpectedData {
		/// What we wanted
		expected: Vec<u8>,
		/// What we got
		received: Vec<u8>,
	},
	/// Data wasn't in a consumable format
	CorruptedData,
	/// When asked to read too much data
	TooLargeReadErr,
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		Error::IOErr(format!("{}", e), e.kind())
	}
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match *self {
			Error::IOErr(ref e, ref _k) => write!(f, "{}", e),
			Error::UnexpectedData {
				expected: ref e,
				received: ref r,
			} => write!(f, "expected {:?}, got {:?}", e, r),
			Error::CorruptedData => f.write_str("corrupted data"),
			Error::TooLargeReadErr => f.write_str("too large read"),
		}
	}
}

impl std::error::Error for Error {}

/// Implementations defined how different numbers and binary structures are
/// written to an underlying stream or container (depending on implementation).
pub trait Writer {
	/// Writes a u8 as bytes
	fn write_u8(&mut self, n: u8) -> Result<(), Error>;
	/// Writes a u16 as bytes
	fn write_u16(&mut self, n: u16) -> Result<(), Error>;
	/// Writes a u32 as bytes
	fn write_u32(&mut self, n: u32) -> Result<(), Error>;
	/// Writes a i32 as bytes
	fn write_i32(&mut self, n: i32) -> Result<(), Error>;
	/// Writes a u64 as bytes
	fn write_u64(&mut self, n: u64) -> Result<(), Error>;
	/// Writes a i64 as bytes
	fn write_i64(&mut self, n: i64) -> Result<(), Error>;
	/// Writes a fixed number of bytes. The reader is expected to know the
	/// actual length on read.
	fn write_fixed_bytes(&mut self, bytes: &[u8]) -> Result<(), Error>;
}

/// Implementations defined how different numbers and binary structures are
/// read from an underlying stream or container (depending on implementation).
pub trait Reader {
	/// Read a u8 from the underlying Read
	fn read_u8(&mut self) -> Result<u8, Error>;
	/// Read a u16 from the underlying Read
	fn read_u16(&mut self) -> Result<u16, Error>;
	/// Read a u32 from the underlying Read
	fn read_u32(&mut self) -> Result<u32, Error>;
	/// Read a i32 from the underlying Read
	fn read_i32(&mut self) -> Result<i32, Error>;
	/// Read a u64 from the underlying Read
	fn read_u64(&mut self) -> Result<u64, Error>;
	/// Read a i64 from the underlying Read
	fn read_i64(&mut self) -> Result<i64, Error>;
	/// Read a fixed number of bytes from the underlying reader.
	fn read_fixed_bytes(&mut self, length: usize) -> Result<Vec<u8>, Error>;
	/// Consumes a u32 from the reader, producing an error if it doesn't have
	/// the expected value
	fn expect_u32(&mut self, val: u32) -> Result<u32, Error>;
}

/// Trait that every type that can be serialized as binary must implement.
/// Writes directly to a Writer, a utility type thinly wrapping an
/// underlying Write implementation.
pub trait Writeable {
	/// Write the data held by this Writeable to the provided writer
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error>;
}

/// Trait that every type that can be deserialized from binary must implement.
/// Reads directly to a Reader, a utility type thinly wrapping an
/// underlying Read implementation.
pub trait Readable: Sized {
	/// Reads the data necessary to this Readable from the provided reader
	fn read<R: Reader>(reader: &mut R) -> Result<Self, Error>;
}

/// Deserializes a Readable from any std::io::Read implementation.
pub fn deserialize<T: Readable, R: Read>(source: &mut R) -> Result<T, Error> {
	let mut reader = BinReader::new(source);
	T::read(&mut reader)
}

/// Serializes a Writeable into any std::io::Write implementation.
pub fn serialize<T: Writeable, W: Write>(sink: &mut W, thing: &T) -> Result<(), Error> {
	let mut writer = BinWriter::new(sink);
	thing.write(&mut writer)
}

/// Utility function to serialize a writeable directly in memory using a
/// Vec<u8>.
pub fn ser_vec<T: Writeable>(thing: &T) -> Result<Vec<u8>, Error> {
	let mut vec = vec![];
	serialize(&mut vec, thing)?;
	Ok(vec)
}

/// Utility wrapper for an underlying byte Reader. Defines higher level
/// methods to read numbers, byte vectors, hashes, etc.
pub struct BinReader<'a, R: Read> {
	source: &'a mut R,
}

impl<'a, R: Read> BinReader<'a, R> {
	/// Constructor for a new BinReader for the provided source
	pub fn new(source: &'a mut R) -> Self {
		BinReader { source }
	}
}

impl<'a, R: Read> Reader for BinReader<'a, R> {
	fn read_u8(&mut self) -> Result<u8, Error> {
		self.source.read_u8().map_err(From::from)
	}
	fn read_u16(&mut self) -> Result<u16, Error> {
		self.source.read_u16::<LittleEndian>().map_err(From::from)
	}
	fn read_u32(&mut self) -> Result<u32, Error> {
		self.source.read_u32::<LittleEndian>().map_err(From::from)
	}
	fn read_i32(&mut self) -> Result<i32, Error> {
		self.source.read_i32::<LittleEndian>().map_err(From::from)
	}
	fn read_u64(&mut self) -> Result<u64, Error> {
		self.source.read_u64::<LittleEndian>().map_err(From::from)
	}
	fn read_i64(&mut self) -> Result<i64, Error> {
		self.source.read_i64::<LittleEndian>().map_err(From::from)
	}
	fn read_fixed_bytes(&mut self, length: usize) -> Result<Vec<u8>, Error> {
		// not reading more than 100k bytes in a single read
		if length > 100_000 {
			return Err(Error::TooLargeReadErr);
		}
		let mut buf = vec![0; length];
		self.source
			.read_exact(&mut buf)
			.map(move |_| buf)
			.map_err(From::from)
	}
	fn expect_u32(&mut self, val: u32) -> Result<u32, Error> {
		let b = self.read_u32()?;
		if b == val {
			Ok(b)
		} else {
			Err(Error::UnexpectedData {
				expected: val.to_le_bytes().to_vec(),
				received: b.to_le_bytes().to_vec(),
			})
		}
	}
}

/// Utility wrapper for an underlying byte Writer. Defines higher level
/// methods to write numbers, byte vectors, hashes, etc.
pub struct BinWriter<'a, W: Write> {
	sink: &'a mut W,
}

impl<'a, W: Write> BinWriter<'a, W> {
	/// Wraps a standard Write in a new BinWriter
	pub fn new(sink: &'a mut W) -> Self {
		BinWriter { sink }
	}
}

impl<'a, W: Write> Writer for BinWriter<'a, W> {
	fn write_u8(&mut self, n: u8) -> Result<(), Error> {
		self.sink.write_u8(n).map_err(From::from)
	}
	fn write_u16(&mut self, n: u16) -> Result<(), Error> {
		self.sink.write_u16::<LittleEndian>(n).map_err(From::from)
	}
	fn write_u32(&mut self, n: u32) -> Result<(), Error> {
		self.sink.write_u32::<LittleEndian>(n).map_err(From::from)
	}
	fn write_i32(&mut self, n: i32) -> Result<(), Error> {
		self.sink.write_i32::<LittleEndian>(n).map_err(From::from)
	}
	fn write_u64(&mut self, n: u64) -> Result<(), Error> {
		self.sink.write_u64::<LittleEndian>(n).map_err(From::from)
	}
	fn write_i64(&mut self, n: i64) -> Result<(), Error> {
		self.sink.write_i64::<LittleEndian>(n).map_err(From::from)
	}
	fn write_fixed_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
		self.sink.write_all(bytes).map_err(From::from)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	struct Pair(u32, i64);

	impl Writeable for Pair {
		fn write<W: Writer>(&self, writer: &mut W) -> Result<(), Error> {
			writer.write_u32(self.0)?;
			writer.write_i64(self.1)
		}
	}

	impl Readable for Pair {
		fn read<R: Reader>(reader: &mut R) -> Result<Pair, Error> {
			Ok(Pair(reader.read_u32()?, reader.read_i64()?))
		}
	}

	#[test]
	fn serialize_deserialize() {
		let vec = ser_vec(&Pair(42, -7)).unwrap();
		assert_eq!(vec.len(), 12);
		// little-endian on the wire
		assert_eq!(&vec[0..4], &[42, 0, 0, 0]);
		let pair: Pair = deserialize(&mut &vec[..]).unwrap();
		assert_eq!(pair.0, 42);
		assert_eq!(pair.1, -7);
	}

	#[test]
	fn truncated_read_errors() {
		let vec = ser_vec(&Pair(1, 1)).unwrap();
		let res: Result<Pair, Error> = deserialize(&mut &vec[..vec.len() - 1]);
		assert!(res.is_err());
	}
}
