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

//! One-file binary persistence of the block index.
//!
//! Entries are written in insertion order, which guarantees parents
//! precede children, so loading can wire parent links in a single pass.
//! Writes go through the crash-safe atomic writer: temp file, fsync,
//! directory fsync, rename.

use crate::core::core::{BlockHeader, Hash, Hashed, ZERO_HASH};
use crate::core::ser::{self, Readable, Reader, Writeable, Writer};
use crate::error::{Error, ErrorKind};
use crate::index::{BlockIndex, EntryId, Status};
use crate::util::file;
use num_bigint::BigUint;
use std::path::Path;

const HEADERS_FILE_MAGIC: u32 = 0x454d_4252;
const HEADERS_FILE_VERSION: u16 = 1;

/// Everything a headers file restores.
pub(crate) struct LoadedState {
	pub index: BlockIndex,
	pub tip: EntryId,
	pub best: Option<EntryId>,
}

struct EntryRecord {
	header: BlockHeader,
	height: i32,
	status: u32,
	work: BigUint,
	time_received: i64,
}

impl Writeable for EntryRecord {
	fn write<W: Writer>(&self, writer: &mut W) -> Result<(), ser::Error> {
		self.header.write(writer)?;
		writer.write_i32(self.height)?;
		writer.write_u32(self.status)?;
		let mut work = self.work.to_bytes_le();
		work.resize(32, 0);
		writer.write_fixed_bytes(&work)?;
		writer.write_i64(self.time_received)
	}
}

impl Readable for EntryRecord {
	fn read<R: Reader>(reader: &mut R) -> Result<EntryRecord, ser::Error> {
		let header = BlockHeader::read(reader)?;
		let height = reader.read_i32()?;
		let status = reader.read_u32()?;
		let work = BigUint::from_bytes_le(&reader.read_fixed_bytes(32)?);
		let time_received = reader.read_i64()?;
		Ok(EntryRecord {
			header,
			height,
			status,
			work,
			time_received,
		})
	}
}

/// Serializes the whole index plus the active tip and best header into
/// `path`, atomically.
pub(crate) fn save_index(
	index: &BlockIndex,
	genesis_hash: &Hash,
	tip: EntryId,
	best: Option<EntryId>,
	path: &Path,
) -> Result<(), Error> {
	let mut data = vec![];
	{
		let mut writer = ser::BinWriter::new(&mut data);
		writer.write_u32(HEADERS_FILE_MAGIC)?;
		writer.write_u16(HEADERS_FILE_VERSION)?;
		genesis_hash.write(&mut writer)?;
		index.entry(tip).hash().write(&mut writer)?;
		match best {
			Some(best) => index.entry(best).hash().write(&mut writer)?,
			None => ZERO_HASH.write(&mut writer)?,
		}
		writer.write_u64(index.len() as u64)?;
		for id in index.ids() {
			let entry = index.entry(id);
			EntryRecord {
				header: index.header(id),
				height: entry.height(),
				status: entry.status().raw(),
				work: entry.work().clone(),
				time_received: entry.time_received(),
			}
			.write(&mut writer)?;
		}
	}
	file::write_atomic(path, &data)?;
	info!(
		"store: saved {} headers to {}",
		index.len(),
		path.display()
	);
	Ok(())
}

/// Rebuilds the index from `path`. The file's genesis must match the
/// configured one and every record must reproduce the height and work
/// recomputed from its parent, otherwise the file is rejected as
/// corrupted.
pub(crate) fn load_index(path: &Path, expected_genesis: &Hash) -> Result<LoadedState, Error> {
	let data = file::read(path)?;
	let mut cursor = &data[..];
	let mut reader = ser::BinReader::new(&mut cursor);

	reader
		.expect_u32(HEADERS_FILE_MAGIC)
		.map_err(|_| ErrorKind::StoreErr("bad headers file magic".to_owned()))?;
	let version = reader.read_u16()?;
	if version != HEADERS_FILE_VERSION {
		return Err(ErrorKind::StoreErr(format!("unknown headers file version {}", version)).into());
	}

	let genesis_hash = Hash::read(&mut reader)?;
	if genesis_hash != *expected_genesis {
		return Err(ErrorKind::StoreErr(format!(
			"genesis mismatch: file has {}, expected {}",
			genesis_hash, expected_genesis
		))
		.into());
	}
	let tip_hash = Hash::read(&mut reader)?;
	let best_hash = Hash::read(&mut reader)?;
	let count = reader.read_u64()?;
	if count == 0 {
		return Err(ErrorKind::StoreErr("headers file holds no genesis".to_owned()).into());
	}

	let mut index = BlockIndex::new();
	for i in 0..count {
		let record = EntryRecord::read(&mut reader)?;
		let id = if i == 0 {
			if !record.header.prev_hash.is_zero() || record.header.hash() != genesis_hash {
				return Err(
					ErrorKind::StoreErr("first record is not the genesis header".to_owned()).into(),
				);
			}
			index.initialize(&record.header)?
		} else {
			index.add(&record.header, record.time_received)?
		};
		// heights and work are recomputed from the parent on insert; a
		// disagreement with the file means it was corrupted
		let entry = index.entry(id);
		if entry.height() != record.height || *entry.work() != record.work {
			return Err(ErrorKind::StoreErr(format!(
				"corrupted record for {} at height {}",
				entry.hash(),
				record.height
			))
			.into());
		}
		index.entry_mut(id).status = Status::from_raw(record.status);
	}

	let tip = index
		.lookup(&tip_hash)
		.ok_or_else(|| ErrorKind::StoreErr("active tip not present in file".to_owned()))?;
	let best = if best_hash == ZERO_HASH {
		None
	} else {
		Some(index.lookup(&best_hash).ok_or_else(|| {
			ErrorKind::StoreErr("best header not present in file".to_owned())
		})?)
	};

	info!(
		"store: loaded {} headers from {}",
		index.len(),
		path.display()
	);
	Ok(LoadedState { index, tip, best })
}
