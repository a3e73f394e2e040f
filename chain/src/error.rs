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

//! Error types for the chain. Every header acceptance outcome carries a
//! reason drawn from the closed `ErrorKind` set; the transport layer maps
//! these to peer penalties.

use crate::core::ser;
use failure::{Backtrace, Context, Fail};
use std::fmt::{self, Display};
use std::io;

/// Error definition
#[derive(Debug)]
pub struct Error {
	inner: Context<ErrorKind>,
}

/// Chain error definitions
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum ErrorKind {
	/// Resubmission of a header already cached as invalid
	#[fail(display = "Duplicate of invalid header")]
	Duplicate,
	/// The proof of work commitment or hash does not validate
	#[fail(display = "Invalid PoW")]
	HighHash,
	/// A parentless header whose hash is not the configured genesis
	#[fail(display = "Genesis hash mismatch")]
	BadGenesis,
	/// The real genesis submitted through header acceptance
	#[fail(display = "Genesis must be installed via initialize")]
	GenesisViaAccept,
	/// The previous block is invalid or descends from an invalid block
	#[fail(display = "Previous block invalid")]
	BadPrevBlk,
	/// Difficulty bits don't match the ASERT schedule
	#[fail(display = "Incorrect difficulty: expected {:#x}, got {:#x}", _0, _1)]
	BadDiffBits(u32, u32),
	/// Timestamp at or below the median of the last 11 blocks
	#[fail(display = "Timestamp {} not past median time {}", _0, _1)]
	TimeTooOld(i64, i64),
	/// Timestamp too far in the future
	#[fail(display = "Timestamp {} too far in the future", _0)]
	TimeTooNew(i64),
	/// Block version below the minimum accepted
	#[fail(display = "Invalid block version: {}", _0)]
	BadVersion(i32),
	/// The network expired at a configured height, node must update
	#[fail(display = "Network expired at height {}", _0)]
	NetworkExpired(i32),
	/// Parent unknown, header cached in the orphan pool. Not a failure
	/// at the transport layer.
	#[fail(display = "Orphan")]
	Orphan,
	/// Parent unknown and the orphan pool refused the header
	#[fail(display = "Orphan pool full or peer limit exceeded")]
	OrphanLimit,
	/// Internal issue when trying to save or load data from the store
	#[fail(display = "Store error: {}", _0)]
	StoreErr(String),
	/// Error serializing or deserializing a type
	#[fail(display = "Serialization error: {}", _0)]
	SerErr(String),
	/// Anything else: unrecoverable internal errors
	#[fail(display = "Other error: {}", _0)]
	Other(String),
}

impl ErrorKind {
	/// Whether this outcome means the header itself is intrinsically bad,
	/// which the transport layer punishes with an instant-disconnect
	/// penalty. Orphaning and internal errors are not the header's fault.
	pub fn is_bad_header(&self) -> bool {
		match self {
			ErrorKind::Duplicate
			| ErrorKind::HighHash
			| ErrorKind::BadGenesis
			| ErrorKind::GenesisViaAccept
			| ErrorKind::BadPrevBlk
			| ErrorKind::BadDiffBits(_, _)
			| ErrorKind::TimeTooOld(_, _)
			| ErrorKind::TimeTooNew(_)
			| ErrorKind::BadVersion(_)
			| ErrorKind::NetworkExpired(_) => true,
			_ => false,
		}
	}
}

impl Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.cause() {
			Some(cause) => write!(f, "{} - Cause: {}", self.inner, cause),
			None => Display::fmt(&self.inner, f),
		}
	}
}

impl Error {
	/// Get the error kind (the reason code of this outcome).
	pub fn kind(&self) -> ErrorKind {
		self.inner.get_context().clone()
	}
	/// Get the cause, if any.
	pub fn cause(&self) -> Option<&dyn Fail> {
		self.inner.cause()
	}
	/// Get the backtrace, if captured.
	pub fn backtrace(&self) -> Option<&Backtrace> {
		self.inner.backtrace()
	}
}

impl From<ErrorKind> for Error {
	fn from(kind: ErrorKind) -> Error {
		Error {
			inner: Context::new(kind),
		}
	}
}

impl From<Context<ErrorKind>> for Error {
	fn from(inner: Context<ErrorKind>) -> Error {
		Error { inner }
	}
}

impl From<ser::Error> for Error {
	fn from(error: ser::Error) -> Error {
		Error {
			inner: Context::new(ErrorKind::SerErr(format!("{}", error))),
		}
	}
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Error {
		Error {
			inner: Context::new(ErrorKind::StoreErr(e.to_string())),
		}
	}
}
