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

//! File utilities. Crash-safe atomic file replacement used by the chain
//! index persistence.

use rand::{thread_rng, Rng};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Writes `data` to `path` atomically: the data is first written to a
/// temporary file in the same directory, the file is fsynced, the parent
/// directory is fsynced, then the temporary file is renamed over `path`.
/// A crash at any point leaves either the old file or the new file, never
/// a torn write.
pub fn write_atomic<P: AsRef<Path>>(path: P, data: &[u8]) -> io::Result<()> {
	let path = path.as_ref();
	let parent = match path.parent() {
		Some(p) if !p.as_os_str().is_empty() => {
			fs::create_dir_all(p)?;
			Some(p.to_path_buf())
		}
		_ => None,
	};

	let tmp_path = temp_sibling(path);
	{
		let mut tmp = OpenOptions::new()
			.write(true)
			.create_new(true)
			.open(&tmp_path)?;
		if let Err(e) = tmp.write_all(data).and_then(|_| tmp.sync_all()) {
			let _ = fs::remove_file(&tmp_path);
			return Err(e);
		}
	}

	// Sync the directory so the rename itself is durable.
	if let Some(dir) = &parent {
		sync_dir(dir)?;
	}

	if let Err(e) = fs::rename(&tmp_path, path) {
		let _ = fs::remove_file(&tmp_path);
		return Err(e);
	}

	if let Some(dir) = &parent {
		sync_dir(dir)?;
	}
	Ok(())
}

/// Reads the full contents of a file.
pub fn read<P: AsRef<Path>>(path: P) -> io::Result<Vec<u8>> {
	let mut file = File::open(path)?;
	let mut data = vec![];
	file.read_to_end(&mut data)?;
	Ok(data)
}

fn temp_sibling(path: &Path) -> PathBuf {
	let suffix: u16 = thread_rng().gen();
	let mut os = path.as_os_str().to_owned();
	os.push(format!(".tmp.{:04x}", suffix));
	PathBuf::from(os)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
	File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
	// Directory handles cannot be fsynced on this platform; the rename is
	// still atomic.
	Ok(())
}
