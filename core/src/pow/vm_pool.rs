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

//! Epoch-keyed cache of RandomX virtual machines.
//!
//! RandomX VMs are expensive to create (around a second in light mode)
//! and hashing is not reentrant on a single VM, so VMs are cached per
//! epoch and each carries its own hashing mutex. The pool mutex is held
//! only for lookup and insertion; the per-VM mutex only for the duration
//! of a hash computation.

use crate::pow::Error;
use lru_cache::LruCache;
use std::sync::Arc;

use ember_util::Mutex;

/// Number of epochs (and therefore VMs) kept alive by default.
pub const DEFAULT_VM_CACHE_SIZE: usize = 2;

/// The epoch a timestamp falls into. One RandomX key (and VM) is valid
/// per epoch.
pub fn epoch_for_time(time: u32, epoch_duration: i64) -> u32 {
	debug_assert!(epoch_duration > 0);
	(i64::from(time) / epoch_duration) as u32
}

/// Creates the backing virtual machine for a given epoch. Implemented by
/// the RandomX engine collaborator (and by lightweight test doubles).
pub trait VmFactory: Send + Sync {
	/// The virtual machine type produced.
	type Vm: Send;

	/// Build a VM keyed to the given epoch.
	fn create_vm(&self, epoch: u32) -> Result<Self::Vm, Error>;
}

/// A cached VM together with the mutex serializing hash computations
/// on it.
pub struct EpochVm<V> {
	/// The epoch this VM is keyed to.
	pub epoch: u32,
	vm: Mutex<V>,
}

impl<V> EpochVm<V> {
	/// Runs `f` with exclusive access to the VM.
	pub fn with_vm<R>(&self, f: impl FnOnce(&mut V) -> R) -> R {
		let mut vm = self.vm.lock();
		f(&mut vm)
	}
}

/// LRU pool of per-epoch VMs. Eviction happens on insert once the cache
/// holds `cache_size` epochs.
pub struct VmPool<F: VmFactory> {
	factory: F,
	vms: Mutex<LruCache<u32, Arc<EpochVm<F::Vm>>>>,
}

impl<F: VmFactory> VmPool<F> {
	/// New pool around the given factory.
	pub fn new(factory: F, cache_size: usize) -> VmPool<F> {
		VmPool {
			factory,
			vms: Mutex::new(LruCache::new(cache_size.max(1))),
		}
	}

	/// The VM for the given epoch, creating and caching it if absent.
	pub fn get(&self, epoch: u32) -> Result<Arc<EpochVm<F::Vm>>, Error> {
		let mut vms = self.vms.lock();
		if let Some(vm) = vms.get_mut(&epoch) {
			return Ok(vm.clone());
		}
		debug!("pow: creating RandomX VM for epoch {}", epoch);
		let vm = Arc::new(EpochVm {
			epoch,
			vm: Mutex::new(self.factory.create_vm(epoch)?),
		});
		vms.insert(epoch, vm.clone());
		Ok(vm)
	}

	/// Number of VMs currently cached.
	pub fn len(&self) -> usize {
		self.vms.lock().len()
	}

	/// Whether the pool currently holds no VM.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
