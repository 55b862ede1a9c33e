//! Device registry: a process-wide collection of devices indexed by id, a
//! refresh event pulsed on structural change, and the secondary
//! delegated-handle list used by the `CONNECT` object-handoff handshake.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use vdisk_transport::Signal;

use crate::dispatch::ManagedDevice;
use crate::error::{EngineError, Result};

/// Holds every live device plus the handles an upstream consumer has
/// delegated to the engine. Structural mutations (insert, remove) take the
/// single lock; enumeration walks the live set (there is no cached
/// bitmap).
pub struct Registry {
    devices: Mutex<HashMap<u64, Arc<ManagedDevice>>>,
    delegated_handles: Mutex<HashMap<u64, DelegatedHandle>>,
    refresh: Signal,
    max_devices: u64,
    next_delegated_key: Mutex<u64>,
}

/// An opaque handle an upstream consumer has handed to the engine ahead of
/// a `CONNECT` handshake that will claim it by key.
pub struct DelegatedHandle {
    pub object_ptr: u64,
}

impl Registry {
    pub fn new(max_devices: u64) -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
            delegated_handles: Mutex::new(HashMap::new()),
            refresh: Signal::new(),
            max_devices,
            next_delegated_key: Mutex::new(1),
        }
    }

    pub fn max_devices(&self) -> u64 {
        self.max_devices
    }

    /// `max(existing) + 1`, or `0` if the registry is empty. Matches the
    /// reference driver's `FscryptDiskFindFreeDeviceNumber`: a plain walk
    /// that raises the candidate past every existing id, never filling
    /// gaps left by prior removals.
    pub fn allocate_id(&self) -> Result<u64> {
        let devices = self.devices.lock().expect("registry lock poisoned");
        let candidate = devices.keys().copied().max().map_or(0, |max| max + 1);
        if candidate >= self.max_devices {
            return Err(EngineError::InsufficientResources(format!(
                "no free device id below the configured maximum of {}",
                self.max_devices
            )));
        }
        Ok(candidate)
    }

    pub fn reject_if_over_max(&self, id: u64) -> Result<()> {
        if id >= self.max_devices {
            return Err(EngineError::InvalidParameter(format!(
                "device id {id} exceeds the configured maximum of {}",
                self.max_devices
            )));
        }
        Ok(())
    }

    /// Publishes a newly constructed device. Pulses the refresh event
    /// after the mutation is observable.
    pub fn insert(&self, device: Arc<ManagedDevice>) -> Result<()> {
        let id = device.info.id;
        let mut devices = self.devices.lock().expect("registry lock poisoned");
        if devices.contains_key(&id) {
            return Err(EngineError::InvalidParameter(format!(
                "device id {id} is already registered"
            )));
        }
        devices.insert(id, device);
        drop(devices);
        self.refresh.signal();
        log::debug!("registry: published device {id}");
        Ok(())
    }

    /// Removes and tears down a device: terminates its worker (if any),
    /// unpublishes it, then pulses the refresh event.
    pub fn remove(&self, id: u64) -> Result<()> {
        let device = self
            .devices
            .lock()
            .expect("registry lock poisoned")
            .remove(&id)
            .ok_or_else(|| EngineError::NotFound(format!("no device with id {id}")))?;

        device.terminate();
        device.info.media_change.bump();
        self.refresh.signal();
        log::debug!("registry: removed device {id}");
        Ok(())
    }

    pub fn get(&self, id: u64) -> Result<Arc<ManagedDevice>> {
        self.devices
            .lock()
            .expect("registry lock poisoned")
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("no device with id {id}")))
    }

    pub fn list_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .devices
            .lock()
            .expect("registry lock poisoned")
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Blocks until the refresh event next fires.
    pub fn wait_for_refresh(&self) {
        self.refresh.wait();
    }

    /// Registers a handle the upstream consumer is handing off ahead of a
    /// `CONNECT` that will claim it, for the object-handoff handshake.
    pub fn delegate_handle(&self, object_ptr: u64) -> u64 {
        let mut next_key = self.next_delegated_key.lock().expect("delegated key lock poisoned");
        let key = *next_key;
        *next_key += 1;
        self.delegated_handles
            .lock()
            .expect("delegated handles lock poisoned")
            .insert(key, DelegatedHandle { object_ptr });
        key
    }

    /// Validates and removes a delegated handle by key, returning its
    /// `object_ptr`: the client asks its own local registry to validate
    /// and claim the reference.
    pub fn claim_handle(&self, key: u64) -> Result<u64> {
        self.delegated_handles
            .lock()
            .expect("delegated handles lock poisoned")
            .remove(&key)
            .map(|handle| handle.object_ptr)
            .ok_or_else(|| EngineError::NotFound(format!("no delegated handle with key {key}")))
    }
}
