//! Fixed-size registry of the devices a process controls.
//!
//! A device id is first reserved, then a [`Device`] is attached to the
//! reservation. The [`DeviceHandle`] returned by [`DeviceRegistry::reserve`]
//! is the only way to reach the device and is consumed on release. A
//! handle only opens the registry that issued it.

use crate::device::Device;
use p4dev_hw::{P4DevError, P4DevResult, RegisterAccess};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

static NEXT_REGISTRY: AtomicU64 = AtomicU64::new(0);

/// Proof of a reservation in a [`DeviceRegistry`].
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceHandle {
    registry: u64,
    id: usize,
}

impl DeviceHandle {
    pub fn id(&self) -> usize {
        self.id
    }
}

#[derive(Debug)]
enum Slot<R: RegisterAccess> {
    Free,
    Reserved,
    Attached(Box<Device<R>>),
}

/// Devices indexed by id.
#[derive(Debug)]
pub struct DeviceRegistry<R: RegisterAccess> {
    id: u64,
    slots: Vec<Slot<R>>,
}

impl<R: RegisterAccess> DeviceRegistry<R> {
    /// Creates a registry for `count` devices.
    pub fn new(count: usize) -> Self {
        Self {
            id: NEXT_REGISTRY.fetch_add(1, Ordering::Relaxed),
            slots: (0..count).map(|_| Slot::Free).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_reserved(&self, id: usize) -> bool {
        self.slots.get(id).is_some_and(|s| !matches!(s, Slot::Free))
    }

    /// Reserves device `id`.
    pub fn reserve(&mut self, id: usize) -> P4DevResult<DeviceHandle> {
        let count = self.slots.len();
        let slot = self
            .slots
            .get_mut(id)
            .ok_or(P4DevError::DeviceIndexError { device: id, count })?;
        if !matches!(slot, Slot::Free) {
            return Err(P4DevError::DeviceReserved { device: id });
        }
        *slot = Slot::Reserved;
        Ok(DeviceHandle {
            registry: self.id,
            id,
        })
    }

    /// Attaches `device` to the reservation, returning the device it replaces.
    pub fn attach(&mut self, handle: &DeviceHandle, device: Device<R>) -> P4DevResult<Option<Device<R>>> {
        let slot = self.slot_mut(handle)?;
        let previous = std::mem::replace(slot, Slot::Attached(Box::new(device)));
        if let Slot::Attached(device) = &*slot {
            info!("Registry: device {} attached as {}", device.name(), handle.id);
        }
        Ok(match previous {
            Slot::Attached(device) => Some(*device),
            _ => None,
        })
    }

    pub fn device(&self, handle: &DeviceHandle) -> P4DevResult<&Device<R>> {
        self.check_owner(handle)?;
        match self.slots.get(handle.id) {
            Some(Slot::Attached(device)) => Ok(&**device),
            Some(_) => Err(P4DevError::DeviceNotAttached { device: handle.id }),
            None => Err(self.index_error(handle.id)),
        }
    }

    pub fn device_mut(&mut self, handle: &DeviceHandle) -> P4DevResult<&mut Device<R>> {
        match self.slot_mut(handle)? {
            Slot::Attached(device) => Ok(&mut **device),
            _ => Err(P4DevError::DeviceNotAttached { device: handle.id }),
        }
    }

    /// Frees the reservation and hands back the attached device, if any.
    ///
    /// A handle from another registry frees nothing.
    pub fn release(&mut self, handle: DeviceHandle) -> Option<Device<R>> {
        if let Err(e) = self.check_owner(&handle) {
            warn!("Registry: {}", e);
            return None;
        }
        let slot = self.slots.get_mut(handle.id)?;
        match std::mem::replace(slot, Slot::Free) {
            Slot::Attached(device) => {
                info!("Registry: device {} released", handle.id);
                Some(*device)
            }
            _ => None,
        }
    }

    fn slot_mut(&mut self, handle: &DeviceHandle) -> P4DevResult<&mut Slot<R>> {
        self.check_owner(handle)?;
        let error = self.index_error(handle.id);
        self.slots.get_mut(handle.id).ok_or(error)
    }

    fn check_owner(&self, handle: &DeviceHandle) -> P4DevResult<()> {
        if handle.registry != self.id {
            return Err(P4DevError::ForeignHandle { device: handle.id });
        }
        Ok(())
    }

    fn index_error(&self, id: usize) -> P4DevError {
        P4DevError::DeviceIndexError {
            device: id,
            count: self.slots.len(),
        }
    }
}
