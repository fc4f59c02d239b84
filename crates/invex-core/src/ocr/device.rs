//! Shared compute device handle.

use std::sync::{Mutex, MutexGuard};

use tracing::trace;

use crate::models::config::DetectionConfig;
use crate::models::schema::Device;

/// Handle to the device the capabilities run on.
///
/// An exclusive device admits one capability invocation at a time across
/// all workers; a shared device never blocks.
#[derive(Debug)]
pub struct ComputeDevice {
    kind: Device,
    slot: Option<Mutex<()>>,
}

/// Proof of access to the device; released on drop.
#[derive(Debug)]
pub struct DeviceLease<'a> {
    _guard: Option<MutexGuard<'a, ()>>,
}

impl DeviceLease<'_> {
    /// Release the device explicitly.
    pub fn release(self) {}
}

impl ComputeDevice {
    pub fn new(kind: Device, exclusive: bool) -> Self {
        Self {
            kind,
            slot: exclusive.then(|| Mutex::new(())),
        }
    }

    pub fn from_config(config: &DetectionConfig) -> Self {
        Self::new(config.device, config.exclusive_device())
    }

    pub fn kind(&self) -> Device {
        self.kind
    }

    pub fn is_exclusive(&self) -> bool {
        self.slot.is_some()
    }

    /// Block until the device is available.
    pub fn acquire(&self) -> DeviceLease<'_> {
        let guard = self.slot.as_ref().map(|slot| {
            trace!(device = ?self.kind, "waiting for exclusive device");
            // A panicking holder cannot leave the unit value inconsistent.
            slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
        });
        DeviceLease { _guard: guard }
    }
}
