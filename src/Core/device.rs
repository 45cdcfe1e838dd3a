// Process-wide device context: scoped init plus the frame pinning hook

use anyhow::{bail, Result};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

static DEVICE_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Scoped acquisition of the device I/O layer.
///
/// The accelerator runtime underneath the GPU stages is process-wide, so
/// exactly one context may be live; the pipeline mode acquires it at startup
/// and the drop impl guarantees teardown on every exit path. The context also
/// owns the opaque frame-region registration hook: ring-buffer slots handed
/// to device DMA are pinned so the kernel cannot page them out mid-transfer.
pub struct DeviceContext {
    regions: Mutex<Vec<(usize, usize)>>,
}

impl DeviceContext {
    pub fn acquire() -> Result<Self> {
        if DEVICE_ACTIVE.swap(true, Ordering::AcqRel) {
            bail!("device context already active in this process");
        }
        info!("device context acquired");
        Ok(Self {
            regions: Mutex::new(Vec::new()),
        })
    }

    /// Pin a frame region for device I/O. Failure to pin is downgraded to a
    /// warning: unprivileged processes run fine with pageable frames, just
    /// without the DMA guarantee.
    pub fn register_frame_region(&self, ptr: *mut u8, len: usize) {
        if pin_region(ptr, len) {
            debug!("pinned frame region {:p} ({} bytes)", ptr, len);
        } else {
            warn!("could not pin frame region {:p} ({} bytes)", ptr, len);
        }
        self.regions.lock().push((ptr as usize, len));
    }

    pub fn registered_regions(&self) -> usize {
        self.regions.lock().len()
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        for (addr, len) in self.regions.lock().drain(..) {
            unpin_region(addr as *mut u8, len);
        }
        DEVICE_ACTIVE.store(false, Ordering::Release);
        info!("device context released");
    }
}

#[cfg(unix)]
fn pin_region(ptr: *mut u8, len: usize) -> bool {
    unsafe { libc::mlock(ptr as *const libc::c_void, len) == 0 }
}

#[cfg(unix)]
fn unpin_region(ptr: *mut u8, len: usize) {
    unsafe {
        libc::munlock(ptr as *const libc::c_void, len);
    }
}

#[cfg(not(unix))]
fn pin_region(_ptr: *mut u8, _len: usize) -> bool {
    // No pinning off unix; frames stay pageable.
    false
}

#[cfg(not(unix))]
fn unpin_region(_ptr: *mut u8, _len: usize) {}
