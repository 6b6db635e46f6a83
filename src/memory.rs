//! DMA memory for the control endpoint

#![allow(clippy::declare_interior_mutable_const)] // Usage is legit in this module.

use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicBool, Ordering},
};

use crate::setup::SETUP_LEN;

/// Largest control data stage the driver sends
///
/// Fits a full string descriptor, which is the longest reply.
pub const REPLY_LEN: usize = 256;

#[repr(C, align(4))]
struct Buffers {
    setup: [u8; SETUP_LEN],
    reply: [u8; REPLY_LEN],
}

/// Memory that the VDMA control channel reads and writes
///
/// The driver captures SETUP packets into this memory, and stages
/// descriptor replies here. Allocate a `static` object and supply it to
/// [`UsbDevice::new`](crate::UsbDevice::new). The memory can back only one
/// driver.
///
/// ```
/// use npu_usbd::ControlMemory;
///
/// static CONTROL_MEMORY: ControlMemory = ControlMemory::new();
/// ```
pub struct ControlMemory {
    buffers: UnsafeCell<Buffers>,
    taken: AtomicBool,
}

unsafe impl Sync for ControlMemory {}

impl ControlMemory {
    pub const fn new() -> Self {
        ControlMemory {
            buffers: UnsafeCell::new(Buffers {
                setup: [0; SETUP_LEN],
                reply: [0; REPLY_LEN],
            }),
            taken: AtomicBool::new(false),
        }
    }

    /// Take the buffers
    ///
    /// Returns `None` if they were already taken.
    pub(crate) fn take(&'static self) -> Option<ControlBuffers> {
        (!self.taken.swap(true, Ordering::SeqCst)).then(|| ControlBuffers {
            buffers: self.buffers.get(),
        })
    }
}

impl Default for ControlMemory {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive handle to a [`ControlMemory`]
pub struct ControlBuffers {
    buffers: *mut Buffers,
}

// Safety: the handle is unique. It's only used behind the driver's
// critical section.
unsafe impl Send for ControlBuffers {}

impl ControlBuffers {
    /// Address for the VDMA to capture a SETUP packet
    pub fn setup_address(&self) -> usize {
        // Safety: no reference is formed; this only computes the address.
        unsafe { core::ptr::addr_of_mut!((*self.buffers).setup) as usize }
    }

    /// Address of the staged reply
    pub fn reply_address(&self) -> usize {
        unsafe { core::ptr::addr_of_mut!((*self.buffers).reply) as usize }
    }

    /// Read the captured SETUP packet
    ///
    /// Call only after the capture completed.
    pub fn setup(&self) -> [u8; SETUP_LEN] {
        // Safety: the memory is 'static, and the VDMA isn't writing it.
        // Volatile, since the compiler can't see the VDMA's write.
        unsafe { core::ptr::addr_of!((*self.buffers).setup).read_volatile() }
    }

    /// Stage a reply
    ///
    /// `fill` writes into the reply buffer. Call only while the VDMA isn't
    /// reading the reply.
    pub fn stage<R>(&mut self, fill: impl FnOnce(&mut [u8; REPLY_LEN]) -> R) -> R {
        // Safety: the handle is unique, and the VDMA is idle.
        let reply = unsafe { &mut *core::ptr::addr_of_mut!((*self.buffers).reply) };
        fill(reply)
    }
}
