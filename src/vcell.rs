//! Volatile cell that conforms to the RAL's register API
//!
//! Register blocks are built out of these cells. The RAL macros only need
//! `read()` and `write()`, so the same cell backs both the memory-mapped
//! controller and the simulated register file used by the tests.

use core::cell::UnsafeCell;

#[repr(transparent)]
pub struct VCell<T>(UnsafeCell<T>);

// Registers are shared between the interrupt handler and thread mode. All
// driver accesses happen inside a critical section.
unsafe impl<T: Send> Sync for VCell<T> {}

impl<T> VCell<T> {
    pub const fn new(val: T) -> Self {
        VCell(UnsafeCell::new(val))
    }
}

impl<T: Copy> VCell<T> {
    pub fn read(&self) -> T {
        unsafe { self.0.get().read_volatile() }
    }
    pub fn write(&self, val: T) {
        unsafe { self.0.get().write_volatile(val) }
    }
}
