//! Signaling between the interrupt handler and blocked callers
//!
//! Everything here lives inside the driver's critical section. The ISR
//! sets completion flags, and transfer calls poll for them with a
//! [`Deadline`].

use crate::{Clock, MAX_ENDPOINTS, WAIT_FOREVER};
use usb_device::{endpoint::EndpointAddress, UsbDirection};

/// One completion bit per FIFO
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventFlags(u32);

impl EventFlags {
    pub const fn new() -> Self {
        EventFlags(0)
    }

    pub fn set(&mut self, fifo: usize) {
        self.0 |= 1 << fifo;
    }

    pub fn set_all(&mut self, mask: u32) {
        self.0 |= mask;
    }

    pub fn clear(&mut self, fifo: usize) {
        self.0 &= !(1 << fifo);
    }

    pub fn is_set(&self, fifo: usize) -> bool {
        self.0 & (1 << fifo) != 0
    }

    /// Clear the bit for `fifo`, returning `true` if it was set
    pub fn take(&mut self, fifo: usize) -> bool {
        let set = self.is_set(fifo);
        self.clear(fifo);
        set
    }
}

/// Binary locks, one per data endpoint and direction
///
/// Every lock starts held. Reaching the configured state releases the
/// locks of the interface's endpoints, which is what keeps transfers from
/// starting before enumeration finishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndpointLocks {
    /// Set bit means available
    available: u16,
}

impl EndpointLocks {
    /// All locks held
    pub const fn held() -> Self {
        EndpointLocks { available: 0 }
    }

    fn index(address: EndpointAddress) -> Option<usize> {
        let number = address.index();
        if !(1..=MAX_ENDPOINTS).contains(&number) {
            return None;
        }
        let dir = (address.direction() == UsbDirection::In) as usize;
        Some((number - 1) * 2 + dir)
    }

    /// Take the lock if it's available
    pub fn try_acquire(&mut self, address: EndpointAddress) -> bool {
        match Self::index(address) {
            Some(idx) if self.available & (1 << idx) != 0 => {
                self.available &= !(1 << idx);
                true
            }
            _ => false,
        }
    }

    /// Make the lock available, whether or not it was held
    pub fn release(&mut self, address: EndpointAddress) {
        if let Some(idx) = Self::index(address) {
            self.available |= 1 << idx;
        }
    }

    pub fn hold_all(&mut self) {
        self.available = 0;
    }
}

/// A point in time after which a wait gives up
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    start: u32,
    timeout: u32,
}

impl Deadline {
    /// Expires `timeout` milliseconds from now. [`WAIT_FOREVER`] never expires.
    pub fn after<C: Clock>(clock: &C, timeout: u32) -> Self {
        Deadline {
            start: clock.millis(),
            timeout,
        }
    }

    pub fn expired<C: Clock>(&self, clock: &C) -> bool {
        self.timeout != WAIT_FOREVER && clock.millis().wrapping_sub(self.start) >= self.timeout
    }
}

/// Spin until `poll` produces a value, or until `deadline` expires
pub fn wait<C: Clock, T>(
    clock: &C,
    deadline: Deadline,
    mut poll: impl FnMut() -> Option<T>,
) -> Option<T> {
    loop {
        if let Some(value) = poll() {
            return Some(value);
        }
        if deadline.expired(clock) {
            return None;
        }
        clock.relax();
    }
}
