//! A USB 2.0 device controller driver for four-FIFO, VDMA-backed SoCs
//!
//! `npu-usbd` runs enumeration from the controller's interrupt handler, and
//! offers blocking bulk and interrupt transfers to application threads.
//! The device presents one configuration with one interface of up to four
//! bulk or interrupt endpoints, described with the tables in [`descriptor`].
//!
//! To interface the library, you must define a safe implementation of
//! [`Peripherals`], and supply a [`Clock`]. Then,
//!
//! 1. create a [`UsbDevice`] with a `static` [`ControlMemory`].
//! 2. call [`initialize()`](UsbDevice::initialize) with your descriptors.
//! 3. call [`on_interrupt()`](UsbDevice::on_interrupt) from the USB
//!    interrupt handler, and enable interrupts with
//!    [`set_interrupts()`](UsbDevice::set_interrupts).
//! 4. call the transfer methods from thread mode. They block until the
//!    host configures the device.
//!
//! Shared state is guarded with [`critical-section`]. Your program must
//! provide a critical section implementation, such as the one from
//! `cortex-m`'s `critical-section-single-core` feature.
//!
//! [`critical-section`]: https://crates.io/crates/critical-section

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod log;

mod bus;
mod driver;
mod event;
mod fifo;
mod memory;
mod ral;
mod sync;
mod transfer;
mod vcell;

#[cfg(test)]
mod sim;

pub mod descriptor;
pub mod setup;

pub use bus::UsbDevice;
pub use memory::ControlMemory;
pub use usb_device::{endpoint::EndpointAddress, UsbDirection};

/// Physical FIFOs in the controller
pub const FIFO_COUNT: usize = 4;

/// Data endpoints the interface may declare
///
/// Endpoint numbers run from 1 through `MAX_ENDPOINTS`.
pub const MAX_ENDPOINTS: usize = 4;

/// The largest single VDMA transfer
///
/// Longer transfers are moved in chunks of this size.
pub const BURST_LIMIT: usize = 100 * 1024;

/// The largest buffer accepted by [`UsbDevice::interrupt_send`]
pub const INTERRUPT_SEND_LIMIT: usize = 1024;

/// Timeout value that never expires
pub const WAIT_FOREVER: u32 = u32::MAX;

/// Driver errors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The transfer didn't finish in time. The endpoint is usable again.
    Timeout,
    /// The device disconnected or was deconfigured during the transfer
    Terminated,
    /// The device was configured, and is now disconnected. Transfers fail
    /// until the host configures the device again.
    Disconnected,
    /// The VDMA reported a bus or FIFO error. Call
    /// [`initialize()`](UsbDevice::initialize) to recover.
    Fatal,
    /// The endpoint number is out of range, has the wrong direction or
    /// type, or isn't part of the interface.
    InvalidEndpoint,
    /// The interface declares more endpoints than the controller supports
    TooManyEndpoints,
    /// The buffer is too large for the transfer type
    InvalidLength,
    /// A descriptor is malformed
    InvalidDescriptor,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            Error::Timeout => "transfer timed out",
            Error::Terminated => "transfer terminated",
            Error::Disconnected => "device disconnected",
            Error::Fatal => "fatal controller error",
            Error::InvalidEndpoint => "invalid endpoint",
            Error::TooManyEndpoints => "too many endpoints",
            Error::InvalidLength => "invalid transfer length",
            Error::InvalidDescriptor => "invalid descriptor",
        };
        f.write_str(msg)
    }
}

/// USB full / high speed setting
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Speed {
    /// Throttle to full speed.
    ///
    /// If a host is capable of high-speed, this will prevent
    /// the device from enumerating as a high-speed device.
    Full,
    /// High speed.
    #[default]
    High,
}

/// Enumeration state
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DeviceState {
    /// Reset, address 0
    Default,
    /// The host assigned an address
    Addressed,
    /// The host selected the configuration. Transfers may run.
    Configured,
}

/// Connection state, reported to the [`LinkHandler`]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LinkStatus {
    /// No session, or the host hasn't configured the device
    Disconnected,
    /// The host configured the device. Transfers may run.
    Configured,
}

/// A type that owns the USB device controller registers
///
/// # Safety
///
/// `Peripherals` should only be implemented on a type that owns the
/// controller's register block. The returned pointer is assumed to be
/// valid for the rest of the program, and will be cast to a register
/// definition.
///
/// # Example
///
/// ```
/// use npu_usbd::Peripherals;
///
/// struct Usbd(());
///
/// impl Usbd {
///     const ADDRESS: usize = 0x9060_0000;
/// }
///
/// unsafe impl Peripherals for Usbd {
///     fn usbd(&self) -> *const () {
///         Usbd::ADDRESS as *const ()
///     }
/// }
/// ```
pub unsafe trait Peripherals {
    /// Returns the address of the controller's registers
    fn usbd(&self) -> *const ();
}

/// Time, for transfer timeouts and reset pulses
pub trait Clock {
    /// A free-running millisecond counter. It may wrap.
    fn millis(&self) -> u32;
    /// Busy-wait for at least `us` microseconds
    fn delay_us(&self, us: u32);
    /// Called on every iteration of a blocking wait
    ///
    /// An RTOS can yield here. The default spins.
    fn relax(&self) {
        core::hint::spin_loop();
    }
}

/// Receives connection changes
///
/// Called from the interrupt handler. It must not block.
pub trait LinkHandler: Sync {
    fn link_status(&self, status: LinkStatus);
}

/// Ignores link changes
impl LinkHandler for () {
    fn link_status(&self, _: LinkStatus) {}
}

/// Handles class and vendor control requests
///
/// Called from the interrupt handler. It must not block.
pub trait VendorHandler: Sync {
    /// Returns `true` to acknowledge the request, or `false` to stall it
    fn control_request(&self, setup: &setup::SetupPacket) -> bool;
}

/// Acknowledges every request
impl VendorHandler for () {
    fn control_request(&self, _: &setup::SetupPacket) -> bool {
        true
    }
}
