//! The USB device API

use crate::{
    descriptor::{DeviceDescriptor, StringDescriptors, TransferType},
    driver::{Driver, Transfer},
    ral, sync, Clock, ControlMemory, DeviceState, Error, LinkHandler, LinkStatus, Peripherals,
    Speed, VendorHandler, INTERRUPT_SEND_LIMIT, MAX_ENDPOINTS,
};
use core::cell::RefCell;
use critical_section::Mutex;
use usb_device::{endpoint::EndpointAddress, UsbDirection};

/// A USB device
///
/// After you create a `UsbDevice` with [`new()`](UsbDevice::new), you must
///
/// - call [`initialize()`](UsbDevice::initialize) once
/// - call [`on_interrupt()`](UsbDevice::on_interrupt) from the USB interrupt
///   handler, then enable interrupts with
///   [`set_interrupts()`](UsbDevice::set_interrupts)
///
/// The transfer methods take `&self`, and may be called from several
/// threads. Calls on the same endpoint run one at a time. They block until
/// the host configures the device.
pub struct UsbDevice<C> {
    driver: Mutex<RefCell<Driver>>,
    clock: C,
}

impl<C: Clock> UsbDevice<C> {
    /// Create a new `UsbDevice`
    ///
    /// Creation does nothing except for assign memory to the driver.
    /// After creating the device, call [`initialize()`](UsbDevice::initialize).
    ///
    /// # Panics
    ///
    /// Panics if `memory` has already been assigned to another USB device.
    pub fn new<P: Peripherals>(peripherals: P, memory: &'static ControlMemory, clock: C) -> Self {
        let regs = ral::instance(&peripherals);
        let control = memory.take().expect("Control memory already assigned");
        UsbDevice {
            driver: Mutex::new(RefCell::new(Driver::new(regs, control))),
            clock,
        }
    }

    /// Interrupt-safe, mutable access to the driver
    fn with_driver<R>(&self, func: impl FnOnce(&mut Driver) -> R) -> R {
        critical_section::with(|cs| {
            let mut driver = self.driver.borrow_ref_mut(cs);
            func(&mut driver)
        })
    }

    /// Reset the controller, and prepare it to enumerate `device`
    ///
    /// `link` learns about connection changes, and `vendor` decides on
    /// class and vendor control requests. Use `None` for the defaults,
    /// which ignore link changes and acknowledge every request.
    ///
    /// Returns an error if the descriptors describe something the
    /// controller can't support. Call `initialize` again to recover from
    /// [`Error::Fatal`]. Interrupts are disabled afterwards.
    pub fn initialize(
        &self,
        device: &'static DeviceDescriptor<'static>,
        strings: &'static StringDescriptors<'static>,
        link: Option<&'static dyn LinkHandler>,
        vendor: Option<&'static dyn VendorHandler>,
        speed: Speed,
    ) -> Result<(), Error> {
        self.with_driver(|driver| {
            driver.initialize(
                device,
                strings,
                link.unwrap_or(&()),
                vendor.unwrap_or(&()),
                speed,
                &self.clock,
            )
        })
    }

    /// Enable (`true`) or disable (`false`) USB interrupts
    pub fn set_interrupts(&self, interrupts: bool) {
        self.with_driver(|driver| driver.set_interrupts(interrupts));
    }

    /// Handle the USB interrupt
    ///
    /// Call this from the interrupt handler.
    pub fn on_interrupt(&self) {
        self.with_driver(|driver| driver.poll());
    }

    /// Returns the enumeration state
    pub fn state(&self) -> DeviceState {
        self.with_driver(|driver| driver.state())
    }

    /// Returns the connection state
    pub fn link_status(&self) -> LinkStatus {
        self.with_driver(|driver| driver.link_status())
    }

    /// Send `data` on a bulk IN endpoint
    ///
    /// Blocks for up to `timeout` milliseconds, or forever with
    /// [`WAIT_FOREVER`](crate::WAIT_FOREVER). Transfers that end on a
    /// packet boundary are terminated with a zero-length packet. Returns
    /// the number of bytes sent.
    pub fn bulk_send(
        &self,
        endpoint: EndpointAddress,
        data: &[u8],
        timeout: u32,
    ) -> Result<usize, Error> {
        check_endpoint(endpoint, UsbDirection::In)?;
        self.transfer(
            Transfer {
                address: endpoint,
                transfer_type: TransferType::Bulk,
                buffer: data.as_ptr() as usize,
                len: data.len(),
            },
            timeout,
        )
    }

    /// Receive into `buffer` from a bulk OUT endpoint
    ///
    /// Completes when `buffer` is full, or when the host sends a short
    /// packet. Returns the number of bytes received.
    pub fn bulk_receive(
        &self,
        endpoint: EndpointAddress,
        buffer: &mut [u8],
        timeout: u32,
    ) -> Result<usize, Error> {
        check_endpoint(endpoint, UsbDirection::Out)?;
        self.transfer(
            Transfer {
                address: endpoint,
                transfer_type: TransferType::Bulk,
                buffer: buffer.as_mut_ptr() as usize,
                len: buffer.len(),
            },
            timeout,
        )
    }

    /// Send `data` on an interrupt IN endpoint
    ///
    /// Discards anything still waiting in the endpoint's FIFO. `data` may
    /// be at most [`INTERRUPT_SEND_LIMIT`] bytes.
    pub fn interrupt_send(
        &self,
        endpoint: EndpointAddress,
        data: &[u8],
        timeout: u32,
    ) -> Result<usize, Error> {
        check_endpoint(endpoint, UsbDirection::In)?;
        if data.len() > INTERRUPT_SEND_LIMIT {
            return Err(Error::InvalidLength);
        }
        self.transfer(
            Transfer {
                address: endpoint,
                transfer_type: TransferType::Interrupt,
                buffer: data.as_ptr() as usize,
                len: data.len(),
            },
            timeout,
        )
    }

    /// Returns `true` if the interrupt endpoint has sent everything
    pub fn interrupt_send_buffer_is_empty(&self, endpoint: EndpointAddress) -> Result<bool, Error> {
        check_endpoint(endpoint, UsbDirection::In)?;
        self.with_driver(|driver| driver.interrupt_fifo_is_empty(endpoint))
    }

    /// Run `transfer` to completion
    ///
    /// One deadline covers both the wait for the endpoint and the wait for
    /// the data. The buffer behind `transfer` is borrowed by the caller for
    /// the whole call, and the VDMA is stopped on every path out of here.
    fn transfer(&self, transfer: Transfer, timeout: u32) -> Result<usize, Error> {
        let deadline = sync::Deadline::after(&self.clock, timeout);

        let pending = sync::wait(&self.clock, deadline, || {
            self.with_driver(|driver| driver.try_start(&transfer).transpose())
        })
        .ok_or(Error::Timeout)??;

        match sync::wait(&self.clock, deadline, || {
            self.with_driver(|driver| driver.poll_transfer(&pending))
        }) {
            Some(result) => result,
            None => self.with_driver(|driver| driver.cancel_transfer(&pending)),
        }
    }
}

/// Endpoint numbers run from 1 through [`MAX_ENDPOINTS`]
fn check_endpoint(endpoint: EndpointAddress, direction: UsbDirection) -> Result<(), Error> {
    if (1..=MAX_ENDPOINTS).contains(&endpoint.index()) && endpoint.direction() == direction {
        Ok(())
    } else {
        Err(Error::InvalidEndpoint)
    }
}
