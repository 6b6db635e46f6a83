//! A simulated controller for host tests
//!
//! The register block lives in leaked memory. [`Host`] plays both the USB
//! host and the VDMA engine: it inspects what the driver programmed, moves
//! bytes, raises status bits, and runs the interrupt handler. Status bits
//! are cleared after every handler run, standing in for write-one-to-clear.
//!
//! Every register access happens inside a critical section, so the host
//! can run on a different thread than a blocked transfer call.

use crate::{
    descriptor::tests::{DEVICE, STRINGS},
    event::{Channel, Control, Device, Dma, Groups},
    ral::{self, RegisterBlock},
    setup::SetupPacket,
    Clock, ControlMemory, LinkHandler, Peripherals, Speed, UsbDevice, VendorHandler,
};
use std::{
    sync::Mutex,
    thread,
    time::{Duration, Instant},
};

pub struct SimPeripherals(&'static RegisterBlock);

unsafe impl Peripherals for SimPeripherals {
    fn usbd(&self) -> *const () {
        self.0 as *const RegisterBlock as *const ()
    }
}

pub struct StdClock(Instant);

impl Clock for StdClock {
    fn millis(&self) -> u32 {
        self.0.elapsed().as_millis() as u32
    }
    fn delay_us(&self, us: u32) {
        thread::sleep(Duration::from_micros(us.into()));
    }
    fn relax(&self) {
        thread::yield_now();
    }
}

/// Records every link change
pub struct LinkLog(pub Mutex<Vec<crate::LinkStatus>>);

impl LinkHandler for LinkLog {
    fn link_status(&self, status: crate::LinkStatus) {
        self.0.lock().unwrap().push(status);
    }
}

impl LinkLog {
    pub fn new() -> &'static Self {
        Box::leak(Box::new(LinkLog(Mutex::new(Vec::new()))))
    }

    pub fn take(&self) -> Vec<crate::LinkStatus> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

/// Acknowledges vendor requests whose `bRequest` is even
pub struct EvenVendor;

impl VendorHandler for EvenVendor {
    fn control_request(&self, setup: &SetupPacket) -> bool {
        setup.request % 2 == 0
    }
}

/// How the driver ended a control transfer
#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    /// Acknowledged, with this data stage
    Ack(Vec<u8>),
    Stall,
    /// Neither acknowledged nor stalled
    Pending,
}

pub struct Host {
    pub regs: &'static RegisterBlock,
    pub device: UsbDevice<StdClock>,
}

impl Host {
    /// An initialized device with the test descriptors
    pub fn new() -> Self {
        Self::with_handlers(None, None)
    }

    pub fn with_handlers(
        link: Option<&'static dyn LinkHandler>,
        vendor: Option<&'static dyn VendorHandler>,
    ) -> Self {
        let regs: &'static RegisterBlock = Box::leak(Box::new(RegisterBlock::new()));
        let memory: &'static ControlMemory = Box::leak(Box::new(ControlMemory::new()));
        let device = UsbDevice::new(SimPeripherals(regs), memory, StdClock(Instant::now()));
        device
            .initialize(&DEVICE, &STRINGS, link, vendor, Speed::High)
            .unwrap();
        device.set_interrupts(true);
        Host { regs, device }
    }

    /// Raise status bits with `raise`, run the handler, then clear all status
    pub fn interrupt(&self, raise: impl FnOnce(&RegisterBlock)) {
        critical_section::with(|_| {
            raise(self.regs);
            self.device.on_interrupt();
            for reg in [
                &self.regs.IGR,
                &self.regs.ISG0,
                &self.regs.ISG1,
                &self.regs.ISG2,
                &self.regs.ISG3,
                &self.regs.TX0BYTE,
                &self.regs.RX0BYTE,
                &self.regs.OTG_ISR,
            ] {
                reg.write(0);
            }
        });
    }

    pub fn bus_reset(&self) {
        self.interrupt(|regs| {
            regs.IGR.write(Groups::DEVICE.bits());
            regs.ISG2.write(Device::USBRST.bits());
        });
    }

    pub fn session_end(&self) {
        self.interrupt(|regs| regs.OTG_ISR.write(1 << 2));
    }

    fn dma_complete(&self, channel: Channel) {
        self.interrupt(|regs| {
            regs.IGR.write(Groups::DMA.bits());
            regs.ISG3.write(Dma::complete(channel).bits());
        });
    }

    pub fn dma_error(&self, channel: Channel) {
        self.interrupt(|regs| {
            regs.IGR.write(Groups::DMA.bits());
            regs.ISG3.write(Dma::error(channel).bits());
        });
    }

    /// If `channel` is running, returns its direction, address and length
    pub fn dma_request(&self, channel: Channel) -> Option<(u32, usize, usize)> {
        critical_section::with(|_| {
            let vdma = &self.regs.VDMA[channel.index()];
            if !ral::read_reg!(ral::vdma, vdma, CTRL, START == 1) {
                return None;
            }
            let (dir, len) = ral::read_reg!(ral::vdma, vdma, CTRL, DIR, LEN);
            Some((dir, vdma.ADDR.read(), len as usize))
        })
    }

    /// Finish the running transfer on `channel`, leaving `residual` bytes
    pub fn finish_dma(&self, channel: Channel, residual: usize) {
        critical_section::with(|_| {
            let vdma = &self.regs.VDMA[channel.index()];
            ral::write_reg!(ral::vdma, vdma, CTRL, LEN: residual as u32);
        });
        self.dma_complete(channel);
    }

    /// Run one control transfer
    pub fn control(&self, setup: SetupPacket) -> Reply {
        self.interrupt(|regs| {
            regs.IGR.write(Groups::CONTROL.bits());
            regs.ISG0.write(Control::SETUP.bits());
        });

        let (dir, address, len) = self
            .dma_request(Channel::Control)
            .expect("SETUP capture not started");
        assert_eq!(dir, ral::vdma::FIFO_TO_MEMORY);
        assert_eq!(len, 8);
        let bytes = setup.to_bytes();
        critical_section::with(|_| unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len());
        });
        self.finish_dma(Channel::Control, 0);

        let mut data = Vec::new();
        if let Some((dir, address, len)) = self.dma_request(Channel::Control) {
            assert_eq!(dir, ral::vdma::MEMORY_TO_FIFO);
            data = critical_section::with(|_| unsafe {
                std::slice::from_raw_parts(address as *const u8, len).to_vec()
            });
            self.finish_dma(Channel::Control, 0);
        }

        critical_section::with(|_| {
            let done = ral::read_reg!(ral::usbd, self.regs, CX_CSR, DONE == 1);
            let stall = ral::read_reg!(ral::usbd, self.regs, CX_CSR, STL == 1);
            ral::write_reg!(ral::usbd, self.regs, CX_CSR, 0);
            match (done, stall) {
                (_, true) => Reply::Stall,
                (true, false) => Reply::Ack(data),
                (false, false) => Reply::Pending,
            }
        })
    }

    pub fn get_descriptor(&self, kind: u8, index: u8, length: u16) -> Reply {
        self.control(SetupPacket {
            request_type: 0x80,
            request: 0x06,
            value: u16::from(kind) << 8 | u16::from(index),
            index: 0,
            length,
        })
    }

    pub fn set_address(&self, address: u16) -> Reply {
        self.control(SetupPacket {
            request_type: 0x00,
            request: 0x05,
            value: address,
            index: 0,
            length: 0,
        })
    }

    pub fn set_configuration(&self, value: u16) -> Reply {
        self.control(SetupPacket {
            request_type: 0x00,
            request: 0x09,
            value,
            index: 0,
            length: 0,
        })
    }

    /// Address and configure the device
    pub fn enumerate(&self) {
        assert_eq!(self.set_address(5), Reply::Ack(vec![]));
        assert_eq!(self.set_configuration(1), Reply::Ack(vec![]));
    }

    /// Wait for the driver to start a VDMA on `fifo`
    pub fn wait_for_dma(&self, fifo: usize) -> (u32, usize, usize) {
        let start = Instant::now();
        loop {
            if let Some(request) = self.dma_request(Channel::Fifo(fifo)) {
                return request;
            }
            assert!(
                start.elapsed() < Duration::from_secs(5),
                "no VDMA on FIFO {fifo}"
            );
            thread::yield_now();
        }
    }

    /// Act as the host reading an IN FIFO: move the whole chunk
    pub fn read_in(&self, fifo: usize) -> Vec<u8> {
        let (dir, address, len) = self.wait_for_dma(fifo);
        assert_eq!(dir, ral::vdma::MEMORY_TO_FIFO);
        let data = critical_section::with(|_| unsafe {
            std::slice::from_raw_parts(address as *const u8, len).to_vec()
        });
        self.finish_dma(Channel::Fifo(fifo), 0);
        data
    }

    /// Act as the host writing an OUT FIFO: deliver `data`, which may be
    /// shorter than the chunk. Returns the chunk length.
    pub fn write_out(&self, fifo: usize, data: &[u8]) -> usize {
        let (dir, address, len) = self.wait_for_dma(fifo);
        assert_eq!(dir, ral::vdma::FIFO_TO_MEMORY);
        let n = data.len().min(len);
        critical_section::with(|_| unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), address as *mut u8, n);
        });
        self.finish_dma(Channel::Fifo(fifo), len - n);
        len
    }

    /// If the driver queued a zero-length packet on IN endpoint `number`,
    /// send it and return `true`
    pub fn send_zlp(&self, number: usize) -> bool {
        let queued = critical_section::with(|_| {
            let slot = &self.regs.IN_EP[number - 1];
            let queued = ral::read_reg!(ral::ep, slot, MPS, TX0BYTE == 1);
            ral::modify_reg!(ral::ep, slot, MPS, TX0BYTE: 0);
            queued
        });
        if queued {
            self.interrupt(|regs| {
                regs.IGR.write(Groups::DEVICE.bits());
                regs.ISG2.write(Device::TX0BYTE.bits());
                regs.TX0BYTE.write(1 << (number - 1));
            });
        }
        queued
    }

    /// Wait until the driver queues a zero-length packet on IN endpoint
    /// `number`, then send it
    pub fn wait_for_zlp(&self, number: usize) {
        let start = Instant::now();
        while !self.send_zlp(number) {
            assert!(
                start.elapsed() < Duration::from_secs(5),
                "no ZLP on EP {number}"
            );
            thread::yield_now();
        }
    }

    /// The host sends a zero-length packet to OUT endpoint `number`
    pub fn receive_zlp(&self, number: usize) {
        self.interrupt(|regs| {
            regs.IGR.write(Groups::DEVICE.bits());
            regs.ISG2.write(Device::RX0BYTE.bits());
            regs.RX0BYTE.write(1 << (number - 1));
        });
    }
}
