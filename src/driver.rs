//! Internal USB driver
//!
//! `Driver` owns the registers and all state shared between the interrupt
//! handler and the transfer calls. [`UsbDevice`](crate::UsbDevice) keeps it
//! behind a critical section; nothing in here blocks.

use crate::{
    descriptor::{
        ConfigurationImage, DeviceDescriptor, StringDescriptors, TransferType, CONFIGURATION_VALUE,
    },
    event::{Channel, Control, Device, Event, Status},
    fifo::{self, FifoMap},
    memory::{ControlBuffers, REPLY_LEN},
    ral,
    setup::{SetupPacket, StandardRequest, SETUP_LEN},
    sync::{EndpointLocks, EventFlags},
    transfer::{FifoContext, Request, Step, Token},
    Clock, DeviceState, Error, LinkHandler, LinkStatus, Speed, VendorHandler, FIFO_COUNT,
};
use usb_device::{
    control::{Recipient, RequestType},
    descriptor::descriptor_type,
    endpoint::EndpointAddress,
    UsbDirection,
};

/// Soft reset pulse width
const RESET_PULSE_US: u32 = 10;

/// `GET_STATUS(DEVICE)`: self powered, no remote wakeup
const DEVICE_STATUS: [u8; 2] = [1, 0];

/// Progress of the control pipe
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ControlPhase {
    Idle,
    /// The VDMA is capturing a SETUP packet
    Setup,
    /// The VDMA is sending a data stage reply
    DataIn,
}

/// How a control request ends
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    /// A data stage is in flight. Its completion acknowledges the request.
    RespondLater,
    Ack,
    Stall,
}

/// A data transfer to start
#[derive(Clone, Copy, Debug)]
pub struct Transfer {
    pub address: EndpointAddress,
    pub transfer_type: TransferType,
    /// Start of the caller's buffer
    pub buffer: usize,
    pub len: usize,
}

/// A started transfer
#[derive(Clone, Copy, Debug)]
pub struct Pending {
    address: EndpointAddress,
    fifo: usize,
    token: Token,
    session: u32,
}

fn copy_into(reply: &mut [u8; REPLY_LEN], bytes: &[u8]) -> usize {
    let len = bytes.len().min(REPLY_LEN);
    reply[..len].copy_from_slice(&bytes[..len]);
    len
}

pub struct Driver {
    regs: &'static ral::RegisterBlock,
    control: ControlBuffers,
    device: Option<&'static DeviceDescriptor<'static>>,
    strings: Option<&'static StringDescriptors<'static>>,
    /// Flattened on the first request for it
    configuration: Option<ConfigurationImage>,
    link: &'static dyn LinkHandler,
    vendor: &'static dyn VendorHandler,
    phase: ControlPhase,
    state: DeviceState,
    link_status: LinkStatus,
    /// Set on the first configuration after `initialize`. Once set, an
    /// unconfigured device fails transfers instead of blocking them.
    was_configured: bool,
    /// Set on a VDMA error, until `initialize`
    fatal: bool,
    /// Bumps whenever the FIFO map is built or torn down
    session: u32,
    map: FifoMap,
    fifos: [FifoContext; FIFO_COUNT],
    flags: EventFlags,
    locks: EndpointLocks,
}

impl Driver {
    pub fn new(regs: &'static ral::RegisterBlock, control: ControlBuffers) -> Self {
        const CONTEXT: FifoContext = FifoContext::new();
        Driver {
            regs,
            control,
            device: None,
            strings: None,
            configuration: None,
            link: &(),
            vendor: &(),
            phase: ControlPhase::Idle,
            state: DeviceState::Default,
            link_status: LinkStatus::Disconnected,
            was_configured: false,
            fatal: false,
            session: 0,
            map: FifoMap::empty(),
            fifos: [CONTEXT; FIFO_COUNT],
            flags: EventFlags::new(),
            locks: EndpointLocks::held(),
        }
    }

    /// Reset the controller, and prepare it to enumerate `device`
    ///
    /// Any transfer still waiting from an earlier session is terminated.
    /// Leaves interrupts disabled.
    pub fn initialize(
        &mut self,
        device: &'static DeviceDescriptor<'static>,
        strings: &'static StringDescriptors<'static>,
        link: &'static dyn LinkHandler,
        vendor: &'static dyn VendorHandler,
        speed: Speed,
        clock: &impl Clock,
    ) -> Result<(), Error> {
        device.validate()?;

        for channel in Channel::all() {
            self.abort_dma(channel);
        }
        self.terminate(Error::Terminated);

        ral::write_reg!(ral::usbd, self.regs, DEV_CTRL, SFRST: 1);
        clock.delay_us(RESET_PULSE_US);
        ral::write_reg!(
            ral::usbd,
            self.regs,
            DEV_CTRL,
            CHIP_EN: 1,
            FORCE_FS: (speed == Speed::Full) as u32
        );
        ral::write_reg!(ral::usbd, self.regs, DEV_ADDR, 0);

        let control = Control::SETUP | Control::END | Control::FAIL | Control::ABORT;
        ral::write_reg!(ral::usbd, self.regs, MISG0, !control.bits());
        ral::write_reg!(ral::usbd, self.regs, MISG1, u32::MAX);
        let device_events =
            Device::USBRST | Device::SUSP | Device::RESM | Device::TX0BYTE | Device::RX0BYTE;
        ral::write_reg!(ral::usbd, self.regs, MISG2, !device_events.bits());
        ral::write_reg!(ral::usbd, self.regs, MISG3, 0);
        self.set_session_monitor(false);

        ral::modify_reg!(ral::usbd, self.regs, OTG_ISR, |isr| isr);
        ral::modify_reg!(ral::usbd, self.regs, ISG0, |isg| isg);
        ral::modify_reg!(ral::usbd, self.regs, ISG1, |isg| isg);
        ral::modify_reg!(ral::usbd, self.regs, ISG2, |isg| isg);
        ral::modify_reg!(ral::usbd, self.regs, ISG3, |isg| isg);
        ral::modify_reg!(ral::usbd, self.regs, TX0BYTE, |tx| tx);
        ral::modify_reg!(ral::usbd, self.regs, RX0BYTE, |rx| rx);

        fifo::unconfigure_fifos(self.regs);

        self.device = Some(device);
        self.strings = Some(strings);
        self.configuration = None;
        self.link = link;
        self.vendor = vendor;
        self.phase = ControlPhase::Idle;
        self.state = DeviceState::Default;
        self.link_status = LinkStatus::Disconnected;
        self.was_configured = false;
        self.fatal = false;
        self.session = self.session.wrapping_add(1);
        self.map = FifoMap::empty();
        for ctx in self.fifos.iter_mut() {
            ctx.cancel();
        }
        self.flags = EventFlags::new();
        self.locks.hold_all();

        debug!("INITIALIZED");
        Ok(())
    }

    /// Enable (`true`) or disable (`false`) the controller's interrupt
    pub fn set_interrupts(&mut self, interrupts: bool) {
        ral::modify_reg!(ral::usbd, self.regs, DEV_CTRL, GLINT_EN: interrupts as u32);
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn link_status(&self) -> LinkStatus {
        self.link_status
    }

    /// Handle every pending interrupt
    pub fn poll(&mut self) {
        let status = Status::read(self.regs);
        if status.is_empty() {
            return;
        }
        status.acknowledge(self.regs);
        for event in status.events() {
            self.handle(event);
        }
    }

    fn handle(&mut self, event: Event) {
        if self.fatal && !matches!(event, Event::BusReset | Event::SessionEnd) {
            return;
        }
        match event {
            Event::SessionEnd => self.session_end(),
            Event::BusReset => self.bus_reset(),
            Event::Suspend => {
                debug!("SUSPEND");
            }
            Event::Resume => {
                debug!("RESUME");
            }
            Event::DmaError(channel) => self.dma_error(channel),
            Event::DmaComplete(Channel::Control) => self.control_dma_complete(),
            Event::DmaComplete(Channel::Fifo(fifo)) => self.fifo_dma_complete(fifo),
            Event::Setup => self.capture_setup(),
            Event::ControlEnd => {
                trace!("CONTROL END");
            }
            Event::ControlAbort | Event::ControlFail => self.control_abort(),
            Event::ZeroLengthSent(number) => {
                let address = EndpointAddress::from_parts(number, UsbDirection::In);
                if let Some(fifo) = self.map.fifo_for(address) {
                    if let Some(step) = self.fifos[fifo].on_zlp_sent() {
                        self.apply(fifo, step);
                    }
                }
            }
            Event::ZeroLengthReceived(number) => {
                let address = EndpointAddress::from_parts(number, UsbDirection::Out);
                if let Some(fifo) = self.map.fifo_for(address) {
                    if let Some(step) = self.fifos[fifo].on_zlp_received() {
                        self.abort_dma(Channel::Fifo(fifo));
                        self.apply(fifo, step);
                    }
                }
            }
        }
    }

    //
    // VDMA
    //

    fn start_dma(&self, channel: Channel, address: usize, len: usize, direction: UsbDirection) {
        let dir = match direction {
            UsbDirection::In => ral::vdma::MEMORY_TO_FIFO,
            UsbDirection::Out => ral::vdma::FIFO_TO_MEMORY,
        };
        let vdma = &self.regs.VDMA[channel.index()];

        // Make buffer writes visible to the VDMA before starting it.
        #[cfg(target_arch = "arm")]
        cortex_m::asm::dsb();

        ral::write_reg!(ral::vdma, vdma, ADDR, address);
        ral::write_reg!(ral::vdma, vdma, CTRL, LEN: len as u32, DIR: dir, START: 1);
    }

    fn abort_dma(&self, channel: Channel) {
        let vdma = &self.regs.VDMA[channel.index()];
        ral::write_reg!(ral::vdma, vdma, CTRL, ABORT: 1);
    }

    /// Bytes the channel didn't move
    fn residual(&self, channel: Channel) -> usize {
        let vdma = &self.regs.VDMA[channel.index()];
        ral::read_reg!(ral::vdma, vdma, CTRL, LEN) as usize
    }

    fn dma_error(&mut self, channel: Channel) {
        error!("VDMA ERROR CHANNEL {}", channel.index());
        self.fatal = true;
        for channel in Channel::all() {
            self.abort_dma(channel);
        }
        self.phase = ControlPhase::Idle;
        self.terminate(Error::Fatal);
        self.flags.set_all(self.map.fifo_mask());
    }

    fn fifo_dma_complete(&mut self, fifo: usize) {
        let residual = self.residual(Channel::Fifo(fifo));
        match self.fifos[fifo].on_dma_complete(residual) {
            Some(step) => self.apply(fifo, step),
            None => {
                trace!("IGNORED VDMA COMPLETION FIFO {}", fifo);
            }
        }
    }

    /// Carry out the next step for a FIFO's transfer
    fn apply(&mut self, fifo: usize, step: Step) {
        match step {
            Step::Dma {
                address,
                len,
                direction,
            } => self.start_dma(Channel::Fifo(fifo), address, len, direction),
            Step::SendZlp => match self.map.assignment(fifo) {
                Some(assignment) => {
                    let slot = fifo::endpoint_register(
                        self.regs,
                        assignment.address().index(),
                        UsbDirection::In,
                    );
                    ral::modify_reg!(ral::ep, slot, MPS, TX0BYTE: 1);
                }
                None => {
                    if let Some(step) = self.fifos[fifo].fail(Error::Terminated) {
                        self.apply(fifo, step);
                    }
                }
            },
            Step::Complete(_) => self.flags.set(fifo),
        }
    }

    /// Fail every active transfer with `error`, and stop its VDMA
    fn terminate(&mut self, error: Error) {
        for fifo in 0..FIFO_COUNT {
            if let Some(step) = self.fifos[fifo].fail(error) {
                self.abort_dma(Channel::Fifo(fifo));
                self.apply(fifo, step);
            }
        }
    }

    //
    // Control pipe
    //

    fn capture_setup(&mut self) {
        if self.phase != ControlPhase::Idle {
            // A new SETUP replaces whatever the host abandoned.
            self.abort_dma(Channel::Control);
        }
        self.phase = ControlPhase::Setup;
        self.start_dma(
            Channel::Control,
            self.control.setup_address(),
            SETUP_LEN,
            UsbDirection::Out,
        );
    }

    fn control_dma_complete(&mut self) {
        match self.phase {
            ControlPhase::Setup => {
                self.phase = ControlPhase::Idle;
                let setup = SetupPacket::parse(&self.control.setup());
                let outcome = self.dispatch(&setup);
                self.finish(outcome);
            }
            ControlPhase::DataIn => {
                self.phase = ControlPhase::Idle;
                self.finish(Outcome::Ack);
            }
            ControlPhase::Idle => {
                trace!("IGNORED CONTROL VDMA COMPLETION");
            }
        }
    }

    fn control_abort(&mut self) {
        if self.phase != ControlPhase::Idle {
            self.abort_dma(Channel::Control);
            self.phase = ControlPhase::Idle;
        }
        ral::modify_reg!(ral::usbd, self.regs, CX_CSR, CLR: 1);
        debug!("CONTROL ABORT");
    }

    fn finish(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::RespondLater => {}
            Outcome::Ack => ral::modify_reg!(ral::usbd, self.regs, CX_CSR, DONE: 1),
            Outcome::Stall => {
                ral::modify_reg!(ral::usbd, self.regs, CX_CSR, STL: 1);
                warn!("STALL");
            }
        }
    }

    fn dispatch(&mut self, setup: &SetupPacket) -> Outcome {
        trace!(
            "SETUP {:X} {:X} {:X} {:X} {}",
            setup.request_type,
            setup.request,
            setup.value,
            setup.index,
            setup.length
        );
        match setup.kind() {
            RequestType::Standard => self.standard_request(setup),
            RequestType::Class | RequestType::Vendor => {
                if self.vendor.control_request(setup) {
                    Outcome::Ack
                } else {
                    Outcome::Stall
                }
            }
            RequestType::Reserved => Outcome::Stall,
        }
    }

    fn standard_request(&mut self, setup: &SetupPacket) -> Outcome {
        let Some(request) = setup.standard() else {
            return Outcome::Stall;
        };
        match request {
            StandardRequest::GetStatus(recipient) => self.get_status(recipient, setup),
            StandardRequest::ClearEndpointHalt(address) => self.clear_halt(address),
            StandardRequest::SetAddress(address) => self.set_address(address),
            StandardRequest::GetDescriptor {
                descriptor_type,
                descriptor_index,
                length,
            } => self.get_descriptor(descriptor_type, descriptor_index, length),
            StandardRequest::SetConfiguration(value) => self.set_configuration(value),
            _ => Outcome::Stall,
        }
    }

    /// Start a data stage of at most `length` bytes from the staged reply
    fn send_reply(&mut self, staged: usize, length: u16) -> Outcome {
        let len = staged.min(usize::from(length));
        if len == 0 {
            return Outcome::Ack;
        }
        self.phase = ControlPhase::DataIn;
        self.start_dma(
            Channel::Control,
            self.control.reply_address(),
            len,
            UsbDirection::In,
        );
        Outcome::RespondLater
    }

    fn respond(&mut self, bytes: &[u8], length: u16) -> Outcome {
        let staged = self.control.stage(|reply| copy_into(reply, bytes));
        self.send_reply(staged, length)
    }

    /// Returns the FIFO assignment of a data endpoint, if it's usable
    fn mapped(&self, address: EndpointAddress) -> Option<fifo::Assignment> {
        if self.state != DeviceState::Configured {
            return None;
        }
        self.map.lookup(address).copied()
    }

    fn get_status(&mut self, recipient: Recipient, setup: &SetupPacket) -> Outcome {
        let status = match recipient {
            Recipient::Device => DEVICE_STATUS,
            Recipient::Interface if self.state == DeviceState::Configured => [0, 0],
            Recipient::Endpoint => {
                let address = EndpointAddress::from(setup.index as u8);
                let halted = if address.index() == 0 {
                    ral::read_reg!(ral::usbd, self.regs, CX_CSR, STL == 1)
                } else if self.mapped(address).is_some() {
                    let slot =
                        fifo::endpoint_register(self.regs, address.index(), address.direction());
                    ral::read_reg!(ral::ep, slot, MPS, STL == 1)
                } else {
                    return Outcome::Stall;
                };
                [halted as u8, 0]
            }
            _ => return Outcome::Stall,
        };
        self.respond(&status, setup.length)
    }

    fn clear_halt(&mut self, address: EndpointAddress) -> Outcome {
        if address.index() == 0 {
            ral::modify_reg!(ral::usbd, self.regs, CX_CSR, STL: 0);
            return Outcome::Ack;
        }
        match self.mapped(address) {
            Some(assignment) => {
                fifo::reset(self.regs, assignment.fifo);
                fifo::reset_toggle(self.regs, address);
                debug!("CLEAR HALT EP {}", address.index());
                Outcome::Ack
            }
            None => Outcome::Stall,
        }
    }

    fn set_address(&mut self, address: u16) -> Outcome {
        if address > 127 || self.state == DeviceState::Configured {
            return Outcome::Stall;
        }
        ral::write_reg!(ral::usbd, self.regs, DEV_ADDR, ADDR: address as u32);
        self.state = if address == 0 {
            DeviceState::Default
        } else {
            DeviceState::Addressed
        };
        debug!("ADDRESS {}", address);
        Outcome::Ack
    }

    fn get_descriptor(&mut self, kind: u8, index: u8, length: u16) -> Outcome {
        let Some(device) = self.device else {
            return Outcome::Stall;
        };
        match kind {
            descriptor_type::DEVICE => self.respond(&device.image(), length),
            descriptor_type::CONFIGURATION => {
                if self.configuration.is_none() {
                    match ConfigurationImage::new(device.configuration) {
                        Ok(image) => self.configuration = Some(image),
                        Err(_) => return Outcome::Stall,
                    }
                }
                let Some(image) = self.configuration.as_ref() else {
                    return Outcome::Stall;
                };
                let bytes = image.as_bytes();
                let staged = self.control.stage(|reply| copy_into(reply, bytes));
                self.send_reply(staged, length)
            }
            descriptor_type::STRING => {
                let Some(strings) = self.strings else {
                    return Outcome::Stall;
                };
                match self.control.stage(|reply| strings.write_to(index, reply)) {
                    Some(staged) => self.send_reply(staged, length),
                    None => Outcome::Stall,
                }
            }
            _ => Outcome::Stall,
        }
    }

    fn set_configuration(&mut self, value: u16) -> Outcome {
        let Some(device) = self.device else {
            return Outcome::Stall;
        };
        if self.state == DeviceState::Default {
            return Outcome::Stall;
        }

        if value == 0 {
            if self.state == DeviceState::Configured {
                self.deconfigure();
                self.state = DeviceState::Addressed;
            }
            return Outcome::Ack;
        }
        if value != u16::from(CONFIGURATION_VALUE) {
            return Outcome::Stall;
        }
        if self.state == DeviceState::Configured {
            return Outcome::Ack;
        }

        match fifo::configure_fifos(self.regs, device.configuration.interface.endpoints) {
            Ok(map) => {
                self.configure(map);
                Outcome::Ack
            }
            Err(_) => Outcome::Stall,
        }
    }

    //
    // Link state
    //

    fn configure(&mut self, map: FifoMap) {
        self.map = map;
        self.session = self.session.wrapping_add(1);
        for ctx in self.fifos.iter_mut() {
            ctx.cancel();
        }
        self.flags = EventFlags::new();
        self.locks.hold_all();
        for assignment in map.iter() {
            self.locks.release(assignment.address());
        }
        self.state = DeviceState::Configured;
        self.was_configured = true;
        self.set_session_monitor(true);
        self.set_link(LinkStatus::Configured);
        debug!("CONFIGURED");
    }

    /// Tear down the configuration: fail transfers, reset and unmap FIFOs
    fn deconfigure(&mut self) {
        self.set_session_monitor(false);
        self.terminate(Error::Terminated);
        for assignment in self.map.iter() {
            fifo::reset(self.regs, assignment.fifo);
        }
        fifo::unconfigure_fifos(self.regs);
        ral::modify_reg!(ral::usbd, self.regs, DEV_ADDR, AFT_CONF: 0);
        self.map = FifoMap::empty();
        self.session = self.session.wrapping_add(1);
        self.set_link(LinkStatus::Disconnected);
        debug!("DECONFIGURED");
    }

    fn set_link(&mut self, status: LinkStatus) {
        if self.link_status != status {
            self.link_status = status;
            self.link.link_status(status);
        }
    }

    /// Session end detection only runs while configured
    fn set_session_monitor(&mut self, enable: bool) {
        ral::modify_reg!(ral::usbd, self.regs, OTG_IER, B_SESS_END: enable as u32);
    }

    fn session_end(&mut self) {
        debug!("SESSION END");
        if self.state == DeviceState::Configured {
            self.deconfigure();
        }
        fifo::clear_all(self.regs);
        ral::write_reg!(ral::usbd, self.regs, DEV_ADDR, 0);
        self.state = DeviceState::Default;
    }

    fn bus_reset(&mut self) {
        debug!("RESET");
        if self.state == DeviceState::Configured {
            self.deconfigure();
        }
        if self.phase != ControlPhase::Idle {
            self.abort_dma(Channel::Control);
            self.phase = ControlPhase::Idle;
        }
        ral::write_reg!(ral::usbd, self.regs, DEV_ADDR, 0);
        ral::modify_reg!(ral::usbd, self.regs, CX_CSR, STL: 0);
        ral::write_reg!(ral::usbd, self.regs, MISG1, u32::MAX);
        fifo::clear_all(self.regs);
        self.state = DeviceState::Default;
    }

    //
    // Transfers
    //

    /// Try to start `transfer`
    ///
    /// Returns `Ok(None)` if the endpoint's lock is held, either by another
    /// transfer or because the device hasn't been configured yet.
    pub fn try_start(&mut self, transfer: &Transfer) -> Result<Option<Pending>, Error> {
        if self.fatal {
            return Err(Error::Fatal);
        }
        if self.state != DeviceState::Configured {
            return if self.was_configured {
                Err(Error::Disconnected)
            } else {
                Ok(None)
            };
        }

        let assignment = self
            .map
            .lookup(transfer.address)
            .copied()
            .filter(|assignment| assignment.transfer_type() == transfer.transfer_type)
            .ok_or(Error::InvalidEndpoint)?;
        if !self.locks.try_acquire(transfer.address) {
            return Ok(None);
        }

        let fifo = assignment.fifo;
        let interrupt = transfer.transfer_type == TransferType::Interrupt;
        if interrupt {
            fifo::reset(self.regs, fifo);
        }
        self.flags.clear(fifo);
        let (token, step) = self.fifos[fifo].begin(Request {
            direction: transfer.address.direction(),
            address: transfer.buffer,
            len: transfer.len,
            max_packet_size: assignment.max_packet_size(),
            zlp: !interrupt,
        });
        self.apply(fifo, step);

        Ok(Some(Pending {
            address: transfer.address,
            fifo,
            token,
            session: self.session,
        }))
    }

    /// Collect the result of `pending`, if it's finished
    ///
    /// The endpoint lock is released on success. It stays held when the
    /// transfer was terminated, or when the controller failed.
    pub fn poll_transfer(&mut self, pending: &Pending) -> Option<Result<usize, Error>> {
        // The flag belongs to whichever transfer owns the FIFO now. Leave
        // it alone unless the result is ours.
        if self.flags.is_set(pending.fifo) {
            if let Some(result) = self.fifos[pending.fifo].take_result(pending.token) {
                self.flags.clear(pending.fifo);
                if result.is_ok() {
                    self.locks.release(pending.address);
                }
                return Some(result);
            }
        }
        // The FIFO map the transfer started with is gone.
        (pending.session != self.session).then_some(Err(Error::Terminated))
    }

    /// Give up on `pending`
    ///
    /// Stops the VDMA and resets the FIFO so that the next transfer starts
    /// clean. A completion that raced the timeout wins.
    pub fn cancel_transfer(&mut self, pending: &Pending) -> Result<usize, Error> {
        if let Some(result) = self.poll_transfer(pending) {
            return result;
        }
        let fifo = pending.fifo;
        self.abort_dma(Channel::Fifo(fifo));
        fifo::reset(self.regs, fifo);
        if pending.address.direction() == UsbDirection::In {
            let slot = fifo::endpoint_register(self.regs, pending.address.index(), UsbDirection::In);
            ral::modify_reg!(ral::ep, slot, MPS, TX0BYTE: 0);
        }
        self.fifos[fifo].cancel();
        self.flags.clear(fifo);
        self.locks.release(pending.address);
        warn!("TIMEOUT EP {} FIFO {}", pending.address.index(), fifo);
        Err(Error::Timeout)
    }

    /// Returns `true` if the interrupt endpoint has nothing left to send
    pub fn interrupt_fifo_is_empty(&self, address: EndpointAddress) -> Result<bool, Error> {
        if self.fatal {
            return Err(Error::Fatal);
        }
        if self.state != DeviceState::Configured {
            return Err(Error::Disconnected);
        }
        let assignment = self
            .mapped(address)
            .filter(|assignment| assignment.transfer_type() == TransferType::Interrupt)
            .ok_or(Error::InvalidEndpoint)?;
        let fifo = assignment.fifo;
        let bytes = ral::read_reg!(ral::fifo, &self.regs.FIFO[fifo], FIBC, BC);
        Ok(!self.fifos[fifo].is_active() && bytes == 0)
    }
}
