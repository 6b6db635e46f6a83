//! Interrupt status decoding
//!
//! The controller reports everything through one interrupt line, fanned
//! out into four status groups. [`Status`] is a snapshot of the unmasked
//! bits in every group. [`Events`] walks that snapshot in handling order,
//! producing one [`Event`] at a time.

use crate::{ral, FIFO_COUNT, MAX_ENDPOINTS};
use bitflags::bitflags;

bitflags! {
    /// `IGR`: which status groups have pending interrupts
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Groups: u32 {
        const CONTROL = 1 << 0;
        const FIFO = 1 << 1;
        const DEVICE = 1 << 2;
        const DMA = 1 << 3;
    }
}

bitflags! {
    /// `ISG0`: control endpoint events
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Control: u32 {
        const SETUP = 1 << 0;
        const IN = 1 << 1;
        const OUT = 1 << 2;
        const END = 1 << 3;
        const FAIL = 1 << 4;
        const ABORT = 1 << 5;
    }
}

bitflags! {
    /// `ISG2`: bus and device state events
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Device: u32 {
        const USBRST = 1 << 0;
        const SUSP = 1 << 1;
        const RESM = 1 << 2;
        const TX0BYTE = 1 << 5;
        const RX0BYTE = 1 << 6;
    }
}

bitflags! {
    /// `ISG3`: VDMA completions and errors
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Dma: u32 {
        const CMPLT_CX = 1 << 0;
        const CMPLT_F0 = 1 << 1;
        const CMPLT_F1 = 1 << 2;
        const CMPLT_F2 = 1 << 3;
        const CMPLT_F3 = 1 << 4;
        const ERR_CX = 1 << 16;
        const ERR_F0 = 1 << 17;
        const ERR_F1 = 1 << 18;
        const ERR_F2 = 1 << 19;
        const ERR_F3 = 1 << 20;
    }
}

impl Dma {
    const COMPLETE: u32 = 0;
    const ERROR: u32 = 16;

    fn channel(base: u32, channel: Channel) -> Self {
        Dma::from_bits_retain(1 << (base + channel.index() as u32))
    }

    /// The completion bit for `channel`
    pub fn complete(channel: Channel) -> Self {
        Self::channel(Self::COMPLETE, channel)
    }

    /// The error bit for `channel`
    pub fn error(channel: Channel) -> Self {
        Self::channel(Self::ERROR, channel)
    }
}

/// A VDMA channel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    /// Endpoint 0, for SETUP capture and control data stages
    Control,
    /// A data FIFO
    Fifo(usize),
}

impl Channel {
    /// Index into the VDMA register array
    pub fn index(self) -> usize {
        match self {
            Channel::Control => 0,
            Channel::Fifo(fifo) => 1 + fifo,
        }
    }

    /// Every channel, control first
    pub fn all() -> impl Iterator<Item = Channel> {
        core::iter::once(Channel::Control).chain((0..FIFO_COUNT).map(Channel::Fifo))
    }
}

/// One hardware event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    /// The VBUS session ended
    SessionEnd,
    BusReset,
    Suspend,
    Resume,
    /// Bus or FIFO consistency error on a VDMA channel
    DmaError(Channel),
    DmaComplete(Channel),
    /// A SETUP packet is waiting in the control FIFO
    Setup,
    /// The control status stage finished
    ControlEnd,
    /// The host abandoned the control transfer
    ControlAbort,
    /// The control transfer failed on the bus
    ControlFail,
    /// The IN endpoint with this number sent its zero-length packet
    ZeroLengthSent(usize),
    /// The OUT endpoint with this number received a zero-length packet
    ZeroLengthReceived(usize),
}

/// A snapshot of unmasked interrupt status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Status {
    session_end: bool,
    control: u32,
    device: u32,
    dma: u32,
    tx0byte: u32,
    rx0byte: u32,
}

impl Status {
    /// Read the pending, unmasked interrupts
    pub fn read(regs: &ral::RegisterBlock) -> Self {
        let groups = Groups::from_bits_truncate(ral::read_reg!(ral::usbd, regs, IGR));
        let pending = |group, isg: &crate::vcell::VCell<u32>, misg: &crate::vcell::VCell<u32>| {
            if groups.contains(group) {
                isg.read() & !misg.read()
            } else {
                0
            }
        };

        let device = pending(Groups::DEVICE, &regs.ISG2, &regs.MISG2);
        let session_end = ral::read_reg!(ral::usbd, regs, OTG_ISR, B_SESS_END == 1)
            && ral::read_reg!(ral::usbd, regs, OTG_IER, B_SESS_END == 1);

        Status {
            session_end,
            control: pending(Groups::CONTROL, &regs.ISG0, &regs.MISG0),
            device,
            dma: pending(Groups::DMA, &regs.ISG3, &regs.MISG3),
            tx0byte: if device & Device::TX0BYTE.bits() != 0 {
                ral::read_reg!(ral::usbd, regs, TX0BYTE)
            } else {
                0
            },
            rx0byte: if device & Device::RX0BYTE.bits() != 0 {
                ral::read_reg!(ral::usbd, regs, RX0BYTE)
            } else {
                0
            },
        }
    }

    /// Clear every status bit captured in this snapshot
    pub fn acknowledge(&self, regs: &ral::RegisterBlock) {
        if self.session_end {
            ral::write_reg!(ral::usbd, regs, OTG_ISR, B_SESS_END: 1);
        }
        if self.control != 0 {
            ral::write_reg!(ral::usbd, regs, ISG0, self.control);
        }
        if self.tx0byte != 0 {
            ral::write_reg!(ral::usbd, regs, TX0BYTE, self.tx0byte);
        }
        if self.rx0byte != 0 {
            ral::write_reg!(ral::usbd, regs, RX0BYTE, self.rx0byte);
        }
        if self.device != 0 {
            ral::write_reg!(ral::usbd, regs, ISG2, self.device);
        }
        if self.dma != 0 {
            ral::write_reg!(ral::usbd, regs, ISG3, self.dma);
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Status::default()
    }

    /// Decode the snapshot into events
    pub fn events(&self) -> Events {
        Events { status: *self }
    }
}

/// Walks a [`Status`] in handling order
///
/// Link events come first, since they invalidate everything else. DMA
/// completions come before a new SETUP so that a finished data stage is
/// retired before the next request starts.
pub struct Events {
    status: Status,
}

/// Take the lowest set bit, returning its position
fn take_lowest(bits: &mut u32) -> Option<u32> {
    if *bits == 0 {
        return None;
    }
    let pos = bits.trailing_zeros();
    *bits &= !(1 << pos);
    Some(pos)
}

/// Take `flag` from `bits`, returning `true` if it was set
fn take<F: bitflags::Flags<Bits = u32>>(bits: &mut u32, flag: F) -> bool {
    let set = *bits & flag.bits() != 0;
    *bits &= !flag.bits();
    set
}

impl Iterator for Events {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        let status = &mut self.status;

        if core::mem::take(&mut status.session_end) {
            return Some(Event::SessionEnd);
        }
        if take(&mut status.device, Device::USBRST) {
            return Some(Event::BusReset);
        }
        if take(&mut status.device, Device::SUSP) {
            return Some(Event::Suspend);
        }
        if take(&mut status.device, Device::RESM) {
            return Some(Event::Resume);
        }

        for channel in Channel::all() {
            if take(&mut status.dma, Dma::error(channel)) {
                return Some(Event::DmaError(channel));
            }
        }
        for channel in Channel::all() {
            if take(&mut status.dma, Dma::complete(channel)) {
                return Some(Event::DmaComplete(channel));
            }
        }

        if take(&mut status.control, Control::ABORT) {
            return Some(Event::ControlAbort);
        }
        if take(&mut status.control, Control::FAIL) {
            return Some(Event::ControlFail);
        }
        if take(&mut status.control, Control::END) {
            return Some(Event::ControlEnd);
        }
        if take(&mut status.control, Control::SETUP) {
            return Some(Event::Setup);
        }

        while let Some(bit) = take_lowest(&mut status.tx0byte) {
            let number = bit as usize + 1;
            if number <= MAX_ENDPOINTS {
                return Some(Event::ZeroLengthSent(number));
            }
        }
        while let Some(bit) = take_lowest(&mut status.rx0byte) {
            let number = bit as usize + 1;
            if number <= MAX_ENDPOINTS {
                return Some(Event::ZeroLengthReceived(number));
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::{Channel, Control, Device, Dma, Event, Groups, Status};
    use crate::ral;

    fn events(regs: &ral::RegisterBlock) -> Vec<Event> {
        Status::read(regs).events().collect()
    }

    #[test]
    fn nothing_pending() {
        let regs = ral::RegisterBlock::new();
        regs.ISG0.write(Control::SETUP.bits());
        // Group summary not set
        let status = Status::read(&regs);
        assert!(status.is_empty());
        assert_eq!(status.events().next(), None);
    }

    #[test]
    fn setup_packet() {
        let regs = ral::RegisterBlock::new();
        regs.IGR.write(Groups::CONTROL.bits());
        regs.ISG0.write((Control::SETUP | Control::END).bits());
        assert_eq!(events(&regs), [Event::ControlEnd, Event::Setup]);
    }

    #[test]
    fn masked_sources_are_ignored() {
        let regs = ral::RegisterBlock::new();
        regs.IGR.write((Groups::CONTROL | Groups::DEVICE).bits());
        regs.ISG0.write((Control::SETUP | Control::IN).bits());
        regs.MISG0.write(Control::IN.bits());
        regs.ISG2.write((Device::USBRST | Device::SUSP).bits());
        regs.MISG2.write(Device::SUSP.bits());
        assert_eq!(events(&regs), [Event::BusReset, Event::Setup]);
    }

    #[test]
    fn dma_channels() {
        let regs = ral::RegisterBlock::new();
        regs.IGR.write(Groups::DMA.bits());
        regs.ISG3.write((Dma::CMPLT_F2 | Dma::CMPLT_CX | Dma::ERR_F0).bits());
        assert_eq!(
            events(&regs),
            [
                Event::DmaError(Channel::Fifo(0)),
                Event::DmaComplete(Channel::Control),
                Event::DmaComplete(Channel::Fifo(2)),
            ]
        );
        assert_eq!(Dma::complete(Channel::Fifo(3)), Dma::CMPLT_F3);
        assert_eq!(Dma::error(Channel::Control), Dma::ERR_CX);
    }

    #[test]
    fn link_events_come_first() {
        let regs = ral::RegisterBlock::new();
        regs.IGR.write((Groups::DMA | Groups::CONTROL).bits());
        regs.ISG0.write(Control::SETUP.bits());
        regs.ISG3.write(Dma::CMPLT_F1.bits());
        regs.OTG_ISR.write(1 << 2);
        regs.OTG_IER.write(1 << 2);
        assert_eq!(
            events(&regs),
            [
                Event::SessionEnd,
                Event::DmaComplete(Channel::Fifo(1)),
                Event::Setup
            ]
        );
    }

    #[test]
    fn session_end_needs_enable() {
        let regs = ral::RegisterBlock::new();
        regs.OTG_ISR.write(1 << 2);
        assert!(Status::read(&regs).is_empty());
    }

    #[test]
    fn zero_length_packets_by_endpoint() {
        let regs = ral::RegisterBlock::new();
        regs.IGR.write(Groups::DEVICE.bits());
        regs.ISG2.write((Device::TX0BYTE | Device::RX0BYTE).bits());
        regs.TX0BYTE.write(0b101);
        regs.RX0BYTE.write(0b10);
        assert_eq!(
            events(&regs),
            [
                Event::ZeroLengthSent(1),
                Event::ZeroLengthSent(3),
                Event::ZeroLengthReceived(2),
            ]
        );
    }

    #[test]
    fn acknowledge_writes_back_captured_bits() {
        let regs = ral::RegisterBlock::new();
        regs.IGR.write((Groups::CONTROL | Groups::DMA).bits());
        regs.ISG0.write(Control::SETUP.bits());
        regs.ISG3.write(Dma::CMPLT_F0.bits());
        let status = Status::read(&regs);

        // Stand-in for write-one-to-clear: the written value is visible.
        regs.ISG0.write(0);
        regs.ISG3.write(0);
        status.acknowledge(&regs);
        assert_eq!(regs.ISG0.read(), Control::SETUP.bits());
        assert_eq!(regs.ISG3.read(), Dma::CMPLT_F0.bits());
        assert_eq!(regs.ISG2.read(), 0);
    }
}
