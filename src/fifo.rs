//! Endpoint to FIFO allocation
//!
//! The controller has four physical FIFOs. When the host selects the
//! configuration, each interface endpoint claims FIFOs in descriptor order.
//! Interfaces with few endpoints get double-buffered FIFOs, which consume
//! the following FIFO as the second block.

use crate::{
    descriptor::{EndpointDescriptor, TransferType},
    ral, Error, FIFO_COUNT, MAX_ENDPOINTS,
};
use usb_device::{endpoint::EndpointAddress, UsbDirection};

/// Marks an unused nibble in the endpoint map
const NO_FIFO: u32 = 0xF;

/// Block sizes are 512 bytes unless the endpoint needs more
const LARGE_BLOCK: u16 = 512;

/// `FCFG` enable bit, within one FIFO's byte
const FIFO_ENABLE: u32 = 1 << 5;

/// One endpoint's claim on a FIFO
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Assignment {
    /// The primary FIFO
    pub fifo: usize,
    /// 1 for single-buffered, 2 for double-buffered
    pub blocks: usize,
    pub endpoint: EndpointDescriptor,
}

impl Assignment {
    pub fn address(&self) -> EndpointAddress {
        self.endpoint.address()
    }

    pub fn max_packet_size(&self) -> usize {
        usize::from(self.endpoint.max_packet_size)
    }

    pub fn transfer_type(&self) -> TransferType {
        self.endpoint.transfer_type
    }

    /// FIFO configuration byte: type, block count, block size, enable
    fn config(&self) -> u32 {
        let kind = self.endpoint.transfer_type as u32;
        let blkno = (self.blocks as u32 - 1) << 2;
        let blksz = ((self.endpoint.max_packet_size > LARGE_BLOCK) as u32) << 4;
        kind | blkno | blksz | FIFO_ENABLE
    }

    /// FIFO map byte: endpoint number, direction
    fn map(&self) -> u32 {
        let dir = match self.endpoint.direction() {
            UsbDirection::Out => 0,
            UsbDirection::In => 1,
        };
        self.address().index() as u32 | dir << 4
    }
}

/// The endpoint <-> FIFO routing table
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FifoMap {
    /// Indexed by primary FIFO
    fifos: [Option<Assignment>; FIFO_COUNT],
}

impl FifoMap {
    /// A map with no endpoints
    pub const fn empty() -> Self {
        FifoMap {
            fifos: [None; FIFO_COUNT],
        }
    }

    /// Assign FIFOs to `endpoints`, in order
    ///
    /// This is a pure function of the endpoint list.
    pub fn allocate(endpoints: &[EndpointDescriptor]) -> Result<Self, Error> {
        if endpoints.len() > MAX_ENDPOINTS {
            return Err(Error::TooManyEndpoints);
        }

        let mut map = FifoMap::empty();
        let mut fifo = 0;
        for (idx, endpoint) in endpoints.iter().enumerate() {
            let number = endpoint.address().index();
            if !(1..=MAX_ENDPOINTS).contains(&number) || map.fifo_for(endpoint.address()).is_some()
            {
                return Err(Error::InvalidEndpoint);
            }

            let blocks = match (endpoints.len(), idx) {
                (0..=2, _) | (3, 0) => 2,
                _ => 1,
            };
            if fifo + blocks > FIFO_COUNT {
                return Err(Error::TooManyEndpoints);
            }

            map.fifos[fifo] = Some(Assignment {
                fifo,
                blocks,
                endpoint: *endpoint,
            });
            fifo += blocks;
        }
        Ok(map)
    }

    /// Returns the primary FIFO of `address`
    pub fn fifo_for(&self, address: EndpointAddress) -> Option<usize> {
        self.iter()
            .find(|assignment| assignment.address() == address)
            .map(|assignment| assignment.fifo)
    }

    /// Returns the assignment that owns primary FIFO `fifo`
    pub fn assignment(&self, fifo: usize) -> Option<&Assignment> {
        self.fifos.get(fifo)?.as_ref()
    }

    /// Returns the assignment for `address`
    pub fn lookup(&self, address: EndpointAddress) -> Option<&Assignment> {
        self.iter().find(|assignment| assignment.address() == address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Assignment> {
        self.fifos.iter().flatten()
    }

    /// Value for `EPMAP`: one byte per endpoint 1 through 4, IN FIFO in
    /// the low nibble, OUT FIFO in the high nibble
    pub fn epmap(&self) -> u32 {
        let mut value = 0;
        for number in 1..=MAX_ENDPOINTS {
            let lookup = |dir| {
                self.fifo_for(EndpointAddress::from_parts(number, dir))
                    .map_or(NO_FIFO, |fifo| fifo as u32)
            };
            let byte = lookup(UsbDirection::In) | lookup(UsbDirection::Out) << 4;
            value |= byte << ((number - 1) * 8);
        }
        value
    }

    /// Value for `FMAP`: one byte per FIFO
    ///
    /// The second block of a double-buffered FIFO routes to the same endpoint.
    pub fn fmap(&self) -> u32 {
        self.per_block(|assignment, _| assignment.map())
    }

    /// Value for `FCFG`: one byte per FIFO
    ///
    /// Only the primary FIFO is enabled.
    pub fn fcfg(&self) -> u32 {
        self.per_block(|assignment, block| match block {
            0 => assignment.config(),
            _ => assignment.config() & !FIFO_ENABLE,
        })
    }

    fn per_block(&self, byte: impl Fn(&Assignment, usize) -> u32) -> u32 {
        self.iter().fold(0, |mut value, assignment| {
            for block in 0..assignment.blocks {
                value |= byte(assignment, block) << ((assignment.fifo + block) * 8);
            }
            value
        })
    }

    /// Mask of primary FIFOs in use
    pub fn fifo_mask(&self) -> u32 {
        self.iter().fold(0, |mask, assignment| mask | 1 << assignment.fifo)
    }
}

/// Program the FIFO tables for `endpoints`, and reset every endpoint's max
/// packet size and data toggle
///
/// Clears all FIFOs. On success, the device address latches after the
/// configuration completes.
pub fn configure_fifos(
    regs: &ral::RegisterBlock,
    endpoints: &[EndpointDescriptor],
) -> Result<FifoMap, Error> {
    let map = FifoMap::allocate(endpoints)?;

    ral::write_reg!(ral::usbd, regs, EPMAP, map.epmap());
    ral::write_reg!(ral::usbd, regs, FMAP, map.fmap());
    ral::write_reg!(ral::usbd, regs, FCFG, map.fcfg());

    for number in 1..=MAX_ENDPOINTS {
        for dir in [UsbDirection::In, UsbDirection::Out] {
            let mps = map
                .lookup(EndpointAddress::from_parts(number, dir))
                .map_or(0, |assignment| assignment.max_packet_size() as u32);
            let slot = endpoint_register(regs, number, dir);
            ral::write_reg!(ral::ep, slot, MPS, MPS: mps, RSTG: 1);
            ral::write_reg!(ral::ep, slot, MPS, MPS: mps);
        }
    }

    clear_all(regs);
    ral::modify_reg!(ral::usbd, regs, DEV_ADDR, AFT_CONF: 1);

    debug!("FIFO MAP EP {:X} FIFO {:X} CFG {:X}", map.epmap(), map.fmap(), map.fcfg());
    Ok(map)
}

/// Undo [`configure_fifos`]
pub fn unconfigure_fifos(regs: &ral::RegisterBlock) {
    ral::write_reg!(ral::usbd, regs, FCFG, 0);
    ral::write_reg!(ral::usbd, regs, FMAP, 0);
    ral::write_reg!(ral::usbd, regs, EPMAP, u32::MAX);
    clear_all(regs);
}

/// Returns the max packet size / control register of an endpoint
///
/// `number` must be in `1..=8`.
pub fn endpoint_register(
    regs: &ral::RegisterBlock,
    number: usize,
    dir: UsbDirection,
) -> &ral::EpCtrl {
    match dir {
        UsbDirection::In => &regs.IN_EP[number - 1],
        UsbDirection::Out => &regs.OUT_EP[number - 1],
    }
}

/// Clear the contents of every FIFO
pub fn clear_all(regs: &ral::RegisterBlock) {
    ral::modify_reg!(ral::usbd, regs, DEV_TEST, CLRFF: 1);
    ral::modify_reg!(ral::usbd, regs, DEV_TEST, CLRFF: 0);
}

/// Clear the contents of one FIFO
pub fn reset(regs: &ral::RegisterBlock, fifo: usize) {
    let fifo = &regs.FIFO[fifo];
    ral::modify_reg!(ral::fifo, fifo, FIBC, FFRST: 1);
    ral::modify_reg!(ral::fifo, fifo, FIBC, FFRST: 0);
}

/// Reset the data toggle of an endpoint, and clear its stall
pub fn reset_toggle(regs: &ral::RegisterBlock, address: EndpointAddress) {
    let slot = endpoint_register(regs, address.index(), address.direction());
    ral::modify_reg!(ral::ep, slot, MPS, RSTG: 1, STL: 0);
    ral::modify_reg!(ral::ep, slot, MPS, RSTG: 0);
}

#[cfg(test)]
mod tests {
    use super::{configure_fifos, FifoMap};
    use crate::{
        descriptor::{tests::ENDPOINTS, EndpointDescriptor},
        ral, Error,
    };
    use usb_device::endpoint::EndpointAddress;

    fn addr(raw: u8) -> EndpointAddress {
        EndpointAddress::from(raw)
    }

    #[test]
    fn one_endpoint_is_double_buffered() {
        let map = FifoMap::allocate(&[EndpointDescriptor::bulk(0x81, 512)]).unwrap();
        let assignment = map.assignment(0).unwrap();
        assert_eq!(assignment.blocks, 2);
        assert_eq!(map.fifo_for(addr(0x81)), Some(0));
        assert_eq!(map.fifo_mask(), 0b1);
    }

    #[test]
    fn two_endpoints_are_double_buffered() {
        let map = FifoMap::allocate(&[
            EndpointDescriptor::bulk(0x81, 512),
            EndpointDescriptor::bulk(0x02, 512),
        ])
        .unwrap();
        assert_eq!(map.fifo_for(addr(0x81)), Some(0));
        assert_eq!(map.fifo_for(addr(0x02)), Some(2));
        assert!(map.assignment(1).is_none());
        assert!(map.assignment(3).is_none());
        assert_eq!(map.fifo_mask(), 0b101);
    }

    #[test]
    fn three_endpoints_widen_only_the_first() {
        let map = FifoMap::allocate(&ENDPOINTS).unwrap();
        assert_eq!(map.fifo_for(addr(0x81)), Some(0));
        assert_eq!(map.assignment(0).unwrap().blocks, 2);
        assert_eq!(map.fifo_for(addr(0x02)), Some(2));
        assert_eq!(map.assignment(2).unwrap().blocks, 1);
        assert_eq!(map.fifo_for(addr(0x83)), Some(3));
        assert_eq!(map.assignment(3).unwrap().blocks, 1);
    }

    #[test]
    fn four_endpoints_are_single_buffered() {
        let map = FifoMap::allocate(&[
            EndpointDescriptor::bulk(0x81, 512),
            EndpointDescriptor::bulk(0x01, 512),
            EndpointDescriptor::bulk(0x82, 512),
            EndpointDescriptor::interrupt(0x83, 64, 1),
        ])
        .unwrap();
        for (fifo, raw) in [0x81, 0x01, 0x82, 0x83].into_iter().enumerate() {
            assert_eq!(map.fifo_for(addr(raw)), Some(fifo));
            assert_eq!(map.assignment(fifo).unwrap().blocks, 1);
        }
    }

    #[test]
    fn allocation_is_deterministic() {
        let first = FifoMap::allocate(&ENDPOINTS).unwrap();
        for _ in 0..8 {
            let again = FifoMap::allocate(&ENDPOINTS).unwrap();
            assert_eq!(again, first);
            assert_eq!(again.epmap(), first.epmap());
            assert_eq!(again.fmap(), first.fmap());
        }
    }

    #[test]
    fn five_endpoints_is_an_error() {
        let endpoints = [EndpointDescriptor::bulk(0x81, 64); 5];
        assert_eq!(
            FifoMap::allocate(&endpoints),
            Err(Error::TooManyEndpoints)
        );
    }

    #[test]
    fn endpoint_numbers_are_checked() {
        assert_eq!(
            FifoMap::allocate(&[EndpointDescriptor::bulk(0x85, 64)]),
            Err(Error::InvalidEndpoint)
        );
        assert_eq!(
            FifoMap::allocate(&[EndpointDescriptor::bulk(0x00, 64)]),
            Err(Error::InvalidEndpoint)
        );
        assert_eq!(
            FifoMap::allocate(&[
                EndpointDescriptor::bulk(0x81, 64),
                EndpointDescriptor::bulk(0x81, 64)
            ]),
            Err(Error::InvalidEndpoint)
        );
    }

    #[test]
    fn register_tables() {
        let map = FifoMap::allocate(&ENDPOINTS).unwrap();
        // EP1 IN -> FIFO0, EP2 OUT -> FIFO2, EP3 IN -> FIFO3, EP4 unused
        assert_eq!(map.epmap(), 0xFF_F3_2F_F0);
        // FIFO0 and FIFO1 -> EP1 IN, FIFO2 -> EP2 OUT, FIFO3 -> EP3 IN
        assert_eq!(map.fmap(), 0x13_02_11_11);
        // FIFO0: bulk, double, enabled. FIFO1: its second block, disabled.
        // FIFO2: bulk, single, enabled. FIFO3: interrupt, single, enabled.
        assert_eq!(map.fcfg(), 0x23_22_06_26);
    }

    #[test]
    fn program_registers() {
        let regs = ral::RegisterBlock::new();
        let map = configure_fifos(&regs, &ENDPOINTS).unwrap();
        assert_eq!(regs.EPMAP.read(), map.epmap());
        assert_eq!(regs.FMAP.read(), map.fmap());
        assert_eq!(regs.FCFG.read(), map.fcfg());
        assert_eq!(regs.IN_EP[0].MPS.read(), 512);
        assert_eq!(regs.OUT_EP[1].MPS.read(), 512);
        assert_eq!(regs.IN_EP[2].MPS.read(), 64);
        assert_eq!(regs.OUT_EP[0].MPS.read(), 0);
        assert_eq!(regs.DEV_ADDR.read(), 1 << 7, "address follows configuration");
    }
}
