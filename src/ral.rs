//! Register access layer for the USB device controller
//!
//! The controller is a four-FIFO device core with a "virtual DMA" (VDMA)
//! engine. Registers are modeled as a `#[repr(C)]` block of volatile cells,
//! and fields are described with the `offset` / `mask` modules that the
//! `ral-registers` macros expect.
//!
//! Interrupt status registers (`ISG*`, `OTG_ISR`, `TX0BYTE`, `RX0BYTE`) are
//! write-one-to-clear. A set bit in a mask register (`MISG*`) masks that
//! interrupt source.

#![allow(non_snake_case, non_upper_case_globals)]

use crate::vcell::VCell;

pub use ral_registers::{modify_reg, read_reg, write_reg};

/// Generates RAL field modules for a register
macro_rules! fields {
    ($($reg:ident { $($field:ident : $offset:expr, $width:expr;)* })*) => {
        $(
            pub mod $reg {
                $(
                    pub mod $field {
                        pub const offset: u32 = $offset;
                        pub const mask: u32 = (u32::MAX >> (32 - $width)) << offset;
                        pub mod R {}
                        pub mod W {}
                        pub mod RW {}
                    }
                )*
            }
        )*
    };
}

/// Number of VDMA channels: the control channel, then one per FIFO
pub const VDMA_CHANNELS: usize = 1 + crate::FIFO_COUNT;

/// Endpoint slots in the max-packet-size tables
pub const EP_SLOTS: usize = 8;

/// Per-endpoint max packet size and control register
#[repr(C)]
pub struct EpCtrl {
    pub MPS: VCell<u32>,
}

/// Per-FIFO byte count and reset register
#[repr(C)]
pub struct FifoCtrl {
    pub FIBC: VCell<u32>,
}

/// One VDMA channel
#[repr(C)]
pub struct Vdma {
    /// Start, direction, abort, and length. After completion, `LEN`
    /// holds the number of bytes the channel did *not* move.
    pub CTRL: VCell<u32>,
    /// Memory address of the transfer. Pointer sized; 32 bits on target.
    pub ADDR: VCell<usize>,
}

#[repr(C)]
pub struct RegisterBlock {
    /// 0x000
    pub OTG_CSR: VCell<u32>,
    /// 0x004
    pub OTG_ISR: VCell<u32>,
    /// 0x008
    pub OTG_IER: VCell<u32>,
    _reserved0: [u32; 61],
    /// 0x100
    pub DEV_CTRL: VCell<u32>,
    /// 0x104
    pub DEV_ADDR: VCell<u32>,
    /// 0x108
    pub DEV_TEST: VCell<u32>,
    _reserved1: [u32; 5],
    /// 0x120
    pub CX_CSR: VCell<u32>,
    _reserved2: [u32; 3],
    /// 0x130, control interrupt mask
    pub MISG0: VCell<u32>,
    /// 0x134, FIFO interrupt mask
    pub MISG1: VCell<u32>,
    /// 0x138, device state interrupt mask
    pub MISG2: VCell<u32>,
    /// 0x13C, VDMA interrupt mask
    pub MISG3: VCell<u32>,
    /// 0x140, interrupt group summary
    pub IGR: VCell<u32>,
    /// 0x144
    pub ISG0: VCell<u32>,
    /// 0x148
    pub ISG1: VCell<u32>,
    /// 0x14C
    pub ISG2: VCell<u32>,
    /// 0x150
    pub ISG3: VCell<u32>,
    /// 0x154, one bit per IN endpoint whose zero-length packet went out
    pub TX0BYTE: VCell<u32>,
    /// 0x158, one bit per OUT endpoint that received a zero-length packet
    pub RX0BYTE: VCell<u32>,
    _reserved3: u32,
    /// 0x160, IN endpoints 1 through 8
    pub IN_EP: [EpCtrl; EP_SLOTS],
    /// 0x180, OUT endpoints 1 through 8
    pub OUT_EP: [EpCtrl; EP_SLOTS],
    /// 0x1A0, endpoint to FIFO map for endpoints 1 through 4
    pub EPMAP: VCell<u32>,
    _reserved4: u32,
    /// 0x1A8, FIFO to endpoint map
    pub FMAP: VCell<u32>,
    /// 0x1AC, FIFO configuration
    pub FCFG: VCell<u32>,
    /// 0x1B0
    pub FIFO: [FifoCtrl; crate::FIFO_COUNT],
    _reserved5: [u32; 80],
    /// 0x300, control channel first, then FIFO 0 through 3
    pub VDMA: [Vdma; VDMA_CHANNELS],
}

// Safety: the block is MMIO (or its simulation). Shared access is
// coordinated by the driver's critical sections.
unsafe impl Sync for RegisterBlock {}

#[cfg(target_pointer_width = "32")]
const _: [(); 1] = [(); (core::mem::size_of::<RegisterBlock>() == 0x328) as usize];

impl RegisterBlock {
    /// A register block with every register zeroed
    #[cfg(test)]
    pub const fn new() -> Self {
        const EP: EpCtrl = EpCtrl { MPS: VCell::new(0) };
        const FIFO: FifoCtrl = FifoCtrl {
            FIBC: VCell::new(0),
        };
        const VDMA: Vdma = Vdma {
            CTRL: VCell::new(0),
            ADDR: VCell::new(0),
        };
        RegisterBlock {
            OTG_CSR: VCell::new(0),
            OTG_ISR: VCell::new(0),
            OTG_IER: VCell::new(0),
            _reserved0: [0; 61],
            DEV_CTRL: VCell::new(0),
            DEV_ADDR: VCell::new(0),
            DEV_TEST: VCell::new(0),
            _reserved1: [0; 5],
            CX_CSR: VCell::new(0),
            _reserved2: [0; 3],
            MISG0: VCell::new(0),
            MISG1: VCell::new(0),
            MISG2: VCell::new(0),
            MISG3: VCell::new(0),
            IGR: VCell::new(0),
            ISG0: VCell::new(0),
            ISG1: VCell::new(0),
            ISG2: VCell::new(0),
            ISG3: VCell::new(0),
            TX0BYTE: VCell::new(0),
            RX0BYTE: VCell::new(0),
            _reserved3: 0,
            IN_EP: [EP; EP_SLOTS],
            OUT_EP: [EP; EP_SLOTS],
            EPMAP: VCell::new(0),
            _reserved4: 0,
            FMAP: VCell::new(0),
            FCFG: VCell::new(0),
            FIFO: [FIFO; crate::FIFO_COUNT],
            _reserved5: [0; 80],
            VDMA: [VDMA; VDMA_CHANNELS],
        }
    }
}

/// Device controller registers
pub mod usbd {
    fields! {
        OTG_ISR {
            B_SESS_END: 2, 1;
        }
        OTG_IER {
            B_SESS_END: 2, 1;
        }
        DEV_CTRL {
            GLINT_EN: 2, 1;
            SFRST: 4, 1;
            CHIP_EN: 5, 1;
            FORCE_FS: 9, 1;
        }
        DEV_ADDR {
            ADDR: 0, 7;
            AFT_CONF: 7, 1;
        }
        DEV_TEST {
            CLRFF: 0, 1;
        }
        CX_CSR {
            DONE: 0, 1;
            STL: 2, 1;
            CLR: 3, 1;
            F_EMPTY: 8, 4;
        }
    }
}

/// Fields of [`EpCtrl`]
pub mod ep {
    fields! {
        MPS {
            MPS: 0, 11;
            STL: 11, 1;
            RSTG: 12, 1;
            TX0BYTE: 15, 1;
        }
    }
}

/// Fields of [`FifoCtrl`]
pub mod fifo {
    fields! {
        FIBC {
            BC: 0, 11;
            FFRST: 12, 1;
        }
    }
}

/// Fields of [`Vdma`]
pub mod vdma {
    fields! {
        CTRL {
            START: 0, 1;
            DIR: 1, 1;
            ABORT: 3, 1;
            LEN: 8, 17;
        }
    }

    /// `DIR` value for FIFO to memory (OUT data, SETUP capture)
    pub const FIFO_TO_MEMORY: u32 = 0;
    /// `DIR` value for memory to FIFO (IN data)
    pub const MEMORY_TO_FIFO: u32 = 1;
}

/// Returns the register block behind a [`Peripherals`](crate::Peripherals)
/// implementation.
pub fn instance<P: crate::Peripherals>(peripherals: &P) -> &'static RegisterBlock {
    // Safety: the Peripherals contract guarantees that the pointer addresses
    // a register block that lives for the rest of the program.
    unsafe { &*(peripherals.usbd() as *const RegisterBlock) }
}
