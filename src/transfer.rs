//! Per-FIFO transfer state
//!
//! A [`FifoContext`] tracks one transfer between a caller's buffer and a
//! FIFO. It never touches hardware. Each method returns the [`Step`] the
//! driver should take next, so the chunking and zero-length packet rules
//! can be exercised without registers.

use crate::{Error, BURST_LIMIT};
use usb_device::UsbDirection;

/// What the driver should do next for a FIFO
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Program the FIFO's VDMA channel
    Dma {
        address: usize,
        len: usize,
        direction: UsbDirection,
    },
    /// Queue a zero-length packet on the IN endpoint
    SendZlp,
    /// The transfer finished; wake the caller
    Complete(Result<usize, Error>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    /// A VDMA chunk is in flight
    Data,
    /// Waiting for the zero-length packet to go out
    Zlp,
    /// Finished, result not yet collected
    Done(Result<usize, Error>),
}

/// Identifies one transfer on a FIFO
///
/// A caller holds on to the token from [`FifoContext::begin`], and only
/// collects a result carrying the same generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Token(u32);

/// Describes a transfer to start
#[derive(Clone, Copy, Debug)]
pub struct Request {
    pub direction: UsbDirection,
    /// Start of the caller's buffer
    pub address: usize,
    pub len: usize,
    /// Endpoint max packet size
    pub max_packet_size: usize,
    /// Whether an IN transfer that ends on a packet boundary gets a
    /// trailing zero-length packet
    pub zlp: bool,
}

#[derive(Debug)]
pub struct FifoContext {
    phase: Phase,
    direction: UsbDirection,
    /// Address of the next chunk
    address: usize,
    /// Bytes not yet handed to the VDMA
    remaining: usize,
    /// Length of the chunk in flight
    chunk: usize,
    /// Bytes moved so far
    moved: usize,
    /// Append a ZLP after the data
    zlp: bool,
    generation: u32,
}

impl FifoContext {
    pub const fn new() -> Self {
        FifoContext {
            phase: Phase::Idle,
            direction: UsbDirection::Out,
            address: 0,
            remaining: 0,
            chunk: 0,
            moved: 0,
            zlp: false,
            generation: 0,
        }
    }

    /// `true` while a transfer is in flight
    pub fn is_active(&self) -> bool {
        matches!(self.phase, Phase::Data | Phase::Zlp)
    }

    /// Start a transfer, returning its token and the first step
    ///
    /// A zero-length IN transfer sends one zero-length packet. A
    /// zero-length OUT transfer completes immediately.
    pub fn begin(&mut self, request: Request) -> (Token, Step) {
        self.generation = self.generation.wrapping_add(1);
        self.direction = request.direction;
        self.address = request.address;
        self.remaining = request.len;
        self.moved = 0;
        self.chunk = 0;
        self.zlp = request.zlp
            && request.len > 0
            && request.max_packet_size > 0
            && request.len % request.max_packet_size == 0;

        let step = match (request.len, request.direction) {
            (0, UsbDirection::In) => {
                self.phase = Phase::Zlp;
                Step::SendZlp
            }
            (0, UsbDirection::Out) => self.complete(Ok(0)),
            _ => self.next_chunk(),
        };
        (Token(self.generation), step)
    }

    fn next_chunk(&mut self) -> Step {
        let len = self.remaining.min(BURST_LIMIT);
        let address = self.address;
        self.chunk = len;
        self.remaining -= len;
        self.address += len;
        self.phase = Phase::Data;
        Step::Dma {
            address,
            len,
            direction: self.direction,
        }
    }

    fn complete(&mut self, result: Result<usize, Error>) -> Step {
        self.phase = Phase::Done(result);
        Step::Complete(result)
    }

    /// The VDMA finished a chunk, leaving `residual` bytes unmoved
    ///
    /// Returns `None` if no chunk was in flight, as happens for a
    /// completion that races a cancellation.
    pub fn on_dma_complete(&mut self, residual: usize) -> Option<Step> {
        if self.phase != Phase::Data {
            return None;
        }

        let moved = self.chunk.saturating_sub(residual);
        self.moved += moved;

        if self.direction == UsbDirection::Out && residual > 0 {
            // Short packet
            return Some(self.complete(Ok(self.moved)));
        }
        if self.remaining > 0 {
            return Some(self.next_chunk());
        }
        if self.zlp {
            self.phase = Phase::Zlp;
            return Some(Step::SendZlp);
        }
        Some(self.complete(Ok(self.moved)))
    }

    /// The IN endpoint sent its zero-length packet
    pub fn on_zlp_sent(&mut self) -> Option<Step> {
        if self.phase != Phase::Zlp {
            return None;
        }
        Some(self.complete(Ok(self.moved)))
    }

    /// The OUT endpoint received a zero-length packet
    ///
    /// Ends the transfer with what has arrived so far. The driver must
    /// abort the in-flight chunk.
    pub fn on_zlp_received(&mut self) -> Option<Step> {
        if self.phase != Phase::Data || self.direction != UsbDirection::Out {
            return None;
        }
        Some(self.complete(Ok(self.moved)))
    }

    /// End an active transfer with `error`
    ///
    /// Does nothing if there is no active transfer.
    pub fn fail(&mut self, error: Error) -> Option<Step> {
        if !self.is_active() {
            return None;
        }
        Some(self.complete(Err(error)))
    }

    /// Collect the result of the transfer identified by `token`
    pub fn take_result(&mut self, token: Token) -> Option<Result<usize, Error>> {
        match self.phase {
            Phase::Done(result) if token.0 == self.generation => {
                self.phase = Phase::Idle;
                Some(result)
            }
            _ => None,
        }
    }

    /// Abandon whatever is in flight
    ///
    /// Late completions for the abandoned transfer are ignored.
    pub fn cancel(&mut self) {
        self.phase = Phase::Idle;
        self.generation = self.generation.wrapping_add(1);
    }
}
