//! Point-to-point transport between ranks
//!
//! The walker only consumes this contract:
//!
//! - exactly `size()` peers, fixed for the run, addressed `0..size()`
//! - reliable delivery, in send order between any ordered pair of ranks
//! - tagged messages with an opaque byte body
//! - a non-blocking probe and a blocking receive from any source
//! - a blocking matched receive (`recv_from`) that holds back other
//!   messages in arrival order
//! - one blocking gather of a byte body from every rank to a root
//!
//! Two implementations ship with the crate: [`LocalTransport`] runs one rank
//! per thread in a single process, [`SimTransport`] runs every rank on one
//! thread for deterministic tests.

pub mod local;
pub mod sim;

pub use local::{LocalRequest, LocalTransport};
pub use sim::{SimNetwork, SimRequest, SimTransport};

use crate::error::TransportResult;

/// A received message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Sending rank
    pub source: usize,

    /// Raw message tag
    pub tag: u8,

    /// Encoded body
    pub body: Vec<u8>,
}

/// Reliable, ordered, tagged messaging between a fixed group of ranks
pub trait Transport {
    /// Handle for a non-blocking send; consumed by [`Transport::wait`]
    type Request;

    /// This rank, `0..size()`
    fn rank(&self) -> usize;

    /// Number of ranks in the group
    fn size(&self) -> usize;

    /// Send and return once the body may be discarded
    fn send(&mut self, dest: usize, tag: u8, body: Vec<u8>) -> TransportResult<()>;

    /// Start a send without waiting for it
    fn isend(&mut self, dest: usize, tag: u8, body: Vec<u8>) -> TransportResult<Self::Request>;

    /// Wait for a non-blocking send to complete
    fn wait(&mut self, request: Self::Request) -> TransportResult<()>;

    /// Whether a message from any source is ready to receive. Never blocks.
    fn probe(&mut self) -> TransportResult<bool>;

    /// Receive the next message from any source, blocking until one arrives
    fn recv(&mut self) -> TransportResult<Envelope>;

    /// Receive the next message from `source` carrying `tag`, blocking until
    /// it arrives. Other messages stay queued in their arrival order.
    fn recv_from(&mut self, source: usize, tag: u8) -> TransportResult<Envelope>;

    /// Collect one body from every rank at `root`, ordered by rank.
    /// Returns `Some` at the root and `None` everywhere else.
    fn gather(&mut self, root: usize, body: Vec<u8>) -> TransportResult<Option<Vec<Vec<u8>>>>;

    /// Successor in the token ring
    fn next_rank(&self) -> usize {
        (self.rank() + 1) % self.size()
    }
}
