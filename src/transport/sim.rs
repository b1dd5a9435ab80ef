//! Deterministic single-threaded transport for tests
//!
//! All ranks share one [`SimNetwork`] and are stepped by the caller on a
//! single thread. Delivery is immediate and FIFO per destination. A blocking
//! receive with nothing to receive cannot wait for another thread, so it
//! fails with [`TransportError::WouldBlock`] instead.
//!
//! The gather completes at the root once every other rank has contributed;
//! finish the non-root ranks first.

use super::{Envelope, Transport};
use crate::error::{TransportError, TransportResult};
use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::rc::Rc;

#[derive(Debug, Default)]
struct SimState {
    /// Undelivered messages per destination rank
    mailboxes: Vec<VecDeque<Envelope>>,

    /// Gather contributions per rank
    gathered: Vec<Option<Vec<u8>>>,

    /// Messages sent per source rank
    sent: Vec<u64>,

    /// Non-blocking sends not yet waited on
    outstanding: BTreeSet<u64>,

    /// Next request id
    next_request: u64,
}

/// Shared simulated network
#[derive(Debug, Clone)]
pub struct SimNetwork {
    state: Rc<RefCell<SimState>>,
    size: usize,
}

impl SimNetwork {
    /// Create a network of `size` ranks
    pub fn new(size: usize) -> Self {
        let state = SimState {
            mailboxes: vec![VecDeque::new(); size],
            gathered: vec![None; size],
            sent: vec![0; size],
            ..SimState::default()
        };
        Self {
            state: Rc::new(RefCell::new(state)),
            size,
        }
    }

    /// One endpoint per rank, indexed by rank
    pub fn endpoints(&self) -> Vec<SimTransport> {
        (0..self.size)
            .map(|rank| SimTransport {
                rank,
                network: self.clone(),
            })
            .collect()
    }

    /// Number of ranks
    pub fn size(&self) -> usize {
        self.size
    }

    /// Total messages sent by every rank
    pub fn messages_sent(&self) -> u64 {
        self.state.borrow().sent.iter().sum()
    }

    /// Snapshot of every undelivered message, grouped by destination
    pub fn undelivered(&self) -> Vec<(usize, Envelope)> {
        self.state
            .borrow()
            .mailboxes
            .iter()
            .enumerate()
            .flat_map(|(dest, mailbox)| mailbox.iter().map(move |e| (dest, e.clone())))
            .collect()
    }

    /// Undelivered messages carrying `tag`
    pub fn undelivered_with_tag(&self, tag: u8) -> usize {
        self.state
            .borrow()
            .mailboxes
            .iter()
            .flat_map(|mailbox| mailbox.iter())
            .filter(|e| e.tag == tag)
            .count()
    }

    /// Non-blocking sends that were never waited on
    pub fn outstanding_requests(&self) -> usize {
        self.state.borrow().outstanding.len()
    }
}

/// Completed simulated send awaiting `wait`
#[derive(Debug)]
#[must_use = "a pending send must be waited on"]
pub struct SimRequest {
    id: u64,
}

/// One rank's endpoint on a [`SimNetwork`]
#[derive(Debug)]
pub struct SimTransport {
    rank: usize,
    network: SimNetwork,
}

impl SimTransport {
    /// The network this endpoint belongs to
    pub fn network(&self) -> &SimNetwork {
        &self.network
    }

    fn deliver(&mut self, dest: usize, tag: u8, body: Vec<u8>) -> TransportResult<()> {
        let mut state = self.network.state.borrow_mut();
        let size = state.mailboxes.len();
        let mailbox = state
            .mailboxes
            .get_mut(dest)
            .ok_or(TransportError::InvalidRank { dest, size })?;
        mailbox.push_back(Envelope {
            source: self.rank,
            tag,
            body,
        });
        state.sent[self.rank] += 1;
        Ok(())
    }
}

impl Transport for SimTransport {
    type Request = SimRequest;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.network.size
    }

    fn send(&mut self, dest: usize, tag: u8, body: Vec<u8>) -> TransportResult<()> {
        self.deliver(dest, tag, body)
    }

    fn isend(&mut self, dest: usize, tag: u8, body: Vec<u8>) -> TransportResult<SimRequest> {
        self.deliver(dest, tag, body)?;
        let mut state = self.network.state.borrow_mut();
        let id = state.next_request;
        state.next_request += 1;
        state.outstanding.insert(id);
        Ok(SimRequest { id })
    }

    fn wait(&mut self, request: SimRequest) -> TransportResult<()> {
        let removed = self.network.state.borrow_mut().outstanding.remove(&request.id);
        if removed {
            Ok(())
        } else {
            Err(TransportError::SendFailed {
                from: self.rank,
                to: self.rank,
                reason: format!("request {} already completed", request.id),
            })
        }
    }

    fn probe(&mut self) -> TransportResult<bool> {
        Ok(!self.network.state.borrow().mailboxes[self.rank].is_empty())
    }

    fn recv(&mut self) -> TransportResult<Envelope> {
        self.network.state.borrow_mut().mailboxes[self.rank]
            .pop_front()
            .ok_or(TransportError::WouldBlock { rank: self.rank })
    }

    fn recv_from(&mut self, source: usize, tag: u8) -> TransportResult<Envelope> {
        let mut state = self.network.state.borrow_mut();
        let mailbox = &mut state.mailboxes[self.rank];
        let pos = mailbox
            .iter()
            .position(|e| e.source == source && e.tag == tag)
            .ok_or(TransportError::WouldBlock { rank: self.rank })?;
        mailbox
            .remove(pos)
            .ok_or(TransportError::WouldBlock { rank: self.rank })
    }

    fn gather(&mut self, root: usize, body: Vec<u8>) -> TransportResult<Option<Vec<Vec<u8>>>> {
        let mut state = self.network.state.borrow_mut();
        if root >= state.gathered.len() {
            return Err(TransportError::InvalidRank {
                dest: root,
                size: state.gathered.len(),
            });
        }
        if state.gathered[self.rank].replace(body).is_some() {
            return Err(TransportError::GatherFailed {
                root,
                reason: format!("rank {} contributed twice", self.rank),
            });
        }
        if self.rank != root {
            return Ok(None);
        }

        if state.gathered.iter().any(Option::is_none) {
            return Err(TransportError::WouldBlock { rank: self.rank });
        }
        Ok(Some(state.gathered.iter_mut().filter_map(Option::take).collect()))
    }
}
