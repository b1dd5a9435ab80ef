//! Randomized work stealing
//!
//! An idle rank asks one random peer for work and waits for the answer
//! before asking again. Keeping a single request in flight stops two idle
//! ranks from bouncing a worklist back and forth.
//!
//! A rank answering a request splits its queue at a random point in
//! `[1, n)` and ships the front part. A queue of zero or one items is never
//! split.

use super::queue::LocalQueue;
use crate::error::{ProtocolError, Result};
use crate::protocol::{Message, Reply};
use crate::transport::Transport;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace};

/// The one outstanding work request
#[derive(Debug)]
struct PendingRequest<H> {
    /// Peer the request went to
    target: usize,

    /// Send handle, waited on exactly once
    handle: H,
}

/// What happened when a peer asked us for work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
    /// Shipped this many items
    Gave(usize),
    /// Had at most one item, replied `NoWork`
    NoWork,
}

/// Statistics for work stealing on one rank
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StealStats {
    /// Work requests sent
    pub requests_sent: u64,

    /// Replies that carried items
    pub replies_with_work: u64,

    /// Replies that carried `NoWork`
    pub replies_empty: u64,

    /// Requests answered with items
    pub requests_served: u64,

    /// Requests answered with `NoWork`
    pub requests_refused: u64,
}

/// Work-stealing state for one rank
#[derive(Debug)]
pub struct Scheduler<H> {
    rank: usize,
    size: usize,
    pending: Option<PendingRequest<H>>,
    stats: StealStats,
}

impl<H> Scheduler<H> {
    /// Create the scheduler for `rank` in a group of `size`
    pub fn new(rank: usize, size: usize) -> Self {
        Self {
            rank,
            size,
            pending: None,
            stats: StealStats::default(),
        }
    }

    /// Whether a work request is outstanding
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Peer the outstanding request went to
    pub fn pending_target(&self) -> Option<usize> {
        self.pending.as_ref().map(|p| p.target)
    }

    /// Work-stealing statistics
    pub fn stats(&self) -> &StealStats {
        &self.stats
    }

    /// Pick a peer uniformly at random, never ourselves.
    /// `None` when we are alone.
    pub fn choose_peer<G: Rng>(&self, rng: &mut G) -> Option<usize> {
        if self.size < 2 {
            return None;
        }
        let pick = rng.gen_range(0..self.size - 1);
        Some(if pick >= self.rank { pick + 1 } else { pick })
    }

    /// Ask a random peer for work unless a request is already in flight.
    ///
    /// Returns the peer asked, if any.
    pub fn request_work<Tr, G>(&mut self, transport: &mut Tr, rng: &mut G) -> Result<Option<usize>>
    where
        Tr: Transport<Request = H>,
        G: Rng,
    {
        if self.pending.is_some() {
            return Ok(None);
        }
        let Some(target) = self.choose_peer(rng) else {
            return Ok(None);
        };

        let (tag, body) = Message::<()>::WorkRequest.encode()?;
        let handle = transport.isend(target, tag, body)?;
        self.pending = Some(PendingRequest { target, handle });
        self.stats.requests_sent += 1;

        trace!(rank = self.rank, target = target, "Work requested");
        Ok(Some(target))
    }

    /// Answer a work request from `requester` by splitting the local queue
    pub fn answer_request<T, Tr, G>(
        &mut self,
        transport: &mut Tr,
        rng: &mut G,
        queue: &mut LocalQueue<T>,
        requester: usize,
    ) -> Result<Handoff>
    where
        T: Serialize + DeserializeOwned,
        Tr: Transport<Request = H>,
        G: Rng,
    {
        let available = queue.len();
        if available <= 1 {
            return self.refuse_request::<T, Tr>(transport, requester);
        }

        let split = rng.gen_range(1..available);
        let items = queue.split_front(split);
        let (tag, body) = Message::WorkReply(Reply::Items(items)).encode()?;
        transport.send(requester, tag, body)?;
        self.stats.requests_served += 1;

        debug!(
            rank = self.rank,
            requester = requester,
            given = split,
            kept = queue.len(),
            "Work given"
        );
        Ok(Handoff::Gave(split))
    }

    /// Answer a work request from `requester` with `NoWork`
    pub fn refuse_request<T, Tr>(&mut self, transport: &mut Tr, requester: usize) -> Result<Handoff>
    where
        T: Serialize + DeserializeOwned,
        Tr: Transport<Request = H>,
    {
        let (tag, body) = Message::<T>::WorkReply(Reply::NoWork).encode()?;
        transport.send(requester, tag, body)?;
        self.stats.requests_refused += 1;
        trace!(rank = self.rank, requester = requester, "No work to give");
        Ok(Handoff::NoWork)
    }

    /// Take in the reply to our outstanding request.
    ///
    /// Returns the number of items received.
    pub fn accept_reply<T, Tr>(
        &mut self,
        transport: &mut Tr,
        queue: &mut LocalQueue<T>,
        source: usize,
        reply: Reply<T>,
    ) -> Result<usize>
    where
        Tr: Transport<Request = H>,
    {
        let pending = match self.pending.take() {
            Some(pending) if pending.target == source => pending,
            other => {
                self.pending = other;
                return Err(ProtocolError::UnsolicitedReply {
                    rank: self.rank,
                    source_rank: source,
                }
                .into());
            }
        };
        transport.wait(pending.handle)?;

        match reply {
            Reply::Items(items) => {
                let count = items.len();
                queue.push_front_many(items);
                self.stats.replies_with_work += 1;
                debug!(rank = self.rank, source = source, received = count, "Work received");
                Ok(count)
            }
            Reply::NoWork => {
                self.stats.replies_empty += 1;
                Ok(0)
            }
        }
    }

    /// Give back the outstanding request handle, if any, so it can be
    /// completed before the transport is released
    pub fn take_pending(&mut self) -> Option<H> {
        self.pending.take().map(|p| p.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Tag;
    use crate::transport::{SimNetwork, SimTransport};
    use rand::rngs::mock::StepRng;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn pair() -> (SimNetwork, SimTransport, SimTransport) {
        let network = SimNetwork::new(2);
        let mut endpoints = network.endpoints();
        let b = endpoints.pop().unwrap();
        let a = endpoints.pop().unwrap();
        (network, a, b)
    }

    #[test]
    fn test_choose_peer_never_self() {
        let mut rng = StdRng::seed_from_u64(7);
        for rank in 0..4 {
            let scheduler: Scheduler<()> = Scheduler::new(rank, 4);
            for _ in 0..100 {
                let peer = scheduler.choose_peer(&mut rng).unwrap();
                assert_ne!(peer, rank);
                assert!(peer < 4);
            }
        }
        let alone: Scheduler<()> = Scheduler::new(0, 1);
        assert_eq!(alone.choose_peer(&mut rng), None);
    }

    #[test]
    fn test_single_request_in_flight() {
        let (network, mut a, _b) = pair();
        let mut scheduler = Scheduler::new(0, 2);
        let mut rng = StepRng::new(0, 0);

        assert_eq!(scheduler.request_work(&mut a, &mut rng).unwrap(), Some(1));
        assert_eq!(scheduler.request_work(&mut a, &mut rng).unwrap(), None);
        assert_eq!(network.undelivered_with_tag(Tag::WorkRequest.as_u8()), 1);
        assert_eq!(scheduler.pending_target(), Some(1));
    }

    #[test]
    fn test_small_queue_never_split() {
        let (network, _a, mut b) = pair();
        let mut scheduler = Scheduler::new(1, 2);
        let mut rng = StepRng::new(0, 0);

        let mut queue = LocalQueue::new();
        queue.seed(vec![42u32]);
        let outcome = scheduler.answer_request(&mut b, &mut rng, &mut queue, 0).unwrap();

        assert_eq!(outcome, Handoff::NoWork);
        assert_eq!(queue.len(), 1);
        assert_eq!(network.undelivered_with_tag(Tag::WorkReply.as_u8()), 1);
    }

    #[test]
    fn test_split_ships_front_and_reply_lands_in_front() {
        let (_network, mut a, mut b) = pair();
        let mut requester = Scheduler::new(0, 2);
        let mut giver = Scheduler::new(1, 2);
        let mut rng = StepRng::new(0, 0);

        let mut giver_queue = LocalQueue::new();
        giver_queue.seed(vec![1u32, 2, 3, 4]);
        let mut requester_queue = LocalQueue::new();
        requester_queue.seed(vec![9u32]);

        requester.request_work(&mut a, &mut rng).unwrap();
        let _request = b.recv().unwrap();
        let outcome = giver
            .answer_request(&mut b, &mut rng, &mut giver_queue, 0)
            .unwrap();
        assert_eq!(outcome, Handoff::Gave(1));
        assert_eq!(giver_queue.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);

        let envelope = a.recv().unwrap();
        let Message::WorkReply(reply) = Message::<u32>::decode(&envelope).unwrap() else {
            panic!("expected a work reply");
        };
        let received = requester
            .accept_reply(&mut a, &mut requester_queue, 1, reply)
            .unwrap();

        assert_eq!(received, 1);
        assert!(!requester.has_pending());
        assert_eq!(requester_queue.iter().copied().collect::<Vec<_>>(), vec![1, 9]);
    }

    #[test]
    fn test_unsolicited_reply_rejected() {
        let (_network, mut a, _b) = pair();
        let mut scheduler: Scheduler<_> = Scheduler::new(0, 2);
        let mut queue: LocalQueue<u32> = LocalQueue::new();

        let err = scheduler
            .accept_reply(&mut a, &mut queue, 1, Reply::NoWork)
            .unwrap_err();
        assert!(err.is_protocol());
    }
}
