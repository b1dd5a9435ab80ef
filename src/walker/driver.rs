//! Per-rank driver loop
//!
//! Every rank runs the same synchronous loop. There is no hidden event
//! loop and no callback: each iteration
//!
//! 1. drains every message that has already arrived,
//! 2. processes one item if the queue has any,
//! 3. otherwise asks a random peer for work (one request at a time),
//! 4. and, if the queue is still empty, runs one termination step.
//!
//! Once termination is known (rank 0 detected it or a `Shutdown` arrived)
//! the rank stops asking for work, tells every peer with `Quiesce`, and
//! keeps refusing requests until every peer has quiesced and its own last
//! request has been answered. Nothing addressed to a rank is left undelivered
//! when it returns. The accumulators are then aggregated and the transport is
//! dropped with the walker.

use super::aggregate::{Aggregate, GatherToRoot};
use super::hook::{ProcessItem, WorkSink};
use super::queue::{LocalQueue, QueueStats};
use super::scheduler::{Handoff, Scheduler, StealStats};
use super::seeds;
use super::termination::TerminationDetector;
use crate::error::{ProtocolError, Result, WalkerError};
use crate::protocol::{Colour, Message, Reply};
use crate::transport::Transport;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Lifecycle of a walker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Built, not yet seeded
    Idle,
    /// Inside the driver loop
    Running,
    /// Termination known, waiting for peers to quiesce
    Draining,
    /// Terminal; only aggregation remains
    Finished,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Running => "running",
            Phase::Draining => "draining",
            Phase::Finished => "finished",
        }
    }
}

/// Statistics collected by one rank
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RankStats {
    /// Seeds this rank started with
    pub seeds: u64,

    /// Loop iterations
    pub iterations: u64,

    /// Messages received
    pub messages_received: u64,

    /// Tokens forwarded
    pub tokens_forwarded: u64,

    /// Queue counters
    pub queue: QueueStats,

    /// Work-stealing counters
    pub steal: StealStats,
}

impl RankStats {
    /// Items this rank processed
    pub fn items_processed(&self) -> u64 {
        self.queue.popped
    }
}

/// One rank of a parallel walk
///
/// Build with [`Walker::new`], adjust with the `with_*` methods, then call
/// [`Walker::execute`] once. `execute` consumes the walker; a new run needs a
/// new walker.
///
/// Tests that need to interleave ranks by hand use the stepping API instead:
/// [`seed`](Walker::seed), [`step`](Walker::step) until
/// [`is_finished`](Walker::is_finished), then [`finish`](Walker::finish).
pub struct Walker<T, Tr, P, R, A = GatherToRoot, G = StdRng>
where
    Tr: Transport,
{
    transport: Tr,
    processor: P,
    aggregator: A,
    results: R,
    rng: G,
    verify_seeds: bool,
    queue: LocalQueue<T>,
    scheduler: Scheduler<Tr::Request>,
    detector: TerminationDetector,
    phase: Phase,
    quiesced: Vec<bool>,
    seeded: u64,
    iterations: u64,
    messages_received: u64,
    started: Option<Instant>,
    _item: PhantomData<fn(T)>,
}

impl<T, Tr, P, R> Walker<T, Tr, P, R>
where
    Tr: Transport,
    R: Default,
{
    /// Create a walker that owns `transport` and runs `processor` on every
    /// item. Results start at `R::default()`, the random source is seeded
    /// from the OS and seed lists are verified across ranks.
    pub fn new(transport: Tr, processor: P) -> Self {
        let rank = transport.rank();
        let size = transport.size();
        Self {
            transport,
            processor,
            aggregator: GatherToRoot,
            results: R::default(),
            rng: StdRng::from_entropy(),
            verify_seeds: true,
            queue: LocalQueue::new(),
            scheduler: Scheduler::new(rank, size),
            detector: TerminationDetector::new(rank, size),
            phase: Phase::Idle,
            quiesced: (0..size).map(|peer| peer == rank).collect(),
            seeded: 0,
            iterations: 0,
            messages_received: 0,
            started: None,
            _item: PhantomData,
        }
    }
}

impl<T, Tr, P, R, A, G> Walker<T, Tr, P, R, A, G>
where
    Tr: Transport,
{
    /// Start from `results` instead of `R::default()`
    pub fn with_results(mut self, results: R) -> Self {
        self.results = results;
        self
    }

    /// Enable or disable the cross-rank seed check.
    ///
    /// The check blocks until every peer's digest arrives, so it must be
    /// off on transports that cannot block.
    pub fn verify_seeds(mut self, verify: bool) -> Self {
        self.verify_seeds = verify;
        self
    }

    /// Use `rng` for peer selection and queue splitting
    pub fn with_rng<G2: Rng>(self, rng: G2) -> Walker<T, Tr, P, R, A, G2> {
        Walker {
            transport: self.transport,
            processor: self.processor,
            aggregator: self.aggregator,
            results: self.results,
            rng,
            verify_seeds: self.verify_seeds,
            queue: self.queue,
            scheduler: self.scheduler,
            detector: self.detector,
            phase: self.phase,
            quiesced: self.quiesced,
            seeded: self.seeded,
            iterations: self.iterations,
            messages_received: self.messages_received,
            started: self.started,
            _item: PhantomData,
        }
    }

    /// Replace the default gather-to-rank-0 aggregation
    pub fn with_aggregator<A2: Aggregate<R>>(self, aggregator: A2) -> Walker<T, Tr, P, R, A2, G> {
        Walker {
            transport: self.transport,
            processor: self.processor,
            aggregator,
            results: self.results,
            rng: self.rng,
            verify_seeds: self.verify_seeds,
            queue: self.queue,
            scheduler: self.scheduler,
            detector: self.detector,
            phase: self.phase,
            quiesced: self.quiesced,
            seeded: self.seeded,
            iterations: self.iterations,
            messages_received: self.messages_received,
            started: self.started,
            _item: PhantomData,
        }
    }

    /// This rank
    pub fn rank(&self) -> usize {
        self.transport.rank()
    }

    /// Number of ranks
    pub fn size(&self) -> usize {
        self.transport.size()
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether the loop has ended
    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    /// Items waiting in the local queue
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Whether a work request is outstanding
    pub fn has_pending_request(&self) -> bool {
        self.scheduler.has_pending()
    }

    /// This rank's colour
    pub fn colour(&self) -> Colour {
        self.detector.colour()
    }

    /// Whether this rank holds the token
    pub fn holds_token(&self) -> bool {
        self.detector.holds_token()
    }

    /// The local result accumulator
    pub fn results(&self) -> &R {
        &self.results
    }

    /// Time since the walker was seeded
    pub fn elapsed(&self) -> Duration {
        self.started.map(|s| s.elapsed()).unwrap_or_default()
    }

    /// Statistics so far
    pub fn stats(&self) -> RankStats {
        RankStats {
            seeds: self.seeded,
            iterations: self.iterations,
            messages_received: self.messages_received,
            tokens_forwarded: self.detector.tokens_forwarded(),
            queue: self.queue.stats().clone(),
            steal: self.scheduler.stats().clone(),
        }
    }

    fn wrong_phase(&self, expected: Phase) -> WalkerError {
        WalkerError::WrongPhase {
            rank: self.rank(),
            expected: expected.name(),
        }
    }
}

impl<T, Tr, P, R, A, G> Walker<T, Tr, P, R, A, G>
where
    T: Clone + Serialize + DeserializeOwned,
    Tr: Transport,
    P: ProcessItem<T, R>,
    A: Aggregate<R>,
    G: Rng,
{
    /// Walk `seeds` to completion.
    ///
    /// Every rank must be passed the identical full seed list; this rank
    /// keeps positions `rank, rank + N, ...`. Returns the gathered results
    /// on rank 0 and `None` on every other rank.
    pub fn execute(mut self, seeds: &[T]) -> Result<Option<Vec<R>>> {
        self.seed(seeds)?;
        while !self.is_finished() {
            self.step()?;
        }
        self.finish()
    }

    /// Verify and take this rank's share of `seeds`, then enter the loop
    pub fn seed(&mut self, seeds: &[T]) -> Result<()> {
        if self.phase != Phase::Idle {
            return Err(WalkerError::AlreadyStarted { rank: self.rank() });
        }

        let rank = self.rank();
        let size = self.size();

        if self.verify_seeds && size > 1 {
            let local = seeds::digest(seeds)?;
            seeds::verify(&mut self.transport, local)?;
        }

        let share = seeds::stride(seeds, rank, size);
        info!(
            rank = rank,
            ranks = size,
            seeds = share.len(),
            total_seeds = seeds.len(),
            "Rank starting"
        );
        self.seeded = share.len() as u64;
        self.queue.seed(share);
        self.phase = Phase::Running;
        self.started = Some(Instant::now());
        Ok(())
    }

    /// Run one loop iteration
    pub fn step(&mut self) -> Result<()> {
        match self.phase {
            Phase::Running => self.step_running(),
            Phase::Draining => self.step_draining(),
            _ => Err(self.wrong_phase(Phase::Running)),
        }
    }

    fn step_running(&mut self) -> Result<()> {
        self.iterations += 1;

        self.drain_messages()?;
        if self.detector.is_finished() {
            return self.begin_drain();
        }

        if let Some(item) = self.queue.pop_front() {
            let mut sink = WorkSink::new(&mut self.queue);
            self.processor.process(item, &mut self.results, &mut sink);
        } else {
            self.scheduler
                .request_work(&mut self.transport, &mut self.rng)?;
        }

        if self.queue.is_empty() {
            self.detect()?;
        }

        if self.detector.is_finished() {
            self.begin_drain()?;
        }
        Ok(())
    }

    fn step_draining(&mut self) -> Result<()> {
        self.iterations += 1;
        self.drain_messages()?;
        self.check_drained();
        Ok(())
    }

    /// Stop asking for work and tell every peer so
    fn begin_drain(&mut self) -> Result<()> {
        self.phase = Phase::Draining;

        let rank = self.rank();
        let (tag, body) = Message::<T>::Quiesce.encode()?;
        for peer in (0..self.size()).filter(|&p| p != rank) {
            self.transport.send(peer, tag, body.clone())?;
        }
        debug!(rank = rank, queued = self.queue.len(), "Draining");

        self.check_drained();
        Ok(())
    }

    fn check_drained(&mut self) {
        if !self.scheduler.has_pending() && self.quiesced.iter().all(|&q| q) {
            self.phase = Phase::Finished;
        }
    }

    /// Complete the pending send, aggregate results and release the
    /// transport
    pub fn finish(mut self) -> Result<Option<Vec<R>>> {
        if self.phase != Phase::Finished {
            return Err(self.wrong_phase(Phase::Finished));
        }

        if let Some(handle) = self.scheduler.take_pending() {
            self.transport.wait(handle)?;
        }

        let stats = self.stats();
        info!(
            rank = self.rank(),
            processed = stats.items_processed(),
            discovered = stats.queue.pushed,
            received = stats.queue.received,
            given = stats.queue.given,
            requests = stats.steal.requests_sent,
            iterations = stats.iterations,
            elapsed_ms = self.elapsed().as_millis() as u64,
            "Rank finished"
        );

        let Walker {
            mut transport,
            mut aggregator,
            results,
            ..
        } = self;
        let gathered = aggregator.aggregate(&mut transport, results)?;
        drop(transport);
        Ok(gathered)
    }

    /// Receive and dispatch everything that has already arrived
    fn drain_messages(&mut self) -> Result<()> {
        while self.transport.probe()? {
            let envelope = self.transport.recv()?;
            self.messages_received += 1;
            let message = Message::<T>::decode(&envelope)?;
            self.dispatch(envelope.source, message)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, source: usize, message: Message<T>) -> Result<()> {
        let rank = self.rank();
        let draining = self.phase == Phase::Draining;

        match message {
            Message::WorkRequest => {
                if self.quiesced[source] {
                    return Err(ProtocolError::RequestAfterQuiesce {
                        rank,
                        source_rank: source,
                    }
                    .into());
                }
                if draining {
                    self.scheduler
                        .refuse_request::<T, Tr>(&mut self.transport, source)?;
                    return Ok(());
                }
                let handoff = self.scheduler.answer_request(
                    &mut self.transport,
                    &mut self.rng,
                    &mut self.queue,
                    source,
                )?;
                if let Handoff::Gave(_) = handoff {
                    self.detector.record_handoff(source);
                }
            }
            Message::WorkReply(reply) => {
                if draining && matches!(reply, Reply::Items(_)) {
                    return Err(ProtocolError::WorkAfterShutdown {
                        rank,
                        source_rank: source,
                    }
                    .into());
                }
                self.scheduler
                    .accept_reply(&mut self.transport, &mut self.queue, source, reply)?;
            }
            Message::Token(colour) if draining => {
                trace!(rank = rank, source = source, colour = ?colour, "Token retired");
            }
            Message::Token(colour) => {
                trace!(rank = rank, source = source, colour = ?colour, "Token received");
                self.detector.receive_token(source, colour)?;
            }
            Message::Shutdown => {
                debug!(rank = rank, "Shutdown received");
                self.detector.receive_shutdown(source)?;
            }
            Message::Quiesce => {
                trace!(rank = rank, source = source, "Peer quiesced");
                self.quiesced[source] = true;
            }
            Message::SeedDigest(_) => {
                return Err(ProtocolError::LateSeedDigest {
                    rank,
                    source_rank: source,
                }
                .into());
            }
        }
        Ok(())
    }

    /// One termination-detection step; performs the sends it asks for
    fn detect(&mut self) -> Result<()> {
        let Some(action) = self.detector.step() else {
            return Ok(());
        };

        if action.shutdown {
            info!(rank = self.rank(), "Global termination detected");
            let (tag, body) = Message::<T>::Shutdown.encode()?;
            for dest in 1..self.size() {
                self.transport.send(dest, tag, body.clone())?;
            }
        }

        let next = self.transport.next_rank();
        let (tag, body) = Message::<T>::Token(action.forward).encode()?;
        self.transport.send(next, tag, body)?;
        trace!(rank = self.rank(), next = next, colour = ?action.forward, "Token forwarded");
        Ok(())
    }
}
