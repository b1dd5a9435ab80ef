//! Distributed work-stealing walker
//!
//! Every rank owns a local queue and runs the same loop. Idle ranks steal
//! from random peers; a colored token circling the ring tells rank 0 when
//! every queue is empty and no work is in flight.
//!
//! # Architecture
//!
//! ```text
//!          token: 0 -> 1 -> ... -> N-1 -> 0
//!   ┌───────────┐      ┌───────────┐      ┌───────────┐
//!   │  Rank 0   │─────▶│  Rank 1   │─────▶│  Rank N-1 │──┐
//!   │  queue    │      │  queue    │      │  queue    │  │
//!   │  detector │      │  detector │      │  detector │  │
//!   └─────▲─────┘      └───────────┘      └───────────┘  │
//!         └───────────────────────────────────────────────┘
//!
//!   idle rank ── WorkRequest ──▶ random peer
//!   idle rank ◀── WorkReply ──── (NoWork | front split of peer's queue)
//! ```
//!
//! The pieces are separate modules so each can be tested on its own:
//!
//! - [`queue`]: rank-local deque with front splitting
//! - [`scheduler`]: random peer choice and the single outstanding request
//! - [`termination`]: token colouring and the shutdown decision
//! - [`seeds`]: seed striding and the cross-rank seed check
//! - [`hook`]: the per-item processing capability
//! - [`aggregate`]: what happens to the accumulators at the end
//! - [`driver`]: the loop that ties them together

pub mod aggregate;
pub mod driver;
pub mod hook;
pub mod queue;
pub mod scheduler;
pub mod seeds;
pub mod termination;

pub use aggregate::{Aggregate, GatherToRoot};
pub use driver::{Phase, RankStats, Walker};
pub use hook::{from_fn, Discard, FnProcessor, ProcessItem, WorkSink};
pub use queue::{LocalQueue, QueueStats};
pub use scheduler::{Handoff, Scheduler, StealStats};
pub use termination::{TerminationDetector, TokenAction};
