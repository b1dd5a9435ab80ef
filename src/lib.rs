//! ring-walker - Distributed work stealing with token-ring termination
//!
//! Spreads an enumerable workload (here: directory trees) across a fixed
//! group of N ranks that only talk through point-to-point messages. There is
//! no coordinator handing out work and no shared queue.
//!
//! # Features
//!
//! - **Randomized Work Stealing**: An idle rank asks one random peer for
//!   work; the peer splits its queue at a random point and ships the front.
//!
//! - **Token-Ring Termination**: A colored token circling the ranks lets
//!   rank 0 decide, without global visibility, that every queue is empty and
//!   no work is in flight.
//!
//! - **Pluggable Work**: The walker never inspects items. A
//!   [`ProcessItem`](walker::ProcessItem) hook processes them and may queue
//!   more.
//!
//! - **Swappable Transport**: Ranks run as threads over crossbeam channels,
//!   or all on one thread over a deterministic simulated network for tests.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Rank r                                  │
//! │                                                                  │
//! │   ┌──────────────┐    ┌──────────────┐    ┌──────────────────┐   │
//! │   │ LocalQueue   │◀──▶│  Scheduler   │    │ Termination      │   │
//! │   │ (front split)│    │ (1 request)  │    │ Detector (token) │   │
//! │   └──────┬───────┘    └──────┬───────┘    └────────┬─────────┘   │
//! │          │ pop               │                     │             │
//! │          ▼                   ▼                     ▼             │
//! │   ┌──────────────┐    ┌─────────────────────────────────────┐   │
//! │   │ ProcessItem  │    │            Driver loop              │   │
//! │   │ hook         │    │  drain -> process -> steal -> token │   │
//! │   └──────────────┘    └──────────────────┬──────────────────┘   │
//! └──────────────────────────────────────────┼──────────────────────┘
//!                                            │ Transport
//!                                            ▼
//!           WorkRequest / WorkReply / Token / Shutdown / Quiesce
//! ```
//!
//! # Example
//!
//! ```bash
//! # Walk with one rank per CPU
//! ring-walker /data
//!
//! # Sixteen ranks, reproducible peer choices, skip snapshots
//! ring-walker /data -n 16 --seed 7 --exclude '\.snapshot'
//! ```

pub mod config;
pub mod error;
pub mod progress;
pub mod protocol;
pub mod transport;
pub mod tree;
pub mod walker;

pub use config::{CliArgs, WalkConfig};
pub use error::{Result, WalkerError};
pub use transport::{LocalTransport, SimNetwork, Transport};
pub use tree::{DirTask, DirWalker, TreeStats};
pub use walker::{from_fn, ProcessItem, Walker, WorkSink};
