//! Error types for ring-walker
//!
//! This module defines the error hierarchy for:
//! - Transport failures (send, receive, probe, gather)
//! - Protocol violations (unexpected tag/body combinations)
//! - Seed list inconsistencies detected before the walk starts
//! - Configuration and CLI errors
//!
//! None of these are retried. A partially failed message exchange can
//! break the token/colour invariants, so every error aborts the run.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for ring-walker
#[derive(Error, Debug)]
pub enum WalkerError {
    /// Transport layer errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Protocol errors
    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Ranks were handed different seed lists
    #[error(
        "Inconsistent seed list on rank {rank}: expected {expected_len} seeds (hash {expected_hash:#018x}), \
         rank {peer} has {found_len} seeds (hash {found_hash:#018x})"
    )]
    InvalidSeedDistribution {
        rank: usize,
        peer: usize,
        expected_len: u64,
        expected_hash: u64,
        found_len: u64,
        found_hash: u64,
    },

    /// `seed` was called on a walker that already started
    #[error("Walker on rank {rank} was already started; build a new walker for each run")]
    AlreadyStarted { rank: usize },

    /// A step or finish was attempted in the wrong phase
    #[error("Walker on rank {rank} is not {expected}")]
    WrongPhase { rank: usize, expected: &'static str },

    /// Failed to encode a gathered result or seed digest
    #[error("Encoding error: {0}")]
    Encode(String),
}

/// Transport failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Destination rank is outside the peer group
    #[error("Invalid destination rank {dest} (group size {size})")]
    InvalidRank { dest: usize, size: usize },

    /// A peer's mailbox is gone
    #[error("Peer {peer} disconnected")]
    Disconnected { peer: usize },

    /// A blocking receive was issued on a transport that cannot block
    #[error("Receive on rank {rank} would block forever")]
    WouldBlock { rank: usize },

    /// Gather failed
    #[error("Gather to root {root} failed: {reason}")]
    GatherFailed { root: usize, reason: String },

    /// Send failed
    #[error("Send from {from} to {to} failed: {reason}")]
    SendFailed {
        from: usize,
        to: usize,
        reason: String,
    },
}

/// Unexpected messages or state transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Tag outside the wire contract
    #[error("Unknown message tag {tag} from rank {source_rank}")]
    UnknownTag { tag: u8, source_rank: usize },

    /// Body could not be decoded for its tag
    #[error("Malformed {kind} body from rank {source_rank}: {reason}")]
    MalformedBody {
        kind: &'static str,
        source_rank: usize,
        reason: String,
    },

    /// Work reply carrying zero items
    #[error("Empty work reply from rank {source_rank}")]
    EmptyReply { source_rank: usize },

    /// Work reply arrived while no request was outstanding
    #[error("Unsolicited work reply from rank {source_rank} to rank {rank}")]
    UnsolicitedReply { rank: usize, source_rank: usize },

    /// Shutdown addressed to the root
    #[error("Rank 0 received shutdown from rank {source_rank}")]
    ShutdownToRoot { source_rank: usize },

    /// Shutdown sent by a rank other than the root
    #[error("Rank {rank} received shutdown from rank {source_rank}, only rank 0 may send it")]
    ShutdownFromPeer { rank: usize, source_rank: usize },

    /// Token arrived at a rank that already holds one
    #[error("Rank {rank} received a second token from rank {source_rank}")]
    DuplicateToken { rank: usize, source_rank: usize },

    /// Token arrived from a rank other than the ring predecessor
    #[error("Rank {rank} received a token from rank {source_rank}, expected rank {expected}")]
    TokenOutOfRing {
        rank: usize,
        source_rank: usize,
        expected: usize,
    },

    /// Seed digest arrived after the walk started
    #[error("Rank {rank} received a seed digest from rank {source_rank} outside the seed phase")]
    LateSeedDigest { rank: usize, source_rank: usize },

    /// Work items arrived after shutdown
    #[error("Rank {rank} received work from rank {source_rank} after shutdown")]
    WorkAfterShutdown { rank: usize, source_rank: usize },

    /// A peer kept requesting work after it quiesced
    #[error("Rank {rank} received a work request from rank {source_rank} after it quiesced")]
    RequestAfterQuiesce { rank: usize, source_rank: usize },
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid rank count
    #[error("Invalid rank count {count}: must be between 1 and {max}")]
    InvalidRankCount { count: usize, max: usize },

    /// Invalid exclude pattern
    #[error("Invalid exclude pattern '{pattern}': {reason}")]
    InvalidExcludePattern { pattern: String, reason: String },

    /// Root path missing or not a directory
    #[error("Invalid root '{path}': {reason}")]
    InvalidRoot { path: PathBuf, reason: String },

    /// No roots given
    #[error("At least one root directory is required")]
    NoRoots,
}

impl WalkerError {
    /// Returns true for errors raised by an unexpected message
    pub fn is_protocol(&self) -> bool {
        matches!(self, WalkerError::Protocol(_))
    }
}

/// Result type alias for WalkerError
pub type Result<T> = std::result::Result<T, WalkerError>;

/// Result type alias for TransportError
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Result type alias for ProtocolError
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let err = TransportError::Disconnected { peer: 3 };
        let walker_err: WalkerError = err.into();
        assert!(matches!(walker_err, WalkerError::Transport(_)));
        assert!(!walker_err.is_protocol());

        let err = ProtocolError::EmptyReply { source_rank: 1 };
        let walker_err: WalkerError = err.into();
        assert!(walker_err.is_protocol());
    }

    #[test]
    fn test_error_display() {
        let err = ProtocolError::UnknownTag {
            tag: 9,
            source_rank: 2,
        };
        assert_eq!(err.to_string(), "Unknown message tag 9 from rank 2");

        let err = ConfigError::InvalidRankCount { count: 0, max: 1024 };
        assert_eq!(
            err.to_string(),
            "Invalid rank count 0: must be between 1 and 1024"
        );
    }
}
