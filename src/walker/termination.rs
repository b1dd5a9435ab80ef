//! Colored-token termination detection
//!
//! A single token circulates `0 -> 1 -> ... -> N-1 -> 0`, moving on only
//! from ranks whose queue is empty. A rank turns Black when it hands work
//! to a lower-ranked peer, because that work moves against the token and
//! may land on a rank the token has already passed. A Black rank blackens
//! the token as it forwards it and becomes White again.
//!
//! Rank 0 declares termination when the token comes back White while rank
//! 0 is White. The very first such observation is discarded: it happens
//! before the token has been around the ring at all.
//!
//! The detector never sends anything itself. [`TerminationDetector::step`]
//! returns the action and the driver performs the sends.

use crate::error::{ProtocolError, ProtocolResult};
use crate::protocol::Colour;

/// Sends the driver must perform after a detection step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenAction {
    /// Broadcast `Shutdown` to ranks `1..N` before forwarding the token
    pub shutdown: bool,

    /// Colour of the token to forward to the next rank
    pub forward: Colour,
}

/// Termination detector state for one rank
#[derive(Debug, Clone)]
pub struct TerminationDetector {
    rank: usize,
    size: usize,
    colour: Colour,
    token: Option<Colour>,
    warmup: bool,
    finished: bool,
    tokens_forwarded: u64,
}

impl TerminationDetector {
    /// Initial state: rank 0 holds a White token, everyone is White
    pub fn new(rank: usize, size: usize) -> Self {
        let root = rank == 0;
        Self {
            rank,
            size,
            colour: Colour::White,
            token: if root && size > 1 {
                Some(Colour::White)
            } else {
                None
            },
            warmup: root,
            finished: false,
            tokens_forwarded: 0,
        }
    }

    /// This rank's colour
    pub fn colour(&self) -> Colour {
        self.colour
    }

    /// Colour of the token, if this rank holds it
    pub fn token(&self) -> Option<Colour> {
        self.token
    }

    /// Whether this rank holds the token
    pub fn holds_token(&self) -> bool {
        self.token.is_some()
    }

    /// Whether rank 0 still has to discard its first observation
    pub fn in_warmup(&self) -> bool {
        self.warmup
    }

    /// Whether this rank is done
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Tokens this rank has forwarded
    pub fn tokens_forwarded(&self) -> u64 {
        self.tokens_forwarded
    }

    /// Record that this rank shipped work to `peer`
    pub fn record_handoff(&mut self, peer: usize) {
        if peer < self.rank {
            self.colour = Colour::Black;
        }
    }

    /// Take in the token from the ring predecessor
    pub fn receive_token(&mut self, source: usize, colour: Colour) -> ProtocolResult<()> {
        let expected = (self.rank + self.size - 1) % self.size;
        if source != expected {
            return Err(ProtocolError::TokenOutOfRing {
                rank: self.rank,
                source_rank: source,
                expected,
            });
        }
        if self.token.is_some() {
            return Err(ProtocolError::DuplicateToken {
                rank: self.rank,
                source_rank: source,
            });
        }
        self.token = Some(colour);
        Ok(())
    }

    /// Take in the shutdown broadcast from rank 0
    pub fn receive_shutdown(&mut self, source: usize) -> ProtocolResult<()> {
        if self.rank == 0 {
            return Err(ProtocolError::ShutdownToRoot {
                source_rank: source,
            });
        }
        if source != 0 {
            return Err(ProtocolError::ShutdownFromPeer {
                rank: self.rank,
                source_rank: source,
            });
        }
        self.finished = true;
        Ok(())
    }

    /// Run one detection step. Only call this while the local queue is
    /// empty.
    pub fn step(&mut self) -> Option<TokenAction> {
        if self.size == 1 {
            self.finished = true;
            return None;
        }

        let token = self.token.take()?;
        self.tokens_forwarded += 1;

        if self.rank == 0 {
            let mut shutdown = false;
            if token == Colour::White && self.colour == Colour::White {
                if self.warmup {
                    self.warmup = false;
                } else {
                    shutdown = true;
                    self.finished = true;
                }
            }
            self.colour = Colour::White;
            return Some(TokenAction {
                shutdown,
                forward: Colour::White,
            });
        }

        let forward = match self.colour {
            Colour::White => token,
            Colour::Black => Colour::Black,
        };
        self.colour = Colour::White;
        Some(TokenAction {
            shutdown: false,
            forward,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let root = TerminationDetector::new(0, 3);
        assert_eq!(root.token(), Some(Colour::White));
        assert!(root.in_warmup());

        let other = TerminationDetector::new(2, 3);
        assert!(!other.holds_token());
        assert_eq!(other.colour(), Colour::White);
    }

    #[test]
    fn test_single_rank_finishes_immediately() {
        let mut detector = TerminationDetector::new(0, 1);
        assert!(!detector.holds_token());
        assert_eq!(detector.step(), None);
        assert!(detector.is_finished());
    }

    #[test]
    fn test_root_discards_first_white_round() {
        let mut root = TerminationDetector::new(0, 2);

        let first = root.step().unwrap();
        assert!(!first.shutdown);
        assert_eq!(first.forward, Colour::White);
        assert!(!root.in_warmup());
        assert!(!root.holds_token());

        root.receive_token(1, Colour::White).unwrap();
        let second = root.step().unwrap();
        assert!(second.shutdown);
        assert!(root.is_finished());
    }

    #[test]
    fn test_black_token_delays_termination() {
        let mut root = TerminationDetector::new(0, 2);
        root.step();

        root.receive_token(1, Colour::Black).unwrap();
        let action = root.step().unwrap();
        assert!(!action.shutdown);
        assert_eq!(action.forward, Colour::White);
        assert!(!root.is_finished());
    }

    #[test]
    fn test_handoff_colouring() {
        let mut detector = TerminationDetector::new(2, 4);

        detector.record_handoff(3);
        assert_eq!(detector.colour(), Colour::White);

        detector.record_handoff(1);
        assert_eq!(detector.colour(), Colour::Black);

        // Stays Black until the token passes through
        detector.record_handoff(3);
        assert_eq!(detector.colour(), Colour::Black);
        assert_eq!(detector.step(), None);
        assert_eq!(detector.colour(), Colour::Black);

        detector.receive_token(1, Colour::White).unwrap();
        let action = detector.step().unwrap();
        assert_eq!(action.forward, Colour::Black);
        assert_eq!(detector.colour(), Colour::White);
    }

    #[test]
    fn test_white_rank_forwards_token_unchanged() {
        let mut detector = TerminationDetector::new(1, 3);
        detector.receive_token(0, Colour::Black).unwrap();
        assert_eq!(detector.step().unwrap().forward, Colour::Black);

        detector.receive_token(0, Colour::White).unwrap();
        assert_eq!(detector.step().unwrap().forward, Colour::White);
    }

    #[test]
    fn test_token_protocol_violations() {
        let mut detector = TerminationDetector::new(1, 3);
        assert!(matches!(
            detector.receive_token(2, Colour::White),
            Err(ProtocolError::TokenOutOfRing { expected: 0, .. })
        ));

        detector.receive_token(0, Colour::White).unwrap();
        assert!(matches!(
            detector.receive_token(0, Colour::White),
            Err(ProtocolError::DuplicateToken { .. })
        ));

        let mut root = TerminationDetector::new(0, 3);
        assert!(matches!(
            root.receive_shutdown(1),
            Err(ProtocolError::ShutdownToRoot { source_rank: 1 })
        ));

        let mut peer = TerminationDetector::new(2, 3);
        assert!(matches!(
            peer.receive_shutdown(1),
            Err(ProtocolError::ShutdownFromPeer { rank: 2, source_rank: 1 })
        ));
        assert!(!peer.is_finished());
    }

    #[test]
    fn test_shutdown_finishes_non_root() {
        let mut detector = TerminationDetector::new(2, 3);
        detector.receive_shutdown(0).unwrap();
        assert!(detector.is_finished());
    }
}
