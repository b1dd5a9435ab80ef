//! Seed distribution
//!
//! Every rank is handed the same full seed list and keeps positions
//! `rank, rank + N, rank + 2N, ...` of it. Nothing is scattered from a
//! single rank, so a rank passed a different list would silently walk a
//! different share. [`verify`] catches that before the walk starts: each
//! rank sends a digest of its list to every peer, so every rank compares
//! the same N digests and all of them fail together.

use crate::error::{ProtocolError, Result, WalkerError};
use crate::protocol::{Message, SeedDigest, Tag};
use crate::transport::Transport;
use serde::Serialize;
use gxhash::GxHasher;
use std::hash::Hasher;
use tracing::debug;

/// Positions `rank, rank + size, ...` of `seeds`
pub fn stride<T: Clone>(seeds: &[T], rank: usize, size: usize) -> Vec<T> {
    seeds.iter().skip(rank).step_by(size.max(1)).cloned().collect()
}

/// Fixed hasher seed; every rank must hash with the same one
const DIGEST_SEED: i64 = 0;

/// Length and hash of the encoded seed list.
///
/// Uses gxhash with a fixed seed, so the digest depends only on the seeds
/// and not on the process or toolchain computing it.
pub fn digest<T: Serialize>(seeds: &[T]) -> Result<SeedDigest> {
    let mut hasher = GxHasher::with_seed(DIGEST_SEED);
    for seed in seeds {
        let bytes = bincode::serialize(seed).map_err(|e| WalkerError::Encode(e.to_string()))?;
        hasher.write_u64(bytes.len() as u64);
        hasher.write(&bytes);
    }
    Ok(SeedDigest {
        len: seeds.len() as u64,
        hash: hasher.finish(),
    })
}

/// Exchange seed digests with every peer and fail if any rank was handed a
/// different list. Blocks until every peer's digest has arrived.
pub fn verify<Tr: Transport>(transport: &mut Tr, local: SeedDigest) -> Result<()> {
    let rank = transport.rank();
    let size = transport.size();
    let (tag, body) = Message::<()>::SeedDigest(local).encode()?;

    for peer in (0..size).filter(|&p| p != rank) {
        transport.send(peer, tag, body.clone())?;
    }

    let mut digests = vec![local; size];
    for peer in (0..size).filter(|&p| p != rank) {
        let envelope = transport.recv_from(peer, Tag::SeedDigest.as_u8())?;
        match Message::<()>::decode(&envelope)? {
            Message::SeedDigest(digest) => digests[peer] = digest,
            _ => {
                return Err(ProtocolError::MalformedBody {
                    kind: "seed digest",
                    source_rank: peer,
                    reason: "unexpected message".into(),
                }
                .into())
            }
        }
    }

    // Compare against rank 0 so every rank reports the same mismatch
    let expected = digests[0];
    if let Some((peer, found)) = digests.iter().enumerate().find(|(_, d)| **d != expected) {
        return Err(WalkerError::InvalidSeedDistribution {
            rank,
            peer,
            expected_len: expected.len,
            expected_hash: expected.hash,
            found_len: found.len,
            found_hash: found.hash,
        });
    }

    debug!(rank = rank, seeds = local.len, "Seed lists agree across ranks");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalTransport;
    use std::thread;

    #[test]
    fn test_stride_matches_rank_positions() {
        let seeds = ["a", "b", "c", "d", "e", "f"];
        assert_eq!(stride(&seeds, 0, 3), vec!["a", "d"]);
        assert_eq!(stride(&seeds, 1, 3), vec!["b", "e"]);
        assert_eq!(stride(&seeds, 2, 3), vec!["c", "f"]);
        assert_eq!(stride(&seeds, 3, 4), vec!["d"]);
        assert!(stride(&seeds[..2], 2, 3).is_empty());
    }

    #[test]
    fn test_digest_sensitive_to_content_and_order() {
        let a = digest(&["/x", "/y"]).unwrap();
        assert_eq!(a, digest(&["/x", "/y"]).unwrap());
        assert_ne!(a, digest(&["/y", "/x"]).unwrap());
        assert_ne!(a, digest(&["/x"]).unwrap());
        assert_eq!(digest::<String>(&[]).unwrap().len, 0);
    }

    #[test]
    fn test_digest_uses_fixed_seed_hasher() {
        let seeds = ["/data", "/scratch"];
        let mut hasher = GxHasher::with_seed(0);
        for seed in &seeds {
            let bytes = bincode::serialize(seed).unwrap();
            hasher.write_u64(bytes.len() as u64);
            hasher.write(&bytes);
        }

        let local = digest(&seeds).unwrap();
        assert_eq!(local.len, 2);
        assert_eq!(local.hash, hasher.finish());
    }

    fn verify_all(lists: Vec<Vec<&'static str>>) -> Vec<Result<()>> {
        let handles: Vec<_> = LocalTransport::group(lists.len())
            .into_iter()
            .zip(lists)
            .map(|(mut transport, list)| {
                thread::spawn(move || {
                    let local = digest(&list)?;
                    verify(&mut transport, local)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn test_verify_accepts_identical_lists() {
        let list = vec!["/a", "/b", "/c"];
        let results = verify_all(vec![list.clone(), list.clone(), list]);
        assert!(results.iter().all(Result::is_ok));
    }

    #[test]
    fn test_verify_fails_on_every_rank() {
        let results = verify_all(vec![vec!["/root"], vec![], vec![]]);
        for result in results {
            match result {
                Err(WalkerError::InvalidSeedDistribution {
                    peer, expected_len, found_len, ..
                }) => {
                    assert_eq!(peer, 1);
                    assert_eq!(expected_len, 1);
                    assert_eq!(found_len, 0);
                }
                other => panic!("expected a seed mismatch, got {:?}", other),
            }
        }
    }
}
