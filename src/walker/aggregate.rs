//! Result aggregation at shutdown
//!
//! The default policy gathers every rank's accumulator to rank 0, ordered
//! by rank. Implement [`Aggregate`] to do something else with the
//! accumulators.

use crate::error::{Result, WalkerError};
use crate::transport::Transport;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Aggregation step run by every rank once it is finished
pub trait Aggregate<R> {
    /// Combine this rank's `results` with everyone else's. Only the
    /// root's return value is meaningful.
    fn aggregate<Tr: Transport>(&mut self, transport: &mut Tr, results: R) -> Result<Option<Vec<R>>>;
}

/// Gather every accumulator to rank 0
#[derive(Debug, Default, Clone, Copy)]
pub struct GatherToRoot;

impl<R> Aggregate<R> for GatherToRoot
where
    R: Serialize + DeserializeOwned,
{
    fn aggregate<Tr: Transport>(&mut self, transport: &mut Tr, results: R) -> Result<Option<Vec<R>>> {
        let body = bincode::serialize(&results).map_err(|e| WalkerError::Encode(e.to_string()))?;

        let Some(parts) = transport.gather(0, body)? else {
            return Ok(None);
        };

        parts
            .iter()
            .map(|part| bincode::deserialize(part).map_err(|e| WalkerError::Encode(e.to_string())))
            .collect::<Result<Vec<R>>>()
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SimNetwork;

    #[test]
    fn test_gather_to_root_orders_by_rank() {
        let network = SimNetwork::new(3);
        let mut endpoints = network.endpoints();

        assert_eq!(GatherToRoot.aggregate(&mut endpoints[1], 11u64).unwrap(), None);
        assert_eq!(GatherToRoot.aggregate(&mut endpoints[2], 22u64).unwrap(), None);
        assert_eq!(
            GatherToRoot.aggregate(&mut endpoints[0], 0u64).unwrap(),
            Some(vec![0, 11, 22])
        );
    }
}
