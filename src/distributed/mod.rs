//! Partitioning a simulation across cooperating workers.
//!
//! Every worker holds the whole network and replays every replicated
//! decision (patterns, clamps, freezes, the shared random stream) in
//! lock-step. Only the per-unit work is split: a worker computes the units
//! it owns and the connections that end on them. After each settle cycle
//! the activation buffer is re-assembled on every worker; statistics are
//! reduced to the coordinator (rank 0), which alone reports.

use std::ops::Range;

use crate::error::DistributedError;
use crate::network::{LayerId, UnitId};

pub mod comm;
pub mod layer_pinned;
pub mod round_robin;

pub use comm::{Communicator, ThreadComm};
pub use layer_pinned::LayerPinned;
pub use round_robin::RoundRobin;

/// Rank that receives reductions and emits the report.
pub const COORDINATOR: usize = 0;

pub trait Distribution: Send {
    fn policy(&self) -> &'static str;
    fn rank(&self) -> usize;
    fn world_size(&self) -> usize;

    fn is_coordinator(&self) -> bool {
        self.rank() == COORDINATOR
    }

    /// Assign units to workers given each layer's unit range. Returns this
    /// worker's ownership mask over all units.
    fn bind(&mut self, layers: &[Range<UnitId>], unit_count: usize) -> Result<Vec<bool>, DistributedError>;

    /// Make the activation buffer whole after an apply phase.
    fn synchronize(&mut self, active: &mut [bool]) -> Result<(), DistributedError>;

    /// Sum per-worker counts about one layer. `Some` on the coordinator.
    fn combine_layer_counts(&mut self, layer: LayerId, partial: &[u64]) -> Result<Option<Vec<u64>>, DistributedError>;

    /// Sum per-worker counts not tied to a layer. `Some` on the coordinator.
    fn combine_counts(&mut self, partial: &[u64]) -> Result<Option<Vec<u64>>, DistributedError>;

    /// Merge per-worker report lines keyed by entity id. `Some` on the
    /// coordinator, in key order.
    fn gather_lines(&mut self, lines: Vec<(usize, String)>) -> Result<Option<Vec<(usize, String)>>, DistributedError>;
}

/// Single worker owning everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct Standalone;

impl Distribution for Standalone {
    fn policy(&self) -> &'static str {
        "standalone"
    }

    fn rank(&self) -> usize {
        COORDINATOR
    }

    fn world_size(&self) -> usize {
        1
    }

    fn bind(&mut self, _layers: &[Range<UnitId>], unit_count: usize) -> Result<Vec<bool>, DistributedError> {
        Ok(vec![true; unit_count])
    }

    fn synchronize(&mut self, _active: &mut [bool]) -> Result<(), DistributedError> {
        Ok(())
    }

    fn combine_layer_counts(&mut self, _layer: LayerId, partial: &[u64]) -> Result<Option<Vec<u64>>, DistributedError> {
        Ok(Some(partial.to_vec()))
    }

    fn combine_counts(&mut self, partial: &[u64]) -> Result<Option<Vec<u64>>, DistributedError> {
        Ok(Some(partial.to_vec()))
    }

    fn gather_lines(&mut self, lines: Vec<(usize, String)>) -> Result<Option<Vec<(usize, String)>>, DistributedError> {
        Ok(Some(lines))
    }
}

/// Ownership mask for `rank` from per-rank index lists.
pub(crate) fn mask_for(owned: &[Vec<usize>], rank: usize, unit_count: usize) -> Vec<bool> {
    let mut mask = vec![false; unit_count];
    for &u in &owned[rank] {
        mask[u] = true;
    }
    mask
}
