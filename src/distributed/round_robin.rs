use std::ops::Range;

use tracing::debug;

use super::comm::{all_gather, gather_lines, reduce_sum, Communicator};
use super::{mask_for, Distribution, COORDINATOR};
use crate::error::DistributedError;
use crate::network::{LayerId, UnitId};

/// Unit `u` belongs to rank `u mod size`.
#[derive(Debug)]
pub struct RoundRobin<C> {
    comm: C,
    owned: Vec<Vec<usize>>,
}

impl<C: Communicator> RoundRobin<C> {
    pub fn new(comm: C) -> Self {
        Self {
            comm,
            owned: Vec::new(),
        }
    }

    fn everyone(&self) -> Vec<usize> {
        (0..self.comm.size()).collect()
    }
}

impl<C: Communicator> Distribution for RoundRobin<C> {
    fn policy(&self) -> &'static str {
        "round-robin"
    }

    fn rank(&self) -> usize {
        self.comm.rank()
    }

    fn world_size(&self) -> usize {
        self.comm.size()
    }

    fn bind(&mut self, _layers: &[Range<UnitId>], unit_count: usize) -> Result<Vec<bool>, DistributedError> {
        let size = self.comm.size();
        self.owned = (0..size)
            .map(|r| (r..unit_count).step_by(size).collect())
            .collect();
        let rank = self.comm.rank();
        debug!(
            target: "engram::sync",
            rank,
            units = self.owned[rank].len(),
            "round-robin ownership"
        );
        Ok(mask_for(&self.owned, rank, unit_count))
    }

    fn synchronize(&mut self, active: &mut [bool]) -> Result<(), DistributedError> {
        all_gather(&mut self.comm, &self.owned, active)
    }

    fn combine_layer_counts(&mut self, _layer: LayerId, partial: &[u64]) -> Result<Option<Vec<u64>>, DistributedError> {
        self.combine_counts(partial)
    }

    fn combine_counts(&mut self, partial: &[u64]) -> Result<Option<Vec<u64>>, DistributedError> {
        let members = self.everyone();
        reduce_sum(&mut self.comm, &members, COORDINATOR, partial)
    }

    fn gather_lines(&mut self, lines: Vec<(usize, String)>) -> Result<Option<Vec<(usize, String)>>, DistributedError> {
        let members = self.everyone();
        gather_lines(&mut self.comm, &members, COORDINATOR, lines)
    }
}
