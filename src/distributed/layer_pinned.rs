use std::ops::Range;

use tracing::debug;

use super::comm::{all_gather, forward_counts, gather_lines, receive_forwarded, reduce_sum, Communicator};
use super::{mask_for, Distribution, COORDINATOR};
use crate::error::DistributedError;
use crate::network::{LayerId, UnitId};

/// Rank `r` serves layer `r mod L`; the ranks serving a layer split its
/// units into contiguous blocks, the first `n mod g` blocks one unit larger.
///
/// Layer statistics are reduced inside the layer's subgroup to its first
/// rank, which forwards them to the coordinator.
#[derive(Debug)]
pub struct LayerPinned<C> {
    comm: C,
    owned: Vec<Vec<usize>>,
    /// Ranks serving each layer, ascending.
    groups: Vec<Vec<usize>>,
}

impl<C: Communicator> LayerPinned<C> {
    pub fn new(comm: C) -> Self {
        Self {
            comm,
            owned: Vec::new(),
            groups: Vec::new(),
        }
    }

    pub fn layer_of(&self, rank: usize) -> Option<LayerId> {
        self.groups.iter().position(|g| g.contains(&rank))
    }
}

/// Split `range` into `parts` contiguous blocks, larger blocks first.
fn blocks(range: Range<UnitId>, parts: usize) -> Vec<Range<UnitId>> {
    let n = range.len();
    let (base, extra) = (n / parts, n % parts);
    let mut start = range.start;
    (0..parts)
        .map(|i| {
            let len = base + usize::from(i < extra);
            let block = start..start + len;
            start += len;
            block
        })
        .collect()
}

impl<C: Communicator> Distribution for LayerPinned<C> {
    fn policy(&self) -> &'static str {
        "layer"
    }

    fn rank(&self) -> usize {
        self.comm.rank()
    }

    fn world_size(&self) -> usize {
        self.comm.size()
    }

    fn bind(&mut self, layers: &[Range<UnitId>], unit_count: usize) -> Result<Vec<bool>, DistributedError> {
        let size = self.comm.size();
        if size < layers.len() {
            return Err(DistributedError::TooFewWorkers {
                policy: self.policy(),
                needed: layers.len(),
                got: size,
            });
        }

        self.groups = (0..layers.len())
            .map(|l| (0..size).filter(|r| r % layers.len() == l).collect())
            .collect();
        self.owned = vec![Vec::new(); size];
        for (range, group) in layers.iter().zip(&self.groups) {
            for (block, &r) in blocks(range.clone(), group.len()).into_iter().zip(group) {
                self.owned[r].extend(block);
            }
        }

        let rank = self.comm.rank();
        debug!(
            target: "engram::sync",
            rank,
            layer = rank % layers.len(),
            units = self.owned[rank].len(),
            "layer-pinned ownership"
        );
        Ok(mask_for(&self.owned, rank, unit_count))
    }

    fn synchronize(&mut self, active: &mut [bool]) -> Result<(), DistributedError> {
        all_gather(&mut self.comm, &self.owned, active)
    }

    fn combine_layer_counts(&mut self, layer: LayerId, partial: &[u64]) -> Result<Option<Vec<u64>>, DistributedError> {
        let rank = self.comm.rank();
        let group = self.groups[layer].clone();
        let leader = group[0];

        if group.contains(&rank) {
            let Some(total) = reduce_sum(&mut self.comm, &group, leader, partial)? else {
                return Ok(None);
            };
            if rank == COORDINATOR {
                return Ok(Some(total));
            }
            forward_counts(&mut self.comm, COORDINATOR, total)?;
            return Ok(None);
        }
        if rank == COORDINATOR {
            return receive_forwarded(&mut self.comm, leader, partial.len()).map(Some);
        }
        Ok(None)
    }

    fn combine_counts(&mut self, partial: &[u64]) -> Result<Option<Vec<u64>>, DistributedError> {
        let everyone: Vec<usize> = (0..self.comm.size()).collect();
        reduce_sum(&mut self.comm, &everyone, COORDINATOR, partial)
    }

    fn gather_lines(&mut self, lines: Vec<(usize, String)>) -> Result<Option<Vec<(usize, String)>>, DistributedError> {
        let everyone: Vec<usize> = (0..self.comm.size()).collect();
        gather_lines(&mut self.comm, &everyone, COORDINATOR, lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::ThreadComm;

    #[test]
    fn blocks_give_remainder_to_first_ranks() {
        assert_eq!(blocks(10..17, 3), vec![10..13, 13..15, 15..17]);
        assert_eq!(blocks(0..2, 3), vec![0..1, 1..2, 2..2]);
    }

    #[test]
    fn ranks_wrap_over_layers() {
        let layers = [0..4, 4..8, 8..10];
        let dists: Vec<LayerPinned<ThreadComm>> = ThreadComm::group(5)
            .into_iter()
            .map(|c| {
                let mut d = LayerPinned::new(c);
                d.bind(&layers, 10).unwrap();
                d
            })
            .collect();
        // Ranks 0 and 3 share layer 0, 1 and 4 share layer 1, 2 has layer 2.
        assert_eq!(dists[3].layer_of(3), Some(0));
        assert_eq!(dists[0].owned[0], vec![0, 1]);
        assert_eq!(dists[0].owned[3], vec![2, 3]);
        assert_eq!(dists[0].owned[2], vec![8, 9]);
    }

    #[test]
    fn too_few_workers_is_an_error() {
        let comm = ThreadComm::group(2).pop().unwrap();
        let err = LayerPinned::new(comm).bind(&[0..1, 1..2, 2..3], 3).unwrap_err();
        assert!(matches!(
            err,
            DistributedError::TooFewWorkers { needed: 3, got: 2, .. }
        ));
    }

    #[test]
    fn layer_counts_reach_the_coordinator() {
        let layers = [0..4, 4..8];
        let results: Vec<Vec<Option<Vec<u64>>>> = std::thread::scope(|scope| {
            let handles: Vec<_> = ThreadComm::group(4)
                .into_iter()
                .map(|c| {
                    let layers = &layers;
                    scope.spawn(move || {
                        let mut d = LayerPinned::new(c);
                        let mask = d.bind(layers, 8).unwrap();
                        (0..2)
                            .map(|l| {
                                let mine = layers[l].clone().filter(|&u| mask[u]).count() as u64;
                                d.combine_layer_counts(l, &[mine]).unwrap()
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results[0], vec![Some(vec![4]), Some(vec![4])]);
        assert!(results[1..].iter().flatten().all(Option::is_none));
    }
}
