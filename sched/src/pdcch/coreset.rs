//! Coreset region allocator
//!
//! Places the DCIs of one slot in one coreset with a depth-first search over
//! their candidate CCE positions. When a new DCI collides with every
//! candidate, earlier DCIs are moved to their next candidates until a
//! collision-free assignment is found or the search space is exhausted.

use common::bitmask::CceMask;
use common::types::Rnti;
use tracing::trace;

use super::cce_positions::aggr_level;
use super::{DciLocation, DciRef};

/// One DCI waiting for a CCE position
#[derive(Debug, Clone)]
pub struct AllocRecord {
    /// Arena slot the chosen location is written back to
    pub dci: DciRef,
    pub aggr_idx: u8,
    pub ss_id: u8,
    pub rnti: Rnti,
    /// Candidate first CCEs, tried in order
    pub cce_locs: Vec<u32>,
}

/// DFS tree node, one per placed record
#[derive(Debug, Clone)]
struct TreeNode {
    rnti: Rnti,
    /// Candidate index chosen in the record's `cce_locs`
    dci_pos_idx: usize,
    location: DciLocation,
    current_mask: CceMask,
    /// Union of this node's mask and every node above it
    total_mask: CceMask,
}

/// PDCCH allocator of one coreset for one slot
#[derive(Debug, Clone)]
pub struct CoresetRegion {
    coreset_id: u8,
    nof_cces: u32,
    dci_records: Vec<AllocRecord>,
    dfs_tree: Vec<TreeNode>,
    /// Tree before the last successful allocation
    undo: Option<Vec<TreeNode>>,
}

impl CoresetRegion {
    pub fn new(coreset_id: u8, nof_cces: u32) -> Self {
        Self {
            coreset_id,
            nof_cces,
            dci_records: Vec::new(),
            dfs_tree: Vec::new(),
            undo: None,
        }
    }

    /// Clear all allocations for a new slot
    pub fn reset(&mut self) {
        self.dci_records.clear();
        self.dfs_tree.clear();
        self.undo = None;
    }

    pub fn coreset_id(&self) -> u8 {
        self.coreset_id
    }

    pub fn nof_cces(&self) -> u32 {
        self.nof_cces
    }

    pub fn nof_allocs(&self) -> usize {
        self.dfs_tree.len()
    }

    /// CCEs used by all placed DCIs
    pub fn total_mask(&self) -> CceMask {
        self.dfs_tree
            .last()
            .map(|node| node.total_mask)
            .unwrap_or_else(|| CceMask::new(self.nof_cces as usize))
    }

    /// Current location of every placed DCI
    pub fn dci_locations(&self) -> impl Iterator<Item = (DciRef, DciLocation)> + '_ {
        self.dci_records
            .iter()
            .zip(self.dfs_tree.iter())
            .map(|(record, node)| (record.dci, node.location))
    }

    /// Place a new DCI, moving earlier ones if needed
    ///
    /// On failure the tree is left exactly as it was before the call.
    pub fn alloc_pdcch(&mut self, record: AllocRecord) -> bool {
        let saved = self.dfs_tree.clone();
        let rnti = record.rnti;
        let aggr_idx = record.aggr_idx;
        self.dci_records.push(record);

        let last = self.dci_records.len() - 1;
        let success = self.alloc_dfs_node(last, 0) || self.get_next_dfs();
        if !success {
            self.dci_records.pop();
            self.dfs_tree = saved;
            self.undo = None;
            trace!(
                "coreset={} rnti={} L={} no space, {} DCIs placed",
                self.coreset_id,
                rnti,
                aggr_level(aggr_idx),
                self.dfs_tree.len()
            );
            return false;
        }
        debug_assert_eq!(self.dfs_tree.len(), self.dci_records.len());
        debug_assert!(self.masks_disjoint());
        self.undo = Some(saved);
        true
    }

    /// Remove the DCI placed by the last successful [`alloc_pdcch`](Self::alloc_pdcch)
    ///
    /// Earlier DCIs get back the locations they had before that call.
    pub fn rem_last_pdcch(&mut self) -> bool {
        let Some(saved) = self.undo.take() else {
            return false;
        };
        self.dci_records.pop();
        self.dfs_tree = saved;
        true
    }

    fn alloc_dfs_node(&mut self, record_idx: usize, start_idx: usize) -> bool {
        let record = &self.dci_records[record_idx];
        let l = aggr_level(record.aggr_idx);
        let prev_total = self
            .dfs_tree
            .last()
            .map(|node| node.total_mask)
            .unwrap_or_else(|| CceMask::new(self.nof_cces as usize));

        for (pos_idx, &ncce) in record.cce_locs.iter().enumerate().skip(start_idx) {
            if ncce + l > self.nof_cces {
                continue;
            }
            let mut current = CceMask::new(self.nof_cces as usize);
            current.fill(ncce as usize, (ncce + l) as usize);
            if current.intersects(&prev_total) {
                continue;
            }
            self.dfs_tree.push(TreeNode {
                rnti: record.rnti,
                dci_pos_idx: pos_idx,
                location: DciLocation { aggr_idx: record.aggr_idx, ncce },
                current_mask: current,
                total_mask: prev_total | current,
            });
            return true;
        }
        false
    }

    /// Backtrack to the next assignment in DFS order that places every record
    fn get_next_dfs(&mut self) -> bool {
        while let Some(node) = self.dfs_tree.pop() {
            let record_idx = self.dfs_tree.len();
            if !self.alloc_dfs_node(record_idx, node.dci_pos_idx + 1) {
                continue;
            }
            trace!(
                "coreset={} moved rnti={} to candidate {}",
                self.coreset_id,
                node.rnti,
                node.dci_pos_idx + 1
            );
            while self.dfs_tree.len() < self.dci_records.len() {
                if !self.alloc_dfs_node(self.dfs_tree.len(), 0) {
                    break;
                }
            }
            if self.dfs_tree.len() == self.dci_records.len() {
                return true;
            }
        }
        false
    }

    fn masks_disjoint(&self) -> bool {
        let mut acc = CceMask::new(self.nof_cces as usize);
        for node in &self.dfs_tree {
            if node.current_mask.intersects(&acc) {
                return false;
            }
            acc |= node.current_mask;
        }
        acc == self.total_mask()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdcch::LinkDir;

    fn record(idx: usize, aggr_idx: u8, cce_locs: Vec<u32>) -> AllocRecord {
        AllocRecord {
            dci: DciRef { dir: LinkDir::Dl, idx },
            aggr_idx,
            ss_id: 2,
            rnti: Rnti(0x4601 + idx as u16),
            cce_locs,
        }
    }

    #[test]
    fn test_alloc_without_collision() {
        let mut region = CoresetRegion::new(1, 8);
        assert!(region.alloc_pdcch(record(0, 1, vec![0, 2])));
        assert!(region.alloc_pdcch(record(1, 1, vec![0, 2])));
        assert_eq!(region.nof_allocs(), 2);
        assert_eq!(region.total_mask().count(), 4);
        let locs: Vec<_> = region.dci_locations().map(|(_, loc)| loc.ncce).collect();
        assert_eq!(locs, vec![0, 2]);
    }

    #[test]
    fn test_backtracking_moves_earlier_dci() {
        let mut region = CoresetRegion::new(1, 4);
        assert!(region.alloc_pdcch(record(0, 1, vec![0, 2])));
        // second DCI can only live at CCE 0, so the first one moves to CCE 2
        assert!(region.alloc_pdcch(record(1, 1, vec![0])));
        let locs: Vec<_> = region.dci_locations().map(|(r, loc)| (r.idx, loc.ncce)).collect();
        assert_eq!(locs, vec![(0, 2), (1, 0)]);
        assert!(region.masks_disjoint());
    }

    #[test]
    fn test_failure_restores_tree() {
        let mut region = CoresetRegion::new(1, 4);
        assert!(region.alloc_pdcch(record(0, 1, vec![0, 2])));
        assert!(region.alloc_pdcch(record(1, 1, vec![0, 2])));
        let before = region.total_mask();
        let locs_before: Vec<_> = region.dci_locations().collect();

        assert!(!region.alloc_pdcch(record(2, 1, vec![0, 2])));
        assert_eq!(region.total_mask(), before);
        assert_eq!(region.nof_allocs(), 2);
        assert_eq!(region.dci_locations().collect::<Vec<_>>(), locs_before);
        // nothing left to undo after a failure
        assert!(!region.rem_last_pdcch());
    }

    #[test]
    fn test_rem_last_restores_moved_dcis() {
        let mut region = CoresetRegion::new(1, 4);
        assert!(region.alloc_pdcch(record(0, 1, vec![0, 2])));
        let before = region.total_mask();
        assert!(region.alloc_pdcch(record(1, 1, vec![0])));
        assert!(region.rem_last_pdcch());
        assert_eq!(region.total_mask(), before);
        assert_eq!(region.nof_allocs(), 1);
        let locs: Vec<_> = region.dci_locations().map(|(_, loc)| loc.ncce).collect();
        assert_eq!(locs, vec![0]);
        // one level of undo only
        assert!(!region.rem_last_pdcch());
    }

    #[test]
    fn test_capacity_boundary() {
        let mut region = CoresetRegion::new(0, 16);
        let locs = vec![0, 4, 8, 12];
        for i in 0..4 {
            assert!(region.alloc_pdcch(record(i, 2, locs.clone())));
        }
        assert!(region.total_mask().all());
        assert!(!region.alloc_pdcch(record(4, 2, locs.clone())));
        assert!(!region.alloc_pdcch(record(4, 0, vec![3])));
        assert!(region.total_mask().all());
        assert_eq!(region.nof_allocs(), 4);

        // candidates beyond the coreset are skipped
        let mut small = CoresetRegion::new(0, 6);
        assert!(!small.alloc_pdcch(record(0, 3, vec![0])));
        assert_eq!(small.nof_allocs(), 0);
    }

    #[test]
    fn test_deterministic_placement() {
        let run = || {
            let mut region = CoresetRegion::new(2, 24);
            let requests = [
                (1, vec![0, 6, 12, 18]),
                (2, vec![0, 12]),
                (1, vec![4, 10, 16, 22]),
                (0, vec![1, 5, 9]),
                (2, vec![8, 16]),
            ];
            for (i, (aggr_idx, locs)) in requests.iter().enumerate() {
                region.alloc_pdcch(record(i, *aggr_idx, locs.clone()));
            }
            region.dci_locations().collect::<Vec<_>>()
        };
        let first = run();
        assert_eq!(first.len(), 5);
        for _ in 0..10 {
            assert_eq!(run(), first);
        }
    }

    #[test]
    fn test_reset() {
        let mut region = CoresetRegion::new(1, 8);
        assert!(region.alloc_pdcch(record(0, 2, vec![0, 4])));
        region.reset();
        assert_eq!(region.nof_allocs(), 0);
        assert!(region.total_mask().none());
        assert!(!region.rem_last_pdcch());
    }
}
