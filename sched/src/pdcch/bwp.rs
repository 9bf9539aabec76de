//! BWP-wide PDCCH allocator
//!
//! Routes each PDCCH request to the coreset of its search space, keeps the
//! DCI contexts of the slot in two arenas (DL assignments and UL grants) and
//! offers a single level of undo for the last successful allocation.

use std::sync::Arc;

use common::types::{Rnti, RntiType};
use tracing::{debug, error, warn};

use super::coreset::{AllocRecord, CoresetRegion};
use super::{DciCtx, DciFormat, DciLocation, DciRef, LinkDir};
use crate::cell_params::CellParams;
use crate::config::{DciFormats, SearchSpaceConfig, SearchSpaceType, MAX_NOF_AGGR_LEVELS};
use crate::ue::UeCarrierParams;
use crate::{AllocError, AllocResult};

/// Last successful allocation, still cancellable
#[derive(Debug, Clone, Copy)]
struct PendingDci {
    coreset_id: u8,
    dci: DciRef,
}

/// PDCCH allocator of one BWP for one slot
#[derive(Debug, Clone)]
pub struct BwpPdcchAllocator {
    cell: Arc<CellParams>,
    slot_idx: u32,
    cfi: u8,
    coresets: Vec<CoresetRegion>,
    pdcch_dl: Vec<DciCtx>,
    pdcch_ul: Vec<DciCtx>,
    pending: Option<PendingDci>,
}

impl BwpPdcchAllocator {
    pub fn new(cell: Arc<CellParams>) -> Self {
        let cfi = cell.cfi();
        let coresets = cell
            .cfg()
            .bwp
            .coresets
            .iter()
            .map(|c| CoresetRegion::new(c.id, cell.nof_cce(c.id, cfi)))
            .collect();
        Self {
            cell,
            slot_idx: 0,
            cfi,
            coresets,
            pdcch_dl: Vec::new(),
            pdcch_ul: Vec::new(),
            pending: None,
        }
    }

    /// Clear every coreset and arena for `slot_idx`
    pub fn reset(&mut self, slot_idx: u32) {
        self.slot_idx = slot_idx;
        for coreset in &mut self.coresets {
            coreset.reset();
        }
        self.pdcch_dl.clear();
        self.pdcch_ul.clear();
        self.pending = None;
    }

    pub fn slot_idx(&self) -> u32 {
        self.slot_idx
    }

    /// PDCCH for a random access response
    pub fn alloc_rar_pdcch(&mut self, ra_rnti: Rnti, aggr_idx: u8) -> AllocResult<usize> {
        let ss_id = self.cell.ra_search_space();
        self.alloc_pdcch(LinkDir::Dl, ra_rnti, RntiType::Ra, ss_id, aggr_idx, None)
    }

    /// PDCCH for a system information message
    pub fn alloc_si_pdcch(&mut self, ss_id: u8, aggr_idx: u8) -> AllocResult<usize> {
        self.alloc_pdcch(LinkDir::Dl, Rnti::SI, RntiType::Si, ss_id, aggr_idx, None)
    }

    /// PDCCH for a UE downlink assignment
    pub fn alloc_dl_pdcch(
        &mut self,
        rnti_type: RntiType,
        ss_id: u8,
        aggr_idx: u8,
        ue: &UeCarrierParams,
    ) -> AllocResult<usize> {
        self.alloc_pdcch(LinkDir::Dl, ue.rnti(), rnti_type, ss_id, aggr_idx, Some(ue))
    }

    /// PDCCH for a UE uplink grant
    pub fn alloc_ul_pdcch(&mut self, ss_id: u8, aggr_idx: u8, ue: &UeCarrierParams) -> AllocResult<usize> {
        self.alloc_pdcch(LinkDir::Ul, ue.rnti(), RntiType::C, ss_id, aggr_idx, Some(ue))
    }

    /// Undo the last successful allocation
    ///
    /// Only the most recent allocation can be cancelled, and only before the
    /// next allocation attempt.
    pub fn cancel_last_pdcch(&mut self) {
        let Some(pending) = self.pending.take() else {
            warn!("slot_idx={} no PDCCH allocation to cancel", self.slot_idx);
            return;
        };
        let Some(coreset) = self.coresets.iter_mut().find(|c| c.coreset_id() == pending.coreset_id) else {
            return;
        };
        if !coreset.rem_last_pdcch() {
            return;
        }
        let arena = match pending.dci.dir {
            LinkDir::Dl => &mut self.pdcch_dl,
            LinkDir::Ul => &mut self.pdcch_ul,
        };
        debug_assert_eq!(arena.len(), pending.dci.idx + 1);
        arena.pop();
        self.sync_locations(pending.coreset_id);
    }

    /// Number of DCIs placed in the slot
    pub fn nof_allocations(&self) -> usize {
        self.coresets.iter().map(|c| c.nof_allocs()).sum()
    }

    /// Number of CCEs in use in a coreset
    pub fn nof_cces(&self, coreset_id: u8) -> usize {
        self.coresets
            .iter()
            .find(|c| c.coreset_id() == coreset_id)
            .map(|c| c.total_mask().count())
            .unwrap_or(0)
    }

    pub fn pdcch_dl(&self) -> &[DciCtx] {
        &self.pdcch_dl
    }

    pub fn pdcch_ul(&self) -> &[DciCtx] {
        &self.pdcch_ul
    }

    /// Hand the DCI arenas over to the slot result
    pub fn take_results(&mut self) -> (Vec<DciCtx>, Vec<DciCtx>) {
        self.pending = None;
        (std::mem::take(&mut self.pdcch_dl), std::mem::take(&mut self.pdcch_ul))
    }

    fn alloc_pdcch(
        &mut self,
        dir: LinkDir,
        rnti: Rnti,
        rnti_type: RntiType,
        ss_id: u8,
        aggr_idx: u8,
        ue: Option<&UeCarrierParams>,
    ) -> AllocResult<usize> {
        self.pending = None;
        let ss = self.check_args_valid(dir, rnti, rnti_type, ss_id, aggr_idx, ue)?;
        let format = select_format(dir, &ss);

        let cce_locs = match ue {
            Some(ue) => ue.cce_positions(ss_id, self.slot_idx, aggr_idx).to_vec(),
            None => self
                .cell
                .common_cce_positions(ss_id, self.slot_idx, self.cfi, aggr_idx)
                .to_vec(),
        };

        let arena = match dir {
            LinkDir::Dl => &mut self.pdcch_dl,
            LinkDir::Ul => &mut self.pdcch_ul,
        };
        let dci = DciRef { dir, idx: arena.len() };
        arena.push(DciCtx {
            rnti,
            rnti_type,
            format,
            coreset_id: ss.coreset_id,
            ss_id,
            location: DciLocation { aggr_idx, ncce: 0 },
        });

        let record = AllocRecord { dci, aggr_idx, ss_id, rnti, cce_locs };
        let placed = self
            .coresets
            .iter_mut()
            .find(|c| c.coreset_id() == ss.coreset_id)
            .is_some_and(|coreset| coreset.alloc_pdcch(record));
        if !placed {
            match dir {
                LinkDir::Dl => self.pdcch_dl.pop(),
                LinkDir::Ul => self.pdcch_ul.pop(),
            };
            if rnti_type.is_ue_specific() {
                debug!(
                    "slot_idx={} rnti={} failed to allocate {:?} PDCCH in ss={}: no CCE space",
                    self.slot_idx, rnti, dir, ss_id
                );
            } else {
                warn!(
                    "slot_idx={} failed to allocate {:?}-RNTI={} PDCCH in ss={}: no CCE space",
                    self.slot_idx, rnti_type, rnti, ss_id
                );
            }
            return Err(AllocError::NoCchSpace);
        }

        self.sync_locations(ss.coreset_id);
        self.pending = Some(PendingDci { coreset_id: ss.coreset_id, dci });
        Ok(dci.idx)
    }

    /// Copy the DFS locations of a coreset back into the arenas
    fn sync_locations(&mut self, coreset_id: u8) {
        let Some(coreset) = self.coresets.iter().find(|c| c.coreset_id() == coreset_id) else {
            return;
        };
        for (dci, location) in coreset.dci_locations() {
            let arena = match dci.dir {
                LinkDir::Dl => &mut self.pdcch_dl,
                LinkDir::Ul => &mut self.pdcch_ul,
            };
            if let Some(ctx) = arena.get_mut(dci.idx) {
                ctx.location = location;
            }
        }
    }

    /// Validate a PDCCH request and resolve its search space
    pub fn check_args_valid(
        &self,
        dir: LinkDir,
        rnti: Rnti,
        rnti_type: RntiType,
        ss_id: u8,
        aggr_idx: u8,
        ue: Option<&UeCarrierParams>,
    ) -> AllocResult<SearchSpaceConfig> {
        let invalid = |msg: String| {
            error!("slot_idx={} rnti={} invalid PDCCH request: {}", self.slot_idx, rnti, msg);
            AllocError::InvalidGrantParams
        };

        if aggr_idx as usize >= MAX_NOF_AGGR_LEVELS {
            return Err(invalid(format!("aggregation index {} out of range", aggr_idx)));
        }
        match rnti_type {
            RntiType::Si if rnti != Rnti::SI => return Err(invalid("SI-RNTI mismatch".into())),
            RntiType::P if rnti != Rnti::P => return Err(invalid("P-RNTI mismatch".into())),
            RntiType::Ra | RntiType::C | RntiType::Tc if !rnti.is_crnti_range() => {
                return Err(invalid(format!("{:?}-RNTI out of range", rnti_type)));
            }
            _ => {}
        }
        if dir == LinkDir::Ul && rnti_type != RntiType::C {
            return Err(invalid(format!("UL grants cannot use {:?}-RNTI", rnti_type)));
        }

        let ss = match (rnti_type.is_ue_specific(), ue) {
            (true, None) => return Err(invalid("UE PDCCH without UE context".into())),
            (true, Some(ue)) => {
                if ue.rnti() != rnti {
                    return Err(invalid(format!("UE context belongs to rnti={}", ue.rnti())));
                }
                if ue.bwp_id() != self.cell.bwp_id() {
                    return Err(invalid(format!("UE active BWP {} is not BWP {}", ue.bwp_id(), self.cell.bwp_id())));
                }
                ue.get_ss(ss_id)
            }
            (false, _) => self.cell.search_space(ss_id),
        }
        .ok_or_else(|| invalid(format!("search space {} not found", ss_id)))?;

        match (rnti_type, ss.kind) {
            (RntiType::Ra, SearchSpaceType::Common1) => {}
            (RntiType::Si, SearchSpaceType::Common0 | SearchSpaceType::Common0A) => {}
            (RntiType::P, SearchSpaceType::Common2) => {}
            (RntiType::C, _) => {}
            (RntiType::Tc, SearchSpaceType::Common1) => {}
            (rnti_type, kind) => {
                return Err(invalid(format!("{:?}-RNTI cannot use {:?} search space {}", rnti_type, kind, ss_id)));
            }
        }
        let monitored = match dir {
            LinkDir::Dl => DciFormats::F1_0 | DciFormats::F1_1,
            LinkDir::Ul => DciFormats::F0_0 | DciFormats::F0_1,
        };
        if !ss.formats.intersects(monitored) {
            return Err(invalid(format!("search space {} monitors no {:?} DCI format", ss_id, dir)));
        }
        if ss.nof_candidates[aggr_idx as usize] == 0 {
            return Err(invalid(format!("search space {} has no candidates at aggr_idx={}", ss_id, aggr_idx)));
        }
        if !self.cell.slot_is_dl(self.slot_idx) {
            debug!("slot_idx={} rnti={} no PDCCH in a non-DL slot", self.slot_idx, rnti);
            return Err(AllocError::NoCchSpace);
        }
        Ok(ss.clone())
    }
}

fn select_format(dir: LinkDir, ss: &SearchSpaceConfig) -> DciFormat {
    match dir {
        LinkDir::Dl if ss.formats.contains(DciFormats::F1_1) => DciFormat::F1_1,
        LinkDir::Dl => DciFormat::F1_0,
        LinkDir::Ul if ss.formats.contains(DciFormats::F0_1) => DciFormat::F0_1,
        LinkDir::Ul => DciFormat::F0_0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_cell_config, CellConfig, SchedArgs, UeConfig};
    use common::types::{DuplexMode, SubcarrierSpacing, TddPattern};

    /// Default cell with a 6-CCE, 1-symbol UE coreset and two L=2 candidates
    fn six_cce_cell() -> CellConfig {
        let mut cfg = default_cell_config();
        cfg.bwp.coresets[1].freq_resources = 0b11_1111;
        cfg.bwp.search_spaces[2].nof_candidates = [0, 2, 0, 0, 0];
        cfg
    }

    fn setup(cfg: &CellConfig) -> (Arc<CellParams>, BwpPdcchAllocator) {
        let cell = Arc::new(CellParams::new(0, cfg, &SchedArgs::default()).unwrap());
        let mut pdcch = BwpPdcchAllocator::new(cell.clone());
        pdcch.reset(1);
        (cell, pdcch)
    }

    fn ue(cell: &Arc<CellParams>, rnti: u16) -> UeCarrierParams {
        UeCarrierParams::new(Rnti(rnti), 0, &UeConfig::default(), cell).unwrap()
    }

    #[test]
    fn test_six_cce_scenario() {
        let (cell, mut pdcch) = setup(&six_cce_cell());
        assert_eq!(cell.nof_cce(1, cell.cfi()), 6);

        let ues: Vec<_> = (0..3).map(|i| ue(&cell, 0x4601 + i)).collect();
        assert_eq!(pdcch.alloc_dl_pdcch(RntiType::C, 2, 1, &ues[0]), Ok(0));
        assert_eq!(pdcch.alloc_dl_pdcch(RntiType::C, 2, 1, &ues[1]), Ok(1));
        assert_eq!(pdcch.alloc_dl_pdcch(RntiType::C, 2, 1, &ues[2]), Err(AllocError::NoCchSpace));

        assert_eq!(pdcch.nof_allocations(), 2);
        assert_eq!(pdcch.nof_cces(1), 4);
        let dcis = pdcch.pdcch_dl();
        assert_eq!(dcis.len(), 2);
        assert_eq!(dcis[0].location.ncce, 0);
        assert_eq!(dcis[1].location.ncce, 2);
        assert_eq!(dcis[0].format, DciFormat::F1_0);
        assert_eq!(dcis[1].rnti, Rnti(0x4602));
    }

    #[test]
    fn test_cancel_restores_state() {
        let (cell, mut pdcch) = setup(&six_cce_cell());
        let ue0 = ue(&cell, 0x4601);
        let ue1 = ue(&cell, 0x4602);
        pdcch.alloc_dl_pdcch(RntiType::C, 2, 1, &ue0).unwrap();
        let cces_before = pdcch.nof_cces(1);
        let allocs_before = pdcch.nof_allocations();

        pdcch.alloc_ul_pdcch(2, 1, &ue1).unwrap();
        assert_eq!(pdcch.pdcch_ul().len(), 1);
        pdcch.cancel_last_pdcch();
        assert_eq!(pdcch.nof_cces(1), cces_before);
        assert_eq!(pdcch.nof_allocations(), allocs_before);
        assert!(pdcch.pdcch_ul().is_empty());

        // second cancel is a no-op
        pdcch.cancel_last_pdcch();
        assert_eq!(pdcch.nof_allocations(), allocs_before);
        assert_eq!(pdcch.pdcch_dl().len(), 1);
    }

    #[test]
    fn test_cancel_only_before_next_alloc() {
        let (cell, mut pdcch) = setup(&six_cce_cell());
        let ue0 = ue(&cell, 0x4601);
        pdcch.alloc_dl_pdcch(RntiType::C, 2, 1, &ue0).unwrap();
        // failed attempt in between drops the pending undo
        assert!(pdcch.alloc_dl_pdcch(RntiType::C, 2, 4, &ue0).is_err());
        pdcch.cancel_last_pdcch();
        assert_eq!(pdcch.nof_allocations(), 1);
    }

    #[test]
    fn test_broadcast_pdcch() {
        let (_, mut pdcch) = setup(&default_cell_config());
        let si = pdcch.alloc_si_pdcch(0, 2).unwrap();
        let rar = pdcch.alloc_rar_pdcch(Rnti(2), 2).unwrap();
        let dcis = pdcch.pdcch_dl();
        assert_eq!(dcis[si].rnti_type, RntiType::Si);
        assert_eq!(dcis[rar].rnti_type, RntiType::Ra);
        assert_eq!(dcis[rar].coreset_id, 0);
        // SI and RAR share coreset 0, 8 CCEs with two L=4 candidates
        assert_eq!(pdcch.nof_cces(0), 8);
        assert_eq!(pdcch.alloc_rar_pdcch(Rnti(3), 2), Err(AllocError::NoCchSpace));
    }

    #[test]
    fn test_invalid_args() {
        let (cell, mut pdcch) = setup(&default_cell_config());
        let ue0 = ue(&cell, 0x4601);
        assert_eq!(pdcch.alloc_si_pdcch(0, 5), Err(AllocError::InvalidGrantParams));
        // SI through the RA search space
        assert_eq!(pdcch.alloc_si_pdcch(1, 2), Err(AllocError::InvalidGrantParams));
        assert_eq!(pdcch.alloc_rar_pdcch(Rnti::SI, 2), Err(AllocError::InvalidGrantParams));
        assert_eq!(pdcch.alloc_dl_pdcch(RntiType::C, 9, 1, &ue0), Err(AllocError::InvalidGrantParams));
        // no L=1 candidates in ss 2
        assert_eq!(pdcch.alloc_dl_pdcch(RntiType::C, 2, 0, &ue0), Err(AllocError::InvalidGrantParams));
        assert_eq!(pdcch.nof_allocations(), 0);

        let mut cfg = UeConfig::default();
        cfg.active_bwp = 1;
        let other_bwp = UeCarrierParams::new(Rnti(0x4602), 0, &cfg, &cell).unwrap();
        assert_eq!(
            pdcch.alloc_dl_pdcch(RntiType::C, 2, 1, &other_bwp),
            Err(AllocError::InvalidGrantParams)
        );
    }

    #[test]
    fn test_no_pdcch_in_ul_slot() {
        let mut cfg = default_cell_config();
        cfg.scs = SubcarrierSpacing::Scs30;
        cfg.nof_prb = 51;
        cfg.duplex = DuplexMode::Tdd(TddPattern { period_slots: 10, nof_dl_slots: 7, nof_ul_slots: 2 });
        let (_, mut pdcch) = setup(&cfg);
        pdcch.reset(9);
        assert_eq!(pdcch.alloc_si_pdcch(0, 2), Err(AllocError::NoCchSpace));
    }

    #[test]
    fn test_take_results() {
        let (cell, mut pdcch) = setup(&default_cell_config());
        let ue0 = ue(&cell, 0x4601);
        pdcch.alloc_dl_pdcch(RntiType::C, 2, 1, &ue0).unwrap();
        pdcch.alloc_ul_pdcch(2, 1, &ue0).unwrap();
        let (dl, ul) = pdcch.take_results();
        assert_eq!((dl.len(), ul.len()), (1, 1));
        assert_ne!(dl[0].location.ncce, ul[0].location.ncce);
        assert_eq!(ul[0].format, DciFormat::F0_0);
    }
}
