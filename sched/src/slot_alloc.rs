//! Grant allocator
//!
//! Maps scheduling decisions onto PDCCH, PDSCH, PUSCH and PUCCH resources of
//! the carrier. Every slot in flight has a [`SlotGrid`] in a ring of
//! [`SLOT_RING_SIZE`] entries: a PDSCH decided in slot n books its HARQ-ACK
//! in the grid of n + k1, a PUSCH in the grid of n + k2. Grids are reset
//! lazily the first time a new slot touches them.

use std::sync::Arc;

use common::bitmask::{find_empty_interval, PrbInterval, PrbMask, RbgMask};
use common::types::{Rnti, RntiType, SlotPoint};
use tracing::{debug, warn};

use crate::cell_params::{CellParams, SLOT_RING_SIZE};
use crate::config::{McsTable, SchedArgs};
use crate::harq::{rv_for_retx, DlHarqAction, TbGrant, UlHarqAction, UlHarqEntity};
use crate::pdcch::BwpPdcchAllocator;
use crate::result::{
    DlSchedResult, Msg3Grant, PdschGrant, PucchGrant, PuschGrant, RarGrant, SiGrant, SlotResult, UlSchedResult,
};
use crate::tbs::calc_tbs;
use crate::ue::SlotUe;
use crate::{AllocError, AllocResult};

/// MAC RAR size in bytes: subheader plus the fixed RAR payload (TS 38.321 Section 6.2.3)
pub const RAR_BYTES_PER_GRANT: u32 = 8;

/// Resources of one slot
#[derive(Debug, Clone)]
pub struct SlotGrid {
    slot: Option<SlotPoint>,
    pdcch: BwpPdcchAllocator,
    dl_rbgs: RbgMask,
    dl_prbs: PrbMask,
    ul_prbs: PrbMask,
    dl: DlSchedResult,
    ul: UlSchedResult,
}

impl SlotGrid {
    fn new(cell: &Arc<CellParams>) -> Self {
        Self {
            slot: None,
            pdcch: BwpPdcchAllocator::new(cell.clone()),
            dl_rbgs: RbgMask::new(cell.nof_rbgs() as usize),
            dl_prbs: PrbMask::new(cell.nof_prb() as usize),
            ul_prbs: PrbMask::new(cell.nof_prb() as usize),
            dl: DlSchedResult::default(),
            ul: UlSchedResult::default(),
        }
    }

    fn reset(&mut self, slot: SlotPoint) {
        self.slot = Some(slot);
        self.pdcch.reset(slot.slot_idx());
        self.dl_rbgs.reset();
        self.dl_prbs.reset();
        self.ul_prbs.reset();
        self.dl = DlSchedResult::default();
        self.ul = UlSchedResult::default();
    }

    pub fn pdcch(&self) -> &BwpPdcchAllocator {
        &self.pdcch
    }

    pub fn dl_rbgs(&self) -> &RbgMask {
        &self.dl_rbgs
    }

    pub fn ul_prbs(&self) -> &PrbMask {
        &self.ul_prbs
    }

    /// Number of PDSCHs of any kind in the slot
    pub fn nof_pdsch(&self) -> usize {
        self.dl.pdsch.len() + self.dl.si.len() + self.dl.rar.len()
    }

    pub fn nof_pusch(&self) -> usize {
        self.ul.pusch.len()
    }

    /// Book a HARQ-ACK bit for `rnti`, multiplexed in its resource if it already has one
    fn alloc_pucch(&mut self, rnti: Rnti, max_pucch: usize) -> AllocResult<()> {
        if let Some(pucch) = self.ul.pucch.iter_mut().find(|p| p.rnti == rnti) {
            pucch.nof_harq_bits += 1;
            return Ok(());
        }
        if self.ul.pucch.len() >= max_pucch {
            return Err(AllocError::NoUciSpace);
        }
        self.ul.pucch.push(PucchGrant { rnti, nof_harq_bits: 1 });
        Ok(())
    }

    fn release_pucch(&mut self, rnti: Rnti) {
        if let Some(pos) = self.ul.pucch.iter().position(|p| p.rnti == rnti) {
            self.ul.pucch[pos].nof_harq_bits -= 1;
            if self.ul.pucch[pos].nof_harq_bits == 0 {
                self.ul.pucch.remove(pos);
            }
        }
    }
}

/// Ring of slot grids of one carrier
#[derive(Debug, Clone)]
pub struct ResourceGrid {
    cell: Arc<CellParams>,
    slots: Vec<SlotGrid>,
}

impl ResourceGrid {
    pub fn new(cell: Arc<CellParams>) -> Self {
        let slots = (0..SLOT_RING_SIZE).map(|_| SlotGrid::new(&cell)).collect();
        Self { cell, slots }
    }

    pub fn cell(&self) -> &Arc<CellParams> {
        &self.cell
    }

    /// Grid of `slot`, cleared if it still holds an older slot
    pub fn slot_mut(&mut self, slot: SlotPoint) -> &mut SlotGrid {
        let grid = &mut self.slots[slot.count() as usize % SLOT_RING_SIZE];
        if grid.slot != Some(slot) {
            grid.reset(slot);
        }
        grid
    }

    /// Grid of `slot` if it has been touched for that slot
    pub fn slot(&self, slot: SlotPoint) -> Option<&SlotGrid> {
        let grid = &self.slots[slot.count() as usize % SLOT_RING_SIZE];
        (grid.slot == Some(slot)).then_some(grid)
    }

    /// Hand the decisions of `slot` over to the PHY
    pub fn take_result(&mut self, slot: SlotPoint) -> SlotResult {
        let cc = self.cell.cc();
        let grid = self.slot_mut(slot);
        let (pdcch_dl, pdcch_ul) = grid.pdcch.take_results();
        let mut dl = std::mem::take(&mut grid.dl);
        dl.pdcch_dl = pdcch_dl;
        dl.pdcch_ul = pdcch_ul;
        SlotResult { slot, cc, dl, ul: std::mem::take(&mut grid.ul) }
    }
}

/// Msg3 to grant in a RAR
#[derive(Debug, Clone)]
pub struct Msg3Request {
    pub tc_rnti: Rnti,
    pub preamble_idx: u8,
    pub harq_ul: Arc<UlHarqEntity>,
}

/// Allocation front-end for the PDCCH slot `slot`
pub struct BwpSlotAllocator<'a> {
    cell: Arc<CellParams>,
    args: &'a SchedArgs,
    grid: &'a mut ResourceGrid,
    slot: SlotPoint,
}

impl<'a> BwpSlotAllocator<'a> {
    pub fn new(grid: &'a mut ResourceGrid, args: &'a SchedArgs, slot: SlotPoint) -> Self {
        let cell = grid.cell.clone();
        grid.slot_mut(slot);
        Self { cell, args, grid, slot }
    }

    pub fn slot(&self) -> SlotPoint {
        self.slot
    }

    pub fn cell(&self) -> &CellParams {
        &self.cell
    }

    pub fn mcs_table(&self) -> McsTable {
        self.args.mcs_table
    }

    fn slot_idx(&self) -> u32 {
        self.slot.slot_idx()
    }

    pub fn is_dl_slot(&self) -> bool {
        self.cell.slot_is_dl(self.slot_idx())
    }

    /// Slot a PUSCH granted now is transmitted in
    pub fn pusch_slot(&self) -> SlotPoint {
        self.slot + self.cell.k2(self.slot_idx())
    }

    /// Number of PDSCHs allocated so far in the slot
    pub fn nof_dl_grants(&self) -> usize {
        self.grid.slot(self.slot).map_or(0, |g| g.nof_pdsch())
    }

    /// Number of PUSCHs booked so far in the PUSCH slot
    pub fn nof_ul_grants(&self) -> usize {
        self.grid.slot(self.pusch_slot()).map_or(0, |g| g.nof_pusch())
    }

    /// Lowest `max_rbgs` free RBGs of the slot
    pub fn dl_free_rbgs(&self, max_rbgs: u32) -> RbgMask {
        let mut rbgs = RbgMask::new(self.cell.nof_rbgs() as usize);
        if !self.is_dl_slot() {
            return rbgs;
        }
        let used = self.grid.slot(self.slot).map(|g| g.dl_rbgs);
        (0..self.cell.nof_rbgs() as usize)
            .filter(|rbg| !used.is_some_and(|u| u.test(*rbg)))
            .take(max_rbgs as usize)
            .for_each(|rbg| rbgs.set(rbg, true));
        rbgs
    }

    /// First run of at most `max_prbs` free PRBs in the PUSCH slot
    pub fn ul_free_prbs(&self, max_prbs: u32) -> PrbInterval {
        let pusch_slot = self.pusch_slot();
        if !self.is_dl_slot() || !self.cell.slot_is_ul(pusch_slot.slot_idx()) {
            return PrbInterval::default();
        }
        match self.grid.slot(pusch_slot) {
            Some(grid) => find_empty_interval(&grid.ul_prbs, max_prbs, 0),
            None => PrbInterval::new(0, max_prbs.min(self.cell.nof_prb())),
        }
    }

    /// RBGs needed to carry `bytes` at `mcs`, capped at the carrier size
    pub fn dl_rbgs_for_bytes(&self, mcs: u8, bytes: u32) -> u32 {
        let nof_rbgs = self.cell.nof_rbgs();
        (1..=nof_rbgs)
            .find(|n| {
                let prbs = PrbInterval::new(0, self.cell.rbg_to_prbs(n - 1).stop);
                let nof_re = self.cell.get_dl_nof_res(self.slot_idx(), self.cell.cfi(), prbs);
                calc_tbs(nof_re, mcs, self.args.mcs_table, 1) / 8 >= bytes
            })
            .unwrap_or(nof_rbgs)
    }

    /// Shortest prefix of the first free DL PRB run carrying `bytes` at `mcs`
    ///
    /// Used for broadcast PDSCHs. When the run is too short the whole run is
    /// returned and the allocation fails on the code rate.
    pub fn dl_prbs_for_bytes(&self, mcs: u8, bytes: u32) -> PrbInterval {
        if !self.is_dl_slot() {
            return PrbInterval::default();
        }
        let nof_prb = self.cell.nof_prb();
        let run = match self.grid.slot(self.slot) {
            Some(grid) => {
                let used = grid.dl_prbs | self.cell.rbgs_to_prb_mask(&grid.dl_rbgs);
                find_empty_interval(&used, nof_prb, 0)
            }
            None => PrbInterval::new(0, nof_prb),
        };
        (run.start + 1..=run.stop)
            .map(|stop| PrbInterval::new(run.start, stop))
            .find(|prbs| {
                let nof_re = self.cell.get_dl_nof_res(self.slot_idx(), self.cell.cfi(), *prbs);
                calc_tbs(nof_re, mcs, self.args.mcs_table, 1) / 8 >= bytes
            })
            .unwrap_or(run)
    }

    /// PRBs needed to carry `bytes` at `mcs`, capped at the carrier size
    pub fn ul_prbs_for_bytes(&self, mcs: u8, bytes: u32) -> u32 {
        let nof_prb = self.cell.nof_prb();
        (1..=nof_prb)
            .find(|n| calc_tbs(self.cell.get_ul_nof_res(*n), mcs, self.args.mcs_table, 1) / 8 >= bytes)
            .unwrap_or(nof_prb)
    }

    fn check_dl_prbs(&self, prbs: PrbInterval) -> AllocResult<PrbMask> {
        if !self.is_dl_slot() {
            return Err(AllocError::NoSchSpace);
        }
        if self.nof_dl_grants() >= self.args.max_dl_grants_per_slot {
            return Err(AllocError::NoGrantSpace);
        }
        if prbs.is_empty() || prbs.stop > self.cell.nof_prb() {
            return Err(AllocError::InvalidGrantParams);
        }
        let mask = prbs.to_mask(self.cell.nof_prb() as usize);
        if self.grid.slot(self.slot).is_some_and(|g| g.dl_prbs.intersects(&mask)) {
            return Err(AllocError::SchCollision);
        }
        Ok(mask)
    }

    fn mark_dl(&mut self, prbs: &PrbMask) {
        let rbgs = self.cell.prb_mask_to_rbgs(prbs);
        let grid = self.grid.slot_mut(self.slot);
        grid.dl_prbs |= *prbs;
        grid.dl_rbgs |= rbgs;
    }

    /// Schedule system information message `si_idx` on `prbs`
    pub fn alloc_si(&mut self, aggr_idx: u8, si_idx: usize, nof_tx: u32, prbs: PrbInterval) -> AllocResult<()> {
        let Some(si) = self.cell.cfg().si.get(si_idx).copied() else {
            warn!("slot={} unknown SI message {}", self.slot, si_idx);
            return Err(AllocError::InvalidGrantParams);
        };
        let mask = self.check_dl_prbs(prbs)?;
        let mcs = self.args.common_mcs;
        let nof_re = self.cell.get_dl_nof_res(self.slot_idx(), self.cell.cfi(), prbs);
        let tbs = calc_tbs(nof_re, mcs, self.args.mcs_table, 1) / 8;
        if tbs < si.len_bytes {
            warn!("slot={} SI {} of {} bytes does not fit {} PRBs", self.slot, si_idx, si.len_bytes, prbs.len());
            return Err(AllocError::InvalidCoderate);
        }
        let ss_id = self.cell.si_search_space();
        let dci = self.grid.slot_mut(self.slot).pdcch.alloc_si_pdcch(ss_id, aggr_idx)?;
        self.mark_dl(&mask);
        self.grid.slot_mut(self.slot).dl.si.push(SiGrant { si_idx, dci, prbs, mcs, tbs, nof_tx });
        debug!("slot={} SI {} scheduled prbs={}..{} tbs={}", self.slot, si_idx, prbs.start, prbs.stop, tbs);
        Ok(())
    }

    /// Schedule a RAR on `rar_prbs` and one Msg3 PUSCH per request that fits
    ///
    /// Returns the number of Msg3 grants carried in the RAR.
    pub fn alloc_rar_and_msg3(
        &mut self,
        ra_rnti: Rnti,
        aggr_idx: u8,
        rar_prbs: PrbInterval,
        requests: &[Msg3Request],
    ) -> AllocResult<Vec<Rnti>> {
        let mask = self.check_dl_prbs(rar_prbs)?;
        let msg3_slot = self.slot + self.cell.msg3_k(self.slot_idx());
        if !self.cell.slot_is_ul(msg3_slot.slot_idx()) {
            return Err(AllocError::NoSchSpace);
        }

        // PRBs for as many Msg3s as fit
        let nof_prb = self.args.msg3_nof_prb;
        let mut used = self.grid.slot_mut(msg3_slot).ul_prbs;
        let room = self
            .args
            .max_ul_grants_per_slot
            .saturating_sub(self.grid.slot_mut(msg3_slot).nof_pusch());
        let mut msg3 = Vec::new();
        for req in requests.iter().take(room) {
            let Some(pid) = req.harq_ul.find_empty() else {
                debug!("rnti={} no UL HARQ process for Msg3", req.tc_rnti);
                continue;
            };
            let prbs = find_empty_interval(&used, nof_prb, 0);
            if prbs.len() < nof_prb {
                break;
            }
            used |= prbs.to_mask(self.cell.nof_prb() as usize);
            msg3.push((req, pid, prbs));
        }
        if msg3.is_empty() {
            return Err(AllocError::NoSchSpace);
        }

        let mcs = self.args.common_mcs;
        let nof_re = self.cell.get_dl_nof_res(self.slot_idx(), self.cell.cfi(), rar_prbs);
        let tbs = calc_tbs(nof_re, mcs, self.args.mcs_table, 1) / 8;
        if tbs < RAR_BYTES_PER_GRANT * msg3.len() as u32 {
            warn!("slot={} ra-rnti={} RAR does not fit {} PRBs", self.slot, ra_rnti, rar_prbs.len());
            return Err(AllocError::InvalidCoderate);
        }

        let dci = self.grid.slot_mut(self.slot).pdcch.alloc_rar_pdcch(ra_rnti, aggr_idx)?;
        self.mark_dl(&mask);

        let msg3_tbs = calc_tbs(self.cell.get_ul_nof_res(nof_prb), mcs, self.args.mcs_table, 1) / 8;
        let mut grants = Vec::with_capacity(msg3.len());
        let nof_prb_total = self.cell.nof_prb() as usize;
        for (req, pid, prbs) in msg3 {
            let ndi = req.harq_ul.proc_info(pid).is_some_and(|p| !p.ndi);
            let action = req.harq_ul.new_grant_ul(TbGrant {
                rnti: req.tc_rnti,
                pid,
                ndi,
                rv: 0,
                tbs: msg3_tbs,
                mcs,
                nof_rbs: prbs.len(),
                tx_slot: msg3_slot,
                ack_slot: msg3_slot,
            });
            let grid = self.grid.slot_mut(msg3_slot);
            grid.ul_prbs |= prbs.to_mask(nof_prb_total);
            grid.ul.pusch.push(PuschGrant {
                rnti: req.tc_rnti,
                pid,
                dci: None,
                prbs,
                mcs,
                tbs: msg3_tbs,
                action,
                msg3: true,
            });
            grants.push(Msg3Grant {
                tc_rnti: req.tc_rnti,
                preamble_idx: req.preamble_idx,
                prbs,
                mcs,
                pusch_slot: msg3_slot,
            });
        }
        let granted: Vec<Rnti> = grants.iter().map(|g| g.tc_rnti).collect();
        self.grid.slot_mut(self.slot).dl.rar.push(RarGrant {
            ra_rnti,
            dci,
            prbs: rar_prbs,
            mcs,
            tbs,
            msg3: grants,
        });
        debug!(
            "slot={} ra-rnti={} RAR scheduled with {} Msg3 grant(s) at slot={}",
            self.slot,
            ra_rnti,
            granted.len(),
            msg3_slot
        );
        Ok(granted)
    }

    /// Schedule a PDSCH for `ue` on `rbgs`
    ///
    /// A UE with a NACKed process retransmits it and must ask for the same
    /// number of RBGs as the first transmission.
    pub fn alloc_pdsch(&mut self, ue: &mut SlotUe, ss_id: u8, rbgs: RbgMask) -> AllocResult<()> {
        if ue.dl_scheduled {
            return Err(AllocError::NoRntiOpportunity);
        }
        let retx = ue.dl_retx;
        let pid = match retx {
            Some(info) => info.pid,
            None => ue.dl_new_pid.ok_or(AllocError::NoRntiOpportunity)?,
        };
        if !self.is_dl_slot() {
            return Err(AllocError::NoSchSpace);
        }
        if self.nof_dl_grants() >= self.args.max_dl_grants_per_slot {
            return Err(AllocError::NoGrantSpace);
        }
        let nof_rbgs = rbgs.count() as u32;
        if nof_rbgs == 0 {
            return Err(AllocError::InvalidGrantParams);
        }
        if self.grid.slot(self.slot).is_some_and(|g| g.dl_rbgs.intersects(&rbgs)) {
            return Err(AllocError::SchCollision);
        }
        if retx.is_some_and(|info| info.nof_rbs != nof_rbgs) {
            debug!("rnti={} pid={} retx needs the original number of RBGs", ue.rnti, pid);
            return Err(AllocError::InvalidGrantParams);
        }

        let prbs = self.cell.rbgs_to_prb_mask(&rbgs);
        let mcs = retx.map_or(ue.dl_mcs, |info| info.mcs);
        let tbs = match retx {
            Some(info) => info.tbs,
            None => {
                let nof_re = self.cell.get_dl_nof_res_mask(self.slot_idx(), self.cell.cfi(), &prbs);
                calc_tbs(nof_re, mcs, self.args.mcs_table, 1) / 8
            }
        };
        if tbs == 0 {
            return Err(AllocError::InvalidCoderate);
        }

        let aggr_idx = ue.params.dl_aggr_idx();
        let dci = self
            .grid
            .slot_mut(self.slot)
            .pdcch
            .alloc_dl_pdcch(RntiType::C, ss_id, aggr_idx, &ue.params)?;

        let ack_slot = ue.ack_slot;
        let max_pucch = self.args.max_pucch_per_slot;
        let pucch = if self.cell.slot_is_ul(ack_slot.slot_idx()) {
            self.grid.slot_mut(ack_slot).alloc_pucch(ue.rnti, max_pucch)
        } else {
            Err(AllocError::NoUciSpace)
        };
        if let Err(e) = pucch {
            debug!("slot={} rnti={} no PUCCH at slot={}", self.slot, ue.rnti, ack_slot);
            self.grid.slot_mut(self.slot).pdcch.cancel_last_pdcch();
            return Err(e);
        }

        let ndi = match retx {
            Some(info) => info.ndi,
            None => ue.harq_dl.proc_info(pid).is_some_and(|p| !p.ndi),
        };
        let rv = retx.map_or(0, |info| rv_for_retx(info.nof_retx + 1));
        let action = ue.harq_dl.new_grant_dl(TbGrant {
            rnti: ue.rnti,
            pid,
            ndi,
            rv,
            tbs,
            mcs,
            nof_rbs: nof_rbgs,
            tx_slot: self.slot,
            ack_slot,
        });
        if matches!(action, DlHarqAction::Disabled) {
            self.grid.slot_mut(ack_slot).release_pucch(ue.rnti);
            self.grid.slot_mut(self.slot).pdcch.cancel_last_pdcch();
            return Err(AllocError::Other);
        }

        let grid = self.grid.slot_mut(self.slot);
        grid.dl_rbgs |= rbgs;
        grid.dl_prbs |= prbs;
        grid.dl.pdsch.push(PdschGrant {
            rnti: ue.rnti,
            rnti_type: RntiType::C,
            dci,
            rbgs,
            prbs,
            mcs,
            tbs,
            action,
            ack_slot,
        });
        ue.dl_scheduled = true;
        if retx.is_none() {
            let sent = tbs.min(ue.dl_pending_bytes);
            ue.dl_bytes_scheduled += sent;
            ue.dl_pending_bytes -= sent;
        }
        debug!(
            "slot={} rnti={} pid={} PDSCH {} nof_rbgs={} mcs={} tbs={} ack_slot={}",
            self.slot,
            ue.rnti,
            pid,
            if retx.is_some() { "retx" } else { "newtx" },
            nof_rbgs,
            mcs,
            tbs,
            ack_slot
        );
        Ok(())
    }

    /// Schedule a PUSCH for `ue` on `prbs` of the PUSCH slot
    pub fn alloc_pusch(&mut self, ue: &mut SlotUe, prbs: PrbInterval) -> AllocResult<()> {
        if ue.ul_scheduled {
            return Err(AllocError::NoRntiOpportunity);
        }
        let retx = ue.ul_retx;
        let pid = match retx {
            Some(info) => info.pid,
            None => ue.ul_new_pid.ok_or(AllocError::NoRntiOpportunity)?,
        };
        if !self.is_dl_slot() {
            return Err(AllocError::NoCchSpace);
        }
        let pusch_slot = ue.pusch_slot;
        if !self.cell.slot_is_ul(pusch_slot.slot_idx()) {
            return Err(AllocError::NoSchSpace);
        }
        if self.grid.slot_mut(pusch_slot).nof_pusch() >= self.args.max_ul_grants_per_slot {
            return Err(AllocError::NoGrantSpace);
        }
        if prbs.is_empty() || prbs.stop > self.cell.nof_prb() {
            return Err(AllocError::InvalidGrantParams);
        }
        let mask = prbs.to_mask(self.cell.nof_prb() as usize);
        if self.grid.slot_mut(pusch_slot).ul_prbs.intersects(&mask) {
            return Err(AllocError::SchCollision);
        }
        if retx.is_some_and(|info| info.nof_rbs != prbs.len()) {
            debug!("rnti={} pid={} UL retx needs the original number of PRBs", ue.rnti, pid);
            return Err(AllocError::InvalidGrantParams);
        }

        let mcs = retx.map_or(ue.ul_mcs, |info| info.mcs);
        let tbs = match retx {
            Some(info) => info.tbs,
            None => calc_tbs(self.cell.get_ul_nof_res(prbs.len()), mcs, self.args.mcs_table, 1) / 8,
        };
        if tbs == 0 {
            return Err(AllocError::InvalidCoderate);
        }

        let ss_id = ue.params.data_ss_id();
        let aggr_idx = ue.params.ul_aggr_idx();
        let dci = self
            .grid
            .slot_mut(self.slot)
            .pdcch
            .alloc_ul_pdcch(ss_id, aggr_idx, &ue.params)?;

        let ndi = match retx {
            Some(info) => info.ndi,
            None => ue.harq_ul.proc_info(pid).is_some_and(|p| !p.ndi),
        };
        let rv = retx.map_or(0, |info| rv_for_retx(info.nof_retx + 1));
        let action = ue.harq_ul.new_grant_ul(TbGrant {
            rnti: ue.rnti,
            pid,
            ndi,
            rv,
            tbs,
            mcs,
            nof_rbs: prbs.len(),
            tx_slot: pusch_slot,
            ack_slot: pusch_slot,
        });
        if matches!(action, UlHarqAction::Disabled) {
            self.grid.slot_mut(self.slot).pdcch.cancel_last_pdcch();
            return Err(AllocError::Other);
        }

        let grid = self.grid.slot_mut(pusch_slot);
        grid.ul_prbs |= mask;
        grid.ul.pusch.push(PuschGrant {
            rnti: ue.rnti,
            pid,
            dci: Some(dci),
            prbs,
            mcs,
            tbs,
            action,
            msg3: false,
        });
        ue.ul_scheduled = true;
        if retx.is_none() {
            let granted = tbs.min(ue.ul_pending_bytes);
            ue.ul_bytes_scheduled += granted;
            ue.ul_pending_bytes -= granted;
        }
        debug!(
            "slot={} rnti={} pid={} PUSCH {} prbs={}..{} mcs={} tbs={} pusch_slot={}",
            self.slot,
            ue.rnti,
            pid,
            if retx.is_some() { "retx" } else { "newtx" },
            prbs.start,
            prbs.stop,
            mcs,
            tbs,
            pusch_slot
        );
        Ok(())
    }
}
