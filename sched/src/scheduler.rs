//! Scheduler front-end
//!
//! Owns the cells, the UE contexts and the resource grids. The slot thread
//! calls [`Scheduler::run_slot`] once per slot and carrier; inside a slot
//! the order is RAR, then SI, then UE downlink, then UE uplink.

use std::collections::BTreeMap;
use std::sync::Arc;

use common::types::{Rnti, SlotPoint};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cell_params::CellParams;
use crate::config::{CellConfig, SchedArgs, UeCarrierConfig, UeConfig};
use crate::events::{FeedbackHandle, RachInfo, SchedEvent};
use crate::harq::HarqMetrics;
use crate::policy::{make_policy, SchedPolicy};
use crate::result::SlotResult;
use crate::slot_alloc::{BwpSlotAllocator, Msg3Request, ResourceGrid};
use crate::ue::{SlotUeMap, Ue};
use crate::SchedError;

/// Counters of one cell
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CellMetrics {
    pub cc: usize,
    pub nof_slots: u64,
    pub pdsch_grants: u64,
    pub pusch_grants: u64,
    pub si_grants: u64,
    pub rar_grants: u64,
    pub msg3_grants: u64,
    /// RARs dropped because the response window expired
    pub rar_timeouts: u64,
}

/// Per-UE metrics on one carrier
#[derive(Debug, Clone, Serialize)]
pub struct UeMetrics {
    pub rnti: Rnti,
    pub cc: usize,
    pub dl_cqi: u8,
    pub ul_cqi: u8,
    pub dl_pending_bytes: u32,
    pub ul_pending_bytes: u32,
    pub avg_dl_rate: f32,
    pub avg_ul_rate: f32,
    pub dl_harq: HarqMetrics,
    pub ul_harq: HarqMetrics,
}

/// Snapshot of the scheduler metrics
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedMetrics {
    pub cells: Vec<CellMetrics>,
    pub ues: Vec<UeMetrics>,
}

struct CellCtx {
    params: Arc<CellParams>,
    grid: ResourceGrid,
    policy: Box<dyn SchedPolicy>,
    /// RACHs waiting for their RAR
    pending_rars: Vec<RachInfo>,
    metrics: CellMetrics,
}

/// gNB MAC scheduler
pub struct Scheduler {
    args: SchedArgs,
    cells: Vec<CellCtx>,
    ues: BTreeMap<Rnti, Ue>,
    feedback: FeedbackHandle,
}

impl Scheduler {
    pub fn new(args: SchedArgs) -> Self {
        Self {
            args,
            cells: Vec::new(),
            ues: BTreeMap::new(),
            feedback: FeedbackHandle::new(),
        }
    }

    pub fn args(&self) -> &SchedArgs {
        &self.args
    }

    /// Configure the carriers; cell index is the position in `cfgs`
    ///
    /// Either every cell is accepted or nothing changes.
    pub fn cell_cfg(&mut self, cfgs: &[CellConfig]) -> Result<(), SchedError> {
        if cfgs.is_empty() {
            return Err(SchedError::InvalidConfiguration("no cell configured".into()));
        }
        if !self.ues.is_empty() {
            return Err(SchedError::InvalidState("cells cannot change while UEs are attached".into()));
        }
        let params = cfgs
            .iter()
            .enumerate()
            .map(|(cc, cfg)| CellParams::new(cc, cfg, &self.args).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;
        self.cells = params
            .into_iter()
            .map(|params| CellCtx {
                grid: ResourceGrid::new(params.clone()),
                policy: make_policy(self.args.policy),
                pending_rars: Vec::new(),
                metrics: CellMetrics { cc: params.cc(), ..Default::default() },
                params,
            })
            .collect();
        info!("configured {} cell(s) policy={:?}", self.cells.len(), self.args.policy);
        Ok(())
    }

    pub fn nof_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn cell(&self, cc: usize) -> Option<&Arc<CellParams>> {
        self.cells.get(cc).map(|c| &c.params)
    }

    fn cell_params(&self) -> Vec<Arc<CellParams>> {
        self.cells.iter().map(|c| c.params.clone()).collect()
    }

    /// Add a UE or reconfigure an existing one
    pub fn ue_cfg(&mut self, rnti: Rnti, cfg: UeConfig) -> Result<(), SchedError> {
        if self.cells.is_empty() {
            return Err(SchedError::NotInitialized);
        }
        if !rnti.is_crnti_range() {
            return Err(SchedError::InvalidConfiguration(format!("rnti={} is not a C-RNTI", rnti)));
        }
        let cells = self.cell_params();
        match self.ues.get_mut(&rnti) {
            Some(ue) => ue.set_cfg(cfg, &cells, &self.args)?,
            None => {
                let ue = Ue::new(rnti, cfg, &cells, &self.args)?;
                self.ues.insert(rnti, ue);
            }
        }
        self.feedback.unregister(rnti);
        if let Some(ue) = self.ues.get(&rnti) {
            for (cc, carrier) in ue.carriers() {
                self.feedback
                    .register(rnti, *cc, carrier.harq_dl.clone(), carrier.harq_ul.clone());
            }
        }
        Ok(())
    }

    /// Remove a UE and drop its HARQ state
    pub fn ue_rem(&mut self, rnti: Rnti) -> Result<(), SchedError> {
        self.ues.remove(&rnti).ok_or(SchedError::UnknownUe(rnti))?;
        self.feedback.unregister(rnti);
        for cell in &mut self.cells {
            cell.pending_rars.retain(|rar| rar.tc_rnti != rnti);
        }
        info!("rnti={} removed", rnti);
        Ok(())
    }

    pub fn ue(&self, rnti: Rnti) -> Option<&Ue> {
        self.ues.get(&rnti)
    }

    pub fn nof_ues(&self) -> usize {
        self.ues.len()
    }

    /// Handle for feedback from PHY worker threads
    pub fn feedback_handle(&self) -> FeedbackHandle {
        self.feedback.clone()
    }

    fn apply_events(&mut self) {
        for event in self.feedback.drain() {
            match event {
                SchedEvent::Rach(info) => self.handle_rach(info),
                SchedEvent::DlBufferState { rnti, lcid, bytes } => match self.ues.get_mut(&rnti) {
                    Some(ue) => ue.dl_buffer_state(lcid, bytes),
                    None => warn!("rnti={} buffer state for unknown UE", rnti),
                },
                SchedEvent::UlBsr { rnti, lcg, bytes } => match self.ues.get_mut(&rnti) {
                    Some(ue) => ue.ul_bsr(lcg, bytes),
                    None => warn!("rnti={} BSR for unknown UE", rnti),
                },
                SchedEvent::UlSr { rnti } => match self.ues.get_mut(&rnti) {
                    Some(ue) => ue.ul_sr(),
                    None => warn!("rnti={} SR for unknown UE", rnti),
                },
                SchedEvent::DlCqi { rnti, cc, cqi } => {
                    match self.ues.get_mut(&rnti).and_then(|ue| ue.carrier_mut(cc)) {
                        Some(carrier) => carrier.dl_cqi = cqi,
                        None => warn!("rnti={} cc={} CQI for unknown UE carrier", rnti, cc),
                    }
                }
                SchedEvent::UlCqi { rnti, cc, cqi } => {
                    match self.ues.get_mut(&rnti).and_then(|ue| ue.carrier_mut(cc)) {
                        Some(carrier) => carrier.ul_cqi = cqi,
                        None => warn!("rnti={} cc={} UL CQI for unknown UE carrier", rnti, cc),
                    }
                }
            }
        }
    }

    fn handle_rach(&mut self, info: RachInfo) {
        if info.cc >= self.cells.len() {
            warn!("cc={} RACH on unknown cell", info.cc);
            return;
        }
        if self.ues.contains_key(&info.tc_rnti) {
            warn!("rnti={} RACH with a TC-RNTI already in use", info.tc_rnti);
            return;
        }
        let cfg = UeConfig {
            carriers: vec![UeCarrierConfig { cc: info.cc, active: true }],
            ..UeConfig::default()
        };
        if let Err(e) = self.ue_cfg(info.tc_rnti, cfg) {
            warn!("rnti={} cannot create UE for RACH: {}", info.tc_rnti, e);
            return;
        }
        info!(
            "cc={} RACH preamble={} slot={} tc-rnti={} ra-rnti={}",
            info.cc,
            info.preamble_idx,
            info.prach_slot,
            info.tc_rnti,
            info.ra_rnti()
        );
        self.cells[info.cc].pending_rars.push(info);
    }

    /// Schedule slot `slot` of carrier `cc`
    pub fn run_slot(&mut self, slot: SlotPoint, cc: usize) -> Result<SlotResult, SchedError> {
        if self.cells.is_empty() {
            return Err(SchedError::NotInitialized);
        }
        if cc >= self.cells.len() {
            return Err(SchedError::UnknownCell(cc));
        }
        let numerology = self.cells[cc].params.scs().numerology();
        if slot.numerology() != numerology {
            return Err(SchedError::InvalidState(format!(
                "slot numerology {} does not match cc={} numerology {}",
                slot.numerology(),
                cc,
                numerology
            )));
        }

        self.apply_events();

        let args = &self.args;
        let ues = &mut self.ues;
        let cell = &mut self.cells[cc];
        for ue in ues.values() {
            if let Some(carrier) = ue.carrier(cc) {
                carrier.harq_dl.clear_stale(slot);
                carrier.harq_ul.clear_stale(slot);
            }
        }

        let mut slot_ues: SlotUeMap = ues
            .values()
            .filter_map(|ue| ue.make_slot_ue(cc, slot, &cell.params, args))
            .map(|sue| (sue.rnti, sue))
            .collect();

        let mut expired = Vec::new();
        {
            let mut alloc = BwpSlotAllocator::new(&mut cell.grid, args, slot);
            if alloc.is_dl_slot() {
                expired = sched_rars(&mut alloc, args, ues, &mut cell.pending_rars, &mut cell.metrics);
                sched_si(&mut alloc, args, &cell.params, &mut cell.metrics);
            }
            cell.policy.sched_dl_users(&mut slot_ues, &mut alloc);
            cell.policy.sched_ul_users(&mut slot_ues, &mut alloc);
        }

        for sue in slot_ues.values() {
            if sue.dl_scheduled {
                cell.metrics.pdsch_grants += 1;
            }
            if sue.ul_scheduled {
                cell.metrics.pusch_grants += 1;
            }
            if let Some(ue) = ues.get_mut(&sue.rnti) {
                ue.apply_slot_ue(sue, args.pf_alpha);
            }
        }
        cell.metrics.nof_slots += 1;

        let result = cell.grid.take_result(slot);
        debug!(
            "cc={} slot={} pdcch_dl={} pdcch_ul={} pdsch={} si={} rar={} pusch={} pucch={}",
            cc,
            slot,
            result.dl.pdcch_dl.len(),
            result.dl.pdcch_ul.len(),
            result.dl.pdsch.len(),
            result.dl.si.len(),
            result.dl.rar.len(),
            result.ul.pusch.len(),
            result.ul.pucch.len()
        );

        // a TC-RNTI whose RAR never went out is free for the next RACH
        for rnti in expired {
            if let Err(e) = self.ue_rem(rnti) {
                debug!("rnti={} expired TC-RNTI already gone: {}", rnti, e);
            }
        }
        Ok(result)
    }

    pub fn get_metrics(&self) -> SchedMetrics {
        let ues = self
            .ues
            .values()
            .flat_map(|ue| {
                ue.carriers().map(move |(cc, carrier)| UeMetrics {
                    rnti: ue.rnti(),
                    cc: *cc,
                    dl_cqi: carrier.dl_cqi,
                    ul_cqi: carrier.ul_cqi,
                    dl_pending_bytes: ue.dl_pending_bytes(),
                    ul_pending_bytes: ue.ul_pending_bytes(),
                    avg_dl_rate: carrier.avg_dl_rate,
                    avg_ul_rate: carrier.avg_ul_rate,
                    dl_harq: carrier.harq_dl.get_metrics(),
                    ul_harq: carrier.harq_ul.get_metrics(),
                })
            })
            .collect();
        SchedMetrics {
            cells: self.cells.iter().map(|c| c.metrics).collect(),
            ues,
        }
    }

    pub fn reset_metrics(&mut self) {
        for cell in &mut self.cells {
            cell.metrics = CellMetrics { cc: cell.metrics.cc, ..Default::default() };
        }
        for ue in self.ues.values() {
            for (_, carrier) in ue.carriers() {
                carrier.harq_dl.reset_metrics();
                carrier.harq_ul.reset_metrics();
            }
        }
    }
}

/// Answer pending preambles, one RAR per RA-RNTI
///
/// Returns the TC-RNTIs whose response window expired.
fn sched_rars(
    alloc: &mut BwpSlotAllocator<'_>,
    args: &SchedArgs,
    ues: &BTreeMap<Rnti, Ue>,
    pending: &mut Vec<RachInfo>,
    metrics: &mut CellMetrics,
) -> Vec<Rnti> {
    let slot = alloc.slot();
    let cc = alloc.cell().cc();
    let mut expired = Vec::new();
    pending.retain(|rar| {
        if slot - rar.prach_slot <= args.rar_window_slots as i32 {
            return true;
        }
        warn!("rnti={} RAR window expired for preamble={}", rar.tc_rnti, rar.preamble_idx);
        metrics.rar_timeouts += 1;
        expired.push(rar.tc_rnti);
        false
    });

    let mut ra_rntis: Vec<Rnti> = pending
        .iter()
        .filter(|rar| slot > rar.prach_slot)
        .map(|rar| rar.ra_rnti())
        .collect();
    ra_rntis.sort();
    ra_rntis.dedup();
    for ra_rnti in ra_rntis {
        let requests: Vec<Msg3Request> = pending
            .iter()
            .filter(|rar| rar.ra_rnti() == ra_rnti && slot > rar.prach_slot)
            .filter_map(|rar| {
                let carrier = ues.get(&rar.tc_rnti)?.carrier(cc)?;
                Some(Msg3Request {
                    tc_rnti: rar.tc_rnti,
                    preamble_idx: rar.preamble_idx,
                    harq_ul: carrier.harq_ul.clone(),
                })
            })
            .collect();
        if requests.is_empty() {
            continue;
        }
        let bytes = crate::slot_alloc::RAR_BYTES_PER_GRANT * requests.len() as u32;
        let prbs = alloc.dl_prbs_for_bytes(args.common_mcs, bytes);
        match alloc.alloc_rar_and_msg3(ra_rnti, args.rar_aggr_idx, prbs, &requests) {
            Ok(served) => {
                metrics.rar_grants += 1;
                metrics.msg3_grants += served.len() as u64;
                pending.retain(|rar| !served.contains(&rar.tc_rnti));
            }
            Err(e) => debug!("slot={} ra-rnti={} RAR postponed: {}", slot, ra_rnti, e),
        }
    }
    expired
}

/// Broadcast the SI messages due in this slot
fn sched_si(alloc: &mut BwpSlotAllocator<'_>, args: &SchedArgs, cell: &CellParams, metrics: &mut CellMetrics) {
    let slot = alloc.slot();
    for (si_idx, si) in cell.cfg().si.iter().enumerate() {
        if slot.sfn() % si.period_frames != 0 || slot.slot_idx() != si.slot_idx {
            continue;
        }
        let prbs = alloc.dl_prbs_for_bytes(args.common_mcs, si.len_bytes);
        match alloc.alloc_si(args.si_aggr_idx, si_idx, 0, prbs) {
            Ok(()) => metrics.si_grants += 1,
            Err(e) => warn!("slot={} SI {} not scheduled: {}", slot, si_idx, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_cell_config;

    fn scheduler() -> Scheduler {
        let mut sched = Scheduler::new(SchedArgs::default());
        sched.cell_cfg(&[default_cell_config()]).unwrap();
        sched
    }

    fn slot(count: u32) -> SlotPoint {
        SlotPoint::from_count(0, count).unwrap()
    }

    #[test]
    fn test_lifecycle_errors() {
        let mut sched = Scheduler::new(SchedArgs::default());
        assert_eq!(sched.run_slot(slot(0), 0).unwrap_err(), SchedError::NotInitialized);
        assert_eq!(sched.ue_cfg(Rnti(0x4601), UeConfig::default()), Err(SchedError::NotInitialized));
        let mut bad = default_cell_config();
        bad.nof_prb = 51;
        assert!(sched.cell_cfg(&[bad]).is_err());
        assert_eq!(sched.nof_cells(), 0);

        let mut sched = scheduler();
        assert_eq!(sched.run_slot(slot(0), 1).unwrap_err(), SchedError::UnknownCell(1));
        let wrong_mu = SlotPoint::from_count(1, 0).unwrap();
        assert!(matches!(sched.run_slot(wrong_mu, 0), Err(SchedError::InvalidState(_))));
        assert_eq!(sched.ue_rem(Rnti(0x4601)), Err(SchedError::UnknownUe(Rnti(0x4601))));
        sched.ue_cfg(Rnti(0x4601), UeConfig::default()).unwrap();
        assert!(matches!(sched.cell_cfg(&[default_cell_config()]), Err(SchedError::InvalidState(_))));
    }

    #[test]
    fn test_si_scheduled_at_period() {
        let mut sched = scheduler();
        // SI every 2 frames in slot 1
        assert_eq!(sched.run_slot(slot(1), 0).unwrap().dl.si.len(), 1);
        assert!(sched.run_slot(slot(11), 0).unwrap().dl.si.is_empty());
        assert_eq!(sched.run_slot(slot(21), 0).unwrap().dl.si.len(), 1);
        assert_eq!(sched.get_metrics().cells[0].si_grants, 2);
    }

    #[test]
    fn test_dl_data_and_ack() {
        let mut sched = scheduler();
        let rnti = Rnti(0x4601);
        sched.ue_cfg(rnti, UeConfig::default()).unwrap();
        let feedback = sched.feedback_handle();
        feedback.dl_buffer_state(rnti, 4, 200);
        feedback.dl_cqi(rnti, 0, 12);

        let result = sched.run_slot(slot(2), 0).unwrap();
        let pdsch = result.pdsch_for(rnti).unwrap();
        let tb = pdsch.action.tb().cloned().unwrap();
        assert!(tb.new_tx);
        assert_eq!(sched.ue(rnti).unwrap().dl_pending_bytes(), 200u32.saturating_sub(pdsch.tbs));

        feedback.dl_ack_info(rnti, 0, tb.pid, true).unwrap();
        let metrics = sched.get_metrics();
        assert_eq!(metrics.ues[0].dl_harq.rx_ok, 1);
        assert_eq!(metrics.ues[0].dl_cqi, 12);
        assert_eq!(metrics.cells[0].pdsch_grants, 1);
        assert!(serde_json::to_string(&metrics).unwrap().contains("\"rx_ok\":1"));
    }

    #[test]
    fn test_rach_to_msg3() {
        let mut sched = scheduler();
        let feedback = sched.feedback_handle();
        let tc_rnti = Rnti(0x4650);
        let info = RachInfo { cc: 0, prach_slot: slot(3), preamble_idx: 12, tc_rnti };
        feedback.dl_rach_info(info);

        let result = sched.run_slot(slot(4), 0).unwrap();
        assert!(sched.ue(tc_rnti).is_some());
        let rar = &result.dl.rar[0];
        assert_eq!(rar.ra_rnti, info.ra_rnti());
        assert_eq!(rar.msg3[0].tc_rnti, tc_rnti);
        assert_eq!(sched.get_metrics().cells[0].msg3_grants, 1);

        let msg3_slot = rar.msg3[0].pusch_slot;
        let mut msg3 = None;
        for count in 5..=msg3_slot.count() {
            let r = sched.run_slot(slot(count), 0).unwrap();
            assert!(r.dl.rar.is_empty());
            if let Some(p) = r.pusch_for(tc_rnti) {
                msg3 = Some(p.clone());
            }
        }
        let msg3 = msg3.unwrap();
        assert!(msg3.msg3);
        let payload = bytes::Bytes::from_static(b"ccch");
        let delivered = feedback
            .ul_crc_info(tc_rnti, 0, msg3.pid, true, Some(payload.clone()))
            .unwrap();
        assert_eq!(delivered, Some(payload));
    }

    #[test]
    fn test_rar_window_expiry() {
        let mut args = SchedArgs::default();
        args.rar_window_slots = 2;
        let mut sched = Scheduler::new(args);
        sched.cell_cfg(&[default_cell_config()]).unwrap();
        sched
            .feedback_handle()
            .dl_rach_info(RachInfo { cc: 0, prach_slot: slot(1), preamble_idx: 0, tc_rnti: Rnti(0x4650) });
        // first slot after the window
        let result = sched.run_slot(slot(4), 0).unwrap();
        assert!(result.dl.rar.is_empty());
        assert_eq!(sched.get_metrics().cells[0].rar_timeouts, 1);
        assert!(sched.ue(Rnti(0x4650)).is_none());
        assert_eq!(sched.nof_ues(), 0);
    }

    #[test]
    fn test_ue_rem_unregisters_feedback() {
        let mut sched = scheduler();
        let rnti = Rnti(0x4601);
        sched.ue_cfg(rnti, UeConfig::default()).unwrap();
        let feedback = sched.feedback_handle();
        assert!(feedback.dl_ack_info(rnti, 0, 0, true).is_ok());
        sched.ue_rem(rnti).unwrap();
        assert_eq!(feedback.dl_ack_info(rnti, 0, 0, true), Err(SchedError::UnknownUe(rnti)));
        assert_eq!(sched.nof_ues(), 0);
    }
}
