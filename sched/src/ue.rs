//! UE context
//!
//! Long-lived per-UE state (configuration, buffer status, channel quality,
//! HARQ entities per carrier) and the per-slot [`SlotUe`] view the
//! scheduling policies work on.

use std::collections::BTreeMap;
use std::sync::Arc;

use common::types::{Rnti, SlotPoint};
use tracing::{debug, info};

use crate::cell_params::CellParams;
use crate::config::{SchedArgs, SearchSpaceConfig, SearchSpaceType, UeConfig, MAX_NOF_AGGR_LEVELS};
use crate::harq::{DlHarqEntity, HarqProcInfo, UlHarqEntity};
use crate::pdcch::cce_positions::{cce_positions, ue_hash_sequence};
use crate::tbs::cqi_to_mcs;
use crate::SchedError;

/// Number of logical channel groups (TS 38.321 Section 5.4.5)
pub const NOF_LCGS: usize = 8;
/// Bytes granted on a scheduling request without a buffer status report
pub const SR_GRANT_BYTES: u32 = 256;

/// Search space and CCE candidate tables of a UE on one carrier
#[derive(Debug, Clone)]
pub struct UeCarrierParams {
    rnti: Rnti,
    cc: usize,
    bwp_id: u8,
    data_ss_id: u8,
    dl_aggr_idx: u8,
    ul_aggr_idx: u8,
    search_spaces: Vec<SearchSpaceConfig>,
    /// `(ss id, [slot][aggr_idx])` first CCE of each candidate
    cce_tables: Vec<(u8, Vec<[Vec<u32>; MAX_NOF_AGGR_LEVELS]>)>,
}

impl UeCarrierParams {
    pub fn new(rnti: Rnti, cc: usize, cfg: &UeConfig, cell: &CellParams) -> Result<Self, SchedError> {
        let invalid = |msg: String| SchedError::InvalidConfiguration(format!("rnti={} {}", rnti, msg));

        // Dedicated search spaces replace cell ones with the same id
        let mut search_spaces: Vec<SearchSpaceConfig> = cell
            .cfg()
            .bwp
            .search_spaces
            .iter()
            .filter(|ss| !cfg.search_spaces.iter().any(|d| d.id == ss.id))
            .cloned()
            .collect();
        for ss in &cfg.search_spaces {
            if cell.coreset(ss.coreset_id).is_none() {
                return Err(invalid(format!("search space {} refers to unknown coreset {}", ss.id, ss.coreset_id)));
            }
            search_spaces.push(ss.clone());
        }
        search_spaces.sort_by_key(|ss| ss.id);

        let data_ss = search_spaces
            .iter()
            .find(|ss| ss.id == cfg.data_ss_id)
            .ok_or_else(|| invalid(format!("data search space {} not found", cfg.data_ss_id)))?;
        if !matches!(data_ss.kind, SearchSpaceType::Ue | SearchSpaceType::Common3) {
            return Err(invalid(format!("search space {} cannot carry C-RNTI data", data_ss.id)));
        }
        for aggr_idx in [cfg.dl_aggr_idx, cfg.ul_aggr_idx] {
            if aggr_idx as usize >= MAX_NOF_AGGR_LEVELS {
                return Err(invalid(format!("aggregation index {} out of range", aggr_idx)));
            }
        }

        let nof_slots = cell.nof_slots_per_frame() as usize;
        let cfi = cell.cfi();
        let cce_tables = search_spaces
            .iter()
            .map(|ss| {
                let nof_cces = cell.nof_cce(ss.coreset_id, cfi);
                let ys = if ss.kind.is_common() {
                    vec![0; nof_slots]
                } else {
                    ue_hash_sequence(rnti.value(), ss.coreset_id, nof_slots)
                };
                let per_slot = ys
                    .iter()
                    .enumerate()
                    .map(|(slot_idx, y)| {
                        let mut table: [Vec<u32>; MAX_NOF_AGGR_LEVELS] = Default::default();
                        if cell.slot_is_dl(slot_idx as u32) {
                            for (aggr_idx, locations) in table.iter_mut().enumerate() {
                                *locations =
                                    cce_positions(nof_cces, aggr_idx as u8, ss.nof_candidates[aggr_idx], *y);
                            }
                        }
                        table
                    })
                    .collect();
                (ss.id, per_slot)
            })
            .collect();

        Ok(Self {
            rnti,
            cc,
            bwp_id: cfg.active_bwp,
            data_ss_id: cfg.data_ss_id,
            dl_aggr_idx: cfg.dl_aggr_idx,
            ul_aggr_idx: cfg.ul_aggr_idx,
            search_spaces,
            cce_tables,
        })
    }

    pub fn rnti(&self) -> Rnti {
        self.rnti
    }

    pub fn cc(&self) -> usize {
        self.cc
    }

    /// Active BWP
    pub fn bwp_id(&self) -> u8 {
        self.bwp_id
    }

    /// Search space carrying the data DCIs
    pub fn data_ss_id(&self) -> u8 {
        self.data_ss_id
    }

    pub fn dl_aggr_idx(&self) -> u8 {
        self.dl_aggr_idx
    }

    pub fn ul_aggr_idx(&self) -> u8 {
        self.ul_aggr_idx
    }

    pub fn get_ss(&self, ss_id: u8) -> Option<&SearchSpaceConfig> {
        self.search_spaces.iter().find(|ss| ss.id == ss_id)
    }

    /// Candidate CCE positions of the UE in a search space and slot
    pub fn cce_positions(&self, ss_id: u8, slot_idx: u32, aggr_idx: u8) -> &[u32] {
        self.cce_tables
            .iter()
            .find(|(id, _)| *id == ss_id)
            .and_then(|(_, slots)| slots.get(slot_idx as usize % slots.len().max(1)))
            .and_then(|table| table.get(aggr_idx as usize))
            .map(|locations| locations.as_slice())
            .unwrap_or(&[])
    }
}

/// UE state on one carrier
#[derive(Debug)]
pub struct UeCarrier {
    pub params: Arc<UeCarrierParams>,
    pub harq_dl: Arc<DlHarqEntity>,
    pub harq_ul: Arc<UlHarqEntity>,
    pub active: bool,
    /// Last wideband CQI, 0 until the first report
    pub dl_cqi: u8,
    /// Last UL channel quality in CQI units, 0 until the first estimate
    pub ul_cqi: u8,
    /// Exponential average of the DL bytes scheduled per slot
    pub avg_dl_rate: f32,
    /// Exponential average of the UL bytes scheduled per slot
    pub avg_ul_rate: f32,
}

/// UE context
#[derive(Debug)]
pub struct Ue {
    rnti: Rnti,
    cfg: UeConfig,
    carriers: BTreeMap<usize, UeCarrier>,
    /// Pending DL bytes per logical channel
    dl_lch_bytes: BTreeMap<u8, u32>,
    /// Pending UL bytes per logical channel group
    ul_lcg_bytes: [u32; NOF_LCGS],
    pending_sr: bool,
}

impl Ue {
    pub fn new(rnti: Rnti, cfg: UeConfig, cells: &[Arc<CellParams>], args: &SchedArgs) -> Result<Self, SchedError> {
        let mut ue = Self {
            rnti,
            cfg: UeConfig::default(),
            carriers: BTreeMap::new(),
            dl_lch_bytes: BTreeMap::new(),
            ul_lcg_bytes: [0; NOF_LCGS],
            pending_sr: false,
        };
        ue.set_cfg(cfg, cells, args)?;
        Ok(ue)
    }

    /// Apply a new configuration
    ///
    /// HARQ entities of carriers that stay configured are reset, not
    /// replaced, so feedback handles keep pointing at them.
    pub fn set_cfg(&mut self, cfg: UeConfig, cells: &[Arc<CellParams>], args: &SchedArgs) -> Result<(), SchedError> {
        if cfg.carriers.is_empty() {
            return Err(SchedError::InvalidConfiguration(format!("rnti={} has no carrier", self.rnti)));
        }
        let mut params = BTreeMap::new();
        for carrier in &cfg.carriers {
            let cell = cells.get(carrier.cc).ok_or(SchedError::UnknownCell(carrier.cc))?;
            params.insert(carrier.cc, (carrier.active, UeCarrierParams::new(self.rnti, carrier.cc, &cfg, cell)?));
        }

        let nof_procs = args.nof_harq_procs as usize;
        let mut carriers = BTreeMap::new();
        for (cc, (active, carrier_params)) in params {
            let carrier = match self.carriers.remove(&cc) {
                Some(mut existing) => {
                    existing.harq_dl.set_config(nof_procs, args.max_harq_retx, args.harq_feedback_timeout);
                    existing.harq_ul.set_config(nof_procs, args.max_harq_retx, args.harq_feedback_timeout);
                    existing.params = Arc::new(carrier_params);
                    existing.active = active;
                    existing
                }
                None => UeCarrier {
                    params: Arc::new(carrier_params),
                    harq_dl: Arc::new(DlHarqEntity::new(
                        self.rnti,
                        cc,
                        nof_procs,
                        args.max_harq_retx,
                        args.harq_feedback_timeout,
                    )),
                    harq_ul: Arc::new(UlHarqEntity::new(
                        self.rnti,
                        cc,
                        nof_procs,
                        args.max_harq_retx,
                        args.harq_feedback_timeout,
                    )),
                    active,
                    dl_cqi: 0,
                    ul_cqi: 0,
                    avg_dl_rate: 0.0,
                    avg_ul_rate: 0.0,
                },
            };
            carriers.insert(cc, carrier);
        }
        for cc in self.carriers.keys() {
            debug!("rnti={} cc={} carrier removed", self.rnti, cc);
        }
        self.carriers = carriers;
        self.cfg = cfg;
        info!("rnti={} configured with {} carrier(s)", self.rnti, self.carriers.len());
        Ok(())
    }

    pub fn rnti(&self) -> Rnti {
        self.rnti
    }

    pub fn cfg(&self) -> &UeConfig {
        &self.cfg
    }

    pub fn carrier(&self, cc: usize) -> Option<&UeCarrier> {
        self.carriers.get(&cc)
    }

    pub fn carrier_mut(&mut self, cc: usize) -> Option<&mut UeCarrier> {
        self.carriers.get_mut(&cc)
    }

    pub fn carriers(&self) -> impl Iterator<Item = (&usize, &UeCarrier)> {
        self.carriers.iter()
    }

    /// RLC buffer occupancy of a DL logical channel
    pub fn dl_buffer_state(&mut self, lcid: u8, bytes: u32) {
        self.dl_lch_bytes.insert(lcid, bytes);
    }

    /// Buffer status report for a logical channel group
    pub fn ul_bsr(&mut self, lcg: usize, bytes: u32) {
        if let Some(slot) = self.ul_lcg_bytes.get_mut(lcg) {
            *slot = bytes;
            self.pending_sr = false;
        }
    }

    pub fn ul_sr(&mut self) {
        self.pending_sr = true;
    }

    pub fn has_pending_sr(&self) -> bool {
        self.pending_sr
    }

    pub fn dl_pending_bytes(&self) -> u32 {
        self.dl_lch_bytes.values().sum()
    }

    /// UL bytes to grant, a scheduling request counts for [`SR_GRANT_BYTES`]
    pub fn ul_pending_bytes(&self) -> u32 {
        let bsr: u32 = self.ul_lcg_bytes.iter().sum();
        if bsr == 0 && self.pending_sr {
            SR_GRANT_BYTES
        } else {
            bsr
        }
    }

    /// Remove bytes sent on the DL, lowest LCID first
    pub fn consume_dl(&mut self, mut bytes: u32) {
        for pending in self.dl_lch_bytes.values_mut() {
            let taken = bytes.min(*pending);
            *pending -= taken;
            bytes -= taken;
            if bytes == 0 {
                break;
            }
        }
        self.dl_lch_bytes.retain(|_, pending| *pending > 0);
    }

    /// Remove bytes granted on the UL, lowest LCG first
    pub fn consume_ul(&mut self, mut bytes: u32) {
        self.pending_sr = false;
        for pending in self.ul_lcg_bytes.iter_mut() {
            let taken = bytes.min(*pending);
            *pending -= taken;
            bytes -= taken;
        }
    }

    /// Per-slot view of the UE on carrier `cc`, `None` when the carrier is inactive
    pub fn make_slot_ue(&self, cc: usize, slot: SlotPoint, cell: &CellParams, args: &SchedArgs) -> Option<SlotUe> {
        let carrier = self.carriers.get(&cc).filter(|c| c.active)?;
        let slot_idx = slot.slot_idx();
        let dl_mcs = args
            .fixed_dl_mcs
            .or_else(|| cqi_to_mcs(carrier.dl_cqi, args.mcs_table))
            .unwrap_or(args.common_mcs);
        let ul_mcs = args
            .fixed_ul_mcs
            .or_else(|| cqi_to_mcs(carrier.ul_cqi, args.mcs_table))
            .unwrap_or(args.common_mcs);

        let dl_retx = carrier
            .harq_dl
            .find_pending_retx()
            .and_then(|pid| carrier.harq_dl.proc_info(pid));
        let ul_retx = carrier
            .harq_ul
            .find_pending_retx()
            .and_then(|pid| carrier.harq_ul.proc_info(pid));

        Some(SlotUe {
            rnti: self.rnti,
            cc,
            params: carrier.params.clone(),
            harq_dl: carrier.harq_dl.clone(),
            harq_ul: carrier.harq_ul.clone(),
            pdsch_slot: slot,
            ack_slot: slot + cell.k1(slot_idx),
            pusch_slot: slot + cell.k2(slot_idx),
            dl_pending_bytes: self.dl_pending_bytes(),
            ul_pending_bytes: self.ul_pending_bytes(),
            dl_mcs,
            ul_mcs,
            dl_retx,
            ul_retx,
            dl_new_pid: carrier.harq_dl.find_empty(),
            ul_new_pid: carrier.harq_ul.find_empty(),
            avg_dl_rate: carrier.avg_dl_rate,
            avg_ul_rate: carrier.avg_ul_rate,
            dl_scheduled: false,
            ul_scheduled: false,
            dl_bytes_scheduled: 0,
            ul_bytes_scheduled: 0,
        })
    }

    /// Fold the outcome of a slot back into the UE context
    pub fn apply_slot_ue(&mut self, slot_ue: &SlotUe, pf_alpha: f32) {
        self.consume_dl(slot_ue.dl_bytes_scheduled);
        if slot_ue.ul_scheduled {
            self.consume_ul(slot_ue.ul_bytes_scheduled);
        }
        if let Some(carrier) = self.carriers.get_mut(&slot_ue.cc) {
            carrier.avg_dl_rate = (1.0 - pf_alpha) * carrier.avg_dl_rate + pf_alpha * slot_ue.dl_bytes_scheduled as f32;
            carrier.avg_ul_rate = (1.0 - pf_alpha) * carrier.avg_ul_rate + pf_alpha * slot_ue.ul_bytes_scheduled as f32;
        }
    }
}

/// Schedulable state of one UE in one slot
#[derive(Debug, Clone)]
pub struct SlotUe {
    pub rnti: Rnti,
    pub cc: usize,
    pub params: Arc<UeCarrierParams>,
    pub harq_dl: Arc<DlHarqEntity>,
    pub harq_ul: Arc<UlHarqEntity>,
    /// Slot of the PDSCH and of the PDCCHs
    pub pdsch_slot: SlotPoint,
    /// Slot of the HARQ-ACK for a PDSCH in this slot
    pub ack_slot: SlotPoint,
    /// Slot of a PUSCH granted in this slot
    pub pusch_slot: SlotPoint,
    pub dl_pending_bytes: u32,
    pub ul_pending_bytes: u32,
    pub dl_mcs: u8,
    pub ul_mcs: u8,
    /// DL process waiting for a retransmission
    pub dl_retx: Option<HarqProcInfo>,
    /// UL process waiting for a retransmission
    pub ul_retx: Option<HarqProcInfo>,
    pub dl_new_pid: Option<usize>,
    pub ul_new_pid: Option<usize>,
    pub avg_dl_rate: f32,
    pub avg_ul_rate: f32,
    pub dl_scheduled: bool,
    pub ul_scheduled: bool,
    /// New DL bytes granted this slot
    pub dl_bytes_scheduled: u32,
    /// New UL bytes granted this slot
    pub ul_bytes_scheduled: u32,
}

impl SlotUe {
    /// Whether a new DL transmission is possible and useful
    pub fn wants_dl_newtx(&self) -> bool {
        !self.dl_scheduled && self.dl_pending_bytes > 0 && self.dl_new_pid.is_some()
    }

    /// Whether a new UL transmission is possible and useful
    pub fn wants_ul_newtx(&self) -> bool {
        !self.ul_scheduled && self.ul_pending_bytes > 0 && self.ul_new_pid.is_some()
    }
}

/// Per-slot UE view, ordered by RNTI
pub type SlotUeMap = BTreeMap<Rnti, SlotUe>;
