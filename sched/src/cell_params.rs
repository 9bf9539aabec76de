//! Cell Parameter Table
//!
//! Everything the per-slot code needs about the cell geometry is derived here
//! once, at cell setup: RBG size, slot directions and HARQ timing, common
//! search-space CCE tables and the PDSCH resource-element table. After
//! construction the table is read-only and shared through `Arc`.

use std::collections::HashSet;

use common::bitmask::{PrbInterval, PrbMask, RbgMask};
use common::types::{Bandwidth, DuplexMode, Pci, SubcarrierSpacing};
use common::utils::ceil_div;
use tracing::{debug, error, info};

use crate::config::{
    CellConfig, CoresetConfig, RbgConfig, SchedArgs, SearchSpaceConfig, SearchSpaceType,
    CORESET_FREQ_RES_BITS, CORESET_PRBS_PER_GROUP, MAX_CORESET_DURATION, MAX_NOF_AGGR_LEVELS,
    MAX_NOF_SEARCH_SPACES,
};
use crate::pdcch::cce_positions::{cce_positions, CceLocationTable, MAX_NOF_CFI};
use crate::SchedError;

/// OFDM symbols per slot, normal cyclic prefix
pub const NOF_SYMBOLS_PER_SLOT: u32 = 14;
/// Subcarriers per PRB
pub const NOF_SUBCARRIERS_PER_PRB: u32 = 12;
/// PUSCH REs per PRB: 14 symbols minus 2 DMRS symbols
pub const UL_NOF_RE_PER_PRB: u32 = 144;
/// Size of the per-slot resource grid ring
pub const SLOT_RING_SIZE: usize = 16;
/// Number of PRBs of an SS/PBCH block
const SSB_NOF_PRB: u32 = 20;
/// Symbols 2..=5 carry the SS/PBCH block
const SSB_SYMBOLS: std::ops::RangeInclusive<u32> = 2..=5;
/// Last DMRS position of a PDSCH mapping type A over a full slot
const DMRS_ADDITIONAL_SYMBOL: u32 = 11;
/// Maximum number of HARQ processes per UE and direction
const MAX_NOF_HARQ_PROCS: u8 = 16;

/// Msg3 extra delay Δ (TS 38.214 Table 6.1.2.1.1-5)
fn msg3_delta(numerology: u8) -> u32 {
    match numerology {
        0 => 2,
        1 => 3,
        2 => 4,
        _ => 6,
    }
}

/// Nominal RBG size P (TS 38.214 Table 5.1.2.2.1-1)
pub fn nominal_rbg_size(nof_prb: u32, config: RbgConfig) -> u32 {
    let idx = match nof_prb {
        0..=36 => 0,
        37..=72 => 1,
        73..=144 => 2,
        _ => 3,
    };
    match config {
        RbgConfig::Config1 => [2, 4, 8, 16][idx],
        RbgConfig::Config2 => [4, 8, 16, 16][idx],
    }
}

/// Per-slot derived parameters, indexed by slot within the frame
#[derive(Debug, Clone, Default)]
struct SlotParams {
    is_dl: bool,
    is_ul: bool,
    /// PDSCH to HARQ-ACK delay, valid for DL slots
    k1: u32,
    /// PDCCH to PUSCH delay, valid for DL slots
    k2: u32,
    /// RAR PDCCH to Msg3 PUSCH delay, valid for DL slots
    msg3_k: u32,
    /// PDSCH REs prefix sum over PRBs, per CFI
    dl_re_prefix: [Vec<u32>; MAX_NOF_CFI],
}

/// Common search-space CCE table
#[derive(Debug, Clone)]
struct CommonSsTable {
    ss_id: u8,
    /// Indexed by slot within the frame
    slots: Vec<CceLocationTable>,
}

/// Static per-cell parameters derived from a [`CellConfig`]
#[derive(Debug, Clone)]
pub struct CellParams {
    cc: usize,
    cfg: CellConfig,
    nof_prb: u32,
    p: u32,
    nof_rbgs: u32,
    cfi: u8,
    slots: Vec<SlotParams>,
    /// CCEs per coreset, `(coreset id, [cfi - 1])`
    coreset_cces: Vec<(u8, [u32; MAX_NOF_CFI])>,
    common_tables: Vec<CommonSsTable>,
}

impl CellParams {
    /// Validate `cfg` and build every table for cell index `cc`
    pub fn new(cc: usize, cfg: &CellConfig, args: &SchedArgs) -> Result<Self, SchedError> {
        let invalid = |msg: String| {
            error!("cc={} invalid cell configuration: {}", cc, msg);
            SchedError::InvalidConfiguration(msg)
        };

        if Pci::new(cfg.pci).is_none() {
            return Err(invalid(format!("invalid PCI {}", cfg.pci)));
        }
        if Bandwidth::from_nof_prb(cfg.nof_prb, cfg.scs).is_none() {
            return Err(invalid(format!(
                "unsupported number of PRBs {} for {:?}",
                cfg.nof_prb, cfg.scs
            )));
        }
        let nof_prb = cfg.nof_prb as u32;
        let slots_per_frame = cfg.scs.slots_per_frame();

        if let DuplexMode::Tdd(pattern) = cfg.duplex {
            pattern.validate().map_err(|e| invalid(e.to_string()))?;
            if slots_per_frame % pattern.period_slots != 0 {
                return Err(invalid(format!(
                    "TDD period of {} slots does not divide a frame of {} slots",
                    pattern.period_slots, slots_per_frame
                )));
            }
        }
        if args.max_nof_ctrl_symbols == 0 || args.max_nof_ctrl_symbols > MAX_CORESET_DURATION {
            return Err(invalid(format!(
                "invalid maximum number of control symbols {}",
                args.max_nof_ctrl_symbols
            )));
        }
        if args.nof_harq_procs == 0 || args.nof_harq_procs > MAX_NOF_HARQ_PROCS {
            return Err(invalid(format!("invalid number of HARQ processes {}", args.nof_harq_procs)));
        }
        for (name, aggr_idx) in [("SI", args.si_aggr_idx), ("RAR", args.rar_aggr_idx)] {
            if aggr_idx as usize >= MAX_NOF_AGGR_LEVELS {
                return Err(invalid(format!("invalid {} aggregation index {}", name, aggr_idx)));
            }
        }
        let max_mcs = crate::tbs::max_mcs(args.mcs_table);
        for mcs in [args.fixed_dl_mcs, args.fixed_ul_mcs, Some(args.common_mcs)].into_iter().flatten() {
            if mcs > max_mcs {
                return Err(invalid(format!("MCS {} exceeds the table maximum {}", mcs, max_mcs)));
            }
        }

        validate_coresets(&cfg.bwp.coresets, nof_prb, args.max_nof_ctrl_symbols).map_err(invalid)?;
        validate_search_spaces(&cfg.bwp.search_spaces, &cfg.bwp.coresets).map_err(invalid)?;

        let ra_ss = find_ss(&cfg.bwp.search_spaces, cfg.bwp.ra_search_space)
            .ok_or_else(|| invalid(format!("RA search space {} not found", cfg.bwp.ra_search_space)))?;
        if ra_ss.kind != SearchSpaceType::Common1 {
            return Err(invalid(format!("RA search space {} is not a Type1 CSS", ra_ss.id)));
        }
        let si_ss = find_ss(&cfg.bwp.search_spaces, cfg.bwp.si_search_space)
            .ok_or_else(|| invalid(format!("SI search space {} not found", cfg.bwp.si_search_space)))?;
        if !matches!(si_ss.kind, SearchSpaceType::Common0 | SearchSpaceType::Common0A) {
            return Err(invalid(format!("SI search space {} is not a Type0 CSS", si_ss.id)));
        }

        // PDSCH starts after the longest coreset
        let cfi = cfg
            .bwp
            .coresets
            .iter()
            .map(|c| c.duration)
            .max()
            .unwrap_or(1);

        let p = nominal_rbg_size(nof_prb, args.rbg_config);
        let nof_rbgs = ceil_div(nof_prb, p);

        if let Some(ssb) = cfg.ssb {
            if ssb.start_prb + SSB_NOF_PRB > nof_prb {
                return Err(invalid(format!("SSB at PRB {} does not fit the carrier", ssb.start_prb)));
            }
            if ssb.slot_idx >= slots_per_frame || !cfg.duplex.is_dl_slot(ssb.slot_idx) {
                return Err(invalid(format!("SSB slot {} is not a DL slot", ssb.slot_idx)));
            }
        }
        for si in &cfg.si {
            if si.period_frames == 0 {
                return Err(invalid("SI periodicity must be positive".into()));
            }
            if si.slot_idx >= slots_per_frame || !cfg.duplex.is_dl_slot(si.slot_idx) {
                return Err(invalid(format!("SI slot {} is not a DL slot", si.slot_idx)));
            }
        }

        let numerology = cfg.scs.numerology();
        let mut slots = Vec::with_capacity(slots_per_frame as usize);
        for slot_idx in 0..slots_per_frame {
            let mut params = SlotParams {
                is_dl: cfg.duplex.is_dl_slot(slot_idx),
                is_ul: cfg.duplex.is_ul_slot(slot_idx),
                ..Default::default()
            };
            if params.is_dl {
                let next_ul = |min_k: u32| {
                    (min_k..min_k + slots_per_frame)
                        .find(|k| cfg.duplex.is_ul_slot((slot_idx + k) % slots_per_frame))
                };
                params.k1 = next_ul(args.min_k1)
                    .ok_or_else(|| invalid(format!("no k1 found for slot {}", slot_idx)))?;
                params.k2 = next_ul(args.min_k2)
                    .ok_or_else(|| invalid(format!("no k2 found for slot {}", slot_idx)))?;
                params.msg3_k = next_ul(args.min_k2 + msg3_delta(numerology))
                    .ok_or_else(|| invalid(format!("no Msg3 delay found for slot {}", slot_idx)))?;
                for k in [params.k1, params.k2, params.msg3_k] {
                    if k as usize >= SLOT_RING_SIZE {
                        return Err(invalid(format!(
                            "delay of {} slots from slot {} exceeds the slot ring",
                            k, slot_idx
                        )));
                    }
                }
            }
            for cfi in 1..=MAX_NOF_CFI as u32 {
                params.dl_re_prefix[cfi as usize - 1] =
                    dl_re_prefix(cfg, nof_prb, slot_idx, cfi, params.is_dl);
            }
            slots.push(params);
        }

        let coreset_cces: Vec<(u8, [u32; MAX_NOF_CFI])> = cfg
            .bwp
            .coresets
            .iter()
            .map(|c| {
                let mut cces = [0; MAX_NOF_CFI];
                for (i, n) in cces.iter_mut().enumerate() {
                    *n = c.nof_cces_for(c.duration.min(i as u8 + 1));
                }
                (c.id, cces)
            })
            .collect();

        let common_tables = cfg
            .bwp
            .search_spaces
            .iter()
            .filter(|ss| ss.kind.is_common())
            .map(|ss| {
                let cces = coreset_cces
                    .iter()
                    .find(|(id, _)| *id == ss.coreset_id)
                    .map(|(_, n)| *n)
                    .unwrap_or_default();
                CommonSsTable {
                    ss_id: ss.id,
                    slots: slots
                        .iter()
                        .map(|slot| common_location_table(ss, &cces, slot.is_dl))
                        .collect(),
                }
            })
            .collect();

        let params = Self {
            cc,
            cfg: cfg.clone(),
            nof_prb,
            p,
            nof_rbgs,
            cfi,
            slots,
            coreset_cces,
            common_tables,
        };

        // Broadcast PDCCHs must have somewhere to go
        let first_dl = params.slots.iter().position(|s| s.is_dl).unwrap_or(0) as u32;
        if params.common_cce_positions(ra_ss.id, first_dl, cfi, args.rar_aggr_idx).is_empty() {
            return Err(invalid("not enough CCE locations for RAR".into()));
        }
        if params.common_cce_positions(si_ss.id, first_dl, cfi, args.si_aggr_idx).is_empty() {
            return Err(invalid("not enough CCE locations for broadcast".into()));
        }

        info!(
            "cc={} configured: pci={} nof_prb={} P={} nof_rbgs={} cfi={} coresets={} search_spaces={}",
            cc,
            cfg.pci,
            nof_prb,
            p,
            nof_rbgs,
            cfi,
            cfg.bwp.coresets.len(),
            cfg.bwp.search_spaces.len()
        );
        Ok(params)
    }

    /// Reconfigure the cell; on failure the previous tables are kept
    pub fn set_cfg(&mut self, cc: usize, cfg: &CellConfig, args: &SchedArgs) -> Result<(), SchedError> {
        *self = Self::new(cc, cfg, args)?;
        Ok(())
    }

    /// Cell index
    pub fn cc(&self) -> usize {
        self.cc
    }

    /// Configuration the table was derived from
    pub fn cfg(&self) -> &CellConfig {
        &self.cfg
    }

    pub fn scs(&self) -> SubcarrierSpacing {
        self.cfg.scs
    }

    pub fn nof_prb(&self) -> u32 {
        self.nof_prb
    }

    /// Nominal RBG size
    pub fn p(&self) -> u32 {
        self.p
    }

    pub fn nof_rbgs(&self) -> u32 {
        self.nof_rbgs
    }

    /// Number of control symbols used in DL slots
    pub fn cfi(&self) -> u8 {
        self.cfi
    }

    pub fn nof_slots_per_frame(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Number of RBGs needed to cover `nof_prbs` PRBs
    pub fn nof_prbs_to_rbgs(&self, nof_prbs: u32) -> u32 {
        ceil_div(nof_prbs, self.p)
    }

    /// PRBs of one RBG; the last RBG may be smaller than P
    pub fn rbg_to_prbs(&self, rbg: u32) -> PrbInterval {
        let start = (rbg * self.p).min(self.nof_prb);
        PrbInterval::new(start, ((rbg + 1) * self.p).min(self.nof_prb))
    }

    /// Expand an RBG mask into a PRB mask
    pub fn rbgs_to_prb_mask(&self, rbgs: &RbgMask) -> PrbMask {
        let mut prbs = PrbMask::new(self.nof_prb as usize);
        for rbg in rbgs.iter_ones() {
            let interval = self.rbg_to_prbs(rbg as u32);
            prbs.fill(interval.start as usize, interval.stop as usize);
        }
        prbs
    }

    /// RBGs touched by at least one PRB of `prbs`
    pub fn prb_mask_to_rbgs(&self, prbs: &PrbMask) -> RbgMask {
        let mut rbgs = RbgMask::new(self.nof_rbgs as usize);
        for prb in prbs.iter_ones() {
            rbgs.set(prb / self.p as usize, true);
        }
        rbgs
    }

    fn slot(&self, slot_idx: u32) -> &SlotParams {
        &self.slots[slot_idx as usize % self.slots.len()]
    }

    /// Number of PDSCH REs in a PRB interval
    pub fn get_dl_nof_res(&self, slot_idx: u32, cfi: u8, prbs: PrbInterval) -> u32 {
        let Some(prefix) = self.re_prefix(slot_idx, cfi) else {
            return 0;
        };
        let stop = (prbs.stop as usize).min(prefix.len() - 1);
        let start = (prbs.start as usize).min(stop);
        prefix[stop] - prefix[start]
    }

    /// Number of PDSCH REs in a set of PRBs
    pub fn get_dl_nof_res_mask(&self, slot_idx: u32, cfi: u8, prbs: &PrbMask) -> u32 {
        let Some(prefix) = self.re_prefix(slot_idx, cfi) else {
            return 0;
        };
        prbs.iter_ones()
            .filter(|prb| prb + 1 < prefix.len())
            .map(|prb| prefix[prb + 1] - prefix[prb])
            .sum()
    }

    /// Number of PUSCH REs for `nof_prbs` PRBs
    pub fn get_ul_nof_res(&self, nof_prbs: u32) -> u32 {
        nof_prbs * UL_NOF_RE_PER_PRB
    }

    fn re_prefix(&self, slot_idx: u32, cfi: u8) -> Option<&Vec<u32>> {
        if cfi == 0 || cfi as usize > MAX_NOF_CFI {
            return None;
        }
        Some(&self.slot(slot_idx).dl_re_prefix[cfi as usize - 1])
    }

    /// Number of CCEs of a coreset when the control region spans `cfi` symbols
    pub fn nof_cce(&self, coreset_id: u8, cfi: u8) -> u32 {
        if cfi == 0 || cfi as usize > MAX_NOF_CFI {
            return 0;
        }
        self.coreset_cces
            .iter()
            .find(|(id, _)| *id == coreset_id)
            .map(|(_, n)| n[cfi as usize - 1])
            .unwrap_or(0)
    }

    /// Candidate CCE positions of a common search space, empty in non-DL slots
    pub fn common_cce_positions(&self, ss_id: u8, slot_idx: u32, cfi: u8, aggr_idx: u8) -> &[u32] {
        if cfi == 0 || cfi as usize > MAX_NOF_CFI || aggr_idx as usize >= MAX_NOF_AGGR_LEVELS {
            return &[];
        }
        self.common_tables
            .iter()
            .find(|t| t.ss_id == ss_id)
            .map(|t| {
                let table = &t.slots[slot_idx as usize % t.slots.len()];
                table[cfi as usize - 1][aggr_idx as usize].as_slice()
            })
            .unwrap_or(&[])
    }

    pub fn slot_is_dl(&self, slot_idx: u32) -> bool {
        self.slot(slot_idx).is_dl
    }

    pub fn slot_is_ul(&self, slot_idx: u32) -> bool {
        self.slot(slot_idx).is_ul
    }

    /// PDSCH to HARQ-ACK delay for a PDSCH in `slot_idx`
    pub fn k1(&self, slot_idx: u32) -> u32 {
        self.slot(slot_idx).k1
    }

    /// PDCCH to PUSCH delay for a UL grant sent in `slot_idx`
    pub fn k2(&self, slot_idx: u32) -> u32 {
        self.slot(slot_idx).k2
    }

    /// RAR to Msg3 delay for a RAR sent in `slot_idx`
    pub fn msg3_k(&self, slot_idx: u32) -> u32 {
        self.slot(slot_idx).msg3_k
    }

    pub fn coreset(&self, coreset_id: u8) -> Option<&CoresetConfig> {
        self.cfg.bwp.coresets.iter().find(|c| c.id == coreset_id)
    }

    /// Cell-level search space
    pub fn search_space(&self, ss_id: u8) -> Option<&SearchSpaceConfig> {
        find_ss(&self.cfg.bwp.search_spaces, ss_id)
    }

    pub fn bwp_id(&self) -> u8 {
        self.cfg.bwp.bwp_id
    }

    pub fn ra_search_space(&self) -> u8 {
        self.cfg.bwp.ra_search_space
    }

    pub fn si_search_space(&self) -> u8 {
        self.cfg.bwp.si_search_space
    }
}

fn find_ss(search_spaces: &[SearchSpaceConfig], ss_id: u8) -> Option<&SearchSpaceConfig> {
    search_spaces.iter().find(|ss| ss.id == ss_id)
}

fn validate_coresets(coresets: &[CoresetConfig], nof_prb: u32, max_ctrl_symbols: u8) -> Result<(), String> {
    if coresets.is_empty() {
        return Err("BWP has no coreset".into());
    }
    let mut ids = HashSet::new();
    for coreset in coresets {
        if !ids.insert(coreset.id) {
            return Err(format!("duplicate coreset id {}", coreset.id));
        }
        if coreset.duration == 0 || coreset.duration > max_ctrl_symbols {
            return Err(format!(
                "coreset {} duration {} outside 1..={}",
                coreset.id, coreset.duration, max_ctrl_symbols
            ));
        }
        if coreset.freq_resources == 0 {
            return Err(format!("coreset {} has no frequency resources", coreset.id));
        }
        if coreset.freq_resources >> CORESET_FREQ_RES_BITS != 0 {
            return Err(format!("coreset {} frequency resources exceed 45 groups", coreset.id));
        }
        let highest_group = 63 - coreset.freq_resources.leading_zeros();
        if (highest_group + 1) * CORESET_PRBS_PER_GROUP > nof_prb {
            return Err(format!("coreset {} does not fit in {} PRBs", coreset.id, nof_prb));
        }
        debug!(
            "coreset {}: {} groups, {} symbols, {} CCEs",
            coreset.id,
            coreset.nof_freq_groups(),
            coreset.duration,
            coreset.nof_cces()
        );
    }
    Ok(())
}

fn validate_search_spaces(search_spaces: &[SearchSpaceConfig], coresets: &[CoresetConfig]) -> Result<(), String> {
    let mut ids = HashSet::new();
    for ss in search_spaces {
        if ss.id as usize >= MAX_NOF_SEARCH_SPACES {
            return Err(format!("search space id {} out of range", ss.id));
        }
        if !ids.insert(ss.id) {
            return Err(format!("duplicate search space id {}", ss.id));
        }
        if !coresets.iter().any(|c| c.id == ss.coreset_id) {
            return Err(format!("search space {} refers to unknown coreset {}", ss.id, ss.coreset_id));
        }
        if ss.nof_candidates.iter().all(|n| *n == 0) {
            return Err(format!("search space {} has no PDCCH candidates", ss.id));
        }
    }
    Ok(())
}

fn common_location_table(ss: &SearchSpaceConfig, cces: &[u32; MAX_NOF_CFI], is_dl: bool) -> CceLocationTable {
    let mut table = CceLocationTable::default();
    if !is_dl {
        return table;
    }
    for (cfi_idx, per_aggr) in table.iter_mut().enumerate() {
        for (aggr_idx, locations) in per_aggr.iter_mut().enumerate() {
            *locations = cce_positions(cces[cfi_idx], aggr_idx as u8, ss.nof_candidates[aggr_idx], 0);
        }
    }
    table
}

/// Prefix sums of PDSCH REs per PRB for one slot and CFI
fn dl_re_prefix(cfg: &CellConfig, nof_prb: u32, slot_idx: u32, cfi: u32, is_dl: bool) -> Vec<u32> {
    let dmrs = [cfi.max(2), DMRS_ADDITIONAL_SYMBOL];
    let ssb = cfg
        .ssb
        .filter(|ssb| ssb.slot_idx == slot_idx)
        .map(|ssb| ssb.start_prb..ssb.start_prb + SSB_NOF_PRB);

    let mut prefix = Vec::with_capacity(nof_prb as usize + 1);
    let mut total = 0;
    prefix.push(total);
    for prb in 0..nof_prb {
        if is_dl {
            let in_ssb = ssb.as_ref().is_some_and(|range| range.contains(&prb));
            total += (cfi..NOF_SYMBOLS_PER_SLOT)
                .filter(|sym| !dmrs.contains(sym))
                .filter(|sym| !(in_ssb && SSB_SYMBOLS.contains(sym)))
                .count() as u32
                * NOF_SUBCARRIERS_PER_PRB;
        }
        prefix.push(total);
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_cell_config, SsbConfig};
    use common::types::TddPattern;

    #[test]
    fn test_rbg_size() {
        assert_eq!(nominal_rbg_size(25, RbgConfig::Config1), 2);
        assert_eq!(nominal_rbg_size(52, RbgConfig::Config1), 4);
        assert_eq!(nominal_rbg_size(106, RbgConfig::Config1), 8);
        assert_eq!(nominal_rbg_size(273, RbgConfig::Config1), 16);
        assert_eq!(nominal_rbg_size(52, RbgConfig::Config2), 8);

        let cell = CellParams::new(0, &default_cell_config(), &SchedArgs::default()).unwrap();
        assert_eq!(cell.p(), 4);
        assert_eq!(cell.nof_rbgs(), 13);
        assert_eq!(cell.nof_prbs_to_rbgs(5), 2);
        assert_eq!(cell.rbg_to_prbs(12), PrbInterval::new(48, 52));
    }

    #[test]
    fn test_unsupported_prb_count() {
        let mut cfg = default_cell_config();
        cfg.nof_prb = 50;
        let err = CellParams::new(0, &cfg, &SchedArgs::default()).unwrap_err();
        assert!(matches!(err, SchedError::InvalidConfiguration(_)));

        let mut cfg = default_cell_config();
        cfg.pci = 1008;
        assert!(CellParams::new(0, &cfg, &SchedArgs::default()).is_err());
    }

    #[test]
    fn test_invalid_coreset_and_search_space() {
        let args = SchedArgs::default();

        let mut cfg = default_cell_config();
        cfg.bwp.coresets[1].freq_resources = 1 << 9; // PRBs 54..60
        assert!(CellParams::new(0, &cfg, &args).is_err());

        let mut cfg = default_cell_config();
        cfg.bwp.coresets[1].duration = 4;
        assert!(CellParams::new(0, &cfg, &args).is_err());

        let mut cfg = default_cell_config();
        cfg.bwp.search_spaces[2].coreset_id = 7;
        assert!(CellParams::new(0, &cfg, &args).is_err());

        let mut cfg = default_cell_config();
        cfg.bwp.ra_search_space = 2;
        assert!(CellParams::new(0, &cfg, &args).is_err());

        let mut cfg = default_cell_config();
        cfg.bwp.search_spaces[1].nof_candidates = [4, 0, 0, 0, 0];
        assert!(CellParams::new(0, &cfg, &args).is_err());
    }

    #[test]
    fn test_set_cfg_keeps_tables_on_failure() {
        let args = SchedArgs::default();
        let mut cell = CellParams::new(0, &default_cell_config(), &args).unwrap();
        let mut bad = default_cell_config();
        bad.nof_prb = 51;
        assert!(cell.set_cfg(0, &bad, &args).is_err());
        assert_eq!(cell.nof_prb(), 52);

        let mut wide = default_cell_config();
        wide.nof_prb = 106;
        cell.set_cfg(1, &wide, &args).unwrap();
        assert_eq!(cell.cc(), 1);
        assert_eq!(cell.p(), 8);
    }

    #[test]
    fn test_cce_tables() {
        let cell = CellParams::new(0, &default_cell_config(), &SchedArgs::default()).unwrap();
        // coreset 0: 4 groups x 2 symbols, limited by the CFI
        assert_eq!(cell.nof_cce(0, 1), 4);
        assert_eq!(cell.nof_cce(0, 2), 8);
        assert_eq!(cell.nof_cce(0, 3), 8);
        assert_eq!(cell.nof_cce(1, 3), 8);
        assert_eq!(cell.nof_cce(9, 1), 0);

        // 8 CCEs, L=4, 2 candidates
        assert_eq!(cell.common_cce_positions(1, 0, 2, 2), &[0, 4]);
        assert_eq!(cell.common_cce_positions(1, 0, 2, 3), &[0]);
        assert!(cell.common_cce_positions(1, 0, 2, 4).is_empty());
        assert!(cell.common_cce_positions(1, 0, 2, 5).is_empty());
    }

    #[test]
    fn test_dl_res() {
        let cfg = default_cell_config();
        let cell = CellParams::new(0, &cfg, &SchedArgs::default()).unwrap();
        // 14 - 1 control - 2 DMRS symbols
        assert_eq!(cell.get_dl_nof_res(3, 1, PrbInterval::new(0, 1)), 132);
        assert_eq!(cell.get_dl_nof_res(3, 2, PrbInterval::new(0, 10)), 1200);
        let mut mask = PrbMask::new(52);
        mask.fill(0, 2);
        mask.set(40, true);
        assert_eq!(cell.get_dl_nof_res_mask(3, 1, &mask), 3 * 132);

        // SSB in slot 0 removes 2 more symbols on top of the DMRS at symbol 2
        let ssb = PrbInterval::new(16, 36);
        assert_eq!(cell.get_dl_nof_res(0, 1, ssb), 20 * 12 * 8);
        assert_eq!(cell.get_dl_nof_res(0, 1, PrbInterval::new(0, 16)), 16 * 132);
        assert_eq!(cell.get_dl_nof_res(3, 0, ssb), 0);
    }

    #[test]
    fn test_tdd_tables() {
        let mut cfg = default_cell_config();
        cfg.scs = SubcarrierSpacing::Scs30;
        cfg.nof_prb = 51;
        cfg.duplex = DuplexMode::Tdd(TddPattern { period_slots: 10, nof_dl_slots: 7, nof_ul_slots: 2 });
        cfg.ssb = Some(SsbConfig { start_prb: 0, slot_idx: 0 });
        cfg.si[0].slot_idx = 2;
        let cell = CellParams::new(0, &cfg, &SchedArgs::default()).unwrap();

        assert_eq!(cell.nof_slots_per_frame(), 20);
        assert!(cell.slot_is_dl(7));
        assert!(!cell.slot_is_ul(7));
        assert!(cell.slot_is_ul(8));
        assert!(!cell.slot_is_dl(19));
        // slot 0 -> first UL slot at or after 4 is slot 8
        assert_eq!(cell.k1(0), 8);
        assert_eq!(cell.k1(5), 4);
        assert_eq!(cell.k2(6), 12);
        assert_eq!(cell.get_dl_nof_res(8, 1, PrbInterval::new(0, 51)), 0);
        assert!(cell.common_cce_positions(1, 9, 2, 2).is_empty());
        assert!(!cell.common_cce_positions(1, 10, 2, 2).is_empty());
    }

    #[test]
    fn test_ssb_must_fit() {
        let mut cfg = default_cell_config();
        cfg.ssb = Some(SsbConfig { start_prb: 40, slot_idx: 0 });
        assert!(CellParams::new(0, &cfg, &SchedArgs::default()).is_err());
    }
}
