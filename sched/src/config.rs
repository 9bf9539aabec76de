//! Scheduler configuration structures
//!
//! In-memory cell, BWP, search-space and UE configuration consumed by the
//! scheduler. Every struct derives serde so the binary can load it from YAML
//! or TOML, with defaults for the optional knobs.

use bitflags::bitflags;
use common::types::{DuplexMode, SubcarrierSpacing};
use serde::{Deserialize, Serialize};

/// Maximum number of aggregation levels in NR (L = 1, 2, 4, 8, 16)
pub const MAX_NOF_AGGR_LEVELS: usize = 5;
/// Maximum number of coresets per BWP (TS 38.331 maxNrofControlResourceSets)
pub const MAX_NOF_CORESETS: usize = 12;
/// Maximum number of search spaces per BWP (TS 38.331 maxNrofSearchSpaces)
pub const MAX_NOF_SEARCH_SPACES: usize = 40;
/// Number of PRBs in one coreset frequency-domain resource group
pub const CORESET_PRBS_PER_GROUP: u32 = 6;
/// Maximum coreset duration in OFDM symbols
pub const MAX_CORESET_DURATION: u8 = 3;
/// Number of frequency-domain resource groups a coreset bitmap can address
pub const CORESET_FREQ_RES_BITS: u32 = 45;

bitflags! {
    /// DCI formats monitored in a search space
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct DciFormats: u8 {
        /// UL fallback grant
        const F0_0 = 1 << 0;
        /// DL fallback assignment
        const F1_0 = 1 << 1;
        /// UL non-fallback grant
        const F0_1 = 1 << 2;
        /// DL non-fallback assignment
        const F1_1 = 1 << 3;
    }
}

/// Search space type (TS 38.213 Section 10.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchSpaceType {
    /// Type0-PDCCH CSS, SIB1
    Common0,
    /// Type0A-PDCCH CSS, other SI
    Common0A,
    /// Type1-PDCCH CSS, RA-RNTI / TC-RNTI
    Common1,
    /// Type2-PDCCH CSS, P-RNTI
    Common2,
    /// Type3-PDCCH CSS, C-RNTI in a common search space
    Common3,
    /// UE-specific search space
    Ue,
}

impl SearchSpaceType {
    /// Whether the search space uses the common (Y = 0) hashing
    pub fn is_common(&self) -> bool {
        !matches!(self, SearchSpaceType::Ue)
    }
}

/// Control resource set configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoresetConfig {
    /// Coreset id within the BWP
    pub id: u8,
    /// Frequency-domain resources: bit n set means PRBs [6n, 6n+6) belong to the coreset
    pub freq_resources: u64,
    /// Duration in OFDM symbols (1..=3)
    pub duration: u8,
}

impl CoresetConfig {
    /// Number of 6-PRB frequency groups
    pub fn nof_freq_groups(&self) -> u32 {
        self.freq_resources.count_ones()
    }

    /// Number of CCEs when the coreset spans `nof_symbols` symbols
    pub fn nof_cces_for(&self, nof_symbols: u8) -> u32 {
        // 6 REGs per CCE and one REG per PRB per symbol
        self.nof_freq_groups() * nof_symbols as u32
    }

    /// Number of CCEs with the configured duration
    pub fn nof_cces(&self) -> u32 {
        self.nof_cces_for(self.duration)
    }
}

/// Search space configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSpaceConfig {
    /// Search space id within the BWP
    pub id: u8,
    /// Coreset the candidates live in
    pub coreset_id: u8,
    /// Search space type
    pub kind: SearchSpaceType,
    /// Number of PDCCH candidates per aggregation index (L = 1, 2, 4, 8, 16)
    pub nof_candidates: [u8; MAX_NOF_AGGR_LEVELS],
    /// DCI formats monitored
    pub formats: DciFormats,
}

/// Bandwidth part configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BwpConfig {
    /// BWP id
    #[serde(default)]
    pub bwp_id: u8,
    /// Coresets of the BWP
    pub coresets: Vec<CoresetConfig>,
    /// Cell-level search spaces of the BWP
    pub search_spaces: Vec<SearchSpaceConfig>,
    /// Search space used for RAR (Type1 CSS)
    pub ra_search_space: u8,
    /// Search space used for SI (Type0 CSS)
    pub si_search_space: u8,
}

/// SSB placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsbConfig {
    /// First PRB overlapped by the SS/PBCH block
    pub start_prb: u32,
    /// Slot index within the frame carrying the block
    pub slot_idx: u32,
}

/// One system information message scheduled by the MAC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiConfig {
    /// Payload length in bytes
    pub len_bytes: u32,
    /// Periodicity in frames
    pub period_frames: u32,
    /// Slot index within the frame
    pub slot_idx: u32,
}

/// Cell configuration supplied at cell setup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellConfig {
    /// Physical cell id
    pub pci: u16,
    /// Subcarrier spacing of the carrier
    pub scs: SubcarrierSpacing,
    /// Number of PRBs of the carrier
    pub nof_prb: u16,
    /// Duplex mode
    pub duplex: DuplexMode,
    /// Initial (and only) BWP
    pub bwp: BwpConfig,
    /// SSB placement
    #[serde(default)]
    pub ssb: Option<SsbConfig>,
    /// System information messages
    #[serde(default)]
    pub si: Vec<SiConfig>,
}

/// Scheduling policy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PolicyKind {
    /// Time-domain round robin
    #[default]
    RoundRobin,
    /// Proportional fair
    ProportionalFair,
}

/// Nominal RBG size configuration (TS 38.214 Table 5.1.2.2.1-1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RbgConfig {
    /// Configuration 1
    #[default]
    Config1,
    /// Configuration 2
    Config2,
}

/// MCS table (TS 38.214 Section 5.1.3.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum McsTable {
    /// Table 5.1.3.1-1
    #[default]
    Qam64,
    /// Table 5.1.3.1-2
    Qam256,
}

/// Scheduler arguments supplied at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedArgs {
    /// Scheduling policy
    #[serde(default)]
    pub policy: PolicyKind,
    /// Maximum number of PDSCH grants per slot
    #[serde(default = "default_max_grants")]
    pub max_dl_grants_per_slot: usize,
    /// Maximum number of PUSCH grants per slot
    #[serde(default = "default_max_grants")]
    pub max_ul_grants_per_slot: usize,
    /// Maximum number of PUCCH HARQ-ACK resources per UL slot
    #[serde(default = "default_max_pucch")]
    pub max_pucch_per_slot: usize,
    /// Maximum number of control symbols (CFI) the cell may use
    #[serde(default = "default_max_ctrl_symbols")]
    pub max_nof_ctrl_symbols: u8,
    /// Fixed DL MCS, disables link adaptation when set
    #[serde(default)]
    pub fixed_dl_mcs: Option<u8>,
    /// Fixed UL MCS, disables link adaptation when set
    #[serde(default)]
    pub fixed_ul_mcs: Option<u8>,
    /// MCS table
    #[serde(default)]
    pub mcs_table: McsTable,
    /// Number of HARQ processes per UE and direction
    #[serde(default = "default_nof_harq_procs")]
    pub nof_harq_procs: u8,
    /// Maximum number of HARQ retransmissions before a TB is dropped
    #[serde(default = "default_max_harq_retx")]
    pub max_harq_retx: u32,
    /// Slots to wait past the expected feedback slot before assuming a NACK
    #[serde(default = "default_harq_timeout")]
    pub harq_feedback_timeout: u32,
    /// RBG size configuration
    #[serde(default)]
    pub rbg_config: RbgConfig,
    /// Minimum PDSCH to HARQ-ACK delay in slots
    #[serde(default = "default_min_k")]
    pub min_k1: u32,
    /// Minimum PDCCH to PUSCH delay in slots
    #[serde(default = "default_min_k")]
    pub min_k2: u32,
    /// Aggregation index used for SI PDCCHs
    #[serde(default = "default_common_aggr_idx")]
    pub si_aggr_idx: u8,
    /// Aggregation index used for RAR PDCCHs
    #[serde(default = "default_common_aggr_idx")]
    pub rar_aggr_idx: u8,
    /// MCS used for SI and RAR PDSCH
    #[serde(default = "default_common_mcs")]
    pub common_mcs: u8,
    /// Number of PRBs for each Msg3 grant
    #[serde(default = "default_msg3_nof_prb")]
    pub msg3_nof_prb: u32,
    /// RA response window in slots
    #[serde(default = "default_rar_window")]
    pub rar_window_slots: u32,
    /// Forgetting factor for the average throughput of the PF policy
    #[serde(default = "default_pf_alpha")]
    pub pf_alpha: f32,
}

fn default_max_grants() -> usize {
    16
}

fn default_max_pucch() -> usize {
    16
}

fn default_max_ctrl_symbols() -> u8 {
    3
}

fn default_nof_harq_procs() -> u8 {
    16
}

fn default_max_harq_retx() -> u32 {
    4
}

fn default_harq_timeout() -> u32 {
    4
}

fn default_min_k() -> u32 {
    4
}

fn default_common_aggr_idx() -> u8 {
    2
}

fn default_common_mcs() -> u8 {
    4
}

fn default_msg3_nof_prb() -> u32 {
    3
}

fn default_rar_window() -> u32 {
    10
}

fn default_pf_alpha() -> f32 {
    0.05
}

impl Default for SchedArgs {
    fn default() -> Self {
        Self {
            policy: PolicyKind::default(),
            max_dl_grants_per_slot: default_max_grants(),
            max_ul_grants_per_slot: default_max_grants(),
            max_pucch_per_slot: default_max_pucch(),
            max_nof_ctrl_symbols: default_max_ctrl_symbols(),
            fixed_dl_mcs: None,
            fixed_ul_mcs: None,
            mcs_table: McsTable::default(),
            nof_harq_procs: default_nof_harq_procs(),
            max_harq_retx: default_max_harq_retx(),
            harq_feedback_timeout: default_harq_timeout(),
            rbg_config: RbgConfig::default(),
            min_k1: default_min_k(),
            min_k2: default_min_k(),
            si_aggr_idx: default_common_aggr_idx(),
            rar_aggr_idx: default_common_aggr_idx(),
            common_mcs: default_common_mcs(),
            msg3_nof_prb: default_msg3_nof_prb(),
            rar_window_slots: default_rar_window(),
            pf_alpha: default_pf_alpha(),
        }
    }
}

/// Per-carrier UE configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UeCarrierConfig {
    /// Cell index
    pub cc: usize,
    /// Whether the carrier is activated
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// UE configuration supplied on UE creation and reconfiguration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UeConfig {
    /// Configured carriers, the first is the PCell
    pub carriers: Vec<UeCarrierConfig>,
    /// Active BWP id
    #[serde(default)]
    pub active_bwp: u8,
    /// Dedicated search spaces; the BWP search spaces are used when empty
    #[serde(default)]
    pub search_spaces: Vec<SearchSpaceConfig>,
    /// Search space used for data grants
    #[serde(default = "default_data_ss")]
    pub data_ss_id: u8,
    /// Aggregation index of DL DCIs
    #[serde(default = "default_ue_aggr_idx")]
    pub dl_aggr_idx: u8,
    /// Aggregation index of UL DCIs
    #[serde(default = "default_ue_aggr_idx")]
    pub ul_aggr_idx: u8,
}

fn default_data_ss() -> u8 {
    2
}

fn default_ue_aggr_idx() -> u8 {
    1
}

impl Default for UeConfig {
    fn default() -> Self {
        Self {
            carriers: vec![UeCarrierConfig { cc: 0, active: true }],
            active_bwp: 0,
            search_spaces: Vec::new(),
            data_ss_id: default_data_ss(),
            dl_aggr_idx: default_ue_aggr_idx(),
            ul_aggr_idx: default_ue_aggr_idx(),
        }
    }
}

/// Default FDD cell: 10 MHz at 15 kHz, CORESET#0 plus one UE coreset
pub fn default_cell_config() -> CellConfig {
    CellConfig {
        pci: 1,
        scs: SubcarrierSpacing::Scs15,
        nof_prb: 52,
        duplex: DuplexMode::Fdd,
        bwp: BwpConfig {
            bwp_id: 0,
            coresets: vec![
                CoresetConfig { id: 0, freq_resources: 0x0F, duration: 2 },
                CoresetConfig { id: 1, freq_resources: 0xFF, duration: 1 },
            ],
            search_spaces: vec![
                SearchSpaceConfig {
                    id: 0,
                    coreset_id: 0,
                    kind: SearchSpaceType::Common0,
                    nof_candidates: [0, 0, 2, 1, 0],
                    formats: DciFormats::F1_0,
                },
                SearchSpaceConfig {
                    id: 1,
                    coreset_id: 0,
                    kind: SearchSpaceType::Common1,
                    nof_candidates: [0, 0, 2, 1, 0],
                    formats: DciFormats::F1_0 | DciFormats::F0_0,
                },
                SearchSpaceConfig {
                    id: 2,
                    coreset_id: 1,
                    kind: SearchSpaceType::Common3,
                    nof_candidates: [0, 4, 2, 1, 0],
                    formats: DciFormats::F1_0 | DciFormats::F0_0,
                },
            ],
            ra_search_space: 1,
            si_search_space: 0,
        },
        ssb: Some(SsbConfig { start_prb: 16, slot_idx: 0 }),
        si: vec![SiConfig { len_bytes: 100, period_frames: 2, slot_idx: 1 }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coreset_cces() {
        let coreset = CoresetConfig { id: 1, freq_resources: 0b111111, duration: 1 };
        assert_eq!(coreset.nof_freq_groups(), 6);
        assert_eq!(coreset.nof_cces(), 6);
        assert_eq!(coreset.nof_cces_for(3), 18);
    }

    #[test]
    fn test_sched_args_defaults_from_empty_json() {
        let args: SchedArgs = serde_json::from_str("{}").unwrap();
        assert_eq!(args, SchedArgs::default());
        assert_eq!(args.policy, PolicyKind::RoundRobin);
        assert_eq!(args.max_harq_retx, 4);
    }

    #[test]
    fn test_default_cell_config_roundtrip() {
        let cell = default_cell_config();
        let text = serde_json::to_string(&cell).unwrap();
        let parsed: CellConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, cell);
        assert_eq!(parsed.bwp.search_spaces[1].formats, DciFormats::F1_0 | DciFormats::F0_0);
    }
}
