//! Slot scheduling results
//!
//! What the scheduler hands to the PHY for one slot: the DCIs, the PDSCH and
//! PUSCH grants with their HARQ actions, and the PUCCH HARQ-ACK resources.

use common::bitmask::{PrbInterval, PrbMask, RbgMask};
use common::types::{Rnti, RntiType, SlotPoint};

use crate::harq::{DlHarqAction, UlHarqAction};
use crate::pdcch::DciCtx;

/// PDSCH for a UE (C-RNTI or TC-RNTI)
#[derive(Debug, Clone)]
pub struct PdschGrant {
    pub rnti: Rnti,
    pub rnti_type: RntiType,
    /// Index of the assignment in [`DlSchedResult::pdcch_dl`]
    pub dci: usize,
    pub rbgs: RbgMask,
    pub prbs: PrbMask,
    pub mcs: u8,
    /// Transport block size in bytes
    pub tbs: u32,
    pub action: DlHarqAction,
    /// Slot the HARQ-ACK is expected in
    pub ack_slot: SlotPoint,
}

/// PDSCH carrying a system information message
#[derive(Debug, Clone)]
pub struct SiGrant {
    pub si_idx: usize,
    pub dci: usize,
    pub prbs: PrbInterval,
    pub mcs: u8,
    pub tbs: u32,
    /// Transmission number within the SI window
    pub nof_tx: u32,
}

/// Msg3 grant carried in a RAR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Msg3Grant {
    pub tc_rnti: Rnti,
    pub preamble_idx: u8,
    pub prbs: PrbInterval,
    pub mcs: u8,
    pub pusch_slot: SlotPoint,
}

/// PDSCH carrying a random access response
#[derive(Debug, Clone)]
pub struct RarGrant {
    pub ra_rnti: Rnti,
    pub dci: usize,
    pub prbs: PrbInterval,
    pub mcs: u8,
    pub tbs: u32,
    pub msg3: Vec<Msg3Grant>,
}

/// PUSCH grant
#[derive(Debug, Clone)]
pub struct PuschGrant {
    pub rnti: Rnti,
    pub pid: usize,
    /// Index of the grant in the `pdcch_ul` list of the slot it was signalled in,
    /// `None` for Msg3
    pub dci: Option<usize>,
    pub prbs: PrbInterval,
    pub mcs: u8,
    pub tbs: u32,
    pub action: UlHarqAction,
    pub msg3: bool,
}

/// PUCCH HARQ-ACK resource of one UE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PucchGrant {
    pub rnti: Rnti,
    /// HARQ-ACK bits multiplexed in the resource
    pub nof_harq_bits: u32,
}

/// Downlink part of a slot result
#[derive(Debug, Clone, Default)]
pub struct DlSchedResult {
    pub pdcch_dl: Vec<DciCtx>,
    pub pdcch_ul: Vec<DciCtx>,
    pub pdsch: Vec<PdschGrant>,
    pub si: Vec<SiGrant>,
    pub rar: Vec<RarGrant>,
}

impl DlSchedResult {
    pub fn is_empty(&self) -> bool {
        self.pdcch_dl.is_empty() && self.pdcch_ul.is_empty()
    }
}

/// Uplink part of a slot result
#[derive(Debug, Clone, Default)]
pub struct UlSchedResult {
    pub pusch: Vec<PuschGrant>,
    pub pucch: Vec<PucchGrant>,
}

impl UlSchedResult {
    pub fn is_empty(&self) -> bool {
        self.pusch.is_empty() && self.pucch.is_empty()
    }
}

/// Everything scheduled for one slot of one carrier
#[derive(Debug, Clone)]
pub struct SlotResult {
    pub slot: SlotPoint,
    pub cc: usize,
    pub dl: DlSchedResult,
    pub ul: UlSchedResult,
}

impl SlotResult {
    pub fn empty(slot: SlotPoint, cc: usize) -> Self {
        Self {
            slot,
            cc,
            dl: DlSchedResult::default(),
            ul: UlSchedResult::default(),
        }
    }

    /// PDSCH grant of a UE, if any
    pub fn pdsch_for(&self, rnti: Rnti) -> Option<&PdschGrant> {
        self.dl.pdsch.iter().find(|g| g.rnti == rnti)
    }

    /// PUSCH grant of a UE, if any
    pub fn pusch_for(&self, rnti: Rnti) -> Option<&PuschGrant> {
        self.ul.pusch.iter().find(|g| g.rnti == rnti)
    }
}
