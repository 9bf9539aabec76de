//! PDCCH allocation
//!
//! Places DCIs on collision-free CCE positions within the coresets of a BWP
//! (TS 38.213 Section 10.1). DCI contexts of one slot live in per-direction
//! arenas owned by the BWP allocator and are referenced by index.

pub mod bwp;
pub mod cce_positions;
pub mod coreset;

use common::types::{Rnti, RntiType};
use serde::Serialize;

pub use bwp::BwpPdcchAllocator;
pub use cce_positions::{aggr_level, cce_positions, ue_hash_sequence, CceLocationTable};
pub use coreset::{AllocRecord, CoresetRegion};

/// DCI format (TS 38.212 Section 7.3.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DciFormat {
    /// PUSCH fallback
    F0_0,
    /// PUSCH non-fallback
    F0_1,
    /// PDSCH fallback
    F1_0,
    /// PDSCH non-fallback
    F1_1,
}

/// Link direction of a DCI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LinkDir {
    /// Downlink assignment
    Dl,
    /// Uplink grant
    Ul,
}

/// CCE location of a PDCCH
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct DciLocation {
    /// Aggregation index, L = 2^aggr_idx
    pub aggr_idx: u8,
    /// First CCE
    pub ncce: u32,
}

impl DciLocation {
    /// Number of CCEs occupied
    pub fn aggr_level(&self) -> u32 {
        aggr_level(self.aggr_idx)
    }

    /// One past the last CCE occupied
    pub fn end(&self) -> u32 {
        self.ncce + self.aggr_level()
    }
}

/// DCI context handed to the PHY
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DciCtx {
    pub rnti: Rnti,
    pub rnti_type: RntiType,
    pub format: DciFormat,
    pub coreset_id: u8,
    pub ss_id: u8,
    pub location: DciLocation,
}

/// Index of a DCI in the slot arenas of a [`BwpPdcchAllocator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DciRef {
    pub dir: LinkDir,
    pub idx: usize,
}
