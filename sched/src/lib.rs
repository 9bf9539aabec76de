//! gNodeB MAC Slot Scheduler Library
//!
//! This crate decides, every slot, which UEs receive which PDCCH candidates,
//! PRBs and HARQ processes in downlink and uplink, following 3GPP TS 38.213,
//! TS 38.214 and TS 38.321.

pub mod cell_params;
pub mod config;
pub mod events;
pub mod harq;
pub mod mac;
pub mod pdcch;
pub mod policy;
pub mod result;
pub mod scheduler;
pub mod slot_alloc;
pub mod tbs;
pub mod ue;

use thiserror::Error;

pub use cell_params::CellParams;
pub use config::{CellConfig, SchedArgs, UeConfig};
pub use events::FeedbackHandle;
pub use result::SlotResult;
pub use scheduler::{SchedMetrics, Scheduler};

/// Errors for scheduler configuration and lifecycle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Scheduler not initialized")]
    NotInitialized,

    #[error("Unknown cell index {0}")]
    UnknownCell(usize),

    #[error("Unknown UE rnti={0}")]
    UnknownUe(common::Rnti),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Reasons a PDCCH, PDSCH, PUSCH or PUCCH allocation can fail
///
/// Allocation failures are an expected outcome under load: the caller skips
/// the grant for this slot and tries again later.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocError {
    #[error("no PDCCH space left")]
    NoCchSpace,

    #[error("no PDSCH/PUSCH space left")]
    NoSchSpace,

    #[error("PDSCH/PUSCH collision")]
    SchCollision,

    #[error("maximum number of grants reached")]
    NoGrantSpace,

    #[error("no opportunity for this RNTI in this slot")]
    NoRntiOpportunity,

    #[error("no PUCCH space left")]
    NoUciSpace,

    #[error("invalid grant parameters")]
    InvalidGrantParams,

    #[error("invalid code rate")]
    InvalidCoderate,

    #[error("allocation failed")]
    Other,
}

/// Outcome of an allocation attempt
pub type AllocResult<T> = Result<T, AllocError>;
