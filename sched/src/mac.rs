//! MAC scheduler service
//!
//! Async front-end used by the slot clock and the PHY adaptor (TS 38.321).
//! The scheduler itself is single threaded; it sits behind a tokio mutex so
//! configuration calls from the control plane and slot requests from the PHY
//! never interleave inside a slot.

use std::sync::Arc;

use async_trait::async_trait;
use common::types::{Rnti, SlotPoint};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{CellConfig, SchedArgs, UeConfig};
use crate::events::FeedbackHandle;
use crate::result::SlotResult;
use crate::scheduler::{SchedMetrics, Scheduler};
use crate::SchedError;

/// MAC-PHY interface for scheduling information
#[async_trait]
pub trait MacPhyInterface: Send + Sync {
    /// Get the scheduling decision for a slot of a carrier
    async fn get_slot_schedule(&self, cc: usize, slot: SlotPoint) -> Result<SlotResult, SchedError>;

    /// Handle used to report HARQ-ACK, CRC, CQI and RACH
    fn feedback(&self) -> FeedbackHandle;
}

/// Shared MAC scheduler
#[derive(Clone)]
pub struct MacScheduler {
    scheduler: Arc<Mutex<Scheduler>>,
    feedback: FeedbackHandle,
}

impl MacScheduler {
    pub fn new(args: SchedArgs) -> Self {
        let scheduler = Scheduler::new(args);
        let feedback = scheduler.feedback_handle();
        Self {
            scheduler: Arc::new(Mutex::new(scheduler)),
            feedback,
        }
    }

    pub async fn cell_cfg(&self, cells: &[CellConfig]) -> Result<(), SchedError> {
        info!("Configuring {} cell(s)", cells.len());
        self.scheduler.lock().await.cell_cfg(cells)
    }

    pub async fn ue_cfg(&self, rnti: Rnti, cfg: UeConfig) -> Result<(), SchedError> {
        debug!("rnti={} configuring UE with {} carrier(s)", rnti, cfg.carriers.len());
        self.scheduler.lock().await.ue_cfg(rnti, cfg)
    }

    pub async fn ue_rem(&self, rnti: Rnti) -> Result<(), SchedError> {
        self.scheduler.lock().await.ue_rem(rnti)
    }

    pub async fn nof_cells(&self) -> usize {
        self.scheduler.lock().await.nof_cells()
    }

    pub async fn metrics(&self) -> SchedMetrics {
        self.scheduler.lock().await.get_metrics()
    }

    pub async fn reset_metrics(&self) {
        self.scheduler.lock().await.reset_metrics();
    }
}

#[async_trait]
impl MacPhyInterface for MacScheduler {
    async fn get_slot_schedule(&self, cc: usize, slot: SlotPoint) -> Result<SlotResult, SchedError> {
        let mut scheduler = self.scheduler.lock().await;
        scheduler.run_slot(slot, cc)
    }

    fn feedback(&self) -> FeedbackHandle {
        self.feedback.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_cell_config;

    #[tokio::test]
    async fn test_mac_scheduler_service() {
        let mac = MacScheduler::new(SchedArgs::default());
        let slot = SlotPoint::new(0, 0, 2).unwrap();
        assert_eq!(mac.get_slot_schedule(0, slot).await.unwrap_err(), SchedError::NotInitialized);

        mac.cell_cfg(&[default_cell_config()]).await.unwrap();
        let rnti = Rnti(0x4601);
        mac.ue_cfg(rnti, UeConfig::default()).await.unwrap();

        let phy = mac.clone();
        let feedback = phy.feedback();
        tokio::spawn(async move { feedback.dl_buffer_state(rnti, 4, 500) })
            .await
            .unwrap();

        let result = phy.get_slot_schedule(0, slot).await.unwrap();
        assert!(result.pdsch_for(rnti).is_some());
        assert_eq!(mac.metrics().await.cells[0].pdsch_grants, 1);

        mac.reset_metrics().await;
        assert_eq!(mac.metrics().await.cells[0].pdsch_grants, 0);
        mac.ue_rem(rnti).await.unwrap();
        assert_eq!(mac.ue_rem(rnti).await, Err(SchedError::UnknownUe(rnti)));
    }
}
