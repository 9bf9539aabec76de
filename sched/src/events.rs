//! Feedback path from the PHY and upper layers
//!
//! [`FeedbackHandle`] is cloned into PHY worker threads. HARQ-ACK and PUSCH
//! CRC results go straight to the HARQ entity of the UE, under its read
//! lock, so they never wait for the slot thread. Everything else is queued
//! and applied by the scheduler at the start of the next slot.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use common::types::{Rnti, SlotPoint};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::harq::{DlHarqEntity, TbDecodeResult, UlHarqEntity};
use crate::SchedError;

/// Random access preamble detected by the PHY
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RachInfo {
    pub cc: usize,
    /// Slot the preamble was received in
    pub prach_slot: SlotPoint,
    pub preamble_idx: u8,
    /// TC-RNTI assigned to the UE
    pub tc_rnti: Rnti,
}

impl RachInfo {
    /// RA-RNTI of the preamble (TS 38.321 Section 5.1.3), first symbol and carrier
    pub fn ra_rnti(&self) -> Rnti {
        Rnti(1 + 14 * self.prach_slot.slot_idx() as u16)
    }
}

/// Event applied by the slot thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedEvent {
    DlBufferState { rnti: Rnti, lcid: u8, bytes: u32 },
    UlBsr { rnti: Rnti, lcg: usize, bytes: u32 },
    UlSr { rnti: Rnti },
    DlCqi { rnti: Rnti, cc: usize, cqi: u8 },
    UlCqi { rnti: Rnti, cc: usize, cqi: u8 },
    Rach(RachInfo),
}

type HarqPair = (Arc<DlHarqEntity>, Arc<UlHarqEntity>);

/// Cloneable entry point for feedback from other threads
#[derive(Debug, Clone, Default)]
pub struct FeedbackHandle {
    harq: Arc<RwLock<HashMap<(Rnti, usize), HarqPair>>>,
    queue: Arc<Mutex<VecDeque<SchedEvent>>>,
}

impl FeedbackHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, rnti: Rnti, cc: usize, dl: Arc<DlHarqEntity>, ul: Arc<UlHarqEntity>) {
        self.harq.write().insert((rnti, cc), (dl, ul));
    }

    pub(crate) fn unregister(&self, rnti: Rnti) {
        self.harq.write().retain(|(r, _), _| *r != rnti);
    }

    fn lookup(&self, rnti: Rnti, cc: usize) -> Result<HarqPair, SchedError> {
        self.harq
            .read()
            .get(&(rnti, cc))
            .cloned()
            .ok_or(SchedError::UnknownUe(rnti))
    }

    /// HARQ-ACK for the PDSCH sent with process `pid`
    pub fn dl_ack_info(&self, rnti: Rnti, cc: usize, pid: usize, ack: bool) -> Result<(), SchedError> {
        let (dl, _) = self.lookup(rnti, cc)?;
        let result = if ack { TbDecodeResult::ack() } else { TbDecodeResult::nack() };
        dl.tb_decoded(pid, result);
        Ok(())
    }

    /// PUSCH CRC for process `pid`, returns the payload to deliver on success
    pub fn ul_crc_info(
        &self,
        rnti: Rnti,
        cc: usize,
        pid: usize,
        crc_ok: bool,
        payload: Option<Bytes>,
    ) -> Result<Option<Bytes>, SchedError> {
        let (_, ul) = self.lookup(rnti, cc)?;
        Ok(ul.tb_decoded(pid, TbDecodeResult { ack: crc_ok, payload }))
    }

    fn push(&self, event: SchedEvent) {
        debug!("queued {:?}", event);
        self.queue.lock().push_back(event);
    }

    pub fn dl_buffer_state(&self, rnti: Rnti, lcid: u8, bytes: u32) {
        self.push(SchedEvent::DlBufferState { rnti, lcid, bytes });
    }

    pub fn ul_bsr(&self, rnti: Rnti, lcg: usize, bytes: u32) {
        self.push(SchedEvent::UlBsr { rnti, lcg, bytes });
    }

    pub fn ul_sr(&self, rnti: Rnti) {
        self.push(SchedEvent::UlSr { rnti });
    }

    pub fn dl_cqi(&self, rnti: Rnti, cc: usize, cqi: u8) {
        if cqi > 15 {
            warn!("rnti={} ignoring CQI {}", rnti, cqi);
            return;
        }
        self.push(SchedEvent::DlCqi { rnti, cc, cqi });
    }

    pub fn ul_cqi(&self, rnti: Rnti, cc: usize, cqi: u8) {
        if cqi > 15 {
            warn!("rnti={} ignoring UL CQI {}", rnti, cqi);
            return;
        }
        self.push(SchedEvent::UlCqi { rnti, cc, cqi });
    }

    pub fn dl_rach_info(&self, info: RachInfo) {
        self.push(SchedEvent::Rach(info));
    }

    /// Take every queued event, oldest first
    pub(crate) fn drain(&self) -> Vec<SchedEvent> {
        self.queue.lock().drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harq::TbGrant;

    fn entities(rnti: Rnti) -> HarqPair {
        (
            Arc::new(DlHarqEntity::new(rnti, 0, 4, 4, 4)),
            Arc::new(UlHarqEntity::new(rnti, 0, 4, 4, 4)),
        )
    }

    #[test]
    fn test_ack_goes_to_harq_entity() {
        let handle = FeedbackHandle::new();
        let rnti = Rnti(0x4601);
        let (dl, ul) = entities(rnti);
        handle.register(rnti, 0, dl.clone(), ul);
        let slot = SlotPoint::from_count(0, 3).unwrap();
        dl.new_grant_dl(TbGrant {
            rnti,
            pid: 1,
            ndi: true,
            rv: 0,
            tbs: 10,
            mcs: 4,
            nof_rbs: 1,
            tx_slot: slot,
            ack_slot: slot + 4,
        });
        handle.dl_ack_info(rnti, 0, 1, true).unwrap();
        assert_eq!(dl.get_metrics().rx_ok, 1);
        assert_eq!(handle.dl_ack_info(Rnti(0x4602), 0, 1, true), Err(SchedError::UnknownUe(Rnti(0x4602))));

        handle.unregister(rnti);
        assert!(handle.ul_crc_info(rnti, 0, 0, true, None).is_err());
    }

    #[test]
    fn test_events_queue_in_order() {
        let handle = FeedbackHandle::new();
        let worker = handle.clone();
        let rnti = Rnti(0x4601);
        std::thread::spawn(move || {
            worker.dl_buffer_state(rnti, 4, 100);
            worker.ul_sr(rnti);
            worker.dl_cqi(rnti, 0, 16);
        })
        .join()
        .unwrap();
        assert_eq!(
            handle.drain(),
            vec![SchedEvent::DlBufferState { rnti, lcid: 4, bytes: 100 }, SchedEvent::UlSr { rnti }]
        );
        assert!(handle.drain().is_empty());
    }

    #[test]
    fn test_ra_rnti() {
        let info = RachInfo {
            cc: 0,
            prach_slot: SlotPoint::new(0, 5, 9).unwrap(),
            preamble_idx: 3,
            tc_rnti: Rnti(0x4601),
        };
        assert_eq!(info.ra_rnti(), Rnti(127));
    }
}
