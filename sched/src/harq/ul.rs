//! Uplink HARQ entity

use std::sync::Arc;

use bytes::Bytes;
use common::types::{Rnti, SlotPoint};
use parking_lot::Mutex;
use tracing::{debug, error};

use super::{
    HarqMetrics, HarqProc, HarqProcInfo, HarqProcPool, HarqState, SoftBuffer, TbAction, TbDecodeResult,
    TbGrant,
};

/// PUSCH transport block action
#[derive(Debug, Clone)]
pub enum UlHarqAction {
    /// Nothing to receive
    Disabled,
    /// Receive into this soft buffer with this RV
    Tx(TbAction),
}

impl UlHarqAction {
    pub fn tb(&self) -> Option<&TbAction> {
        match self {
            UlHarqAction::Disabled => None,
            UlHarqAction::Tx(tb) => Some(tb),
        }
    }
}

/// UL HARQ entity of one UE on one carrier
#[derive(Debug)]
pub struct UlHarqEntity {
    pool: HarqProcPool,
}

impl UlHarqEntity {
    pub fn new(rnti: Rnti, cc: usize, nof_procs: usize, max_retx: u32, feedback_timeout: u32) -> Self {
        Self {
            pool: HarqProcPool::new(rnti, cc, "UL", nof_procs, max_retx, feedback_timeout),
        }
    }

    pub fn rnti(&self) -> Rnti {
        self.pool.rnti()
    }

    /// Register a PUSCH grant
    ///
    /// New transport blocks take the TBS of the grant; retransmissions keep
    /// the size of the buffered transport block.
    pub fn new_grant_ul(&self, grant: TbGrant) -> UlHarqAction {
        self.pool
            .with_proc(grant.pid, |process, metrics| {
                if process.is_new_tx(&grant) {
                    if grant.tbs == 0 {
                        error!("rnti={} pid={} UL grant with empty transport block", grant.rnti, grant.pid);
                        return UlHarqAction::Disabled;
                    }
                    UlHarqAction::Tx(generate_new_tx(process, grant))
                } else {
                    metrics.lock().retx += 1;
                    UlHarqAction::Tx(generate_retx(process, grant))
                }
            })
            .unwrap_or(UlHarqAction::Disabled)
    }

    /// Apply the PUSCH CRC of process `pid`, returning the payload on success
    pub fn tb_decoded(&self, pid: usize, result: TbDecodeResult) -> Option<Bytes> {
        self.pool.tb_decoded(pid, result)
    }

    /// Whether process `pid` holds a transport block
    pub fn has_grant(&self, pid: usize) -> bool {
        self.pool
            .proc_info(pid)
            .is_some_and(|p| p.state != HarqState::Idle)
    }

    /// TBS of the transport block in process `pid`
    pub fn get_current_tbs(&self, pid: usize) -> Option<u32> {
        self.pool
            .proc_info(pid)
            .filter(|p| p.state != HarqState::Idle)
            .map(|p| p.tbs)
    }

    /// Number of retransmissions of the transport block in process `pid`
    pub fn get_nof_retx(&self, pid: usize) -> Option<u32> {
        self.pool.proc_info(pid).map(|p| p.nof_retx)
    }

    pub fn proc_info(&self, pid: usize) -> Option<HarqProcInfo> {
        self.pool.proc_info(pid)
    }

    pub fn find_pending_retx(&self) -> Option<usize> {
        self.pool.find_pending_retx()
    }

    pub fn find_empty(&self) -> Option<usize> {
        self.pool.find_empty()
    }

    pub fn clear_stale(&self, now: SlotPoint) -> usize {
        self.pool.clear_stale(now)
    }

    pub fn get_metrics(&self) -> HarqMetrics {
        self.pool.get_metrics()
    }

    pub fn reset_metrics(&self) {
        self.pool.reset_metrics()
    }

    pub fn reset(&self) {
        self.pool.reset()
    }

    pub fn set_config(&self, nof_procs: usize, max_retx: u32, feedback_timeout: u32) {
        self.pool.set_config(nof_procs, max_retx, feedback_timeout)
    }

    pub fn nof_procs(&self) -> usize {
        self.pool.nof_procs()
    }
}

/// Start a new transport block with a fresh soft buffer sized to the grant
fn generate_new_tx(process: &mut HarqProc, grant: TbGrant) -> TbAction {
    process.softbuffer = Arc::new(Mutex::new(SoftBuffer::new(grant.tbs)));
    process.nof_retx = 0;
    process.ndi = grant.ndi;
    process.state = HarqState::AwaitingDecode;
    process.grant = Some(grant);
    debug!(
        "rnti={} pid={} UL newtx tbs={} slot={}",
        grant.rnti, grant.pid, grant.tbs, grant.tx_slot
    );
    process.action(&grant, true)
}

/// Retransmit the buffered transport block, its size cannot change
fn generate_retx(process: &mut HarqProc, mut grant: TbGrant) -> TbAction {
    if let Some(prev) = process.grant {
        grant.tbs = prev.tbs;
        grant.mcs = prev.mcs;
    }
    process.nof_retx += 1;
    process.state = HarqState::AwaitingDecode;
    process.grant = Some(grant);
    debug!(
        "rnti={} pid={} UL retx={} tbs={} rv={} slot={}",
        grant.rnti, grant.pid, process.nof_retx, grant.tbs, grant.rv, grant.tx_slot
    );
    process.action(&grant, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(pid: usize, ndi: bool, tbs: u32, slot: u32) -> TbGrant {
        let tx_slot = SlotPoint::from_count(0, slot).unwrap();
        TbGrant {
            rnti: Rnti(0x4601),
            pid,
            ndi,
            rv: 0,
            tbs,
            mcs: 12,
            nof_rbs: 10,
            tx_slot,
            ack_slot: tx_slot,
        }
    }

    #[test]
    fn test_new_tx_and_retx() {
        let harq = UlHarqEntity::new(Rnti(0x4601), 0, 4, 4, 4);
        assert!(!harq.has_grant(0));
        assert_eq!(harq.get_current_tbs(0), None);

        let tb = harq.new_grant_ul(grant(0, false, 300, 4));
        let tb = tb.tb().cloned().unwrap();
        assert!(tb.new_tx);
        assert_eq!(tb.softbuffer.lock().len(), 300);
        assert!(harq.has_grant(0));
        assert_eq!(harq.get_current_tbs(0), Some(300));

        assert!(harq.tb_decoded(0, TbDecodeResult::nack()).is_none());
        // retransmission keeps the TBS even if the grant asks for another one
        let mut retx_grant = grant(0, false, 500, 12);
        retx_grant.rv = 2;
        let retx = harq.new_grant_ul(retx_grant).tb().cloned().unwrap();
        assert!(!retx.new_tx);
        assert_eq!(retx.tbs, 300);
        assert_eq!(retx.rv, 2);
        assert!(Arc::ptr_eq(&retx.softbuffer, &tb.softbuffer));
        assert_eq!(harq.get_nof_retx(0), Some(1));
    }

    #[test]
    fn test_crc_delivers_payload() {
        let harq = UlHarqEntity::new(Rnti(0x4601), 0, 4, 4, 4);
        harq.new_grant_ul(grant(1, true, 4, 0));
        let payload = Bytes::from_static(&[1, 2, 3, 4]);
        let result = TbDecodeResult { ack: true, payload: Some(payload.clone()) };
        assert_eq!(harq.tb_decoded(1, result), Some(payload));
        assert!(!harq.has_grant(1));
        let m = harq.get_metrics();
        assert_eq!((m.rx_ok, m.rx_ko, m.rx_brate), (1, 0, 32));
    }

    #[test]
    fn test_new_tx_gets_fresh_soft_buffer() {
        let harq = UlHarqEntity::new(Rnti(0x4601), 0, 4, 4, 4);
        let first = harq.new_grant_ul(grant(0, false, 10, 0)).tb().cloned().unwrap();
        harq.tb_decoded(0, TbDecodeResult::nack());
        let second = harq.new_grant_ul(grant(0, true, 20, 8)).tb().cloned().unwrap();
        assert!(second.new_tx);
        assert!(!Arc::ptr_eq(&first.softbuffer, &second.softbuffer));
        assert_eq!(harq.get_current_tbs(0), Some(20));
        assert_eq!(harq.get_nof_retx(0), Some(0));
    }

    #[test]
    fn test_empty_new_tx_is_disabled() {
        let harq = UlHarqEntity::new(Rnti(0x4601), 0, 4, 4, 4);
        assert!(matches!(harq.new_grant_ul(grant(0, false, 0, 0)), UlHarqAction::Disabled));
        assert!(matches!(harq.new_grant_ul(grant(7, false, 10, 0)), UlHarqAction::Disabled));
        assert!(!harq.has_grant(0));
    }
}
