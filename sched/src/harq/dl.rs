//! Downlink HARQ entity

use bytes::Bytes;
use common::types::{Rnti, SlotPoint};
use tracing::{debug, error};

use super::{HarqMetrics, HarqProcInfo, HarqProcPool, HarqState, TbAction, TbDecodeResult, TbGrant};

/// PDSCH transport block action
#[derive(Debug, Clone)]
pub enum DlHarqAction {
    /// Nothing to transmit
    Disabled,
    /// Transmit with this soft buffer and RV
    Tx(TbAction),
}

impl DlHarqAction {
    pub fn tb(&self) -> Option<&TbAction> {
        match self {
            DlHarqAction::Disabled => None,
            DlHarqAction::Tx(tb) => Some(tb),
        }
    }
}

/// DL HARQ entity of one UE on one carrier
#[derive(Debug)]
pub struct DlHarqEntity {
    pool: HarqProcPool,
}

impl DlHarqEntity {
    pub fn new(rnti: Rnti, cc: usize, nof_procs: usize, max_retx: u32, feedback_timeout: u32) -> Self {
        Self {
            pool: HarqProcPool::new(rnti, cc, "DL", nof_procs, max_retx, feedback_timeout),
        }
    }

    pub fn rnti(&self) -> Rnti {
        self.pool.rnti()
    }

    /// Register a PDSCH grant
    ///
    /// A grant on an idle process, or one that toggles the NDI, starts a new
    /// transport block and clears the soft buffer. Otherwise the grant is a
    /// retransmission of the buffered one.
    pub fn new_grant_dl(&self, grant: TbGrant) -> DlHarqAction {
        if grant.tbs == 0 {
            error!("rnti={} pid={} DL grant with empty transport block", grant.rnti, grant.pid);
            return DlHarqAction::Disabled;
        }
        self.pool
            .with_proc(grant.pid, |process, metrics| {
                let new_tx = process.is_new_tx(&grant);
                if new_tx {
                    process.softbuffer.lock().reset(grant.tbs);
                    process.nof_retx = 0;
                } else {
                    process.nof_retx += 1;
                    metrics.lock().retx += 1;
                }
                process.ndi = grant.ndi;
                process.state = HarqState::AwaitingDecode;
                process.grant = Some(grant);
                debug!(
                    "rnti={} pid={} DL {} tbs={} rv={} slot={}",
                    grant.rnti,
                    grant.pid,
                    if new_tx { "newtx" } else { "retx" },
                    grant.tbs,
                    grant.rv,
                    grant.tx_slot
                );
                DlHarqAction::Tx(process.action(&grant, new_tx))
            })
            .unwrap_or(DlHarqAction::Disabled)
    }

    /// Apply the HARQ-ACK of process `pid`
    pub fn tb_decoded(&self, pid: usize, result: TbDecodeResult) -> Option<Bytes> {
        self.pool.tb_decoded(pid, result)
    }

    /// Number of retransmissions of the transport block in process `pid`
    pub fn get_nof_retx(&self, pid: usize) -> Option<u32> {
        self.pool.proc_info(pid).map(|p| p.nof_retx)
    }

    pub fn proc_info(&self, pid: usize) -> Option<HarqProcInfo> {
        self.pool.proc_info(pid)
    }

    /// First process waiting for a retransmission
    pub fn find_pending_retx(&self) -> Option<usize> {
        self.pool.find_pending_retx()
    }

    /// First idle process
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
