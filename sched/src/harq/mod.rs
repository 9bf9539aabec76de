//! HARQ entities (TS 38.321 Sections 5.3.2 and 5.4.2)
//!
//! One DL and one UL entity per UE and carrier. The scheduler registers
//! grants from the slot thread while PHY workers report decode results
//! concurrently, so the process table sits behind a reader-writer lock:
//! grants and decode results take the read lock plus the process mutex,
//! reconfiguration and reset take the write lock. Metrics have their own
//! mutex.

pub mod dl;
pub mod ul;

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use common::types::{Rnti, SlotPoint};
use common::utils::bytes_to_hex;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, trace, warn};

pub use dl::{DlHarqAction, DlHarqEntity};
pub use ul::{UlHarqAction, UlHarqEntity};

/// Redundancy version sequence for retransmissions
pub const RV_SEQUENCE: [u8; 4] = [0, 2, 3, 1];

/// Redundancy version of the `nof_retx`-th retransmission
pub fn rv_for_retx(nof_retx: u32) -> u8 {
    RV_SEQUENCE[nof_retx as usize % RV_SEQUENCE.len()]
}

/// HARQ process state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HarqState {
    /// No transport block in flight
    Idle,
    /// Transmitted, feedback pending
    AwaitingDecode,
    /// Last transmission failed, waiting for a retransmission
    Nacked,
}

/// Soft-combining buffer of one HARQ process
#[derive(Debug, Clone, Default)]
pub struct SoftBuffer {
    tbs: u32,
    data: BytesMut,
}

impl SoftBuffer {
    /// Zeroed buffer for a transport block of `tbs` bytes
    pub fn new(tbs: u32) -> Self {
        let mut buffer = Self::default();
        buffer.reset(tbs);
        buffer
    }

    /// Drop the accumulated soft bits and resize for a new transport block
    pub fn reset(&mut self, tbs: u32) {
        self.tbs = tbs;
        self.data.clear();
        self.data.resize(tbs as usize, 0);
    }

    pub fn tbs(&self) -> u32 {
        self.tbs
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Accumulate soft values of a new (re)transmission
    pub fn combine(&mut self, soft: &[u8]) {
        for (acc, value) in self.data.iter_mut().zip(soft) {
            *acc = acc.saturating_add(*value);
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Grant registered in a HARQ process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TbGrant {
    pub rnti: Rnti,
    pub pid: usize,
    pub ndi: bool,
    pub rv: u8,
    /// Transport block size in bytes
    pub tbs: u32,
    pub mcs: u8,
    /// RBGs for DL, PRBs for UL
    pub nof_rbs: u32,
    /// Slot of the PDSCH/PUSCH transmission
    pub tx_slot: SlotPoint,
    /// Slot the HARQ feedback (HARQ-ACK or CRC) is expected in
    pub ack_slot: SlotPoint,
}

/// Transport block transmission handed to the PHY
#[derive(Debug, Clone)]
pub struct TbAction {
    pub pid: usize,
    pub new_tx: bool,
    pub ndi: bool,
    pub rv: u8,
    pub tbs: u32,
    pub softbuffer: Arc<Mutex<SoftBuffer>>,
}

/// Decode result reported by the PHY
#[derive(Debug, Clone, Default)]
pub struct TbDecodeResult {
    pub ack: bool,
    /// Decoded payload, UL only
    pub payload: Option<Bytes>,
}

impl TbDecodeResult {
    pub fn ack() -> Self {
        Self { ack: true, payload: None }
    }

    pub fn nack() -> Self {
        Self { ack: false, payload: None }
    }
}

/// Aggregated counters of one HARQ entity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HarqMetrics {
    pub rx_ok: u64,
    pub rx_ko: u64,
    /// Acknowledged bits
    pub rx_brate: u64,
    pub retx: u64,
    /// Transport blocks dropped after the last retransmission failed
    pub dropped: u64,
}

/// Snapshot of a HARQ process for the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarqProcInfo {
    pub pid: usize,
    pub state: HarqState,
    pub ndi: bool,
    pub nof_retx: u32,
    pub tbs: u32,
    pub mcs: u8,
    pub nof_rbs: u32,
}

#[derive(Debug)]
pub(crate) struct HarqProc {
    pid: usize,
    state: HarqState,
    ndi: bool,
    nof_retx: u32,
    grant: Option<TbGrant>,
    softbuffer: Arc<Mutex<SoftBuffer>>,
}

impl HarqProc {
    fn new(pid: usize) -> Self {
        Self {
            pid,
            state: HarqState::Idle,
            ndi: false,
            nof_retx: 0,
            grant: None,
            softbuffer: Arc::new(Mutex::new(SoftBuffer::default())),
        }
    }

    fn reset(&mut self) {
        self.state = HarqState::Idle;
        self.nof_retx = 0;
        self.grant = None;
    }

    fn info(&self) -> HarqProcInfo {
        HarqProcInfo {
            pid: self.pid,
            state: self.state,
            ndi: self.ndi,
            nof_retx: self.nof_retx,
            tbs: self.grant.map(|g| g.tbs).unwrap_or(0),
            mcs: self.grant.map(|g| g.mcs).unwrap_or(0),
            nof_rbs: self.grant.map(|g| g.nof_rbs).unwrap_or(0),
        }
    }

    /// Whether a grant toggles to a new transport block
    fn is_new_tx(&self, grant: &TbGrant) -> bool {
        self.state == HarqState::Idle || self.ndi != grant.ndi
    }

    fn action(&self, grant: &TbGrant, new_tx: bool) -> TbAction {
        TbAction {
            pid: self.pid,
            new_tx,
            ndi: self.ndi,
            rv: grant.rv,
            tbs: grant.tbs,
            softbuffer: self.softbuffer.clone(),
        }
    }
}

#[derive(Debug)]
struct ProcTable {
    procs: Vec<Mutex<HarqProc>>,
    max_retx: u32,
    feedback_timeout: u32,
}

/// Process table and metrics shared by the DL and UL entities
#[derive(Debug)]
pub(crate) struct HarqProcPool {
    rnti: Rnti,
    cc: usize,
    dir: &'static str,
    table: RwLock<ProcTable>,
    metrics: Mutex<HarqMetrics>,
}

impl HarqProcPool {
    pub(crate) fn new(
        rnti: Rnti,
        cc: usize,
        dir: &'static str,
        nof_procs: usize,
        max_retx: u32,
        feedback_timeout: u32,
    ) -> Self {
        Self {
            rnti,
            cc,
            dir,
            table: RwLock::new(ProcTable {
                procs: (0..nof_procs).map(|pid| Mutex::new(HarqProc::new(pid))).collect(),
                max_retx,
                feedback_timeout,
            }),
            metrics: Mutex::new(HarqMetrics::default()),
        }
    }

    pub(crate) fn rnti(&self) -> Rnti {
        self.rnti
    }

    pub(crate) fn nof_procs(&self) -> usize {
        self.table.read().procs.len()
    }

    /// Run `f` on process `pid` under the read lock
    pub(crate) fn with_proc<R>(
        &self,
        pid: usize,
        f: impl FnOnce(&mut HarqProc, &Mutex<HarqMetrics>) -> R,
    ) -> Option<R> {
        let table = self.table.read();
        let Some(slot) = table.procs.get(pid) else {
            warn!("rnti={} cc={} {} pid={} out of range", self.rnti, self.cc, self.dir, pid);
            return None;
        };
        let mut process = slot.lock();
        Some(f(&mut process, &self.metrics))
    }

    pub(crate) fn proc_info(&self, pid: usize) -> Option<HarqProcInfo> {
        self.table.read().procs.get(pid).map(|p| p.lock().info())
    }

    pub(crate) fn find_pending_retx(&self) -> Option<usize> {
        self.find(|p| p.state == HarqState::Nacked)
    }

    pub(crate) fn find_empty(&self) -> Option<usize> {
        self.find(|p| p.state == HarqState::Idle)
    }

    fn find(&self, pred: impl Fn(&HarqProc) -> bool) -> Option<usize> {
        let table = self.table.read();
        let found = table.procs.iter().position(|p| pred(&p.lock()));
        found
    }

    /// Apply a decode result to process `pid`
    ///
    /// Returns the payload on success.
    pub(crate) fn tb_decoded(&self, pid: usize, result: TbDecodeResult) -> Option<Bytes> {
        let table = self.table.read();
        let max_retx = table.max_retx;
        let slot = table.procs.get(pid)?;
        let mut process = slot.lock();
        if process.state != HarqState::AwaitingDecode {
            warn!(
                "rnti={} cc={} {} pid={} unexpected decode result in state {:?}",
                self.rnti, self.cc, self.dir, pid, process.state
            );
            return None;
        }

        if result.ack {
            let tbs = process.grant.map(|g| g.tbs).unwrap_or(0);
            process.reset();
            let mut metrics = self.metrics.lock();
            metrics.rx_ok += 1;
            metrics.rx_brate += tbs as u64 * 8;
            drop(metrics);
            if let Some(payload) = &result.payload {
                trace!(
                    "rnti={} cc={} {} pid={} TB ok, {} bytes: {}",
                    self.rnti,
                    self.cc,
                    self.dir,
                    pid,
                    payload.len(),
                    bytes_to_hex(&payload[..payload.len().min(16)])
                );
            }
            return result.payload;
        }

        self.nack(&mut process, max_retx);
        None
    }

    fn nack(&self, process: &mut HarqProc, max_retx: u32) {
        let mut metrics = self.metrics.lock();
        metrics.rx_ko += 1;
        if process.nof_retx >= max_retx {
            metrics.dropped += 1;
            drop(metrics);
            debug!(
                "rnti={} cc={} {} pid={} dropped after {} retransmissions",
                self.rnti, self.cc, self.dir, process.pid, process.nof_retx
            );
            process.reset();
        } else {
            process.state = HarqState::Nacked;
        }
    }

    /// Count feedback that never arrived as a NACK
    ///
    /// Returns the number of processes affected.
    pub(crate) fn clear_stale(&self, now: SlotPoint) -> usize {
        let table = self.table.read();
        let mut nof_stale = 0;
        for slot in &table.procs {
            let mut process = slot.lock();
            if process.state != HarqState::AwaitingDecode {
                continue;
            }
            let Some(grant) = process.grant else {
                continue;
            };
            if now - grant.ack_slot > table.feedback_timeout as i32 {
                warn!(
                    "rnti={} cc={} {} pid={} no feedback for slot {}, assuming NACK",
                    self.rnti, self.cc, self.dir, process.pid, grant.ack_slot
                );
                self.nack(&mut process, table.max_retx);
                nof_stale += 1;
            }
        }
        nof_stale
    }

    pub(crate) fn get_metrics(&self) -> HarqMetrics {
        *self.metrics.lock()
    }

    pub(crate) fn reset_metrics(&self) {
        *self.metrics.lock() = HarqMetrics::default();
    }

    /// Return every process to Idle
    pub(crate) fn reset(&self) {
        let mut table = self.table.write();
        for process in table.procs.iter_mut() {
            process.get_mut().reset();
        }
    }

    /// Resize the process table and update retransmission limits; all processes restart Idle
    pub(crate) fn set_config(&self, nof_procs: usize, max_retx: u32, feedback_timeout: u32) {
        let mut table = self.table.write();
        table.procs = (0..nof_procs).map(|pid| Mutex::new(HarqProc::new(pid))).collect();
        table.max_retx = max_retx;
        table.feedback_timeout = feedback_timeout;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_buffer() {
        let mut buffer = SoftBuffer::new(4);
        assert_eq!(buffer.len(), 4);
        buffer.combine(&[1, 2, 250, 7, 9]);
        buffer.combine(&[1, 2, 10]);
        assert_eq!(buffer.as_bytes(), &[2, 4, 255, 7]);
        buffer.reset(2);
        assert_eq!(buffer.as_bytes(), &[0, 0]);
        assert_eq!(buffer.tbs(), 2);
    }

    #[test]
    fn test_rv_sequence() {
        assert_eq!(rv_for_retx(0), 0);
        assert_eq!(rv_for_retx(1), 2);
        assert_eq!(rv_for_retx(3), 1);
        assert_eq!(rv_for_retx(4), 0);
    }
}
