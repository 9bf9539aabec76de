//! Emulated UEs behind a loopback PHY
//!
//! Each emulated UE attaches with a RACH, then generates DL and UL traffic
//! and answers every PDSCH and PUSCH it is scheduled with an ACK or NACK
//! drawn from the configured BLER.

use bytes::Bytes;
use common::types::{Rnti, SlotPoint};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sched::events::RachInfo;
use sched::{FeedbackHandle, SlotResult};
use tracing::{debug, info, warn};

use crate::config::EmulationConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UeState {
    Idle,
    /// Preamble sent, waiting for the RAR
    RachSent,
    /// Msg3 granted, connected once it decodes
    Msg3Pending,
    Connected,
}

#[derive(Debug)]
struct EmulatedUe {
    rnti: Rnti,
    cc: usize,
    state: UeState,
    dl_queue: u32,
    ul_queue: u32,
    cqi: u8,
}

/// Loopback PHY with a population of emulated UEs
pub struct UeEmulator {
    cfg: EmulationConfig,
    feedback: FeedbackHandle,
    rng: StdRng,
    ues: Vec<EmulatedUe>,
    delivered_ul_bytes: u64,
}

impl UeEmulator {
    pub fn new(cfg: EmulationConfig, feedback: FeedbackHandle, nof_cells: usize) -> Self {
        let ues = (0..cfg.nof_ues)
            .map(|i| EmulatedUe {
                rnti: Rnti(cfg.first_rnti.wrapping_add(i)),
                cc: i as usize % nof_cells.max(1),
                state: UeState::Idle,
                dl_queue: 0,
                ul_queue: 0,
                cqi: 15,
            })
            .collect();
        Self {
            rng: StdRng::seed_from_u64(cfg.seed),
            cfg,
            feedback,
            ues,
            delivered_ul_bytes: 0,
        }
    }

    pub fn nof_connected(&self) -> usize {
        self.ues.iter().filter(|ue| ue.state == UeState::Connected).count()
    }

    pub fn delivered_ul_bytes(&self) -> u64 {
        self.delivered_ul_bytes
    }

    /// Uplink activity of the UEs before the scheduler runs `slot`
    pub fn on_slot_start(&mut self, slot: SlotPoint) {
        let cfg = &self.cfg;
        let feedback = &self.feedback;
        let rng = &mut self.rng;
        // one preamble per slot
        if let Some(ue) = self.ues.iter_mut().find(|ue| ue.state == UeState::Idle) {
            info!("rnti={} sending preamble in slot {}", ue.rnti, slot);
            feedback.dl_rach_info(RachInfo {
                cc: ue.cc,
                prach_slot: slot,
                preamble_idx: rng.gen_range(0..64),
                tc_rnti: ue.rnti,
            });
            ue.state = UeState::RachSent;
        }

        for ue in self.ues.iter_mut().filter(|ue| ue.state == UeState::Connected) {
            if cfg.dl_bytes_per_slot > 0 {
                let arrival = rng.gen_range(0..=2 * cfg.dl_bytes_per_slot);
                if arrival > 0 {
                    ue.dl_queue = ue.dl_queue.saturating_add(arrival);
                    feedback.dl_buffer_state(ue.rnti, 4, ue.dl_queue);
                }
            }
            if cfg.ul_bytes_per_slot > 0 {
                let was_empty = ue.ul_queue == 0;
                ue.ul_queue = ue.ul_queue.saturating_add(rng.gen_range(0..=2 * cfg.ul_bytes_per_slot));
                if was_empty && ue.ul_queue > 0 {
                    feedback.ul_sr(ue.rnti);
                }
            }
            if cfg.cqi_period_slots > 0 && slot.count() % cfg.cqi_period_slots == 0 {
                ue.cqi = (ue.cqi as i32 + rng.gen_range(-2..=2)).clamp(1, 15) as u8;
                feedback.dl_cqi(ue.rnti, ue.cc, ue.cqi);
                feedback.ul_cqi(ue.rnti, ue.cc, ue.cqi);
            }
        }
    }

    /// Answer the transmissions of a slot result
    pub fn on_slot_result(&mut self, result: &SlotResult) {
        for rar in &result.dl.rar {
            for msg3 in &rar.msg3 {
                if let Some(ue) = self
                    .ues
                    .iter_mut()
                    .find(|ue| ue.rnti == msg3.tc_rnti && ue.state == UeState::RachSent)
                {
                    debug!("rnti={} RAR received, Msg3 in slot {}", ue.rnti, msg3.pusch_slot);
                    ue.state = UeState::Msg3Pending;
                }
            }
        }

        for pdsch in &result.dl.pdsch {
            let Some(tb) = pdsch.action.tb() else {
                continue;
            };
            let ack = !self.rng.gen_bool(self.cfg.bler);
            // retransmissions are carried by HARQ, the queue only loses new data
            if let Some(ue) = self.ues.iter_mut().find(|ue| ue.rnti == pdsch.rnti) {
                if tb.new_tx {
                    ue.dl_queue = ue.dl_queue.saturating_sub(tb.tbs);
                }
            }
            if let Err(e) = self.feedback.dl_ack_info(pdsch.rnti, result.cc, tb.pid, ack) {
                warn!("rnti={} HARQ-ACK not delivered: {}", pdsch.rnti, e);
            }
        }

        for pusch in &result.ul.pusch {
            let Some(tb) = pusch.action.tb() else {
                continue;
            };
            let crc_ok = !self.rng.gen_bool(self.cfg.bler);
            let payload = Bytes::from(vec![0u8; tb.tbs as usize]);
            match self.feedback.ul_crc_info(pusch.rnti, result.cc, tb.pid, crc_ok, Some(payload)) {
                Ok(Some(delivered)) => self.delivered_ul_bytes += delivered.len() as u64,
                Ok(None) => {}
                Err(e) => warn!("rnti={} CRC not delivered: {}", pusch.rnti, e),
            }
            let Some(ue) = self.ues.iter_mut().find(|ue| ue.rnti == pusch.rnti) else {
                continue;
            };
            match ue.state {
                // Msg3 or its retransmission
                UeState::Msg3Pending if crc_ok => {
                    info!("rnti={} connected", ue.rnti);
                    ue.state = UeState::Connected;
                }
                UeState::Connected if tb.new_tx && !pusch.msg3 => {
                    ue.ul_queue = ue.ul_queue.saturating_sub(tb.tbs);
                    self.feedback.ul_bsr(ue.rnti, 0, ue.ul_queue);
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sched::config::{default_cell_config, SchedArgs};
    use sched::Scheduler;

    #[test]
    fn test_emulated_ues_attach_and_exchange_data() {
        let mut sched = Scheduler::new(SchedArgs::default());
        sched.cell_cfg(&[default_cell_config()]).unwrap();
        let cfg = EmulationConfig { nof_ues: 2, bler: 0.0, ..EmulationConfig::default() };
        let mut emulator = UeEmulator::new(cfg, sched.feedback_handle(), 1);

        for count in 0..200 {
            let slot = SlotPoint::from_count(0, count).unwrap();
            emulator.on_slot_start(slot);
            let result = sched.run_slot(slot, 0).unwrap();
            emulator.on_slot_result(&result);
        }

        assert_eq!(emulator.nof_connected(), 2);
        assert!(emulator.delivered_ul_bytes() > 0);
        let metrics = sched.get_metrics();
        assert!(metrics.cells[0].pdsch_grants > 0);
        assert_eq!(metrics.cells[0].rar_grants, 2);
    }
}
