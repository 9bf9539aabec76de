//! End-to-end slot scheduling scenarios driven through the public API

use bytes::Bytes;
use common::types::{Rnti, SlotPoint};
use common::RbgMask;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sched::config::{default_cell_config, PolicyKind, SchedArgs, UeConfig};
use sched::events::RachInfo;
use sched::Scheduler;

fn slot(count: u32) -> SlotPoint {
    SlotPoint::from_count(0, count).unwrap()
}

fn scheduler(policy: PolicyKind) -> Scheduler {
    let args = SchedArgs { policy, ..SchedArgs::default() };
    let mut sched = Scheduler::new(args);
    sched.cell_cfg(&[default_cell_config()]).unwrap();
    sched
}

#[test]
fn test_dl_traffic_drains_with_acks() {
    let mut sched = scheduler(PolicyKind::RoundRobin);
    let rnti = Rnti(0x4601);
    sched.ue_cfg(rnti, UeConfig::default()).unwrap();
    let feedback = sched.feedback_handle();
    feedback.dl_cqi(rnti, 0, 15);
    feedback.dl_buffer_state(rnti, 4, 3000);

    for count in 1..40 {
        let result = sched.run_slot(slot(count), 0).unwrap();
        for pdsch in &result.dl.pdsch {
            let tb = pdsch.action.tb().unwrap();
            feedback.dl_ack_info(pdsch.rnti, 0, tb.pid, true).unwrap();
        }
    }

    assert_eq!(sched.ue(rnti).unwrap().dl_pending_bytes(), 0);
    let metrics = sched.get_metrics();
    assert!(metrics.ues[0].dl_harq.rx_ok >= 1);
    assert_eq!(metrics.ues[0].dl_harq.rx_ko, 0);
    assert_eq!(metrics.cells[0].pdsch_grants, metrics.ues[0].dl_harq.rx_ok);
}

#[test]
fn test_nack_triggers_retransmission() {
    let mut sched = scheduler(PolicyKind::RoundRobin);
    let rnti = Rnti(0x4601);
    sched.ue_cfg(rnti, UeConfig::default()).unwrap();
    let feedback = sched.feedback_handle();
    feedback.dl_buffer_state(rnti, 4, 100);

    let first = sched.run_slot(slot(1), 0).unwrap();
    let newtx = first.pdsch_for(rnti).unwrap().clone();
    let tb = newtx.action.tb().cloned().unwrap();
    assert!(tb.new_tx);
    assert_eq!(tb.rv, 0);
    feedback.dl_ack_info(rnti, 0, tb.pid, false).unwrap();

    let second = sched.run_slot(slot(2), 0).unwrap();
    let retx = second.pdsch_for(rnti).unwrap();
    let retx_tb = retx.action.tb().unwrap();
    assert!(!retx_tb.new_tx);
    assert_eq!(retx_tb.pid, tb.pid);
    assert_eq!(retx_tb.ndi, tb.ndi);
    assert_ne!(retx_tb.rv, 0);
    assert_eq!(retx.tbs, newtx.tbs);
    assert_eq!(retx.rbgs.count(), newtx.rbgs.count());
}

#[test]
fn test_random_access_then_uplink_data() {
    let mut sched = scheduler(PolicyKind::RoundRobin);
    let feedback = sched.feedback_handle();
    let tc_rnti = Rnti(0x4650);
    feedback.dl_rach_info(RachInfo { cc: 0, prach_slot: slot(2), preamble_idx: 7, tc_rnti });

    let mut msg3_slot = None;
    let mut ul_data = Vec::new();
    for count in 3..40 {
        if count == 20 {
            feedback.ul_bsr(tc_rnti, 0, 300);
        }
        let result = sched.run_slot(slot(count), 0).unwrap();
        if let Some(rar) = result.dl.rar.first() {
            assert!(msg3_slot.is_none());
            msg3_slot = Some(rar.msg3[0].pusch_slot);
        }
        if let Some(pusch) = result.pusch_for(tc_rnti) {
            let tb = pusch.action.tb().unwrap();
            let delivered = feedback
                .ul_crc_info(tc_rnti, 0, tb.pid, true, Some(Bytes::from_static(b"sdu")))
                .unwrap();
            assert!(delivered.is_some());
            if pusch.msg3 {
                assert_eq!(Some(result.slot), msg3_slot);
                // contention resolved, keep the TC-RNTI as C-RNTI
                sched.ue_cfg(tc_rnti, UeConfig::default()).unwrap();
            } else {
                assert!(pusch.dci.is_some());
                ul_data.push(pusch.tbs);
            }
        }
    }

    assert!(msg3_slot.is_some());
    assert!(ul_data.iter().sum::<u32>() >= 300);
    assert_eq!(sched.ue(tc_rnti).unwrap().ul_pending_bytes(), 0);
    assert_eq!(sched.get_metrics().cells[0].msg3_grants, 1);
}

#[test]
fn test_expired_rar_frees_tc_rnti() {
    let mut sched = scheduler(PolicyKind::RoundRobin);
    let feedback = sched.feedback_handle();
    let tc_rnti = Rnti(0x4650);
    let window = sched.args().rar_window_slots;
    feedback.dl_rach_info(RachInfo { cc: 0, prach_slot: slot(2), preamble_idx: 5, tc_rnti });

    // first slot scheduled is already past the window
    let late = 2 + window + 5;
    let result = sched.run_slot(slot(late), 0).unwrap();
    assert!(result.dl.rar.is_empty());
    assert_eq!(sched.get_metrics().cells[0].rar_timeouts, 1);
    assert!(sched.ue(tc_rnti).is_none());
    assert_eq!(sched.nof_ues(), 0);
    assert!(feedback.dl_ack_info(tc_rnti, 0, 0, true).is_err());

    // the same TC-RNTI attaches on the next attempt
    feedback.dl_rach_info(RachInfo { cc: 0, prach_slot: slot(late), preamble_idx: 6, tc_rnti });
    let mut answered = false;
    for count in late + 1..=late + window {
        let result = sched.run_slot(slot(count), 0).unwrap();
        answered |= result
            .dl
            .rar
            .iter()
            .any(|rar| rar.msg3.iter().any(|msg3| msg3.tc_rnti == tc_rnti));
    }
    assert!(answered);
    assert!(sched.ue(tc_rnti).is_some());
    assert_eq!(sched.get_metrics().cells[0].rar_timeouts, 1);
}

#[test]
fn test_prop_fair_shares_the_carrier() {
    let mut sched = scheduler(PolicyKind::ProportionalFair);
    let feedback = sched.feedback_handle();
    let rntis = [Rnti(0x4601), Rnti(0x4602)];
    for rnti in rntis {
        sched.ue_cfg(rnti, UeConfig::default()).unwrap();
        feedback.dl_buffer_state(rnti, 4, 1_000_000);
    }

    let mut served = [0u32; 2];
    for count in 1..21 {
        let result = sched.run_slot(slot(count), 0).unwrap();
        for pdsch in &result.dl.pdsch {
            let idx = rntis.iter().position(|r| *r == pdsch.rnti).unwrap();
            served[idx] += 1;
            feedback
                .dl_ack_info(pdsch.rnti, 0, pdsch.action.tb().unwrap().pid, true)
                .unwrap();
        }
    }
    assert!(served.iter().all(|n| *n >= 5), "served={:?}", served);
}

#[test]
fn test_random_load_keeps_grants_disjoint() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut sched = scheduler(PolicyKind::RoundRobin);
    let feedback = sched.feedback_handle();
    let rntis: Vec<Rnti> = (0..6).map(|i| Rnti(0x4601 + i)).collect();
    for rnti in &rntis {
        sched.ue_cfg(*rnti, UeConfig::default()).unwrap();
    }

    for count in 1..300 {
        for rnti in &rntis {
            if rng.gen_bool(0.2) {
                feedback.dl_buffer_state(*rnti, 4, rng.gen_range(10..5000));
            }
            if rng.gen_bool(0.1) {
                feedback.ul_bsr(*rnti, 0, rng.gen_range(10..2000));
            }
            if rng.gen_bool(0.05) {
                feedback.dl_cqi(*rnti, 0, rng.gen_range(1..16));
            }
        }

        let result = sched.run_slot(slot(count), 0).unwrap();
        let args = sched.args();
        assert!(result.dl.pdsch.len() <= args.max_dl_grants_per_slot);
        assert!(result.ul.pusch.len() <= args.max_ul_grants_per_slot);

        let mut used = RbgMask::new(13);
        for pdsch in &result.dl.pdsch {
            assert!(!used.intersects(&pdsch.rbgs));
            used |= pdsch.rbgs;
            assert!(pdsch.dci < result.dl.pdcch_dl.len());
        }
        let mut pusch_prbs: Vec<(u32, u32)> =
            result.ul.pusch.iter().map(|p| (p.prbs.start, p.prbs.stop)).collect();
        pusch_prbs.sort();
        assert!(pusch_prbs.windows(2).all(|w| w[0].1 <= w[1].0));

        for pdsch in &result.dl.pdsch {
            let tb = pdsch.action.tb().unwrap();
            feedback.dl_ack_info(pdsch.rnti, 0, tb.pid, rng.gen_bool(0.8)).unwrap();
        }
        for pusch in &result.ul.pusch {
            let tb = pusch.action.tb().unwrap();
            feedback
                .ul_crc_info(pusch.rnti, 0, tb.pid, rng.gen_bool(0.8), None)
                .unwrap();
        }
    }

    let metrics = sched.get_metrics();
    assert_eq!(metrics.ues.len(), rntis.len());
    assert!(metrics.cells[0].pdsch_grants > 0);
    assert!(serde_json::to_string(&metrics).is_ok());
}
