//! Time-domain round robin
//!
//! The UE list is rotated by the slot counter, so the first UE served moves
//! on by one every slot without the policy keeping state.

use super::{rotated_order, try_dl_newtx, try_dl_retx, try_ul_newtx, try_ul_retx, SchedPolicy};
use crate::slot_alloc::BwpSlotAllocator;
use crate::ue::SlotUeMap;

#[derive(Debug, Default, Clone, Copy)]
pub struct RoundRobinPolicy;

impl SchedPolicy for RoundRobinPolicy {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn sched_dl_users(&mut self, ues: &mut SlotUeMap, alloc: &mut BwpSlotAllocator<'_>) {
        if !alloc.is_dl_slot() {
            return;
        }
        let order = rotated_order(ues, alloc.slot().count() as usize);
        for rnti in &order {
            if let Some(ue) = ues.get_mut(rnti) {
                try_dl_retx(ue, alloc);
            }
        }
        for rnti in &order {
            if let Some(ue) = ues.get_mut(rnti) {
                try_dl_newtx(ue, alloc);
            }
        }
    }

    fn sched_ul_users(&mut self, ues: &mut SlotUeMap, alloc: &mut BwpSlotAllocator<'_>) {
        if !alloc.is_dl_slot() {
            return;
        }
        let order = rotated_order(ues, alloc.slot().count() as usize);
        for rnti in &order {
            if let Some(ue) = ues.get_mut(rnti) {
                try_ul_retx(ue, alloc);
            }
        }
        for rnti in &order {
            if let Some(ue) = ues.get_mut(rnti) {
                try_ul_newtx(ue, alloc);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harq::TbDecodeResult;
    use crate::policy::test_utils::PolicyBench;
    use common::types::{Rnti, SlotPoint};

    fn slot(count: u32) -> SlotPoint {
        SlotPoint::from_count(0, count).unwrap()
    }

    #[test]
    fn test_first_ue_rotates_with_slot() {
        // Each UE wants the whole carrier, so only the first one served gets data
        let mut bench = PolicyBench::new(3, 100_000, 0);
        let mut first = Vec::new();
        for count in 1..4 {
            let now = slot(count);
            let mut ues = bench.slot_ues(now);
            let mut alloc = BwpSlotAllocator::new(&mut bench.grid, &bench.args, now);
            RoundRobinPolicy.sched_dl_users(&mut ues, &mut alloc);
            let served: Vec<Rnti> = ues.values().filter(|u| u.dl_scheduled).map(|u| u.rnti).collect();
            assert_eq!(served.len(), 1);
            first.push(served[0]);
            // keep HARQ processes free for the next slot
            for ue in &bench.ues {
                let harq = &ue.carrier(0).unwrap().harq_dl;
                for pid in 0..harq.nof_procs() {
                    harq.tb_decoded(pid, TbDecodeResult::ack());
                }
            }
        }
        assert_eq!(first, vec![Rnti(0x4602), Rnti(0x4603), Rnti(0x4601)]);
    }

    #[test]
    fn test_retx_served_before_newtx() {
        let mut bench = PolicyBench::new(2, 100_000, 0);
        let now = slot(1);
        let mut ues = bench.slot_ues(now);
        {
            let mut alloc = BwpSlotAllocator::new(&mut bench.grid, &bench.args, now);
            RoundRobinPolicy.sched_dl_users(&mut ues, &mut alloc);
        }
        let nacked = ues.values().find(|u| u.dl_scheduled).map(|u| u.rnti).unwrap();
        let ue = bench.ues.iter().find(|u| u.rnti() == nacked).unwrap();
        ue.carrier(0).unwrap().harq_dl.tb_decoded(0, TbDecodeResult::nack());

        // slot 2 rotates the other UE first, the retransmission still goes out
        let later = slot(2);
        let mut ues = bench.slot_ues(later);
        let mut alloc = BwpSlotAllocator::new(&mut bench.grid, &bench.args, later);
        RoundRobinPolicy.sched_dl_users(&mut ues, &mut alloc);
        let retx = &ues[&nacked];
        assert!(retx.dl_scheduled);
        assert_eq!(retx.dl_bytes_scheduled, 0);
    }

    #[test]
    fn test_ul_users_share_prbs() {
        let mut bench = PolicyBench::new(2, 0, 100);
        let now = slot(1);
        let mut ues = bench.slot_ues(now);
        let mut alloc = BwpSlotAllocator::new(&mut bench.grid, &bench.args, now);
        RoundRobinPolicy.sched_ul_users(&mut ues, &mut alloc);
        assert!(ues.values().all(|u| u.ul_scheduled && u.ul_bytes_scheduled == 100));
        assert_eq!(alloc.nof_ul_grants(), 2);
    }
}
