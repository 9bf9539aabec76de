//! Per-slot scheduling policies
//!
//! A policy decides which UEs get a PDSCH or PUSCH in a slot and how many
//! resources each gets. Resource bookkeeping and PDCCH placement stay in the
//! [`BwpSlotAllocator`]; an allocation failure just skips the UE.

pub mod prop_fair;
pub mod round_robin;

use common::types::Rnti;
use tracing::trace;

use crate::config::PolicyKind;
use crate::slot_alloc::BwpSlotAllocator;
use crate::ue::{SlotUe, SlotUeMap};

pub use prop_fair::PropFairPolicy;
pub use round_robin::RoundRobinPolicy;

/// Scheduling policy, selected per cell at configuration time
pub trait SchedPolicy: Send {
    fn name(&self) -> &'static str;

    /// Schedule PDSCHs for the UEs of the slot
    fn sched_dl_users(&mut self, ues: &mut SlotUeMap, alloc: &mut BwpSlotAllocator<'_>);

    /// Schedule PUSCHs for the UEs of the slot
    fn sched_ul_users(&mut self, ues: &mut SlotUeMap, alloc: &mut BwpSlotAllocator<'_>);
}

/// Build the policy for `kind`
pub fn make_policy(kind: PolicyKind) -> Box<dyn SchedPolicy> {
    match kind {
        PolicyKind::RoundRobin => Box::new(RoundRobinPolicy),
        PolicyKind::ProportionalFair => Box::new(PropFairPolicy),
    }
}

/// Retransmit the NACKed DL process of `ue` with its original number of RBGs
pub(crate) fn try_dl_retx(ue: &mut SlotUe, alloc: &mut BwpSlotAllocator<'_>) -> bool {
    let Some(info) = ue.dl_retx else {
        return false;
    };
    if ue.dl_scheduled {
        return false;
    }
    let rbgs = alloc.dl_free_rbgs(info.nof_rbs);
    if rbgs.count() as u32 != info.nof_rbs {
        return false;
    }
    let ss_id = ue.params.data_ss_id();
    match alloc.alloc_pdsch(ue, ss_id, rbgs) {
        Ok(()) => true,
        Err(e) => {
            trace!("rnti={} DL retx skipped: {}", ue.rnti, e);
            false
        }
    }
}

/// New DL transmission sized to the pending bytes of `ue`
pub(crate) fn try_dl_newtx(ue: &mut SlotUe, alloc: &mut BwpSlotAllocator<'_>) -> bool {
    if !ue.wants_dl_newtx() {
        return false;
    }
    let nof_rbgs = alloc.dl_rbgs_for_bytes(ue.dl_mcs, ue.dl_pending_bytes);
    let rbgs = alloc.dl_free_rbgs(nof_rbgs);
    if rbgs.none() {
        return false;
    }
    let ss_id = ue.params.data_ss_id();
    match alloc.alloc_pdsch(ue, ss_id, rbgs) {
        Ok(()) => true,
        Err(e) => {
            trace!("rnti={} DL newtx skipped: {}", ue.rnti, e);
            false
        }
    }
}

/// Retransmit the failed UL process of `ue` with its original number of PRBs
pub(crate) fn try_ul_retx(ue: &mut SlotUe, alloc: &mut BwpSlotAllocator<'_>) -> bool {
    let Some(info) = ue.ul_retx else {
        return false;
    };
    if ue.ul_scheduled {
        return false;
    }
    let prbs = alloc.ul_free_prbs(info.nof_rbs);
    if prbs.len() != info.nof_rbs {
        return false;
    }
    match alloc.alloc_pusch(ue, prbs) {
        Ok(()) => true,
        Err(e) => {
            trace!("rnti={} UL retx skipped: {}", ue.rnti, e);
            false
        }
    }
}

/// New UL transmission sized to the buffer status of `ue`
pub(crate) fn try_ul_newtx(ue: &mut SlotUe, alloc: &mut BwpSlotAllocator<'_>) -> bool {
    if !ue.wants_ul_newtx() {
        return false;
    }
    let nof_prbs = alloc.ul_prbs_for_bytes(ue.ul_mcs, ue.ul_pending_bytes);
    let prbs = alloc.ul_free_prbs(nof_prbs);
    if prbs.is_empty() {
        return false;
    }
    match alloc.alloc_pusch(ue, prbs) {
        Ok(()) => true,
        Err(e) => {
            trace!("rnti={} UL newtx skipped: {}", ue.rnti, e);
            false
        }
    }
}

/// RNTIs of the slot rotated to start at position `offset`
pub(crate) fn rotated_order(ues: &SlotUeMap, offset: usize) -> Vec<Rnti> {
    let mut order: Vec<Rnti> = ues.keys().copied().collect();
    if !order.is_empty() {
        let len = order.len();
        order.rotate_left(offset % len);
    }
    order
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyKind;

    #[test]
    fn test_make_policy() {
        assert_eq!(make_policy(PolicyKind::RoundRobin).name(), "round_robin");
        assert_eq!(make_policy(PolicyKind::ProportionalFair).name(), "prop_fair");
    }

    #[test]
    fn test_rotated_order() {
        let bench = test_utils::PolicyBench::new(3, 0, 0);
        let slot = common::types::SlotPoint::from_count(0, 0).unwrap();
        let ues = bench.slot_ues(slot);
        assert_eq!(rotated_order(&ues, 4), vec![Rnti(0x4602), Rnti(0x4603), Rnti(0x4601)]);
        assert!(rotated_order(&SlotUeMap::new(), 3).is_empty());
    }
}
