//! Proportional fair
//!
//! Retransmissions go first, then new transmissions in decreasing order of
//! the achievable rate over the average rate served so far. The achievable
//! rate is the spectral efficiency of the UE's MCS.

use std::cmp::Ordering;

use common::types::Rnti;

use super::{try_dl_newtx, try_dl_retx, try_ul_newtx, try_ul_retx, SchedPolicy};
use crate::config::McsTable;
use crate::slot_alloc::BwpSlotAllocator;
use crate::tbs::mcs_entry;
use crate::ue::SlotUeMap;

/// Floor on the average rate so new UEs get a finite, high priority
const MIN_AVG_RATE: f32 = 1.0;

#[derive(Debug, Default, Clone, Copy)]
pub struct PropFairPolicy;

fn spectral_efficiency(mcs: u8, table: McsTable) -> f32 {
    mcs_entry(table, mcs).map_or(0.0, |e| e.qm as f32 * e.rate_x1024 / 1024.0)
}

/// UEs ordered by decreasing metric, ties broken by RNTI
fn pf_order(mut metrics: Vec<(Rnti, f32)>) -> Vec<Rnti> {
    metrics.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then(a.0.cmp(&b.0)));
    metrics.into_iter().map(|(rnti, _)| rnti).collect()
}

impl SchedPolicy for PropFairPolicy {
    fn name(&self) -> &'static str {
        "prop_fair"
    }

    fn sched_dl_users(&mut self, ues: &mut SlotUeMap, alloc: &mut BwpSlotAllocator<'_>) {
        if !alloc.is_dl_slot() {
            return;
        }
        for ue in ues.values_mut() {
            try_dl_retx(ue, alloc);
        }
        let table = alloc.mcs_table();
        let order = pf_order(
            ues.values()
                .filter(|ue| ue.wants_dl_newtx())
                .map(|ue| (ue.rnti, spectral_efficiency(ue.dl_mcs, table) / ue.avg_dl_rate.max(MIN_AVG_RATE)))
                .collect(),
        );
        for rnti in order {
            if let Some(ue) = ues.get_mut(&rnti) {
                try_dl_newtx(ue, alloc);
            }
        }
    }

    fn sched_ul_users(&mut self, ues: &mut SlotUeMap, alloc: &mut BwpSlotAllocator<'_>) {
        if !alloc.is_dl_slot() {
            return;
        }
        for ue in ues.values_mut() {
            try_ul_retx(ue, alloc);
        }
        let table = alloc.mcs_table();
        let order = pf_order(
            ues.values()
                .filter(|ue| ue.wants_ul_newtx())
                .map(|ue| (ue.rnti, spectral_efficiency(ue.ul_mcs, table) / ue.avg_ul_rate.max(MIN_AVG_RATE)))
                .collect(),
        );
        for rnti in order {
            if let Some(ue) = ues.get_mut(&rnti) {
                try_ul_newtx(ue, alloc);
            }
        }
    }
}
