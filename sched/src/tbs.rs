//! Link adaptation tables
//!
//! MCS tables and the transport block size procedure of TS 38.214
//! Sections 5.1.3.1 and 5.1.3.2, plus the CQI to MCS mapping used by the
//! scheduler when no fixed MCS is configured.

use crate::config::McsTable;

/// Modulation order and target code rate of one MCS index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct McsEntry {
    /// Modulation order Qm
    pub qm: u32,
    /// Target code rate R x 1024
    pub rate_x1024: f32,
}

const fn e(qm: u32, rate_x1024: f32) -> McsEntry {
    McsEntry { qm, rate_x1024 }
}

/// TS 38.214 Table 5.1.3.1-1
const MCS_TABLE_QAM64: [McsEntry; 29] = [
    e(2, 120.0), e(2, 157.0), e(2, 193.0), e(2, 251.0), e(2, 308.0),
    e(2, 379.0), e(2, 449.0), e(2, 526.0), e(2, 602.0), e(2, 679.0),
    e(4, 340.0), e(4, 378.0), e(4, 434.0), e(4, 490.0), e(4, 553.0),
    e(4, 616.0), e(4, 658.0), e(6, 438.0), e(6, 466.0), e(6, 517.0),
    e(6, 567.0), e(6, 616.0), e(6, 666.0), e(6, 719.0), e(6, 772.0),
    e(6, 822.0), e(6, 873.0), e(6, 910.0), e(6, 948.0),
];

/// TS 38.214 Table 5.1.3.1-2
const MCS_TABLE_QAM256: [McsEntry; 28] = [
    e(2, 120.0), e(2, 193.0), e(2, 308.0), e(2, 449.0), e(2, 602.0),
    e(4, 378.0), e(4, 434.0), e(4, 490.0), e(4, 553.0), e(4, 616.0),
    e(4, 658.0), e(6, 466.0), e(6, 517.0), e(6, 567.0), e(6, 616.0),
    e(6, 666.0), e(6, 719.0), e(6, 772.0), e(6, 822.0), e(6, 873.0),
    e(8, 682.5), e(8, 711.0), e(8, 754.0), e(8, 797.0), e(8, 841.0),
    e(8, 885.0), e(8, 916.5), e(8, 948.0),
];

/// TS 38.214 Table 5.1.3.2-1, TBS for N_info <= 3824
const TBS_TABLE: [u32; 93] = [
    24, 32, 40, 48, 56, 64, 72, 80, 88, 96, 104, 112, 120, 128, 136, 144, 152, 160, 168, 176,
    184, 192, 208, 224, 240, 256, 272, 288, 304, 320, 336, 352, 368, 384, 408, 432, 456, 480,
    504, 528, 552, 576, 608, 640, 672, 704, 736, 768, 808, 848, 888, 928, 984, 1032, 1064,
    1128, 1160, 1192, 1224, 1256, 1288, 1320, 1352, 1416, 1480, 1544, 1608, 1672, 1736, 1800,
    1864, 1928, 2024, 2088, 2152, 2216, 2280, 2408, 2472, 2536, 2600, 2664, 2728, 2792, 2856,
    2976, 3104, 3240, 3368, 3496, 3624, 3752, 3824,
];

/// Look up an MCS index
pub fn mcs_entry(table: McsTable, mcs: u8) -> Option<McsEntry> {
    match table {
        McsTable::Qam64 => MCS_TABLE_QAM64.get(mcs as usize).copied(),
        McsTable::Qam256 => MCS_TABLE_QAM256.get(mcs as usize).copied(),
    }
}

/// Highest MCS index carrying a code rate in the table
pub fn max_mcs(table: McsTable) -> u8 {
    match table {
        McsTable::Qam64 => (MCS_TABLE_QAM64.len() - 1) as u8,
        McsTable::Qam256 => (MCS_TABLE_QAM256.len() - 1) as u8,
    }
}

/// Transport block size in bits (TS 38.214 Section 5.1.3.2)
///
/// `nof_re` is the number of REs available for the shared channel over the
/// whole allocation. Returns 0 when the MCS index is reserved.
pub fn calc_tbs(nof_re: u32, mcs: u8, table: McsTable, nof_layers: u32) -> u32 {
    let Some(entry) = mcs_entry(table, mcs) else {
        return 0;
    };
    if nof_re == 0 {
        return 0;
    }
    let rate = entry.rate_x1024 as f64 / 1024.0;
    let n_info = nof_re as f64 * rate * entry.qm as f64 * nof_layers as f64;

    if n_info <= 3824.0 {
        let n = ((n_info.log2().floor() as i32) - 6).max(3);
        let step = 2f64.powi(n);
        let n_info_q = (step * (n_info / step).floor()).max(24.0) as u32;
        return TBS_TABLE
            .iter()
            .copied()
            .find(|tbs| *tbs >= n_info_q)
            .unwrap_or(3824);
    }

    let n = ((n_info - 24.0).log2().floor() as i32) - 5;
    let step = 2f64.powi(n);
    let n_info_q = (step * ((n_info - 24.0) / step).round()).max(3840.0);
    if rate <= 0.25 {
        let c = ((n_info_q + 24.0) / 3816.0).ceil();
        (8.0 * c * ((n_info_q + 24.0) / (8.0 * c)).ceil() - 24.0) as u32
    } else if n_info_q > 8424.0 {
        let c = ((n_info_q + 24.0) / 8424.0).ceil();
        (8.0 * c * ((n_info_q + 24.0) / (8.0 * c)).ceil() - 24.0) as u32
    } else {
        (8.0 * ((n_info_q + 24.0) / 8.0).ceil() - 24.0) as u32
    }
}

/// MCS for a reported wideband CQI, `None` when the UE reported out of range (CQI 0)
pub fn cqi_to_mcs(cqi: u8, table: McsTable) -> Option<u8> {
    const QAM64: [u8; 16] = [0, 0, 0, 2, 4, 6, 8, 11, 13, 15, 18, 20, 22, 24, 26, 28];
    const QAM256: [u8; 16] = [0, 0, 1, 3, 5, 7, 9, 11, 13, 15, 17, 19, 21, 23, 25, 27];
    if cqi == 0 || cqi as usize >= QAM64.len() {
        return None;
    }
    Some(match table {
        McsTable::Qam64 => QAM64[cqi as usize],
        McsTable::Qam256 => QAM256[cqi as usize],
    })
}
