//! PDCCH candidate CCE positions (TS 38.213 Section 10.1)

use crate::config::MAX_NOF_AGGR_LEVELS;

/// Maximum number of control symbols, CFI takes the values 1..=3
pub const MAX_NOF_CFI: usize = 3;

/// First CCE of every candidate, indexed by `[cfi - 1][aggr_idx]`
pub type CceLocationTable = [[Vec<u32>; MAX_NOF_AGGR_LEVELS]; MAX_NOF_CFI];

/// Hashing constant D
const HASH_D: u64 = 65537;

/// Hashing constant A_p for coreset `p`
fn hash_a(coreset_id: u8) -> u64 {
    match coreset_id % 3 {
        0 => 39827,
        1 => 39829,
        _ => 39839,
    }
}

/// Aggregation level for an aggregation index
pub fn aggr_level(aggr_idx: u8) -> u32 {
    1 << aggr_idx
}

/// Y_{p,n} for slots `0..nof_slots` of a frame, for a UE-specific search space
///
/// Y_{p,-1} = n_RNTI and Y_{p,n} = (A_p * Y_{p,n-1}) mod D.
pub fn ue_hash_sequence(rnti: u16, coreset_id: u8, nof_slots: usize) -> Vec<u32> {
    let a = hash_a(coreset_id);
    let mut y = rnti as u64;
    (0..nof_slots)
        .map(|_| {
            y = (a * y) % HASH_D;
            y as u32
        })
        .collect()
}

/// First CCE of each PDCCH candidate at an aggregation level
///
/// `y` is 0 for common search spaces. The number of candidates is truncated
/// to what fits in the coreset, and the positions are returned in candidate
/// order m = 0, 1, ...
pub fn cce_positions(nof_cces: u32, aggr_idx: u8, nof_candidates: u8, y: u32) -> Vec<u32> {
    let l = aggr_level(aggr_idx);
    let nof_blocks = nof_cces / l;
    if nof_blocks == 0 {
        return Vec::new();
    }
    let m_total = (nof_candidates as u32).min(nof_blocks);
    (0..m_total)
        .map(|m| {
            let offset = (m * nof_cces) / (l * m_total);
            l * ((y + offset) % nof_blocks)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_positions() {
        // 24 CCEs, L=4, 2 candidates: blocks of 4 CCEs spread half a coreset apart
        assert_eq!(cce_positions(24, 2, 2, 0), vec![0, 12]);
        assert_eq!(cce_positions(6, 1, 2, 0), vec![0, 2]);
        assert_eq!(cce_positions(6, 1, 8, 0), vec![0, 2, 4]);
        assert!(cce_positions(6, 3, 1, 0).is_empty());
        assert!(cce_positions(16, 0, 0, 0).is_empty());
    }

    #[test]
    fn test_ue_positions_are_distinct_and_aligned() {
        let ys = ue_hash_sequence(0x4601, 1, 10);
        assert_eq!(ys.len(), 10);
        for y in ys {
            let pos = cce_positions(48, 1, 6, y);
            assert_eq!(pos.len(), 6);
            for (i, a) in pos.iter().enumerate() {
                assert_eq!(a % 2, 0);
                assert!(a + 2 <= 48);
                assert!(pos[i + 1..].iter().all(|b| b != a));
            }
        }
    }

    #[test]
    fn test_hash_sequence() {
        let ys = ue_hash_sequence(1, 0, 2);
        assert_eq!(ys[0], 39827);
        assert_eq!(ys[1], ((39827u64 * 39827) % 65537) as u32);
        assert_ne!(ue_hash_sequence(100, 0, 1), ue_hash_sequence(100, 1, 1));
    }
}
