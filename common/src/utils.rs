//! Common Utilities
//! 
//! Provides small helpers used across the scheduler crates

/// Integer division rounding up
pub fn ceil_div(num: u32, den: u32) -> u32 {
    debug_assert!(den > 0);
    (num + den - 1) / den
}

/// Convert a byte slice to hex string for debugging
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Time utilities for slot/frame calculations
pub mod time {
    use crate::types::SubcarrierSpacing;
    use std::time::Duration;

    /// Slot duration as a `Duration`, exact for every numerology
    pub fn slot_duration(scs: SubcarrierSpacing) -> Duration {
        Duration::from_nanos(1_000_000 / scs.slots_per_subframe() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SubcarrierSpacing;
    
    #[test]
    fn test_bytes_to_hex() {
        let data = vec![0x12, 0x34, 0xAB, 0xCD];
        assert_eq!(bytes_to_hex(&data), "12 34 ab cd");
    }

    #[test]
    fn test_ceil_div() {
        assert_eq!(ceil_div(52, 4), 13);
        assert_eq!(ceil_div(53, 4), 14);
        assert_eq!(ceil_div(0, 8), 0);
    }
    
    #[test]
    fn test_slot_duration() {
        assert_eq!(time::slot_duration(SubcarrierSpacing::Scs15).as_micros(), 1000);
        assert_eq!(time::slot_duration(SubcarrierSpacing::Scs30).as_micros(), 500);
        assert_eq!(time::slot_duration(SubcarrierSpacing::Scs240).as_nanos(), 62_500);
    }
}
