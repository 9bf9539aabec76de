//! Common Types for the 5G gNodeB MAC scheduler
//!
//! Defines fundamental identifiers and timing types shared by the scheduler crates

use serde::{Deserialize, Serialize};
use num_derive::{FromPrimitive, ToPrimitive};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use thiserror::Error;

/// Errors raised when building common types from raw values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("Invalid numerology: {0}")]
    InvalidNumerology(u8),

    #[error("Invalid slot: sfn={sfn}, slot={slot} for numerology {numerology}")]
    InvalidSlot { numerology: u8, sfn: u32, slot: u32 },

    #[error("Invalid TDD pattern: {0}")]
    InvalidTddPattern(String),
}

/// Radio Network Temporary Identifier (RNTI)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rnti(pub u16);

impl Rnti {
    /// Reserved value, never assigned to a UE
    pub const INVALID: Self = Self(0);
    /// First value of the C-RNTI / TC-RNTI / RA-RNTI range (TS 38.321 Table 7.1-1)
    pub const MIN_CRNTI: u16 = 0x0001;
    /// Last value of the C-RNTI / TC-RNTI / RA-RNTI range
    pub const MAX_CRNTI: u16 = 0xFFEF;
    /// Paging RNTI
    pub const P: Self = Self(0xFFFE);
    /// System Information RNTI
    pub const SI: Self = Self(0xFFFF);

    /// Create a new RNTI
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the RNTI value
    pub fn value(&self) -> u16 {
        self.0
    }

    /// Whether the value lies in the range usable for C-RNTI, TC-RNTI and RA-RNTI
    pub fn is_crnti_range(&self) -> bool {
        (Self::MIN_CRNTI..=Self::MAX_CRNTI).contains(&self.0)
    }
}

impl fmt::Display for Rnti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

/// RNTI type a DCI is scrambled with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RntiType {
    /// Cell RNTI
    C,
    /// Temporary cell RNTI (Msg3/Msg4)
    Tc,
    /// Random access RNTI
    Ra,
    /// System information RNTI
    Si,
    /// Paging RNTI
    P,
}

impl RntiType {
    /// Whether the RNTI type identifies a single UE
    pub fn is_ue_specific(&self) -> bool {
        matches!(self, RntiType::C | RntiType::Tc)
    }
}

/// Physical Cell Identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pci(pub u16);

impl Pci {
    /// Maximum valid PCI value (0-1007)
    pub const MAX: u16 = 1007;

    /// Create a new PCI with validation
    pub fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }
}

/// Subcarrier spacing values in kHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum SubcarrierSpacing {
    /// 15 kHz
    Scs15 = 15,
    /// 30 kHz
    Scs30 = 30,
    /// 60 kHz
    Scs60 = 60,
    /// 120 kHz
    Scs120 = 120,
    /// 240 kHz
    Scs240 = 240,
}

impl SubcarrierSpacing {
    /// Numerology index mu (TS 38.211 Table 4.2-1)
    pub fn numerology(&self) -> u8 {
        match self {
            SubcarrierSpacing::Scs15 => 0,
            SubcarrierSpacing::Scs30 => 1,
            SubcarrierSpacing::Scs60 => 2,
            SubcarrierSpacing::Scs120 => 3,
            SubcarrierSpacing::Scs240 => 4,
        }
    }

    /// Number of slots in a 1ms subframe
    pub fn slots_per_subframe(&self) -> u32 {
        1 << self.numerology()
    }

    /// Number of slots in a 10ms frame
    pub fn slots_per_frame(&self) -> u32 {
        10 * self.slots_per_subframe()
    }
}

/// Channel bandwidth values in MHz
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bandwidth {
    /// 5 MHz
    Bw5,
    /// 10 MHz
    Bw10,
    /// 15 MHz
    Bw15,
    /// 20 MHz
    Bw20,
    /// 25 MHz
    Bw25,
    /// 30 MHz
    Bw30,
    /// 40 MHz
    Bw40,
    /// 50 MHz
    Bw50,
    /// 60 MHz
    Bw60,
    /// 80 MHz
    Bw80,
    /// 100 MHz
    Bw100,
}

impl Bandwidth {
    /// All bandwidths in ascending order
    pub const ALL: [Bandwidth; 11] = [
        Bandwidth::Bw5,
        Bandwidth::Bw10,
        Bandwidth::Bw15,
        Bandwidth::Bw20,
        Bandwidth::Bw25,
        Bandwidth::Bw30,
        Bandwidth::Bw40,
        Bandwidth::Bw50,
        Bandwidth::Bw60,
        Bandwidth::Bw80,
        Bandwidth::Bw100,
    ];

    /// Maximum transmission bandwidth N_RB in FR1 (TS 38.101-1 Table 5.3.2-1)
    ///
    /// Returns `None` for combinations the table does not define.
    pub fn nof_prb(&self, scs: SubcarrierSpacing) -> Option<u16> {
        use Bandwidth::*;
        match (scs, self) {
            (SubcarrierSpacing::Scs15, Bw5) => Some(25),
            (SubcarrierSpacing::Scs15, Bw10) => Some(52),
            (SubcarrierSpacing::Scs15, Bw15) => Some(79),
            (SubcarrierSpacing::Scs15, Bw20) => Some(106),
            (SubcarrierSpacing::Scs15, Bw25) => Some(133),
            (SubcarrierSpacing::Scs15, Bw30) => Some(160),
            (SubcarrierSpacing::Scs15, Bw40) => Some(216),
            (SubcarrierSpacing::Scs15, Bw50) => Some(270),
            (SubcarrierSpacing::Scs30, Bw5) => Some(11),
            (SubcarrierSpacing::Scs30, Bw10) => Some(24),
            (SubcarrierSpacing::Scs30, Bw15) => Some(38),
            (SubcarrierSpacing::Scs30, Bw20) => Some(51),
            (SubcarrierSpacing::Scs30, Bw25) => Some(65),
            (SubcarrierSpacing::Scs30, Bw30) => Some(78),
            (SubcarrierSpacing::Scs30, Bw40) => Some(106),
            (SubcarrierSpacing::Scs30, Bw50) => Some(133),
            (SubcarrierSpacing::Scs30, Bw60) => Some(162),
            (SubcarrierSpacing::Scs30, Bw80) => Some(217),
            (SubcarrierSpacing::Scs30, Bw100) => Some(273),
            (SubcarrierSpacing::Scs60, Bw10) => Some(11),
            (SubcarrierSpacing::Scs60, Bw15) => Some(18),
            (SubcarrierSpacing::Scs60, Bw20) => Some(24),
            (SubcarrierSpacing::Scs60, Bw25) => Some(31),
            (SubcarrierSpacing::Scs60, Bw30) => Some(38),
            (SubcarrierSpacing::Scs60, Bw40) => Some(51),
            (SubcarrierSpacing::Scs60, Bw50) => Some(65),
            (SubcarrierSpacing::Scs60, Bw60) => Some(79),
            (SubcarrierSpacing::Scs60, Bw80) => Some(107),
            (SubcarrierSpacing::Scs60, Bw100) => Some(135),
            _ => None,
        }
    }

    /// Find the bandwidth whose maximum transmission bandwidth equals `nof_prb`
    pub fn from_nof_prb(nof_prb: u16, scs: SubcarrierSpacing) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|bw| bw.nof_prb(scs) == Some(nof_prb))
    }
}

/// TDD UL/DL pattern (single pattern, TS 38.331 TDD-UL-DL-ConfigCommon)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TddPattern {
    /// Pattern periodicity in slots
    pub period_slots: u32,
    /// Number of full DL slots at the start of the period
    pub nof_dl_slots: u32,
    /// Number of full UL slots at the end of the period
    pub nof_ul_slots: u32,
}

impl TddPattern {
    /// Validate the pattern
    pub fn validate(&self) -> Result<(), TypeError> {
        if self.period_slots == 0 {
            return Err(TypeError::InvalidTddPattern("zero period".into()));
        }
        if self.nof_dl_slots + self.nof_ul_slots > self.period_slots {
            return Err(TypeError::InvalidTddPattern(format!(
                "{} DL + {} UL slots exceed the period of {} slots",
                self.nof_dl_slots, self.nof_ul_slots, self.period_slots
            )));
        }
        Ok(())
    }
}

/// Duplex mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplexMode {
    /// Frequency Division Duplex
    Fdd,
    /// Time Division Duplex
    Tdd(TddPattern),
}

impl DuplexMode {
    /// Whether DL transmission is possible in the given slot index
    ///
    /// Flexible slots between the DL and UL parts of a TDD period are
    /// treated as DL-only.
    pub fn is_dl_slot(&self, slot_idx: u32) -> bool {
        match self {
            DuplexMode::Fdd => true,
            DuplexMode::Tdd(p) => {
                let idx = slot_idx % p.period_slots;
                idx < p.period_slots - p.nof_ul_slots
            }
        }
    }

    /// Whether UL transmission is possible in the given slot index
    pub fn is_ul_slot(&self, slot_idx: u32) -> bool {
        match self {
            DuplexMode::Fdd => true,
            DuplexMode::Tdd(p) => {
                let idx = slot_idx % p.period_slots;
                idx >= p.period_slots - p.nof_ul_slots
            }
        }
    }
}

/// Number of system frames before SFN wraps around
pub const NOF_SFNS: u32 = 1024;
/// Number of subframes in a frame
pub const NOF_SUBFRAMES_PER_FRAME: u32 = 10;

/// Slot timestamp that wraps around at the end of the hyperframe (1024 frames)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotPoint {
    numerology: u8,
    count: u32,
}

impl SlotPoint {
    /// Create a slot point from SFN and slot index within the frame
    pub fn new(numerology: u8, sfn: u32, slot_idx: u32) -> Result<Self, TypeError> {
        if numerology > 4 {
            return Err(TypeError::InvalidNumerology(numerology));
        }
        let slots_per_frame = NOF_SUBFRAMES_PER_FRAME << numerology;
        if sfn >= NOF_SFNS || slot_idx >= slots_per_frame {
            return Err(TypeError::InvalidSlot { numerology, sfn, slot: slot_idx });
        }
        Ok(Self {
            numerology,
            count: sfn * slots_per_frame + slot_idx,
        })
    }

    /// Create a slot point from an absolute slot counter (wrapped to the hyperframe)
    pub fn from_count(numerology: u8, count: u32) -> Result<Self, TypeError> {
        if numerology > 4 {
            return Err(TypeError::InvalidNumerology(numerology));
        }
        let period = Self::period(numerology);
        Ok(Self { numerology, count: count % period })
    }

    fn period(numerology: u8) -> u32 {
        NOF_SFNS * (NOF_SUBFRAMES_PER_FRAME << numerology)
    }

    /// Numerology of the slot
    pub fn numerology(&self) -> u8 {
        self.numerology
    }

    /// Slot counter since SFN 0, slot 0
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Number of slots per frame for this numerology
    pub fn nof_slots_per_frame(&self) -> u32 {
        NOF_SUBFRAMES_PER_FRAME << self.numerology
    }

    /// System frame number
    pub fn sfn(&self) -> u32 {
        self.count / self.nof_slots_per_frame()
    }

    /// Slot index within the frame
    pub fn slot_idx(&self) -> u32 {
        self.count % self.nof_slots_per_frame()
    }
}

impl Add<u32> for SlotPoint {
    type Output = SlotPoint;

    fn add(self, rhs: u32) -> SlotPoint {
        let period = Self::period(self.numerology);
        SlotPoint {
            numerology: self.numerology,
            count: ((self.count as u64 + rhs as u64) % period as u64) as u32,
        }
    }
}

impl AddAssign<u32> for SlotPoint {
    fn add_assign(&mut self, rhs: u32) {
        *self = *self + rhs;
    }
}

impl Sub<u32> for SlotPoint {
    type Output = SlotPoint;

    fn sub(self, rhs: u32) -> SlotPoint {
        let period = Self::period(self.numerology);
        let rhs = rhs % period;
        SlotPoint {
            numerology: self.numerology,
            count: (self.count + period - rhs) % period,
        }
    }
}

impl Sub<SlotPoint> for SlotPoint {
    type Output = i32;

    /// Signed distance in slots, taking the shortest way around the hyperframe
    fn sub(self, rhs: SlotPoint) -> i32 {
        debug_assert_eq!(self.numerology, rhs.numerology);
        let period = Self::period(self.numerology) as i64;
        let mut diff = self.count as i64 - rhs.count as i64;
        if diff >= period / 2 {
            diff -= period;
        } else if diff < -(period / 2) {
            diff += period;
        }
        diff as i32
    }
}

impl PartialOrd for SlotPoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.numerology != other.numerology {
            return None;
        }
        Some((*self - *other).cmp(&0))
    }
}

impl fmt::Display for SlotPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.sfn(), self.slot_idx())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pci_validation() {
        assert!(Pci::new(0).is_some());
        assert!(Pci::new(1007).is_some());
        assert!(Pci::new(1008).is_none());
    }

    #[test]
    fn test_rnti_ranges() {
        assert!(Rnti(0x4601).is_crnti_range());
        assert!(!Rnti::INVALID.is_crnti_range());
        assert!(!Rnti::SI.is_crnti_range());
        assert_eq!(Rnti(0x4601).to_string(), "0x4601");
    }

    #[test]
    fn test_bandwidth_tables() {
        assert_eq!(Bandwidth::Bw10.nof_prb(SubcarrierSpacing::Scs15), Some(52));
        assert_eq!(Bandwidth::Bw100.nof_prb(SubcarrierSpacing::Scs30), Some(273));
        assert_eq!(Bandwidth::Bw5.nof_prb(SubcarrierSpacing::Scs60), None);
        assert_eq!(
            Bandwidth::from_nof_prb(106, SubcarrierSpacing::Scs15),
            Some(Bandwidth::Bw20)
        );
        assert_eq!(Bandwidth::from_nof_prb(100, SubcarrierSpacing::Scs15), None);
    }

    #[test]
    fn test_tdd_pattern() {
        let pattern = TddPattern { period_slots: 10, nof_dl_slots: 6, nof_ul_slots: 3 };
        assert!(pattern.validate().is_ok());
        let duplex = DuplexMode::Tdd(pattern);
        assert!(duplex.is_dl_slot(0));
        assert!(duplex.is_dl_slot(6));
        assert!(!duplex.is_ul_slot(6));
        assert!(duplex.is_ul_slot(7));
        assert!(!duplex.is_dl_slot(9));
        assert!(duplex.is_dl_slot(10));

        let bad = TddPattern { period_slots: 5, nof_dl_slots: 4, nof_ul_slots: 2 };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_slot_point_arithmetic() {
        let slot = SlotPoint::new(1, 1023, 19).unwrap();
        assert_eq!(slot.sfn(), 1023);
        assert_eq!(slot.slot_idx(), 19);

        let next = slot + 1;
        assert_eq!(next.sfn(), 0);
        assert_eq!(next.slot_idx(), 0);
        assert_eq!(next - slot, 1);
        assert_eq!(slot - next, -1);
        assert!(next > slot);
        assert_eq!(next - 1u32, slot);

        assert!(SlotPoint::new(0, 0, 10).is_err());
        assert!(SlotPoint::new(5, 0, 0).is_err());
    }
}
