//! Common Utilities and Types Library
//! 
//! This crate provides shared identifiers, slot timing and bit masks used
//! across the gNodeB MAC scheduler.

pub mod bitmask;
pub mod types;
pub mod utils;

// Re-export commonly used items
pub use bitmask::*;
pub use types::*;
pub use utils::*;
