//! Built-in deployment plans

pub mod three_tier;

pub use three_tier::{ThreeTierOptions, three_tier_plan};
