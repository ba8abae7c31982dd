#![doc = include_str!("../README.md")]

mod common;
pub use common::*;
// Public re-export so downstream crates can access `segid` via
// `segid_tonic_core::segid`
pub use segid;
