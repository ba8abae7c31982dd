#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

extern crate alloc;

mod distributor;
mod error;
mod factory;
mod generator;
mod mutex;
mod prefetch;
mod runtime;
mod segment;
mod store;
mod time;

pub use crate::distributor::*;
pub use crate::error::*;
pub use crate::factory::*;
pub use crate::generator::*;
pub use crate::prefetch::*;
#[cfg_attr(docsrs, doc(cfg(any(feature = "async-tokio", feature = "async-smol"))))]
#[cfg(any(feature = "async-tokio", feature = "async-smol"))]
pub use crate::runtime::*;
pub use crate::segment::*;
pub use crate::store::*;
pub use crate::time::*;
