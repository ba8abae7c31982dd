mod chain;
mod id_segment;

pub use chain::*;
pub use id_segment::*;
