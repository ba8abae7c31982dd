mod cached_clock;
mod interface;

pub use cached_clock::*;
pub use interface::*;
