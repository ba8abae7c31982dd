mod interface;
mod memory;
mod store;

pub use interface::*;
pub use memory::*;
pub use store::*;
