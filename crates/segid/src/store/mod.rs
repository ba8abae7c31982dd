mod definition;
mod interface;
mod memory;

pub use definition::*;
pub use interface::*;
pub use memory::*;
