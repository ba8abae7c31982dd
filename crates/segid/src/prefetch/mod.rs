mod executor;
mod interface;
mod job;
#[cfg(test)]
mod tests;

pub use executor::*;
pub use interface::*;
pub use job::*;
