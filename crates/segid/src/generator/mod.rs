mod config;
mod segment_chain;
mod status;
#[cfg(test)]
mod tests;

pub use config::*;
pub use segment_chain::*;
pub use status::*;
