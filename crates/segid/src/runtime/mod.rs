#[cfg(feature = "async-smol")]
mod smol_prefetch;
#[cfg(feature = "async-tokio")]
mod tokio_prefetch;

#[cfg(feature = "async-smol")]
pub use smol_prefetch::*;
#[cfg(feature = "async-tokio")]
pub use tokio_prefetch::*;
