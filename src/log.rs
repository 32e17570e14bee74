//! Diagnostic logging facade.
//!
//! The rest of the crate never names a logging crate directly, only
//! these macros, so the backing implementation can be swapped (or
//! dropped, off `std`) without touching call sites.

#[cfg(feature = "std")]
pub use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "std"))]
#[macro_export]
macro_rules! noop_log {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "std"))]
pub use noop_log as debug;
#[cfg(not(feature = "std"))]
pub use noop_log as error;
#[cfg(not(feature = "std"))]
pub use noop_log as info;
#[cfg(not(feature = "std"))]
pub use noop_log as trace;
#[cfg(not(feature = "std"))]
pub use noop_log as warn;
