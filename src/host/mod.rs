//! Concrete [`crate::host_controller::HostController`] backends.

#[cfg(feature = "std")]
pub mod nusb;
