//! The `HostController` trait: the narrow interface the rest of the
//! crate uses to talk to a real (or mocked) USB bus (§4.1). Concrete
//! implementations live under [`crate::host`].

extern crate alloc;

use crate::wire::{DeviceDescriptor, SetupPacket, TransferStatus, UsbError};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);
pub const LONG_TIMEOUT: Duration = Duration::from_millis(3000);

/// A USB device seen on the bus but not yet opened, as produced by
/// [`HostController::enumerate`] (§4.2 step 1).
#[derive(Debug, Clone)]
pub struct BusDevice {
    pub bus: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
}

/// An opened device handle. Opaque beyond bus/address; backends may
/// carry more state behind it.
pub trait DeviceHandle: Clone {
    fn bus(&self) -> u8;
    fn address(&self) -> u8;
}

/// Outcome of a completed (or failed) bulk transfer, handed back to
/// the submitter's completion closure along with the buffer it
/// supplied — a completed transfer's buffer is owned by the caller
/// (§4.1).
pub struct CompletedTransfer {
    pub status: TransferStatus,
    pub buffer: Vec<u8>,
    pub actual_length: usize,
}

pub type BulkCompletion = Box<dyn FnMut(CompletedTransfer)>;

/// Opaque handle to a single queued bulk transfer, used only to
/// request cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferId(pub u64);

/// Narrow seam between the acquisition core and a real USB stack.
/// Every method here is either synchronous-and-bounded (enumerate,
/// open, claim, the two control transfers) or fire-and-forget
/// (bulk_submit/bulk_cancel), matching the cooperative single-threaded
/// event loop described in §5: nothing here blocks on a completion
/// that the caller didn't ask to wait for.
pub trait HostController {
    type Handle: DeviceHandle;

    fn enumerate(&self, bus_address: Option<(u8, u8)>) -> Vec<BusDevice>;

    /// Opens and claims interface 0 of `device` (§4.2 "Open
    /// lifecycle").
    fn open(&self, device: &BusDevice) -> Result<Self::Handle, UsbError>;

    fn claim(&self, handle: &Self::Handle, interface: u8) -> Result<(), UsbError>;

    /// Synchronous vendor control-out (§4.1).
    fn control_out(
        &self,
        handle: &Self::Handle,
        setup: SetupPacket,
        data: &[u8],
        timeout: Duration,
    ) -> Result<(), UsbError>;

    /// Synchronous vendor control-in (§4.1).
    fn control_in(
        &self,
        handle: &Self::Handle,
        setup: SetupPacket,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, UsbError>;

    /// Queues an asynchronous bulk transfer and returns immediately;
    /// `callback` runs once the backend observes completion, driven by
    /// the host event loop (an external collaborator — §5).
    fn bulk_submit(
        &self,
        handle: &Self::Handle,
        endpoint: u8,
        buffer: Vec<u8>,
        callback: BulkCompletion,
    ) -> TransferId;

    fn bulk_cancel(&self, handle: &Self::Handle, id: TransferId);

    /// Blocking bulk-out write bounded by `timeout`, used only for the
    /// bounded, one-shot FPGA bitstream/settings uploads (§4.4.2 steps
    /// 2-3) — distinct from the continuous, async bulk-in data
    /// pipeline the rest of this trait exists for.
    fn bulk_out_sync(
        &self,
        handle: &Self::Handle,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, UsbError>;

    fn get_descriptor(&self, handle: &Self::Handle) -> Result<DeviceDescriptor, UsbError>;

    fn get_string_descriptor_ascii(
        &self,
        handle: &Self::Handle,
        index: u8,
    ) -> Result<String, UsbError>;
}

#[cfg(all(test, feature = "std"))]
pub mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        #[derive(Debug)]
        pub Handle {}

        impl Clone for Handle {
            fn clone(&self) -> Self;
        }

        impl DeviceHandle for Handle {
            fn bus(&self) -> u8;
            fn address(&self) -> u8;
        }
    }

    mock! {
        pub HostController {}

        impl HostController for HostController {
            type Handle = MockHandle;

            fn enumerate(&self, bus_address: Option<(u8, u8)>) -> Vec<BusDevice>;
            fn open(&self, device: &BusDevice) -> Result<MockHandle, UsbError>;
            fn claim(&self, handle: &MockHandle, interface: u8) -> Result<(), UsbError>;
            fn control_out(
                &self,
                handle: &MockHandle,
                setup: SetupPacket,
                data: &[u8],
                timeout: Duration,
            ) -> Result<(), UsbError>;
            fn control_in(
                &self,
                handle: &MockHandle,
                setup: SetupPacket,
                buf: &mut [u8],
                timeout: Duration,
            ) -> Result<usize, UsbError>;
            fn bulk_submit(
                &self,
                handle: &MockHandle,
                endpoint: u8,
                buffer: Vec<u8>,
                callback: BulkCompletion,
            ) -> TransferId;
            fn bulk_cancel(&self, handle: &MockHandle, id: TransferId);
            fn bulk_out_sync(
                &self,
                handle: &MockHandle,
                endpoint: u8,
                data: &[u8],
                timeout: Duration,
            ) -> Result<usize, UsbError>;
            fn get_descriptor(&self, handle: &MockHandle) -> Result<DeviceDescriptor, UsbError>;
            fn get_string_descriptor_ascii(
                &self,
                handle: &MockHandle,
                index: u8,
            ) -> Result<String, UsbError>;
        }
    }

    #[test]
    fn transfer_id_eq() {
        assert_eq!(TransferId(1), TransferId(1));
        assert_ne!(TransferId(1), TransferId(2));
    }
}
