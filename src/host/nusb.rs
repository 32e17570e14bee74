//! `nusb`-backed [`HostController`]: the pure-Rust, cross-platform
//! host-side USB stack backing acquisition on a real device, as
//! opposed to the mock transport used in tests.

extern crate alloc;

use crate::host_controller::{
    BulkCompletion, BusDevice, CompletedTransfer, DeviceHandle, HostController, TransferId,
};
use crate::wire::{DeviceDescriptor, SetupPacket, TransferStatus, UsbError};
use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;
use std::collections::HashMap;

fn map_transport_err(e: ::nusb::transfer::TransferError) -> UsbError {
    match e {
        ::nusb::transfer::TransferError::Cancelled => UsbError::Cancelled,
        ::nusb::transfer::TransferError::Disconnected => UsbError::NoDevice,
        ::nusb::transfer::TransferError::Stall => UsbError::Transport,
        _ => UsbError::Other,
    }
}

#[derive(Clone)]
pub struct NusbHandle {
    bus: u8,
    address: u8,
    device: Rc<::nusb::Device>,
    interface: Rc<::nusb::Interface>,
}

impl DeviceHandle for NusbHandle {
    fn bus(&self) -> u8 {
        self.bus
    }
    fn address(&self) -> u8 {
        self.address
    }
}

struct EndpointQueue {
    queue: ::nusb::transfer::Queue<::nusb::transfer::RequestBuffer>,
    pending: VecDeque<(u64, BulkCompletion)>,
}

/// Wraps `nusb`'s per-endpoint transfer queues so a single
/// [`NusbHostController::poll`] call, driven by the embedding host
/// event loop (§5, external collaborator), can drain whatever
/// completions are ready and invoke the matching callback in
/// submission order.
pub struct NusbHostController {
    next_id: AtomicU64,
    endpoints: RefCell<HashMap<(u8, u8), EndpointQueue>>,
}

impl Default for NusbHostController {
    fn default() -> Self {
        Self::new()
    }
}

impl NusbHostController {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            endpoints: RefCell::new(HashMap::new()),
        }
    }

    fn alloc_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Drains every endpoint's completed transfers and invokes the
    /// matching callback. The embedding event loop calls this
    /// (directly, or after its own readiness notification); this
    /// crate never spawns its own polling thread (§5: "the driver
    /// performs no locking because there is no background thread of
    /// its own").
    pub fn poll(&self) {
        let waker = futures::task::noop_waker();
        let mut cx = core::task::Context::from_waker(&waker);
        let mut endpoints = self.endpoints.borrow_mut();
        for ep in endpoints.values_mut() {
            while ep.queue.pending() > 0 {
                let core::task::Poll::Ready(completion) = ep.queue.poll_next(&mut cx) else {
                    break;
                };
                let Some((_, mut callback)) = ep.pending.pop_front() else {
                    break;
                };
                let status = match &completion.status {
                    Ok(()) => TransferStatus::Completed,
                    Err(e) => match e {
                        ::nusb::transfer::TransferError::Cancelled => TransferStatus::Cancelled,
                        ::nusb::transfer::TransferError::Disconnected => TransferStatus::NoDevice,
                        _ => TransferStatus::Other,
                    },
                };
                let actual_length = completion.data.len();
                callback(CompletedTransfer {
                    status,
                    buffer: completion.data,
                    actual_length,
                });
            }
        }
    }
}

fn setup_to_control_out<'a>(setup: &SetupPacket, data: &'a [u8]) -> ::nusb::transfer::ControlOut<'a> {
    ::nusb::transfer::ControlOut {
        control_type: ::nusb::transfer::ControlType::Vendor,
        recipient: ::nusb::transfer::Recipient::Device,
        request: setup.bRequest,
        value: setup.wValue,
        index: setup.wIndex,
        data,
    }
}

fn setup_to_control_in(setup: &SetupPacket, length: u16) -> ::nusb::transfer::ControlIn {
    ::nusb::transfer::ControlIn {
        control_type: ::nusb::transfer::ControlType::Vendor,
        recipient: ::nusb::transfer::Recipient::Device,
        request: setup.bRequest,
        value: setup.wValue,
        index: setup.wIndex,
        length,
    }
}

impl HostController for NusbHostController {
    type Handle = NusbHandle;

    fn enumerate(&self, bus_address: Option<(u8, u8)>) -> Vec<BusDevice> {
        let Ok(devices) = ::nusb::list_devices() else {
            return Vec::new();
        };
        devices
            .filter(|d| {
                bus_address
                    .map(|(b, a)| d.bus_number() == b && d.device_address() == a)
                    .unwrap_or(true)
            })
            .map(|d| BusDevice {
                bus: d.bus_number(),
                address: d.device_address(),
                vendor_id: d.vendor_id(),
                product_id: d.product_id(),
            })
            .collect()
    }

    fn open(&self, device: &BusDevice) -> Result<Self::Handle, UsbError> {
        let info = ::nusb::list_devices()
            .map_err(|_| UsbError::Transport)?
            .find(|d| d.bus_number() == device.bus && d.device_address() == device.address)
            .ok_or(UsbError::NoDevice)?;
        let dev = info.open().map_err(|_| UsbError::Transport)?;
        let interface = dev.claim_interface(0).map_err(|_| UsbError::Transport)?;
        Ok(NusbHandle {
            bus: device.bus,
            address: device.address,
            device: Rc::new(dev),
            interface: Rc::new(interface),
        })
    }

    fn claim(&self, _handle: &Self::Handle, interface: u8) -> Result<(), UsbError> {
        if interface == 0 {
            Ok(())
        } else {
            Err(UsbError::Other)
        }
    }

    fn control_out(
        &self,
        handle: &Self::Handle,
        setup: SetupPacket,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<(), UsbError> {
        let completion =
            futures::executor::block_on(handle.interface.control_out(setup_to_control_out(&setup, data)));
        completion.status.map_err(map_transport_err)
    }

    fn control_in(
        &self,
        handle: &Self::Handle,
        setup: SetupPacket,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, UsbError> {
        let completion =
            futures::executor::block_on(handle.interface.control_in(setup_to_control_in(&setup, buf.len() as u16)));
        completion.status.map_err(map_transport_err)?;
        let n = completion.data.len().min(buf.len());
        buf[..n].copy_from_slice(&completion.data[..n]);
        Ok(n)
    }

    fn bulk_submit(
        &self,
        handle: &Self::Handle,
        endpoint: u8,
        buffer: Vec<u8>,
        callback: BulkCompletion,
    ) -> TransferId {
        let id = self.alloc_id();
        let mut endpoints = self.endpoints.borrow_mut();
        let ep = endpoints
            .entry((handle.address, endpoint))
            .or_insert_with(|| EndpointQueue {
                queue: handle.interface.bulk_in_queue(endpoint),
                pending: VecDeque::new(),
            });
        ep.queue
            .submit(::nusb::transfer::RequestBuffer::new(buffer.len()));
        ep.pending.push_back((id, callback));
        TransferId(id)
    }

    fn bulk_cancel(&self, handle: &Self::Handle, id: TransferId) {
        let mut endpoints = self.endpoints.borrow_mut();
        for ((address, _endpoint), ep) in endpoints.iter_mut() {
            if *address != handle.address {
                continue;
            }
            if ep.pending.iter().any(|(pending_id, _)| *pending_id == id.0) {
                ep.queue.cancel_all();
                break;
            }
        }
    }

    fn bulk_out_sync(
        &self,
        handle: &Self::Handle,
        endpoint: u8,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, UsbError> {
        let completion = futures::executor::block_on(handle.interface.bulk_out(endpoint, data.to_vec()));
        completion.status.map_err(map_transport_err)?;
        Ok(data.len())
    }

    fn get_descriptor(&self, handle: &Self::Handle) -> Result<DeviceDescriptor, UsbError> {
        let setup = SetupPacket {
            bmRequestType: crate::wire::DEVICE_TO_HOST,
            bRequest: crate::wire::GET_DESCRIPTOR,
            wValue: (crate::wire::DEVICE_DESCRIPTOR as u16) << 8,
            wIndex: 0,
            wLength: 18,
        };
        let mut buf = [0u8; 18];
        self.control_in(handle, setup, &mut buf, Duration::from_millis(100))?;
        DeviceDescriptor::try_from_bytes(&buf).ok_or(UsbError::Other)
    }

    fn get_string_descriptor_ascii(
        &self,
        handle: &Self::Handle,
        index: u8,
    ) -> Result<String, UsbError> {
        handle
            .device
            .get_string_descriptor(
                index,
                ::nusb::descriptors::language_id::US_ENGLISH,
                Duration::from_millis(100),
            )
            .map_err(|_| UsbError::Transport)
    }
}
