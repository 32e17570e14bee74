//! Device Profile table and bus scan (§3 "Device Profile"/"Channel",
//! §4.2).

extern crate alloc;

use crate::error::Fx2LafwError;
use crate::host_controller::{BusDevice, HostController};
use alloc::string::{String, ToString};
use alloc::vec::Vec;

/// Device samples 16 logic channels rather than 8.
pub const WIDE_16BIT: u32 = 1 << 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DslogicMode {
    Logic,
    Dso,
    Analog,
}

/// A row of the static profile table (§3). Ordering is significant:
/// [`scan`] walks the table in order and the first match wins.
pub struct DeviceProfile {
    pub vendor_id: u16,
    pub product_id: u16,
    pub vendor: &'static str,
    pub model: &'static str,
    pub model_version: Option<&'static str>,
    pub firmware_path: &'static str,
    pub capabilities: u32,
    pub usb_manufacturer: Option<&'static str>,
    pub usb_product: Option<&'static str>,
    pub dslogic: bool,
}

impl DeviceProfile {
    pub fn wide_16bit(&self) -> bool {
        self.capabilities & WIDE_16BIT != 0
    }
}

/// The profile table. Not exhaustive of every fx2lafw-compatible
/// device on the market; enough entries to exercise every capability
/// combination the rest of the crate cares about.
pub static PROFILES: &[DeviceProfile] = &[
    DeviceProfile {
        vendor_id: 0x0925,
        product_id: 0x3881,
        vendor: "Saleae",
        model: "Logic",
        model_version: None,
        firmware_path: "fx2lafw-saleae-logic.fw",
        capabilities: 0,
        usb_manufacturer: None,
        usb_product: None,
        dslogic: false,
    },
    DeviceProfile {
        vendor_id: 0x0c12,
        product_id: 0x8020,
        vendor: "Zeroplus",
        model: "Logic Cube LAP-16032U",
        model_version: None,
        firmware_path: "fx2lafw-zeroplus-logic-cube-lap-16032u.fw",
        capabilities: WIDE_16BIT,
        usb_manufacturer: None,
        usb_product: None,
        dslogic: false,
    },
    DeviceProfile {
        vendor_id: 0x2a0e,
        product_id: 0x0020,
        vendor: "DreamSourceLab",
        model: "DSLogic",
        model_version: None,
        firmware_path: "dreamsourcelab-dslogic-fx2.fw",
        capabilities: WIDE_16BIT,
        usb_manufacturer: Some("DreamSourceLab"),
        usb_product: Some("DSLogic"),
        dslogic: true,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    Logic,
    Analog,
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub index: u8,
    pub channel_type: ChannelType,
    pub enabled: bool,
    pub name: String,
    /// Per-channel trigger specification, e.g. `"01"` (§3).
    pub trigger: Option<String>,
}

/// Scan input (§4.2): connection filter plus, for the DSLogic variant,
/// the requested operating mode.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub conn: Option<(u8, u8)>,
    pub device_mode: Option<DslogicMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Firmware already resident; ready to [`open`](crate::acquisition).
    Inactive,
    /// Firmware just uploaded; caller must wait for renumeration
    /// before opening.
    AwaitingRenumeration,
}

/// A scanned, profile-matched device, not yet opened.
pub struct CandidateDevice<'p> {
    pub profile: &'p DeviceProfile,
    pub bus: u8,
    pub address: u8,
    pub channels: Vec<Channel>,
    pub state: DeviceState,
    pub fw_updated_us: u64,
}

/// Uploads firmware to a device that doesn't have it yet. Deliberately
/// narrow: the pre-boot vendor transport and the firmware file's
/// storage location are both external collaborators (§1).
pub trait FirmwareLoader {
    fn upload(&self, profile: &DeviceProfile, bus: u8, address: u8) -> Result<(), Fx2LafwError>;
}

/// Monotonic microsecond clock, injected so `fw_updated` stamps are
/// testable without wall-clock flakiness.
pub trait Clock {
    fn now_micros(&self) -> u64;
}

const RESIDENT_MANUFACTURER_PREFIXES: &[&str] = &["sigrok", "DreamSourceLab"];
const RESIDENT_PRODUCT_PREFIXES: &[&str] = &["fx2lafw", "DSLogic"];

fn starts_with_any(s: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|p| s.starts_with(p))
}

fn build_channels(profile: &DeviceProfile, mode: Option<DslogicMode>) -> Vec<Channel> {
    let count = if profile.wide_16bit() { 16 } else { 8 };
    let analog = profile.dslogic
        && matches!(mode, Some(DslogicMode::Dso) | Some(DslogicMode::Analog));
    (0..count)
        .map(|i| Channel {
            index: i,
            channel_type: if analog {
                ChannelType::Analog
            } else {
                ChannelType::Logic
            },
            enabled: true,
            name: i.to_string(),
            trigger: None,
        })
        .collect()
}

fn match_profile<'p>(
    profiles: &'p [DeviceProfile],
    vid: u16,
    pid: u16,
    manufacturer: Option<&str>,
    product: Option<&str>,
) -> Option<&'p DeviceProfile> {
    profiles.iter().find(|p| {
        p.vendor_id == vid
            && p.product_id == pid
            && p.usb_manufacturer
                .map(|want| manufacturer == Some(want))
                .unwrap_or(true)
            && p.usb_product
                .map(|want| product == Some(want))
                .unwrap_or(true)
    })
}

/// Walks the USB bus, matches devices against [`PROFILES`], and
/// uploads firmware to any match that doesn't already have it (§4.2).
pub fn scan<'p, H: HostController>(
    host: &H,
    options: &ScanOptions,
    firmware: &dyn FirmwareLoader,
    clock: &dyn Clock,
) -> Vec<CandidateDevice<'p>> {
    let mut out = Vec::new();
    for dev in host.enumerate(options.conn) {
        let handle = match host.open(&dev) {
            Ok(h) => h,
            Err(_) => continue,
        };
        let manufacturer = host.get_string_descriptor_ascii(&handle, 1).ok();
        let product = host.get_string_descriptor_ascii(&handle, 2).ok();

        let Some(profile) = match_profile(
            PROFILES,
            dev.vendor_id,
            dev.product_id,
            manufacturer.as_deref(),
            product.as_deref(),
        ) else {
            continue;
        };

        let resident = manufacturer
            .as_deref()
            .map(|m| starts_with_any(m, RESIDENT_MANUFACTURER_PREFIXES))
            .unwrap_or(false)
            && product
                .as_deref()
                .map(|p| starts_with_any(p, RESIDENT_PRODUCT_PREFIXES))
                .unwrap_or(false);

        let channels = build_channels(profile, options.device_mode);

        if resident {
            out.push(CandidateDevice {
                profile,
                bus: dev.bus,
                address: dev.address,
                channels,
                state: DeviceState::Inactive,
                fw_updated_us: 0,
            });
        } else if firmware.upload(profile, dev.bus, dev.address).is_ok() {
            out.push(CandidateDevice {
                profile,
                // Sentinel: address unknown until renumeration.
                bus: dev.bus,
                address: 0xFF,
                channels,
                state: DeviceState::AwaitingRenumeration,
                fw_updated_us: clock.now_micros(),
            });
        }
    }
    out
}

#[cfg(all(test, feature = "std"))]
#[path = "tests/profile.rs"]
mod tests;
