//! On-the-wire shapes: USB control-transfer plumbing shared by both
//! device variants (§6.1), and the packed DSLogic FPGA settings frame
//! (§6.2 / §6.3).

use crate::trigger::{TriggerModel, TriggerMode, NUM_TRIGGER_STAGES, STAGES};

#[repr(C)]
#[cfg_attr(feature = "std", derive(Debug))]
#[allow(non_snake_case)] // names are from USB 2.0 table 9-2
pub struct SetupPacket {
    pub bmRequestType: u8,
    pub bRequest: u8,
    pub wValue: u16,
    pub wIndex: u16,
    pub wLength: u16,
}

pub const DEVICE_TO_HOST: u8 = 0x80;
pub const HOST_TO_DEVICE: u8 = 0;
pub const VENDOR_REQUEST: u8 = 0x40;
pub const RECIPIENT_DEVICE: u8 = 0;

pub const GET_DESCRIPTOR: u8 = 6;
pub const DEVICE_DESCRIPTOR: u8 = 1;
pub const STRING_DESCRIPTOR: u8 = 3;

/// Vendor request codes. The base (fx2lafw) and DSLogic variants
/// disagree on the numbering of GET_REVID vs START (§6.1); callers
/// must pick the right table for the variant in hand.
pub mod request {
    pub const GET_FW_VERSION: u8 = 0xB0;

    pub mod base {
        pub const START: u8 = 0xB1;
        pub const GET_REVID: u8 = 0xB2;
    }

    pub mod dslogic {
        pub const GET_REVID: u8 = 0xB1;
        pub const START: u8 = 0xB2;
        pub const FPGA_CONFIG: u8 = 0xB3;
        pub const FPGA_SETTING: u8 = 0xB4;
    }
}

/// `flags` byte of the `START` control-out payload.
pub mod start_flags {
    pub const WIDE_16BIT: u8 = 1 << 5;
    pub const CLK_48MHZ: u8 = 1 << 6;
    pub const DSLOGIC_STOP: u8 = 1 << 7;
}

pub const BULK_IN_EP_BASE: u8 = 2;
pub const BULK_IN_EP_DSLOGIC: u8 = 6;
pub const BULK_OUT_EP: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum UsbError {
    #[cfg_attr(feature = "std", error("transport error"))]
    Transport,
    #[cfg_attr(feature = "std", error("operation timed out"))]
    Timeout,
    #[cfg_attr(feature = "std", error("device no longer present"))]
    NoDevice,
    #[cfg_attr(feature = "std", error("transfer was cancelled"))]
    Cancelled,
    #[cfg_attr(feature = "std", error("buffer too small for transfer"))]
    BufferTooSmall,
    #[cfg_attr(feature = "std", error("other transport failure"))]
    Other,
}

/// Status of a completed (or failed) bulk transfer, reported to the
/// submitter's completion callback (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Completed,
    TimedOut,
    NoDevice,
    Cancelled,
    Other,
}

/// Minimal device descriptor fields the enumeration path needs (§4.2).
#[repr(C)]
#[cfg_attr(feature = "std", derive(Debug))]
#[allow(non_snake_case)]
pub struct DeviceDescriptor {
    pub bLength: u8,
    pub bDescriptorType: u8,
    pub bcdUSB: [u8; 2],
    pub bDeviceClass: u8,
    pub bDeviceSubClass: u8,
    pub bDeviceProtocol: u8,
    pub bMaxPacketSize0: u8,
    pub idVendor: [u8; 2],
    pub idProduct: [u8; 2],
    pub bcdDevice: [u8; 2],
    pub iManufacturer: u8,
    pub iProduct: u8,
    pub iSerialNumber: u8,
    pub bNumConfigurations: u8,
}

impl DeviceDescriptor {
    pub fn try_from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < core::mem::size_of::<Self>() {
            return None;
        }
        Some(Self {
            bLength: bytes[0],
            bDescriptorType: bytes[1],
            bcdUSB: [bytes[2], bytes[3]],
            bDeviceClass: bytes[4],
            bDeviceSubClass: bytes[5],
            bDeviceProtocol: bytes[6],
            bMaxPacketSize0: bytes[7],
            idVendor: [bytes[8], bytes[9]],
            idProduct: [bytes[10], bytes[11]],
            bcdDevice: [bytes[12], bytes[13]],
            iManufacturer: bytes[14],
            iProduct: bytes[15],
            iSerialNumber: bytes[16],
            bNumConfigurations: bytes[17],
        })
    }

    pub fn vid(&self) -> u16 {
        u16::from_le_bytes(self.idVendor)
    }

    pub fn pid(&self) -> u16 {
        u16::from_le_bytes(self.idProduct)
    }
}

/// 16 stage-indexed values, one per named field of the settings frame
/// (§6.2): index by FPGA trigger-stage number, 0..[`STAGES`].
type Plane = [u16; STAGES];

/// Neutral fill for a plane slot that carries no live trigger data:
/// `mask = 1` (don't-care), `value = 0`, `edge = 0`, `count = 0`,
/// `logic = 2` (inert combiner), per §6.2.
const INERT_MASK: u16 = 1;
const INERT_VALUE: u16 = 0;
const INERT_EDGE: u16 = 0;
const INERT_COUNT: u16 = 0;
const INERT_LOGIC: u16 = 2;

/// The packed, little-endian frame streamed as bulk-out on endpoint 2
/// after `CMD_DSLOGIC_SETTING` (§6.2). Field order and headers are
/// fixed by the device firmware; this struct's layout mirrors that
/// order exactly so `bytes_of` produces the wire frame directly.
#[repr(C)]
#[derive(Clone, Copy)]
#[allow(non_snake_case)]
pub struct DslogicSettingsFrame {
    sync: u32,
    mode_header: u16,
    mode: u16,
    divider_header: u32,
    divider: u32,
    count_header: u32,
    count: u32,
    trig_pos_header: u32,
    trig_pos: u32,
    trig_glb_header: u16,
    trig_glb: u16,
    trig_adp_header: u32,
    trig_adp: u32,
    trig_sda_header: u32,
    trig_sda: u32,
    trig_mask0_header: u32,
    trig_mask0: Plane,
    trig_mask1_header: u32,
    trig_mask1: Plane,
    trig_value0_header: u32,
    trig_value0: Plane,
    trig_value1_header: u32,
    trig_value1: Plane,
    trig_edge0_header: u32,
    trig_edge0: Plane,
    trig_edge1_header: u32,
    trig_edge1: Plane,
    trig_count0_header: u32,
    trig_count0: Plane,
    trig_count1_header: u32,
    trig_count1: Plane,
    trig_logic0_header: u32,
    trig_logic0: Plane,
    trig_logic1_header: u32,
    trig_logic1: Plane,
    end_sync: u32,
}

// SAFETY: every field is zeroable, no disallowed bit patterns.
unsafe impl bytemuck::Zeroable for DslogicSettingsFrame {}
// SAFETY: the field order above leaves no implicit padding (every
// u32 field starts on a 4-byte boundary; see DESIGN.md).
unsafe impl bytemuck::Pod for DslogicSettingsFrame {}

/// Parameters the caller has already resolved (samplerate divider,
/// sample-count limit, test/loopback flags) that don't live on
/// [`TriggerModel`] itself.
pub struct DslogicSettings {
    pub mode_dso: bool,
    pub mode_analog: bool,
    pub external_clock: bool,
    pub test_internal: bool,
    pub test_external: bool,
    pub loopback: bool,
    pub rate_is_200m_or_analog: bool,
    pub rate_is_400m: bool,
    pub divider: u32,
    pub limit_samples: u32,
}

fn mode_word(settings: &DslogicSettings, trigger_enable: bool) -> u16 {
    let ext_test = (settings.test_internal || settings.test_external) as u16;
    let loopback = settings.loopback as u16;
    let trigger_en = trigger_enable as u16;
    let dslogic_mode = (settings.mode_dso || settings.mode_analog) as u16;
    let ext_clock = settings.external_clock as u16;
    let rate_200m = settings.rate_is_200m_or_analog as u16;
    let rate_400m = settings.rate_is_400m as u16;
    let analog = settings.mode_analog as u16;

    (ext_test << 15)
        | (ext_test << 14)
        | (loopback << 13)
        | trigger_en
        | (dslogic_mode << 4)
        | (ext_clock << 1)
        | (rate_200m << 5)
        | (rate_400m << 6)
        | (analog << 7)
}

/// Builds the 10 plane arrays (`mask0`..`logic1`) from the trigger
/// model, per §6.2: in `Simple` mode only plane index 0 carries live
/// data (from the terminal row); in `Advanced` mode indices
/// `0..NUM_TRIGGER_STAGES` come from stages `0..NUM_TRIGGER_STAGES`.
/// All remaining indices (and, in `Simple` mode, indices `1..STAGES`)
/// are filled with the neutral placeholder.
struct Planes {
    mask0: Plane,
    mask1: Plane,
    value0: Plane,
    value1: Plane,
    edge0: Plane,
    edge1: Plane,
    count0: Plane,
    count1: Plane,
    logic0: Plane,
    logic1: Plane,
}

fn build_planes(trigger: &TriggerModel) -> Planes {
    let mut p = Planes {
        mask0: [INERT_MASK; STAGES],
        mask1: [INERT_MASK; STAGES],
        value0: [INERT_VALUE; STAGES],
        value1: [INERT_VALUE; STAGES],
        edge0: [INERT_EDGE; STAGES],
        edge1: [INERT_EDGE; STAGES],
        count0: [INERT_COUNT; STAGES],
        count1: [INERT_COUNT; STAGES],
        logic0: [INERT_LOGIC; STAGES],
        logic1: [INERT_LOGIC; STAGES],
    };

    match trigger.mode {
        TriggerMode::Simple => {
            p.mask0[0] = trigger.simple_mask0();
            p.mask1[0] = trigger.simple_mask1();
            p.value0[0] = trigger.simple_value0();
            p.value1[0] = trigger.simple_value1();
            p.edge0[0] = trigger.simple_edge0();
            p.edge1[0] = trigger.simple_edge1();
        }
        TriggerMode::Advanced => {
            for i in 0..NUM_TRIGGER_STAGES {
                p.mask0[i] = trigger.mask0(i);
                p.mask1[i] = trigger.mask1(i);
                p.value0[i] = trigger.value0(i);
                p.value1[i] = trigger.value1(i);
                p.edge0[i] = trigger.edge0(i);
                p.edge1[i] = trigger.edge1(i);
                p.count0[i] = trigger.count(i);
                p.logic0[i] = trigger.logic(i) as u16;
            }
        }
    }
    p
}

/// Assembles the full settings frame for bulk-out transmission (§6.2).
pub fn build_settings_frame(
    trigger: &TriggerModel,
    settings: &DslogicSettings,
) -> DslogicSettingsFrame {
    let planes = build_planes(trigger);
    let trig_pos = settings.limit_samples * trigger.position as u32 / 100;
    let trig_adp = settings
        .limit_samples
        .saturating_sub(trig_pos)
        .saturating_sub(1);

    DslogicSettingsFrame {
        sync: 0xFFFF_FFFF,
        mode_header: 0x0001,
        mode: mode_word(settings, trigger.enable),
        divider_header: 0x0102_FFFF,
        divider: settings.divider,
        count_header: 0x0302_FFFF,
        count: settings.limit_samples,
        trig_pos_header: 0x0502_FFFF,
        trig_pos,
        trig_glb_header: 0x0701,
        trig_glb: trigger.stages as u16,
        trig_adp_header: 0x0A02_FFFF,
        trig_adp,
        trig_sda_header: 0x0C02_FFFF,
        trig_sda: 0,
        trig_mask0_header: 0x1010_FFFF,
        trig_mask0: planes.mask0,
        trig_mask1_header: 0x1110_FFFF,
        trig_mask1: planes.mask1,
        trig_value0_header: 0x1410_FFFF,
        trig_value0: planes.value0,
        trig_value1_header: 0x1510_FFFF,
        trig_value1: planes.value1,
        trig_edge0_header: 0x1810_FFFF,
        trig_edge0: planes.edge0,
        trig_edge1_header: 0x1910_FFFF,
        trig_edge1: planes.edge1,
        trig_count0_header: 0x1C10_FFFF,
        trig_count0: planes.count0,
        trig_count1_header: 0x1D10_FFFF,
        trig_count1: planes.count1,
        trig_logic0_header: 0x2010_FFFF,
        trig_logic0: planes.logic0,
        trig_logic1_header: 0x2110_FFFF,
        trig_logic1: planes.logic1,
        end_sync: 0,
    }
}

/// Divider for the 100 MHz DSLogic master clock (§6.2: `ceil(100MHz /
/// rate)`).
pub fn dslogic_divider(rate_hz: u64) -> u32 {
    ((100_000_000u64 + rate_hz - 1) / rate_hz) as u32
}

/// Trigger-position report, the first bulk-in frame on endpoint 6 in
/// the DSLogic path (§6.3).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct TriggerPositionReport {
    pub real_pos: u32,
    pub ram_saddr: u32,
    pub first_block: [u8; 504],
}

// SAFETY: all fields zeroable.
unsafe impl bytemuck::Zeroable for TriggerPositionReport {}
// SAFETY: no padding (u32, u32, then byte array).
unsafe impl bytemuck::Pod for TriggerPositionReport {}

#[cfg(test)]
#[path = "tests/wire.rs"]
mod tests;
