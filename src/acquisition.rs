//! Acquisition state machine (§4.4): per-device lifecycle, software
//! multi-stage triggering, and the DSLogic two-phase startup.

extern crate alloc;

use crate::config::TestMode;
use crate::error::{Fx2LafwError, ProtocolError};
use crate::host_controller::{BulkCompletion, CompletedTransfer, HostController};
use crate::log;
use crate::packet::{MeasuredQuantity, Packet, TestModeChecker};
use crate::profile::{CandidateDevice, Channel, DeviceState, DslogicMode};
use crate::trigger::{TriggerModel, NUM_TRIGGER_STAGES};
use crate::wire::{self, TransferStatus};
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::time::Duration;

pub const MAX_SAMPLE_DELAY: u32 = 1536;
pub const NUM_SIMUL_TRANSFERS: u32 = 32;
pub const MAX_EMPTY_TRANSFERS: u32 = 2 * NUM_SIMUL_TRANSFERS;
pub const TRIGGER_FIRED: i8 = -1;
pub const REQUIRED_FW_MAJOR: u8 = 1;
/// Address sentinel [`crate::profile::scan`] stamps on a candidate
/// still awaiting re-numeration (§4.2 "Open lifecycle").
pub const UNKNOWN_ADDRESS: u8 = 0xFF;
pub const RENUMERATION_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const RENUMERATION_CEILING: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionSubstate {
    Error,
    Init,
    Start,
    Triggered,
    Data,
    Stop,
}

/// The (delay, clock-48MHz?) pair a successful samplerate solve
/// produces (§4.4.1 step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSetting {
    pub delay: u16,
    pub clk_48mhz: bool,
}

/// Picks the delay register value and parent clock for `rate_hz`,
/// preferring the 48 MHz parent when it both divides evenly and stays
/// within [`MAX_SAMPLE_DELAY`] (§4.4.1 step 2).
pub fn solve_samplerate(rate_hz: u64, sample_wide: bool) -> Result<ClockSetting, Fx2LafwError> {
    if rate_hz == 0 {
        return Err(Fx2LafwError::Arg("samplerate must be nonzero"));
    }
    if sample_wide && rate_hz > 12_000_000 {
        return Err(ProtocolError::SamplerateNotExpressible(rate_hz).into());
    }
    const CLK_48MHZ: u64 = 48_000_000;
    const CLK_30MHZ: u64 = 30_000_000;
    if CLK_48MHZ % rate_hz == 0 {
        let delay = CLK_48MHZ / rate_hz - 1;
        if delay <= MAX_SAMPLE_DELAY as u64 {
            return Ok(ClockSetting {
                delay: delay as u16,
                clk_48mhz: true,
            });
        }
    }
    if CLK_30MHZ % rate_hz == 0 {
        let delay = CLK_30MHZ / rate_hz - 1;
        return Ok(ClockSetting {
            delay: delay as u16,
            clk_48mhz: false,
        });
    }
    Err(ProtocolError::SamplerateNotExpressible(rate_hz).into())
}

fn round_up_512(n: u64) -> u64 {
    n.div_ceil(512) * 512
}

/// Buffer size and transfer count for the continuous bulk-in pipeline
/// (§4.4.1 step 3): 10 ms worth of samples per buffer (rounded to 512
/// bytes), at most 32 buffers and never more than 500 ms of total
/// buffering.
pub fn transfer_sizing(rate_hz: u64, width: usize) -> (usize, usize) {
    let width = width as u64;
    let bytes_per_10ms = rate_hz * width / 100;
    let buffer_size = round_up_512(bytes_per_10ms).max(512);
    let bytes_per_500ms = rate_hz * width / 2;
    let num_transfers = (bytes_per_500ms / buffer_size).clamp(1, NUM_SIMUL_TRANSFERS as u64);
    (buffer_size as usize, num_transfers as usize)
}

pub struct ChannelConfig {
    pub sample_wide: bool,
    pub trigger_mask: [u16; NUM_TRIGGER_STAGES],
    pub trigger_value: [u16; NUM_TRIGGER_STAGES],
    pub trigger_stage: i8,
}

/// Scans enabled channels, widens the sample if any enabled channel
/// has index > 7, and builds the software-trigger mask/value arrays
/// from each channel's trigger string (§4.4.1 step 1).
pub fn configure_channels(channels: &[Channel]) -> Result<ChannelConfig, Fx2LafwError> {
    let mut sample_wide = false;
    let mut trigger_mask = [0u16; NUM_TRIGGER_STAGES];
    let mut trigger_value = [0u16; NUM_TRIGGER_STAGES];
    let mut any_trigger = false;

    for ch in channels.iter().filter(|c| c.enabled) {
        if ch.index > 7 {
            sample_wide = true;
        }
        if let Some(trig) = &ch.trigger {
            if trig.len() > NUM_TRIGGER_STAGES {
                return Err(Fx2LafwError::Arg("trigger string longer than NUM_TRIGGER_STAGES"));
            }
            any_trigger = true;
            for (stage, c) in trig.bytes().enumerate() {
                trigger_mask[stage] |= 1 << ch.index;
                if c == b'1' {
                    trigger_value[stage] |= 1 << ch.index;
                }
            }
        }
    }

    Ok(ChannelConfig {
        sample_wide,
        trigger_mask,
        trigger_value,
        trigger_stage: if any_trigger { 0 } else { TRIGGER_FIRED },
    })
}

/// Per-device mutable acquisition state (§3 "Device Context").
pub struct DeviceContext {
    pub is_dslogic: bool,
    pub sample_wide: bool,
    pub samplerate_hz: u64,
    pub limit_samples: u32,
    pub num_samples: i64,
    pub trigger_offset: Option<u64>,
    pub trigger_mask: [u16; NUM_TRIGGER_STAGES],
    pub trigger_value: [u16; NUM_TRIGGER_STAGES],
    pub trigger_stage: i8,
    pretrigger_buffer: Vec<u8>,
    pub submitted_transfers: u32,
    pub empty_transfer_count: u32,
    pub packet_has_error: bool,
    pub dslogic_mode: DslogicMode,
    pub dslogic_test: TestMode,
    pub external_clock: bool,
    pub substate: AcquisitionSubstate,
    pub trigger: TriggerModel,
    test_checker: TestModeChecker,
    end_emitted: bool,
}

impl DeviceContext {
    pub fn new(is_dslogic: bool) -> Self {
        Self {
            is_dslogic,
            sample_wide: false,
            samplerate_hz: 0,
            limit_samples: 0,
            num_samples: 0,
            trigger_offset: None,
            trigger_mask: [0; NUM_TRIGGER_STAGES],
            trigger_value: [0; NUM_TRIGGER_STAGES],
            trigger_stage: TRIGGER_FIRED,
            pretrigger_buffer: Vec::new(),
            submitted_transfers: 0,
            empty_transfer_count: 0,
            packet_has_error: false,
            dslogic_mode: DslogicMode::Logic,
            dslogic_test: TestMode::None,
            external_clock: false,
            substate: AcquisitionSubstate::Init,
            trigger: TriggerModel::new(),
            test_checker: TestModeChecker::new(),
            end_emitted: false,
        }
    }

    pub fn width(&self) -> usize {
        if self.sample_wide {
            2
        } else {
            1
        }
    }

    fn is_analog_tail(&self) -> bool {
        self.is_dslogic
            && matches!(self.dslogic_mode, DslogicMode::Dso | DslogicMode::Analog)
    }

    /// `num_samples == -1` is the "acquisition ended" sentinel; once
    /// set, every later completion is discarded (§3 invariant).
    pub fn ended(&self) -> bool {
        self.num_samples < 0
    }

    /// Derives the settings-frame fields [`TriggerModel`] doesn't
    /// itself carry, from this context's mode/rate/test-mode state
    /// (§6.2 `mode` word composition).
    fn dslogic_settings(&self) -> wire::DslogicSettings {
        let mode_analog = matches!(self.dslogic_mode, DslogicMode::Analog);
        wire::DslogicSettings {
            mode_dso: matches!(self.dslogic_mode, DslogicMode::Dso),
            mode_analog,
            external_clock: self.external_clock,
            test_internal: self.dslogic_test == TestMode::Internal,
            test_external: self.dslogic_test == TestMode::External,
            loopback: self.dslogic_test == TestMode::DramLoopback,
            rate_is_200m_or_analog: self.samplerate_hz == 200_000_000 || mode_analog,
            rate_is_400m: self.samplerate_hz == 400_000_000,
            divider: wire::dslogic_divider(self.samplerate_hz),
            limit_samples: self.limit_samples,
        }
    }
}

/// Processes one arrived buffer of samples: advances the software
/// trigger state machine (when armed) and emits LOGIC/ANALOG/TRIGGER
/// packets to `consumer` (§4.4.1 "Software trigger").
pub fn process_samples(ctx: &mut DeviceContext, consumer: &mut dyn FnMut(Packet), new_data: &[u8]) {
    if ctx.ended() {
        return;
    }
    let width = ctx.width();
    if width == 0 || new_data.is_empty() && ctx.trigger_stage == TRIGGER_FIRED {
        return;
    }

    if ctx.trigger_stage == TRIGGER_FIRED {
        emit_post_trigger(ctx, consumer, new_data, width);
        return;
    }

    let mut combined = core::mem::take(&mut ctx.pretrigger_buffer);
    combined.extend_from_slice(new_data);
    let samples = combined.len() / width;
    // The retained prefix (if any) already matched stages
    // `0..trigger_stage` in a prior call; resume just past it instead
    // of re-checking it against those same stage indices again.
    let mut i: usize = ctx.trigger_stage.max(0) as usize;

    while i < samples {
        if ctx.trigger_stage == TRIGGER_FIRED {
            break;
        }
        let stage = ctx.trigger_stage as usize;
        let sample = read_sample(&combined, i, width);
        if sample & ctx.trigger_mask[stage] == ctx.trigger_value[stage] {
            ctx.trigger_stage += 1;
            let matched = ctx.trigger_stage as usize;
            let fires = matched == NUM_TRIGGER_STAGES
                || (matched < NUM_TRIGGER_STAGES && ctx.trigger_mask[matched] == 0);
            if fires {
                let matched_start = i - stage;
                consumer(Packet::Trigger { payload: None });
                let matched_bytes = combined[matched_start * width..(i + 1) * width].to_vec();
                consumer(Packet::Logic {
                    data: matched_bytes,
                    unit_size: width,
                });
                ctx.trigger_stage = TRIGGER_FIRED;
                ctx.trigger_offset = Some((i + 1) as u64);
                let tail = combined[(i + 1) * width..].to_vec();
                ctx.pretrigger_buffer.clear();
                emit_post_trigger(ctx, consumer, &tail, width);
                return;
            }
            i += 1;
        } else if stage == 0 {
            i += 1;
        } else {
            // Roll back to just past the original match start and
            // retry from stage 0 (naive restart, needed so a pattern
            // like "0001" still matches the suffix of "00001").
            i -= stage;
            ctx.trigger_stage = 0;
            i += 1;
        }
    }

    let keep = ctx.trigger_stage.max(0) as usize;
    let keep_from = samples.saturating_sub(keep);
    ctx.pretrigger_buffer = combined[keep_from * width..samples * width].to_vec();
}

fn read_sample(data: &[u8], index: usize, width: usize) -> u16 {
    if width == 1 {
        data[index] as u16
    } else {
        let o = index * 2;
        u16::from_le_bytes([data[o], data[o + 1]])
    }
}

/// Emits the post-trigger tail, truncated to the remaining sample
/// budget, and aborts once `limit_samples` is reached (§4.4.1, tail
/// after "Once fired").
fn emit_post_trigger(ctx: &mut DeviceContext, consumer: &mut dyn FnMut(Packet), data: &[u8], width: usize) {
    if ctx.ended() || data.is_empty() {
        return;
    }
    let remaining = (ctx.limit_samples as i64 - ctx.num_samples).max(0) as usize;
    let max_bytes = remaining * width;
    let take = data.len().min(max_bytes);
    if take > 0 {
        let chunk = data[..take].to_vec();
        if matches!(ctx.dslogic_test, TestMode::Internal | TestMode::External) {
            let stop_on_mismatch = ctx.dslogic_test == TestMode::External;
            let mismatches_before = ctx.test_checker.mismatches;
            ctx.test_checker.check_buffer(&chunk, stop_on_mismatch);
            if ctx.test_checker.mismatches > mismatches_before {
                log::warn!("dslogic test-mode sample mismatch");
            }
        }
        let packet = if ctx.is_analog_tail() {
            Packet::Analog {
                num_samples: chunk.len() / width,
                data: chunk,
                measured_quantity: MeasuredQuantity::Voltage,
                quantity_flags: 0,
            }
        } else {
            Packet::Logic {
                data: chunk,
                unit_size: width,
            }
        };
        consumer(packet);
        ctx.num_samples += (take / width) as i64;
    }
    if ctx.num_samples as u64 >= ctx.limit_samples as u64 {
        end_acquisition(ctx, consumer);
    }
}

/// Marks the acquisition as ended and, if every in-flight transfer has
/// already drained, emits the final `END` packet. Idempotent (§5
/// "Cancellation").
fn end_acquisition(ctx: &mut DeviceContext, consumer: &mut dyn FnMut(Packet)) {
    ctx.num_samples = -1;
    if ctx.submitted_transfers == 0 && !ctx.end_emitted {
        consumer(Packet::End);
        ctx.end_emitted = true;
    }
}

/// Drives `ctx` into its terminal state: sets the ended sentinel and
/// relies on the caller to cancel every outstanding transfer via the
/// transport (§4.4.2 `abort`). Safe to call more than once.
pub fn abort(ctx: &mut DeviceContext, consumer: &mut dyn FnMut(Packet)) {
    end_acquisition(ctx, consumer);
}

/// Records one transfer's completion against the shared transfer
/// count; callers invoke this from their `bulk_submit` completion
/// closure (§4.4.1 "Completion handler").
pub fn on_transfer_drained(ctx: &mut DeviceContext, consumer: &mut dyn FnMut(Packet)) {
    ctx.submitted_transfers = ctx.submitted_transfers.saturating_sub(1);
    if ctx.ended() && ctx.submitted_transfers == 0 && !ctx.end_emitted {
        consumer(Packet::End);
        ctx.end_emitted = true;
    }
}

/// Applies one transfer's completion status and data, following the
/// empty/error-transfer bookkeeping in §4.4.1.
pub fn on_transfer_complete(
    ctx: &mut DeviceContext,
    consumer: &mut dyn FnMut(Packet),
    status: TransferStatus,
    data: &[u8],
) {
    if ctx.ended() {
        return;
    }
    match status {
        TransferStatus::NoDevice => {
            abort(ctx, consumer);
            return;
        }
        TransferStatus::Completed | TransferStatus::TimedOut => {
            if data.is_empty() {
                ctx.empty_transfer_count += 1;
            } else {
                ctx.empty_transfer_count = 0;
                process_samples(ctx, consumer, data);
            }
        }
        TransferStatus::Cancelled => {}
        TransferStatus::Other => {
            ctx.empty_transfer_count += 1;
            ctx.packet_has_error = true;
        }
    }
    if ctx.empty_transfer_count > MAX_EMPTY_TRANSFERS {
        abort(ctx, consumer);
    }
}

/// Ties [`DeviceContext`] to a live [`HostController`], issuing the
/// control/bulk traffic the pure state-machine functions above don't
/// know how to perform themselves.
pub struct Acquisition<H: HostController> {
    host: Rc<H>,
    handle: H::Handle,
    ctx: Rc<RefCell<DeviceContext>>,
    transfer_ids: Rc<RefCell<Vec<crate::host_controller::TransferId>>>,
}

impl<H: HostController + 'static> Acquisition<H> {
    pub fn new(host: Rc<H>, handle: H::Handle, ctx: DeviceContext) -> Self {
        Self {
            host,
            handle,
            ctx: Rc::new(RefCell::new(ctx)),
            transfer_ids: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn context(&self) -> core::cell::Ref<'_, DeviceContext> {
        self.ctx.borrow()
    }

    /// Cancels every outstanding transfer and marks the acquisition as
    /// ended (§4.4.2 `abort`). Idempotent: a second call finds nothing
    /// left to cancel and [`end_acquisition`] is itself idempotent.
    pub fn abort(&self, consumer: &mut dyn FnMut(Packet)) {
        abort(&mut self.ctx.borrow_mut(), consumer);
        for id in self.transfer_ids.borrow_mut().drain(..) {
            self.host.bulk_cancel(&self.handle, id);
        }
    }

    fn submit_buffers(
        &self,
        endpoint: u8,
        buffer_size: usize,
        num_transfers: usize,
        consumer: Rc<RefCell<dyn FnMut(Packet)>>,
    ) {
        let mut ctx = self.ctx.borrow_mut();
        for _ in 0..num_transfers {
            let buf = alloc::vec![0u8; buffer_size];
            let ctx_rc = self.ctx.clone();
            let consumer_rc = consumer.clone();
            let completion: BulkCompletion = alloc::boxed::Box::new(move |t: CompletedTransfer| {
                let mut ctx = ctx_rc.borrow_mut();
                let mut consumer = consumer_rc.borrow_mut();
                on_transfer_complete(&mut ctx, &mut *consumer, t.status, &t.buffer[..t.actual_length]);
                on_transfer_drained(&mut ctx, &mut *consumer);
            });
            let id = self.host.bulk_submit(&self.handle, endpoint, buf, completion);
            self.transfer_ids.borrow_mut().push(id);
            ctx.submitted_transfers += 1;
        }
    }

    /// Base-variant `start()` (§4.4.1): configure channels, solve the
    /// samplerate, preallocate and submit bulk-in buffers, and send
    /// `CMD_START`.
    pub fn start_base(
        &self,
        channels: &[Channel],
        consumer: Rc<RefCell<dyn FnMut(Packet)>>,
    ) -> Result<(), Fx2LafwError> {
        let cfg = configure_channels(channels)?;
        {
            let mut ctx = self.ctx.borrow_mut();
            ctx.sample_wide = cfg.sample_wide;
            ctx.trigger_mask = cfg.trigger_mask;
            ctx.trigger_value = cfg.trigger_value;
            ctx.trigger_stage = cfg.trigger_stage;
        }
        let (rate, width) = {
            let ctx = self.ctx.borrow();
            (ctx.samplerate_hz, ctx.width())
        };
        let clock = solve_samplerate(rate, width == 2)?;
        let (buffer_size, num_transfers) = transfer_sizing(rate, width);
        self.submit_buffers(wire::BULK_IN_EP_BASE, buffer_size, num_transfers, consumer.clone());

        let mut flags = 0u8;
        if width == 2 {
            flags |= wire::start_flags::WIDE_16BIT;
        }
        if clock.clk_48mhz {
            flags |= wire::start_flags::CLK_48MHZ;
        }
        let payload = [flags, (clock.delay >> 8) as u8, (clock.delay & 0xFF) as u8];
        let setup = start_setup(wire::request::base::START, payload.len() as u16);
        self.host
            .control_out(&self.handle, setup, &payload, Duration::from_millis(3000))?;

        self.ctx.borrow_mut().substate = AcquisitionSubstate::Start;
        (consumer.borrow_mut())(Packet::Header);
        Ok(())
    }

    /// DSLogic-variant startup (§4.4.2): stop, configure FPGA, stream
    /// settings, then wait for the trigger-position report before
    /// submitting the data pipeline. The settings frame is built here,
    /// from the context's own [`TriggerModel`] and mode/rate state, via
    /// [`wire::build_settings_frame`].
    pub fn start_dslogic(
        &self,
        bitstream: &[u8],
        consumer: Rc<RefCell<dyn FnMut(Packet)>>,
    ) -> Result<(), Fx2LafwError> {
        let stop = start_setup(wire::request::dslogic::START, 3);
        let stop_payload = [wire::start_flags::DSLOGIC_STOP, 0, 0];
        self.host
            .control_out(&self.handle, stop, &stop_payload, Duration::from_millis(3000))?;

        let fpga_config = start_setup(wire::request::dslogic::FPGA_CONFIG, 0);
        self.host
            .control_out(&self.handle, fpga_config, &[], Duration::from_millis(3000))?;

        for chunk in bitstream.chunks(340_604) {
            let written = self
                .host
                .bulk_out_sync(&self.handle, wire::BULK_OUT_EP, chunk, Duration::from_millis(1000))?;
            if written != chunk.len() {
                return Err(ProtocolError::ShortBitstreamTransfer.into());
            }
        }

        let frame = {
            let ctx = self.ctx.borrow();
            let settings = ctx.dslogic_settings();
            wire::build_settings_frame(&ctx.trigger, &settings)
        };
        let settings_frame = bytemuck::bytes_of(&frame);

        let count = settings_frame.len() as u32;
        let setting = start_setup(wire::request::dslogic::FPGA_SETTING, 3);
        let count_payload = [
            (count & 0xFF) as u8,
            ((count >> 8) & 0xFF) as u8,
            ((count >> 16) & 0xFF) as u8,
        ];
        self.host
            .control_out(&self.handle, setting, &count_payload, Duration::from_millis(3000))?;
        let written = self.host.bulk_out_sync(
            &self.handle,
            wire::BULK_OUT_EP,
            settings_frame,
            Duration::from_millis(3000),
        )?;
        if written != settings_frame.len() {
            return Err(ProtocolError::ShortBitstreamTransfer.into());
        }

        self.ctx.borrow_mut().substate = AcquisitionSubstate::Start;

        let ctx_rc = self.ctx.clone();
        let host = self.host.clone();
        let handle = self.handle.clone();
        let consumer_rc = consumer.clone();
        let transfer_ids = self.transfer_ids.clone();
        let report_buf = alloc::vec![0u8; core::mem::size_of::<wire::TriggerPositionReport>()];
        let completion: BulkCompletion = alloc::boxed::Box::new(move |t: CompletedTransfer| {
            let mut ctx = ctx_rc.borrow_mut();
            let mut cons = consumer_rc.borrow_mut();
            ctx.submitted_transfers = ctx.submitted_transfers.saturating_sub(1);
            if t.status != TransferStatus::Completed {
                ctx.substate = AcquisitionSubstate::Error;
                abort(&mut ctx, &mut *cons);
                return;
            }
            cons(Packet::Trigger {
                payload: Some(t.buffer[..t.actual_length].to_vec()),
            });
            ctx.substate = AcquisitionSubstate::Triggered;
            let (endpoint, buffer_size, num_transfers) = match ctx.dslogic_mode {
                DslogicMode::Analog => (wire::BULK_IN_EP_DSLOGIC, 128usize, 16usize),
                DslogicMode::Dso => (wire::BULK_IN_EP_DSLOGIC, 16384usize, 8usize),
                DslogicMode::Logic => {
                    let (bs, nt) = transfer_sizing(ctx.samplerate_hz, ctx.width());
                    (wire::BULK_IN_EP_DSLOGIC, bs, nt)
                }
            };
            drop(ctx);
            drop(cons);
            for _ in 0..num_transfers {
                let buf = alloc::vec![0u8; buffer_size];
                let ctx_rc2 = ctx_rc.clone();
                let consumer_rc2 = consumer_rc.clone();
                let completion: BulkCompletion = alloc::boxed::Box::new(move |t: CompletedTransfer| {
                    let mut ctx = ctx_rc2.borrow_mut();
                    let mut cons = consumer_rc2.borrow_mut();
                    on_transfer_complete(&mut ctx, &mut *cons, t.status, &t.buffer[..t.actual_length]);
                    on_transfer_drained(&mut ctx, &mut *cons);
                });
                let id = host.bulk_submit(&handle, endpoint, buf, completion);
                transfer_ids.borrow_mut().push(id);
                ctx_rc.borrow_mut().submitted_transfers += 1;
            }
            ctx_rc.borrow_mut().substate = AcquisitionSubstate::Data;
        });
        self.ctx.borrow_mut().submitted_transfers += 1;
        let id = self
            .host
            .bulk_submit(&self.handle, wire::BULK_IN_EP_DSLOGIC, report_buf, completion);
        self.transfer_ids.borrow_mut().push(id);

        (consumer.borrow_mut())(Packet::Header);
        Ok(())
    }
}

fn start_setup(request: u8, length: u16) -> wire::SetupPacket {
    wire::SetupPacket {
        bmRequestType: wire::HOST_TO_DEVICE | wire::VENDOR_REQUEST | wire::RECIPIENT_DEVICE,
        bRequest: request,
        wValue: 0,
        wIndex: 0,
        wLength: length,
    }
}

/// Reads the firmware version and refuses to proceed unless the major
/// version matches (§4.2 "Open lifecycle").
pub fn check_firmware_version<H: HostController>(
    host: &H,
    handle: &H::Handle,
) -> Result<(u8, u8), Fx2LafwError> {
    let setup = wire::SetupPacket {
        bmRequestType: wire::DEVICE_TO_HOST | wire::VENDOR_REQUEST | wire::RECIPIENT_DEVICE,
        bRequest: wire::request::GET_FW_VERSION,
        wValue: 0,
        wIndex: 0,
        wLength: 2,
    };
    let mut buf = [0u8; 2];
    host.control_in(handle, setup, &mut buf, Duration::from_millis(100))
        .map_err(Fx2LafwError::from)?;
    let (major, minor) = (buf[0], buf[1]);
    if major != REQUIRED_FW_MAJOR {
        return Err(ProtocolError::FirmwareVersionMismatch {
            found: major,
            required: REQUIRED_FW_MAJOR,
        }
        .into());
    }
    Ok((major, minor))
}

/// Completes the "Open lifecycle" (§4.2) for a device [`crate::profile::scan`]
/// already profile-matched: re-scans the bus (waiting in
/// [`RENUMERATION_POLL_INTERVAL`] increments, up to
/// [`RENUMERATION_CEILING`], if `candidate` is still
/// [`DeviceState::AwaitingRenumeration`]), matches by (bus, address)
/// once known or by (vendor, product) alone while the address is still
/// the `0xFF` unknown-address sentinel, opens, claims interface 0, and
/// gates on the firmware major version.
pub fn open_device<H: HostController>(
    host: &H,
    candidate: &CandidateDevice,
    sleep: &mut dyn FnMut(Duration),
) -> Result<H::Handle, Fx2LafwError> {
    let waiting = candidate.state == DeviceState::AwaitingRenumeration;
    let mut waited = Duration::ZERO;
    let dev = loop {
        let found = host.enumerate(None).into_iter().find(|d| {
            d.vendor_id == candidate.profile.vendor_id
                && d.product_id == candidate.profile.product_id
                && (candidate.address == UNKNOWN_ADDRESS
                    || (d.bus == candidate.bus && d.address == candidate.address))
        });
        match found {
            Some(dev) => break dev,
            None if waiting && waited < RENUMERATION_CEILING => {
                sleep(RENUMERATION_POLL_INTERVAL);
                waited += RENUMERATION_POLL_INTERVAL;
            }
            None => {
                return Err(Fx2LafwError::Resource(
                    "device did not appear on the bus within the renumeration ceiling",
                ));
            }
        }
    };

    let handle = host.open(&dev)?;
    host.claim(&handle, 0)?;
    check_firmware_version(host, &handle)?;
    Ok(handle)
}

#[cfg(all(test, feature = "std"))]
#[path = "tests/acquisition.rs"]
mod tests;
