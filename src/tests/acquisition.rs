use super::*;
use crate::host_controller::tests::{MockHandle, MockHostController};
use crate::host_controller::{BusDevice, DeviceHandle, TransferId};
use crate::packet::Packet;
use crate::profile::{CandidateDevice, Channel, ChannelType, DeviceState, DslogicMode};
use crate::wire::UsbError;
use alloc::rc::Rc;
use core::cell::RefCell;

fn channel(index: u8, trigger: Option<&str>) -> Channel {
    Channel {
        index,
        channel_type: ChannelType::Logic,
        enabled: true,
        name: alloc::format!("D{index}"),
        trigger: trigger.map(|s| s.into()),
    }
}

#[test]
fn solve_samplerate_prefers_48mhz_parent() {
    let c = solve_samplerate(1_000_000, false).unwrap();
    assert!(c.clk_48mhz);
    assert_eq!(c.delay, 47);
}

#[test]
fn solve_samplerate_falls_back_to_30mhz_when_48_overflows_delay() {
    // 48MHz/20kHz needs delay 2399, over MAX_SAMPLE_DELAY; 30MHz
    // divides evenly too and its delay (1499) fits.
    let c = solve_samplerate(20_000, false).unwrap();
    assert!(!c.clk_48mhz);
    assert_eq!(c.delay, 1499);
}

#[test]
fn solve_samplerate_rejects_wide_over_12mhz() {
    let err = solve_samplerate(16_000_000, true).unwrap_err();
    assert!(matches!(
        err,
        Fx2LafwError::Protocol(ProtocolError::SamplerateNotExpressible(16_000_000))
    ));
}

#[test]
fn solve_samplerate_rejects_unexpressible_rate() {
    let err = solve_samplerate(7_000_000, false).unwrap_err();
    assert!(matches!(
        err,
        Fx2LafwError::Protocol(ProtocolError::SamplerateNotExpressible(7_000_000))
    ));
}

#[test]
fn solve_samplerate_rejects_zero() {
    assert!(solve_samplerate(0, false).is_err());
}

#[test]
fn transfer_sizing_caps_at_num_simul_transfers() {
    let (buf, n) = transfer_sizing(24_000_000, 1);
    assert!(buf % 512 == 0);
    assert!(n <= NUM_SIMUL_TRANSFERS as usize);
}

#[test]
fn transfer_sizing_never_empty() {
    let (buf, n) = transfer_sizing(20_000, 1);
    assert!(buf >= 512);
    assert!(n >= 1);
}

#[test]
fn configure_channels_widens_on_index_above_seven() {
    let channels = [channel(0, None), channel(8, None)];
    let cfg = configure_channels(&channels).unwrap();
    assert!(cfg.sample_wide);
    assert_eq!(cfg.trigger_stage, TRIGGER_FIRED);
}

#[test]
fn configure_channels_builds_mask_and_value_per_stage() {
    let channels = [channel(0, Some("01"))];
    let cfg = configure_channels(&channels).unwrap();
    assert_eq!(cfg.trigger_stage, 0);
    assert_eq!(cfg.trigger_mask[0] & 1, 1);
    assert_eq!(cfg.trigger_value[0] & 1, 0);
    assert_eq!(cfg.trigger_mask[1] & 1, 1);
    assert_eq!(cfg.trigger_value[1] & 1, 1);
}

#[test]
fn configure_channels_rejects_trigger_longer_than_stages() {
    let channels = [channel(0, Some("01010"))];
    assert!(configure_channels(&channels).is_err());
}

fn ctx_with_trigger(pattern: &[u8]) -> DeviceContext {
    let mut ctx = DeviceContext::new(false);
    ctx.limit_samples = 1000;
    ctx.trigger_stage = 0;
    for (stage, &bit) in pattern.iter().enumerate() {
        ctx.trigger_mask[stage] = 1;
        ctx.trigger_value[stage] = bit as u16;
    }
    ctx
}

#[test]
fn trigger_fires_at_offset_four_not_three() {
    // 4-stage pattern 0,0,0,1 against stream 0,0,0,0,1.
    let mut ctx = ctx_with_trigger(&[0, 0, 0, 1]);
    let mut fired_at = None;
    let mut logic_len = None;
    let data = [0u8, 0, 0, 0, 1];
    process_samples(&mut ctx, &mut |p| match p {
        Packet::Trigger { .. } => {}
        Packet::Logic { data, .. } if fired_at.is_none() => {
            fired_at = Some(());
            logic_len = Some(data.len());
        }
        _ => {}
    }, &data);
    // The match spans sample indices 1..=4 (0,0,0,1); it completes on
    // the sample at index 4, one past a naive off-by-one that would
    // fire at index 3 instead.
    assert_eq!(ctx.trigger_offset, Some(5));
    assert_eq!(logic_len, Some(4));
}

#[test]
fn trigger_never_fires_without_a_match() {
    let mut ctx = ctx_with_trigger(&[0, 0, 0, 1]);
    let mut saw_trigger = false;
    let data = [0u8, 0, 1, 0, 0];
    process_samples(&mut ctx, &mut |p| {
        if matches!(p, Packet::Trigger { .. }) {
            saw_trigger = true;
        }
    }, &data);
    assert!(!saw_trigger);
    assert_eq!(ctx.trigger_offset, None);
    assert_ne!(ctx.trigger_stage, TRIGGER_FIRED);
}

#[test]
fn trigger_state_carries_across_buffer_boundaries() {
    let mut ctx = ctx_with_trigger(&[0, 0, 0, 1]);
    let mut fired = false;
    process_samples(&mut ctx, &mut |_| {}, &[0, 0]);
    assert_ne!(ctx.trigger_stage, TRIGGER_FIRED);
    process_samples(
        &mut ctx,
        &mut |p| {
            if matches!(p, Packet::Trigger { .. }) {
                fired = true;
            }
        },
        &[0, 1],
    );
    assert!(fired);
}

#[test]
fn post_trigger_samples_stop_at_limit_and_emit_end() {
    let mut ctx = DeviceContext::new(false);
    ctx.limit_samples = 2;
    ctx.trigger_stage = TRIGGER_FIRED;
    let mut packets = alloc::vec::Vec::new();
    process_samples(&mut ctx, &mut |p| packets.push(p), &[1, 2, 3, 4]);
    assert!(ctx.ended());
    assert!(matches!(packets.last(), Some(Packet::End)));
}

#[test]
fn on_transfer_complete_no_device_aborts_immediately() {
    let mut ctx = DeviceContext::new(false);
    ctx.limit_samples = 100;
    let mut packets = alloc::vec::Vec::new();
    on_transfer_complete(&mut ctx, &mut |p| packets.push(p), TransferStatus::NoDevice, &[]);
    assert!(ctx.ended());
}

#[test]
fn on_transfer_complete_empty_transfers_eventually_abort() {
    let mut ctx = DeviceContext::new(false);
    ctx.limit_samples = 100;
    for _ in 0..=MAX_EMPTY_TRANSFERS {
        on_transfer_complete(&mut ctx, &mut |_| {}, TransferStatus::TimedOut, &[]);
    }
    assert!(ctx.ended());
}

#[test]
fn on_transfer_complete_cancelled_is_a_no_op() {
    let mut ctx = DeviceContext::new(false);
    ctx.limit_samples = 100;
    on_transfer_complete(&mut ctx, &mut |_| {}, TransferStatus::Cancelled, &[]);
    assert!(!ctx.ended());
    assert_eq!(ctx.empty_transfer_count, 0);
}

#[test]
fn end_acquisition_is_idempotent() {
    let mut ctx = DeviceContext::new(false);
    ctx.limit_samples = 10;
    let mut end_count = 0;
    let mut consumer = |p: Packet| {
        if matches!(p, Packet::End) {
            end_count += 1;
        }
    };
    end_acquisition(&mut ctx, &mut consumer);
    end_acquisition(&mut ctx, &mut consumer);
    assert_eq!(end_count, 1);
}

#[test]
fn end_acquisition_waits_for_outstanding_transfers_to_drain() {
    let mut ctx = DeviceContext::new(false);
    ctx.limit_samples = 10;
    ctx.submitted_transfers = 2;
    let mut end_count = 0;
    end_acquisition(&mut ctx, &mut |p| {
        if matches!(p, Packet::End) {
            end_count += 1;
        }
    });
    assert_eq!(end_count, 0);
    on_transfer_drained(&mut ctx, &mut |p| {
        if matches!(p, Packet::End) {
            end_count += 1;
        }
    });
    assert_eq!(end_count, 0);
    on_transfer_drained(&mut ctx, &mut |p| {
        if matches!(p, Packet::End) {
            end_count += 1;
        }
    });
    assert_eq!(end_count, 1);
}

#[test]
fn firmware_version_mismatch_is_rejected() {
    let mut host = MockHostController::new();
    host.expect_control_in().returning(|_, _, buf, _| {
        buf[0] = 2;
        buf[1] = 0;
        Ok(2)
    });
    let mut handle = MockHandle::new();
    handle.expect_clone().returning(MockHandle::new);
    let err = check_firmware_version(&host, &handle).unwrap_err();
    assert!(matches!(
        err,
        Fx2LafwError::Protocol(ProtocolError::FirmwareVersionMismatch { found: 2, required: 1 })
    ));
}

#[test]
fn firmware_version_match_is_accepted() {
    let mut host = MockHostController::new();
    host.expect_control_in().returning(|_, _, buf, _| {
        buf[0] = 1;
        buf[1] = 7;
        Ok(2)
    });
    let mut handle = MockHandle::new();
    handle.expect_clone().returning(MockHandle::new);
    let (major, minor) = check_firmware_version(&host, &handle).unwrap();
    assert_eq!(major, 1);
    assert_eq!(minor, 7);
}

#[test]
fn firmware_version_transport_error_propagates() {
    let mut host = MockHostController::new();
    host.expect_control_in().returning(|_, _, _, _| Err(UsbError::NoDevice));
    let mut handle = MockHandle::new();
    handle.expect_clone().returning(MockHandle::new);
    assert!(check_firmware_version(&host, &handle).is_err());
}

fn mock_handle(address: u8) -> MockHandle {
    let mut h = MockHandle::new();
    h.expect_clone().returning(MockHandle::new);
    h.expect_address().return_const(address);
    h
}

fn resident_candidate() -> CandidateDevice<'static> {
    CandidateDevice {
        profile: &crate::profile::PROFILES[0],
        bus: 1,
        address: 5,
        channels: Vec::new(),
        state: DeviceState::Inactive,
        fw_updated_us: 0,
    }
}

fn awaiting_renumeration_candidate() -> CandidateDevice<'static> {
    CandidateDevice {
        profile: &crate::profile::PROFILES[0],
        bus: 1,
        address: UNKNOWN_ADDRESS,
        channels: Vec::new(),
        state: DeviceState::AwaitingRenumeration,
        fw_updated_us: 1,
    }
}

#[test]
fn open_device_opens_claims_and_checks_firmware_for_a_known_address() {
    let mut host = MockHostController::new();
    host.expect_enumerate().returning(|_| {
        alloc::vec![BusDevice {
            bus: 1,
            address: 5,
            vendor_id: crate::profile::PROFILES[0].vendor_id,
            product_id: crate::profile::PROFILES[0].product_id,
        }]
    });
    host.expect_open().times(1).returning(|_| Ok(mock_handle(5)));
    host.expect_claim().times(1).returning(|_, _| Ok(()));
    host.expect_control_in().returning(|_, _, buf, _| {
        buf[0] = 1;
        buf[1] = 3;
        Ok(2)
    });

    let candidate = resident_candidate();
    let mut sleeps = 0;
    let handle = open_device(&host, &candidate, &mut |_| sleeps += 1).unwrap();
    assert_eq!(handle.address(), 5);
    assert_eq!(sleeps, 0);
}

#[test]
fn open_device_waits_for_renumeration_then_opens() {
    let mut host = MockHostController::new();
    let calls = Rc::new(RefCell::new(0u32));
    let calls2 = calls.clone();
    host.expect_enumerate().returning(move |_| {
        let mut n = calls2.borrow_mut();
        *n += 1;
        if *n < 3 {
            Vec::new()
        } else {
            alloc::vec![BusDevice {
                bus: 1,
                address: 9,
                vendor_id: crate::profile::PROFILES[0].vendor_id,
                product_id: crate::profile::PROFILES[0].product_id,
            }]
        }
    });
    host.expect_open().returning(|_| Ok(mock_handle(9)));
    host.expect_claim().returning(|_, _| Ok(()));
    host.expect_control_in().returning(|_, _, buf, _| {
        buf[0] = 1;
        buf[1] = 0;
        Ok(2)
    });

    let candidate = awaiting_renumeration_candidate();
    let mut sleeps = 0;
    let handle = open_device(&host, &candidate, &mut |_| sleeps += 1).unwrap();
    assert_eq!(handle.address(), 9);
    // Two empty scans precede the one that finds the device.
    assert_eq!(sleeps, 2);
}

#[test]
fn open_device_times_out_if_never_renumerates() {
    let mut host = MockHostController::new();
    host.expect_enumerate().returning(|_| Vec::new());

    let candidate = awaiting_renumeration_candidate();
    let mut sleeps = 0;
    let err = open_device(&host, &candidate, &mut |_| sleeps += 1).unwrap_err();
    assert!(matches!(err, Fx2LafwError::Resource(_)));
    assert_eq!(sleeps, (RENUMERATION_CEILING.as_millis() / RENUMERATION_POLL_INTERVAL.as_millis()) as u32);
}

#[test]
fn open_device_propagates_firmware_mismatch() {
    let mut host = MockHostController::new();
    host.expect_enumerate().returning(|_| {
        alloc::vec![BusDevice {
            bus: 1,
            address: 5,
            vendor_id: crate::profile::PROFILES[0].vendor_id,
            product_id: crate::profile::PROFILES[0].product_id,
        }]
    });
    host.expect_open().returning(|_| Ok(mock_handle(5)));
    host.expect_claim().returning(|_, _| Ok(()));
    host.expect_control_in().returning(|_, _, buf, _| {
        buf[0] = 2;
        buf[1] = 0;
        Ok(2)
    });

    let candidate = resident_candidate();
    let err = open_device(&host, &candidate, &mut |_| {}).unwrap_err();
    assert!(matches!(
        err,
        Fx2LafwError::Protocol(ProtocolError::FirmwareVersionMismatch { found: 2, required: 1 })
    ));
}

#[test]
fn start_dslogic_builds_and_streams_settings_frame() {
    let mut host = MockHostController::new();
    host.expect_control_out().returning(|_, _, _, _| Ok(()));
    let bulk_out_calls: Rc<RefCell<Vec<Vec<u8>>>> = Rc::new(RefCell::new(Vec::new()));
    let bulk_out_calls2 = bulk_out_calls.clone();
    host.expect_bulk_out_sync().returning_st(move |_, _, data, _| {
        bulk_out_calls2.borrow_mut().push(data.to_vec());
        Ok(data.len())
    });
    host.expect_bulk_submit().returning(|_, _, _, _| TransferId(1));

    let mut handle = MockHandle::new();
    handle.expect_clone().returning(MockHandle::new);

    let mut ctx = DeviceContext::new(true);
    ctx.dslogic_mode = DslogicMode::Logic;
    ctx.samplerate_hz = 24_000_000;
    ctx.limit_samples = 1000;
    ctx.trigger.probe_set(0, crate::trigger::SYM_HIGH, crate::trigger::SYM_HIGH);

    let acq = Acquisition::new(Rc::new(host), handle, ctx);
    let packets: Rc<RefCell<Vec<Packet>>> = Rc::new(RefCell::new(Vec::new()));
    let packets2 = packets.clone();
    let consumer: Rc<RefCell<dyn FnMut(Packet)>> =
        Rc::new(RefCell::new(move |p: Packet| packets2.borrow_mut().push(p)));

    acq.start_dslogic(&[0xAAu8; 16], consumer).unwrap();

    let calls = bulk_out_calls.borrow();
    // First call streams the bitstream, second the settings frame.
    assert_eq!(calls.len(), 2);
    let settings_bytes = &calls[1];
    assert_eq!(
        settings_bytes.len(),
        core::mem::size_of::<crate::wire::DslogicSettingsFrame>()
    );
    assert_eq!(&settings_bytes[0..4], &[0xFF, 0xFF, 0xFF, 0xFF]);
    assert!(matches!(packets.borrow().first(), Some(Packet::Header)));
}
